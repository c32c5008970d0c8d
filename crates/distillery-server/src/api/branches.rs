use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use distillery_core::Branch;
use distillery_learning::{BranchPatch, MergeOutcome};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::training::ActorQuery;
use super::{map_learning_error, ApiError, ApiResponse, AppState};

pub(super) async fn create_branch(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(training_data_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<Branch>>), ApiError> {
    let branch = state
        .training
        .versions()
        .create_branch(training_data_id, Utc::now())
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(branch, req_id.0))))
}

pub(super) async fn update_branch(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(branch_id): Path<Uuid>,
    Json(patch): Json<BranchPatch>,
) -> Result<Json<ApiResponse<Branch>>, ApiError> {
    let branch = state
        .training
        .versions()
        .update_branch(branch_id, patch)
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(branch, req_id.0)))
}

/// A conflicted merge writes nothing and answers `409` with the field-level
/// conflicts in `data`.
pub(super) async fn merge_branch(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(branch_id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> Result<(StatusCode, Json<ApiResponse<MergeOutcome>>), ApiError> {
    let outcome = state
        .training
        .versions()
        .merge_branch(branch_id, actor.user_id.as_deref(), Utc::now())
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;

    let status = match outcome {
        MergeOutcome::Merged { .. } => StatusCode::OK,
        MergeOutcome::Conflicted { .. } => StatusCode::CONFLICT,
    };
    Ok((status, Json(ApiResponse::new(outcome, req_id.0))))
}
