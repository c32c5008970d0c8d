//! Learned-pattern handlers: listing, analytics, lifecycle and version history.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use distillery_core::{TrainingData, TrainingHistory};
use distillery_learning::TrainingAnalytics;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_learning_error, require_param, ApiError, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub(super) struct PatternQuery {
    pub tenant_id: Option<String>,
    pub signal_id: Option<String>,
}

/// Who is making a lifecycle change; recorded in the version log.
#[derive(Debug, Deserialize)]
pub(super) struct ActorQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RollbackRequest {
    pub version: i64,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct Changelog {
    training_data_id: Uuid,
    markdown: String,
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub(super) async fn list_patterns(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<PatternQuery>,
) -> ApiResult<Vec<TrainingData>> {
    let tenant_id = require_param(&req_id.0, "tenant_id", query.tenant_id)?;
    let signal_id = query
        .signal_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let patterns = state
        .training
        .list_patterns(&tenant_id, signal_id)
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(patterns, req_id.0)))
}

pub(super) async fn analytics(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<PatternQuery>,
) -> ApiResult<TrainingAnalytics> {
    let tenant_id = require_param(&req_id.0, "tenant_id", query.tenant_id)?;
    let analytics = state
        .training
        .get_training_analytics(&tenant_id)
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(analytics, req_id.0)))
}

/// Integrity-checked load; a corrupted record is recovered from history first.
pub(super) async fn get_pattern(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
) -> ApiResult<TrainingData> {
    let record = state
        .training
        .versions()
        .load_verified(id, Utc::now())
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(record, req_id.0)))
}

pub(super) async fn history(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<TrainingHistory>> {
    let history = state
        .training
        .versions()
        .history(id)
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(history, req_id.0)))
}

pub(super) async fn changelog(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
) -> ApiResult<Changelog> {
    let markdown = state
        .training
        .versions()
        .generate_changelog(id)
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(
        Changelog {
            training_data_id: id,
            markdown,
        },
        req_id.0,
    )))
}

pub(super) async fn activate(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<TrainingData> {
    let record = state
        .training
        .activate_training_data(id, actor.user_id.as_deref())
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(record, req_id.0)))
}

pub(super) async fn deactivate(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<TrainingData> {
    let record = state
        .training
        .deactivate_training_data(id, actor.user_id.as_deref())
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(record, req_id.0)))
}

pub(super) async fn rollback(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Json(body): Json<RollbackRequest>,
) -> ApiResult<TrainingData> {
    let record = state
        .training
        .versions()
        .rollback(id, body.version, body.user_id.as_deref(), Utc::now())
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(record, req_id.0)))
}

pub(super) async fn recover(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<Uuid>,
) -> ApiResult<TrainingData> {
    let record = state
        .training
        .versions()
        .recover_from_history(id, Utc::now())
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(record, req_id.0)))
}
