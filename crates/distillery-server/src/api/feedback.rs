use axum::{extract::State, Extension, Json};
use distillery_core::NewFeedback;
use distillery_learning::FeedbackReceipt;

use crate::middleware::RequestId;

use super::{map_learning_error, ApiError, ApiResponse, AppState};

/// Duplicates answer `200` with `duplicate: true` and the current confidence;
/// throttled tenants get `429` with `retry_after_secs`.
pub(super) async fn submit_feedback(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(payload): Json<NewFeedback>,
) -> Result<Json<ApiResponse<FeedbackReceipt>>, ApiError> {
    let receipt = state
        .training
        .submit_feedback(payload)
        .await
        .map_err(|e| map_learning_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse::new(receipt, req_id.0)))
}
