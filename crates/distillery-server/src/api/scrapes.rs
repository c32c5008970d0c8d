use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use distillery_core::{ExtractedSignal, TemporaryScrape};
use distillery_engine::{EnrichmentResult, IngestRequest};
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{
    map_db_error, map_distill_error, require_param, ApiError, ApiResponse, AppState,
};

#[derive(Debug, Deserialize)]
pub(super) struct TenantQuery {
    pub tenant_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct ScrapeDetail {
    #[serde(flatten)]
    scrape: TemporaryScrape,
    signals: Vec<ExtractedSignal>,
}

/// `201` for new content, `200` when the scrape was already cached.
pub(super) async fn ingest(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<ApiResponse<EnrichmentResult>>), ApiError> {
    let result = state
        .enricher
        .ingest(&request)
        .await
        .map_err(|e| map_distill_error(req_id.0.clone(), &e))?;

    let status = if result.metrics.is_duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ApiResponse::new(result, req_id.0))))
}

pub(super) async fn get_by_hash(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(hash): Path<String>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<ApiResponse<ScrapeDetail>>, ApiError> {
    let tenant_id = require_param(&req_id.0, "tenant_id", query.tenant_id)?;

    let scrape = state
        .enricher
        .scrapes()
        .get_by_hash(&tenant_id, &hash.to_ascii_lowercase())
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "not_found",
                format!("no live scrape with hash {hash}"),
            )
        })?;

    let signals = state
        .signals
        .list_signals_for_scrape(&tenant_id, scrape.id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse::new(
        ScrapeDetail { scrape, signals },
        req_id.0,
    )))
}
