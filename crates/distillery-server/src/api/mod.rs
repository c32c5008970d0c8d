mod branches;
mod feedback;
mod scrapes;
mod training;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use distillery_core::{AppConfig, ErrorKind, ErrorReport, IndustryRegistry};
use distillery_db::{
    DbError, FeedbackStore, ScrapeStore, SignalStore, TemporaryScrapeStore, TrainingStore,
};
use distillery_engine::{DistillError, DistillationEngine, Enricher};
use distillery_learning::{
    ConfidenceScorer, EmbeddingProvider, FeedbackRateLimiter, LearningError, MatcherConfig,
    PatternMatcher, ScorerConfig, TrainingConfig, TrainingManager,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::middleware::{
    enforce_rate_limit, request_id, require_bearer_auth, AuthState, RateLimitState, RequestId,
};

#[derive(Clone)]
pub struct AppState {
    /// Backend probed by the health check.
    pub store: Arc<dyn ScrapeStore>,
    pub signals: Arc<dyn SignalStore>,
    pub enricher: Arc<Enricher>,
    pub training: Arc<TrainingManager>,
}

impl AppState {
    /// Wire every service over one storage backend.
    ///
    /// # Errors
    ///
    /// Returns [`DistillError::Pattern`] if an industry pattern fails to compile.
    pub fn from_store<S>(
        store: Arc<S>,
        config: &AppConfig,
        registry: &IndustryRegistry,
        provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self, DistillError>
    where
        S: ScrapeStore + SignalStore + TrainingStore + FeedbackStore + 'static,
    {
        let scrapes = TemporaryScrapeStore::new(store.clone(), config.scrape_ttl_days);
        let engine = Arc::new(DistillationEngine::new(
            registry,
            config.distillation_enabled,
        )?);
        let enricher = Enricher::new(scrapes.clone(), store.clone(), engine);
        let training = TrainingManager::new(
            store.clone(),
            store.clone(),
            scrapes,
            Arc::new(PatternMatcher::new(
                provider,
                MatcherConfig::from_app_config(config),
            )),
            Arc::new(FeedbackRateLimiter::from_app_config(config)),
            ConfidenceScorer::new(ScorerConfig::from_app_config(config)),
            TrainingConfig::from_app_config(config),
        );

        Ok(Self {
            store: store.clone(),
            signals: store,
            enricher: Arc::new(enricher),
            training: Arc::new(training),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    storage: &'static str,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub(super) fn new(data: T, request_id: String) -> Self {
        Self {
            data,
            meta: ResponseMeta::new(request_id),
        }
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
                retry_after_secs: None,
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.error.retry_after_secs = Some(secs);
        self
    }

    fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "provider_error" => StatusCode::BAD_GATEWAY,
            "unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let retry_after = self
            .error
            .retry_after_secs
            .and_then(|secs| HeaderValue::from_str(&secs.to_string()).ok());
        let mut response = (status, Json(self)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

pub(super) fn validation_error(request_id: String, message: impl Into<String>) -> ApiError {
    ApiError::new(request_id, ErrorKind::Validation.as_code(), message)
}

/// A required query parameter, trimmed; blank counts as missing.
pub(super) fn require_param(
    request_id: &str,
    name: &str,
    value: Option<String>,
) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| validation_error(request_id.to_string(), format!("{name} is required")))
}

fn error_for_report(request_id: String, report: ErrorReport) -> ApiError {
    let ErrorReport {
        kind,
        message,
        retry_after_secs,
        ..
    } = report;
    let message = match kind {
        ErrorKind::Unavailable => {
            tracing::error!(error = %message, "storage unavailable");
            "storage unavailable".to_string()
        }
        ErrorKind::Integrity | ErrorKind::Provider => {
            tracing::error!(error = %message, kind = %kind, "request failed");
            message
        }
        _ => {
            tracing::debug!(error = %message, kind = %kind, "request rejected");
            message
        }
    };
    let error = ApiError::new(request_id, kind.as_code(), message);
    match retry_after_secs {
        Some(secs) => error.with_retry_after(secs),
        None => error,
    }
}

pub(super) fn map_learning_error(request_id: String, error: &LearningError) -> ApiError {
    let report = ErrorReport::new(error.kind(), error.to_string());
    let report = match error.retry_after_secs() {
        Some(secs) => report.with_retry_after(secs),
        None => report,
    };
    error_for_report(request_id, report)
}

pub(super) fn map_distill_error(request_id: String, error: &DistillError) -> ApiError {
    error_for_report(request_id, ErrorReport::new(error.kind(), error.to_string()))
}

pub(super) fn map_db_error(request_id: String, error: &DbError) -> ApiError {
    error_for_report(request_id, ErrorReport::new(error.kind(), error.to_string()))
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

fn protected_router(auth: AuthState, rate_limit: RateLimitState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/scrapes", post(scrapes::ingest))
        .route("/api/v1/scrapes/{hash}", get(scrapes::get_by_hash))
        .route("/api/v1/feedback", post(feedback::submit_feedback))
        .route("/api/v1/training", get(training::list_patterns))
        .route("/api/v1/training/analytics", get(training::analytics))
        .route("/api/v1/training/{id}", get(training::get_pattern))
        .route("/api/v1/training/{id}/history", get(training::history))
        .route("/api/v1/training/{id}/changelog", get(training::changelog))
        .route("/api/v1/training/{id}/activate", post(training::activate))
        .route(
            "/api/v1/training/{id}/deactivate",
            post(training::deactivate),
        )
        .route("/api/v1/training/{id}/rollback", post(training::rollback))
        .route("/api/v1/training/{id}/recover", post(training::recover))
        .route(
            "/api/v1/training/{id}/branches",
            post(branches::create_branch),
        )
        .route("/api/v1/branches/{id}", patch(branches::update_branch))
        .route("/api/v1/branches/{id}/merge", post(branches::merge_branch))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    auth,
                    require_bearer_auth,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    rate_limit,
                    enforce_rate_limit,
                )),
        )
}

pub fn build_app(state: AppState, auth: AuthState, rate_limit: RateLimitState) -> Router {
    let public_routes = Router::new().route("/api/v1/health", get(health));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth, rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::new(
                HealthData {
                    status: "ok",
                    storage: "ok",
                },
                req_id.0,
            )),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: storage unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::new(
                    HealthData {
                        status: "degraded",
                        storage: "unavailable",
                    },
                    req_id.0,
                )),
            )
        }
    }
}

pub fn default_rate_limit_state() -> RateLimitState {
    RateLimitState::new(600, Duration::from_secs(60))
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
