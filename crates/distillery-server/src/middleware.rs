use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::ApiError;

const API_KEYS_VAR: &str = "DISTILLERY_API_KEYS";
const ANONYMOUS_CALLER: &str = "anonymous";

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// API key auth settings used by middleware.
#[derive(Debug, Clone)]
pub struct AuthState {
    api_keys: Arc<HashSet<String>>,
    pub enabled: bool,
}

impl AuthState {
    /// Builds auth config from `DISTILLERY_API_KEYS` (comma-separated bearer tokens).
    ///
    /// Development tolerates a missing list and runs unauthenticated; any
    /// other environment refuses to start without keys.
    pub fn from_env(is_development: bool) -> anyhow::Result<Self> {
        let raw = std::env::var(API_KEYS_VAR).unwrap_or_default();
        let state = Self::with_keys(raw.split(','));

        if !state.enabled {
            if is_development {
                tracing::warn!("{API_KEYS_VAR} not set; bearer auth disabled in development");
                return Ok(state);
            }
            anyhow::bail!(
                "{API_KEYS_VAR} is required outside development; provide comma-separated bearer tokens"
            );
        }

        tracing::info!(keys = state.api_keys.len(), "bearer auth enabled");
        Ok(state)
    }

    /// Auth enabled for exactly these tokens (blank entries ignored); an
    /// empty set disables auth.
    pub fn with_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let keys: HashSet<String> = keys
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        Self {
            enabled: !keys.is_empty(),
            api_keys: Arc::new(keys),
        }
    }

    /// Constant-time comparison against every configured key.
    fn allows(&self, token: &str) -> bool {
        self.api_keys
            .iter()
            .fold(false, |found, key| {
                found | bool::from(key.as_bytes().ct_eq(token.as_bytes()))
            })
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    count: usize,
}

/// Fixed-window request limit per caller, keyed by bearer token
/// (unauthenticated callers share one bucket). Sits in front of the
/// per-tenant feedback limiter.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    max_requests: usize,
    window: Duration,
    callers: Arc<Mutex<HashMap<String, Window>>>,
}

impl RateLimitState {
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            callers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request for `caller`; `Err` carries the seconds until its
    /// window resets.
    async fn admit(&self, caller: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut callers = self.callers.lock().await;
        callers.retain(|_, w| now.duration_since(w.started_at) < self.window);

        let window = callers.entry(caller.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });
        if window.count >= self.max_requests {
            let elapsed = now.duration_since(window.started_at);
            return Err(self.window.saturating_sub(elapsed).as_secs().max(1));
        }
        window.count += 1;
        Ok(())
    }
}

fn request_id_of(req: &Request) -> String {
    req.extensions()
        .get::<RequestId>()
        .map_or_else(String::new, |id| id.0.clone())
}

/// Extracts `x-request-id` or generates a `UUIDv4`, stores it as a
/// [`RequestId`] extension and echoes it on the response.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

/// Middleware enforcing Bearer token auth when enabled.
pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    req: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(req).await;
    }

    match extract_bearer_token(req.headers().get(AUTHORIZATION)) {
        Some(token) if auth.allows(token) => next.run(req).await,
        _ => {
            tracing::debug!(path = %req.uri().path(), "rejected request without valid bearer token");
            ApiError::new(
                request_id_of(&req),
                "unauthorized",
                "missing or invalid bearer token",
            )
            .into_response()
        }
    }
}

/// Middleware enforcing the per-caller request limit.
pub async fn enforce_rate_limit(
    State(rate_limit): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let caller = extract_bearer_token(req.headers().get(AUTHORIZATION))
        .unwrap_or(ANONYMOUS_CALLER)
        .to_string();

    match rate_limit.admit(&caller).await {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            tracing::warn!(retry_after, "request limit exceeded");
            ApiError::new(request_id_of(&req), "rate_limited", "rate limit exceeded")
                .with_retry_after(retry_after)
                .into_response()
        }
    }
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
