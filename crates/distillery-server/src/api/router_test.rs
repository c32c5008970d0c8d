use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request};
use distillery_core::parse_industries;
use distillery_db::MemoryStore;
use distillery_learning::{
    ConfidenceScorer, FeedbackRateLimiter, MatcherConfig, PatternMatcher, TrainingConfig,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use super::*;

const INDUSTRIES: &str = r#"
industries:
  saas:
    signal_definitions:
      - id: hiring
        priority: high
        keywords: ["we're hiring", "open positions"]
      - id: funding
        priority: critical
        patterns: ["series [a-d]\\b", "raised \\$\\d+"]
    scoring_rules:
      - signals: [funding, hiring]
        points: 60
"#;

fn state(store: &Arc<MemoryStore>) -> AppState {
    let registry = parse_industries(INDUSTRIES).expect("industries");
    let engine = Arc::new(DistillationEngine::new(&registry, true).expect("engine"));
    let scrapes = TemporaryScrapeStore::new(store.clone(), 7);
    let training = TrainingManager::new(
        store.clone(),
        store.clone(),
        scrapes.clone(),
        Arc::new(PatternMatcher::keyword_only(MatcherConfig::default())),
        Arc::new(FeedbackRateLimiter::default()),
        ConfidenceScorer::default(),
        TrainingConfig::default(),
    );
    AppState {
        store: store.clone(),
        signals: store.clone(),
        enricher: Arc::new(Enricher::new(scrapes, store.clone(), engine)),
        training: Arc::new(training),
    }
}

fn app(store: &Arc<MemoryStore>) -> Router {
    build_app(
        state(store),
        AuthState::with_keys(std::iter::empty()),
        default_rate_limit_state(),
    )
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, headers, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

fn with_json(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

fn feedback_body(feedback_type: &str, text: &str) -> Value {
    json!({
        "tenant_id": "t1",
        "user_id": "u1",
        "feedback_type": feedback_type,
        "signal_id": "hiring",
        "source_scrape_id": Uuid::new_v4(),
        "source_text": text,
    })
}

/// Submit one confirmation and return the id of the pattern it created.
async fn seed_pattern(app: &Router) -> String {
    let (status, _, json) = send(
        app,
        with_json(Method::POST, "/api/v1/feedback", &feedback_body("correct", "we're hiring")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    json["data"]["training_data_id"]
        .as_str()
        .expect("pattern id")
        .to_string()
}

#[tokio::test]
async fn health_reports_storage_state() {
    let store = Arc::new(MemoryStore::new());
    let app = app(&store);

    let (status, headers, json) = send(&app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "ok");
    assert!(headers.contains_key("x-request-id"));

    store.set_offline(true);
    let (status, _, json) = send(&app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["data"]["storage"], "unavailable");
}

#[tokio::test]
async fn request_id_is_echoed_into_meta() {
    let store = Arc::new(MemoryStore::new());
    let request = Request::builder()
        .uri("/api/v1/health")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .expect("request");
    let (_, headers, json) = send(&app(&store), request).await;
    assert_eq!(headers["x-request-id"], "req-42");
    assert_eq!(json["meta"]["request_id"], "req-42");
}

#[tokio::test]
async fn protected_routes_require_a_known_bearer_token() {
    let store = Arc::new(MemoryStore::new());
    let app = build_app(
        state(&store),
        AuthState::with_keys(["secret"]),
        default_rate_limit_state(),
    );

    let (status, _, json) = send(&app, get("/api/v1/training?tenant_id=t1")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "unauthorized");

    let request = Request::builder()
        .uri("/api/v1/training?tenant_id=t1")
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::empty())
        .expect("request");
    let (status, _, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"], json!([]));

    let (status, _, _) = send(&app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn global_limit_rejects_with_retry_after() {
    let store = Arc::new(MemoryStore::new());
    let app = build_app(
        state(&store),
        AuthState::with_keys(std::iter::empty()),
        RateLimitState::new(1, Duration::from_secs(60)),
    );

    let (status, _, _) = send(&app, get("/api/v1/training?tenant_id=t1")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, headers, json) = send(&app, get("/api/v1/training?tenant_id=t1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["error"]["code"], "rate_limited");
    assert!(json["error"]["retry_after_secs"].as_u64().is_some());
    assert!(headers.contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn ingest_then_repeat_then_lookup_by_hash() {
    let store = Arc::new(MemoryStore::new());
    let app = app(&store);
    let body = json!({
        "tenant_id": "t1",
        "url": "https://acme.test/news",
        "raw_content": "Acme raised $5 million in a Series A. We're hiring!",
        "industry": "saas",
    });

    let (status, _, first) = send(&app, with_json(Method::POST, "/api/v1/scrapes", &body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["data"]["signals"].as_array().map(Vec::len), Some(2));
    assert_eq!(first["data"]["metrics"]["is_duplicate"], false);

    let (status, _, second) = send(&app, with_json(Method::POST, "/api/v1/scrapes", &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["metrics"]["is_duplicate"], true);
    assert_eq!(second["data"]["scrape_id"], first["data"]["scrape_id"]);

    let hash = first["data"]["content_hash"].as_str().expect("hash");
    let (status, _, detail) =
        send(&app, get(&format!("/api/v1/scrapes/{hash}?tenant_id=t1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["data"]["id"], first["data"]["scrape_id"]);
    assert_eq!(detail["data"]["signals"].as_array().map(Vec::len), Some(2));

    let (status, _, _) = send(&app, get(&format!("/api/v1/scrapes/{hash}?tenant_id=t2"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, json) = send(&app, get(&format!("/api/v1/scrapes/{hash}"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test]
async fn blank_tenant_ingest_is_a_validation_error() {
    let store = Arc::new(MemoryStore::new());
    let body = json!({"tenant_id": " ", "url": "https://a.test", "raw_content": "x"});
    let (status, _, json) =
        send(&app(&store), with_json(Method::POST, "/api/v1/scrapes", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test]
async fn eleventh_feedback_in_a_minute_is_throttled() {
    let store = Arc::new(MemoryStore::new());
    let app = app(&store);
    for _ in 0..10 {
        let (status, _, _) = send(
            &app,
            with_json(Method::POST, "/api/v1/feedback", &feedback_body("correct", "hiring")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, headers, json) = send(
        &app,
        with_json(Method::POST, "/api/v1/feedback", &feedback_body("correct", "hiring")),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let retry_after = json["error"]["retry_after_secs"].as_u64().expect("retry after");
    assert!((1..=60).contains(&retry_after));
    assert_eq!(headers[header::RETRY_AFTER], retry_after.to_string().as_str());
}

#[tokio::test]
async fn invalid_feedback_maps_to_bad_request() {
    let store = Arc::new(MemoryStore::new());
    let mut body = feedback_body("correct", "hiring");
    body["user_confidence"] = json!(2.0);
    let (status, _, json) =
        send(&app(&store), with_json(Method::POST, "/api/v1/feedback", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test]
async fn pattern_lifecycle_and_history() {
    let store = Arc::new(MemoryStore::new());
    let app = app(&store);
    let id = seed_pattern(&app).await;

    let (status, _, json) = send(&app, get(&format!("/api/v1/training/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["version"], 1);

    let (status, _, json) = send(
        &app,
        post_empty(&format!("/api/v1/training/{id}/deactivate?user_id=ops")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["active"], false);
    assert_eq!(json["data"]["version"], 2);

    let (status, _, json) = send(
        &app,
        with_json(
            Method::POST,
            &format!("/api/v1/training/{id}/rollback"),
            &json!({"version": 1, "user_id": "ops"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["version"], 3);
    assert_eq!(json["data"]["active"], true);

    let (_, _, json) = send(&app, get(&format!("/api/v1/training/{id}/history"))).await;
    let history = json["data"].as_array().expect("history");
    assert_eq!(history.len(), 3);
    assert_eq!(history[1]["change_type"], "deactivated");
    assert_eq!(history[2]["reason"], "rollback to version 1");

    let (status, _, json) = send(&app, get(&format!("/api/v1/training/{id}/changelog"))).await;
    assert_eq!(status, StatusCode::OK);
    let markdown = json["data"]["markdown"].as_str().expect("markdown");
    assert!(markdown.starts_with("# Changelog: hiring"));

    let (status, _, json) = send(
        &app,
        with_json(
            Method::POST,
            &format!("/api/v1/training/{id}/rollback"),
            &json!({"version": 9}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "validation_error");

    let (_, _, json) = send(&app, get("/api/v1/training/analytics?tenant_id=t1")).await;
    assert_eq!(json["data"]["active_patterns"], 1);
    assert_eq!(json["data"]["feedback_by_type"]["correct"], 1);
}

#[tokio::test]
async fn unknown_pattern_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let id = Uuid::new_v4();
    let (status, _, json) = send(&app(&store), get(&format!("/api/v1/training/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn branch_edit_and_clean_merge() {
    let store = Arc::new(MemoryStore::new());
    let app = app(&store);
    let id = seed_pattern(&app).await;

    let (status, _, json) = send(&app, post_empty(&format!("/api/v1/training/{id}/branches"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let branch_id = json["data"]["branch_id"].as_str().expect("branch id").to_string();

    let (status, _, json) = send(
        &app,
        with_json(
            Method::PATCH,
            &format!("/api/v1/branches/{branch_id}"),
            &json!({"pattern": "now hiring", "confidence": 0.9}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["snapshot"]["pattern"], "now hiring");

    let (status, _, json) = send(
        &app,
        post_empty(&format!("/api/v1/branches/{branch_id}/merge?user_id=u2")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "merged");
    assert_eq!(json["data"]["record"]["pattern"], "now hiring");
    assert_eq!(json["data"]["record"]["version"], 2);

    let (status, _, _) = send(
        &app,
        post_empty(&format!("/api/v1/branches/{branch_id}/merge")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn conflicting_merge_answers_409() {
    let store = Arc::new(MemoryStore::new());
    let app = app(&store);
    let id = seed_pattern(&app).await;

    let (_, _, json) = send(&app, post_empty(&format!("/api/v1/training/{id}/branches"))).await;
    let branch_id = json["data"]["branch_id"].as_str().expect("branch id").to_string();
    send(
        &app,
        with_json(
            Method::PATCH,
            &format!("/api/v1/branches/{branch_id}"),
            &json!({"confidence": 0.99}),
        ),
    )
    .await;
    let (status, _, _) = send(
        &app,
        with_json(
            Method::POST,
            "/api/v1/feedback",
            &feedback_body("false_positive", "we're hiring"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, json) =
        send(&app, post_empty(&format!("/api/v1/branches/{branch_id}/merge"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["data"]["status"], "conflicted");
    assert_eq!(json["data"]["conflicts"][0]["field"], "confidence");

    let (_, _, json) = send(&app, get(&format!("/api/v1/training/{id}"))).await;
    assert_eq!(json["data"]["version"], 2);
}

#[tokio::test]
async fn unknown_branch_patch_fields_are_rejected() {
    let store = Arc::new(MemoryStore::new());
    let app = app(&store);
    let id = seed_pattern(&app).await;
    let (_, _, json) = send(&app, post_empty(&format!("/api/v1/training/{id}/branches"))).await;
    let branch_id = json["data"]["branch_id"].as_str().expect("branch id").to_string();

    let (status, _, _) = send(
        &app,
        with_json(
            Method::PATCH,
            &format!("/api/v1/branches/{branch_id}"),
            &json!({"version": 7}),
        ),
    )
    .await;
    assert!(status.is_client_error());
}
