use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use distillery_core::{parse_industries, ErrorKind};
use distillery_db::{DbError, MemoryStore};

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
      - id: expansion
        priority: medium
        keywords: ["new office"]
      - id: tech_stack
        priority: low
        keywords: ["kubernetes", "rust"]
      - id: leadership
        priority: medium
        keywords: ["new cto"]
    fluff_patterns:
      - pattern: "cookie"
        region: all
    scoring_rules:
      - signals: [funding, hiring]
        points: 60
      - signals: [expansion]
        points: 20
"#;

fn enricher() -> (Enricher, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let registry = parse_industries(INDUSTRIES).unwrap();
    let engine = Arc::new(DistillationEngine::new(&registry, true).unwrap());
    let scrapes = TemporaryScrapeStore::new(store.clone(), 7);
    (Enricher::new(scrapes, store.clone(), engine), store)
}

/// Signal store whose first insert times out.
struct FailFirstInsert {
    inner: Arc<MemoryStore>,
    failed: AtomicBool,
}

#[async_trait]
impl SignalStore for FailFirstInsert {
    async fn insert_signals(&self, signals: &[ExtractedSignal]) -> Result<(), DbError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(DbError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        self.inner.insert_signals(signals).await
    }

    async fn list_signals_for_scrape(
        &self,
        tenant_id: &str,
        scrape_id: Uuid,
    ) -> Result<Vec<ExtractedSignal>, DbError> {
        self.inner.list_signals_for_scrape(tenant_id, scrape_id).await
    }
}

fn request(raw: &str) -> IngestRequest {
    IngestRequest {
        tenant_id: "tenant-1".to_string(),
        url: "https://acme.test/news".to_string(),
        raw_content: raw.to_string(),
        cleaned_content: String::new(),
        industry: Some("saas".to_string()),
        source_type: None,
    }
}

/// ~500 KB page: filler paragraphs with a handful of signal-bearing lines.
fn large_page() -> String {
    let filler = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor.\n";
    let mut page = String::with_capacity(500_000);
    page.push_str("Acme raised $40 million in a Series B round.\n");
    page.push_str("We're hiring across engineering; see open positions.\n");
    page.push_str("Our new office in Austin opens in March.\n");
    page.push_str("The platform runs on Kubernetes and Rust.\n");
    page.push_str("We use cookies to improve your experience.\n");
    while page.len() < 500_000 {
        page.push_str(filler);
    }
    page.truncate(500_000);
    page
}

#[tokio::test]
async fn large_scrape_reduces_to_small_signal_set() {
    let (enricher, _) = enricher();
    let page = large_page();
    assert_eq!(page.len(), 500_000);

    let result = enricher.ingest(&request(&page)).await.unwrap();
    assert!(result.signals.len() <= 5);
    assert_eq!(result.signals.len(), 4);
    assert!(result.metrics.signal_bytes <= 20_000);
    assert!(result.metrics.reduction_percent >= 95.0);
    assert_eq!(result.metrics.raw_bytes, 500_000);
    assert!(!result.metrics.is_duplicate);
    assert_eq!(result.lead_score, 80);
    assert!(result.degraded.is_none());

    let funding = result
        .signals
        .iter()
        .find(|s| s.signal_id == "funding")
        .unwrap();
    assert_eq!(funding.occurrence_count, 2);
    assert_eq!(funding.confidence, 95);
    assert!(funding.matched_text.chars().count() <= 200);
}

#[tokio::test]
async fn duplicate_scrape_returns_stored_signals() {
    let (enricher, _) = enricher();
    let raw = "Acme raised $5 million. We're hiring!";
    let first = enricher.ingest(&request(raw)).await.unwrap();
    let second = enricher.ingest(&request(raw)).await.unwrap();

    assert!(second.metrics.is_duplicate);
    assert_eq!(second.scrape_id, first.scrape_id);
    assert_eq!(second.content_hash, first.content_hash);
    assert_eq!(second.lead_score, first.lead_score);
    let mut a: Vec<Uuid> = first.signals.iter().map(|s| s.id).collect();
    let mut b: Vec<Uuid> = second.signals.iter().map(|s| s.id).collect();
    a.sort();
    b.sort();
    assert_eq!(a, b);
}

#[tokio::test]
async fn unknown_industry_degrades_without_failing() {
    let (enricher, _) = enricher();
    let mut req = request("We're hiring");
    req.industry = Some("biotech".to_string());
    let result = enricher.ingest(&req).await.unwrap();
    assert!(result.signals.is_empty());
    assert_eq!(result.degraded, Some(SkipReason::UnknownIndustry));
    assert_eq!(result.lead_score, 0);
}

#[tokio::test]
async fn cleaned_content_is_distilled_when_present() {
    let (enricher, _) = enricher();
    let mut req = request("<div>menu</div><p>We're hiring</p>");
    req.cleaned_content = "We're hiring".to_string();
    let result = enricher.ingest(&req).await.unwrap();
    assert_eq!(result.signals.len(), 1);

    let stored = enricher
        .scrapes()
        .get_by_id(result.scrape_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.cleaned_content, "We're hiring");
}

#[tokio::test]
async fn blank_tenant_is_rejected() {
    let (enricher, _) = enricher();
    let mut req = request("x");
    req.tenant_id = "  ".to_string();
    let err = enricher.ingest(&req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn store_outage_is_retryable() {
    let (enricher, store) = enricher();
    store.set_offline(true);
    let err = enricher.ingest(&request("We're hiring")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(err.kind().is_retryable());
}

#[tokio::test]
async fn retry_after_failed_signal_write_distills_again() {
    let store = Arc::new(MemoryStore::new());
    let registry = parse_industries(INDUSTRIES).unwrap();
    let engine = Arc::new(DistillationEngine::new(&registry, true).unwrap());
    let signals = Arc::new(FailFirstInsert {
        inner: store.clone(),
        failed: AtomicBool::new(false),
    });
    let enricher = Enricher::new(TemporaryScrapeStore::new(store.clone(), 7), signals, engine);
    let req = request("Acme raised $5 million in a Series A. We're hiring!");

    let err = enricher.ingest(&req).await.unwrap_err();
    assert!(err.kind().is_retryable());

    let retry = enricher.ingest(&req).await.unwrap();
    assert!(retry.metrics.is_duplicate);
    assert_eq!(retry.signals.len(), 2);
    assert_eq!(retry.lead_score, 60);

    let stored = store
        .list_signals_for_scrape("tenant-1", retry.scrape_id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);

    let third = enricher.ingest(&req).await.unwrap();
    let mut a: Vec<Uuid> = retry.signals.iter().map(|s| s.id).collect();
    let mut b: Vec<Uuid> = third.signals.iter().map(|s| s.id).collect();
    a.sort();
    b.sort();
    assert_eq!(a, b);
}

#[test]
fn reduction_percent_rounds_to_two_decimals() {
    assert!((reduction_percent(1000, 1) - 99.9).abs() < 1e-9);
    assert!((reduction_percent(3, 1) - 66.67).abs() < 1e-9);
    assert!(reduction_percent(0, 10).abs() < f64::EPSILON);
    assert!(reduction_percent(10, 50).abs() < f64::EPSILON);
}
