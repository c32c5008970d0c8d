//! Scrape ingestion: dedup, cache, distill, persist.
//!
//! A repeat of already-cached content skips distillation and answers with the
//! signals stored for the original scrape. A cached scrape with no stored
//! signals is distilled again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use distillery_core::ExtractedSignal;
use distillery_db::{SignalStore, TemporaryScrapeStore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{DistillationEngine, SkipReason};
use crate::error::DistillError;

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub tenant_id: String,
    pub url: String,
    pub raw_content: String,
    /// Crawler-cleaned text; falls back to `raw_content` when blank.
    #[serde(default)]
    pub cleaned_content: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnrichmentMetrics {
    pub raw_bytes: usize,
    /// Serialized size of the permanently stored signals.
    pub signal_bytes: usize,
    pub reduction_percent: f64,
    pub is_duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentResult {
    pub scrape_id: Uuid,
    pub content_hash: String,
    pub signals: Vec<ExtractedSignal>,
    pub lead_score: i32,
    pub metrics: EnrichmentMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<SkipReason>,
}

#[derive(Clone)]
pub struct Enricher {
    scrapes: TemporaryScrapeStore,
    signals: Arc<dyn SignalStore>,
    engine: Arc<DistillationEngine>,
}

impl Enricher {
    #[must_use]
    pub fn new(
        scrapes: TemporaryScrapeStore,
        signals: Arc<dyn SignalStore>,
        engine: Arc<DistillationEngine>,
    ) -> Self {
        Self {
            scrapes,
            signals,
            engine,
        }
    }

    #[must_use]
    pub fn scrapes(&self) -> &TemporaryScrapeStore {
        &self.scrapes
    }

    #[must_use]
    pub fn engine(&self) -> &DistillationEngine {
        &self.engine
    }

    /// # Errors
    ///
    /// Returns [`DistillError::Validation`] for a malformed request and
    /// [`DistillError::Storage`] when the store is unavailable (retryable).
    pub async fn ingest(&self, request: &IngestRequest) -> Result<EnrichmentResult, DistillError> {
        self.ingest_at(request, Utc::now()).await
    }

    /// [`ingest`](Self::ingest) with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`ingest`](Self::ingest).
    pub async fn ingest_at(
        &self,
        request: &IngestRequest,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentResult, DistillError> {
        validate(request)?;
        let tenant_id = request.tenant_id.trim();
        let cleaned = if request.cleaned_content.trim().is_empty() {
            request.raw_content.as_str()
        } else {
            request.cleaned_content.as_str()
        };

        let saved = self
            .scrapes
            .save_at(tenant_id, &request.url, &request.raw_content, cleaned, now)
            .await?;
        let scrape = saved.record;
        let raw_bytes = request.raw_content.len();

        if !saved.is_new {
            let signals = self
                .signals
                .list_signals_for_scrape(tenant_id, scrape.id)
                .await?;
            // An empty set may be a signal write that failed after the scrape
            // was cached; distill again so a retry does not lose the scrape.
            if !signals.is_empty() {
                let lead_score = self.engine.score(
                    request.industry.as_deref(),
                    signals.iter().map(|s| s.signal_id.as_str()),
                );
                tracing::info!(
                    tenant_id,
                    scrape_id = %scrape.id,
                    signals = signals.len(),
                    "duplicate scrape; reusing stored signals"
                );
                return Ok(EnrichmentResult {
                    scrape_id: scrape.id,
                    content_hash: scrape.content_hash,
                    metrics: metrics(raw_bytes, &signals, true),
                    signals,
                    lead_score,
                    degraded: None,
                });
            }
        }

        let distillation = self.engine.distill(
            cleaned,
            request.industry.as_deref(),
            request.source_type.as_deref(),
        );
        let degraded = distillation.skip_reason();
        if let Some(reason) = degraded {
            tracing::warn!(tenant_id, scrape_id = %scrape.id, ?reason, "distillation skipped");
        }

        let signals: Vec<ExtractedSignal> = distillation
            .signals
            .into_iter()
            .map(|s| ExtractedSignal {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.to_string(),
                signal_id: s.signal_id,
                source_scrape_id: scrape.id,
                matched_text: s.matched_text,
                priority: s.priority,
                occurrence_count: s.occurrence_count,
                confidence: s.confidence,
                created_at: now,
            })
            .collect();
        self.signals.insert_signals(&signals).await?;

        let metrics = metrics(raw_bytes, &signals, !saved.is_new);
        tracing::info!(
            tenant_id,
            scrape_id = %scrape.id,
            signals = signals.len(),
            lead_score = distillation.lead_score,
            raw_bytes = metrics.raw_bytes,
            signal_bytes = metrics.signal_bytes,
            reduction_percent = metrics.reduction_percent,
            is_duplicate = metrics.is_duplicate,
            "scrape distilled"
        );

        Ok(EnrichmentResult {
            scrape_id: scrape.id,
            content_hash: scrape.content_hash,
            signals,
            lead_score: distillation.lead_score,
            metrics,
            degraded,
        })
    }
}

fn validate(request: &IngestRequest) -> Result<(), DistillError> {
    if request.tenant_id.trim().is_empty() {
        return Err(DistillError::Validation("tenant_id must be non-empty".into()));
    }
    if request.url.trim().is_empty() {
        return Err(DistillError::Validation("url must be non-empty".into()));
    }
    Ok(())
}

fn metrics(raw_bytes: usize, signals: &[ExtractedSignal], is_duplicate: bool) -> EnrichmentMetrics {
    let signal_bytes = serde_json::to_vec(signals).map_or(0, |bytes| bytes.len());
    EnrichmentMetrics {
        raw_bytes,
        signal_bytes,
        reduction_percent: reduction_percent(raw_bytes, signal_bytes),
        is_duplicate,
    }
}

/// Percentage of raw bytes not carried into permanent storage, two decimals.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn reduction_percent(raw_bytes: usize, signal_bytes: usize) -> f64 {
    if raw_bytes == 0 {
        return 0.0;
    }
    let ratio = 1.0 - (signal_bytes as f64 / raw_bytes as f64);
    (ratio.max(0.0) * 10_000.0).round() / 100.0
}

#[cfg(test)]
#[path = "enrich_test.rs"]
mod tests;
