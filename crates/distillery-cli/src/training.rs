//! Learned-pattern maintenance commands.
//!
//! Each handler returns the text to print so `main` owns stdout.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use distillery_core::{AppConfig, TrainingData};
use distillery_db::{FeedbackStore, ScrapeStore, TemporaryScrapeStore, TrainingStore};
use distillery_learning::{
    ConfidenceScorer, FeedbackRateLimiter, MatcherConfig, PatternMatcher, ScorerConfig,
    TrainingConfig, TrainingManager, VersionControl,
};
use uuid::Uuid;

/// Build a manager for maintenance work.
///
/// The CLI never embeds text, so the matcher is keyword-only.
pub(crate) fn manager<S>(store: Arc<S>, config: &AppConfig) -> TrainingManager
where
    S: ScrapeStore + TrainingStore + FeedbackStore + 'static,
{
    TrainingManager::new(
        store.clone(),
        store.clone(),
        TemporaryScrapeStore::new(store, config.scrape_ttl_days),
        Arc::new(PatternMatcher::keyword_only(MatcherConfig::from_app_config(
            config,
        ))),
        Arc::new(FeedbackRateLimiter::from_app_config(config)),
        ConfidenceScorer::new(ScorerConfig::from_app_config(config)),
        TrainingConfig::from_app_config(config),
    )
}

pub(crate) async fn changelog(versions: &VersionControl, id: Uuid) -> anyhow::Result<String> {
    Ok(versions.generate_changelog(id).await?)
}

pub(crate) async fn rollback(
    versions: &VersionControl,
    id: Uuid,
    version: i64,
    user: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<String> {
    let record = versions.rollback(id, version, user, now).await?;
    Ok(format!(
        "restored version {version}; {}",
        describe(&record)
    ))
}

pub(crate) async fn recover(
    versions: &VersionControl,
    id: Uuid,
    now: DateTime<Utc>,
) -> anyhow::Result<String> {
    let record = versions.recover_from_history(id, now).await?;
    Ok(format!("recovered; {}", describe(&record)))
}

/// Text summary of a tenant's learning state, or the raw analytics as JSON.
pub(crate) async fn analytics(
    manager: &TrainingManager,
    tenant: &str,
    json: bool,
) -> anyhow::Result<String> {
    let analytics = manager.get_training_analytics(tenant).await?;
    if json {
        return Ok(serde_json::to_string_pretty(&analytics)?);
    }

    let mut out = format!("tenant {}", analytics.tenant_id);
    let _ = write!(
        out,
        "\npatterns: {} active, {} inactive",
        analytics.active_patterns, analytics.inactive_patterns
    );
    let average = analytics
        .average_confidence
        .map_or_else(|| "n/a".to_string(), |c| format!("{c:.3}"));
    let _ = write!(out, "\naverage confidence: {average}");
    let _ = write!(
        out,
        "\nunprocessed feedback: {}",
        analytics.unprocessed_feedback
    );
    out.push_str("\nfeedback:");
    for (feedback_type, count) in &analytics.feedback_by_type {
        let _ = write!(out, "\n  {feedback_type:<16}{count}");
    }
    Ok(out)
}

pub(crate) async fn reprocess(
    manager: &TrainingManager,
    tenant: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<String> {
    let summary = manager.reprocess_pending(tenant, now).await?;
    Ok(format!(
        "reprocessed {} feedback record(s), {} failed",
        summary.processed, summary.failed
    ))
}

pub(crate) async fn decay(
    manager: &TrainingManager,
    tenant: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<String> {
    let summary = manager.decay_stale_patterns(tenant, now).await?;
    Ok(format!(
        "examined {} stale pattern(s): {} decayed, {} failed",
        summary.examined, summary.decayed, summary.failed
    ))
}

fn describe(record: &TrainingData) -> String {
    format!(
        "{} now at version {} (confidence {:.3}, {})",
        record.id,
        record.version,
        record.confidence,
        if record.active { "active" } else { "inactive" }
    )
}
