//! Background job scheduler.
//!
//! Two recurring jobs run beside the HTTP server: the TTL sweep that deletes
//! expired temporary scrapes, and the time-decay pass over stale patterns.

use std::sync::Arc;

use chrono::Utc;
use distillery_db::TemporaryScrapeStore;
use distillery_learning::TrainingManager;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Builds and starts the background job scheduler.
///
/// The returned handle must be kept alive for the lifetime of the process;
/// dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if a cron expression is invalid or the
/// scheduler fails to start.
pub async fn build_scheduler(
    scrapes: TemporaryScrapeStore,
    training: Arc<TrainingManager>,
    sweep_cron: &str,
    decay_cron: &str,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_sweep_job(&scheduler, scrapes, sweep_cron).await?;
    register_decay_job(&scheduler, training, decay_cron).await?;

    scheduler.start().await?;
    tracing::info!(sweep_cron, decay_cron, "scheduler started");
    Ok(scheduler)
}

async fn register_sweep_job(
    scheduler: &JobScheduler,
    scrapes: TemporaryScrapeStore,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let scrapes = scrapes.clone();
        Box::pin(async move {
            run_sweep(&scrapes).await;
        })
    })?;
    scheduler.add(job).await?;
    Ok(())
}

async fn register_decay_job(
    scheduler: &JobScheduler,
    training: Arc<TrainingManager>,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let training = Arc::clone(&training);
        Box::pin(async move {
            run_decay(&training).await;
        })
    })?;
    scheduler.add(job).await?;
    Ok(())
}

/// Delete expired scrapes. Returns the number removed, `0` on failure.
pub async fn run_sweep(scrapes: &TemporaryScrapeStore) -> u64 {
    match scrapes.sweep_expired().await {
        Ok(removed) => {
            tracing::info!(removed, "scheduler: expired scrapes swept");
            removed
        }
        Err(e) => {
            tracing::error!(error = %e, "scheduler: scrape sweep failed");
            0
        }
    }
}

/// Decay every tenant's stale patterns. Returns how many were rewritten.
pub async fn run_decay(training: &TrainingManager) -> usize {
    match training.decay_stale_patterns(None, Utc::now()).await {
        Ok(summary) => summary.decayed,
        Err(e) => {
            tracing::error!(error = %e, "scheduler: pattern decay failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use distillery_db::MemoryStore;
    use distillery_learning::{
        ConfidenceScorer, FeedbackRateLimiter, MatcherConfig, PatternMatcher, TrainingConfig,
    };

    use super::*;

    fn manager(store: &Arc<MemoryStore>) -> Arc<TrainingManager> {
        Arc::new(TrainingManager::new(
            store.clone(),
            store.clone(),
            TemporaryScrapeStore::new(store.clone(), 7),
            Arc::new(PatternMatcher::keyword_only(MatcherConfig::default())),
            Arc::new(FeedbackRateLimiter::new(10, Duration::from_secs(60))),
            ConfidenceScorer::default(),
            TrainingConfig::default(),
        ))
    }

    #[tokio::test]
    async fn sweep_removes_flagged_scrapes() {
        let store = Arc::new(MemoryStore::new());
        let scrapes = TemporaryScrapeStore::new(store.clone(), 7);
        let kept = scrapes.save("t1", "https://a.test", "a", "a").await.unwrap();
        let flagged = scrapes.save("t1", "https://b.test", "b", "b").await.unwrap();
        scrapes
            .flag_for_early_deletion(flagged.record.id)
            .await
            .unwrap();

        assert_eq!(run_sweep(&scrapes).await, 1);
        assert!(scrapes.get_by_id(kept.record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn jobs_swallow_storage_failures() {
        let store = Arc::new(MemoryStore::new());
        let scrapes = TemporaryScrapeStore::new(store.clone(), 7);
        let training = manager(&store);
        store.set_offline(true);

        assert_eq!(run_sweep(&scrapes).await, 0);
        assert_eq!(run_decay(&training).await, 0);
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let result = build_scheduler(
            TemporaryScrapeStore::new(store.clone(), 7),
            manager(&store),
            "not a cron",
            "0 30 3 * * *",
        )
        .await;
        assert!(result.is_err());
    }
}
