//! Storage abstraction for scrapes, signals, training data and feedback.
//!
//! Every backend implements all four traits; services hold the narrowest
//! trait object they need (`Arc<dyn TrainingStore>`, ...). Methods that
//! depend on the clock take `now` explicitly.
//!
//! | Trait | Tables |
//! |-------|--------|
//! | [`ScrapeStore`] | `temporary_scrapes` |
//! | [`SignalStore`] | `extracted_signals` |
//! | [`TrainingStore`] | `training_data`, `training_history`, `training_branches` |
//! | [`FeedbackStore`] | `client_feedback` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use distillery_core::{
    Branch, ClientFeedback, ExtractedSignal, FeedbackOutcomeKind, FeedbackType, TemporaryScrape,
    TrainingData, TrainingHistory,
};
use serde::Serialize;
use uuid::Uuid;

use crate::DbError;

/// Live-record footprint of one tenant's scrape cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeStats {
    pub live_records: i64,
    pub raw_bytes: i64,
}

#[async_trait]
pub trait ScrapeStore: Send + Sync {
    /// Insert `candidate` unless a live record with the same
    /// `(tenant_id, content_hash)` exists, in which case that record's
    /// `last_seen_at` is refreshed to `now` and it is returned instead.
    ///
    /// An expired record under the same key is replaced. Returns the stored
    /// record and whether it was newly inserted.
    async fn upsert_scrape(
        &self,
        candidate: &TemporaryScrape,
        now: DateTime<Utc>,
    ) -> Result<(TemporaryScrape, bool), DbError>;

    /// Live record for `(tenant_id, content_hash)`; expired records are never returned.
    async fn find_live_scrape_by_hash(
        &self,
        tenant_id: &str,
        content_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TemporaryScrape>, DbError>;

    async fn find_live_scrape_by_id(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<TemporaryScrape>, DbError>;

    /// Stamp `verified_at` and pull `expires_at` forward to `now`.
    ///
    /// Returns `false` when no record has that id.
    async fn mark_scrape_verified(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DbError>;

    /// Delete every record with `expires_at <= now`, returning the count removed.
    async fn delete_expired_scrapes(&self, now: DateTime<Utc>) -> Result<u64, DbError>;

    async fn scrape_stats(&self, tenant_id: &str, now: DateTime<Utc>)
        -> Result<ScrapeStats, DbError>;

    /// Cheap liveness probe for health checks.
    async fn ping(&self) -> Result<(), DbError>;
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn insert_signals(&self, signals: &[ExtractedSignal]) -> Result<(), DbError>;

    async fn list_signals_for_scrape(
        &self,
        tenant_id: &str,
        scrape_id: Uuid,
    ) -> Result<Vec<ExtractedSignal>, DbError>;
}

#[async_trait]
pub trait TrainingStore: Send + Sync {
    /// Insert a new record together with its `created` history entry.
    async fn insert_training(
        &self,
        record: &TrainingData,
        history: &TrainingHistory,
    ) -> Result<(), DbError>;

    async fn get_training(&self, id: Uuid) -> Result<Option<TrainingData>, DbError>;

    /// All records for a tenant (active and inactive), optionally narrowed
    /// to one signal id, oldest first.
    async fn list_training(
        &self,
        tenant_id: &str,
        signal_id: Option<&str>,
    ) -> Result<Vec<TrainingData>, DbError>;

    /// Active records whose `last_updated_at` is before `updated_before`.
    async fn list_stale_training(
        &self,
        tenant_id: Option<&str>,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<TrainingData>, DbError>;

    /// Compare-and-swap write: replaces the stored record only if its current
    /// version equals `expected_version`, appending `history` atomically.
    ///
    /// # Errors
    ///
    /// [`DbError::VersionConflict`] when another writer got there first,
    /// [`DbError::NotFound`] when the record does not exist.
    async fn update_training(
        &self,
        expected_version: i64,
        record: &TrainingData,
        history: &TrainingHistory,
    ) -> Result<(), DbError>;

    /// Version log for a record, ascending by version.
    async fn list_history(&self, training_data_id: Uuid) -> Result<Vec<TrainingHistory>, DbError>;

    async fn insert_branch(&self, branch: &Branch) -> Result<(), DbError>;

    async fn get_branch(&self, branch_id: Uuid) -> Result<Option<Branch>, DbError>;

    /// Overwrite a branch's snapshot and active flag.
    async fn update_branch(&self, branch: &Branch) -> Result<(), DbError>;
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn insert_feedback(&self, feedback: &ClientFeedback) -> Result<(), DbError>;

    async fn get_feedback(&self, id: Uuid) -> Result<Option<ClientFeedback>, DbError>;

    /// Earliest processed, applied-or-discarded feedback for the same
    /// `(tenant, signal, scrape)` submitted within `[window_start, window_end)`.
    async fn find_processed_duplicate(
        &self,
        tenant_id: &str,
        signal_id: &str,
        source_scrape_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Option<ClientFeedback>, DbError>;

    /// Set `processed = true` along with the pattern it touched and the outcome.
    async fn mark_feedback_processed(
        &self,
        id: Uuid,
        training_data_id: Option<Uuid>,
        outcome: FeedbackOutcomeKind,
    ) -> Result<(), DbError>;

    /// Unprocessed feedback for a tenant, oldest first.
    async fn list_unprocessed_feedback(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<ClientFeedback>, DbError>;

    /// Self-reported confidences from earlier feedback on the same signal,
    /// excluding the submission identified by `exclude`.
    async fn user_confidences(
        &self,
        tenant_id: &str,
        signal_id: &str,
        exclude: Uuid,
    ) -> Result<Vec<f64>, DbError>;

    /// Feedback volume per type for a tenant.
    async fn feedback_counts(&self, tenant_id: &str)
        -> Result<Vec<(FeedbackType, i64)>, DbError>;

    async fn count_unprocessed_feedback(&self, tenant_id: &str) -> Result<i64, DbError>;
}
