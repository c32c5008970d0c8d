//! Feedback-driven training.
//!
//! One submission moves through: validated, rate-limit checked, stored,
//! deduplicated, outlier checked, matched to a pattern (or a new pattern is
//! created), rescored, persisted as a new version, optionally flags the
//! originating scrape for early deletion, and is finally marked processed.
//! A failure anywhere before the last step leaves the feedback unprocessed so
//! [`TrainingManager::reprocess_pending`] can pick it up again.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use distillery_core::{
    AppConfig, ChangeType, ClientFeedback, FeedbackOutcomeKind, FeedbackType, NewFeedback,
    PatternType, TrainingData,
};
use distillery_db::{DbError, FeedbackStore, TemporaryScrapeStore, TrainingStore};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::confidence::ConfidenceScorer;
use crate::error::LearningError;
use crate::matcher::{EmbeddingUsage, MatchMethod, PatternMatcher};
use crate::rate_limit::FeedbackRateLimiter;
use crate::version_control::{validate_integrity, VersionControl};

const INITIAL_CONFIDENCE: f64 = 0.5;
const DECAY_CONCURRENCY: usize = 4;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, Copy)]
pub struct TrainingConfig {
    /// Confidence at which a `correct` confirmation verifies the source scrape.
    pub verified_threshold: f64,
    pub max_write_retries: u32,
    pub idempotency_window_secs: i64,
    pub stale_after_days: i64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            verified_threshold: 0.8,
            max_write_retries: 5,
            idempotency_window_secs: 60,
            stale_after_days: 7,
        }
    }
}

impl TrainingConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            verified_threshold: config.verified_threshold,
            max_write_retries: config.max_write_retries,
            idempotency_window_secs: config.idempotency_window_secs,
            stale_after_days: config.stale_after_days,
        }
    }
}

/// What a submission did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackReceipt {
    pub feedback_id: Uuid,
    pub outcome: FeedbackOutcomeKind,
    pub duplicate: bool,
    pub training_data_id: Option<Uuid>,
    /// Confidence of the pattern after this feedback (or as it stands, for duplicates).
    pub confidence: Option<f64>,
    pub version: Option<i64>,
    pub created_pattern: bool,
    pub match_method: Option<MatchMethod>,
    pub scrape_flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingAnalytics {
    pub tenant_id: String,
    pub active_patterns: usize,
    pub inactive_patterns: usize,
    pub average_confidence: Option<f64>,
    pub feedback_by_type: BTreeMap<String, i64>,
    pub unprocessed_feedback: i64,
    pub embedding_usage: EmbeddingUsage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReprocessSummary {
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecaySummary {
    pub examined: usize,
    pub decayed: usize,
    pub failed: usize,
}

pub struct TrainingManager {
    training: Arc<dyn TrainingStore>,
    feedback: Arc<dyn FeedbackStore>,
    scrapes: TemporaryScrapeStore,
    versions: VersionControl,
    matcher: Arc<PatternMatcher>,
    limiter: Arc<FeedbackRateLimiter>,
    scorer: ConfidenceScorer,
    config: TrainingConfig,
}

impl TrainingManager {
    #[must_use]
    pub fn new(
        training: Arc<dyn TrainingStore>,
        feedback: Arc<dyn FeedbackStore>,
        scrapes: TemporaryScrapeStore,
        matcher: Arc<PatternMatcher>,
        limiter: Arc<FeedbackRateLimiter>,
        scorer: ConfidenceScorer,
        config: TrainingConfig,
    ) -> Self {
        Self {
            versions: VersionControl::new(Arc::clone(&training)),
            training,
            feedback,
            scrapes,
            matcher,
            limiter,
            scorer,
            config,
        }
    }

    #[must_use]
    pub fn versions(&self) -> &VersionControl {
        &self.versions
    }

    #[must_use]
    pub fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }

    #[must_use]
    pub fn scorer(&self) -> &ConfidenceScorer {
        &self.scorer
    }

    /// # Errors
    ///
    /// See [`submit_feedback_at`](Self::submit_feedback_at).
    pub async fn submit_feedback(
        &self,
        feedback: NewFeedback,
    ) -> Result<FeedbackReceipt, LearningError> {
        self.submit_feedback_at(feedback, Utc::now()).await
    }

    /// Validate, throttle, store and apply one piece of feedback.
    ///
    /// # Errors
    ///
    /// - [`LearningError::Validation`] for a malformed payload (nothing stored).
    /// - [`LearningError::RateLimited`] when the tenant is over its allowance (nothing stored).
    /// - [`LearningError::Conflict`] when concurrent writers won every retry.
    /// - Storage and integrity errors as they occur.
    ///
    /// In the last two cases the feedback is stored but left unprocessed.
    pub async fn submit_feedback_at(
        &self,
        feedback: NewFeedback,
        now: DateTime<Utc>,
    ) -> Result<FeedbackReceipt, LearningError> {
        validate(&feedback)?;
        let tenant_id = feedback.tenant_id.trim().to_string();
        if let Err(retry_after_secs) = self.limiter.check(&tenant_id) {
            return Err(LearningError::RateLimited {
                tenant_id,
                retry_after_secs,
            });
        }

        let mut stored = ClientFeedback::from_new(feedback, now);
        stored.tenant_id = tenant_id;
        self.feedback.insert_feedback(&stored).await?;
        tracing::debug!(
            feedback_id = %stored.id,
            tenant_id = %stored.tenant_id,
            feedback_type = %stored.feedback_type,
            "feedback stored"
        );

        self.process(&stored, now).await
    }

    async fn process(
        &self,
        feedback: &ClientFeedback,
        now: DateTime<Utc>,
    ) -> Result<FeedbackReceipt, LearningError> {
        if let Some(receipt) = self.deduplicate(feedback).await? {
            return Ok(receipt);
        }
        if let Some(receipt) = self.discard_if_outlier(feedback).await? {
            return Ok(receipt);
        }

        let candidates = self.sound_candidates(feedback, now).await?;
        let matched = self
            .matcher
            .match_text(target_text(feedback), &candidates)
            .await;

        let (record, created_pattern) = match matched.training_data_id {
            Some(id) => (self.apply_with_retries(id, feedback, now).await?, false),
            None => (
                self.create_pattern(feedback, matched.embedding, now)
                    .await?,
                true,
            ),
        };

        let scrape_flagged = self.maybe_flag_scrape(feedback, &record, now).await;
        self.feedback
            .mark_feedback_processed(feedback.id, Some(record.id), FeedbackOutcomeKind::Applied)
            .await?;
        tracing::info!(
            feedback_id = %feedback.id,
            training_data_id = %record.id,
            confidence = record.confidence,
            version = record.version,
            created_pattern,
            method = ?matched.method,
            "feedback applied"
        );

        Ok(FeedbackReceipt {
            feedback_id: feedback.id,
            outcome: FeedbackOutcomeKind::Applied,
            duplicate: false,
            training_data_id: Some(record.id),
            confidence: Some(record.confidence),
            version: Some(record.version),
            created_pattern,
            match_method: Some(matched.method),
            scrape_flagged,
        })
    }

    /// Active patterns for the feedback's signal. Unsound records are recovered
    /// from history first and skipped when recovery fails.
    async fn sound_candidates(
        &self,
        feedback: &ClientFeedback,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrainingData>, LearningError> {
        let listed = self
            .training
            .list_training(&feedback.tenant_id, Some(&feedback.signal_id))
            .await?;
        let mut candidates = Vec::with_capacity(listed.len());
        for record in listed.into_iter().filter(|p| p.active) {
            if validate_integrity(&record).is_ok() {
                candidates.push(record);
                continue;
            }
            match self.versions.load_verified(record.id, now).await {
                Ok(recovered) if recovered.active => candidates.push(recovered),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        training_data_id = %record.id,
                        error = %err,
                        "unrecoverable pattern excluded from matching"
                    );
                }
            }
        }
        Ok(candidates)
    }

    /// A processed submission for the same tenant, signal and scrape within
    /// the same time bucket makes this one a no-op.
    async fn deduplicate(
        &self,
        feedback: &ClientFeedback,
    ) -> Result<Option<FeedbackReceipt>, LearningError> {
        let window = self.config.idempotency_window_secs.max(1);
        let bucket_start_secs = feedback.submitted_at.timestamp().div_euclid(window) * window;
        let Some(window_start) = DateTime::<Utc>::from_timestamp(bucket_start_secs, 0) else {
            return Ok(None);
        };
        let window_end = window_start + Duration::seconds(window);

        let Some(previous) = self
            .feedback
            .find_processed_duplicate(
                &feedback.tenant_id,
                &feedback.signal_id,
                feedback.source_scrape_id,
                window_start,
                window_end,
            )
            .await?
        else {
            return Ok(None);
        };

        let current = match previous.training_data_id {
            Some(id) => self.training.get_training(id).await?,
            None => None,
        };
        self.feedback
            .mark_feedback_processed(
                feedback.id,
                previous.training_data_id,
                FeedbackOutcomeKind::Duplicate,
            )
            .await?;
        tracing::info!(
            feedback_id = %feedback.id,
            original_feedback_id = %previous.id,
            "duplicate feedback ignored"
        );

        Ok(Some(FeedbackReceipt {
            feedback_id: feedback.id,
            outcome: FeedbackOutcomeKind::Duplicate,
            duplicate: true,
            training_data_id: previous.training_data_id,
            confidence: current.as_ref().map(|r| r.confidence),
            version: current.as_ref().map(|r| r.version),
            created_pattern: false,
            match_method: None,
            scrape_flagged: false,
        }))
    }

    async fn discard_if_outlier(
        &self,
        feedback: &ClientFeedback,
    ) -> Result<Option<FeedbackReceipt>, LearningError> {
        let Some(user_confidence) = feedback.user_confidence else {
            return Ok(None);
        };
        let population = self
            .feedback
            .user_confidences(&feedback.tenant_id, &feedback.signal_id, feedback.id)
            .await?;
        if !self.scorer.is_outlier(user_confidence, &population) {
            return Ok(None);
        }

        self.feedback
            .mark_feedback_processed(feedback.id, None, FeedbackOutcomeKind::DiscardedOutlier)
            .await?;
        tracing::warn!(
            feedback_id = %feedback.id,
            user_confidence,
            population = population.len(),
            "feedback discarded as outlier"
        );
        Ok(Some(FeedbackReceipt {
            feedback_id: feedback.id,
            outcome: FeedbackOutcomeKind::DiscardedOutlier,
            duplicate: false,
            training_data_id: None,
            confidence: None,
            version: None,
            created_pattern: false,
            match_method: None,
            scrape_flagged: false,
        }))
    }

    /// Read-modify-write with compare-and-swap, re-reading after each lost race.
    async fn apply_with_retries(
        &self,
        id: Uuid,
        feedback: &ClientFeedback,
        now: DateTime<Utc>,
    ) -> Result<TrainingData, LearningError> {
        let attempts = self.config.max_write_retries.max(1);
        for attempt in 1..=attempts {
            let current = self.versions.load_verified(id, now).await?;
            let next = self.rescore(&current, feedback.feedback_type, now);
            let reason = format!("feedback {}", feedback.feedback_type);
            match self
                .versions
                .write_version(
                    &current,
                    next,
                    ChangeType::Updated,
                    Some(&feedback.user_id),
                    Some(reason.as_str()),
                    now,
                )
                .await
            {
                Ok(record) => return Ok(record),
                Err(LearningError::Storage(DbError::VersionConflict { .. })) => {
                    tracing::warn!(
                        training_data_id = %id,
                        attempt,
                        max_attempts = attempts,
                        "version conflict, re-reading training data"
                    );
                }
                Err(other) => return Err(other),
            }
        }
        tracing::warn!(
            training_data_id = %id,
            feedback_id = %feedback.id,
            attempts,
            "giving up after repeated version conflicts; feedback left unprocessed"
        );
        Err(LearningError::Conflict { id, attempts })
    }

    async fn create_pattern(
        &self,
        feedback: &ClientFeedback,
        embedding: Option<Vec<f32>>,
        now: DateTime<Utc>,
    ) -> Result<TrainingData, LearningError> {
        let base = TrainingData {
            id: Uuid::new_v4(),
            tenant_id: feedback.tenant_id.clone(),
            signal_id: feedback.signal_id.clone(),
            pattern: target_text(feedback).trim().to_string(),
            pattern_type: if embedding.is_some() {
                PatternType::Embedding
            } else {
                PatternType::Keyword
            },
            embedding,
            confidence: INITIAL_CONFIDENCE,
            positive_count: 0,
            negative_count: 0,
            seen_count: 0,
            version: 1,
            active: true,
            created_at: now,
            last_updated_at: now,
        };
        let record = self.rescore(&base, feedback.feedback_type, now);
        let reason = format!("learned from feedback {}", feedback.id);
        self.versions
            .create(record, Some(&feedback.user_id), Some(reason.as_str()), now)
            .await
    }

    /// Count the feedback and recompute confidence.
    fn rescore(
        &self,
        current: &TrainingData,
        feedback_type: FeedbackType,
        now: DateTime<Utc>,
    ) -> TrainingData {
        let mut next = current.clone();
        next.seen_count += 1;
        if feedback_type.is_positive() {
            next.positive_count += 1;
        } else {
            next.negative_count += 1;
        }
        let update = self.scorer.update(
            current.confidence,
            next.positive_count,
            next.negative_count,
            age_days(current.last_updated_at, now),
            feedback_type.reward(),
        );
        next.confidence = update.confidence;
        next
    }

    async fn maybe_flag_scrape(
        &self,
        feedback: &ClientFeedback,
        record: &TrainingData,
        now: DateTime<Utc>,
    ) -> bool {
        if feedback.feedback_type != FeedbackType::Correct
            || record.confidence < self.config.verified_threshold
        {
            return false;
        }
        match self
            .scrapes
            .flag_for_early_deletion_at(feedback.source_scrape_id, now)
            .await
        {
            Ok(()) => {
                tracing::info!(scrape_id = %feedback.source_scrape_id, "verified scrape flagged for early deletion");
                true
            }
            Err(DbError::NotFound { .. }) => {
                tracing::debug!(scrape_id = %feedback.source_scrape_id, "verified scrape already gone");
                false
            }
            Err(err) => {
                tracing::warn!(scrape_id = %feedback.source_scrape_id, error = %err, "could not flag verified scrape");
                false
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`LearningError::Storage`] if the store is unavailable.
    pub async fn get_training_analytics(
        &self,
        tenant_id: &str,
    ) -> Result<TrainingAnalytics, LearningError> {
        let patterns = self.training.list_training(tenant_id, None).await?;
        let (active, inactive): (Vec<&TrainingData>, Vec<&TrainingData>) =
            patterns.iter().partition(|p| p.active);
        #[allow(clippy::cast_precision_loss)]
        let average_confidence = (!active.is_empty())
            .then(|| active.iter().map(|p| p.confidence).sum::<f64>() / active.len() as f64);

        let mut feedback_by_type: BTreeMap<String, i64> = FeedbackType::ALL
            .iter()
            .map(|ft| (ft.as_str().to_string(), 0))
            .collect();
        for (feedback_type, count) in self.feedback.feedback_counts(tenant_id).await? {
            feedback_by_type.insert(feedback_type.as_str().to_string(), count);
        }

        Ok(TrainingAnalytics {
            tenant_id: tenant_id.to_string(),
            active_patterns: active.len(),
            inactive_patterns: inactive.len(),
            average_confidence,
            feedback_by_type,
            unprocessed_feedback: self.feedback.count_unprocessed_feedback(tenant_id).await?,
            embedding_usage: self.matcher.usage(),
        })
    }

    /// Patterns for a tenant, optionally narrowed to one signal.
    ///
    /// # Errors
    ///
    /// Returns [`LearningError::Storage`] if the store is unavailable.
    pub async fn list_patterns(
        &self,
        tenant_id: &str,
        signal_id: Option<&str>,
    ) -> Result<Vec<TrainingData>, LearningError> {
        Ok(self.training.list_training(tenant_id, signal_id).await?)
    }

    /// # Errors
    ///
    /// See [`set_active`](Self::set_active).
    pub async fn activate_training_data(
        &self,
        id: Uuid,
        user_id: Option<&str>,
    ) -> Result<TrainingData, LearningError> {
        self.set_active(id, true, user_id, Utc::now()).await
    }

    /// # Errors
    ///
    /// See [`set_active`](Self::set_active).
    pub async fn deactivate_training_data(
        &self,
        id: Uuid,
        user_id: Option<&str>,
    ) -> Result<TrainingData, LearningError> {
        self.set_active(id, false, user_id, Utc::now()).await
    }

    /// Toggle the soft-delete flag. A record already in the requested state is
    /// returned unchanged, without a new version.
    ///
    /// # Errors
    ///
    /// [`LearningError::NotFound`] for an unknown id,
    /// [`LearningError::Integrity`] for an unsound record with no sound
    /// history, and a version conflict when another writer got there first.
    pub async fn set_active(
        &self,
        id: Uuid,
        active: bool,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TrainingData, LearningError> {
        let current = self.versions.load_verified(id, now).await?;
        if current.active == active {
            return Ok(current);
        }
        let mut next = current.clone();
        next.active = active;
        let change_type = if active {
            ChangeType::Activated
        } else {
            ChangeType::Deactivated
        };
        let record = self
            .versions
            .write_version(&current, next, change_type, user_id, None, now)
            .await?;
        tracing::info!(training_data_id = %id, active, version = record.version, "training data toggled");
        Ok(record)
    }

    /// Re-run every unprocessed feedback for a tenant, oldest first. Rate
    /// limits do not apply.
    ///
    /// # Errors
    ///
    /// Returns [`LearningError::Storage`] if the pending list cannot be read;
    /// failures on individual items are counted instead.
    pub async fn reprocess_pending(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ReprocessSummary, LearningError> {
        let pending = self.feedback.list_unprocessed_feedback(tenant_id).await?;
        let mut summary = ReprocessSummary::default();
        for feedback in &pending {
            match self.process(feedback, now).await {
                Ok(_) => summary.processed += 1,
                Err(err) => {
                    tracing::warn!(feedback_id = %feedback.id, error = %err, "reprocessing failed");
                    summary.failed += 1;
                }
            }
        }
        tracing::info!(tenant_id, processed = summary.processed, failed = summary.failed, "pending feedback reprocessed");
        Ok(summary)
    }

    /// Apply time decay to active patterns untouched for `stale_after_days`,
    /// each written as a new version.
    ///
    /// # Errors
    ///
    /// Returns [`LearningError::Storage`] if the stale list cannot be read.
    pub async fn decay_stale_patterns(
        &self,
        tenant_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DecaySummary, LearningError> {
        let cutoff = now - Duration::days(self.config.stale_after_days.max(0));
        let stale = self.training.list_stale_training(tenant_id, cutoff).await?;
        let examined = stale.len();

        let results = stream::iter(stale.into_iter().map(|listed| async move {
            let current = if validate_integrity(&listed).is_ok() {
                listed
            } else {
                self.versions
                    .load_verified(listed.id, now)
                    .await
                    .map_err(|err| (listed.id, err))?
            };
            let decayed = self
                .scorer
                .decayed(current.confidence, age_days(current.last_updated_at, now));
            if (decayed - current.confidence).abs() < f64::EPSILON {
                return Ok(false);
            }
            let mut next = current.clone();
            next.confidence = decayed;
            self.versions
                .write_version(&current, next, ChangeType::Updated, None, Some("time decay"), now)
                .await
                .map(|_| true)
                .map_err(|err| (current.id, err))
        }))
        .buffer_unordered(DECAY_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;

        let mut summary = DecaySummary {
            examined,
            ..DecaySummary::default()
        };
        for result in results {
            match result {
                Ok(true) => summary.decayed += 1,
                Ok(false) => {}
                Err((id, err)) => {
                    tracing::warn!(training_data_id = %id, error = %err, "decay write failed");
                    summary.failed += 1;
                }
            }
        }
        tracing::info!(
            examined = summary.examined,
            decayed = summary.decayed,
            failed = summary.failed,
            "stale patterns decayed"
        );
        Ok(summary)
    }
}

fn validate(feedback: &NewFeedback) -> Result<(), LearningError> {
    let blank = |value: &str| value.trim().is_empty();
    if blank(&feedback.tenant_id) {
        return Err(LearningError::Validation("tenant_id must be non-empty".into()));
    }
    if blank(&feedback.user_id) {
        return Err(LearningError::Validation("user_id must be non-empty".into()));
    }
    if blank(&feedback.signal_id) {
        return Err(LearningError::Validation("signal_id must be non-empty".into()));
    }
    if feedback.source_scrape_id.is_nil() {
        return Err(LearningError::Validation(
            "source_scrape_id must be set".into(),
        ));
    }
    if blank(&feedback.source_text) {
        return Err(LearningError::Validation(
            "source_text must be non-empty".into(),
        ));
    }
    if let Some(confidence) = feedback.user_confidence {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(LearningError::Validation(format!(
                "user_confidence {confidence} outside [0, 1]"
            )));
        }
    }
    Ok(())
}

/// Positive feedback trains the corrected text when given; negative feedback
/// always targets the text that was wrongly extracted.
fn target_text(feedback: &ClientFeedback) -> &str {
    if feedback.feedback_type.is_positive() {
        feedback.pattern_text()
    } else {
        &feedback.source_text
    }
}

#[allow(clippy::cast_precision_loss)]
fn age_days(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - since).num_milliseconds() as f64 / MILLIS_PER_DAY
}

#[cfg(test)]
#[path = "training_test.rs"]
mod tests;
