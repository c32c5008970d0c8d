//! In-memory backend implementing every storage trait.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Locks are never held
//! across an `.await`, and multi-table writes take locks in a fixed order
//! (training, then history) so they stay atomic with respect to each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use distillery_core::{
    Branch, ClientFeedback, ExtractedSignal, FeedbackOutcomeKind, FeedbackType, TemporaryScrape,
    TrainingData, TrainingHistory,
};
use uuid::Uuid;

use crate::store::{FeedbackStore, ScrapeStats, ScrapeStore, SignalStore, TrainingStore};
use crate::DbError;

#[derive(Default)]
pub struct MemoryStore {
    scrapes: RwLock<HashMap<Uuid, TemporaryScrape>>,
    signals: RwLock<Vec<ExtractedSignal>>,
    training: RwLock<HashMap<Uuid, TrainingData>>,
    history: RwLock<Vec<TrainingHistory>>,
    branches: RwLock<HashMap<Uuid, Branch>>,
    feedback: RwLock<Vec<ClientFeedback>>,
    offline: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the database were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Replace a training record in place, bypassing version checks and history.
    ///
    /// Simulates out-of-band corruption for recovery tests.
    pub fn overwrite_training(&self, record: TrainingData) {
        write(&self.training).insert(record.id, record);
    }

    fn check_online(&self) -> Result<(), DbError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DbError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ScrapeStore for MemoryStore {
    async fn upsert_scrape(
        &self,
        candidate: &TemporaryScrape,
        now: DateTime<Utc>,
    ) -> Result<(TemporaryScrape, bool), DbError> {
        self.check_online()?;
        let mut scrapes = write(&self.scrapes);
        let same_key = |s: &TemporaryScrape| {
            s.tenant_id == candidate.tenant_id && s.content_hash == candidate.content_hash
        };

        if let Some(existing) = scrapes
            .values_mut()
            .find(|s| same_key(s) && !s.is_expired(now))
        {
            existing.last_seen_at = now;
            return Ok((existing.clone(), false));
        }

        scrapes.retain(|_, s| !same_key(s));
        scrapes.insert(candidate.id, candidate.clone());
        Ok((candidate.clone(), true))
    }

    async fn find_live_scrape_by_hash(
        &self,
        tenant_id: &str,
        content_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TemporaryScrape>, DbError> {
        self.check_online()?;
        Ok(read(&self.scrapes)
            .values()
            .find(|s| {
                s.tenant_id == tenant_id && s.content_hash == content_hash && !s.is_expired(now)
            })
            .cloned())
    }

    async fn find_live_scrape_by_id(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<TemporaryScrape>, DbError> {
        self.check_online()?;
        Ok(read(&self.scrapes)
            .get(&id)
            .filter(|s| !s.is_expired(now))
            .cloned())
    }

    async fn mark_scrape_verified(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DbError> {
        self.check_online()?;
        let mut scrapes = write(&self.scrapes);
        let Some(scrape) = scrapes.get_mut(&id) else {
            return Ok(false);
        };
        scrape.verified_at = Some(now);
        scrape.expires_at = scrape.expires_at.min(now);
        Ok(true)
    }

    async fn delete_expired_scrapes(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        self.check_online()?;
        let mut scrapes = write(&self.scrapes);
        let before = scrapes.len();
        scrapes.retain(|_, s| !s.is_expired(now));
        Ok(u64::try_from(before - scrapes.len()).unwrap_or(u64::MAX))
    }

    async fn scrape_stats(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ScrapeStats, DbError> {
        self.check_online()?;
        let scrapes = read(&self.scrapes);
        let live = scrapes
            .values()
            .filter(|s| s.tenant_id == tenant_id && !s.is_expired(now));
        let mut stats = ScrapeStats::default();
        for scrape in live {
            stats.live_records += 1;
            stats.raw_bytes += i64::try_from(scrape.raw_content.len()).unwrap_or(i64::MAX);
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<(), DbError> {
        self.check_online()
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn insert_signals(&self, signals: &[ExtractedSignal]) -> Result<(), DbError> {
        self.check_online()?;
        write(&self.signals).extend_from_slice(signals);
        Ok(())
    }

    async fn list_signals_for_scrape(
        &self,
        tenant_id: &str,
        scrape_id: Uuid,
    ) -> Result<Vec<ExtractedSignal>, DbError> {
        self.check_online()?;
        let mut signals: Vec<ExtractedSignal> = read(&self.signals)
            .iter()
            .filter(|s| s.tenant_id == tenant_id && s.source_scrape_id == scrape_id)
            .cloned()
            .collect();
        signals.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then_with(|| a.signal_id.cmp(&b.signal_id))
        });
        Ok(signals)
    }
}

#[async_trait]
impl TrainingStore for MemoryStore {
    async fn insert_training(
        &self,
        record: &TrainingData,
        history: &TrainingHistory,
    ) -> Result<(), DbError> {
        self.check_online()?;
        let mut training = write(&self.training);
        let mut log = write(&self.history);
        if training.contains_key(&record.id) {
            return Err(DbError::Corrupt(format!(
                "training data {} already exists",
                record.id
            )));
        }
        training.insert(record.id, record.clone());
        log.push(history.clone());
        Ok(())
    }

    async fn get_training(&self, id: Uuid) -> Result<Option<TrainingData>, DbError> {
        self.check_online()?;
        Ok(read(&self.training).get(&id).cloned())
    }

    async fn list_training(
        &self,
        tenant_id: &str,
        signal_id: Option<&str>,
    ) -> Result<Vec<TrainingData>, DbError> {
        self.check_online()?;
        let mut records: Vec<TrainingData> = read(&self.training)
            .values()
            .filter(|t| t.tenant_id == tenant_id)
            .filter(|t| signal_id.is_none_or(|sid| t.signal_id == sid))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn list_stale_training(
        &self,
        tenant_id: Option<&str>,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<TrainingData>, DbError> {
        self.check_online()?;
        let mut records: Vec<TrainingData> = read(&self.training)
            .values()
            .filter(|t| t.active && t.last_updated_at < updated_before)
            .filter(|t| tenant_id.is_none_or(|tid| t.tenant_id == tid))
            .cloned()
            .collect();
        records.sort_by_key(|t| t.last_updated_at);
        Ok(records)
    }

    async fn update_training(
        &self,
        expected_version: i64,
        record: &TrainingData,
        history: &TrainingHistory,
    ) -> Result<(), DbError> {
        self.check_online()?;
        if record.version <= expected_version {
            return Err(DbError::Corrupt(format!(
                "new version {} does not advance past {expected_version}",
                record.version
            )));
        }
        let mut training = write(&self.training);
        let mut log = write(&self.history);
        let current = training
            .get_mut(&record.id)
            .ok_or_else(|| DbError::not_found("training data", record.id))?;
        if current.version != expected_version {
            return Err(DbError::VersionConflict {
                id: record.id,
                expected: expected_version,
            });
        }
        *current = record.clone();
        log.push(history.clone());
        Ok(())
    }

    async fn list_history(&self, training_data_id: Uuid) -> Result<Vec<TrainingHistory>, DbError> {
        self.check_online()?;
        let mut entries: Vec<TrainingHistory> = read(&self.history)
            .iter()
            .filter(|h| h.training_data_id == training_data_id)
            .cloned()
            .collect();
        entries.sort_by_key(|h| h.version);
        Ok(entries)
    }

    async fn insert_branch(&self, branch: &Branch) -> Result<(), DbError> {
        self.check_online()?;
        write(&self.branches).insert(branch.branch_id, branch.clone());
        Ok(())
    }

    async fn get_branch(&self, branch_id: Uuid) -> Result<Option<Branch>, DbError> {
        self.check_online()?;
        Ok(read(&self.branches).get(&branch_id).cloned())
    }

    async fn update_branch(&self, branch: &Branch) -> Result<(), DbError> {
        self.check_online()?;
        let mut branches = write(&self.branches);
        let stored = branches
            .get_mut(&branch.branch_id)
            .ok_or_else(|| DbError::not_found("branch", branch.branch_id))?;
        stored.snapshot = branch.snapshot.clone();
        stored.active = branch.active;
        Ok(())
    }
}

#[async_trait]
impl FeedbackStore for MemoryStore {
    async fn insert_feedback(&self, feedback: &ClientFeedback) -> Result<(), DbError> {
        self.check_online()?;
        write(&self.feedback).push(feedback.clone());
        Ok(())
    }

    async fn get_feedback(&self, id: Uuid) -> Result<Option<ClientFeedback>, DbError> {
        self.check_online()?;
        Ok(read(&self.feedback).iter().find(|f| f.id == id).cloned())
    }

    async fn find_processed_duplicate(
        &self,
        tenant_id: &str,
        signal_id: &str,
        source_scrape_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Option<ClientFeedback>, DbError> {
        self.check_online()?;
        Ok(read(&self.feedback)
            .iter()
            .filter(|f| {
                f.tenant_id == tenant_id
                    && f.signal_id == signal_id
                    && f.source_scrape_id == source_scrape_id
                    && f.processed
                    && matches!(
                        f.outcome,
                        Some(FeedbackOutcomeKind::Applied | FeedbackOutcomeKind::DiscardedOutlier)
                    )
                    && f.submitted_at >= window_start
                    && f.submitted_at < window_end
            })
            .min_by_key(|f| f.submitted_at)
            .cloned())
    }

    async fn mark_feedback_processed(
        &self,
        id: Uuid,
        training_data_id: Option<Uuid>,
        outcome: FeedbackOutcomeKind,
    ) -> Result<(), DbError> {
        self.check_online()?;
        let mut feedback = write(&self.feedback);
        let entry = feedback
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| DbError::not_found("feedback", id))?;
        entry.processed = true;
        entry.training_data_id = training_data_id;
        entry.outcome = Some(outcome);
        Ok(())
    }

    async fn list_unprocessed_feedback(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<ClientFeedback>, DbError> {
        self.check_online()?;
        let mut pending: Vec<ClientFeedback> = read(&self.feedback)
            .iter()
            .filter(|f| f.tenant_id == tenant_id && !f.processed)
            .cloned()
            .collect();
        pending.sort_by_key(|f| f.submitted_at);
        Ok(pending)
    }

    async fn user_confidences(
        &self,
        tenant_id: &str,
        signal_id: &str,
        exclude: Uuid,
    ) -> Result<Vec<f64>, DbError> {
        self.check_online()?;
        Ok(read(&self.feedback)
            .iter()
            .filter(|f| f.tenant_id == tenant_id && f.signal_id == signal_id && f.id != exclude)
            .filter_map(|f| f.user_confidence)
            .collect())
    }

    async fn feedback_counts(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<(FeedbackType, i64)>, DbError> {
        self.check_online()?;
        let feedback = read(&self.feedback);
        Ok(FeedbackType::ALL
            .iter()
            .map(|ft| {
                let n = feedback
                    .iter()
                    .filter(|f| f.tenant_id == tenant_id && f.feedback_type == *ft)
                    .count();
                (*ft, i64::try_from(n).unwrap_or(i64::MAX))
            })
            .filter(|(_, n)| *n > 0)
            .collect())
    }

    async fn count_unprocessed_feedback(&self, tenant_id: &str) -> Result<i64, DbError> {
        self.check_online()?;
        let n = read(&self.feedback)
            .iter()
            .filter(|f| f.tenant_id == tenant_id && !f.processed)
            .count();
        Ok(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
