//! Content-addressed cache of raw scrapes with a bounded lifetime.
//!
//! Records live for `ttl` after first sighting. Expiry is enforced twice:
//! reads filter out anything past `expires_at`, and [`TemporaryScrapeStore::sweep_expired`]
//! physically removes it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use distillery_core::TemporaryScrape;
use uuid::Uuid;

use crate::dedup::content_hash;
use crate::store::{ScrapeStats, ScrapeStore};
use crate::DbError;

pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Result of [`TemporaryScrapeStore::save`].
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub record: TemporaryScrape,
    /// `false` when a live record with the same content already existed.
    pub is_new: bool,
}

#[derive(Clone)]
pub struct TemporaryScrapeStore {
    backend: Arc<dyn ScrapeStore>,
    ttl: Duration,
}

impl TemporaryScrapeStore {
    #[must_use]
    pub fn new(backend: Arc<dyn ScrapeStore>, ttl_days: i64) -> Self {
        Self {
            backend,
            ttl: Duration::days(ttl_days.max(1)),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a scrape, or refresh `last_seen_at` on the live record with the same hash.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend is unavailable.
    pub async fn save(
        &self,
        tenant_id: &str,
        url: &str,
        raw_content: &str,
        cleaned_content: &str,
    ) -> Result<SaveOutcome, DbError> {
        self.save_at(tenant_id, url, raw_content, cleaned_content, Utc::now())
            .await
    }

    /// [`save`](Self::save) with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend is unavailable.
    pub async fn save_at(
        &self,
        tenant_id: &str,
        url: &str,
        raw_content: &str,
        cleaned_content: &str,
        now: DateTime<Utc>,
    ) -> Result<SaveOutcome, DbError> {
        let candidate = TemporaryScrape {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            url: url.to_string(),
            content_hash: content_hash(raw_content),
            raw_content: raw_content.to_string(),
            cleaned_content: cleaned_content.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
            last_seen_at: now,
            verified_at: None,
        };

        let (record, is_new) = self.backend.upsert_scrape(&candidate, now).await?;
        if is_new {
            tracing::debug!(
                tenant_id,
                scrape_id = %record.id,
                hash = %record.content_hash,
                expires_at = %record.expires_at,
                "stored new scrape"
            );
        } else {
            tracing::debug!(
                tenant_id,
                scrape_id = %record.id,
                hash = %record.content_hash,
                "duplicate scrape; refreshed last_seen_at"
            );
        }
        Ok(SaveOutcome { record, is_new })
    }

    /// # Errors
    ///
    /// Returns [`DbError`] if the backend is unavailable.
    pub async fn get_by_hash(
        &self,
        tenant_id: &str,
        hash: &str,
    ) -> Result<Option<TemporaryScrape>, DbError> {
        self.get_by_hash_at(tenant_id, hash, Utc::now()).await
    }

    /// # Errors
    ///
    /// Returns [`DbError`] if the backend is unavailable.
    pub async fn get_by_hash_at(
        &self,
        tenant_id: &str,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TemporaryScrape>, DbError> {
        self.backend
            .find_live_scrape_by_hash(tenant_id, hash, now)
            .await
    }

    /// # Errors
    ///
    /// Returns [`DbError`] if the backend is unavailable.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<TemporaryScrape>, DbError> {
        self.backend.find_live_scrape_by_id(id, Utc::now()).await
    }

    /// Mark a scrape verified and make it expire immediately.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if no scrape has that id.
    pub async fn flag_for_early_deletion(&self, id: Uuid) -> Result<(), DbError> {
        self.flag_for_early_deletion_at(id, Utc::now()).await
    }

    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if no scrape has that id.
    pub async fn flag_for_early_deletion_at(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        if !self.backend.mark_scrape_verified(id, now).await? {
            return Err(DbError::not_found("scrape", id));
        }
        tracing::info!(scrape_id = %id, "scrape flagged for early deletion");
        Ok(())
    }

    /// Remove every record past its expiry. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend is unavailable.
    pub async fn sweep_expired(&self) -> Result<u64, DbError> {
        self.sweep_expired_at(Utc::now()).await
    }

    /// # Errors
    ///
    /// Returns [`DbError`] if the backend is unavailable.
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let removed = self.backend.delete_expired_scrapes(now).await?;
        tracing::info!(removed, "swept expired scrapes");
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns [`DbError`] if the backend is unavailable.
    pub async fn storage_stats(&self, tenant_id: &str) -> Result<ScrapeStats, DbError> {
        self.backend.scrape_stats(tenant_id, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn store() -> TemporaryScrapeStore {
        TemporaryScrapeStore::new(Arc::new(MemoryStore::new()), DEFAULT_TTL_DAYS)
    }

    #[tokio::test]
    async fn saving_same_content_twice_is_idempotent() {
        let store = store();
        let t0 = Utc::now();
        let first = store
            .save_at("t1", "https://acme.test", "<p>Acme</p>", "Acme", t0)
            .await
            .unwrap();
        assert!(first.is_new);
        assert_eq!(first.record.expires_at, t0 + Duration::days(7));

        let t1 = t0 + Duration::hours(1);
        let second = store
            .save_at("t1", "https://acme.test/about", "<p>Acme</p>", "Acme", t1)
            .await
            .unwrap();
        assert!(!second.is_new);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.last_seen_at, t1);
        assert_eq!(second.record.expires_at, first.record.expires_at);
    }

    #[tokio::test]
    async fn same_content_is_isolated_per_tenant() {
        let store = store();
        let a = store.save("t1", "u", "same", "same").await.unwrap();
        let b = store.save("t2", "u", "same", "same").await.unwrap();
        assert!(a.is_new && b.is_new);
        assert_ne!(a.record.id, b.record.id);
    }

    #[tokio::test]
    async fn expired_records_are_never_returned() {
        let store = store();
        let t0 = Utc::now();
        let saved = store.save_at("t1", "u", "body", "body", t0).await.unwrap();
        let hash = saved.record.content_hash.clone();

        let before_expiry = t0 + Duration::days(7) - Duration::seconds(1);
        assert!(store
            .get_by_hash_at("t1", &hash, before_expiry)
            .await
            .unwrap()
            .is_some());

        let at_expiry = t0 + Duration::days(7);
        assert!(store
            .get_by_hash_at("t1", &hash, at_expiry)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn expired_but_unswept_record_is_replaced() {
        let store = store();
        let t0 = Utc::now();
        let old = store.save_at("t1", "u", "body", "body", t0).await.unwrap();

        let later = t0 + Duration::days(8);
        let fresh = store.save_at("t1", "u", "body", "body", later).await.unwrap();
        assert!(fresh.is_new);
        assert_ne!(fresh.record.id, old.record.id);
        assert_eq!(fresh.record.expires_at, later + Duration::days(7));
    }

    #[tokio::test]
    async fn early_deletion_hides_record_and_sweep_removes_it() {
        let store = store();
        let saved = store.save("t1", "u", "verified body", "v").await.unwrap();
        store
            .flag_for_early_deletion(saved.record.id)
            .await
            .unwrap();

        assert!(store.get_by_id(saved.record.id).await.unwrap().is_none());
        assert!(store
            .get_by_hash("t1", &saved.record.content_hash)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn flagging_unknown_scrape_is_not_found() {
        let store = store();
        let err = store
            .flag_for_early_deletion(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { entity: "scrape", .. }));
    }

    #[tokio::test]
    async fn sweep_only_removes_expired_records() {
        let store = store();
        let t0 = Utc::now();
        store.save_at("t1", "u", "old", "old", t0).await.unwrap();
        store
            .save_at("t1", "u", "new", "new", t0 + Duration::days(3))
            .await
            .unwrap();

        let removed = store
            .sweep_expired_at(t0 + Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn storage_stats_count_live_bytes() {
        let store = store();
        store.save("t1", "u", "abcd", "abcd").await.unwrap();
        store.save("t1", "u", "efghij", "efghij").await.unwrap();
        let stats = store.storage_stats("t1").await.unwrap();
        assert_eq!(stats.live_records, 2);
        assert_eq!(stats.raw_bytes, 10);
    }

    #[tokio::test]
    async fn backend_outage_propagates() {
        let backend = Arc::new(MemoryStore::new());
        let store = TemporaryScrapeStore::new(backend.clone(), DEFAULT_TTL_DAYS);
        backend.set_offline(true);
        let err = store.save("t1", "u", "x", "x").await.unwrap_err();
        assert!(err.kind().is_retryable());
    }
}
