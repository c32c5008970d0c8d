//! `temporary_scrapes` queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use distillery_core::TemporaryScrape;
use uuid::Uuid;

use super::PgStore;
use crate::store::{ScrapeStats, ScrapeStore};
use crate::DbError;

const SCRAPE_COLUMNS: &str = "id, tenant_id, url, content_hash, raw_content, cleaned_content, \
                              created_at, expires_at, last_seen_at, verified_at";

/// A row from the `temporary_scrapes` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct ScrapeRow {
    id: Uuid,
    tenant_id: String,
    url: String,
    content_hash: String,
    raw_content: String,
    cleaned_content: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    verified_at: Option<DateTime<Utc>>,
}

/// Upsert result; `inserted` is `xmax = 0`, true only for freshly inserted tuples.
#[derive(Debug, sqlx::FromRow)]
struct UpsertedScrapeRow {
    #[sqlx(flatten)]
    scrape: ScrapeRow,
    inserted: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    live_records: i64,
    raw_bytes: i64,
}

impl From<ScrapeRow> for TemporaryScrape {
    fn from(row: ScrapeRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            url: row.url,
            content_hash: row.content_hash,
            raw_content: row.raw_content,
            cleaned_content: row.cleaned_content,
            created_at: row.created_at,
            expires_at: row.expires_at,
            last_seen_at: row.last_seen_at,
            verified_at: row.verified_at,
        }
    }
}

#[async_trait]
impl ScrapeStore for PgStore {
    async fn upsert_scrape(
        &self,
        candidate: &TemporaryScrape,
        now: DateTime<Utc>,
    ) -> Result<(TemporaryScrape, bool), DbError> {
        let mut tx = self.pool.begin().await?;

        // An expired row still holds the unique key until the sweeper runs.
        sqlx::query(
            "DELETE FROM temporary_scrapes \
             WHERE tenant_id = $1 AND content_hash = $2 AND expires_at <= $3",
        )
        .bind(&candidate.tenant_id)
        .bind(&candidate.content_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, UpsertedScrapeRow>(&format!(
            "INSERT INTO temporary_scrapes ({SCRAPE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL) \
             ON CONFLICT (tenant_id, content_hash) DO UPDATE \
             SET last_seen_at = EXCLUDED.last_seen_at \
             RETURNING {SCRAPE_COLUMNS}, (xmax = 0) AS inserted"
        ))
        .bind(candidate.id)
        .bind(&candidate.tenant_id)
        .bind(&candidate.url)
        .bind(&candidate.content_hash)
        .bind(&candidate.raw_content)
        .bind(&candidate.cleaned_content)
        .bind(candidate.created_at)
        .bind(candidate.expires_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((row.scrape.into(), row.inserted))
    }

    async fn find_live_scrape_by_hash(
        &self,
        tenant_id: &str,
        content_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TemporaryScrape>, DbError> {
        let row = sqlx::query_as::<_, ScrapeRow>(&format!(
            "SELECT {SCRAPE_COLUMNS} FROM temporary_scrapes \
             WHERE tenant_id = $1 AND content_hash = $2 AND expires_at > $3"
        ))
        .bind(tenant_id)
        .bind(content_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_live_scrape_by_id(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<TemporaryScrape>, DbError> {
        let row = sqlx::query_as::<_, ScrapeRow>(&format!(
            "SELECT {SCRAPE_COLUMNS} FROM temporary_scrapes \
             WHERE id = $1 AND expires_at > $2"
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn mark_scrape_verified(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE temporary_scrapes \
             SET verified_at = $2, expires_at = LEAST(expires_at, $2) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_scrapes(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM temporary_scrapes WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn scrape_stats(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ScrapeStats, DbError> {
        let row = sqlx::query_as::<_, StatsRow>(
            "SELECT COUNT(*)::BIGINT AS live_records, \
                    COALESCE(SUM(OCTET_LENGTH(raw_content)), 0)::BIGINT AS raw_bytes \
             FROM temporary_scrapes \
             WHERE tenant_id = $1 AND expires_at > $2",
        )
        .bind(tenant_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(ScrapeStats {
            live_records: row.live_records,
            raw_bytes: row.raw_bytes,
        })
    }

    async fn ping(&self) -> Result<(), DbError> {
        crate::health_check(&self.pool).await
    }
}
