//! `extracted_signals` queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use distillery_core::ExtractedSignal;
use uuid::Uuid;

use super::{parse_column, PgStore};
use crate::store::SignalStore;
use crate::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
struct SignalRow {
    id: Uuid,
    tenant_id: String,
    signal_id: String,
    source_scrape_id: Uuid,
    matched_text: String,
    priority: String,
    occurrence_count: i32,
    confidence: i16,
    created_at: DateTime<Utc>,
}

impl TryFrom<SignalRow> for ExtractedSignal {
    type Error = DbError;

    fn try_from(row: SignalRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            signal_id: row.signal_id,
            source_scrape_id: row.source_scrape_id,
            matched_text: row.matched_text,
            priority: parse_column("priority", &row.priority)?,
            occurrence_count: u32::try_from(row.occurrence_count)
                .map_err(|e| DbError::Corrupt(format!("occurrence_count: {e}")))?,
            confidence: u8::try_from(row.confidence)
                .map_err(|e| DbError::Corrupt(format!("confidence: {e}")))?,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl SignalStore for PgStore {
    async fn insert_signals(&self, signals: &[ExtractedSignal]) -> Result<(), DbError> {
        if signals.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for signal in signals {
            sqlx::query(
                "INSERT INTO extracted_signals \
                 (id, tenant_id, signal_id, source_scrape_id, matched_text, priority, \
                  occurrence_count, confidence, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(signal.id)
            .bind(&signal.tenant_id)
            .bind(&signal.signal_id)
            .bind(signal.source_scrape_id)
            .bind(&signal.matched_text)
            .bind(signal.priority.as_str())
            .bind(i32::try_from(signal.occurrence_count).unwrap_or(i32::MAX))
            .bind(i16::from(signal.confidence))
            .bind(signal.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_signals_for_scrape(
        &self,
        tenant_id: &str,
        scrape_id: Uuid,
    ) -> Result<Vec<ExtractedSignal>, DbError> {
        let rows = sqlx::query_as::<_, SignalRow>(
            "SELECT id, tenant_id, signal_id, source_scrape_id, matched_text, priority, \
                    occurrence_count, confidence, created_at \
             FROM extracted_signals \
             WHERE tenant_id = $1 AND source_scrape_id = $2 \
             ORDER BY confidence DESC, signal_id",
        )
        .bind(tenant_id)
        .bind(scrape_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ExtractedSignal::try_from).collect()
    }
}
