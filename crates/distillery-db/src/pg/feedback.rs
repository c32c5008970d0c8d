//! `client_feedback` queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use distillery_core::{ClientFeedback, FeedbackOutcomeKind, FeedbackType};
use uuid::Uuid;

use super::{parse_column, PgStore};
use crate::store::FeedbackStore;
use crate::DbError;

const FEEDBACK_COLUMNS: &str = "id, tenant_id, user_id, feedback_type, signal_id, \
                                source_scrape_id, source_text, corrected_value, user_confidence, \
                                submitted_at, processed, training_data_id, outcome";

#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedbackRow {
    id: Uuid,
    tenant_id: String,
    user_id: String,
    feedback_type: String,
    signal_id: String,
    source_scrape_id: Uuid,
    source_text: String,
    corrected_value: Option<String>,
    user_confidence: Option<f64>,
    submitted_at: DateTime<Utc>,
    processed: bool,
    training_data_id: Option<Uuid>,
    outcome: Option<String>,
}

impl TryFrom<FeedbackRow> for ClientFeedback {
    type Error = DbError;

    fn try_from(row: FeedbackRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            user_id: row.user_id,
            feedback_type: parse_column("feedback_type", &row.feedback_type)?,
            signal_id: row.signal_id,
            source_scrape_id: row.source_scrape_id,
            source_text: row.source_text,
            corrected_value: row.corrected_value,
            user_confidence: row.user_confidence,
            submitted_at: row.submitted_at,
            processed: row.processed,
            training_data_id: row.training_data_id,
            outcome: row
                .outcome
                .as_deref()
                .map(|o| parse_column("outcome", o))
                .transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CountRow {
    feedback_type: String,
    total: i64,
}

#[async_trait]
impl FeedbackStore for PgStore {
    async fn insert_feedback(&self, feedback: &ClientFeedback) -> Result<(), DbError> {
        sqlx::query(&format!(
            "INSERT INTO client_feedback ({FEEDBACK_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(feedback.id)
        .bind(&feedback.tenant_id)
        .bind(&feedback.user_id)
        .bind(feedback.feedback_type.as_str())
        .bind(&feedback.signal_id)
        .bind(feedback.source_scrape_id)
        .bind(&feedback.source_text)
        .bind(feedback.corrected_value.as_deref())
        .bind(feedback.user_confidence)
        .bind(feedback.submitted_at)
        .bind(feedback.processed)
        .bind(feedback.training_data_id)
        .bind(feedback.outcome.map(|o| o.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_feedback(&self, id: Uuid) -> Result<Option<ClientFeedback>, DbError> {
        let row = sqlx::query_as::<_, FeedbackRow>(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM client_feedback WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ClientFeedback::try_from).transpose()
    }

    async fn find_processed_duplicate(
        &self,
        tenant_id: &str,
        signal_id: &str,
        source_scrape_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Option<ClientFeedback>, DbError> {
        let row = sqlx::query_as::<_, FeedbackRow>(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM client_feedback \
             WHERE tenant_id = $1 AND signal_id = $2 AND source_scrape_id = $3 \
               AND processed = true AND outcome IN ('applied', 'discarded_outlier') \
               AND submitted_at >= $4 AND submitted_at < $5 \
             ORDER BY submitted_at \
             LIMIT 1"
        ))
        .bind(tenant_id)
        .bind(signal_id)
        .bind(source_scrape_id)
        .bind(window_start)
        .bind(window_end)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ClientFeedback::try_from).transpose()
    }

    async fn mark_feedback_processed(
        &self,
        id: Uuid,
        training_data_id: Option<Uuid>,
        outcome: FeedbackOutcomeKind,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE client_feedback \
             SET processed = true, training_data_id = $2, outcome = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(training_data_id)
        .bind(outcome.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("feedback", id));
        }
        Ok(())
    }

    async fn list_unprocessed_feedback(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<ClientFeedback>, DbError> {
        let rows = sqlx::query_as::<_, FeedbackRow>(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM client_feedback \
             WHERE tenant_id = $1 AND processed = false \
             ORDER BY submitted_at"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ClientFeedback::try_from).collect()
    }

    async fn user_confidences(
        &self,
        tenant_id: &str,
        signal_id: &str,
        exclude: Uuid,
    ) -> Result<Vec<f64>, DbError> {
        let values = sqlx::query_scalar::<_, f64>(
            "SELECT user_confidence FROM client_feedback \
             WHERE tenant_id = $1 AND signal_id = $2 AND id <> $3 \
               AND user_confidence IS NOT NULL",
        )
        .bind(tenant_id)
        .bind(signal_id)
        .bind(exclude)
        .fetch_all(&self.pool)
        .await?;
        Ok(values)
    }

    async fn feedback_counts(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<(FeedbackType, i64)>, DbError> {
        let rows = sqlx::query_as::<_, CountRow>(
            "SELECT feedback_type, COUNT(*)::BIGINT AS total \
             FROM client_feedback WHERE tenant_id = $1 \
             GROUP BY feedback_type",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        let mut counts = rows
            .into_iter()
            .map(|r| Ok((parse_column("feedback_type", &r.feedback_type)?, r.total)))
            .collect::<Result<Vec<(FeedbackType, i64)>, DbError>>()?;
        counts.sort_by_key(|(ft, _)| *ft);
        Ok(counts)
    }

    async fn count_unprocessed_feedback(&self, tenant_id: &str) -> Result<i64, DbError> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*)::BIGINT FROM client_feedback \
             WHERE tenant_id = $1 AND processed = false",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }
}
