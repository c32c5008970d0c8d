//! `training_data`, `training_history` and `training_branches` queries.
//!
//! Record writes and their history entry share one transaction; updates are
//! compare-and-swap on `version`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use distillery_core::{Branch, TrainingData, TrainingHistory};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{parse_column, PgStore};
use crate::store::TrainingStore;
use crate::DbError;

const TRAINING_COLUMNS: &str = "id, tenant_id, signal_id, pattern, pattern_type, embedding, \
                                confidence, positive_count, negative_count, seen_count, version, \
                                active, created_at, last_updated_at";

#[derive(Debug, Clone, sqlx::FromRow)]
struct TrainingRow {
    id: Uuid,
    tenant_id: String,
    signal_id: String,
    pattern: String,
    pattern_type: String,
    embedding: Option<Vec<f32>>,
    confidence: f64,
    positive_count: i64,
    negative_count: i64,
    seen_count: i64,
    version: i64,
    active: bool,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
}

impl TryFrom<TrainingRow> for TrainingData {
    type Error = DbError;

    fn try_from(row: TrainingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            signal_id: row.signal_id,
            pattern: row.pattern,
            pattern_type: parse_column("pattern_type", &row.pattern_type)?,
            embedding: row.embedding,
            confidence: row.confidence,
            positive_count: row.positive_count,
            negative_count: row.negative_count,
            seen_count: row.seen_count,
            version: row.version,
            active: row.active,
            created_at: row.created_at,
            last_updated_at: row.last_updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    training_data_id: Uuid,
    tenant_id: String,
    user_id: Option<String>,
    change_type: String,
    previous_value: Option<serde_json::Value>,
    new_value: Option<serde_json::Value>,
    version: i64,
    reason: Option<String>,
    changed_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for TrainingHistory {
    type Error = DbError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            training_data_id: row.training_data_id,
            tenant_id: row.tenant_id,
            user_id: row.user_id,
            change_type: parse_column("change_type", &row.change_type)?,
            previous_value: row.previous_value,
            new_value: row.new_value,
            version: row.version,
            reason: row.reason,
            changed_at: row.changed_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct BranchRow {
    branch_id: Uuid,
    training_data_id: Uuid,
    tenant_id: String,
    base_version: i64,
    snapshot: serde_json::Value,
    active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<BranchRow> for Branch {
    type Error = DbError;

    fn try_from(row: BranchRow) -> Result<Self, Self::Error> {
        let snapshot = serde_json::from_value(row.snapshot)
            .map_err(|e| DbError::Corrupt(format!("branch snapshot: {e}")))?;
        Ok(Self {
            branch_id: row.branch_id,
            training_data_id: row.training_data_id,
            tenant_id: row.tenant_id,
            base_version: row.base_version,
            snapshot,
            active: row.active,
            created_at: row.created_at,
        })
    }
}

fn snapshot_json(record: &TrainingData) -> Result<serde_json::Value, DbError> {
    serde_json::to_value(record).map_err(|e| DbError::Corrupt(format!("branch snapshot: {e}")))
}

async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    history: &TrainingHistory,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO training_history \
         (id, training_data_id, tenant_id, user_id, change_type, previous_value, new_value, \
          version, reason, changed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(history.id)
    .bind(history.training_data_id)
    .bind(&history.tenant_id)
    .bind(history.user_id.as_deref())
    .bind(history.change_type.as_str())
    .bind(history.previous_value.as_ref())
    .bind(history.new_value.as_ref())
    .bind(history.version)
    .bind(history.reason.as_deref())
    .bind(history.changed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl TrainingStore for PgStore {
    async fn insert_training(
        &self,
        record: &TrainingData,
        history: &TrainingHistory,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO training_data ({TRAINING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(record.id)
        .bind(&record.tenant_id)
        .bind(&record.signal_id)
        .bind(&record.pattern)
        .bind(record.pattern_type.as_str())
        .bind(record.embedding.as_deref())
        .bind(record.confidence)
        .bind(record.positive_count)
        .bind(record.negative_count)
        .bind(record.seen_count)
        .bind(record.version)
        .bind(record.active)
        .bind(record.created_at)
        .bind(record.last_updated_at)
        .execute(&mut *tx)
        .await?;
        insert_history(&mut tx, history).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_training(&self, id: Uuid) -> Result<Option<TrainingData>, DbError> {
        let row = sqlx::query_as::<_, TrainingRow>(&format!(
            "SELECT {TRAINING_COLUMNS} FROM training_data WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TrainingData::try_from).transpose()
    }

    async fn list_training(
        &self,
        tenant_id: &str,
        signal_id: Option<&str>,
    ) -> Result<Vec<TrainingData>, DbError> {
        let rows = sqlx::query_as::<_, TrainingRow>(&format!(
            "SELECT {TRAINING_COLUMNS} FROM training_data \
             WHERE tenant_id = $1 AND ($2::TEXT IS NULL OR signal_id = $2) \
             ORDER BY created_at, id"
        ))
        .bind(tenant_id)
        .bind(signal_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TrainingData::try_from).collect()
    }

    async fn list_stale_training(
        &self,
        tenant_id: Option<&str>,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<TrainingData>, DbError> {
        let rows = sqlx::query_as::<_, TrainingRow>(&format!(
            "SELECT {TRAINING_COLUMNS} FROM training_data \
             WHERE active = true AND last_updated_at < $1 \
               AND ($2::TEXT IS NULL OR tenant_id = $2) \
             ORDER BY last_updated_at"
        ))
        .bind(updated_before)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TrainingData::try_from).collect()
    }

    async fn update_training(
        &self,
        expected_version: i64,
        record: &TrainingData,
        history: &TrainingHistory,
    ) -> Result<(), DbError> {
        if record.version <= expected_version {
            return Err(DbError::Corrupt(format!(
                "new version {} does not advance past {expected_version}",
                record.version
            )));
        }

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE training_data \
             SET signal_id = $3, pattern = $4, pattern_type = $5, embedding = $6, \
                 confidence = $7, positive_count = $8, negative_count = $9, seen_count = $10, \
                 version = $11, active = $12, last_updated_at = $13 \
             WHERE id = $1 AND version = $2",
        )
        .bind(record.id)
        .bind(expected_version)
        .bind(&record.signal_id)
        .bind(&record.pattern)
        .bind(record.pattern_type.as_str())
        .bind(record.embedding.as_deref())
        .bind(record.confidence)
        .bind(record.positive_count)
        .bind(record.negative_count)
        .bind(record.seen_count)
        .bind(record.version)
        .bind(record.active)
        .bind(record.last_updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT version FROM training_data WHERE id = $1")
                    .bind(record.id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(match exists {
                Some(_) => DbError::VersionConflict {
                    id: record.id,
                    expected: expected_version,
                },
                None => DbError::not_found("training data", record.id),
            });
        }

        insert_history(&mut tx, history).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_history(&self, training_data_id: Uuid) -> Result<Vec<TrainingHistory>, DbError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, training_data_id, tenant_id, user_id, change_type, previous_value, \
                    new_value, version, reason, changed_at \
             FROM training_history \
             WHERE training_data_id = $1 \
             ORDER BY version",
        )
        .bind(training_data_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TrainingHistory::try_from).collect()
    }

    async fn insert_branch(&self, branch: &Branch) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO training_branches \
             (branch_id, training_data_id, tenant_id, base_version, snapshot, active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(branch.branch_id)
        .bind(branch.training_data_id)
        .bind(&branch.tenant_id)
        .bind(branch.base_version)
        .bind(snapshot_json(&branch.snapshot)?)
        .bind(branch.active)
        .bind(branch.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_branch(&self, branch_id: Uuid) -> Result<Option<Branch>, DbError> {
        let row = sqlx::query_as::<_, BranchRow>(
            "SELECT branch_id, training_data_id, tenant_id, base_version, snapshot, active, \
                    created_at \
             FROM training_branches WHERE branch_id = $1",
        )
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Branch::try_from).transpose()
    }

    async fn update_branch(&self, branch: &Branch) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE training_branches SET snapshot = $2, active = $3 WHERE branch_id = $1",
        )
        .bind(branch.branch_id)
        .bind(snapshot_json(&branch.snapshot)?)
        .bind(branch.active)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("branch", branch.branch_id));
        }
        Ok(())
    }
}
