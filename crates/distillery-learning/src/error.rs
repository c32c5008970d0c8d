use distillery_core::ErrorKind;
use distillery_db::DbError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider not configured")]
    NotConfigured,

    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("embedding provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

#[derive(Debug, Error)]
pub enum LearningError {
    #[error("invalid feedback: {0}")]
    Validation(String),

    #[error("rate limit exceeded for tenant {tenant_id}; retry after {retry_after_secs}s")]
    RateLimited {
        tenant_id: String,
        retry_after_secs: u64,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("training data {id} still conflicting after {attempts} attempts")]
    Conflict { id: Uuid, attempts: u32 },

    #[error("training data {id} failed integrity checks and could not be recovered: {reason}")]
    Integrity { id: Uuid, reason: String },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Storage(#[from] DbError),
}

impl LearningError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LearningError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            LearningError::Validation(_) => ErrorKind::Validation,
            LearningError::RateLimited { .. } => ErrorKind::RateLimit,
            LearningError::NotFound { .. } => ErrorKind::NotFound,
            LearningError::Conflict { .. } => ErrorKind::Conflict,
            LearningError::Integrity { .. } => ErrorKind::Integrity,
            LearningError::Embedding(_) => ErrorKind::Provider,
            LearningError::Storage(e) => e.kind(),
        }
    }

    /// Explicit cooldown for throttled calls, otherwise the kind's default hint.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            LearningError::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            other => other.kind().default_backoff_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_reports_its_own_cooldown() {
        let err = LearningError::RateLimited {
            tenant_id: "t1".to_string(),
            retry_after_secs: 6,
        };
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.retry_after_secs(), Some(6));
    }

    #[test]
    fn storage_errors_keep_their_classification() {
        let err = LearningError::from(DbError::VersionConflict {
            id: Uuid::nil(),
            expected: 3,
        });
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.retry_after_secs(), Some(1));
    }

    #[test]
    fn provider_failures_are_retryable() {
        let err = LearningError::from(EmbeddingError::CountMismatch {
            expected: 2,
            got: 1,
        });
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert!(err.kind().is_retryable());
    }
}
