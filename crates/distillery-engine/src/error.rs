use distillery_core::ErrorKind;
use distillery_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistillError {
    #[error("invalid ingest request: {0}")]
    Validation(String),

    #[error("invalid pattern '{pattern}' for {context}: {source}")]
    Pattern {
        context: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Storage(#[from] DbError),
}

impl DistillError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            DistillError::Validation(_) | DistillError::Pattern { .. } => ErrorKind::Validation,
            DistillError::Storage(e) => e.kind(),
        }
    }
}
