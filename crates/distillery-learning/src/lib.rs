//! Continuous learning: confidence scoring, pattern matching, feedback-driven
//! training and version control of learned patterns.

pub mod confidence;
pub mod embeddings;
pub mod error;
pub mod matcher;
pub mod rate_limit;
mod retry;
pub mod training;
pub mod version_control;

pub use confidence::{ConfidenceScorer, ScorerConfig};
pub use embeddings::{EmbeddingConfig, EmbeddingProvider, HttpEmbeddingProvider};
pub use error::{EmbeddingError, LearningError};
pub use matcher::{MatchMethod, MatcherConfig, PatternMatcher};
pub use rate_limit::FeedbackRateLimiter;
pub use training::{
    DecaySummary, FeedbackReceipt, ReprocessSummary, TrainingAnalytics, TrainingConfig,
    TrainingManager,
};
pub use version_control::{BranchPatch, MergeOutcome, VersionControl};
