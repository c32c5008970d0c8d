//! Shared domain types and configuration for the distillery workspace.

mod app_config;
mod config;
pub mod error;
pub mod industry;
pub mod types;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use error::{ErrorKind, ErrorReport};
pub use industry::{
    load_industries, parse_industries, FluffPattern, IndustriesFile, IndustryConfig, IndustryRegistry, Region,
    ScoringRule, SignalDefinition,
};
pub use types::{
    Branch, ChangeType, ClientFeedback, ExtractedSignal, FeedbackOutcomeKind, FeedbackType,
    NewFeedback, PatternType, SignalPriority, TemporaryScrape, TrainingData, TrainingHistory,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read industries file {path}: {source}")]
    IndustriesFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse industries file: {0}")]
    IndustriesFileParse(#[from] serde_yaml::Error),

    #[error("industry config validation failed: {0}")]
    Validation(String),
}
