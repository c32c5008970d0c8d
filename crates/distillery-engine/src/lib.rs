//! Distillation of scraped content into scored business signals.

pub mod detect;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod fluff;
pub mod scoring;
pub mod selection;

pub use detect::{DetectedSignal, SignalDetector};
pub use engine::{DistillMode, Distillation, DistillationEngine, SkipReason};
pub use enrich::{EnrichmentMetrics, EnrichmentResult, Enricher, IngestRequest};
pub use error::DistillError;
pub use fluff::{FilteredContent, FluffFilter};
pub use scoring::{lead_score, signal_confidence};
pub use selection::{BestOf, Consensus, SignalSelector};
