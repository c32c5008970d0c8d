//! The distillation pass: fluff removal, signal detection and lead scoring.
//!
//! Industry configurations are compiled once at construction. Distillation
//! itself never fails: with the feature flag off or no usable industry the
//! content passes through untouched and the skip reason is recorded.

use std::collections::HashMap;
use std::sync::Arc;

use distillery_core::{IndustryRegistry, ScoringRule};
use serde::Serialize;

use crate::detect::{DetectedSignal, SignalDetector};
use crate::error::DistillError;
use crate::fluff::FluffFilter;
use crate::scoring::lead_score;
use crate::selection::SignalSelector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    FeatureDisabled,
    NoIndustry,
    UnknownIndustry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "reason", rename_all = "snake_case")]
pub enum DistillMode {
    Full,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distillation {
    pub signals: Vec<DetectedSignal>,
    pub lead_score: i32,
    /// Content after fluff removal (the input itself when skipped).
    pub cleaned_content: String,
    pub fluff_bytes_removed: usize,
    pub mode: DistillMode,
}

impl Distillation {
    fn skipped(content: &str, reason: SkipReason) -> Self {
        Self {
            signals: Vec::new(),
            lead_score: 0,
            cleaned_content: content.to_string(),
            fluff_bytes_removed: 0,
            mode: DistillMode::Skipped(reason),
        }
    }

    #[must_use]
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self.mode {
            DistillMode::Full => None,
            DistillMode::Skipped(reason) => Some(reason),
        }
    }
}

#[derive(Debug)]
struct CompiledIndustry {
    fluff: FluffFilter,
    detector: SignalDetector,
    scoring_rules: Vec<ScoringRule>,
    max_lead_score: i32,
}

#[derive(Debug, Clone)]
pub struct DistillationEngine {
    industries: Arc<HashMap<String, CompiledIndustry>>,
    enabled: bool,
}

impl DistillationEngine {
    /// Compile every industry in `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`DistillError::Pattern`] if any fluff or signal pattern fails to compile.
    pub fn new(registry: &IndustryRegistry, enabled: bool) -> Result<Self, DistillError> {
        let mut industries = HashMap::with_capacity(registry.len());
        for key in registry.keys() {
            let Some(config) = registry.get(key) else {
                continue;
            };
            let compiled = CompiledIndustry {
                fluff: FluffFilter::compile(&config.fluff_patterns)?,
                detector: SignalDetector::compile(&config.signal_definitions)?,
                scoring_rules: config.scoring_rules.clone(),
                max_lead_score: config.max_lead_score,
            };
            industries.insert(key.to_string(), compiled);
        }
        tracing::info!(industries = industries.len(), enabled, "distillation engine ready");
        Ok(Self {
            industries: Arc::new(industries),
            enabled,
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn resolve(&self, industry: Option<&str>) -> Result<&CompiledIndustry, SkipReason> {
        if !self.enabled {
            return Err(SkipReason::FeatureDisabled);
        }
        let key = industry
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .ok_or(SkipReason::NoIndustry)?;
        self.industries.get(&key).ok_or_else(|| {
            tracing::warn!(industry = %key, "no configuration for industry; skipping distillation");
            SkipReason::UnknownIndustry
        })
    }

    /// Distill one piece of content for `industry`.
    #[must_use]
    pub fn distill(
        &self,
        content: &str,
        industry: Option<&str>,
        source_type: Option<&str>,
    ) -> Distillation {
        let compiled = match self.resolve(industry) {
            Ok(compiled) => compiled,
            Err(reason) => return Distillation::skipped(content, reason),
        };

        let filtered = compiled.fluff.filter(content);
        let signals = compiled.detector.detect(&filtered.text, source_type);
        let lead_score = lead_score(
            signals.iter().map(|s| s.signal_id.as_str()),
            &compiled.scoring_rules,
            compiled.max_lead_score,
        );
        tracing::debug!(
            signals = signals.len(),
            lead_score,
            fluff_bytes_removed = filtered.bytes_removed,
            "distilled content"
        );

        Distillation {
            signals,
            lead_score,
            cleaned_content: filtered.text,
            fluff_bytes_removed: filtered.bytes_removed,
            mode: DistillMode::Full,
        }
    }

    /// Distill several extractions of the same page and merge their signals
    /// with `selector`. Cleaned contents are concatenated.
    #[must_use]
    pub fn distill_sources(
        &self,
        sources: &[&str],
        industry: Option<&str>,
        source_type: Option<&str>,
        selector: &dyn SignalSelector,
    ) -> Distillation {
        let compiled = match self.resolve(industry) {
            Ok(compiled) => compiled,
            Err(reason) => return Distillation::skipped(&sources.join("\n\n"), reason),
        };

        let mut per_source = Vec::with_capacity(sources.len());
        let mut cleaned = Vec::with_capacity(sources.len());
        let mut fluff_bytes_removed = 0;
        for content in sources {
            let filtered = compiled.fluff.filter(content);
            per_source.push(compiled.detector.detect(&filtered.text, source_type));
            fluff_bytes_removed += filtered.bytes_removed;
            cleaned.push(filtered.text);
        }

        let signals = selector.select(&per_source);
        let lead_score = lead_score(
            signals.iter().map(|s| s.signal_id.as_str()),
            &compiled.scoring_rules,
            compiled.max_lead_score,
        );
        Distillation {
            signals,
            lead_score,
            cleaned_content: cleaned.join("\n\n"),
            fluff_bytes_removed,
            mode: DistillMode::Full,
        }
    }

    /// Lead score for an already-known set of signal ids; 0 when the industry
    /// is unknown or distillation is disabled.
    #[must_use]
    pub fn score<'a, I>(&self, industry: Option<&str>, signal_ids: I) -> i32
    where
        I: IntoIterator<Item = &'a str>,
    {
        match self.resolve(industry) {
            Ok(compiled) => lead_score(
                signal_ids,
                &compiled.scoring_rules,
                compiled.max_lead_score,
            ),
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
