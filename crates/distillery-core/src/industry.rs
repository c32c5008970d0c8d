//! Industry-specific distillation configuration.
//!
//! Signal definitions, fluff patterns and scoring rules are supplied as static
//! YAML and resolved by industry key at call time through [`IndustryRegistry`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::SignalPriority;
use crate::ConfigError;

const DEFAULT_MAX_LEAD_SCORE: i32 = 150;

/// Document region a fluff pattern applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Header,
    Footer,
    Sidebar,
    Body,
    #[default]
    All,
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Region::Header => write!(f, "header"),
            Region::Footer => write!(f, "footer"),
            Region::Sidebar => write!(f, "sidebar"),
            Region::Body => write!(f, "body"),
            Region::All => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluffPattern {
    pub pattern: String,
    #[serde(default)]
    pub region: Region,
    /// Treat `pattern` as a regular expression instead of a plain substring.
    #[serde(default)]
    pub regex: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub priority: SignalPriority,
    /// Case-insensitive substrings.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Regular expressions, compiled case-insensitively.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// When non-empty, the signal is only detected on these content-source
    /// types (e.g. `careers`, `homepage`).
    #[serde(default)]
    pub source_types: Vec<String>,
}

/// Awards `points` when every listed signal is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRule {
    #[serde(default)]
    pub name: Option<String>,
    pub signals: Vec<String>,
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryConfig {
    #[serde(default)]
    pub signal_definitions: Vec<SignalDefinition>,
    #[serde(default)]
    pub fluff_patterns: Vec<FluffPattern>,
    #[serde(default)]
    pub scoring_rules: Vec<ScoringRule>,
    #[serde(default = "default_max_lead_score")]
    pub max_lead_score: i32,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, serde_json::Value>,
}

fn default_max_lead_score() -> i32 {
    DEFAULT_MAX_LEAD_SCORE
}

#[derive(Debug, Deserialize)]
pub struct IndustriesFile {
    pub industries: HashMap<String, IndustryConfig>,
}

/// Lookup table of validated industry configurations.
#[derive(Debug, Clone, Default)]
pub struct IndustryRegistry {
    industries: HashMap<String, Arc<IndustryConfig>>,
}

impl IndustryRegistry {
    /// Build a registry from an already-validated file.
    #[must_use]
    pub fn new(file: IndustriesFile) -> Self {
        let industries = file
            .industries
            .into_iter()
            .map(|(key, cfg)| (normalize_key(&key), Arc::new(cfg)))
            .collect();
        Self { industries }
    }

    /// A registry with no industries; every lookup misses.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register or replace a single industry.
    pub fn insert(&mut self, key: &str, config: IndustryConfig) {
        self.industries
            .insert(normalize_key(key), Arc::new(config));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<IndustryConfig>> {
        self.industries.get(&normalize_key(key)).cloned()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.industries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.industries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.industries.is_empty()
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Load and validate the industries configuration from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_industries(path: &Path) -> Result<IndustryRegistry, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IndustriesFileIo {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_industries(&content)
}

/// Parse and validate industries YAML held in memory.
///
/// # Errors
///
/// Returns `ConfigError` if the YAML is malformed or fails validation.
pub fn parse_industries(content: &str) -> Result<IndustryRegistry, ConfigError> {
    let file: IndustriesFile = serde_yaml::from_str(content)?;
    validate_industries(&file)?;
    Ok(IndustryRegistry::new(file))
}

fn validate_industries(file: &IndustriesFile) -> Result<(), ConfigError> {
    let mut seen_keys = HashSet::new();
    for (key, cfg) in &file.industries {
        if key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "industry key must be non-empty".to_string(),
            ));
        }
        if !seen_keys.insert(normalize_key(key)) {
            return Err(ConfigError::Validation(format!(
                "duplicate industry key (case-insensitive): '{key}'"
            )));
        }
        validate_industry(key, cfg)?;
    }
    Ok(())
}

fn validate_industry(key: &str, cfg: &IndustryConfig) -> Result<(), ConfigError> {
    if cfg.max_lead_score <= 0 {
        return Err(ConfigError::Validation(format!(
            "industry '{key}': max_lead_score must be positive, got {}",
            cfg.max_lead_score
        )));
    }

    let mut signal_ids = HashSet::new();
    for def in &cfg.signal_definitions {
        if def.id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "industry '{key}': signal id must be non-empty"
            )));
        }
        if !signal_ids.insert(def.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "industry '{key}': duplicate signal id '{}'",
                def.id
            )));
        }
        if def.keywords.iter().all(|k| k.trim().is_empty()) && def.patterns.is_empty() {
            return Err(ConfigError::Validation(format!(
                "industry '{key}': signal '{}' needs at least one keyword or pattern",
                def.id
            )));
        }
        for pattern in &def.patterns {
            check_regex(key, pattern)?;
        }
    }

    for fluff in &cfg.fluff_patterns {
        if fluff.pattern.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "industry '{key}': fluff pattern must be non-empty"
            )));
        }
        if fluff.regex {
            check_regex(key, &fluff.pattern)?;
        }
    }

    for rule in &cfg.scoring_rules {
        if rule.signals.is_empty() {
            return Err(ConfigError::Validation(format!(
                "industry '{key}': scoring rule must reference at least one signal"
            )));
        }
        if let Some(unknown) = rule
            .signals
            .iter()
            .find(|s| !signal_ids.contains(s.as_str()))
        {
            return Err(ConfigError::Validation(format!(
                "industry '{key}': scoring rule references unknown signal '{unknown}'"
            )));
        }
    }

    Ok(())
}

fn check_regex(key: &str, pattern: &str) -> Result<(), ConfigError> {
    Regex::new(pattern).map(|_| ()).map_err(|e| {
        ConfigError::Validation(format!(
            "industry '{key}': invalid regex '{pattern}': {e}"
        ))
    })
}

#[cfg(test)]
#[path = "industry_test.rs"]
mod tests;
