//! Semantic pattern matching over embeddings, with a keyword fallback.
//!
//! Embeddings are cached in-process under the normalized text (trimmed,
//! lowercased, whitespace collapsed). Expired entries are dropped when read.
//! When the provider is missing or keeps failing, matching falls back to
//! keyword containment and regex patterns.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::{Duration, Instant};

use distillery_core::{AppConfig, PatternType, TrainingData};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use uuid::Uuid;

use crate::embeddings::EmbeddingProvider;
use crate::error::EmbeddingError;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.75;
const DEFAULT_CACHE_TTL_SECS: u64 = 3_600;
const DEFAULT_COST_PER_1K_TOKENS: f64 = 0.0001;
const CHARS_PER_TOKEN: usize = 4;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    pub similarity_threshold: f64,
    pub cache_ttl: Duration,
    pub cost_per_1k_tokens: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cost_per_1k_tokens: DEFAULT_COST_PER_1K_TOKENS,
        }
    }
}

impl MatcherConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            cache_ttl: Duration::from_secs(config.embedding_cache_ttl_secs),
            cost_per_1k_tokens: config.embedding_cost_per_1k_tokens,
        }
    }
}

/// Running totals of provider traffic since the matcher was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EmbeddingUsage {
    pub provider_calls: u64,
    pub texts_embedded: u64,
    pub estimated_tokens: u64,
    pub estimated_cost: f64,
    pub cache_hits: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Semantic,
    Keyword,
    /// The provider failed after retries; keyword matching was used instead.
    KeywordFallback,
}

#[derive(Debug, Clone, Copy)]
pub struct PatternMatch<'a> {
    pub pattern: &'a TrainingData,
    pub similarity: f64,
}

/// Result of matching one feedback text against a set of candidate patterns.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub training_data_id: Option<Uuid>,
    pub similarity: Option<f64>,
    pub method: MatchMethod,
    /// Embedding of the query text, when the provider answered.
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledPair {
    pub similarity: f64,
    pub is_match: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdSuggestion {
    pub threshold: f64,
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
}

struct CacheEntry {
    vector: Vec<f32>,
    stored_at: Instant,
}

pub struct PatternMatcher {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    config: MatcherConfig,
    cache: Mutex<HashMap<String, CacheEntry>>,
    usage: Mutex<EmbeddingUsage>,
}

impl PatternMatcher {
    #[must_use]
    pub fn new(provider: Option<Arc<dyn EmbeddingProvider>>, config: MatcherConfig) -> Self {
        Self {
            provider,
            config,
            cache: Mutex::new(HashMap::new()),
            usage: Mutex::new(EmbeddingUsage::default()),
        }
    }

    /// A matcher with no provider; every match is keyword-based.
    #[must_use]
    pub fn keyword_only(config: MatcherConfig) -> Self {
        Self::new(None, config)
    }

    #[must_use]
    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    #[must_use]
    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    #[must_use]
    pub fn usage(&self) -> EmbeddingUsage {
        *self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// # Errors
    ///
    /// See [`embed_many`](Self::embed_many).
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_many(&[text]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            got: 0,
        })
    }

    /// Embed several texts, answering from the cache where possible and
    /// sending the distinct misses to the provider in one call.
    ///
    /// # Errors
    ///
    /// [`EmbeddingError::NotConfigured`] without a provider, otherwise
    /// whatever the provider returned after its retries.
    pub async fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let provider = self.provider.as_ref().ok_or(EmbeddingError::NotConfigured)?;
        let keys: Vec<String> = texts.iter().map(|t| normalize_text(t)).collect();

        let mut found: Vec<Option<Vec<f32>>> = Vec::with_capacity(keys.len());
        let mut misses: Vec<String> = Vec::new();
        {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            let mut hits = 0u64;
            for key in &keys {
                let fresh = match cache.get(key) {
                    Some(entry) if entry.stored_at.elapsed() < self.config.cache_ttl => {
                        Some(entry.vector.clone())
                    }
                    Some(_) => {
                        cache.remove(key);
                        None
                    }
                    None => None,
                };
                if fresh.is_some() {
                    hits += 1;
                } else if !misses.contains(key) {
                    misses.push(key.clone());
                }
                found.push(fresh);
            }
            self.usage
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .cache_hits += hits;
        }

        if !misses.is_empty() {
            let vectors = match provider.embed(&misses).await {
                Ok(vectors) => vectors,
                Err(err) => {
                    self.usage
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .failures += 1;
                    return Err(err);
                }
            };
            if vectors.len() != misses.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: misses.len(),
                    got: vectors.len(),
                });
            }
            self.record_usage(&misses);

            let fetched: HashMap<&str, &Vec<f32>> =
                misses.iter().map(String::as_str).zip(vectors.iter()).collect();
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            let ttl = self.config.cache_ttl;
            cache.retain(|_, entry| entry.stored_at.elapsed() < ttl);
            for (key, vector) in &fetched {
                cache.insert(
                    (*key).to_string(),
                    CacheEntry {
                        vector: (*vector).clone(),
                        stored_at: Instant::now(),
                    },
                );
            }
            for (slot, key) in found.iter_mut().zip(&keys) {
                if slot.is_none() {
                    *slot = fetched.get(key.as_str()).map(|v| (*v).clone());
                }
            }
        }

        found
            .into_iter()
            .map(|v| v.ok_or(EmbeddingError::CountMismatch {
                expected: keys.len(),
                got: 0,
            }))
            .collect()
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_usage(&self, texts: &[String]) {
        let tokens: u64 = texts
            .iter()
            .map(|t| estimate_tokens(t))
            .fold(0u64, u64::saturating_add);
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        usage.provider_calls += 1;
        usage.texts_embedded += texts.len() as u64;
        usage.estimated_tokens = usage.estimated_tokens.saturating_add(tokens);
        usage.estimated_cost += tokens as f64 / 1_000.0 * self.config.cost_per_1k_tokens;
    }

    /// Candidates with an embedding whose similarity to `query` is at least
    /// `threshold` (the configured one when `None`), most similar first.
    #[must_use]
    pub fn find_similar_patterns<'a>(
        &self,
        query: &[f32],
        candidates: &'a [TrainingData],
        threshold: Option<f64>,
    ) -> Vec<PatternMatch<'a>> {
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);
        let mut matches: Vec<PatternMatch<'a>> = candidates
            .iter()
            .filter_map(|pattern| {
                let embedding = pattern.embedding.as_deref()?;
                let similarity = cosine_similarity(query, embedding);
                (similarity >= threshold).then_some(PatternMatch {
                    pattern,
                    similarity,
                })
            })
            .collect();
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches
    }

    #[must_use]
    pub fn find_best_match<'a>(
        &self,
        query: &[f32],
        candidates: &'a [TrainingData],
        threshold: Option<f64>,
    ) -> Option<PatternMatch<'a>> {
        self.find_similar_patterns(query, candidates, threshold)
            .into_iter()
            .next()
    }

    /// Match `text` against `candidates`: semantically when the provider is
    /// available, then by keyword.
    pub async fn match_text(&self, text: &str, candidates: &[TrainingData]) -> MatchOutcome {
        let mut method = MatchMethod::Keyword;
        let mut embedding = None;

        if self.provider.is_some() {
            match self.embed(text).await {
                Ok(vector) => {
                    if let Some(best) = self.find_best_match(&vector, candidates, None) {
                        return MatchOutcome {
                            training_data_id: Some(best.pattern.id),
                            similarity: Some(best.similarity),
                            method: MatchMethod::Semantic,
                            embedding: Some(vector),
                        };
                    }
                    embedding = Some(vector);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "embedding unavailable, falling back to keyword matching");
                    method = MatchMethod::KeywordFallback;
                }
            }
        }

        let matched = keyword_match(text, candidates);
        MatchOutcome {
            training_data_id: matched.map(|p| p.id),
            similarity: matched.map(|_| 1.0),
            method,
            embedding,
        }
    }
}

/// Trim, lowercase and collapse internal whitespace.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    WHITESPACE
        .replace_all(text.trim(), " ")
        .to_lowercase()
}

#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count();
    u64::try_from(chars.div_ceil(CHARS_PER_TOKEN)).unwrap_or(u64::MAX)
}

/// Cosine similarity rescaled from `[-1, 1]` to `[0, 1]`.
///
/// Vectors of different length, empty vectors and zero vectors score 0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    let raw = (dot / denom).clamp(-1.0, 1.0);
    (raw + 1.0) / 2.0
}

/// The most specific candidate matching `text` literally: regex patterns by
/// case-insensitive search, everything else by normalized containment.
#[must_use]
pub fn keyword_match<'a>(text: &str, candidates: &'a [TrainingData]) -> Option<&'a TrainingData> {
    let normalized = normalize_text(text);
    candidates
        .iter()
        .filter(|candidate| match candidate.pattern_type {
            PatternType::Regex => RegexBuilder::new(&candidate.pattern)
                .case_insensitive(true)
                .build()
                .is_ok_and(|re| re.is_match(text)),
            PatternType::Keyword | PatternType::Embedding => {
                let pattern = normalize_text(&candidate.pattern);
                !pattern.is_empty() && normalized.contains(&pattern)
            }
        })
        .max_by_key(|candidate| candidate.pattern.len())
}

/// Similarity threshold with the best F1 over labeled pairs, where a pair is
/// predicted to match when its similarity reaches the threshold. Ties go to
/// the higher threshold. `None` without any positive example.
#[must_use]
pub fn suggest_threshold(pairs: &[LabeledPair]) -> Option<ThresholdSuggestion> {
    if !pairs.iter().any(|p| p.is_match) {
        return None;
    }
    let mut thresholds: Vec<f64> = pairs
        .iter()
        .map(|p| p.similarity)
        .filter(|s| s.is_finite())
        .collect();
    thresholds.sort_by(f64::total_cmp);
    thresholds.dedup();

    let mut best: Option<ThresholdSuggestion> = None;
    for threshold in thresholds {
        let (mut tp, mut fp, mut fn_) = (0u32, 0u32, 0u32);
        for pair in pairs {
            match (pair.similarity >= threshold, pair.is_match) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, true) => fn_ += 1,
                (false, false) => {}
            }
        }
        let (tp, fp, fn_) = (f64::from(tp), f64::from(fp), f64::from(fn_));
        let f1 = 2.0 * tp / (2.0 * tp + fp + fn_);
        let candidate = ThresholdSuggestion {
            threshold,
            f1,
            precision: if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 },
            recall: if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 },
        };
        // Thresholds ascend, so >= keeps the higher one on ties.
        if best.is_none_or(|b| candidate.f1 >= b.f1) {
            best = Some(candidate);
        }
    }
    best
}

#[cfg(test)]
#[path = "matcher_test.rs"]
mod tests;
