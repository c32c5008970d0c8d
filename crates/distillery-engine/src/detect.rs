//! Keyword and regex signal detection.

use std::sync::LazyLock;

use distillery_core::{SignalDefinition, SignalPriority};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::DistillError;
use crate::scoring::signal_confidence;

/// Upper bound on the stored excerpt, in characters.
pub const MATCHED_TEXT_MAX_CHARS: usize = 200;

/// Context kept on each side of the first match, in bytes.
const EXCERPT_CONTEXT_BYTES: usize = 80;

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// One signal found in one piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedSignal {
    pub signal_id: String,
    pub priority: SignalPriority,
    pub occurrence_count: u32,
    pub confidence: u8,
    pub matched_text: String,
}

#[derive(Debug, Clone)]
struct CompiledSignal {
    id: String,
    priority: SignalPriority,
    matchers: Vec<Regex>,
    source_types: Vec<String>,
}

impl CompiledSignal {
    /// Restricted signals only fire on their listed source types; an unknown
    /// source type is not restricted.
    fn applies_to(&self, source_type: Option<&str>) -> bool {
        match source_type {
            Some(st) if !self.source_types.is_empty() => {
                self.source_types.iter().any(|allowed| allowed.eq_ignore_ascii_case(st))
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignalDetector {
    signals: Vec<CompiledSignal>,
}

impl SignalDetector {
    /// Compile signal definitions. Keywords become escaped case-insensitive
    /// regexes so match offsets stay valid for any input.
    ///
    /// # Errors
    ///
    /// Returns [`DistillError::Pattern`] if a definition's regex does not compile.
    pub fn compile(definitions: &[SignalDefinition]) -> Result<Self, DistillError> {
        let mut signals = Vec::with_capacity(definitions.len());
        for def in definitions {
            let keyword_sources = def
                .keywords
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(regex::escape);
            let sources: Vec<String> = keyword_sources.chain(def.patterns.iter().cloned()).collect();

            let matchers = sources
                .iter()
                .map(|source| {
                    RegexBuilder::new(source)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| DistillError::Pattern {
                            context: format!("signal '{}'", def.id),
                            pattern: source.clone(),
                            source: e,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            signals.push(CompiledSignal {
                id: def.id.clone(),
                priority: def.priority,
                matchers,
                source_types: def.source_types.clone(),
            });
        }
        Ok(Self { signals })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Detect every configured signal in `text`, highest confidence first.
    #[must_use]
    pub fn detect(&self, text: &str, source_type: Option<&str>) -> Vec<DetectedSignal> {
        let mut found: Vec<DetectedSignal> = self
            .signals
            .iter()
            .filter(|signal| signal.applies_to(source_type))
            .filter_map(|signal| {
                let mut occurrences: u32 = 0;
                let mut first: Option<(usize, usize)> = None;
                for matcher in &signal.matchers {
                    for m in matcher.find_iter(text) {
                        occurrences = occurrences.saturating_add(1);
                        if first.is_none_or(|(start, _)| m.start() < start) {
                            first = Some((m.start(), m.end()));
                        }
                    }
                }
                let (start, end) = first?;
                Some(DetectedSignal {
                    signal_id: signal.id.clone(),
                    priority: signal.priority,
                    occurrence_count: occurrences,
                    confidence: signal_confidence(signal.priority, occurrences),
                    matched_text: excerpt(text, start, end),
                })
            })
            .collect();

        found.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then_with(|| a.signal_id.cmp(&b.signal_id))
        });
        found
    }
}

/// Whitespace-collapsed window around `text[start..end]`, at most
/// [`MATCHED_TEXT_MAX_CHARS`] characters.
#[must_use]
pub fn excerpt(text: &str, start: usize, end: usize) -> String {
    let mut from = start.saturating_sub(EXCERPT_CONTEXT_BYTES);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = end.saturating_add(EXCERPT_CONTEXT_BYTES).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }

    let collapsed = WHITESPACE_RE.replace_all(&text[from..to], " ");
    collapsed
        .trim()
        .chars()
        .take(MATCHED_TEXT_MAX_CHARS)
        .collect()
}
