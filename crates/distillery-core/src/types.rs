//! Domain records shared by the storage, distillation and learning crates.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Returned when a stored string does not name a known enum variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Temporary scrapes
// ---------------------------------------------------------------------------

/// Raw scrape content cached for a bounded time ("ore" tier).
///
/// At most one live record exists per `(tenant_id, content_hash)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporaryScrape {
    pub id: Uuid,
    pub tenant_id: String,
    pub url: String,
    /// Lowercase hex SHA-256 of `raw_content`.
    pub content_hash: String,
    pub raw_content: String,
    pub cleaned_content: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// Set when the training manager verified the scrape and asked for early deletion.
    pub verified_at: Option<DateTime<Utc>>,
}

impl TemporaryScrape {
    /// A record is expired once `now` reaches `expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ---------------------------------------------------------------------------
// Extracted signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPriority {
    Critical,
    High,
    Medium,
    Low,
}

string_enum!(SignalPriority, "signal priority", {
    Critical => "critical",
    High => "high",
    Medium => "medium",
    Low => "low",
});

impl SignalPriority {
    /// Base confidence (0-100) before occurrence boosts.
    #[must_use]
    pub fn base_confidence(self) -> u8 {
        match self {
            SignalPriority::Critical => 90,
            SignalPriority::High => 75,
            SignalPriority::Medium => 60,
            SignalPriority::Low => 45,
        }
    }
}

/// A business signal distilled from one scrape. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSignal {
    pub id: Uuid,
    pub tenant_id: String,
    pub signal_id: String,
    pub source_scrape_id: Uuid,
    /// Short excerpt around the first match.
    pub matched_text: String,
    pub priority: SignalPriority,
    pub occurrence_count: u32,
    /// Raw signal confidence in `0..=100`.
    pub confidence: u8,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Correct,
    Incorrect,
    Missing,
    FalsePositive,
    LowConfidence,
}

string_enum!(FeedbackType, "feedback type", {
    Correct => "correct",
    Incorrect => "incorrect",
    Missing => "missing",
    FalsePositive => "false_positive",
    LowConfidence => "low_confidence",
});

impl FeedbackType {
    /// Whether the feedback counts as evidence *for* the pattern.
    ///
    /// `missing` means the pattern should have fired and `low_confidence`
    /// means it fired correctly but was under-scored; both confirm it.
    #[must_use]
    pub fn is_positive(self) -> bool {
        matches!(
            self,
            FeedbackType::Correct | FeedbackType::Missing | FeedbackType::LowConfidence
        )
    }

    /// Reinforcement reward in `{0, 1}`.
    #[must_use]
    pub fn reward(self) -> f64 {
        if self.is_positive() {
            1.0
        } else {
            0.0
        }
    }

    pub const ALL: [FeedbackType; 5] = [
        FeedbackType::Correct,
        FeedbackType::Incorrect,
        FeedbackType::Missing,
        FeedbackType::FalsePositive,
        FeedbackType::LowConfidence,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackOutcomeKind {
    Applied,
    DiscardedOutlier,
    Duplicate,
}

string_enum!(FeedbackOutcomeKind, "feedback outcome", {
    Applied => "applied",
    DiscardedOutlier => "discarded_outlier",
    Duplicate => "duplicate",
});

/// Feedback payload as submitted by a client, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFeedback {
    pub tenant_id: String,
    pub user_id: String,
    pub feedback_type: FeedbackType,
    pub signal_id: String,
    pub source_scrape_id: Uuid,
    pub source_text: String,
    #[serde(default)]
    pub corrected_value: Option<String>,
    /// The user's own confidence in the correction, in `[0, 1]`.
    #[serde(default)]
    pub user_confidence: Option<f64>,
    /// Defaults to the time of receipt.
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Stored feedback. Only `processed`, `training_data_id` and `outcome` change
/// after insertion; rows are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFeedback {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub feedback_type: FeedbackType,
    pub signal_id: String,
    pub source_scrape_id: Uuid,
    pub source_text: String,
    pub corrected_value: Option<String>,
    pub user_confidence: Option<f64>,
    pub submitted_at: DateTime<Utc>,
    pub processed: bool,
    pub training_data_id: Option<Uuid>,
    pub outcome: Option<FeedbackOutcomeKind>,
}

impl ClientFeedback {
    /// Build the stored form of a payload.
    #[must_use]
    pub fn from_new(new: NewFeedback, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            user_id: new.user_id,
            feedback_type: new.feedback_type,
            signal_id: new.signal_id,
            source_scrape_id: new.source_scrape_id,
            source_text: new.source_text,
            corrected_value: new.corrected_value,
            user_confidence: new.user_confidence,
            submitted_at: new.submitted_at.unwrap_or(now),
            processed: false,
            training_data_id: None,
            outcome: None,
        }
    }

    /// The text a pattern is learned from: the correction when given,
    /// otherwise the source text.
    #[must_use]
    pub fn pattern_text(&self) -> &str {
        self.corrected_value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(&self.source_text)
    }
}

// ---------------------------------------------------------------------------
// Training data and history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Keyword,
    Regex,
    Embedding,
}

string_enum!(PatternType, "pattern type", {
    Keyword => "keyword",
    Regex => "regex",
    Embedding => "embedding",
});

/// The learned, versioned belief about one extraction pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingData {
    pub id: Uuid,
    pub tenant_id: String,
    pub signal_id: String,
    pub pattern: String,
    pub pattern_type: PatternType,
    pub embedding: Option<Vec<f32>>,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub positive_count: i64,
    pub negative_count: i64,
    pub seen_count: i64,
    /// Strictly increases with every persisted mutation.
    pub version: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
    Activated,
    Deactivated,
}

string_enum!(ChangeType, "change type", {
    Created => "created",
    Updated => "updated",
    Deleted => "deleted",
    Activated => "activated",
    Deactivated => "deactivated",
});

/// One append-only entry in a pattern's version log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub id: Uuid,
    pub training_data_id: Uuid,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub change_type: ChangeType,
    /// Full JSON snapshot of the record before the change.
    pub previous_value: Option<serde_json::Value>,
    /// Full JSON snapshot of the record after the change.
    pub new_value: Option<serde_json::Value>,
    pub version: i64,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// An isolated copy of a training record for trial changes before merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: Uuid,
    pub training_data_id: Uuid,
    pub tenant_id: String,
    /// Main-line version the branch was cut from.
    pub base_version: i64,
    pub snapshot: TrainingData,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_type_round_trips_through_str() {
        for ft in FeedbackType::ALL {
            assert_eq!(ft.as_str().parse::<FeedbackType>().unwrap(), ft);
        }
    }

    #[test]
    fn unknown_feedback_type_is_rejected() {
        let err = "meh".parse::<FeedbackType>().unwrap_err();
        assert_eq!(err.kind, "feedback type");
        assert_eq!(err.value, "meh");
    }

    #[test]
    fn feedback_rewards_follow_polarity() {
        assert!((FeedbackType::Correct.reward() - 1.0).abs() < f64::EPSILON);
        assert!(FeedbackType::Incorrect.reward().abs() < f64::EPSILON);
        assert!(FeedbackType::FalsePositive.reward().abs() < f64::EPSILON);
        assert!(FeedbackType::Missing.is_positive());
        assert!(FeedbackType::LowConfidence.is_positive());
    }

    #[test]
    fn feedback_type_serializes_snake_case() {
        let json = serde_json::to_string(&FeedbackType::FalsePositive).unwrap();
        assert_eq!(json, "\"false_positive\"");
    }

    #[test]
    fn priority_base_confidence_table() {
        assert_eq!(SignalPriority::Critical.base_confidence(), 90);
        assert_eq!(SignalPriority::High.base_confidence(), 75);
        assert_eq!(SignalPriority::Medium.base_confidence(), 60);
        assert_eq!(SignalPriority::Low.base_confidence(), 45);
    }

    #[test]
    fn pattern_text_prefers_non_blank_correction() {
        let now = Utc::now();
        let mut fb = ClientFeedback::from_new(
            NewFeedback {
                tenant_id: "t1".to_string(),
                user_id: "u1".to_string(),
                feedback_type: FeedbackType::Missing,
                signal_id: "hiring".to_string(),
                source_scrape_id: Uuid::new_v4(),
                source_text: "Join our growing team".to_string(),
                corrected_value: Some("  ".to_string()),
                user_confidence: None,
                submitted_at: None,
            },
            now,
        );
        assert_eq!(fb.pattern_text(), "Join our growing team");
        assert_eq!(fb.submitted_at, now);

        fb.corrected_value = Some("now hiring engineers".to_string());
        assert_eq!(fb.pattern_text(), "now hiring engineers");
    }

    #[test]
    fn scrape_expiry_is_inclusive_of_deadline() {
        let now = Utc::now();
        let scrape = TemporaryScrape {
            id: Uuid::new_v4(),
            tenant_id: "t".to_string(),
            url: "https://example.com".to_string(),
            content_hash: "abc".to_string(),
            raw_content: String::new(),
            cleaned_content: String::new(),
            created_at: now,
            expires_at: now,
            last_seen_at: now,
            verified_at: None,
        };
        assert!(scrape.is_expired(now));
        assert!(!scrape.is_expired(now - chrono::Duration::seconds(1)));
    }
}
