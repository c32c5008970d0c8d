//! Signal confidence and lead scoring.

use std::collections::HashSet;

use distillery_core::{ScoringRule, SignalPriority};

/// Extra confidence for repeated evidence: +10 at four or more occurrences,
/// +5 at two or three.
#[must_use]
pub fn occurrence_boost(occurrences: u32) -> u8 {
    match occurrences {
        n if n >= 4 => 10,
        n if n >= 2 => 5,
        _ => 0,
    }
}

/// Confidence (0-100) of a detected signal.
#[must_use]
pub fn signal_confidence(priority: SignalPriority, occurrences: u32) -> u8 {
    priority
        .base_confidence()
        .saturating_add(occurrence_boost(occurrences))
        .min(100)
}

/// Sum the points of every rule whose signals are all present, clamped to
/// `[0, max_score]`.
#[must_use]
pub fn lead_score<'a, I>(present: I, rules: &[ScoringRule], max_score: i32) -> i32
where
    I: IntoIterator<Item = &'a str>,
{
    let present: HashSet<&str> = present.into_iter().collect();
    let raw: i64 = rules
        .iter()
        .filter(|rule| rule.signals.iter().all(|s| present.contains(s.as_str())))
        .map(|rule| i64::from(rule.points))
        .sum();
    let clamped = raw.clamp(0, i64::from(max_score.max(0)));
    i32::try_from(clamped).unwrap_or(max_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(signals: &[&str], points: i32) -> ScoringRule {
        ScoringRule {
            name: None,
            signals: signals.iter().map(ToString::to_string).collect(),
            points,
        }
    }

    #[test]
    fn high_priority_with_four_occurrences_scores_85() {
        assert_eq!(signal_confidence(SignalPriority::High, 4), 85);
    }

    #[test]
    fn boosts_follow_occurrence_thresholds() {
        assert_eq!(signal_confidence(SignalPriority::Low, 1), 45);
        assert_eq!(signal_confidence(SignalPriority::Low, 2), 50);
        assert_eq!(signal_confidence(SignalPriority::Medium, 3), 65);
        assert_eq!(signal_confidence(SignalPriority::Medium, 9), 70);
    }

    #[test]
    fn confidence_caps_at_100() {
        assert_eq!(signal_confidence(SignalPriority::Critical, 4), 100);
        assert_eq!(signal_confidence(SignalPriority::Critical, 1000), 100);
    }

    #[test]
    fn rules_require_every_signal() {
        let rules = vec![rule(&["hiring", "funding"], 40), rule(&["funding"], 30)];
        assert_eq!(lead_score(["funding"], &rules, 150), 30);
        assert_eq!(lead_score(["funding", "hiring"], &rules, 150), 70);
        assert_eq!(lead_score(["hiring"], &rules, 150), 0);
    }

    #[test]
    fn lead_score_is_clamped() {
        let rules = vec![rule(&["a"], 100), rule(&["b"], 100)];
        assert_eq!(lead_score(["a", "b"], &rules, 150), 150);

        let negative = vec![rule(&["a"], -20)];
        assert_eq!(lead_score(["a"], &negative, 150), 0);
    }
}
