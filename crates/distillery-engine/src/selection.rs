//! Combining signals detected in several extraction sources.
//!
//! [`BestOf`] keeps the strongest instance of each signal. [`Consensus`] keeps
//! only signals corroborated by enough sources. Other strategies (e.g. a
//! model-driven synthesis) plug in through [`SignalSelector`].

use std::collections::BTreeMap;

use crate::detect::DetectedSignal;

pub trait SignalSelector: Send + Sync {
    /// Merge per-source detections into one signal list, highest confidence first.
    fn select(&self, sources: &[Vec<DetectedSignal>]) -> Vec<DetectedSignal>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BestOf;

impl SignalSelector for BestOf {
    fn select(&self, sources: &[Vec<DetectedSignal>]) -> Vec<DetectedSignal> {
        let mut best: BTreeMap<&str, &DetectedSignal> = BTreeMap::new();
        for signal in sources.iter().flatten() {
            best.entry(signal.signal_id.as_str())
                .and_modify(|current| {
                    if signal.confidence > current.confidence {
                        *current = signal;
                    }
                })
                .or_insert(signal);
        }
        sorted(best.into_values().cloned().collect())
    }
}

/// Keep signals present in at least `min_sources` sources (default: a strict
/// majority). Confidence is the rounded mean across the sources that found
/// it; occurrences are summed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Consensus {
    pub min_sources: Option<usize>,
}

impl Consensus {
    fn threshold(&self, source_count: usize) -> usize {
        self.min_sources
            .unwrap_or(source_count / 2 + 1)
            .clamp(1, source_count.max(1))
    }
}

impl SignalSelector for Consensus {
    fn select(&self, sources: &[Vec<DetectedSignal>]) -> Vec<DetectedSignal> {
        let threshold = self.threshold(sources.len());
        let mut grouped: BTreeMap<&str, Vec<&DetectedSignal>> = BTreeMap::new();
        for source in sources {
            // A source votes at most once per signal id.
            let mut voted = std::collections::HashSet::new();
            for signal in source {
                if voted.insert(signal.signal_id.as_str()) {
                    grouped.entry(signal.signal_id.as_str()).or_default().push(signal);
                }
            }
        }

        let merged = grouped
            .into_values()
            .filter(|instances| instances.len() >= threshold)
            .filter_map(|instances| {
                let strongest = *instances.iter().max_by_key(|s| s.confidence)?;
                let total: u32 = instances.iter().map(|s| u32::from(s.confidence)).sum();
                let votes = u32::try_from(instances.len()).ok()?;
                let mean = (total + votes / 2) / votes;
                Some(DetectedSignal {
                    signal_id: strongest.signal_id.clone(),
                    priority: strongest.priority,
                    occurrence_count: instances
                        .iter()
                        .map(|s| s.occurrence_count)
                        .fold(0u32, u32::saturating_add),
                    confidence: u8::try_from(mean).unwrap_or(100).min(100),
                    matched_text: strongest.matched_text.clone(),
                })
            })
            .collect();
        sorted(merged)
    }
}

fn sorted(mut signals: Vec<DetectedSignal>) -> Vec<DetectedSignal> {
    signals.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| a.signal_id.cmp(&b.signal_id))
    });
    signals
}

#[cfg(test)]
mod tests {
    use distillery_core::SignalPriority;

    use super::*;

    fn signal(id: &str, confidence: u8, occurrences: u32) -> DetectedSignal {
        DetectedSignal {
            signal_id: id.to_string(),
            priority: SignalPriority::High,
            occurrence_count: occurrences,
            confidence,
            matched_text: format!("{id} @ {confidence}"),
        }
    }

    #[test]
    fn best_of_keeps_highest_confidence_instance() {
        let sources = vec![
            vec![signal("hiring", 75, 1), signal("funding", 90, 1)],
            vec![signal("hiring", 85, 4)],
        ];
        let merged = BestOf.select(&sources);
        assert_eq!(merged.len(), 2);
        let hiring = merged.iter().find(|s| s.signal_id == "hiring").unwrap();
        assert_eq!(hiring.confidence, 85);
        assert_eq!(hiring.occurrence_count, 4);
        assert_eq!(merged[0].signal_id, "funding");
    }

    #[test]
    fn consensus_requires_majority_by_default() {
        let sources = vec![
            vec![signal("hiring", 75, 1), signal("funding", 90, 1)],
            vec![signal("hiring", 85, 4)],
            vec![signal("tech", 45, 1)],
        ];
        let merged = Consensus::default().select(&sources);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].signal_id, "hiring");
        assert_eq!(merged[0].confidence, 80);
        assert_eq!(merged[0].occurrence_count, 5);
        assert_eq!(merged[0].matched_text, "hiring @ 85");
    }

    #[test]
    fn consensus_threshold_is_configurable() {
        let sources = vec![vec![signal("tech", 45, 1)], vec![], vec![]];
        let merged = Consensus {
            min_sources: Some(1),
        }
        .select(&sources);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn duplicate_ids_within_one_source_vote_once() {
        let sources = vec![
            vec![signal("hiring", 75, 1), signal("hiring", 75, 1)],
            vec![],
            vec![],
        ];
        assert!(Consensus::default().select(&sources).is_empty());
    }
}
