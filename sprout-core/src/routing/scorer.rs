//! Scoring classifier: deterministic keyword scoring over the registry.
//!
//! ```text
//! score = matched_keywords × priority × (1 + mean_matched_keyword_chars × k)
//! ```
//!
//! No randomness and no external calls: the same query against the same
//! registry always yields the same candidates in the same order.

use crate::registry::SpecialistRegistry;
use crate::text::matched_phrases;
use crate::types::RoutingCandidate;
use std::cmp::Ordering;

/// Output of one classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Every specialist with at least one matched keyword, best first.
    pub candidates: Vec<RoutingCandidate>,
    /// The selected specialist.
    pub winner: String,
    /// True when no candidate scored above zero and the generalist was used.
    pub defaulted: bool,
}

pub struct ScoringClassifier<'a> {
    registry: &'a SpecialistRegistry,
    keyword_length_weight: f64,
}

impl<'a> ScoringClassifier<'a> {
    pub fn new(registry: &'a SpecialistRegistry, keyword_length_weight: f64) -> Self {
        Self {
            registry,
            keyword_length_weight,
        }
    }

    /// Score all profiles against normalized query text.
    pub fn classify(&self, normalized_query: &str, trace: &mut Vec<String>) -> Classification {
        let mut candidates: Vec<RoutingCandidate> = self
            .registry
            .iter()
            .filter_map(|profile| {
                let matched = matched_phrases(normalized_query, &profile.keywords);
                if matched.is_empty() {
                    return None;
                }
                let score = keyword_score(&matched, profile.priority, self.keyword_length_weight);
                Some(RoutingCandidate {
                    specialist_id: profile.id.clone(),
                    matched_keywords: matched.into_iter().map(str::to_string).collect(),
                    score,
                })
            })
            .collect();

        candidates.sort_by(|a, b| self.rank(a, b));

        for candidate in &candidates {
            trace.push(format!(
                "scored: '{}' = {:.3} via [{}]",
                candidate.specialist_id,
                candidate.score,
                candidate.matched_keywords.join(", ")
            ));
        }

        match candidates.first().filter(|top| top.score > 0.0) {
            Some(top) => {
                let winner = top.specialist_id.clone();
                let runner_up = candidates.get(1);
                let rationale = match runner_up {
                    Some(next) if next.score == top.score => format!(
                        "tie with '{}' broken by priority/id",
                        next.specialist_id
                    ),
                    Some(next) => format!("ahead of '{}' ({:.3})", next.specialist_id, next.score),
                    None => "only candidate".to_string(),
                };
                trace.push(format!("scored: winner '{winner}' ({rationale})"));
                Classification {
                    candidates,
                    winner,
                    defaulted: false,
                }
            }
            None => {
                let winner = self.registry.generalist().to_string();
                trace.push(format!(
                    "scored: no positive candidate; defaulting to generalist '{winner}'"
                ));
                Classification {
                    candidates,
                    winner,
                    defaulted: true,
                }
            }
        }
    }

    /// Score desc, then priority desc, then id asc.
    fn rank(&self, a: &RoutingCandidate, b: &RoutingCandidate) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| {
                self.registry
                    .priority(&b.specialist_id)
                    .cmp(&self.registry.priority(&a.specialist_id))
            })
            .then_with(|| a.specialist_id.cmp(&b.specialist_id))
    }
}

/// Candidate score for a set of matched keywords.
pub fn keyword_score(matched: &[&str], priority: i32, keyword_length_weight: f64) -> f64 {
    if matched.is_empty() {
        return 0.0;
    }
    let total_chars: usize = matched.iter().map(|kw| kw.chars().count()).sum();
    let mean_chars = total_chars as f64 / matched.len() as f64;
    matched.len() as f64 * f64::from(priority) * (1.0 + mean_chars * keyword_length_weight)
}
