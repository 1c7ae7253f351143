//! Response validation: catches off-domain specialist answers.
//!
//! Checks the reply text (not just the query) against the registry's
//! mismatch rules. Markers that already appear in the query don't count:
//! a sleep specialist echoing "離乳食" from a mixed question is on topic.

use crate::registry::SpecialistRegistry;
use crate::text::{count_matches, normalize};
use serde::{Deserialize, Serialize};

/// Outcome of validating one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub valid: bool,
    pub reason: Option<String>,
    /// Specialist the reply seems to belong to instead.
    pub suggested_reroute: Option<String>,
}

impl Verdict {
    pub fn accept() -> Self {
        Self {
            valid: true,
            reason: None,
            suggested_reroute: None,
        }
    }

    pub fn reject(reason: impl Into<String>, suggested_reroute: Option<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            suggested_reroute,
        }
    }
}

pub struct ResponseValidator<'a> {
    registry: &'a SpecialistRegistry,
}

impl<'a> ResponseValidator<'a> {
    pub fn new(registry: &'a SpecialistRegistry) -> Self {
        Self { registry }
    }

    /// Validate `text` produced by `specialist_id` for `query`.
    pub fn validate(&self, specialist_id: &str, text: &str, query: &str) -> Verdict {
        if text.trim().is_empty() {
            return Verdict::reject("empty response", None);
        }

        let normalized_text = normalize(text);
        let normalized_query = normalize(query);
        let own_hits = self
            .registry
            .get(specialist_id)
            .map(|profile| count_matches(&normalized_text, &profile.keywords))
            .unwrap_or(0);

        let mut worst: Option<(&str, usize)> = None;
        for rule in self.registry.mismatch_rules_for(specialist_id) {
            let hits = rule
                .markers
                .iter()
                .filter(|marker| {
                    normalized_text.contains(marker.as_str())
                        && !normalized_query.contains(marker.as_str())
                })
                .count();
            if hits < rule.min_hits || hits <= own_hits {
                continue;
            }
            let better = match worst {
                None => true,
                Some((foreign, best)) => {
                    hits > best || (hits == best && rule.foreign.as_str() < foreign)
                }
            };
            if better {
                worst = Some((rule.foreign.as_str(), hits));
            }
        }

        match worst {
            Some((foreign, hits)) => Verdict::reject(
                format!(
                    "reply from '{specialist_id}' is dominated by '{foreign}' vocabulary \
                     ({hits} markers vs {own_hits} own keywords)"
                ),
                Some(foreign.to_string()),
            ),
            None => Verdict::accept(),
        }
    }
}
