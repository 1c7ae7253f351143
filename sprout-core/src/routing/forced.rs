//! Forced routing: emergency and safety phrases bypass scoring.

use crate::registry::SpecialistRegistry;
use crate::text::matched_phrases;
use std::cmp::Reverse;

/// A forced-routing hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedMatch {
    pub specialist_id: String,
    pub triggers: Vec<String>,
    /// Other specialists whose triggers were also present, in rank order.
    pub conflicts: Vec<String>,
}

/// Short-circuit classifier over every profile's `forced_triggers`.
pub struct ForcedRoutingDetector<'a> {
    registry: &'a SpecialistRegistry,
}

impl<'a> ForcedRoutingDetector<'a> {
    pub fn new(registry: &'a SpecialistRegistry) -> Self {
        Self { registry }
    }

    /// Check normalized query text for forced triggers.
    ///
    /// With several specialists triggered at once the highest priority wins,
    /// then the lexically smallest id. Never fails; only appends to `trace`.
    pub fn detect(&self, normalized_query: &str, trace: &mut Vec<String>) -> Option<ForcedMatch> {
        let mut hits: Vec<(&str, i32, Vec<String>)> = self
            .registry
            .iter()
            .filter_map(|profile| {
                let triggers = matched_phrases(normalized_query, &profile.forced_triggers);
                if triggers.is_empty() {
                    None
                } else {
                    Some((
                        profile.id.as_str(),
                        profile.priority,
                        triggers.into_iter().map(str::to_string).collect(),
                    ))
                }
            })
            .collect();

        if hits.is_empty() {
            trace.push("forced: no trigger matched".to_string());
            return None;
        }

        hits.sort_by_key(|(id, priority, _)| (Reverse(*priority), *id));
        let mut ranked = hits.into_iter();
        let (winner, priority, triggers) = ranked.next()?;
        let conflicts: Vec<String> = ranked.map(|(id, _, _)| id.to_string()).collect();

        trace.push(format!(
            "forced: '{winner}' (priority {priority}) on {}",
            triggers.join(", ")
        ));
        if !conflicts.is_empty() {
            trace.push(format!(
                "forced: conflicting triggers for {}; resolved by priority",
                conflicts.join(", ")
            ));
        }

        Some(ForcedMatch {
            specialist_id: winner.to_string(),
            triggers,
            conflicts,
        })
    }
}
