//! Specialist selection.
//!
//! ```text
//! query --> normalize --> [ForcedRoutingDetector] --hit--> Forced
//!                                |
//!                              miss
//!                                v
//!                        [ScoringClassifier] --> Scored | Parallel (multi-domain)
//! ```
//!
//! Everything here is synchronous and side-effect free apart from appending
//! to the decision trace; execution lives in `retry` and `orchestrator`.

pub mod fallback;
pub mod forced;
pub mod scorer;

pub use fallback::{FallbackChainResolver, FallbackCursor};
pub use forced::{ForcedMatch, ForcedRoutingDetector};
pub use scorer::{Classification, ScoringClassifier, keyword_score};

use crate::config::RoutingConfig;
use crate::registry::SpecialistRegistry;
use crate::text::normalize;
use crate::types::{RouteMode, RoutingCandidate, RoutingDecision, RoutingMode};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Intermediate results kept for trace events.
#[derive(Debug, Clone)]
pub struct DecisionDetails {
    pub decision: RoutingDecision,
    pub forced: Option<ForcedMatch>,
}

/// Build the routing decision for a query.
///
/// The forced check always runs first and wins over every caller mode.
pub fn decide(
    registry: &SpecialistRegistry,
    config: &RoutingConfig,
    request_id: Uuid,
    query: &str,
    mode: &RouteMode,
) -> DecisionDetails {
    let normalized = normalize(query);
    let mut trace = Vec::new();

    if let Some(hit) = ForcedRoutingDetector::new(registry).detect(&normalized, &mut trace) {
        let decision = RoutingDecision::new(
            request_id,
            RoutingMode::Forced,
            vec![hit.specialist_id.clone()],
            Vec::new(),
            trace,
            registry.generalist(),
        );
        return DecisionDetails {
            decision,
            forced: Some(hit),
        };
    }

    let classification = ScoringClassifier::new(registry, config.keyword_length_weight)
        .classify(&normalized, &mut trace);

    let (routing_mode, chosen) = match mode {
        RouteMode::Specialists(requested) => {
            let known = known_specialists(registry, requested, &mut trace);
            match known.len() {
                0 => {
                    trace.push("explicit: no known specialist requested; using auto".into());
                    auto_selection(registry, config, &classification, true, &mut trace)
                }
                1 => (RoutingMode::Explicit, known),
                _ => (RoutingMode::Parallel, known),
            }
        }
        RouteMode::Auto => auto_selection(registry, config, &classification, true, &mut trace),
        RouteMode::ForcedSingle => {
            auto_selection(registry, config, &classification, false, &mut trace)
        }
    };

    let decision = RoutingDecision::new(
        request_id,
        routing_mode,
        chosen,
        classification.candidates,
        trace,
        registry.generalist(),
    );
    DecisionDetails {
        decision,
        forced: None,
    }
}

/// De-duplicate and drop unknown ids, keeping caller order.
fn known_specialists(
    registry: &SpecialistRegistry,
    requested: &[String],
    trace: &mut Vec<String>,
) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut known = Vec::new();
    for id in requested {
        let id = id.trim();
        if !registry.contains(id) {
            trace.push(format!("explicit: ignoring unknown specialist '{id}'"));
            continue;
        }
        if seen.insert(id.to_string()) {
            known.push(id.to_string());
        }
    }
    known
}

fn auto_selection(
    registry: &SpecialistRegistry,
    config: &RoutingConfig,
    classification: &Classification,
    allow_parallel: bool,
    trace: &mut Vec<String>,
) -> (RoutingMode, Vec<String>) {
    if allow_parallel && config.auto_parallel && !classification.defaulted {
        let domains = multi_domain_candidates(registry, config, &classification.candidates);
        if domains.len() >= 2 {
            trace.push(format!(
                "multi-domain intent: {} (ratio >= {:.2})",
                domains.join(", "),
                config.multi_domain_ratio
            ));
            return (RoutingMode::Parallel, domains);
        }
    }
    (RoutingMode::Scored, vec![classification.winner.clone()])
}

/// Non-generalist candidates close enough to the top score to count as
/// separate domains of the same request.
fn multi_domain_candidates(
    registry: &SpecialistRegistry,
    config: &RoutingConfig,
    candidates: &[RoutingCandidate],
) -> Vec<String> {
    let Some(top) = candidates.first().map(|c| c.score).filter(|s| *s > 0.0) else {
        return Vec::new();
    };
    candidates
        .iter()
        .filter(|c| c.specialist_id != registry.generalist())
        .filter(|c| c.score > 0.0 && c.score >= top * config.multi_domain_ratio)
        .filter(|c| c.matched_keywords.len() >= config.multi_domain_min_matches)
        .take(config.max_parallel_specialists)
        .map(|c| c.specialist_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide_builtin(query: &str, mode: RouteMode) -> RoutingDecision {
        let registry = SpecialistRegistry::builtin().unwrap();
        decide(
            &registry,
            &RoutingConfig::default(),
            Uuid::new_v4(),
            query,
            &mode,
        )
        .decision
    }

    #[test]
    fn test_forced_beats_scoring() {
        let decision = decide_builtin(
            "熱が38度あります。離乳食も食べてくれませんし、夜泣きもひどいです",
            RouteMode::Auto,
        );
        assert_eq!(decision.mode(), RoutingMode::Forced);
        assert_eq!(decision.chosen_specialists(), ["health".to_string()]);
        assert!(decision.candidates().is_empty());
    }

    #[test]
    fn test_forced_beats_explicit_selection() {
        let decision = decide_builtin(
            "熱が38度あります",
            RouteMode::Specialists(vec!["play".into(), "sleep".into()]),
        );
        assert_eq!(decision.mode(), RoutingMode::Forced);
        assert_eq!(decision.primary(), "health");
    }

    #[test]
    fn test_scored_single() {
        let decision = decide_builtin("離乳食を食べてくれません", RouteMode::Auto);
        assert_eq!(decision.mode(), RoutingMode::Scored);
        assert_eq!(decision.primary(), "nutrition");
    }

    #[test]
    fn test_multi_domain_auto_parallel() {
        let decision = decide_builtin(
            "夜泣きと寝かしつけに悩んでいて、離乳食も食べてくれないです",
            RouteMode::Auto,
        );
        assert_eq!(decision.mode(), RoutingMode::Parallel);
        assert_eq!(
            decision.chosen_specialists(),
            ["nutrition".to_string(), "sleep".to_string()]
        );
    }

    #[test]
    fn test_forced_single_never_parallel() {
        let decision = decide_builtin(
            "夜泣きと寝かしつけに悩んでいて、離乳食も食べてくれないです",
            RouteMode::ForcedSingle,
        );
        assert_eq!(decision.mode(), RoutingMode::Scored);
        assert_eq!(decision.chosen_specialists().len(), 1);
    }

    #[test]
    fn test_explicit_set_filters_unknown_and_duplicates() {
        let decision = decide_builtin(
            "相談です",
            RouteMode::Specialists(vec![
                "sleep".into(),
                "ghost".into(),
                "play".into(),
                "sleep".into(),
            ]),
        );
        assert_eq!(decision.mode(), RoutingMode::Parallel);
        assert_eq!(
            decision.chosen_specialists(),
            ["sleep".to_string(), "play".to_string()]
        );
        assert!(decision.trace().iter().any(|l| l.contains("ghost")));
    }

    #[test]
    fn test_explicit_single() {
        let decision = decide_builtin("相談です", RouteMode::Specialists(vec!["play".into()]));
        assert_eq!(decision.mode(), RoutingMode::Explicit);
        assert_eq!(decision.primary(), "play");
    }

    #[test]
    fn test_explicit_all_unknown_falls_back_to_auto() {
        let decision = decide_builtin(
            "離乳食を食べてくれません",
            RouteMode::Specialists(vec!["ghost".into()]),
        );
        assert_eq!(decision.mode(), RoutingMode::Scored);
        assert_eq!(decision.primary(), "nutrition");
    }

    #[test]
    fn test_unmatched_query_goes_to_generalist() {
        let decision = decide_builtin("hello there", RouteMode::Auto);
        assert_eq!(decision.mode(), RoutingMode::Scored);
        assert_eq!(decision.primary(), "coordinator");
    }

    #[test]
    fn test_auto_parallel_can_be_disabled() {
        let registry = SpecialistRegistry::builtin().unwrap();
        let config = RoutingConfig {
            auto_parallel: false,
            ..RoutingConfig::default()
        };
        let details = decide(
            &registry,
            &config,
            Uuid::new_v4(),
            "夜泣きと寝かしつけに悩んでいて、離乳食も食べてくれないです",
            &RouteMode::Auto,
        );
        assert_eq!(details.decision.mode(), RoutingMode::Scored);
    }
}
