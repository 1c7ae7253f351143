//! Core types shared across the routing pipeline.

use crate::trace::TraceEvent;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a specialist.
pub type SpecialistId = String;

// =============================================================================
// Request context
// =============================================================================

/// Speaker of a prior conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// A prior conversational turn passed through to specialists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

/// Immutable per-request context handed to every specialist invocation.
///
/// The router never reads or writes session state of its own; whatever the
/// caller knows about the conversation travels in here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub history: Vec<Turn>,
    /// Free-form facts such as `child_age_months`.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_turn(mut self, role: TurnRole, text: impl Into<String>) -> Self {
        self.history.push(Turn {
            role,
            text: text.into(),
        });
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Routing decision
// =============================================================================

/// A scored specialist for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingCandidate {
    pub specialist_id: SpecialistId,
    pub matched_keywords: Vec<String>,
    pub score: f64,
}

/// How the target specialists were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// A forced trigger short-circuited scoring.
    Forced,
    /// Highest-scoring candidate (or the generalist).
    Scored,
    /// Multiple specialists dispatched concurrently.
    Parallel,
    /// The caller named exactly one specialist.
    Explicit,
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingMode::Forced => write!(f, "forced"),
            RoutingMode::Scored => write!(f, "scored"),
            RoutingMode::Parallel => write!(f, "parallel"),
            RoutingMode::Explicit => write!(f, "explicit"),
        }
    }
}

/// Caller-selected routing mode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    /// Forced check, scoring, and multi-domain intent detection.
    #[default]
    Auto,
    /// Like `Auto`, but never fans out to multiple specialists.
    ForcedSingle,
    /// An explicit set of specialists chosen by the caller.
    Specialists(Vec<SpecialistId>),
}

/// The routing decision for one request. Immutable once built.
///
/// Always names at least one specialist: construction falls back to the
/// generalist when handed an empty selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    request_id: Uuid,
    mode: RoutingMode,
    chosen_specialists: Vec<SpecialistId>,
    candidates: Vec<RoutingCandidate>,
    trace: Vec<String>,
}

impl RoutingDecision {
    pub(crate) fn new(
        request_id: Uuid,
        mode: RoutingMode,
        mut chosen_specialists: Vec<SpecialistId>,
        candidates: Vec<RoutingCandidate>,
        mut trace: Vec<String>,
        generalist: &str,
    ) -> Self {
        if chosen_specialists.is_empty() {
            trace.push(format!(
                "empty selection; defaulting to generalist '{generalist}'"
            ));
            chosen_specialists.push(generalist.to_string());
        }
        Self {
            request_id,
            mode,
            chosen_specialists,
            candidates,
            trace,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    pub fn chosen_specialists(&self) -> &[SpecialistId] {
        &self.chosen_specialists
    }

    /// The first chosen specialist.
    pub fn primary(&self) -> &str {
        // Non-empty by construction.
        self.chosen_specialists
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn candidates(&self) -> &[RoutingCandidate] {
        &self.candidates
    }

    pub fn trace(&self) -> &[String] {
        &self.trace
    }
}

// =============================================================================
// Responses
// =============================================================================

/// One specialist invocation attempt. Superseded, never mutated, on retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub specialist_id: SpecialistId,
    pub text: String,
    pub validated: bool,
    /// Attempt index for this specialist, starting at 0.
    pub attempt: u32,
    /// Low-confidence marker set when retries and fallbacks were exhausted.
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub latency_ms: u64,
}

/// Result of a parallel, multi-specialist request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollaborativeReport {
    /// Keyed by specialist id, independent of completion order.
    pub per_domain_sections: BTreeMap<SpecialistId, AgentResponse>,
    pub missing_domains: BTreeSet<SpecialistId>,
    pub synthesized_text: String,
}

/// Final answer of a routing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    Single(AgentResponse),
    Collaborative(CollaborativeReport),
}

/// Everything `route()` hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOutcome {
    pub decision: RoutingDecision,
    pub answer: Answer,
    /// Every response produced, in the order it was produced.
    pub attempts: Vec<AgentResponse>,
    pub events: Vec<TraceEvent>,
}

impl RouteOutcome {
    /// User-facing text of the answer.
    pub fn text(&self) -> &str {
        match &self.answer {
            Answer::Single(response) => &response.text,
            Answer::Collaborative(report) => &report.synthesized_text,
        }
    }

    /// Whether the caller is getting a best-effort answer.
    ///
    /// True for exhausted single responses and for reports with gaps.
    pub fn is_degraded(&self) -> bool {
        match &self.answer {
            Answer::Single(response) => response.degraded || !response.validated,
            Answer::Collaborative(report) => !report.missing_domains.is_empty(),
        }
    }

    pub fn report(&self) -> Option<&CollaborativeReport> {
        match &self.answer {
            Answer::Collaborative(report) => Some(report),
            Answer::Single(_) => None,
        }
    }
}
