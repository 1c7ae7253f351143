//! Routing trace: structured decision log for observability.
//!
//! Every decision point (forced hits, scored candidates, dispatches, retries,
//! reroutes, missing specialists, synthesis) becomes a [`TraceEvent`]. Events
//! are pushed to a [`TraceSink`] as they happen and also returned on the
//! `RouteOutcome`, so tests and callers can inspect exactly what happened.

use crate::types::{RoutingCandidate, RoutingMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What happened at one decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEventKind {
    ForcedHit {
        specialist: String,
        triggers: Vec<String>,
        /// Other specialists whose triggers also fired.
        conflicts: Vec<String>,
    },
    CandidatesScored {
        candidates: Vec<RoutingCandidate>,
    },
    DecisionMade {
        mode: RoutingMode,
        chosen: Vec<String>,
    },
    Dispatched {
        specialist: String,
        attempt: u32,
    },
    ExecutionFailed {
        specialist: String,
        attempt: u32,
        error: String,
    },
    ValidationFailed {
        specialist: String,
        attempt: u32,
        reason: String,
        suggested: Option<String>,
    },
    Retrying {
        specialist: String,
        attempt: u32,
    },
    Rerouted {
        from: String,
        to: String,
        reason: String,
    },
    Accepted {
        specialist: String,
        attempt: u32,
    },
    Exhausted {
        specialist: String,
    },
    SpecialistMissing {
        specialist: String,
        reason: String,
    },
    DeadlineElapsed {
        outstanding: Vec<String>,
    },
    SynthesisCompleted {
        sections: Vec<String>,
        missing: Vec<String>,
    },
    SynthesisFallback {
        reason: String,
    },
    ParallelFallback {
        missing: Vec<String>,
    },
}

/// A timestamped event tied to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub request_id: Uuid,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TraceEventKind,
}

/// Destination for trace events (log pipeline, metrics bridge, test probe).
pub trait TraceSink: Send + Sync {
    fn emit(&self, event: &TraceEvent);
}

/// Default sink: structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn emit(&self, event: &TraceEvent) {
        let request_id = event.request_id;
        match &event.kind {
            TraceEventKind::ForcedHit {
                specialist,
                triggers,
                conflicts,
            } => {
                if conflicts.is_empty() {
                    info!(%request_id, specialist = specialist.as_str(), ?triggers, "Forced route");
                } else {
                    warn!(
                        %request_id,
                        specialist = specialist.as_str(),
                        ?triggers,
                        ?conflicts,
                        "Forced route with conflicting triggers"
                    );
                }
            }
            TraceEventKind::CandidatesScored { candidates } => {
                debug!(%request_id, candidates = candidates.len(), "Candidates scored");
            }
            TraceEventKind::DecisionMade { mode, chosen } => {
                info!(%request_id, %mode, ?chosen, "Routing decision");
            }
            TraceEventKind::Dispatched {
                specialist,
                attempt,
            } => {
                debug!(%request_id, specialist = specialist.as_str(), attempt, "Dispatching");
            }
            TraceEventKind::ExecutionFailed {
                specialist,
                attempt,
                error,
            } => {
                warn!(
                    %request_id,
                    specialist = specialist.as_str(),
                    attempt,
                    error = error.as_str(),
                    "Specialist call failed"
                );
            }
            TraceEventKind::ValidationFailed {
                specialist,
                attempt,
                reason,
                suggested,
            } => {
                warn!(
                    %request_id,
                    specialist = specialist.as_str(),
                    attempt,
                    reason = reason.as_str(),
                    ?suggested,
                    "Response failed validation"
                );
            }
            TraceEventKind::Retrying {
                specialist,
                attempt,
            } => {
                info!(%request_id, specialist = specialist.as_str(), attempt, "Retrying");
            }
            TraceEventKind::Rerouted { from, to, reason } => {
                info!(
                    %request_id,
                    from = from.as_str(),
                    to = to.as_str(),
                    reason = reason.as_str(),
                    "Rerouted"
                );
            }
            TraceEventKind::Accepted {
                specialist,
                attempt,
            } => {
                debug!(%request_id, specialist = specialist.as_str(), attempt, "Accepted");
            }
            TraceEventKind::Exhausted { specialist } => {
                warn!(
                    %request_id,
                    last = specialist.as_str(),
                    "Fallbacks exhausted; returning degraded answer"
                );
            }
            TraceEventKind::SpecialistMissing { specialist, reason } => {
                warn!(
                    %request_id,
                    specialist = specialist.as_str(),
                    reason = reason.as_str(),
                    "Specialist missing from report"
                );
            }
            TraceEventKind::DeadlineElapsed { outstanding } => {
                warn!(%request_id, ?outstanding, "Orchestration deadline elapsed");
            }
            TraceEventKind::SynthesisCompleted { sections, missing } => {
                info!(%request_id, ?sections, ?missing, "Report synthesized");
            }
            TraceEventKind::SynthesisFallback { reason } => {
                warn!(%request_id, reason = reason.as_str(), "Falling back to template synthesis");
            }
            TraceEventKind::ParallelFallback { missing } => {
                warn!(%request_id, ?missing, "Every specialist failed; using generalist");
            }
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events emitted so far.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceSink for MemorySink {
    fn emit(&self, event: &TraceEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Per-request event recorder.
///
/// Each parallel task gets its own recorder for the same request id; the
/// orchestrator merges them back with [`RoutingTrace::absorb`].
#[derive(Clone)]
pub struct RoutingTrace {
    request_id: Uuid,
    sink: Arc<dyn TraceSink>,
    events: Vec<TraceEvent>,
}

impl RoutingTrace {
    pub fn new(request_id: Uuid, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            request_id,
            sink,
            events: Vec::new(),
        }
    }

    /// A fresh recorder for the same request and sink.
    pub fn child(&self) -> Self {
        Self::new(self.request_id, Arc::clone(&self.sink))
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn record(&mut self, kind: TraceEventKind) {
        let event = TraceEvent {
            request_id: self.request_id,
            at: Utc::now(),
            kind,
        };
        self.sink.emit(&event);
        self.events.push(event);
    }

    /// Append events already emitted by a child recorder.
    pub fn absorb(&mut self, events: Vec<TraceEvent>) {
        self.events.extend(events);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl std::fmt::Debug for RoutingTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTrace")
            .field("request_id", &self.request_id)
            .field("events", &self.events.len())
            .finish()
    }
}
