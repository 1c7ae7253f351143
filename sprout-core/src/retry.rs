//! Retry controller: the single-specialist execution state machine.
//!
//! ```text
//! Selected -> Executing -> Validating -> Accepted
//!    ^            |             |
//!    |            v             v
//!    +------- Retrying      Rerouting --(chain empty)--> Exhausted
//!    |                          |
//!    +--------------------------+
//! ```
//!
//! Every failure is absorbed here and turned into a state transition. The
//! caller always gets a response; at worst it is flagged degraded.

use crate::error::InvokeError;
use crate::invoker::{SpecialistInvoker, build_prompt};
use crate::registry::SpecialistRegistry;
use crate::routing::{FallbackChainResolver, FallbackCursor};
use crate::trace::{RoutingTrace, TraceEventKind};
use crate::types::{AgentResponse, Context};
use crate::validator::ResponseValidator;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Limits for one controller run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts per specialist after the first (attempts `0..=max_retries`).
    pub max_retries: u32,
    pub per_call_timeout: Duration,
    /// Whether to move along fallback chains. Disabled on the parallel path.
    pub allow_reroute: bool,
}

impl RetryPolicy {
    /// Policy for one specialist inside a parallel fan-out.
    pub fn local(max_retries: u32, per_call_timeout: Duration) -> Self {
        Self {
            max_retries,
            per_call_timeout,
            allow_reroute: false,
        }
    }
}

/// Result of one controller run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    /// The accepted response, or the degraded best effort.
    pub response: AgentResponse,
    /// Every response produced, accepted or not, in order.
    pub attempts: Vec<AgentResponse>,
    pub accepted: bool,
    /// Description of the last failure, if any.
    pub last_error: Option<String>,
}

/// Explicit controller states.
#[derive(Debug)]
enum State {
    Selected,
    Executing,
    Validating { text: String, latency_ms: u64 },
    Retrying,
    Rerouting { suggested: Option<String>, reason: String },
    Accepted(AgentResponse),
    Exhausted,
}

/// Drives one request through execution, validation, retries and reroutes.
#[derive(Clone)]
pub struct RetryController {
    registry: Arc<SpecialistRegistry>,
    invoker: Arc<dyn SpecialistInvoker>,
    policy: RetryPolicy,
    degraded_message: String,
}

impl RetryController {
    pub fn new(
        registry: Arc<SpecialistRegistry>,
        invoker: Arc<dyn SpecialistInvoker>,
        policy: RetryPolicy,
        degraded_message: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            invoker,
            policy,
            degraded_message: degraded_message.into(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run the state machine starting at `origin`.
    pub async fn run(
        &self,
        origin: &str,
        query: &str,
        context: &Context,
        trace: &mut RoutingTrace,
    ) -> RetryOutcome {
        let validator = ResponseValidator::new(&self.registry);
        // Chain reroutes always follow the origin's chain, even after a
        // suggested detour.
        let mut chain = FallbackChainResolver::new(&self.registry).cursor(origin);

        let mut current = origin.to_string();
        let mut visited = BTreeSet::from([current.clone()]);
        let mut attempt: u32 = 0;
        let mut attempts: Vec<AgentResponse> = Vec::new();
        let mut last_error: Option<String> = None;
        let mut state = State::Selected;

        loop {
            state = match state {
                State::Selected => {
                    trace.record(TraceEventKind::Dispatched {
                        specialist: current.clone(),
                        attempt,
                    });
                    State::Executing
                }

                State::Executing => {
                    let started = Instant::now();
                    match self.execute(&current, query, context).await {
                        Ok(text) => State::Validating {
                            text,
                            latency_ms: elapsed_ms(started),
                        },
                        Err(err) => {
                            trace.record(TraceEventKind::ExecutionFailed {
                                specialist: current.clone(),
                                attempt,
                                error: err.to_string(),
                            });
                            last_error = Some(err.to_string());
                            if err.is_transient() && attempt < self.policy.max_retries {
                                State::Retrying
                            } else {
                                State::Rerouting {
                                    suggested: None,
                                    reason: format!("execution failed: {err}"),
                                }
                            }
                        }
                    }
                }

                State::Validating { text, latency_ms } => {
                    let verdict = validator.validate(&current, &text, query);
                    let response = AgentResponse {
                        specialist_id: current.clone(),
                        text,
                        validated: verdict.valid,
                        attempt,
                        degraded: false,
                        latency_ms,
                    };
                    if verdict.valid {
                        State::Accepted(response)
                    } else {
                        let reason = verdict
                            .reason
                            .unwrap_or_else(|| "validation failed".to_string());
                        trace.record(TraceEventKind::ValidationFailed {
                            specialist: current.clone(),
                            attempt,
                            reason: reason.clone(),
                            suggested: verdict.suggested_reroute.clone(),
                        });
                        last_error = Some(reason.clone());
                        attempts.push(response);
                        match verdict.suggested_reroute {
                            Some(target) if self.policy.allow_reroute => State::Rerouting {
                                suggested: Some(target),
                                reason,
                            },
                            _ if attempt < self.policy.max_retries => State::Retrying,
                            _ => State::Rerouting {
                                suggested: None,
                                reason,
                            },
                        }
                    }
                }

                State::Retrying => {
                    attempt += 1;
                    trace.record(TraceEventKind::Retrying {
                        specialist: current.clone(),
                        attempt,
                    });
                    State::Selected
                }

                State::Rerouting { suggested, reason } => {
                    if !self.policy.allow_reroute {
                        State::Exhausted
                    } else {
                        match self.next_target(&mut chain, suggested.as_deref(), &visited) {
                            Some(target) => {
                                trace.record(TraceEventKind::Rerouted {
                                    from: current.clone(),
                                    to: target.clone(),
                                    reason,
                                });
                                visited.insert(target.clone());
                                current = target;
                                attempt = 0;
                                State::Selected
                            }
                            None => State::Exhausted,
                        }
                    }
                }

                State::Accepted(response) => {
                    trace.record(TraceEventKind::Accepted {
                        specialist: response.specialist_id.clone(),
                        attempt: response.attempt,
                    });
                    attempts.push(response.clone());
                    return RetryOutcome {
                        response,
                        attempts,
                        accepted: true,
                        last_error,
                    };
                }

                State::Exhausted => {
                    trace.record(TraceEventKind::Exhausted {
                        specialist: current.clone(),
                    });
                    let best_effort = attempts
                        .iter()
                        .rev()
                        .find(|response| !response.text.trim().is_empty());
                    let response = match best_effort {
                        Some(last) => AgentResponse {
                            validated: false,
                            degraded: true,
                            ..last.clone()
                        },
                        None => AgentResponse {
                            specialist_id: current.clone(),
                            text: self.degraded_message.clone(),
                            validated: false,
                            attempt,
                            degraded: true,
                            latency_ms: 0,
                        },
                    };
                    return RetryOutcome {
                        response,
                        attempts,
                        accepted: false,
                        last_error,
                    };
                }
            };
        }
    }

    /// One bounded invocation of `specialist_id`.
    async fn execute(
        &self,
        specialist_id: &str,
        query: &str,
        context: &Context,
    ) -> Result<String, InvokeError> {
        let profile =
            self.registry
                .get(specialist_id)
                .ok_or_else(|| InvokeError::UnknownSpecialist {
                    specialist: specialist_id.to_string(),
                })?;
        let prompt = build_prompt(profile, query);
        tokio::time::timeout(
            self.policy.per_call_timeout,
            self.invoker.invoke(specialist_id, &prompt, context),
        )
        .await
        .map_err(|_| InvokeError::Timeout {
            specialist: specialist_id.to_string(),
            timeout_ms: u64::try_from(self.policy.per_call_timeout.as_millis())
                .unwrap_or(u64::MAX),
        })?
    }

    /// Reroute target: a known, unvisited suggestion first, else the next
    /// unvisited step of the origin's fallback chain.
    fn next_target(
        &self,
        chain: &mut FallbackCursor<'_>,
        suggested: Option<&str>,
        visited: &BTreeSet<String>,
    ) -> Option<String> {
        if let Some(target) = suggested
            && self.registry.contains(target)
            && !visited.contains(target)
        {
            return Some(target.to_string());
        }
        chain
            .find(|step| !visited.contains(*step))
            .map(str::to_string)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
