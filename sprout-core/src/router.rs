//! Specialist router: the caller-facing entry point.
//!
//! ```text
//! route(query, mode, context)
//!   -> decide (forced check, scoring, mode resolution)
//!   -> single path:   RetryController (retries, validation, fallback chain)
//!   -> parallel path: ParallelOrchestrator -> ReportSynthesizer
//!                     (all failed -> generalist single path)
//! ```
//!
//! The router holds only read-only state, so one instance can serve any
//! number of concurrent requests.

use crate::config::{RoutingConfig, SproutConfig, SynthesisConfig};
use crate::error::ConfigError;
use crate::invoker::SpecialistInvoker;
use crate::orchestrator::ParallelOrchestrator;
use crate::registry::SpecialistRegistry;
use crate::retry::{RetryController, RetryOutcome, RetryPolicy};
use crate::routing::decide;
use crate::synthesis::ReportSynthesizer;
use crate::trace::{RoutingTrace, TraceEventKind, TraceSink, TracingSink};
use crate::types::{Answer, Context, RouteMode, RouteOutcome, RoutingDecision, RoutingMode};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct SpecialistRouter {
    registry: Arc<SpecialistRegistry>,
    invoker: Arc<dyn SpecialistInvoker>,
    routing: RoutingConfig,
    synthesis: SynthesisConfig,
    sink: Arc<dyn TraceSink>,
}

impl SpecialistRouter {
    pub fn new(
        registry: Arc<SpecialistRegistry>,
        invoker: Arc<dyn SpecialistInvoker>,
        routing: RoutingConfig,
        synthesis: SynthesisConfig,
    ) -> Self {
        Self {
            registry,
            invoker,
            routing,
            synthesis,
            sink: Arc::new(TracingSink),
        }
    }

    /// Build a router from loaded configuration, loading its registry.
    pub fn from_config(
        config: &SproutConfig,
        invoker: Arc<dyn SpecialistInvoker>,
    ) -> crate::Result<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(ConfigError::Invalid {
                message: problems.join("; "),
            }
            .into());
        }
        let registry = Arc::new(config.load_registry()?);
        Ok(Self::new(
            registry,
            invoker,
            config.routing.clone(),
            config.synthesis.clone(),
        ))
    }

    /// Send trace events to `sink` instead of `tracing`.
    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn registry(&self) -> &SpecialistRegistry {
        &self.registry
    }

    pub fn routing_config(&self) -> &RoutingConfig {
        &self.routing
    }

    /// The routing decision alone, without invoking anyone.
    pub fn decide(&self, query: &str, mode: &RouteMode) -> RoutingDecision {
        decide(&self.registry, &self.routing, Uuid::new_v4(), query, mode).decision
    }

    /// Route a query to its specialist(s) and return the answer.
    ///
    /// Never fails: execution errors become retries, reroutes, missing
    /// domains or a degraded answer.
    pub async fn route(&self, query: &str, mode: RouteMode, context: Context) -> RouteOutcome {
        let request_id = Uuid::new_v4();
        let mut trace = RoutingTrace::new(request_id, Arc::clone(&self.sink));

        let details = decide(&self.registry, &self.routing, request_id, query, &mode);
        let decision = details.decision;
        match details.forced {
            Some(hit) => trace.record(TraceEventKind::ForcedHit {
                specialist: hit.specialist_id,
                triggers: hit.triggers,
                conflicts: hit.conflicts,
            }),
            None => trace.record(TraceEventKind::CandidatesScored {
                candidates: decision.candidates().to_vec(),
            }),
        }
        trace.record(TraceEventKind::DecisionMade {
            mode: decision.mode(),
            chosen: decision.chosen_specialists().to_vec(),
        });

        let context = Arc::new(context);
        let mut attempts = Vec::new();
        let answer = if decision.mode() == RoutingMode::Parallel
            && decision.chosen_specialists().len() > 1
        {
            let orchestrator = ParallelOrchestrator::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.invoker),
                RetryPolicy::local(self.routing.parallel_retries, self.routing.per_call_timeout()),
                self.routing.global_deadline(),
            );
            let result = orchestrator
                .run(
                    decision.chosen_specialists(),
                    query,
                    Arc::clone(&context),
                    &mut trace,
                )
                .await;
            attempts.extend(result.attempts);

            if result.sections.is_empty() {
                trace.record(TraceEventKind::ParallelFallback {
                    missing: result.missing.iter().cloned().collect(),
                });
                let outcome = self
                    .run_single(self.registry.generalist(), query, &context, &mut trace)
                    .await;
                attempts.extend(outcome.attempts);
                Answer::Single(outcome.response)
            } else {
                let synthesizer = ReportSynthesizer::new(
                    Arc::clone(&self.registry),
                    Arc::clone(&self.invoker),
                    self.synthesis.clone(),
                    self.routing.per_call_timeout(),
                );
                let report = synthesizer
                    .synthesize(query, result.sections, result.missing, &context, &mut trace)
                    .await;
                Answer::Collaborative(report)
            }
        } else {
            let outcome = self
                .run_single(decision.primary(), query, &context, &mut trace)
                .await;
            attempts.extend(outcome.attempts);
            Answer::Single(outcome.response)
        };

        let outcome = RouteOutcome {
            decision,
            answer,
            attempts,
            events: trace.into_events(),
        };
        info!(
            %request_id,
            mode = %outcome.decision.mode(),
            degraded = outcome.is_degraded(),
            events = outcome.events.len(),
            "Request routed"
        );
        outcome
    }

    async fn run_single(
        &self,
        origin: &str,
        query: &str,
        context: &Context,
        trace: &mut RoutingTrace,
    ) -> RetryOutcome {
        let controller = RetryController::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.invoker),
            RetryPolicy {
                max_retries: self.routing.max_retries,
                per_call_timeout: self.routing.per_call_timeout(),
                allow_reroute: true,
            },
            self.routing.degraded_message.clone(),
        );
        controller.run(origin, query, context, trace).await
    }
}
