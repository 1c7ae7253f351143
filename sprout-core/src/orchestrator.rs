//! Parallel orchestration: one task per specialist, partial results kept.
//!
//! Tasks share nothing but the read-only registry and context. Each one runs
//! a local, non-rerouting [`RetryController`] under the per-call timeout and
//! hands back its own trace events; the whole fan-in is bounded by a global
//! deadline after which stragglers are aborted and reported missing.

use crate::invoker::SpecialistInvoker;
use crate::registry::SpecialistRegistry;
use crate::retry::{RetryController, RetryPolicy};
use crate::trace::{RoutingTrace, TraceEventKind};
use crate::types::{AgentResponse, Context};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Collected results of one fan-out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParallelResult {
    /// Accepted responses keyed by specialist id.
    pub sections: BTreeMap<String, AgentResponse>,
    pub missing: BTreeSet<String>,
    /// Every response produced by any task.
    pub attempts: Vec<AgentResponse>,
}

pub struct ParallelOrchestrator {
    controller: RetryController,
    global_deadline: Duration,
}

impl ParallelOrchestrator {
    pub fn new(
        registry: Arc<SpecialistRegistry>,
        invoker: Arc<dyn SpecialistInvoker>,
        policy: RetryPolicy,
        global_deadline: Duration,
    ) -> Self {
        let policy = RetryPolicy {
            allow_reroute: false,
            ..policy
        };
        Self {
            controller: RetryController::new(registry, invoker, policy, String::new()),
            global_deadline,
        }
    }

    /// Dispatch every specialist concurrently and collect what settles in time.
    pub async fn run(
        &self,
        specialists: &[String],
        query: &str,
        context: Arc<Context>,
        trace: &mut RoutingTrace,
    ) -> ParallelResult {
        let deadline = Instant::now() + self.global_deadline;
        let mut join_set = JoinSet::new();
        let mut pending: BTreeSet<String> = BTreeSet::new();

        for id in specialists {
            if !pending.insert(id.clone()) {
                continue;
            }
            let controller = self.controller.clone();
            let query = query.to_string();
            let context = Arc::clone(&context);
            let mut task_trace = trace.child();
            let id = id.clone();
            join_set.spawn(async move {
                let outcome = controller.run(&id, &query, &context, &mut task_trace).await;
                (id, outcome, task_trace.into_events())
            });
        }
        debug!(tasks = pending.len(), deadline = ?self.global_deadline, "Parallel dispatch");

        let mut result = ParallelResult::default();
        let settled = tokio::time::timeout_at(deadline, async {
            while let Some(joined) = join_set.join_next().await {
                let (id, outcome, events) = match joined {
                    Ok(done) => done,
                    Err(err) => {
                        warn!(error = %err, "Specialist task did not complete");
                        continue;
                    }
                };
                pending.remove(&id);
                trace.absorb(events);
                result.attempts.extend(outcome.attempts);
                if outcome.accepted {
                    result.sections.insert(id, outcome.response);
                } else {
                    trace.record(TraceEventKind::SpecialistMissing {
                        specialist: id.clone(),
                        reason: outcome
                            .last_error
                            .unwrap_or_else(|| "no accepted response".to_string()),
                    });
                    result.missing.insert(id);
                }
            }
        })
        .await;

        let reason = if settled.is_err() {
            join_set.abort_all();
            trace.record(TraceEventKind::DeadlineElapsed {
                outstanding: pending.iter().cloned().collect(),
            });
            "orchestration deadline elapsed"
        } else {
            "task aborted"
        };
        for id in pending {
            trace.record(TraceEventKind::SpecialistMissing {
                specialist: id.clone(),
                reason: reason.to_string(),
            });
            result.missing.insert(id);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvokeError;
    use crate::invoker::MockInvoker;
    use crate::trace::MemorySink;
    use uuid::Uuid;

    fn orchestrator(mock: Arc<MockInvoker>, per_call: Duration, deadline: Duration) -> ParallelOrchestrator {
        ParallelOrchestrator::new(
            Arc::new(SpecialistRegistry::builtin().unwrap()),
            mock,
            RetryPolicy::local(0, per_call),
            deadline,
        )
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_all_sections_collected() {
        let mock = Arc::new(MockInvoker::new());
        let mut trace = RoutingTrace::new(Uuid::new_v4(), Arc::new(MemorySink::new()));
        let result = orchestrator(mock.clone(), Duration::from_secs(5), Duration::from_secs(15))
            .run(&ids(&["sleep", "nutrition"]), "q", Arc::new(Context::new()), &mut trace)
            .await;
        assert_eq!(result.sections.len(), 2);
        assert!(result.missing.is_empty());
        assert_eq!(mock.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicates_dispatched_once() {
        let mock = Arc::new(MockInvoker::new());
        let mut trace = RoutingTrace::new(Uuid::new_v4(), Arc::new(MemorySink::new()));
        orchestrator(mock.clone(), Duration::from_secs(5), Duration::from_secs(15))
            .run(&ids(&["sleep", "sleep"]), "q", Arc::new(Context::new()), &mut trace)
            .await;
        assert_eq!(mock.call_count("sleep"), 1);
    }

    #[tokio::test]
    async fn test_failure_recorded_as_missing() {
        let mock = Arc::new(MockInvoker::new().with_failure(
            "play",
            InvokeError::Remote {
                specialist: "play".into(),
                message: "503".into(),
            },
        ));
        let mut trace = RoutingTrace::new(Uuid::new_v4(), Arc::new(MemorySink::new()));
        let result = orchestrator(mock, Duration::from_secs(5), Duration::from_secs(15))
            .run(&ids(&["sleep", "play"]), "q", Arc::new(Context::new()), &mut trace)
            .await;
        assert_eq!(result.sections.keys().collect::<Vec<_>>(), vec!["sleep"]);
        assert_eq!(result.missing, BTreeSet::from(["play".to_string()]));
        assert!(trace.events().iter().any(|e| matches!(
            &e.kind,
            TraceEventKind::SpecialistMissing { specialist, reason }
                if specialist == "play" && reason.contains("503")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_deadline_aborts_stragglers() {
        // Per-call timeout longer than the global deadline: only the
        // deadline can stop the slow task.
        let mock = Arc::new(MockInvoker::new().with_delay("play", Duration::from_secs(3600)));
        let mut trace = RoutingTrace::new(Uuid::new_v4(), Arc::new(MemorySink::new()));
        let result = orchestrator(mock, Duration::from_secs(600), Duration::from_secs(10))
            .run(&ids(&["sleep", "play"]), "q", Arc::new(Context::new()), &mut trace)
            .await;
        assert!(result.sections.contains_key("sleep"));
        assert_eq!(result.missing, BTreeSet::from(["play".to_string()]));
        assert!(trace.events().iter().any(|e| matches!(
            &e.kind,
            TraceEventKind::DeadlineElapsed { outstanding } if outstanding == &["play".to_string()]
        )));
    }
}
