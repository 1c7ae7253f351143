//! # Sprout Core
//!
//! Deterministic specialist routing for a parenting consultation assistant.
//! Provides the specialist registry, forced and scored routing, the retry and
//! fallback state machine, parallel orchestration with report synthesis,
//! configuration, and the invocation boundary to the language-model service.

pub mod config;
pub mod error;
pub mod invoker;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod router;
pub mod routing;
pub mod synthesis;
pub mod text;
pub mod trace;
pub mod types;
pub mod validator;

// Re-export commonly used types at the crate root.
pub use config::{InvokerConfig, RoutingConfig, SproutConfig, SynthesisConfig, SynthesisStrategy};
pub use error::{ConfigError, InvokeError, Result, SproutError};
pub use invoker::{MockInvoker, SpecialistInvoker};
pub use registry::{SpecialistProfile, SpecialistRegistry};
pub use router::SpecialistRouter;
pub use trace::{MemorySink, TraceEvent, TraceEventKind, TraceSink, TracingSink};
pub use types::{
    AgentResponse, Answer, CollaborativeReport, Context, RouteMode, RouteOutcome,
    RoutingCandidate, RoutingDecision, RoutingMode, Turn, TurnRole,
};
