//! Specialist invoker implementations.
//!
//! Use `create_invoker()` to instantiate the invoker described by config.

pub mod openai_compat;

use crate::config::InvokerConfig;
use crate::error::InvokeError;
use crate::invoker::SpecialistInvoker;
use std::sync::Arc;

pub use openai_compat::OpenAiCompatibleInvoker;

/// Create the configured invoker.
pub fn create_invoker(config: &InvokerConfig) -> Result<Arc<dyn SpecialistInvoker>, InvokeError> {
    let invoker = OpenAiCompatibleInvoker::new(config)?;
    tracing::debug!(model = invoker.model(), "Created OpenAI-compatible invoker");
    Ok(Arc::new(invoker))
}
