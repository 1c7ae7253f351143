//! Specialist invocation: the boundary to the external language-model service.
//!
//! The core never talks to a model directly; it goes through a
//! [`SpecialistInvoker`]. Calls must be safe to repeat since the retry
//! controller may issue the same prompt more than once.

use crate::error::InvokeError;
use crate::registry::SpecialistProfile;
use crate::types::Context;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Trait for services that produce a specialist's answer text.
#[async_trait]
pub trait SpecialistInvoker: Send + Sync {
    /// Produce the answer of `specialist_id` for a fully built prompt.
    async fn invoke(
        &self,
        specialist_id: &str,
        prompt: &str,
        context: &Context,
    ) -> Result<String, InvokeError>;
}

/// Prompt sent to a specialist: persona preamble, then the user query.
pub fn build_prompt(profile: &SpecialistProfile, query: &str) -> String {
    let preamble = profile.prompt_preamble.trim();
    if preamble.is_empty() {
        query.to_string()
    } else {
        format!("{preamble}\n\n{query}")
    }
}

/// One scripted behavior of the mock.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(InvokeError),
}

/// A call observed by [`MockInvoker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub specialist_id: String,
    pub prompt: String,
}

/// A scripted invoker for testing.
///
/// Each specialist has a queue of one-shot replies, consumed first, and an
/// optional standing reply used once the queue is empty. Specialists with no
/// script answer with a generic line naming themselves. Delays are applied
/// with `tokio::time::sleep`, so paused-clock tests can exercise timeouts.
#[derive(Debug, Default)]
pub struct MockInvoker {
    queued: Mutex<HashMap<String, VecDeque<MockReply>>>,
    standing: Mutex<HashMap<String, MockReply>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<MockCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `specialist_id` with `text`.
    pub fn with_reply(self, specialist_id: &str, text: &str) -> Self {
        lock(&self.standing).insert(specialist_id.to_string(), MockReply::Text(text.to_string()));
        self
    }

    /// Always fail `specialist_id` with `error`.
    pub fn with_failure(self, specialist_id: &str, error: InvokeError) -> Self {
        lock(&self.standing).insert(specialist_id.to_string(), MockReply::Fail(error));
        self
    }

    /// Delay every call to `specialist_id`.
    pub fn with_delay(self, specialist_id: &str, delay: Duration) -> Self {
        lock(&self.delays).insert(specialist_id.to_string(), delay);
        self
    }

    /// Queue a one-shot reply for the next call to `specialist_id`.
    pub fn queue_reply(&self, specialist_id: &str, text: &str) {
        self.queue(specialist_id, MockReply::Text(text.to_string()));
    }

    /// Queue a one-shot failure for the next call to `specialist_id`.
    pub fn queue_failure(&self, specialist_id: &str, error: InvokeError) {
        self.queue(specialist_id, MockReply::Fail(error));
    }

    fn queue(&self, specialist_id: &str, reply: MockReply) {
        lock(&self.queued)
            .entry(specialist_id.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Every call made so far, in call order.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls made to `specialist_id`.
    pub fn call_count(&self, specialist_id: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.specialist_id == specialist_id)
            .count()
    }

    /// Specialist ids in call order.
    pub fn called_specialists(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .map(|call| call.specialist_id.clone())
            .collect()
    }

    fn next_reply(&self, specialist_id: &str) -> MockReply {
        if let Some(reply) = lock(&self.queued)
            .get_mut(specialist_id)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        lock(&self.standing)
            .get(specialist_id)
            .cloned()
            .unwrap_or_else(|| MockReply::Text(format!("Advice from the {specialist_id} specialist.")))
    }
}

#[async_trait]
impl SpecialistInvoker for MockInvoker {
    async fn invoke(
        &self,
        specialist_id: &str,
        prompt: &str,
        _context: &Context,
    ) -> Result<String, InvokeError> {
        lock(&self.calls).push(MockCall {
            specialist_id: specialist_id.to_string(),
            prompt: prompt.to_string(),
        });

        let delay = lock(&self.delays).get(specialist_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_reply(specialist_id) {
            MockReply::Text(text) => Ok(text),
            MockReply::Fail(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(preamble: &str) -> SpecialistProfile {
        SpecialistProfile {
            id: "sleep".into(),
            display_name: "Sleep".into(),
            prompt_preamble: preamble.into(),
            keywords: vec![],
            priority: 6,
            forced_triggers: vec![],
            fallback_chain: vec!["coordinator".into()],
        }
    }

    #[test]
    fn test_build_prompt() {
        assert_eq!(
            build_prompt(&profile("You are a sleep coach."), "夜泣きが続きます"),
            "You are a sleep coach.\n\n夜泣きが続きます"
        );
        assert_eq!(build_prompt(&profile("  "), "hi"), "hi");
    }

    #[tokio::test]
    async fn test_queued_before_standing() {
        let mock = MockInvoker::new().with_reply("sleep", "standing");
        mock.queue_reply("sleep", "first");
        let ctx = Context::new();
        assert_eq!(mock.invoke("sleep", "p", &ctx).await.unwrap(), "first");
        assert_eq!(mock.invoke("sleep", "p", &ctx).await.unwrap(), "standing");
        assert_eq!(mock.call_count("sleep"), 2);
    }

    #[tokio::test]
    async fn test_failures() {
        let mock = MockInvoker::new().with_failure(
            "health",
            InvokeError::Remote {
                specialist: "health".into(),
                message: "boom".into(),
            },
        );
        let ctx = Context::new();
        let err = mock.invoke("health", "p", &ctx).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unscripted_specialist_answers() {
        let mock = MockInvoker::new();
        let text = mock.invoke("play", "p", &Context::new()).await.unwrap();
        assert!(text.contains("play"));
        assert_eq!(mock.called_specialists(), vec!["play".to_string()]);
        assert_eq!(mock.calls()[0].prompt, "p");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_uses_tokio_clock() {
        let mock = MockInvoker::new().with_delay("play", Duration::from_secs(60));
        let start = tokio::time::Instant::now();
        mock.invoke("play", "p", &Context::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(60));
    }
}
