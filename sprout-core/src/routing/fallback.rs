//! Fallback chains: ordered degradation paths ending at the generalist.
//!
//! Chains are validated acyclic when the registry loads, so every walk
//! terminates within the chain's length.

use crate::registry::SpecialistRegistry;

pub struct FallbackChainResolver<'a> {
    registry: &'a SpecialistRegistry,
}

impl<'a> FallbackChainResolver<'a> {
    pub fn new(registry: &'a SpecialistRegistry) -> Self {
        Self { registry }
    }

    /// First step of `failed`'s own chain, or `None` for the generalist.
    ///
    /// Multi-step walks go through [`FallbackChainResolver::cursor`] so they
    /// stay on one chain.
    pub fn next(&self, failed: &str) -> Option<&'a str> {
        self.registry
            .fallback_chain(failed)
            .first()
            .map(String::as_str)
    }

    /// Cursor over the whole chain of `origin`.
    pub fn cursor(&self, origin: &str) -> FallbackCursor<'a> {
        FallbackCursor {
            chain: self.registry.fallback_chain(origin),
            position: 0,
        }
    }

    /// The full degradation path of `origin`, origin excluded.
    pub fn path(&self, origin: &str) -> Vec<&'a str> {
        self.cursor(origin).collect()
    }
}

/// Position within one specialist's fallback chain.
#[derive(Debug, Clone)]
pub struct FallbackCursor<'a> {
    chain: &'a [String],
    position: usize,
}

impl FallbackCursor<'_> {
    /// Steps left before the chain is exhausted.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.position)
    }
}

impl<'a> Iterator for FallbackCursor<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.chain.get(self.position)?;
        self.position += 1;
        Some(step.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_step() {
        let registry = SpecialistRegistry::builtin().unwrap();
        let resolver = FallbackChainResolver::new(&registry);
        assert_eq!(resolver.next("nutrition"), Some("health"));
        assert_eq!(resolver.next("health"), Some("coordinator"));
        assert_eq!(resolver.next("coordinator"), None);
        assert_eq!(resolver.next("unknown"), None);
    }

    #[test]
    fn test_every_chain_ends_at_generalist() {
        let registry = SpecialistRegistry::builtin().unwrap();
        let resolver = FallbackChainResolver::new(&registry);
        for id in registry.ids() {
            let path = resolver.path(id);
            if id == registry.generalist() {
                assert!(path.is_empty());
            } else {
                assert_eq!(path.last().copied(), Some(registry.generalist()));
                assert!(path.len() <= registry.fallback_chain(id).len());
            }
        }
    }

    #[test]
    fn test_cursor_walks_origin_chain_not_first_steps() {
        let registry = SpecialistRegistry::builtin().unwrap();
        let resolver = FallbackChainResolver::new(&registry);
        // Following `next` from behavior would detour through development.
        assert_eq!(resolver.next("behavior"), Some("development"));
        assert_eq!(resolver.path("sleep"), vec!["behavior", "coordinator"]);
    }

    #[test]
    fn test_cursor_remaining() {
        let registry = SpecialistRegistry::builtin().unwrap();
        let resolver = FallbackChainResolver::new(&registry);
        let mut cursor = resolver.cursor("sleep");
        assert_eq!(cursor.remaining(), 2);
        assert_eq!(cursor.next(), Some("behavior"));
        assert_eq!(cursor.remaining(), 1);
        assert_eq!(cursor.next(), Some("coordinator"));
        assert_eq!(cursor.next(), None);
        assert_eq!(cursor.remaining(), 0);
    }
}
