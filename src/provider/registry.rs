use std::fmt;
use std::sync::Arc;

use super::MediaProvider;
use crate::action::Action;

/// Providers keyed by name, kept in registration order.
///
/// Built once by the composition root and then shared read-only; no
/// locking is needed for lookups during request handling.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn MediaProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a provider, replacing any provider registered under the same
    /// name in place (its original position is kept).
    pub fn register(&mut self, provider: Arc<dyn MediaProvider>) {
        match self.providers.iter().position(|p| p.name() == provider.name()) {
            Some(index) => self.providers[index] = provider,
            None => self.providers.push(provider),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MediaProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.providers.iter().any(|p| p.name() == name)
    }

    /// Registered names in registration order
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Providers declaring support for `action`, in registration order
    pub fn find_supporting_providers(&self, action: Action) -> Vec<Arc<dyn MediaProvider>> {
        self.providers
            .iter()
            .filter(|p| p.supports(action))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.provider_names())
            .finish()
    }
}
