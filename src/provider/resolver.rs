use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{MediaProvider, ProviderRegistry};
use crate::action::Action;

/// Credential variables that imply a provider, checked in this order.
pub const ENV_PROVIDER_MAP: [(&str, &str); 3] = [
    ("FAL_API_KEY", "fal"),
    ("REPLICATE_API_TOKEN", "replicate"),
    ("RUNPOD_API_KEY", "runpod"),
];

/// Name of the offline provider preferred when nothing selects a remote one.
pub const LOCAL_PROVIDER: &str = "local";

/// Read-only view of the environment used for credential detection.
pub trait EnvLookup: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Set and non-empty
    fn is_present(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_empty())
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Provider implied by the first credential present, if any.
pub fn detect_provider_from_env(env: &dyn EnvLookup) -> Option<&'static str> {
    ENV_PROVIDER_MAP
        .iter()
        .find(|(var, _)| env.is_present(var))
        .map(|(_, provider)| *provider)
}

/// Pick the provider for `action`.
///
/// 1. An explicit name is used only if registered and capable; otherwise
///    resolution fails without trying anything else.
/// 2. The first present credential's provider, if capable.
/// 3. `local`, if capable.
/// 4. The first capable provider in registration order.
pub fn resolve_provider(
    registry: &ProviderRegistry,
    action: Action,
    explicit_provider: Option<&str>,
    env: &dyn EnvLookup,
) -> Option<Arc<dyn MediaProvider>> {
    if let Some(name) = explicit_provider {
        let provider = registry.get(name).filter(|p| p.supports(action));
        debug!(
            "Explicit provider '{}' for '{}': {}",
            name,
            action,
            if provider.is_some() { "usable" } else { "unusable" }
        );
        return provider;
    }

    if let Some(name) = detect_provider_from_env(env) {
        if let Some(provider) = registry.get(name).filter(|p| p.supports(action)) {
            debug!("Provider '{}' selected from credentials for '{}'", name, action);
            return Some(provider);
        }
        debug!("Credential for '{}' found but it cannot run '{}'", name, action);
    }

    if let Some(provider) = registry.get(LOCAL_PROVIDER).filter(|p| p.supports(action)) {
        debug!("Falling back to local provider for '{}'", action);
        return Some(provider);
    }

    let provider = registry.find_supporting_providers(action).into_iter().next();
    if let Some(p) = &provider {
        debug!("Using first capable provider '{}' for '{}'", p.name(), action);
    }
    provider
}
