// Provider abstraction and action dispatch
//
// - registry: name-keyed, registration-ordered provider collection
// - resolver: picks one provider for an action (explicit > credentials > local > any)
// - executor: single entry point turning a request into a result envelope
//
// To add a backend:
// 1. Implement MediaProvider for it under crate::backends
// 2. Declare its supported actions in `supports`
// 3. Register it in backends::register_all_providers

pub mod executor;
pub mod registry;
pub mod resolver;

use async_trait::async_trait;

pub use executor::{execute_action, execute_action_with_env};
pub use registry::ProviderRegistry;
pub use resolver::{detect_provider_from_env, resolve_provider, EnvLookup, ProcessEnv, ENV_PROVIDER_MAP};

use crate::action::{Action, ActionContext, ActionRequest};
use crate::result::MediaResult;

/// A backend able to execute some subset of the action catalog.
///
/// `execute` always returns an envelope; failures are reported as
/// `MediaResult::Error`, and success results carry the provider's own name.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Unique provider name
    fn name(&self) -> &str;

    /// Whether this provider can execute `action`
    fn supports(&self, action: Action) -> bool;

    /// Execute a request the provider declared support for
    async fn execute(&self, request: &ActionRequest, context: &ActionContext) -> MediaResult;
}
