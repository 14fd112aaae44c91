use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{info, warn};

use super::resolver::{resolve_provider, EnvLookup, ProcessEnv};
use super::ProviderRegistry;
use crate::action::{ActionContext, ActionRequest};
use crate::result::{ErrorCode, MediaResult};

/// Resolve a provider for `request` and run it, reading credentials from
/// the process environment.
///
/// Never fails: resolution misses, provider failures and panics all come
/// back as error envelopes.
pub async fn execute_action(
    registry: &ProviderRegistry,
    request: &ActionRequest,
    context: &ActionContext,
) -> MediaResult {
    execute_action_with_env(registry, request, context, &ProcessEnv).await
}

pub async fn execute_action_with_env(
    registry: &ProviderRegistry,
    request: &ActionRequest,
    context: &ActionContext,
    env: &dyn EnvLookup,
) -> MediaResult {
    let action = request.action();
    // an empty name is no choice at all
    let explicit = context.provider.as_deref().filter(|p| !p.is_empty());

    let resolved = std::panic::catch_unwind(AssertUnwindSafe(|| {
        resolve_provider(registry, action, explicit, env)
    }));

    let provider = match resolved {
        Ok(Some(provider)) => provider,
        Ok(None) => {
            return match explicit {
                Some(name) => {
                    warn!("Provider '{}' cannot run '{}'", name, action);
                    MediaResult::error(
                        ErrorCode::ProviderNotFound,
                        format!(
                            "Provider '{}' not found or does not support action '{}'",
                            name, action
                        ),
                    )
                }
                None => {
                    warn!("No provider available for '{}'", action);
                    MediaResult::error(
                        ErrorCode::NoProvider,
                        format!("No provider available for action '{}'", action),
                    )
                }
            };
        }
        Err(payload) => {
            return MediaResult::error(
                ErrorCode::UnknownError,
                format!("Provider resolution failed: {}", panic_message(payload.as_ref())),
            );
        }
    };

    info!("Executing '{}' with provider '{}'", action, provider.name());

    match AssertUnwindSafe(provider.execute(request, context))
        .catch_unwind()
        .await
    {
        Ok(result) => {
            if let Some(code) = result.error_code() {
                warn!("Provider '{}' failed '{}' with {:?}", provider.name(), action, code);
            }
            result
        }
        Err(payload) => {
            warn!("Provider '{}' panicked during '{}'", provider.name(), action);
            MediaResult::error(
                ErrorCode::UnknownError,
                format!(
                    "Provider '{}' failed unexpectedly: {}",
                    provider.name(),
                    panic_message(payload.as_ref())
                ),
            )
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown error".to_string()
    }
}
