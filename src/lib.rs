//! agent-media - media actions for agents
//!
//! Image, audio and video actions dispatched to local processing or hosted
//! providers, each returning a single JSON result envelope.

pub mod action;
pub mod backends;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod imaging;
pub mod inference;
pub mod media;
pub mod output;
pub mod provider;
pub mod result;

pub use action::{Action, ActionContext, ActionRequest, MediaInput, MediaType};
pub use backends::register_all_providers;
pub use error::{MediaError, Result};
pub use provider::{execute_action, MediaProvider, ProviderRegistry};
pub use result::{ErrorCode, MediaResult};
