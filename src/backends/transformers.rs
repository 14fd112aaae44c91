use async_trait::async_trait;
use std::sync::Arc;

use crate::action::{Action, ActionContext, ActionRequest};
use crate::error::MediaError;
use crate::inference::LocalInference;
use crate::provider::MediaProvider;
use crate::result::MediaResult;

const SUPPORTED: [Action; 3] = [Action::RemoveBackground, Action::Transcribe, Action::Upscale];

/// Offline model inference; needs no credentials but downloads models on
/// first use.
pub struct TransformersProvider {
    inference: Arc<LocalInference>,
}

impl TransformersProvider {
    pub fn new(inference: Arc<LocalInference>) -> Self {
        Self { inference }
    }
}

#[async_trait]
impl MediaProvider for TransformersProvider {
    fn name(&self) -> &str {
        "transformers"
    }

    fn supports(&self, action: Action) -> bool {
        SUPPORTED.contains(&action)
    }

    async fn execute(&self, request: &ActionRequest, context: &ActionContext) -> MediaResult {
        let result = match request {
            ActionRequest::RemoveBackground(options) => {
                self.inference.remove_background(self.name(), options, context).await
            }
            ActionRequest::Transcribe(options) => self.inference.transcribe(self.name(), options, context).await,
            ActionRequest::Upscale(options) => self.inference.upscale(self.name(), options, context).await,
            other => Err(MediaError::InvalidInput(format!(
                "Action '{}' not supported by transformers provider",
                other.action()
            ))),
        };
        result.unwrap_or_else(MediaResult::from)
    }
}
