use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{
    first_string, prepare_output, require_credential, require_input, require_prompt, save_produced, single_image,
    RemoteApi,
};
use crate::action::{Action, ActionContext, ActionRequest, EditOptions, GenerateOptions};
use crate::error::{MediaError, Result};
use crate::fetch;
use crate::provider::{EnvLookup, MediaProvider};
use crate::result::MediaResult;

pub const AI_GATEWAY_API_KEY: &str = "AI_GATEWAY_API_KEY";

const GENERATE_MODEL: &str = "bfl/flux-2-pro";
const EDIT_MODEL: &str = "google/gemini-3-pro-image";

const SUPPORTED: [Action; 2] = [Action::Generate, Action::Edit];

/// AI Gateway's OpenAI-compatible surface: image models through
/// `images/generations`, multimodal editing through `chat/completions`.
pub struct AiGatewayProvider {
    api: RemoteApi,
    env: Arc<dyn EnvLookup>,
}

impl AiGatewayProvider {
    pub fn new(api: RemoteApi, env: Arc<dyn EnvLookup>) -> Self {
        Self { api, env }
    }

    async fn run(&self, request: &ActionRequest, context: &ActionContext) -> Result<MediaResult> {
        let key = require_credential(self.env.as_ref(), AI_GATEWAY_API_KEY)?;
        let auth = format!("Bearer {}", key);

        match request {
            ActionRequest::Generate(options) => self.generate(options, context, &auth).await,
            ActionRequest::Edit(options) => self.edit(options, context, &auth).await,
            other => Err(MediaError::InvalidInput(format!(
                "Action '{}' not supported by ai-gateway provider",
                other.action()
            ))),
        }
    }

    async fn generate(&self, options: &GenerateOptions, context: &ActionContext, auth: &str) -> Result<MediaResult> {
        require_prompt(&options.prompt, "image generation")?;
        let body = generate_body(options);
        info!("Generating image with {}", body["model"]);
        let response = self
            .api
            .post_json(&self.api.url("images/generations"), auth, &body, &[])
            .await?;

        let image = generated_image(&response)
            .ok_or_else(|| MediaError::Provider("No image was generated".to_string()))?;
        let path = prepare_output(context, "png", "generated", false).await?;
        let bytes = save_produced(self.api.client(), &image, &path).await?;
        Ok(MediaResult::success(Action::Generate, "ai-gateway", path, "image/png", bytes))
    }

    async fn edit(&self, options: &EditOptions, context: &ActionContext, auth: &str) -> Result<MediaResult> {
        require_input(&options.input, "image editing")?;
        require_prompt(&options.prompt, "image editing")?;
        let image = fetch::remote_reference(self.api.client(), &options.input).await?;
        let body = edit_body(options, &image);
        let response = self
            .api
            .post_json(&self.api.url("chat/completions"), auth, &body, &[])
            .await?;

        let edited = first_string(
            &response,
            &[
                "/choices/0/message/images/0/image_url/url",
                "/choices/0/message/images/0/url",
            ],
        )
        .ok_or_else(|| MediaError::Provider("No image was generated by the model".to_string()))?;
        let path = prepare_output(context, "png", "edited", true).await?;
        let bytes = save_produced(self.api.client(), edited, &path).await?;
        Ok(MediaResult::success(Action::Edit, "ai-gateway", path, "image/png", bytes))
    }
}

fn generate_body(options: &GenerateOptions) -> Value {
    let width = options.width.unwrap_or(1280);
    let height = options.height.unwrap_or(720);
    let mut body = json!({
        "model": options.model.as_deref().unwrap_or(GENERATE_MODEL),
        "prompt": options.prompt,
        "n": single_image(options.count, "ai-gateway"),
        "size": format!("{}x{}", width, height),
        "response_format": "b64_json",
    });
    if let Some(seed) = options.seed {
        body["seed"] = json!(seed);
    }
    body
}

fn edit_body(options: &EditOptions, image: &str) -> Value {
    json!({
        "model": options.model.as_deref().unwrap_or(EDIT_MODEL),
        "modalities": ["image", "text"],
        "messages": [{
            "role": "user",
            "content": [
                { "type": "image_url", "image_url": { "url": image } },
                { "type": "text", "text": options.prompt },
            ],
        }],
    })
}

/// Inline base64 comes back as a data URI; hosted results as their URL.
fn generated_image(response: &Value) -> Option<String> {
    if let Some(b64) = first_string(response, &["/data/0/b64_json"]) {
        return Some(format!("data:image/png;base64,{}", b64));
    }
    first_string(response, &["/data/0/url"]).map(str::to_string)
}

#[async_trait]
impl MediaProvider for AiGatewayProvider {
    fn name(&self) -> &str {
        "ai-gateway"
    }

    fn supports(&self, action: Action) -> bool {
        SUPPORTED.contains(&action)
    }

    async fn execute(&self, request: &ActionRequest, context: &ActionContext) -> MediaResult {
        match self.run(request, context).await {
            Ok(result) => result,
            Err(e) => e.into(),
        }
    }
}
