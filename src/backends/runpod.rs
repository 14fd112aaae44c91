use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{first_string, prepare_output, require_credential, require_input, require_prompt, save_produced, video, RemoteApi};
use crate::action::{Action, ActionContext, ActionRequest, EditOptions, GenerateOptions, VideoGenerateOptions};
use crate::error::{MediaError, Result};
use crate::fetch;
use crate::provider::{EnvLookup, MediaProvider};
use crate::result::MediaResult;

pub const RUNPOD_API_KEY: &str = "RUNPOD_API_KEY";

const GENERATE_MODEL: &str = "alibaba/wan-2.6";
const EDIT_MODEL: &str = "google/nano-banana-pro-edit";

const SUPPORTED: [Action; 3] = [Action::Generate, Action::Edit, Action::VideoGenerate];

/// Where produced media shows up in a job's `output`.
const MEDIA_POINTERS: &[&str] = &[
    "/output/image_url",
    "/output/video_url",
    "/output/result",
    "/output/images/0",
    "/output/0",
    "/output",
];

/// Runpod public endpoints, one per model (`<base>/<endpoint>/runsync`).
pub struct RunpodProvider {
    api: RemoteApi,
    env: Arc<dyn EnvLookup>,
}

impl RunpodProvider {
    pub fn new(api: RemoteApi, env: Arc<dyn EnvLookup>) -> Self {
        Self { api, env }
    }

    async fn run(&self, request: &ActionRequest, context: &ActionContext) -> Result<MediaResult> {
        let key = require_credential(self.env.as_ref(), RUNPOD_API_KEY)?;
        let auth = format!("Bearer {}", key);

        match request {
            ActionRequest::Generate(options) => self.generate(options, context, &auth).await,
            ActionRequest::Edit(options) => self.edit(options, context, &auth).await,
            ActionRequest::VideoGenerate(options) => self.video_generate(options, context, &auth).await,
            other => Err(MediaError::InvalidInput(format!(
                "Action '{}' not supported by runpod provider",
                other.action()
            ))),
        }
    }

    /// Submit a job and wait for it, returning the finished job document.
    async fn run_job(&self, model: &str, input: Value, auth: &str) -> Result<Value> {
        let endpoint = endpoint_id(model);
        info!("Submitting Runpod job to {}", endpoint);
        let mut job = self
            .api
            .post_json(
                &self.api.url(&format!("{}/runsync", endpoint)),
                auth,
                &json!({ "input": input }),
                &[],
            )
            .await?;

        let deadline = Instant::now() + self.api.timeout();
        loop {
            let status = job.get("status").and_then(Value::as_str).unwrap_or("IN_QUEUE").to_string();
            debug!("Runpod job status: {}", status);
            match status.as_str() {
                "COMPLETED" => return Ok(job),
                "FAILED" | "CANCELLED" | "TIMED_OUT" => {
                    let reason = job.get("error").map(Value::to_string).unwrap_or_default();
                    return Err(MediaError::Provider(format!("Runpod job {}: {}", status, reason)));
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(MediaError::Provider(format!(
                    "Runpod job did not finish within {}s",
                    self.api.timeout().as_secs()
                )));
            }
            let id = first_string(&job, &["/id"])
                .ok_or_else(|| MediaError::Provider("Runpod job has no id".to_string()))?
                .to_string();
            tokio::time::sleep(self.api.poll_interval()).await;
            job = self
                .api
                .get_json(&self.api.url(&format!("{}/status/{}", endpoint, id)), auth)
                .await?;
        }
    }

    async fn generate(&self, options: &GenerateOptions, context: &ActionContext, auth: &str) -> Result<MediaResult> {
        require_prompt(&options.prompt, "image generation")?;
        let model = options.model.as_deref().unwrap_or(GENERATE_MODEL);
        let mut input = json!({
            "prompt": options.prompt,
            "size": format!("{}*{}", options.width.unwrap_or(1280), options.height.unwrap_or(720)),
        });
        if let Some(seed) = options.seed {
            input["seed"] = json!(seed);
        }
        let job = self.run_job(model, input, auth).await?;

        let url = first_string(&job, MEDIA_POINTERS)
            .ok_or_else(|| MediaError::Provider("No image returned from Runpod".to_string()))?;
        let path = prepare_output(context, "png", "generated", false).await?;
        let bytes = save_produced(self.api.client(), url, &path).await?;
        Ok(MediaResult::success(Action::Generate, "runpod", path, "image/png", bytes))
    }

    async fn edit(&self, options: &EditOptions, context: &ActionContext, auth: &str) -> Result<MediaResult> {
        require_input(&options.input, "image editing")?;
        require_prompt(&options.prompt, "image editing")?;
        let image = fetch::remote_reference(self.api.client(), &options.input).await?;
        let model = options.model.as_deref().unwrap_or(EDIT_MODEL);
        let input = json!({
            "prompt": options.prompt,
            "images": [image],
        });
        let job = self.run_job(model, input, auth).await?;

        let url = first_string(&job, MEDIA_POINTERS)
            .ok_or_else(|| MediaError::Provider("No image returned from image editing".to_string()))?;
        let path = prepare_output(context, "png", "edited", true).await?;
        let bytes = save_produced(self.api.client(), url, &path).await?;
        Ok(MediaResult::success(Action::Edit, "runpod", path, "image/png", bytes))
    }

    async fn video_generate(
        &self,
        options: &VideoGenerateOptions,
        context: &ActionContext,
        auth: &str,
    ) -> Result<MediaResult> {
        video::validate(options)?;
        let image = match &options.input {
            Some(input) => Some(fetch::remote_reference(self.api.client(), input).await?),
            None => None,
        };
        let (model, input) = video::runpod_request(options, image.as_deref());
        let job = self.run_job(&model, input, auth).await?;

        let url = first_string(&job, MEDIA_POINTERS)
            .ok_or_else(|| MediaError::Provider("No video returned from Runpod".to_string()))?;
        let path = prepare_output(context, "mp4", "generated", true).await?;
        let bytes = save_produced(self.api.client(), url, &path).await?;
        Ok(MediaResult::success(Action::VideoGenerate, "runpod", path, "video/mp4", bytes))
    }
}

/// Public endpoint id for a model: `alibaba/wan-2.6` -> `alibaba-wan-2-6`.
fn endpoint_id(model: &str) -> String {
    model.to_lowercase().replace(['/', '.', '_'], "-")
}

#[async_trait]
impl MediaProvider for RunpodProvider {
    fn name(&self) -> &str {
        "runpod"
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
