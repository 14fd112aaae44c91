use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    first_string, prepare_output, require_credential, require_input, require_prompt, save_produced, single_image, video,
    RemoteApi,
};
use crate::action::{
    Action, ActionContext, ActionRequest, EditOptions, GenerateOptions, MediaType, RemoveBackgroundOptions,
    TranscribeOptions, VideoGenerateOptions,
};
use crate::error::{MediaError, Result};
use crate::fetch;
use crate::provider::{EnvLookup, MediaProvider};
use crate::result::{MediaResult, TranscriptionData, TranscriptionSegment};

pub const REPLICATE_API_TOKEN: &str = "REPLICATE_API_TOKEN";

const GENERATE_MODEL: &str = "black-forest-labs/flux-2-dev";
const EDIT_MODEL: &str = "black-forest-labs/flux-kontext-dev";
const REMOVE_BACKGROUND_MODEL: &str =
    "men1scus/birefnet:f74986db0355b58403ed20963af156525e2891ea3c2d499bfbfb2a28cd87c5d7";
const TRANSCRIBE_MODEL: &str =
    "thomasmol/whisper-diarization:1495a9cddc83b2203b0d8d3516e38b80fd1572ebc4bc5700ac1da56a9b3ed886";

const SUPPORTED: [Action; 5] = [
    Action::Generate,
    Action::Edit,
    Action::RemoveBackground,
    Action::Transcribe,
    Action::VideoGenerate,
];

/// Replicate predictions API. Requests ask the server to hold the
/// connection open; unfinished predictions are polled until they settle.
pub struct ReplicateProvider {
    api: RemoteApi,
    env: Arc<dyn EnvLookup>,
}

#[derive(Debug, Deserialize)]
struct DiarizedOutput {
    language: Option<String>,
    #[serde(default)]
    segments: Vec<DiarizedSegment>,
}

#[derive(Debug, Deserialize)]
struct DiarizedSegment {
    start: f64,
    end: f64,
    text: String,
    speaker: Option<String>,
}

impl ReplicateProvider {
    pub fn new(api: RemoteApi, env: Arc<dyn EnvLookup>) -> Self {
        Self { api, env }
    }

    async fn run(&self, request: &ActionRequest, context: &ActionContext) -> Result<MediaResult> {
        let token = require_credential(self.env.as_ref(), REPLICATE_API_TOKEN)?;
        let auth = format!("Bearer {}", token);

        match request {
            ActionRequest::Generate(options) => self.generate(options, context, &auth).await,
            ActionRequest::Edit(options) => self.edit(options, context, &auth).await,
            ActionRequest::RemoveBackground(options) => self.remove_background(options, context, &auth).await,
            ActionRequest::Transcribe(options) => self.transcribe(options, context, &auth).await,
            ActionRequest::VideoGenerate(options) => self.video_generate(options, context, &auth).await,
            other => Err(MediaError::InvalidInput(format!(
                "Action '{}' not supported by replicate provider",
                other.action()
            ))),
        }
    }

    /// Run a prediction to completion and return its `output`.
    async fn predict(&self, model: &str, input: Value, auth: &str) -> Result<Value> {
        info!("Starting Replicate prediction for {}", model);
        let (path, body) = prediction_request(model, input);
        let mut prediction = self
            .api
            .post_json(&self.api.url(&path), auth, &body, &[("Prefer", "wait")])
            .await?;

        let deadline = Instant::now() + self.api.timeout();
        loop {
            let status = prediction.get("status").and_then(Value::as_str).unwrap_or("starting");
            debug!("Prediction status: {}", status);
            match status {
                "succeeded" => {
                    return prediction
                        .get("output")
                        .filter(|o| !o.is_null())
                        .cloned()
                        .ok_or_else(|| MediaError::Provider("No output from Replicate prediction".to_string()));
                }
                "failed" | "canceled" => {
                    let reason = prediction
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("no error message");
                    return Err(MediaError::Provider(format!("Replicate prediction {}: {}", status, reason)));
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(MediaError::Provider(format!(
                    "Replicate prediction did not finish within {}s",
                    self.api.timeout().as_secs()
                )));
            }
            let poll_url = first_string(&prediction, &["/urls/get"])
                .ok_or_else(|| MediaError::Provider("Replicate prediction has no status URL".to_string()))?
                .to_string();
            tokio::time::sleep(self.api.poll_interval()).await;
            prediction = self.api.get_json(&poll_url, auth).await?;
        }
    }

    async fn generate(&self, options: &GenerateOptions, context: &ActionContext, auth: &str) -> Result<MediaResult> {
        require_prompt(&options.prompt, "image generation")?;
        let model = options.model.as_deref().unwrap_or(GENERATE_MODEL);
        let output = self.predict(model, generate_input(options), auth).await?;

        let url = output_url(&output).ok_or_else(|| MediaError::Provider("No image returned from Replicate".to_string()))?;
        let path = prepare_output(context, "webp", "generated", false).await?;
        let bytes = save_produced(self.api.client(), url, &path).await?;
        Ok(MediaResult::success(Action::Generate, "replicate", path, "image/webp", bytes))
    }

    async fn edit(&self, options: &EditOptions, context: &ActionContext, auth: &str) -> Result<MediaResult> {
        require_input(&options.input, "image editing")?;
        require_prompt(&options.prompt, "image editing")?;
        let image = fetch::remote_reference(self.api.client(), &options.input).await?;
        let model = options.model.as_deref().unwrap_or(EDIT_MODEL);
        let input = json!({
            "prompt": options.prompt,
            "input_image": image,
            "output_format": "webp",
        });
        let output = self.predict(model, input, auth).await?;

        let url = output_url(&output).ok_or_else(|| MediaError::Provider("No image returned from image editing".to_string()))?;
        let path = prepare_output(context, "webp", "edited", true).await?;
        let bytes = save_produced(self.api.client(), url, &path).await?;
        Ok(MediaResult::success(Action::Edit, "replicate", path, "image/webp", bytes))
    }

    async fn remove_background(
        &self,
        options: &RemoveBackgroundOptions,
        context: &ActionContext,
        auth: &str,
    ) -> Result<MediaResult> {
        require_input(&options.input, "background removal")?;
        let image = fetch::remote_reference(self.api.client(), &options.input).await?;
        let model = options.model.as_deref().unwrap_or(REMOVE_BACKGROUND_MODEL);
        let output = self.predict(model, json!({ "image": image }), auth).await?;

        let url = output_url(&output)
            .ok_or_else(|| MediaError::Provider("No image returned from background removal".to_string()))?;
        let path = prepare_output(context, "png", "nobg", true).await?;
        let bytes = save_produced(self.api.client(), url, &path).await?;
        Ok(MediaResult::success(Action::RemoveBackground, "replicate", path, "image/png", bytes))
    }

    async fn transcribe(&self, options: &TranscribeOptions, context: &ActionContext, auth: &str) -> Result<MediaResult> {
        require_input(&options.input, "transcription")?;
        let mut input = json!({});
        if options.input.is_url {
            input["file_url"] = json!(options.input.source);
        } else {
            let (bytes, _) = fetch::read_input(self.api.client(), &options.input).await?;
            input["file_string"] = json!(fetch::encode_base64(&bytes));
        }
        if let Some(n) = options.num_speakers {
            input["num_speakers"] = json!(n);
        }
        if let Some(language) = &options.language {
            input["language"] = json!(language);
        }

        let model = options.model.as_deref().unwrap_or(TRANSCRIBE_MODEL);
        let output = self.predict(model, input, auth).await?;
        let parsed: DiarizedOutput = serde_json::from_value(output)
            .map_err(|e| MediaError::Provider(format!("Unexpected Replicate transcription output: {}", e)))?;
        let transcription = into_transcription(parsed, options.language.as_deref());

        let path = prepare_output(context, "json", "transcription", true).await?;
        tokio::fs::write(&path, serde_json::to_string_pretty(&transcription)?).await?;
        Ok(MediaResult::transcription(MediaType::Audio, "replicate", path, transcription))
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
        let model = options.model.as_deref().unwrap_or(video::REPLICATE_VIDEO_MODEL);
        let output = self
            .predict(model, video::replicate_input(options, image.as_deref()), auth)
            .await?;

        let url = output_url(&output).ok_or_else(|| MediaError::Provider("No video returned from Replicate".to_string()))?;
        let path = prepare_output(context, "mp4", "generated", true).await?;
        let bytes = save_produced(self.api.client(), url, &path).await?;
        Ok(MediaResult::success(Action::VideoGenerate, "replicate", path, "video/mp4", bytes))
    }
}

fn generate_input(options: &GenerateOptions) -> Value {
    let mut input = json!({
        "prompt": options.prompt,
        "width": options.width.unwrap_or(1280),
        "height": options.height.unwrap_or(720),
        "num_outputs": single_image(options.count, "replicate"),
        "output_format": "webp",
    });
    if let Some(seed) = options.seed {
        input["seed"] = json!(seed);
    }
    input
}

/// Pinned `owner/name:version` ids go through `/predictions`; bare model
/// names use the model's own predictions route.
fn prediction_request(model: &str, input: Value) -> (String, Value) {
    match model.split_once(':') {
        Some((_, version)) => ("predictions".to_string(), json!({ "version": version, "input": input })),
        None => (format!("models/{}/predictions", model), json!({ "input": input })),
    }
}

/// Output is either a single URL or a list of them.
fn output_url(output: &Value) -> Option<&str> {
    match output {
        Value::String(url) => Some(url.as_str()),
        Value::Array(items) => items.first().and_then(Value::as_str),
        _ => None,
    }
    .filter(|url| !url.is_empty())
}

fn into_transcription(parsed: DiarizedOutput, requested_language: Option<&str>) -> TranscriptionData {
    let text = parsed
        .segments
        .iter()
        .map(|s| s.text.trim())
        .collect::<Vec<_>>()
        .join(" ");
    let language = parsed
        .language
        .filter(|l| !l.is_empty())
        .or_else(|| requested_language.map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());

    TranscriptionData {
        text,
        language,
        segments: parsed
            .segments
            .into_iter()
            .map(|s| TranscriptionSegment {
                start: s.start,
                end: s.end,
                text: s.text,
                speaker: s.speaker,
            })
            .collect(),
    }
}

#[async_trait]
impl MediaProvider for ReplicateProvider {
    fn name(&self) -> &str {
        "replicate"
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
