use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

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

pub const FAL_API_KEY: &str = "FAL_API_KEY";

const GENERATE_MODEL: &str = "fal-ai/flux/schnell";
const EDIT_MODEL: &str = "fal-ai/flux-2/edit";
const REMOVE_BACKGROUND_MODEL: &str = "fal-ai/birefnet/v2";
const TRANSCRIBE_MODEL: &str = "fal-ai/wizper";
const DIARIZE_MODEL: &str = "fal-ai/whisper";

const SUPPORTED: [Action; 5] = [
    Action::Generate,
    Action::Edit,
    Action::RemoveBackground,
    Action::Transcribe,
    Action::VideoGenerate,
];

/// fal.ai synchronous model endpoints (`<base>/<model id>`).
pub struct FalProvider {
    api: RemoteApi,
    env: Arc<dyn EnvLookup>,
}

#[derive(Debug, Deserialize)]
struct FalTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    chunks: Vec<FalChunk>,
    #[serde(default)]
    inferred_languages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FalChunk {
    timestamp: (Option<f64>, Option<f64>),
    text: String,
    speaker: Option<String>,
}

impl FalProvider {
    pub fn new(api: RemoteApi, env: Arc<dyn EnvLookup>) -> Self {
        Self { api, env }
    }

    async fn run(&self, request: &ActionRequest, context: &ActionContext) -> Result<MediaResult> {
        let key = require_credential(self.env.as_ref(), FAL_API_KEY)?;
        let auth = format!("Key {}", key);

        match request {
            ActionRequest::Generate(options) => self.generate(options, context, &auth).await,
            ActionRequest::Edit(options) => self.edit(options, context, &auth).await,
            ActionRequest::RemoveBackground(options) => self.remove_background(options, context, &auth).await,
            ActionRequest::Transcribe(options) => self.transcribe(options, context, &auth).await,
            ActionRequest::VideoGenerate(options) => self.video_generate(options, context, &auth).await,
            other => Err(MediaError::InvalidInput(format!(
                "Action '{}' not supported by fal provider",
                other.action()
            ))),
        }
    }

    async fn call(&self, model: &str, auth: &str, body: &Value) -> Result<Value> {
        info!("Calling fal model {}", model);
        self.api.post_json(&self.api.url(model), auth, body, &[]).await
    }

    async fn generate(&self, options: &GenerateOptions, context: &ActionContext, auth: &str) -> Result<MediaResult> {
        require_prompt(&options.prompt, "image generation")?;
        let model = options.model.as_deref().unwrap_or(GENERATE_MODEL);
        let response = self.call(model, auth, &generate_body(options)).await?;

        let url = first_string(&response, &["/images/0/url", "/image/url"])
            .ok_or_else(|| MediaError::Provider("No image returned from fal".to_string()))?;
        let path = prepare_output(context, "png", "generated", false).await?;
        let bytes = save_produced(self.api.client(), url, &path).await?;
        Ok(MediaResult::success(Action::Generate, "fal", path, "image/png", bytes))
    }

    async fn edit(&self, options: &EditOptions, context: &ActionContext, auth: &str) -> Result<MediaResult> {
        require_input(&options.input, "image editing")?;
        require_prompt(&options.prompt, "image editing")?;
        let image = fetch::remote_reference(self.api.client(), &options.input).await?;
        let model = options.model.as_deref().unwrap_or(EDIT_MODEL);
        let body = json!({
            "prompt": options.prompt,
            "image_urls": [image],
        });
        let response = self.call(model, auth, &body).await?;

        let url = first_string(&response, &["/images/0/url", "/image/url"])
            .ok_or_else(|| MediaError::Provider("No image returned from image editing".to_string()))?;
        let path = prepare_output(context, "png", "edited", true).await?;
        let bytes = save_produced(self.api.client(), url, &path).await?;
        Ok(MediaResult::success(Action::Edit, "fal", path, "image/png", bytes))
    }

    async fn remove_background(
        &self,
        options: &RemoveBackgroundOptions,
        context: &ActionContext,
        auth: &str,
    ) -> Result<MediaResult> {
        require_input(&options.input, "background removal")?;
        let image = fetch::remote_reference(self.api.client(), &options.input).await?;
        let body = json!({
            "image_url": image,
            "model": "General Use (Light)",
            "output_format": "png",
            "refine_foreground": true,
        });
        let model = options.model.as_deref().unwrap_or(REMOVE_BACKGROUND_MODEL);
        let response = self.call(model, auth, &body).await?;

        let url = first_string(&response, &["/image/url"])
            .ok_or_else(|| MediaError::Provider("No image returned from background removal".to_string()))?;
        let path = prepare_output(context, "png", "nobg", true).await?;
        let bytes = save_produced(self.api.client(), url, &path).await?;
        Ok(MediaResult::success(Action::RemoveBackground, "fal", path, "image/png", bytes))
    }

    async fn transcribe(&self, options: &TranscribeOptions, context: &ActionContext, auth: &str) -> Result<MediaResult> {
        require_input(&options.input, "transcription")?;
        let audio = fetch::remote_reference(self.api.client(), &options.input).await?;
        let (model, body) = transcribe_request(options, &audio);
        let response = self.call(&model, auth, &body).await?;

        let parsed: FalTranscription = serde_json::from_value(response)
            .map_err(|e| MediaError::Provider(format!("Unexpected fal transcription output: {}", e)))?;
        let transcription = into_transcription(parsed, options.language.as_deref());

        let path = prepare_output(context, "json", "transcription", true).await?;
        tokio::fs::write(&path, serde_json::to_string_pretty(&transcription)?).await?;
        Ok(MediaResult::transcription(MediaType::Audio, "fal", path, transcription))
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
        let (endpoint, body) = video::fal_request(options, image.as_deref());
        let response = self.call(&endpoint, auth, &body).await?;

        let url = first_string(&response, &["/video/url"])
            .ok_or_else(|| MediaError::Provider("No video returned from fal".to_string()))?;
        let path = prepare_output(context, "mp4", "generated", true).await?;
        let bytes = save_produced(self.api.client(), url, &path).await?;
        Ok(MediaResult::success(Action::VideoGenerate, "fal", path, "video/mp4", bytes))
    }
}

fn generate_body(options: &GenerateOptions) -> Value {
    let mut body = json!({
        "prompt": options.prompt,
        "image_size": {
            "width": options.width.unwrap_or(1024),
            "height": options.height.unwrap_or(1024),
        },
        "num_images": single_image(options.count, "fal"),
    });
    if let Some(seed) = options.seed {
        body["seed"] = json!(seed);
    }
    body
}

/// Wizper unless speakers are wanted; only Whisper diarizes.
fn transcribe_request(options: &TranscribeOptions, audio: &str) -> (String, Value) {
    let mut body = json!({
        "audio_url": audio,
        "chunk_level": "segment",
    });
    if options.diarize {
        body["diarize"] = json!(true);
        if let Some(n) = options.num_speakers {
            body["num_speakers"] = json!(n);
        }
    }
    if let Some(language) = &options.language {
        body["language"] = json!(language);
    }

    let model = match (&options.model, options.diarize) {
        (Some(model), _) => model.clone(),
        (None, true) => DIARIZE_MODEL.to_string(),
        (None, false) => TRANSCRIBE_MODEL.to_string(),
    };
    (model, body)
}

fn into_transcription(parsed: FalTranscription, requested_language: Option<&str>) -> TranscriptionData {
    let language = parsed
        .inferred_languages
        .into_iter()
        .next()
        .or_else(|| requested_language.map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());

    TranscriptionData {
        text: parsed.text,
        language,
        segments: parsed
            .chunks
            .into_iter()
            .map(|chunk| TranscriptionSegment {
                start: chunk.timestamp.0.unwrap_or(0.0),
                end: chunk.timestamp.1.unwrap_or(0.0),
                text: chunk.text,
                speaker: chunk.speaker,
            })
            .collect(),
    }
}

#[async_trait]
impl MediaProvider for FalProvider {
    fn name(&self) -> &str {
        "fal"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::MediaInput;
    use crate::config::Config;
    use crate::result::ErrorCode;
    use std::collections::HashMap;

    fn provider(env: HashMap<String, String>) -> FalProvider {
        let api = RemoteApi::new("Fal", Config::default().providers.fal).unwrap();
        FalProvider::new(api, Arc::new(env))
    }

    fn transcribe_options(diarize: bool) -> TranscribeOptions {
        TranscribeOptions {
            input: MediaInput::from_raw("https://cdn.example/talk.mp3"),
            diarize,
            language: Some("en".to_string()),
            num_speakers: Some(2),
            model: None,
        }
    }

    #[tokio::test]
    async fn test_missing_key_is_api_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = ActionRequest::Generate(GenerateOptions {
            prompt: "a red fox".to_string(),
            width: None,
            height: None,
            count: 1,
            model: None,
            seed: None,
        });
        let result = provider(HashMap::new()).execute(&request, &ActionContext::new(dir.path())).await;
        assert_eq!(result.error_code(), Some(ErrorCode::ApiError));
        assert!(result.to_json_pretty().contains("FAL_API_KEY environment variable is not set"));
    }

    #[tokio::test]
    async fn test_unsupported_action_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let env = HashMap::from([(FAL_API_KEY.to_string(), "k".to_string())]);
        let request = ActionRequest::Upscale(crate::action::UpscaleOptions {
            input: MediaInput::from_raw("a.png"),
            scale: None,
            model: None,
        });
        let result = provider(env).execute(&request, &ActionContext::new(dir.path())).await;
        assert_eq!(result.error_code(), Some(ErrorCode::InvalidInput));
    }

    #[test]
    fn test_capabilities() {
        let fal = provider(HashMap::new());
        assert!(fal.supports(Action::VideoGenerate));
        assert!(!fal.supports(Action::Resize));
        assert!(!fal.supports(Action::Upscale));
    }

    #[test]
    fn test_transcribe_model_follows_diarize() {
        let (model, body) = transcribe_request(&transcribe_options(false), "https://cdn.example/talk.mp3");
        assert_eq!(model, TRANSCRIBE_MODEL);
        assert!(body.get("num_speakers").is_none());

        let (model, body) = transcribe_request(&transcribe_options(true), "https://cdn.example/talk.mp3");
        assert_eq!(model, DIARIZE_MODEL);
        assert_eq!(body["num_speakers"], 2);
        assert_eq!(body["language"], "en");
    }

    #[test]
    fn test_generate_body_defaults() {
        let body = generate_body(&GenerateOptions {
            prompt: "a red fox".to_string(),
            width: None,
            height: Some(768),
            count: 1,
            model: None,
            seed: Some(7),
        });
        assert_eq!(body["image_size"]["width"], 1024);
        assert_eq!(body["image_size"]["height"], 768);
        assert_eq!(body["seed"], 7);
        assert_eq!(body["num_images"], 1);
    }

    #[test]
    fn test_generate_body_requests_one_image() {
        let body = generate_body(&GenerateOptions {
            prompt: "a red fox".to_string(),
            width: None,
            height: None,
            count: 4,
            model: None,
            seed: None,
        });
        assert_eq!(body["num_images"], 1);
    }

    #[test]
    fn test_transcription_mapping() {
        let parsed: FalTranscription = serde_json::from_value(json!({
            "text": "hi there",
            "chunks": [
                {"timestamp": [0.0, 1.0], "text": "hi", "speaker": "SPEAKER_00"},
                {"timestamp": [1.0, null], "text": "there"}
            ],
            "inferred_languages": ["en"]
        }))
        .unwrap();
        let data = into_transcription(parsed, Some("de"));
        assert_eq!(data.language, "en");
        assert_eq!(data.segments[0].speaker.as_deref(), Some("SPEAKER_00"));
        assert_eq!(data.segments[1].end, 0.0);
    }
}
