// Local model inference shared by the `local` and `transformers` providers
//
// - cache: load-once store of prepared models keyed by (task, model id)
// - command: default runtime driving installed command-line model runners

pub mod cache;
pub mod command;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub use cache::PipelineCache;
pub use command::CommandRuntime;

use crate::action::{Action, ActionContext, MediaType, RemoveBackgroundOptions, TranscribeOptions, UpscaleOptions};
use crate::error::{MediaError, Result};
use crate::fetch;
use crate::output::{ensure_output_dir, output_path, resolve_output_filename};
use crate::result::{MediaResult, TranscriptionData, TranscriptionSegment};

pub const DEFAULT_BACKGROUND_MODEL: &str = "Xenova/modnet";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "onnx-community/moonshine-base-ONNX";
pub const DEFAULT_UPSCALE_MODEL: &str = "Xenova/swin2SR-compressed-sr-x4-48";

const BACKGROUND_ALIASES: &[(&str, &str)] = &[
    ("modnet", "Xenova/modnet"),
    ("rmbg-2.0", "briaai/RMBG-2.0"),
    ("rmbg-1.4", "briaai/RMBG-1.4"),
];

const TRANSCRIPTION_ALIASES: &[(&str, &str)] = &[
    ("moonshine-tiny", "onnx-community/moonshine-tiny-ONNX"),
    ("moonshine-base", "onnx-community/moonshine-base-ONNX"),
    ("whisper-tiny", "Xenova/whisper-tiny"),
    ("whisper-base", "Xenova/whisper-base"),
    ("whisper-small", "Xenova/whisper-small"),
    ("whisper-medium", "Xenova/whisper-medium"),
    ("whisper-large-v3-turbo", "onnx-community/whisper-large-v3-turbo"),
    ("distil-whisper", "distil-whisper/distil-large-v3.5-ONNX"),
];

const UPSCALE_ALIASES: &[(&str, &str)] = &[("swin2sr", "Xenova/swin2SR-compressed-sr-x4-48")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferenceTask {
    BackgroundRemoval,
    SpeechRecognition,
    SuperResolution,
}

impl InferenceTask {
    fn default_model(&self) -> &'static str {
        match self {
            InferenceTask::BackgroundRemoval => DEFAULT_BACKGROUND_MODEL,
            InferenceTask::SpeechRecognition => DEFAULT_TRANSCRIPTION_MODEL,
            InferenceTask::SuperResolution => DEFAULT_UPSCALE_MODEL,
        }
    }

    fn aliases(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            InferenceTask::BackgroundRemoval => BACKGROUND_ALIASES,
            InferenceTask::SpeechRecognition => TRANSCRIPTION_ALIASES,
            InferenceTask::SuperResolution => UPSCALE_ALIASES,
        }
    }
}

/// Map a user-facing model name to a model id. Aliases are matched
/// case-insensitively; anything else is used as given.
pub fn resolve_model_id(task: InferenceTask, requested: Option<&str>) -> String {
    let Some(requested) = requested.map(str::trim).filter(|m| !m.is_empty()) else {
        return task.default_model().to_string();
    };
    let lower = requested.to_lowercase();
    task.aliases()
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, id)| id.to_string())
        .unwrap_or_else(|| requested.to_string())
}

/// A model prepared by a runtime and ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModel {
    pub task: InferenceTask,
    pub model_id: String,
    /// Runtime-specific handle (the executable for command runtimes)
    pub runtime: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsrChunk {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsrOutput {
    pub text: String,
    pub language: Option<String>,
    pub chunks: Vec<AsrChunk>,
}

#[async_trait]
pub trait InferenceRuntime: Send + Sync {
    /// Prepare a model; expensive, called at most once per (task, model id)
    async fn load(&self, task: InferenceTask, model_id: &str) -> Result<LoadedModel>;

    /// Write a PNG with the background made transparent
    async fn remove_background(&self, model: &LoadedModel, input: &Path, output: &Path) -> Result<()>;

    /// Write an upscaled PNG
    async fn upscale(&self, model: &LoadedModel, input: &Path, output: &Path) -> Result<()>;

    async fn transcribe(&self, model: &LoadedModel, input: &Path, language: Option<&str>) -> Result<AsrOutput>;
}

/// Runs inference actions and packages their outputs as result envelopes.
pub struct LocalInference {
    runtime: Arc<dyn InferenceRuntime>,
    cache: PipelineCache<(InferenceTask, String), LoadedModel>,
    client: reqwest::Client,
}

impl LocalInference {
    pub fn new(runtime: Arc<dyn InferenceRuntime>, client: reqwest::Client) -> Self {
        Self {
            runtime,
            cache: PipelineCache::new(),
            client,
        }
    }

    async fn model(&self, task: InferenceTask, model_id: &str) -> Result<LoadedModel> {
        let runtime = self.runtime.clone();
        let id = model_id.to_string();
        self.cache
            .get_or_try_load((task, model_id.to_string()), move || async move {
                runtime.load(task, &id).await
            })
            .await
    }

    /// Number of models loaded so far
    pub fn loaded_models(&self) -> usize {
        self.cache.loaded_count()
    }

    pub async fn remove_background(
        &self,
        provider: &str,
        options: &RemoveBackgroundOptions,
        context: &ActionContext,
    ) -> Result<MediaResult> {
        if options.input.source.is_empty() {
            return Err(MediaError::InvalidInput(
                "Input source is required for background removal".to_string(),
            ));
        }
        let model_id = resolve_model_id(InferenceTask::BackgroundRemoval, options.model.as_deref());
        let input = fetch::materialize(&self.client, &options.input).await?;

        let run = async {
            let model = self.model(InferenceTask::BackgroundRemoval, &model_id).await?;
            ensure_output_dir(&context.output_dir).await?;
            let filename = resolve_output_filename(
                "png",
                "nobg",
                context.output_name.as_deref(),
                context.input_source.as_deref(),
            );
            let path = output_path(&context.output_dir, &filename);
            self.runtime.remove_background(&model, input.path(), &path).await?;
            Ok::<_, MediaError>(path)
        };
        let path = run.await.map_err(|e| classify_error(e, &model_id, false))?;
        let bytes = written_size(&path).await?;

        info!("Background removed with {} -> {}", model_id, path.display());
        Ok(MediaResult::success(Action::RemoveBackground, provider, path, "image/png", bytes))
    }

    pub async fn upscale(&self, provider: &str, options: &UpscaleOptions, context: &ActionContext) -> Result<MediaResult> {
        if options.input.source.is_empty() {
            return Err(MediaError::InvalidInput("Input source is required for upscaling".to_string()));
        }
        if let Some(scale) = options.scale.filter(|s| *s != 4) {
            warn!("Requested scale {} ignored; the upscale model always produces 4x", scale);
        }
        let model_id = resolve_model_id(InferenceTask::SuperResolution, options.model.as_deref());
        let input = fetch::materialize(&self.client, &options.input).await?;

        let run = async {
            let model = self.model(InferenceTask::SuperResolution, &model_id).await?;
            ensure_output_dir(&context.output_dir).await?;
            let filename = resolve_output_filename(
                "png",
                "upscaled",
                context.output_name.as_deref(),
                context.input_source.as_deref(),
            );
            let path = output_path(&context.output_dir, &filename);
            self.runtime.upscale(&model, input.path(), &path).await?;
            Ok::<_, MediaError>(path)
        };
        let path = run.await.map_err(|e| classify_error(e, &model_id, false))?;
        let bytes = written_size(&path).await?;

        Ok(MediaResult::success(Action::Upscale, provider, path, "image/png", bytes))
    }

    /// Transcribe audio (or a video's audio track) and save the transcript as JSON.
    pub async fn transcribe(
        &self,
        provider: &str,
        options: &TranscribeOptions,
        context: &ActionContext,
    ) -> Result<MediaResult> {
        if options.input.source.is_empty() {
            return Err(MediaError::InvalidInput(
                "Input source is required for transcription".to_string(),
            ));
        }
        if options.diarize {
            return Err(MediaError::InvalidInput(format!(
                "Diarization (speaker identification) is not supported by the {} provider. \
                 Use --provider fal or --provider replicate for diarization support.",
                provider
            )));
        }
        let model_id = resolve_model_id(InferenceTask::SpeechRecognition, options.model.as_deref());
        let input = fetch::materialize(&self.client, &options.input).await?;

        let run = async {
            let model = self.model(InferenceTask::SpeechRecognition, &model_id).await?;
            self.runtime
                .transcribe(&model, input.path(), options.language.as_deref())
                .await
        };
        let output = run.await.map_err(|e| classify_error(e, &model_id, true))?;

        let transcription = build_transcription(output, options.language.as_deref());

        ensure_output_dir(&context.output_dir).await?;
        let filename = resolve_output_filename(
            "json",
            "transcription",
            context.output_name.as_deref(),
            context.input_source.as_deref(),
        );
        let path = output_path(&context.output_dir, &filename);
        tokio::fs::write(&path, serde_json::to_string_pretty(&transcription)?).await?;

        Ok(MediaResult::transcription(MediaType::Audio, provider, path, transcription))
    }
}

/// Language falls back from the request to the detected one to "auto"; a
/// result without timing chunks becomes one untimed segment.
pub fn build_transcription(output: AsrOutput, requested_language: Option<&str>) -> TranscriptionData {
    let text = output.text.trim().to_string();
    let language = requested_language
        .map(str::to_string)
        .or(output.language)
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "auto".to_string());

    let segments = if output.chunks.is_empty() {
        vec![TranscriptionSegment {
            start: 0.0,
            end: 0.0,
            text: text.clone(),
            speaker: None,
        }]
    } else {
        output
            .chunks
            .into_iter()
            .map(|chunk| TranscriptionSegment {
                start: chunk.start,
                end: chunk.end,
                text: chunk.text.trim().to_string(),
                speaker: None,
            })
            .collect()
    };

    TranscriptionData {
        text,
        language,
        segments,
    }
}

/// Re-label runtime failures: model download problems become network
/// errors and, for audio, decode problems become format errors.
fn classify_error(err: MediaError, model_id: &str, audio: bool) -> MediaError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("fetch") || lower.contains("network") {
        return MediaError::Network(format!(
            "Failed to download model {}. Ensure you have internet connectivity. Models are cached after first download.",
            model_id
        ));
    }
    if audio && (lower.contains("audio") || lower.contains("decode") || lower.contains("format")) {
        return MediaError::InvalidFormat(format!(
            "Failed to process audio file. Supported formats: mp3, wav, mp4, m4a, webm, ogg. Error: {}",
            message
        ));
    }
    match err {
        MediaError::Inference(msg) => MediaError::Provider(msg),
        other => other,
    }
}

async fn written_size(path: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path).await.map_err(|_| {
        MediaError::Provider(format!("Inference produced no output at {}", path.display()))
    })?;
    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::MediaInput;
    use crate::result::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeRuntime {
        loads: AtomicUsize,
        fail_load: Option<String>,
    }

    #[async_trait]
    impl InferenceRuntime for FakeRuntime {
        async fn load(&self, task: InferenceTask, model_id: &str) -> Result<LoadedModel> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(msg) = &self.fail_load {
                return Err(MediaError::Inference(msg.clone()));
            }
            Ok(LoadedModel {
                task,
                model_id: model_id.to_string(),
                runtime: "fake".to_string(),
            })
        }

        async fn remove_background(&self, _model: &LoadedModel, _input: &Path, output: &Path) -> Result<()> {
            tokio::fs::write(output, b"\x89PNG fake").await?;
            Ok(())
        }

        async fn upscale(&self, _model: &LoadedModel, _input: &Path, output: &Path) -> Result<()> {
            tokio::fs::write(output, b"\x89PNG bigger").await?;
            Ok(())
        }

        async fn transcribe(&self, _model: &LoadedModel, _input: &Path, _language: Option<&str>) -> Result<AsrOutput> {
            Ok(AsrOutput {
                text: " hello there ".to_string(),
                language: Some("en".to_string()),
                chunks: vec![AsrChunk {
                    start: 0.0,
                    end: 1.5,
                    text: " hello there".to_string(),
                }],
            })
        }
    }

    fn fixture(dir: &Path, name: &str) -> MediaInput {
        let path = dir.join(name);
        std::fs::write(&path, b"data").unwrap();
        MediaInput::from_raw(path.to_string_lossy())
    }

    #[test]
    fn test_model_aliases() {
        assert_eq!(resolve_model_id(InferenceTask::BackgroundRemoval, None), "Xenova/modnet");
        assert_eq!(resolve_model_id(InferenceTask::BackgroundRemoval, Some("RMBG-2.0")), "briaai/RMBG-2.0");
        assert_eq!(
            resolve_model_id(InferenceTask::SpeechRecognition, Some("whisper-small")),
            "Xenova/whisper-small"
        );
        assert_eq!(resolve_model_id(InferenceTask::SuperResolution, Some("custom/model")), "custom/model");
    }

    #[test]
    fn test_transcription_fallbacks() {
        let untimed = build_transcription(
            AsrOutput {
                text: " just text ".to_string(),
                ..Default::default()
            },
            None,
        );
        assert_eq!(untimed.language, "auto");
        assert_eq!(untimed.segments.len(), 1);
        assert_eq!(untimed.segments[0].text, "just text");

        let detected = build_transcription(
            AsrOutput {
                text: "hola".to_string(),
                language: Some("es".to_string()),
                chunks: vec![],
            },
            Some("fr"),
        );
        assert_eq!(detected.language, "fr");
    }

    #[test]
    fn test_error_classification() {
        let net = classify_error(MediaError::Inference("fetch failed".to_string()), "Xenova/modnet", false);
        assert_eq!(net.code(), ErrorCode::NetworkError);
        assert!(net.to_string().contains("Xenova/modnet"));

        let decode = classify_error(MediaError::Inference("cannot decode stream".to_string()), "m", true);
        assert_eq!(decode.code(), ErrorCode::InvalidFormat);

        let other = classify_error(MediaError::Inference("cannot decode stream".to_string()), "m", false);
        assert_eq!(other.code(), ErrorCode::ProviderError);
    }

    #[tokio::test]
    async fn test_models_load_once_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::default());
        let inference = LocalInference::new(runtime.clone(), reqwest::Client::new());
        let context = ActionContext::new(dir.path().join("out"));

        for _ in 0..3 {
            let options = RemoveBackgroundOptions {
                input: fixture(dir.path(), "cat.png"),
                model: Some("modnet".to_string()),
            };
            let result = inference.remove_background("transformers", &options, &context).await.unwrap();
            assert_eq!(result.provider(), Some("transformers"));
        }
        assert_eq!(runtime.loads.load(Ordering::SeqCst), 1);
        assert_eq!(inference.loaded_models(), 1);
    }

    #[tokio::test]
    async fn test_transcribe_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let inference = LocalInference::new(Arc::new(FakeRuntime::default()), reqwest::Client::new());
        let input = fixture(dir.path(), "talk.wav");
        let context = ActionContext::new(dir.path()).with_input_source(Some(input.source.clone()));
        let options = TranscribeOptions {
            input,
            diarize: false,
            language: None,
            num_speakers: None,
            model: None,
        };

        let result = inference.transcribe("local", &options, &context).await.unwrap();
        let path = result.output_path().unwrap().to_path_buf();
        assert!(path.ends_with("talk_transcription.json"));
        let saved: TranscriptionData = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.text, "hello there");
        assert_eq!(saved.language, "en");
    }

    #[tokio::test]
    async fn test_diarize_rejected_and_failed_load_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime {
            fail_load: Some("network unreachable".to_string()),
            ..Default::default()
        });
        let inference = LocalInference::new(runtime.clone(), reqwest::Client::new());
        let context = ActionContext::new(dir.path());
        let mut options = TranscribeOptions {
            input: fixture(dir.path(), "talk.wav"),
            diarize: true,
            language: None,
            num_speakers: None,
            model: None,
        };

        let err = inference.transcribe("local", &options, &context).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);

        options.diarize = false;
        for _ in 0..2 {
            let err = inference.transcribe("local", &options, &context).await.unwrap_err();
            assert_eq!(err.code(), ErrorCode::NetworkError);
        }
        assert_eq!(runtime.loads.load(Ordering::SeqCst), 2);
    }
}
