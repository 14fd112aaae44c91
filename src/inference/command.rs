// Command-line inference runtime
//
// Drives locally installed model runners:
// - background removal: rembg-compatible `i -m <model> <in> <out>`
// - speech recognition: whisper-compatible CLI writing JSON output
// - super-resolution: realesrgan-ncnn-vulkan-compatible `-i <in> -o <out> -n <model>`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use super::{
    AsrChunk, AsrOutput, InferenceRuntime, InferenceTask, LoadedModel, DEFAULT_BACKGROUND_MODEL,
    DEFAULT_TRANSCRIPTION_MODEL, DEFAULT_UPSCALE_MODEL,
};
use crate::config::InferenceConfig;
use crate::error::{MediaError, Result};

/// Model ids as each tool names them. Ids not listed are passed through.
const REMBG_MODELS: &[(&str, &str)] = &[
    (DEFAULT_BACKGROUND_MODEL, "isnet-general-use"),
    ("briaai/RMBG-1.4", "bria-rmbg"),
    ("briaai/RMBG-2.0", "birefnet-general"),
];

const WHISPER_MODELS: &[(&str, &str)] = &[
    ("onnx-community/moonshine-tiny-ONNX", "tiny"),
    (DEFAULT_TRANSCRIPTION_MODEL, "base"),
    ("Xenova/whisper-tiny", "tiny"),
    ("Xenova/whisper-base", "base"),
    ("Xenova/whisper-small", "small"),
    ("Xenova/whisper-medium", "medium"),
    ("onnx-community/whisper-large-v3-turbo", "turbo"),
    ("distil-whisper/distil-large-v3.5-ONNX", "turbo"),
];

const REALESRGAN_MODELS: &[(&str, &str)] = &[(DEFAULT_UPSCALE_MODEL, "realesrgan-x4plus")];

/// Name the command-line tool for `task` uses for `model_id`.
pub fn tool_model_name(task: InferenceTask, model_id: &str) -> &str {
    let table = match task {
        InferenceTask::BackgroundRemoval => REMBG_MODELS,
        InferenceTask::SpeechRecognition => WHISPER_MODELS,
        InferenceTask::SuperResolution => REALESRGAN_MODELS,
    };
    table
        .iter()
        .find(|(id, _)| id.eq_ignore_ascii_case(model_id))
        .map(|(_, name)| *name)
        .unwrap_or(model_id)
}

fn lossy(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub fn remove_background_args(tool_model: &str, input: &Path, output: &Path) -> Vec<String> {
    vec![
        "i".to_string(),
        "-m".to_string(),
        tool_model.to_string(),
        lossy(input),
        lossy(output),
    ]
}

pub fn upscale_args(tool_model: &str, input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        lossy(input),
        "-o".to_string(),
        lossy(output),
        "-n".to_string(),
        tool_model.to_string(),
        "-s".to_string(),
        "4".to_string(),
    ]
}

pub fn transcribe_args(
    tool_model: &str,
    device: &str,
    input: &Path,
    output_dir: &Path,
    language: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        lossy(input),
        "--model".to_string(),
        tool_model.to_string(),
        "--device".to_string(),
        device.to_string(),
        "--output_dir".to_string(),
        lossy(output_dir),
        "--output_format".to_string(),
        "json".to_string(),
    ];
    if let Some(lang) = language {
        args.push("--language".to_string());
        args.push(lang.to_string());
    }
    args
}

/// Whisper CLI JSON output format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCliOutput {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<WhisperCliSegment>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCliSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl From<WhisperCliOutput> for AsrOutput {
    fn from(output: WhisperCliOutput) -> Self {
        AsrOutput {
            text: output.text,
            language: output.language,
            chunks: output
                .segments
                .into_iter()
                .map(|seg| AsrChunk {
                    start: seg.start,
                    end: seg.end,
                    text: seg.text,
                })
                .collect(),
        }
    }
}

pub struct CommandRuntime {
    config: InferenceConfig,
}

impl CommandRuntime {
    pub fn new(config: InferenceConfig) -> Self {
        Self { config }
    }

    fn binary_for(&self, task: InferenceTask) -> &str {
        match task {
            InferenceTask::BackgroundRemoval => &self.config.background_removal_binary,
            InferenceTask::SpeechRecognition => &self.config.transcription_binary,
            InferenceTask::SuperResolution => &self.config.upscale_binary,
        }
    }

    async fn run(&self, binary: &str, args: &[String]) -> Result<Vec<u8>> {
        debug!("Executing inference command: {} {:?}", binary, args);

        let output = Command::new(binary)
            .args(args)
            .output()
            .await
            .map_err(|e| MediaError::Inference(format!("Failed to execute {}: {}", binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::Inference(format!("{} failed: {}", binary, stderr.trim())));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl InferenceRuntime for CommandRuntime {
    async fn load(&self, task: InferenceTask, model_id: &str) -> Result<LoadedModel> {
        let binary = self.binary_for(task);
        info!(
            "Loading {:?} model {} via {} as '{}' (first use only)",
            task,
            model_id,
            binary,
            tool_model_name(task, model_id)
        );

        self.run(binary, &["--help".to_string()]).await.map_err(|e| {
            MediaError::Inference(format!("Inference runtime '{}' is not available: {}", binary, e))
        })?;

        Ok(LoadedModel {
            task,
            model_id: model_id.to_string(),
            runtime: binary.to_string(),
        })
    }

    async fn remove_background(&self, model: &LoadedModel, input: &Path, output: &Path) -> Result<()> {
        let args = remove_background_args(tool_model_name(model.task, &model.model_id), input, output);
        self.run(&model.runtime, &args).await.map(|_| ())
    }

    async fn upscale(&self, model: &LoadedModel, input: &Path, output: &Path) -> Result<()> {
        let args = upscale_args(tool_model_name(model.task, &model.model_id), input, output);
        self.run(&model.runtime, &args).await.map(|_| ())
    }

    async fn transcribe(&self, model: &LoadedModel, input: &Path, language: Option<&str>) -> Result<AsrOutput> {
        let temp_dir = tempfile::tempdir()
            .map_err(|e| MediaError::Inference(format!("Failed to create temp directory: {}", e)))?;

        let args = transcribe_args(
            tool_model_name(model.task, &model.model_id),
            &self.config.device,
            input,
            temp_dir.path(),
            language,
        );

        self.run(&model.runtime, &args).await?;

        let stem = input
            .file_stem()
            .ok_or_else(|| MediaError::InvalidInput("Invalid audio filename".to_string()))?;
        let json_file = temp_dir.path().join(format!("{}.json", stem.to_string_lossy()));
        let json_content = tokio::fs::read_to_string(&json_file)
            .await
            .map_err(|e| MediaError::Inference(format!("Failed to read transcription output: {}", e)))?;

        let parsed: WhisperCliOutput = serde_json::from_str(&json_content)?;
        Ok(parsed.into())
    }
}
