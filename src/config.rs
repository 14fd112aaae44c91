use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{MediaError, Result};

/// Default output directory name, relative to the working directory
pub const DEFAULT_OUTPUT_DIR: &str = ".agent-media";

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "agent-media.toml";

/// Environment variable overriding the output directory
pub const OUTPUT_DIR_ENV: &str = "AGENT_MEDIA_DIR";

fn default_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub media: MediaConfig,
    pub inference: InferenceConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Base output directory; `<cwd>/.agent-media` when unset
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Background removal runtime (rembg-compatible CLI)
    pub background_removal_binary: String,
    /// Speech recognition runtime (whisper-compatible CLI)
    pub transcription_binary: String,
    /// Super-resolution runtime (realesrgan-ncnn-vulkan-compatible CLI)
    pub upscale_binary: String,
    /// Device hint passed to runtimes that accept one
    pub device: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            background_removal_binary: "rembg".to_string(),
            transcription_binary: "whisper".to_string(),
            upscale_binary: "realesrgan-ncnn-vulkan".to_string(),
            device: "cpu".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProviderConfig {
    /// API base URL
    pub base_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Delay between status polls for asynchronous jobs
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl RemoteProviderConfig {
    fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub fal: RemoteProviderConfig,
    pub replicate: RemoteProviderConfig,
    pub runpod: RemoteProviderConfig,
    pub ai_gateway: RemoteProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            fal: RemoteProviderConfig::with_base_url("https://fal.run"),
            replicate: RemoteProviderConfig::with_base_url("https://api.replicate.com/v1"),
            runpod: RemoteProviderConfig::with_base_url("https://api.runpod.ai/v2"),
            ai_gateway: RemoteProviderConfig::with_base_url("https://ai-gateway.vercel.sh/v1"),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MediaError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| MediaError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Explicit path, else `agent-media.toml` in the working directory, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Self::from_file(DEFAULT_CONFIG_FILE)
            }
            None => Ok(Self::default()),
        }
    }

    /// Output directory after merging, highest priority first: the CLI flag,
    /// `AGENT_MEDIA_DIR`, the config file, `<cwd>/.agent-media`. Always absolute.
    pub fn resolve_output_dir(&self, cli_out: Option<&Path>, env_dir: Option<&str>) -> Result<PathBuf> {
        let cwd = std::env::current_dir()?;
        let chosen = cli_out
            .map(Path::to_path_buf)
            .or_else(|| env_dir.filter(|d| !d.is_empty()).map(PathBuf::from))
            .or_else(|| self.output.dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        Ok(if chosen.is_absolute() { chosen } else { cwd.join(chosen) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [media]
            binary_path = "/opt/ffmpeg/bin/ffmpeg"

            [providers.replicate]
            base_url = "http://localhost:9000/v1"
            "#,
        )
        .unwrap();

        assert_eq!(config.media.binary_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.providers.replicate.base_url, "http://localhost:9000/v1");
        assert_eq!(config.providers.replicate.poll_interval_ms, 2000);
        assert_eq!(config.providers.fal.base_url, "https://fal.run");
        assert_eq!(config.inference.transcription_binary, "whisper");
        assert!(config.output.dir.is_none());
    }

    #[test]
    fn test_from_file_reads_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent-media.toml");
        std::fs::write(&path, "[output]\ndir = \"/srv/media\"\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.output.dir, Some(PathBuf::from("/srv/media")));
        assert_eq!(loaded.media.binary_path, "ffmpeg");
    }

    #[test]
    fn test_output_dir_precedence() {
        let mut config = Config::default();
        config.output.dir = Some(PathBuf::from("/from/file"));

        let cli = config
            .resolve_output_dir(Some(Path::new("/from/cli")), Some("/from/env"))
            .unwrap();
        assert_eq!(cli, PathBuf::from("/from/cli"));

        let env = config.resolve_output_dir(None, Some("/from/env")).unwrap();
        assert_eq!(env, PathBuf::from("/from/env"));

        let file = config.resolve_output_dir(None, Some("")).unwrap();
        assert_eq!(file, PathBuf::from("/from/file"));

        let default = Config::default().resolve_output_dir(None, None).unwrap();
        assert!(default.is_absolute());
        assert!(default.ends_with(DEFAULT_OUTPUT_DIR));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::from_file("/definitely/missing/agent-media.toml").unwrap_err();
        assert!(matches!(err, MediaError::Config(_)));
    }
}
