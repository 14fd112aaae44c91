//! Action catalog: the closed set of media actions, their option records and
//! the per-call execution context.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::MediaError;

/// Media kind an action produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Audio,
    Video,
}

/// Every action the toolkit knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Resize,
    Convert,
    RemoveBackground,
    Generate,
    Extend,
    Edit,
    Crop,
    Upscale,
    Extract,
    Transcribe,
    VideoGenerate,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::Resize,
        Action::Convert,
        Action::RemoveBackground,
        Action::Generate,
        Action::Extend,
        Action::Edit,
        Action::Crop,
        Action::Upscale,
        Action::Extract,
        Action::Transcribe,
        Action::VideoGenerate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Resize => "resize",
            Action::Convert => "convert",
            Action::RemoveBackground => "remove-background",
            Action::Generate => "generate",
            Action::Extend => "extend",
            Action::Edit => "edit",
            Action::Crop => "crop",
            Action::Upscale => "upscale",
            Action::Extract => "extract",
            Action::Transcribe => "transcribe",
            Action::VideoGenerate => "video-generate",
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            Action::Extract | Action::Transcribe => MediaType::Audio,
            Action::VideoGenerate => MediaType::Video,
            _ => MediaType::Image,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| MediaError::InvalidInput(format!("Unknown action '{}'", s)))
    }
}

/// Normalized input media: a local path or a remote URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInput {
    pub source: String,
    pub is_url: bool,
}

impl MediaInput {
    /// Classify a raw path-or-URL string.
    pub fn from_raw<S: Into<String>>(raw: S) -> Self {
        let source = raw.into();
        let is_url = source.starts_with("http://") || source.starts_with("https://");
        Self { source, is_url }
    }

    /// Lowercased file extension of the source, ignoring any URL query string.
    pub fn extension(&self) -> Option<String> {
        let path = self.source.split(['?', '#']).next().unwrap_or_default();
        let name = path.rsplit('/').next().unwrap_or_default();
        name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase())
    }
}

/// Raster formats the convert action can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpg,
    Jpeg,
    Webp,
}

impl ImageFormat {
    /// File extension; `jpeg` is written as `jpg`.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpg | ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpg | ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpg" => Ok(ImageFormat::Jpg),
            "jpeg" => Ok(ImageFormat::Jpeg),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(MediaError::InvalidFormat(format!(
                "Unsupported output format: {}",
                other
            ))),
        }
    }
}

/// Audio container for the extract action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
        }
    }

    pub fn codec(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Wav => "pcm_s16le",
        }
    }
}

impl FromStr for AudioFormat {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            other => Err(MediaError::InvalidFormat(format!(
                "Unsupported audio format: {}",
                other
            ))),
        }
    }
}

/// Output resolution for video generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoResolution {
    #[default]
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "2160p")]
    P2160,
}

impl VideoResolution {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            VideoResolution::P720 => (1280, 720),
            VideoResolution::P1080 => (1920, 1080),
            VideoResolution::P1440 => (2560, 1440),
            VideoResolution::P2160 => (3840, 2160),
        }
    }
}

impl FromStr for VideoResolution {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "720p" => Ok(VideoResolution::P720),
            "1080p" => Ok(VideoResolution::P1080),
            "1440p" => Ok(VideoResolution::P1440),
            "2160p" => Ok(VideoResolution::P2160),
            other => Err(MediaError::InvalidInput(format!(
                "Invalid resolution '{}'. Valid resolutions: 720p, 1080p, 1440p, 2160p",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResizeOptions {
    pub input: MediaInput,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Keep the source aspect ratio (fit inside the box) instead of stretching
    pub maintain_aspect_ratio: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertOptions {
    pub input: MediaInput,
    pub format: ImageFormat,
    /// Quality for lossy formats, 1-100
    pub quality: u8,
    pub dpi: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoveBackgroundOptions {
    pub input: MediaInput,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub prompt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub count: u32,
    pub model: Option<String>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtendOptions {
    pub input: MediaInput,
    /// Pixels added on every side
    pub padding: u32,
    /// Hex background color, e.g. `#E4ECF8`
    pub color: String,
    pub dpi: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditOptions {
    pub input: MediaInput,
    pub prompt: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CropOptions {
    pub input: MediaInput,
    pub width: u32,
    pub height: u32,
    /// Focal point as a percentage of the image width
    pub focus_x: f64,
    /// Focal point as a percentage of the image height
    pub focus_y: f64,
    pub dpi: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpscaleOptions {
    pub input: MediaInput,
    pub scale: Option<u32>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    pub input: MediaInput,
    pub format: AudioFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeOptions {
    pub input: MediaInput,
    pub diarize: bool,
    pub language: Option<String>,
    pub num_speakers: Option<u32>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoGenerateOptions {
    pub prompt: String,
    /// Optional still image for image-to-video
    pub input: Option<MediaInput>,
    /// Seconds
    pub duration: u32,
    pub resolution: VideoResolution,
    pub fps: u32,
    pub generate_audio: bool,
    pub model: Option<String>,
}

/// A request for exactly one action, carrying that action's options.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRequest {
    Resize(ResizeOptions),
    Convert(ConvertOptions),
    RemoveBackground(RemoveBackgroundOptions),
    Generate(GenerateOptions),
    Extend(ExtendOptions),
    Edit(EditOptions),
    Crop(CropOptions),
    Upscale(UpscaleOptions),
    Extract(ExtractOptions),
    Transcribe(TranscribeOptions),
    VideoGenerate(VideoGenerateOptions),
}

impl ActionRequest {
    pub fn action(&self) -> Action {
        match self {
            ActionRequest::Resize(_) => Action::Resize,
            ActionRequest::Convert(_) => Action::Convert,
            ActionRequest::RemoveBackground(_) => Action::RemoveBackground,
            ActionRequest::Generate(_) => Action::Generate,
            ActionRequest::Extend(_) => Action::Extend,
            ActionRequest::Edit(_) => Action::Edit,
            ActionRequest::Crop(_) => Action::Crop,
            ActionRequest::Upscale(_) => Action::Upscale,
            ActionRequest::Extract(_) => Action::Extract,
            ActionRequest::Transcribe(_) => Action::Transcribe,
            ActionRequest::VideoGenerate(_) => Action::VideoGenerate,
        }
    }

    /// The input media, for actions that take one.
    pub fn input(&self) -> Option<&MediaInput> {
        match self {
            ActionRequest::Resize(o) => Some(&o.input),
            ActionRequest::Convert(o) => Some(&o.input),
            ActionRequest::RemoveBackground(o) => Some(&o.input),
            ActionRequest::Extend(o) => Some(&o.input),
            ActionRequest::Edit(o) => Some(&o.input),
            ActionRequest::Crop(o) => Some(&o.input),
            ActionRequest::Upscale(o) => Some(&o.input),
            ActionRequest::Extract(o) => Some(&o.input),
            ActionRequest::Transcribe(o) => Some(&o.input),
            ActionRequest::VideoGenerate(o) => o.input.as_ref(),
            ActionRequest::Generate(_) => None,
        }
    }
}

/// Per-invocation parameters threaded through resolution and execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionContext {
    /// Absolute directory results are written to
    pub output_dir: PathBuf,
    /// Explicitly requested provider; disables auto-detection
    pub provider: Option<String>,
    /// User-supplied output filename
    pub output_name: Option<String>,
    /// Original input string, used to derive output names
    pub input_source: Option<String>,
}

impl ActionContext {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_provider<S: Into<String>>(mut self, provider: Option<S>) -> Self {
        self.provider = provider.map(Into::into);
        self
    }

    pub fn with_output_name<S: Into<String>>(mut self, name: Option<S>) -> Self {
        self.output_name = name.map(Into::into);
        self
    }

    pub fn with_input_source<S: Into<String>>(mut self, source: Option<S>) -> Self {
        self.input_source = source.map(Into::into);
        self
    }
}
