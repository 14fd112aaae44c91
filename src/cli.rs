use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::action::{
    ActionRequest, ConvertOptions, CropOptions, EditOptions, ExtendOptions, ExtractOptions, GenerateOptions,
    MediaInput, RemoveBackgroundOptions, ResizeOptions, TranscribeOptions, UpscaleOptions, VideoGenerateOptions,
};
use crate::error::Result;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Image processing and generation
    Image {
        #[command(subcommand)]
        command: ImageCommand,
    },

    /// Audio extraction and transcription
    Audio {
        #[command(subcommand)]
        command: AudioCommand,
    },

    /// Video generation, transcription and audio extraction
    Video {
        #[command(subcommand)]
        command: VideoCommand,
    },

    /// List registered providers and the actions they support
    Providers,
}

/// Where results go and who produces them; shared by every action command.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Output directory
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Output filename (extension auto-added if missing)
    #[arg(long)]
    pub name: Option<String>,

    /// Provider to use instead of auto-detection
    #[arg(long)]
    pub provider: Option<String>,
}

#[derive(Subcommand)]
pub enum ImageCommand {
    /// Resize an image (local processing)
    Resize {
        /// Input image path or URL
        #[arg(long = "in")]
        input: String,

        /// Target width in pixels
        #[arg(long)]
        width: Option<u32>,

        /// Target height in pixels
        #[arg(long)]
        height: Option<u32>,

        /// Stretch to the exact size instead of fitting inside it
        #[arg(long)]
        no_aspect: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Convert an image to another format
    Convert {
        #[arg(long = "in")]
        input: String,

        /// Output format (png, jpg, jpeg, webp)
        #[arg(long)]
        format: String,

        /// Quality for lossy formats (1-100)
        #[arg(long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: u8,

        /// DPI/density for the output image
        #[arg(long, default_value_t = 72)]
        dpi: u32,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Remove the background from an image
    RemoveBackground {
        #[arg(long = "in")]
        input: String,

        /// Model to use (overrides provider default)
        #[arg(long)]
        model: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Generate an image from a text prompt
    Generate {
        /// Text description of the image
        #[arg(long)]
        prompt: String,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        /// Number of images to generate (hosted providers return one)
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Seed for reproducible generation
        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        model: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Pad an image on every side with a solid color
    Extend {
        #[arg(long = "in")]
        input: String,

        /// Padding in pixels added to every side
        #[arg(long)]
        padding: u32,

        /// Background color as hex, e.g. #E4ECF8
        #[arg(long)]
        color: String,

        #[arg(long, default_value_t = 300)]
        dpi: u32,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Edit an image with a text prompt
    Edit {
        #[arg(long = "in")]
        input: String,

        /// Description of the edit
        #[arg(long)]
        prompt: String,

        #[arg(long)]
        model: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Crop an image around a focal point
    Crop {
        #[arg(long = "in")]
        input: String,

        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,

        /// Focal point X as a percentage of the width (0-100)
        #[arg(long, default_value_t = 50.0)]
        focus_x: f64,

        /// Focal point Y as a percentage of the height (0-100)
        #[arg(long, default_value_t = 50.0)]
        focus_y: f64,

        #[arg(long, default_value_t = 300)]
        dpi: u32,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Upscale an image with a super-resolution model
    Upscale {
        #[arg(long = "in")]
        input: String,

        /// Scale factor (2 or 4)
        #[arg(long)]
        scale: Option<u32>,

        #[arg(long)]
        model: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ExtractArgs {
    /// Input video path or URL
    #[arg(long = "in")]
    pub input: String,

    /// Output audio format (mp3, wav)
    #[arg(long, default_value = "mp3")]
    pub format: String,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TranscribeArgs {
    /// Input audio or video path or URL
    #[arg(long = "in")]
    pub input: String,

    /// Enable speaker identification
    #[arg(long)]
    pub diarize: bool,

    /// Language code (auto-detected if not provided)
    #[arg(long)]
    pub language: Option<String>,

    /// Number of speakers hint
    #[arg(long)]
    pub speakers: Option<u32>,

    #[arg(long)]
    pub model: Option<String>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Subcommand)]
pub enum AudioCommand {
    /// Extract the audio track from a video file
    Extract(ExtractArgs),

    /// Transcribe speech to text with timestamps
    Transcribe(TranscribeArgs),
}

#[derive(Subcommand)]
pub enum VideoCommand {
    /// Generate a video from a prompt, optionally animating an input image
    Generate {
        #[arg(long)]
        prompt: String,

        /// Input image for image-to-video
        #[arg(long = "in")]
        input: Option<String>,

        /// Duration in seconds
        #[arg(long, default_value_t = 6)]
        duration: u32,

        /// Video resolution (720p, 1080p, 1440p, 2160p)
        #[arg(long, default_value = "720p")]
        resolution: String,

        /// Frame rate (25 or 50)
        #[arg(long, default_value_t = 25)]
        fps: u32,

        /// Generate an audio track
        #[arg(long)]
        audio: bool,

        #[arg(long)]
        model: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Transcribe the speech in a video
    Transcribe(TranscribeArgs),

    /// Extract the audio track from a video
    Extract(ExtractArgs),
}

impl ExtractArgs {
    fn into_request(self) -> Result<(ActionRequest, OutputArgs)> {
        let request = ActionRequest::Extract(ExtractOptions {
            input: MediaInput::from_raw(self.input),
            format: self.format.parse()?,
        });
        Ok((request, self.output))
    }
}

impl TranscribeArgs {
    fn into_request(self) -> (ActionRequest, OutputArgs) {
        let request = ActionRequest::Transcribe(TranscribeOptions {
            input: MediaInput::from_raw(self.input),
            diarize: self.diarize,
            language: self.language,
            num_speakers: self.speakers,
            model: self.model,
        });
        (request, self.output)
    }
}

impl Commands {
    /// Turn an action command into its request. Option values with a closed
    /// set of choices are parsed here so bad values surface as envelopes.
    ///
    /// Returns `None` for commands that run no action.
    pub fn into_request(self) -> Option<Result<(ActionRequest, OutputArgs)>> {
        match self {
            Commands::Image { command } => Some(command.into_request()),
            Commands::Audio { command } => Some(match command {
                AudioCommand::Extract(args) => args.into_request(),
                AudioCommand::Transcribe(args) => Ok(args.into_request()),
            }),
            Commands::Video { command } => Some(command.into_request()),
            Commands::Providers => None,
        }
    }
}

impl ImageCommand {
    fn into_request(self) -> Result<(ActionRequest, OutputArgs)> {
        Ok(match self {
            ImageCommand::Resize {
                input,
                width,
                height,
                no_aspect,
                output,
            } => (
                ActionRequest::Resize(ResizeOptions {
                    input: MediaInput::from_raw(input),
                    width,
                    height,
                    maintain_aspect_ratio: !no_aspect,
                }),
                output,
            ),
            ImageCommand::Convert {
                input,
                format,
                quality,
                dpi,
                width,
                height,
                output,
            } => (
                ActionRequest::Convert(ConvertOptions {
                    input: MediaInput::from_raw(input),
                    format: format.parse()?,
                    quality,
                    dpi,
                    width,
                    height,
                }),
                output,
            ),
            ImageCommand::RemoveBackground { input, model, output } => (
                ActionRequest::RemoveBackground(RemoveBackgroundOptions {
                    input: MediaInput::from_raw(input),
                    model,
                }),
                output,
            ),
            ImageCommand::Generate {
                prompt,
                width,
                height,
                count,
                seed,
                model,
                output,
            } => (
                ActionRequest::Generate(GenerateOptions {
                    prompt,
                    width,
                    height,
                    count,
                    model,
                    seed,
                }),
                output,
            ),
            ImageCommand::Extend {
                input,
                padding,
                color,
                dpi,
                output,
            } => (
                ActionRequest::Extend(ExtendOptions {
                    input: MediaInput::from_raw(input),
                    padding,
                    color,
                    dpi,
                }),
                output,
            ),
            ImageCommand::Edit {
                input,
                prompt,
                model,
                output,
            } => (
                ActionRequest::Edit(EditOptions {
                    input: MediaInput::from_raw(input),
                    prompt,
                    model,
                }),
                output,
            ),
            ImageCommand::Crop {
                input,
                width,
                height,
                focus_x,
                focus_y,
                dpi,
                output,
            } => (
                ActionRequest::Crop(CropOptions {
                    input: MediaInput::from_raw(input),
                    width,
                    height,
                    focus_x,
                    focus_y,
                    dpi,
                }),
                output,
            ),
            ImageCommand::Upscale {
                input,
                scale,
                model,
                output,
            } => (
                ActionRequest::Upscale(UpscaleOptions {
                    input: MediaInput::from_raw(input),
                    scale,
                    model,
                }),
                output,
            ),
        })
    }
}

impl VideoCommand {
    fn into_request(self) -> Result<(ActionRequest, OutputArgs)> {
        match self {
            VideoCommand::Generate {
                prompt,
                input,
                duration,
                resolution,
                fps,
                audio,
                model,
                output,
            } => Ok((
                ActionRequest::VideoGenerate(VideoGenerateOptions {
                    prompt,
                    input: input.map(MediaInput::from_raw),
                    duration,
                    resolution: resolution.parse()?,
                    fps,
                    generate_audio: audio,
                    model,
                }),
                output,
            )),
            VideoCommand::Transcribe(args) => Ok(args.into_request()),
            VideoCommand::Extract(args) => args.into_request(),
        }
    }
}
