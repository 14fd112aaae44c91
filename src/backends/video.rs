//! Request bodies for the hosted video-generation models.

use serde_json::{json, Value};

use crate::action::VideoGenerateOptions;
use crate::error::{MediaError, Result};

pub const FAL_TEXT_TO_VIDEO: &str = "fal-ai/ltx-2/text-to-video/fast";
pub const FAL_IMAGE_TO_VIDEO: &str = "fal-ai/ltx-2/image-to-video/fast";
pub const REPLICATE_VIDEO_MODEL: &str = "lightricks/ltx-video";
pub const RUNPOD_TEXT_TO_VIDEO: &str = "alibaba/wan-2.6-t2v";
pub const RUNPOD_IMAGE_TO_VIDEO: &str = "alibaba/wan-2.6-i2v";

pub fn validate(options: &VideoGenerateOptions) -> Result<()> {
    if options.prompt.trim().is_empty() {
        return Err(MediaError::InvalidInput("Prompt is required for video generation".to_string()));
    }
    if options.duration == 0 {
        return Err(MediaError::InvalidInput("Duration must be at least 1 second".to_string()));
    }
    if options.fps == 0 {
        return Err(MediaError::InvalidInput("Frame rate must be positive".to_string()));
    }
    Ok(())
}

/// Endpoint and body for fal's LTX-2; an input image switches to image-to-video.
pub fn fal_request(options: &VideoGenerateOptions, image: Option<&str>) -> (String, Value) {
    let (width, height) = options.resolution.dimensions();
    let mut body = json!({
        "prompt": options.prompt,
        "duration": options.duration,
        "fps": options.fps,
        "width": width,
        "height": height,
    });
    if let Some(image) = image {
        body["image_url"] = json!(image);
    }
    if options.generate_audio {
        body["audio"] = json!({ "enabled": true });
    }

    let endpoint = options.model.clone().unwrap_or_else(|| {
        if image.is_some() { FAL_IMAGE_TO_VIDEO } else { FAL_TEXT_TO_VIDEO }.to_string()
    });
    (endpoint, body)
}

/// Replicate's LTX-Video takes a frame count rather than a duration.
pub fn replicate_input(options: &VideoGenerateOptions, image: Option<&str>) -> Value {
    let (width, height) = options.resolution.dimensions();
    let mut input = json!({
        "prompt": options.prompt,
        "num_frames": options.duration * options.fps,
        "width": width,
        "height": height,
        "fps": options.fps,
    });
    if let Some(image) = image {
        input["image"] = json!(image);
    }
    input
}

pub fn runpod_request(options: &VideoGenerateOptions, image: Option<&str>) -> (String, Value) {
    let (width, height) = options.resolution.dimensions();
    let mut input = json!({
        "prompt": options.prompt,
        "duration": options.duration,
        "size": format!("{}*{}", width, height),
        "enable_audio": options.generate_audio,
    });
    if let Some(image) = image {
        input["image"] = json!(image);
    }

    let model = options.model.clone().unwrap_or_else(|| {
        if image.is_some() { RUNPOD_IMAGE_TO_VIDEO } else { RUNPOD_TEXT_TO_VIDEO }.to_string()
    });
    (model, input)
}
