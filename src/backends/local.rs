use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use tracing::info;

use super::prepare_output;
use crate::action::{
    Action, ActionContext, ActionRequest, ConvertOptions, CropOptions, ExtendOptions, ExtractOptions, ImageFormat,
    MediaInput, ResizeOptions,
};
use crate::error::{MediaError, Result};
use crate::fetch;
use crate::imaging;
use crate::inference::LocalInference;
use crate::media::MediaProcessorTrait;
use crate::provider::MediaProvider;
use crate::result::MediaResult;

/// JPEG quality for actions that re-encode without asking for one
const DEFAULT_QUALITY: u8 = 80;

const SUPPORTED: [Action; 7] = [
    Action::Resize,
    Action::Convert,
    Action::Extend,
    Action::Crop,
    Action::Extract,
    Action::RemoveBackground,
    Action::Transcribe,
];

/// Zero-credential provider: image transforms in-process, audio extraction
/// through ffmpeg, background removal and transcription through local models.
pub struct LocalProvider {
    inference: Arc<LocalInference>,
    media: Box<dyn MediaProcessorTrait>,
    client: reqwest::Client,
}

impl LocalProvider {
    pub fn new(inference: Arc<LocalInference>, media: Box<dyn MediaProcessorTrait>, client: reqwest::Client) -> Self {
        Self {
            inference,
            media,
            client,
        }
    }

    async fn run(&self, request: &ActionRequest, context: &ActionContext) -> Result<MediaResult> {
        match request {
            ActionRequest::Resize(options) => self.resize(options, context).await,
            ActionRequest::Convert(options) => self.convert(options, context).await,
            ActionRequest::Extend(options) => self.extend(options, context).await,
            ActionRequest::Crop(options) => self.crop(options, context).await,
            ActionRequest::Extract(options) => self.extract(options, context).await,
            ActionRequest::RemoveBackground(options) => {
                self.inference.remove_background(self.name(), options, context).await
            }
            ActionRequest::Transcribe(options) => self.inference.transcribe(self.name(), options, context).await,
            other => Err(MediaError::InvalidInput(format!(
                "Action '{}' not supported by local provider",
                other.action()
            ))),
        }
    }

    /// Read the input and run `op` over its raw bytes on the blocking pool.
    async fn on_input<F>(&self, input: &MediaInput, op: F) -> Result<(Vec<u8>, ImageFormat)>
    where
        F: FnOnce(Vec<u8>, String) -> Result<(Vec<u8>, ImageFormat)> + Send + 'static,
    {
        let (bytes, _) = fetch::read_input(&self.client, input).await?;
        let source = input.source.clone();
        tokio::task::spawn_blocking(move || op(bytes, source))
            .await
            .map_err(|e| MediaError::Provider(format!("Image processing task failed: {}", e)))?
    }

    /// Decode the input, apply `op` on the blocking pool, and return the
    /// encoded bytes with the format they were written in.
    async fn transform<F>(&self, input: &MediaInput, op: F) -> Result<(Vec<u8>, ImageFormat)>
    where
        F: FnOnce(DynamicImage, ImageFormat) -> Result<(Vec<u8>, ImageFormat)> + Send + 'static,
    {
        self.on_input(input, move |bytes, source| {
            let (image, format) = imaging::decode(&bytes, &source)?;
            op(image, format)
        })
        .await
    }

    async fn write_image(
        &self,
        action: Action,
        context: &ActionContext,
        prefix: &str,
        encoded: Vec<u8>,
        format: ImageFormat,
    ) -> Result<MediaResult> {
        let path = prepare_output(context, format.extension(), prefix, true).await?;
        tokio::fs::write(&path, &encoded).await?;
        info!("{} wrote {} ({} bytes)", action, path.display(), encoded.len());
        Ok(MediaResult::success(action, self.name(), path, format.mime(), encoded.len() as u64))
    }

    async fn resize(&self, options: &ResizeOptions, context: &ActionContext) -> Result<MediaResult> {
        if options.width.is_none() && options.height.is_none() {
            return Err(MediaError::InvalidInput(
                "At least one of width or height must be specified".to_string(),
            ));
        }
        let (width, height, keep) = (options.width, options.height, options.maintain_aspect_ratio);
        let (encoded, format) = self
            .transform(&options.input, move |image, format| {
                let (w, h) = imaging::resize_dimensions((image.width(), image.height()), width, height, keep)?;
                let resized = imaging::resize(&image, w, h);
                Ok((imaging::encode(&resized, format, DEFAULT_QUALITY, None)?, format))
            })
            .await?;
        self.write_image(Action::Resize, context, "resized", encoded, format).await
    }

    async fn convert(&self, options: &ConvertOptions, context: &ActionContext) -> Result<MediaResult> {
        let target = options.format;
        let (quality, dpi) = (options.quality, options.dpi);
        let (width, height) = (options.width, options.height);
        let (encoded, format) = self
            .on_input(&options.input, move |bytes, source| {
                let image = if imaging::is_svg(&source, &bytes) {
                    imaging::rasterize_svg(&bytes, dpi, width, height)?
                } else {
                    let (image, _) = imaging::decode(&bytes, &source)?;
                    if width.is_some() || height.is_some() {
                        let (w, h) = imaging::resize_dimensions((image.width(), image.height()), width, height, true)?;
                        imaging::resize(&image, w, h)
                    } else {
                        image
                    }
                };
                Ok((imaging::encode(&image, target, quality, Some(dpi))?, target))
            })
            .await?;
        self.write_image(Action::Convert, context, "converted", encoded, format).await
    }

    async fn extend(&self, options: &ExtendOptions, context: &ActionContext) -> Result<MediaResult> {
        let color = imaging::parse_hex_color(&options.color)?;
        let (padding, dpi) = (options.padding, options.dpi);
        let (encoded, format) = self
            .transform(&options.input, move |image, _| {
                let extended = imaging::extend(&image, padding, color);
                Ok((imaging::encode(&extended, ImageFormat::Png, DEFAULT_QUALITY, Some(dpi))?, ImageFormat::Png))
            })
            .await?;
        self.write_image(Action::Extend, context, "extended", encoded, format).await
    }

    async fn crop(&self, options: &CropOptions, context: &ActionContext) -> Result<MediaResult> {
        let (width, height) = (options.width, options.height);
        let (focus_x, focus_y, dpi) = (options.focus_x, options.focus_y, options.dpi);
        let (encoded, format) = self
            .transform(&options.input, move |image, format| {
                let (left, top) =
                    imaging::crop_region((image.width(), image.height()), width, height, focus_x, focus_y)?;
                let cropped = image.crop_imm(left, top, width, height);
                Ok((imaging::encode(&cropped, format, DEFAULT_QUALITY, Some(dpi))?, format))
            })
            .await?;
        self.write_image(Action::Crop, context, "cropped", encoded, format).await
    }

    async fn extract(&self, options: &ExtractOptions, context: &ActionContext) -> Result<MediaResult> {
        let input = fetch::materialize(&self.client, &options.input).await?;
        let path = prepare_output(context, options.format.extension(), "extracted", true).await?;

        self.media.extract_audio(input.path(), &path, options.format).await?;

        let bytes = tokio::fs::metadata(&path).await?.len();
        Ok(MediaResult::success(Action::Extract, self.name(), path, options.format.mime(), bytes))
    }
}

#[async_trait]
impl MediaProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn supports(&self, action: Action) -> bool {
        SUPPORTED.contains(&action)
    }

    async fn execute(&self, request: &ActionRequest, context: &ActionContext) -> MediaResult {
        self.run(request, context).await.unwrap_or_else(MediaResult::from)
    }
}
