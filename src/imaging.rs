//! Pixel operations behind the local image actions.
//!
//! Everything here is synchronous and CPU bound; callers run it on the
//! blocking pool.

use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView, Rgb, RgbImage, RgbaImage};
use resvg::{tiny_skia, usvg};

use crate::action::ImageFormat;
use crate::error::{MediaError, Result};

const METERS_PER_INCH: f64 = 0.0254;

/// Density at which one SVG user unit becomes one pixel.
pub const SVG_BASE_DPI: u32 = 72;

/// Decode an image, remembering which of the writable formats it came in.
/// SVG is rasterized at its natural size and reported as PNG.
pub fn decode(bytes: &[u8], source: &str) -> Result<(DynamicImage, ImageFormat)> {
    if is_svg(source, bytes) {
        return Ok((rasterize_svg(bytes, SVG_BASE_DPI, None, None)?, ImageFormat::Png));
    }
    let format = image::guess_format(bytes)
        .map_err(|_| MediaError::InvalidFormat(format!("Unrecognized image format: {}", source)))?;
    let image = image::load_from_memory_with_format(bytes, format)?;
    let source_format = match format {
        image::ImageFormat::Jpeg => ImageFormat::Jpg,
        image::ImageFormat::WebP => ImageFormat::Webp,
        _ => ImageFormat::Png,
    };
    Ok((image, source_format))
}

/// SVG by extension, or by sniffing the markup when the name says nothing.
pub fn is_svg(source: &str, bytes: &[u8]) -> bool {
    let by_name = source
        .split(['?', '#'])
        .next()
        .is_some_and(|path| path.to_lowercase().ends_with(".svg"));
    if by_name {
        return true;
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
    let head = head.trim_start();
    head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg"))
}

/// Rasterize an SVG document at `dpi`.
///
/// When `width` and/or `height` are given the drawing is scaled to fit inside
/// that box, enlarging when the box is bigger than the rendered size.
pub fn rasterize_svg(bytes: &[u8], dpi: u32, width: Option<u32>, height: Option<u32>) -> Result<DynamicImage> {
    let tree = usvg::Tree::from_data(bytes, &usvg::Options::default())
        .map_err(|e| MediaError::InvalidFormat(format!("Invalid SVG: {}", e)))?;
    let size = tree.size();
    let density = dpi.max(1) as f32 / SVG_BASE_DPI as f32;
    let (base_w, base_h) = (size.width() * density, size.height() * density);

    let fit = match (width, height) {
        (None, None) => 1.0,
        (w, h) => {
            let sx = w.map(|w| w as f32 / base_w).unwrap_or(f32::INFINITY);
            let sy = h.map(|h| h as f32 / base_h).unwrap_or(f32::INFINITY);
            sx.min(sy)
        }
    };
    let scale = density * fit;
    let out_w = ((size.width() * scale).round() as u32).max(1);
    let out_h = ((size.height() * scale).round() as u32).max(1);

    let mut pixmap = tiny_skia::Pixmap::new(out_w, out_h).ok_or_else(|| {
        MediaError::InvalidInput(format!("SVG raster size {}x{} is not supported", out_w, out_h))
    })?;
    resvg::render(&tree, tiny_skia::Transform::from_scale(scale, scale), &mut pixmap.as_mut());

    // tiny-skia keeps premultiplied alpha
    let data: Vec<u8> = pixmap
        .pixels()
        .iter()
        .flat_map(|px| {
            let c = px.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();
    RgbaImage::from_raw(out_w, out_h, data)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| MediaError::Provider("SVG rasterization produced a short buffer".to_string()))
}

/// `#RRGGBB` or `#RGB`, leading `#` optional.
pub fn parse_hex_color(hex: &str) -> Result<Rgb<u8>> {
    let clean = hex.trim().trim_start_matches('#');
    if !clean.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(MediaError::InvalidInput(format!("Invalid hex color: {}", hex)));
    }
    let expanded: String = match clean.len() {
        3 => clean.chars().flat_map(|c| [c, c]).collect(),
        6 => clean.to_string(),
        _ => return Err(MediaError::InvalidInput(format!("Invalid hex color: {}", hex))),
    };
    let channel = |i: usize| {
        u8::from_str_radix(&expanded[i..i + 2], 16)
            .map_err(|_| MediaError::InvalidInput(format!("Invalid hex color: {}", hex)))
    };
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

/// Target size for a resize that never enlarges.
///
/// With `keep_aspect` the image is fit inside the requested box; otherwise
/// each requested side is used directly, capped at the original size.
pub fn resize_dimensions(
    original: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
    keep_aspect: bool,
) -> Result<(u32, u32)> {
    if width.is_none() && height.is_none() {
        return Err(MediaError::InvalidInput(
            "At least one of width or height must be specified".to_string(),
        ));
    }
    let (ow, oh) = original;
    if width == Some(0) || height == Some(0) {
        return Err(MediaError::InvalidInput("Width and height must be positive".to_string()));
    }

    if !keep_aspect {
        return Ok((width.unwrap_or(ow).min(ow), height.unwrap_or(oh).min(oh)));
    }

    let sx = width.map(|w| w as f64 / ow as f64).unwrap_or(f64::INFINITY);
    let sy = height.map(|h| h as f64 / oh as f64).unwrap_or(f64::INFINITY);
    let scale = sx.min(sy).min(1.0);
    Ok((scaled(ow, scale), scaled(oh, scale)))
}

fn scaled(side: u32, scale: f64) -> u32 {
    ((side as f64 * scale).round() as u32).max(1)
}

pub fn resize(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    image.resize_exact(width, height, FilterType::Lanczos3)
}

/// Crop window of `width`x`height` centered on a focal point given in
/// percent, shifted back inside the image when it would overhang.
pub fn crop_region(
    image_size: (u32, u32),
    width: u32,
    height: u32,
    focus_x: f64,
    focus_y: f64,
) -> Result<(u32, u32)> {
    let (iw, ih) = image_size;
    if width == 0 || height == 0 {
        return Err(MediaError::InvalidInput("Crop width and height must be positive".to_string()));
    }
    if width > iw || height > ih {
        return Err(MediaError::InvalidInput(format!(
            "Crop dimensions ({}x{}) exceed image dimensions ({}x{})",
            width, height, iw, ih
        )));
    }

    let center_x = (focus_x.clamp(0.0, 100.0) / 100.0 * iw as f64).round() as i64;
    let center_y = (focus_y.clamp(0.0, 100.0) / 100.0 * ih as f64).round() as i64;
    let left = (center_x - (width as f64 / 2.0).round() as i64).clamp(0, (iw - width) as i64);
    let top = (center_y - (height as f64 / 2.0).round() as i64).clamp(0, (ih - height) as i64);

    Ok((left as u32, top as u32))
}

/// Flatten transparency onto `color` and pad every side by `padding` pixels.
pub fn extend(image: &DynamicImage, padding: u32, color: Rgb<u8>) -> DynamicImage {
    let rgba = image.to_rgba8();
    let flattened = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let px = rgba.get_pixel(x, y).0;
        let alpha = px[3] as u32;
        let blend = |src: u8, bg: u8| ((src as u32 * alpha + bg as u32 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(px[0], color[0]), blend(px[1], color[1]), blend(px[2], color[2])])
    });

    let mut canvas = RgbImage::from_pixel(
        rgba.width() + padding * 2,
        rgba.height() + padding * 2,
        color,
    );
    image::imageops::replace(&mut canvas, &flattened, padding as i64, padding as i64);
    DynamicImage::ImageRgb8(canvas)
}

/// Encode to `format`. `quality` applies to JPEG and WebP.
/// `dpi` is stored as PNG pHYs or JPEG JFIF density.
pub fn encode(image: &DynamicImage, format: ImageFormat, quality: u8, dpi: Option<u32>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        ImageFormat::Png => encode_png(image, dpi, &mut out)?,
        ImageFormat::Jpg | ImageFormat::Jpeg => {
            let rgb = image.to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
            if let Some(dpi) = dpi {
                encoder.set_pixel_density(PixelDensity::dpi(dpi.min(u16::MAX as u32) as u16));
            }
            encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?;
        }
        ImageFormat::Webp => {
            let rgba = image.to_rgba8();
            let encoded = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
                .encode_simple(false, quality.clamp(1, 100) as f32)
                .map_err(|e| MediaError::Provider(format!("WebP encoding failed: {:?}", e)))?;
            out.extend_from_slice(&encoded);
        }
    }
    Ok(out)
}

fn encode_png(image: &DynamicImage, dpi: Option<u32>, out: &mut Vec<u8>) -> Result<()> {
    let (color, data) = if image.color().has_alpha() {
        (png::ColorType::Rgba, image.to_rgba8().into_raw())
    } else {
        (png::ColorType::Rgb, image.to_rgb8().into_raw())
    };

    let mut encoder = png::Encoder::new(out, image.width(), image.height());
    encoder.set_color(color);
    encoder.set_depth(png::BitDepth::Eight);
    if let Some(dpi) = dpi {
        let ppm = (dpi as f64 / METERS_PER_INCH).round() as u32;
        encoder.set_pixel_dims(Some(png::PixelDimensions {
            xppu: ppm,
            yppu: ppm,
            unit: png::Unit::Meter,
        }));
    }

    let mut writer = encoder
        .write_header()
        .map_err(|e| MediaError::Provider(format!("PNG encoding failed: {}", e)))?;
    writer
        .write_image_data(&data)
        .map_err(|e| MediaError::Provider(format!("PNG encoding failed: {}", e)))?;
    writer
        .finish()
        .map_err(|e| MediaError::Provider(format!("PNG encoding failed: {}", e)))
}
