//! Thin wrappers around the image codec: probing, decoding, resizing and
//! encoding, with errors mapped onto the pipeline's taxonomy.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::error::ProcessError;

/// Identify the image format from the payload's magic numbers.
///
/// Returns the canonical lowercase format name, or `None` when the bytes
/// match no known signature (the caller falls back to the extension the
/// client suggested).
pub fn probe_format(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(format_name)
}

/// Read just enough of the payload to learn its pixel dimensions.
///
/// Used on the dedup fast path, where the variants are already on disk and
/// a full decode would be wasted work.
pub fn probe_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Decode the payload into pixels.
///
/// Failure here means the client sent something that is not an image;
/// it maps to a 400, not a 500.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ProcessError> {
    image::load_from_memory(bytes).map_err(|e| ProcessError::InvalidImage(e.to_string()))
}

/// Resize to an exact target width, preserving aspect ratio.
pub fn resize_to_width(image: &DynamicImage, width: u32) -> DynamicImage {
    image.thumbnail(width, u32::MAX)
}

/// Encode an image to the named output format, in memory.
pub fn encode(image: &DynamicImage, format: &str) -> Result<Vec<u8>, ProcessError> {
    let target = ImageFormat::from_extension(format).ok_or_else(|| ProcessError::Codec {
        format: format.to_string(),
        message: "no encoder for this format".to_string(),
    })?;

    let mut buffer = Cursor::new(Vec::new());
    let result = if target == ImageFormat::Jpeg && image.color().has_alpha() {
        // The JPEG encoder rejects alpha channels.
        DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buffer, target)
    } else {
        image.write_to(&mut buffer, target)
    };
    result.map_err(|e| ProcessError::Codec {
        format: format.to_string(),
        message: e.to_string(),
    })?;
    Ok(buffer.into_inner())
}

/// Canonical lowercase name for a detected format. Doubles as the original
/// file's extension and as the key into the configured format map.
fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        ImageFormat::Gif => "gif",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Ico => "ico",
        ImageFormat::Avif => "avif",
        ImageFormat::Tga => "tga",
        ImageFormat::Pnm => "pnm",
        _ => "unknown",
    }
}
