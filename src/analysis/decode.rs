//! Raster decoding

use image::{ImageFormat, ImageReader, RgbaImage};
use std::io::Cursor;

use super::errors::AnalysisError;

/// Formats whose colors are reported
pub const SUPPORTED_FORMATS: [ImageFormat; 3] =
    [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Gif];

/// Sniff the format from the leading bytes and decode to RGBA
///
/// CPU-bound; run it on the blocking pool.
pub fn decode_raster(bytes: &[u8]) -> Result<(ImageFormat, RgbaImage), AnalysisError> {
    let format = image::guess_format(bytes)?;
    let decoded = image::load_from_memory_with_format(bytes, format)?;
    Ok((format, decoded.into_rgba8()))
}

/// Width and height read from the image header, without decoding pixels
pub fn raster_dimensions(bytes: &[u8]) -> Result<(u32, u32), AnalysisError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

#[must_use]
pub fn is_supported(format: ImageFormat) -> bool {
    SUPPORTED_FORMATS.contains(&format)
}
