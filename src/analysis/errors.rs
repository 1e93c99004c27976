//! Error types for the analysis stage

use image::ImageFormat;

/// Per-item analysis failure. The item is skipped, the run continues.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The item had no readable payload left
    #[error("No payload available")]
    NoData,

    #[error("Failed to read payload: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// Buffering or decoding the image would not fit under the memory
    /// ceiling
    #[error("Needs {needed} bytes, memory ceiling is {ceiling}")]
    TooLarge { needed: u64, ceiling: u64 },

    /// Decoded fine, but not one of the analyzed formats
    #[error("Unsupported format: {0:?}")]
    Unsupported(ImageFormat),
}
