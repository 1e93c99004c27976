//! Consumer stage: decode items and report their dominant colors

pub mod decode;
pub mod errors;
pub mod palette;
pub mod pool;

pub use decode::{SUPPORTED_FORMATS, decode_raster, is_supported, raster_dimensions};
pub use errors::AnalysisError;
pub use palette::{ColorCount, Rgb, format_line, top_colors};
pub use pool::{AnalysisStats, RASTER_BYTES_PER_PIXEL, TOP_COLORS, WorkerPool};
