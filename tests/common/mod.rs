//! Test utilities shared by the chromafeed integration tests

use chromafeed::fetch::FetchFuture;
use chromafeed::{FetchError, FetchedBody, Fetcher, PipelineConfig};
use image::{ImageBuffer, ImageFormat, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

#[allow(dead_code)]
pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
#[allow(dead_code)]
pub const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
#[allow(dead_code)]
pub const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

/// Creates a temporary directory for spill files
#[allow(dead_code)]
pub fn create_test_dir() -> TempDir {
    TempDir::new().expect("create temp dir")
}

/// Encodes an image in `format`
#[allow(dead_code)]
pub fn encode(img: &RgbaImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img.clone())
        .to_rgb8()
        .write_to(&mut out, format)
        .expect("encode test image");
    out.into_inner()
}

/// 2×2 PNG: three red pixels, one blue in the bottom-right corner
#[allow(dead_code)]
pub fn three_red_one_blue_png() -> Vec<u8> {
    let mut img: RgbaImage = ImageBuffer::from_pixel(2, 2, RED);
    img.put_pixel(1, 1, BLUE);
    encode(&img, ImageFormat::Png)
}

/// Single-color PNG of the given size
#[allow(dead_code)]
pub fn solid_png(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
    encode(&ImageBuffer::from_pixel(width, height, color), ImageFormat::Png)
}

/// Config with test-friendly timings rooted at `cache`
#[allow(dead_code)]
pub fn test_config(cache: &Path) -> chromafeed::config::PipelineConfigBuilder<chromafeed::config::WithCacheDir> {
    PipelineConfig::builder()
        .cache_dir(cache.join("cache"))
        .release_tick_ms(50)
        .janitor_delay_ms(10)
        .max_concurrent_fetches(4)
        .max_concurrent_analyses(2)
}

/// In-memory fetcher: known identities return their bytes, anything else is
/// a 404
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeFetcher {
    bodies: HashMap<String, Vec<u8>>,
    /// Overrides the declared length for every response
    declared_len: Option<Option<u64>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, identity: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(identity.to_string(), body);
        self
    }

    pub fn declaring(mut self, declared_len: Option<u64>) -> Self {
        self.declared_len = Some(declared_len);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of fetches performed so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for FakeFetcher {
    fn fetch<'a>(&'a self, identity: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.bodies.get(identity) {
                Some(body) => Ok(FetchedBody {
                    declared_len: self
                        .declared_len
                        .unwrap_or(Some(body.len() as u64)),
                    body: Box::new(Cursor::new(body.clone())),
                }),
                None => Err(FetchError::Status {
                    url: identity.to_string(),
                    status: 404,
                }),
            }
        })
    }
}

/// Identity list with one identity per line
#[allow(dead_code)]
pub fn source(lines: &[&str]) -> Cursor<Vec<u8>> {
    let mut text = lines.join("\n");
    text.push('\n');
    Cursor::new(text.into_bytes())
}

/// Result lines, sorted so tests don't depend on analysis order
#[allow(dead_code)]
pub fn sorted_lines(output: &[u8]) -> Vec<String> {
    let mut lines: Vec<String> = String::from_utf8_lossy(output)
        .lines()
        .map(str::to_string)
        .collect();
    lines.sort();
    lines
}

/// Number of spill files left in `dir`
#[allow(dead_code)]
pub fn spill_files(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("tmp."))
            .count(),
        Err(_) => 0,
    }
}
