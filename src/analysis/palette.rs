//! Dominant color ranking

use image::RgbaImage;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Opaque RGB color; alpha is ignored when counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    /// `#rrggbb`, lowercase
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{}", hex::encode(self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorCount {
    pub color: Rgb,
    pub count: u64,
}

/// The `k` most frequent colors, most frequent first
///
/// Equal counts keep the order in which the colors were first met in a
/// row-major scan, so the result is deterministic.
#[must_use]
pub fn top_colors(raster: &RgbaImage, k: usize) -> Vec<ColorCount> {
    let mut index: HashMap<Rgb, usize> = HashMap::new();
    let mut counts: Vec<ColorCount> = Vec::new();

    for pixel in raster.pixels() {
        let [r, g, b, _] = pixel.0;
        let color = Rgb([r, g, b]);
        let slot = *index.entry(color).or_insert_with(|| {
            counts.push(ColorCount { color, count: 0 });
            counts.len() - 1
        });
        counts[slot].count += 1;
    }

    // Stable sort keeps first-encounter order among ties
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(k);
    counts
}

/// One result line: identity followed by ` #rrggbb` per color, then `\n`
#[must_use]
pub fn format_line(identity: &str, colors: &[ColorCount]) -> String {
    let mut line = String::with_capacity(identity.len() + colors.len() * 8 + 1);
    line.push_str(identity);
    for c in colors {
        let _ = write!(line, " {}", c.color.to_hex());
    }
    line.push('\n');
    line
}
