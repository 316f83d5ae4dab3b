//! Bitmap input, downsampling and quantized color histograms
//!
//! The working image is capped at a small long edge before any pixel is
//! read; palette extraction gains nothing from full resolution and the scan
//! is the dominant cost otherwise.

use std::borrow::Cow;
use std::collections::BTreeMap;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::color::Rgb;
use crate::progress::ExtractionContext;
use crate::{PaletteError, Result};

pub const DEFAULT_ALPHA_THRESHOLD: u8 = 125;
pub const DEFAULT_MAX_DIMENSION: u32 = 150;

/// A decoded RGBA8 bitmap handed over by the host.
#[derive(Debug, Clone)]
pub struct Bitmap {
    image: RgbaImage,
}

impl Bitmap {
    /// Wrap a raw RGBA8 buffer (`width * height * 4` bytes, row-major).
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(PaletteError::invalid_image(format!(
                "pixel buffer holds {} bytes, {width}x{height} RGBA needs {expected}",
                pixels.len()
            )));
        }
        let image = RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| PaletteError::invalid_image("pixel buffer does not match dimensions"))?;
        Self::from_image(image)
    }

    pub fn from_image(image: RgbaImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PaletteError::invalid_image(format!(
                "bitmap has no pixels ({width}x{height})"
            )));
        }
        Ok(Self { image })
    }

    pub fn from_dynamic(image: &DynamicImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PaletteError::invalid_image(format!(
                "bitmap has no pixels ({width}x{height})"
            )));
        }
        Self::from_image(image.to_rgba8())
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }
}

/// How pixels are read into a histogram or sample list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Long edge of the working image, in pixels.
    pub max_dimension: u32,
    /// Pixels with alpha at or below this are ignored.
    pub alpha_threshold: u8,
    /// Low bits cleared from every channel before bucketing.
    pub quantize_bits: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            alpha_threshold: DEFAULT_ALPHA_THRESHOLD,
            quantize_bits: 2,
        }
    }
}

impl SamplerConfig {
    pub const fn new(max_dimension: u32, quantize_bits: u8) -> Self {
        Self {
            max_dimension,
            alpha_threshold: DEFAULT_ALPHA_THRESHOLD,
            quantize_bits,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_dimension == 0 {
            return Err(PaletteError::invalid_parameter(
                "max_dimension",
                self.max_dimension,
            ));
        }
        if self.quantize_bits > 7 {
            return Err(PaletteError::invalid_parameter(
                "quantize_bits",
                self.quantize_bits,
            ));
        }
        Ok(())
    }
}

/// One histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramEntry {
    pub color: Rgb,
    pub frequency: u32,
}

/// Quantized color → pixel count. Iterates in a fixed color order so two
/// scans of the same bitmap are interchangeable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
    counts: BTreeMap<Rgb, u32>,
    total: u64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, color: Rgb, count: u32) {
        if count == 0 {
            return;
        }
        *self.counts.entry(color).or_insert(0) += count;
        self.total += u64::from(count);
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn get(&self, color: Rgb) -> u32 {
        self.counts.get(&color).copied().unwrap_or(0)
    }

    pub fn total_pixels(&self) -> u64 {
        self.total
    }

    pub fn max_frequency(&self) -> u32 {
        self.counts.values().copied().max().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = HistogramEntry> + '_ {
        self.counts
            .iter()
            .map(|(&color, &frequency)| HistogramEntry { color, frequency })
    }

    pub fn entries(&self) -> Vec<HistogramEntry> {
        self.iter().collect()
    }

    /// Drop buckets rarer than `max(1, max_frequency / divisor)`. A divisor
    /// of 0 disables the filter.
    pub fn without_rare(&self, divisor: u32) -> Histogram {
        if divisor == 0 {
            return self.clone();
        }
        let floor = (self.max_frequency() / divisor).max(1);
        let mut kept = Histogram::new();
        for entry in self.iter().filter(|e| e.frequency >= floor) {
            kept.add(entry.color, entry.frequency);
        }
        kept
    }
}

impl FromIterator<(Rgb, u32)> for Histogram {
    fn from_iter<I: IntoIterator<Item = (Rgb, u32)>>(iter: I) -> Self {
        let mut histogram = Histogram::new();
        for (color, count) in iter {
            histogram.add(color, count);
        }
        histogram
    }
}

/// Aspect-preserving size whose long edge is at most `max_dimension`.
/// Never upscales.
pub fn working_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let long = width.max(height);
    if long <= max_dimension {
        return (width, height);
    }
    let ratio = max_dimension as f64 / long as f64;
    let w = ((width as f64) * ratio).round().max(1.0) as u32;
    let h = ((height as f64) * ratio).round().max(1.0) as u32;
    (w.min(max_dimension), h.min(max_dimension))
}

/// Nearest-neighbour downsample to the working resolution. Borrows the
/// source when it is already small enough.
pub fn downsample(bitmap: &Bitmap, max_dimension: u32) -> Result<Cow<'_, RgbaImage>> {
    let src = bitmap.as_image();
    let (in_w, in_h) = src.dimensions();
    let (out_w, out_h) = working_dimensions(in_w, in_h, max_dimension);
    if out_w == in_w && out_h == in_h {
        return Ok(Cow::Borrowed(src));
    }

    // resize panics on allocation failure; check the budget first.
    let bytes = out_w as usize * out_h as usize * 4;
    Vec::<u8>::new()
        .try_reserve_exact(bytes)
        .map_err(|source| PaletteError::AllocationFailure { bytes, source })?;

    Ok(Cow::Owned(imageops::resize(src, out_w, out_h, FilterType::Nearest)))
}

/// Scan the working image into a quantized histogram, skipping
/// near-transparent pixels. Checks for cancellation after every row.
pub fn build_histogram(
    bitmap: &Bitmap,
    config: &SamplerConfig,
    ctx: &ExtractionContext<'_>,
) -> Result<Histogram> {
    config.validate()?;
    let working = downsample(bitmap, config.max_dimension)?;
    let mut histogram = Histogram::new();

    for row in working.rows() {
        for pixel in row {
            let [r, g, b, a] = pixel.0;
            if a <= config.alpha_threshold {
                continue;
            }
            histogram.add(Rgb::new(r, g, b).quantize(config.quantize_bits), 1);
        }
        ctx.checkpoint()?;
    }

    debug!(
        width = working.width(),
        height = working.height(),
        buckets = histogram.len(),
        pixels = histogram.total_pixels(),
        "built color histogram"
    );
    Ok(histogram)
}

/// Collect every opaque pixel of the working image as a sample.
pub fn collect_samples(
    bitmap: &Bitmap,
    config: &SamplerConfig,
    ctx: &ExtractionContext<'_>,
) -> Result<Vec<Rgb>> {
    config.validate()?;
    let working = downsample(bitmap, config.max_dimension)?;

    let capacity = working.width() as usize * working.height() as usize;
    let mut samples: Vec<Rgb> = Vec::new();
    samples
        .try_reserve_exact(capacity)
        .map_err(|source| PaletteError::AllocationFailure {
            bytes: capacity * std::mem::size_of::<Rgb>(),
            source,
        })?;

    for row in working.rows() {
        for pixel in row {
            let [r, g, b, a] = pixel.0;
            if a > config.alpha_threshold {
                samples.push(Rgb::new(r, g, b).quantize(config.quantize_bits));
            }
        }
        ctx.checkpoint()?;
    }

    debug!(samples = samples.len(), "collected pixel samples");
    Ok(samples)
}
