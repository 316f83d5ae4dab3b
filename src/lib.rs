//! Visual palette extraction
//!
//! Picks a small set of colors that represent how an image *looks* rather
//! than which colors cover the most pixels. Four interchangeable strategies
//! share one sampler, one scorer and one deduplicator:
//!
//! - [`DensityConfig`]: DBSCAN over Lab colors, noise kept as accents
//! - [`MedianCutConfig`]: median cut with outlier pre-selection
//! - [`WeightedConfig`]: greedy pick from a scored histogram
//! - [`CentroidConfig`]: k-means++ over raw RGB samples
//!
//! Native hosts can follow a run through [`stream::extract_stream`]; the
//! wasm build exposes [`extract_palette`].

pub mod color;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod progress;
pub mod sampler;
pub mod scoring;
pub mod strategy;
#[cfg(not(target_arch = "wasm32"))]
pub mod stream;

pub use color::{LabColor, Rgb};
pub use config::{Algorithm, PaletteRequest};
pub use error::{PaletteError, Result};
pub use progress::{
    CancellationToken, ExtractionContext, NoProgress, ProgressEvent, ProgressSink, Stage,
};
pub use sampler::Bitmap;
pub use strategy::{
    CentroidConfig, DensityConfig, MedianCutConfig, PaletteStrategy, WeightedConfig,
};

use js_sys::Array;
use tracing::{info, info_span};
use wasm_bindgen::prelude::*;

// ------------------------------------------------------------
// Core entry points
// ------------------------------------------------------------

/// Run the requested strategy over `bitmap`, reporting through `ctx`.
///
/// An image with no opaque pixels is not an error: it completes with an
/// empty palette. Cancellation surfaces as [`PaletteError::Cancelled`].
pub fn extract(
    bitmap: &Bitmap,
    request: &PaletteRequest,
    ctx: &mut ExtractionContext<'_>,
) -> Result<Vec<Rgb>> {
    request.validate()?;
    let strategy = request.algorithm.strategy();
    let span = info_span!(
        "extract",
        algorithm = strategy.name(),
        target_colors = request.target_colors,
        width = bitmap.width(),
        height = bitmap.height()
    );
    let _guard = span.enter();

    let colors = strategy.extract(bitmap, request.target_colors, ctx)?;
    info!(colors = colors.len(), "palette extracted");
    Ok(colors)
}

/// [`extract`] without progress reporting.
pub fn extract_colors(bitmap: &Bitmap, request: &PaletteRequest) -> Result<Vec<Rgb>> {
    let mut sink = NoProgress;
    let mut ctx = ExtractionContext::new(&mut sink);
    extract(bitmap, request, &mut ctx)
}

/// Decode an encoded image (PNG, JPEG, ...) into a [`Bitmap`].
pub fn decode(input: &[u8]) -> Result<Bitmap> {
    let img = image::load_from_memory(input)?;
    Bitmap::from_dynamic(&img)
}

// ------------------------------------------------------------
// wasm binding
// ------------------------------------------------------------

/// Decode `input`, run the named algorithm with its default tuning and
/// format the palette as `#RRGGBB` strings.
pub fn palette_hex(input: &[u8], algorithm: &str, n_colors: usize) -> Result<Vec<String>> {
    let bitmap = decode(input)?;
    let algorithm: Algorithm = algorithm.parse()?;
    let request = PaletteRequest::new(algorithm, n_colors);
    let colors = extract_colors(&bitmap, &request)?;
    Ok(colors.iter().map(|c| c.to_hex()).collect())
}

/// Extract a palette from an encoded image.
///
/// `algorithm` is one of `density`, `median-cut`, `weighted` or `centroid`,
/// each with its default tuning. Returns an array of `#RRGGBB` strings.
#[wasm_bindgen]
pub fn extract_palette(
    input: Vec<u8>,
    algorithm: &str,
    n_colors: usize,
) -> std::result::Result<Array, JsValue> {
    let hex_colors = palette_hex(&input, algorithm, n_colors).map_err(|e| {
        if matches!(e, PaletteError::Decode { .. }) {
            JsValue::from_str(&format!("Unable to decode image: {e}"))
        } else {
            JsValue::from_str(&format!("Palette extraction failed: {e}"))
        }
    })?;

    // Convert to JS types
    let palette_js = Array::new();
    for hex in hex_colors {
        palette_js.push(&JsValue::from_str(&hex));
    }
    Ok(palette_js)
}

// ------------------------------------------------------------
// Native helpers
// ------------------------------------------------------------

/// Decode `input` and run [`extract_colors`] on it.
#[cfg(not(target_arch = "wasm32"))]
pub fn extract_palette_bytes(input: &[u8], request: &PaletteRequest) -> Result<Vec<Rgb>> {
    let bitmap = decode(input)?;
    extract_colors(&bitmap, request)
}
