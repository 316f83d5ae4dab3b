//! Interchangeable palette extraction algorithms
//!
//! All four share the sampler, scorer and deduplicator; they differ only in
//! how candidates are grouped and selected, and in their tuning constants.

pub mod centroid;
pub mod density;
pub mod median_cut;
pub mod weighted;

pub use centroid::CentroidConfig;
pub use density::DensityConfig;
pub use median_cut::MedianCutConfig;
pub use weighted::WeightedConfig;

use crate::Result;
use crate::color::Rgb;
use crate::progress::ExtractionContext;
use crate::sampler::Bitmap;

/// A palette extraction algorithm.
///
/// Implementations emit their own stage events through `ctx`, finishing with
/// [`ExtractionContext::complete`], and return at most `target_colors` colors.
pub trait PaletteStrategy {
    fn name(&self) -> &'static str;

    fn extract(
        &self,
        bitmap: &Bitmap,
        target_colors: usize,
        ctx: &mut ExtractionContext<'_>,
    ) -> Result<Vec<Rgb>>;
}

/// Validate a non-negative, finite ΔE threshold.
pub(crate) fn check_threshold(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(crate::PaletteError::invalid_parameter(name, value))
    }
}
