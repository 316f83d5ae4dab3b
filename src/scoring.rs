//! Uniqueness and visual-importance scoring
//!
//! A point's uniqueness is its smallest ΔE to any other point in the working
//! set, so the whole set must be known before any score is final. Scoring is
//! therefore a pure function from an immutable slice to a fresh vector; each
//! point only reads its peers, which lets the O(n²) pass run on rayon.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::color::{CHROMA_SCALE, LabColor, Rgb};
use crate::progress::ExtractionContext;
use crate::sampler::HistogramEntry;

/// Uniqueness reported for a point with no peers.
pub const ISOLATED_UNIQUENESS: f64 = 100.0;

/// ΔE at which the uniqueness score saturates.
pub const UNIQUENESS_SCALE: f64 = 30.0;

/// Points scored between two cancellation checks.
const SCORE_CHUNK: usize = 512;

/// Linear mix of the four normalized signals. Frequency enters through
/// `ln(frequency + 1) / frequency_log_divisor` and is meant as a tie-breaker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub uniqueness: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub frequency: f64,
    pub frequency_log_divisor: f64,
}

impl ScoreWeights {
    pub const DENSITY: Self = Self {
        uniqueness: 0.5,
        contrast: 0.3,
        saturation: 0.2,
        frequency: 0.05,
        frequency_log_divisor: 15.0,
    };

    pub const MEDIAN_CUT: Self = Self {
        uniqueness: 0.5,
        contrast: 0.15,
        saturation: 0.15,
        frequency: 0.2,
        frequency_log_divisor: 10.0,
    };

    pub const WEIGHTED: Self = Self {
        uniqueness: 0.6,
        contrast: 0.25,
        saturation: 0.0,
        frequency: 0.15,
        frequency_log_divisor: 12.0,
    };

    pub fn importance(&self, lab: &LabColor, frequency: u32, uniqueness: f64) -> f64 {
        let uniqueness_score = (uniqueness / UNIQUENESS_SCALE).min(1.0);
        let saturation_score = (lab.saturation() / CHROMA_SCALE).min(1.0);
        let divisor = if self.frequency_log_divisor > 0.0 {
            self.frequency_log_divisor
        } else {
            1.0
        };
        let frequency_score = (f64::from(frequency) + 1.0).ln() / divisor;

        uniqueness_score * self.uniqueness
            + lab.contrast() * self.contrast
            + saturation_score * self.saturation
            + frequency_score * self.frequency
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self::DENSITY
    }
}

/// An unscored candidate: a perceptual color and how many pixels it covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorPoint {
    pub lab: LabColor,
    pub frequency: u32,
}

impl ColorPoint {
    pub fn new(rgb: Rgb, frequency: u32) -> Self {
        Self {
            lab: rgb.to_lab(),
            frequency,
        }
    }
}

impl From<HistogramEntry> for ColorPoint {
    fn from(entry: HistogramEntry) -> Self {
        Self::new(entry.color, entry.frequency)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredColor {
    pub lab: LabColor,
    pub frequency: u32,
    pub uniqueness: f64,
    pub visual_importance: f64,
}

impl ScoredColor {
    pub fn rgb(&self) -> Rgb {
        self.lab.rgb
    }

    pub fn point(&self) -> ColorPoint {
        ColorPoint {
            lab: self.lab,
            frequency: self.frequency,
        }
    }
}

/// Smallest ΔE from `points[index]` to any point with a different RGB triple.
pub fn uniqueness_of(points: &[ColorPoint], index: usize) -> f64 {
    let this = &points[index].lab;
    let nearest = points
        .iter()
        .filter(|other| other.lab.rgb != this.rgb)
        .map(|other| this.delta_e(&other.lab))
        .fold(f64::INFINITY, f64::min);
    if nearest.is_finite() {
        nearest
    } else {
        ISOLATED_UNIQUENESS
    }
}

/// Score every point against the full set.
pub fn score(points: &[ColorPoint], weights: &ScoreWeights) -> Vec<ScoredColor> {
    (0..points.len())
        .into_par_iter()
        .map(|i| scored(points, i, weights))
        .collect()
}

/// [`score`] with a cancellation check between chunks.
pub fn score_checked(
    points: &[ColorPoint],
    weights: &ScoreWeights,
    ctx: &ExtractionContext<'_>,
) -> Result<Vec<ScoredColor>> {
    let mut out: Vec<ScoredColor> = Vec::with_capacity(points.len());
    for start in (0..points.len()).step_by(SCORE_CHUNK) {
        ctx.checkpoint()?;
        let end = (start + SCORE_CHUNK).min(points.len());
        out.par_extend((start..end).into_par_iter().map(|i| scored(points, i, weights)));
    }
    Ok(out)
}

fn scored(points: &[ColorPoint], index: usize, weights: &ScoreWeights) -> ScoredColor {
    let point = points[index];
    let uniqueness = uniqueness_of(points, index);
    ScoredColor {
        lab: point.lab,
        frequency: point.frequency,
        uniqueness,
        visual_importance: weights.importance(&point.lab, point.frequency, uniqueness),
    }
}

/// Sort descending by visual importance. Ties keep their relative order.
pub fn sort_by_importance(scored: &mut [ScoredColor]) {
    scored.sort_by(|x, y| y.visual_importance.total_cmp(&x.visual_importance));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;

    fn points(colors: &[(Rgb, u32)]) -> Vec<ColorPoint> {
        colors.iter().map(|&(c, f)| ColorPoint::new(c, f)).collect()
    }

    #[test]
    fn test_lone_point_gets_fallback_uniqueness() {
        let scored = score(&points(&[(Rgb::new(10, 20, 30), 5)]), &ScoreWeights::DENSITY);
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].uniqueness, ISOLATED_UNIQUENESS);
    }

    #[test]
    fn test_uniqueness_is_nearest_neighbor_distance() {
        let set = points(&[
            (Rgb::new(200, 10, 10), 1),
            (Rgb::new(205, 10, 10), 1),
            (Rgb::new(10, 10, 200), 1),
        ]);
        let scored = score(&set, &ScoreWeights::DENSITY);
        let near = set[0].lab.delta_e(&set[1].lab);
        assert!((scored[0].uniqueness - near).abs() < 1e-9);
        assert!((scored[1].uniqueness - near).abs() < 1e-9);
        assert!(scored[2].uniqueness > 50.0);
    }

    #[test]
    fn test_small_outlier_outranks_large_background() {
        let set = points(&[
            (Rgb::new(250, 250, 250), 9000),
            (Rgb::new(245, 245, 245), 8000),
            (Rgb::new(240, 244, 246), 7000),
            (Rgb::new(230, 20, 20), 30),
        ]);
        let mut scored = score(&set, &ScoreWeights::DENSITY);
        sort_by_importance(&mut scored);
        assert_eq!(scored[0].rgb(), Rgb::new(230, 20, 20));
    }

    #[test]
    fn test_checked_scoring_matches_plain() {
        let set: Vec<ColorPoint> = (0..700u32)
            .map(|i| ColorPoint::new(Rgb::new((i % 256) as u8, (i / 3 % 256) as u8, 40), i + 1))
            .collect();
        let mut sink = NoProgress;
        let ctx = ExtractionContext::new(&mut sink);
        let checked = score_checked(&set, &ScoreWeights::WEIGHTED, &ctx).unwrap();
        assert_eq!(checked, score(&set, &ScoreWeights::WEIGHTED));
    }

    #[test]
    fn test_frequency_is_a_tie_breaker() {
        let lab = Rgb::new(90, 140, 60).to_lab();
        let weights = ScoreWeights::DENSITY;
        let rare = weights.importance(&lab, 1, 20.0);
        let common = weights.importance(&lab, 10_000, 20.0);
        assert!(common > rare);
        assert!(common - rare < 0.05);
    }
}
