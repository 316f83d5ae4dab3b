//! Direct ranking of histogram colors by visual importance
//!
//! No grouping step: every bucket of a finely quantized histogram is scored,
//! then accepted greedily in score order while it stays far enough from
//! everything accepted before it.

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

use super::{PaletteStrategy, check_threshold};
use crate::Result;
use crate::color::{LabColor, Rgb};
use crate::dedupe::{dedupe, is_distinct};
use crate::progress::{Counters, ExtractionContext, Stage};
use crate::sampler::{Bitmap, SamplerConfig, build_histogram};
use crate::scoring::{ColorPoint, ScoreWeights, ScoredColor, score_checked, sort_by_importance};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightedConfig {
    pub sampler: SamplerConfig,
    pub accept_threshold: f64,
    pub dedupe_threshold: f64,
    pub weights: ScoreWeights,
}

impl Default for WeightedConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::new(150, 2),
            accept_threshold: 12.0,
            dedupe_threshold: 10.0,
            weights: ScoreWeights::WEIGHTED,
        }
    }
}

impl WeightedConfig {
    pub fn validate(&self) -> Result<()> {
        self.sampler.validate()?;
        check_threshold("accept_threshold", self.accept_threshold)?;
        check_threshold("dedupe_threshold", self.dedupe_threshold)
    }
}

/// Walk `ranked` in order, keeping a color iff it is at least `threshold`
/// from every color already kept. Stops at `target_colors`.
pub fn greedy_select(ranked: &[ScoredColor], target_colors: usize, threshold: f64) -> Vec<Rgb> {
    let mut accepted: Vec<LabColor> = Vec::with_capacity(target_colors);
    for candidate in ranked {
        if accepted.len() >= target_colors {
            break;
        }
        if is_distinct(&candidate.lab, &accepted, threshold) {
            accepted.push(candidate.lab);
        }
    }
    accepted.into_iter().map(|lab| lab.rgb).collect()
}

impl PaletteStrategy for WeightedConfig {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn extract(
        &self,
        bitmap: &Bitmap,
        target_colors: usize,
        ctx: &mut ExtractionContext<'_>,
    ) -> Result<Vec<Rgb>> {
        self.validate()?;
        let _span = info_span!("weighted", target_colors).entered();

        ctx.report(Stage::BuildingHistogram, 0.2, Counters::default())?;
        let histogram = build_histogram(bitmap, &self.sampler, ctx)?;
        if histogram.is_empty() || target_colors == 0 {
            ctx.complete(Vec::new(), Counters::default())?;
            return Ok(Vec::new());
        }

        let mut counters = Counters {
            unique_colors: histogram.len(),
            ..Counters::default()
        };
        ctx.report(Stage::Scoring, 0.4, counters)?;
        let points: Vec<ColorPoint> = histogram.iter().map(ColorPoint::from).collect();
        let mut ranked = score_checked(&points, &self.weights, ctx)?;
        sort_by_importance(&mut ranked);

        let accepted = greedy_select(&ranked, target_colors, self.accept_threshold);
        counters.selected = accepted.len();
        ctx.report(Stage::Selecting, 0.6, counters)?;

        let colors = dedupe(&accepted, self.dedupe_threshold);
        counters.selected = colors.len();
        ctx.report(Stage::Deduplicating, 0.8, counters)?;
        debug!(
            candidates = ranked.len(),
            accepted = accepted.len(),
            kept = colors.len(),
            "weighted selection finished"
        );

        ctx.complete(colors.clone(), counters)?;
        Ok(colors)
    }
}
