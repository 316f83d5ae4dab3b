//! Median-cut quantization with outlier pre-selection
//!
//! Plain median cut favors large, populous regions and will happily average
//! a small accent color into its neighbors. Colors that sit far from every
//! other histogram color are therefore picked first, and the boxes only fill
//! what is left.

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, trace};

use super::{PaletteStrategy, check_threshold};
use crate::Result;
use crate::color::Rgb;
use crate::dedupe::{dedupe, is_distinct, merge_similar};
use crate::progress::{Counters, ExtractionContext, Stage};
use crate::sampler::{Bitmap, Histogram, HistogramEntry, SamplerConfig, build_histogram};
use crate::scoring::{ColorPoint, ScoreWeights, score, score_checked, sort_by_importance};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedianCutConfig {
    pub sampler: SamplerConfig,
    /// Minimum ΔE to every other color for a color to count as an outlier.
    pub outlier_threshold: f64,
    /// A box color is only added when farther than this from every pick.
    pub selection_threshold: f64,
    /// Merge, backfill and final dedupe distance.
    pub merge_threshold: f64,
    /// Boxes cut beyond the number of open slots.
    pub extra_boxes: usize,
    pub weights: ScoreWeights,
}

impl Default for MedianCutConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::new(150, 3),
            outlier_threshold: 10.0,
            selection_threshold: 10.0,
            merge_threshold: 8.0,
            extra_boxes: 2,
            weights: ScoreWeights::MEDIAN_CUT,
        }
    }
}

impl MedianCutConfig {
    pub fn validate(&self) -> Result<()> {
        self.sampler.validate()?;
        check_threshold("outlier_threshold", self.outlier_threshold)?;
        check_threshold("selection_threshold", self.selection_threshold)?;
        check_threshold("merge_threshold", self.merge_threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Red,
    Green,
    Blue,
}

impl Axis {
    fn of(self, color: Rgb) -> u8 {
        match self {
            Axis::Red => color.r,
            Axis::Green => color.g,
            Axis::Blue => color.b,
        }
    }
}

/// Axis-aligned RGB region owning the histogram entries inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorBox {
    pub min: Rgb,
    pub max: Rgb,
    entries: Vec<HistogramEntry>,
    population: u64,
}

impl ColorBox {
    /// Tightest box around `entries`; `None` when there are none.
    pub fn bounding(entries: Vec<HistogramEntry>) -> Option<Self> {
        let first = entries.first()?.color;
        let (mut min, mut max) = (first, first);
        for entry in &entries {
            let c = entry.color;
            min = Rgb::new(min.r.min(c.r), min.g.min(c.g), min.b.min(c.b));
            max = Rgb::new(max.r.max(c.r), max.g.max(c.g), max.b.max(c.b));
        }
        let population = entries.iter().map(|e| u64::from(e.frequency)).sum();
        Some(Self {
            min,
            max,
            entries,
            population,
        })
    }

    pub fn entries(&self) -> &[HistogramEntry] {
        &self.entries
    }

    pub fn population(&self) -> u64 {
        self.population
    }

    fn range(&self, axis: Axis) -> u8 {
        axis.of(self.max) - axis.of(self.min)
    }

    pub fn volume(&self) -> u64 {
        [Axis::Red, Axis::Green, Axis::Blue]
            .into_iter()
            .map(|axis| u64::from(self.range(axis)) + 1)
            .product()
    }

    pub fn can_split(&self) -> bool {
        self.population > 1 && self.min != self.max
    }

    /// Longest axis by raw range; ties go red, then green.
    pub fn longest_axis(&self) -> Axis {
        let (r, g, b) = (
            self.range(Axis::Red),
            self.range(Axis::Green),
            self.range(Axis::Blue),
        );
        if r >= g && r >= b {
            Axis::Red
        } else if g >= b {
            Axis::Green
        } else {
            Axis::Blue
        }
    }

    /// Split at the population-weighted median of the longest axis. The
    /// lower child takes every entry at or below the split value.
    pub fn split(&self) -> Option<(ColorBox, ColorBox)> {
        if !self.can_split() {
            return None;
        }
        let axis = self.longest_axis();
        let mut sorted = self.entries.clone();
        sorted.sort_by_key(|e| axis.of(e.color));

        let half = self.population / 2;
        let mut cumulative = 0u64;
        let mut split_value = axis.of(self.max);
        for entry in &sorted {
            cumulative += u64::from(entry.frequency);
            if cumulative >= half {
                split_value = axis.of(entry.color);
                break;
            }
        }
        if split_value == axis.of(self.max) {
            // Heavy top slice: cut just below it so both halves are populated.
            split_value = sorted
                .iter()
                .map(|e| axis.of(e.color))
                .filter(|&v| v < split_value)
                .max()?;
        }

        let (lower, upper): (Vec<_>, Vec<_>) = sorted
            .into_iter()
            .partition(|e| axis.of(e.color) <= split_value);
        Some((ColorBox::bounding(lower)?, ColorBox::bounding(upper)?))
    }

    /// Population-weighted mean color, rounded per channel.
    pub fn average_color(&self) -> Rgb {
        if self.population == 0 {
            return Rgb::new(
                ((u16::from(self.min.r) + u16::from(self.max.r)) / 2) as u8,
                ((u16::from(self.min.g) + u16::from(self.max.g)) / 2) as u8,
                ((u16::from(self.min.b) + u16::from(self.max.b)) / 2) as u8,
            );
        }
        let (mut r, mut g, mut b) = (0u64, 0u64, 0u64);
        for entry in &self.entries {
            let weight = u64::from(entry.frequency);
            r += u64::from(entry.color.r) * weight;
            g += u64::from(entry.color.g) * weight;
            b += u64::from(entry.color.b) * weight;
        }
        let mean = |sum: u64| ((sum as f64 / self.population as f64).round()).min(255.0) as u8;
        Rgb::new(mean(r), mean(g), mean(b))
    }
}

/// Cut the histogram into at most `max_boxes` boxes, always splitting the
/// splittable box with the largest population × volume.
pub fn median_cut(
    histogram: &Histogram,
    max_boxes: usize,
    ctx: &mut ExtractionContext<'_>,
) -> Result<Vec<ColorBox>> {
    let Some(initial) = ColorBox::bounding(histogram.entries()) else {
        return Ok(Vec::new());
    };
    let mut boxes = vec![initial];
    let mut iteration = 0;

    while boxes.len() < max_boxes {
        let mut candidate: Option<(usize, u128)> = None;
        for (i, b) in boxes.iter().enumerate() {
            if !b.can_split() {
                continue;
            }
            let priority = u128::from(b.population()) * u128::from(b.volume());
            if candidate.is_none_or(|(_, best)| priority > best) {
                candidate = Some((i, priority));
            }
        }
        let Some((index, _)) = candidate else { break };
        let Some((lower, upper)) = boxes[index].split() else { break };
        boxes.remove(index);
        boxes.push(lower);
        boxes.push(upper);

        iteration += 1;
        let fill = (boxes.len() as f64 / max_boxes.max(1) as f64).min(1.0);
        ctx.report(
            Stage::MedianCut {
                iteration,
                boxes: boxes.len(),
            },
            0.3 + 0.4 * fill,
            Counters {
                boxes: boxes.len(),
                iteration,
                ..Counters::default()
            },
        )?;
    }

    trace!(boxes = boxes.len(), iteration, "median cut finished");
    Ok(boxes)
}

impl PaletteStrategy for MedianCutConfig {
    fn name(&self) -> &'static str {
        "median_cut"
    }

    fn extract(
        &self,
        bitmap: &Bitmap,
        target_colors: usize,
        ctx: &mut ExtractionContext<'_>,
    ) -> Result<Vec<Rgb>> {
        self.validate()?;
        let _span = info_span!("median_cut", target_colors).entered();

        ctx.report(Stage::Preprocessing, 0.1, Counters::default())?;
        ctx.report(Stage::BuildingHistogram, 0.2, Counters::default())?;
        let histogram = build_histogram(bitmap, &self.sampler, ctx)?;
        if histogram.is_empty() || target_colors == 0 {
            debug!("no opaque colors to quantize");
            ctx.complete(Vec::new(), Counters::default())?;
            return Ok(Vec::new());
        }

        ctx.report(Stage::DetectingOutliers, 0.3, Counters::default())?;
        let points: Vec<ColorPoint> = histogram.iter().map(ColorPoint::from).collect();
        let scored = score_checked(&points, &self.weights, ctx)?;
        let mut outliers: Vec<_> = scored
            .iter()
            .filter(|s| s.uniqueness > self.outlier_threshold)
            .copied()
            .collect();
        outliers.sort_by(|x, y| y.uniqueness.total_cmp(&x.uniqueness));
        let outlier_count = outliers.len().min(target_colors / 2);

        let mut candidates: Vec<ColorPoint> = outliers
            .iter()
            .take(outlier_count)
            .map(|s| s.point())
            .collect();
        let mut counters = Counters {
            outliers: outlier_count,
            ..Counters::default()
        };

        let remaining = target_colors - candidates.len();
        if remaining > 0 {
            let boxes = median_cut(&histogram, remaining + self.extra_boxes, ctx)?;
            counters.boxes = boxes.len();
            for color_box in &boxes {
                let average = ColorPoint::new(
                    color_box.average_color(),
                    u32::try_from(color_box.population()).unwrap_or(u32::MAX),
                );
                let picked: Vec<_> = candidates.iter().map(|c| c.lab).collect();
                if picked
                    .iter()
                    .all(|p| p.delta_e(&average.lab) > self.selection_threshold)
                {
                    candidates.push(average);
                    if candidates.len() >= target_colors {
                        break;
                    }
                }
            }
        }
        debug!(
            outliers = outlier_count,
            boxes = counters.boxes,
            candidates = candidates.len(),
            "collected median cut candidates"
        );

        ctx.report(Stage::Merging, 0.8, counters)?;
        let merged = merge_similar(&candidates, self.merge_threshold);
        let mut ranked = score(&merged, &self.weights);
        sort_by_importance(&mut ranked);
        let mut selected: Vec<Rgb> = ranked.iter().take(target_colors).map(|s| s.rgb()).collect();

        if selected.len() < target_colors {
            let mut by_frequency = histogram.entries();
            by_frequency.sort_by(|x, y| y.frequency.cmp(&x.frequency));
            let mut kept: Vec<_> = selected.iter().map(|c| c.to_lab()).collect();
            for entry in by_frequency {
                if selected.len() >= target_colors {
                    break;
                }
                let lab = entry.color.to_lab();
                if is_distinct(&lab, &kept, self.merge_threshold) {
                    kept.push(lab);
                    selected.push(entry.color);
                }
            }
        }

        ctx.report(Stage::Deduplicating, 0.9, counters)?;
        let colors = dedupe(&selected, self.merge_threshold);
        ctx.complete(colors.clone(), counters)?;
        Ok(colors)
    }
}
