//! Density clustering (DBSCAN over Lab histogram colors)
//!
//! Colors with too few perceptual neighbors become noise. Noise is where
//! small, striking accents end up, so selection takes the most important
//! noise colors first and only then one representative per cluster.

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

use super::{PaletteStrategy, check_threshold};
use crate::color::Rgb;
use crate::dedupe::dedupe;
use crate::progress::{Counters, ExtractionContext, Stage};
use crate::sampler::{Bitmap, SamplerConfig, build_histogram};
use crate::scoring::{ColorPoint, ScoreWeights, ScoredColor, score_checked, sort_by_importance};
use crate::{PaletteError, Result};

/// Neighbor expansions between two cancellation checks.
const EXPANSIONS_PER_CHECK: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    pub sampler: SamplerConfig,
    /// Neighborhood radius in ΔE.
    pub eps: f64,
    /// Neighborhood size (self included) that makes a core point.
    pub min_points: usize,
    /// Share of the target reserved for noise colors.
    pub outlier_fraction: f64,
    /// Buckets rarer than `max_frequency / rare_color_divisor` are dropped.
    /// 0 keeps every bucket.
    pub rare_color_divisor: u32,
    pub dedupe_threshold: f64,
    pub weights: ScoreWeights,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::new(150, 5),
            eps: 15.0,
            min_points: 2,
            outlier_fraction: 0.35,
            rare_color_divisor: 200,
            dedupe_threshold: 8.0,
            weights: ScoreWeights::DENSITY,
        }
    }
}

impl DensityConfig {
    pub fn validate(&self) -> Result<()> {
        self.sampler.validate()?;
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(PaletteError::invalid_parameter("eps", self.eps));
        }
        if self.min_points == 0 {
            return Err(PaletteError::invalid_parameter("min_points", self.min_points));
        }
        if !(0.0..=1.0).contains(&self.outlier_fraction) {
            return Err(PaletteError::invalid_parameter(
                "outlier_fraction",
                self.outlier_fraction,
            ));
        }
        check_threshold("dedupe_threshold", self.dedupe_threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Unclassified,
    Noise,
    Cluster(usize),
}

/// Result of one DBSCAN pass: point indices per cluster, plus noise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub clusters: Vec<Vec<usize>>,
    pub noise: Vec<usize>,
}

struct Dbscan<'p> {
    points: &'p [ScoredColor],
    eps: f64,
    min_points: usize,
    labels: Vec<Label>,
    visited: Vec<bool>,
    noise_count: usize,
    expansions: usize,
}

impl<'p> Dbscan<'p> {
    fn new(points: &'p [ScoredColor], eps: f64, min_points: usize) -> Self {
        Self {
            points,
            eps,
            min_points,
            labels: vec![Label::Unclassified; points.len()],
            visited: vec![false; points.len()],
            noise_count: 0,
            expansions: 0,
        }
    }

    fn region_query(&self, index: usize) -> Vec<usize> {
        let center = &self.points[index].lab;
        self.points
            .iter()
            .enumerate()
            .filter(|(_, p)| center.delta_e(&p.lab) <= self.eps)
            .map(|(i, _)| i)
            .collect()
    }

    fn relabel(&mut self, index: usize, label: Label) {
        match (self.labels[index], label) {
            (Label::Noise, Label::Cluster(_)) => self.noise_count -= 1,
            (Label::Unclassified, Label::Noise) => self.noise_count += 1,
            _ => {}
        }
        self.labels[index] = label;
    }

    fn expand(
        &mut self,
        index: usize,
        mut neighbors: Vec<usize>,
        cluster: usize,
        ctx: &ExtractionContext<'_>,
    ) -> Result<()> {
        self.relabel(index, Label::Cluster(cluster));
        let mut i = 0;
        while i < neighbors.len() {
            let neighbor = neighbors[i];
            if !self.visited[neighbor] {
                self.visited[neighbor] = true;
                let more = self.region_query(neighbor);
                if more.len() >= self.min_points {
                    neighbors.extend(more);
                }
            }
            if matches!(self.labels[neighbor], Label::Unclassified | Label::Noise) {
                self.relabel(neighbor, Label::Cluster(cluster));
            }
            i += 1;
            self.expansions += 1;
            if self.expansions % EXPANSIONS_PER_CHECK == 0 {
                ctx.checkpoint()?;
            }
        }
        Ok(())
    }

    fn run(mut self, ctx: &mut ExtractionContext<'_>) -> Result<Partition> {
        let n = self.points.len();
        let report_every = (n / 20).max(1);
        let mut next_cluster = 0;

        for i in 0..n {
            if self.visited[i] {
                continue;
            }
            self.visited[i] = true;
            let neighbors = self.region_query(i);
            if neighbors.len() < self.min_points {
                self.relabel(i, Label::Noise);
            } else {
                self.expand(i, neighbors, next_cluster, ctx)?;
                next_cluster += 1;
            }

            if i % report_every == 0 {
                let counters = Counters {
                    clusters: next_cluster,
                    noise: self.noise_count,
                    ..Counters::default()
                };
                ctx.report(
                    Stage::Clustering {
                        clusters: next_cluster,
                        noise: self.noise_count,
                    },
                    0.3 + 0.3 * (i + 1) as f64 / n as f64,
                    counters,
                )?;
            }
            ctx.checkpoint()?;
        }

        let mut partition = Partition {
            clusters: vec![Vec::new(); next_cluster],
            noise: Vec::new(),
        };
        for (i, label) in self.labels.iter().enumerate() {
            match *label {
                Label::Cluster(id) => partition.clusters[id].push(i),
                Label::Noise => partition.noise.push(i),
                Label::Unclassified => {}
            }
        }
        partition.clusters.retain(|c| !c.is_empty());
        Ok(partition)
    }
}

/// Partition `points` into ΔE-density clusters and noise.
pub fn dbscan(
    points: &[ScoredColor],
    eps: f64,
    min_points: usize,
    ctx: &mut ExtractionContext<'_>,
) -> Result<Partition> {
    Dbscan::new(points, eps, min_points).run(ctx)
}

fn best_member(points: &[ScoredColor], members: &[usize]) -> Option<usize> {
    members.iter().copied().max_by(|&x, &y| {
        points[x]
            .visual_importance
            .total_cmp(&points[y].visual_importance)
            .then(y.cmp(&x))
    })
}

/// Noise first (up to `outlier_fraction` of the target), then the best
/// member of each cluster, then any remaining noise.
pub fn select_colors(
    points: &[ScoredColor],
    partition: &Partition,
    target_colors: usize,
    outlier_fraction: f64,
) -> Vec<Rgb> {
    if target_colors == 0 {
        return Vec::new();
    }
    let mut noise: Vec<ScoredColor> = partition.noise.iter().map(|&i| points[i]).collect();
    sort_by_importance(&mut noise);

    let outlier_target = ((target_colors as f64 * outlier_fraction) as usize)
        .max(1)
        .min(target_colors);
    let mut selected: Vec<Rgb> = noise.iter().take(outlier_target).map(ScoredColor::rgb).collect();

    let mut representatives: Vec<ScoredColor> = partition
        .clusters
        .iter()
        .filter_map(|members| best_member(points, members))
        .map(|i| points[i])
        .collect();
    sort_by_importance(&mut representatives);
    for rep in representatives {
        if selected.len() >= target_colors {
            break;
        }
        selected.push(rep.rgb());
    }

    for extra in noise.iter().skip(outlier_target) {
        if selected.len() >= target_colors {
            break;
        }
        selected.push(extra.rgb());
    }
    selected
}

impl PaletteStrategy for DensityConfig {
    fn name(&self) -> &'static str {
        "density"
    }

    fn extract(
        &self,
        bitmap: &Bitmap,
        target_colors: usize,
        ctx: &mut ExtractionContext<'_>,
    ) -> Result<Vec<Rgb>> {
        self.validate()?;
        let _span = info_span!("density", target_colors, eps = self.eps).entered();

        ctx.report(Stage::Preprocessing, 0.1, Counters::default())?;
        ctx.report(Stage::BuildingHistogram, 0.2, Counters::default())?;
        let histogram =
            build_histogram(bitmap, &self.sampler, ctx)?.without_rare(self.rare_color_divisor);
        if histogram.is_empty() || target_colors == 0 {
            debug!("no opaque colors to cluster");
            ctx.complete(Vec::new(), Counters::default())?;
            return Ok(Vec::new());
        }

        ctx.report(Stage::Scoring, 0.25, Counters::default())?;
        let points: Vec<ColorPoint> = histogram.iter().map(ColorPoint::from).collect();
        let scored = score_checked(&points, &self.weights, ctx)?;

        let partition = dbscan(&scored, self.eps, self.min_points, ctx)?;
        let counters = Counters {
            clusters: partition.clusters.len(),
            noise: partition.noise.len(),
            outliers: partition.noise.len(),
            ..Counters::default()
        };
        debug!(
            points = scored.len(),
            clusters = partition.clusters.len(),
            noise = partition.noise.len(),
            "density clustering finished"
        );

        ctx.report(Stage::Selecting, 0.7, counters)?;
        let selected = select_colors(&scored, &partition, target_colors, self.outlier_fraction);

        ctx.report(Stage::Deduplicating, 0.9, counters)?;
        let colors = dedupe(&selected, self.dedupe_threshold);
        debug!(selected = selected.len(), kept = colors.len(), "deduplicated selection");

        ctx.complete(colors.clone(), counters)?;
        Ok(colors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::scoring::score;

    fn scored(colors: &[(Rgb, u32)]) -> Vec<ScoredColor> {
        let points: Vec<ColorPoint> = colors.iter().map(|&(c, f)| ColorPoint::new(c, f)).collect();
        score(&points, &ScoreWeights::DENSITY)
    }

    #[test]
    fn test_dbscan_separates_clusters_and_noise() {
        let points = scored(&[
            (Rgb::new(200, 20, 20), 10),
            (Rgb::new(205, 25, 20), 10),
            (Rgb::new(210, 20, 25), 10),
            (Rgb::new(20, 20, 200), 10),
            (Rgb::new(25, 20, 205), 10),
            (Rgb::new(30, 200, 30), 1),
        ]);
        let mut sink = NoProgress;
        let mut ctx = ExtractionContext::new(&mut sink);
        let partition = dbscan(&points, 15.0, 2, &mut ctx).unwrap();
        assert_eq!(partition.clusters, vec![vec![0, 1, 2], vec![3, 4]]);
        assert_eq!(partition.noise, vec![5]);
    }

    #[test]
    fn test_border_noise_is_absorbed() {
        // 0 is a lone point when visited first with min_points 3, then
        // becomes a border point of the cluster formed around 1.
        let points = scored(&[
            (Rgb::new(100, 100, 100), 1),
            (Rgb::new(106, 106, 106), 1),
            (Rgb::new(112, 112, 112), 1),
            (Rgb::new(118, 118, 118), 1),
        ]);
        let d01 = points[0].lab.delta_e(&points[1].lab);
        assert!(d01 < 4.0, "test points too far apart: {d01}");
        let eps = d01 * 1.2;
        let mut sink = NoProgress;
        let mut ctx = ExtractionContext::new(&mut sink);
        let partition = dbscan(&points, eps, 3, &mut ctx).unwrap();
        assert_eq!(partition.clusters.len(), 1);
        assert_eq!(partition.clusters[0], vec![0, 1, 2, 3]);
        assert!(partition.noise.is_empty());
    }

    #[test]
    fn test_selection_prefers_noise_then_clusters() {
        let points = scored(&[
            (Rgb::new(240, 240, 240), 900),
            (Rgb::new(236, 236, 236), 800),
            (Rgb::new(40, 40, 40), 700),
            (Rgb::new(44, 44, 44), 600),
            (Rgb::new(230, 10, 10), 5),
        ]);
        let partition = Partition {
            clusters: vec![vec![0, 1], vec![2, 3]],
            noise: vec![4],
        };
        let colors = select_colors(&points, &partition, 3, 0.35);
        assert_eq!(colors.len(), 3);
        assert_eq!(colors[0], Rgb::new(230, 10, 10));
    }

    #[test]
    fn test_selection_backfills_with_noise() {
        let points = scored(&[(Rgb::new(224, 224, 224), 9000), (Rgb::new(224, 0, 0), 1000)]);
        let partition = Partition {
            clusters: Vec::new(),
            noise: vec![0, 1],
        };
        let colors = select_colors(&points, &partition, 3, 0.35);
        assert_eq!(colors.len(), 2);
        assert!(colors.contains(&Rgb::new(224, 224, 224)));
        assert!(colors.contains(&Rgb::new(224, 0, 0)));
    }

    #[test]
    fn test_zero_rare_divisor_keeps_every_color() {
        let image = image::RgbaImage::from_fn(100, 100, |_, y| match y {
            0..5 => image::Rgba([255, 255, 255, 255]),
            5..95 => image::Rgba([0, 0, 255, 255]),
            _ => image::Rgba([0, 160, 0, 255]),
        });
        let bitmap = Bitmap::from_image(image).unwrap();
        let run = |rare_color_divisor| {
            let config = DensityConfig {
                rare_color_divisor,
                ..DensityConfig::default()
            };
            let mut sink = NoProgress;
            let mut ctx = ExtractionContext::new(&mut sink);
            config.extract(&bitmap, 4, &mut ctx).unwrap()
        };
        let unfiltered = run(0);
        assert_eq!(unfiltered.len(), 3);
        assert_eq!(unfiltered.len(), run(200).len());
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let config = DensityConfig {
            eps: 0.0,
            ..DensityConfig::default()
        };
        assert!(config.validate().is_err());
        let config = DensityConfig {
            min_points: 0,
            ..DensityConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
