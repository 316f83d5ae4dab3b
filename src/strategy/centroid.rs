//! k-means over raw RGB samples, seeded with k-means++
//!
//! Distances here are plain RGB Euclidean, not ΔE. Output centers are not
//! scored or deduplicated; averaging already keeps them apart.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

use super::{PaletteStrategy, check_threshold};
use crate::color::{Rgb, sort_by_hue};
use crate::progress::{ConvergenceInfo, Counters, ExtractionContext, ProgressEvent, Stage};
use crate::sampler::{Bitmap, SamplerConfig, collect_samples};
use crate::{PaletteError, Result};

type Center = [f64; 3];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentroidConfig {
    pub sampler: SamplerConfig,
    pub max_iterations: usize,
    /// Largest center movement, in RGB units, that still counts as settled.
    pub convergence_threshold: f64,
    /// Fixed RNG seed for reproducible runs. Random when absent.
    pub seed: Option<u64>,
    /// Smallest batch handed to one worker during assignment.
    pub min_batch: usize,
}

impl Default for CentroidConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::new(100, 0),
            max_iterations: 10,
            convergence_threshold: 1.0,
            seed: None,
            min_batch: 100,
        }
    }
}

impl CentroidConfig {
    pub fn validate(&self) -> Result<()> {
        self.sampler.validate()?;
        if self.max_iterations == 0 {
            return Err(PaletteError::invalid_parameter(
                "max_iterations",
                self.max_iterations,
            ));
        }
        check_threshold("convergence_threshold", self.convergence_threshold)
    }

    /// Run with a caller-supplied random source.
    pub fn extract_with_rng<R: Rng>(
        &self,
        bitmap: &Bitmap,
        target_colors: usize,
        ctx: &mut ExtractionContext<'_>,
        rng: &mut R,
    ) -> Result<Vec<Rgb>> {
        self.validate()?;
        let _span = info_span!("centroid", target_colors, seed = ?self.seed).entered();

        ctx.report(Stage::Preprocessing, 0.1, Counters::default())?;
        let samples = collect_samples(bitmap, &self.sampler, ctx)?;
        if samples.is_empty() || target_colors == 0 {
            ctx.complete(Vec::new(), Counters::default())?;
            return Ok(Vec::new());
        }

        let mut centers = seed_centers(&samples, target_colors, rng);
        let k = centers.len();
        let threads = rayon::current_num_threads().max(1);
        let batch = (samples.len() / threads).max(self.min_batch.max(1));
        debug!(samples = samples.len(), k, batch, "seeded centers");

        for iteration in 1..=self.max_iterations {
            ctx.checkpoint()?;
            let sums = assign(&samples, &centers, batch);
            let updated = sums.centers(&centers);
            let movements: Vec<f64> = centers
                .iter()
                .zip(&updated)
                .map(|(old, new)| distance(old, new))
                .collect();
            centers = updated;

            let progress = 0.2 + 0.8 * iteration as f64 / self.max_iterations as f64;
            let counters = Counters {
                clusters: k,
                iteration,
                ..Counters::default()
            };
            ctx.emit(
                ProgressEvent::new(
                    Stage::KMeans {
                        iteration,
                        max_iterations: self.max_iterations,
                    },
                    progress,
                )
                .with_counters(counters)
                .with_colors(palette_of(&centers)),
            )?;

            if movements.iter().all(|&m| m <= self.convergence_threshold) {
                let average_movement = movements.iter().sum::<f64>() / movements.len() as f64;
                debug!(iteration, average_movement, "k-means converged");
                let info = ConvergenceInfo {
                    converged_at: iteration,
                    center_movements: movements,
                    average_movement,
                };
                ctx.emit(
                    ProgressEvent::new(Stage::Converged, progress)
                        .with_counters(counters)
                        .with_colors(palette_of(&centers))
                        .with_convergence(info),
                )?;
                break;
            }
        }

        let colors = palette_of(&centers);
        ctx.complete(
            colors.clone(),
            Counters {
                clusters: k,
                ..Counters::default()
            },
        )?;
        Ok(colors)
    }
}

impl PaletteStrategy for CentroidConfig {
    fn name(&self) -> &'static str {
        "centroid"
    }

    fn extract(
        &self,
        bitmap: &Bitmap,
        target_colors: usize,
        ctx: &mut ExtractionContext<'_>,
    ) -> Result<Vec<Rgb>> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        self.extract_with_rng(bitmap, target_colors, ctx, &mut rng)
    }
}

fn point(color: Rgb) -> Center {
    [f64::from(color.r), f64::from(color.g), f64::from(color.b)]
}

fn squared_distance(x: &Center, y: &Center) -> f64 {
    x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum()
}

fn distance(x: &Center, y: &Center) -> f64 {
    squared_distance(x, y).sqrt()
}

fn nearest(centers: &[Center], sample: &Center) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, center) in centers.iter().enumerate() {
        let d = squared_distance(center, sample);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}

/// k-means++ seeding. Stops early once every sample sits on a center.
pub(crate) fn seed_centers<R: Rng>(samples: &[Rgb], k: usize, rng: &mut R) -> Vec<Center> {
    let mut centers: Vec<Center> = Vec::with_capacity(k);
    if samples.is_empty() || k == 0 {
        return centers;
    }
    let first = point(samples[rng.random_range(0..samples.len())]);
    centers.push(first);
    let mut nearest_sq: Vec<f64> = samples
        .iter()
        .map(|&s| squared_distance(&point(s), &first))
        .collect();

    while centers.len() < k {
        let total: f64 = nearest_sq.iter().sum();
        if total <= 0.0 {
            break;
        }
        let target = rng.random::<f64>() * total;
        let mut cumulative = 0.0;
        let mut chosen = None;
        for (i, &d) in nearest_sq.iter().enumerate() {
            cumulative += d;
            if d > 0.0 && cumulative >= target {
                chosen = Some(i);
                break;
            }
        }
        let Some(index) = chosen.or_else(|| nearest_sq.iter().rposition(|&d| d > 0.0)) else {
            break;
        };
        let center = point(samples[index]);
        centers.push(center);
        for (d, &s) in nearest_sq.iter_mut().zip(samples) {
            *d = d.min(squared_distance(&point(s), &center));
        }
    }
    centers
}

/// Per-cluster channel sums from one assignment pass.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ClusterSums {
    sums: Vec<[u64; 3]>,
    counts: Vec<u64>,
}

impl ClusterSums {
    fn new(k: usize) -> Self {
        Self {
            sums: vec![[0; 3]; k],
            counts: vec![0; k],
        }
    }

    fn add(&mut self, cluster: usize, color: Rgb) {
        let sum = &mut self.sums[cluster];
        sum[0] += u64::from(color.r);
        sum[1] += u64::from(color.g);
        sum[2] += u64::from(color.b);
        self.counts[cluster] += 1;
    }

    fn merge(mut self, other: Self) -> Self {
        for (mine, theirs) in self.sums.iter_mut().zip(&other.sums) {
            for c in 0..3 {
                mine[c] += theirs[c];
            }
        }
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += theirs;
        }
        self
    }

    /// New centers; an empty cluster keeps its previous one.
    fn centers(&self, previous: &[Center]) -> Vec<Center> {
        previous
            .iter()
            .enumerate()
            .map(|(i, old)| match self.counts[i] {
                0 => *old,
                n => {
                    let s = self.sums[i];
                    [s[0] as f64 / n as f64, s[1] as f64 / n as f64, s[2] as f64 / n as f64]
                }
            })
            .collect()
    }
}

/// Assign every sample to its nearest center. Batches run in parallel, each
/// into its own sums, which are merged afterwards.
fn assign(samples: &[Rgb], centers: &[Center], batch: usize) -> ClusterSums {
    let k = centers.len();
    samples
        .par_chunks(batch)
        .map(|chunk| {
            let mut sums = ClusterSums::new(k);
            for &sample in chunk {
                sums.add(nearest(centers, &point(sample)), sample);
            }
            sums
        })
        .reduce(|| ClusterSums::new(k), ClusterSums::merge)
}

fn to_rgb(center: &Center) -> Rgb {
    let channel = |v: f64| v.round().clamp(0.0, 255.0) as u8;
    Rgb::new(channel(center[0]), channel(center[1]), channel(center[2]))
}

fn palette_of(centers: &[Center]) -> Vec<Rgb> {
    let mut colors: Vec<Rgb> = centers.iter().map(to_rgb).collect();
    sort_by_hue(&mut colors);
    colors
}
