//! Perceptual deduplication and merging of candidate colors

use tracing::trace;

use crate::color::{LabColor, Rgb};
use crate::scoring::ColorPoint;

/// True when `candidate` is at least `threshold` ΔE from every kept color.
pub fn is_distinct(candidate: &LabColor, kept: &[LabColor], threshold: f64) -> bool {
    kept.iter().all(|k| candidate.delta_e(k) >= threshold)
}

/// Order-preserving greedy filter: a color survives iff its ΔE to every
/// previously kept color is at least `threshold`.
pub fn dedupe(colors: &[Rgb], threshold: f64) -> Vec<Rgb> {
    let mut kept: Vec<LabColor> = Vec::with_capacity(colors.len());
    for &color in colors {
        let lab = color.to_lab();
        if is_distinct(&lab, &kept, threshold) {
            kept.push(lab);
        } else {
            trace!(color = %color.to_hex(), "dropped near-duplicate color");
        }
    }
    kept.into_iter().map(|lab| lab.rgb).collect()
}

/// Fuse colors closer than `threshold` ΔE into frequency-weighted Lab
/// averages. Each unmerged color seeds a group that absorbs every later
/// unmerged color within `threshold` of the seed.
pub fn merge_similar(points: &[ColorPoint], threshold: f64) -> Vec<ColorPoint> {
    let mut merged_into = vec![false; points.len()];
    let mut merged = Vec::with_capacity(points.len());

    for (i, seed) in points.iter().enumerate() {
        if merged_into[i] {
            continue;
        }
        merged_into[i] = true;
        let mut group = vec![*seed];
        for (j, other) in points.iter().enumerate().skip(i + 1) {
            if !merged_into[j] && seed.lab.delta_e(&other.lab) < threshold {
                merged_into[j] = true;
                group.push(*other);
            }
        }
        merged.push(if group.len() == 1 {
            *seed
        } else {
            weighted_average(&group)
        });
    }
    merged
}

fn weighted_average(group: &[ColorPoint]) -> ColorPoint {
    let total: u64 = group.iter().map(|p| u64::from(p.frequency)).sum();
    let (mut l, mut a, mut b) = (0.0, 0.0, 0.0);
    let weight_sum = if total == 0 { group.len() as f64 } else { total as f64 };
    for p in group {
        let w = if total == 0 { 1.0 } else { f64::from(p.frequency) };
        l += p.lab.l * w;
        a += p.lab.a * w;
        b += p.lab.b * w;
    }
    ColorPoint {
        lab: LabColor::from_components(l / weight_sum, a / weight_sum, b / weight_sum),
        frequency: u32::try_from(total).unwrap_or(u32::MAX),
    }
}
