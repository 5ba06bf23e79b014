//! Simplified Brownian-bridge utilisation distribution.
//!
//! Each segment between consecutive fixes spreads a Gaussian of the
//! point-to-segment distance over the grid, weighted by the inverse of the
//! time the segment took. The kernel scale is fixed rather than fitted to
//! the track, so this is a heuristic and not a calibrated bridge model.

use std::collections::BTreeMap;

use super::density::{isopleths, Grid};
use super::Isopleth;
use crate::{PreparedTrack, SbError};

/// Gaps longer than this (hours) count as this long.
const MAX_GAP_HOURS: f64 = 24.0;
const GAP_EPSILON_HOURS: f64 = 0.1;
/// Denominator of the kernel exponent, in squared degrees.
const KERNEL_SCALE_DEG2: f64 = 0.001;

struct Segment {
    start: (f64, f64),
    end: (f64, f64),
    weight: f64,
}

pub fn estimate(
    track: &PreparedTrack,
    levels: &[u32],
    grid_size: usize,
) -> Result<BTreeMap<u32, Isopleth>, SbError> {
    let coords = track.coordinates();
    let segments = weighted_segments(track);
    if segments.is_empty() {
        return Err(SbError::InsufficientData {
            method: "bbmm",
            required: 2,
            found: coords.len(),
        });
    }
    let grid = Grid::around(&coords, grid_size)?;
    let mut density = grid.evaluate(|x, y| {
        segments
            .iter()
            .map(|s| {
                let d2 = segment_distance_sq((x, y), s.start, s.end);
                s.weight * (-d2 / KERNEL_SCALE_DEG2).exp()
            })
            .sum()
    });
    let total = density.sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(SbError::Numerical(
            "utilisation distribution has no mass on the grid".into(),
        ));
    }
    density /= total;
    isopleths(&density, &grid, levels, track.mean_latitude())
}

/// Weights are taken per fix (`1 / (gap + 0.1 h)` over the gap that ends at
/// the fix, zero gap for the first) and normalised over all fixes; a segment
/// carries the weight of the fix it ends on.
fn weighted_segments(track: &PreparedTrack) -> Vec<Segment> {
    let raw: Vec<f64> = track
        .points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let hours = if i == 0 {
                0.0
            } else {
                (p.time_delta_min / 60.0).min(MAX_GAP_HOURS)
            };
            1.0 / (hours + GAP_EPSILON_HOURS)
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    track
        .points
        .windows(2)
        .zip(raw.iter().skip(1))
        .map(|(pair, w)| Segment {
            start: (pair[0].longitude, pair[0].latitude),
            end: (pair[1].longitude, pair[1].latitude),
            weight: w / sum,
        })
        .collect()
}

/// Squared planar distance from `p` to the segment `a`-`b`.
fn segment_distance_sq(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (abx, aby) = (b.0 - a.0, b.1 - a.1);
    let len2 = abx * abx + aby * aby;
    let t = if len2 > 0.0 {
        (((p.0 - a.0) * abx + (p.1 - a.1) * aby) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.0 + t * abx, a.1 + t * aby);
    (p.0 - cx).powi(2) + (p.1 - cy).powi(2)
}
