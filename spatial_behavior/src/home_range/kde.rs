use std::collections::BTreeMap;
use std::f64::consts::PI;

use tracing::debug;

use super::density::{isopleths, Grid};
use super::Isopleth;
use crate::{PreparedTrack, SbError};

/// Bivariate Gaussian KDE with a full bandwidth matrix: the sample
/// covariance of the fixes scaled by `factor²`.
#[derive(Clone, Debug)]
pub struct GaussianKde {
    points: Vec<(f64, f64)>,
    /// Inverse of the kernel covariance, row-major `[a, b, b, d]`.
    inv: [f64; 4],
    norm: f64,
}

impl GaussianKde {
    /// `factor` defaults to Scott's rule, `n^(-1/6)` in two dimensions.
    pub fn new(points: &[(f64, f64)], factor: Option<f64>) -> Result<Self, SbError> {
        let n = points.len();
        if n < 2 {
            return Err(SbError::InsufficientData {
                method: "kde",
                required: 2,
                found: n,
            });
        }
        let factor = factor.unwrap_or_else(|| scott_factor(n));
        let nf = n as f64;
        let mx = points.iter().map(|p| p.0).sum::<f64>() / nf;
        let my = points.iter().map(|p| p.1).sum::<f64>() / nf;
        let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
        for &(x, y) in points {
            let (dx, dy) = (x - mx, y - my);
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }
        let scale = factor * factor / (nf - 1.0);
        let (a, b, d) = (sxx * scale, sxy * scale, syy * scale);
        let det = a * d - b * b;
        if !(det.is_finite() && det > f64::EPSILON * (a * d).abs().max(f64::MIN_POSITIVE)) {
            return Err(SbError::Numerical(
                "kernel covariance is singular; fixes are collinear or identical".into(),
            ));
        }
        debug!("kde bandwidth factor {:.4}, covariance det {:.3e}", factor, det);
        Ok(Self {
            points: points.to_vec(),
            inv: [d / det, -b / det, -b / det, a / det],
            norm: 1.0 / (2.0 * PI * det.sqrt() * nf),
        })
    }

    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let [ia, ib, _, id] = self.inv;
        let sum: f64 = self
            .points
            .iter()
            .map(|&(px, py)| {
                let (dx, dy) = (x - px, y - py);
                (-0.5 * (ia * dx * dx + 2.0 * ib * dx * dy + id * dy * dy)).exp()
            })
            .sum();
        sum * self.norm
    }
}

pub fn scott_factor(n: usize) -> f64 {
    (n as f64).powf(-1.0 / 6.0)
}

pub fn estimate(
    track: &PreparedTrack,
    levels: &[u32],
    grid_size: usize,
    bandwidth: Option<f64>,
) -> Result<BTreeMap<u32, Isopleth>, SbError> {
    let coords = track.coordinates();
    let kde = GaussianKde::new(&coords, bandwidth)?;
    let grid = Grid::around(&coords, grid_size)?;
    let density = grid.evaluate(|x, y| kde.evaluate(x, y));
    isopleths(&density, &grid, levels, track.mean_latitude())
}
