//! Shared machinery of the grid-based estimators: the evaluation grid,
//! probability-mass thresholds and contour-to-polygon assembly.

use std::collections::BTreeMap;

use geo::{Area, Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use ndarray::Array2;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use tracing::debug;

use super::Isopleth;
use crate::contour::find_contours;
use crate::geodesy::area_km2;
use crate::geometry::Boundary;
use crate::SbError;

/// Fraction of the data range added on each side of the grid.
const GRID_PADDING: f64 = 0.1;

/// Regular lon/lat evaluation grid. Density arrays are indexed `[[row, col]]`
/// with rows following `ys` (latitude) and columns following `xs` (longitude).
#[derive(Clone, Debug)]
pub(crate) struct Grid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

impl Grid {
    pub fn around(coords: &[(f64, f64)], size: usize) -> Result<Self, SbError> {
        let (min_x, max_x) = extent(coords.iter().map(|c| c.0));
        let (min_y, max_y) = extent(coords.iter().map(|c| c.1));
        let span_x = max_x - min_x;
        let span_y = max_y - min_y;
        if !(span_x > 0.0 && span_y > 0.0) {
            return Err(SbError::Numerical(
                "fixes span a zero-width grid extent".into(),
            ));
        }
        let pad_x = span_x * GRID_PADDING;
        let pad_y = span_y * GRID_PADDING;
        Ok(Self {
            xs: linspace(min_x - pad_x, max_x + pad_x, size),
            ys: linspace(min_y - pad_y, max_y + pad_y, size),
        })
    }

    /// Evaluate `f(lon, lat)` at every node, rows in parallel.
    pub fn evaluate<F>(&self, f: F) -> Array2<f64>
    where
        F: Fn(f64, f64) -> f64 + Sync,
    {
        let rows: Vec<Vec<f64>> = self
            .ys
            .par_iter()
            .map(|&y| self.xs.iter().map(|&x| f(x, y)).collect())
            .collect();
        Array2::from_shape_fn((self.ys.len(), self.xs.len()), |(r, c)| rows[r][c])
    }

    fn to_geo(&self, row: f64, col: f64) -> Coord<f64> {
        Coord {
            x: interp_axis(&self.xs, col),
            y: interp_axis(&self.ys, row),
        }
    }
}

fn extent(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

pub(crate) fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Linear interpolation of a fractional index against an ascending axis.
fn interp_axis(axis: &[f64], idx: f64) -> f64 {
    let last = axis.len() - 1;
    let idx = idx.clamp(0.0, last as f64);
    let lo = idx.floor() as usize;
    let hi = (lo + 1).min(last);
    axis[lo] + (axis[hi] - axis[lo]) * (idx - lo as f64)
}

/// Density value whose super-level set first holds `fraction` of the mass.
pub(crate) fn mass_threshold(sorted_desc: &[f64], cumulative: &[f64], fraction: f64) -> f64 {
    let idx = cumulative.partition_point(|&c| c < fraction);
    sorted_desc[idx.min(sorted_desc.len() - 1)]
}

/// Turn a density surface into one isopleth per percentage level.
///
/// Levels whose contour encloses nothing are left out of the map.
pub(crate) fn isopleths(
    density: &Array2<f64>,
    grid: &Grid,
    levels: &[u32],
    reference_latitude: f64,
) -> Result<BTreeMap<u32, Isopleth>, SbError> {
    let mut sorted: Vec<f64> = density.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by_key(|&v| std::cmp::Reverse(OrderedFloat(v)));
    let total: f64 = sorted.iter().sum();
    if sorted.is_empty() || !(total > 0.0) {
        return Err(SbError::Numerical("density surface has no mass".into()));
    }
    let mut running = 0.0;
    let cumulative: Vec<f64> = sorted
        .iter()
        .map(|v| {
            running += v;
            running / total
        })
        .collect();

    // A sentinel border far below any threshold closes regions that touch
    // the grid edge along the edge itself.
    let padded = pad_with(density, -1e300);

    let mut out = BTreeMap::new();
    for &level in levels {
        let threshold = mass_threshold(&sorted, &cumulative, level as f64 / 100.0);
        let rings: Vec<LineString<f64>> = find_contours(&padded, threshold)
            .into_iter()
            .filter(|c| c.len() >= 3)
            .map(|c| {
                LineString::new(
                    c.into_iter()
                        .map(|(r, col)| grid.to_geo(r - 1.0, col - 1.0))
                        .collect(),
                )
            })
            .collect();
        let multi = assemble_polygons(rings);
        match Boundary::from_multi_polygon(&multi) {
            Some(boundary) => {
                out.insert(
                    level,
                    Isopleth {
                        area_km2: area_km2(&multi, reference_latitude),
                        boundary,
                    },
                );
            }
            None => debug!("no contour at {}% (threshold {:.3e})", level, threshold),
        }
    }
    Ok(out)
}

fn pad_with(values: &Array2<f64>, fill: f64) -> Array2<f64> {
    let (rows, cols) = values.dim();
    let mut padded = Array2::from_elem((rows + 2, cols + 2), fill);
    for ((r, c), v) in values.indexed_iter() {
        padded[[r + 1, c + 1]] = if v.is_finite() { *v } else { fill };
    }
    padded
}

/// Nest contour rings into polygons: rings enclosed by an odd number of
/// other rings become holes of their innermost enclosing ring.
pub(crate) fn assemble_polygons(rings: Vec<LineString<f64>>) -> MultiPolygon<f64> {
    let shells: Vec<Polygon<f64>> = rings
        .into_iter()
        .map(|r| Polygon::new(r, Vec::new()))
        .filter(|p| p.unsigned_area() > 0.0)
        .collect();
    let areas: Vec<f64> = shells.iter().map(|p| p.unsigned_area()).collect();

    let containers: Vec<Vec<usize>> = shells
        .iter()
        .enumerate()
        .map(|(i, shell)| {
            let first_vertex = Point::from(shell.exterior().0[0]);
            (0..shells.len())
                .filter(|&j| j != i && areas[j] > areas[i] && shells[j].contains(&first_vertex))
                .collect()
        })
        .collect();
    let depth: Vec<usize> = containers.iter().map(Vec::len).collect();

    let mut holes: BTreeMap<usize, Vec<LineString<f64>>> = BTreeMap::new();
    for i in 0..shells.len() {
        if depth[i] % 2 == 1 {
            let parent = containers[i]
                .iter()
                .copied()
                .filter(|&j| depth[j] + 1 == depth[i])
                .min_by_key(|&j| OrderedFloat(areas[j]));
            if let Some(parent) = parent {
                holes
                    .entry(parent)
                    .or_default()
                    .push(shells[i].exterior().clone());
            }
        }
    }

    MultiPolygon::new(
        shells
            .iter()
            .enumerate()
            .filter(|(i, _)| depth[*i] % 2 == 0)
            .map(|(i, shell)| {
                Polygon::new(
                    shell.exterior().clone(),
                    holes.remove(&i).unwrap_or_default(),
                )
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, polygon};

    fn ring(points: &[(f64, f64)]) -> LineString<f64> {
        LineString::new(points.iter().map(|&(x, y)| coord! { x: x, y: y }).collect())
    }

    #[test]
    fn grid_is_padded_by_ten_percent() {
        let grid = Grid::around(&[(0.0, 10.0), (2.0, 11.0)], 11).unwrap();
        assert_eq!(grid.xs.len(), 11);
        assert!((grid.xs[0] + 0.2).abs() < 1e-12);
        assert!((grid.xs[10] - 2.2).abs() < 1e-12);
        assert!((grid.ys[0] - 9.9).abs() < 1e-12);
        assert!((grid.ys[10] - 11.1).abs() < 1e-12);
    }

    #[test]
    fn degenerate_extent_is_rejected() {
        let err = Grid::around(&[(1.0, 1.0), (1.0, 2.0)], 10).unwrap_err();
        assert!(matches!(err, SbError::Numerical(_)));
    }

    #[test]
    fn evaluate_fills_rows_by_latitude() {
        let grid = Grid {
            xs: vec![0.0, 1.0, 2.0],
            ys: vec![10.0, 20.0],
        };
        let values = grid.evaluate(|x, y| x + y);
        assert_eq!(values.dim(), (2, 3));
        assert_eq!(values[[1, 2]], 22.0);
        assert_eq!(values[[0, 1]], 11.0);
    }

    #[test]
    fn threshold_is_first_value_reaching_mass() {
        let sorted = [4.0, 3.0, 2.0, 1.0];
        let cumulative = [0.4, 0.7, 0.9, 1.0];
        assert_eq!(mass_threshold(&sorted, &cumulative, 0.5), 3.0);
        assert_eq!(mass_threshold(&sorted, &cumulative, 0.7), 3.0);
        assert_eq!(mass_threshold(&sorted, &cumulative, 0.95), 1.0);
        assert_eq!(mass_threshold(&sorted, &cumulative, 1.0), 1.0);
    }

    #[test]
    fn interp_maps_fractional_indices() {
        let axis = linspace(0.0, 10.0, 11);
        assert_eq!(interp_axis(&axis, 2.5), 2.5);
        assert_eq!(interp_axis(&axis, -3.0), 0.0);
        assert_eq!(interp_axis(&axis, 42.0), 10.0);
    }

    #[test]
    fn nested_rings_become_holes() {
        let outer = ring(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)]);
        let hole = ring(&[(2.0, 2.0), (4.0, 2.0), (4.0, 4.0), (2.0, 4.0), (2.0, 2.0)]);
        let island = ring(&[(2.5, 2.5), (3.5, 2.5), (3.5, 3.5), (2.5, 3.5), (2.5, 2.5)]);
        let separate = ring(&[(20.0, 0.0), (21.0, 0.0), (21.0, 1.0), (20.0, 0.0)]);
        let multi = assemble_polygons(vec![hole, separate, outer, island]);
        assert_eq!(multi.0.len(), 3);
        let with_hole = multi
            .iter()
            .find(|p| !p.interiors().is_empty())
            .expect("outer ring keeps its hole");
        assert_eq!(with_hole.interiors().len(), 1);
        let expected = 100.0 - 4.0 + 1.0 + 0.5;
        assert!((multi.unsigned_area() - expected).abs() < 1e-9);
    }

    #[test]
    fn density_peak_yields_nested_levels() {
        let coords = [(0.0, 0.0), (1.0, 1.0)];
        let grid = Grid::around(&coords, 40).unwrap();
        let density = grid.evaluate(|x, y| (-((x - 0.5).powi(2) + (y - 0.5).powi(2)) / 0.05).exp());
        let levels = isopleths(&density, &grid, &[50, 95, 100], 0.0).unwrap();
        assert_eq!(levels.len(), 3);
        assert!(levels[&50].area_km2 < levels[&95].area_km2);
        assert!(levels[&95].area_km2 <= levels[&100].area_km2);
        let full = polygon![(x: -0.1, y: -0.1), (x: 1.1, y: -0.1), (x: 1.1, y: 1.1), (x: -0.1, y: 1.1)];
        let full_area = area_km2(&full, 0.0);
        assert!((levels[&100].area_km2 - full_area).abs() / full_area < 1e-6);
    }

    #[test]
    fn zero_surface_is_a_numerical_failure() {
        let grid = Grid {
            xs: vec![0.0, 1.0],
            ys: vec![0.0, 1.0],
        };
        let density = Array2::<f64>::zeros((2, 2));
        assert!(matches!(
            isopleths(&density, &grid, &[50], 0.0),
            Err(SbError::Numerical(_))
        ));
    }
}
