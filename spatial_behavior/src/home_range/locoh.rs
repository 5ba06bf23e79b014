use std::collections::BTreeMap;
use std::panic;

use geo::{Area, BooleanOps, MultiPolygon, Polygon};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use tracing::debug;

use super::mcp::hull;
use super::Isopleth;
use crate::geodesy::area_km2;
use crate::geometry::Boundary;
use crate::{PreparedTrack, SbError};

/// Upper bound on neighbours per local hull.
const MAX_NEIGHBOURS: usize = 15;
/// Weight of normalised time distance against degree distance.
const TIME_WEIGHT: f64 = 0.5;

struct LocalHull {
    polygon: Polygon<f64>,
    area_km2: f64,
}

pub fn estimate(
    track: &PreparedTrack,
    levels: &[u32],
    use_time: bool,
) -> Result<BTreeMap<u32, Isopleth>, SbError> {
    let coords = track.coordinates();
    let reference_latitude = track.mean_latitude();
    let mut hulls = local_hulls(track, use_time, reference_latitude);
    if hulls.is_empty() {
        return Err(SbError::Numerical("no local hull could be built".into()));
    }
    hulls.sort_by_key(|h| OrderedFloat(h.area_km2));
    let total: f64 = hulls.iter().map(|h| h.area_km2).sum();
    debug!(
        "t-locoh: {} local hulls from {} fixes, summed area {:.3} km2",
        hulls.len(),
        coords.len(),
        total
    );
    if total <= 0.0 {
        return Err(SbError::Numerical("local hulls have no area".into()));
    }

    let mut out = BTreeMap::new();
    for &level in levels {
        let target = total * level as f64 / 100.0;
        let count = hulls_needed(&hulls, target);
        let union = union_hulls(&hulls[..count])?;
        match Boundary::from_multi_polygon(&union) {
            Some(boundary) => {
                out.insert(
                    level,
                    Isopleth {
                        area_km2: area_km2(&union, reference_latitude),
                        boundary,
                    },
                );
            }
            None => debug!("t-locoh {}%: accumulated hulls have no area", level),
        }
    }
    if out.is_empty() {
        return Err(SbError::Numerical("no level produced a polygon".into()));
    }
    Ok(out)
}

/// Smallest prefix of area-sorted hulls whose summed area reaches `target`.
fn hulls_needed(hulls: &[LocalHull], target: f64) -> usize {
    let mut acc = 0.0;
    for (i, h) in hulls.iter().enumerate() {
        acc += h.area_km2;
        if acc >= target {
            return i + 1;
        }
    }
    hulls.len()
}

fn local_hulls(track: &PreparedTrack, use_time: bool, reference_latitude: f64) -> Vec<LocalHull> {
    let coords = track.coordinates();
    let n = coords.len();
    let k = MAX_NEIGHBOURS.min(n.saturating_sub(1));
    if k < 3 {
        return Vec::new();
    }
    let seconds: Vec<f64> = track
        .points
        .iter()
        .map(|p| p.timestamp.timestamp() as f64)
        .collect();
    // largest pairwise time difference, used to scale time into [0, 1]
    let time_span = match (
        seconds.iter().copied().map(OrderedFloat).min(),
        seconds.iter().copied().map(OrderedFloat).max(),
    ) {
        (Some(lo), Some(hi)) => hi.0 - lo.0,
        _ => 0.0,
    };
    let time_scale = if use_time && time_span > 0.0 {
        TIME_WEIGHT / time_span
    } else {
        0.0
    };

    (0..n)
        .into_par_iter()
        .map(|i| {
            let (xi, yi) = coords[i];
            let mut ranked: Vec<(OrderedFloat<f64>, usize)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    let (xj, yj) = coords[j];
                    let space = ((xi - xj).powi(2) + (yi - yj).powi(2)).sqrt();
                    let time = (seconds[i] - seconds[j]).abs() * time_scale;
                    (OrderedFloat(space + time), j)
                })
                .collect();
            ranked.select_nth_unstable(k - 1);
            let neighbours: Vec<(f64, f64)> =
                ranked[..k].iter().map(|&(_, j)| coords[j]).collect();
            let polygon = hull(&neighbours);
            LocalHull {
                area_km2: area_km2(&polygon, reference_latitude),
                polygon,
            }
        })
        .collect()
}

/// Union of the given hulls; zero-area hulls are left out.
fn union_hulls(hulls: &[LocalHull]) -> Result<MultiPolygon<f64>, SbError> {
    let shapes: Vec<MultiPolygon<f64>> = hulls
        .iter()
        .filter(|h| h.polygon.unsigned_area() > 0.0)
        .map(|h| MultiPolygon::new(vec![h.polygon.clone()]))
        .collect();
    panic::catch_unwind(panic::AssertUnwindSafe(|| {
        shapes
            .into_par_iter()
            .reduce(|| MultiPolygon::new(Vec::new()), |a, b| a.union(&b))
    }))
    .map_err(|_| SbError::Numerical("polygon union failed".into()))
}
