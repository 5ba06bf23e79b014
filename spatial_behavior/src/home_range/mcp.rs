use std::collections::BTreeMap;

use geo::{Area, ConvexHull, MultiPoint, Point, Polygon};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use super::{Isopleth, McpSubsample};
use crate::geodesy::{area_km2, haversine_distance};
use crate::geometry::Boundary;
use crate::{PreparedTrack, SbError};

const MIN_HULL_POINTS: usize = 3;

/// Minimum convex polygons. The 100% hull is always reported; each lower
/// level is the hull of `ceil(n * p / 100)` fixes chosen by `subsample`.
pub fn estimate(
    track: &PreparedTrack,
    levels: &[u32],
    subsample: &McpSubsample,
) -> Result<BTreeMap<u32, Isopleth>, SbError> {
    let coords = track.coordinates();
    let n = coords.len();
    if n < MIN_HULL_POINTS {
        return Err(SbError::InsufficientData {
            method: "mcp",
            required: MIN_HULL_POINTS,
            found: n,
        });
    }
    let reference_latitude = track.mean_latitude();

    let mut out = BTreeMap::new();
    let full = isopleth(&hull(&coords), reference_latitude)
        .ok_or_else(|| SbError::Numerical("hull of all fixes has no area".into()))?;
    out.insert(100, full);

    let mut rng = match subsample {
        McpSubsample::Random { seed: Some(seed) } => Some(StdRng::seed_from_u64(*seed)),
        McpSubsample::Random { seed: None } => Some(StdRng::from_os_rng()),
        McpSubsample::CentroidDistance => None,
    };
    for &level in levels.iter().filter(|&&p| p < 100) {
        let size = sample_size(n, level);
        if size < MIN_HULL_POINTS {
            debug!("mcp {}% needs {} fixes, skipping", level, size);
            continue;
        }
        let chosen: Vec<(f64, f64)> = match rng.as_mut() {
            Some(rng) => rand::seq::index::sample(rng, n, size)
                .into_iter()
                .map(|i| coords[i])
                .collect(),
            None => closest_to_centroid(&coords, size),
        };
        match isopleth(&hull(&chosen), reference_latitude) {
            Some(iso) => {
                out.insert(level, iso);
            }
            None => debug!("mcp {}%: sampled fixes are collinear, skipping", level),
        }
    }
    Ok(out)
}

pub(crate) fn sample_size(n: usize, level: u32) -> usize {
    (n * level as usize).div_ceil(100)
}

pub(crate) fn hull(coords: &[(f64, f64)]) -> Polygon<f64> {
    let points: MultiPoint<f64> = coords.iter().map(|&(x, y)| Point::new(x, y)).collect();
    points.convex_hull()
}

/// `None` for a hull without area (identical or collinear fixes).
fn isopleth(polygon: &Polygon<f64>, reference_latitude: f64) -> Option<Isopleth> {
    if polygon.unsigned_area() <= 0.0 {
        return None;
    }
    Some(Isopleth {
        area_km2: area_km2(polygon, reference_latitude),
        boundary: Boundary::from_polygon(polygon),
    })
}

fn closest_to_centroid(coords: &[(f64, f64)], keep: usize) -> Vec<(f64, f64)> {
    let n = coords.len() as f64;
    let cx = coords.iter().map(|c| c.0).sum::<f64>() / n;
    let cy = coords.iter().map(|c| c.1).sum::<f64>() / n;
    let mut ranked: Vec<(OrderedFloat<f64>, usize)> = coords
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| (OrderedFloat(haversine_distance(cy, cx, y, x)), i))
        .collect();
    ranked.sort_unstable();
    ranked.into_iter().take(keep).map(|(_, i)| coords[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::prepare_track;
    use crate::{Fix, Track};
    use chrono::{Duration, TimeZone, Utc};

    fn track_of(coords: &[(f64, f64)]) -> PreparedTrack {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let fixes = coords
            .iter()
            .enumerate()
            .map(|(i, &(lon, lat))| Fix::new(t0 + Duration::minutes(30 * i as i64), lat, lon))
            .collect();
        prepare_track(&Track::new(None, fixes))
    }

    fn grid_points() -> Vec<(f64, f64)> {
        let mut pts = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                pts.push((i as f64 * 0.1, j as f64 * 0.1));
            }
        }
        pts
    }

    #[test]
    fn full_hull_of_square_with_interior_point() {
        let track = track_of(&[(0.0, 0.0), (1.0, 0.0), (0.5, 0.5), (1.0, 1.0), (0.0, 1.0)]);
        let levels = estimate(&track, &[100], &McpSubsample::default()).unwrap();
        let full = &levels[&100];
        let Boundary::Polygon(rings) = &full.boundary else {
            panic!("expected polygon");
        };
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].len(), 5);
        let expected = 111.32_f64.powi(2) * track.mean_latitude().to_radians().cos();
        assert!((full.area_km2 - expected).abs() / expected < 1e-9);
    }

    #[test]
    fn full_level_is_always_reported() {
        let track = track_of(&grid_points());
        let levels = estimate(&track, &[50], &McpSubsample::CentroidDistance).unwrap();
        assert_eq!(levels.keys().copied().collect::<Vec<_>>(), vec![50, 100]);
        assert!(levels[&50].area_km2 < levels[&100].area_km2);
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let track = track_of(&grid_points());
        let policy = McpSubsample::Random { seed: Some(7) };
        let a = estimate(&track, &[30, 60], &policy).unwrap();
        let b = estimate(&track, &[30, 60], &policy).unwrap();
        assert_eq!(a, b);
        for level in [30, 60] {
            assert!(a[&level].area_km2 <= a[&100].area_km2 + 1e-9);
        }
    }

    #[test]
    fn tiny_levels_are_skipped() {
        let track = track_of(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        let levels = estimate(&track, &[10, 50], &McpSubsample::default()).unwrap();
        assert_eq!(levels.keys().copied().collect::<Vec<_>>(), vec![100]);
    }

    #[test]
    fn flat_hulls_are_not_polygons() {
        let identical = track_of(&[(1.0, 1.0); 8]);
        assert!(matches!(
            estimate(&identical, &[50, 95], &McpSubsample::default()),
            Err(SbError::Numerical(_))
        ));
        let collinear = track_of(&[(0.0, 0.0), (0.1, 0.1), (0.2, 0.2), (0.3, 0.3)]);
        assert!(estimate(&collinear, &[100], &McpSubsample::CentroidDistance).is_err());

        // the three fixes nearest the centroid lie on one line
        let mut coords: Vec<(f64, f64)> = (0..3).map(|i| (0.01 * i as f64 - 0.01, 0.0)).collect();
        coords.extend([(1.0, 1.0), (-1.0, 1.0), (1.0, -1.0), (-1.0, -1.0)]);
        let track = track_of(&coords);
        let levels = estimate(&track, &[40], &McpSubsample::CentroidDistance).unwrap();
        assert_eq!(levels.keys().copied().collect::<Vec<_>>(), vec![100]);
    }

    #[test]
    fn sample_size_rounds_up() {
        assert_eq!(sample_size(10, 95), 10);
        assert_eq!(sample_size(10, 50), 5);
        assert_eq!(sample_size(7, 50), 4);
        assert_eq!(sample_size(3, 100), 3);
    }

    #[test]
    fn centroid_trim_keeps_the_middle() {
        let mut coords = vec![(0.0, 0.0), (0.1, 0.0), (0.0, 0.1), (0.1, 0.1)];
        coords.push((5.0, 5.0));
        let kept = closest_to_centroid(&coords, 4);
        assert!(!kept.contains(&(5.0, 5.0)));
    }
}
