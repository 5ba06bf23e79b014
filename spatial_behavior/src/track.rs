//! Track preprocessing and the movement metrics derived from it.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geodesy::haversine_distance;
use crate::{Fix, PreparedTrack, Track, TrackPoint, TrackSet};

/// Fixes faster than this are excluded from speed summaries.
const SPEED_SUMMARY_CAP_KMH: f64 = 100.0;

/// Sort a track by timestamp and annotate every fix with step distance,
/// time delta and speed.
///
/// The sort is stable, so fixes sharing a timestamp keep their input order.
/// Fixes with non-finite coordinates are dropped.
pub fn prepare_track(track: &Track) -> PreparedTrack {
    let mut fixes: Vec<&Fix> = track.fixes.iter().filter(|f| f.is_finite()).collect();
    let dropped = track.fixes.len() - fixes.len();
    if dropped > 0 {
        warn!(
            "dropped {} fixes with non-finite coordinates from {}",
            dropped,
            track.key()
        );
    }
    fixes.sort_by_key(|f| f.timestamp);

    let mut points = Vec::with_capacity(fixes.len());
    let mut prev: Option<&Fix> = None;
    for fix in fixes {
        let (step_distance_m, time_delta_min) = match prev {
            Some(p) => (
                haversine_distance(p.latitude, p.longitude, fix.latitude, fix.longitude),
                (fix.timestamp - p.timestamp).num_milliseconds() as f64 / 60_000.0,
            ),
            None => (0.0, 0.0),
        };
        points.push(TrackPoint {
            timestamp: fix.timestamp,
            latitude: fix.latitude,
            longitude: fix.longitude,
            step_distance_m,
            time_delta_min,
            speed_kmh: speed_kmh(step_distance_m, time_delta_min),
        });
        prev = Some(fix);
    }

    PreparedTrack {
        individual_id: track.individual_id.clone(),
        points,
    }
}

/// Prepare every track of a set.
pub fn prepare(set: &TrackSet) -> Vec<PreparedTrack> {
    set.tracks().iter().map(prepare_track).collect()
}

fn speed_kmh(distance_m: f64, minutes: f64) -> f64 {
    let speed = (distance_m / 1000.0) / (minutes / 60.0);
    if speed.is_finite() {
        speed
    } else {
        0.0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DailyDistance {
    pub date: NaiveDate,
    pub distance_km: f64,
}

/// Summed step distance per UTC calendar day.
pub fn daily_distances(track: &PreparedTrack) -> Vec<DailyDistance> {
    let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for point in &track.points {
        *by_day.entry(point.timestamp.date_naive()).or_insert(0.0) += point.step_distance_m;
    }
    by_day
        .into_iter()
        .map(|(date, meters)| DailyDistance {
            date,
            distance_km: meters / 1000.0,
        })
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DisplacementPoint {
    pub timestamp: DateTime<Utc>,
    /// Squared great-circle distance from the first fix, in m².
    pub nsd_m2: f64,
}

/// Net squared displacement of every fix relative to the first one.
pub fn net_squared_displacement(track: &PreparedTrack) -> Vec<DisplacementPoint> {
    if track.len() < 2 {
        return Vec::new();
    }
    let origin = &track.points[0];
    track
        .points
        .iter()
        .map(|p| {
            let d = haversine_distance(origin.latitude, origin.longitude, p.latitude, p.longitude);
            DisplacementPoint {
                timestamp: p.timestamp,
                nsd_m2: d * d,
            }
        })
        .collect()
}

/// Calendar period over which displacement is averaged.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NsdWindow {
    #[default]
    Day,
    /// ISO week, starting Monday.
    Week,
    Month,
}

impl NsdWindow {
    pub const ALL: [NsdWindow; 3] = [NsdWindow::Day, NsdWindow::Week, NsdWindow::Month];

    /// First UTC day of the period containing `date`.
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            NsdWindow::Day => date,
            NsdWindow::Week => date
                .checked_sub_days(Days::new(date.weekday().num_days_from_monday() as u64))
                .unwrap_or(date),
            NsdWindow::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WindowedNsd {
    pub period_start: NaiveDate,
    pub mean_nsd_m2: f64,
    pub fix_count: usize,
}

/// Mean net squared displacement per calendar window. Periods without fixes
/// are not listed.
pub fn nsd_by_window(track: &PreparedTrack, window: NsdWindow) -> Vec<WindowedNsd> {
    let mut by_period: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for point in net_squared_displacement(track) {
        let key = window.period_start(point.timestamp.date_naive());
        let entry = by_period.entry(key).or_insert((0.0, 0));
        entry.0 += point.nsd_m2;
        entry.1 += 1;
    }
    by_period
        .into_iter()
        .map(|(period_start, (sum, count))| WindowedNsd {
            period_start,
            mean_nsd_m2: sum / count as f64,
            fix_count: count,
        })
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpeedSummary {
    pub mean_kmh: f64,
    pub median_kmh: f64,
    pub max_kmh: f64,
    /// Smallest non-zero speed, 0 when the animal never moved.
    pub min_moving_kmh: f64,
    pub std_kmh: f64,
    pub p95_kmh: f64,
    pub samples: usize,
}

/// Speed statistics over fixes slower than 100 km/h.
pub fn speed_summary(track: &PreparedTrack) -> Option<SpeedSummary> {
    let mut speeds: Vec<f64> = track
        .points
        .iter()
        .map(|p| p.speed_kmh)
        .filter(|&s| s < SPEED_SUMMARY_CAP_KMH)
        .collect();
    if speeds.is_empty() {
        return None;
    }
    speeds.sort_by_key(|&s| OrderedFloat(s));

    let n = speeds.len();
    let mean = speeds.iter().sum::<f64>() / n as f64;
    let std = if n > 1 {
        (speeds.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    Some(SpeedSummary {
        mean_kmh: mean,
        median_kmh: quantile_sorted(&speeds, 0.5),
        max_kmh: speeds[n - 1],
        min_moving_kmh: speeds.iter().copied().find(|&s| s > 0.0).unwrap_or(0.0),
        std_kmh: std,
        p95_kmh: quantile_sorted(&speeds, 0.95),
        samples: n,
    })
}

/// Linear-interpolated quantile of an ascending, non-empty slice.
pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MonthlyMovement {
    pub month: u32,
    pub total_distance_km: f64,
    pub mean_step_km: f64,
    pub fix_count: usize,
}

/// Movement aggregated by calendar month; empty unless the track spans 30 days.
pub fn monthly_movement(track: &PreparedTrack) -> Vec<MonthlyMovement> {
    if track.span_days() < 30 {
        return Vec::new();
    }
    let mut by_month: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for point in &track.points {
        let entry = by_month.entry(point.timestamp.month()).or_insert((0.0, 0));
        entry.0 += point.step_distance_m / 1000.0;
        entry.1 += 1;
    }
    by_month
        .into_iter()
        .map(|(month, (total, count))| MonthlyMovement {
            month,
            total_distance_km: total,
            mean_step_km: if count > 0 { total / count as f64 } else { 0.0 },
            fix_count: count,
        })
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackSummary {
    pub individual: String,
    pub fix_count: usize,
    pub total_distance_km: f64,
    pub first_fix: Option<DateTime<Utc>>,
    pub last_fix: Option<DateTime<Utc>>,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bounds: Option<[f64; 4]>,
    /// `[lon, lat]` centre of the bounding box.
    pub center: Option<[f64; 2]>,
}

pub fn track_summary(track: &PreparedTrack) -> TrackSummary {
    let bounds = track.points.iter().fold(None, |acc: Option<[f64; 4]>, p| {
        Some(match acc {
            None => [p.longitude, p.latitude, p.longitude, p.latitude],
            Some([x0, y0, x1, y1]) => [
                x0.min(p.longitude),
                y0.min(p.latitude),
                x1.max(p.longitude),
                y1.max(p.latitude),
            ],
        })
    });
    TrackSummary {
        individual: track.key(),
        fix_count: track.len(),
        total_distance_km: track.total_distance_m() / 1000.0,
        first_fix: track.points.first().map(|p| p.timestamp),
        last_fix: track.points.last().map(|p| p.timestamp),
        bounds,
        center: bounds.map(|[x0, y0, x1, y1]| [(x0 + x1) / 2.0, (y0 + y1) / 2.0]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn track_from(points: &[(i64, f64, f64)]) -> Track {
        let fixes = points
            .iter()
            .map(|&(minutes, lat, lon)| Fix::new(t0() + Duration::minutes(minutes), lat, lon))
            .collect();
        Track::new(Some("lynx".into()), fixes)
    }

    #[test]
    fn sorts_and_zeroes_first_step() {
        let track = track_from(&[(120, 0.02, 0.0), (0, 0.0, 0.0), (60, 0.01, 0.0)]);
        let prepared = prepare_track(&track);
        let times: Vec<_> = prepared.points.iter().map(|p| p.timestamp).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
        assert_eq!(prepared.points[0].step_distance_m, 0.0);
        assert_eq!(prepared.points[0].time_delta_min, 0.0);
        assert_eq!(prepared.points[0].speed_kmh, 0.0);
        assert!((prepared.points[1].time_delta_min - 60.0).abs() < 1e-9);
        // 0.01 degree of latitude is roughly 1.11 km, covered in one hour
        assert!((prepared.points[1].speed_kmh - 1.112).abs() < 0.01);
    }

    #[test]
    fn total_length_does_not_depend_on_input_order() {
        let forward = track_from(&[(0, 0.0, 0.0), (10, 0.01, 0.02), (20, 0.03, 0.01), (30, 0.0, 0.05)]);
        let mut shuffled = forward.clone();
        shuffled.fixes.reverse();
        shuffled.fixes.swap(0, 2);
        let a = prepare_track(&forward).total_distance_m();
        let b = prepare_track(&shuffled).total_distance_m();
        assert!(a > 0.0);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn duplicate_timestamps_give_zero_speed() {
        let track = track_from(&[(0, 0.0, 0.0), (0, 0.01, 0.0)]);
        let prepared = prepare_track(&track);
        assert!(prepared.points[1].step_distance_m > 0.0);
        assert_eq!(prepared.points[1].speed_kmh, 0.0);
    }

    #[test]
    fn short_tracks_yield_zero_length() {
        let empty = prepare_track(&Track::new(None, Vec::new()));
        assert!(empty.is_empty());
        assert_eq!(empty.total_distance_m(), 0.0);
        let single = prepare_track(&track_from(&[(0, 1.0, 1.0)]));
        assert_eq!(single.len(), 1);
        assert_eq!(single.total_distance_m(), 0.0);
        assert!(net_squared_displacement(&single).is_empty());
    }

    #[test]
    fn drops_non_finite_fixes() {
        let track = track_from(&[(0, 0.0, 0.0), (10, f64::NAN, 0.0), (20, 0.0, 0.01)]);
        let prepared = prepare_track(&track);
        assert_eq!(prepared.len(), 2);
        assert!(prepared.total_distance_m().is_finite());
    }

    #[test]
    fn daily_distance_groups_by_utc_day() {
        let track = track_from(&[(0, 0.0, 0.0), (60, 0.01, 0.0), (60 * 24, 0.02, 0.0)]);
        let days = daily_distances(&prepare_track(&track));
        assert_eq!(days.len(), 2);
        assert!((days[0].distance_km - 1.112).abs() < 0.01);
        assert!((days[1].distance_km - 1.112).abs() < 0.01);
    }

    #[test]
    fn nsd_grows_with_displacement() {
        let track = track_from(&[(0, 0.0, 0.0), (60, 0.01, 0.0), (120, 0.02, 0.0)]);
        let nsd = net_squared_displacement(&prepare_track(&track));
        assert_eq!(nsd.len(), 3);
        assert_eq!(nsd[0].nsd_m2, 0.0);
        assert!(nsd[2].nsd_m2 > nsd[1].nsd_m2);
        let ratio = nsd[2].nsd_m2 / nsd[1].nsd_m2;
        assert!((ratio - 4.0).abs() < 1e-3);
    }

    #[test]
    fn nsd_windows_average_per_period() {
        // 2024-05-01 is a Wednesday
        let day = 60 * 24;
        let track = prepare_track(&track_from(&[
            (0, 0.0, 0.0),
            (60, 0.01, 0.0),
            (day * 5, 0.02, 0.0),
            (day * 31, 0.03, 0.0),
        ]));
        let raw = net_squared_displacement(&track);

        let daily = nsd_by_window(&track, NsdWindow::Day);
        assert_eq!(daily.len(), 3);
        assert_eq!(daily[0].period_start, t0().date_naive());
        assert_eq!(daily[0].fix_count, 2);
        assert!((daily[0].mean_nsd_m2 - raw[1].nsd_m2 / 2.0).abs() < 1e-6);

        let weekly = nsd_by_window(&track, NsdWindow::Week);
        let mondays: Vec<_> = weekly.iter().map(|w| w.period_start.to_string()).collect();
        assert_eq!(mondays, vec!["2024-04-29", "2024-05-06", "2024-05-27"]);
        assert_eq!(weekly[1].fix_count, 1);

        let monthly = nsd_by_window(&track, NsdWindow::Month);
        assert_eq!(monthly.len(), 2);
        assert_eq!(monthly[0].period_start.to_string(), "2024-05-01");
        assert_eq!(monthly[0].fix_count, 3);
        assert_eq!(monthly[1].period_start.to_string(), "2024-06-01");
        assert!((monthly[1].mean_nsd_m2 - raw[3].nsd_m2).abs() < 1e-6);

        let single = prepare_track(&track_from(&[(0, 1.0, 1.0)]));
        assert!(nsd_by_window(&single, NsdWindow::Week).is_empty());
    }

    #[test]
    fn speed_summary_excludes_implausible_speeds() {
        // last step covers ~111 km in one minute
        let track = track_from(&[(0, 0.0, 0.0), (60, 0.01, 0.0), (120, 0.03, 0.0), (121, 1.03, 0.0)]);
        let summary = speed_summary(&prepare_track(&track)).unwrap();
        assert_eq!(summary.samples, 3);
        assert!(summary.max_kmh < 3.0);
        assert!((summary.min_moving_kmh - 1.112).abs() < 0.01);
        assert!(summary.p95_kmh <= summary.max_kmh);
    }

    #[test]
    fn quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&v, 0.5), 2.5);
        assert_eq!(quantile_sorted(&v, 1.0), 4.0);
        assert_eq!(quantile_sorted(&v, 0.0), 1.0);
    }

    #[test]
    fn monthly_movement_requires_thirty_days() {
        let short = track_from(&[(0, 0.0, 0.0), (60, 0.01, 0.0)]);
        assert!(monthly_movement(&prepare_track(&short)).is_empty());
        let long = track_from(&[(0, 0.0, 0.0), (60 * 24 * 20, 0.01, 0.0), (60 * 24 * 40, 0.02, 0.0)]);
        let months = monthly_movement(&prepare_track(&long));
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].month, 5);
        assert_eq!(months[1].month, 6);
        assert_eq!(months[0].fix_count, 2);
    }

    #[test]
    fn summary_reports_bounds_and_center() {
        let track = track_from(&[(0, 10.0, 20.0), (60, 12.0, 24.0)]);
        let summary = track_summary(&prepare_track(&track));
        assert_eq!(summary.individual, "lynx");
        assert_eq!(summary.bounds, Some([20.0, 10.0, 24.0, 12.0]));
        assert_eq!(summary.center, Some([22.0, 11.0]));
        assert_eq!(summary.fix_count, 2);
    }
}
