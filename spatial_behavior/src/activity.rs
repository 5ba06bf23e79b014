//! Active/resting classification and daily activity rhythm.

use std::collections::BTreeMap;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ActivityParams;
use crate::PreparedTrack;

/// Daytime is `[DAY_START_HOUR, DAY_END_HOUR)` in UTC.
pub const DAY_START_HOUR: u32 = 6;
pub const DAY_END_HOUR: u32 = 18;

pub fn is_daytime_hour(hour: u32) -> bool {
    (DAY_START_HOUR..DAY_END_HOUR).contains(&hour)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedFix {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub step_distance_m: f64,
    pub time_delta_min: f64,
    pub speed_kmh: f64,
    pub is_active: bool,
    pub hour_of_day: u32,
    pub is_daytime: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HourlyActivity {
    pub hour_of_day: u32,
    pub activity_count: usize,
    pub total_count: usize,
    pub activity_ratio: f64,
    /// `activity_ratio` as a percentage.
    pub activity: f64,
    pub avg_speed_kmh: f64,
    pub is_daytime: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivitySummary {
    pub active_pct: f64,
    pub resting_pct: f64,
    pub day_active_pct: f64,
    pub night_active_pct: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActivityReport {
    pub individual: String,
    pub fixes: Vec<ClassifiedFix>,
    pub hourly: Vec<HourlyActivity>,
    pub summary: ActivitySummary,
}

impl ActivityReport {
    fn empty(individual: String) -> Self {
        Self {
            individual,
            fixes: Vec::new(),
            hourly: Vec::new(),
            summary: ActivitySummary::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }
}

/// Label every fix active or resting and aggregate by hour of day.
///
/// A fix is active when its step from the previous fix exceeds the distance
/// threshold and that step took no longer than the time window. The first
/// fix of a track has no step and is always resting.
pub fn classify_activity(track: &PreparedTrack, params: &ActivityParams) -> ActivityReport {
    if track.is_empty() {
        return ActivityReport::empty(track.key());
    }

    let fixes: Vec<ClassifiedFix> = track
        .points
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            let hour = p.timestamp.hour();
            let is_active = idx > 0
                && p.step_distance_m / 1000.0 > params.activity_threshold_km
                && p.time_delta_min <= params.time_window_min;
            ClassifiedFix {
                timestamp: p.timestamp,
                latitude: p.latitude,
                longitude: p.longitude,
                step_distance_m: p.step_distance_m,
                time_delta_min: p.time_delta_min,
                speed_kmh: p.speed_kmh,
                is_active,
                hour_of_day: hour,
                is_daytime: is_daytime_hour(hour),
            }
        })
        .collect();

    let hourly = hourly_activity(&fixes);
    let summary = summarize(&fixes);
    ActivityReport {
        individual: track.key(),
        fixes,
        hourly,
        summary,
    }
}

/// Classify every prepared track with the same parameters.
pub fn classify_all(tracks: &[PreparedTrack], params: &ActivityParams) -> Vec<ActivityReport> {
    tracks
        .iter()
        .map(|t| classify_activity(t, params))
        .collect()
}

fn hourly_activity(fixes: &[ClassifiedFix]) -> Vec<HourlyActivity> {
    // hour -> (active, total, speed sum)
    let mut by_hour: BTreeMap<u32, (usize, usize, f64)> = BTreeMap::new();
    for fix in fixes {
        let entry = by_hour.entry(fix.hour_of_day).or_insert((0, 0, 0.0));
        if fix.is_active {
            entry.0 += 1;
        }
        entry.1 += 1;
        entry.2 += fix.speed_kmh;
    }
    by_hour
        .into_iter()
        .map(|(hour, (active, total, speed_sum))| {
            let ratio = ratio(active, total);
            HourlyActivity {
                hour_of_day: hour,
                activity_count: active,
                total_count: total,
                activity_ratio: ratio,
                activity: ratio * 100.0,
                avg_speed_kmh: if total > 0 {
                    speed_sum / total as f64
                } else {
                    0.0
                },
                is_daytime: is_daytime_hour(hour),
            }
        })
        .collect()
}

fn summarize(fixes: &[ClassifiedFix]) -> ActivitySummary {
    let active = fixes.iter().filter(|f| f.is_active).count();
    let day: Vec<&ClassifiedFix> = fixes.iter().filter(|f| f.is_daytime).collect();
    let day_active = day.iter().filter(|f| f.is_active).count();
    let night_total = fixes.len() - day.len();
    let night_active = active - day_active;

    let active_pct = ratio(active, fixes.len()) * 100.0;
    ActivitySummary {
        active_pct,
        resting_pct: if fixes.is_empty() {
            0.0
        } else {
            100.0 - active_pct
        },
        day_active_pct: ratio(day_active, day.len()) * 100.0,
        night_active_pct: ratio(night_active, night_total) * 100.0,
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::prepare_track;
    use crate::{Fix, Track};
    use chrono::{Duration, TimeZone};

    fn prepared(points: &[(i64, f64)]) -> PreparedTrack {
        let t0 = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let fixes = points
            .iter()
            .map(|&(minutes, lat)| Fix::new(t0 + Duration::minutes(minutes), lat, 30.0))
            .collect();
        prepare_track(&Track::new(Some("fox".into()), fixes))
    }

    #[test]
    fn classifies_by_distance_and_time_window() {
        // steps: ~1.1 km in 60 min (active), ~5 m (resting), ~1.1 km after 3 h (too slow)
        let track = prepared(&[(0, 0.0), (60, 0.01), (120, 0.01005), (300, 0.02005)]);
        let report = classify_activity(&track, &ActivityParams::default());
        let flags: Vec<bool> = report.fixes.iter().map(|f| f.is_active).collect();
        assert_eq!(flags, vec![false, true, false, false]);
        assert_eq!(report.fixes[1].hour_of_day, 1);
        assert!(!report.fixes[1].is_daytime);
    }

    #[test]
    fn hourly_table_lists_observed_hours() {
        let track = prepared(&[(0, 0.0), (60, 0.01), (70, 0.02), (7 * 60, 0.03)]);
        let report = classify_activity(&track, &ActivityParams::default());
        let hours: Vec<u32> = report.hourly.iter().map(|h| h.hour_of_day).collect();
        assert_eq!(hours, vec![0, 1, 7]);
        let one = &report.hourly[1];
        assert_eq!(one.total_count, 2);
        assert_eq!(one.activity_count, 2);
        assert_eq!(one.activity_ratio, 1.0);
        assert_eq!(one.activity, 100.0);
        assert!(one.avg_speed_kmh > 0.0);
        assert!(report.hourly[2].is_daytime);
    }

    #[test]
    fn summary_splits_day_and_night() {
        let track = prepared(&[(0, 0.0), (60, 0.01), (6 * 60, 0.01), (7 * 60, 0.02)]);
        let report = classify_activity(&track, &ActivityParams::default());
        let s = &report.summary;
        assert_eq!(s.active_pct, 50.0);
        assert_eq!(s.resting_pct, 50.0);
        assert_eq!(s.night_active_pct, 50.0);
        assert_eq!(s.day_active_pct, 50.0);
    }

    #[test]
    fn empty_track_gives_empty_report() {
        let track = PreparedTrack {
            individual_id: None,
            points: Vec::new(),
        };
        let report = classify_activity(&track, &ActivityParams::default());
        assert!(report.is_empty());
        assert!(report.hourly.is_empty());
        assert_eq!(report.summary, ActivitySummary::default());
        assert_eq!(report.individual, crate::ANONYMOUS_TRACK);
    }

    #[test]
    fn day_boundaries() {
        assert!(!is_daytime_hour(5));
        assert!(is_daytime_hour(6));
        assert!(is_daytime_hour(17));
        assert!(!is_daytime_hour(18));
    }
}
