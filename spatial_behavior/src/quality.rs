//! GPS data-quality assessment: fix success, outages, completeness and
//! temporal sampling patterns.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::QualityParams;
use crate::PreparedTrack;

pub const MINUTES_PER_DAY: f64 = 1440.0;
/// Interval assumed when none is given and none can be inferred.
pub const FALLBACK_INTERVAL_MIN: f64 = 60.0;
/// Outage threshold as a multiple of the expected interval.
pub const OUTAGE_FACTOR: f64 = 2.0;
/// Threshold of the coarser fix-success gap report.
pub const GAP_REPORT_FACTOR: f64 = 3.0;

const WEEKLY_MIN_SPAN_DAYS: i64 = 7;
const HOURLY_MIN_SPAN_DAYS: i64 = 30;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QualitySummary {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_points: usize,
    pub expected_fixes: f64,
    pub expected_points: u64,
    pub missing_fixes: f64,
    pub fix_success_rate: f64,
    pub data_completeness: f64,
    pub expected_interval_min: f64,
    pub interval_inferred: bool,
    pub total_outages: usize,
    pub total_outage_min: f64,
    pub avg_outage_min: f64,
    pub max_outage_min: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DailyCompleteness {
    pub date: NaiveDate,
    pub fix_count: usize,
    pub completeness: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Outage {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_min: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Gap {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_hours: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GapReport {
    pub threshold_min: f64,
    pub gaps: Vec<Gap>,
    pub total_gap_hours: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WeekdayCount {
    pub weekday: String,
    pub count: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TemporalPatterns {
    /// Fixes per weekday, Monday first; only for tracks spanning a week.
    pub weekly: Option<Vec<WeekdayCount>>,
    /// Fixes per UTC hour 0..=23; only for tracks spanning 30 days.
    pub hourly: Option<Vec<usize>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpeedOutlier {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    pub individual: String,
    pub summary: QualitySummary,
    pub daily_completeness: Vec<DailyCompleteness>,
    pub outages: Vec<Outage>,
    pub gap_report: GapReport,
    pub temporal_patterns: TemporalPatterns,
    pub speed_outliers: Vec<SpeedOutlier>,
}

/// Assess sampling quality of one track. Returns `None` for an empty track.
pub fn analyze_quality(track: &PreparedTrack, params: &QualityParams) -> Option<QualityReport> {
    let first = track.points.first()?;
    let last = track.points.last()?;

    let (interval, inferred) = match params.expected_interval_min {
        Some(v) if v > 0.0 => (v, false),
        _ => (infer_interval(track), true),
    };
    if inferred {
        debug!("{}: inferred sampling interval {} min", track.key(), interval);
    }

    let elapsed = track.span_minutes();
    let actual = track.len();
    let expected_fixes = elapsed / interval;
    let expected_points = expected_fixes.floor().max(0.0) as u64;

    let outages = find_outages(track, interval * OUTAGE_FACTOR);
    let durations: Vec<f64> = outages.iter().map(|o| o.duration_min).collect();
    let total_outage_min: f64 = durations.iter().sum();

    let summary = QualitySummary {
        start: first.timestamp,
        end: last.timestamp,
        total_points: actual,
        expected_fixes,
        expected_points,
        missing_fixes: (expected_fixes - actual as f64).max(0.0),
        fix_success_rate: capped_pct(actual as f64, expected_fixes),
        data_completeness: capped_pct(actual as f64, expected_points as f64),
        expected_interval_min: interval,
        interval_inferred: inferred,
        total_outages: outages.len(),
        total_outage_min,
        avg_outage_min: if durations.is_empty() {
            0.0
        } else {
            total_outage_min / durations.len() as f64
        },
        max_outage_min: durations.iter().copied().fold(0.0, f64::max),
    };

    Some(QualityReport {
        individual: track.key(),
        summary,
        daily_completeness: daily_completeness(track, interval),
        outages,
        gap_report: gap_report(track, interval * GAP_REPORT_FACTOR),
        temporal_patterns: temporal_patterns(track),
        speed_outliers: speed_outliers(track, params.speed_outlier_kmh),
    })
}

/// Assess every prepared track; empty tracks are skipped.
pub fn analyze_all(tracks: &[PreparedTrack], params: &QualityParams) -> Vec<QualityReport> {
    tracks
        .iter()
        .filter_map(|t| analyze_quality(t, params))
        .collect()
}

/// Most frequent positive gap between fixes, ties broken by the shorter gap.
///
/// Falls back to 60 minutes when the track has no positive gap or the mode
/// exceeds one day.
pub fn infer_interval(track: &PreparedTrack) -> f64 {
    let mut counts: HashMap<OrderedFloat<f64>, usize> = HashMap::new();
    for point in track.points.iter().skip(1) {
        if point.time_delta_min > 0.0 {
            *counts.entry(OrderedFloat(point.time_delta_min)).or_insert(0) += 1;
        }
    }
    let mode = counts
        .into_iter()
        .max_by(|(ga, ca), (gb, cb)| ca.cmp(cb).then(gb.cmp(ga)))
        .map(|(gap, _)| gap.into_inner());
    match mode {
        Some(m) if m <= MINUTES_PER_DAY => m,
        _ => FALLBACK_INTERVAL_MIN,
    }
}

fn capped_pct(actual: f64, expected: f64) -> f64 {
    if expected <= 0.0 {
        return 0.0;
    }
    let pct = actual / expected * 100.0;
    if pct.is_finite() {
        pct.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn find_outages(track: &PreparedTrack, threshold_min: f64) -> Vec<Outage> {
    track
        .points
        .windows(2)
        .filter(|w| w[1].time_delta_min > threshold_min)
        .map(|w| Outage {
            start: w[0].timestamp,
            end: w[1].timestamp,
            duration_min: w[1].time_delta_min,
        })
        .collect()
}

fn gap_report(track: &PreparedTrack, threshold_min: f64) -> GapReport {
    let gaps: Vec<Gap> = find_outages(track, threshold_min)
        .into_iter()
        .map(|o| Gap {
            start: o.start,
            end: o.end,
            duration_hours: o.duration_min / 60.0,
        })
        .collect();
    let total_gap_hours = gaps.iter().map(|g| g.duration_hours).sum();
    GapReport {
        threshold_min,
        gaps,
        total_gap_hours,
    }
}

fn daily_completeness(track: &PreparedTrack, interval: f64) -> Vec<DailyCompleteness> {
    let per_day = MINUTES_PER_DAY / interval;
    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for point in &track.points {
        *counts.entry(point.timestamp.date_naive()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(date, fix_count)| DailyCompleteness {
            date,
            fix_count,
            completeness: capped_pct(fix_count as f64, per_day),
        })
        .collect()
}

fn temporal_patterns(track: &PreparedTrack) -> TemporalPatterns {
    let span = track.span_days();
    let weekly = (span >= WEEKLY_MIN_SPAN_DAYS).then(|| {
        let mut counts = [0usize; 7];
        for point in &track.points {
            counts[point.timestamp.weekday().num_days_from_monday() as usize] += 1;
        }
        WEEKDAYS
            .iter()
            .zip(counts)
            .map(|(day, count)| WeekdayCount {
                weekday: weekday_name(*day).to_string(),
                count,
            })
            .collect::<Vec<_>>()
    });
    let hourly = (span >= HOURLY_MIN_SPAN_DAYS).then(|| {
        let mut counts = vec![0usize; 24];
        for point in &track.points {
            counts[point.timestamp.hour() as usize] += 1;
        }
        counts
    });
    TemporalPatterns { weekly, hourly }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn speed_outliers(track: &PreparedTrack, limit_kmh: f64) -> Vec<SpeedOutlier> {
    track
        .points
        .iter()
        .filter(|p| p.speed_kmh > limit_kmh)
        .map(|p| SpeedOutlier {
            timestamp: p.timestamp,
            latitude: p.latitude,
            longitude: p.longitude,
            speed_kmh: p.speed_kmh,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::prepare_track;
    use crate::{Fix, Track};
    use chrono::{Duration, TimeZone};

    fn track_at(minutes: &[i64]) -> PreparedTrack {
        // 2024-01-01 is a Monday
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let fixes = minutes
            .iter()
            .enumerate()
            .map(|(i, &m)| Fix::new(t0 + Duration::minutes(m), 0.0001 * i as f64, 0.0))
            .collect();
        prepare_track(&Track::new(None, fixes))
    }

    fn hourly_fixes(hours: i64) -> Vec<i64> {
        (0..hours).map(|h| h * 60).collect()
    }

    fn params(interval: Option<f64>) -> QualityParams {
        QualityParams {
            expected_interval_min: interval,
            ..QualityParams::default()
        }
    }

    #[test]
    fn regular_hourly_track_is_complete() {
        let track = track_at(&hourly_fixes(25));
        let report = analyze_quality(&track, &params(Some(60.0))).unwrap();
        assert_eq!(report.summary.fix_success_rate, 100.0);
        assert_eq!(report.summary.total_outages, 0);
        assert!(report.outages.is_empty());
        assert_eq!(report.summary.avg_outage_min, 0.0);
        assert_eq!(report.summary.missing_fixes, 0.0);
    }

    #[test]
    fn single_long_gap_is_one_outage() {
        let mut minutes = hourly_fixes(6);
        let resume = minutes.last().unwrap() + 300;
        minutes.extend((0..6).map(|h| resume + h * 60));
        let report = analyze_quality(&track_at(&minutes), &params(Some(60.0))).unwrap();
        assert_eq!(report.outages.len(), 1);
        assert!((report.outages[0].duration_min - 300.0).abs() < 1e-9);
        assert_eq!(report.summary.max_outage_min, 300.0);
        assert_eq!(report.summary.total_outage_min, 300.0);
        assert_eq!(report.gap_report.gaps.len(), 1);
        assert!((report.gap_report.total_gap_hours - 5.0).abs() < 1e-9);
    }

    #[test]
    fn gap_report_uses_coarser_threshold() {
        // a 150-minute gap is an outage (> 120) but not a reportable gap (<= 180)
        let report =
            analyze_quality(&track_at(&[0, 60, 210, 270]), &params(Some(60.0))).unwrap();
        assert_eq!(report.outages.len(), 1);
        assert!(report.gap_report.gaps.is_empty());
        assert_eq!(report.gap_report.threshold_min, 180.0);
    }

    #[test]
    fn infers_modal_interval() {
        let track = track_at(&[0, 30, 60, 90, 180, 210]);
        assert_eq!(infer_interval(&track), 30.0);
        let report = analyze_quality(&track, &params(None)).unwrap();
        assert!(report.summary.interval_inferred);
        assert_eq!(report.summary.expected_interval_min, 30.0);
    }

    #[test]
    fn inference_falls_back_for_sparse_tracks() {
        let track = track_at(&[0, 3000, 6000]);
        assert_eq!(infer_interval(&track), FALLBACK_INTERVAL_MIN);
        let single = track_at(&[0]);
        assert_eq!(infer_interval(&single), FALLBACK_INTERVAL_MIN);
    }

    #[test]
    fn single_fix_reports_zero_rate() {
        let report = analyze_quality(&track_at(&[0]), &params(Some(60.0))).unwrap();
        assert_eq!(report.summary.fix_success_rate, 0.0);
        assert_eq!(report.summary.data_completeness, 0.0);
        assert_eq!(report.daily_completeness.len(), 1);
    }

    #[test]
    fn empty_track_has_no_report() {
        let track = PreparedTrack {
            individual_id: None,
            points: Vec::new(),
        };
        assert!(analyze_quality(&track, &QualityParams::default()).is_none());
    }

    #[test]
    fn daily_completeness_is_capped() {
        // 48 fixes on day one at 30 min spacing against a 60 min expectation
        let minutes: Vec<i64> = (0..48).map(|i| i * 30).collect();
        let report = analyze_quality(&track_at(&minutes), &params(Some(60.0))).unwrap();
        assert_eq!(report.daily_completeness.len(), 1);
        assert_eq!(report.daily_completeness[0].completeness, 100.0);
        assert_eq!(report.daily_completeness[0].fix_count, 48);
    }

    #[test]
    fn temporal_patterns_need_enough_span() {
        let short = analyze_quality(&track_at(&hourly_fixes(48)), &params(Some(60.0))).unwrap();
        assert!(short.temporal_patterns.weekly.is_none());
        assert!(short.temporal_patterns.hourly.is_none());

        let week: Vec<i64> = (0..8).map(|d| d * 1440).collect();
        let weekly = analyze_quality(&track_at(&week), &params(Some(1440.0))).unwrap();
        let days = weekly.temporal_patterns.weekly.unwrap();
        assert_eq!(days.len(), 7);
        assert_eq!(days[0].weekday, "Monday");
        assert_eq!(days[0].count, 2);
        assert_eq!(days[6].count, 1);
        assert!(weekly.temporal_patterns.hourly.is_none());

        let month: Vec<i64> = (0..31).map(|d| d * 1440 + 90).collect();
        let monthly = analyze_quality(&track_at(&month), &params(Some(1440.0))).unwrap();
        let hours = monthly.temporal_patterns.hourly.unwrap();
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[1], 31);
        assert_eq!(hours.iter().sum::<usize>(), 31);
    }

    #[test]
    fn flags_speed_outliers() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let fixes = vec![
            Fix::new(t0, 0.0, 0.0),
            Fix::new(t0 + Duration::minutes(60), 0.01, 0.0),
            Fix::new(t0 + Duration::minutes(70), 0.5, 0.0),
        ];
        let track = prepare_track(&Track::new(None, fixes));
        let report = analyze_quality(&track, &QualityParams::default()).unwrap();
        assert_eq!(report.speed_outliers.len(), 1);
        assert!(report.speed_outliers[0].speed_kmh > 20.0);
    }
}
