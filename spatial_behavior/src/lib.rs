//! Movement, data-quality and home-range analytics for animal GPS tracks.
//!
//! Every entry point is a pure function of its inputs: a raw [`TrackSet`] is
//! prepared once with [`track::prepare`] and the resulting [`PreparedTrack`]s
//! feed the activity classifier, the data-quality analyzer and the home-range
//! estimators independently.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod activity;
pub mod config;
pub mod contour;
pub mod geodesy;
pub mod geometry;
pub mod home_range;
pub mod import;
pub mod quality;
pub mod track;

pub use activity::{classify_activity, ActivityReport, ActivitySummary, ClassifiedFix, HourlyActivity};
pub use config::{ActivityParams, AnalysisConfig, QualityParams};
pub use geodesy::{area_km2, haversine_distance};
pub use geometry::Boundary;
pub use home_range::{
    core_peripheral_zones, estimate, estimate_all, HomeRangeMethod, HomeRangeParams, Isopleth,
    McpSubsample, RangeOutcome, ZoneReport,
};
pub use import::{parse_csv, parse_gpx, parse_track_set};
pub use quality::{analyze_quality, QualityReport};
pub use track::{prepare, prepare_track};

/// Key used for results when fixes carry no individual identifier.
pub const ANONYMOUS_TRACK: &str = "all";

#[derive(Error, Debug)]
pub enum SbError {
    #[error("insufficient data for {method}: need at least {required} points, found {found}")]
    InsufficientData {
        method: &'static str,
        required: usize,
        found: usize,
    },
    #[error("missing required column: {0}")]
    MissingColumn(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to parse CSV input: {0}")]
    Csv(String),
    #[error("failed to parse GPX input: {0}")]
    GpxParse(String),
    #[error("unparseable timestamp: {0}")]
    Timestamp(String),
    #[error("numerical failure: {0}")]
    Numerical(String),
}

/// One GPS observation as delivered by an importer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Fix {
    pub individual_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

impl Fix {
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        Self {
            individual_id: None,
            timestamp,
            latitude,
            longitude,
        }
    }

    pub fn with_individual(mut self, individual_id: impl Into<String>) -> Self {
        self.individual_id = Some(individual_id.into());
        self
    }

    fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Raw fixes of a single individual, in input order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub individual_id: Option<String>,
    pub fixes: Vec<Fix>,
}

impl Track {
    pub fn new(individual_id: Option<String>, fixes: Vec<Fix>) -> Self {
        Self {
            individual_id,
            fixes,
        }
    }

    pub fn key(&self) -> String {
        track_key(self.individual_id.as_deref())
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }
}

/// Tracks grouped by individual, ordered by identifier (anonymous first).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackSet {
    tracks: Vec<Track>,
}

impl TrackSet {
    /// Group fixes by `individual_id`, preserving each individual's input order.
    pub fn from_fixes(fixes: impl IntoIterator<Item = Fix>) -> Self {
        let mut grouped: BTreeMap<Option<String>, Vec<Fix>> = BTreeMap::new();
        for fix in fixes {
            grouped
                .entry(fix.individual_id.clone())
                .or_default()
                .push(fix);
        }
        Self {
            tracks: grouped
                .into_iter()
                .map(|(id, fixes)| Track::new(id, fixes))
                .collect(),
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, key: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.key() == key)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn total_fixes(&self) -> usize {
        self.tracks.iter().map(Track::len).sum()
    }

    /// Combine sets read from several inputs, regrouping by individual.
    pub fn merge(sets: impl IntoIterator<Item = TrackSet>) -> Self {
        Self::from_fixes(
            sets.into_iter()
                .flat_map(|set| set.tracks)
                .flat_map(|track| track.fixes),
        )
    }
}

/// A fix annotated by the track preprocessor.
///
/// `step_distance_m` and `time_delta_min` refer to the previous fix of the
/// same individual and are zero for the first fix of a track.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackPoint {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub step_distance_m: f64,
    pub time_delta_min: f64,
    pub speed_kmh: f64,
}

/// Timestamp-sorted, annotated track for one individual.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PreparedTrack {
    pub individual_id: Option<String>,
    pub points: Vec<TrackPoint>,
}

impl PreparedTrack {
    pub fn key(&self) -> String {
        track_key(self.individual_id.as_deref())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn total_distance_m(&self) -> f64 {
        self.points.iter().map(|p| p.step_distance_m).sum()
    }

    /// Minutes between the first and last fix.
    pub fn span_minutes(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => {
                (last.timestamp - first.timestamp).num_milliseconds() as f64 / 60_000.0
            }
            _ => 0.0,
        }
    }

    /// Whole days between the first and last fix.
    pub fn span_days(&self) -> i64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_days(),
            _ => 0,
        }
    }

    pub fn mean_latitude(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(|p| p.latitude).sum::<f64>() / self.points.len() as f64
    }

    /// `(longitude, latitude)` pairs in track order.
    pub fn coordinates(&self) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|p| (p.longitude, p.latitude))
            .collect()
    }
}

pub(crate) fn track_key(individual_id: Option<&str>) -> String {
    individual_id.unwrap_or(ANONYMOUS_TRACK).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn track_set_groups_by_individual() {
        let fixes = vec![
            Fix::new(at(2), 1.0, 1.0).with_individual("wolf-b"),
            Fix::new(at(1), 0.0, 0.0).with_individual("wolf-a"),
            Fix::new(at(0), 0.5, 0.5).with_individual("wolf-b"),
        ];
        let set = TrackSet::from_fixes(fixes);
        assert_eq!(set.len(), 2);
        assert_eq!(set.total_fixes(), 3);
        assert_eq!(set.tracks()[0].key(), "wolf-a");
        let b = set.get("wolf-b").unwrap();
        assert_eq!(b.len(), 2);
        // input order is kept until preprocessing
        assert_eq!(b.fixes[0].timestamp, at(2));
    }

    #[test]
    fn anonymous_track_uses_default_key() {
        let set = TrackSet::from_fixes(vec![Fix::new(at(0), 0.0, 0.0)]);
        assert_eq!(set.tracks()[0].key(), ANONYMOUS_TRACK);
        assert!(set.get(ANONYMOUS_TRACK).is_some());
    }

    #[test]
    fn merge_regroups_across_inputs() {
        let first = TrackSet::from_fixes(vec![Fix::new(at(0), 0.0, 0.0).with_individual("elk")]);
        let second = TrackSet::from_fixes(vec![
            Fix::new(at(1), 0.1, 0.1).with_individual("elk"),
            Fix::new(at(1), 5.0, 5.0),
        ]);
        let merged = TrackSet::merge([first, second]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("elk").unwrap().len(), 2);
    }
}
