//! Parameter groups for every analytics component.
//!
//! Each group carries its own defaults so a partial JSON document is enough
//! to override a single field.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::home_range::HomeRangeParams;
use crate::SbError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActivityParams {
    /// Minimum step distance (km) for a fix to count as active.
    pub activity_threshold_km: f64,
    /// Maximum time since the previous fix (minutes) for a step to count.
    pub time_window_min: f64,
}

impl Default for ActivityParams {
    fn default() -> Self {
        Self {
            activity_threshold_km: 0.05,
            time_window_min: 60.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityParams {
    /// Expected minutes between fixes; inferred from the track when `None`.
    pub expected_interval_min: Option<f64>,
    /// Fixes moving faster than this (km/h) are reported as speed outliers.
    pub speed_outlier_kmh: f64,
}

impl Default for QualityParams {
    fn default() -> Self {
        Self {
            expected_interval_min: None,
            speed_outlier_kmh: 20.0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub activity: ActivityParams,
    pub quality: QualityParams,
    pub home_range: HomeRangeParams,
}

impl AnalysisConfig {
    pub fn from_json_str(text: &str) -> Result<Self, SbError> {
        let config: AnalysisConfig =
            serde_json::from_str(text).map_err(|e| SbError::InvalidParameter(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, SbError> {
        let text = fs::read_to_string(path).map_err(|e| {
            SbError::InvalidParameter(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), SbError> {
        let activity = &self.activity;
        if !(activity.activity_threshold_km >= 0.0) {
            return Err(SbError::InvalidParameter(
                "activity_threshold_km must be >= 0".into(),
            ));
        }
        if !(activity.time_window_min > 0.0) {
            return Err(SbError::InvalidParameter(
                "time_window_min must be > 0".into(),
            ));
        }
        if let Some(interval) = self.quality.expected_interval_min {
            if !(interval > 0.0) {
                return Err(SbError::InvalidParameter(
                    "expected_interval_min must be > 0".into(),
                ));
            }
        }
        if !(self.quality.speed_outlier_kmh > 0.0) {
            return Err(SbError::InvalidParameter(
                "speed_outlier_kmh must be > 0".into(),
            ));
        }
        self.home_range.validate()
    }
}
