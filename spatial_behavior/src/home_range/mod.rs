//! Home-range estimation: four interchangeable methods behind one contract.
//!
//! Every method maps a prepared track and a set of percentage levels to one
//! [`Isopleth`] per level. The batch runner applies the same parameters to
//! each individual independently and folds failures into the result map
//! instead of aborting.

pub mod bbmm;
mod density;
pub mod kde;
pub mod locoh;
pub mod mcp;

use std::collections::BTreeMap;
use std::panic;
use std::str::FromStr;

use geo::{Contains, Point};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geometry::Boundary;
use crate::{PreparedTrack, SbError};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HomeRangeMethod {
    #[default]
    Mcp,
    Kde,
    Bbmm,
    #[serde(rename = "locoht", alias = "tlocoh")]
    Locoh,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub min_points: usize,
}

impl HomeRangeMethod {
    pub const ALL: [HomeRangeMethod; 4] = [
        HomeRangeMethod::Mcp,
        HomeRangeMethod::Kde,
        HomeRangeMethod::Bbmm,
        HomeRangeMethod::Locoh,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            HomeRangeMethod::Mcp => "mcp",
            HomeRangeMethod::Kde => "kde",
            HomeRangeMethod::Bbmm => "bbmm",
            HomeRangeMethod::Locoh => "locoht",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HomeRangeMethod::Mcp => "Minimum Convex Polygon",
            HomeRangeMethod::Kde => "Kernel Density Estimation",
            HomeRangeMethod::Bbmm => "Brownian Bridge (simplified)",
            HomeRangeMethod::Locoh => "Time Local Convex Hull (simplified)",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            HomeRangeMethod::Mcp => {
                "Convex hull of all fixes; lower levels use the hull of a p% subsample."
            }
            HomeRangeMethod::Kde => {
                "Gaussian kernel density on a padded grid, contoured at probability-mass thresholds."
            }
            HomeRangeMethod::Bbmm => {
                "Segment-distance kernel weighted by inverse time gap; a heuristic, not a calibrated bridge."
            }
            HomeRangeMethod::Locoh => {
                "Union of the smallest local hulls of space-time nearest neighbours."
            }
        }
    }

    /// Fewest fixes the method accepts before reporting insufficient data.
    pub fn min_points(&self) -> usize {
        match self {
            HomeRangeMethod::Mcp => 3,
            HomeRangeMethod::Kde | HomeRangeMethod::Bbmm => 10,
            HomeRangeMethod::Locoh => 5,
        }
    }
}

impl FromStr for HomeRangeMethod {
    type Err = SbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "mcp" => Ok(HomeRangeMethod::Mcp),
            "kde" => Ok(HomeRangeMethod::Kde),
            "bbmm" => Ok(HomeRangeMethod::Bbmm),
            "locoht" | "tlocoh" | "t-locoh" => Ok(HomeRangeMethod::Locoh),
            other => Err(SbError::InvalidParameter(format!(
                "unknown home-range method '{}'",
                other
            ))),
        }
    }
}

pub fn list_methods() -> Vec<MethodInfo> {
    HomeRangeMethod::ALL
        .iter()
        .map(|m| MethodInfo {
            id: m.id().to_string(),
            name: m.name().to_string(),
            description: m.description().to_string(),
            min_points: m.min_points(),
        })
        .collect()
}

/// How MCP picks the fixes behind a sub-100% hull.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum McpSubsample {
    /// Simple random sample without replacement. Without a seed every call
    /// draws a fresh sample.
    Random {
        #[serde(default)]
        seed: Option<u64>,
    },
    /// Keep the fixes closest to the track centroid.
    CentroidDistance,
}

impl Default for McpSubsample {
    fn default() -> Self {
        McpSubsample::Random { seed: None }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HomeRangeParams {
    pub method: HomeRangeMethod,
    pub percentage_levels: Vec<u32>,
    pub grid_size: usize,
    /// KDE bandwidth factor applied to the data covariance; Scott's rule when unset.
    #[serde(alias = "smoothing_factor")]
    pub bandwidth: Option<f64>,
    pub mcp_subsample: McpSubsample,
    /// Mix normalised time distance into T-LoCoH neighbour search.
    pub locoh_use_time: bool,
}

impl Default for HomeRangeParams {
    fn default() -> Self {
        Self {
            method: HomeRangeMethod::Mcp,
            percentage_levels: vec![50, 95],
            grid_size: 100,
            bandwidth: None,
            mcp_subsample: McpSubsample::default(),
            locoh_use_time: true,
        }
    }
}

impl HomeRangeParams {
    pub fn validate(&self) -> Result<(), SbError> {
        if self.percentage_levels.is_empty() {
            return Err(SbError::InvalidParameter(
                "at least one percentage level is required".into(),
            ));
        }
        if let Some(bad) = self
            .percentage_levels
            .iter()
            .find(|&&p| p == 0 || p > 100)
        {
            return Err(SbError::InvalidParameter(format!(
                "percentage level {} outside (0, 100]",
                bad
            )));
        }
        if self.grid_size < 2 {
            return Err(SbError::InvalidParameter(format!(
                "grid_size must be at least 2, got {}",
                self.grid_size
            )));
        }
        if let Some(bw) = self.bandwidth {
            if !(bw.is_finite() && bw > 0.0) {
                return Err(SbError::InvalidParameter(format!(
                    "bandwidth must be positive, got {}",
                    bw
                )));
            }
        }
        Ok(())
    }

    /// Ascending, de-duplicated levels.
    pub fn levels(&self) -> Vec<u32> {
        let mut levels = self.percentage_levels.clone();
        levels.sort_unstable();
        levels.dedup();
        levels
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Isopleth {
    pub area_km2: f64,
    pub boundary: Boundary,
}

/// Per-individual result: isopleths keyed by level, or the reason there are none.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RangeOutcome {
    Levels(BTreeMap<u32, Isopleth>),
    Error { error: String },
}

impl RangeOutcome {
    pub fn levels(&self) -> Option<&BTreeMap<u32, Isopleth>> {
        match self {
            RangeOutcome::Levels(levels) => Some(levels),
            RangeOutcome::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RangeOutcome::Levels(_) => None,
            RangeOutcome::Error { error } => Some(error),
        }
    }
}

pub fn estimate(
    track: &PreparedTrack,
    params: &HomeRangeParams,
) -> Result<BTreeMap<u32, Isopleth>, SbError> {
    params.validate()?;
    let method = params.method;
    ensure_points(method, track.len())?;
    let levels = params.levels();
    debug!(
        "{} home range for {} ({} fixes, levels {:?})",
        method.id(),
        track.key(),
        track.len(),
        levels
    );
    match method {
        HomeRangeMethod::Mcp => mcp::estimate(track, &levels, &params.mcp_subsample),
        HomeRangeMethod::Kde => kde::estimate(track, &levels, params.grid_size, params.bandwidth),
        HomeRangeMethod::Bbmm => bbmm::estimate(track, &levels, params.grid_size),
        HomeRangeMethod::Locoh => locoh::estimate(track, &levels, params.locoh_use_time),
    }
}

fn ensure_points(method: HomeRangeMethod, found: usize) -> Result<(), SbError> {
    let required = method.min_points();
    if found < required {
        return Err(SbError::InsufficientData {
            method: method.id(),
            required,
            found,
        });
    }
    Ok(())
}

/// [`estimate`] with every failure, panics included, folded into the outcome.
pub fn estimate_outcome(track: &PreparedTrack, params: &HomeRangeParams) -> RangeOutcome {
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| estimate(track, params)))
        .unwrap_or_else(|_| {
            Err(SbError::Numerical(format!(
                "{} estimator panicked",
                params.method.id()
            )))
        });
    match result {
        Ok(levels) => RangeOutcome::Levels(levels),
        Err(err) => {
            warn!("home range for {} failed: {}", track.key(), err);
            RangeOutcome::Error {
                error: err.to_string(),
            }
        }
    }
}

/// Run the estimator for every individual in parallel.
pub fn estimate_all(
    tracks: &[PreparedTrack],
    params: &HomeRangeParams,
) -> BTreeMap<String, RangeOutcome> {
    tracks
        .par_iter()
        .map(|track| (track.key(), estimate_outcome(track, params)))
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ZoneReport {
    pub core_level: u32,
    pub peripheral_level: u32,
    pub core_area_km2: f64,
    /// Area of the peripheral isopleth minus the core.
    pub peripheral_area_km2: f64,
    pub total_area_km2: f64,
    pub core_pct: f64,
    pub peripheral_pct: f64,
    pub outside_pct: f64,
    pub core: Isopleth,
    pub peripheral: Isopleth,
}

/// Split a KDE home range into a core zone and the peripheral ring around it.
pub fn core_peripheral_zones(
    track: &PreparedTrack,
    core_level: u32,
    peripheral_level: u32,
    params: &HomeRangeParams,
) -> Result<ZoneReport, SbError> {
    if !(0 < core_level && core_level < peripheral_level && peripheral_level <= 100) {
        return Err(SbError::InvalidParameter(format!(
            "zone levels must satisfy 0 < core < peripheral <= 100, got {} and {}",
            core_level, peripheral_level
        )));
    }
    let kde_params = HomeRangeParams {
        method: HomeRangeMethod::Kde,
        percentage_levels: vec![core_level, peripheral_level],
        ..params.clone()
    };
    let mut levels = estimate(track, &kde_params)?;
    let missing = |level: u32| SbError::Numerical(format!("no {}% isopleth could be traced", level));
    let core = levels.remove(&core_level).ok_or_else(|| missing(core_level))?;
    let peripheral = levels
        .remove(&peripheral_level)
        .ok_or_else(|| missing(peripheral_level))?;

    let core_shape = core.boundary.to_multi_polygon();
    let peripheral_shape = peripheral.boundary.to_multi_polygon();
    let (mut in_core, mut in_ring) = (0usize, 0usize);
    for p in &track.points {
        let pt = Point::new(p.longitude, p.latitude);
        if core_shape.contains(&pt) {
            in_core += 1;
        } else if peripheral_shape.contains(&pt) {
            in_ring += 1;
        }
    }
    let n = track.len() as f64;
    let core_pct = in_core as f64 / n * 100.0;
    let peripheral_pct = in_ring as f64 / n * 100.0;

    Ok(ZoneReport {
        core_level,
        peripheral_level,
        core_area_km2: core.area_km2,
        peripheral_area_km2: (peripheral.area_km2 - core.area_km2).max(0.0),
        total_area_km2: peripheral.area_km2,
        core_pct,
        peripheral_pct,
        outside_pct: (100.0 - core_pct - peripheral_pct).max(0.0),
        core,
        peripheral,
    })
}
