//! Importers turning tabular CSV or GPX bytes into a [`TrackSet`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;

use crate::{Fix, SbError, TrackSet};

const INDIVIDUAL_COLUMNS: &[&str] = &["individual_id", "individual-local-identifier"];
const TIMESTAMP_COLUMNS: &[&str] = &["timestamp"];
const LATITUDE_COLUMNS: &[&str] = &["location_lat", "location-lat", "latitude"];
const LONGITUDE_COLUMNS: &[&str] = &["location_long", "location-long", "longitude"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

/// Parse CSV or GPX bytes using the provided format hint (extension or path).
pub fn parse_track_set(input: &[u8], format: &str) -> Result<TrackSet, SbError> {
    let format_lc = format.to_ascii_lowercase();
    if format_lc.ends_with(".csv") || format_lc == "csv" {
        parse_csv(input)
    } else if format_lc.ends_with(".gpx") || format_lc == "gpx" {
        parse_gpx(input)
    } else {
        Err(SbError::InvalidParameter(format!(
            "unsupported input format: {}",
            format
        )))
    }
}

/// Read fixes from a CSV table. Column names are matched case-insensitively
/// against the Movebank-style aliases; the individual column is optional.
/// Rows with an empty coordinate cell are skipped.
pub fn parse_csv(input: &[u8]) -> Result<TrackSet, SbError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);
    let headers = reader
        .headers()
        .map_err(|e| SbError::Csv(e.to_string()))?
        .clone();
    let find = |aliases: &[&str]| {
        headers
            .iter()
            .position(|h| aliases.iter().any(|a| h.eq_ignore_ascii_case(a)))
    };
    let required = |aliases: &[&str]| {
        find(aliases).ok_or_else(|| SbError::MissingColumn(aliases.join(" | ")))
    };
    let ts_col = required(TIMESTAMP_COLUMNS)?;
    let lat_col = required(LATITUDE_COLUMNS)?;
    let lon_col = required(LONGITUDE_COLUMNS)?;
    let id_col = find(INDIVIDUAL_COLUMNS);

    let mut fixes = Vec::new();
    let mut skipped = 0usize;
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| SbError::Csv(e.to_string()))?;
        let field = |idx: usize| record.get(idx).unwrap_or("");
        let (lat_raw, lon_raw) = (field(lat_col), field(lon_col));
        if lat_raw.is_empty() || lon_raw.is_empty() {
            skipped += 1;
            continue;
        }
        let number = |raw: &str, name: &str| {
            raw.parse::<f64>().map_err(|_| {
                SbError::Csv(format!("row {}: invalid {} '{}'", row + 1, name, raw))
            })
        };
        let mut fix = Fix::new(
            parse_timestamp(field(ts_col))?,
            number(lat_raw, "latitude")?,
            number(lon_raw, "longitude")?,
        );
        if let Some(id) = id_col.map(field).filter(|id| !id.is_empty()) {
            fix = fix.with_individual(id);
        }
        fixes.push(fix);
    }
    if skipped > 0 {
        debug!("skipped {} rows without coordinates", skipped);
    }
    Ok(TrackSet::from_fixes(fixes))
}

/// Parse a timestamp with an offset (RFC 3339) or a naive one taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SbError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| SbError::Timestamp(raw.to_string()))
}

/// Read timestamped track points from GPX. Each named track becomes its own
/// individual; points without a time are skipped.
pub fn parse_gpx(input: &[u8]) -> Result<TrackSet, SbError> {
    use gpx::read;
    use std::io::Cursor;

    let mut cursor = Cursor::new(input);
    let gpx = read(&mut cursor).map_err(|e| SbError::GpxParse(e.to_string()))?;
    let mut fixes = Vec::new();
    for track in gpx.tracks {
        let individual = track.name.clone().filter(|n| !n.trim().is_empty());
        for segment in track.segments {
            for point in segment.points {
                let Some(time) = point.time else {
                    continue;
                };
                let iso = time
                    .format()
                    .map_err(|e| SbError::GpxParse(e.to_string()))?;
                let utc = DateTime::parse_from_rfc3339(&iso)
                    .map_err(|e| SbError::GpxParse(e.to_string()))?
                    .with_timezone(&Utc);
                let point_geo = point.point();
                let mut fix = Fix::new(utc, point_geo.y(), point_geo.x());
                if let Some(name) = &individual {
                    fix = fix.with_individual(name.clone());
                }
                fixes.push(fix);
            }
        }
    }
    Ok(TrackSet::from_fixes(fixes))
}
