use geo::Area;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Kilometres per degree of latitude (and of longitude at the equator).
pub const KM_PER_DEGREE: f64 = 111.32;

/// Great-circle distance in metres between two points given in decimal degrees.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    // rounding can push `a` just outside [0, 1] for antipodal points
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Approximate area in km² of a lon/lat geometry.
///
/// The planar degree² area is scaled by `111.32² · cos(reference_latitude)`,
/// which holds for regions that are small relative to the Earth's curvature.
/// `reference_latitude` should be the mean latitude of the contributing fixes.
pub fn area_km2<G>(geometry: &G, reference_latitude: f64) -> f64
where
    G: Area<f64>,
{
    geometry.unsigned_area() * degree_area_scale(reference_latitude)
}

/// km² per degree² at the given latitude.
pub fn degree_area_scale(reference_latitude: f64) -> f64 {
    KM_PER_DEGREE * KM_PER_DEGREE * reference_latitude.to_radians().cos()
}
