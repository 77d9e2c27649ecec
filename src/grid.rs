//! Fixed-grid coordinate quantization with latitude-aware scaling.

/// Average meters per degree of latitude
const METERS_PER_DEGREE_LAT: f64 = 111_111.0;
/// Meters per degree of longitude at the equator
const METERS_PER_DEGREE_LON_AT_EQUATOR: f64 = 111_320.0;
/// Minimum cosine value to prevent division issues at extreme latitudes (~89.9 degrees)
const MIN_COS_LAT: f64 = 0.001;

/// A quantization bucket covering a small rectangular patch of the surface
/// at the configured resolution. All nodes falling into the same cell are
/// collapsed onto one representative node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub lat_bucket: i64,
    pub lon_bucket: i64,
}

/// Latitude bucket, cell-center latitude, and latitude scale for a clamped
/// coordinate.
fn lat_geometry(lat_clamped: f64, grid_meters: f64) -> (i64, f64, f64) {
    let lat_scale = grid_meters / METERS_PER_DEGREE_LAT;
    let lat_bucket = (lat_clamped / lat_scale).floor();
    let lat_center = (lat_bucket + 0.5) * lat_scale;
    (lat_bucket as i64, lat_center, lat_scale)
}

/// Longitude degrees shrink toward the poles. The scale is derived from the
/// cell-center latitude, not the input latitude: every coordinate in a
/// latitude row then shares one exact scale, which is what makes re-snapping
/// land on the identical cell and coordinate. The cosine is floored so cells
/// stay finite past the clamping limit.
fn lon_scale_at(lat_center: f64, grid_meters: f64) -> f64 {
    let cos_lat = lat_center.to_radians().cos().max(MIN_COS_LAT);
    grid_meters / (METERS_PER_DEGREE_LON_AT_EQUATOR * cos_lat)
}

/// Compute the grid cell containing a coordinate.
///
/// Deterministic function of (lat, lon, resolution): the same coordinate at
/// the same resolution always lands in the same cell. Latitude is clamped to
/// ±89.9° and longitude to ±180° before bucketing, so nothing is dropped
/// near the poles or the antimeridian.
pub fn grid_cell(lat: f64, lon: f64, grid_meters: f64) -> GridCell {
    let lat_clamped = lat.clamp(-89.9, 89.9);
    let lon_clamped = lon.clamp(-180.0, 180.0);
    let (lat_bucket, lat_center, _) = lat_geometry(lat_clamped, grid_meters);
    let lon_scale = lon_scale_at(lat_center, grid_meters);

    GridCell {
        lat_bucket,
        lon_bucket: (lon_clamped / lon_scale).floor() as i64,
    }
}

/// Snap a coordinate to the center of its grid cell.
///
/// # Arguments
/// * `lat` - Latitude in degrees (-90 to 90)
/// * `lon` - Longitude in degrees (-180 to 180)
/// * `grid_meters` - Grid resolution in meters (e.g., 5.0 for 5m grid)
///
/// # Returns
/// A tuple of (lat_nano, lon_nano) as nanodegrees (OSM format)
///
/// Snapping to the cell center rather than a corner halves the worst-case
/// displacement. Re-snapping an already-snapped coordinate at the same
/// resolution yields an identical cell and coordinate.
pub fn snap_coordinate(lat: f64, lon: f64, grid_meters: f64) -> (i64, i64) {
    // Keep all nodes, including far northern regions (Svalbard, Alert, etc.):
    // clamp latitude to the valid range but don't drop.
    let lat_clamped = lat.clamp(-89.9, 89.9);
    let lon_clamped = lon.clamp(-180.0, 180.0);

    let (_, lat_center, _) = lat_geometry(lat_clamped, grid_meters);
    let lon_scale = lon_scale_at(lat_center, grid_meters);
    let lon_center = ((lon_clamped / lon_scale).floor() + 0.5) * lon_scale;

    // Store as nanodegrees (OSM format)
    let lat_nano = (lat_center * 1e9).round() as i64;
    let lon_nano = (lon_center * 1e9).round() as i64;

    (lat_nano, lon_nano)
}

/// Convert nanodegrees back to degrees.
pub fn nano_to_degrees(nano: i64) -> f64 {
    nano as f64 / 1e9
}
