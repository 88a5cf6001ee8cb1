mod distance;
mod polyline;

pub use distance::{haversine_km, path_length_km, EARTH_RADIUS_KM};
pub use polyline::{decode_polyline, PolylineError};

use serde::{Deserialize, Serialize};

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}
