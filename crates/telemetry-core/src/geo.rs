//! Great-circle geometry and the fleet's operating region.

/// Mean Earth radius used for haversine distances, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Bounding box of the area the fleet operates in (Iberian peninsula).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Inclusive containment test.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

pub const OPERATING_REGION: BoundingBox = BoundingBox {
    min_lat: 36.0,
    max_lat: 44.0,
    min_lon: -10.0,
    max_lon: 5.0,
};

/// Whether the coordinates are on the globe at all.
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Haversine distance between two WGS84 coordinates, in metres.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let sin_dlat_half = (dlat / 2.0).sin();
    let sin_dlon_half = (dlon / 2.0).sin();
    let a = sin_dlat_half.mul_add(
        sin_dlat_half,
        lat1_rad.cos() * lat2_rad.cos() * sin_dlon_half * sin_dlon_half,
    );
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * 1000.0 * c
}
