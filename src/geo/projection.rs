//! Lat/lon <-> planar feet projection, centered on a reference point.
//!
//! Out-of-scope collaborator per the external interfaces: a lightweight
//! equirectangular projection, in the spirit of `layers::geo_util`'s
//! degree-to-meters constants but carried through to feet since the graph
//! model measures link lengths and search radii in feet.

const FEET_PER_DEGREE_LAT: f64 = 364_000.0;
const FEET_PER_DEGREE_LON_AT_EQUATOR: f64 = 365_221.0;

/// Reference center used to project (lat, lon) onto a local planar (x, y)
/// in feet. Mirrors `gps.GPS` from the original implementation.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GpsCenter {
    pub lat_ctr: f64,
    pub lon_ctr: f64,
}

impl GpsCenter {
    pub fn new(lat_ctr: f64, lon_ctr: f64) -> Self {
        GpsCenter { lat_ctr, lon_ctr }
    }

    /// Converts (lat, lon) to (x, y) in feet relative to this center.
    pub fn gps_to_feet(&self, lat: f64, lon: f64) -> (f64, f64) {
        let x = (lon - self.lon_ctr) * FEET_PER_DEGREE_LON_AT_EQUATOR * self.lat_ctr.to_radians().cos();
        let y = (lat - self.lat_ctr) * FEET_PER_DEGREE_LAT;
        (x, y)
    }
}

/// Haversine great-circle distance between two (lat, lon) points, in feet.
pub fn haversine_feet(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_FEET: f64 = 20_902_231.0;
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_FEET * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_maps_to_origin() {
        let gps = GpsCenter::new(30.2672, -97.7431);
        let (x, y) = gps.gps_to_feet(30.2672, -97.7431);
        assert!(x.abs() < 1e-9);
        assert!(y.abs() < 1e-9);
    }

    #[test]
    fn haversine_is_symmetric() {
        let d1 = haversine_feet(30.0, -97.0, 30.01, -97.01);
        let d2 = haversine_feet(30.01, -97.01, 30.0, -97.0);
        assert!((d1 - d2).abs() < 1e-6);
        assert!(d1 > 0.0);
    }
}
