//! Coordinates and geographic estimates

use serde::{Deserialize, Serialize};

/// Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Road distance coefficient (straight line to road)
pub const ROAD_COEFFICIENT: f64 = 1.3;

/// Average speed in km/h for travel time estimation
pub const AVERAGE_SPEED_KMH: f64 = 40.0;

/// Coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Latitude within [-90, 90] and longitude within [-180, 180]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Fixed 6-decimal rendering, used for cache fingerprints and map URLs
    pub fn to_fixed6(&self) -> String {
        format!("{:.6},{:.6}", self.lat, self.lng)
    }
}

/// Haversine distance between two points in kilometers
pub fn haversine_distance(from: &Coordinates, to: &Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lng - from.lng).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Estimate road distance in meters from the straight line
pub fn estimated_road_meters(from: &Coordinates, to: &Coordinates) -> u32 {
    (haversine_distance(from, to) * ROAD_COEFFICIENT * 1000.0).round() as u32
}

/// Estimate driving time in seconds at the average speed
pub fn estimated_travel_seconds(from: &Coordinates, to: &Coordinates) -> u32 {
    let road_km = haversine_distance(from, to) * ROAD_COEFFICIENT;
    (road_km / AVERAGE_SPEED_KMH * 3600.0).round() as u32
}
