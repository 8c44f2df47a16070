//! Optimization request/response payloads
//!
//! Field names follow the public contract the gateway exposes over HTTP;
//! the worker sees the same JSON inside the NATS envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::geo::Coordinates;
use super::stop::PickupStop;

/// Route optimization request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeRouteRequest {
    pub driver_id: String,
    pub driver_location: Coordinates,
    /// Departure instant, ISO-8601 UTC
    pub departure_time: DateTime<Utc>,
    pub stops: Vec<PickupStop>,
}

/// A stop in the optimized visit order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedStop {
    pub stop_id: String,
    /// 1-based position in the visit order
    pub sequence: u32,
    pub location: Coordinates,
    /// Arrival (service start), "HH:MM"
    pub arrival_time: String,
    /// Departure, "HH:MM" (= arrival + service)
    pub departure_time: String,
}

/// Optimized route response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeRouteResponse {
    pub driver_id: String,
    pub optimized_stops: Vec<OptimizedStop>,
    pub total_distance_km: f64,
    pub total_duration_minutes: u32,
    pub google_maps_url: String,
    /// Improvement over the input-order baseline, clipped to [0, 1]
    pub optimization_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_public_contract() {
        let json = r#"{
            "driver_id": "drv-1",
            "driver_location": {"lat": 40.7128, "lng": -74.0060},
            "departure_time": "2026-08-01T07:30:00Z",
            "stops": [{
                "stop_id": "stop-1",
                "location": {"lat": 40.7282, "lng": -73.7949},
                "earliest_pickup": "08:00",
                "latest_pickup": "08:30",
                "service_time_minutes": 3
            }]
        }"#;

        let request: OptimizeRouteRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.driver_id, "drv-1");
        assert_eq!(request.stops.len(), 1);
        assert_eq!(request.departure_time.to_rfc3339(), "2026-08-01T07:30:00+00:00");
    }

    #[test]
    fn test_response_serializes_public_contract() {
        let response = OptimizeRouteResponse {
            driver_id: "drv-1".to_string(),
            optimized_stops: vec![OptimizedStop {
                stop_id: "stop-1".to_string(),
                sequence: 1,
                location: Coordinates::new(40.7282, -73.7949),
                arrival_time: "08:00".to_string(),
                departure_time: "08:03".to_string(),
            }],
            total_distance_km: 12.4,
            total_duration_minutes: 38,
            google_maps_url: "https://www.google.com/maps/dir/".to_string(),
            optimization_score: 0.25,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["optimized_stops"][0]["sequence"], 1);
        assert_eq!(json["total_duration_minutes"], 38);
        assert!(json["optimization_score"].as_f64().unwrap() > 0.0);
    }
}
