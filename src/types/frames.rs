//! Live driver channel frames
//!
//! JSON objects with a `type` discriminator, carried verbatim by whatever
//! transport the gateway bridges in. The `route_updated` payload is also
//! the exact envelope published on the per-driver reroute topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::api::OptimizedStop;

/// Why a new route was broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerouteReason {
    TrafficDelay,
    StopAdded,
    StopCancelled,
}

/// Error codes surfaced on the driver channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelErrorCode {
    InvalidGps,
    InvalidStopId,
    DriverNotFound,
    OptimizationFailed,
    RateLimited,
}

/// Frames the driver sends
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum InboundFrame {
    GpsUpdate {
        lat: f64,
        lng: f64,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_stop_id: Option<String>,
    },
    Pong,
}

/// Reroute broadcast payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteUpdated {
    pub reason: RerouteReason,
    pub optimized_stops: Vec<OptimizedStop>,
    pub total_duration_minutes: u32,
    pub google_maps_url: String,
}

/// Frames the worker sends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum OutboundFrame {
    RouteUpdated(RouteUpdated),
    Ping {
        server_time: DateTime<Utc>,
    },
    Error {
        code: ChannelErrorCode,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::geo::Coordinates;

    #[test]
    fn test_gps_update_parses() {
        let json = r#"{
            "type": "gps_update",
            "lat": 40.71,
            "lng": -74.0,
            "timestamp": "2026-08-01T08:05:00Z",
            "completed_stop_id": "stop-1"
        }"#;

        match serde_json::from_str::<InboundFrame>(json).unwrap() {
            InboundFrame::GpsUpdate {
                lat,
                completed_stop_id,
                ..
            } => {
                assert!((lat - 40.71).abs() < 1e-9);
                assert_eq!(completed_stop_id.as_deref(), Some("stop-1"));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_gps_update_completion_optional() {
        let json = r#"{"type":"gps_update","lat":1.0,"lng":2.0,"timestamp":"2026-08-01T08:05:00Z"}"#;
        match serde_json::from_str::<InboundFrame>(json).unwrap() {
            InboundFrame::GpsUpdate {
                completed_stop_id, ..
            } => assert!(completed_stop_id.is_none()),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_pong_parses() {
        assert!(matches!(
            serde_json::from_str::<InboundFrame>(r#"{"type":"pong"}"#).unwrap(),
            InboundFrame::Pong
        ));
    }

    #[test]
    fn test_route_updated_wire_shape() {
        let frame = OutboundFrame::RouteUpdated(RouteUpdated {
            reason: RerouteReason::TrafficDelay,
            optimized_stops: vec![OptimizedStop {
                stop_id: "stop-2".to_string(),
                sequence: 1,
                location: Coordinates::new(40.7, -74.0),
                arrival_time: "08:20".to_string(),
                departure_time: "08:23".to_string(),
            }],
            total_duration_minutes: 42,
            google_maps_url: "https://www.google.com/maps/dir/".to_string(),
        });

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "route_updated");
        assert_eq!(json["reason"], "traffic_delay");
        assert_eq!(json["total_duration_minutes"], 42);
    }

    #[test]
    fn test_error_codes_screaming_snake() {
        let frame = OutboundFrame::Error {
            code: ChannelErrorCode::InvalidStopId,
            message: "completed stop is not the current head".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["code"], "INVALID_STOP_ID");
    }

    #[test]
    fn test_reason_variants_render() {
        assert_eq!(
            serde_json::to_value(RerouteReason::StopAdded).unwrap(),
            "stop_added"
        );
        assert_eq!(
            serde_json::to_value(RerouteReason::StopCancelled).unwrap(),
            "stop_cancelled"
        );
    }
}
