//! Google Distance Matrix client
//!
//! API documentation:
//! https://developers.google.com/maps/documentation/distance-matrix
//!
//! Requests use driving mode with the `best_guess` traffic model so cells
//! carry traffic-adjusted durations for the given departure instant. The
//! API caps a single request at 100 elements, so the full N×N grid is
//! assembled from row batches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::types::geo::Coordinates;

use super::{MatrixError, MatrixProvider, TravelMatrix, UNREACHABLE_METERS, UNREACHABLE_SECONDS};

/// Elements (origins × destinations) allowed per request
const MAX_ELEMENTS_PER_REQUEST: usize = 100;

/// Backoff before the single retry
const RETRY_BACKOFF_SECS: u64 = 1;

/// Google Maps client configuration
#[derive(Debug, Clone)]
pub struct GoogleMapsConfig {
    pub api_key: String,
    /// Overridable for tests
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl GoogleMapsConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://maps.googleapis.com/maps/api/distancematrix/json".to_string(),
            timeout_seconds: 8,
        }
    }
}

/// Distance Matrix client
pub struct GoogleMatrixClient {
    client: Client,
    config: GoogleMapsConfig,
}

impl GoogleMatrixClient {
    pub fn new(config: GoogleMapsConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Fetch one batch of origin rows against all destinations
    async fn fetch_rows(
        &self,
        origins: &[Coordinates],
        destinations: &[Coordinates],
        departure: DateTime<Utc>,
    ) -> Result<Vec<MatrixRow>, MatrixError> {
        let origins_param = join_locations(origins);
        let destinations_param = join_locations(destinations);
        let departure_param = departure.timestamp().max(0).to_string();

        let mut last_error = None;

        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(RETRY_BACKOFF_SECS)).await;
            }

            match self
                .send_request(&origins_param, &destinations_param, &departure_param)
                .await
            {
                Ok(rows) => return Ok(rows),
                Err(e) => {
                    warn!("Distance Matrix request failed (attempt {}): {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MatrixError::Upstream("no attempt made".to_string())))
    }

    async fn send_request(
        &self,
        origins: &str,
        destinations: &str,
        departure_time: &str,
    ) -> Result<Vec<MatrixRow>, MatrixError> {
        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[
                ("origins", origins),
                ("destinations", destinations),
                ("mode", "driving"),
                ("traffic_model", "best_guess"),
                ("departure_time", departure_time),
                ("units", "metric"),
                ("key", self.config.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| MatrixError::Upstream(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(MatrixError::Upstream(format!(
                "Distance Matrix returned HTTP {}",
                response.status()
            )));
        }

        let body: MatrixResponse = response
            .json()
            .await
            .map_err(|e| MatrixError::InvalidResponse(format!("parse failed: {}", e)))?;

        if body.status != "OK" {
            return Err(MatrixError::Upstream(format!(
                "Distance Matrix status {}: {}",
                body.status,
                body.error_message.unwrap_or_default()
            )));
        }

        Ok(body.rows)
    }
}

#[async_trait]
impl MatrixProvider for GoogleMatrixClient {
    async fn fetch(
        &self,
        locations: &[Coordinates],
        departure: DateTime<Utc>,
    ) -> Result<TravelMatrix, MatrixError> {
        let n = locations.len();
        if n == 0 {
            return Ok(TravelMatrix::zeroed(0));
        }

        let rows_per_request = (MAX_ELEMENTS_PER_REQUEST / n).max(1);
        let mut matrix = TravelMatrix::zeroed(n);

        debug!(
            "Fetching {}x{} traffic matrix in {}-row batches",
            n,
            n,
            rows_per_request
        );

        for (batch_index, origin_batch) in locations.chunks(rows_per_request).enumerate() {
            let rows = self.fetch_rows(origin_batch, locations, departure).await?;

            if rows.len() != origin_batch.len() {
                return Err(MatrixError::InvalidResponse(format!(
                    "expected {} rows, got {}",
                    origin_batch.len(),
                    rows.len()
                )));
            }

            for (row_offset, row) in rows.iter().enumerate() {
                if row.elements.len() != n {
                    return Err(MatrixError::InvalidResponse(format!(
                        "expected {} elements per row, got {}",
                        n,
                        row.elements.len()
                    )));
                }

                let i = batch_index * rows_per_request + row_offset;
                for (j, element) in row.elements.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    let (seconds, meters) = element.resolve();
                    matrix.durations[i][j] = seconds;
                    matrix.distances[i][j] = meters;
                }
            }
        }

        Ok(matrix)
    }

    fn name(&self) -> &str {
        "GoogleDistanceMatrix"
    }
}

fn join_locations(locations: &[Coordinates]) -> String {
    locations
        .iter()
        .map(Coordinates::to_fixed6)
        .collect::<Vec<_>>()
        .join("|")
}

// Distance Matrix API types

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    rows: Vec<MatrixRow>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    status: String,
    duration: Option<ValueField>,
    duration_in_traffic: Option<ValueField>,
    distance: Option<ValueField>,
}

#[derive(Debug, Deserialize)]
struct ValueField {
    value: f64,
}

impl MatrixElement {
    /// Traffic-adjusted duration when present, plain duration otherwise.
    /// Anything but element status OK forbids the edge.
    fn resolve(&self) -> (u32, u32) {
        if self.status != "OK" {
            return (UNREACHABLE_SECONDS, UNREACHABLE_METERS);
        }

        let seconds = self
            .duration_in_traffic
            .as_ref()
            .or(self.duration.as_ref())
            .map(|v| v.value.round() as u32)
            .unwrap_or(UNREACHABLE_SECONDS);

        let meters = self
            .distance
            .as_ref()
            .map(|v| v.value.round() as u32)
            .unwrap_or(UNREACHABLE_METERS);

        (seconds, meters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(json: &str) -> MatrixElement {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_element_prefers_traffic_duration() {
        let element = element(
            r#"{
                "status": "OK",
                "duration": {"value": 600},
                "duration_in_traffic": {"value": 780},
                "distance": {"value": 8400}
            }"#,
        );
        assert_eq!(element.resolve(), (780, 8400));
    }

    #[test]
    fn test_element_falls_back_to_plain_duration() {
        let element = element(
            r#"{
                "status": "OK",
                "duration": {"value": 600},
                "distance": {"value": 8400}
            }"#,
        );
        assert_eq!(element.resolve(), (600, 8400));
    }

    #[test]
    fn test_element_not_ok_is_unreachable() {
        let element = element(r#"{"status": "ZERO_RESULTS"}"#);
        assert_eq!(element.resolve(), (UNREACHABLE_SECONDS, UNREACHABLE_METERS));
    }

    #[test]
    fn test_join_locations_pipe_separated() {
        let joined = join_locations(&[
            Coordinates::new(40.7128, -74.0060),
            Coordinates::new(40.6413, -73.7781),
        ]);
        assert_eq!(joined, "40.712800,-74.006000|40.641300,-73.778100");
    }

    #[test]
    fn test_response_parses_without_rows_on_error() {
        let body: MatrixResponse = serde_json::from_str(
            r#"{"status": "REQUEST_DENIED", "error_message": "key invalid"}"#,
        )
        .unwrap();
        assert_eq!(body.status, "REQUEST_DENIED");
        assert!(body.rows.is_empty());
    }

    #[test]
    fn test_config_defaults() {
        let config = GoogleMapsConfig::new("test-key");
        assert_eq!(config.timeout_seconds, 8);
        assert!(config.base_url.contains("distancematrix"));
    }

    // Integration test against the live API, run manually with a real key
    #[tokio::test]
    #[ignore = "Requires GOOGLE_MAPS_API_KEY and network access"]
    async fn test_live_matrix_manhattan_jfk() {
        let key = std::env::var("GOOGLE_MAPS_API_KEY").unwrap();
        let client = GoogleMatrixClient::new(GoogleMapsConfig::new(key));

        let matrix = client
            .fetch(
                &[
                    Coordinates::new(40.7128, -74.0060),
                    Coordinates::new(40.6413, -73.7781),
                ],
                Utc::now() + chrono::Duration::minutes(5),
            )
            .await
            .unwrap();

        assert_eq!(matrix.size, 2);
        // Manhattan to JFK is 20-35 km by road
        let km = matrix.distance(0, 1) as f64 / 1000.0;
        assert!(km > 15.0 && km < 45.0, "got {} km", km);
    }
}
