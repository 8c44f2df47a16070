//! Traffic-aware travel matrices
//!
//! The Google Distance Matrix client serves production; the estimated
//! provider (haversine at an average road speed) serves tests and keyless
//! deployments. Both sit behind the content-addressed cache decorator.

mod cache;
mod google;

pub use cache::{matrix_fingerprint, CachedMatrixProvider};
pub use google::{GoogleMatrixClient, GoogleMapsConfig};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::services::kv::KvStore;
use crate::types::geo::{self, Coordinates};

/// Sentinel for edges the provider could not route. Large enough to lose
/// every comparison, small enough that a 26-node tour cannot overflow u32.
pub const UNREACHABLE_SECONDS: u32 = 10_000_000;
pub const UNREACHABLE_METERS: u32 = 10_000_000;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("traffic provider unavailable: {0}")]
    Upstream(String),
    #[error("traffic provider returned an invalid matrix: {0}")]
    InvalidResponse(String),
}

/// Square travel-seconds and travel-meters grids. Index 0 is the origin,
/// 1..N-1 the stops in caller order; the diagonal is zero.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TravelMatrix {
    /// Seconds [i][j] from location i to location j
    pub durations: Vec<Vec<u32>>,
    /// Meters [i][j] from location i to location j
    pub distances: Vec<Vec<u32>>,
    pub size: usize,
}

impl TravelMatrix {
    pub fn zeroed(size: usize) -> Self {
        Self {
            durations: vec![vec![0; size]; size],
            distances: vec![vec![0; size]; size],
            size,
        }
    }

    pub fn duration(&self, from: usize, to: usize) -> u32 {
        self.durations[from][to]
    }

    pub fn distance(&self, from: usize, to: usize) -> u32 {
        self.distances[from][to]
    }

    pub fn is_reachable(&self, from: usize, to: usize) -> bool {
        self.durations[from][to] < UNREACHABLE_SECONDS
    }

    /// Both grids square, matching `size`, with a zero diagonal
    pub fn is_well_formed(&self) -> bool {
        self.durations.len() == self.size
            && self.distances.len() == self.size
            && self.durations.iter().all(|row| row.len() == self.size)
            && self.distances.iter().all(|row| row.len() == self.size)
            && (0..self.size).all(|i| self.durations[i][i] == 0 && self.distances[i][i] == 0)
    }
}

/// Travel matrix source
#[async_trait]
pub trait MatrixProvider: Send + Sync {
    /// Fetch the N×N matrix over `locations` for the given departure instant
    async fn fetch(
        &self,
        locations: &[Coordinates],
        departure: DateTime<Utc>,
    ) -> Result<TravelMatrix, MatrixError>;

    fn name(&self) -> &str;
}

/// Haversine-based estimation, departure-independent
pub struct EstimatedMatrixProvider;

#[async_trait]
impl MatrixProvider for EstimatedMatrixProvider {
    async fn fetch(
        &self,
        locations: &[Coordinates],
        _departure: DateTime<Utc>,
    ) -> Result<TravelMatrix, MatrixError> {
        let n = locations.len();
        let mut matrix = TravelMatrix::zeroed(n);

        for i in 0..n {
            for j in 0..n {
                if i != j {
                    matrix.durations[i][j] =
                        geo::estimated_travel_seconds(&locations[i], &locations[j]);
                    matrix.distances[i][j] =
                        geo::estimated_road_meters(&locations[i], &locations[j]);
                }
            }
        }

        Ok(matrix)
    }

    fn name(&self) -> &str {
        "Estimated"
    }
}

/// Build the resolver stack: Google when a key is configured, the haversine
/// estimator otherwise, both behind the cache.
pub fn create_matrix_provider(
    google: Option<GoogleMapsConfig>,
    cache: Arc<dyn KvStore>,
) -> Arc<CachedMatrixProvider> {
    let inner: Arc<dyn MatrixProvider> = match google {
        Some(config) => {
            info!("Using Google Distance Matrix for travel times");
            Arc::new(GoogleMatrixClient::new(config))
        }
        None => {
            info!("No maps API key configured, using haversine estimates");
            Arc::new(EstimatedMatrixProvider)
        }
    };

    Arc::new(CachedMatrixProvider::new(inner, cache))
}
