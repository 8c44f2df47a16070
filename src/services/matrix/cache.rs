//! Content-addressed matrix cache
//!
//! Key: md5 over the sorted 6-dp coordinate list plus the UTC departure
//! hour bucket. Identical requests inside the bucket's TTL resolve without
//! touching the provider. A cache outage is a warning and a flag, never a
//! failed request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use tracing::{debug, warn};

use crate::services::kv::KvStore;
use crate::types::geo::Coordinates;

use super::{MatrixError, MatrixProvider, TravelMatrix};

/// Cache key for a location set and departure instant
pub fn matrix_fingerprint(locations: &[Coordinates], departure: DateTime<Utc>) -> String {
    let mut rendered: Vec<String> = locations.iter().map(Coordinates::to_fixed6).collect();
    rendered.sort();

    let hour_bucket = departure.timestamp().div_euclid(3600);

    let mut hasher = Md5::new();
    hasher.update(rendered.join(";").as_bytes());
    hasher.update(b"|");
    hasher.update(hour_bucket.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Caching decorator over any matrix provider
pub struct CachedMatrixProvider {
    inner: Arc<dyn MatrixProvider>,
    cache: Arc<dyn KvStore>,
    degraded: AtomicBool,
}

impl CachedMatrixProvider {
    pub fn new(inner: Arc<dyn MatrixProvider>, cache: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            cache,
            degraded: AtomicBool::new(false),
        }
    }

    /// True while the cache backend is failing and requests run straight
    /// against the provider
    pub fn cache_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn read_cache(&self, key: &str, raw: Option<Vec<u8>>) -> Option<TravelMatrix> {
        let bytes = raw?;
        match serde_json::from_slice::<TravelMatrix>(&bytes) {
            Ok(matrix) if matrix.is_well_formed() => Some(matrix),
            Ok(_) => {
                warn!("Cached matrix {} is malformed, refetching", key);
                None
            }
            Err(e) => {
                warn!("Cached matrix {} failed to decode: {}", key, e);
                None
            }
        }
    }
}

#[async_trait]
impl MatrixProvider for CachedMatrixProvider {
    async fn fetch(
        &self,
        locations: &[Coordinates],
        departure: DateTime<Utc>,
    ) -> Result<TravelMatrix, MatrixError> {
        let key = matrix_fingerprint(locations, departure);

        match self.cache.get(&key).await {
            Ok(raw) => {
                self.degraded.store(false, Ordering::SeqCst);
                if let Some(matrix) = self.read_cache(&key, raw) {
                    debug!("Matrix cache hit for {}", key);
                    return Ok(matrix);
                }
            }
            Err(e) => {
                warn!("Matrix cache read failed, continuing uncached: {}", e);
                self.degraded.store(true, Ordering::SeqCst);
            }
        }

        let matrix = self.inner.fetch(locations, departure).await?;

        match serde_json::to_vec(&matrix) {
            Ok(bytes) => {
                if let Err(e) = self.cache.put(&key, bytes).await {
                    warn!("Matrix cache write failed: {}", e);
                    self.degraded.store(true, Ordering::SeqCst);
                }
            }
            Err(e) => warn!("Matrix serialization for cache failed: {}", e),
        }

        Ok(matrix)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
