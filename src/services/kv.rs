//! Key-value state backend
//!
//! Sessions and cached matrices live in NATS JetStream key-value buckets.
//! Expiry is bucket-level (`max_age`), refreshed by every put. The trait
//! exists so services can run against an in-memory store in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

/// Byte-oriented key-value bucket with time-based eviction
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes the value and refreshes its TTL
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Cheap reachability check for the health probe
    async fn ping(&self) -> Result<()>;

    fn name(&self) -> &str;
}

/// JetStream-backed bucket
pub struct NatsKvStore {
    store: async_nats::jetstream::kv::Store,
    bucket: String,
}

impl NatsKvStore {
    /// Open the bucket, creating it with the given TTL when missing
    pub async fn open(
        jetstream: &async_nats::jetstream::Context,
        bucket: &str,
        ttl: Duration,
    ) -> Result<Self> {
        let store = match jetstream.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => jetstream
                .create_key_value(async_nats::jetstream::kv::Config {
                    bucket: bucket.to_string(),
                    max_age: ttl,
                    ..Default::default()
                })
                .await
                .with_context(|| format!("Failed to create KV bucket '{}'", bucket))?,
        };

        debug!("KV bucket '{}' ready (ttl {:?})", bucket, ttl);

        Ok(Self {
            store,
            bucket: bucket.to_string(),
        })
    }
}

#[async_trait]
impl KvStore for NatsKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entry = self
            .store
            .get(key)
            .await
            .with_context(|| format!("KV get failed for '{}' in '{}'", key, self.bucket))?;
        Ok(entry.map(|bytes| bytes.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.store
            .put(key, value.into())
            .await
            .with_context(|| format!("KV put failed for '{}' in '{}'", key, self.bucket))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(key)
            .await
            .with_context(|| format!("KV delete failed for '{}' in '{}'", key, self.bucket))?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.store
            .status()
            .await
            .with_context(|| format!("KV bucket '{}' unreachable", self.bucket))?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.bucket
    }
}

/// In-memory bucket with the same TTL semantics, for tests
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    ttl: Duration,
    available: AtomicBool,
}

impl MemoryKvStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a backend outage
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            anyhow::bail!("memory kv store marked unavailable")
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, written)) if written.elapsed() < self.ttl => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_available()?;
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryKvStore::new(Duration::from_secs(60));
        store.put("a", b"one".to_vec()).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_put_overwrites() {
        let store = MemoryKvStore::new(Duration::from_secs(60));
        store.put("a", b"one".to_vec()).await.unwrap();
        store.put("a", b"two".to_vec()).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_store_expires() {
        let store = MemoryKvStore::new(Duration::from_millis(0));
        store.put("a", b"one".to_vec()).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_memory_store_delete() {
        let store = MemoryKvStore::new(Duration::from_secs(60));
        store.put("a", b"one".to_vec()).await.unwrap();
        store.delete("a").await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_outage() {
        let store = MemoryKvStore::new(Duration::from_secs(60));
        store.set_available(false);

        assert!(store.get("a").await.is_err());
        assert!(store.put("a", vec![]).await.is_err());
        assert!(store.ping().await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
