//! Per-endpoint vehicle-data cache
//!
//! BLE state reads are expensive (each one may wake a session), while
//! pollers tend to ask for the same endpoints every few seconds. The cache
//! keeps the last decoded payload per `(VIN, endpoint)` and hands it back
//! until the TTL elapses. Requests consult it *per endpoint*: a request for
//! `{A, B, C}` may find A fresh and only fetch `{B, C}` over BLE.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

/// Default TTL for cached endpoint payloads
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    stored_at: Instant,
}

/// Thread-safe TTL cache keyed by `(VIN, endpoint)`.
///
/// Clones share the same underlying store; reads take the read lock only.
#[derive(Debug, Clone)]
pub struct VehicleDataCache {
    entries: Arc<RwLock<HashMap<(String, String), CacheEntry>>>,
    ttl: Duration,
}

impl VehicleDataCache {
    /// Create a cache with the default 30 s TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    /// Create a cache with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Look up a fresh payload. Expired and missing entries both miss.
    pub fn get(&self, vin: &str, endpoint: &str) -> Option<Value> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(&(vin.to_string(), endpoint.to_string()))?;
        let age = entry.stored_at.elapsed();
        if age >= self.ttl {
            debug!(%vin, %endpoint, ?age, "cache entry expired");
            return None;
        }
        debug!(%vin, %endpoint, ?age, "cache hit");
        Some(entry.data.clone())
    }

    /// Store a freshly fetched payload
    pub fn put(&self, vin: &str, endpoint: &str, data: Value) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            (vin.to_string(), endpoint.to_string()),
            CacheEntry {
                data,
                stored_at: Instant::now(),
            },
        );
    }

    /// Number of stored entries, including expired ones
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    /// The configured TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for VehicleDataCache {
    fn default() -> Self {
        Self::new()
    }
}
