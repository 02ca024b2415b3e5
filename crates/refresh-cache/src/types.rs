//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
}

/// Point-in-time view of one cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInfo {
    pub key: String,
    pub loaded_at: DateTime<Utc>,
    /// Seconds until the entry turns stale; negative once it is stale
    pub expires_in_secs: i64,
    pub stale: bool,
    pub ttl_secs: u64,
    pub refreshing: bool,
}
