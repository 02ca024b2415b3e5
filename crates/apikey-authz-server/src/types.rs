//! Response types for the service endpoints

use apikey_authz::LoadedAt;
use refresh_cache::{CacheStats, EntryInfo};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
    pub entries: Vec<EntryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_table: Option<KeyTableSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyTableSummary {
    pub loaded_at: LoadedAt,
    pub records: usize,
}
