//! Console responses
//!
//! Every command answers with one JSON object per line.

use serde::Serialize;

use crate::cache::{CacheEntry, CacheStats};
use crate::error::CacheError;
use crate::tasks::TidyReport;

/// Response body for `GET`
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub value: String,
    pub size: i64,
    pub pinned: bool,
    /// Creation time in RFC 3339
    pub created_at: String,
    /// Time left before expiry; absent for entries that never expire
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_remaining_ms: Option<u64>,
}

impl GetResponse {
    /// Builds the response from a resident entry, as seen at `now_ms`.
    pub fn from_entry(entry: &CacheEntry<String>, now_ms: u64) -> Self {
        Self {
            key: entry.key().to_string(),
            value: entry.item().as_str().to_string(),
            size: entry.size(),
            pinned: entry.is_pinned(),
            created_at: entry.created_at().to_rfc3339(),
            ttl_remaining_ms: entry.ttl_remaining_ms(now_ms),
        }
    }
}

/// Response body for `SET` and `PIN`
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    pub key: String,
    /// Whether an existing entry was overwritten
    pub replaced: bool,
}

impl SetResponse {
    pub fn new(key: impl Into<String>, replaced: bool) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
            replaced,
        }
    }
}

/// Response body for `DEL`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeysResponse {
    pub count: usize,
    /// Keys in insertion order
    pub keys: Vec<String>,
}

impl KeysResponse {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            count: keys.len(),
            keys,
        }
    }
}

/// Response body for `STATS`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            stats,
        }
    }
}

/// Response body for `TIDY`
#[derive(Debug, Clone, Serialize)]
pub struct TidyResponse {
    pub removed: usize,
    pub report: TidyReport,
    /// When the cycle finished, RFC 3339
    pub timestamp: String,
}

impl TidyResponse {
    pub fn new(report: TidyReport) -> Self {
        Self {
            removed: report.total(),
            report,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for `CLEAR`
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

/// Response body for `HELP`
#[derive(Debug, Clone, Serialize)]
pub struct HelpResponse {
    pub commands: Vec<&'static str>,
}

impl HelpResponse {
    pub fn new() -> Self {
        Self {
            commands: vec![
                "SET key value [ttl_secs]",
                "GET key",
                "DEL key",
                "PIN key value",
                "KEYS",
                "STATS",
                "TIDY",
                "CLEAR",
                "HELP",
                "QUIT",
            ],
        }
    }
}

impl Default for HelpResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Error response for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
    /// Machine-readable code, see [`CacheError::code`]
    pub code: &'static str,
}

impl From<&CacheError> for ErrorResponse {
    fn from(err: &CacheError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code(),
        }
    }
}
