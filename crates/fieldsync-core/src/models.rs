//! Data models for fieldsync
//!
//! Defines the records the engine tracks, the replay queue entries, and
//! the published sync state snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A locally captured record and its sync bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRecord {
    /// Domain identifier
    pub id: String,
    /// Domain payload, opaque to the engine
    pub payload: Value,
    /// Whether the last local mutation is still unacknowledged
    pub dirty: bool,
    /// When the payload was last mutated locally
    pub last_modified: DateTime<Utc>,
    /// When the row was last written (including sync bookkeeping)
    pub updated_at: DateTime<Utc>,
}

/// HTTP method for a replayable queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            other => Err(format!("unsupported method '{}', expected POST or PUT", other)),
        }
    }
}

/// A mutation to be enqueued for replay
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueEntry {
    pub target_endpoint: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub category: String,
}

impl NewQueueEntry {
    /// Create a POST entry with no extra headers
    pub fn post(
        target_endpoint: impl Into<String>,
        category: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            target_endpoint: target_endpoint.into(),
            method: HttpMethod::Post,
            headers: BTreeMap::new(),
            body: body.into(),
            category: category.into(),
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A persisted, replayable non-record mutation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub id: Uuid,
    pub target_endpoint: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub category: String,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// Lifecycle status published by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Offline,
    Error,
    Synced,
    AuthRequired,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Offline => "offline",
            SyncStatus::Error => "error",
            SyncStatus::Synced => "synced",
            SyncStatus::AuthRequired => "auth-required",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of the orchestrator's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub pending_count: usize,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncState {
    pub fn new(status: SyncStatus) -> Self {
        Self {
            status,
            pending_count: 0,
            last_synced_at: None,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!("PUT".parse::<HttpMethod>().unwrap(), HttpMethod::Put);
        assert!("DELETE".parse::<HttpMethod>().is_err());
        assert_eq!(HttpMethod::Put.to_string(), "PUT");
    }

    #[test]
    fn test_new_queue_entry_builder() {
        let entry = NewQueueEntry::post("/reports", "report", "{}")
            .with_method(HttpMethod::Put)
            .with_header("X-Idempotency-Key", "abc");

        assert_eq!(entry.method, HttpMethod::Put);
        assert_eq!(entry.headers.get("X-Idempotency-Key").unwrap(), "abc");
        assert_eq!(entry.category, "report");
    }

    #[test]
    fn test_sync_status_serialization() {
        let json = serde_json::to_string(&SyncStatus::AuthRequired).unwrap();
        assert_eq!(json, "\"auth-required\"");
        assert_eq!(SyncStatus::AuthRequired.to_string(), "auth-required");

        let state = SyncState::new(SyncStatus::Offline);
        assert_eq!(state.pending_count, 0);
        assert!(state.last_synced_at.is_none());
    }
}
