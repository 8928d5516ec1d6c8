//! Remote sync authority
//!
//! The engine talks to the remote side through two traits:
//!
//! - `RemoteSync`: push one record (payload plus `lastModified`)
//! - `QueueTransport`: deliver one replayable queue entry
//!
//! Both report failures as a `RemoteError`, a closed set the orchestrator
//! and replayer match on exhaustively.

mod credentials;
mod http;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::models::QueueEntry;

pub use credentials::{CredentialProvider, FileCredentials, StaticCredentials};
pub use http::{classify_response, HttpSyncClient};

/// Failure classes of a remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// No credential, or the remote rejected it; the user must re-authenticate
    #[error("authentication required")]
    Auth,

    /// The remote asked us to back off for `retry_after`
    #[error("rate limited; retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Any other failure; safe to retry later
    #[error("{0}")]
    Failed(String),
}

/// Shortest rate-limit wait honoured; zero or past hints are raised to this
pub const MIN_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);

/// Result type for remote calls
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Pushes individual records to the remote authority
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Push one record
    ///
    /// Resolves a credential from `credentials` first and fails with
    /// `RemoteError::Auth` without a network call when none is available.
    async fn sync_record(
        &self,
        credentials: &dyn CredentialProvider,
        id: &str,
        payload: &Value,
        last_modified: DateTime<Utc>,
    ) -> RemoteResult<()>;
}

/// Delivers replayable queue entries
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn deliver(
        &self,
        credentials: &dyn CredentialProvider,
        entry: &QueueEntry,
    ) -> RemoteResult<()>;
}
