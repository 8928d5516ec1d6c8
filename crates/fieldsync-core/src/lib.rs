//! fieldsync core library
//!
//! This crate provides the offline-first sync engine behind fieldsync: local
//! edits are written to a durable store first and pushed to a remote
//! authority whenever the device is online and signed in.
//!
//! # Architecture
//!
//! - **SQLite**: Source of truth on the device (records plus a mutation queue)
//! - **Orchestrator**: Pushes dirty records and publishes sync state
//! - **Replay agent**: Delivers queued non-record mutations in FIFO order
//!
//! Nothing from the engine propagates into the caller as an error: failures
//! surface through the published `SyncState`.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let store = Arc::new(SqliteStore::open(&config)?);
//! let monitor = ConnectivityMonitor::new(true);
//! let remote = Arc::new(HttpSyncClient::from_config(&config)?);
//! let credentials = Arc::new(FileCredentials::new(config.token_path()));
//!
//! let orchestrator = SyncOrchestrator::new(
//!     store, remote, monitor, credentials, config.orchestrator_config(),
//! );
//! orchestrator.start();
//! ```
//!
//! # Modules
//!
//! - `storage`: Durable record store and mutation queue
//! - `remote`: Remote client, error classes and credential providers
//! - `connectivity`: Online/offline monitor and reachability probe
//! - `sync`: Orchestrator and queue replay
//! - `models`: Records, queue entries and sync state
//! - `config`: Application configuration

pub mod config;
pub mod connectivity;
pub mod models;
pub mod notify;
pub mod remote;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use connectivity::{spawn_probe, ConnectivityMonitor, Reachability, TcpProbe};
pub use models::{
    HttpMethod, NewQueueEntry, QueueEntry, StoredRecord, SyncState, SyncStatus,
};
pub use notify::Subscription;
pub use remote::{
    CredentialProvider, FileCredentials, HttpSyncClient, QueueTransport, RemoteError,
    RemoteSync, StaticCredentials, MIN_RATE_LIMIT_WAIT,
};
pub use storage::{LocalStore, QueueStore, RecordStore, SqliteStore, StoreError, StoreResult};
pub use sync::{
    OrchestratorConfig, QueueReplayer, ReplayAgent, ReplayHandle, ReplayReport, ReplayTrigger,
    SyncOrchestrator,
};
