//! Sync engine
//!
//! Two cooperating paths move local changes to the remote authority:
//!
//! - `SyncOrchestrator` pushes dirty records, one single-flight cycle at a
//!   time, and publishes a `SyncState` stream
//! - `QueueReplayer` delivers queued non-record mutations in FIFO order,
//!   optionally driven by a background `ReplayAgent`
//!
//! ## Usage
//!
//! ```ignore
//! let orchestrator = SyncOrchestrator::new(store, remote, monitor, credentials, config);
//! let _sub = orchestrator.on_status_change(|state| println!("{}", state.status));
//! orchestrator.start();
//! ```

mod orchestrator;
mod replay;

pub use orchestrator::{OrchestratorConfig, SyncOrchestrator};
pub use replay::{
    QueueReplayer, ReplayAgent, ReplayCommand, ReplayHandle, ReplayReport, ReplayTrigger,
};
