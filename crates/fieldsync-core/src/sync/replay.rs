//! Queue replay
//!
//! `QueueReplayer` walks the persisted mutation queue in FIFO order and
//! delivers each entry. `ReplayAgent` runs it on a background task driven by
//! `ReplayCommand` messages, and `ReplayTrigger` lets callers use either the
//! agent or the replayer directly through one surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::orchestrator::{ceil_secs, SyncOrchestrator};
use crate::remote::{CredentialProvider, QueueTransport, RemoteError, MIN_RATE_LIMIT_WAIT};
use crate::storage::{QueueStore, StoreError, StoreResult};

/// Outcome of one pass over the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Entries confirmed by the remote and removed
    pub delivered: usize,
    /// Entries that failed and stay queued with a bumped retry count
    pub failed: usize,
    /// Entries dropped after reaching the retry limit
    pub abandoned: usize,
    /// Entries delivered but not removed; they will be delivered again
    pub not_removed: usize,
    /// Entries still queued after the pass
    pub remaining: usize,
    /// Why the pass stopped early, if it did
    pub halted: Option<String>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.abandoned == 0 && self.not_removed == 0 && self.halted.is_none()
    }
}

/// Delivers queued mutations in FIFO order
pub struct QueueReplayer {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn QueueTransport>,
    credentials: Arc<dyn CredentialProvider>,
    max_retries: u32,
    is_replaying: AtomicBool,
    rate_limit_until: Mutex<Option<Instant>>,
}

struct ReplayingGuard<'a>(&'a AtomicBool);

impl Drop for ReplayingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl QueueReplayer {
    /// Create a replayer that abandons an entry once its retry count reaches
    /// `max_retries`
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn QueueTransport>,
        credentials: Arc<dyn CredentialProvider>,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            transport,
            credentials,
            max_retries: max_retries.max(1),
            is_replaying: AtomicBool::new(false),
            rate_limit_until: Mutex::new(None),
        }
    }

    pub async fn pending_count(&self) -> StoreResult<usize> {
        self.store.count_queue().await
    }

    /// Deliver every queued entry in order
    ///
    /// An authentication or rate-limit failure stops the pass and leaves the
    /// rest of the queue untouched, and no delivery is attempted again until a
    /// rate-limit wait has passed. A storage failure after the pass has
    /// started also halts it. If a pass is already running, or the wait is
    /// still running, this returns immediately with `halted` set.
    pub async fn replay(&self) -> StoreResult<ReplayReport> {
        if self
            .is_replaying
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Queue replay already in progress, skipping");
            return Ok(ReplayReport {
                remaining: self.store.count_queue().await?,
                halted: Some("replay already in progress".to_string()),
                ..ReplayReport::default()
            });
        }
        let _guard = ReplayingGuard(&self.is_replaying);

        if let Some(remaining) = self.rate_limit_remaining() {
            let secs = ceil_secs(remaining);
            debug!(remaining_secs = secs, "Still rate limited, skipping queue replay");
            return Ok(ReplayReport {
                remaining: self.store.count_queue().await?,
                halted: Some(format!("rate limited; {}s remaining", secs)),
                ..ReplayReport::default()
            });
        }

        let entries = self.store.list_queue().await?;
        let mut report = ReplayReport::default();

        if !entries.is_empty() {
            info!(count = entries.len(), "Replaying queued mutations");
        }

        for entry in &entries {
            debug!(id = %entry.id, category = %entry.category, "Delivering queue entry");

            match self.transport.deliver(self.credentials.as_ref(), entry).await {
                Ok(()) => {
                    report.delivered += 1;
                    if let Err(e) = self.store.dequeue(entry.id).await {
                        error!(
                            id = %entry.id,
                            "Delivered queue entry could not be removed and will be sent again: {}",
                            e
                        );
                        report.not_removed += 1;
                        report.halted = Some(storage_halt(&e));
                        break;
                    }
                }
                Err(RemoteError::Auth) => {
                    warn!("Queue replay halted: authentication required");
                    report.halted = Some("authentication required".to_string());
                    break;
                }
                Err(RemoteError::RateLimited { retry_after }) => {
                    let wait = retry_after.max(MIN_RATE_LIMIT_WAIT);
                    let secs = ceil_secs(wait);
                    warn!(retry_after_secs = secs, "Queue replay halted: rate limited");
                    *self.rate_limit_until.lock() = Some(Instant::now() + wait);
                    report.halted = Some(format!("rate limited; retry after {}s", secs));
                    break;
                }
                Err(RemoteError::Failed(message)) => {
                    let retries = match self.store.record_queue_failure(entry.id).await {
                        Ok(retries) => retries,
                        Err(e) => {
                            error!(id = %entry.id, "Failed to record queue failure: {}", e);
                            report.failed += 1;
                            report.halted = Some(storage_halt(&e));
                            break;
                        }
                    };
                    if retries >= self.max_retries {
                        warn!(
                            id = %entry.id,
                            category = %entry.category,
                            retries,
                            "Abandoning queue entry: {}",
                            message
                        );
                        if let Err(e) = self.store.dequeue(entry.id).await {
                            error!(id = %entry.id, "Failed to drop abandoned queue entry: {}", e);
                            report.failed += 1;
                            report.halted = Some(storage_halt(&e));
                            break;
                        }
                        report.abandoned += 1;
                    } else {
                        warn!(id = %entry.id, retries, "Queue entry failed: {}", message);
                        report.failed += 1;
                    }
                }
            }
        }

        report.remaining = match self.store.count_queue().await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to count queue after replay: {}", e);
                entries.len() + report.not_removed - report.delivered - report.abandoned
            }
        };
        Ok(report)
    }

    fn rate_limit_remaining(&self) -> Option<Duration> {
        let mut until = self.rate_limit_until.lock();
        let remaining = until.as_ref()?.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            *until = None;
            None
        } else {
            Some(remaining)
        }
    }
}

fn storage_halt(e: &StoreError) -> String {
    format!("storage error: {}", e)
}

impl std::fmt::Debug for QueueReplayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueReplayer")
            .field("max_retries", &self.max_retries)
            .field("replaying", &self.is_replaying.load(Ordering::SeqCst))
            .finish()
    }
}

/// Commands sent to the replay agent
#[derive(Debug)]
pub enum ReplayCommand {
    /// Report the number of queued entries
    PendingCount(oneshot::Sender<StoreResult<usize>>),
    /// Replay the queue, then run a record sync if an orchestrator is attached
    ReplayNow(oneshot::Sender<StoreResult<ReplayReport>>),
    /// Stop the agent task
    Shutdown,
}

/// Background task that owns queue replay
pub struct ReplayAgent;

impl ReplayAgent {
    /// Spawn the agent on the current runtime
    ///
    /// With `interval` set the queue is also replayed periodically, starting
    /// immediately.
    pub fn spawn(
        replayer: Arc<QueueReplayer>,
        orchestrator: Option<SyncOrchestrator>,
        interval: Option<Duration>,
    ) -> ReplayHandle {
        let (command_tx, command_rx) = mpsc::channel(16);

        let task = tokio::spawn(agent_loop(
            replayer.clone(),
            orchestrator.clone(),
            interval,
            command_rx,
        ));

        ReplayHandle {
            command_tx,
            replayer,
            orchestrator,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

async fn agent_loop(
    replayer: Arc<QueueReplayer>,
    orchestrator: Option<SyncOrchestrator>,
    interval: Option<Duration>,
    mut command_rx: mpsc::Receiver<ReplayCommand>,
) {
    let mut ticker = interval.map(|period| {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    info!("Replay agent started");

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(ReplayCommand::PendingCount(reply)) => {
                        let _ = reply.send(replayer.pending_count().await);
                    }
                    Some(ReplayCommand::ReplayNow(reply)) => {
                        let result = replay_then_sync(&replayer, orchestrator.as_ref()).await;
                        let _ = reply.send(result);
                    }
                    Some(ReplayCommand::Shutdown) | None => break,
                }
            }
            _ = next_tick(&mut ticker) => {
                match replayer.replay().await {
                    Ok(report) if report.delivered + report.failed + report.abandoned > 0 => {
                        info!(
                            delivered = report.delivered,
                            failed = report.failed,
                            abandoned = report.abandoned,
                            remaining = report.remaining,
                            "Periodic queue replay finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Periodic queue replay failed: {}", e),
                }
            }
        }
    }

    info!("Replay agent stopped");
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn replay_then_sync(
    replayer: &QueueReplayer,
    orchestrator: Option<&SyncOrchestrator>,
) -> StoreResult<ReplayReport> {
    let report = replayer.replay().await?;
    if let Some(orchestrator) = orchestrator {
        orchestrator.sync_now().await;
    }
    Ok(report)
}

/// Handle to a running `ReplayAgent`
///
/// If the agent has gone away, requests run in the foreground instead.
#[derive(Clone)]
pub struct ReplayHandle {
    command_tx: mpsc::Sender<ReplayCommand>,
    replayer: Arc<QueueReplayer>,
    orchestrator: Option<SyncOrchestrator>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ReplayHandle {
    pub async fn pending_count(&self) -> StoreResult<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .command_tx
            .send(ReplayCommand::PendingCount(reply_tx))
            .await
            .is_ok()
        {
            if let Ok(result) = reply_rx.await {
                return result;
            }
        }

        debug!("Replay agent unavailable; counting queue in the foreground");
        self.replayer.pending_count().await
    }

    pub async fn replay_now(&self) -> StoreResult<ReplayReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .command_tx
            .send(ReplayCommand::ReplayNow(reply_tx))
            .await
            .is_ok()
        {
            if let Ok(result) = reply_rx.await {
                return result;
            }
        }

        warn!("Replay agent unavailable; replaying in the foreground");
        replay_then_sync(&self.replayer, self.orchestrator.as_ref()).await
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Stop the agent and wait for its task to finish
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(ReplayCommand::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Replay agent task failed: {}", e);
                }
            }
        }
    }
}

impl std::fmt::Debug for ReplayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Either a background agent or a replayer run in the caller's task
#[derive(Debug, Clone)]
pub enum ReplayTrigger {
    Background(ReplayHandle),
    Foreground(Arc<QueueReplayer>),
}

impl ReplayTrigger {
    pub async fn pending_count(&self) -> StoreResult<usize> {
        match self {
            ReplayTrigger::Background(handle) => handle.pending_count().await,
            ReplayTrigger::Foreground(replayer) => replayer.pending_count().await,
        }
    }

    pub async fn replay_now(&self) -> StoreResult<ReplayReport> {
        match self {
            ReplayTrigger::Background(handle) => handle.replay_now().await,
            ReplayTrigger::Foreground(replayer) => replayer.replay().await,
        }
    }
}
