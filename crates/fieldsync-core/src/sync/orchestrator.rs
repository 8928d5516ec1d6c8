//! Sync orchestrator
//!
//! Pushes dirty records to the remote authority and publishes a `SyncState`
//! stream describing progress.
//!
//! Every trigger (start, periodic tick, connectivity regained, scheduled
//! retry, `sync_now`) funnels into one single-flight cycle:
//!
//! 1. offline, self-throttled or signed out: publish and stop early
//! 2. snapshot the dirty set
//! 3. push each record in snapshot order, clearing it on acknowledgement
//! 4. publish the outcome and schedule a retry if records failed
//!
//! Bookkeeping locks are never held across an await.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::models::{StoredRecord, SyncState, SyncStatus};
use crate::notify::{Subscribers, Subscription};
use crate::remote::{CredentialProvider, RemoteError, RemoteSync, MIN_RATE_LIMIT_WAIT};
use crate::storage::RecordStore;

/// Timing knobs for a `SyncOrchestrator`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Period of the background tick
    pub sync_interval: Duration,
    /// Delay before the first backoff retry
    pub retry_base_delay: Duration,
    /// Consecutive failed cycles that get an explicit retry
    pub max_retry_attempts: u32,
    /// Upper bound on a single record push
    pub attempt_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(5),
            max_retry_attempts: 5,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    /// Backoff delay for the given 1-based retry attempt, or `None` once
    /// attempts are exhausted
    pub fn backoff_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retry_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.retry_base_delay.saturating_mul(factor))
    }
}

/// Coordinates pushing dirty records to the remote authority
///
/// Cheap to clone; clones share the same state. Independent instances share
/// nothing.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteSync>,
    connectivity: ConnectivityMonitor,
    credentials: Arc<dyn CredentialProvider>,
    config: OrchestratorConfig,

    is_syncing: AtomicBool,
    stopped: AtomicBool,
    // Last connectivity value acted on; filters the immediate callback
    last_online: AtomicBool,
    next_retry_id: AtomicU64,

    state: Mutex<SyncState>,
    subscribers: Subscribers<SyncState>,
    book: Mutex<Bookkeeping>,
}

#[derive(Default)]
struct Bookkeeping {
    retry_attempt: u32,
    rate_limit_until: Option<Instant>,
    retry: Option<ScheduledRetry>,
    ticker: Option<JoinHandle<()>>,
    connectivity: Option<Subscription>,
    runtime: Option<Handle>,
}

struct ScheduledRetry {
    id: u64,
    delay: Duration,
    task: JoinHandle<()>,
}

/// How a pass over the snapshot ended
enum CycleEnd {
    Completed { failed: usize, still_dirty: usize },
    AuthRequired,
    RateLimited(Duration),
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteSync>,
        connectivity: ConnectivityMonitor,
        credentials: Arc<dyn CredentialProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        let online = connectivity.is_online();
        let initial = if online {
            SyncStatus::Idle
        } else {
            SyncStatus::Offline
        };

        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                connectivity,
                credentials,
                config,
                is_syncing: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                last_online: AtomicBool::new(online),
                next_retry_id: AtomicU64::new(0),
                state: Mutex::new(SyncState::new(initial)),
                subscribers: Subscribers::new(),
                book: Mutex::new(Bookkeeping::default()),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Begin background operation
    ///
    /// Subscribes to connectivity, starts the periodic tick and runs a cycle
    /// right away if online. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!("Cannot start sync orchestrator outside a tokio runtime: {}", e);
                return;
            }
        };

        // Restarting replaces the previous timer and subscription
        self.detach();
        self.inner.stopped.store(false, Ordering::SeqCst);

        let online = self.inner.connectivity.is_online();
        self.inner.last_online.store(online, Ordering::SeqCst);

        let weak = Arc::downgrade(&self.inner);
        let subscription = self.inner.connectivity.subscribe(move |online| {
            if let Some(inner) = weak.upgrade() {
                inner.on_connectivity(online);
            }
        });

        let ticker = runtime.spawn(tick_loop(
            Arc::downgrade(&self.inner),
            self.inner.config.sync_interval,
        ));

        {
            let mut book = self.inner.book.lock();
            book.connectivity = Some(subscription);
            book.ticker = Some(ticker);
            book.runtime = Some(runtime.clone());
        }

        info!(
            interval_secs = self.inner.config.sync_interval.as_secs(),
            "Sync orchestrator started"
        );

        if online {
            runtime.spawn(self.inner.clone().cycle_boxed());
        }
    }

    /// Stop background operation and detach every status subscriber
    ///
    /// A push already in flight is not aborted; its outcome updates internal
    /// bookkeeping but reaches no observer.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.detach();
        self.inner.subscribers.clear();
        info!("Sync orchestrator stopped");
    }

    fn detach(&self) {
        let (ticker, retry, subscription) = {
            let mut book = self.inner.book.lock();
            (book.ticker.take(), book.retry.take(), book.connectivity.take())
        };
        if let Some(ticker) = ticker {
            ticker.abort();
        }
        if let Some(retry) = retry {
            retry.task.abort();
        }
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }

    /// Run a cycle now, returning once it finishes
    ///
    /// No-op if a cycle is already running.
    pub async fn sync_now(&self) {
        self.inner.run_cycle().await;
    }

    /// Subscribe to state changes; the callback receives the current state
    /// immediately
    pub fn on_status_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let current = self.status();
        self.inner.subscribers.subscribe(&current, callback)
    }

    pub fn status(&self) -> SyncState {
        self.inner.state.lock().clone()
    }

    /// Delay of the currently scheduled retry, if any
    pub fn pending_retry(&self) -> Option<Duration> {
        self.inner.book.lock().retry.as_ref().map(|r| r.delay)
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.is_syncing.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("state", &self.status())
            .field("config", &self.inner.config)
            .finish()
    }
}

async fn tick_loop(inner: Weak<Inner>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; start() already covers it
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        debug!("Periodic sync tick");
        // Detached so aborting the ticker leaves an in-flight push running
        tokio::spawn(inner.cycle_boxed());
    }
}

/// Clears the single-flight flag when a cycle ends or is cancelled
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    fn cycle_boxed(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move { self.run_cycle().await })
    }

    fn on_connectivity(self: &Arc<Self>, online: bool) {
        if self.last_online.swap(online, Ordering::SeqCst) == online {
            return;
        }

        if online {
            self.publish(|s| s.status = SyncStatus::Idle);
            let runtime = self.book.lock().runtime.clone();
            if let Some(runtime) = runtime {
                runtime.spawn(self.clone().cycle_boxed());
            }
        } else {
            self.publish(|s| s.status = SyncStatus::Offline);
        }
    }

    async fn run_cycle(self: &Arc<Self>) {
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync already in progress, skipping");
            return;
        }
        let _guard = SyncingGuard(&self.is_syncing);

        self.cycle().await;
    }

    async fn cycle(self: &Arc<Self>) {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping sync");
            self.publish(|s| s.status = SyncStatus::Offline);
            return;
        }

        if let Some(remaining) = self.rate_limit_remaining() {
            let secs = ceil_secs(remaining);
            debug!(remaining_secs = secs, "Still rate limited, skipping sync");
            self.publish(|s| {
                s.status = SyncStatus::Error;
                s.last_error = Some(format!("Rate limited; {}s remaining", secs));
            });
            return;
        }

        if self.credentials.get_token().await.is_none() {
            info!("No credentials available; sign-in required");
            self.publish_auth_required();
            return;
        }

        self.publish(|s| s.status = SyncStatus::Syncing);

        let snapshot = match self.store.get_dirty_records().await {
            Ok(records) => records,
            Err(e) => {
                if e.is_transient() {
                    warn!("Local storage unavailable, retrying next tick: {}", e);
                } else {
                    error!("Failed to read dirty records: {}", e);
                }
                self.publish(|s| {
                    s.status = SyncStatus::Error;
                    s.last_error = Some(e.to_string());
                });
                return;
            }
        };

        let total = snapshot.len();
        self.publish(|s| s.pending_count = total);

        if snapshot.is_empty() {
            debug!("Nothing to sync");
            self.reset_retries();
            self.publish_synced();
            return;
        }

        info!(count = total, "Syncing dirty records");

        match self.push_snapshot(snapshot).await {
            CycleEnd::AuthRequired => {
                warn!("Remote rejected credentials; sign-in required");
                self.publish_auth_required();
            }
            CycleEnd::RateLimited(wait) => {
                let wait = wait.max(MIN_RATE_LIMIT_WAIT);
                let secs = ceil_secs(wait);
                warn!(retry_after_secs = secs, "Rate limited by remote");
                self.book.lock().rate_limit_until = Some(Instant::now() + wait);
                self.publish(|s| {
                    s.status = SyncStatus::Error;
                    s.last_error = Some(format!("Rate limited; retrying in {}s", secs));
                });
                self.schedule_retry(wait);
            }
            CycleEnd::Completed {
                failed: 0,
                still_dirty: 0,
            } => {
                info!(count = total, "Sync complete");
                self.reset_retries();
                self.publish_synced();
            }
            CycleEnd::Completed {
                failed: 0,
                still_dirty,
            } => {
                info!(
                    count = still_dirty,
                    "Records changed during sync; leaving them for the next cycle"
                );
                self.reset_retries();
                self.publish(|s| {
                    s.status = SyncStatus::Idle;
                    s.last_error = None;
                });
            }
            CycleEnd::Completed { failed, .. } => {
                warn!(failed, "Sync finished with failures");
                self.publish(|s| {
                    s.status = SyncStatus::Error;
                    s.last_error = Some(format!("{} record(s) failed to sync", failed));
                });
                self.schedule_backoff();
            }
        }
    }

    async fn push_snapshot(self: &Arc<Self>, snapshot: Vec<StoredRecord>) -> CycleEnd {
        let mut failed = 0;
        let mut still_dirty = 0;

        for record in snapshot {
            debug!(id = %record.id, "Pushing record");

            let attempt = tokio::time::timeout(
                self.config.attempt_timeout,
                self.remote.sync_record(
                    self.credentials.as_ref(),
                    &record.id,
                    &record.payload,
                    record.last_modified,
                ),
            )
            .await
            .unwrap_or_else(|_| {
                Err(RemoteError::Failed(format!(
                    "Timed out after {}s",
                    self.config.attempt_timeout.as_secs()
                )))
            });

            match attempt {
                Ok(()) => match self.store.mark_synced(&record.id, record.last_modified).await {
                    Ok(true) => {
                        debug!(id = %record.id, "Record acknowledged");
                        self.publish(|s| s.pending_count = s.pending_count.saturating_sub(1));
                    }
                    Ok(false) => {
                        debug!(id = %record.id, "Record changed while in flight; keeping it dirty");
                        still_dirty += 1;
                    }
                    Err(e) => {
                        warn!(id = %record.id, "Failed to mark record synced: {}", e);
                        failed += 1;
                    }
                },
                Err(RemoteError::Auth) => return CycleEnd::AuthRequired,
                Err(RemoteError::RateLimited { retry_after }) => {
                    return CycleEnd::RateLimited(retry_after)
                }
                Err(RemoteError::Failed(message)) => {
                    warn!(id = %record.id, "Failed to sync record: {}", message);
                    failed += 1;
                }
            }
        }

        CycleEnd::Completed {
            failed,
            still_dirty,
        }
    }

    fn rate_limit_remaining(&self) -> Option<Duration> {
        let mut book = self.book.lock();
        let until = book.rate_limit_until?;
        let remaining = until.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            book.rate_limit_until = None;
            None
        } else {
            Some(remaining)
        }
    }

    /// Forget backoff progress and drop any scheduled retry
    fn reset_retries(&self) {
        let retry = {
            let mut book = self.book.lock();
            book.retry_attempt = 0;
            book.retry.take()
        };
        if let Some(retry) = retry {
            retry.task.abort();
        }
    }

    fn schedule_backoff(self: &Arc<Self>) {
        let attempt = {
            let mut book = self.book.lock();
            book.retry_attempt = book.retry_attempt.saturating_add(1);
            book.retry_attempt
        };

        match self.config.backoff_delay(attempt) {
            Some(delay) => {
                info!(attempt, delay_secs = delay.as_secs(), "Scheduling sync retry");
                self.schedule_retry(delay);
            }
            None => {
                info!(attempt, "Retry attempts exhausted; waiting for the periodic tick");
                let retry = self.book.lock().retry.take();
                if let Some(retry) = retry {
                    retry.task.abort();
                }
            }
        }
    }

    /// Run a cycle after `delay`, replacing any retry already scheduled
    fn schedule_retry(self: &Arc<Self>, delay: Duration) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let id = self.next_retry_id.fetch_add(1, Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        let runtime = self
            .book
            .lock()
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok());
        let Some(runtime) = runtime else {
            warn!("No runtime available to schedule a sync retry");
            return;
        };

        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut book = inner.book.lock();
                if book.retry.as_ref().map(|r| r.id) == Some(id) {
                    book.retry = None;
                }
            }
            tokio::spawn(inner.cycle_boxed());
        });

        let previous = self.book.lock().retry.replace(ScheduledRetry { id, delay, task });
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    fn publish_synced(&self) {
        self.publish(|s| {
            s.status = SyncStatus::Synced;
            s.pending_count = 0;
            s.last_synced_at = Some(Utc::now());
            s.last_error = None;
        });
    }

    fn publish_auth_required(&self) {
        self.publish(|s| {
            s.status = SyncStatus::AuthRequired;
            s.last_error = Some("Authentication required".to_string());
        });
    }

    /// Apply `update` and notify subscribers if the state changed
    fn publish(&self, update: impl FnOnce(&mut SyncState)) {
        let snapshot = {
            let mut state = self.state.lock();
            let before = state.clone();
            update(&mut state);
            if *state == before {
                return;
            }
            state.clone()
        };

        debug!(
            status = %snapshot.status,
            pending = snapshot.pending_count,
            "Sync state changed"
        );
        self.subscribers.notify(&snapshot);
    }
}

pub(super) fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
