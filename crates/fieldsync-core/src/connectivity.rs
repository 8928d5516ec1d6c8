//! Connectivity monitoring
//!
//! `ConnectivityMonitor` is a pure observer: readings are reported into it
//! and subscribers hear about genuine transitions only. Readings come from a
//! `Reachability` probe, polled by `spawn_probe`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::notify::{Subscribers, Subscription};

/// Source of reachability readings
#[async_trait]
pub trait Reachability: Send + Sync {
    /// Returns true if the remote authority currently looks reachable
    async fn check(&self) -> bool;
}

/// Observable online/offline flag
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    online: AtomicBool,
    // Serializes report() so transitions are delivered in order
    report_lock: Mutex<()>,
    subscribers: Subscribers<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                online: AtomicBool::new(initially_online),
                report_lock: Mutex::new(()),
                subscribers: Subscribers::new(),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Subscribe to transitions
    ///
    /// The callback is invoked immediately with the current value, then once
    /// per transition.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let current = self.is_online();
        self.inner
            .subscribers
            .subscribe(&current, move |online: &bool| callback(*online))
    }

    /// Report a reading; subscribers are only notified if it changes state
    pub fn report(&self, online: bool) {
        let _guard = self.inner.report_lock.lock();
        let previous = self.inner.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }

        info!(online, "Connectivity changed");
        self.inner.subscribers.notify(&online);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .finish()
    }
}

/// Probes reachability by opening a TCP connection to the sync server
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

/// Connection timeout for a single probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

impl TcpProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: PROBE_TIMEOUT,
        }
    }

    /// Build a probe for the host and port of an http(s) URL
    pub fn for_url(url: &str) -> Option<Self> {
        let parsed = reqwest::Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        let port = parsed.port_or_known_default()?;
        Some(Self::new(format!("{}:{}", host, port)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Reachability for TcpProbe {
    async fn check(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe to {} failed: {}", self.addr, e);
                false
            }
            Err(_) => {
                debug!("Probe to {} timed out", self.addr);
                false
            }
        }
    }
}

/// Poll `probe` every `interval`, reporting each reading into `monitor`
///
/// The first reading is taken immediately. Abort the returned handle to stop.
pub fn spawn_probe<R>(monitor: ConnectivityMonitor, probe: R, interval: Duration) -> JoinHandle<()>
where
    R: Reachability + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let online = probe.check().await;
            monitor.report(online);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_receives_current_value() {
        let monitor = ConnectivityMonitor::new(false);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let _sub = monitor.subscribe(move |online| sink.lock().push(online));

        assert_eq!(*seen.lock(), vec![false]);
    }

    #[test]
    fn test_only_genuine_transitions_notify() {
        let monitor = ConnectivityMonitor::new(true);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let _sub = monitor.subscribe(move |online| sink.lock().push(online));

        monitor.report(true);
        monitor.report(false);
        monitor.report(false);
        monitor.report(true);

        assert_eq!(*seen.lock(), vec![true, false, true]);
        assert!(monitor.is_online());
    }

    #[test]
    fn test_unsubscribe() {
        let monitor = ConnectivityMonitor::new(true);
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let sub = monitor.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(monitor.subscriber_count(), 1);

        sub.unsubscribe();
        monitor.report(false);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.subscriber_count(), 0);
    }

    #[test]
    fn test_probe_for_url() {
        let probe = TcpProbe::for_url("https://sync.example.com/api").unwrap();
        assert_eq!(probe.addr(), "sync.example.com:443");

        let probe = TcpProbe::for_url("http://localhost:8080").unwrap();
        assert_eq!(probe.addr(), "localhost:8080");

        assert!(TcpProbe::for_url("not a url").is_none());
    }

    #[tokio::test]
    async fn test_tcp_probe_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = TcpProbe::new(addr.to_string());
        assert!(probe.check().await);

        drop(listener);
        let probe = TcpProbe::new(addr.to_string()).with_timeout(Duration::from_millis(500));
        assert!(!probe.check().await);
    }

    struct Scripted(Mutex<Vec<bool>>);

    #[async_trait]
    impl Reachability for Scripted {
        async fn check(&self) -> bool {
            let mut readings = self.0.lock();
            if readings.len() > 1 {
                readings.remove(0)
            } else {
                readings[0]
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_probe_reports_readings() {
        let monitor = ConnectivityMonitor::new(true);
        let probe = Scripted(Mutex::new(vec![false, false, true]));

        let handle = spawn_probe(monitor.clone(), probe, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!monitor.is_online());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(monitor.is_online());

        handle.abort();
    }
}
