//! Wiring of the sync engine for commands that talk to the server

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use fieldsync_core::{
    Config, ConnectivityMonitor, FileCredentials, HttpSyncClient, QueueReplayer, SqliteStore,
    SyncOrchestrator, TcpProbe,
};

/// Everything `sync` and `watch` need, built from one `Config`
pub struct Engine {
    pub store: Arc<SqliteStore>,
    pub monitor: ConnectivityMonitor,
    pub probe: TcpProbe,
    pub orchestrator: SyncOrchestrator,
    pub replayer: Arc<QueueReplayer>,
}

impl Engine {
    pub fn build(config: &Config) -> Result<Self> {
        let server_url = require_sync_configured(config)?;

        let store = Arc::new(SqliteStore::open(config).context("Failed to open local store")?);
        let client = Arc::new(HttpSyncClient::from_config(config)?);
        let credentials = Arc::new(FileCredentials::new(config.token_path()));
        let probe = TcpProbe::for_url(server_url)
            .with_context(|| format!("Cannot determine host and port of {}", server_url))?;

        // Offline until the first probe says otherwise
        let monitor = ConnectivityMonitor::new(false);

        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            client.clone(),
            monitor.clone(),
            credentials.clone(),
            config.orchestrator_config(),
        );

        let replayer = Arc::new(QueueReplayer::new(
            store.clone(),
            client,
            credentials,
            config.max_queue_retries,
        ));

        Ok(Self {
            store,
            monitor,
            probe,
            orchestrator,
            replayer,
        })
    }
}

/// Return the server URL, or explain how to configure sync
pub fn require_sync_configured(config: &Config) -> Result<&str> {
    if !config.sync_enabled {
        bail!(
            "Sync is not enabled. Enable it with:\n  \
             fieldsync config set sync_enabled true\n  \
             fieldsync config set server_url https://your-server.example.com"
        );
    }

    let Some(ref server_url) = config.server_url else {
        bail!(
            "Server URL not configured. Set it with:\n  \
             fieldsync config set server_url https://your-server.example.com"
        );
    };

    Ok(server_url)
}
