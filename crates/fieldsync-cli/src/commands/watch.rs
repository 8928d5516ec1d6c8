//! Watch command handler

use anyhow::{Context, Result};
use tracing::info;

use fieldsync_core::{spawn_probe, Config, ReplayAgent};

use crate::engine::Engine;
use crate::output::Output;

/// Run the engine in the background until Ctrl-C, printing each state change
pub async fn watch(config: &Config, output: &Output) -> Result<()> {
    let engine = Engine::build(config)?;
    let orchestrator_config = config.orchestrator_config();

    output.message(&format!(
        "Watching {} (Ctrl-C to stop)",
        engine.probe.addr()
    ));

    let printer = *output;
    let subscription = engine
        .orchestrator
        .on_status_change(move |state| printer.print_state_line(state));

    let probe_task = spawn_probe(
        engine.monitor.clone(),
        engine.probe.clone(),
        config.probe_interval(),
    );
    engine.orchestrator.start();
    let agent = ReplayAgent::spawn(
        engine.replayer.clone(),
        Some(engine.orchestrator.clone()),
        Some(orchestrator_config.sync_interval),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupted, shutting down");

    subscription.unsubscribe();
    engine.orchestrator.stop();
    agent.shutdown().await;
    probe_task.abort();

    output.success("Stopped");
    Ok(())
}
