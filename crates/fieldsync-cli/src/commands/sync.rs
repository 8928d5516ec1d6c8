//! Sync command handler

use anyhow::{bail, Result};

use fieldsync_core::{Config, Reachability, ReplayTrigger, SyncStatus};

use crate::engine::Engine;
use crate::output::Output;

/// Run one sync pass in the foreground
///
/// Probes the server, pushes dirty records, then replays the mutation queue.
pub async fn sync(config: &Config, output: &Output) -> Result<()> {
    let engine = Engine::build(config)?;

    output.message(&format!("Checking {}...", engine.probe.addr()));
    let online = engine.probe.check().await;
    engine.monitor.report(online);

    engine.orchestrator.sync_now().await;
    let state = engine.orchestrator.status();

    let report = if online && state.status != SyncStatus::AuthRequired {
        let trigger = ReplayTrigger::Foreground(engine.replayer.clone());
        Some(trigger.replay_now().await?)
    } else {
        None
    };

    output.print_state(&state);
    if let Some(ref report) = report {
        output.print_report(report);
    }

    match state.status {
        SyncStatus::Offline => bail!("Server unreachable at {}", engine.probe.addr()),
        SyncStatus::AuthRequired => {
            bail!("Not signed in. Run `fieldsync login <token>` and try again.")
        }
        SyncStatus::Error => bail!(
            "Sync failed: {}",
            state.last_error.as_deref().unwrap_or("unknown error")
        ),
        _ => {
            output.success("Sync complete");
            Ok(())
        }
    }
}
