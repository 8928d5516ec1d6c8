//! Status command handler

use anyhow::{Context, Result};

use fieldsync_core::{
    Config, CredentialProvider, FileCredentials, QueueStore, Reachability, RecordStore,
    SqliteStore, TcpProbe,
};

use crate::output::{Output, OutputFormat};

/// Show status information
pub async fn show(config: &Config, output: &Output) -> Result<()> {
    let store = SqliteStore::open(config).context("Failed to open local store")?;
    let dirty = store.count_dirty().await?;
    let total = store.list_records().await?.len();
    let queued = store.count_queue().await?;
    let signed_in = FileCredentials::new(config.token_path())
        .get_token()
        .await
        .is_some();

    let reachable = match config.server_url.as_deref().and_then(TcpProbe::for_url) {
        Some(probe) => Some(probe.check().await),
        None => None,
    };

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "sync_enabled": config.sync_enabled,
                    "server_url": config.server_url,
                    "signed_in": signed_in,
                    "reachable": reachable,
                    "data_dir": config.data_dir,
                    "counts": {
                        "records": total,
                        "dirty": dirty,
                        "queued": queued
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", dirty + queued);
        }
        OutputFormat::Human => {
            println!("fieldsync Status");
            println!("================");
            println!();
            println!("Sync:");
            println!(
                "  Status:    {}",
                if config.sync_enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            if let Some(ref url) = config.server_url {
                println!("  Server:    {}", url);
            }
            println!(
                "  Reachable: {}",
                match reachable {
                    Some(true) => "yes",
                    Some(false) => "no",
                    None => "(no server configured)",
                }
            );
            println!("  Signed in: {}", if signed_in { "yes" } else { "no" });
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            println!();
            println!("Contents:");
            println!("  Records:  {} ({} unsynced)", total, dirty);
            println!("  Queued:   {}", queued);
        }
    }

    Ok(())
}
