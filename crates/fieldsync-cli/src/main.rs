//! fieldsync CLI
//!
//! Command-line interface for fieldsync - offline-first record capture and sync.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use fieldsync_core::{Config, HttpMethod, SqliteStore};

mod commands;
mod engine;
mod logging;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "fieldsync - Offline-first record capture and sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage local records
    Record {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Manage queued mutations
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Show status (counts, server reachability, sign-in)
    Status,
    /// Push local changes to the server once
    Sync,
    /// Keep syncing in the background until interrupted
    Watch,
    /// Store an access token
    Login {
        /// Bearer token issued by the server
        token: String,
    },
    /// Remove the stored access token
    Logout,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum RecordCommands {
    /// Insert or replace a record
    Put {
        /// Record ID
        id: String,
        /// Payload as JSON
        json: String,
    },
    /// Create a record with a generated ID
    Add {
        /// Payload as JSON
        json: String,
    },
    /// List records
    #[command(alias = "ls")]
    List {
        /// Only records not yet synced
        #[arg(long)]
        dirty: bool,
    },
    /// Show a record
    Show {
        /// Record ID
        id: String,
    },
    /// Delete a record
    #[command(alias = "rm")]
    Delete {
        /// Record ID
        id: String,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Queue a mutation for replay
    Add {
        /// Target endpoint (absolute URL or path relative to server_url)
        #[arg(long)]
        endpoint: String,
        /// HTTP method (post or put)
        #[arg(long, default_value = "post")]
        method: HttpMethod,
        /// Category label
        #[arg(long, default_value = "default")]
        category: String,
        /// Extra header as name=value (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Request body
        body: String,
    },
    /// List queued mutations
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (server_url, sync_enabled, sync_interval_secs, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work even when the config itself is broken
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    logging::init(&config, cli.verbose);

    match cli.command {
        Commands::Record { command } => handle_record_command(command, &config, &output).await,
        Commands::Queue { command } => handle_queue_command(command, &config, &output).await,
        Commands::Status => commands::status::show(&config, &output).await,
        Commands::Sync => commands::sync::sync(&config, &output).await,
        Commands::Watch => commands::watch::watch(&config, &output).await,
        Commands::Login { token } => commands::auth::login(&config, token, &output),
        Commands::Logout => commands::auth::logout(&config, &output),
        Commands::Config { .. } => Ok(()), // Handled above
    }
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(config).context("Failed to open local store")
}

async fn handle_record_command(
    command: RecordCommands,
    config: &Config,
    output: &Output,
) -> Result<()> {
    let store = open_store(config)?;
    match command {
        RecordCommands::Put { id, json } => commands::record::put(&store, id, json, output).await,
        RecordCommands::Add { json } => commands::record::add(&store, json, output).await,
        RecordCommands::List { dirty } => commands::record::list(&store, dirty, output).await,
        RecordCommands::Show { id } => commands::record::show(&store, id, output).await,
        RecordCommands::Delete { id } => commands::record::delete(&store, id, output).await,
    }
}

async fn handle_queue_command(
    command: QueueCommands,
    config: &Config,
    output: &Output,
) -> Result<()> {
    let store = open_store(config)?;
    match command {
        QueueCommands::Add {
            endpoint,
            method,
            category,
            headers,
            body,
        } => commands::queue::add(&store, endpoint, method, category, headers, body, output).await,
        QueueCommands::List => commands::queue::list(&store, output).await,
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_queue_add() {
        let cli = Cli::try_parse_from([
            "fieldsync",
            "queue",
            "add",
            "--endpoint",
            "/reports",
            "--method",
            "put",
            "-H",
            "X-Trace=1",
            "{}",
        ])
        .unwrap();

        match cli.command {
            Commands::Queue {
                command:
                    QueueCommands::Add {
                        method, headers, ..
                    },
            } => {
                assert_eq!(method, HttpMethod::Put);
                assert_eq!(headers, vec!["X-Trace=1"]);
            }
            _ => panic!("expected queue add"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["fieldsync", "record", "list", "--dirty", "--json", "-v"])
            .unwrap();
        assert!(cli.json);
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Record {
                command: RecordCommands::List { dirty: true }
            }
        ));
    }
}
