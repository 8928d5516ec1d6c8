//! Logging setup
//!
//! Logs go to stderr, or to `log_file` when configured. `RUST_LOG` wins over
//! the default filter when set.

use std::fs::{self, OpenOptions};

use tracing::info;
use tracing_subscriber::EnvFilter;

use fieldsync_core::Config;

/// Default filter directive for the given verbosity
pub fn default_directive(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "warn" };
    format!("fieldsync_core={},fieldsync_cli={}", level, level)
}

/// Initialize tracing for the CLI
pub fn init(config: &Config, verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let Some(ref log_path) = config.log_file else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = fs::create_dir_all(parent);
        }
    }

    let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    // Initialize file-based logging (ignore error if already initialized)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging to {:?}", log_path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(
            default_directive(false),
            "fieldsync_core=warn,fieldsync_cli=warn"
        );
        assert_eq!(
            default_directive(true),
            "fieldsync_core=debug,fieldsync_cli=debug"
        );
    }
}
