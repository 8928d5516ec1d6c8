//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use fieldsync_core::{QueueEntry, ReplayReport, StoredRecord, SyncState};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single record
    pub fn print_record(&self, record: &StoredRecord) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:            {}", record.id);
                println!("Dirty:         {}", if record.dirty { "yes" } else { "no" });
                println!(
                    "Last modified: {}",
                    record.last_modified.format("%Y-%m-%d %H:%M:%S%.3f")
                );
                println!("Updated:       {}", record.updated_at.format("%Y-%m-%d %H:%M"));
                println!();
                match serde_json::to_string_pretty(&record.payload) {
                    Ok(payload) => println!("{}", payload),
                    Err(_) => println!("{}", record.payload),
                }
            }
            OutputFormat::Json => print_json(record),
            OutputFormat::Quiet => println!("{}", record.id),
        }
    }

    /// Print a list of records
    pub fn print_records(&self, records: &[StoredRecord]) {
        match self.format {
            OutputFormat::Human => {
                if records.is_empty() {
                    println!("No records found.");
                    return;
                }
                for record in records {
                    println!(
                        "{} {} | {} | {}",
                        if record.dirty { "*" } else { " " },
                        truncate(&record.id, 36),
                        record.last_modified.format("%Y-%m-%d %H:%M"),
                        truncate(&record.payload.to_string(), 40)
                    );
                }
                let dirty = records.iter().filter(|r| r.dirty).count();
                println!("\n{} record(s), {} unsynced", records.len(), dirty);
            }
            OutputFormat::Json => print_json(records),
            OutputFormat::Quiet => {
                for record in records {
                    println!("{}", record.id);
                }
            }
        }
    }

    /// Print the mutation queue
    pub fn print_queue(&self, entries: &[QueueEntry]) {
        match self.format {
            OutputFormat::Human => {
                if entries.is_empty() {
                    println!("Queue is empty.");
                    return;
                }
                for entry in entries {
                    let retries = if entry.retry_count > 0 {
                        format!(" (retries: {})", entry.retry_count)
                    } else {
                        String::new()
                    };
                    println!(
                        "{} | {} {} | {}{}",
                        &entry.id.to_string()[..8],
                        entry.method,
                        truncate(&entry.target_endpoint, 40),
                        entry.category,
                        retries
                    );
                }
                println!("\n{} queued mutation(s)", entries.len());
            }
            OutputFormat::Json => print_json(entries),
            OutputFormat::Quiet => {
                for entry in entries {
                    println!("{}", entry.id);
                }
            }
        }
    }

    /// Print a sync state snapshot
    pub fn print_state(&self, state: &SyncState) {
        match self.format {
            OutputFormat::Human => {
                println!("Status:      {}", state.status);
                println!("Pending:     {}", state.pending_count);
                println!(
                    "Last synced: {}",
                    state
                        .last_synced_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "never".to_string())
                );
                if let Some(ref error) = state.last_error {
                    println!("Last error:  {}", error);
                }
            }
            OutputFormat::Json => print_json(state),
            OutputFormat::Quiet => println!("{}", state.status),
        }
    }

    /// Print one line per state change (used by `watch`)
    pub fn print_state_line(&self, state: &SyncState) {
        match self.format {
            OutputFormat::Human => {
                let detail = match state.last_error {
                    Some(ref error) => format!(" - {}", error),
                    None => String::new(),
                };
                println!(
                    "[{}] {} ({} pending){}",
                    chrono::Local::now().format("%H:%M:%S"),
                    state.status,
                    state.pending_count,
                    detail
                );
            }
            OutputFormat::Json => match serde_json::to_string(state) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("Failed to serialize state: {}", e),
            },
            OutputFormat::Quiet => println!("{}", state.status),
        }
    }

    /// Print the outcome of a queue replay
    pub fn print_report(&self, report: &ReplayReport) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "Queue: {} delivered, {} failed, {} abandoned, {} remaining",
                    report.delivered, report.failed, report.abandoned, report.remaining
                );
                if report.not_removed > 0 {
                    println!(
                        "{} delivered mutation(s) could not be removed and may be sent again",
                        report.not_removed
                    );
                }
                if let Some(ref reason) = report.halted {
                    println!("Replay stopped early: {}", reason);
                }
            }
            OutputFormat::Json => print_json(report),
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
