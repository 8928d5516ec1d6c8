//! Queue command handlers

use anyhow::{bail, Context, Result};

use fieldsync_core::{HttpMethod, NewQueueEntry, QueueStore, SqliteStore};

use crate::output::Output;

/// Queue a mutation for replay
pub async fn add(
    store: &SqliteStore,
    endpoint: String,
    method: HttpMethod,
    category: String,
    headers: Vec<String>,
    body: String,
    output: &Output,
) -> Result<()> {
    let mut entry = NewQueueEntry::post(endpoint, category, body).with_method(method);
    for header in &headers {
        let (name, value) = parse_header(header)?;
        entry = entry.with_header(name, value);
    }

    let id = store
        .enqueue(entry)
        .await
        .context("Failed to queue mutation")?;

    if output.is_quiet() {
        println!("{}", id);
    } else {
        output.success(&format!("Queued mutation: {}", id));
    }
    Ok(())
}

/// List queued mutations in replay order
pub async fn list(store: &SqliteStore, output: &Output) -> Result<()> {
    let entries = store.list_queue().await?;
    output.print_queue(&entries);
    Ok(())
}

/// Parse `name=value` or `name: value`
fn parse_header(raw: &str) -> Result<(String, String)> {
    let split = raw
        .split_once('=')
        .or_else(|| raw.split_once(':'))
        .map(|(name, value)| (name.trim(), value.trim()));

    match split {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => bail!("Invalid header '{}'. Use name=value", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-Category=report").unwrap(),
            ("X-Category".to_string(), "report".to_string())
        );
        assert_eq!(
            parse_header("Content-Type: text/plain").unwrap(),
            ("Content-Type".to_string(), "text/plain".to_string())
        );
        assert!(parse_header("no-separator").is_err());
        assert!(parse_header("=value").is_err());
    }

    #[tokio::test]
    async fn test_add_queues_entry() {
        let store = SqliteStore::open_in_memory().unwrap();
        let output = Output::new(OutputFormat::Json);

        add(
            &store,
            "/reports".to_string(),
            HttpMethod::Put,
            "report".to_string(),
            vec!["X-Trace=abc".to_string()],
            r#"{"pages": 2}"#.to_string(),
            &output,
        )
        .await
        .unwrap();

        let queue = store.list_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].method, HttpMethod::Put);
        assert_eq!(queue[0].headers.get("X-Trace").map(String::as_str), Some("abc"));
        assert_eq!(queue[0].category, "report");
    }
}
