//! Record command handlers

use anyhow::{bail, Context, Result};
use serde_json::Value;
use uuid::Uuid;

use fieldsync_core::{RecordStore, SqliteStore};

use crate::output::Output;

/// Insert or replace a record
pub async fn put(store: &SqliteStore, id: String, json: String, output: &Output) -> Result<()> {
    let payload = parse_payload(&json)?;

    let record = store
        .upsert(&id, &payload)
        .await
        .context("Failed to store record")?;

    output.success(&format!("Stored record: {}", record.id));
    output.print_record(&record);
    Ok(())
}

/// Create a record with a generated id
pub async fn add(store: &SqliteStore, json: String, output: &Output) -> Result<()> {
    put(store, Uuid::new_v4().to_string(), json, output).await
}

/// List records, optionally only those not yet synced
pub async fn list(store: &SqliteStore, dirty: bool, output: &Output) -> Result<()> {
    let records = if dirty {
        store.get_dirty_records().await?
    } else {
        store.list_records().await?
    };

    output.print_records(&records);
    Ok(())
}

/// Show a single record
pub async fn show(store: &SqliteStore, id: String, output: &Output) -> Result<()> {
    let record = store
        .get(&id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Record not found: {}", id))?;

    output.print_record(&record);
    Ok(())
}

/// Delete a record
pub async fn delete(store: &SqliteStore, id: String, output: &Output) -> Result<()> {
    if !store.delete(&id).await.context("Failed to delete record")? {
        bail!("Record not found: {}", id);
    }

    output.success(&format!("Deleted record: {}", id));
    Ok(())
}

fn parse_payload(json: &str) -> Result<Value> {
    serde_json::from_str(json).with_context(|| format!("Invalid JSON payload: {}", json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;

    fn quiet() -> Output {
        Output::new(OutputFormat::Quiet)
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(
            parse_payload(r#"{"a": 1}"#).unwrap(),
            serde_json::json!({"a": 1})
        );
        assert!(parse_payload("{not json").is_err());
    }

    #[tokio::test]
    async fn test_put_show_delete() {
        let store = SqliteStore::open_in_memory().unwrap();

        put(&store, "site-1".to_string(), r#"{"ph": 7}"#.to_string(), &quiet())
            .await
            .unwrap();
        let record = store.get("site-1").await.unwrap().unwrap();
        assert!(record.dirty);
        assert_eq!(record.payload["ph"], 7);

        show(&store, "site-1".to_string(), &quiet()).await.unwrap();
        delete(&store, "site-1".to_string(), &quiet()).await.unwrap();
        assert!(show(&store, "site-1".to_string(), &quiet()).await.is_err());
        assert!(delete(&store, "site-1".to_string(), &quiet()).await.is_err());
    }

    #[tokio::test]
    async fn test_add_generates_id() {
        let store = SqliteStore::open_in_memory().unwrap();

        add(&store, r#"{"x": true}"#.to_string(), &quiet())
            .await
            .unwrap();

        let records = store.list_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(Uuid::parse_str(&records[0].id).is_ok());
    }
}
