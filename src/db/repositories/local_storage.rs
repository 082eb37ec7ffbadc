use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::db::Database;
use crate::sink::store::{push_capped, LocalStore};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

fn read_raw(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM local_storage WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("failed to read local_storage key '{key}'"))
}

fn write_raw(conn: &Connection, key: &str, raw: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_storage (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
        params![key, raw, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("failed to write local_storage key '{key}'"))?;
    Ok(())
}

fn parse_list(key: &str, raw: Option<String>) -> Vec<Value> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str(&raw) {
        Ok(list) => list,
        Err(err) => {
            log_warn!("discarding unreadable buffer '{key}': {err}");
            Vec::new()
        }
    }
}

fn append_capped(conn: &mut Connection, key: &str, entry: Value, cap: usize) -> Result<()> {
    let tx = conn.transaction()?;
    let mut list = parse_list(key, read_raw(&tx, key)?);
    push_capped(&mut list, entry, cap);
    write_raw(&tx, key, &serde_json::to_string(&list)?)?;
    tx.commit().context("failed to commit buffer append")?;
    Ok(())
}

impl Database {
    /// Queue an append to the list under `key`; the oldest entries past `cap` are dropped.
    pub fn append_event(&self, key: &str, entry: Value, cap: usize) -> Result<()> {
        let key = key.to_string();
        self.submit("append_event", move |conn| append_capped(conn, &key, entry, cap))
    }

    pub fn store_value(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        self.submit("store_value", move |conn| {
            write_raw(conn, &key, &serde_json::to_string(&value)?)
        })
    }

    pub async fn read_events(&self, key: &str) -> Result<Vec<Value>> {
        let key = key.to_string();
        self.execute(move |conn| Ok(parse_list(&key, read_raw(conn, &key)?)))
            .await
    }

    pub async fn read_value(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        self.execute(move |conn| {
            read_raw(conn, &key)?
                .map(|raw| serde_json::from_str(&raw).context("stored value is not JSON"))
                .transpose()
        })
        .await
    }
}

impl LocalStore for Database {
    fn append(&self, key: &str, entry: Value, cap: usize) -> Result<()> {
        self.append_event(key, entry, cap)
    }

    fn set_scalar(&self, key: &str, value: Value) -> Result<()> {
        self.store_value(key, value)
    }
}
