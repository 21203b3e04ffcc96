//! Generic expiring key-value store backing the invitation tokens.
//!
//! SQLite has no native TTL, so every entry carries an explicit `expires_at`
//! unix timestamp which is authoritative: reads never return an expired
//! value, and expired rows are swept lazily on write.

use anyhow::{Context, Result};
use chrono::Utc;
use log::debug;
use rusqlite::params;

use crate::db::Db;

pub struct ExpiringStore {
    db: Db,
}

impl ExpiringStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Store a value that expires `ttl_seconds` from now, overwriting any
    /// existing entry for the key
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<()> {
        let now = Utc::now().timestamp();
        let expires_at = now + ttl_seconds;

        // Connection is acquired per logical operation and released with the guard
        let conn = self.db.lock().await;

        let swept = conn
            .execute("DELETE FROM kv_entries WHERE expires_at <= ?1", params![now])
            .context("Failed to sweep expired entries")?;
        if swept > 0 {
            debug!("Swept {} expired kv entries", swept);
        }

        conn.execute(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )
        .context("Failed to write kv entry")?;

        Ok(())
    }

    /// Read a value. Returns `None` for keys never set and for keys whose
    /// TTL has elapsed; the two are indistinguishable.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now().timestamp();
        let conn = self.db.lock().await;

        let mut stmt = conn
            .prepare("SELECT value FROM kv_entries WHERE key = ?1 AND expires_at > ?2")
            .context("Failed to prepare kv lookup")?;

        match stmt.query_row(params![key, now], |row| row.get::<_, String>(0)) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("Failed to read kv entry"),
        }
    }

    /// Delete an entry. Idempotent; deleting an absent key is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
            .context("Failed to delete kv entry")?;
        Ok(())
    }
}
