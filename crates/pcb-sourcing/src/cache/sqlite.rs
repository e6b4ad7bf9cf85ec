use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use super::{CacheRecord, VendorCache, stored_for};
use crate::error::CacheError;

/// Bump this when changing the table schema to auto-reset the cache.
const SCHEMA_VERSION: i32 = 1;

/// All records in a single SQLite database, one row per choice part.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        // Concurrent pcb-order runs share the file
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let current_version: i32 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;
        if current_version != SCHEMA_VERSION {
            log::debug!(
                "Resetting offer cache (schema {} -> {})",
                current_version,
                SCHEMA_VERSION
            );
            conn.execute_batch("DROP TABLE IF EXISTS offer_records;")?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS offer_records (
                choice_part_name TEXT PRIMARY KEY,
                record TEXT NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl VendorCache for SqliteCache {
    fn get(&self, name: &str) -> Result<Option<CacheRecord>, CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM offer_records WHERE choice_part_name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match record {
            Some(json) => Ok(stored_for(CacheRecord::from_json(json.as_bytes())?, name)),
            None => Ok(None),
        }
    }

    fn put(&self, name: &str, record: &CacheRecord) -> Result<(), CacheError> {
        let json = record.to_json()?;
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO offer_records (choice_part_name, record) VALUES (?1, ?2)",
            params![name, json],
        )?;
        Ok(())
    }
}
