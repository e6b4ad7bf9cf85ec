//! Persistent snapshots of vendor offers, keyed by choice part name.
//!
//! A [`CacheRecord`] holds every manufacturer part of one choice part together
//! with the vendor offers last fetched for it. Freshness is decided by the
//! refresh stage from the `fetched_at` stamps; engines only store records.
//! Prices are stored converted, so a record also names the currency they are
//! in.

mod file;
mod memory;
mod sqlite;

pub use file::FileCache;
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::model::{ActualKey, ActualPart};

/// Bump when the record layout changes; older records read as corrupt.
pub const CACHE_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub version: u32,
    pub choice_part_name: String,
    pub currency: String,
    pub actual_parts: Vec<ActualPart>,
}

#[derive(Deserialize)]
struct RecordHeader {
    version: u32,
}

impl CacheRecord {
    pub fn new(
        choice_part_name: impl Into<String>,
        currency: impl Into<String>,
        actual_parts: Vec<ActualPart>,
    ) -> Self {
        Self {
            version: CACHE_VERSION,
            choice_part_name: choice_part_name.into(),
            currency: currency.into(),
            actual_parts,
        }
    }

    pub fn find(&self, key: &ActualKey) -> Option<&ActualPart> {
        self.actual_parts.iter().find(|ap| ap.key() == *key)
    }

    /// Decode a stored record, checking the version before the body so that a
    /// record in an older layout reports a version mismatch.
    pub fn from_json(bytes: &[u8]) -> Result<Self, CacheError> {
        let header: RecordHeader = serde_json::from_slice(bytes)?;
        if header.version != CACHE_VERSION {
            return Err(CacheError::VersionMismatch {
                found: header.version,
                expected: CACHE_VERSION,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `record` if it was stored for exactly `name`. Case-insensitive file
/// systems map `10K;1608` and `10k;1608` onto the same file.
fn stored_for(record: CacheRecord, name: &str) -> Option<CacheRecord> {
    if record.choice_part_name == name {
        Some(record)
    } else {
        log::debug!(
            "Ignoring cached record for '{}' found under '{}'",
            record.choice_part_name,
            name
        );
        None
    }
}

/// Storage for [`CacheRecord`]s.
///
/// Engines are shared by the refresh pool, so every method takes `&self`.
/// `put` replaces whatever was stored under `name`.
pub trait VendorCache: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<CacheRecord>, CacheError>;
    fn put(&self, name: &str, record: &CacheRecord) -> Result<(), CacheError>;
}
