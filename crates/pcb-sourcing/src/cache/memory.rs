use std::collections::HashMap;
use std::sync::Mutex;

use super::{CacheRecord, VendorCache};
use crate::error::CacheError;

/// Records that live for a single run.
#[derive(Debug, Default)]
pub struct MemoryCache {
    records: Mutex<HashMap<String, CacheRecord>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VendorCache for MemoryCache {
    fn get(&self, name: &str) -> Result<Option<CacheRecord>, CacheError> {
        let records = self.records.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(records.get(name).cloned())
    }

    fn put(&self, name: &str, record: &CacheRecord) -> Result<(), CacheError> {
        let mut records = self.records.lock().map_err(|_| CacheError::Poisoned)?;
        records.insert(name.to_string(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::exercise_engine;

    #[test]
    fn test_memory_cache_engine() {
        let cache = MemoryCache::new();
        exercise_engine(&cache);
        assert_eq!(cache.len(), 1);
    }
}
