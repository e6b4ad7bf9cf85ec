use std::io::{self, Write};
use std::path::{Path, PathBuf};

use atomicwrites::{AtomicFile, OverwriteBehavior};

use super::{CacheRecord, VendorCache, stored_for};
use crate::error::CacheError;

/// One JSON file per choice part in a directory.
///
/// Part names such as `10K;1608` or `HDR/2x20` are URL-encoded into the file
/// name. Writes go through a temporary file and a rename, so readers never
/// see a half-written record.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(name)))
    }
}

impl VendorCache for FileCache {
    fn get(&self, name: &str) -> Result<Option<CacheRecord>, CacheError> {
        let bytes = match std::fs::read(self.path_for(name)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(stored_for(CacheRecord::from_json(&bytes)?, name))
    }

    fn put(&self, name: &str, record: &CacheRecord) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir)?;
        let contents = record.to_json()?;
        AtomicFile::new(self.path_for(name), OverwriteBehavior::AllowOverwrite)
            .write(|f| {
                f.write_all(contents.as_bytes())?;
                f.flush()
            })
            .map_err(|err| match err {
                atomicwrites::Error::Internal(err) | atomicwrites::Error::User(err) => err,
            })?;
        log::debug!("Cached offers for '{}'", name);
        Ok(())
    }
}
