//! On-disk cache of job results.
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::EphysError;
use crate::storage::content::{sha256_hex, write_atomic};

/// Job results stored as JSON files, keyed by the hash of the job name, version and arguments.
#[derive(Debug, Clone)]
pub struct JobCache {
    dir: PathBuf,
}

impl JobCache {
    /// Open the cache in the given directory, creating it if necessary.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, EphysError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(JobCache {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The cache key of a job invocation. `context` is the part of the job context the result
    /// depends on, if any.
    pub fn key(
        name: &str,
        version: &str,
        args: &Value,
        context: Option<&Value>,
    ) -> Result<String, EphysError> {
        let bytes = serde_json::to_vec(&(name, version, args, context))?;
        Ok(sha256_hex(&bytes))
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(&key[..2.min(key.len())]).join(format!("{}.json", key))
    }

    /// The cached result for the key, if any. Unreadable entries are treated as missing.
    pub fn get(&self, key: &str) -> Result<Option<Value>, EphysError> {
        let path = self.path(key);
        if !path.is_file() {
            return Ok(None);
        }
        match serde_json::from_slice(&fs::read(&path)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::warn!("Ignoring corrupted cache entry {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn put(&self, key: &str, value: &Value) -> Result<(), EphysError> {
        write_atomic(&self.path(key), &serde_json::to_vec(value)?)
    }

    /// Remove all cached results.
    pub fn clear(&self) -> Result<(), EphysError> {
        fs::remove_dir_all(&self.dir)?;
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }
}
