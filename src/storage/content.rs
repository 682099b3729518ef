//! A local content-addressed file store.
//!
//! Files are addressed by the SHA-256 digest of their content, through URIs of the form
//! `sha256://<hex>/<name>`. The name is informative only: two files with the same content
//! share the same storage.
//!
//! ```
//! use rusty_ephys::storage::content::ContentStore;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = ContentStore::new(dir.path()).unwrap();
//!
//! let uri = store.store_bytes(b"spikes", "spikes.txt").unwrap();
//! assert!(uri.starts_with("sha256://"));
//! assert!(uri.ends_with("/spikes.txt"));
//! assert_eq!(store.load_bytes(&uri).unwrap(), b"spikes");
//! ```
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::EphysError;

/// The scheme of content URIs.
pub const URI_SCHEME: &str = "sha256://";

/// Counter making scratch file names unique within the process.
static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns the lowercase hexadecimal SHA-256 digest of the bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Split a content URI into its digest and (optional) name.
pub fn parse_uri(uri: &str) -> Result<(&str, Option<&str>), EphysError> {
    let rest = uri
        .strip_prefix(URI_SCHEME)
        .ok_or_else(|| EphysError::InvalidUri(format!("{} (expected {}...)", uri, URI_SCHEME)))?;
    let (hash, name) = match rest.split_once('/') {
        Some((hash, name)) if !name.is_empty() => (hash, Some(name)),
        Some((hash, _)) => (hash, None),
        None => (rest, None),
    };
    if hash.len() != 64 || !hash.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
        return Err(EphysError::InvalidUri(format!(
            "{} (invalid SHA-256 digest)",
            uri
        )));
    }
    Ok((hash, name))
}

/// Write the bytes to a uniquely named temporary file next to `path`, then move it to `path`.
/// Partially written files are never visible. If another writer wins the race for `path`, its
/// file is kept.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EphysError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    match tmp.persist(path) {
        Ok(_) => Ok(()),
        Err(_) if path.is_file() => Ok(()),
        Err(e) => Err(e.error.into()),
    }
}

/// A content-addressed store rooted in a local directory.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open the store rooted at the given directory, creating it if necessary.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, EphysError> {
        fs::create_dir_all(root.as_ref())?;
        Ok(ContentStore {
            root: root.as_ref().to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        self.root
            .join("sha256")
            .join(&hash[0..2])
            .join(&hash[2..4])
            .join(hash)
    }

    /// Store the bytes and return their URI. Storing the same content twice is a no-op.
    pub fn store_bytes(&self, bytes: &[u8], name: &str) -> Result<String, EphysError> {
        let hash = sha256_hex(bytes);
        let path = self.object_path(&hash);
        if !path.exists() {
            write_atomic(&path, bytes)?;
            log::debug!("Stored {} bytes as {}", bytes.len(), hash);
        }
        if name.is_empty() {
            Ok(format!("{}{}", URI_SCHEME, hash))
        } else {
            Ok(format!("{}{}/{}", URI_SCHEME, hash, name))
        }
    }

    /// Store a copy of the file and return its URI, named after the file.
    pub fn store_file<P: AsRef<Path>>(&self, path: P) -> Result<String, EphysError> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.store_bytes(&bytes, &name)
    }

    /// Store a file produced by `write`, which receives a scratch path to write to.
    /// The scratch file is removed once stored, or if `write` fails.
    pub fn store_with<F>(&self, name: &str, write: F) -> Result<String, EphysError>
    where
        F: FnOnce(&Path) -> Result<(), EphysError>,
    {
        let scratch_dir = self.root.join("scratch").join(format!(
            "{}-{}",
            std::process::id(),
            SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&scratch_dir)?;
        let path = scratch_dir.join(name);
        let result = write(&path).and_then(|_| self.store_file(&path));
        fs::remove_dir_all(&scratch_dir)?;
        result
    }

    /// Store the JSON serialization of a value and return its URI.
    pub fn store_json<T: Serialize>(&self, value: &T, name: &str) -> Result<String, EphysError> {
        let bytes = serde_json::to_vec(value)?;
        self.store_bytes(&bytes, name)
    }

    /// Resolve a URI (or a plain local path) to a local file.
    pub fn load_file(&self, uri: &str) -> Result<PathBuf, EphysError> {
        let path = if uri.starts_with(URI_SCHEME) {
            let (hash, _) = parse_uri(uri)?;
            self.object_path(hash)
        } else {
            PathBuf::from(uri)
        };
        if path.is_file() {
            Ok(path)
        } else {
            Err(EphysError::ContentNotFound(uri.to_string()))
        }
    }

    pub fn load_bytes(&self, uri: &str) -> Result<Vec<u8>, EphysError> {
        Ok(fs::read(self.load_file(uri)?)?)
    }

    pub fn load_json<T: DeserializeOwned>(&self, uri: &str) -> Result<T, EphysError> {
        let bytes = self.load_bytes(uri)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
