//! Local append-only feeds.
//!
//! A feed is a named collection of subfeeds, each of which is an append-only sequence of JSON
//! messages. On disk, a feed lives in `<root>/<sha256(name)>/`, with one JSON-lines file per
//! subfeed. Existing messages are never rewritten.
//!
//! ```
//! use rusty_ephys::feed::Feed;
//! use serde_json::json;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let feed = Feed::load(dir.path(), "labbox-ephys-default", true).unwrap();
//! assert!(feed.uri().starts_with("feed://"));
//!
//! feed.append_message("main", &json!({"hello": "world"})).unwrap();
//! assert_eq!(feed.num_messages("main").unwrap(), 1);
//! assert_eq!(feed.messages("main").unwrap(), vec![json!({"hello": "world"})]);
//! ```
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EphysError;
use crate::storage::content::sha256_hex;

/// The scheme of feed URIs.
pub const FEED_SCHEME: &str = "feed://";

const FEED_METADATA: &str = "feed.json";

#[derive(Debug, Serialize, Deserialize)]
struct FeedMetadata {
    name: String,
}

/// A named feed stored in a local directory.
#[derive(Debug, Clone)]
pub struct Feed {
    name: String,
    dir: PathBuf,
}

impl Feed {
    /// Open the feed with the given name under `root`.
    /// If the feed does not exist, it is created if `create` is set, otherwise an error is returned.
    pub fn load<P: AsRef<Path>>(root: P, name: &str, create: bool) -> Result<Self, EphysError> {
        if name.is_empty() {
            return Err(EphysError::InvalidParameter(
                "feed name must not be empty".to_string(),
            ));
        }
        let dir = root.as_ref().join(sha256_hex(name.as_bytes()));
        let metadata_path = dir.join(FEED_METADATA);
        if !metadata_path.is_file() {
            if !create {
                return Err(EphysError::FeedNotFound(name.to_string()));
            }
            fs::create_dir_all(&dir)?;
            let metadata = FeedMetadata {
                name: name.to_string(),
            };
            fs::write(&metadata_path, serde_json::to_vec(&metadata)?)?;
            log::info!("Created feed {:?} at {}", name, dir.display());
        }
        Ok(Feed {
            name: name.to_string(),
            dir,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The URI of the feed, derived from its name.
    pub fn uri(&self) -> String {
        format!("{}{}", FEED_SCHEME, sha256_hex(self.name.as_bytes()))
    }

    fn subfeed_path(&self, subfeed: &str) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", sha256_hex(subfeed.as_bytes())))
    }

    /// Append a message to a subfeed and return its position in the subfeed.
    pub fn append_message(&self, subfeed: &str, message: &Value) -> Result<usize, EphysError> {
        self.append_messages(subfeed, std::slice::from_ref(message))
            .map(|num_messages| num_messages - 1)
    }

    /// Append messages to a subfeed and return the new number of messages.
    pub fn append_messages(&self, subfeed: &str, messages: &[Value]) -> Result<usize, EphysError> {
        let path = self.subfeed_path(subfeed);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        for message in messages {
            serde_json::to_writer(&mut writer, message)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        log::debug!(
            "Appended {} messages to subfeed {:?} of feed {:?}",
            messages.len(),
            subfeed,
            self.name
        );
        self.num_messages(subfeed)
    }

    /// All messages of a subfeed, in order. A subfeed without messages is empty.
    pub fn messages(&self, subfeed: &str) -> Result<Vec<Value>, EphysError> {
        let path = self.subfeed_path(subfeed);
        if !path.exists() {
            return Ok(vec![]);
        }
        let reader = BufReader::new(File::open(path)?);
        let mut messages = vec![];
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            messages.push(serde_json::from_str(&line)?);
        }
        Ok(messages)
    }

    pub fn num_messages(&self, subfeed: &str) -> Result<usize, EphysError> {
        Ok(self.messages(subfeed)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_feed() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            Feed::load(dir.path(), "missing", false).unwrap_err(),
            EphysError::FeedNotFound("missing".to_string())
        );
        assert!(matches!(
            Feed::load(dir.path(), "", true),
            Err(EphysError::InvalidParameter(_))
        ));

        let feed = Feed::load(dir.path(), "my-feed", true).unwrap();
        assert_eq!(feed.name(), "my-feed");
        assert_eq!(feed.uri(), format!("feed://{}", sha256_hex(b"my-feed")));

        // the feed now exists
        let feed = Feed::load(dir.path(), "my-feed", false).unwrap();
        assert_eq!(feed.num_messages("anything").unwrap(), 0);
    }

    #[test]
    fn test_append_messages() {
        let dir = tempfile::tempdir().unwrap();
        let feed = Feed::load(dir.path(), "my-feed", true).unwrap();

        assert_eq!(feed.append_message("a", &json!({"n": 1})).unwrap(), 0);
        assert_eq!(feed.append_message("a", &json!({"n": 2})).unwrap(), 1);
        assert_eq!(feed.append_messages("b", &[json!("x"), json!(null)]).unwrap(), 2);

        assert_eq!(feed.messages("a").unwrap(), vec![json!({"n": 1}), json!({"n": 2})]);
        assert_eq!(feed.messages("b").unwrap(), vec![json!("x"), json!(null)]);

        // messages persist across loads
        let feed = Feed::load(dir.path(), "my-feed", false).unwrap();
        assert_eq!(feed.num_messages("a").unwrap(), 2);
    }

    #[test]
    fn test_corrupted_subfeed() {
        let dir = tempfile::tempdir().unwrap();
        let feed = Feed::load(dir.path(), "my-feed", true).unwrap();
        fs::write(feed.subfeed_path("a"), "{\"n\": 1}\nnot json\n").unwrap();
        assert!(matches!(
            feed.messages("a"),
            Err(EphysError::SerializationError(_))
        ));
    }
}
