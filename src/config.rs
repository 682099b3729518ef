//! Settings of the command line tool, loaded from a TOML file.
//!
//! Every section is optional and every missing field takes its default value.
//!
//! ```
//! use rusty_ephys::config::Settings;
//!
//! let settings = Settings::from_toml_str(
//!     r#"
//!     [feed]
//!     name = "my-feed"
//!
//!     [snippets]
//!     snippet_len = [30, 60]
//!
//!     [simulation]
//!     num_units = 3
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(settings.feed.name, "my-feed");
//! assert_eq!(settings.feed.workspace, "default");
//! assert_eq!(settings.snippets.snippet_len, (30, 60));
//! assert_eq!(settings.snippets.max_events_per_unit, 1000);
//! assert_eq!(settings.simulation.num_units, 3);
//! ```
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::simulation::SimulationConfig;
use crate::core::snippets::SnippetConfig;
use crate::error::EphysError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Root directory of the content store.
    pub root: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            root: PathBuf::from(".rusty_ephys/store"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    /// Directory holding the feeds.
    pub root: PathBuf,
    pub name: String,
    pub workspace: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        FeedSettings {
            root: PathBuf::from(".rusty_ephys/feeds"),
            name: "labbox-ephys-default".to_string(),
            workspace: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Directory of the job result cache; results are not cached if unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for JobSettings {
    fn default() -> Self {
        JobSettings {
            cache_dir: Some(PathBuf::from(".rusty_ephys/job_cache")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Directory of the log files.
    pub dir: PathBuf,
    /// One of `off`, `error`, `warn`, `info`, `debug` and `trace`.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            dir: PathBuf::from("log"),
            level: "info".to_string(),
        }
    }
}

impl LogSettings {
    pub fn level_filter(&self) -> Result<log::LevelFilter, EphysError> {
        self.level
            .parse()
            .map_err(|_| EphysError::InvalidParameter(format!("invalid log level {:?}", self.level)))
    }
}

/// All settings, passed explicitly to the operations that need them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub feed: FeedSettings,
    pub jobs: JobSettings,
    pub snippets: SnippetConfig,
    pub simulation: SimulationConfig,
    pub log: LogSettings,
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self, EphysError> {
        let settings: Settings = toml::from_str(content)?;
        settings.log.level_filter()?;
        Ok(settings)
    }

    /// Load the settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EphysError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load the settings from a TOML file if given, otherwise use the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, EphysError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Settings::default()),
        }
    }
}
