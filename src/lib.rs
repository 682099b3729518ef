//! This crate provides tools for simulating extracellular recordings and computing the average
//! waveforms of sorted units in Rust.
//!
//! # Simulating a Recording
//!
//! ```rust
//! use rusty_ephys::core::simulation::{simulate, SimulationConfig};
//!
//! let config = SimulationConfig {
//!     duration_sec: 1.0,
//!     num_channels: 4,
//!     num_units: 2,
//!     seed: 42,
//!     ..SimulationConfig::default()
//! };
//! let (recording, sorting) = simulate(&config).unwrap();
//! assert_eq!(recording.num_channels(), 4);
//! assert_eq!(sorting.num_units(), 2);
//! ```
//!
//! # Registering it in a Workspace
//!
//! ```rust
//! use rusty_ephys::core::simulation::{simulate, SimulationConfig};
//! use rusty_ephys::feed::Feed;
//! use rusty_ephys::storage::content::ContentStore;
//! use rusty_ephys::workspace::{import_recording, import_sorting, Workspace};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = ContentStore::new(dir.path().join("store")).unwrap();
//! let feed = Feed::load(dir.path().join("feeds"), "labbox-ephys-default", true).unwrap();
//!
//! let config = SimulationConfig { duration_sec: 1.0, ..SimulationConfig::default() };
//! let (recording, sorting) = simulate(&config).unwrap();
//! import_recording(&feed, &store, "default", &recording, "rec1").unwrap();
//! import_sorting(&feed, &store, "default", &recording, &sorting, "rec1", "rec1:true").unwrap();
//!
//! let workspace = Workspace::load(&feed, "default").unwrap();
//! assert!(workspace.sorting("rec1:true").is_some());
//! ```
//!
//! # Computing Average Waveforms
//!
//! ```rust
//! use rusty_ephys::core::simulation::{simulate, SimulationConfig};
//! use rusty_ephys::core::snippets::SnippetConfig;
//! use rusty_ephys::jobs::builtin::{UnitWaveformArgs, CREATEJOB_FETCH_AVERAGE_WAVEFORM};
//! use rusty_ephys::jobs::registry::JobRegistry;
//! use rusty_ephys::jobs::JobContext;
//! use rusty_ephys::core::waveform::AverageWaveformPlotData;
//! use rusty_ephys::storage::content::ContentStore;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = ContentStore::new(dir.path()).unwrap();
//! let config = SimulationConfig { duration_sec: 2.0, ..SimulationConfig::default() };
//! let (recording, sorting) = simulate(&config).unwrap();
//!
//! let registry = JobRegistry::with_builtins().unwrap();
//! let snippets = SnippetConfig::default();
//! let ctx = JobContext::new(&registry, &store, &snippets);
//!
//! let args = UnitWaveformArgs {
//!     recording_object: recording.save(&store).unwrap(),
//!     sorting_object: sorting.save(&store).unwrap(),
//!     unit_id: 1,
//! };
//! let plot_data: AverageWaveformPlotData = ctx.call(CREATEJOB_FETCH_AVERAGE_WAVEFORM, &args).unwrap();
//! if let Some(channel_id) = plot_data.channel_id {
//!     assert!(recording.channel_ids().contains(&channel_id));
//! }
//! ```
pub mod config;
pub mod core;
pub mod error;
pub mod feed;
pub mod jobs;
pub mod storage;
pub mod workspace;
