//! Core module defining the main components of the Rusty Ephys library.
//!
//! - [`recording`]: multi-channel extracellular recordings and their stored descriptors
//! - [`sorting`]: spike trains, one per unit
//! - [`simulation`]: synthetic (toy) recordings with a ground-truth sorting
//! - [`snippets`]: extraction of spike-aligned waveform snippets
//! - [`waveform`]: the representative (median) waveform of a unit and its peak channel
//!
//! # Examples
//!
//! ```
//! use rusty_ephys::core::simulation::{simulate, SimulationConfig};
//! use rusty_ephys::core::snippets::{extract_snippets, SnippetConfig};
//!
//! let config = SimulationConfig {
//!     duration_sec: 2.0,
//!     num_channels: 4,
//!     num_units: 2,
//!     ..SimulationConfig::default()
//! };
//! let (recording, sorting) = simulate(&config).unwrap();
//! assert_eq!(recording.num_channels(), 4);
//! assert_eq!(sorting.unit_ids(), vec![1, 2]);
//!
//! let snippets = extract_snippets(&recording, &sorting, &SnippetConfig::default()).unwrap();
//! let plot_data = snippets.average_waveform(1).unwrap();
//! if let Some(waveform) = plot_data.average_waveform {
//!     assert_eq!(waveform.len(), 130);
//! }
//! ```
pub mod recording;
pub mod simulation;
pub mod snippets;
pub mod sorting;
pub mod utils;
pub mod waveform;

/// Identifier of a (putative) neuron in a sorting.
pub type UnitId = u32;
/// Identifier of a recording channel (electrode).
pub type ChannelId = u32;

/// Minimum number of units to parallelize per-unit computations.
pub const MIN_UNITS_PAR: usize = 4;
/// Minimum number of channels to parallelize per-channel computations.
pub const MIN_CHANNELS_PAR: usize = 4;
/// Duration (in seconds) of the leading window considered when averaging directly from a recording.
pub const RECORDING_AVERAGE_WINDOW_SEC: f64 = 30.0;
