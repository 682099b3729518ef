//! Representative (median) waveform of a unit and its peak channel.
//!
//! # Examples
//!
//! ```rust
//! use ndarray::Array3;
//! use rusty_ephys::core::waveform::compute_average_waveform;
//!
//! // Three repetitions of a two-channel snippet of four samples.
//! let waveforms = Array3::from_shape_vec(
//!     (3, 2, 4),
//!     vec![
//!         0.0, -10.0, 2.0, 1.0,
//!         0.0, 1.0, 0.0, 0.0,
//!         1.0, -12.0, 4.0, 0.0,
//!         0.0, 2.0, 0.0, 0.0,
//!         2.0, -11.0, 3.0, 5.0,
//!         0.0, 3.0, 0.0, 0.0,
//!     ],
//! )
//! .unwrap();
//!
//! let plot_data = compute_average_waveform(waveforms.view(), &[17, 18]).unwrap();
//! assert_eq!(plot_data.channel_id, Some(17));
//! assert_eq!(plot_data.average_waveform, Some(vec![1.0, -11.0, 3.0, 1.0]));
//! ```
use ndarray::{s, Array2, ArrayView3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::recording::Recording;
use crate::core::snippets::{extract_unit_snippets, SnippetConfig, SnippetDataset};
use crate::core::sorting::Sorting;
use crate::core::utils::{argmax_first, max_abs, median_in_place};
use crate::core::{ChannelId, UnitId, MIN_CHANNELS_PAR, RECORDING_AVERAGE_WINDOW_SEC};
use crate::error::EphysError;
use crate::storage::arrays::NamedArrays;
use crate::storage::content::ContentStore;

/// The average waveform of a unit on its peak channel.
/// Both fields are `None` for a unit without any spike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageWaveformPlotData {
    pub channel_id: Option<ChannelId>,
    pub average_waveform: Option<Vec<f64>>,
}

impl AverageWaveformPlotData {
    /// The result for a unit without any spike.
    pub fn empty() -> Self {
        AverageWaveformPlotData {
            channel_id: None,
            average_waveform: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.channel_id.is_none()
    }
}

/// Returns the per-channel, per-sample median across repetitions, of shape `[channel, sample]`.
/// Returns `None` if there is no repetition.
pub fn median_waveforms(waveforms: ArrayView3<f64>) -> Option<Array2<f64>> {
    let (num_repetitions, num_channels, num_samples) = waveforms.dim();
    if num_repetitions == 0 {
        return None;
    }

    let channel_median = |c: usize| -> Vec<f64> {
        (0..num_samples)
            .map(|t| {
                let mut values = waveforms.slice(s![.., c, t]).to_vec();
                median_in_place(&mut values).unwrap_or(f64::NAN)
            })
            .collect()
    };

    let rows: Vec<Vec<f64>> = if num_channels >= MIN_CHANNELS_PAR {
        (0..num_channels).into_par_iter().map(channel_median).collect()
    } else {
        (0..num_channels).map(channel_median).collect()
    };

    Array2::from_shape_vec((num_channels, num_samples), rows.concat()).ok()
}

/// Computes the median waveform of a unit and selects its peak channel, i.e., the channel
/// whose median waveform has the largest absolute amplitude (the lowest index wins ties).
///
/// `waveforms` has shape `[repetition, channel, sample]` and `channel_ids` gives the id of
/// each channel along the second axis.
/// A unit without repetitions yields an empty result.
/// The function returns an error if the channel ids do not match the waveforms, if there is no
/// channel or no sample, or if some value is not finite.
pub fn compute_average_waveform(
    waveforms: ArrayView3<f64>,
    channel_ids: &[ChannelId],
) -> Result<AverageWaveformPlotData, EphysError> {
    let (num_repetitions, num_channels, num_samples) = waveforms.dim();
    if channel_ids.len() != num_channels {
        return Err(EphysError::MalformedArray(format!(
            "{} channel ids for waveforms with {} channels",
            channel_ids.len(),
            num_channels
        )));
    }
    if num_repetitions == 0 {
        return Ok(AverageWaveformPlotData::empty());
    }
    if num_channels == 0 || num_samples == 0 {
        return Err(EphysError::MalformedArray(format!(
            "waveforms of shape {:?} have no channel or no sample",
            waveforms.shape()
        )));
    }
    if waveforms.iter().any(|v| !v.is_finite()) {
        return Err(EphysError::MalformedArray(
            "waveforms contain non-finite values".to_string(),
        ));
    }

    let medians = median_waveforms(waveforms).ok_or_else(|| {
        EphysError::MalformedArray("failed to compute the median waveforms".to_string())
    })?;
    let channel_maximums: Vec<f64> = medians.rows().into_iter().map(|row| max_abs(row.iter())).collect();
    let peak_index = argmax_first(&channel_maximums).ok_or_else(|| {
        EphysError::MalformedArray("no channel to select the peak from".to_string())
    })?;

    Ok(AverageWaveformPlotData {
        channel_id: Some(channel_ids[peak_index]),
        average_waveform: Some(medians.row(peak_index).to_vec()),
    })
}

/// Computes the average waveform of a unit from a snippet dataset file.
///
/// `snippets_uri` is either a content URI or a local path.
pub fn fetch_average_waveform_plot_data(
    store: &ContentStore,
    snippets_uri: &str,
    unit_id: UnitId,
) -> Result<AverageWaveformPlotData, EphysError> {
    let path = store.load_file(snippets_uri)?;
    let arrays = NamedArrays::read(&path)?;
    let (_, snippets) = SnippetDataset::read_unit(&arrays, unit_id)?;
    log::info!(
        "Unit {}: {} spikes, {} snippets on channels {:?}",
        unit_id,
        snippets.spike_train().len(),
        snippets.num_events(),
        snippets.channel_ids()
    );
    snippets.average_waveform()
}

/// Computes the average waveform of a unit directly from a recording and a sorting.
///
/// Only the leading window of the recording (see [`RECORDING_AVERAGE_WINDOW_SEC`]) is
/// considered, and snippets are taken on all channels. A unit without spikes in the window
/// yields an empty result.
pub fn average_waveform_from_recording(
    recording: &Recording,
    sorting: &Sorting,
    unit_id: UnitId,
    config: &SnippetConfig,
) -> Result<AverageWaveformPlotData, EphysError> {
    let end_frame = (RECORDING_AVERAGE_WINDOW_SEC * recording.sampling_frequency()) as usize;
    let window = recording.sub_recording(0, end_frame)?;
    let sorting = sorting.sub_sorting(0, end_frame as u64);

    let frames = sorting
        .spike_train(unit_id)
        .ok_or(EphysError::UnitNotFound(unit_id))?;
    if frames.is_empty() {
        log::info!("Unit {} has no spikes in the first {} s", unit_id, RECORDING_AVERAGE_WINDOW_SEC);
        return Ok(AverageWaveformPlotData::empty());
    }

    let config = SnippetConfig {
        max_neighborhood_size: window.num_channels().max(1),
        ..config.clone()
    };
    extract_unit_snippets(&window, frames, &config)?.average_waveform()
}
