//! Spike-aligned waveform snippets.
//!
//! A snippet dataset stores, for every unit, its full spike train, a subset of channels
//! around the unit (its neighborhood) and the snippets extracted around (a subsample of)
//! its spikes on those channels. On disk, it is a collection of named arrays:
//!
//! - `unit_ids`
//! - `sampling_frequency`
//! - `unit_spike_trains/{unit_id}`
//! - `unit_waveforms/{unit_id}/waveforms`, of shape `[repetition, channel, sample]`
//! - `unit_waveforms/{unit_id}/channel_ids`
use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{s, Array3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::recording::{Recording, RecordingObject};
use crate::core::sorting::{Sorting, SortingObject};
use crate::core::utils::{argmax_first, distance, evenly_spaced_indices, is_sorted, max_abs};
use crate::core::waveform::{compute_average_waveform, AverageWaveformPlotData};
use crate::core::{ChannelId, UnitId, MIN_UNITS_PAR};
use crate::error::EphysError;
use crate::storage::arrays::{ArrayFormat, ArrayRecord, NamedArrays};
use crate::storage::content::ContentStore;

/// Parameters of the snippet extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnippetConfig {
    /// Number of samples (before, after) the spike frame.
    pub snippet_len: (usize, usize),
    /// Maximum number of snippets per unit; spikes are evenly subsampled beyond it.
    pub max_events_per_unit: usize,
    /// Maximum number of channels kept around the peak channel of a unit.
    pub max_neighborhood_size: usize,
    /// File format of prepared snippet datasets.
    pub format: ArrayFormat,
}

impl Default for SnippetConfig {
    fn default() -> Self {
        SnippetConfig {
            snippet_len: (50, 80),
            max_events_per_unit: 1000,
            max_neighborhood_size: 15,
            format: ArrayFormat::Json,
        }
    }
}

impl SnippetConfig {
    fn validate(&self) -> Result<(), EphysError> {
        if self.snippet_len.0 + self.snippet_len.1 == 0 {
            return Err(EphysError::InvalidParameter(
                "snippets must have at least one sample".to_string(),
            ));
        }
        if self.max_events_per_unit == 0 {
            return Err(EphysError::InvalidParameter(
                "max_events_per_unit must be positive".to_string(),
            ));
        }
        if self.max_neighborhood_size == 0 {
            return Err(EphysError::InvalidParameter(
                "max_neighborhood_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The snippets of a single unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSnippets {
    spike_train: Vec<u64>,
    channel_ids: Vec<ChannelId>,
    /// Shape `[repetition, channel, sample]`.
    waveforms: Array3<f64>,
}

impl UnitSnippets {
    /// The function returns an error if the channel ids do not match the second axis of the waveforms.
    pub fn build(
        spike_train: Vec<u64>,
        channel_ids: Vec<ChannelId>,
        waveforms: Array3<f64>,
    ) -> Result<Self, EphysError> {
        if channel_ids.len() != waveforms.len_of(Axis(1)) {
            return Err(EphysError::MalformedArray(format!(
                "{} channel ids for waveforms of shape {:?}",
                channel_ids.len(),
                waveforms.shape()
            )));
        }
        Ok(UnitSnippets {
            spike_train,
            channel_ids,
            waveforms,
        })
    }

    /// The full spike train of the unit (not only the spikes with a snippet).
    pub fn spike_train(&self) -> &[u64] {
        &self.spike_train
    }

    pub fn channel_ids(&self) -> &[ChannelId] {
        &self.channel_ids
    }

    pub fn waveforms(&self) -> &Array3<f64> {
        &self.waveforms
    }

    /// Number of extracted snippets.
    pub fn num_events(&self) -> usize {
        self.waveforms.len_of(Axis(0))
    }

    /// The median waveform on the peak channel of the unit.
    pub fn average_waveform(&self) -> Result<AverageWaveformPlotData, EphysError> {
        compute_average_waveform(self.waveforms.view(), &self.channel_ids)
    }
}

/// Snippets of every unit of a sorting.
#[derive(Debug, Clone, PartialEq)]
pub struct SnippetDataset {
    sampling_frequency: f64,
    units: BTreeMap<UnitId, UnitSnippets>,
}

impl SnippetDataset {
    pub fn new(sampling_frequency: f64, units: BTreeMap<UnitId, UnitSnippets>) -> Self {
        SnippetDataset {
            sampling_frequency,
            units,
        }
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.units.keys().copied().collect()
    }

    pub fn unit(&self, unit_id: UnitId) -> Option<&UnitSnippets> {
        self.units.get(&unit_id)
    }

    /// The median waveform on the peak channel of a unit.
    pub fn average_waveform(&self, unit_id: UnitId) -> Result<AverageWaveformPlotData, EphysError> {
        self.unit(unit_id)
            .ok_or(EphysError::UnitNotFound(unit_id))?
            .average_waveform()
    }

    pub fn to_named_arrays(&self) -> NamedArrays {
        let mut arrays = NamedArrays::new();
        arrays.insert("unit_ids", ArrayRecord::ids(&self.unit_ids()));
        arrays.insert(
            "sampling_frequency",
            ArrayRecord::vector(vec![self.sampling_frequency]),
        );
        for (unit_id, unit) in self.units.iter() {
            arrays.insert(
                format!("unit_spike_trains/{}", unit_id),
                ArrayRecord::vector(unit.spike_train.iter().map(|&f| f as f64).collect()),
            );
            arrays.insert(
                format!("unit_waveforms/{}/waveforms", unit_id),
                ArrayRecord::from(&unit.waveforms),
            );
            arrays.insert(
                format!("unit_waveforms/{}/channel_ids", unit_id),
                ArrayRecord::ids(&unit.channel_ids),
            );
        }
        arrays
    }

    /// Read the sampling frequency and the snippets of a single unit.
    pub fn read_unit(arrays: &NamedArrays, unit_id: UnitId) -> Result<(f64, UnitSnippets), EphysError> {
        let unit_ids = arrays.get("unit_ids")?.to_ids("unit_ids")?;
        if !unit_ids.contains(&unit_id) {
            return Err(EphysError::UnitNotFound(unit_id));
        }

        let sampling_frequency = arrays.get("sampling_frequency")?.first("sampling_frequency")?;
        if !(sampling_frequency.is_finite() && sampling_frequency > 0.0) {
            return Err(EphysError::MalformedArray(format!(
                "sampling_frequency: {} is not a valid frequency",
                sampling_frequency
            )));
        }

        let name = format!("unit_spike_trains/{}", unit_id);
        let spike_train = arrays.get(&name)?.to_frames(&name)?;
        if !is_sorted(&spike_train) {
            return Err(EphysError::InvalidSpikeTrain(format!("{} is not sorted", name)));
        }

        let name = format!("unit_waveforms/{}/waveforms", unit_id);
        let waveforms = arrays.get(&name)?.to_array3(&name)?;

        let name = format!("unit_waveforms/{}/channel_ids", unit_id);
        let channel_ids = arrays.get(&name)?.to_ids(&name)?;

        Ok((
            sampling_frequency,
            UnitSnippets::build(spike_train, channel_ids, waveforms)?,
        ))
    }

    /// Read every unit listed in `unit_ids`.
    pub fn from_named_arrays(arrays: &NamedArrays) -> Result<Self, EphysError> {
        let unit_ids = arrays.get("unit_ids")?.to_ids("unit_ids")?;
        let mut sampling_frequency = f64::NAN;
        let mut units = BTreeMap::new();
        for unit_id in unit_ids {
            let (sf, unit) = Self::read_unit(arrays, unit_id)?;
            sampling_frequency = sf;
            units.insert(unit_id, unit);
        }
        if units.is_empty() {
            sampling_frequency = arrays.get("sampling_frequency")?.first("sampling_frequency")?;
        }
        Ok(SnippetDataset {
            sampling_frequency,
            units,
        })
    }

    /// Write the dataset, in the format implied by the file extension.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), EphysError> {
        self.to_named_arrays().write(path)
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, EphysError> {
        Self::from_named_arrays(&NamedArrays::read(path)?)
    }
}

/// Indices of the channels closest to the peak channel, in increasing order.
fn neighborhood(recording: &Recording, peak_index: usize, size: usize) -> Vec<usize> {
    let locations = recording.channel_locations();
    let peak_location = locations[peak_index];
    let mut indices: Vec<usize> = (0..recording.num_channels()).collect();
    indices.sort_by(|&a, &b| {
        distance(&locations[a], &peak_location)
            .total_cmp(&distance(&locations[b], &peak_location))
            .then(a.cmp(&b))
    });
    indices.truncate(size);
    indices.sort_unstable();
    indices
}

/// Extract the snippets of a single unit.
///
/// Spikes whose snippet would extend beyond the recording are skipped. If more than
/// `max_events_per_unit` spikes remain, they are evenly subsampled. Snippets are kept on the
/// `max_neighborhood_size` channels closest to the peak channel of the unit (all channels if
/// the unit has no snippet).
pub fn extract_unit_snippets(
    recording: &Recording,
    spike_train: &[u64],
    config: &SnippetConfig,
) -> Result<UnitSnippets, EphysError> {
    config.validate()?;
    let (before, after) = config.snippet_len;
    let num_frames = recording.num_frames() as u64;

    let events: Vec<usize> = spike_train
        .iter()
        .filter(|&&f| {
            f >= (before as u64) && f.checked_add(after as u64).is_some_and(|end| end <= num_frames)
        })
        .map(|&f| f as usize)
        .collect();
    let events: Vec<usize> = evenly_spaced_indices(events.len(), config.max_events_per_unit)
        .into_iter()
        .map(|i| events[i])
        .collect();

    let traces = recording.traces();
    let mut waveforms = Array3::<f64>::zeros((events.len(), recording.num_channels(), before + after));
    for (mut snippet, &frame) in waveforms.outer_iter_mut().zip(events.iter()) {
        snippet.assign(&traces.slice(s![.., frame - before..frame + after]).mapv(f64::from));
    }

    let channel_indices = match waveforms.mean_axis(Axis(0)) {
        Some(mean) if config.max_neighborhood_size < recording.num_channels() => {
            let channel_maximums: Vec<f64> = mean.rows().into_iter().map(|row| max_abs(row.iter())).collect();
            let peak_index = argmax_first(&channel_maximums).unwrap_or(0);
            neighborhood(recording, peak_index, config.max_neighborhood_size)
        }
        _ => (0..recording.num_channels()).collect(),
    };

    let channel_ids = channel_indices
        .iter()
        .map(|&i| recording.channel_ids()[i])
        .collect();
    let waveforms = waveforms.select(Axis(1), &channel_indices);
    UnitSnippets::build(spike_train.to_vec(), channel_ids, waveforms)
}

/// Extract the snippets of every unit of the sorting.
pub fn extract_snippets(
    recording: &Recording,
    sorting: &Sorting,
    config: &SnippetConfig,
) -> Result<SnippetDataset, EphysError> {
    config.validate()?;
    let sampling_frequency = recording.sampling_frequency();
    if (sampling_frequency - sorting.sampling_frequency()).abs() > 1e-6 * sampling_frequency {
        return Err(EphysError::InvalidParameter(format!(
            "recording and sorting sampling frequencies differ ({} vs {})",
            sampling_frequency,
            sorting.sampling_frequency()
        )));
    }

    log::info!(
        "Extracting snippets of {} units on {} channels",
        sorting.num_units(),
        recording.num_channels()
    );
    let units: Vec<(UnitId, &[u64])> = sorting.iter().collect();
    let extract = |&(unit_id, frames): &(UnitId, &[u64])| -> Result<(UnitId, UnitSnippets), EphysError> {
        let snippets = extract_unit_snippets(recording, frames, config)?;
        log::debug!(
            "Unit {}: {} snippets on {} channels",
            unit_id,
            snippets.num_events(),
            snippets.channel_ids().len()
        );
        Ok((unit_id, snippets))
    };

    let units: Vec<(UnitId, UnitSnippets)> = if units.len() >= MIN_UNITS_PAR {
        units.par_iter().map(extract).collect::<Result<_, _>>()?
    } else {
        units.iter().map(extract).collect::<Result<_, _>>()?
    };

    Ok(SnippetDataset {
        sampling_frequency,
        units: units.into_iter().collect(),
    })
}

/// Load a recording and a sorting, extract their snippets and store the resulting dataset.
/// Returns the URI of the stored dataset.
pub fn prepare_snippets(
    store: &ContentStore,
    recording_object: &RecordingObject,
    sorting_object: &SortingObject,
    config: &SnippetConfig,
) -> Result<String, EphysError> {
    let recording = Recording::load(store, recording_object)?;
    let sorting = Sorting::load(store, sorting_object)?;
    let dataset = extract_snippets(&recording, &sorting, config)?;

    let name = format!("snippets.{}", config.format.extension());
    let uri = store.store_with(&name, |path| dataset.write(path))?;
    log::info!("Snippets of {} units stored at {}", dataset.unit_ids().len(), uri);
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recording::SampleDtype;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    /// A recording with a positive bump on channel 1 at frames 10 and 30, and a negative bump
    /// on channel 3 at frame 20.
    fn recording() -> Recording {
        let mut traces = Array2::<f32>::zeros((4, 40));
        traces[[1, 10]] = 5.0;
        traces[[1, 30]] = 7.0;
        traces[[3, 20]] = -9.0;
        Recording::build(
            vec![10, 11, 12, 13],
            vec![[0.0, 0.0], [0.0, 20.0], [0.0, 40.0], [0.0, 60.0]],
            1000.0,
            traces,
            SampleDtype::Float32,
        )
        .unwrap()
    }

    fn config(max_neighborhood_size: usize) -> SnippetConfig {
        SnippetConfig {
            snippet_len: (2, 3),
            max_events_per_unit: 10,
            max_neighborhood_size,
            format: ArrayFormat::Json,
        }
    }

    #[test]
    fn test_extract_unit_snippets() {
        let recording = recording();
        // frame 0 and frame 38 do not fit in the recording
        let snippets = extract_unit_snippets(&recording, &[0, 10, 30, 38], &config(10)).unwrap();
        assert_eq!(snippets.spike_train(), &[0, 10, 30, 38]);
        assert_eq!(snippets.num_events(), 2);
        assert_eq!(snippets.channel_ids(), &[10, 11, 12, 13]);
        assert_eq!(snippets.waveforms().shape(), &[2, 4, 5]);
        assert_relative_eq!(snippets.waveforms()[[0, 1, 2]], 5.0);
        assert_relative_eq!(snippets.waveforms()[[1, 1, 2]], 7.0);

        let plot_data = snippets.average_waveform().unwrap();
        assert_eq!(plot_data.channel_id, Some(11));
        assert_eq!(plot_data.average_waveform, Some(vec![0.0, 0.0, 6.0, 0.0, 0.0]));
    }

    #[test]
    fn test_extract_unit_snippets_far_frames() {
        let recording = recording();
        let snippets = extract_unit_snippets(&recording, &[10, u64::MAX - 3, u64::MAX], &config(10)).unwrap();
        assert_eq!(snippets.num_events(), 1);
        assert_eq!(snippets.spike_train().len(), 3);
        assert_relative_eq!(snippets.waveforms()[[0, 1, 2]], 5.0);
    }

    #[test]
    fn test_extract_unit_snippets_neighborhood() {
        let recording = recording();
        let snippets = extract_unit_snippets(&recording, &[20], &config(2)).unwrap();
        // channel 13 peaks, channel 12 is its closest neighbor
        assert_eq!(snippets.channel_ids(), &[12, 13]);
        assert_eq!(snippets.waveforms().shape(), &[1, 2, 5]);

        let snippets = extract_unit_snippets(&recording, &[10], &config(3)).unwrap();
        // channel 11 peaks, ties between channels 10 and 12 go to the lowest index
        assert_eq!(snippets.channel_ids(), &[10, 11, 12]);
    }

    #[test]
    fn test_extract_unit_snippets_without_events() {
        let recording = recording();
        let snippets = extract_unit_snippets(&recording, &[], &config(2)).unwrap();
        assert_eq!(snippets.num_events(), 0);
        assert_eq!(snippets.channel_ids().len(), 4);
        assert!(snippets.average_waveform().unwrap().is_empty());
    }

    #[test]
    fn test_extract_unit_snippets_subsampling() {
        let recording = recording();
        let config = SnippetConfig {
            max_events_per_unit: 2,
            ..config(4)
        };
        let snippets = extract_unit_snippets(&recording, &[5, 10, 15, 20, 25], &config).unwrap();
        assert_eq!(snippets.num_events(), 2);
        // events 5 and 15 are kept
        assert_relative_eq!(snippets.waveforms()[[0, 1, 2]], 0.0);
        assert_eq!(snippets.spike_train().len(), 5);
    }

    #[test]
    fn test_extract_snippets_invalid() {
        let recording = recording();
        let sorting = Sorting::build(2000.0, BTreeMap::new()).unwrap();
        assert!(matches!(
            extract_snippets(&recording, &sorting, &config(2)),
            Err(EphysError::InvalidParameter(_))
        ));

        let sorting = Sorting::build(1000.0, BTreeMap::new()).unwrap();
        assert!(matches!(
            extract_snippets(&recording, &sorting, &config(0)),
            Err(EphysError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_snippet_dataset_arrays() {
        let recording = recording();
        let sorting = Sorting::build(
            1000.0,
            BTreeMap::from([(1, vec![10, 30]), (2, vec![20]), (3, vec![]), (4, vec![1]), (5, vec![12])]),
        )
        .unwrap();
        let dataset = extract_snippets(&recording, &sorting, &config(2)).unwrap();
        assert_eq!(dataset.unit_ids(), vec![1, 2, 3, 4, 5]);

        let arrays = dataset.to_named_arrays();
        assert_eq!(arrays.get("unit_ids").unwrap().data(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(arrays.get("unit_waveforms/2/waveforms").unwrap().shape(), &[1, 2, 5]);
        assert_eq!(arrays.get("unit_waveforms/3/waveforms").unwrap().shape(), &[0, 4, 5]);
        assert_eq!(arrays.get("unit_spike_trains/4").unwrap().data(), &[1.0]);

        assert_eq!(SnippetDataset::from_named_arrays(&arrays).unwrap(), dataset);

        let (sampling_frequency, unit) = SnippetDataset::read_unit(&arrays, 2).unwrap();
        assert_relative_eq!(sampling_frequency, 1000.0);
        assert_eq!(unit.channel_ids(), &[12, 13]);
        assert_eq!(
            SnippetDataset::read_unit(&arrays, 9),
            Err(EphysError::UnitNotFound(9))
        );
        assert_eq!(dataset.average_waveform(9), Err(EphysError::UnitNotFound(9)));
        assert!(dataset.average_waveform(3).unwrap().is_empty());
        assert!(dataset.average_waveform(4).unwrap().is_empty());
    }

    #[test]
    fn test_read_unit_missing_and_malformed() {
        let mut arrays = NamedArrays::new();
        arrays.insert("unit_ids", ArrayRecord::ids(&[1]));
        arrays.insert("sampling_frequency", ArrayRecord::vector(vec![30000.0]));
        arrays.insert("unit_spike_trains/1", ArrayRecord::vector(vec![5.0, 3.0]));
        assert_eq!(
            SnippetDataset::read_unit(&arrays, 1),
            Err(EphysError::InvalidSpikeTrain("unit_spike_trains/1 is not sorted".to_string()))
        );

        arrays.insert("unit_spike_trains/1", ArrayRecord::vector(vec![3.0, 5.0]));
        assert_eq!(
            SnippetDataset::read_unit(&arrays, 1),
            Err(EphysError::MissingArray("unit_waveforms/1/waveforms".to_string()))
        );

        arrays.insert(
            "unit_waveforms/1/waveforms",
            ArrayRecord::build(vec![2, 1, 2], vec![0.0; 4]).unwrap(),
        );
        arrays.insert("unit_waveforms/1/channel_ids", ArrayRecord::ids(&[0, 1]));
        assert!(matches!(
            SnippetDataset::read_unit(&arrays, 1),
            Err(EphysError::MalformedArray(_))
        ));

        arrays.insert("unit_waveforms/1/channel_ids", ArrayRecord::ids(&[4]));
        assert!(SnippetDataset::read_unit(&arrays, 1).is_ok());
    }

    #[test]
    fn test_prepare_snippets() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();

        let recording = recording();
        let sorting = Sorting::build(1000.0, BTreeMap::from([(7, vec![10, 30])])).unwrap();
        let recording_object = recording.save(&store).unwrap();
        let sorting_object = sorting.save(&store).unwrap();

        let uri = prepare_snippets(&store, &recording_object, &sorting_object, &config(2)).unwrap();
        assert!(uri.ends_with("/snippets.json"));

        let dataset = SnippetDataset::read(store.load_file(&uri).unwrap()).unwrap();
        assert_eq!(dataset.unit_ids(), vec![7]);
        assert_eq!(dataset.unit(7).unwrap().channel_ids(), &[10, 11]);
    }
}
