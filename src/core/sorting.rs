//! Spike sortings, i.e., collections of spike trains indexed by unit.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::UnitId;
use crate::error::EphysError;
use crate::storage::content::ContentStore;

/// A stored sorting, referencing its content by URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sorting_format", content = "data", rename_all = "snake_case")]
pub enum SortingObject {
    Json1 { path: String },
}

/// A collection of spike trains (in frames), one per unit, immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SortingFile", into = "SortingFile")]
pub struct Sorting {
    sampling_frequency: f64,
    spike_trains: BTreeMap<UnitId, Vec<u64>>,
}

/// The serialized form of a sorting, validated when converted back.
#[derive(Serialize, Deserialize)]
struct SortingFile {
    sampling_frequency: f64,
    spike_trains: BTreeMap<UnitId, Vec<u64>>,
}

impl TryFrom<SortingFile> for Sorting {
    type Error = EphysError;

    fn try_from(file: SortingFile) -> Result<Self, Self::Error> {
        Sorting::build(file.sampling_frequency, file.spike_trains)
    }
}

impl From<Sorting> for SortingFile {
    fn from(sorting: Sorting) -> Self {
        SortingFile {
            sampling_frequency: sorting.sampling_frequency,
            spike_trains: sorting.spike_trains,
        }
    }
}

impl Sorting {
    /// Create a sorting with the specified spike trains.
    /// If necessary, the spike frames of every unit are sorted.
    pub fn build(
        sampling_frequency: f64,
        spike_trains: BTreeMap<UnitId, Vec<u64>>,
    ) -> Result<Self, EphysError> {
        if !(sampling_frequency.is_finite() && sampling_frequency > 0.0) {
            return Err(EphysError::InvalidParameter(format!(
                "sampling frequency must be positive, got {}",
                sampling_frequency
            )));
        }

        let mut spike_trains = spike_trains;
        spike_trains.values_mut().for_each(|frames| frames.sort_unstable());

        Ok(Sorting {
            sampling_frequency,
            spike_trains,
        })
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    /// Returns the unit ids, in increasing order.
    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.spike_trains.keys().copied().collect()
    }

    pub fn num_units(&self) -> usize {
        self.spike_trains.len()
    }

    /// Returns the (sorted) spike frames of a unit, if it exists.
    pub fn spike_train(&self, unit_id: UnitId) -> Option<&[u64]> {
        self.spike_trains.get(&unit_id).map(|frames| &frames[..])
    }

    /// Total number of spikes across all units.
    pub fn num_spikes(&self) -> usize {
        self.spike_trains.values().map(|frames| frames.len()).sum()
    }

    /// An iterator over the units and their spike frames.
    pub fn iter(&self) -> impl Iterator<Item = (UnitId, &[u64])> + '_ {
        self.spike_trains
            .iter()
            .map(|(&unit_id, frames)| (unit_id, &frames[..]))
    }

    /// Returns the sorting restricted to the frames in `[start_frame, end_frame)`.
    /// Frames are shifted so that `start_frame` becomes frame 0. Units are kept even if empty.
    pub fn sub_sorting(&self, start_frame: u64, end_frame: u64) -> Sorting {
        let spike_trains = self
            .spike_trains
            .iter()
            .map(|(&unit_id, frames)| {
                let frames = frames
                    .iter()
                    .filter(|&&f| f >= start_frame && f < end_frame)
                    .map(|&f| f - start_frame)
                    .collect();
                (unit_id, frames)
            })
            .collect();
        Sorting {
            sampling_frequency: self.sampling_frequency,
            spike_trains,
        }
    }

    /// Store the sorting in the content store and return its descriptor.
    pub fn save(&self, store: &ContentStore) -> Result<SortingObject, EphysError> {
        let path = store.store_json(self, "sorting.json")?;
        log::debug!(
            "Sorting with {} units and {} spikes stored at {}",
            self.num_units(),
            self.num_spikes(),
            path
        );
        Ok(SortingObject::Json1 { path })
    }

    /// Load a sorting from its descriptor.
    pub fn load(store: &ContentStore, object: &SortingObject) -> Result<Sorting, EphysError> {
        match object {
            SortingObject::Json1 { path } => store.load_json(path),
        }
    }
}
