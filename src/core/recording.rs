//! Multi-channel extracellular recordings.
use std::collections::HashSet;

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::core::ChannelId;
use crate::error::EphysError;
use crate::storage::content::ContentStore;

/// The sample type used when a recording is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleDtype {
    #[default]
    Int16,
    Float32,
}

impl SampleDtype {
    /// Number of bytes per serialized sample.
    pub fn width(&self) -> usize {
        match self {
            SampleDtype::Int16 => 2,
            SampleDtype::Float32 => 4,
        }
    }

    /// Map a value onto the set of values representable by the dtype.
    /// For `int16`, values are rounded and saturated.
    pub fn quantize(&self, value: f32) -> f32 {
        match self {
            SampleDtype::Int16 => value.round().clamp(i16::MIN as f32, i16::MAX as f32),
            SampleDtype::Float32 => value,
        }
    }
}

/// A stored recording, referencing its raw data by content URI.
///
/// The raw data is frame-major: all channels of frame 0, then all channels of frame 1, and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "recording_format", content = "data", rename_all = "snake_case")]
pub enum RecordingObject {
    Bin1 {
        raw: String,
        raw_dtype: SampleDtype,
        raw_num_channels: usize,
        num_frames: usize,
        samplerate: f64,
        channel_ids: Vec<ChannelId>,
        channel_positions: Vec<[f64; 2]>,
    },
}

/// A multi-channel time series, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    channel_ids: Vec<ChannelId>,
    channel_locations: Vec<[f64; 2]>,
    sampling_frequency: f64,
    dtype: SampleDtype,
    /// Samples, one row per channel.
    traces: Array2<f32>,
}

impl Recording {
    /// Create a recording from its traces (one row per channel).
    /// The traces are quantized according to the sample dtype.
    /// The function returns an error if the channel metadata does not match the traces,
    /// if channel ids are repeated, or if a sample is not finite.
    pub fn build(
        channel_ids: Vec<ChannelId>,
        channel_locations: Vec<[f64; 2]>,
        sampling_frequency: f64,
        traces: Array2<f32>,
        dtype: SampleDtype,
    ) -> Result<Self, EphysError> {
        if !(sampling_frequency.is_finite() && sampling_frequency > 0.0) {
            return Err(EphysError::InvalidParameter(format!(
                "sampling frequency must be positive, got {}",
                sampling_frequency
            )));
        }
        if channel_ids.len() != traces.nrows() {
            return Err(EphysError::InvalidParameter(format!(
                "{} channel ids for {} trace rows",
                channel_ids.len(),
                traces.nrows()
            )));
        }
        if channel_locations.len() != channel_ids.len() {
            return Err(EphysError::InvalidParameter(format!(
                "{} channel locations for {} channels",
                channel_locations.len(),
                channel_ids.len()
            )));
        }
        let mut seen = HashSet::with_capacity(channel_ids.len());
        if let Some(id) = channel_ids.iter().find(|&&id| !seen.insert(id)) {
            return Err(EphysError::InvalidParameter(format!(
                "channel id {} is repeated",
                id
            )));
        }
        if traces.iter().any(|v| !v.is_finite()) {
            return Err(EphysError::InvalidParameter(
                "traces must only contain finite samples".to_string(),
            ));
        }

        let traces = traces.mapv(|v| dtype.quantize(v));
        Ok(Recording {
            channel_ids,
            channel_locations,
            sampling_frequency,
            dtype,
            traces,
        })
    }

    /// Returns the channel ids.
    pub fn channel_ids(&self) -> &[ChannelId] {
        &self.channel_ids
    }

    /// Returns the channel locations, in the same order as the channel ids.
    pub fn channel_locations(&self) -> &[[f64; 2]] {
        &self.channel_locations
    }

    /// Returns the position of a channel in the recording, if it exists.
    pub fn channel_index(&self, channel_id: ChannelId) -> Option<usize> {
        self.channel_ids.iter().position(|&id| id == channel_id)
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    pub fn dtype(&self) -> SampleDtype {
        self.dtype
    }

    pub fn num_channels(&self) -> usize {
        self.traces.nrows()
    }

    pub fn num_frames(&self) -> usize {
        self.traces.ncols()
    }

    /// Duration of the recording, in seconds.
    pub fn duration(&self) -> f64 {
        self.num_frames() as f64 / self.sampling_frequency
    }

    /// A view on the traces, one row per channel.
    pub fn traces(&self) -> ArrayView2<f32> {
        self.traces.view()
    }

    /// Returns the recording restricted to the frames in `[start_frame, end_frame)`.
    /// The end is clipped to the number of frames.
    pub fn sub_recording(&self, start_frame: usize, end_frame: usize) -> Result<Recording, EphysError> {
        let end_frame = end_frame.min(self.num_frames());
        if start_frame > end_frame {
            return Err(EphysError::InvalidParameter(format!(
                "invalid frame range [{}, {})",
                start_frame, end_frame
            )));
        }
        Ok(Recording {
            channel_ids: self.channel_ids.clone(),
            channel_locations: self.channel_locations.clone(),
            sampling_frequency: self.sampling_frequency,
            dtype: self.dtype,
            traces: self.traces.slice(s![.., start_frame..end_frame]).to_owned(),
        })
    }

    /// Serialize the samples (frame-major, little-endian) using the recording dtype.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.traces.len() * self.dtype.width());
        for frame in self.traces.columns() {
            for &v in frame.iter() {
                match self.dtype {
                    SampleDtype::Int16 => bytes.extend_from_slice(&(v as i16).to_le_bytes()),
                    SampleDtype::Float32 => bytes.extend_from_slice(&v.to_le_bytes()),
                }
            }
        }
        bytes
    }

    /// Decode frame-major samples into traces (one row per channel).
    pub fn traces_from_bytes(
        bytes: &[u8],
        dtype: SampleDtype,
        num_channels: usize,
        num_frames: usize,
    ) -> Result<Array2<f32>, EphysError> {
        let expected = num_channels * num_frames * dtype.width();
        if bytes.len() != expected {
            return Err(EphysError::MalformedArray(format!(
                "raw data has {} bytes, expected {} ({} channels x {} frames)",
                bytes.len(),
                expected,
                num_channels,
                num_frames
            )));
        }
        let samples: Vec<f32> = match dtype {
            SampleDtype::Int16 => bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32)
                .collect(),
            SampleDtype::Float32 => bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        };
        let frame_major = Array2::from_shape_vec((num_frames, num_channels), samples)
            .map_err(|e| EphysError::MalformedArray(e.to_string()))?;
        Ok(frame_major.reversed_axes().as_standard_layout().to_owned())
    }

    /// Store the recording in the content store and return its descriptor.
    pub fn save(&self, store: &ContentStore) -> Result<RecordingObject, EphysError> {
        let raw = store.store_bytes(&self.to_bytes(), "raw.dat")?;
        log::debug!(
            "Recording with {} channels and {} frames stored at {}",
            self.num_channels(),
            self.num_frames(),
            raw
        );
        Ok(RecordingObject::Bin1 {
            raw,
            raw_dtype: self.dtype,
            raw_num_channels: self.num_channels(),
            num_frames: self.num_frames(),
            samplerate: self.sampling_frequency,
            channel_ids: self.channel_ids.clone(),
            channel_positions: self.channel_locations.clone(),
        })
    }

    /// Load a recording from its descriptor.
    pub fn load(store: &ContentStore, object: &RecordingObject) -> Result<Recording, EphysError> {
        match object {
            RecordingObject::Bin1 {
                raw,
                raw_dtype,
                raw_num_channels,
                num_frames,
                samplerate,
                channel_ids,
                channel_positions,
            } => {
                let bytes = store.load_bytes(raw)?;
                let traces =
                    Self::traces_from_bytes(&bytes, *raw_dtype, *raw_num_channels, *num_frames)?;
                Recording::build(
                    channel_ids.clone(),
                    channel_positions.clone(),
                    *samplerate,
                    traces,
                    *raw_dtype,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_channel_recording(dtype: SampleDtype) -> Recording {
        Recording::build(
            vec![3, 7],
            vec![[0.0, 0.0], [0.0, 20.0]],
            1000.0,
            array![[1.2, -2.6, 40000.0], [0.5, 3.0, -7.0]],
            dtype,
        )
        .unwrap()
    }

    #[test]
    fn test_recording_build() {
        let recording = two_channel_recording(SampleDtype::Int16);
        assert_eq!(recording.num_channels(), 2);
        assert_eq!(recording.num_frames(), 3);
        assert_eq!(recording.channel_index(7), Some(1));
        assert_eq!(recording.channel_index(8), None);
        assert_eq!(recording.duration(), 0.003);
        // int16 samples are rounded and saturated
        assert_eq!(
            recording.traces(),
            array![[1.0f32, -3.0, 32767.0], [1.0, 3.0, -7.0]]
        );

        let recording = two_channel_recording(SampleDtype::Float32);
        assert_eq!(recording.traces()[[0, 0]], 1.2);
    }

    #[test]
    fn test_recording_build_invalid() {
        let traces = Array2::<f32>::zeros((2, 4));
        assert!(matches!(
            Recording::build(vec![0], vec![[0.0, 0.0]], 1000.0, traces.clone(), SampleDtype::Int16),
            Err(EphysError::InvalidParameter(_))
        ));
        assert!(matches!(
            Recording::build(vec![0, 0], vec![[0.0, 0.0]; 2], 1000.0, traces.clone(), SampleDtype::Int16),
            Err(EphysError::InvalidParameter(_))
        ));
        assert!(matches!(
            Recording::build(vec![0, 1], vec![[0.0, 0.0]; 2], 0.0, traces.clone(), SampleDtype::Int16),
            Err(EphysError::InvalidParameter(_))
        ));
        let mut traces = traces;
        traces[[1, 1]] = f32::NAN;
        assert!(matches!(
            Recording::build(vec![0, 1], vec![[0.0, 0.0]; 2], 1000.0, traces, SampleDtype::Int16),
            Err(EphysError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_sub_recording() {
        let recording = two_channel_recording(SampleDtype::Float32);
        let sub = recording.sub_recording(1, 10).unwrap();
        assert_eq!(sub.num_frames(), 2);
        assert_eq!(sub.traces(), array![[-2.6f32, 40000.0], [3.0, -7.0]]);
        assert!(recording.sub_recording(3, 2).is_err());
    }

    #[test]
    fn test_raw_bytes_layout() {
        let recording = two_channel_recording(SampleDtype::Int16);
        let bytes = recording.to_bytes();
        assert_eq!(bytes.len(), 12);
        // frame-major: channel 3 then channel 7 for the first frame
        assert_eq!(&bytes[0..4], &[1, 0, 1, 0]);

        let traces = Recording::traces_from_bytes(&bytes, SampleDtype::Int16, 2, 3).unwrap();
        assert_eq!(traces, recording.traces());

        assert!(matches!(
            Recording::traces_from_bytes(&bytes, SampleDtype::Int16, 2, 4),
            Err(EphysError::MalformedArray(_))
        ));
    }

    #[test]
    fn test_recording_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();

        let recording = two_channel_recording(SampleDtype::Float32);
        let object = recording.save(&store).unwrap();
        let RecordingObject::Bin1 { ref raw, .. } = object;
        assert!(raw.starts_with("sha256://"));
        assert_eq!(Recording::load(&store, &object).unwrap(), recording);

        let json = serde_json::to_value(&object).unwrap();
        assert_eq!(json["recording_format"], "bin1");
        assert_eq!(json["data"]["raw_dtype"], "float32");
    }
}
