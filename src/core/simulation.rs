//! Toy recordings with known ground truth.
//!
//! Units are placed along a linear probe. Each unit fires as a Poisson process with an absolute
//! refractory period, and every spike adds a biphasic template to all channels, attenuated
//! exponentially with the distance between the unit and the channel. Gaussian noise is added
//! independently on each channel.
//!
//! # Examples
//!
//! ```rust
//! use rusty_ephys::core::simulation::{simulate, SimulationConfig};
//!
//! let config = SimulationConfig {
//!     duration_sec: 1.0,
//!     num_channels: 4,
//!     num_units: 3,
//!     ..SimulationConfig::default()
//! };
//! let (recording, sorting) = simulate(&config).unwrap();
//! assert_eq!(recording.num_frames(), 30000);
//! assert_eq!(recording.channel_ids(), &[0, 1, 2, 3]);
//! assert_eq!(sorting.unit_ids(), vec![1, 2, 3]);
//! ```
use std::collections::BTreeMap;

use ndarray::Array2;
use rand::Rng;
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};
use rand_distr::{Distribution, Exp, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::recording::{Recording, SampleDtype};
use crate::core::sorting::Sorting;
use crate::core::utils::distance;
use crate::core::{ChannelId, UnitId, MIN_CHANNELS_PAR};
use crate::error::EphysError;

/// Template duration before the spike peak, in milliseconds.
const TEMPLATE_PRE_MS: f64 = 1.0;
/// Template duration after the spike peak, in milliseconds.
const TEMPLATE_POST_MS: f64 = 2.0;
/// Maximum lateral offset of a unit from the probe axis, in micrometres.
const MAX_LATERAL_OFFSET_UM: f64 = 20.0;

/// Parameters of a simulated recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub duration_sec: f64,
    pub num_channels: usize,
    pub num_units: usize,
    pub seed: u64,
    pub sampling_frequency: f64,
    /// Standard deviation of the channel noise.
    pub noise_level: f64,
    /// Range of the unit firing rates, in Hz.
    pub firing_rate_range: (f64, f64),
    pub refractory_period_ms: f64,
    /// Range of the unit peak amplitudes, at zero distance.
    pub amplitude_range: (f64, f64),
    pub channel_spacing_um: f64,
    /// Distance over which the amplitude of a unit decays by a factor e.
    pub decay_length_um: f64,
    pub dtype: SampleDtype,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            duration_sec: 50.0,
            num_channels: 8,
            num_units: 5,
            seed: 1,
            sampling_frequency: 30000.0,
            noise_level: 10.0,
            firing_rate_range: (2.0, 6.0),
            refractory_period_ms: 4.0,
            amplitude_range: (80.0, 200.0),
            channel_spacing_um: 20.0,
            decay_length_um: 30.0,
            dtype: SampleDtype::Int16,
        }
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn is_range(range: (f64, f64)) -> bool {
    range.0.is_finite() && range.1.is_finite() && range.0 <= range.1
}

impl SimulationConfig {
    /// The function returns an error if some parameter is out of its domain.
    pub fn validate(&self) -> Result<(), EphysError> {
        let invalid = |message: &str| Err(EphysError::InvalidParameter(message.to_string()));
        if !is_positive(self.duration_sec) {
            return invalid("duration_sec must be positive");
        }
        if !is_positive(self.sampling_frequency) {
            return invalid("sampling_frequency must be positive");
        }
        if self.num_channels == 0 {
            return invalid("num_channels must be at least 1");
        }
        if !(self.noise_level.is_finite() && self.noise_level >= 0.0) {
            return invalid("noise_level must be non-negative");
        }
        if !is_range(self.firing_rate_range) || self.firing_rate_range.0 <= 0.0 {
            return invalid("firing_rate_range must be an ordered range of positive rates");
        }
        if !(self.refractory_period_ms.is_finite() && self.refractory_period_ms >= 0.0) {
            return invalid("refractory_period_ms must be non-negative");
        }
        if !is_range(self.amplitude_range) {
            return invalid("amplitude_range must be an ordered range");
        }
        if !(self.channel_spacing_um.is_finite() && self.channel_spacing_um >= 0.0) {
            return invalid("channel_spacing_um must be non-negative");
        }
        if !is_positive(self.decay_length_um) {
            return invalid("decay_length_um must be positive");
        }
        Ok(())
    }

    /// Number of frames of the simulated recording.
    pub fn num_frames(&self) -> usize {
        (self.duration_sec * self.sampling_frequency).round() as usize
    }
}

/// Channel locations of a linear probe, along the second coordinate.
pub fn linear_probe(num_channels: usize, spacing_um: f64) -> Vec<[f64; 2]> {
    (0..num_channels)
        .map(|c| [0.0, c as f64 * spacing_um])
        .collect()
}

/// A biphasic spike template (a sharp trough followed by a slower positive bump), normalized
/// to a unit peak amplitude. Returns the template and the index of its trough.
pub fn spike_template(sampling_frequency: f64) -> (Vec<f64>, usize) {
    let num_pre = (TEMPLATE_PRE_MS * sampling_frequency / 1000.0).round() as usize;
    let num_post = (TEMPLATE_POST_MS * sampling_frequency / 1000.0).round() as usize;
    let gaussian = |t: f64, center: f64, width: f64| (-(t - center).powi(2) / (2.0 * width.powi(2))).exp();

    let template: Vec<f64> = (0..num_pre + num_post)
        .map(|k| {
            let t = (k as f64 - num_pre as f64) * 1000.0 / sampling_frequency;
            -gaussian(t, 0.0, 0.15) + 0.35 * gaussian(t, 0.45, 0.35)
        })
        .collect();
    let peak = template.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if peak > 0.0 {
        (template.into_iter().map(|v| v / peak).collect(), num_pre)
    } else {
        (template, num_pre)
    }
}

/// Sample the spike frames of a Poisson process with an absolute refractory period.
pub fn sample_spike_train<R: Rng>(
    rng: &mut R,
    firing_rate: f64,
    refractory_period: f64,
    duration: f64,
    sampling_frequency: f64,
) -> Result<Vec<u64>, EphysError> {
    let exp = Exp::new(firing_rate).map_err(|e| EphysError::InvalidParameter(e.to_string()))?;
    let mut frames = Vec::new();
    let mut t = exp.sample(rng);
    while t < duration {
        frames.push((t * sampling_frequency) as u64);
        t += refractory_period + exp.sample(rng);
    }
    Ok(frames)
}

/// The parameters of a simulated unit.
#[derive(Debug, Clone)]
struct UnitModel {
    location: [f64; 2],
    amplitude: f64,
    frames: Vec<u64>,
}

/// Simulate a recording and its ground-truth sorting.
///
/// Units have ids `1..=num_units` and channels have ids `0..num_channels`. The same configuration
/// always yields the same recording and sorting.
pub fn simulate(config: &SimulationConfig) -> Result<(Recording, Sorting), EphysError> {
    config.validate()?;
    log::info!(
        "Simulating {} s on {} channels with {} units (seed {})",
        config.duration_sec,
        config.num_channels,
        config.num_units,
        config.seed
    );

    let num_frames = config.num_frames();
    let channel_ids: Vec<ChannelId> = (0..config.num_channels as ChannelId).collect();
    let locations = linear_probe(config.num_channels, config.channel_spacing_um);
    let probe_length = (config.num_channels - 1) as f64 * config.channel_spacing_um;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut units = Vec::with_capacity(config.num_units);
    for _ in 0..config.num_units {
        let location = [
            rng.gen_range(-MAX_LATERAL_OFFSET_UM..=MAX_LATERAL_OFFSET_UM),
            rng.gen_range(0.0..=probe_length),
        ];
        let amplitude = rng.gen_range(config.amplitude_range.0..=config.amplitude_range.1);
        let firing_rate = rng.gen_range(config.firing_rate_range.0..=config.firing_rate_range.1);
        let frames = sample_spike_train(
            &mut rng,
            firing_rate,
            config.refractory_period_ms / 1000.0,
            num_frames as f64 / config.sampling_frequency,
            config.sampling_frequency,
        )?;
        units.push(UnitModel {
            location,
            amplitude,
            frames,
        });
    }

    let (template, trough) = spike_template(config.sampling_frequency);
    let noise = Normal::new(0.0, config.noise_level)
        .map_err(|e| EphysError::InvalidParameter(e.to_string()))?;

    let channel_trace = |c: usize| -> Vec<f32> {
        // every channel has its own noise stream, independent of the evaluation order
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        rng.set_stream(c as u64 + 1);
        let mut trace: Vec<f64> = (0..num_frames).map(|_| noise.sample(&mut rng)).collect();
        for unit in units.iter() {
            let gain = unit.amplitude * (-distance(&unit.location, &locations[c]) / config.decay_length_um).exp();
            for &frame in unit.frames.iter() {
                for (k, w) in template.iter().enumerate() {
                    let Some(i) = (frame as usize + k).checked_sub(trough) else {
                        continue;
                    };
                    if i >= num_frames {
                        break;
                    }
                    trace[i] += gain * w;
                }
            }
        }
        trace.into_iter().map(|v| v as f32).collect()
    };

    let rows: Vec<Vec<f32>> = if config.num_channels >= MIN_CHANNELS_PAR {
        (0..config.num_channels).into_par_iter().map(channel_trace).collect()
    } else {
        (0..config.num_channels).map(channel_trace).collect()
    };
    let traces = Array2::from_shape_vec((config.num_channels, num_frames), rows.concat())
        .map_err(|e| EphysError::InvalidParameter(e.to_string()))?;

    let recording = Recording::build(channel_ids, locations, config.sampling_frequency, traces, config.dtype)?;
    let spike_trains: BTreeMap<UnitId, Vec<u64>> = units
        .into_iter()
        .enumerate()
        .map(|(i, unit)| (i as UnitId + 1, unit.frames))
        .collect();
    let sorting = Sorting::build(config.sampling_frequency, spike_trains)?;
    log::info!(
        "Simulated {} frames and {} spikes",
        recording.num_frames(),
        sorting.num_spikes()
    );

    Ok((recording, sorting))
}
