//! Source kinds, stream descriptors and per-kind signal profiles

use crate::error::SimResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames held per ring buffer unless a stream asks for something else
pub const DEFAULT_BUFFER_FRAMES: usize = 48_000;

/// Highest accepted sample rate (10 MHz)
pub const MAX_SAMPLE_RATE: f64 = 10_000_000.0;

/// The kind of data a simulated source stands in for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Electrode action-potential band
    ElectrodeAp,
    /// Electrode local-field-potential band
    ElectrodeLfp,
    /// Analog input device (NIDAQ-style ADC channels)
    AnalogIn,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::ElectrodeAp,
        SourceKind::ElectrodeLfp,
        SourceKind::AnalogIn,
    ];

    /// Nominal sample rate of real hardware for this kind
    pub fn default_sample_rate(&self) -> f64 {
        match self {
            SourceKind::ElectrodeAp => 30_000.0,
            SourceKind::ElectrodeLfp => 2_500.0,
            SourceKind::AnalogIn => 30_000.0,
        }
    }

    /// Waveform parameters used by the generator for this kind
    pub fn profile(&self) -> SignalProfile {
        match self {
            // Small, fast content in microvolts
            SourceKind::ElectrodeAp => SignalProfile {
                base_frequency_hz: 1_000.0,
                frequency_step_hz: 25.0,
                amplitude: 60.0,
                noise_std: 12.0,
                powerline_amplitude: 5.0,
                limit: 512.0,
                unit: "uV",
            },
            SourceKind::ElectrodeLfp => SignalProfile {
                base_frequency_hz: 4.0,
                frequency_step_hz: 0.5,
                amplitude: 250.0,
                noise_std: 20.0,
                powerline_amplitude: 15.0,
                limit: 2_048.0,
                unit: "uV",
            },
            // Wide, slow content in volts
            SourceKind::AnalogIn => SignalProfile {
                base_frequency_hz: 0.5,
                frequency_step_hz: 0.25,
                amplitude: 2.5,
                noise_std: 0.01,
                powerline_amplitude: 0.0,
                limit: 5.0,
                unit: "V",
            },
        }
    }

    /// Short label used in logs and stream names
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::ElectrodeAp => "AP",
            SourceKind::ElectrodeLfp => "LFP",
            SourceKind::AnalogIn => "AI",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::ElectrodeAp => write!(f, "Electrode AP band"),
            SourceKind::ElectrodeLfp => write!(f, "Electrode LFP band"),
            SourceKind::AnalogIn => write!(f, "Analog input"),
        }
    }
}

/// Waveform parameters for one source kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalProfile {
    /// Sine frequency of channel 0
    pub base_frequency_hz: f64,
    /// Frequency added per channel index
    pub frequency_step_hz: f64,
    /// Sine amplitude
    pub amplitude: f32,
    /// Gaussian noise standard deviation
    pub noise_std: f32,
    /// Mains hum amplitude (0.0 disables it for this kind)
    pub powerline_amplitude: f32,
    /// Output values are clamped to `-limit..=limit`
    pub limit: f32,
    /// Physical unit of the values
    pub unit: &'static str,
}

impl SignalProfile {
    /// Sine frequency for a channel
    pub fn channel_frequency(&self, channel_idx: usize) -> f64 {
        self.base_frequency_hz + channel_idx as f64 * self.frequency_step_hz
    }
}

/// Opaque identifier of a source within a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceHandle(Uuid);

impl SourceHandle {
    pub fn new() -> Self {
        SourceHandle(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SourceHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to construct one simulated stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Stream name, e.g. `Probe-A-AP`
    pub name: String,
    pub kind: SourceKind,
    pub channel_count: usize,
    /// Nominal sample rate in Hz
    pub sample_rate: f64,
    /// Ring buffer capacity in frames
    pub buffer_frames: usize,
}

impl SourceSpec {
    /// Spec with the kind's default buffer capacity
    pub fn new(name: impl Into<String>, kind: SourceKind, channel_count: usize, sample_rate: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            channel_count,
            sample_rate,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
        }
    }

    pub fn with_buffer_frames(mut self, buffer_frames: usize) -> Self {
        self.buffer_frames = buffer_frames;
        self
    }

    /// Validate channel count, sample rate and buffer capacity
    pub fn validate(&self) -> SimResult<()> {
        validate_channel_count(self.channel_count)?;
        validate_sample_rate(self.sample_rate)?;
        if self.buffer_frames == 0 {
            return Err(crate::config_error!(
                "stream '{}' needs a buffer of at least one frame",
                self.name
            ));
        }
        Ok(())
    }
}

/// Validate channel count for a stream
pub fn validate_channel_count(count: usize) -> SimResult<()> {
    if count == 0 {
        Err(crate::config_error!("channel count must be positive, got 0"))
    } else {
        Ok(())
    }
}

/// Validate a nominal sample rate
pub fn validate_sample_rate(rate: f64) -> SimResult<()> {
    if !rate.is_finite() || rate <= 0.0 || rate > MAX_SAMPLE_RATE {
        Err(crate::config_error!(
            "sample rate must be positive and at most {}Hz, got {}Hz",
            MAX_SAMPLE_RATE,
            rate
        ))
    } else {
        Ok(())
    }
}

/// Description of a live stream handed to a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub handle: SourceHandle,
    pub name: String,
    pub kind: SourceKind,
    pub channel_count: usize,
    pub sample_rate: f64,
    pub buffer_frames: usize,
}
