//! Acquisition configuration: how many probes and devices to simulate

use crate::clock::ClockSettings;
use crate::generator::GeneratorSettings;
use ephys_core::{config_error, validate_sample_rate, SimResult, SourceKind, SourceSpec, DEFAULT_BUFFER_FRAMES};
use serde::{Deserialize, Serialize};

/// Probe letters; a rig holds at most this many probes
pub const PROBE_LETTERS: [char; 16] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P',
];

/// Full description of a simulated rig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Electrode probes; each contributes an AP and an LFP stream
    pub num_probes: usize,
    pub channels_per_probe: usize,
    /// Analog input devices; each contributes one stream
    pub num_nidaq: usize,
    pub channels_per_nidaq: usize,
    pub ap_sample_rate: f64,
    pub lfp_sample_rate: f64,
    pub nidaq_sample_rate: f64,
    /// Ring buffer capacity per stream, in frames
    pub buffer_frames: usize,
    pub generator: GeneratorSettings,
    pub clock: ClockSettings,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            num_probes: 1,
            channels_per_probe: 384,
            num_nidaq: 1,
            channels_per_nidaq: 8,
            ap_sample_rate: SourceKind::ElectrodeAp.default_sample_rate(),
            lfp_sample_rate: SourceKind::ElectrodeLfp.default_sample_rate(),
            nidaq_sample_rate: SourceKind::AnalogIn.default_sample_rate(),
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            generator: GeneratorSettings::default(),
            clock: ClockSettings::default(),
        }
    }
}

/// Preset configurations for common rigs
impl AcquisitionConfig {
    /// Six 384-channel probes and one 8-channel NIDAQ
    pub fn neuropixels_rig() -> Self {
        Self {
            num_probes: 6,
            ..Default::default()
        }
    }

    /// A light rig for development machines and tests
    pub fn minimal() -> Self {
        Self {
            num_probes: 1,
            channels_per_probe: 32,
            ..Default::default()
        }
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "minimal" => Some(Self::minimal()),
            "neuropixels" => Some(Self::neuropixels_rig()),
            _ => None,
        }
    }

    pub fn preset_names() -> &'static [&'static str] {
        &["default", "minimal", "neuropixels"]
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> SimResult<()> {
        if self.num_probes > PROBE_LETTERS.len() {
            return Err(config_error!(
                "at most {} probes are supported, got {}",
                PROBE_LETTERS.len(),
                self.num_probes
            ));
        }
        if self.num_probes > 0 && self.channels_per_probe == 0 {
            return Err(config_error!("probes need at least one channel"));
        }
        if self.num_nidaq > 0 && self.channels_per_nidaq == 0 {
            return Err(config_error!("NIDAQ devices need at least one channel"));
        }
        if self.stream_count() == 0 {
            return Err(config_error!("configuration has no streams"));
        }
        if self.buffer_frames == 0 {
            return Err(config_error!("buffer must hold at least one frame"));
        }

        if self.num_probes > 0 {
            validate_sample_rate(self.ap_sample_rate)?;
            validate_sample_rate(self.lfp_sample_rate)?;
        }
        if self.num_nidaq > 0 {
            validate_sample_rate(self.nidaq_sample_rate)?;
        }

        self.generator.validate()?;
        self.clock.validate()
    }

    /// Number of streams this configuration produces
    pub fn stream_count(&self) -> usize {
        self.num_probes * 2 + self.num_nidaq
    }

    /// Total channels across every stream
    pub fn total_channels(&self) -> usize {
        self.num_probes * self.channels_per_probe * 2 + self.num_nidaq * self.channels_per_nidaq
    }

    /// Streams in host order: AP then LFP for each probe, then each NIDAQ device
    pub fn layout(&self) -> SimResult<Vec<SourceSpec>> {
        self.validate()?;

        let mut specs = Vec::with_capacity(self.stream_count());

        for letter in PROBE_LETTERS.iter().take(self.num_probes) {
            specs.push(
                SourceSpec::new(
                    format!("Probe-{}-AP", letter),
                    SourceKind::ElectrodeAp,
                    self.channels_per_probe,
                    self.ap_sample_rate,
                )
                .with_buffer_frames(self.buffer_frames),
            );
            specs.push(
                SourceSpec::new(
                    format!("Probe-{}-LFP", letter),
                    SourceKind::ElectrodeLfp,
                    self.channels_per_probe,
                    self.lfp_sample_rate,
                )
                .with_buffer_frames(self.buffer_frames),
            );
        }

        for device in 0..self.num_nidaq {
            specs.push(
                SourceSpec::new(
                    format!("Dev{}", device),
                    SourceKind::AnalogIn,
                    self.channels_per_nidaq,
                    self.nidaq_sample_rate,
                )
                .with_buffer_frames(self.buffer_frames),
            );
        }

        Ok(specs)
    }

    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> SimResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| config_error!("Failed to parse configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> SimResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| config_error!("Failed to serialize configuration: {}", e))
    }
}
