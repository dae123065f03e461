//! Sample clock: nominal rate, crystal tolerance and clock gating
//!
//! Real acquisition hardware never runs exactly at its nominal rate. Each
//! simulated source draws a fixed frequency offset within the configured
//! tolerance, and a host can gate the clock or retune it while the source
//! is running. All runtime controls are atomics so the generation thread
//! never waits on them.

use ephys_core::{config_error, validate_sample_rate, SimResult};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Largest accepted tolerance (10 %)
pub const MAX_TOLERANCE_PPM: f64 = 100_000.0;

/// Clock configuration shared by every source of an acquisition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSettings {
    /// A disabled clock produces no frames
    pub enabled: bool,
    /// Frequency tolerance in parts per million
    pub tolerance_ppm: f64,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tolerance_ppm: 0.0,
        }
    }
}

impl ClockSettings {
    pub fn validate(&self) -> SimResult<()> {
        validate_tolerance(self.tolerance_ppm)
    }
}

fn validate_tolerance(tolerance_ppm: f64) -> SimResult<()> {
    if !tolerance_ppm.is_finite() || !(0.0..=MAX_TOLERANCE_PPM).contains(&tolerance_ppm) {
        Err(config_error!(
            "clock tolerance must be between 0 and {} ppm, got {}",
            MAX_TOLERANCE_PPM,
            tolerance_ppm
        ))
    } else {
        Ok(())
    }
}

/// Per-source sample clock
pub struct SampleClock {
    nominal_rate: AtomicU64,
    offset_ppm: AtomicU64,
    enabled: AtomicBool,
    rng: Mutex<StdRng>,
}

impl SampleClock {
    pub fn new(nominal_rate: f64, settings: ClockSettings, seed: u64) -> SimResult<Self> {
        validate_sample_rate(nominal_rate)?;
        settings.validate()?;

        let mut rng = StdRng::seed_from_u64(seed);
        let offset = draw_offset(&mut rng, settings.tolerance_ppm);

        Ok(SampleClock {
            nominal_rate: AtomicU64::new(nominal_rate.to_bits()),
            offset_ppm: AtomicU64::new(offset.to_bits()),
            enabled: AtomicBool::new(settings.enabled),
            rng: Mutex::new(rng),
        })
    }

    pub fn nominal_rate(&self) -> f64 {
        f64::from_bits(self.nominal_rate.load(Ordering::Relaxed))
    }

    /// Frequency offset drawn for this clock
    pub fn offset_ppm(&self) -> f64 {
        f64::from_bits(self.offset_ppm.load(Ordering::Relaxed))
    }

    /// Rate the source actually runs at
    pub fn effective_rate(&self) -> f64 {
        self.nominal_rate() * (1.0 + self.offset_ppm() * 1e-6)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Gate the clock on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Retune the clock and draw a new offset within `tolerance_ppm`
    pub fn update_frequency(&self, nominal_rate: f64, tolerance_ppm: f64) -> SimResult<()> {
        validate_sample_rate(nominal_rate)?;
        validate_tolerance(tolerance_ppm)?;

        let offset = draw_offset(&mut self.rng.lock(), tolerance_ppm);
        self.nominal_rate.store(nominal_rate.to_bits(), Ordering::Relaxed);
        self.offset_ppm.store(offset.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for SampleClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleClock")
            .field("nominal_rate", &self.nominal_rate())
            .field("offset_ppm", &self.offset_ppm())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn draw_offset(rng: &mut StdRng, tolerance_ppm: f64) -> f64 {
    if tolerance_ppm > 0.0 {
        rng.gen_range(-tolerance_ppm..=tolerance_ppm)
    } else {
        0.0
    }
}

/// Turns elapsed wall-clock time into whole frames.
///
/// Fractional frames carry over between calls so rounding never accumulates.
#[derive(Debug, Default)]
pub struct FramePacer {
    carry: f64,
}

impl FramePacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames due for `elapsed` at the clock's current rate
    pub fn advance(&mut self, clock: &SampleClock, elapsed: Duration) -> u64 {
        if !clock.is_enabled() {
            self.carry = 0.0;
            return 0;
        }

        self.carry += elapsed.as_secs_f64() * clock.effective_rate();
        let whole = self.carry.floor();
        self.carry -= whole;
        whole as u64
    }
}
