//! Per-channel synthetic signal generator
//!
//! Every channel is a sinusoid at a channel-dependent frequency with a seeded
//! random phase, plus Gaussian noise and optional mains hum, clamped to the
//! kind's range. The same seed always yields the same samples.

use ephys_core::{
    config_error, validate_channel_count, validate_sample_rate, FrameBlock, SignalProfile, SimResult,
    SourceKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::time::Duration;

/// Bit of the event word carrying the sync line
pub const SYNC_LINE_BIT: u64 = 1;

/// Generation settings shared by every source of an acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    /// Random seed for reproducibility (None derives one from the wall clock)
    pub seed: Option<u64>,
    /// Power line interference (50/60Hz)
    pub powerline_hz: Option<f32>,
    /// Period of the sync square wave in seconds
    pub sync_period_s: f64,
    /// Time between generation batches in milliseconds
    pub batch_period_ms: u64,
    /// Most batches a late iteration may catch up on; older frames are skipped
    pub max_catchup_batches: u32,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            seed: None,
            powerline_hz: Some(60.0),
            sync_period_s: 1.0,
            batch_period_ms: 25,
            max_catchup_batches: 4,
        }
    }
}

impl GeneratorSettings {
    /// Settings with a fixed seed
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        if !(1..=1_000).contains(&self.batch_period_ms) {
            return Err(config_error!(
                "batch period must be between 1 and 1000 ms, got {}",
                self.batch_period_ms
            ));
        }
        if self.max_catchup_batches == 0 {
            return Err(config_error!("max_catchup_batches must be at least 1"));
        }
        if !self.sync_period_s.is_finite() || self.sync_period_s <= 0.0 {
            return Err(config_error!("sync period must be positive, got {}s", self.sync_period_s));
        }
        if let Some(hz) = self.powerline_hz {
            if !hz.is_finite() || hz <= 0.0 {
                return Err(config_error!("powerline frequency must be positive, got {}Hz", hz));
            }
        }
        Ok(())
    }

    pub fn batch_period(&self) -> Duration {
        Duration::from_millis(self.batch_period_ms)
    }

    /// The configured seed, or one derived from the wall clock
    pub fn resolved_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default()
        })
    }
}

fn sync_half_period(sync_period_s: f64, sample_rate: f64) -> i64 {
    ((sync_period_s * sample_rate) / 2.0).round().max(1.0) as i64
}

/// Unit phasor rotated by a fixed step per sample
#[derive(Debug, Clone)]
struct Phasor {
    re: f64,
    im: f64,
    step_re: f64,
    step_im: f64,
}

impl Phasor {
    /// Phasor of `frequency` positioned at `time` seconds
    fn at(frequency: f64, sample_rate: f64, initial_phase: f64, time: f64) -> Self {
        let cycles = (time * frequency).fract();
        let phase = initial_phase + TAU * cycles;
        let step = TAU * frequency / sample_rate;
        Phasor {
            re: phase.cos(),
            im: phase.sin(),
            step_re: step.cos(),
            step_im: step.sin(),
        }
    }

    /// Current sine value, then rotate one sample
    #[inline]
    fn next(&mut self) -> f64 {
        let value = self.im;
        let re = self.re * self.step_re - self.im * self.step_im;
        self.im = self.re * self.step_im + self.im * self.step_re;
        self.re = re;
        value
    }

    fn renormalize(&mut self) {
        let norm = (self.re * self.re + self.im * self.im).sqrt();
        if norm > 0.0 {
            self.re /= norm;
            self.im /= norm;
        }
    }
}

/// Synthesises frames for one stream
pub struct SignalGenerator {
    kind: SourceKind,
    profile: SignalProfile,
    channel_count: usize,
    sample_rate: f64,
    seed: u64,
    powerline_hz: Option<f32>,
    sync_period_s: f64,
    rng: StdRng,
    noise: Normal<f32>,
    phases: Vec<f64>,
    oscillators: Vec<Phasor>,
    hum: Option<Phasor>,
    sync_half_period: i64,
    sample_number: i64,
    /// Sample number and time of the last rate change
    origin_sample: i64,
    origin_time: f64,
    scratch: Vec<f32>,
}

impl SignalGenerator {
    /// Create new generator with configuration
    pub fn new(
        kind: SourceKind,
        channel_count: usize,
        sample_rate: f64,
        settings: &GeneratorSettings,
    ) -> SimResult<Self> {
        validate_channel_count(channel_count)?;
        validate_sample_rate(sample_rate)?;
        settings.validate()?;

        let profile = kind.profile();
        let noise = Normal::new(0.0, profile.noise_std)
            .map_err(|e| config_error!("Failed to create noise distribution: {}", e))?;

        let mut generator = SignalGenerator {
            kind,
            profile,
            channel_count,
            sample_rate,
            seed: settings.resolved_seed(),
            powerline_hz: settings.powerline_hz,
            sync_period_s: settings.sync_period_s,
            rng: StdRng::seed_from_u64(0),
            noise,
            phases: Vec::with_capacity(channel_count),
            oscillators: Vec::with_capacity(channel_count),
            hum: None,
            sync_half_period: sync_half_period(settings.sync_period_s, sample_rate),
            sample_number: 0,
            origin_sample: 0,
            origin_time: 0.0,
            scratch: vec![0.0; channel_count],
        };
        generator.reset();
        Ok(generator)
    }

    /// Rewind to sample 0 and re-seed, reproducing the stream from the start.
    /// The current sample rate is kept.
    pub fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.phases = (0..self.channel_count)
            .map(|_| self.rng.gen_range(0.0..TAU))
            .collect();
        self.sample_number = 0;
        self.origin_sample = 0;
        self.origin_time = 0.0;
        self.position_oscillators();
    }

    /// Continue the stream at a new rate. Sample numbers keep counting and
    /// timestamps stay continuous across the change.
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> SimResult<()> {
        validate_sample_rate(sample_rate)?;

        self.origin_time = self.timestamp_of(self.sample_number);
        self.origin_sample = self.sample_number;
        self.sample_rate = sample_rate;
        self.sync_half_period = sync_half_period(self.sync_period_s, sample_rate);
        self.position_oscillators();
        Ok(())
    }

    /// Seconds since acquisition start for `sample_number`
    fn timestamp_of(&self, sample_number: i64) -> f64 {
        self.origin_time + (sample_number - self.origin_sample) as f64 / self.sample_rate
    }

    /// Advance time by `frames` without producing data
    pub fn skip(&mut self, frames: u64) {
        self.sample_number = self.sample_number.saturating_add(frames as i64);
        self.position_oscillators();
    }

    fn position_oscillators(&mut self) {
        let t = self.timestamp_of(self.sample_number);
        self.oscillators = self
            .phases
            .iter()
            .enumerate()
            .map(|(ch, &phase)| Phasor::at(self.profile.channel_frequency(ch), self.sample_rate, phase, t))
            .collect();
        self.hum = self
            .powerline_hz
            .filter(|_| self.profile.powerline_amplitude > 0.0)
            .map(|hz| Phasor::at(hz as f64, self.sample_rate, 0.0, t));
    }

    /// Synthesise the next `frame_count` frames
    pub fn generate(&mut self, frame_count: usize) -> FrameBlock {
        let mut block = FrameBlock::with_capacity(self.channel_count, frame_count);
        let amplitude = self.profile.amplitude;
        let limit = self.profile.limit;

        for _ in 0..frame_count {
            let hum = match self.hum.as_mut() {
                Some(phasor) => self.profile.powerline_amplitude * phasor.next() as f32,
                None => 0.0,
            };

            for (value, osc) in self.scratch.iter_mut().zip(self.oscillators.iter_mut()) {
                let signal = amplitude * osc.next() as f32 + self.noise.sample(&mut self.rng) + hum;
                *value = signal.clamp(-limit, limit);
            }

            let timestamp = self.timestamp_of(self.sample_number);
            block.push_frame(&self.scratch, self.sample_number, timestamp, self.event_word());
            self.sample_number += 1;
        }

        for osc in &mut self.oscillators {
            osc.renormalize();
        }
        if let Some(hum) = self.hum.as_mut() {
            hum.renormalize();
        }

        block
    }

    /// TTL state for the current sample: the sync line starts high
    fn event_word(&self) -> u64 {
        if (self.sample_number / self.sync_half_period) % 2 == 0 {
            SYNC_LINE_BIT
        } else {
            0
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Sample number of the next frame
    pub fn sample_number(&self) -> i64 {
        self.sample_number
    }

    pub fn profile(&self) -> &SignalProfile {
        &self.profile
    }
}

impl std::fmt::Debug for SignalGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalGenerator")
            .field("kind", &self.kind)
            .field("channel_count", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .field("seed", &self.seed)
            .field("sample_number", &self.sample_number)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_basic() {
        let mut generator =
            SignalGenerator::new(SourceKind::ElectrodeAp, 4, 30_000.0, &GeneratorSettings::seeded(1)).unwrap();

        let block = generator.generate(750);
        assert_eq!(block.frame_count(), 750);
        assert_eq!(block.channel_count(), 4);
        assert_eq!(block.sample_numbers()[0], 0);
        assert_eq!(block.sample_numbers()[749], 749);
        assert_eq!(generator.sample_number(), 750);

        let next = generator.generate(10);
        assert_eq!(next.sample_numbers()[0], 750);
        assert!((next.timestamps()[0] - 750.0 / 30_000.0).abs() < 1e-12);
    }

    #[test]
    fn test_values_bounded_for_every_kind() {
        for kind in SourceKind::ALL {
            let rate = kind.default_sample_rate();
            let mut generator = SignalGenerator::new(kind, 16, rate, &GeneratorSettings::seeded(7)).unwrap();
            let limit = kind.profile().limit;

            for _ in 0..5 {
                let block = generator.generate(2_000);
                assert!(block.samples().iter().all(|v| v.is_finite() && v.abs() <= limit));
            }
        }
    }

    #[test]
    fn test_reproducible_given_seed() {
        let settings = GeneratorSettings::seeded(42);
        let mut a = SignalGenerator::new(SourceKind::ElectrodeLfp, 8, 2_500.0, &settings).unwrap();
        let mut b = SignalGenerator::new(SourceKind::ElectrodeLfp, 8, 2_500.0, &settings).unwrap();
        assert_eq!(a.generate(500), b.generate(500));
        assert_eq!(a.generate(123), b.generate(123));

        let mut c = SignalGenerator::new(SourceKind::ElectrodeLfp, 8, 2_500.0, &GeneratorSettings::seeded(43)).unwrap();
        let mut fresh = SignalGenerator::new(SourceKind::ElectrodeLfp, 8, 2_500.0, &settings).unwrap();
        assert_ne!(fresh.generate(500), c.generate(500));
    }

    #[test]
    fn test_reset_replays_stream() {
        let mut generator =
            SignalGenerator::new(SourceKind::AnalogIn, 3, 1_000.0, &GeneratorSettings::seeded(5)).unwrap();
        let first = generator.generate(300);
        generator.generate(300);

        generator.reset();
        assert_eq!(generator.sample_number(), 0);
        assert_eq!(generator.generate(300), first);
    }

    #[test]
    fn test_channels_are_distinct() {
        let mut generator =
            SignalGenerator::new(SourceKind::ElectrodeAp, 6, 30_000.0, &GeneratorSettings::seeded(3)).unwrap();
        let channels = generator.generate(1_000).all_channels();

        for i in 0..channels.len() {
            for j in (i + 1)..channels.len() {
                assert_ne!(channels[i], channels[j], "channels {} and {} are identical", i, j);
            }
        }
    }

    #[test]
    fn test_sync_line_square_wave() {
        let settings = GeneratorSettings {
            sync_period_s: 1.0,
            ..GeneratorSettings::seeded(0)
        };
        let mut generator = SignalGenerator::new(SourceKind::AnalogIn, 1, 1_000.0, &settings).unwrap();
        let words = generator.generate(2_000).event_words().to_vec();

        assert!(words[..500].iter().all(|&w| w & SYNC_LINE_BIT == SYNC_LINE_BIT));
        assert!(words[500..1_000].iter().all(|&w| w & SYNC_LINE_BIT == 0));
        assert!(words[1_000..1_500].iter().all(|&w| w & SYNC_LINE_BIT == SYNC_LINE_BIT));
    }

    #[test]
    fn test_skip_advances_time() {
        let settings = GeneratorSettings::seeded(11);
        let mut generator = SignalGenerator::new(SourceKind::ElectrodeLfp, 2, 2_500.0, &settings).unwrap();
        generator.generate(10);
        generator.skip(90);
        let block = generator.generate(5);
        assert_eq!(block.sample_numbers(), &[100, 101, 102, 103, 104]);
    }

    #[test]
    fn test_sine_tracks_phase_after_skip() {
        // Skipping lands on the same sine phase as generating every frame.
        // Noise streams differ after a skip, so compare within a tolerance.
        let settings = GeneratorSettings {
            powerline_hz: None,
            ..GeneratorSettings::seeded(8)
        };
        let mut continuous = SignalGenerator::new(SourceKind::AnalogIn, 1, 1_000.0, &settings).unwrap();
        let mut skipping = SignalGenerator::new(SourceKind::AnalogIn, 1, 1_000.0, &settings).unwrap();

        let full = continuous.generate(1_000);
        skipping.skip(900);
        let tail = skipping.generate(100);

        let amplitude = SourceKind::AnalogIn.profile().amplitude;
        for i in 0..100 {
            let expected = full.frame(900 + i).unwrap()[0];
            let actual = tail.frame(i).unwrap()[0];
            assert!((expected - actual).abs() < 0.1 * amplitude);
        }
    }

    #[test]
    fn test_rate_change_keeps_stream_continuous() {
        let mut generator =
            SignalGenerator::new(SourceKind::AnalogIn, 2, 1_000.0, &GeneratorSettings::seeded(4)).unwrap();
        generator.generate(100);

        generator.set_sample_rate(10_000.0).unwrap();
        assert_eq!(generator.sample_rate(), 10_000.0);

        let block = generator.generate(50);
        assert_eq!(block.sample_numbers()[0], 100);
        assert!((block.timestamps()[0] - 0.1).abs() < 1e-12);
        assert!((block.timestamps()[1] - block.timestamps()[0] - 1e-4).abs() < 1e-12);
        assert!((block.timestamps()[49] - (0.1 + 49.0 * 1e-4)).abs() < 1e-12);

        // Reset rewinds time but keeps the new rate
        generator.reset();
        let block = generator.generate(2);
        assert_eq!(block.timestamps()[1], 1e-4);

        assert!(generator.set_sample_rate(0.0).is_err());
        assert_eq!(generator.sample_rate(), 10_000.0);
    }

    #[test]
    fn test_invalid_configuration() {
        let settings = GeneratorSettings::seeded(0);
        assert!(SignalGenerator::new(SourceKind::ElectrodeAp, 0, 30_000.0, &settings).is_err());
        assert!(SignalGenerator::new(SourceKind::ElectrodeAp, 4, 0.0, &settings).is_err());

        let bad_batch = GeneratorSettings {
            batch_period_ms: 0,
            ..GeneratorSettings::seeded(0)
        };
        assert!(SignalGenerator::new(SourceKind::ElectrodeAp, 4, 30_000.0, &bad_batch).is_err());

        let bad_sync = GeneratorSettings {
            sync_period_s: -1.0,
            ..GeneratorSettings::seeded(0)
        };
        assert!(bad_sync.validate().is_err());
    }
}
