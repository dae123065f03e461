//! Simulated source: one generation thread feeding one ring buffer
//!
//! A source moves through `Idle -> Running -> StopRequested -> Idle`.
//! `start` spawns the generation loop, `stop` only signals it, and the loop
//! notices the request at its next batch boundary. Callers that are about to
//! release the buffer must `join` or `wait` first.

use crate::clock::{ClockSettings, FramePacer, SampleClock};
use crate::generator::{GeneratorSettings, SignalGenerator};
use ephys_core::{config_error, RingBuffer, SimResult, SourceHandle, SourceKind, SourceSpec, StreamInfo};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOP_REQUESTED: u8 = 2;

/// Lifecycle state of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceState {
    Idle,
    Running,
    StopRequested,
}

impl SourceState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            RUNNING => SourceState::Running,
            STOP_REQUESTED => SourceState::StopRequested,
            _ => SourceState::Idle,
        }
    }
}

/// Counters for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub state: SourceState,
    /// Frames written into the ring buffer
    pub frames_generated: u64,
    /// Frames skipped because the loop fell too far behind
    pub frames_skipped: u64,
    /// Generation iterations that produced data
    pub batches: u64,
    /// Frames the ring buffer overwrote before they were read
    pub overflow_count: u64,
    /// Frames waiting in the ring buffer
    pub available: usize,
}

struct SourceShared {
    state: AtomicU8,
    frames_generated: AtomicU64,
    frames_skipped: AtomicU64,
    batches: AtomicU64,
}

impl SourceShared {
    fn new() -> Self {
        SourceShared {
            state: AtomicU8::new(IDLE),
            frames_generated: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }

    fn reset_counters(&self) {
        self.frames_generated.store(0, Ordering::Relaxed);
        self.frames_skipped.store(0, Ordering::Relaxed);
        self.batches.store(0, Ordering::Relaxed);
    }
}

/// A synthetic stream with its own generation thread
pub struct SimulatedSource {
    handle: SourceHandle,
    spec: SourceSpec,
    batch_period: Duration,
    max_catchup_batches: u32,
    buffer: Arc<RingBuffer>,
    clock: Arc<SampleClock>,
    generator: Arc<Mutex<SignalGenerator>>,
    shared: Arc<SourceShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedSource {
    /// Create a source writing into `buffer`.
    ///
    /// Fails with `InvalidConfig` for a zero channel count, a non-positive
    /// sample rate, bad generator or clock settings, or a buffer whose
    /// channel count differs from the spec.
    pub fn new(
        spec: SourceSpec,
        buffer: Arc<RingBuffer>,
        settings: &GeneratorSettings,
        clock: ClockSettings,
    ) -> SimResult<Self> {
        spec.validate()?;
        if buffer.channel_count() != spec.channel_count {
            return Err(config_error!(
                "stream '{}' has {} channels but its buffer has {}",
                spec.name,
                spec.channel_count,
                buffer.channel_count()
            ));
        }

        // Resolve the seed once so generator and clock agree on it
        let seed = settings.resolved_seed();
        let settings = GeneratorSettings {
            seed: Some(seed),
            ..settings.clone()
        };

        let generator = SignalGenerator::new(spec.kind, spec.channel_count, spec.sample_rate, &settings)?;
        let clock = SampleClock::new(spec.sample_rate, clock, seed.rotate_left(32))?;

        Ok(SimulatedSource {
            handle: SourceHandle::new(),
            spec,
            batch_period: settings.batch_period(),
            max_catchup_batches: settings.max_catchup_batches,
            buffer,
            clock: Arc::new(clock),
            generator: Arc::new(Mutex::new(generator)),
            shared: Arc::new(SourceShared::new()),
            worker: Mutex::new(None),
        })
    }

    /// Create a source together with a ring buffer of `spec.buffer_frames` frames
    pub fn with_new_buffer(spec: SourceSpec, settings: &GeneratorSettings, clock: ClockSettings) -> SimResult<Self> {
        spec.validate()?;
        let buffer = Arc::new(RingBuffer::new(spec.channel_count, spec.buffer_frames)?);
        Self::new(spec, buffer, settings, clock)
    }

    /// Start the generation loop. Returns false when already running.
    ///
    /// A previous run that is still winding down is joined first, so the
    /// buffer never has more than one producer.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock();

        if self.state() == SourceState::Running {
            return false;
        }
        if let Some(previous) = worker.take() {
            self.join_worker(previous);
        }

        self.generator.lock().reset();
        self.shared.reset_counters();
        self.shared.state.store(RUNNING, Ordering::Release);

        let context = GenerationLoop {
            name: self.spec.name.clone(),
            batch_period: self.batch_period,
            max_catchup_batches: self.max_catchup_batches,
            buffer: Arc::clone(&self.buffer),
            clock: Arc::clone(&self.clock),
            generator: Arc::clone(&self.generator),
            shared: Arc::clone(&self.shared),
        };

        match thread::Builder::new()
            .name(format!("sim-{}", self.spec.name))
            .spawn(move || context.run())
        {
            Ok(handle) => {
                *worker = Some(handle);
                info!(
                    stream = %self.spec.name,
                    kind = %self.spec.kind,
                    channels = self.spec.channel_count,
                    rate = self.clock.nominal_rate(),
                    "Simulated source started"
                );
                true
            }
            Err(e) => {
                self.shared.state.store(IDLE, Ordering::Release);
                error!(stream = %self.spec.name, "Failed to spawn generation thread: {}", e);
                false
            }
        }
    }

    /// Ask the loop to exit at its next batch boundary. Never blocks.
    /// Returns false when the source was not running.
    pub fn stop(&self) -> bool {
        let signalled = self
            .shared
            .state
            .compare_exchange(RUNNING, STOP_REQUESTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if signalled {
            debug!(stream = %self.spec.name, "Stop requested");
        }
        signalled
    }

    /// Wait up to `timeout` for the generation thread to finish.
    ///
    /// Returns true once no thread is left. A source that was never asked
    /// to stop will time out.
    pub fn join(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut worker = self.worker.lock();

        loop {
            match worker.as_ref() {
                None => return true,
                Some(handle) if handle.is_finished() => break,
                Some(_) if Instant::now() >= deadline => return false,
                Some(_) => thread::sleep(Duration::from_millis(1)),
            }
        }

        if let Some(handle) = worker.take() {
            self.join_worker(handle);
        }
        true
    }

    /// Wait for the generation thread without a bound
    pub fn wait(&self) {
        if let Some(handle) = self.worker.lock().take() {
            self.join_worker(handle);
        }
    }

    /// Stop and wait for the thread
    pub fn shutdown(&self) {
        self.stop();
        self.wait();
    }

    fn join_worker(&self, handle: JoinHandle<()>) {
        if handle.join().is_err() {
            error!(stream = %self.spec.name, "Generation thread panicked");
            self.shared.state.store(IDLE, Ordering::Release);
        }
    }

    pub fn state(&self) -> SourceState {
        SourceState::from_raw(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == SourceState::Running
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            state: self.state(),
            frames_generated: self.shared.frames_generated.load(Ordering::Relaxed),
            frames_skipped: self.shared.frames_skipped.load(Ordering::Relaxed),
            batches: self.shared.batches.load(Ordering::Relaxed),
            overflow_count: self.buffer.overflow_count(),
            available: self.buffer.available(),
        }
    }

    pub fn handle(&self) -> SourceHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn kind(&self) -> SourceKind {
        self.spec.kind
    }

    pub fn channel_count(&self) -> usize {
        self.spec.channel_count
    }

    /// Current nominal rate; follows `clock().update_frequency`
    pub fn sample_rate(&self) -> f64 {
        self.clock.nominal_rate()
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    pub fn buffer(&self) -> &Arc<RingBuffer> {
        &self.buffer
    }

    pub fn clock(&self) -> &SampleClock {
        &self.clock
    }

    pub fn batch_period(&self) -> Duration {
        self.batch_period
    }

    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            handle: self.handle,
            name: self.spec.name.clone(),
            kind: self.spec.kind,
            channel_count: self.spec.channel_count,
            sample_rate: self.sample_rate(),
            buffer_frames: self.buffer.capacity(),
        }
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SimulatedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedSource")
            .field("handle", &self.handle)
            .field("spec", &self.spec)
            .field("state", &self.state())
            .finish()
    }
}

/// Frames one iteration may write after a stall
fn batch_frame_cap(rate: f64, batch_period: Duration, max_catchup_batches: u32) -> u64 {
    let per_batch = (rate * batch_period.as_secs_f64()).ceil().max(1.0) as u64;
    per_batch.saturating_mul(max_catchup_batches as u64)
}

/// State moved onto the generation thread
struct GenerationLoop {
    name: String,
    batch_period: Duration,
    max_catchup_batches: u32,
    buffer: Arc<RingBuffer>,
    clock: Arc<SampleClock>,
    generator: Arc<Mutex<SignalGenerator>>,
    shared: Arc<SourceShared>,
}

impl GenerationLoop {
    fn run(self) {
        let mut generator = self.generator.lock();
        let mut pacer = FramePacer::new();
        let mut last = Instant::now();
        let mut next_tick = last + self.batch_period;
        let mut overflow_reported = false;

        debug!(stream = %self.name, period_ms = self.batch_period.as_millis() as u64, "Generation loop running");

        while self.shared.state.load(Ordering::Acquire) == RUNNING {
            // A retuned clock changes the stream's rate from this batch on
            let rate = self.clock.nominal_rate();
            if rate != generator.sample_rate() {
                match generator.set_sample_rate(rate) {
                    Ok(()) => info!(stream = %self.name, rate, "Sample rate changed"),
                    Err(e) => warn!(stream = %self.name, "Ignoring clock rate: {}", e),
                }
            }

            let now = Instant::now();
            let due = pacer.advance(&self.clock, now.duration_since(last));
            last = now;

            // Drop the oldest frames of a stall instead of bursting
            let cap = batch_frame_cap(self.clock.effective_rate(), self.batch_period, self.max_catchup_batches);
            let produce = due.min(cap);
            let skipped = due - produce;
            if skipped > 0 {
                generator.skip(skipped);
                self.shared.frames_skipped.fetch_add(skipped, Ordering::Relaxed);
                warn!(stream = %self.name, frames = skipped, "Generation fell behind, skipping frames");
            }

            if produce > 0 {
                let block = generator.generate(produce as usize);
                match self.buffer.write(&block) {
                    Ok(report) if report.overflowed() => {
                        if !overflow_reported {
                            warn!(
                                stream = %self.name,
                                dropped = report.frames_dropped,
                                "Ring buffer overflow, consumer is not keeping up"
                            );
                            overflow_reported = true;
                        } else {
                            debug!(stream = %self.name, dropped = report.frames_dropped, "Ring buffer overflow");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(stream = %self.name, "Write rejected: {}", e);
                        break;
                    }
                }
                self.shared.frames_generated.fetch_add(produce, Ordering::Relaxed);
                self.shared.batches.fetch_add(1, Ordering::Relaxed);
            }

            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            }
            next_tick += self.batch_period;
            let now = Instant::now();
            if next_tick < now {
                next_tick = now + self.batch_period;
            }
        }

        self.shared.state.store(IDLE, Ordering::Release);
        debug!(stream = %self.name, frames = generator.sample_number(), "Generation loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_source(kind: SourceKind, channels: usize, rate: f64) -> SimulatedSource {
        let spec = SourceSpec::new("test", kind, channels, rate).with_buffer_frames(rate as usize);
        SimulatedSource::with_new_buffer(spec, &GeneratorSettings::seeded(1), ClockSettings::default()).unwrap()
    }

    #[test]
    fn test_invalid_construction() {
        let settings = GeneratorSettings::seeded(0);
        let clock = ClockSettings::default();

        let no_channels = SourceSpec::new("x", SourceKind::ElectrodeAp, 0, 30_000.0);
        assert!(SimulatedSource::with_new_buffer(no_channels, &settings, clock)
            .unwrap_err()
            .is_invalid_config());

        let no_rate = SourceSpec::new("x", SourceKind::ElectrodeAp, 4, 0.0);
        assert!(SimulatedSource::with_new_buffer(no_rate, &settings, clock).is_err());

        let mismatched = Arc::new(RingBuffer::new(3, 100).unwrap());
        let spec = SourceSpec::new("x", SourceKind::AnalogIn, 4, 1_000.0);
        assert!(SimulatedSource::new(spec, mismatched, &settings, clock).is_err());

        let valid = SourceSpec::new("x", SourceKind::AnalogIn, 4, 1_000.0);
        assert!(SimulatedSource::with_new_buffer(valid, &settings, clock).is_ok());
    }

    #[test]
    fn test_state_machine() {
        let source = test_source(SourceKind::AnalogIn, 2, 1_000.0);
        assert_eq!(source.state(), SourceState::Idle);

        // Stop while idle is a no-op
        assert!(!source.stop());
        assert_eq!(source.state(), SourceState::Idle);

        assert!(source.start());
        assert_eq!(source.state(), SourceState::Running);

        // Start while running is a no-op
        assert!(!source.start());

        assert!(source.stop());
        assert!(source.join(Duration::from_secs(2)));
        assert_eq!(source.state(), SourceState::Idle);
    }

    #[test]
    fn test_produces_frames_into_buffer() {
        let source = test_source(SourceKind::ElectrodeLfp, 4, 2_500.0);
        source.start();
        thread::sleep(Duration::from_millis(150));
        source.stop();
        assert!(source.join(Duration::from_secs(2)));

        let block = source.buffer().read_all();
        assert!(block.frame_count() > 0);
        assert_eq!(block.channel_count(), 4);
        assert_eq!(block.sample_numbers()[0], 0);

        // Frames arrive in production order with no gaps
        for pair in block.sample_numbers().windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
        assert_eq!(source.stats().frames_generated, block.frame_count() as u64);
    }

    #[test]
    fn test_join_times_out_while_running() {
        let source = test_source(SourceKind::AnalogIn, 1, 1_000.0);
        source.start();
        assert!(!source.join(Duration::from_millis(30)));
        source.stop();
        assert!(source.join(Duration::from_secs(2)));
    }

    #[test]
    fn test_restart_after_stop() {
        let source = test_source(SourceKind::AnalogIn, 1, 1_000.0);
        source.start();
        source.stop();

        // Joins the winding-down run before starting again
        assert!(source.start());
        assert!(source.is_running());
        thread::sleep(Duration::from_millis(60));
        source.shutdown();
        assert_eq!(source.state(), SourceState::Idle);
    }

    #[test]
    fn test_disabled_clock_pauses_output() {
        let source = test_source(SourceKind::AnalogIn, 1, 1_000.0);
        source.clock().set_enabled(false);
        source.start();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(source.buffer().available(), 0);
        assert!(source.is_running());

        source.clock().set_enabled(true);
        thread::sleep(Duration::from_millis(100));
        source.shutdown();
        assert!(source.buffer().available() > 0);
    }

    #[test]
    fn test_batch_frame_cap() {
        let period = Duration::from_millis(25);
        assert_eq!(batch_frame_cap(30_000.0, period, 4), 3_000);
        assert_eq!(batch_frame_cap(1.0, period, 4), 4);
        assert_eq!(batch_frame_cap(1e30, period, 4), u64::MAX);
    }

    #[test]
    fn test_retune_updates_reported_rate() {
        let source = test_source(SourceKind::AnalogIn, 1, 1_000.0);
        source.clock().update_frequency(2_000.0, 0.0).unwrap();
        assert_eq!(source.sample_rate(), 2_000.0);
        assert_eq!(source.info().sample_rate, 2_000.0);
        assert_eq!(source.spec().sample_rate, 1_000.0);
    }

    #[test]
    fn test_drop_joins_thread() {
        let source = test_source(SourceKind::ElectrodeAp, 2, 30_000.0);
        let buffer = Arc::clone(source.buffer());
        source.start();
        thread::sleep(Duration::from_millis(50));
        drop(source);

        // No producer left: the count stays put
        let written = buffer.total_frames_written();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(buffer.total_frames_written(), written);
        assert_eq!(Arc::strong_count(&buffer), 1);
    }
}
