//! Ordered collection of simulated sources, driven as one device
//!
//! Sources are kept in layout order. Rebuilding builds the replacement set
//! first, then stops and joins every old source before its buffer can be
//! released.

use crate::clock::ClockSettings;
use crate::config::AcquisitionConfig;
use crate::generator::GeneratorSettings;
use crate::source::{SimulatedSource, SourceStats};
use ephys_core::{
    config_error, AcquisitionDevice, FrameBlock, RingBuffer, SimResult, SourceHandle, SourceKind, SourceSpec,
    StreamInfo,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Derive an independent seed for the stream at `index`
pub fn stream_seed(base: u64, index: usize) -> u64 {
    let mut z = base.wrapping_add((index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Simulated sources in stream order, each with its own ring buffer
pub struct SourceCollection {
    sources: Vec<SimulatedSource>,
    generator: GeneratorSettings,
    clock: ClockSettings,
    base_seed: u64,
}

impl SourceCollection {
    /// Empty collection; sources added later share these settings
    pub fn new(generator: GeneratorSettings, clock: ClockSettings) -> SimResult<Self> {
        generator.validate()?;
        clock.validate()?;

        let base_seed = generator.resolved_seed();
        Ok(SourceCollection {
            sources: Vec::new(),
            generator,
            clock,
            base_seed,
        })
    }

    /// One source per stream of `config.layout()`, all idle
    pub fn from_config(config: &AcquisitionConfig) -> SimResult<Self> {
        let specs = config.layout()?;
        let mut collection = Self::new(config.generator.clone(), config.clock)?;
        for spec in specs {
            collection.add_source(spec)?;
        }

        info!(
            streams = collection.len(),
            channels = config.total_channels(),
            "Source collection built"
        );
        Ok(collection)
    }

    /// Add a source of `kind` with the default buffer capacity
    pub fn create_source(&mut self, kind: SourceKind, channel_count: usize, sample_rate: f64) -> SimResult<SourceHandle> {
        let name = format!("{}{}", kind.label(), self.sources.len());
        self.add_source(SourceSpec::new(name, kind, channel_count, sample_rate))
    }

    /// Add a source with its own ring buffer. The new source starts idle.
    pub fn add_source(&mut self, spec: SourceSpec) -> SimResult<SourceHandle> {
        let settings = GeneratorSettings {
            seed: Some(stream_seed(self.base_seed, self.sources.len())),
            ..self.generator.clone()
        };
        let source = SimulatedSource::with_new_buffer(spec, &settings, self.clock)?;
        let handle = source.handle();

        debug!(stream = source.name(), %handle, "Source added");
        self.sources.push(source);
        Ok(handle)
    }

    /// Clear every buffer and start every source. Returns how many started.
    pub fn start_all(&self) -> usize {
        let mut started = 0;
        for source in &self.sources {
            if source.is_running() {
                continue;
            }
            // A run still winding down must not write after the clear
            source.wait();
            source.buffer().clear();
            if source.start() {
                started += 1;
            }
        }

        if started < self.sources.len() {
            warn!(started, total = self.sources.len(), "Not every source started");
        }
        info!(streams = started, "Acquisition started");
        started
    }

    /// Signal every source to stop. Never blocks.
    pub fn stop_all(&self) {
        for source in &self.sources {
            source.stop();
        }
        info!(streams = self.sources.len(), "Acquisition stop requested");
    }

    /// Wait for every generation thread, sharing one deadline.
    /// Returns false if any thread is still alive at the deadline.
    pub fn join_all(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut all_joined = true;
        for source in &self.sources {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !source.join(remaining) {
                warn!(stream = source.name(), "Generation thread did not finish in time");
                all_joined = false;
            }
        }
        all_joined
    }

    /// Stop every source and wait for all of them
    pub fn shutdown(&self) {
        for source in &self.sources {
            source.stop();
        }
        for source in &self.sources {
            source.wait();
        }
    }

    /// Replace the whole collection with the streams of `config`.
    ///
    /// The new set is built before anything is torn down, so an invalid
    /// config leaves the current sources untouched. Old sources are joined
    /// before their buffers are released. The new set starts idle.
    pub fn rebuild(&mut self, config: &AcquisitionConfig) -> SimResult<()> {
        let replacement = Self::from_config(config)?;

        self.shutdown();
        let old = std::mem::replace(self, replacement);
        let released = old.len();
        drop(old);

        info!(released, streams = self.len(), "Source collection rebuilt");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.sources.iter().any(|s| s.is_running())
    }

    /// Drain up to `max_frames` from one stream; `None` for an unknown handle
    pub fn read_buffer(&self, handle: SourceHandle, max_frames: usize) -> Option<FrameBlock> {
        self.buffer(handle).map(|buffer| buffer.read(max_frames))
    }

    pub fn overflow_count(&self, handle: SourceHandle) -> Option<u64> {
        self.buffer(handle).map(|buffer| buffer.overflow_count())
    }

    pub fn buffer(&self, handle: SourceHandle) -> Option<&Arc<RingBuffer>> {
        self.source(handle).map(|s| s.buffer())
    }

    pub fn source(&self, handle: SourceHandle) -> Option<&SimulatedSource> {
        self.sources.iter().find(|s| s.handle() == handle)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SimulatedSource> {
        self.sources.iter()
    }

    pub fn handles(&self) -> Vec<SourceHandle> {
        self.sources.iter().map(|s| s.handle()).collect()
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        self.sources.iter().map(|s| s.info()).collect()
    }

    pub fn stats(&self, handle: SourceHandle) -> Option<SourceStats> {
        self.source(handle).map(|s| s.stats())
    }

    /// Gate one source's clock. Returns false for an unknown handle.
    pub fn set_clock_enabled(&self, handle: SourceHandle, enabled: bool) -> bool {
        match self.source(handle) {
            Some(source) => {
                source.clock().set_enabled(enabled);
                debug!(stream = source.name(), enabled, "Clock gated");
                true
            }
            None => false,
        }
    }

    /// Retune one source's clock; the stream continues at the new rate.
    /// `Ok(false)` for an unknown handle.
    pub fn update_clock_frequency(&self, handle: SourceHandle, sample_rate: f64, tolerance_ppm: f64) -> SimResult<bool> {
        match self.source(handle) {
            Some(source) => {
                source.clock().update_frequency(sample_rate, tolerance_ppm)?;
                info!(
                    stream = source.name(),
                    rate = sample_rate,
                    offset_ppm = source.clock().offset_ppm(),
                    "Clock retuned"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn generator_settings(&self) -> &GeneratorSettings {
        &self.generator
    }

    pub fn clock_settings(&self) -> ClockSettings {
        self.clock
    }

    /// Seed the per-stream seeds derive from
    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }
}

impl Drop for SourceCollection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SourceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCollection")
            .field("sources", &self.sources)
            .field("base_seed", &self.base_seed)
            .finish()
    }
}

impl AcquisitionDevice for SourceCollection {
    fn found_input_source(&self) -> bool {
        !self.is_empty()
    }

    fn start_acquisition(&mut self) -> SimResult<()> {
        if self.is_empty() {
            return Err(config_error!("no streams configured"));
        }
        self.start_all();
        Ok(())
    }

    fn stop_acquisition(&mut self) {
        self.stop_all();
    }

    fn is_running(&self) -> bool {
        SourceCollection::is_running(self)
    }

    fn streams(&self) -> Vec<StreamInfo> {
        SourceCollection::streams(self)
    }

    fn read_stream(&self, handle: SourceHandle, max_frames: usize) -> Option<FrameBlock> {
        self.read_buffer(handle, max_frames)
    }

    fn overflow_count(&self, handle: SourceHandle) -> Option<u64> {
        SourceCollection::overflow_count(self, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn small_config() -> AcquisitionConfig {
        AcquisitionConfig {
            channels_per_probe: 4,
            channels_per_nidaq: 2,
            buffer_frames: 30_000,
            generator: GeneratorSettings::seeded(7),
            ..AcquisitionConfig::minimal()
        }
    }

    #[test]
    fn test_from_config_follows_layout() {
        let collection = SourceCollection::from_config(&small_config()).unwrap();
        let streams = collection.streams();

        let names: Vec<&str> = streams.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Probe-A-AP", "Probe-A-LFP", "Dev0"]);
        assert_eq!(streams[2].channel_count, 2);
        assert_eq!(streams[0].buffer_frames, 30_000);
        assert!(!collection.is_running());
    }

    #[test]
    fn test_create_source_and_unknown_handle() {
        let mut collection = SourceCollection::new(GeneratorSettings::seeded(1), ClockSettings::default()).unwrap();
        assert!(collection.is_empty());

        let handle = collection.create_source(SourceKind::AnalogIn, 3, 1_000.0).unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.read_buffer(handle, 10).unwrap().frame_count(), 0);
        assert_eq!(collection.overflow_count(handle), Some(0));

        assert!(collection
            .create_source(SourceKind::AnalogIn, 0, 1_000.0)
            .unwrap_err()
            .is_invalid_config());
        assert!(collection.create_source(SourceKind::ElectrodeAp, 4, 0.0).is_err());
        assert_eq!(collection.len(), 1);

        let stranger = SourceHandle::new();
        assert!(collection.read_buffer(stranger, 10).is_none());
        assert!(collection.overflow_count(stranger).is_none());
        assert!(!collection.set_clock_enabled(stranger, false));
        assert!(!collection.update_clock_frequency(stranger, 1_000.0, 0.0).unwrap());
    }

    #[test]
    fn test_start_stop_join() {
        let collection = SourceCollection::from_config(&small_config()).unwrap();
        assert_eq!(collection.start_all(), 3);
        assert!(collection.is_running());

        thread::sleep(Duration::from_millis(100));
        collection.stop_all();
        assert!(collection.join_all(Duration::from_secs(2)));
        assert!(!collection.is_running());

        for handle in collection.handles() {
            let block = collection.read_buffer(handle, usize::MAX).unwrap();
            assert!(block.frame_count() > 0);
        }
    }

    #[test]
    fn test_start_all_clears_previous_run() {
        let collection = SourceCollection::from_config(&small_config()).unwrap();
        collection.start_all();
        thread::sleep(Duration::from_millis(80));
        collection.stop_all();
        collection.join_all(Duration::from_secs(2));

        collection.start_all();
        thread::sleep(Duration::from_millis(80));
        collection.stop_all();
        collection.join_all(Duration::from_secs(2));

        for handle in collection.handles() {
            let block = collection.read_buffer(handle, usize::MAX).unwrap();
            assert_eq!(block.sample_numbers().first(), Some(&0));
        }
    }

    #[test]
    fn test_rebuild_rejects_invalid_config() {
        let mut collection = SourceCollection::from_config(&small_config()).unwrap();
        let before = collection.handles();

        let invalid = AcquisitionConfig {
            num_probes: 20,
            ..small_config()
        };
        assert!(collection.rebuild(&invalid).is_err());
        assert_eq!(collection.handles(), before);
    }

    #[test]
    fn test_rebuild_releases_old_buffers() {
        let mut collection = SourceCollection::from_config(&small_config()).unwrap();
        let old_handle = collection.handles()[0];
        let old_buffer = Arc::clone(collection.buffer(old_handle).unwrap());

        collection.start_all();
        thread::sleep(Duration::from_millis(50));

        let bigger = AcquisitionConfig {
            num_probes: 2,
            ..small_config()
        };
        collection.rebuild(&bigger).unwrap();

        assert_eq!(collection.len(), 5);
        assert!(!collection.is_running());
        assert!(collection.source(old_handle).is_none());

        // The old producer is gone: nothing else holds the buffer or writes to it
        assert_eq!(Arc::strong_count(&old_buffer), 1);
        let written = old_buffer.total_frames_written();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(old_buffer.total_frames_written(), written);
    }

    #[test]
    fn test_clock_controls() {
        let collection = SourceCollection::from_config(&small_config()).unwrap();
        let handle = collection.handles()[2];

        assert!(collection.set_clock_enabled(handle, false));
        assert!(!collection.source(handle).unwrap().clock().is_enabled());

        assert!(collection.update_clock_frequency(handle, 25_000.0, 20.0).unwrap());
        assert_eq!(collection.source(handle).unwrap().clock().nominal_rate(), 25_000.0);
        assert_eq!(collection.streams()[2].sample_rate, 25_000.0);
        assert!(collection.update_clock_frequency(handle, -1.0, 0.0).is_err());
    }

    #[test]
    fn test_stream_seeds() {
        assert_eq!(stream_seed(42, 3), stream_seed(42, 3));
        assert_ne!(stream_seed(42, 0), stream_seed(42, 1));
        assert_ne!(stream_seed(42, 0), stream_seed(43, 0));

        let a = SourceCollection::from_config(&small_config()).unwrap();
        let b = SourceCollection::from_config(&small_config()).unwrap();
        assert_eq!(a.base_seed(), 7);
        assert_eq!(a.base_seed(), b.base_seed());
    }

    #[test]
    fn test_device_trait() {
        let mut device: Box<dyn AcquisitionDevice> =
            Box::new(SourceCollection::from_config(&small_config()).unwrap());
        assert!(device.found_input_source());
        assert_eq!(device.streams().len(), 3);

        device.start_acquisition().unwrap();
        assert!(device.is_running());
        thread::sleep(Duration::from_millis(60));
        device.stop_acquisition();

        let handle = device.streams()[0].handle;
        assert!(device.overflow_count(handle).is_some());
        drop(device);

        let mut empty = SourceCollection::new(GeneratorSettings::seeded(0), ClockSettings::default()).unwrap();
        assert!(!empty.found_input_source());
        assert!(empty.start_acquisition().is_err());
    }
}
