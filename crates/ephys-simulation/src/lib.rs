//! ephys-simulation: Simulated multichannel acquisition sources
//!
//! Each stream runs its own generation thread, paced against a monotonic
//! clock, and writes synthetic frames into a ring buffer that a host drains
//! at its own pace.

pub mod clock;
pub mod generator;
pub mod source;
pub mod config;
pub mod collection;

pub use clock::{ClockSettings, FramePacer, SampleClock};
pub use generator::{GeneratorSettings, SignalGenerator, SYNC_LINE_BIT};
pub use source::{SimulatedSource, SourceState, SourceStats};
pub use config::{AcquisitionConfig, PROBE_LETTERS};
pub use collection::{stream_seed, SourceCollection};
