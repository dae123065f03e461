//! ephys-core: Foundation types for simulated electrophysiology acquisition
//!
//! Ring buffers, frame blocks, stream descriptors and the host device trait.
//! Nothing in this crate spawns threads.

pub mod error;
pub mod stream_types;
pub mod frame_block;
pub mod ring_buffer;
pub mod device;

pub use error::{SimError, SimResult};
pub use stream_types::*;
pub use frame_block::FrameBlock;
pub use ring_buffer::{RingBuffer, WriteReport};
pub use device::AcquisitionDevice;
