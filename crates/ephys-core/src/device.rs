//! Host-facing acquisition device contract

use crate::error::SimResult;
use crate::frame_block::FrameBlock;
use crate::stream_types::{SourceHandle, StreamInfo};

/// The narrow interface a host drives an acquisition device through.
///
/// A host enumerates streams, starts and stops acquisition as a whole and
/// polls each stream for frames from its own thread.
pub trait AcquisitionDevice: Send {
    /// Whether the device is present and able to acquire
    fn found_input_source(&self) -> bool {
        true
    }

    /// Reset stream buffers and start producing data
    fn start_acquisition(&mut self) -> SimResult<()>;

    /// Ask every producer to stop. Does not wait for them.
    fn stop_acquisition(&mut self);

    /// True while any stream is producing
    fn is_running(&self) -> bool;

    /// Streams in host order
    fn streams(&self) -> Vec<StreamInfo>;

    /// Drain up to `max_frames` frames from one stream.
    /// `None` when the handle does not belong to this device.
    fn read_stream(&self, handle: SourceHandle, max_frames: usize) -> Option<FrameBlock>;

    /// Frames lost to overflow on one stream since acquisition started
    fn overflow_count(&self, handle: SourceHandle) -> Option<u64>;
}
