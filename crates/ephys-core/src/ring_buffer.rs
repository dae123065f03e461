//! Fixed-capacity multi-channel ring buffer between one producer and one consumer
//!
//! The producer (a simulated source thread) appends whole frame blocks; the
//! consumer (the host's acquisition context) drains the oldest unread frames.
//! Writing past capacity never fails: the oldest unread frames are overwritten
//! and counted as overflow, the way acquisition hardware drops samples under
//! backpressure instead of stalling.
//!
//! # Thread Safety
//!
//! - **Storage**: guarded by a `parking_lot::Mutex`; each write or read holds it
//!   for one or two slice copies.
//! - **Diagnostics**: `available`, `overflow_count` and `total_frames_written`
//!   are atomics and never take the lock.
//! - **Discipline**: one producer and one consumer per buffer. `clear` belongs to
//!   the consumer side and must not race a producer that is still running.

use crate::config_error;
use crate::error::SimResult;
use crate::frame_block::FrameBlock;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Outcome of a single `write`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteReport {
    /// Frames appended by this write
    pub frames_written: usize,
    /// Frames lost by this write (unread frames overwritten, plus any part of
    /// the block that could not fit at all)
    pub frames_dropped: usize,
}

impl WriteReport {
    /// True when this write lost data
    pub fn overflowed(&self) -> bool {
        self.frames_dropped > 0
    }
}

struct RingStore {
    samples: Box<[f32]>,
    sample_numbers: Box<[i64]>,
    timestamps: Box<[f64]>,
    event_words: Box<[u64]>,
    /// Slot the next frame goes into
    write_index: usize,
    /// Frames written but not yet read
    unread: usize,
}

/// Fixed-capacity ring of frames
pub struct RingBuffer {
    channel_count: usize,
    capacity: usize,
    store: Mutex<RingStore>,
    available: AtomicUsize,
    overflow_count: AtomicU64,
    frames_written: AtomicU64,
}

impl RingBuffer {
    /// Allocate zeroed storage for `capacity` frames of `channel_count` channels
    pub fn new(channel_count: usize, capacity: usize) -> SimResult<Self> {
        if channel_count == 0 {
            return Err(config_error!("ring buffer needs at least one channel"));
        }
        if capacity == 0 {
            return Err(config_error!("ring buffer capacity must be at least one frame"));
        }
        let total = channel_count
            .checked_mul(capacity)
            .ok_or_else(|| config_error!("ring buffer of {} x {} frames is too large", channel_count, capacity))?;

        Ok(RingBuffer {
            channel_count,
            capacity,
            store: Mutex::new(RingStore {
                samples: vec![0.0; total].into_boxed_slice(),
                sample_numbers: vec![0; capacity].into_boxed_slice(),
                timestamps: vec![0.0; capacity].into_boxed_slice(),
                event_words: vec![0; capacity].into_boxed_slice(),
                write_index: 0,
                unread: 0,
            }),
            available: AtomicUsize::new(0),
            overflow_count: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently waiting to be read
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Frames discarded by overwrites since construction or the last `clear`
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Frames handed to `write` since construction or the last `clear`
    pub fn total_frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Forget every unread frame and reset the counters. Storage is reused.
    pub fn clear(&self) {
        let mut store = self.store.lock();
        store.write_index = 0;
        store.unread = 0;
        self.available.store(0, Ordering::Release);
        self.overflow_count.store(0, Ordering::Relaxed);
        self.frames_written.store(0, Ordering::Relaxed);
    }

    /// Append every frame of `block`.
    ///
    /// Fails only if the block's channel count differs from the buffer's.
    /// When unread frames would exceed capacity the oldest ones are
    /// overwritten and added to the overflow counter.
    pub fn write(&self, block: &FrameBlock) -> SimResult<WriteReport> {
        if block.channel_count() != self.channel_count {
            return Err(config_error!(
                "block has {} channels, buffer expects {}",
                block.channel_count(),
                self.channel_count
            ));
        }

        let frames = block.frame_count();
        if frames == 0 {
            return Ok(WriteReport::default());
        }

        let cap = self.capacity;
        let ch = self.channel_count;

        // Only the newest `cap` frames of an oversized block can survive
        let skipped = frames.saturating_sub(cap);
        let kept = frames - skipped;

        let dropped = {
            let mut guard = self.store.lock();
            let store = &mut *guard;

            let overwritten = (store.unread + kept).saturating_sub(cap);

            let mut src = skipped;
            let mut remaining = kept;
            while remaining > 0 {
                let dst = store.write_index;
                let run = remaining.min(cap - dst);

                store.samples[dst * ch..(dst + run) * ch]
                    .copy_from_slice(&block.samples()[src * ch..(src + run) * ch]);
                store.sample_numbers[dst..dst + run]
                    .copy_from_slice(&block.sample_numbers()[src..src + run]);
                store.timestamps[dst..dst + run].copy_from_slice(&block.timestamps()[src..src + run]);
                store.event_words[dst..dst + run].copy_from_slice(&block.event_words()[src..src + run]);

                store.write_index = (dst + run) % cap;
                src += run;
                remaining -= run;
            }

            store.unread = (store.unread + kept).min(cap);
            self.available.store(store.unread, Ordering::Release);

            skipped + overwritten
        };

        if dropped > 0 {
            self.overflow_count.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        self.frames_written.fetch_add(frames as u64, Ordering::Relaxed);

        Ok(WriteReport {
            frames_written: frames,
            frames_dropped: dropped,
        })
    }

    /// Take up to `max_frames` of the oldest unread frames. Never blocks;
    /// the returned block may be empty.
    pub fn read(&self, max_frames: usize) -> FrameBlock {
        let cap = self.capacity;
        let ch = self.channel_count;

        let mut guard = self.store.lock();
        let store = &mut *guard;

        let count = max_frames.min(store.unread);
        let mut block = FrameBlock::with_capacity(ch, count);
        if count == 0 {
            return block;
        }

        let mut src = (store.write_index + cap - store.unread) % cap;
        let mut remaining = count;
        while remaining > 0 {
            let run = remaining.min(cap - src);
            block.extend_from_parts(
                &store.samples[src * ch..(src + run) * ch],
                &store.sample_numbers[src..src + run],
                &store.timestamps[src..src + run],
                &store.event_words[src..src + run],
            );
            src = (src + run) % cap;
            remaining -= run;
        }

        store.unread -= count;
        self.available.store(store.unread, Ordering::Release);

        block
    }

    /// Take every unread frame
    pub fn read_all(&self) -> FrameBlock {
        self.read(self.capacity)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("channel_count", &self.channel_count)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("overflow_count", &self.overflow_count())
            .finish()
    }
}
