//! FrameBlock: contiguous run of multi-channel frames

use crate::config_error;
use crate::error::SimResult;

/// A run of frames for a fixed number of channels.
///
/// Samples are interleaved frame by frame:
/// `[f0_ch0, f0_ch1, .., f1_ch0, f1_ch1, ..]`. Each frame also carries
/// its sample number, a timestamp in seconds since acquisition start and
/// the TTL event word (bit 0 is the sync line).
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBlock {
    channel_count: usize,
    samples: Vec<f32>,
    sample_numbers: Vec<i64>,
    timestamps: Vec<f64>,
    event_words: Vec<u64>,
}

impl FrameBlock {
    /// Empty block with room for `frames` frames
    pub fn with_capacity(channel_count: usize, frames: usize) -> Self {
        FrameBlock {
            channel_count,
            samples: Vec::with_capacity(channel_count * frames),
            sample_numbers: Vec::with_capacity(frames),
            timestamps: Vec::with_capacity(frames),
            event_words: Vec::with_capacity(frames),
        }
    }

    /// Empty block
    pub fn empty(channel_count: usize) -> Self {
        Self::with_capacity(channel_count, 0)
    }

    /// Build a block from interleaved samples.
    ///
    /// Sample numbers count up from `first_sample_number`, timestamps are
    /// spaced by `1 / sample_rate` from `start_timestamp` and every event
    /// word is zero.
    pub fn from_interleaved(
        channel_count: usize,
        samples: Vec<f32>,
        first_sample_number: i64,
        start_timestamp: f64,
        sample_rate: f64,
    ) -> SimResult<Self> {
        if channel_count == 0 {
            return Err(config_error!("frame block needs at least one channel"));
        }
        if samples.len() % channel_count != 0 {
            return Err(config_error!(
                "{} samples do not divide into frames of {} channels",
                samples.len(),
                channel_count
            ));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(config_error!("sample rate must be positive, got {}Hz", sample_rate));
        }

        let frames = samples.len() / channel_count;
        let dt = 1.0 / sample_rate;

        Ok(FrameBlock {
            channel_count,
            samples,
            sample_numbers: (0..frames as i64).map(|i| first_sample_number + i).collect(),
            timestamps: (0..frames).map(|i| start_timestamp + i as f64 * dt).collect(),
            event_words: vec![0; frames],
        })
    }

    /// Append one frame
    pub fn push_frame(&mut self, values: &[f32], sample_number: i64, timestamp: f64, event_word: u64) {
        debug_assert_eq!(values.len(), self.channel_count);
        self.samples.extend_from_slice(values);
        self.sample_numbers.push(sample_number);
        self.timestamps.push(timestamp);
        self.event_words.push(event_word);
    }

    /// Append `frames` frames copied from parallel slices
    pub(crate) fn extend_from_parts(
        &mut self,
        samples: &[f32],
        sample_numbers: &[i64],
        timestamps: &[f64],
        event_words: &[u64],
    ) {
        self.samples.extend_from_slice(samples);
        self.sample_numbers.extend_from_slice(sample_numbers);
        self.timestamps.extend_from_slice(timestamps);
        self.event_words.extend_from_slice(event_words);
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Number of frames in the block
    pub fn frame_count(&self) -> usize {
        self.sample_numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_numbers.is_empty()
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_numbers(&self) -> &[i64] {
        &self.sample_numbers
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn event_words(&self) -> &[u64] {
        &self.event_words
    }

    /// Values of one frame, one per channel
    pub fn frame(&self, frame_idx: usize) -> Option<&[f32]> {
        if frame_idx >= self.frame_count() {
            return None;
        }
        let start = frame_idx * self.channel_count;
        Some(&self.samples[start..start + self.channel_count])
    }

    /// Get data for a specific channel
    pub fn channel_data(&self, channel_idx: usize) -> Option<Vec<f32>> {
        if channel_idx >= self.channel_count {
            return None;
        }

        Some(
            self.samples
                .chunks_exact(self.channel_count)
                .map(|frame| frame[channel_idx])
                .collect(),
        )
    }

    /// Get all channel data as separate vectors
    pub fn all_channels(&self) -> Vec<Vec<f32>> {
        (0..self.channel_count)
            .filter_map(|ch| self.channel_data(ch))
            .collect()
    }

    /// Consume the block, returning the interleaved samples
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}
