//! Drain service: polls every stream on a tokio interval, the way a host's
//! acquisition thread would, and keeps per-stream throughput counters

use ephys_core::{SourceHandle, SourceKind, StreamInfo};
use ephys_simulation::SourceCollection;
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Running totals for one stream
#[derive(Debug, Clone)]
struct StreamTally {
    info: StreamInfo,
    frames_read: u64,
    reads: u64,
    /// Discontinuities in sample numbers seen by the reader
    gaps: u64,
    next_sample: Option<i64>,
    frames_at_last_report: u64,
}

impl StreamTally {
    fn new(info: StreamInfo) -> Self {
        StreamTally {
            info,
            frames_read: 0,
            reads: 0,
            gaps: 0,
            next_sample: None,
            frames_at_last_report: 0,
        }
    }

    fn record(&mut self, sample_numbers: &[i64]) {
        let (Some(&first), Some(&last)) = (sample_numbers.first(), sample_numbers.last()) else {
            return;
        };
        if let Some(expected) = self.next_sample {
            if first != expected {
                self.gaps += 1;
            }
        }
        self.next_sample = Some(last + 1);
        self.frames_read += sample_numbers.len() as u64;
        self.reads += 1;
    }
}

/// Per-stream figures in the run summary
#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub name: String,
    pub kind: SourceKind,
    pub channel_count: usize,
    pub sample_rate: f64,
    pub frames_read: u64,
    pub reads: u64,
    pub gaps: u64,
    pub overflow_count: u64,
    pub frames_skipped: u64,
    /// Frames read per second of wall-clock time
    pub measured_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub duration_s: f64,
    pub streams_started: usize,
    /// Whether every generation thread finished within the join timeout
    pub clean_shutdown: bool,
    pub streams: Vec<StreamSummary>,
}

pub struct DrainService {
    collection: SourceCollection,
    poll_period: Duration,
    max_frames: usize,
    tallies: Vec<(SourceHandle, StreamTally)>,
}

impl DrainService {
    pub fn new(collection: SourceCollection, poll_period: Duration, max_frames: usize) -> Self {
        let tallies = collection
            .streams()
            .into_iter()
            .map(|info| (info.handle, StreamTally::new(info)))
            .collect();

        DrainService {
            collection,
            poll_period: poll_period.max(Duration::from_millis(1)),
            max_frames: max_frames.max(1),
            tallies,
        }
    }

    /// Start every stream, drain until `shutdown` resolves, then stop,
    /// join and drain whatever is left
    pub async fn run<F>(&mut self, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let streams_started = self.collection.start_all();

        let mut poll = interval(self.poll_period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut report = interval(REPORT_INTERVAL);
        report.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        report.tick().await;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = poll.tick() => self.drain_once(),
                _ = report.tick() => self.report(REPORT_INTERVAL),
            }
        }

        self.collection.stop_all();
        let clean_shutdown = self.collection.join_all(JOIN_TIMEOUT);
        if !clean_shutdown {
            warn!("Some generation threads were still running at shutdown");
        }
        self.drain_until_empty();

        let elapsed = started.elapsed();
        info!(seconds = elapsed.as_secs_f64(), "Acquisition finished");
        self.summary(elapsed, streams_started, clean_shutdown)
    }

    /// Read at most `max_frames` from every stream
    pub fn drain_once(&mut self) {
        for (handle, tally) in &mut self.tallies {
            if let Some(block) = self.collection.read_buffer(*handle, self.max_frames) {
                tally.record(block.sample_numbers());
            }
        }
    }

    fn drain_until_empty(&mut self) {
        for (handle, tally) in &mut self.tallies {
            while let Some(block) = self.collection.read_buffer(*handle, self.max_frames) {
                if block.is_empty() {
                    break;
                }
                tally.record(block.sample_numbers());
            }
        }
    }

    fn report(&mut self, window: Duration) {
        for (handle, tally) in &mut self.tallies {
            let frames = tally.frames_read - tally.frames_at_last_report;
            tally.frames_at_last_report = tally.frames_read;

            let overflow = self.collection.overflow_count(*handle).unwrap_or_default();
            info!(
                stream = %tally.info.name,
                rate = frames as f64 / window.as_secs_f64(),
                nominal = tally.info.sample_rate,
                overflow,
                gaps = tally.gaps,
                "Throughput"
            );
        }
        debug!(streams = self.tallies.len(), "Throughput report complete");
    }

    fn summary(&self, elapsed: Duration, streams_started: usize, clean_shutdown: bool) -> RunSummary {
        let seconds = elapsed.as_secs_f64();
        let streams = self
            .tallies
            .iter()
            .map(|(handle, tally)| {
                let stats = self.collection.stats(*handle);
                StreamSummary {
                    name: tally.info.name.clone(),
                    kind: tally.info.kind,
                    channel_count: tally.info.channel_count,
                    sample_rate: tally.info.sample_rate,
                    frames_read: tally.frames_read,
                    reads: tally.reads,
                    gaps: tally.gaps,
                    overflow_count: stats.as_ref().map(|s| s.overflow_count).unwrap_or_default(),
                    frames_skipped: stats.as_ref().map(|s| s.frames_skipped).unwrap_or_default(),
                    measured_rate: if seconds > 0.0 {
                        tally.frames_read as f64 / seconds
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        RunSummary {
            duration_s: seconds,
            streams_started,
            clean_shutdown,
            streams,
        }
    }

    pub fn collection(&self) -> &SourceCollection {
        &self.collection
    }
}
