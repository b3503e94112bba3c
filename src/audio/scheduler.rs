//! Adaptive playback scheduler
//!
//! A jitter buffer in front of the output clock: decoded PCM is queued and
//! scheduled in 15-30 ms chunks so that a target lead time is always
//! buffered ahead of the clock. The target grows on underruns and decays
//! slowly while the link is stable.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace};

use crate::audio::output::AudioOutput;
use crate::protocol::mode::BufferMode;

/// Lower bound of the adaptive lead
pub const MIN_LEAD_SEC: f64 = 0.06;
/// Upper bound of the adaptive lead; wins over any preset
pub const MAX_LEAD_SEC: f64 = 0.28;
/// Cursor offset after an underrun
pub const START_DELAY_SEC: f64 = 0.03;
/// Cursor offset at session start
pub const SESSION_START_LEAD_SEC: f64 = 0.06;
/// Scheduled lead below which playback counts as starved
pub const UNDERRUN_EPSILON_SEC: f64 = 0.01;
/// Lead growth per underrun
pub const UNDERRUN_STEP_SEC: f64 = 0.04;
/// Lead decay per stable window
pub const DECAY_STEP_SEC: f64 = 0.005;
/// Time without underruns before the lead decays
pub const STABLE_WINDOW: Duration = Duration::from_secs(5);
/// Backpressure cap on queued audio
pub const MAX_QUEUE_SECONDS: f64 = 2.0;

const MIN_CHUNK_SEC: f64 = 0.015;
const MAX_CHUNK_SEC: f64 = 0.03;
const MIN_CHUNK_SAMPLES: usize = 128;

/// Jitter buffer and output pacing
pub struct PlaybackScheduler {
    queue: VecDeque<Vec<f32>>,
    queued_samples: usize,
    /// Output clock time at which the next chunk starts
    play_cursor: f64,
    target_lead_sec: f64,
    stable_since: Instant,
    started: bool,
    sample_rate: u32,
    chunks_dropped: u64,
    underruns: u64,
    chunks_scheduled: u64,
}

impl PlaybackScheduler {
    /// Create a scheduler for an output running at `sample_rate`
    pub fn new(sample_rate: u32, preset: BufferMode, now: Instant) -> Self {
        Self {
            queue: VecDeque::new(),
            queued_samples: 0,
            play_cursor: 0.0,
            target_lead_sec: preset.lead_secs(),
            stable_since: now,
            started: false,
            sample_rate: sample_rate.max(1),
            chunks_dropped: 0,
            underruns: 0,
            chunks_scheduled: 0,
        }
    }

    /// Start a new playback session on the output clock
    pub fn reset_session(&mut self, sample_rate: u32, clock: f64, preset: BufferMode, now: Instant) {
        self.clear();
        self.sample_rate = sample_rate.max(1);
        self.play_cursor = clock + SESSION_START_LEAD_SEC;
        self.target_lead_sec = preset.lead_secs();
        self.stable_since = now;
        self.chunks_dropped = 0;
        self.underruns = 0;
        self.chunks_scheduled = 0;
    }

    /// Drop all queued audio
    pub fn clear(&mut self) {
        self.queue.clear();
        self.queued_samples = 0;
        self.started = false;
    }

    /// Seed the target lead from a preset
    pub fn set_preset(&mut self, preset: BufferMode) {
        self.target_lead_sec = preset.lead_secs();
    }

    /// Queue decoded PCM, enforcing the backpressure cap
    pub fn enqueue(&mut self, pcm: Vec<f32>) {
        if pcm.is_empty() {
            return;
        }
        self.queued_samples += pcm.len();
        self.queue.push_back(pcm);
        self.enforce_cap();
    }

    fn max_queue_samples(&self) -> usize {
        (self.sample_rate as f64 * MAX_QUEUE_SECONDS).round() as usize
    }

    fn enforce_cap(&mut self) {
        let cap = self.max_queue_samples();
        while self.queued_samples > cap {
            let Some(dropped) = self.queue.pop_front() else {
                break;
            };
            self.queued_samples -= dropped.len();
            self.chunks_dropped += 1;
            trace!("Backpressure dropped {} samples", dropped.len());
        }
    }

    /// Schedule queued audio onto `output`.
    ///
    /// Called whenever PCM arrives and on a periodic tick.
    pub fn pump<O: AudioOutput + ?Sized>(&mut self, output: &mut O, now: Instant) {
        self.enforce_cap();

        let clock = output.current_time();
        if self.play_cursor - clock < UNDERRUN_EPSILON_SEC {
            if self.started {
                self.target_lead_sec =
                    (self.target_lead_sec + UNDERRUN_STEP_SEC).clamp(MIN_LEAD_SEC, MAX_LEAD_SEC);
                self.stable_since = now;
                self.chunks_dropped += 1;
                self.underruns += 1;
                debug!(
                    "Playback underrun, target lead now {:.0} ms",
                    self.target_lead_sec * 1000.0
                );
            }
            self.play_cursor = clock + START_DELAY_SEC;
            self.started = false;
        }

        if now.saturating_duration_since(self.stable_since) > STABLE_WINDOW
            && self.target_lead_sec > MIN_LEAD_SEC
        {
            self.target_lead_sec = (self.target_lead_sec - DECAY_STEP_SEC).max(MIN_LEAD_SEC);
            self.stable_since = now;
        }

        let target = self.target_lead_sec.clamp(MIN_LEAD_SEC, MAX_LEAD_SEC);
        let rate = output.sample_rate().max(1);
        let min_chunk = MIN_CHUNK_SAMPLES.max((rate as f64 * MIN_CHUNK_SEC).round() as usize);
        let max_chunk = min_chunk.max((rate as f64 * MAX_CHUNK_SEC).round() as usize);

        while self.play_cursor - clock < target && self.queued_samples > 0 {
            let chunk = self.take_samples(max_chunk.min(self.queued_samples));
            let duration = chunk.len() as f64 / rate as f64;
            output.schedule(chunk, self.play_cursor);
            self.play_cursor += duration;
            self.started = true;
            self.chunks_scheduled += 1;
        }
    }

    /// Remove exactly `count` samples from the front of the queue
    fn take_samples(&mut self, count: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let Some(head) = self.queue.front_mut() else {
                break;
            };
            let take = head.len().min(count - out.len());
            if take == head.len() {
                out.extend_from_slice(head);
                self.queue.pop_front();
            } else {
                out.extend(head.drain(..take));
            }
        }
        self.queued_samples -= out.len();
        out
    }

    pub fn target_lead_sec(&self) -> f64 {
        self.target_lead_sec
    }

    pub fn play_cursor(&self) -> f64 {
        self.play_cursor
    }

    pub fn queued_samples(&self) -> usize {
        self.queued_samples
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Get statistics against the current output clock
    pub fn stats(&self, clock: f64) -> PlaybackStats {
        let current = (self.play_cursor - clock).max(0.0);
        let target = self.target_lead_sec.clamp(MIN_LEAD_SEC, MAX_LEAD_SEC);
        PlaybackStats {
            current_latency_ms: current * 1000.0,
            target_latency_ms: target * 1000.0,
            queued_samples: self.queued_samples,
            buffer_health: (current / target).min(1.0),
            chunks_dropped: self.chunks_dropped,
            underruns: self.underruns,
            chunks_scheduled: self.chunks_scheduled,
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PlaybackStats {
    pub current_latency_ms: f64,
    pub target_latency_ms: f64,
    pub queued_samples: usize,
    /// 0..1, scheduled lead relative to the target
    pub buffer_health: f64,
    /// Backpressure drops plus underruns
    pub chunks_dropped: u64,
    pub underruns: u64,
    pub chunks_scheduled: u64,
}
