//! Lock-free hand-off between the scheduler and the audio callback
//!
//! The scheduler pushes [`ScheduledChunk`]s stamped with the output frame at
//! which they start; the callback side ([`ChunkPlayer`]) renders them at
//! those positions and advances the shared frame clock.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Mono PCM placed on the output timeline
#[derive(Debug, Clone)]
pub struct ScheduledChunk {
    /// Output frame index of the first sample
    pub start_frame: u64,
    pub samples: Vec<f32>,
}

impl ScheduledChunk {
    pub fn new(start_frame: u64, samples: Vec<f32>) -> Self {
        Self {
            start_frame,
            samples,
        }
    }

    /// First frame after this chunk
    pub fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Bounded SPSC queue of scheduled chunks
pub struct ChunkQueue {
    queue: ArrayQueue<ScheduledChunk>,
    overflow_count: AtomicUsize,
}

impl ChunkQueue {
    /// Create a new queue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Push a chunk; returns false if the queue is full
    pub fn push(&self, chunk: ScheduledChunk) -> bool {
        match self.queue.push(chunk) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn pop(&self) -> Option<ScheduledChunk> {
        self.queue.pop()
    }

    /// Discard everything not yet rendered
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

pub type SharedChunkQueue = Arc<ChunkQueue>;

/// Callback-side renderer.
///
/// Frames with no chunk covering them render as silence; chunk samples whose
/// frame has already been rendered are skipped.
pub struct ChunkPlayer {
    queue: SharedChunkQueue,
    current: Option<ScheduledChunk>,
    frames_rendered: Arc<AtomicU64>,
}

impl ChunkPlayer {
    pub fn new(queue: SharedChunkQueue, frames_rendered: Arc<AtomicU64>) -> Self {
        Self {
            queue,
            current: None,
            frames_rendered,
        }
    }

    /// Fill an interleaved output buffer, duplicating mono to every channel
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let mut frame = self.frames_rendered.load(Ordering::Acquire);

        for slot in out.chunks_mut(channels) {
            let sample = self.sample_at(frame);
            slot.iter_mut().for_each(|s| *s = sample);
            frame += 1;
        }

        self.frames_rendered.store(frame, Ordering::Release);
    }

    fn sample_at(&mut self, frame: u64) -> f32 {
        loop {
            match &self.current {
                Some(chunk) if frame < chunk.end_frame() => {
                    if frame < chunk.start_frame {
                        return 0.0;
                    }
                    return chunk.samples[(frame - chunk.start_frame) as usize];
                }
                _ => match self.queue.pop() {
                    Some(next) => self.current = Some(next),
                    None => {
                        self.current = None;
                        return 0.0;
                    }
                },
            }
        }
    }
}
