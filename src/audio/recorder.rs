//! Session recording
//!
//! Captures what is actually played: every chunk the scheduler hands to the
//! output goes through the same filter chain and gain as the output, and is
//! kept as 16-bit PCM. Stopping encodes a mono WAV file.

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use std::io::Cursor;
use tracing::{info, warn};

use crate::audio::output::AudioOutput;
use crate::audio::tone::ToneShaper;
use crate::error::AudioError;
use crate::protocol::mode::ReceiverMode;

/// Longest recording kept in memory
pub const MAX_RECORDING_SECS: u32 = 3600;

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

pub struct Recorder {
    shaper: ToneShaper,
    sample_rate: u32,
    volume: u32,
    samples: Vec<i16>,
    max_samples: usize,
    truncated: bool,
    started_at_ms: i64,
}

impl Recorder {
    pub fn start(sample_rate: u32, mode: ReceiverMode, volume: u32) -> Self {
        info!("Recording started at {} Hz", sample_rate);
        Self {
            shaper: ToneShaper::for_mode(mode, sample_rate, volume),
            sample_rate,
            volume,
            samples: Vec::new(),
            max_samples: sample_rate as usize * MAX_RECORDING_SECS as usize,
            truncated: false,
            started_at_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }

    pub fn set_mode(&mut self, mode: ReceiverMode) {
        if self.shaper.mode() != mode {
            self.shaper = ToneShaper::for_mode(mode, self.sample_rate, self.volume);
        }
    }

    pub fn set_volume(&mut self, volume: u32) {
        self.volume = volume;
        self.shaper.set_volume(volume);
    }

    /// Append played audio, pre-gain
    pub fn write(&mut self, pcm: &[f32]) {
        let room = self.max_samples.saturating_sub(self.samples.len());
        if room == 0 {
            if !self.truncated {
                warn!("Recording reached {} s, further audio is not kept", MAX_RECORDING_SECS);
                self.truncated = true;
            }
            return;
        }
        let mut shaped = pcm[..pcm.len().min(room)].to_vec();
        self.shaper.process(&mut shaped);
        self.samples.extend(shaped.iter().map(|s| to_i16(*s)));
    }

    /// Encode everything recorded so far
    pub fn finish(self) -> Result<Recording, AudioError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let to_err = |e: hound::Error| AudioError::Recording(e.to_string());

        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(to_err)?;
            for sample in &self.samples {
                writer.write_sample(*sample).map_err(to_err)?;
            }
            writer.finalize().map_err(to_err)?;
        }

        let recording = Recording {
            wav: Bytes::from(cursor.into_inner()),
            sample_rate: self.sample_rate,
            samples: self.samples.len() as u64,
            started_at_ms: self.started_at_ms,
            finished_at_ms: Utc::now().timestamp_millis(),
        };
        info!(
            "Recording finished: {:.1} s, {} bytes",
            recording.duration_secs(),
            recording.wav.len()
        );
        Ok(recording)
    }
}

/// A finished WAV recording
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub wav: Bytes,
    pub sample_rate: u32,
    pub samples: u64,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
}

impl Recording {
    pub fn duration_secs(&self) -> f64 {
        self.samples as f64 / self.sample_rate.max(1) as f64
    }

    pub fn file_name(&self) -> String {
        let stamp = Utc
            .timestamp_millis_opt(self.started_at_ms)
            .single()
            .map(|t| t.format("%Y%m%d-%H%M%S").to_string())
            .unwrap_or_else(|| self.started_at_ms.to_string());
        format!("websdr-{}.wav", stamp)
    }
}

/// Output wrapper that records every scheduled chunk
pub struct RecordingOutput<'a, O: AudioOutput + ?Sized> {
    output: &'a mut O,
    recorder: &'a mut Recorder,
}

impl<'a, O: AudioOutput + ?Sized> RecordingOutput<'a, O> {
    pub fn new(output: &'a mut O, recorder: &'a mut Recorder) -> Self {
        Self { output, recorder }
    }
}

impl<O: AudioOutput + ?Sized> AudioOutput for RecordingOutput<'_, O> {
    fn sample_rate(&self) -> u32 {
        self.output.sample_rate()
    }

    fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    fn is_running(&self) -> bool {
        self.output.is_running()
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        self.output.resume()
    }

    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) {
        self.recorder.write(&samples);
        self.output.schedule(samples, start_at);
    }

    fn set_mode(&mut self, mode: ReceiverMode) {
        self.recorder.set_mode(mode);
        self.output.set_mode(mode);
    }

    fn set_volume(&mut self, volume: u32) {
        self.recorder.set_volume(volume);
        self.output.set_volume(volume);
    }

    fn clear_scheduled(&mut self) {
        self.output.clear_scheduled();
    }
}
