//! Audio output
//!
//! [`AudioOutput`] is the audio-clock surface the scheduler drives. The cpal
//! implementation keeps the stream on a dedicated thread and exposes the
//! number of frames rendered as its clock.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::audio::buffer::{ChunkPlayer, ChunkQueue, ScheduledChunk, SharedChunkQueue};
use crate::audio::device::find_output_device;
use crate::audio::tone::ToneShaper;
use crate::constants::OUTPUT_QUEUE_CAPACITY;
use crate::error::AudioError;
use crate::protocol::mode::ReceiverMode;

/// An output with its own clock
pub trait AudioOutput {
    /// Rate the output clock runs at
    fn sample_rate(&self) -> u32;

    /// Audio clock in seconds
    fn current_time(&self) -> f64;

    /// False while suspended (clock stopped)
    fn is_running(&self) -> bool;

    fn resume(&mut self) -> Result<(), AudioError>;

    /// Play mono `samples` starting at clock time `start_at`
    fn schedule(&mut self, samples: Vec<f32>, start_at: f64);

    fn set_mode(&mut self, mode: ReceiverMode);

    fn set_volume(&mut self, volume: u32);

    /// Drop everything scheduled but not yet played
    fn clear_scheduled(&mut self) {}
}

/// Opens outputs at a requested rate
pub trait OutputBackend {
    type Output: AudioOutput;

    /// Failure is terminal for playback
    fn open(&mut self, sample_rate: u32) -> Result<Self::Output, AudioError>;
}

/// cpal backend using the default or a named output device
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    device_name: Option<String>,
}

impl CpalBackend {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl OutputBackend for CpalBackend {
    type Output = CpalOutput;

    fn open(&mut self, sample_rate: u32) -> Result<CpalOutput, AudioError> {
        CpalOutput::open(self.device_name.as_deref(), sample_rate)
            .map_err(|e| AudioError::ResourceUnavailable(e.to_string()))
    }
}

enum StreamControl {
    Play,
}

/// Playing cpal stream
pub struct CpalOutput {
    sample_rate: u32,
    channels: u16,
    queue: SharedChunkQueue,
    frames_rendered: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    control_tx: Sender<StreamControl>,
    error_rx: Receiver<AudioError>,
    thread_handle: Option<JoinHandle<()>>,
    shaper: ToneShaper,
    volume: u32,
}

impl CpalOutput {
    fn open(device_name: Option<&str>, requested_rate: u32) -> Result<Self, AudioError> {
        let queue: SharedChunkQueue = Arc::new(ChunkQueue::new(OUTPUT_QUEUE_CAPACITY));
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<StreamConfig, AudioError>>(1);
        let (control_tx, control_rx) = bounded::<StreamControl>(4);
        let (error_tx, error_rx) = bounded::<AudioError>(16);

        let device_name = device_name.map(str::to_string);
        let player = ChunkPlayer::new(queue.clone(), frames_rendered.clone());
        let running_thread = running.clone();
        let alive_thread = alive.clone();

        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match build_stream(
                    device_name.as_deref(),
                    requested_rate,
                    player,
                    running_thread.clone(),
                    error_tx,
                ) {
                    Ok((stream, config)) => {
                        if let Err(e) = stream.play() {
                            let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                            return;
                        }
                        running_thread.store(true, Ordering::SeqCst);
                        let _ = ready_tx.send(Ok(config));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while alive_thread.load(Ordering::Relaxed) {
                    match control_rx.recv_timeout(Duration::from_millis(50)) {
                        Ok(StreamControl::Play) => match stream.play() {
                            Ok(()) => running_thread.store(true, Ordering::SeqCst),
                            Err(e) => warn!("Failed to resume output stream: {}", e),
                        },
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                running_thread.store(false, Ordering::SeqCst);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let config = ready_rx
            .recv()
            .map_err(|e| AudioError::StreamError(e.to_string()))
            .and_then(|result| result);
        let config = match config {
            Ok(config) => config,
            Err(e) => {
                let _ = handle.join();
                return Err(e);
            }
        };

        let sample_rate = config.sample_rate.0;
        info!(
            "Audio output running at {} Hz, {} channel(s)",
            sample_rate, config.channels
        );

        Ok(Self {
            sample_rate,
            channels: config.channels,
            queue,
            frames_rendered,
            running,
            alive,
            control_tx,
            error_rx,
            thread_handle: Some(handle),
            shaper: ToneShaper::for_mode(ReceiverMode::Usb, sample_rate, 50),
            volume: 50,
        })
    }

    /// Get channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Check for stream errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }

    /// Chunks rejected because the hand-off queue was full
    pub fn overflow_count(&self) -> usize {
        self.queue.overflow_count()
    }
}

fn build_stream(
    device_name: Option<&str>,
    requested_rate: u32,
    mut player: ChunkPlayer,
    running: Arc<AtomicBool>,
    error_tx: Sender<AudioError>,
) -> Result<(cpal::Stream, StreamConfig), AudioError> {
    let device = match device_name {
        Some(name) => find_output_device(name)?,
        None => cpal::default_host()
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))?,
    };

    let config = choose_config(&device, requested_rate)?;
    let channels = config.channels as usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                player.render(data, channels);
            },
            move |err| {
                error!("Output stream error: {}", err);
                running.store(false, Ordering::SeqCst);
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok((stream, config))
}

/// Requested rate if the device supports it as f32, else the device default
fn choose_config(device: &cpal::Device, requested_rate: u32) -> Result<StreamConfig, AudioError> {
    let wanted = cpal::SampleRate(requested_rate);
    if let Ok(configs) = device.supported_output_configs() {
        for range in configs {
            if range.sample_format() == SampleFormat::F32
                && range.min_sample_rate() <= wanted
                && wanted <= range.max_sample_rate()
            {
                return Ok(range.with_sample_rate(wanted).config());
            }
        }
    }

    let default = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
    if default.sample_format() != SampleFormat::F32 {
        return Err(AudioError::UnsupportedFormat(format!(
            "{:?}",
            default.sample_format()
        )));
    }
    debug!(
        "Output device does not support {} Hz, using {} Hz",
        requested_rate,
        default.sample_rate().0
    );
    Ok(default.config())
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        if self.is_running() {
            return Ok(());
        }
        self.control_tx
            .try_send(StreamControl::Play)
            .map_err(|e| AudioError::StreamError(e.to_string()))
    }

    fn schedule(&mut self, mut samples: Vec<f32>, start_at: f64) {
        self.shaper.process(&mut samples);
        let start_frame = (start_at * self.sample_rate as f64).round().max(0.0) as u64;
        if !self.queue.push(ScheduledChunk::new(start_frame, samples)) {
            debug!("Output queue full, chunk at frame {} dropped", start_frame);
        }
    }

    fn set_mode(&mut self, mode: ReceiverMode) {
        if self.shaper.mode() != mode {
            self.shaper = ToneShaper::for_mode(mode, self.sample_rate, self.volume);
        }
    }

    fn set_volume(&mut self, volume: u32) {
        self.volume = volume;
        self.shaper.set_volume(volume);
    }

    fn clear_scheduled(&mut self) {
        self.queue.clear();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}
