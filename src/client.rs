//! Audio client
//!
//! Owns every piece of session state and reacts to transport events, user
//! commands and timer ticks on a single task. Readers (the HTTP API) only
//! ever see published snapshots.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::audio::gate::ResumeGate;
use crate::audio::output::{AudioOutput, OutputBackend};
use crate::audio::recorder::{Recorder, Recording, RecordingOutput};
use crate::audio::scheduler::PlaybackScheduler;
use crate::codec::decoder::{DecodeEngine, DecoderConfig, DspIntent, WireCodec};
use crate::codec::dsp::DspFactory;
use crate::config::AudioSettings;
use crate::constants::{
    CHANNEL_AUDIO, CHANNEL_CONTROL, PCM_TAP_CAPACITY, PUMP_INTERVAL, STATS_INTERVAL,
};
use crate::error::Result;
use crate::network::control::{CommandSink, ControlChannel};
use crate::network::health::{ConnectionHealthRegistry, HealthSnapshot};
use crate::network::transport::{LinkState, TransportChannel, TransportEvent};
use crate::protocol::command::{AgcSetting, ControlCommand};
use crate::protocol::frame::parse as parse_frame;
use crate::protocol::mode::ReceiverMode;
use crate::protocol::settings::{AudioWindow, SessionSettings};

/// Coarse client state shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    #[default]
    Connecting,
    Ready,
    Error,
}

/// Requests from the outside world
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    UpdateSettings(AudioSettings),
    SelectReceiver(String),
    Tune {
        frequency_hz: Option<f64>,
        mode: Option<ReceiverMode>,
        /// Explicit passband; replaces the one computed from the frequency
        window: Option<AudioWindow>,
    },
    /// A user gesture allowing playback to start
    Resume,
    StartRecording,
    /// Finish the recording and publish it
    StopRecording,
    Shutdown,
}

/// Decoded PCM handed to external consumers
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugStats {
    pub packets_received: u64,
    /// Decode drops plus scheduler drops
    pub packets_dropped: u64,
    pub current_latency_ms: f64,
    pub target_latency_ms: f64,
    pub queued_samples: usize,
    pub buffer_health: f64,
    pub decoder_rebuilds: u64,
    pub codec_rate: Option<u32>,
    pub output_rate: Option<u32>,
    /// PCM blocks a slow tap consumer missed
    pub pcm_tap_dropped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordingStatus {
    pub active: bool,
    pub recorded_secs: f64,
    /// Name of the last finished recording, if any
    pub last_file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientSnapshot {
    pub status: ClientStatus,
    pub error: Option<String>,
    pub needs_user_gesture: bool,
    pub power_db: Option<f64>,
    pub receiver_id: Option<String>,
    pub mode: ReceiverMode,
    pub frequency_hz: Option<f64>,
    pub grid_locator: Option<String>,
    pub settings: AudioSettings,
    pub stats: DebugStats,
    pub recording: RecordingStatus,
    pub updated_at_ms: i64,
}

/// Channels the client loop reads from and publishes to
pub struct ClientIo {
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub commands: mpsc::UnboundedReceiver<ClientCommand>,
    pub snapshot: watch::Sender<ClientSnapshot>,
    pub health: watch::Sender<HealthSnapshot>,
    pub recording: watch::Sender<Option<Arc<Recording>>>,
}

pub struct AudioClient<B: OutputBackend, F: DspFactory> {
    backend: B,
    output: Option<B::Output>,
    /// Rate the current output was requested at
    output_requested_rate: Option<u32>,
    /// Set once the output could not be created; playback stays off
    output_failure: Option<String>,
    engine: DecodeEngine<F>,
    scheduler: PlaybackScheduler,
    control: ControlChannel,
    registry: ConnectionHealthRegistry,
    health_dirty: bool,
    gate: ResumeGate,
    session: Option<SessionSettings>,
    listen: AudioSettings,
    receiver_id: Option<String>,
    user_id: Option<String>,
    mode_override: Option<ReceiverMode>,
    frequency_override: Option<f64>,
    explicit_window: Option<AudioWindow>,
    status: ClientStatus,
    error: Option<String>,
    needs_user_gesture: bool,
    power_db: Option<f64>,
    packets_received: u64,
    pcm_tap: Option<mpsc::Sender<PcmBlock>>,
    pcm_tap_dropped: u64,
    recorder: Option<Recorder>,
    /// Recording requested; starts once an output exists
    recording_armed: bool,
    last_recording: Option<Arc<Recording>>,
    recording_dirty: bool,
}

fn pump_output<O: AudioOutput + ?Sized>(
    scheduler: &mut PlaybackScheduler,
    output: &mut O,
    recorder: Option<&mut Recorder>,
    now: Instant,
) {
    match recorder {
        Some(recorder) => scheduler.pump(&mut RecordingOutput::new(output, recorder), now),
        None => scheduler.pump(output, now),
    }
}

impl<B: OutputBackend, F: DspFactory> AudioClient<B, F> {
    pub fn new(backend: B, factory: F, sink: Box<dyn CommandSink>, listen: AudioSettings) -> Self {
        let now = Instant::now();
        Self {
            backend,
            output: None,
            output_requested_rate: None,
            output_failure: None,
            engine: DecodeEngine::new(factory),
            scheduler: PlaybackScheduler::new(1, listen.buffer_mode, now),
            control: ControlChannel::new(sink),
            registry: ConnectionHealthRegistry::new(),
            health_dirty: false,
            gate: ResumeGate::new(),
            session: None,
            mode_override: listen.mode,
            frequency_override: listen.frequency_hz,
            listen,
            receiver_id: None,
            user_id: None,
            explicit_window: None,
            status: ClientStatus::Connecting,
            error: None,
            needs_user_gesture: false,
            power_db: None,
            packets_received: 0,
            pcm_tap: None,
            pcm_tap_dropped: 0,
            recorder: None,
            recording_armed: false,
            last_recording: None,
            recording_dirty: false,
        }
    }

    pub fn with_receiver(mut self, receiver_id: Option<String>) -> Self {
        self.receiver_id = receiver_id;
        self
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Subscribe to decoded PCM at the output rate.
    /// Blocks are dropped (and counted) while the consumer lags.
    pub fn pcm_tap(&mut self) -> mpsc::Receiver<PcmBlock> {
        self.pcm_tap_with_capacity(PCM_TAP_CAPACITY)
    }

    pub fn pcm_tap_with_capacity(&mut self, capacity: usize) -> mpsc::Receiver<PcmBlock> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.pcm_tap = Some(tx);
        rx
    }

    fn feed_tap(&mut self, pcm: &[f32], sample_rate: u32) {
        let Some(tap) = &self.pcm_tap else {
            return;
        };
        let block = PcmBlock {
            samples: pcm.to_vec(),
            sample_rate,
        };
        match tap.try_send(block) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => self.pcm_tap_dropped += 1,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("PCM tap dropped");
                self.pcm_tap = None;
            }
        }
    }

    fn dsp_intent(&self) -> DspIntent {
        DspIntent {
            nr: self.listen.nr,
            nb: self.listen.nb,
            an: self.listen.an,
        }
    }

    /// Mode in use: explicit choice, else the server default
    pub fn effective_mode(&self) -> ReceiverMode {
        self.mode_override
            .or_else(|| self.session.as_ref().map(|s| s.default_mode()))
            .unwrap_or_default()
    }

    pub fn frequency_hz(&self) -> Option<f64> {
        self.frequency_override.or_else(|| {
            self.session
                .as_ref()
                .map(|s| s.defaults.frequency)
                .filter(|hz| *hz > 0.0)
        })
    }

    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Status { state, message } => self.on_link_status(state, message),
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Text(text) => self.on_settings(&text, now),
            TransportEvent::Binary(data) => self.on_frame(&data, now),
            TransportEvent::Closed { reason } => self.on_closed(&reason),
        }
    }

    fn on_link_status(&mut self, state: LinkState, message: Option<String>) {
        // Commands ride the audio socket
        let control = self.registry.report(CHANNEL_CONTROL, state, message.clone());
        let audio = self.registry.report(CHANNEL_AUDIO, state, message);
        self.health_dirty |= audio || control;
    }

    fn on_opened(&mut self) {
        self.status = ClientStatus::Connecting;
        self.error = None;
        self.control.force_resync();
        if let Some(id) = self.receiver_id.clone() {
            self.control.select_receiver(&id);
        }
        if let Some(userid) = self.user_id.clone() {
            self.control.send(ControlCommand::UserId { userid });
        }
        self.sync_controls();
    }

    fn on_closed(&mut self, reason: &str) {
        debug!("Audio socket closed: {}", reason);
        self.end_session();
        self.status = ClientStatus::Connecting;
        self.error = None;
    }

    fn end_session(&mut self) {
        self.engine.end_session();
        self.scheduler.clear();
        if let Some(output) = self.output.as_mut() {
            output.clear_scheduled();
        }
        self.session = None;
    }

    /// Make sure an output exists at `rate`. False if playback is unavailable.
    fn ensure_output(&mut self, rate: u32) -> bool {
        if let Some(failure) = &self.output_failure {
            self.status = ClientStatus::Error;
            self.error = Some(failure.clone());
            return false;
        }
        if self.output.is_some() && self.output_requested_rate == Some(rate) {
            return true;
        }

        if self.output.is_some() {
            // A recording cannot change sample rate midway
            self.stop_recording();
            self.output = None;
            self.gate.unregister();
        }
        match self.backend.open(rate) {
            Ok(mut output) => {
                output.set_mode(self.effective_mode());
                output.set_volume(self.listen.volume);
                if self.gate.register() {
                    if let Err(e) = output.resume() {
                        warn!("Queued resume failed: {}", e);
                    }
                }
                info!(
                    "Audio output opened at {} Hz (requested {} Hz)",
                    output.sample_rate(),
                    rate
                );
                self.output = Some(output);
                self.output_requested_rate = Some(rate);
                self.ensure_recorder();
                true
            }
            Err(e) => {
                warn!("Audio output unavailable: {}", e);
                let message = e.to_string();
                self.output_failure = Some(message.clone());
                self.status = ClientStatus::Error;
                self.error = Some(message);
                false
            }
        }
    }

    fn on_settings(&mut self, text: &str, now: Instant) {
        let settings = match SessionSettings::from_json(text) {
            Ok(s) => s,
            Err(e) => {
                warn!("Rejected session settings: {}", e);
                self.status = ClientStatus::Error;
                self.error = Some(e.to_string());
                return;
            }
        };

        if let (Some(wanted), Some(got)) = (&self.receiver_id, &settings.receiver_id) {
            if wanted != got {
                debug!("Ignoring settings for receiver {} (want {})", got, wanted);
                return;
            }
        }

        let codec_rate = settings.output_sample_rate();
        let input_rate = settings.true_audio_rate();
        if !self.ensure_output(codec_rate) {
            return;
        }
        let Some(output) = self.output.as_mut() else {
            return;
        };
        let output_rate = output.sample_rate();
        output.clear_scheduled();
        self.scheduler
            .reset_session(output_rate, output.current_time(), self.listen.buffer_mode, now);
        self.packets_received = 0;
        self.engine.reset_stats();

        let config = DecoderConfig {
            codec: WireCodec::ImaAdpcm,
            codec_rate,
            input_rate,
            output_rate,
        };
        let intent = self.dsp_intent();
        self.engine.start_session(config, intent);
        info!(
            "Session started: receiver {:?}, {} Hz stream, {} Hz output",
            settings.receiver_id, input_rate, output_rate
        );

        self.session = Some(settings);
        self.apply_mode();
        self.control.force_resync();
        self.sync_controls();
    }

    fn on_frame(&mut self, data: &[u8], now: Instant) {
        let Some(frame) = parse_frame(data) else {
            trace!("Dropping malformed frame ({} bytes)", data.len());
            return;
        };
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !self.engine.has_session() {
            return;
        }

        self.packets_received += 1;
        self.power_db = Some(frame.power_db(session.smeter_offset));

        let intent = self.dsp_intent();
        let Some(output) = self.output.as_mut() else {
            return;
        };
        if !output.is_running() {
            self.needs_user_gesture = true;
            return;
        }

        let Some(pcm) = self.engine.decode(&frame, intent) else {
            return;
        };

        let sample_rate = output.sample_rate();
        self.feed_tap(&pcm, sample_rate);

        self.scheduler.enqueue(pcm);
        if let Some(output) = self.output.as_mut() {
            pump_output(&mut self.scheduler, output, self.recorder.as_mut(), now);
        }
        self.status = ClientStatus::Ready;
        self.error = None;
    }

    /// Bring the server in line with the current intent
    pub fn sync_controls(&mut self) {
        let demodulation = self.effective_mode().demodulation();
        self.control.set_demodulation(demodulation);

        let Some(session) = self.session.as_ref() else {
            return;
        };
        let window = match self.explicit_window {
            Some(w) => Some(session.normalize_window(w)),
            None => self
                .frequency_hz()
                .and_then(|hz| session.audio_window(demodulation, hz)),
        };
        if let Some(window) = window {
            self.control.set_window(window);
        }
        self.control.set_mute(self.listen.mute);
        self.control.set_squelch(self.listen.squelch);
        self.control.set_agc(AgcSetting::new(
            self.listen.agc_speed,
            self.listen.agc_attack_ms,
            self.listen.agc_release_ms,
        ));
    }

    pub fn handle_command(&mut self, command: ClientCommand, now: Instant) {
        match command {
            ClientCommand::UpdateSettings(settings) => self.update_settings(settings),
            ClientCommand::SelectReceiver(id) => self.select_receiver(id),
            ClientCommand::Tune {
                frequency_hz,
                mode,
                window,
            } => self.tune(frequency_hz, mode, window),
            ClientCommand::Resume => self.resume(),
            ClientCommand::StartRecording => self.start_recording(),
            ClientCommand::StopRecording => self.stop_recording(),
            ClientCommand::Shutdown => {}
        }
        self.tick(now);
    }

    fn update_settings(&mut self, settings: AudioSettings) {
        if settings.buffer_mode != self.listen.buffer_mode {
            self.scheduler.set_preset(settings.buffer_mode);
        }
        if let Some(output) = self.output.as_mut() {
            output.set_volume(settings.volume);
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.set_volume(settings.volume);
        }
        let mode_changed = settings.mode != self.listen.mode;
        let frequency_changed = settings.frequency_hz != self.listen.frequency_hz;
        self.listen = settings;

        if mode_changed {
            self.mode_override = self.listen.mode;
            self.apply_mode();
        }
        if frequency_changed {
            self.frequency_override = self.listen.frequency_hz;
            self.explicit_window = None;
        }
        self.sync_controls();
    }

    /// Push the effective mode to the output chain
    fn apply_mode(&mut self) {
        let mode = self.effective_mode();
        if let Some(output) = self.output.as_mut() {
            output.set_mode(mode);
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.set_mode(mode);
        }
    }

    fn select_receiver(&mut self, receiver_id: String) {
        info!("Switching to receiver {}", receiver_id);
        self.control.force_resync();
        self.end_session();
        self.status = ClientStatus::Connecting;
        self.error = None;
        self.power_db = None;
        self.control.select_receiver(&receiver_id);
        self.receiver_id = Some(receiver_id);
    }

    fn tune(&mut self, frequency_hz: Option<f64>, mode: Option<ReceiverMode>, window: Option<AudioWindow>) {
        if let Some(hz) = frequency_hz {
            self.frequency_override = Some(hz);
            self.listen.frequency_hz = Some(hz);
            self.explicit_window = None;
        }
        if let Some(mode) = mode {
            self.mode_override = Some(mode);
            self.listen.mode = Some(mode);
            self.apply_mode();
        }
        if window.is_some() {
            self.explicit_window = window;
        }
        self.sync_controls();
    }

    fn resume(&mut self) {
        if !self.gate.trigger() {
            debug!("Resume queued until an output exists");
            return;
        }
        if let Some(output) = self.output.as_mut() {
            match output.resume() {
                Ok(()) => self.needs_user_gesture = false,
                Err(e) => warn!("Resume failed: {}", e),
            }
        }
    }

    fn ensure_recorder(&mut self) {
        if !self.recording_armed || self.recorder.is_some() {
            return;
        }
        let Some(output) = self.output.as_ref() else {
            return;
        };
        self.recorder = Some(Recorder::start(
            output.sample_rate(),
            self.effective_mode(),
            self.listen.volume,
        ));
    }

    fn start_recording(&mut self) {
        if self.recording_armed {
            return;
        }
        self.recording_armed = true;
        self.ensure_recorder();
        if self.recorder.is_none() {
            debug!("Recording starts when audio output opens");
        }
    }

    fn stop_recording(&mut self) {
        self.recording_armed = false;
        let Some(recorder) = self.recorder.take() else {
            return;
        };
        match recorder.finish() {
            Ok(recording) => {
                self.last_recording = Some(Arc::new(recording));
                self.recording_dirty = true;
            }
            Err(e) => warn!("Could not finish recording: {}", e),
        }
    }

    pub fn last_recording(&self) -> Option<Arc<Recording>> {
        self.last_recording.clone()
    }

    fn take_recording_change(&mut self) -> bool {
        std::mem::take(&mut self.recording_dirty)
    }

    /// Periodic pump
    pub fn tick(&mut self, now: Instant) {
        if let Some(output) = self.output.as_mut() {
            if self.needs_user_gesture && output.is_running() {
                self.needs_user_gesture = false;
            }
            pump_output(&mut self.scheduler, output, self.recorder.as_mut(), now);
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        self.registry.snapshot()
    }

    fn take_health_change(&mut self) -> bool {
        std::mem::take(&mut self.health_dirty)
    }

    pub fn debug_stats(&self) -> DebugStats {
        let decode = self.engine.stats();
        let clock = self.output.as_ref().map(|o| o.current_time()).unwrap_or(0.0);
        let playback = self.scheduler.stats(clock);
        let config = self.engine.config();
        DebugStats {
            packets_received: self.packets_received,
            packets_dropped: decode.frames_dropped + playback.chunks_dropped,
            current_latency_ms: playback.current_latency_ms,
            target_latency_ms: playback.target_latency_ms,
            queued_samples: playback.queued_samples,
            buffer_health: playback.buffer_health,
            decoder_rebuilds: decode.rebuilds,
            codec_rate: config.map(|c| c.codec_rate),
            output_rate: self.output.as_ref().map(|o| o.sample_rate()),
            pcm_tap_dropped: self.pcm_tap_dropped,
        }
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            status: self.status,
            error: self.error.clone(),
            needs_user_gesture: self.needs_user_gesture,
            power_db: self.power_db,
            receiver_id: self.receiver_id.clone(),
            mode: self.effective_mode(),
            frequency_hz: self.frequency_hz(),
            grid_locator: self
                .session
                .as_ref()
                .map(|s| s.grid_locator.clone())
                .filter(|g| !g.is_empty()),
            settings: self.listen.clone(),
            stats: self.debug_stats(),
            recording: RecordingStatus {
                active: self.recording_armed,
                recorded_secs: self.recorder.as_ref().map(|r| r.duration_secs()).unwrap_or(0.0),
                last_file: self.last_recording.as_ref().map(|r| r.file_name()),
            },
            updated_at_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Drive the client until shutdown
    pub async fn run(mut self, mut transport: TransportChannel, mut io: ClientIo) -> Result<()> {
        let mut pump = tokio::time::interval(PUMP_INTERVAL);
        pump.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats = tokio::time::interval(STATS_INTERVAL);
        stats.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = io.events.recv() => match event {
                    Some(event) => self.handle_event(event, Instant::now()),
                    None => break,
                },
                command = io.commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command, Instant::now()),
                },
                _ = pump.tick() => self.tick(Instant::now()),
                _ = stats.tick() => {
                    io.snapshot.send_replace(self.snapshot());
                }
            }

            if self.take_health_change() {
                io.health.send_replace(self.registry.snapshot());
            }
            if self.take_recording_change() {
                io.recording.send_replace(self.last_recording.clone());
                io.snapshot.send_replace(self.snapshot());
            }
        }

        info!("Shutting down audio client");
        self.stop_recording();
        if self.take_recording_change() {
            io.recording.send_replace(self.last_recording.clone());
        }
        transport.close();
        self.end_session();
        self.gate.unregister();
        self.output = None;
        transport.join().await;

        while let Ok(event) = io.events.try_recv() {
            if let TransportEvent::Status { state, message } = event {
                self.on_link_status(state, message);
            }
        }
        io.health.send_replace(self.registry.snapshot());
        io.snapshot.send_replace(self.snapshot());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::testing::ManualBackend;
    use crate::codec::dsp::NativeDspFactory;
    use crate::network::control::testing::RecordingSink;
    use crate::protocol::frame::{FRAME_MAGIC, FRAME_VERSION};
    use crate::protocol::mode::AgcSpeed;
    use bytes::BufMut;
    use serde_json::{json, Value};

    type TestClient = AudioClient<ManualBackend, NativeDspFactory>;

    // 8 kHz stream (1024 / 262144 * 2048000) played at 8 kHz
    const SETTINGS: &str = r#"{
        "receiver_id": "rx0",
        "sps": 2048000,
        "audio_max_sps": 8000,
        "audio_max_fft": 1024,
        "fft_result_size": 131072,
        "basefreq": 0,
        "total_bandwidth": 1024000,
        "smeter_offset": -10,
        "grid_locator": "JO22",
        "defaults": {"frequency": 100000, "modulation": "USB", "l": 0, "m": 0, "r": 0}
    }"#;

    fn client(start_running: bool) -> (RecordingSink, TestClient) {
        let sink = RecordingSink::default();
        let backend = ManualBackend {
            start_running,
            ..Default::default()
        };
        let client = AudioClient::new(
            backend,
            NativeDspFactory,
            Box::new(sink.clone()),
            AudioSettings::default(),
        )
        .with_receiver(Some("rx0".to_string()));
        (sink, client)
    }

    fn frame(samples: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_slice(&FRAME_MAGIC);
        buf.put_u8(FRAME_VERSION);
        buf.put_u8(1);
        buf.put_u16_le(0);
        buf.put_u64_le(1);
        buf.put_i32_le(10);
        buf.put_f64_le(15.0);
        buf.put_i32_le(20);
        buf.put_f32_le(100.0);
        // ADPCM block: predictor, index, reserved, count, codes
        buf.put_i16_le(1000);
        buf.put_u8(10);
        buf.put_u8(0);
        buf.put_u16_le(samples);
        buf.put_slice(&vec![0x11; samples as usize / 2]);
        buf
    }

    fn cmds(values: &[Value]) -> Vec<&str> {
        values.iter().map(|v| v["cmd"].as_str().unwrap()).collect()
    }

    #[test]
    fn test_settings_start_session_and_sync() {
        let (sink, mut c) = client(true);
        let now = Instant::now();
        c.handle_event(TransportEvent::Opened, now);
        let sent = sink.take();
        assert_eq!(sent[0], json!({"cmd": "receiver", "receiver_id": "rx0"}));
        assert_eq!(sent[1], json!({"cmd": "demodulation", "demodulation": "USB"}));

        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        assert!(c.engine.has_session());
        assert_eq!(c.backend.opened, vec![8000]);
        let config = c.engine.config().copied().unwrap();
        assert_eq!(config.input_rate, 8000);
        assert_eq!(config.output_rate, 8000);

        // Resync after a new session retransmits everything
        assert_eq!(
            cmds(&sink.take()),
            vec!["demodulation", "window", "mute", "squelch", "agc"]
        );
        assert_eq!(c.snapshot().grid_locator.as_deref(), Some("JO22"));
    }

    #[test]
    fn test_settings_for_other_receiver_ignored() {
        let (_, mut c) = client(true);
        let other = SETTINGS.replace("\"rx0\"", "\"rx9\"");
        c.handle_event(TransportEvent::Text(other), Instant::now());
        assert!(!c.engine.has_session());
        assert!(c.backend.opened.is_empty());
    }

    #[test]
    fn test_malformed_settings_is_error() {
        let (_, mut c) = client(true);
        c.handle_event(TransportEvent::Text("{\"sps\": \"x\"}".into()), Instant::now());
        let snap = c.snapshot();
        assert_eq!(snap.status, ClientStatus::Error);
        assert!(snap.error.is_some());
        assert!(!c.engine.has_session());
    }

    #[test]
    fn test_output_failure_is_terminal() {
        let (_, mut c) = client(true);
        c.backend.fail = true;
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), Instant::now());
        assert_eq!(c.snapshot().status, ClientStatus::Error);

        c.backend.fail = false;
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), Instant::now());
        assert!(c.backend.opened.is_empty());
        assert!(!c.engine.has_session());
    }

    #[test]
    fn test_frames_play_and_report() {
        let (_, mut c) = client(true);
        let now = Instant::now();
        let mut tap = c.pcm_tap();
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);

        for _ in 0..5 {
            c.handle_event(TransportEvent::Binary(frame(160).into()), now);
        }

        let snap = c.snapshot();
        assert_eq!(snap.status, ClientStatus::Ready);
        assert_eq!(snap.stats.packets_received, 5);
        assert_eq!(snap.stats.output_rate, Some(8000));
        // pwr 100 over 10 bins: 10*log10(1) - 10
        assert!((snap.power_db.unwrap() + 10.0).abs() < 1e-9);
        assert!(!c.output.as_ref().unwrap().scheduled.is_empty());

        let block = tap.try_recv().unwrap();
        assert_eq!(block.sample_rate, 8000);
        assert_eq!(block.samples.len(), 160);
    }

    #[test]
    fn test_frames_before_settings_ignored() {
        let (_, mut c) = client(true);
        c.handle_event(TransportEvent::Binary(frame(160).into()), Instant::now());
        c.handle_event(TransportEvent::Binary(vec![1, 2, 3].into()), Instant::now());
        assert_eq!(c.debug_stats().packets_received, 0);
    }

    #[test]
    fn test_suspended_output_needs_gesture() {
        let (_, mut c) = client(false);
        let now = Instant::now();
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        c.handle_event(TransportEvent::Binary(frame(160).into()), now);

        assert!(c.snapshot().needs_user_gesture);
        assert!(c.output.as_ref().unwrap().scheduled.is_empty());
        assert_eq!(c.engine.stats().frames_decoded, 0);

        c.handle_command(ClientCommand::Resume, now);
        assert!(!c.snapshot().needs_user_gesture);
        assert_eq!(c.output.as_ref().unwrap().resumes, 1);
    }

    #[test]
    fn test_resume_before_output_is_queued() {
        let (_, mut c) = client(false);
        let now = Instant::now();
        c.handle_command(ClientCommand::Resume, now);
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        let output = c.output.as_ref().unwrap();
        assert_eq!(output.resumes, 1);
        assert!(output.running);
    }

    #[test]
    fn test_close_ends_session() {
        let (_, mut c) = client(true);
        let now = Instant::now();
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        c.handle_event(
            TransportEvent::Closed {
                reason: "reset".into(),
            },
            now,
        );
        assert!(!c.engine.has_session());
        assert_eq!(c.scheduler.queued_samples(), 0);
        assert_eq!(c.snapshot().status, ClientStatus::Connecting);
    }

    #[test]
    fn test_receiver_switch_resets() {
        let (sink, mut c) = client(true);
        let now = Instant::now();
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        c.handle_event(TransportEvent::Binary(frame(160).into()), now);
        assert_eq!(c.snapshot().status, ClientStatus::Ready);
        assert!(c.snapshot().power_db.is_some());
        sink.take();

        c.handle_command(ClientCommand::SelectReceiver("rx1".into()), now);
        assert!(!c.engine.has_session());
        let snap = c.snapshot();
        assert_eq!(snap.status, ClientStatus::Connecting);
        assert_eq!(snap.error, None);
        assert_eq!(snap.power_db, None);
        assert_eq!(snap.receiver_id.as_deref(), Some("rx1"));
        assert_eq!(c.control.tracker().mute, None);
        assert_eq!(
            sink.take(),
            vec![json!({"cmd": "receiver", "receiver_id": "rx1"})]
        );

        // Settings from the old receiver are now ignored
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        assert!(!c.engine.has_session());
    }

    #[test]
    fn test_effective_demodulation_and_custom_agc() {
        let (sink, mut c) = client(true);
        let now = Instant::now();
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        sink.take();

        c.handle_command(
            ClientCommand::Tune {
                frequency_hz: None,
                mode: Some(ReceiverMode::Fmc),
                window: None,
            },
            now,
        );
        let sent = sink.take();
        assert_eq!(sent[0], json!({"cmd": "demodulation", "demodulation": "FM"}));
        assert_eq!(c.output.as_ref().unwrap().mode, Some(ReceiverMode::Fmc));

        let settings = AudioSettings {
            agc_speed: AgcSpeed::Custom,
            agc_attack_ms: 3,
            agc_release_ms: 120,
            ..c.snapshot().settings
        };
        c.handle_command(ClientCommand::UpdateSettings(settings), now);
        assert_eq!(
            sink.take(),
            vec![json!({"cmd": "agc", "speed": "custom", "attack": 3, "release": 120})]
        );
    }

    #[test]
    fn test_settings_mode_change_retunes() {
        let (sink, mut c) = client(true);
        let now = Instant::now();
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        sink.take();

        let settings = AudioSettings {
            mode: Some(ReceiverMode::Lsb),
            ..c.snapshot().settings
        };
        c.handle_command(ClientCommand::UpdateSettings(settings), now);
        let sent = sink.take();
        assert_eq!(cmds(&sent), vec!["demodulation", "window"]);
        assert_eq!(sent[0], json!({"cmd": "demodulation", "demodulation": "LSB"}));
        assert_eq!(c.output.as_ref().unwrap().mode, Some(ReceiverMode::Lsb));
        assert_eq!(c.snapshot().mode, ReceiverMode::Lsb);

        // Same settings again change nothing
        c.handle_command(ClientCommand::UpdateSettings(c.snapshot().settings), now);
        assert!(sink.take().is_empty());

        let settings = AudioSettings {
            frequency_hz: Some(150_000.0),
            ..c.snapshot().settings
        };
        c.handle_command(ClientCommand::UpdateSettings(settings), now);
        assert_eq!(cmds(&sink.take()), vec!["window"]);
        assert_eq!(c.snapshot().frequency_hz, Some(150_000.0));
    }

    #[test]
    fn test_tune_keeps_settings_in_step() {
        let (_, mut c) = client(true);
        let now = Instant::now();
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        c.handle_command(
            ClientCommand::Tune {
                frequency_hz: Some(120_000.0),
                mode: Some(ReceiverMode::Am),
                window: None,
            },
            now,
        );
        let settings = c.snapshot().settings;
        assert_eq!(settings.mode, Some(ReceiverMode::Am));
        assert_eq!(settings.frequency_hz, Some(120_000.0));
    }

    #[test]
    fn test_slow_tap_drops_blocks() {
        let (_, mut c) = client(true);
        let now = Instant::now();
        let mut tap = c.pcm_tap_with_capacity(1);
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        for _ in 0..3 {
            c.handle_event(TransportEvent::Binary(frame(160).into()), now);
        }
        assert_eq!(c.debug_stats().pcm_tap_dropped, 2);
        assert_eq!(c.debug_stats().packets_received, 3);
        assert!(tap.try_recv().is_ok());
        assert!(tap.try_recv().is_err());

        // Playback is unaffected by the lagging consumer
        let played: usize = c.output.as_ref().unwrap().scheduled.iter().map(|(_, n)| n).sum();
        assert_eq!(played, 480);

        drop(tap);
        c.handle_event(TransportEvent::Binary(frame(160).into()), now);
        assert!(c.pcm_tap.is_none());
        assert_eq!(c.debug_stats().pcm_tap_dropped, 2);
    }

    #[test]
    fn test_recording_captures_played_audio() {
        let (_, mut c) = client(true);
        let now = Instant::now();
        // Armed before any output exists
        c.handle_command(ClientCommand::StartRecording, now);
        assert!(c.snapshot().recording.active);
        assert!(c.recorder.is_none());

        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        assert!(c.recorder.is_some());
        for _ in 0..6 {
            c.handle_event(TransportEvent::Binary(frame(160).into()), now);
        }
        c.tick(now);
        assert!(c.snapshot().recording.recorded_secs > 0.0);

        c.handle_command(ClientCommand::StopRecording, now);
        assert!(c.take_recording_change());
        let snap = c.snapshot();
        assert!(!snap.recording.active);

        let recording = c.last_recording().unwrap();
        let played: usize = c.output.as_ref().unwrap().scheduled.iter().map(|(_, n)| n).sum();
        assert!(played > 0);
        assert_eq!(recording.samples, played as u64);
        assert_eq!(snap.recording.last_file, Some(recording.file_name()));

        let reader = hound::WavReader::new(std::io::Cursor::new(recording.wav.to_vec())).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.len() as usize, played);

        // Later playback is not recorded
        c.handle_event(TransportEvent::Binary(frame(160).into()), now);
        assert!(c.recorder.is_none());
        assert!(!c.take_recording_change());
    }

    #[test]
    fn test_output_reopen_finishes_recording() {
        let (_, mut c) = client(true);
        let now = Instant::now();
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        c.handle_command(ClientCommand::StartRecording, now);
        c.handle_event(TransportEvent::Binary(frame(160).into()), now);

        let faster = SETTINGS.replace("\"audio_max_sps\": 8000", "\"audio_max_sps\": 16000");
        c.handle_event(TransportEvent::Text(faster), now);
        assert_eq!(c.backend.opened, vec![8000, 16000]);
        assert!(c.take_recording_change());
        assert_eq!(c.last_recording().unwrap().sample_rate, 8000);
        assert!(c.recorder.is_none());
        assert!(!c.snapshot().recording.active);
    }

    #[test]
    fn test_explicit_window_is_normalized() {
        let (sink, mut c) = client(true);
        let now = Instant::now();
        c.handle_event(TransportEvent::Text(SETTINGS.to_string()), now);
        sink.take();

        c.handle_command(
            ClientCommand::Tune {
                frequency_hz: None,
                mode: None,
                window: Some(AudioWindow::new(50, 52.0, 50)),
            },
            now,
        );
        assert_eq!(
            sink.take(),
            vec![json!({"cmd": "window", "l": 50, "m": 52.0, "r": 51})]
        );
    }

    #[test]
    fn test_link_status_reaches_registry() {
        let (_, mut c) = client(true);
        c.handle_event(
            TransportEvent::Status {
                state: LinkState::Connected,
                message: None,
            },
            Instant::now(),
        );
        assert!(c.take_health_change());
        assert!(!c.take_health_change());
        assert!(c.health().ever_connected);
        assert_eq!(c.health().get(CHANNEL_AUDIO).unwrap().state, LinkState::Connected);
        assert_eq!(c.health().get(CHANNEL_CONTROL).unwrap().state, LinkState::Connected);
    }
}
