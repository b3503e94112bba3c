//! Decode engine
//!
//! Turns wire frames into PCM at the output rate. Owns the session's
//! `DecoderConfig` and the DSP processor built from it; DSP toggles are
//! applied only at frame boundaries, and a faulted processor is rebuilt on
//! the next frame instead of being reused.

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::codec::adpcm;
use crate::codec::dsp::{DspFactory, DspProcessor};
use crate::protocol::frame::WireFrame;

/// Payload codec carried in byte 5 of the wire frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WireCodec {
    /// Mono IMA-ADPCM blocks
    ImaAdpcm,
}

impl WireCodec {
    pub fn id(&self) -> u8 {
        match self {
            WireCodec::ImaAdpcm => 1,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(WireCodec::ImaAdpcm),
            _ => None,
        }
    }
}

/// Negotiated once per session; replaced, never mutated
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DecoderConfig {
    pub codec: WireCodec,
    /// Nominal codec rate announced by the server
    pub codec_rate: u32,
    /// Effective rate of the decoded stream
    pub input_rate: u32,
    /// Output device rate
    pub output_rate: u32,
}

/// Desired DSP toggles, read once per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DspIntent {
    /// Noise reduction
    pub nr: bool,
    /// Noise blanker
    pub nb: bool,
    /// Auto-notch
    pub an: bool,
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No session
    Idle,
    Active,
    /// Processor must be recreated before the next frame
    NeedsRebuild,
}

/// Decode engine
pub struct DecodeEngine<F: DspFactory> {
    factory: F,
    config: Option<DecoderConfig>,
    processor: Option<F::Processor>,
    state: EngineState,
    /// Noise blanker flag last applied to the live processor
    applied_nb: Option<bool>,
    frames_decoded: u64,
    frames_dropped: u64,
    rebuilds: u64,
}

impl<F: DspFactory> DecodeEngine<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            config: None,
            processor: None,
            state: EngineState::Idle,
            applied_nb: None,
            frames_decoded: 0,
            frames_dropped: 0,
            rebuilds: 0,
        }
    }

    /// Begin a session, releasing whatever the previous one held
    pub fn start_session(&mut self, config: DecoderConfig, intent: DspIntent) {
        self.release();
        self.config = Some(config);
        self.state = EngineState::NeedsRebuild;
        debug!(
            "Decoder session: codec {:?}, {} Hz in, {} Hz out",
            config.codec, config.input_rate, config.output_rate
        );
        if self.rebuild(intent) {
            self.state = EngineState::Active;
        }
    }

    /// End the session and release the processor
    pub fn end_session(&mut self) {
        self.release();
        self.config = None;
        self.state = EngineState::Idle;
    }

    fn release(&mut self) {
        if let Some(processor) = self.processor.take() {
            drop(processor);
            trace!("Decoder released");
        }
        self.applied_nb = None;
    }

    /// Recreate the processor from the current config and apply `intent`
    fn rebuild(&mut self, intent: DspIntent) -> bool {
        self.release();
        let Some(config) = self.config else {
            return false;
        };
        match self.factory.create(&config) {
            Ok(mut processor) => {
                processor.set_nr(intent.nr);
                processor.set_nb(intent.nb);
                processor.set_an(intent.an);
                self.processor = Some(processor);
                self.applied_nb = Some(intent.nb);
                self.rebuilds += 1;
                true
            }
            Err(e) => {
                warn!("Failed to create decoder: {}", e);
                false
            }
        }
    }

    /// Decode one frame.
    ///
    /// Returns `None` for dropped frames, unsupported codecs and frames that
    /// produce no audio yet.
    pub fn decode(&mut self, frame: &WireFrame, intent: DspIntent) -> Option<Vec<f32>> {
        let config = self.config?;

        // Enabling the noise blanker mid-stream corrupts processor state;
        // a fresh processor is built whenever the flag flips.
        if self.state == EngineState::Active && self.applied_nb != Some(intent.nb) {
            debug!("Noise blanker toggled, rebuilding decoder");
            self.state = EngineState::NeedsRebuild;
        }

        if self.state == EngineState::NeedsRebuild {
            if !self.rebuild(intent) {
                self.frames_dropped += 1;
                return None;
            }
            self.state = EngineState::Active;
        }

        let processor = self.processor.as_mut()?;
        processor.set_nr(intent.nr);
        processor.set_an(intent.an);

        if WireCodec::from_id(frame.codec) != Some(config.codec) {
            trace!("Dropping frame {} with codec {}", frame.frame_num, frame.codec);
            return None;
        }

        let pcm = match config.codec {
            WireCodec::ImaAdpcm => adpcm::decode_mono(&frame.payload),
        };
        if pcm.is_empty() {
            return None;
        }

        match processor.process(&pcm) {
            Ok(out) if out.is_empty() => None,
            Ok(out) => {
                self.frames_decoded += 1;
                Some(out)
            }
            Err(e) => {
                warn!("Decoder fault on frame {}: {}", frame.frame_num, e);
                self.state = EngineState::NeedsRebuild;
                self.frames_dropped += 1;
                None
            }
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> Option<&DecoderConfig> {
        self.config.as_ref()
    }

    pub fn has_session(&self) -> bool {
        self.config.is_some()
    }

    /// Get statistics
    pub fn stats(&self) -> DecodeStats {
        DecodeStats {
            frames_decoded: self.frames_decoded,
            frames_dropped: self.frames_dropped,
            rebuilds: self.rebuilds,
        }
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.frames_decoded = 0;
        self.frames_dropped = 0;
        self.rebuilds = 0;
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub rebuilds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use bytes::Bytes;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Create,
        Nr(bool),
        Nb(bool),
        An(bool),
        Process,
    }

    #[derive(Default)]
    struct Script {
        calls: Vec<Call>,
        fail_next: bool,
    }

    struct FakeProcessor {
        script: Rc<RefCell<Script>>,
    }

    impl DspProcessor for FakeProcessor {
        fn set_nr(&mut self, enabled: bool) {
            self.script.borrow_mut().calls.push(Call::Nr(enabled));
        }
        fn set_nb(&mut self, enabled: bool) {
            self.script.borrow_mut().calls.push(Call::Nb(enabled));
        }
        fn set_an(&mut self, enabled: bool) {
            self.script.borrow_mut().calls.push(Call::An(enabled));
        }
        fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, CodecError> {
            let mut script = self.script.borrow_mut();
            script.calls.push(Call::Process);
            if std::mem::take(&mut script.fail_next) {
                return Err(CodecError::DecodingFailed("trap".into()));
            }
            Ok(input.to_vec())
        }
    }

    struct FakeFactory {
        script: Rc<RefCell<Script>>,
    }

    impl DspFactory for FakeFactory {
        type Processor = FakeProcessor;

        fn create(&mut self, _config: &DecoderConfig) -> Result<FakeProcessor, CodecError> {
            self.script.borrow_mut().calls.push(Call::Create);
            Ok(FakeProcessor {
                script: self.script.clone(),
            })
        }
    }

    fn config() -> DecoderConfig {
        DecoderConfig {
            codec: WireCodec::ImaAdpcm,
            codec_rate: 12000,
            input_rate: 8000,
            output_rate: 12000,
        }
    }

    fn frame(codec: u8, samples: u16) -> WireFrame {
        let mut payload = vec![0u8, 0, 0, 0];
        payload.extend_from_slice(&samples.to_le_bytes());
        payload.extend(std::iter::repeat(0x11).take(samples as usize / 2));
        WireFrame {
            codec,
            frame_num: 1,
            l: 0,
            m: 0.0,
            r: 10,
            pwr: 1.0,
            payload: Bytes::from(payload),
        }
    }

    fn engine() -> (DecodeEngine<FakeFactory>, Rc<RefCell<Script>>) {
        let script = Rc::new(RefCell::new(Script::default()));
        let engine = DecodeEngine::new(FakeFactory {
            script: script.clone(),
        });
        (engine, script)
    }

    fn creates(script: &Rc<RefCell<Script>>) -> usize {
        script
            .borrow()
            .calls
            .iter()
            .filter(|c| **c == Call::Create)
            .count()
    }

    #[test]
    fn test_no_session_drops() {
        let (mut engine, script) = engine();
        assert!(engine.decode(&frame(1, 16), DspIntent::default()).is_none());
        assert!(script.borrow().calls.is_empty());
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_decode_produces_pcm() {
        let (mut engine, _script) = engine();
        engine.start_session(config(), DspIntent::default());
        let pcm = engine.decode(&frame(1, 16), DspIntent::default()).unwrap();
        assert_eq!(pcm.len(), 16);
        assert_eq!(engine.stats().frames_decoded, 1);
    }

    #[test]
    fn test_empty_payload_needs_more_data() {
        let (mut engine, _script) = engine();
        engine.start_session(config(), DspIntent::default());
        assert!(engine.decode(&frame(1, 0), DspIntent::default()).is_none());
        assert_eq!(engine.stats().frames_dropped, 0);
        assert_eq!(engine.state(), EngineState::Active);
    }

    #[test]
    fn test_unknown_codec_is_dropped_silently() {
        let (mut engine, _script) = engine();
        engine.start_session(config(), DspIntent::default());
        assert!(engine.decode(&frame(0, 16), DspIntent::default()).is_none());
        assert_eq!(engine.stats().frames_dropped, 0);
    }

    #[test]
    fn test_fault_rebuilds_on_next_frame() {
        let (mut engine, script) = engine();
        let intent = DspIntent { nr: true, nb: false, an: true };
        engine.start_session(config(), intent);
        assert_eq!(creates(&script), 1);

        script.borrow_mut().fail_next = true;
        assert!(engine.decode(&frame(1, 16), intent).is_none());
        assert_eq!(engine.state(), EngineState::NeedsRebuild);
        assert_eq!(engine.stats().frames_dropped, 1);

        script.borrow_mut().calls.clear();
        assert!(engine.decode(&frame(1, 16), intent).is_some());
        let calls = script.borrow().calls.clone();
        // Fresh processor with intent reapplied before processing
        assert_eq!(calls[0], Call::Create);
        assert!(calls[1..4].contains(&Call::Nr(true)));
        assert!(calls[1..4].contains(&Call::Nb(false)));
        assert!(calls[1..4].contains(&Call::An(true)));
        assert_eq!(calls.last(), Some(&Call::Process));
        assert_eq!(engine.state(), EngineState::Active);
    }

    #[test]
    fn test_noise_blanker_toggle_rebuilds_once() {
        let (mut engine, script) = engine();
        engine.start_session(config(), DspIntent::default());
        assert!(engine.decode(&frame(1, 16), DspIntent::default()).is_some());

        script.borrow_mut().calls.clear();
        let nb_on = DspIntent { nb: true, ..DspIntent::default() };
        assert!(engine.decode(&frame(1, 16), nb_on).is_some());
        {
            let calls = &script.borrow().calls;
            let create = calls.iter().position(|c| *c == Call::Create).unwrap();
            let process = calls.iter().position(|c| *c == Call::Process).unwrap();
            assert!(create < process);
            assert_eq!(creates(&script), 1);
        }

        // Steady state: no more rebuilds
        script.borrow_mut().calls.clear();
        assert!(engine.decode(&frame(1, 16), nb_on).is_some());
        assert_eq!(creates(&script), 0);
    }

    #[test]
    fn test_other_toggles_apply_in_place() {
        let (mut engine, script) = engine();
        engine.start_session(config(), DspIntent::default());
        script.borrow_mut().calls.clear();

        let intent = DspIntent { nr: true, nb: false, an: true };
        assert!(engine.decode(&frame(1, 16), intent).is_some());
        assert_eq!(creates(&script), 0);
        assert!(script.borrow().calls.contains(&Call::Nr(true)));
        assert!(script.borrow().calls.contains(&Call::An(true)));
    }

    #[test]
    fn test_end_session_releases() {
        let (mut engine, _script) = engine();
        engine.start_session(config(), DspIntent::default());
        engine.end_session();
        assert!(!engine.has_session());
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.decode(&frame(1, 16), DspIntent::default()).is_none());
    }

    #[test]
    fn test_native_chain_end_to_end() {
        use crate::codec::dsp::NativeDspFactory;

        let mut engine = DecodeEngine::new(NativeDspFactory);
        engine.start_session(config(), DspIntent::default());
        let pcm = engine.decode(&frame(1, 160), DspIntent::default()).unwrap();
        // 160 samples at 8 kHz resampled to 12 kHz
        assert!((pcm.len() as i64 - 240).abs() <= 2);
    }
}
