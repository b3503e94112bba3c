//! Payload decoding and the per-session DSP chain
//!
//! Wire payloads are IMA-ADPCM blocks; the decode engine expands them and
//! runs the DSP processor for the active session.

pub mod adpcm;
pub mod decoder;
pub mod dsp;

pub use decoder::{DecodeEngine, DecoderConfig, DspIntent, WireCodec};
pub use dsp::{DspFactory, DspProcessor, NativeDspFactory};
