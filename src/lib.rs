//! # WebSDR Audio Client
//!
//! Native low-latency playback of a remote receiver's narrowband audio stream.
//!
//! ## Architecture Overview
//!
//! ```text
//!            WebSDR server  (/audio WebSocket)
//!   settings JSON │   NSDA frames │          ▲ control commands
//!                 ▼               ▼          │
//!  ┌────────────────────────────────────────────────────────┐
//!  │ TransportChannel  backoff + connect timeout ──► health │
//!  └───────┬───────────────────────┬──────────────▲─────────┘
//!          ▼                       ▼              │
//!   SessionSettings           FrameCodec    ControlChannel
//!          │                       │         (dedup, resync)
//!          ▼                       ▼              ▲
//!  ┌────────────────────────────────────────────────────────┐
//!  │ AudioClient (single task)                              │
//!  │   DecodeEngine: ADPCM ─► NB ─► NR ─► AN ─► resample    │
//!  │   PlaybackScheduler: adaptive lead 60..280 ms          │
//!  └───────────────────────────┬────────────────────────────┘
//!                              ▼
//!              ToneShaper ─► ArrayQueue ─► cpal callback
//! ```

pub mod audio;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default server audio endpoint
    pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:9002/audio";

    /// Default connect timeout for the audio socket
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 6_000;

    /// Connect timeouts below this are raised to it
    pub const MIN_CONNECT_TIMEOUT_MS: u64 = 1_000;

    /// Default HTTP port for the status API
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Scheduler tick when no frames arrive
    pub const PUMP_INTERVAL: Duration = Duration::from_millis(20);

    /// Debug stats publish interval
    pub const STATS_INTERVAL: Duration = Duration::from_millis(250);

    /// Hand-off queue capacity between scheduler and audio callback (chunks)
    pub const OUTPUT_QUEUE_CAPACITY: usize = 256;

    /// PCM tap queue capacity (blocks); extra blocks are dropped
    pub const PCM_TAP_CAPACITY: usize = 64;

    /// Health registry channel names
    pub const CHANNEL_AUDIO: &str = "audio";
    pub const CHANNEL_WATERFALL: &str = "waterfall";
    pub const CHANNEL_CONTROL: &str = "control";
    pub const CHANNEL_CHAT: &str = "chat";
}
