//! Error types for the audio client

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio output errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// The audio output subsystem cannot be created at all.
    /// Terminal for playback; never retried.
    #[error("Audio output unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Recording failed: {0}")]
    Recording(String),
}

/// Decoder errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Unsupported sample rate: {0}")]
    InvalidSampleRate(u32),
}

/// Transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("connect timeout")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Wire-level errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid session settings: {0}")]
    InvalidSettings(#[from] serde_json::Error),

    #[error("Session settings out of range: {0}")]
    SettingsOutOfRange(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
