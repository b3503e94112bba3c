//! Receiver modes and the user-selectable audio presets

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mode selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReceiverMode {
    #[default]
    Usb,
    Lsb,
    Cw,
    Am,
    Sam,
    Fm,
    /// FM with a continuous-tone (CTCSS) squelch high-pass
    Fmc,
    Wbfm,
}

impl ReceiverMode {
    pub const ALL: [ReceiverMode; 8] = [
        ReceiverMode::Usb,
        ReceiverMode::Lsb,
        ReceiverMode::Cw,
        ReceiverMode::Am,
        ReceiverMode::Sam,
        ReceiverMode::Fm,
        ReceiverMode::Fmc,
        ReceiverMode::Wbfm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverMode::Usb => "USB",
            ReceiverMode::Lsb => "LSB",
            ReceiverMode::Cw => "CW",
            ReceiverMode::Am => "AM",
            ReceiverMode::Sam => "SAM",
            ReceiverMode::Fm => "FM",
            ReceiverMode::Fmc => "FMC",
            ReceiverMode::Wbfm => "WBFM",
        }
    }

    /// Demodulation actually requested from the server
    pub fn demodulation(&self) -> Demodulation {
        match self {
            ReceiverMode::Usb | ReceiverMode::Cw => Demodulation::Usb,
            ReceiverMode::Lsb => Demodulation::Lsb,
            ReceiverMode::Am => Demodulation::Am,
            ReceiverMode::Sam => Demodulation::Sam,
            ReceiverMode::Fm | ReceiverMode::Fmc | ReceiverMode::Wbfm => Demodulation::Fm,
        }
    }

    /// Parse a mode name, falling back when unknown
    pub fn normalize(raw: &str, fallback: ReceiverMode) -> ReceiverMode {
        raw.parse().unwrap_or(fallback)
    }
}

impl FromStr for ReceiverMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        ReceiverMode::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| format!("unknown receiver mode: {}", s))
    }
}

impl fmt::Display for ReceiverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side demodulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Demodulation {
    Usb,
    Lsb,
    Am,
    Sam,
    Fm,
}

impl Demodulation {
    pub fn is_sideband(&self) -> bool {
        matches!(self, Demodulation::Usb | Demodulation::Lsb)
    }
}

/// Jitter buffer preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BufferMode {
    /// Low latency, may drop out on slower links
    Low,
    #[default]
    Medium,
    /// More latency, more stability
    High,
}

impl BufferMode {
    /// Initial target lead in milliseconds
    pub fn lead_ms(&self) -> u32 {
        match self {
            BufferMode::Low => 60,
            BufferMode::Medium => 110,
            BufferMode::High => 200,
        }
    }

    pub fn lead_secs(&self) -> f64 {
        self.lead_ms() as f64 / 1000.0
    }
}

/// AGC speed profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgcSpeed {
    Off,
    Fast,
    #[default]
    Medium,
    Slow,
    /// Uses explicit attack/release times
    Custom,
}
