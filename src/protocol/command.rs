//! Outgoing control commands
//!
//! Serialized as JSON objects discriminated by `cmd`, e.g.
//! `{"cmd":"window","l":10,"m":12.0,"r":20}`.

use serde::{Deserialize, Serialize};

use crate::protocol::mode::{AgcSpeed, Demodulation};
use crate::protocol::settings::AudioWindow;

/// AGC profile as sent to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgcSetting {
    pub speed: AgcSpeed,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attack: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<u32>,
}

impl AgcSetting {
    /// Attack/release are only meaningful for the custom profile
    pub fn new(speed: AgcSpeed, attack_ms: u32, release_ms: u32) -> Self {
        match speed {
            AgcSpeed::Custom => Self {
                speed,
                attack: Some(attack_ms),
                release: Some(release_ms),
            },
            _ => Self {
                speed,
                attack: None,
                release: None,
            },
        }
    }
}

/// Client to server command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum ControlCommand {
    Receiver {
        receiver_id: String,
    },
    Window {
        l: i32,
        m: f64,
        r: i32,
    },
    Demodulation {
        demodulation: Demodulation,
    },
    Mute {
        mute: bool,
    },
    Squelch {
        enabled: bool,
    },
    Agc(AgcSetting),
    Options {
        options: serde_json::Value,
    },
    #[serde(rename = "userid")]
    UserId {
        userid: String,
    },
}

impl ControlCommand {
    pub fn window(w: AudioWindow) -> Self {
        ControlCommand::Window {
            l: w.l,
            m: w.m,
            r: w.r,
        }
    }

    /// Serialize for the wire
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
