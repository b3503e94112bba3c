//! Session settings message
//!
//! The server sends one JSON settings message per session before any binary
//! audio frame. It carries the rates needed to build the decoder and the
//! FFT geometry needed to turn a tuned frequency into an audio window.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::protocol::mode::{Demodulation, ReceiverMode};

/// Default SSB passband edges when the server does not send them
const DEFAULT_SSB_LOWCUT_HZ: f64 = 100.0;
const DEFAULT_SSB_HIGHCUT_HZ: f64 = 2800.0;

/// Server defaults for a fresh session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default)]
    pub frequency: f64,
    #[serde(default)]
    pub modulation: String,
    #[serde(default)]
    pub l: i32,
    #[serde(default)]
    pub m: f64,
    #[serde(default)]
    pub r: i32,
    #[serde(default)]
    pub ssb_lowcut_hz: Option<f64>,
    #[serde(default)]
    pub ssb_highcut_hz: Option<f64>,
    #[serde(default, alias = "squelch")]
    pub squelch_enabled: Option<bool>,
}

/// Session settings sent by the server on the audio socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub receiver_name: Option<String>,
    /// Receiver input sample rate
    pub sps: f64,
    /// Nominal audio codec rate
    pub audio_max_sps: f64,
    /// Size of the inverse FFT that produces audio
    pub audio_max_fft: i32,
    #[serde(default)]
    pub audio_compression: String,
    /// Number of spectral bins
    pub fft_result_size: i32,
    /// Frequency of bin 0 in Hz
    pub basefreq: f64,
    /// Bandwidth covered by all bins in Hz
    pub total_bandwidth: f64,
    #[serde(default)]
    pub smeter_offset: f64,
    #[serde(default)]
    pub grid_locator: String,
    #[serde(default)]
    pub defaults: SessionDefaults,
    #[serde(default)]
    pub audio_unique_id: Option<String>,
}

/// Audio passband in spectral bins
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioWindow {
    pub l: i32,
    pub m: f64,
    pub r: i32,
}

impl AudioWindow {
    pub fn new(l: i32, m: f64, r: i32) -> Self {
        Self { l, m, r }
    }
}

impl SessionSettings {
    /// Parse and sanity check a settings message
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let settings: SessionSettings = serde_json::from_str(text)?;
        if !(settings.audio_max_sps.is_finite() && settings.audio_max_sps >= 1.0) {
            return Err(ProtocolError::SettingsOutOfRange(format!(
                "audio_max_sps = {}",
                settings.audio_max_sps
            )));
        }
        if !(settings.sps.is_finite() && settings.sps > 0.0) || settings.fft_result_size <= 0 {
            return Err(ProtocolError::SettingsOutOfRange(format!(
                "sps = {}, fft_result_size = {}",
                settings.sps, settings.fft_result_size
            )));
        }
        Ok(settings)
    }

    /// Output rate requested from the audio device
    pub fn output_sample_rate(&self) -> u32 {
        self.audio_max_sps.round().max(1.0) as u32
    }

    /// Effective sample rate of the decoded stream.
    ///
    /// Audio is produced by an inverse FFT of `audio_max_fft` bins taken
    /// from each half-overlapped main FFT frame, so the real rate is
    /// `audio_max_fft / fft_size * sps` rather than `audio_max_sps`.
    pub fn true_audio_rate(&self) -> u32 {
        let real_input = self.total_bandwidth == self.sps / 2.0;
        let fft_size = self.fft_result_size as f64 * if real_input { 2.0 } else { 1.0 };
        let rate = (self.audio_max_fft as f64 / fft_size * self.sps).round();
        if rate.is_finite() {
            rate.max(1.0) as u32
        } else {
            1
        }
    }

    /// Mode suggested by the server defaults
    pub fn default_mode(&self) -> ReceiverMode {
        ReceiverMode::normalize(&self.defaults.modulation, ReceiverMode::Usb)
    }

    fn max_bin(&self) -> i32 {
        (self.fft_result_size - 1).max(0)
    }

    /// Compute the audio window for a tuned frequency.
    ///
    /// Sideband modes cover the SSB cut-offs on one side of the carrier;
    /// everything else is centered on the carrier with a span of
    /// `audio_max_fft` bins.
    pub fn audio_window(&self, demod: Demodulation, hz: f64) -> Option<AudioWindow> {
        // Bin arithmetic runs in i64; cut-off bins saturate near i32::MAX
        let max_idx = self.max_bin() as i64;
        let t = ((hz - self.basefreq) / self.total_bandwidth).clamp(0.0, 1.0);
        if !t.is_finite() {
            return None;
        }
        let m_idx = ((t * max_idx as f64).round() as i64).clamp(0, max_idx);
        let n = self.audio_max_fft as i64;
        if n <= 0 {
            return None;
        }
        let half = n / 2;
        let window = |l: i64, r: i64| Some(AudioWindow::new(l as i32, m_idx as f64, r as i32));

        let hz_per_bin = self.total_bandwidth / self.fft_result_size as f64;
        if hz_per_bin.is_finite() && hz_per_bin > 0.0 && demod.is_sideband() {
            let low_cut_hz = self
                .defaults
                .ssb_lowcut_hz
                .unwrap_or(DEFAULT_SSB_LOWCUT_HZ)
                .floor()
                .max(0.0);
            let high_cut_hz = self
                .defaults
                .ssb_highcut_hz
                .unwrap_or(DEFAULT_SSB_HIGHCUT_HZ)
                .floor()
                .max(low_cut_hz + 1.0);

            // Low edge rounds down, high edge rounds up: never narrower than asked.
            let low_raw = (low_cut_hz / hz_per_bin).floor() as i32 as i64;
            let low_bins = if low_cut_hz > 0.0 { low_raw.max(1) } else { low_raw.max(0) };
            let high_bins = ((high_cut_hz / hz_per_bin).ceil() as i32 as i64).max(low_bins + 1);

            if demod == Demodulation::Usb {
                let l = (m_idx + low_bins).clamp(0, max_idx);
                let mut r = (m_idx + high_bins).clamp(l, max_idx);
                if r - l > n {
                    r = (l + n).clamp(l, max_idx);
                }
                return window(l, r);
            }

            let mut l = (m_idx - high_bins).clamp(0, max_idx);
            let r = (m_idx - low_bins).clamp(l, max_idx);
            if r - l > n {
                l = (r - n).clamp(0, r);
            }
            return window(l, r);
        }

        let mut l = (m_idx - half).clamp(0, max_idx);
        let mut r = (l + n).clamp(l, max_idx);
        if r - l < 1 {
            r = max_idx.min(l + 1);
        }
        if r - l > n {
            l = (m_idx - half).clamp(0, (max_idx - n).max(0));
            r = (l + n).clamp(l, max_idx);
        }
        window(l, r)
    }

    /// Clamp an externally chosen window to the spectrum and the maximum span
    pub fn normalize_window(&self, w: AudioWindow) -> AudioWindow {
        let max = self.max_bin();
        let max_span = self.audio_max_fft;

        let mut l = w.l.clamp(0, max);
        let mut r = w.r.clamp(0, max);
        let m = (w.m.round() as i32).clamp(0, max);

        if r <= l {
            if l >= max {
                l = (max - 1).max(0);
            }
            r = max.min(l + 1);
        }

        if max_span > 0 && r - l > max_span {
            let half = max_span / 2;
            l = (m - half).clamp(0, (max - max_span).max(0));
            r = l + max_span;
        }
        AudioWindow::new(l, m as f64, r)
    }
}
