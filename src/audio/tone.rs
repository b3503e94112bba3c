//! Output filter routing by receiver mode
//!
//! AM-family modes get a bass lift, FM gets a lighter one, and FM with CTCSS
//! squelch strips the sub-audible tone before a small shelf. The chain ends
//! in a volume gain stage.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};
use tracing::warn;

use crate::protocol::mode::ReceiverMode;

/// Gain at volume 100
const UNITY_VOLUME_GAIN: f32 = 5.0;
const MAX_GAIN: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    LowShelf { freq_hz: f32, gain_db: f32 },
    HighPass { freq_hz: f32 },
}

fn stages_for(mode: ReceiverMode) -> &'static [Stage] {
    match mode {
        ReceiverMode::Am | ReceiverMode::Sam => &[Stage::LowShelf {
            freq_hz: 140.0,
            gain_db: 12.0,
        }],
        ReceiverMode::Fm => &[Stage::LowShelf {
            freq_hz: 120.0,
            gain_db: 6.0,
        }],
        ReceiverMode::Fmc => &[
            Stage::HighPass { freq_hz: 300.0 },
            Stage::LowShelf {
                freq_hz: 300.0,
                gain_db: 2.0,
            },
        ],
        _ => &[],
    }
}

/// Map a 0..=160 volume to linear gain
pub fn volume_gain(volume: u32) -> f32 {
    (volume as f32 / 100.0 * UNITY_VOLUME_GAIN).clamp(0.0, MAX_GAIN)
}

/// Per-mode filter chain plus gain. Filter state persists across calls.
pub struct ToneShaper {
    mode: ReceiverMode,
    filters: Vec<DirectForm2Transposed<f32>>,
    gain: f32,
}

impl ToneShaper {
    pub fn for_mode(mode: ReceiverMode, sample_rate: u32, volume: u32) -> Self {
        let fs = sample_rate as f32;
        let filters = stages_for(mode)
            .iter()
            .filter_map(|stage| {
                let (filter, f0) = match *stage {
                    Stage::LowShelf { freq_hz, gain_db } => (Type::LowShelf(gain_db), freq_hz),
                    Stage::HighPass { freq_hz } => (Type::HighPass, freq_hz),
                };
                match Coefficients::<f32>::from_params(filter, fs.hz(), f0.hz(), Q_BUTTERWORTH_F32)
                {
                    Ok(coeffs) => Some(DirectForm2Transposed::<f32>::new(coeffs)),
                    Err(e) => {
                        warn!("Skipping {:?} at {} Hz: {:?}", stage, sample_rate, e);
                        None
                    }
                }
            })
            .collect();

        Self {
            mode,
            filters,
            gain: volume_gain(volume),
        }
    }

    pub fn mode(&self) -> ReceiverMode {
        self.mode
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_volume(&mut self, volume: u32) {
        self.gain = volume_gain(volume);
    }

    /// Process samples in place
    pub fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let mut x = *s;
            for filter in self.filters.iter_mut() {
                x = filter.run(x);
            }
            *s = x * self.gain;
        }
    }
}
