//! Audio wire frame codec
//!
//! Frame layout (little-endian):
//!
//! ```text
//! 0       4   5   6   8            16     20           28     32     36
//! ┌───────┬───┬───┬───┬────────────┬──────┬────────────┬──────┬──────┬─────────┐
//! │ NSDA  │ver│cod│rsv│ frame_num  │  l   │     m      │  r   │ pwr  │ payload │
//! │       │u8 │u8 │   │    u64     │ i32  │    f64     │ i32  │ f32  │  ...    │
//! └───────┴───┴───┴───┴────────────┴──────┴────────────┴──────┴──────┴─────────┘
//! ```

use bytes::{Buf, Bytes};

/// Magic tag at the start of every audio frame
pub const FRAME_MAGIC: [u8; 4] = *b"NSDA";

/// Only supported frame version
pub const FRAME_VERSION: u8 = 1;

/// Fixed header length; also the minimum valid frame length
pub const HEADER_LEN: usize = 36;

/// One parsed audio frame
#[derive(Debug, Clone, PartialEq)]
pub struct WireFrame {
    /// Payload codec id
    pub codec: u8,
    /// Server frame counter (not used for sequencing)
    pub frame_num: u64,
    /// Left spectral bin of the audio window
    pub l: i32,
    /// Center bin of the audio window
    pub m: f64,
    /// Right spectral bin of the audio window
    pub r: i32,
    /// Running signal power estimate over the window
    pub pwr: f32,
    /// Codec payload
    pub payload: Bytes,
}

impl WireFrame {
    /// Window width in bins (at least 1)
    pub fn window_bins(&self) -> f32 {
        (self.r as i64 - self.l as i64).max(1) as f32
    }

    /// S-meter reading in dB for this frame
    pub fn power_db(&self, smeter_offset_db: f64) -> f64 {
        let n = self.window_bins();
        let normalized = (self.pwr / n / n) as f64;
        10.0 * normalized.max(1e-20).log10() + smeter_offset_db
    }
}

/// Parse a binary audio frame.
///
/// Returns `None` for short buffers, a wrong magic tag or an unsupported
/// version; callers drop such frames silently.
pub fn parse(buf: &[u8]) -> Option<WireFrame> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    if buf[..4] != FRAME_MAGIC || buf[4] != FRAME_VERSION {
        return None;
    }

    let codec = buf[5];
    let mut header = &buf[8..HEADER_LEN];
    let frame_num = header.get_u64_le();
    let l = header.get_i32_le();
    let m = header.get_f64_le();
    let r = header.get_i32_le();
    let pwr = header.get_f32_le();

    Some(WireFrame {
        codec,
        frame_num,
        l,
        m,
        r,
        pwr,
        payload: Bytes::copy_from_slice(&buf[HEADER_LEN..]),
    })
}
