//! IMA-ADPCM payload decoder
//!
//! Payload layout: `[predictor: i16 LE][index: u8][reserved: u8][count: u16 LE][nibbles...]`.
//! The first sample is the predictor itself; every following sample is one
//! 4-bit code, low nibble first.

use bytes::Buf;

const INDEX_TABLE: [i8; 16] = [-1, -1, -1, -1, 2, 4, 6, 8, -1, -1, -1, -1, 2, 4, 6, 8];

const STEP_TABLE: [i16; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

/// Block header length
pub const BLOCK_HEADER_LEN: usize = 6;

/// Decode one mono IMA-ADPCM block into f32 samples in [-1, 1).
///
/// Always yields `count` samples: missing nibbles are zero-filled. A block
/// shorter than its header yields nothing.
pub fn decode_mono(payload: &[u8]) -> Vec<f32> {
    if payload.len() < BLOCK_HEADER_LEN {
        return Vec::new();
    }

    let mut header = &payload[..BLOCK_HEADER_LEN];
    let mut predictor = header.get_i16_le() as i32;
    let mut index = (header.get_u8() as i32).clamp(0, 88);
    header.advance(1);
    let count = header.get_u16_le() as usize;
    if count == 0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(count);
    out.push(predictor as f32 / 32768.0);

    let codes = payload[BLOCK_HEADER_LEN..]
        .iter()
        .flat_map(|&byte| [byte & 0x0f, byte >> 4]);

    for code in codes.take(count - 1) {
        let step = STEP_TABLE[index as usize] as i32;
        let mut diff = step >> 3;
        if code & 4 != 0 {
            diff += step;
        }
        if code & 2 != 0 {
            diff += step >> 1;
        }
        if code & 1 != 0 {
            diff += step >> 2;
        }

        let next = if code & 8 != 0 {
            predictor - diff
        } else {
            predictor + diff
        };
        predictor = next.clamp(i16::MIN as i32, i16::MAX as i32);
        index = (index + INDEX_TABLE[code as usize] as i32).clamp(0, 88);

        out.push(predictor as f32 / 32768.0);
    }

    if out.len() < count {
        out.resize(count, 0.0);
    }
    out
}
