//! XMA (Xbox Media Audio) RIFF validation and sizing
//!
//! XMA2 audio shows up in dumps in two shapes: a full RIFF/WAVE file whose
//! `fmt ` chunk carries format tag 0x0166 (or an `XMA2` chunk), and a bare
//! `XMA2` chunk torn out of its container. Both are recognized.

use crate::binary::BinaryReader;

pub const RIFF_MAGIC: &[u8; 4] = b"RIFF";
pub const XMA2_CHUNK: &[u8; 4] = b"XMA2";

/// WAVE_FORMAT_XMA2
const XMA2_FORMAT_TAG: u16 = 0x0166;

/// Summary of a validated XMA stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XmaInfo {
    /// Total byte length including the RIFF (or bare chunk) header
    pub file_size: u64,
    /// Channel count when the fmt chunk was present
    pub channels: Option<u16>,
    /// Samples per second when the fmt chunk was present
    pub sample_rate: Option<u32>,
}

pub fn validate(data: &[u8]) -> Option<XmaInfo> {
    if data.len() < 12 {
        return None;
    }
    if &data[0..4] == RIFF_MAGIC {
        validate_riff(data)
    } else if &data[0..4] == XMA2_CHUNK {
        validate_bare_chunk(data)
    } else {
        None
    }
}

fn validate_riff(data: &[u8]) -> Option<XmaInfo> {
    let r = BinaryReader::new(data);
    let riff_size = r.u32_le(4).ok()? as u64;
    let total = 8 + riff_size;
    if riff_size < 4 || total > data.len() as u64 {
        return None;
    }
    if r.bytes(8, 4).ok()? != b"WAVE" {
        return None;
    }

    let mut offset = 12usize;
    let mut is_xma = false;
    let mut channels = None;
    let mut sample_rate = None;

    while (offset as u64) + 8 <= total {
        let chunk_id = r.bytes(offset, 4).ok()?;
        let chunk_size = r.u32_le(offset + 4).ok()? as usize;
        if (offset as u64) + 8 + chunk_size as u64 > total {
            return None;
        }

        match chunk_id {
            b"fmt " if chunk_size >= 16 => {
                let tag = r.u16_le(offset + 8).ok()?;
                if tag == XMA2_FORMAT_TAG {
                    is_xma = true;
                    channels = Some(r.u16_le(offset + 10).ok()?);
                    sample_rate = Some(r.u32_le(offset + 12).ok()?);
                }
            }
            id if id == XMA2_CHUNK => is_xma = true,
            _ => {}
        }

        // Chunks are word-aligned
        offset += 8 + chunk_size + (chunk_size & 1);
    }

    is_xma.then_some(XmaInfo {
        file_size: total,
        channels,
        sample_rate,
    })
}

/// A bare `XMA2` chunk: FourCC, u32 chunk size, payload.
fn validate_bare_chunk(data: &[u8]) -> Option<XmaInfo> {
    let r = BinaryReader::new(data);
    let chunk_size = r.u32_le(4).ok()? as u64;
    let total = 8 + chunk_size;
    if chunk_size == 0 || total > data.len() as u64 {
        return None;
    }
    Some(XmaInfo {
        file_size: total,
        channels: None,
        sample_rate: None,
    })
}
