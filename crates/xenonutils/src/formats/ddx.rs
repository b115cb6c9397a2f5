//! DDX (Xbox 360 DirectDraw surface) header parser
//!
//! DDX is the console cousin of DDS: a `3XDO` (linear) or `3XDR` (tiled)
//! magic followed by the big-endian form of the 124-byte surface header and
//! a GPU-tiled payload. Converting the payload back to a PC DDS is the
//! transcoder's job; this module only validates the header and sizes the
//! whole asset.

use crate::binary::{BinaryReader, Endianness};
use crate::formats::dds::{DdsHeader, MAX_TEXTURE_DIM};

/// Linear-payload magic
pub const DDX_MAGIC_LINEAR: &[u8; 4] = b"3XDO";
/// Tiled-payload magic
pub const DDX_MAGIC_TILED: &[u8; 4] = b"3XDR";

/// Magic plus the 124-byte big-endian surface header
pub const DDX_HEADER_SIZE: usize = 128;

const DDPF_FOURCC: u32 = 0x4;

/// Parsed DDX header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdxHeader {
    /// True for `3XDR`, whose payload is GPU-tiled
    pub tiled: bool,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub fourcc: u32,
    pub rgb_bit_count: u32,
}

impl DdxHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < DDX_HEADER_SIZE {
            return None;
        }
        let tiled = match &data[0..4] {
            m if m == DDX_MAGIC_LINEAR => false,
            m if m == DDX_MAGIC_TILED => true,
            _ => return None,
        };

        let r = BinaryReader::new(data);
        if r.u32_be(4).ok()? != 124 {
            return None;
        }
        let height = r.u32_be(12).ok()?;
        let width = r.u32_be(16).ok()?;
        if width == 0 || height == 0 || width > MAX_TEXTURE_DIM || height > MAX_TEXTURE_DIM {
            return None;
        }
        let mip_count = r.u32_be(28).ok()?;
        if mip_count > 15 {
            return None;
        }
        if r.u32_be(76).ok()? != 32 {
            return None;
        }
        let pf_flags = r.u32_be(80).ok()?;
        let fourcc = if pf_flags & DDPF_FOURCC != 0 {
            r.u32_le(84).ok()?
        } else {
            0
        };
        let rgb_bit_count = r.u32_be(88).ok()?;
        if fourcc == 0 && !(1..=128).contains(&rgb_bit_count) {
            return None;
        }

        Some(Self {
            tiled,
            width,
            height,
            mip_count: mip_count.max(1),
            fourcc,
            rgb_bit_count,
        })
    }

    pub fn fourcc_str(&self) -> String {
        self.as_dds().fourcc_str()
    }

    /// Total on-disk size in bytes, magic and header included.
    ///
    /// Tiling rearranges the payload but never changes its length, so the
    /// DDS mip-chain arithmetic applies unchanged.
    pub fn file_size(&self) -> u64 {
        DDX_HEADER_SIZE as u64 + self.as_dds().payload_size()
    }

    fn as_dds(&self) -> DdsHeader {
        DdsHeader {
            endianness: Endianness::Big,
            width: self.width,
            height: self.height,
            mip_count: self.mip_count,
            fourcc: self.fourcc,
            rgb_bit_count: self.rgb_bit_count,
        }
    }
}
