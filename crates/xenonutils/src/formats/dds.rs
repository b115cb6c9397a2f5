//! DDS (DirectDraw Surface) header parser and size calculator
//!
//! ## DDS Layout
//!
//! ```text
//! Offset 0:   "DDS " magic
//! Offset 4:   u32 size            // always 124
//! Offset 8:   u32 flags
//! Offset 12:  u32 height
//! Offset 16:  u32 width
//! Offset 20:  u32 pitch_or_linear_size
//! Offset 24:  u32 depth
//! Offset 28:  u32 mip_map_count
//! Offset 32:  u32[11] reserved
//! Offset 76:  pixel format (32 bytes):
//!               u32 size          // always 32
//!               u32 flags         // 0x04 = FourCC present
//!               u32 fourcc
//!               u32 rgb_bit_count
//!               u32 r/g/b/a masks
//! Offset 108: u32[4] caps
//! Offset 124: u32 reserved
//! ```
//!
//! PC surfaces store every field little-endian; surfaces lifted out of Xbox
//! 360 memory store them big-endian with the same layout. The parser tries
//! little-endian first and falls back when the size field is not 124.

use crate::binary::{BinaryReader, Endianness};

/// "DDS " magic bytes
pub const DDS_MAGIC: &[u8; 4] = b"DDS ";

/// Magic plus the 124-byte header
pub const DDS_HEADER_SIZE: usize = 128;

/// Largest texture axis the engine ever ships
pub const MAX_TEXTURE_DIM: u32 = 16384;

const DDPF_FOURCC: u32 = 0x4;

/// Parsed DDS surface header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdsHeader {
    pub endianness: Endianness,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    /// FourCC code, zero when the surface is uncompressed
    pub fourcc: u32,
    /// Bits per pixel for uncompressed surfaces
    pub rgb_bit_count: u32,
}

impl DdsHeader {
    /// Parse a DDS header at the start of `data`.
    ///
    /// Returns `None` when the magic is absent or the header is structurally
    /// invalid in both byte orders.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < DDS_HEADER_SIZE || &data[0..4] != DDS_MAGIC {
            return None;
        }
        Self::parse_fields(data, Endianness::Little)
            .or_else(|| Self::parse_fields(data, Endianness::Big))
    }

    fn parse_fields(data: &[u8], endianness: Endianness) -> Option<Self> {
        let r = BinaryReader::new(data);

        if r.u32_at(4, endianness).ok()? != 124 {
            return None;
        }
        let height = r.u32_at(12, endianness).ok()?;
        let width = r.u32_at(16, endianness).ok()?;
        if width == 0 || height == 0 || width > MAX_TEXTURE_DIM || height > MAX_TEXTURE_DIM {
            return None;
        }

        let mip_count = r.u32_at(28, endianness).ok()?;
        // 16384 supports at most 15 levels; a zero count means "just the base"
        if mip_count > 15 {
            return None;
        }

        if r.u32_at(76, endianness).ok()? != 32 {
            return None;
        }
        let pf_flags = r.u32_at(80, endianness).ok()?;
        let fourcc = if pf_flags & DDPF_FOURCC != 0 {
            // FourCC bytes are a character code, not an integer field
            r.u32_le(84).ok()?
        } else {
            0
        };
        let rgb_bit_count = r.u32_at(88, endianness).ok()?;
        if fourcc == 0 && !(1..=128).contains(&rgb_bit_count) {
            return None;
        }

        Some(Self {
            endianness,
            width,
            height,
            mip_count: mip_count.max(1),
            fourcc,
            rgb_bit_count,
        })
    }

    /// Bytes per 4x4 block for block-compressed surfaces, `None` otherwise
    pub fn bytes_per_block(&self) -> Option<u64> {
        match &self.fourcc.to_le_bytes() {
            b"DXT1" | b"ATI1" | b"BC4U" | b"BC4S" => Some(8),
            _ if self.fourcc != 0 => Some(16),
            _ => None,
        }
    }

    /// FourCC as printable characters, e.g. `"DXT1"`
    pub fn fourcc_str(&self) -> String {
        self.fourcc
            .to_le_bytes()
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
            .collect()
    }

    /// Total on-disk size in bytes: magic, header and the full mip chain.
    pub fn file_size(&self) -> u64 {
        DDS_HEADER_SIZE as u64 + self.payload_size()
    }

    /// Byte length of the mip chain, header excluded.
    ///
    /// Block-compressed levels are `ceil(w/4) * ceil(h/4)` blocks with a
    /// floor of one block per axis; uncompressed levels are
    /// `w * h * bit_count / 8` with a one-byte floor. Dimensions descend by
    /// `max(1, dim/2)` per level.
    pub fn payload_size(&self) -> u64 {
        let mut w = u64::from(self.width);
        let mut h = u64::from(self.height);
        let mut total = 0u64;

        for _ in 0..self.mip_count {
            total += match self.bytes_per_block() {
                Some(bpb) => w.div_ceil(4).max(1) * h.div_ceil(4).max(1) * bpb,
                None => (w * h * u64::from(self.rgb_bit_count) / 8).max(1),
            };
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_header(
        width: u32,
        height: u32,
        mips: u32,
        fourcc: &[u8; 4],
        endian: Endianness,
    ) -> Vec<u8> {
        let put = |v: u32| match endian {
            Endianness::Little => v.to_le_bytes(),
            Endianness::Big => v.to_be_bytes(),
        };

        let mut d = vec![0u8; DDS_HEADER_SIZE];
        d[0..4].copy_from_slice(DDS_MAGIC);
        d[4..8].copy_from_slice(&put(124));
        d[12..16].copy_from_slice(&put(height));
        d[16..20].copy_from_slice(&put(width));
        d[28..32].copy_from_slice(&put(mips));
        d[76..80].copy_from_slice(&put(32));
        d[80..84].copy_from_slice(&put(DDPF_FOURCC));
        d[84..88].copy_from_slice(fourcc);
        d
    }

    #[test]
    fn single_mip_dxt1() {
        let data = build_header(256, 256, 1, b"DXT1", Endianness::Little);
        let header = DdsHeader::parse(&data).unwrap();
        assert_eq!(header.endianness, Endianness::Little);
        assert_eq!(header.payload_size(), 32768);
        assert_eq!(header.file_size(), 32896);
    }

    #[test]
    fn full_mip_chain_dxt1() {
        let data = build_header(1024, 1024, 11, b"DXT1", Endianness::Little);
        let header = DdsHeader::parse(&data).unwrap();
        // 256^2*8 + 128^2*8 + ... down to three 1x1-block tail levels
        assert_eq!(header.payload_size(), 699_064);
        assert_eq!(header.file_size(), 699_192);
    }

    #[test]
    fn dxt5_uses_sixteen_byte_blocks() {
        let data = build_header(64, 32, 1, b"DXT5", Endianness::Little);
        let header = DdsHeader::parse(&data).unwrap();
        assert_eq!(header.payload_size(), 16 * 8 * 16);
    }

    #[test]
    fn big_endian_header_detected() {
        let data = build_header(512, 512, 1, b"DXT1", Endianness::Big);
        let header = DdsHeader::parse(&data).unwrap();
        assert_eq!(header.endianness, Endianness::Big);
        assert_eq!(header.width, 512);
        assert_eq!(header.fourcc_str(), "DXT1");
    }

    #[test]
    fn uncompressed_surface() {
        let mut data = build_header(16, 16, 1, b"\0\0\0\0", Endianness::Little);
        // Clear the FourCC flag, declare 32-bit pixels
        data[80..84].copy_from_slice(&0u32.to_le_bytes());
        data[88..92].copy_from_slice(&32u32.to_le_bytes());
        let header = DdsHeader::parse(&data).unwrap();
        assert_eq!(header.payload_size(), 16 * 16 * 4);
    }

    #[test]
    fn rejects_garbage() {
        assert!(DdsHeader::parse(b"DDS ").is_none());

        let mut data = build_header(256, 256, 1, b"DXT1", Endianness::Little);
        data[4..8].copy_from_slice(&123u32.to_le_bytes());
        assert!(DdsHeader::parse(&data).is_none());

        let oversized = build_header(32768, 32, 1, b"DXT1", Endianness::Little);
        assert!(DdsHeader::parse(&oversized).is_none());
    }
}
