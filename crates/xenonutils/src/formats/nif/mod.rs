//! NIF (Gamebryo/NetImmerse) scene file parser
//!
//! ## Header Structure (version 20.2.0.7, Fallout era)
//!
//! ```text
//! ASCII header line ending in '\n', e.g.
//!   "Gamebryo File Format, Version 20.2.0.7\n"
//! u32 version                  // 0x14020007
//! u8  endian flag              // 0x00 = Xbox 360 (big), 0x01 = PC (little)
//! u32 user_version
//! u32 num_blocks
//! u32 bethesda_version
//! u32 user_version2
//! u16 num_block_types
//!   length-prefixed type names × num_block_types
//! u16 block_type_index  × num_blocks
//! u32 block_size        × num_blocks
//! u32 num_strings
//! u32 max_string_length
//!   length-prefixed strings × num_strings
//! u32 num_groups
//! u32 group  × num_groups
//! block payloads, back to back, in table order
//! ```
//!
//! Every multi-byte field after the header line follows the endian flag;
//! the flag itself sits at `header_line_len + 4`.

pub mod convert;
pub mod geometry;
pub mod havok;
pub mod packed;
pub mod skin;

use crate::binary::{BinaryReader, Endianness};
use crate::{Result, XenonError};

pub use convert::{NifConversionResult, NifConverter};

/// Recognized header-line prefixes
pub const GAMEBRYO_PREFIX: &[u8] = b"Gamebryo File Format";
pub const NETIMMERSE_PREFIX: &[u8] = b"NetImmerse File Format";

/// Sanity caps for table sizes; dumps routinely truncate headers
const MAX_BLOCKS: u32 = 65_535;
const MAX_BLOCK_TYPES: u16 = 4_096;
const MAX_STRINGS: u32 = 65_535;
const MAX_GROUPS: u32 = 65_535;

/// One entry in the block table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    /// Index into [`NifInfo::block_types`]
    pub type_index: u16,
    /// Payload length in bytes
    pub size: u32,
    /// Absolute offset of the payload within the file
    pub offset: usize,
}

/// Parsed NIF header and block layout
#[derive(Debug, Clone)]
pub struct NifInfo {
    pub endianness: Endianness,
    pub version: u32,
    pub user_version: u32,
    pub bethesda_version: u32,
    pub user_version2: u32,
    pub num_blocks: u32,
    pub block_types: Vec<String>,
    pub blocks: Vec<BlockRef>,
    pub strings: Vec<String>,
    pub max_string_length: u32,
    pub groups: Vec<u32>,
    /// Byte length of the ASCII header line, newline included
    pub header_line_len: usize,
    /// Absolute offset of the first block payload
    pub payload_offset: usize,
}

impl NifInfo {
    /// Block type name for a block, if its index is in range
    pub fn block_type_name(&self, block: BlockRef) -> Option<&str> {
        self.block_types
            .get(block.type_index as usize)
            .map(String::as_str)
    }

    /// Total file length implied by the header: payload offset plus the sum
    /// of every block size.
    pub fn total_size(&self) -> u64 {
        self.payload_offset as u64
            + self
                .blocks
                .iter()
                .map(|block| u64::from(block.size))
                .sum::<u64>()
    }
}

/// A parsed NIF: the header info plus a borrowed view of the whole file
#[derive(Debug)]
pub struct Nif<'a> {
    pub info: NifInfo,
    pub data: &'a [u8],
}

impl<'a> Nif<'a> {
    /// Parse the header and block table.
    ///
    /// `data` may extend past the file (carving hands over the rest of the
    /// dump); it must merely be long enough for every declared block.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let info = parse_header(data)?;
        if info.total_size() > data.len() as u64 {
            return Err(XenonError::SizeMismatch {
                declared: info.total_size() as usize,
                actual: data.len(),
            });
        }
        Ok(Self { info, data })
    }

    /// Borrow one block's payload bytes
    pub fn block_payload(&self, block: BlockRef) -> Result<&'a [u8]> {
        BinaryReader::new(self.data).bytes(block.offset, block.size as usize)
    }
}

/// Parse the NIF header starting at `data[0]`.
pub fn parse_header(data: &[u8]) -> Result<NifInfo> {
    let r = BinaryReader::new(data);

    let line = r.null_terminated_ascii(0, 128)?;
    if !(line.starts_with(GAMEBRYO_PREFIX) || line.starts_with(NETIMMERSE_PREFIX)) {
        return Err(XenonError::InvalidFormat(
            "missing Gamebryo/NetImmerse header line".to_string(),
        ));
    }
    let newline = line
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| XenonError::InvalidFormat("header line not terminated".to_string()))?;
    let header_line_len = newline + 1;

    // The endian flag tells us how to read everything else, the version
    // field it follows included
    let endianness = match r.u8_at(header_line_len + 4)? {
        0x00 => Endianness::Big,
        0x01 => Endianness::Little,
        other => {
            return Err(XenonError::InvalidFormat(format!(
                "bad endian flag {:#04X}",
                other
            )))
        }
    };
    let version = r.u32_at(header_line_len, endianness)?;

    let mut offset = header_line_len + 5;
    let user_version = r.u32_at(offset, endianness)?;
    let num_blocks = r.u32_at(offset + 4, endianness)?;
    let bethesda_version = r.u32_at(offset + 8, endianness)?;
    let user_version2 = r.u32_at(offset + 12, endianness)?;
    offset += 16;

    if num_blocks > MAX_BLOCKS {
        return Err(XenonError::ParseError(format!(
            "block count {} out of range",
            num_blocks
        )));
    }

    let num_block_types = r.u16_at(offset, endianness)?;
    offset += 2;
    if num_block_types > MAX_BLOCK_TYPES {
        return Err(XenonError::ParseError(format!(
            "block type count {} out of range",
            num_block_types
        )));
    }

    let mut block_types = Vec::with_capacity(num_block_types as usize);
    for _ in 0..num_block_types {
        let (name, consumed) = r.length_prefixed_string(offset, endianness)?;
        block_types.push(String::from_utf8_lossy(name).into_owned());
        offset += consumed;
    }

    let mut type_indices = Vec::with_capacity(num_blocks as usize);
    for _ in 0..num_blocks {
        type_indices.push(r.u16_at(offset, endianness)?);
        offset += 2;
    }

    let mut block_sizes = Vec::with_capacity(num_blocks as usize);
    for _ in 0..num_blocks {
        block_sizes.push(r.u32_at(offset, endianness)?);
        offset += 4;
    }

    let num_strings = r.u32_at(offset, endianness)?;
    let max_string_length = r.u32_at(offset + 4, endianness)?;
    offset += 8;
    if num_strings > MAX_STRINGS {
        return Err(XenonError::ParseError(format!(
            "string count {} out of range",
            num_strings
        )));
    }

    let mut strings = Vec::with_capacity(num_strings as usize);
    for _ in 0..num_strings {
        let (s, consumed) = r.length_prefixed_string(offset, endianness)?;
        if s.len() as u32 > max_string_length {
            return Err(XenonError::ParseError(format!(
                "string of {} bytes exceeds declared maximum {}",
                s.len(),
                max_string_length
            )));
        }
        strings.push(String::from_utf8_lossy(s).into_owned());
        offset += consumed;
    }

    let num_groups = r.u32_at(offset, endianness)?;
    offset += 4;
    if num_groups > MAX_GROUPS {
        return Err(XenonError::ParseError(format!(
            "group count {} out of range",
            num_groups
        )));
    }
    let mut groups = Vec::with_capacity(num_groups as usize);
    for _ in 0..num_groups {
        groups.push(r.u32_at(offset, endianness)?);
        offset += 4;
    }

    let payload_offset = offset;
    let mut blocks = Vec::with_capacity(num_blocks as usize);
    let mut running = payload_offset;
    for (type_index, size) in type_indices.into_iter().zip(&block_sizes) {
        if type_index as usize >= block_types.len() {
            return Err(XenonError::ParseError(format!(
                "block type index {} out of range",
                type_index
            )));
        }
        blocks.push(BlockRef {
            type_index,
            size: *size,
            offset: running,
        });
        running = running
            .checked_add(*size as usize)
            .ok_or_else(|| XenonError::ParseError("block sizes overflow".to_string()))?;
    }

    Ok(NifInfo {
        endianness,
        version,
        user_version,
        bethesda_version,
        user_version2,
        num_blocks,
        block_types,
        blocks,
        strings,
        max_string_length,
        groups,
        header_line_len,
        payload_offset,
    })
}


#[cfg(test)]
mod tests {
    use super::testutil::NifBuilder;
    use super::*;

    #[test]
    fn parses_big_endian_header() {
        let data = NifBuilder::new(Endianness::Big)
            .string("SignPost01")
            .block("NiIntegerExtraData", vec![0u8; 8])
            .block("NiIntegerExtraData", vec![1u8; 8])
            .build();

        let nif = Nif::parse(&data).unwrap();
        assert_eq!(nif.info.endianness, Endianness::Big);
        assert_eq!(nif.info.version, 0x1402_0007);
        assert_eq!(nif.info.num_blocks, 2);
        assert_eq!(nif.info.block_types, vec!["NiIntegerExtraData"]);
        assert_eq!(nif.info.strings, vec!["SignPost01"]);
        assert_eq!(nif.info.total_size(), data.len() as u64);

        // Second block starts right after the first
        let b0 = nif.info.blocks[0];
        let b1 = nif.info.blocks[1];
        assert_eq!(b1.offset, b0.offset + 8);
        assert_eq!(nif.block_payload(b1).unwrap(), &[1u8; 8]);
    }

    #[test]
    fn parses_little_endian_header() {
        let data = NifBuilder::new(Endianness::Little)
            .block("NiNode", vec![0u8; 16])
            .build();
        let nif = Nif::parse(&data).unwrap();
        assert_eq!(nif.info.endianness, Endianness::Little);
        assert_eq!(nif.info.block_type_name(nif.info.blocks[0]), Some("NiNode"));
    }

    #[test]
    fn truncated_payload_is_size_mismatch() {
        let data = NifBuilder::new(Endianness::Big)
            .block("NiNode", vec![0u8; 64])
            .build();
        assert!(matches!(
            Nif::parse(&data[..data.len() - 1]),
            Err(XenonError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_non_nif() {
        assert!(parse_header(b"DDS \x7C\x00\x00\x00").is_err());
        assert!(parse_header(b"Gamebryo File Format, Version 20.2.0.7").is_err());
    }
}
