//! ESM/ESP record and subrecord headers plus fragment acceptance rules
//!
//! Plugin data in a dump is rarely intact, so these parsers work on
//! fragments: a 24-byte main-record header or a 6-byte subrecord header can
//! be validated on its own, and the acceptance predicates decide whether a
//! harvested payload is worth keeping.
//!
//! ```text
//! Main record header (24 bytes):
//!   [u8; 4] signature      // "TES4", "GRUP", "WEAP", ...
//!   u32 data_size
//!   u32 flags
//!   u32 form_id
//!   u32 vcs_info
//!   u16 form_version
//!   u16 vcs_info2
//!
//! Subrecord header (6 bytes):
//!   [u8; 4] signature      // "EDID", "GMST", ...
//!   u16 size
//! ```

use crate::binary::{BinaryReader, Endianness};

pub const RECORD_HEADER_SIZE: usize = 24;
pub const SUBRECORD_HEADER_SIZE: usize = 6;

/// Parsed 24-byte main-record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub signature: [u8; 4],
    pub data_size: u32,
    pub flags: u32,
    pub form_id: u32,
    pub form_version: u16,
}

impl RecordHeader {
    pub fn parse(data: &[u8], endian: Endianness) -> Option<Self> {
        let r = BinaryReader::new(data);
        let signature: [u8; 4] = r.bytes(0, 4).ok()?.try_into().ok()?;
        if !is_signature_shaped(&signature) {
            return None;
        }
        Some(Self {
            signature,
            data_size: r.u32_at(4, endian).ok()?,
            flags: r.u32_at(8, endian).ok()?,
            form_id: r.u32_at(12, endian).ok()?,
            form_version: r.u16_at(20, endian).ok()?,
        })
    }

    /// Try little-endian, then big-endian, requiring a plausible FormID
    pub fn parse_any(data: &[u8]) -> Option<(Self, Endianness)> {
        for endian in [Endianness::Little, Endianness::Big] {
            if let Some(header) = Self::parse(data, endian) {
                if is_plausible_form_id(header.form_id) {
                    return Some((header, endian));
                }
            }
        }
        None
    }
}

/// Parsed 6-byte subrecord header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubrecordHeader {
    pub signature: [u8; 4],
    pub size: u32,
}

impl SubrecordHeader {
    pub fn parse(data: &[u8], endian: Endianness) -> Option<Self> {
        let r = BinaryReader::new(data);
        let signature: [u8; 4] = r.bytes(0, 4).ok()?.try_into().ok()?;
        if !is_signature_shaped(&signature) {
            return None;
        }
        Some(Self {
            signature,
            size: u32::from(r.u16_at(4, endian).ok()?),
        })
    }

    /// Parse at `offset`, honoring a preceding `XXXX` size-extension
    /// subrecord: its 4-byte payload replaces the 16-bit size of the
    /// subrecord that follows it.
    pub fn parse_extended(data: &[u8], endian: Endianness) -> Option<Self> {
        let first = Self::parse(data, endian)?;
        if &first.signature != b"XXXX" || first.size != 4 {
            return Some(first);
        }
        let r = BinaryReader::new(data);
        let extended_size = r.u32_at(SUBRECORD_HEADER_SIZE, endian).ok()?;
        let mut inner = Self::parse(data.get(SUBRECORD_HEADER_SIZE + 4..)?, endian)?;
        inner.size = extended_size;
        Some(inner)
    }
}

/// Four bytes of `A-Z`, `0-9` or `_`, the shape of every record signature
pub fn is_signature_shaped(signature: &[u8; 4]) -> bool {
    signature
        .iter()
        .all(|&b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

/// EditorID acceptance: starts with a letter, and at least 90% of the
/// characters are alphanumeric or underscore.
pub fn is_editor_id(name: &[u8]) -> bool {
    if name.is_empty() || !name[0].is_ascii_alphabetic() {
        return false;
    }
    let good = name
        .iter()
        .filter(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();
    good * 10 >= name.len() * 9
}

/// Game-setting names are editor IDs whose first character encodes the type
pub fn is_gmst_name(name: &[u8]) -> bool {
    matches!(name.first().copied(), Some(b'f' | b'i' | b's' | b'b')) && is_editor_id(name)
}

const SCRIPT_KEYWORDS: [&str; 8] = [
    "enable", "disable", "moveto", "setstage", "getstage", "if", "endif", "ref",
];

/// Script-source acceptance: long enough to mean something and containing
/// at least one scripting keyword, case-insensitive.
pub fn looks_like_script_source(text: &[u8]) -> bool {
    if text.len() <= 10 {
        return false;
    }
    let lowered = text.to_ascii_lowercase();
    let lowered = String::from_utf8_lossy(&lowered);
    SCRIPT_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// FormIDs are rejected when null, all-ones, or claiming a load-order slot
/// above 0x0F (console saves never load that many plugins).
pub fn is_plausible_form_id(form_id: u32) -> bool {
    form_id != 0 && form_id != 0xFFFF_FFFF && (form_id >> 24) <= 0x0F
}
