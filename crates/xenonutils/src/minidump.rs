//! Windows minidump container parser
//!
//! Xbox 360 memory captures of Bethesda titles arrive wrapped in a standard
//! Windows minidump. The container itself is always little-endian, even
//! though the captured memory inside it is big-endian.
//!
//! ## Container Structure
//!
//! ```text
//! Header (32 bytes):
//!   u32 magic          // "MDMP"
//!   u32 version
//!   u32 stream_count
//!   u32 stream_dir_rva // file offset of the stream directory
//!   u32 checksum
//!   u32 timestamp
//!   u64 flags
//!
//! Stream directory entry (12 bytes):
//!   u32 stream_type
//!   u32 data_size
//!   u32 rva
//! ```
//!
//! Only the module list (stream 4) and the memory lists (streams 5 and 9)
//! are consumed; every other stream is ignored.

use crate::binary::BinaryReader;
use crate::{Result, XenonError};

/// "MDMP" read as a little-endian u32
pub const MINIDUMP_MAGIC: u32 = 0x504D_444D;

const HEADER_SIZE: usize = 32;
const DIRECTORY_ENTRY_SIZE: usize = 12;
const MODULE_ENTRY_SIZE: usize = 108;

/// Stream type codes we care about
const STREAM_MODULE_LIST: u32 = 4;
const STREAM_MEMORY_LIST: u32 = 5;
const STREAM_MEMORY64_LIST: u32 = 9;

/// A loaded module recorded in the dump
#[derive(Debug, Clone)]
pub struct MinidumpModule {
    /// Base virtual address of the module image
    pub base: u64,
    /// Size of the module image in bytes
    pub size: u32,
    pub checksum: u32,
    pub timestamp: u32,
    /// Module path as recorded by the dumper
    pub name: String,
}

/// A captured memory region and where its bytes live in the dump file
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    /// Virtual address of the first byte
    pub virtual_address: u64,
    /// Region length in bytes
    pub size: u64,
    /// Absolute file offset of the region's first byte
    pub file_offset: u64,
}

impl MemoryRegion {
    pub fn contains_va(&self, va: u64) -> bool {
        va >= self.virtual_address && va - self.virtual_address < self.size
    }

    fn contains_file_offset(&self, offset: u64) -> bool {
        offset >= self.file_offset && offset - self.file_offset < self.size
    }
}

/// Parsed minidump container
#[derive(Debug, Clone)]
pub struct Minidump {
    pub version: u32,
    pub timestamp: u32,
    pub flags: u64,
    pub modules: Vec<MinidumpModule>,
    /// Memory regions sorted by virtual address
    pub regions: Vec<MemoryRegion>,
}

impl Minidump {
    /// Parse the minidump container from the full dump bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let r = BinaryReader::new(data);

        if data.len() < HEADER_SIZE {
            return Err(XenonError::InvalidFormat(
                "dump too small for a minidump header".to_string(),
            ));
        }
        if r.u32_le(0)? != MINIDUMP_MAGIC {
            return Err(XenonError::InvalidFormat(
                "missing MDMP signature".to_string(),
            ));
        }

        let version = r.u32_le(4)?;
        let stream_count = r.u32_le(8)? as usize;
        let dir_rva = r.u32_le(12)? as usize;
        let timestamp = r.u32_le(20)?;
        let flags = r.u64_le(24)?;

        // A directory with more entries than this is a corrupt header
        const MAX_STREAMS: usize = 4096;
        if stream_count > MAX_STREAMS {
            return Err(XenonError::ParseError(format!(
                "minidump stream count {} out of range",
                stream_count
            )));
        }

        let mut modules = Vec::new();
        let mut regions = Vec::new();

        for i in 0..stream_count {
            let entry = dir_rva + i * DIRECTORY_ENTRY_SIZE;
            let stream_type = r.u32_le(entry)?;
            let data_size = r.u32_le(entry + 4)? as usize;
            let rva = r.u32_le(entry + 8)? as usize;

            match stream_type {
                STREAM_MODULE_LIST => modules = Self::parse_module_list(&r, rva, data_size)?,
                STREAM_MEMORY_LIST => regions.extend(Self::parse_memory_list(&r, rva)?),
                STREAM_MEMORY64_LIST => regions.extend(Self::parse_memory64_list(&r, rva)?),
                other => {
                    tracing::debug!("ignoring minidump stream type {}", other);
                }
            }
        }

        regions.sort_by_key(|region| region.virtual_address);

        Ok(Self {
            version,
            timestamp,
            flags,
            modules,
            regions,
        })
    }

    fn parse_module_list(
        r: &BinaryReader<'_>,
        rva: usize,
        data_size: usize,
    ) -> Result<Vec<MinidumpModule>> {
        let count = r.u32_le(rva)? as usize;
        if data_size < 4 + count * MODULE_ENTRY_SIZE {
            return Err(XenonError::ParseError(format!(
                "module list stream truncated: {} modules in {} bytes",
                count, data_size
            )));
        }

        let mut modules = Vec::with_capacity(count);
        for i in 0..count {
            let entry = rva + 4 + i * MODULE_ENTRY_SIZE;
            let base = r.u64_le(entry)?;
            let size = r.u32_le(entry + 8)?;
            let checksum = r.u32_le(entry + 12)?;
            let timestamp = r.u32_le(entry + 16)?;
            let name_rva = r.u32_le(entry + 20)? as usize;
            let name = Self::read_utf16_string(r, name_rva)?;

            modules.push(MinidumpModule {
                base,
                size,
                checksum,
                timestamp,
                name,
            });
        }

        Ok(modules)
    }

    /// MINIDUMP_STRING: u32 byte length followed by UTF-16LE code units
    fn read_utf16_string(r: &BinaryReader<'_>, rva: usize) -> Result<String> {
        let byte_len = r.u32_le(rva)? as usize;
        let units = byte_len / 2;
        let mut codes = Vec::with_capacity(units);
        for i in 0..units {
            codes.push(r.u16_le(rva + 4 + i * 2)?);
        }
        Ok(String::from_utf16_lossy(&codes))
    }

    fn parse_memory_list(r: &BinaryReader<'_>, rva: usize) -> Result<Vec<MemoryRegion>> {
        let count = r.u32_le(rva)? as usize;
        let mut regions = Vec::with_capacity(count);
        for i in 0..count {
            // MINIDUMP_MEMORY_DESCRIPTOR: u64 start, u32 size, u32 rva
            let entry = rva + 4 + i * 16;
            regions.push(MemoryRegion {
                virtual_address: r.u64_le(entry)?,
                size: u64::from(r.u32_le(entry + 8)?),
                file_offset: u64::from(r.u32_le(entry + 12)?),
            });
        }
        Ok(regions)
    }

    /// The Memory64 list stores all region payloads contiguously starting at
    /// `base_rva`; each descriptor carries only the VA and size.
    fn parse_memory64_list(r: &BinaryReader<'_>, rva: usize) -> Result<Vec<MemoryRegion>> {
        let count = r.u64_le(rva)? as usize;
        let base_rva = r.u64_le(rva + 8)?;

        let mut regions = Vec::with_capacity(count);
        let mut file_offset = base_rva;
        for i in 0..count {
            let entry = rva + 16 + i * 16;
            let virtual_address = r.u64_le(entry)?;
            let size = r.u64_le(entry + 8)?;
            regions.push(MemoryRegion {
                virtual_address,
                size,
                file_offset,
            });
            file_offset += size;
        }
        Ok(regions)
    }

    /// The module whose image covers `va`, if any
    pub fn module_for_va(&self, va: u64) -> Option<&MinidumpModule> {
        self.modules
            .iter()
            .find(|m| va >= m.base && va - m.base < u64::from(m.size))
    }

    /// The captured region containing `va`, if any
    pub fn region_for_va(&self, va: u64) -> Option<&MemoryRegion> {
        self.regions.iter().find(|region| region.contains_va(va))
    }

    /// Translate a virtual address to its absolute dump-file offset
    pub fn va_to_file_offset(&self, va: u64) -> Option<u64> {
        self.region_for_va(va)
            .map(|region| region.file_offset + (va - region.virtual_address))
    }

    /// Translate an absolute dump-file offset back to a virtual address
    pub fn file_offset_to_va(&self, offset: u64) -> Option<u64> {
        self.regions
            .iter()
            .find(|region| region.contains_file_offset(offset))
            .map(|region| region.virtual_address + (offset - region.file_offset))
    }
}
