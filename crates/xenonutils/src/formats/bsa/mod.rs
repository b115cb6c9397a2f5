//! BSA (Bethesda Softworks Archive) reader
//!
//! ## Archive Structure (v104/v105)
//!
//! ```text
//! Header (36 bytes):
//!   [u8; 4] magic          // "BSA\0"
//!   u32 version            // 104 (FO3/FNV), 105 (SSE)
//!   u32 folder_table_offset
//!   u32 archive_flags
//!   u32 folder_count
//!   u32 file_count
//!   u32 total_folder_name_length
//!   u32 total_file_name_length
//!   u32 content_flags
//!
//! Folder records:  { u64 hash, u32 file_count, u32 name_offset }      (v104)
//!                  { u64 hash, u32 file_count, u32 pad, u64 offset }  (v105)
//! File blocks, one per folder, in folder order:
//!   bzstring folder name (when DIR_NAMES), then per file:
//!   { u64 hash, u32 size, u32 data_offset }
//!   // the high bit of size inverts the default compression
//! File name block: file_count zstrings (when FILE_NAMES)
//! ```
//!
//! Xbox 360 archives flip every multi-byte field to big-endian and store
//! each hash with its 32-bit halves swapped.

pub mod hash;

use std::io::Read;

use crate::binary::{BinaryReader, Endianness};
use crate::{Result, XenonError};

pub use hash::BsaHash;

/// "BSA\0"
pub const BSA_MAGIC: &[u8; 4] = b"BSA\0";

/// Header length in bytes
pub const BSA_HEADER_SIZE: usize = 36;

/// Size-field bit that inverts the archive default compression
const COMPRESSION_TOGGLE: u32 = 0x8000_0000;
const SIZE_MASK: u32 = 0x7FFF_FFFF;

bitflags::bitflags! {
    /// Archive-level flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArchiveFlags: u32 {
        const DIR_NAMES = 0x1;
        const FILE_NAMES = 0x2;
        const COMPRESSED = 0x4;
        const XBOX360 = 0x40;
        const EMBEDDED_NAMES = 0x100;
        const _ = !0;
    }
}

bitflags::bitflags! {
    /// Content-kind flags; unrecognized bits are preserved verbatim
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContentFlags: u32 {
        const MESHES = 0x1;
        const TEXTURES = 0x2;
        const MENUS = 0x4;
        const SOUNDS = 0x8;
        const VOICES = 0x10;
        const MISC = 0x100;
        const _ = !0;
    }
}

/// Parsed 36-byte archive header
#[derive(Debug, Clone, Copy)]
pub struct BsaHeader {
    pub version: u32,
    pub endianness: Endianness,
    pub archive_flags: ArchiveFlags,
    pub folder_count: u32,
    pub file_count: u32,
    pub total_folder_name_length: u32,
    pub total_file_name_length: u32,
    pub content_flags: ContentFlags,
    folder_table_offset: u32,
}

impl BsaHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < BSA_HEADER_SIZE || &data[0..4] != BSA_MAGIC {
            return None;
        }
        let r = BinaryReader::new(data);

        // Console archives store the header big-endian too
        let endianness = match r.u32_le(4).ok()? {
            104 | 105 => Endianness::Little,
            _ => Endianness::Big,
        };
        let version = r.u32_at(4, endianness).ok()?;
        if version != 104 && version != 105 {
            return None;
        }

        let folder_table_offset = r.u32_at(8, endianness).ok()?;
        let archive_flags = ArchiveFlags::from_bits_retain(r.u32_at(12, endianness).ok()?);
        let folder_count = r.u32_at(16, endianness).ok()?;
        let file_count = r.u32_at(20, endianness).ok()?;
        if folder_table_offset < BSA_HEADER_SIZE as u32 {
            return None;
        }

        Some(Self {
            version,
            endianness,
            archive_flags,
            folder_count,
            file_count,
            total_folder_name_length: r.u32_at(24, endianness).ok()?,
            total_file_name_length: r.u32_at(28, endianness).ok()?,
            content_flags: ContentFlags::from_bits_retain(r.u32_at(32, endianness).ok()?),
            folder_table_offset,
        })
    }

    pub fn is_xbox(&self) -> bool {
        self.endianness == Endianness::Big || self.archive_flags.contains(ArchiveFlags::XBOX360)
    }

    pub fn default_compressed(&self) -> bool {
        self.archive_flags.contains(ArchiveFlags::COMPRESSED)
    }
}

/// One folder in the archive
#[derive(Debug, Clone)]
pub struct BsaFolder {
    pub hash: BsaHash,
    /// Folder path with `\` separators, empty when names were stripped
    pub name: String,
    pub files: Vec<BsaFile>,
}

/// One file entry
#[derive(Debug, Clone)]
pub struct BsaFile {
    pub hash: BsaHash,
    /// File name, empty when the archive has no name block
    pub name: String,
    /// Stored byte length of the data block (compressed length when
    /// compressed, including the 4-byte original-size prefix)
    pub stored_size: u32,
    /// Absolute offset of the data block in the archive
    pub data_offset: u32,
    pub compressed: bool,
}

/// Parsed archive: header plus the folder/file tables
#[derive(Debug, Clone)]
pub struct BsaArchive {
    pub header: BsaHeader,
    pub folders: Vec<BsaFolder>,
}

impl BsaArchive {
    /// Parse the header and both tables from the archive bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = BsaHeader::parse(data).ok_or_else(|| {
            XenonError::InvalidFormat("not a v104/v105 BSA archive".to_string())
        })?;
        let endian = header.endianness;
        let xbox = header.is_xbox();
        let r = BinaryReader::new(data);

        // A dump fragment can carry a header with absurd counts; cap them
        // before allocating
        const MAX_ENTRIES: u32 = 1_000_000;
        if header.folder_count > MAX_ENTRIES || header.file_count > MAX_ENTRIES {
            return Err(XenonError::ParseError(format!(
                "BSA tables too large: {} folders / {} files",
                header.folder_count, header.file_count
            )));
        }

        let folder_record_size = if header.version >= 105 { 24 } else { 16 };
        let mut offset = header.folder_table_offset as usize;

        let mut folders = Vec::with_capacity(header.folder_count as usize);
        for _ in 0..header.folder_count {
            let hash = BsaHash::from_numeric(r.u64_at(offset, endian)?, xbox);
            let file_count = r.u32_at(offset + 8, endian)?;
            folders.push((hash, file_count));
            offset += folder_record_size;
        }

        let include_dir_names = header.archive_flags.contains(ArchiveFlags::DIR_NAMES);
        let default_compressed = header.default_compressed();

        let mut parsed_folders = Vec::with_capacity(folders.len());
        for (hash, file_count) in folders {
            if file_count > header.file_count {
                return Err(XenonError::ParseError(format!(
                    "folder claims {} files, archive has {}",
                    file_count, header.file_count
                )));
            }
            let name = if include_dir_names {
                // bzstring: u8 length including the terminating NUL
                let len = r.u8_at(offset)? as usize;
                let raw = r.bytes(offset + 1, len)?;
                offset += 1 + len;
                String::from_utf8_lossy(raw.strip_suffix(b"\0").unwrap_or(raw)).into_owned()
            } else {
                String::new()
            };

            let mut files = Vec::with_capacity(file_count as usize);
            for _ in 0..file_count {
                let file_hash = BsaHash::from_numeric(r.u64_at(offset, endian)?, xbox);
                let raw_size = r.u32_at(offset + 8, endian)?;
                let data_offset = r.u32_at(offset + 12, endian)?;
                offset += 16;

                let toggled = raw_size & COMPRESSION_TOGGLE != 0;
                files.push(BsaFile {
                    hash: file_hash,
                    name: String::new(),
                    stored_size: raw_size & SIZE_MASK,
                    data_offset,
                    compressed: default_compressed != toggled,
                });
            }
            parsed_folders.push(BsaFolder { hash, name, files });
        }

        if header.archive_flags.contains(ArchiveFlags::FILE_NAMES) {
            let names_end = offset + header.total_file_name_length as usize;
            let mut names = Vec::with_capacity(header.file_count as usize);
            while offset < names_end {
                let raw = r.null_terminated_ascii(offset, names_end - offset)?;
                offset += raw.len() + 1;
                names.push(String::from_utf8_lossy(raw).into_owned());
            }
            let mut it = names.into_iter();
            for folder in &mut parsed_folders {
                for file in &mut folder.files {
                    file.name = it.next().unwrap_or_default();
                }
            }
        }

        Ok(Self {
            header,
            folders: parsed_folders,
        })
    }

    /// Total archive length implied by the tables: the end of the farthest
    /// data block. Used when carving an archive out of a dump.
    pub fn total_size(&self) -> u64 {
        self.folders
            .iter()
            .flat_map(|folder| &folder.files)
            .map(|file| u64::from(file.data_offset) + u64::from(file.stored_size))
            .max()
            .unwrap_or(BSA_HEADER_SIZE as u64)
    }

    pub fn file_count(&self) -> usize {
        self.folders.iter().map(|folder| folder.files.len()).sum()
    }

    /// Look up a file by folder and file path, hashing the query
    pub fn find(&self, folder_path: &str, file_name: &str) -> Option<&BsaFile> {
        let folder_hash = hash::hash_folder(folder_path.as_bytes());
        let file_hash = hash::hash_file(file_name.as_bytes());
        self.folders
            .iter()
            .find(|folder| folder.hash == folder_hash)?
            .files
            .iter()
            .find(|file| file.hash == file_hash)
    }

    /// Locate a file's data block, skipping the optional embedded name.
    /// Returns the block's offset and remaining stored length.
    fn data_region(&self, data: &[u8], file: &BsaFile) -> Result<(usize, usize)> {
        let r = BinaryReader::new(data);
        let mut offset = file.data_offset as usize;
        let mut remaining = file.stored_size as usize;

        if self
            .header
            .archive_flags
            .contains(ArchiveFlags::EMBEDDED_NAMES)
        {
            // bstring: u8 length, no terminator
            let len = r.u8_at(offset)? as usize;
            offset += 1 + len;
            remaining = remaining
                .checked_sub(1 + len)
                .ok_or_else(|| XenonError::ParseError("embedded name overruns entry".into()))?;
        }
        Ok((offset, remaining))
    }

    /// Uncompressed byte length of an entry, read without extracting it.
    pub fn uncompressed_size(&self, data: &[u8], file: &BsaFile) -> Result<u64> {
        let (offset, remaining) = self.data_region(data, file)?;
        if !file.compressed {
            return Ok(remaining as u64);
        }
        Ok(u64::from(
            BinaryReader::new(data).u32_at(offset, self.header.endianness)?,
        ))
    }

    /// Decompress one file's payload out of the full archive bytes.
    ///
    /// `data` must be the same archive this was parsed from.
    pub fn extract_file(&self, data: &[u8], file: &BsaFile) -> Result<Vec<u8>> {
        let r = BinaryReader::new(data);
        let (offset, remaining) = self.data_region(data, file)?;

        if !file.compressed {
            return Ok(r.bytes(offset, remaining)?.to_vec());
        }

        let original_size = r.u32_at(offset, self.header.endianness)? as usize;
        // A single game asset never approaches this; a larger claim is a
        // corrupt entry, not a file worth allocating for
        const MAX_UNCOMPRESSED: usize = 1 << 30;
        if original_size > MAX_UNCOMPRESSED {
            return Err(XenonError::ParseError(format!(
                "entry claims {} uncompressed bytes",
                original_size
            )));
        }
        let payload = r.bytes(offset + 4, remaining.saturating_sub(4))?;

        let out = match self.header.version {
            105 => decompress_lz4(payload, original_size)?,
            _ => decompress_zlib(payload, original_size)?,
        };
        if out.len() != original_size {
            return Err(XenonError::SizeMismatch {
                declared: original_size,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

fn decompress_zlib(payload: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    flate2::read::ZlibDecoder::new(payload)
        .read_to_end(&mut out)
        .map_err(|e| XenonError::Decompression(format!("zlib: {e}")))?;
    Ok(out)
}

fn decompress_lz4(payload: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    let mut decoder = lz4::Decoder::new(payload)
        .map_err(|e| XenonError::Decompression(format!("lz4: {e}")))?;
    decoder
        .read_to_end(&mut out)
        .map_err(|e| XenonError::Decompression(format!("lz4: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Build a one-folder, one-file v104 archive. Returns the bytes and the
    /// uncompressed file content.
    pub(crate) fn build_v104(compressed_archive: bool, toggle_bit: bool) -> (Vec<u8>, Vec<u8>) {
        let folder = b"meshes\\architecture";
        let file_name = b"sign.nif";
        let content: Vec<u8> = (0u32..300).map(|i| (i % 251) as u8).collect();

        let file_compressed = compressed_archive != toggle_bit;
        let mut data_block = Vec::new();
        if file_compressed {
            data_block.extend_from_slice(&(content.len() as u32).to_le_bytes());
            let mut enc =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(&content).unwrap();
            data_block.extend_from_slice(&enc.finish().unwrap());
        } else {
            data_block.extend_from_slice(&content);
        }

        let folder_name_block_len = 1 + folder.len() + 1;
        let file_names_len = file_name.len() + 1;
        let data_offset =
            BSA_HEADER_SIZE + 16 + folder_name_block_len + 16 + file_names_len;

        let mut flags = ArchiveFlags::DIR_NAMES | ArchiveFlags::FILE_NAMES;
        if compressed_archive {
            flags |= ArchiveFlags::COMPRESSED;
        }

        let mut d = Vec::new();
        d.extend_from_slice(BSA_MAGIC);
        d.extend_from_slice(&104u32.to_le_bytes());
        d.extend_from_slice(&(BSA_HEADER_SIZE as u32).to_le_bytes());
        d.extend_from_slice(&flags.bits().to_le_bytes());
        d.extend_from_slice(&1u32.to_le_bytes()); // folders
        d.extend_from_slice(&1u32.to_le_bytes()); // files
        d.extend_from_slice(&((folder.len() + 1) as u32).to_le_bytes());
        d.extend_from_slice(&(file_names_len as u32).to_le_bytes());
        d.extend_from_slice(&ContentFlags::MESHES.bits().to_le_bytes());

        // Folder record
        d.extend_from_slice(&hash::hash_folder(folder).numeric().to_le_bytes());
        d.extend_from_slice(&1u32.to_le_bytes());
        d.extend_from_slice(&0u32.to_le_bytes());

        // File block: bzstring folder name + file record
        d.push((folder.len() + 1) as u8);
        d.extend_from_slice(folder);
        d.push(0);
        d.extend_from_slice(&hash::hash_file(file_name).numeric().to_le_bytes());
        let mut stored = data_block.len() as u32;
        if toggle_bit {
            stored |= COMPRESSION_TOGGLE;
        }
        d.extend_from_slice(&stored.to_le_bytes());
        d.extend_from_slice(&(data_offset as u32).to_le_bytes());

        // File name block
        d.extend_from_slice(file_name);
        d.push(0);

        assert_eq!(d.len(), data_offset);
        d.extend_from_slice(&data_block);
        (d, content)
    }

    #[test]
    fn parses_tables_and_names() {
        let (data, _) = build_v104(false, false);
        let archive = BsaArchive::parse(&data).unwrap();

        assert_eq!(archive.header.version, 104);
        assert_eq!(archive.file_count(), 1);
        assert_eq!(archive.folders[0].name, "meshes\\architecture");
        assert_eq!(archive.folders[0].files[0].name, "sign.nif");
        assert!(!archive.folders[0].files[0].compressed);
        assert_eq!(archive.total_size(), data.len() as u64);
    }

    #[test]
    fn extracts_uncompressed() {
        let (data, content) = build_v104(false, false);
        let archive = BsaArchive::parse(&data).unwrap();
        let file = archive.find("meshes/architecture", "SIGN.NIF").unwrap();
        assert_eq!(archive.extract_file(&data, file).unwrap(), content);
    }

    #[test]
    fn extracts_zlib_default_compressed() {
        let (data, content) = build_v104(true, false);
        let archive = BsaArchive::parse(&data).unwrap();
        let file = &archive.folders[0].files[0];
        assert!(file.compressed);
        let out = archive.extract_file(&data, file).unwrap();
        assert_eq!(out.len() as u64, archive.uncompressed_size(&data, file).unwrap());
        assert_eq!(out, content);
    }

    #[test]
    fn toggle_bit_inverts_archive_default() {
        // Compressed archive + toggle = this file is stored raw
        let (data, content) = build_v104(true, true);
        let archive = BsaArchive::parse(&data).unwrap();
        let file = &archive.folders[0].files[0];
        assert!(!file.compressed);
        assert_eq!(archive.extract_file(&data, file).unwrap(), content);

        // Uncompressed archive + toggle = this file is compressed
        let (data, content) = build_v104(false, true);
        let archive = BsaArchive::parse(&data).unwrap();
        let file = &archive.folders[0].files[0];
        assert!(file.compressed);
        assert_eq!(archive.extract_file(&data, file).unwrap(), content);
    }

    #[test]
    fn corrupt_payload_is_a_decompression_error() {
        let (mut data, _) = build_v104(true, false);
        let len = data.len();
        data[len - 8..].fill(0xFF);
        let archive = BsaArchive::parse(&data).unwrap();
        let file = &archive.folders[0].files[0];
        assert!(matches!(
            archive.extract_file(&data, file),
            Err(XenonError::Decompression(_) | XenonError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_non_archives() {
        assert!(BsaArchive::parse(b"BSA\0garbage").is_err());
        let mut bad = build_v104(false, false).0;
        bad[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(BsaArchive::parse(&bad).is_err());
    }
}
