//! The built-in format modules
//!
//! Thin adapters that marry the structural validators in `xenonutils` to
//! registry metadata: size policy, category, output folder, priority and
//! filename recovery.

use xenonutils::formats::{bsa, dds, ddx, esm, nif, png, xma};
use xenonutils::scda::{self, Scda};
use xenonutils::Endianness;

use crate::registry::{Category, FormatKind, FormatModule, Metadata, ParseResult, Signature};
use crate::texpath;

/// All built-in modules, in display order
pub(crate) fn builtin_modules() -> Vec<Box<dyn FormatModule>> {
    vec![
        Box::new(BsaFormat),
        Box::new(NifFormat),
        Box::new(DdsFormat),
        Box::new(DdxFormat),
        Box::new(XmaFormat),
        Box::new(PngFormat),
        Box::new(ScdaFormat),
        Box::new(EsmRecordFormat),
    ]
}

/// Shared guard: a parse result must fit inside the dump
fn fits(data: &[u8], offset: usize, size: u64) -> bool {
    size <= (data.len() - offset) as u64
}

pub struct DdsFormat;

impl FormatModule for DdsFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Dds
    }
    fn display_name(&self) -> &'static str {
        "DDS Texture"
    }
    fn extension(&self) -> &'static str {
        "dds"
    }
    fn category(&self) -> Category {
        Category::Texture
    }
    fn output_folder(&self) -> &'static str {
        "textures"
    }
    fn min_size(&self) -> u64 {
        136
    }
    fn max_size(&self) -> u64 {
        256 * 1024 * 1024
    }
    fn display_priority(&self) -> u8 {
        30
    }
    fn signatures(&self) -> &'static [Signature] {
        &[Signature {
            id: "dds",
            magic: b"DDS ",
            description: "DirectDraw surface",
        }]
    }

    fn parse(&self, data: &[u8], offset: usize) -> Option<ParseResult> {
        let header = dds::DdsHeader::parse(data.get(offset..)?)?;
        let size = header.file_size();
        if !fits(data, offset, size) {
            return None;
        }

        let recovered = texpath::recover_texture_path(data, offset);
        Some(ParseResult {
            kind: FormatKind::Dds,
            size,
            filename: recovered.as_ref().map(|p| p.file_name.clone()),
            metadata: Metadata::Texture {
                width: header.width,
                height: header.height,
                mip_count: header.mip_count,
                fourcc: header.fourcc_str(),
                endianness: header.endianness,
                texture_path: recovered.map(|p| p.path),
            },
        })
    }
}

pub struct DdxFormat;

impl FormatModule for DdxFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Ddx
    }
    fn display_name(&self) -> &'static str {
        "DDX Texture"
    }
    fn extension(&self) -> &'static str {
        "ddx"
    }
    fn category(&self) -> Category {
        Category::Xbox
    }
    fn output_folder(&self) -> &'static str {
        "textures"
    }
    fn min_size(&self) -> u64 {
        136
    }
    fn max_size(&self) -> u64 {
        256 * 1024 * 1024
    }
    fn display_priority(&self) -> u8 {
        30
    }
    fn signatures(&self) -> &'static [Signature] {
        &[
            Signature {
                id: "ddx_linear",
                magic: b"3XDO",
                description: "Xbox 360 surface, linear",
            },
            Signature {
                id: "ddx_tiled",
                magic: b"3XDR",
                description: "Xbox 360 surface, tiled",
            },
        ]
    }

    fn parse(&self, data: &[u8], offset: usize) -> Option<ParseResult> {
        let header = ddx::DdxHeader::parse(data.get(offset..)?)?;
        let size = header.file_size();
        if !fits(data, offset, size) {
            return None;
        }

        let recovered = texpath::recover_texture_path(data, offset);
        Some(ParseResult {
            kind: FormatKind::Ddx,
            size,
            filename: recovered
                .as_ref()
                .map(|p| force_extension(&p.file_name, "ddx")),
            metadata: Metadata::Texture {
                width: header.width,
                height: header.height,
                mip_count: header.mip_count,
                fourcc: header.fourcc_str(),
                endianness: Endianness::Big,
                texture_path: recovered.map(|p| p.path),
            },
        })
    }
}

/// Swap the extension on a recovered name so a `.dds` path can label the
/// console-format file it precedes
fn force_extension(name: &str, extension: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) => format!("{stem}.{extension}"),
        None => format!("{name}.{extension}"),
    }
}

pub struct PngFormat;

impl FormatModule for PngFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Png
    }
    fn display_name(&self) -> &'static str {
        "PNG Image"
    }
    fn extension(&self) -> &'static str {
        "png"
    }
    fn category(&self) -> Category {
        Category::Image
    }
    fn output_folder(&self) -> &'static str {
        "images"
    }
    fn min_size(&self) -> u64 {
        45
    }
    fn max_size(&self) -> u64 {
        64 * 1024 * 1024
    }
    fn display_priority(&self) -> u8 {
        50
    }
    fn signatures(&self) -> &'static [Signature] {
        &[Signature {
            id: "png",
            magic: &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
            description: "PNG image",
        }]
    }

    fn parse(&self, data: &[u8], offset: usize) -> Option<ParseResult> {
        let info = png::validate(data.get(offset..)?)?;
        Some(ParseResult {
            kind: FormatKind::Png,
            size: info.file_size,
            filename: None,
            metadata: Metadata::Image {
                width: info.width,
                height: info.height,
            },
        })
    }
}

pub struct NifFormat;

impl FormatModule for NifFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Nif
    }
    fn display_name(&self) -> &'static str {
        "NIF Model"
    }
    fn extension(&self) -> &'static str {
        "nif"
    }
    fn category(&self) -> Category {
        Category::Model
    }
    fn output_folder(&self) -> &'static str {
        "models"
    }
    fn min_size(&self) -> u64 {
        128
    }
    fn max_size(&self) -> u64 {
        128 * 1024 * 1024
    }
    fn display_priority(&self) -> u8 {
        20
    }
    fn signatures(&self) -> &'static [Signature] {
        &[
            Signature {
                id: "nif_gamebryo",
                magic: b"Gamebryo File Format",
                description: "Gamebryo scene file",
            },
            Signature {
                id: "nif_netimmerse",
                magic: b"NetImmerse File Format",
                description: "NetImmerse scene file",
            },
        ]
    }

    fn parse(&self, data: &[u8], offset: usize) -> Option<ParseResult> {
        let nif = nif::Nif::parse(data.get(offset..)?).ok()?;
        Some(ParseResult {
            kind: FormatKind::Nif,
            size: nif.info.total_size(),
            filename: None,
            metadata: Metadata::Nif {
                endianness: nif.info.endianness,
                version: nif.info.version,
                bs_version: nif.info.bethesda_version,
                num_blocks: nif.info.num_blocks,
                num_strings: nif.info.strings.len() as u32,
            },
        })
    }
}

pub struct XmaFormat;

impl FormatModule for XmaFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Xma
    }
    fn display_name(&self) -> &'static str {
        "XMA Audio"
    }
    fn extension(&self) -> &'static str {
        "xma"
    }
    fn category(&self) -> Category {
        Category::Audio
    }
    fn output_folder(&self) -> &'static str {
        "audio"
    }
    fn min_size(&self) -> u64 {
        44
    }
    fn max_size(&self) -> u64 {
        256 * 1024 * 1024
    }
    fn display_priority(&self) -> u8 {
        40
    }
    fn signatures(&self) -> &'static [Signature] {
        &[
            Signature {
                id: "xma_riff",
                magic: b"RIFF",
                description: "RIFF-framed XMA audio",
            },
            Signature {
                id: "xma_chunk",
                magic: b"XMA2",
                description: "bare XMA2 chunk",
            },
        ]
    }

    fn parse(&self, data: &[u8], offset: usize) -> Option<ParseResult> {
        let info = xma::validate(data.get(offset..)?)?;
        Some(ParseResult {
            kind: FormatKind::Xma,
            size: info.file_size,
            filename: None,
            metadata: Metadata::Audio {
                channels: info.channels,
                sample_rate: info.sample_rate,
            },
        })
    }
}

pub struct BsaFormat;

impl FormatModule for BsaFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Bsa
    }
    fn display_name(&self) -> &'static str {
        "BSA Archive"
    }
    fn extension(&self) -> &'static str {
        "bsa"
    }
    fn category(&self) -> Category {
        Category::Module
    }
    fn output_folder(&self) -> &'static str {
        "archives"
    }
    fn min_size(&self) -> u64 {
        bsa::BSA_HEADER_SIZE as u64
    }
    fn max_size(&self) -> u64 {
        u32::MAX as u64
    }
    fn display_priority(&self) -> u8 {
        10
    }
    fn signatures(&self) -> &'static [Signature] {
        &[Signature {
            id: "bsa",
            magic: b"BSA\0",
            description: "Bethesda archive",
        }]
    }

    fn parse(&self, data: &[u8], offset: usize) -> Option<ParseResult> {
        let archive = bsa::BsaArchive::parse(data.get(offset..)?).ok()?;
        let size = archive.total_size();
        if !fits(data, offset, size) {
            return None;
        }
        Some(ParseResult {
            kind: FormatKind::Bsa,
            size,
            filename: None,
            metadata: Metadata::Bsa {
                version: archive.header.version,
                folder_count: archive.header.folder_count,
                file_count: archive.header.file_count,
                xbox: archive.header.is_xbox(),
            },
        })
    }
}

pub struct ScdaFormat;

impl FormatModule for ScdaFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Scda
    }
    fn display_name(&self) -> &'static str {
        "Compiled Script"
    }
    fn extension(&self) -> &'static str {
        "scda"
    }
    fn category(&self) -> Category {
        Category::Script
    }
    fn output_folder(&self) -> &'static str {
        "scripts"
    }
    fn min_size(&self) -> u64 {
        8
    }
    fn max_size(&self) -> u64 {
        (scda::SCDA_HEADER_SIZE + u16::MAX as usize) as u64
    }
    fn display_priority(&self) -> u8 {
        60
    }
    fn signatures(&self) -> &'static [Signature] {
        &[Signature {
            id: "scda",
            magic: b"SCDA",
            description: "compiled script bytecode",
        }]
    }

    fn parse(&self, data: &[u8], offset: usize) -> Option<ParseResult> {
        let scda = Scda::parse(data.get(offset..)?)?;
        Some(ParseResult {
            kind: FormatKind::Scda,
            size: scda.total_size(),
            filename: None,
            metadata: Metadata::Scda {
                bytecode_len: scda.bytecode.len() as u32,
            },
        })
    }
}

pub struct EsmRecordFormat;

impl FormatModule for EsmRecordFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::EsmRecord
    }
    fn display_name(&self) -> &'static str {
        "Plugin Record"
    }
    fn extension(&self) -> &'static str {
        "bin"
    }
    fn category(&self) -> Category {
        Category::Plugin
    }
    fn output_folder(&self) -> &'static str {
        "esm_records"
    }
    fn min_size(&self) -> u64 {
        esm::SUBRECORD_HEADER_SIZE as u64
    }
    fn max_size(&self) -> u64 {
        16 * 1024 * 1024
    }
    fn show_in_filter_ui(&self) -> bool {
        false
    }
    fn display_priority(&self) -> u8 {
        70
    }
    fn signatures(&self) -> &'static [Signature] {
        &[
            Signature {
                id: "esm_tes4",
                magic: b"TES4",
                description: "plugin file header record",
            },
            Signature {
                id: "esm_grup",
                magic: b"GRUP",
                description: "record group",
            },
            Signature {
                id: "esm_edid",
                magic: b"EDID",
                description: "editor ID subrecord",
            },
            Signature {
                id: "esm_gmst",
                magic: b"GMST",
                description: "game setting record",
            },
            Signature {
                id: "esm_sctx",
                magic: b"SCTX",
                description: "script source subrecord",
            },
            Signature {
                id: "esm_scro",
                magic: b"SCRO",
                description: "script reference subrecord",
            },
            Signature {
                id: "esm_xxxx",
                magic: b"XXXX",
                description: "extended-length subrecord",
            },
        ]
    }

    fn parse(&self, data: &[u8], offset: usize) -> Option<ParseResult> {
        let slice = data.get(offset..)?;
        let signature: [u8; 4] = slice.get(0..4)?.try_into().ok()?;

        match &signature {
            b"TES4" => {
                let (header, endian) = esm::RecordHeader::parse_any(slice)?;
                let size = esm::RECORD_HEADER_SIZE as u64 + u64::from(header.data_size);
                if !fits(data, offset, size) {
                    return None;
                }
                Some(self.result(&signature, size, Some(header.form_id), endian))
            }
            b"GRUP" => {
                // A group's size field counts its own 24-byte header, and
                // the FormID slot holds a label rather than a FormID
                for endian in [Endianness::Little, Endianness::Big] {
                    let Some(header) = esm::RecordHeader::parse(slice, endian) else {
                        continue;
                    };
                    let size = u64::from(header.data_size);
                    if size >= esm::RECORD_HEADER_SIZE as u64 && fits(data, offset, size) {
                        return Some(self.result(&signature, size, None, endian));
                    }
                }
                None
            }
            b"EDID" | b"GMST" | b"SCTX" | b"SCRO" | b"XXXX" => {
                self.parse_subrecord(data, offset, signature)
            }
            _ => None,
        }
    }
}

impl EsmRecordFormat {
    fn result(
        &self,
        signature: &[u8],
        size: u64,
        form_id: Option<u32>,
        endianness: Endianness,
    ) -> ParseResult {
        ParseResult {
            kind: FormatKind::EsmRecord,
            size,
            filename: None,
            metadata: Metadata::EsmRecord {
                signature: String::from_utf8_lossy(signature).into_owned(),
                form_id,
                endianness,
            },
        }
    }

    fn parse_subrecord(&self, data: &[u8], offset: usize, signature: [u8; 4]) -> Option<ParseResult> {
        let slice = data.get(offset..)?;
        let extended = signature == *b"XXXX";

        for endian in [Endianness::Little, Endianness::Big] {
            let Some(sub) = esm::SubrecordHeader::parse_extended(slice, endian) else {
                continue;
            };
            // For an XXXX hit the resolved inner subrecord starts after the
            // extension record and its 4-byte payload
            let payload_at = if extended {
                if sub.signature == *b"XXXX" {
                    continue;
                }
                esm::SUBRECORD_HEADER_SIZE * 2 + 4
            } else {
                esm::SUBRECORD_HEADER_SIZE
            };
            let effective = if extended { sub.signature } else { signature };
            let size = (payload_at + sub.size as usize) as u64;
            if !fits(data, offset, size) {
                continue;
            }
            let Some(payload) = slice.get(payload_at..payload_at + sub.size as usize) else {
                continue;
            };

            let (accepted, form_id) = match &effective {
                b"EDID" => (esm::is_editor_id(strip_nul(payload)), None),
                b"GMST" => (esm::is_gmst_name(strip_nul(payload)), None),
                b"SCTX" => (esm::looks_like_script_source(payload), None),
                b"SCRO" => {
                    if sub.size != 4 {
                        (false, None)
                    } else {
                        let form_id = match endian {
                            Endianness::Little => {
                                u32::from_le_bytes(payload.try_into().ok()?)
                            }
                            Endianness::Big => u32::from_be_bytes(payload.try_into().ok()?),
                        };
                        (esm::is_plausible_form_id(form_id), Some(form_id))
                    }
                }
                _ => (false, None),
            };

            if accepted {
                return Some(self.result(&effective, size, form_id, endian));
            }
        }
        None
    }
}

/// Subrecord strings carry a trailing NUL that is not part of the name
fn strip_nul(payload: &[u8]) -> &[u8] {
    payload.strip_suffix(b"\0").unwrap_or(payload)
}
