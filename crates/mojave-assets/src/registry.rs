//! Format registry: categories, signatures, and the format-module trait
//!
//! Every recognized format registers its magic signatures, size policy and
//! display metadata here. The registry is built once at startup and then
//! only read, so the carver and extractor borrow it freely across threads.

use serde::{Deserialize, Serialize};

use xenonutils::Endianness;

/// Stable identifier for a recognized format
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Dds,
    Ddx,
    Png,
    Nif,
    Xma,
    Bsa,
    Scda,
    EsmRecord,
}

impl FormatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FormatKind::Dds => "dds",
            FormatKind::Ddx => "ddx",
            FormatKind::Png => "png",
            FormatKind::Nif => "nif",
            FormatKind::Xma => "xma",
            FormatKind::Bsa => "bsa",
            FormatKind::Scda => "scda",
            FormatKind::EsmRecord => "esm_record",
        }
    }
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display category of a format
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Texture,
    Image,
    Audio,
    Model,
    Module,
    Script,
    Xbox,
    Plugin,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Texture => "texture",
            Category::Image => "image",
            Category::Audio => "audio",
            Category::Model => "model",
            Category::Module => "module",
            Category::Script => "script",
            Category::Xbox => "xbox",
            Category::Plugin => "plugin",
        }
    }

    /// Display color used by list views; plain data so presentation layers
    /// can map it however they like
    pub fn color_rgb(self) -> (u8, u8, u8) {
        match self {
            Category::Texture => (0x4C, 0xAF, 0x50),
            Category::Image => (0x8B, 0xC3, 0x4A),
            Category::Audio => (0x03, 0xA9, 0xF4),
            Category::Model => (0xFF, 0x98, 0x00),
            Category::Module => (0x9E, 0x9E, 0x9E),
            Category::Script => (0xBA, 0x68, 0xC8),
            Category::Xbox => (0x26, 0xA6, 0x9A),
            Category::Plugin => (0xFF, 0xD5, 0x4F),
        }
    }
}

/// A registered magic signature
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub id: &'static str,
    /// Fixed byte prefix at the candidate offset
    pub magic: &'static [u8],
    pub description: &'static str,
}

/// Typed per-format metadata attached to a parse result
#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    None,
    Texture {
        width: u32,
        height: u32,
        mip_count: u32,
        fourcc: String,
        endianness: Endianness,
        texture_path: Option<String>,
    },
    Image {
        width: u32,
        height: u32,
    },
    Audio {
        channels: Option<u16>,
        sample_rate: Option<u32>,
    },
    Nif {
        endianness: Endianness,
        version: u32,
        bs_version: u32,
        num_blocks: u32,
        num_strings: u32,
    },
    Bsa {
        version: u32,
        folder_count: u32,
        file_count: u32,
        xbox: bool,
    },
    Scda {
        bytecode_len: u32,
    },
    EsmRecord {
        signature: String,
        form_id: Option<u32>,
        endianness: Endianness,
    },
}

/// Outcome of a successful candidate validation
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub kind: FormatKind,
    /// True on-disk byte length of the embedded asset, header included
    pub size: u64,
    /// Recovered file name, when the format permits recovery
    pub filename: Option<String>,
    pub metadata: Metadata,
}

/// One format's registry entry: identity, size policy, signatures, and the
/// structural validator.
pub trait FormatModule: Send + Sync {
    fn kind(&self) -> FormatKind;
    fn display_name(&self) -> &'static str;
    fn extension(&self) -> &'static str;
    fn category(&self) -> Category;
    /// Subfolder under the extraction root
    fn output_folder(&self) -> &'static str;
    fn min_size(&self) -> u64;
    fn max_size(&self) -> u64;
    /// Whether the format appears in filter UIs
    fn show_in_filter_ui(&self) -> bool {
        true
    }
    /// Cross-format tie breaker; lower wins
    fn display_priority(&self) -> u8;
    fn signatures(&self) -> &'static [Signature];

    /// Validate a candidate hit at `offset` and compute its true length.
    ///
    /// `None` means "not this format here" and never a process failure;
    /// structural corruption and short reads both land there.
    fn parse(&self, data: &[u8], offset: usize) -> Option<ParseResult>;
}

/// Process-lifetime collection of format modules
pub struct FormatRegistry {
    modules: Vec<Box<dyn FormatModule>>,
}

impl FormatRegistry {
    /// The built-in module set
    pub fn builtin() -> Self {
        Self {
            modules: crate::formats::builtin_modules(),
        }
    }

    pub fn modules(&self) -> impl Iterator<Item = &dyn FormatModule> {
        self.modules.iter().map(Box::as_ref)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn by_kind(&self, kind: FormatKind) -> Option<&dyn FormatModule> {
        self.modules().find(|m| m.kind() == kind)
    }

    pub fn by_display_name(&self, name: &str) -> Option<&dyn FormatModule> {
        self.modules().find(|m| m.display_name() == name)
    }

    /// Signature dispatch index keyed by first magic byte: for each byte
    /// value, the `(magic, module index)` pairs to try at a hit.
    pub fn dispatch_index(&self) -> Vec<Vec<(&'static [u8], usize)>> {
        let mut index: Vec<Vec<(&'static [u8], usize)>> = vec![Vec::new(); 256];
        for (module_index, module) in self.modules.iter().enumerate() {
            for signature in module.signatures() {
                let first = signature.magic[0] as usize;
                index[first].push((signature.magic, module_index));
            }
        }
        index
    }

    pub fn module_at(&self, index: usize) -> &dyn FormatModule {
        self.modules[index].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_every_kind() {
        let registry = FormatRegistry::builtin();
        for kind in [
            FormatKind::Dds,
            FormatKind::Ddx,
            FormatKind::Png,
            FormatKind::Nif,
            FormatKind::Xma,
            FormatKind::Bsa,
            FormatKind::Scda,
            FormatKind::EsmRecord,
        ] {
            let module = registry.by_kind(kind).expect("kind registered");
            assert!(module.min_size() <= module.max_size());
            assert!(!module.signatures().is_empty());
        }
    }

    #[test]
    fn dispatch_index_routes_by_first_byte() {
        let registry = FormatRegistry::builtin();
        let index = registry.dispatch_index();
        // "DDS " and the ESM signatures share no first byte with "BSA\0"
        assert!(index[b'D' as usize]
            .iter()
            .any(|(magic, _)| *magic == b"DDS "));
        assert!(index[b'B' as usize]
            .iter()
            .any(|(magic, _)| *magic == b"BSA\0"));
        assert!(index[0xFF].is_empty());
    }

    #[test]
    fn display_name_lookup() {
        let registry = FormatRegistry::builtin();
        assert!(registry.by_display_name("DDS Texture").is_some());
        assert!(registry.by_display_name("Nonesuch").is_none());
    }
}
