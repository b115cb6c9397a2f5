//! Bethesda's 64-bit path hashes for BSA folder and file tables
//!
//! Both hashes pack four path-derived bytes with a 32-bit rolling checksum:
//!
//! ```text
//! bits  0..8   last character
//! bits  8..16  second-to-last character
//! bits 16..24  length
//! bits 24..32  first character
//! bits 32..64  checksum over the middle of the string
//! ```
//!
//! Paths are hashed lowercase with `/` folded to `\`. Files hash their stem
//! like a folder, then mix in the extension checksum and a small per-known-
//! extension tweak of the packed bytes.

/// Packed hash halves, kept apart so the Xbox 360 half-swap stays explicit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BsaHash {
    pub low: u32,
    pub crc: u32,
}

impl BsaHash {
    /// The hash as stored in PC archive tables
    pub fn numeric(self) -> u64 {
        u64::from(self.low) | (u64::from(self.crc) << 32)
    }

    /// The hash as stored in Xbox 360 archive tables: halves swapped
    pub fn numeric_xbox(self) -> u64 {
        u64::from(self.crc) | (u64::from(self.low) << 32)
    }

    pub fn from_numeric(value: u64, xbox: bool) -> Self {
        let value = if xbox { swap_halves(value) } else { value };
        Self {
            low: value as u32,
            crc: (value >> 32) as u32,
        }
    }
}

/// Swap the 32-bit halves of a stored hash
pub fn swap_halves(value: u64) -> u64 {
    value.rotate_left(32)
}

fn normalize(path: &[u8]) -> Vec<u8> {
    path.iter()
        .map(|&b| match b {
            b'/' => b'\\',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// Bethesda's rolling checksum, not a real CRC
fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| u32::from(b).wrapping_add(acc.wrapping_mul(0x1003F)))
}

fn pack(first: u8, last2: u8, last: u8, len: u8, crc: u32) -> BsaHash {
    BsaHash {
        low: u32::from(last)
            | (u32::from(last2) << 8)
            | (u32::from(len) << 16)
            | (u32::from(first) << 24),
        crc,
    }
}

/// Hash a folder path. Paths of 260 bytes or more hash like the empty path,
/// which is how the original tooling behaves.
pub fn hash_folder(path: &[u8]) -> BsaHash {
    let path = normalize(path);
    let len = path.len();
    if len == 0 || len >= 260 {
        return BsaHash::default();
    }

    let last = path[len - 1];
    let last2 = if len >= 3 { path[len - 2] } else { 0 };
    let crc = if len > 3 { checksum(&path[1..len - 2]) } else { 0 };
    pack(path[0], last2, last, len as u8, crc)
}

/// Hash a file name. Any leading directories are ignored; the extension
/// feeds the checksum and, for a handful of known extensions, nudges the
/// packed bytes.
pub fn hash_file(path: &[u8]) -> BsaHash {
    // Extension codes for the tweak table, in Bethesda's fixed order
    const KNOWN_EXTENSIONS: [&[u8]; 6] = [b"", b".nif", b".kf", b".dds", b".wav", b".adp"];

    let path = normalize(path);
    let name = match path.iter().rposition(|&b| b == b'\\') {
        Some(pos) => &path[pos + 1..],
        None => &path[..],
    };
    let (stem, extension) = match name.iter().rposition(|&b| b == b'.') {
        Some(pos) => (&name[..pos], &name[pos..]),
        None => (name, &b""[..]),
    };

    if stem.is_empty() || stem.len() >= 260 || extension.len() >= 16 {
        return BsaHash::default();
    }

    let mut hash = hash_folder(stem);
    hash.crc = hash.crc.wrapping_add(checksum(extension));

    if let Some(index) = KNOWN_EXTENSIONS.iter().position(|&e| e == extension) {
        let i = index as u8;
        let [mut last, mut last2, len, mut first] = hash.low.to_le_bytes();
        first = (u32::from(first).wrapping_add(32 * u32::from(i & 0xFC))) as u8;
        last = (u32::from(last).wrapping_add(u32::from(i & 0xFE) << 6)) as u8;
        last2 = (u32::from(last2).wrapping_add(u32::from(i.wrapping_shl(7)))) as u8;
        hash.low = u32::from_le_bytes([last, last2, len, first]);
    }

    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_hash_oracle_vectors() {
        let h = |path: &[u8]| hash_folder(path).numeric();
        assert_eq!(
            h(b"textures/armor/amuletsandrings/elder council"),
            0x04BC422C742C696C
        );
        assert_eq!(
            h(b"sound/voice/skyrim.esm/maleuniquedbguardian"),
            0x594085AC732B616E
        );
        assert_eq!(h(b"textures/architecture/windhelm"), 0xC1D97EBE741E6C6D);
    }

    #[test]
    fn file_hash_oracle_vectors() {
        let h = |path: &[u8]| hash_file(path).numeric();
        assert_eq!(h(b"darkbrotherhood__0007469a_1.fuz"), 0x011F11B0641B5F31);
        assert_eq!(h(b"elder_council_amulet_n.dds"), 0xDC531E2F6516DFEE);
        assert_eq!(
            h(b"testtoddquest_testtoddhappy_00027fa2_1.mp3"),
            0xDE0301EE74265F31
        );
    }

    #[test]
    fn separators_and_case_fold_together() {
        assert_eq!(hash_folder(b"Meshes/Armor"), hash_folder(b"meshes\\armor"));
        assert_eq!(
            hash_file(b"users/john/test.txt"),
            hash_file(b"test.txt")
        );
    }

    #[test]
    fn degenerate_paths_hash_to_zero() {
        assert_eq!(hash_folder(b"").numeric(), 0);
        assert_eq!(hash_folder(&[b'a'; 260]).numeric(), 0);
        assert_eq!(hash_file(&[b'a'; 260]).numeric(), 0);
        assert_eq!(hash_file(b".gitignore").numeric(), 0);
        assert_ne!(hash_file(&[b'a'; 259]).numeric(), 0);
    }

    #[test]
    fn xbox_half_swap_round_trips() {
        let hash = hash_file(b"nvdlc03dialogue.bsa");
        let stored = hash.numeric_xbox();
        assert_eq!(swap_halves(stored), hash.numeric());
        assert_eq!(BsaHash::from_numeric(stored, true), hash);
        assert_eq!(BsaHash::from_numeric(hash.numeric(), false), hash);
    }
}
