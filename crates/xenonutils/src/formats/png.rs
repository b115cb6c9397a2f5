//! PNG validation and sizing via chunk walking

use crate::binary::BinaryReader;

/// Eight-byte PNG signature
pub const PNG_MAGIC: &[u8; 8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Summary of a validated PNG stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngInfo {
    pub width: u32,
    pub height: u32,
    /// Total byte length, signature through the IEND chunk
    pub file_size: u64,
}

/// Walk the chunk list and size the stream.
///
/// Returns `None` unless the signature matches, the first chunk is a
/// well-formed IHDR and an IEND chunk terminates the stream inside `data`.
pub fn validate(data: &[u8]) -> Option<PngInfo> {
    if data.len() < PNG_MAGIC.len() || &data[..PNG_MAGIC.len()] != PNG_MAGIC {
        return None;
    }

    let r = BinaryReader::new(data);
    let mut offset = PNG_MAGIC.len();
    let mut info: Option<(u32, u32)> = None;

    loop {
        let length = r.u32_be(offset).ok()?;
        if length >= 0x8000_0000 {
            return None;
        }
        let chunk_type = r.bytes(offset + 4, 4).ok()?;

        match (info.is_none(), chunk_type) {
            // IHDR must come first and carry exactly 13 bytes
            (true, b"IHDR") if length == 13 => {
                let width = r.u32_be(offset + 8).ok()?;
                let height = r.u32_be(offset + 12).ok()?;
                if width == 0 || height == 0 {
                    return None;
                }
                info = Some((width, height));
            }
            (true, _) => return None,
            (false, b"IEND") => {
                let (width, height) = info?;
                let end = offset + 12 + length as usize;
                r.bytes(offset + 8, length as usize + 4).ok()?;
                return Some(PngInfo {
                    width,
                    height,
                    file_size: end as u64,
                });
            }
            (false, _) => {}
        }

        // length + type + data + crc
        offset = offset.checked_add(12 + length as usize)?;
        if offset > data.len() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0; 4]); // unchecked CRC
        out
    }

    fn tiny_png() -> Vec<u8> {
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&64u32.to_be_bytes());
        ihdr.extend_from_slice(&32u32.to_be_bytes());
        ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);

        let mut data = PNG_MAGIC.to_vec();
        data.extend_from_slice(&chunk(b"IHDR", &ihdr));
        data.extend_from_slice(&chunk(b"IDAT", &[0xAB; 20]));
        data.extend_from_slice(&chunk(b"IEND", &[]));
        data
    }

    #[test]
    fn sizes_a_complete_stream() {
        let png = tiny_png();
        let info = validate(&png).unwrap();
        assert_eq!(info.width, 64);
        assert_eq!(info.height, 32);
        assert_eq!(info.file_size, png.len() as u64);

        // Trailing garbage is not counted
        let mut padded = png.clone();
        padded.extend_from_slice(&[0xFF; 100]);
        assert_eq!(validate(&padded).unwrap().file_size, png.len() as u64);
    }

    #[test]
    fn rejects_truncation_and_misordering() {
        let png = tiny_png();
        assert!(validate(&png[..png.len() - 4]).is_none());
        assert!(validate(b"\x89PNG\r\n\x1a\n").is_none());

        // IDAT before IHDR
        let mut bad = PNG_MAGIC.to_vec();
        bad.extend_from_slice(&chunk(b"IDAT", &[0; 4]));
        assert!(validate(&bad).is_none());
    }
}
