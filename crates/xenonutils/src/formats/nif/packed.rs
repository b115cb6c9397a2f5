//! `BSPackedAdditionalGeometryData` rewriter and stream decoding
//!
//! Packed geometry keeps its vertex attributes in interleaved streams of
//! half-precision floats and byte quads, described by a table of stream
//! descriptors (unit size, per-vertex size, stride, offset). The rewriter
//! swaps the descriptor table, then walks each data block's raw bytes
//! stream-by-stream so that only real multi-byte units are reversed.
//!
//! Stream semantics are assigned by descriptor offset. The half4 stream at
//! offset 8 averages ~0.82 in length and is NOT a unit normal; the normal
//! lives at offset 20. Downstream consumers must not re-label it.

use crate::binary::{half_to_f32, BinaryReader, Endianness};
use crate::{Result, XenonError};

use super::convert::FieldSwapper;

/// One stream descriptor (25 bytes on disk)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub type_code: u32,
    /// Bytes per unit: 1 for byte quads, 2 for halves
    pub unit_size: u32,
    /// Bytes per vertex for this stream
    pub total_size: u32,
    /// Bytes between consecutive vertices in the data block
    pub stride: u32,
    /// Which data block holds this stream
    pub block_index: u32,
    /// Byte offset of the stream inside each vertex record
    pub block_offset: u32,
    pub flags: u8,
}

/// What a stream holds, judged by its descriptor shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSemantic {
    Position,
    Normal,
    Tangent,
    Bitangent,
    TexCoord,
    Color,
    Unknown,
}

impl StreamInfo {
    /// Semantic label for this stream.
    ///
    /// half4 streams are labeled by their interleave offset: 0 is position,
    /// 20 normal, 32 tangent, 40 bitangent. The offset-8 half4 stream is
    /// deliberately `Unknown`: its contents are not unit-length and must
    /// not be treated as a normal. half2 is a UV pair and a byte quad is a
    /// vertex color.
    pub fn semantic(&self) -> StreamSemantic {
        match (self.unit_size, self.total_size, self.block_offset) {
            (2, 8, 0) => StreamSemantic::Position,
            (2, 8, 20) => StreamSemantic::Normal,
            (2, 8, 32) => StreamSemantic::Tangent,
            (2, 8, 40) => StreamSemantic::Bitangent,
            (2, 4, _) => StreamSemantic::TexCoord,
            (1, 4, _) => StreamSemantic::Color,
            _ => StreamSemantic::Unknown,
        }
    }

    pub fn units_per_vertex(&self) -> u32 {
        if self.unit_size == 0 {
            0
        } else {
            self.total_size / self.unit_size
        }
    }
}

/// Rewrite a whole `BSPackedAdditionalGeometryData` payload.
pub(crate) fn rewrite(sw: &mut FieldSwapper<'_>) -> Result<()> {
    let num_vertices = sw.u16()? as usize;

    let num_block_infos = sw.u32()? as usize;
    let mut infos = Vec::with_capacity(num_block_infos);
    for _ in 0..num_block_infos {
        infos.push(StreamInfo {
            type_code: sw.u32()?,
            unit_size: sw.u32()?,
            total_size: sw.u32()?,
            stride: sw.u32()?,
            block_index: sw.u32()?,
            block_offset: sw.u32()?,
            flags: sw.u8()?,
        });
    }

    let num_data_blocks = sw.u32()? as usize;
    for block_index in 0..num_data_blocks {
        if !sw.bool8()? {
            continue;
        }
        let block_size = sw.u32()? as usize;
        let num_inner_blocks = sw.u32()? as usize;
        sw.u32s(num_inner_blocks)?;
        let num_data = sw.u32()? as usize;
        sw.u32s(num_data)?;

        let (src, dst) = sw.raw_region(block_size)?;
        rewrite_vertex_data(src, dst, &infos, block_index as u32, num_vertices)?;

        sw.u32()?; // shader index
        sw.u32()?; // total size
    }
    Ok(())
}

/// Copy the raw vertex bytes, then reverse each stream's units in place.
fn rewrite_vertex_data(
    src: &[u8],
    dst: &mut [u8],
    infos: &[StreamInfo],
    block_index: u32,
    num_vertices: usize,
) -> Result<()> {
    dst.copy_from_slice(src);

    for info in infos.iter().filter(|i| i.block_index == block_index) {
        let unit = info.unit_size as usize;
        if unit <= 1 {
            continue; // byte streams need no swap
        }
        let stride = info.stride as usize;
        let units = info.units_per_vertex() as usize;

        for vertex in 0..num_vertices {
            let base = vertex
                .checked_mul(stride)
                .and_then(|v| v.checked_add(info.block_offset as usize))
                .ok_or_else(|| XenonError::ParseError("stream offset overflow".to_string()))?;
            let end = base + units * unit;
            if end > src.len() {
                return Err(XenonError::OutOfBounds {
                    offset: base,
                    len: units * unit,
                    available: src.len(),
                });
            }
            for u in 0..units {
                let at = base + u * unit;
                for b in 0..unit {
                    dst[at + b] = src[at + unit - 1 - b];
                }
            }
        }
    }
    Ok(())
}

/// Decode one half-float stream out of a data block into `f32` tuples,
/// one row per vertex.
pub fn decode_half_stream(
    data: &[u8],
    info: &StreamInfo,
    num_vertices: usize,
    endian: Endianness,
) -> Result<Vec<Vec<f32>>> {
    if info.unit_size != 2 {
        return Err(XenonError::ParseError(format!(
            "stream unit size {} is not half-precision",
            info.unit_size
        )));
    }
    let r = BinaryReader::new(data);
    let units = info.units_per_vertex() as usize;

    let mut rows = Vec::with_capacity(num_vertices);
    for vertex in 0..num_vertices {
        let base = vertex * info.stride as usize + info.block_offset as usize;
        let mut row = Vec::with_capacity(units);
        for u in 0..units {
            row.push(half_to_f32(r.u16_at(base + u * 2, endian)?));
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::f32_to_half;

    const STRIDE: u32 = 28;

    fn info(unit_size: u32, total_size: u32, block_offset: u32) -> StreamInfo {
        StreamInfo {
            type_code: 0,
            unit_size,
            total_size,
            stride: STRIDE,
            block_index: 0,
            block_offset,
            flags: 0,
        }
    }

    fn push_info(p: &mut Vec<u8>, i: &StreamInfo) {
        for v in [
            i.type_code,
            i.unit_size,
            i.total_size,
            i.stride,
            i.block_index,
            i.block_offset,
        ] {
            p.extend_from_slice(&v.to_be_bytes());
        }
        p.push(i.flags);
    }

    /// Two vertices, a half4 position at offset 0, a half2 UV at offset 8,
    /// and a color quad at offset 12; stride padded to 28.
    fn build_payload() -> (Vec<u8>, [StreamInfo; 3]) {
        let infos = [info(2, 8, 0), info(2, 4, 8), info(1, 4, 12)];
        let num_vertices = 2u16;

        let mut raw = vec![0u8; STRIDE as usize * 2];
        for v in 0..2usize {
            let base = v * STRIDE as usize;
            for (slot, value) in [1.0f32, 2.0, 3.0, 1.0].iter().enumerate() {
                let bits = f32_to_half(*value + v as f32);
                raw[base + slot * 2..base + slot * 2 + 2].copy_from_slice(&bits.to_be_bytes());
            }
            for (slot, value) in [0.25f32, 0.75].iter().enumerate() {
                let bits = f32_to_half(*value);
                raw[base + 8 + slot * 2..base + 10 + slot * 2]
                    .copy_from_slice(&bits.to_be_bytes());
            }
            raw[base + 12..base + 16].copy_from_slice(&[10, 20, 30, 40]);
        }

        let mut p = Vec::new();
        p.extend_from_slice(&num_vertices.to_be_bytes());
        p.extend_from_slice(&(infos.len() as u32).to_be_bytes());
        for i in &infos {
            push_info(&mut p, i);
        }
        p.extend_from_slice(&1u32.to_be_bytes()); // one data block
        p.push(1); // has data
        p.extend_from_slice(&(raw.len() as u32).to_be_bytes());
        p.extend_from_slice(&0u32.to_be_bytes()); // inner blocks
        p.extend_from_slice(&1u32.to_be_bytes()); // num data
        p.extend_from_slice(&(raw.len() as u32).to_be_bytes());
        p.extend_from_slice(&raw);
        p.extend_from_slice(&0u32.to_be_bytes()); // shader index
        p.extend_from_slice(&(raw.len() as u32).to_be_bytes()); // total size
        (p, infos)
    }

    #[test]
    fn rewrite_swaps_halves_and_keeps_bytes() {
        let (src, infos) = build_payload();
        let mut dst = vec![0u8; src.len()];
        let mut sw = FieldSwapper::new(&src, &mut dst, Endianness::Big);
        rewrite(&mut sw).unwrap();
        assert!(sw.done());

        // Locate the raw region: it starts after the descriptor table and
        // the data-block header
        let raw_at = 2 + 4 + infos.len() * 25 + 4 + 1 + 4 + 4 + 4 + 4;
        let raw = &dst[raw_at..raw_at + STRIDE as usize * 2];

        // Positions decode little-endian now
        let decoded =
            decode_half_stream(raw, &infos[0], 2, Endianness::Little).unwrap();
        assert_eq!(decoded[0], vec![1.0, 2.0, 3.0, 1.0]);
        assert_eq!(decoded[1], vec![2.0, 3.0, 4.0, 2.0]);

        // Color bytes are untouched
        assert_eq!(&raw[12..16], &[10, 20, 30, 40]);
    }

    #[test]
    fn semantics_follow_stream_offsets() {
        assert_eq!(info(2, 8, 0).semantic(), StreamSemantic::Position);
        assert_eq!(info(2, 8, 20).semantic(), StreamSemantic::Normal);
        assert_eq!(info(2, 8, 32).semantic(), StreamSemantic::Tangent);
        assert_eq!(info(2, 8, 40).semantic(), StreamSemantic::Bitangent);
        assert_eq!(info(2, 4, 8).semantic(), StreamSemantic::TexCoord);
        assert_eq!(info(1, 4, 12).semantic(), StreamSemantic::Color);
        // The offset-8 half4 stream is not a normal
        assert_eq!(info(2, 8, 8).semantic(), StreamSemantic::Unknown);
    }

    #[test]
    fn decode_reads_big_endian_sources() {
        let (src, infos) = build_payload();
        let raw_at = 2 + 4 + infos.len() * 25 + 4 + 1 + 4 + 4 + 4 + 4;
        let raw = &src[raw_at..raw_at + STRIDE as usize * 2];
        let decoded = decode_half_stream(raw, &infos[1], 2, Endianness::Big).unwrap();
        assert_eq!(decoded[0], vec![0.25, 0.75]);
    }

    #[test]
    fn vertex_data_shorter_than_streams_fails() {
        let (mut src, _) = build_payload();
        // Shrink the declared block size so the last vertex overruns
        let size_at = 2 + 4 + 3 * 25 + 4 + 1;
        src[size_at..size_at + 4].copy_from_slice(&20u32.to_be_bytes());
        src.truncate(src.len() - (STRIDE as usize * 2 - 20));
        let mut dst = vec![0u8; src.len()];
        let mut sw = FieldSwapper::new(&src, &mut dst, Endianness::Big);
        assert!(rewrite(&mut sw).is_err());
    }
}
