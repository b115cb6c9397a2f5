//! Endianness conversion of whole NIF files
//!
//! The converter walks every block and rewrites it field by field: a
//! multi-byte field has its bytes reversed, strings and opaque byte runs are
//! copied verbatim. Field widths come from per-block-type rewriters; a block
//! whose type has no rewriter is copied unchanged and a warning is recorded
//! rather than risking corruption.
//!
//! Per block the walk is: read the header entry, dispatch on the type name,
//! rewrite the payload, advance to the next block. Block count, order and
//! sizes never change, so a conversion followed by its inverse restores the
//! input byte-for-byte for every recognized block.

use crate::binary::{BinaryReader, Endianness};
use crate::{Result, XenonError};

use super::{geometry, havok, packed, skin, Nif};

/// Field-by-field byte swapper over one region.
///
/// Reads advance a single position shared by the source and destination
/// slices; every numeric read returns the value in *source* endianness so
/// rewriters can follow counts and conditionals while swapping.
pub(crate) struct FieldSwapper<'a> {
    src: &'a [u8],
    dst: &'a mut [u8],
    src_endian: Endianness,
    pos: usize,
}

impl<'a> FieldSwapper<'a> {
    pub fn new(src: &'a [u8], dst: &'a mut [u8], src_endian: Endianness) -> Self {
        debug_assert_eq!(src.len(), dst.len());
        Self {
            src,
            dst,
            src_endian,
            pos: 0,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.src.len() - self.pos
    }

    pub fn done(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<usize> {
        if self.remaining() < n {
            return Err(XenonError::OutOfBounds {
                offset: self.pos,
                len: n,
                available: self.src.len(),
            });
        }
        let at = self.pos;
        self.pos += n;
        Ok(at)
    }

    /// Reverse an `n`-byte field into the destination
    fn swap(&mut self, n: usize) -> Result<usize> {
        let at = self.take(n)?;
        for i in 0..n {
            self.dst[at + i] = self.src[at + n - 1 - i];
        }
        Ok(at)
    }

    /// Copy `n` bytes verbatim
    pub fn copy(&mut self, n: usize) -> Result<()> {
        let at = self.take(n)?;
        self.dst[at..at + n].copy_from_slice(&self.src[at..at + n]);
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        let at = self.take(1)?;
        self.dst[at] = self.src[at];
        Ok(self.src[at])
    }

    pub fn bool8(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let at = self.swap(2)?;
        BinaryReader::new(self.src).u16_at(at, self.src_endian)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let at = self.swap(4)?;
        BinaryReader::new(self.src).u32_at(at, self.src_endian)
    }

    pub fn f32(&mut self) -> Result<f32> {
        let at = self.swap(4)?;
        BinaryReader::new(self.src).f32_at(at, self.src_endian)
    }

    pub fn u16s(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.swap(2)?;
        }
        Ok(())
    }

    pub fn u32s(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.swap(4)?;
        }
        Ok(())
    }

    pub fn f32s(&mut self, count: usize) -> Result<()> {
        self.u32s(count)
    }

    /// Swap the remainder of the region as 32-bit fields
    pub fn rest_u32(&mut self) -> Result<()> {
        if self.remaining() % 4 != 0 {
            return Err(XenonError::ParseError(format!(
                "{} trailing bytes are not 32-bit aligned",
                self.remaining()
            )));
        }
        self.u32s(self.remaining() / 4)
    }

    /// Borrow matching source/destination views of the next `n` bytes, for
    /// rewriters that need random access within a sub-region
    pub fn raw_region(&mut self, n: usize) -> Result<(&'a [u8], &mut [u8])> {
        let at = self.take(n)?;
        Ok((&self.src[at..at + n], &mut self.dst[at..at + n]))
    }

    /// Consume one byte, writing `value` instead of the source byte
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        let at = self.take(1)?;
        self.dst[at] = value;
        Ok(())
    }
}

/// Outcome of a whole-file conversion
#[derive(Debug)]
pub struct NifConversionResult {
    /// The converted file, same length as the input
    pub data: Vec<u8>,
    /// One message per block that was passed through unconverted
    pub warnings: Vec<String>,
    /// Endianness of the produced file
    pub endianness: Endianness,
}

/// Whole-file NIF endianness converter
pub struct NifConverter;

impl NifConverter {
    /// Convert an Xbox 360 (big-endian) NIF to PC layout.
    pub fn to_little_endian(data: &[u8]) -> Result<NifConversionResult> {
        Self::convert(data, Endianness::Big)
    }

    /// Convert a PC (little-endian) NIF back to Xbox 360 layout.
    pub fn to_big_endian(data: &[u8]) -> Result<NifConversionResult> {
        Self::convert(data, Endianness::Little)
    }

    fn convert(data: &[u8], expected: Endianness) -> Result<NifConversionResult> {
        let nif = Nif::parse(data)?;
        let info = &nif.info;

        if info.endianness != expected {
            return Err(XenonError::EndiannessMismatch {
                expected,
                found: info.endianness,
            });
        }
        if info.total_size() != data.len() as u64 {
            return Err(XenonError::SizeMismatch {
                declared: info.total_size() as usize,
                actual: data.len(),
            });
        }

        let mut out = vec![0u8; data.len()];
        let mut warnings = Vec::new();

        Self::rewrite_header(data, &mut out, expected)?;

        for (index, block) in info.blocks.iter().enumerate() {
            let range = block.offset..block.offset + block.size as usize;
            let src_block = &data[range.clone()];
            let dst_block = &mut out[range];

            let type_name = info.block_type_name(*block).unwrap_or("");
            match rewriter_for(type_name) {
                Some(rewrite) => {
                    let mut sw = FieldSwapper::new(src_block, dst_block, expected);
                    rewrite(&mut sw)?;
                    if !sw.done() {
                        return Err(XenonError::ParseError(format!(
                            "block {index} ({type_name}): rewrote {} of {} bytes",
                            sw.pos(),
                            src_block.len()
                        )));
                    }
                }
                None => {
                    dst_block.copy_from_slice(src_block);
                    let message =
                        format!("block {index}: unknown type {type_name:?} copied unchanged");
                    tracing::warn!("{message}");
                    warnings.push(message);
                }
            }
        }

        Ok(NifConversionResult {
            data: out,
            warnings,
            endianness: expected.flipped(),
        })
    }

    /// Rewrite the header in place: the line is copied, every numeric field
    /// is swapped, string bytes keep their order, and the endian flag is
    /// flipped.
    fn rewrite_header(src: &[u8], dst: &mut [u8], src_endian: Endianness) -> Result<()> {
        let line_len = 1 + src
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| XenonError::InvalidFormat("header line not terminated".to_string()))?;

        let mut sw = FieldSwapper::new(src, dst, src_endian);
        sw.copy(line_len)?;
        sw.u32()?; // version

        // The endian flag is the one byte whose value changes
        sw.write_u8(match src_endian {
            Endianness::Big => 0x01,
            Endianness::Little => 0x00,
        })?;

        sw.u32()?; // user version
        let num_blocks = sw.u32()? as usize;
        sw.u32s(2)?; // bethesda version, user version 2

        let num_block_types = sw.u16()? as usize;
        for _ in 0..num_block_types {
            let len = sw.u32()? as usize;
            sw.copy(len)?;
        }
        sw.u16s(num_blocks)?;
        sw.u32s(num_blocks)?;

        let num_strings = sw.u32()? as usize;
        sw.u32()?; // max string length
        for _ in 0..num_strings {
            let len = sw.u32()? as usize;
            sw.copy(len)?;
        }

        let num_groups = sw.u32()? as usize;
        sw.u32s(num_groups)?;
        Ok(())
    }
}

type RewriteFn = fn(&mut FieldSwapper<'_>) -> Result<()>;

/// Per-block-type field layouts.
///
/// Only types whose layout is known for the Fallout-era stream (version
/// 20.2.0.7, Bethesda stream 34) are listed; anything else falls back to a
/// verbatim copy with a warning.
fn rewriter_for(type_name: &str) -> Option<RewriteFn> {
    Some(match type_name {
        "NiNode" | "BSFadeNode" | "BSOrderedNode" => rewrite_node,
        "NiBillboardNode" => rewrite_billboard_node,
        "NiTriShape" | "NiTriStrips" => rewrite_geometry,
        "NiTriShapeData" => geometry::rewrite_tri_shape_data,
        "NiTriStripsData" => geometry::rewrite_tri_strips_data,
        "NiAlphaProperty" => rewrite_alpha_property,
        "NiSkinInstance" => skin::rewrite_skin_instance,
        "BSDismemberSkinInstance" => skin::rewrite_dismember_skin_instance,
        "NiSkinData" => skin::rewrite_skin_data,
        "NiSkinPartition" => skin::rewrite_skin_partition,
        "BSPackedAdditionalGeometryData" => packed::rewrite,
        "hkPackedNiTriStripsData" => havok::rewrite_packed_tri_strips_data,
        "bhkPackedNiTriStripsShape" => havok::rewrite_packed_tri_strips_shape,
        "bhkMoppBvTreeShape" => havok::rewrite_mopp_bv_tree_shape,
        "bhkRigidBody" | "bhkRigidBodyT" => havok::rewrite_rigid_body,
        "bhkCollisionObject" | "bhkSPCollisionObject" | "bhkBlendCollisionObject" => {
            havok::rewrite_collision_object
        }
        "bhkConvexVerticesShape" => havok::rewrite_convex_vertices_shape,
        "bhkBoxShape" => havok::rewrite_box_shape,
        "bhkSphereShape" => havok::rewrite_sphere_shape,
        "bhkCapsuleShape" => havok::rewrite_capsule_shape,
        "bhkListShape" => havok::rewrite_list_shape,
        "bhkConvexTransformShape" | "bhkTransformShape" => havok::rewrite_transform_shape,
        // Fixed all-32-bit payloads
        "BSXFlags" | "NiIntegerExtraData" | "NiFloatExtraData" | "NiStringExtraData"
        | "NiTransformData" | "NiFloatData" | "NiPosData" => rewrite_all_u32,
        _ => return None,
    })
}

fn rewrite_all_u32(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.rest_u32()
}

/// Shared NiAVObject prefix: name, extra data list, controller, flags pair,
/// transform, collision object.
fn rewrite_av_object(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.u32()?; // name
    let num_extra = sw.u32()? as usize;
    sw.u32s(num_extra)?;
    sw.u32()?; // controller
    sw.u16s(2)?; // flags + padding
    sw.f32s(3)?; // translation
    sw.f32s(9)?; // rotation
    sw.f32()?; // scale
    sw.u32()?; // collision object
    Ok(())
}

fn rewrite_node(sw: &mut FieldSwapper<'_>) -> Result<()> {
    rewrite_av_object(sw)?;
    let num_children = sw.u32()? as usize;
    sw.u32s(num_children)?;
    let num_effects = sw.u32()? as usize;
    sw.u32s(num_effects)?;
    Ok(())
}

fn rewrite_billboard_node(sw: &mut FieldSwapper<'_>) -> Result<()> {
    rewrite_node(sw)?;
    sw.u16()?; // billboard mode
    Ok(())
}

fn rewrite_geometry(sw: &mut FieldSwapper<'_>) -> Result<()> {
    rewrite_av_object(sw)?;
    sw.u32()?; // data
    sw.u32()?; // skin instance
    let num_materials = sw.u32()? as usize;
    sw.u32s(num_materials)?; // material name indices
    sw.u32s(num_materials)?; // material extra data
    sw.u32()?; // active material
    sw.u8()?; // dirty flag
    Ok(())
}

fn rewrite_alpha_property(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.u32()?; // name
    let num_extra = sw.u32()? as usize;
    sw.u32s(num_extra)?;
    sw.u32()?; // controller
    sw.u16()?; // blend flags
    sw.u8()?; // alpha test threshold
    Ok(())
}
