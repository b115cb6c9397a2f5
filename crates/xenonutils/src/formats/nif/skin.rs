//! Rewriters for skinning blocks
//!
//! `NiSkinPartition` splits a skinned mesh into GPU-sized partitions; every
//! count in its per-partition records gates one or more arrays, so the
//! walker must track them all to keep the swap aligned.

use crate::Result;

use super::convert::FieldSwapper;

/// `NiSkinInstance`: data/partition/root refs plus the bone list.
pub(crate) fn rewrite_skin_instance(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.u32()?; // data
    sw.u32()?; // skin partition
    sw.u32()?; // skeleton root
    let num_bones = sw.u32()? as usize;
    sw.u32s(num_bones)?;
    Ok(())
}

/// `BSDismemberSkinInstance`: a skin instance plus body-part partitions.
pub(crate) fn rewrite_dismember_skin_instance(sw: &mut FieldSwapper<'_>) -> Result<()> {
    rewrite_skin_instance(sw)?;
    let num_partitions = sw.u32()? as usize;
    // Per partition: u16 flags + u16 body part
    sw.u16s(num_partitions * 2)?;
    Ok(())
}

/// `NiSkinData`: overall skin transform plus per-bone transforms and
/// optional vertex weights.
pub(crate) fn rewrite_skin_data(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.f32s(9)?; // rotation
    sw.f32s(3)?; // translation
    sw.f32()?; // scale
    let num_bones = sw.u32()? as usize;
    let has_weights = sw.bool8()?;

    for _ in 0..num_bones {
        sw.f32s(9)?; // rotation
        sw.f32s(3)?; // translation
        sw.f32()?; // scale
        sw.f32s(4)?; // bounding sphere
        let num_vertices = sw.u16()? as usize;
        if has_weights {
            for _ in 0..num_vertices {
                sw.u16()?; // vertex index
                sw.f32()?; // weight
            }
        }
    }
    Ok(())
}

/// `NiSkinPartition`: per-partition vertex maps, weights, strips or
/// triangles, and bone indices.
pub(crate) fn rewrite_skin_partition(sw: &mut FieldSwapper<'_>) -> Result<()> {
    let num_partitions = sw.u32()? as usize;

    for _ in 0..num_partitions {
        let num_vertices = sw.u16()? as usize;
        let num_triangles = sw.u16()? as usize;
        let num_bones = sw.u16()? as usize;
        let num_strips = sw.u16()? as usize;
        let weights_per_vertex = sw.u16()? as usize;

        sw.u16s(num_bones)?;

        if sw.bool8()? {
            sw.u16s(num_vertices)?; // vertex map
        }
        if sw.bool8()? {
            sw.f32s(num_vertices * weights_per_vertex)?; // weights
        }

        let mut total_strip_points = 0usize;
        for _ in 0..num_strips {
            total_strip_points += sw.u16()? as usize;
        }

        if sw.bool8()? {
            if num_strips > 0 {
                sw.u16s(total_strip_points)?;
            } else {
                sw.u16s(num_triangles * 3)?;
            }
        }

        if sw.bool8()? {
            // Bone indices are bytes; nothing to swap
            sw.copy(num_vertices * weights_per_vertex)?;
        }
    }
    Ok(())
}
