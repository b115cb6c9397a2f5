//! Rewriters for the NiGeometryData family
//!
//! Triangle and strip data blocks hold the bulk of a mesh's bytes: packed
//! vertex positions, normals, optional tangent frames, vertex colors and UV
//! sets, then the face indices. The vector-flags word doubles as the UV-set
//! count and the tangent-space toggle.

use crate::Result;

use super::convert::FieldSwapper;

/// Low six bits of the vector flags word count UV sets
const UV_SET_MASK: u16 = 0x3F;
/// Tangent/bitangent arrays present
const HAS_TANGENTS: u16 = 0x1000;

/// Shared NiGeometryData prefix, up to and including the additional-data ref
fn rewrite_geometry_data(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.u32()?; // group id
    let num_vertices = sw.u16()? as usize;
    sw.u8()?; // keep flags
    sw.u8()?; // compress flags

    if sw.bool8()? {
        sw.f32s(num_vertices * 3)?;
    }

    let vector_flags = sw.u16()?;
    let has_normals = sw.bool8()?;
    if has_normals {
        sw.f32s(num_vertices * 3)?;
    }
    if has_normals && vector_flags & HAS_TANGENTS != 0 {
        sw.f32s(num_vertices * 3)?; // tangents
        sw.f32s(num_vertices * 3)?; // bitangents
    }

    sw.f32s(3)?; // center
    sw.f32()?; // radius

    if sw.bool8()? {
        sw.f32s(num_vertices * 4)?; // vertex colors
    }

    let uv_sets = (vector_flags & UV_SET_MASK) as usize;
    sw.f32s(uv_sets * num_vertices * 2)?;

    sw.u16()?; // consistency flags
    sw.u32()?; // additional data ref
    Ok(())
}

/// `NiTriShapeData`: geometry data plus an indexed triangle list and match
/// groups.
pub(crate) fn rewrite_tri_shape_data(sw: &mut FieldSwapper<'_>) -> Result<()> {
    rewrite_geometry_data(sw)?;

    let num_triangles = sw.u16()? as usize;
    sw.u32()?; // num triangle points
    if sw.bool8()? {
        sw.u16s(num_triangles * 3)?;
    }

    let num_match_groups = sw.u16()? as usize;
    for _ in 0..num_match_groups {
        let count = sw.u16()? as usize;
        sw.u16s(count)?;
    }
    Ok(())
}

/// `NiTriStripsData`: geometry data plus strip lengths and strip indices.
pub(crate) fn rewrite_tri_strips_data(sw: &mut FieldSwapper<'_>) -> Result<()> {
    rewrite_geometry_data(sw)?;

    sw.u16()?; // num triangles
    let num_strips = sw.u16()? as usize;
    let mut total_points = 0usize;
    for _ in 0..num_strips {
        total_points += sw.u16()? as usize;
    }
    if sw.bool8()? {
        sw.u16s(total_points)?;
    }
    Ok(())
}
