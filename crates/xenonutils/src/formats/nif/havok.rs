//! Rewriters for Havok physics blocks
//!
//! Collision shapes and rigid bodies are regular field soups apart from one
//! exception: the MOPP code stream inside `bhkMoppBvTreeShape` is an opaque
//! byte program for the physics engine and is copied through untouched.

use crate::Result;

use super::convert::FieldSwapper;

/// `hkPackedNiTriStripsData`: welded triangles, a vertex cloud and
/// sub-shape descriptors.
pub(crate) fn rewrite_packed_tri_strips_data(sw: &mut FieldSwapper<'_>) -> Result<()> {
    let num_triangles = sw.u32()? as usize;
    // Per triangle: three vertex indices plus welding info
    sw.u16s(num_triangles * 4)?;

    let num_vertices = sw.u32()? as usize;
    sw.u8()?; // compression byte
    sw.f32s(num_vertices * 3)?;

    let num_sub_shapes = sw.u16()? as usize;
    // Per sub-shape: havok filter, vertex count, material
    sw.u32s(num_sub_shapes * 3)?;
    Ok(())
}

/// `bhkPackedNiTriStripsShape`: sub-shape table plus scale/radius fields
/// and the data reference.
pub(crate) fn rewrite_packed_tri_strips_shape(sw: &mut FieldSwapper<'_>) -> Result<()> {
    let num_sub_shapes = sw.u16()? as usize;
    sw.u32s(num_sub_shapes * 3)?;

    sw.u32()?; // user data
    sw.u32()?; // unused
    sw.f32()?; // radius
    sw.u32()?; // unused
    sw.f32s(4)?; // scale
    sw.f32()?; // radius copy
    sw.f32s(4)?; // scale copy
    sw.u32()?; // data ref
    Ok(())
}

/// `bhkMoppBvTreeShape`: header fields, then the opaque MOPP byte stream.
pub(crate) fn rewrite_mopp_bv_tree_shape(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.u32()?; // shape ref
    sw.u32s(3)?; // unused
    sw.f32()?; // shape scale
    let mopp_size = sw.u32()? as usize;
    sw.f32s(3)?; // origin
    sw.f32()?; // scale
    sw.u8()?; // build type
    // MOPP code is interpreted bytewise by the engine; never swap it
    sw.copy(mopp_size)?;
    Ok(())
}

/// `bhkRigidBody` / `bhkRigidBodyT`.
pub(crate) fn rewrite_rigid_body(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.u32()?; // shape ref
    sw.u32()?; // havok filter
    sw.copy(4)?; // unused bytes
    sw.u8()?; // broad phase type
    sw.copy(3)?; // unused bytes
    sw.u32s(3)?; // cinfo property

    sw.u8()?; // collision response
    sw.u8()?; // unused
    sw.u16()?; // process contact callback delay
    sw.u32()?; // unknown
    sw.u32()?; // havok filter copy
    sw.copy(4)?; // unused bytes
    sw.u8()?; // collision response copy
    sw.u8()?; // unused
    sw.u16()?; // callback delay copy

    sw.f32s(4)?; // translation
    sw.f32s(4)?; // rotation
    sw.f32s(4)?; // linear velocity
    sw.f32s(4)?; // angular velocity
    sw.f32s(12)?; // inertia tensor
    sw.f32s(4)?; // center
    sw.f32()?; // mass
    sw.f32()?; // linear damping
    sw.f32()?; // angular damping
    sw.f32()?; // friction
    sw.f32()?; // restitution
    sw.f32()?; // max linear velocity
    sw.f32()?; // max angular velocity
    sw.f32()?; // penetration depth

    sw.u8()?; // motion system
    sw.u8()?; // deactivator type
    sw.u8()?; // solver deactivation
    sw.u8()?; // quality type

    sw.u32s(3)?; // unknown
    let num_constraints = sw.u32()? as usize;
    sw.u32s(num_constraints)?;
    sw.u32()?; // body flags
    Ok(())
}

/// `bhkCollisionObject` and siblings: target, flags, body.
pub(crate) fn rewrite_collision_object(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.u32()?; // target
    sw.u16()?; // flags
    sw.u32()?; // body ref
    Ok(())
}

pub(crate) fn rewrite_convex_vertices_shape(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.u32()?; // havok material
    sw.f32()?; // radius
    sw.u32s(6)?; // vertices/normals property words
    let num_vertices = sw.u32()? as usize;
    sw.f32s(num_vertices * 4)?;
    let num_normals = sw.u32()? as usize;
    sw.f32s(num_normals * 4)?;
    Ok(())
}

pub(crate) fn rewrite_box_shape(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.u32()?; // havok material
    sw.f32()?; // radius
    sw.copy(8)?; // unused bytes
    sw.f32s(3)?; // dimensions
    sw.f32()?; // unused
    Ok(())
}

pub(crate) fn rewrite_sphere_shape(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.u32()?; // havok material
    sw.f32()?; // radius
    Ok(())
}

pub(crate) fn rewrite_capsule_shape(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.u32()?; // havok material
    sw.f32()?; // radius
    sw.copy(8)?; // unused bytes
    sw.f32s(3)?; // first point
    sw.f32()?; // radius 1
    sw.f32s(3)?; // second point
    sw.f32()?; // radius 2
    Ok(())
}

pub(crate) fn rewrite_list_shape(sw: &mut FieldSwapper<'_>) -> Result<()> {
    let num_sub_shapes = sw.u32()? as usize;
    sw.u32s(num_sub_shapes)?;
    sw.u32()?; // havok material
    sw.f32s(6)?; // child shape/filter property words
    let num_filters = sw.u32()? as usize;
    sw.u32s(num_filters)?;
    Ok(())
}

pub(crate) fn rewrite_transform_shape(sw: &mut FieldSwapper<'_>) -> Result<()> {
    sw.u32()?; // shape ref
    sw.u32()?; // havok material
    sw.f32()?; // radius
    sw.copy(8)?; // unused bytes
    sw.f32s(16)?; // transform
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{BinaryReader, Endianness};

    fn swap_exactly(payload: &[u8], f: fn(&mut FieldSwapper<'_>) -> Result<()>) -> Vec<u8> {
        let mut dst = vec![0u8; payload.len()];
        let mut sw = FieldSwapper::new(payload, &mut dst, Endianness::Big);
        f(&mut sw).unwrap();
        assert!(sw.done(), "consumed {} of {}", sw.pos(), payload.len());
        dst
    }

    #[test]
    fn mopp_code_is_copied_verbatim() {
        let mopp: Vec<u8> = (0u8..32).collect();
        let mut p = Vec::new();
        p.extend_from_slice(&1u32.to_be_bytes()); // shape ref
        p.extend_from_slice(&[0u8; 12]); // unused
        p.extend_from_slice(&1.0f32.to_be_bytes());
        p.extend_from_slice(&(mopp.len() as u32).to_be_bytes());
        for f in [0.5f32, 0.5, 0.5] {
            p.extend_from_slice(&f.to_be_bytes());
        }
        p.extend_from_slice(&0.01f32.to_be_bytes());
        p.push(1); // build type
        p.extend_from_slice(&mopp);

        let dst = swap_exactly(&p, rewrite_mopp_bv_tree_shape);
        assert_eq!(&dst[dst.len() - 32..], &mopp[..]);
        // Shape scale swapped to little-endian
        assert_eq!(BinaryReader::new(&dst).f32_le(16).unwrap(), 1.0);
    }

    #[test]
    fn packed_data_triangles_and_vertices() {
        let mut p = Vec::new();
        p.extend_from_slice(&2u32.to_be_bytes()); // triangles
        for v in 0..8u16 {
            p.extend_from_slice(&v.to_be_bytes());
        }
        p.extend_from_slice(&3u32.to_be_bytes()); // vertices
        p.push(0);
        for i in 0..9 {
            p.extend_from_slice(&(i as f32).to_be_bytes());
        }
        p.extend_from_slice(&1u16.to_be_bytes()); // sub shapes
        for v in [1u32, 3, 0] {
            p.extend_from_slice(&v.to_be_bytes());
        }

        let dst = swap_exactly(&p, rewrite_packed_tri_strips_data);
        let r = BinaryReader::new(&dst);
        assert_eq!(r.u32_le(0).unwrap(), 2);
        // First vertex float, after triangles + count + compression byte
        assert_eq!(r.f32_le(4 + 16 + 4 + 1).unwrap(), 0.0);
    }

    #[test]
    fn rigid_body_fixed_layout() {
        // 48 bytes of refs/filters/callback fields, 40 floats of motion
        // state, 4 mode bytes, 3 unknowns, constraint list, body flags
        let mut p = Vec::new();
        p.extend_from_slice(&7u32.to_be_bytes());
        p.extend_from_slice(&0x0900_0000u32.to_be_bytes());
        p.extend_from_slice(&[0; 4]);
        p.push(0);
        p.extend_from_slice(&[0; 3]);
        p.extend_from_slice(&[0; 12]);
        p.push(1);
        p.push(0);
        p.extend_from_slice(&10u16.to_be_bytes());
        p.extend_from_slice(&0u32.to_be_bytes());
        p.extend_from_slice(&0x0900_0000u32.to_be_bytes());
        p.extend_from_slice(&[0; 4]);
        p.push(1);
        p.push(0);
        p.extend_from_slice(&10u16.to_be_bytes());
        for i in 0..40 {
            p.extend_from_slice(&(i as f32).to_be_bytes());
        }
        p.extend_from_slice(&[4, 1, 1, 1]);
        p.extend_from_slice(&[0; 12]);
        p.extend_from_slice(&1u32.to_be_bytes()); // one constraint
        p.extend_from_slice(&42u32.to_be_bytes());
        p.extend_from_slice(&0u32.to_be_bytes()); // body flags

        let dst = swap_exactly(&p, rewrite_rigid_body);
        let r = BinaryReader::new(&dst);
        assert_eq!(r.u32_le(0).unwrap(), 7);
        assert_eq!(r.u32_le(4).unwrap(), 0x0900_0000);
    }

    #[test]
    fn collision_object_is_ten_bytes() {
        let mut p = Vec::new();
        p.extend_from_slice(&0u32.to_be_bytes());
        p.extend_from_slice(&1u16.to_be_bytes());
        p.extend_from_slice(&2u32.to_be_bytes());
        let dst = swap_exactly(&p, rewrite_collision_object);
        assert_eq!(BinaryReader::new(&dst).u16_le(4).unwrap(), 1);
    }

    #[test]
    fn convex_vertices_shape_counts() {
        let mut p = Vec::new();
        p.extend_from_slice(&0u32.to_be_bytes());
        p.extend_from_slice(&0.1f32.to_be_bytes());
        p.extend_from_slice(&[0; 24]);
        p.extend_from_slice(&2u32.to_be_bytes());
        for i in 0..8 {
            p.extend_from_slice(&(i as f32).to_be_bytes());
        }
        p.extend_from_slice(&1u32.to_be_bytes());
        for i in 0..4 {
            p.extend_from_slice(&(i as f32).to_be_bytes());
        }
        swap_exactly(&p, rewrite_convex_vertices_shape);
    }

    #[test]
    fn truncated_shape_errors() {
        let p = vec![0u8; 6];
        let mut dst = vec![0u8; p.len()];
        let mut sw = FieldSwapper::new(&p, &mut dst, Endianness::Big);
        assert!(rewrite_box_shape(&mut sw).is_err());
    }
}
