//! Static geometry uploaded once at startup.

use std::sync::Arc;

use ash::vk;
use glam::{Vec2, Vec3};
use tracing::debug;

use presto_rhi::RhiResult;
use presto_rhi::buffer::{Buffer, BufferUsage, stage_and_copy};
use presto_rhi::command::{CommandBuffer, CommandPool};
use presto_rhi::device::Device;
use presto_rhi::vertex::Vertex;

/// Corners of a unit quad centred on the origin, counter-clockwise.
pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new(Vec2::new(-0.5, -0.5), Vec3::new(1.0, 0.0, 0.0)),
    Vertex::new(Vec2::new(0.5, -0.5), Vec3::new(0.0, 1.0, 0.0)),
    Vertex::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 0.0, 1.0)),
    Vertex::new(Vec2::new(-0.5, 0.5), Vec3::new(1.0, 1.0, 1.0)),
];

/// Two triangles covering the quad.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Device-local vertex and index buffers for one indexed mesh.
pub struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

impl Mesh {
    /// Uploads `vertices` and `indices` through staging buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if either upload fails.
    pub fn upload(
        device: &Arc<Device>,
        pool: &CommandPool,
        vertices: &[Vertex],
        indices: &[u16],
    ) -> RhiResult<Self> {
        let vertex_buffer = stage_and_copy(
            device,
            pool,
            BufferUsage::Vertex,
            bytemuck::cast_slice(vertices),
        )?;
        let index_buffer = stage_and_copy(
            device,
            pool,
            BufferUsage::Index,
            bytemuck::cast_slice(indices),
        )?;

        debug!(
            "Uploaded mesh: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }

    /// Uploads the coloured quad.
    pub fn quad(device: &Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        Self::upload(device, pool, &QUAD_VERTICES, &QUAD_INDICES)
    }

    /// Binds both buffers on `cmd`.
    pub fn bind(&self, cmd: &CommandBuffer) {
        cmd.bind_vertex_buffers(0, &[self.vertex_buffer.handle()], &[0]);
        cmd.bind_index_buffer(self.index_buffer.handle(), 0, vk::IndexType::UINT16);
    }

    /// Number of indices to draw.
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_indices_in_range() {
        assert!(
            QUAD_INDICES
                .iter()
                .all(|&i| (i as usize) < QUAD_VERTICES.len())
        );
    }

    #[test]
    fn test_quad_triangles_are_counter_clockwise() {
        // Front faces are CCW with back-face culling, so both triangles must
        // have positive signed area.
        for tri in QUAD_INDICES.chunks(3) {
            let a = QUAD_VERTICES[tri[0] as usize].position;
            let b = QUAD_VERTICES[tri[1] as usize].position;
            let c = QUAD_VERTICES[tri[2] as usize].position;
            let area = (b - a).perp_dot(c - a);
            assert!(area > 0.0, "triangle {:?} is clockwise", tri);
        }
    }

    #[test]
    fn test_quad_corner_colors() {
        assert_eq!(QUAD_VERTICES[0].color, Vec3::X);
        assert_eq!(QUAD_VERTICES[1].color, Vec3::Y);
        assert_eq!(QUAD_VERTICES[2].color, Vec3::Z);
        assert_eq!(QUAD_VERTICES[3].color, Vec3::ONE);
    }

    #[test]
    fn test_index_bytes() {
        let bytes: &[u8] = bytemuck::cast_slice(&QUAD_INDICES);
        assert_eq!(bytes.len(), 12);
    }
}
