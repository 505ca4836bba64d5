//! Uniform buffer object definitions for shaders.
//!
//! The structure must match the vertex shader's uniform block exactly. It uses
//! `#[repr(C)]` for predictable memory layout and implements `Pod` and
//! `Zeroable` for safe byte casting.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Degrees the model turns per second of elapsed time.
pub const ROTATION_DEGREES_PER_SECOND: f32 = 90.0;

/// Eye position of the fixed camera.
pub const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);

/// Vertical field of view in degrees.
pub const FOV_Y_DEGREES: f32 = 45.0;

/// Near clip plane.
pub const Z_NEAR: f32 = 0.1;

/// Far clip plane.
pub const Z_FAR: f32 = 10.0;

/// Per-image transform data (binding 0, vertex stage).
///
/// # Memory Layout
///
/// - Offset 0: model matrix (64 bytes)
/// - Offset 64: view matrix (64 bytes)
/// - Offset 128: projection matrix (64 bytes)
/// - Total size: 192 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    /// Model matrix (object to world space).
    pub model: Mat4,
    /// View matrix (world to view space).
    pub view: Mat4,
    /// Projection matrix (view to clip space), Y flipped for Vulkan.
    pub projection: Mat4,
}

impl UniformBufferObject {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Computes the transforms for `elapsed_seconds` since startup and a
    /// target of `width` x `height` pixels.
    ///
    /// A zero height is treated as one so the aspect ratio stays finite.
    pub fn at(elapsed_seconds: f32, width: u32, height: u32) -> Self {
        let model =
            Mat4::from_rotation_z((elapsed_seconds * ROTATION_DEGREES_PER_SECOND).to_radians());
        let view = Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z);

        let aspect = width as f32 / height.max(1) as f32;
        let mut projection =
            Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
        // GL-style clip space has +Y up; Vulkan's points down.
        projection.y_axis.y *= -1.0;

        Self {
            model,
            view,
            projection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn test_ubo_size() {
        // 3 Mat4 (3 * 64) = 192 bytes
        assert_eq!(UniformBufferObject::SIZE, 192);
    }

    #[test]
    fn test_ubo_alignment() {
        assert_eq!(std::mem::align_of::<UniformBufferObject>(), 16);
    }

    #[test]
    fn test_model_is_identity_at_start() {
        let ubo = UniformBufferObject::at(0.0, 800, 600);
        assert!(ubo.model.abs_diff_eq(Mat4::IDENTITY, EPSILON));
    }

    #[test]
    fn test_model_quarter_turn_after_one_second() {
        let ubo = UniformBufferObject::at(1.0, 800, 600);
        let rotated = ubo.model * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!(rotated.abs_diff_eq(Vec4::new(0.0, 1.0, 0.0, 1.0), EPSILON));
    }

    #[test]
    fn test_view_maps_eye_to_origin() {
        let ubo = UniformBufferObject::at(0.0, 800, 600);
        let eye = ubo.view * EYE.extend(1.0);
        assert!(eye.abs_diff_eq(Vec4::new(0.0, 0.0, 0.0, 1.0), EPSILON));

        // Looking at the origin puts it straight down -Z in view space.
        let target = ubo.view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(target.x.abs() < EPSILON);
        assert!(target.y.abs() < EPSILON);
        assert!(target.z < 0.0);
    }

    #[test]
    fn test_projection_flips_y() {
        let ubo = UniformBufferObject::at(0.0, 800, 600);
        let unflipped =
            Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), 800.0 / 600.0, Z_NEAR, Z_FAR);
        assert!((ubo.projection.y_axis.y + unflipped.y_axis.y).abs() < EPSILON);
        assert!(ubo.projection.y_axis.y < 0.0);
        assert!((ubo.projection.x_axis.x - unflipped.x_axis.x).abs() < EPSILON);
    }

    #[test]
    fn test_aspect_follows_extent() {
        let wide = UniformBufferObject::at(0.0, 1600, 800);
        let square = UniformBufferObject::at(0.0, 800, 800);
        // x scale is f / aspect, so a 2:1 target halves it.
        assert!((wide.projection.x_axis.x * 2.0 - square.projection.x_axis.x).abs() < EPSILON);
    }

    #[test]
    fn test_zero_height_stays_finite() {
        let ubo = UniformBufferObject::at(0.0, 800, 0);
        assert!(ubo.projection.is_finite());
    }

    #[test]
    fn test_ubo_bytes() {
        let ubo = UniformBufferObject::at(0.5, 1024, 768);
        assert_eq!(bytemuck::bytes_of(&ubo).len(), 192);
    }
}
