// Per-frame data shared between the engine and render systems

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Uniform block at set 0, binding 0 (std140)
///
/// ```text
/// offset  0: mat4 projectionView
/// offset 64: vec3 lightDirection (+4 bytes padding)
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GlobalUbo {
    pub projection_view: Mat4,
    pub light_direction: Vec3,
    _padding: f32,
}

impl GlobalUbo {
    pub fn new(projection_view: Mat4) -> Self {
        Self {
            projection_view,
            light_direction: Self::default_light_direction(),
            _padding: 0.0,
        }
    }

    pub fn default_light_direction() -> Vec3 {
        Vec3::new(1.0, -3.0, -1.0).normalize()
    }
}

/// Push constant block shared by the vertex and fragment stages
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PushConstantData {
    pub model_matrix: Mat4,
    pub normal_matrix: Mat4,
}

/// What a render system needs to record one frame
pub struct FrameInfo {
    pub command_buffer: vk::CommandBuffer,
    /// The slot's set: uniforms at binding 0, texture at binding 1
    pub global_descriptor_set: vk::DescriptorSet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn global_ubo_matches_std140() {
        assert_eq!(offset_of!(GlobalUbo, projection_view), 0);
        assert_eq!(offset_of!(GlobalUbo, light_direction), 64);
        assert_eq!(size_of::<GlobalUbo>(), 80);
    }

    #[test]
    fn push_constants_fit_minimum_guarantee() {
        // Vulkan guarantees at least 128 bytes of push constants
        assert_eq!(size_of::<PushConstantData>(), 128);
    }

    #[test]
    fn light_direction_is_normalized() {
        let ubo = GlobalUbo::new(Mat4::IDENTITY);
        assert!((ubo.light_direction.length() - 1.0).abs() < 1e-6);
        assert!(ubo.light_direction.y < 0.0);
    }
}
