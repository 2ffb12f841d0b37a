// Scene objects
//
// A flat list of objects, each with a shared model and a transform. Rotations
// are Tait-Bryan angles in radians: x = pitch, y = roll, z = yaw (Z-up).

use glam::{EulerRot, Mat4, Quat, Vec3};
use std::sync::Arc;

use super::model::Model;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    fn orientation(&self) -> Quat {
        Quat::from_euler(EulerRot::ZXY, self.rotation.z, self.rotation.x, self.rotation.y)
    }

    /// Translate * Rotate(yaw, pitch, roll) * Scale
    pub fn mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.orientation(), self.translation)
    }

    /// Inverse-transpose of the model matrix's upper 3x3, padded to a mat4
    pub fn normal_matrix(&self) -> Mat4 {
        Mat4::from_quat(self.orientation()) * Mat4::from_scale(self.scale.recip())
    }

    /// Viewing direction for a camera carried by this transform
    pub fn forward(&self) -> Vec3 {
        let (pitch, yaw) = (self.rotation.x, self.rotation.z);
        Vec3::new(pitch.cos() * yaw.sin(), pitch.cos() * yaw.cos(), -pitch.sin())
    }

    /// Horizontal forward, ignoring pitch
    pub fn planar_forward(&self) -> Vec3 {
        let yaw = self.rotation.z;
        Vec3::new(yaw.sin(), yaw.cos(), 0.0)
    }

    pub fn right(&self) -> Vec3 {
        let yaw = self.rotation.z;
        Vec3::new(yaw.cos(), -yaw.sin(), 0.0)
    }
}

pub struct GameObject {
    pub model: Option<Arc<Model>>,
    pub transform: Transform,
}

/// Objects are drawn in spawn order
#[derive(Default)]
pub struct Scene {
    objects: Vec<GameObject>,
}

impl Scene {
    pub fn spawn(&mut self, model: Option<Arc<Model>>, transform: Transform) {
        self.objects.push(GameObject { model, transform });
    }

    pub fn objects(&self) -> &[GameObject] {
        &self.objects
    }
}
