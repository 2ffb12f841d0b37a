// Camera - view and projection matrices
//
// Right-handed, Z-up world. Projections use Vulkan's 0..1 depth range and
// flip Y so that +Y in view space is up on screen.

use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    projection: Mat4,
    view: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
        }
    }
}

/// Vulkan clip space has Y pointing down
fn flip_y(projection: Mat4) -> Mat4 {
    Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0)) * projection
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// `fovy` in radians
    pub fn set_perspective_projection(&mut self, fovy: f32, aspect: f32, near: f32, far: f32) {
        self.projection = flip_y(Mat4::perspective_rh(fovy, aspect, near, far));
    }

    pub fn look_at(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        self.view = Mat4::look_at_rh(eye, target, up);
    }

    #[cfg(test)]
    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    /// Eye position, recovered from the view matrix
    #[cfg(test)]
    pub fn position(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }

    pub fn projection_view(&self) -> Mat4 {
        self.projection * self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    fn configured() -> Camera {
        let mut camera = Camera::new();
        camera.look_at(Vec3::new(0.0, -2.0, 1.0), Vec3::ZERO, Vec3::Z);
        camera.set_perspective_projection(50f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        camera
    }

    #[test]
    fn identical_inputs_give_identical_bits() {
        let a = configured().projection_view().to_cols_array();
        let b = configured().projection_view().to_cols_array();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn target_projects_to_screen_center() {
        let camera = configured();
        let clip = camera.projection_view() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert_relative_eq!(ndc.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(ndc.y, 0.0, epsilon = 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn world_up_is_screen_up() {
        let camera = configured();
        let above = camera.projection_view() * Vec4::new(0.0, 0.0, 0.5, 1.0);
        // Vulkan NDC: negative Y is the top of the screen
        assert!(above.y / above.w < 0.0);
    }

    #[test]
    fn depth_range_is_zero_to_one() {
        let mut camera = Camera::new();
        camera.set_perspective_projection(1.0, 1.0, 0.1, 100.0);
        let near = camera.projection() * Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = camera.projection() * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn inverse_view_recovers_eye() {
        let camera = configured();
        let eye = camera.position();
        assert_relative_eq!(eye.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(eye.y, -2.0, epsilon = 1e-5);
        assert_relative_eq!(eye.z, 1.0, epsilon = 1e-5);
    }
}
