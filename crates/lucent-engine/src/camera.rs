//! Camera access used by the renderers and the indicator subsystem.

use glam::{Mat4, Vec3};

/// Read-only view/projection access.
///
/// Depth is expected in the `[0, 1]` range after projection (wgpu
/// convention), which is what `Mat4::perspective_rh` produces.
pub trait Camera {
    fn view_matrix(&self) -> Mat4;

    fn projection_matrix(&self) -> Mat4;

    /// Vertical field of view in radians.
    fn fov_y(&self) -> f32;

    fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Projects a world-space point to normalized device coordinates
    /// (perspective divide included).
    fn project(&self, world: Vec3) -> Vec3 {
        self.view_projection_matrix().project_point3(world)
    }
}

/// Look-at perspective camera.
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveCamera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Width / height.
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl PerspectiveCamera {
    pub fn new(fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y,
            aspect,
            near,
            far,
        }
    }

    /// Moves the eye, keeping the look-at target.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self::new(std::f32::consts::FRAC_PI_4, 1.0, 0.1, 100.0)
    }
}

impl Camera for PerspectiveCamera {
    fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    fn fov_y(&self) -> f32 {
        self.fov_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_projects_to_screen_center() {
        let cam = PerspectiveCamera::default();
        let ndc = cam.project(Vec3::ZERO);
        assert!(ndc.x.abs() < 1e-6);
        assert!(ndc.y.abs() < 1e-6);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn nearer_points_have_smaller_depth() {
        let cam = PerspectiveCamera::default();
        let near = cam.project(Vec3::new(0.0, 0.0, 1.0)).z;
        let far = cam.project(Vec3::new(0.0, 0.0, -1.0)).z;
        assert!(near < far);
    }

    #[test]
    fn wider_aspect_narrows_horizontal_ndc() {
        let mut cam = PerspectiveCamera::default();
        let p = Vec3::new(1.0, 1.0, 0.0);
        let square = cam.project(p);
        cam.set_aspect(2.0);
        let wide = cam.project(p);
        assert!((wide.x - square.x * 0.5).abs() < 1e-6);
        assert!((wide.y - square.y).abs() < 1e-6);
    }

    #[test]
    fn view_space_z_is_negative_in_front() {
        let cam = PerspectiveCamera::default();
        let z = cam.view_matrix().transform_point3(Vec3::ZERO).z;
        assert!((z + 5.0).abs() < 1e-5);
    }
}
