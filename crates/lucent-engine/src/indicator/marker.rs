use glam::{Mat4, Vec3};

use crate::camera::Camera;

/// World transform keeping a marker at a constant on-screen size.
///
/// `size` is the on-screen scale in logical pixels per unit of marker
/// geometry. The scale grows with the view-space distance so perspective
/// shrinking cancels out.
pub fn marker_transform(camera: &dyn Camera, position: Vec3, size: f32, viewport_height: f32) -> Mat4 {
    let view_z = camera.view_matrix().transform_point3(position).z;
    let pixels_per_unit = viewport_height / (2.0 * (camera.fov_y() * 0.5).tan());
    let k = size * -view_z / pixels_per_unit;
    Mat4::from_translation(position) * Mat4::from_scale(Vec3::splat(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PerspectiveCamera;

    fn scale_of(m: Mat4) -> f32 {
        m.x_axis.truncate().length()
    }

    #[test]
    fn translation_is_the_world_position() {
        let cam = PerspectiveCamera::default();
        let p = Vec3::new(0.5, -1.0, 0.25);
        let m = marker_transform(&cam, p, 10.0, 600.0);
        assert!((m.w_axis.truncate() - p).length() < 1e-6);
    }

    #[test]
    fn scale_is_proportional_to_distance() {
        let cam = PerspectiveCamera::default();
        let near = scale_of(marker_transform(&cam, Vec3::new(0.0, 0.0, 2.5), 10.0, 600.0));
        let far = scale_of(marker_transform(&cam, Vec3::new(0.0, 0.0, 0.0), 10.0, 600.0));
        // view distances 2.5 and 5
        assert!((far / near - 2.0).abs() < 1e-4);
    }

    #[test]
    fn one_unit_spans_size_pixels() {
        let cam = PerspectiveCamera::default();
        let height = 600.0;
        let m = marker_transform(&cam, Vec3::ZERO, 12.0, height);

        // Project the marker's unit offset and measure it in pixels.
        let edge = m.transform_point3(Vec3::Y);
        let ndc = cam.project(edge);
        let pixels = ndc.y * height * 0.5;
        assert!((pixels - 12.0).abs() < 0.05, "got {pixels}");
    }
}
