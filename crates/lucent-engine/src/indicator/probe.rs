//! Color-key occlusion probe.
//!
//! A marker counts as visible when the pixel at its projected center holds
//! exactly the marker color. This is lossy: unrelated geometry of the same
//! color gives a false positive.

use glam::Vec3;

use crate::backend::RenderBackend;
use crate::camera::Camera;
use crate::color::Rgba;
use crate::error::BackendError;

/// Probes indicator visibility against the backend's current render target.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VisibilityProber {
    key: [u8; 3],
}

impl VisibilityProber {
    pub fn new(color: Rgba) -> Self {
        Self {
            key: color.truncated_rgb8(),
        }
    }

    #[inline]
    pub fn key(&self) -> [u8; 3] {
        self.key
    }

    /// Physical pixel (bottom-left origin) under `ndc`, or `None` when it
    /// falls outside the drawable or behind the camera.
    pub fn pixel_coords(ndc: Vec3, drawable: (u32, u32), pixel_ratio: f32) -> Option<(u32, u32)> {
        if !ndc.is_finite() || !(0.0..=1.0).contains(&ndc.z) {
            return None;
        }
        let w = drawable.0 as f32 * pixel_ratio;
        let h = drawable.1 as f32 * pixel_ratio;
        let dx = ((ndc.x + 1.0) * w / 2.0).floor();
        let dy = ((ndc.y + 1.0) * h / 2.0).floor();
        if dx < 0.0 || dx >= w || dy < 0.0 || dy >= h {
            return None;
        }
        Some((dx as u32, dy as u32))
    }

    #[inline]
    pub fn matches(&self, pixel: [u8; 4]) -> bool {
        pixel[..3] == self.key
    }

    /// Whether the marker at `world` is the topmost thing rendered at its
    /// pixel. Reads back one pixel; blocks until the GPU is idle.
    pub fn probe<B: RenderBackend>(
        &self,
        backend: &mut B,
        camera: &dyn Camera,
        world: Vec3,
    ) -> Result<bool, BackendError> {
        let ndc = camera.project(world);
        let Some((x, y)) = Self::pixel_coords(ndc, backend.drawable_size(), backend.pixel_ratio())
        else {
            log::trace!("probe {world}: outside the viewport");
            return Ok(false);
        };
        let pixel = backend.read_pixel(x, y)?;
        let visible = self.matches(pixel);
        log::trace!("probe {world} at ({x}, {y}): {pixel:?} -> {visible}");
        Ok(visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;
    use crate::camera::PerspectiveCamera;

    #[test]
    fn center_maps_to_middle_pixel() {
        let p = VisibilityProber::pixel_coords(Vec3::new(0.0, 0.0, 0.5), (64, 48), 1.0);
        assert_eq!(p, Some((32, 24)));
    }

    #[test]
    fn pixel_ratio_scales_coordinates() {
        let p = VisibilityProber::pixel_coords(Vec3::new(-1.0, -1.0, 0.5), (10, 10), 2.0);
        assert_eq!(p, Some((0, 0)));
        let p = VisibilityProber::pixel_coords(Vec3::new(0.99, 0.99, 0.5), (10, 10), 2.0);
        assert_eq!(p, Some((19, 19)));
    }

    #[test]
    fn right_and_top_edges_are_outside() {
        assert_eq!(VisibilityProber::pixel_coords(Vec3::new(1.0, 0.0, 0.5), (10, 10), 1.0), None);
        assert_eq!(VisibilityProber::pixel_coords(Vec3::new(0.0, 1.0, 0.5), (10, 10), 1.0), None);
        assert_eq!(VisibilityProber::pixel_coords(Vec3::new(-1.01, 0.0, 0.5), (10, 10), 1.0), None);
    }

    #[test]
    fn behind_camera_is_outside() {
        assert_eq!(VisibilityProber::pixel_coords(Vec3::new(0.0, 0.0, 1.5), (10, 10), 1.0), None);
    }

    #[test]
    fn key_truncates() {
        let prober = VisibilityProber::new(Rgba::opaque(0.5, 1.0, 0.0));
        assert_eq!(prober.key(), [127, 255, 0]);
        assert!(prober.matches([127, 255, 0, 12]));
        assert!(!prober.matches([128, 255, 0, 255]));
    }

    #[test]
    fn out_of_viewport_is_invisible_whatever_the_framebuffer_holds() {
        let color = Rgba::opaque(1.0, 0.0, 1.0);
        let mut backend = CpuBackend::new(16, 16);
        backend.set_clear_color(color);
        backend.clear();

        let prober = VisibilityProber::new(color);
        let cam = PerspectiveCamera::default();
        assert!(prober.probe(&mut backend, &cam, Vec3::ZERO).unwrap());
        assert!(!prober.probe(&mut backend, &cam, Vec3::new(100.0, 0.0, 0.0)).unwrap());
        assert_eq!(backend.stats().readbacks, 1);
    }
}
