use std::f32::consts::{PI, TAU};

/// Non-indexed triangle list in object space.
///
/// Every three consecutive positions form one counter-clockwise triangle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
}

impl Geometry {
    #[inline]
    pub fn new(positions: Vec<[f32; 3]>) -> Self {
        debug_assert!(positions.len() % 3 == 0, "triangle list length must be a multiple of 3");
        Self { positions }
    }

    /// A single triangle.
    pub fn triangle(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> Self {
        Self::new(vec![a, b, c])
    }

    /// Axis-aligned rectangle in the XY plane at depth `z`, centered on the origin.
    pub fn quad(width: f32, height: f32, z: f32) -> Self {
        let (hw, hh) = (width * 0.5, height * 0.5);
        let bl = [-hw, -hh, z];
        let br = [hw, -hh, z];
        let tr = [hw, hh, z];
        let tl = [-hw, hh, z];
        Self::new(vec![bl, br, tr, bl, tr, tl])
    }

    /// UV sphere. `segments` is clamped to at least 3.
    pub fn sphere(radius: f32, segments: u32) -> Self {
        let slices = segments.max(3);
        let stacks = (segments / 2).max(2);

        let point = |stack: u32, slice: u32| -> [f32; 3] {
            let theta = PI * stack as f32 / stacks as f32;
            let phi = TAU * slice as f32 / slices as f32;
            [
                radius * theta.sin() * phi.cos(),
                radius * theta.cos(),
                radius * theta.sin() * phi.sin(),
            ]
        };

        let mut positions = Vec::with_capacity((slices * stacks * 6) as usize);
        for stack in 0..stacks {
            for slice in 0..slices {
                let a = point(stack, slice);
                let b = point(stack + 1, slice);
                let c = point(stack + 1, slice + 1);
                let d = point(stack, slice + 1);
                if stack != 0 {
                    positions.extend_from_slice(&[a, c, b]);
                }
                if stack + 1 != stacks {
                    positions.extend_from_slice(&[a, d, c]);
                }
            }
        }
        Self::new(positions)
    }

    #[inline]
    pub fn triangles(&self) -> impl Iterator<Item = &[[f32; 3]]> {
        self.positions.chunks_exact(3)
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.positions.len() / 3
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.len() < 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_is_two_triangles_at_depth() {
        let q = Geometry::quad(2.0, 4.0, -1.5);
        assert_eq!(q.triangle_count(), 2);
        assert!(q.positions.iter().all(|p| p[2] == -1.5));
        assert!(q.positions.iter().all(|p| p[0].abs() == 1.0 && p[1].abs() == 2.0));
    }

    #[test]
    fn sphere_vertices_lie_on_radius() {
        let s = Geometry::sphere(0.5, 8);
        assert!(!s.is_empty());
        for p in &s.positions {
            let len = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
            assert!((len - 0.5).abs() < 1e-5);
        }
    }

    #[test]
    fn sphere_clamps_segment_count() {
        assert!(Geometry::sphere(1.0, 0).triangle_count() > 0);
    }
}
