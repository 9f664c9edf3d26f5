//! Reference software backend.
//!
//! Rasterizes scenes on the CPU with the same conventions as the wgpu
//! backend, so the peeling engine and the indicator subsystem can be
//! exercised without a GPU. Fragment programs are not executed: every
//! fragment takes `material.color`, and the peel discard test is evaluated
//! natively when the active program carries it.

use glam::{Mat4, Vec3, Vec4};

use crate::backend::{Destination, PassParams, RenderBackend, TargetDesc};
use crate::camera::Camera;
use crate::color::Rgba;
use crate::error::BackendError;
use crate::peel::{has_discard_test, under};
use crate::scene::{BlendMode, Mesh, Scene};

const SCREEN: usize = 0;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CpuTarget(usize);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CpuTexture {
    Color(usize),
    Depth(usize),
    /// The 1×1 "nothing peeled yet" depth texture.
    Sentinel,
}

/// Work counters, reset with [`CpuBackend::reset_stats`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct CpuStats {
    pub scene_renders: u32,
    pub composites: u32,
    pub clears: u32,
    pub readbacks: u32,
}

#[derive(Debug)]
struct Surface {
    label: &'static str,
    width: u32,
    height: u32,
    /// Row-major, bottom row first.
    color: Vec<Rgba>,
    depth: Option<Vec<f32>>,
}

impl Surface {
    fn new(label: &'static str, width: u32, height: u32, depth: bool) -> Self {
        let len = width as usize * height as usize;
        Self {
            label,
            width,
            height,
            color: vec![Rgba::TRANSPARENT; len],
            depth: depth.then(|| vec![1.0; len]),
        }
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Clamped texel fetch.
    #[inline]
    fn clamped_index(&self, x: i64, y: i64) -> usize {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.index(x, y)
    }
}

/// Software [`RenderBackend`].
#[derive(Debug)]
pub struct CpuBackend {
    surfaces: Vec<Option<Surface>>,
    logical_size: (u32, u32),
    pixel_ratio: f32,
    current: Destination<CpuTarget>,
    clear_color: Rgba,
    stats: CpuStats,
}

impl CpuBackend {
    /// Backend whose screen is `width × height` pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_pixel_ratio(width, height, 1.0)
    }

    /// Backend with a `width × height` logical screen backed by
    /// `ratio` physical pixels per logical pixel.
    pub fn with_pixel_ratio(width: u32, height: u32, ratio: f32) -> Self {
        let ratio = if ratio.is_finite() && ratio > 0.0 { ratio } else { 1.0 };
        let pw = ((width as f32 * ratio).round() as u32).max(1);
        let ph = ((height as f32 * ratio).round() as u32).max(1);
        Self {
            surfaces: vec![Some(Surface::new("screen", pw, ph, true))],
            logical_size: (width, height),
            pixel_ratio: ratio,
            current: Destination::Screen,
            clear_color: Rgba::TRANSPARENT,
            stats: CpuStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> CpuStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = CpuStats::default();
    }

    /// Number of live render targets, the screen excluded.
    pub fn live_targets(&self) -> usize {
        self.surfaces.iter().skip(1).filter(|s| s.is_some()).count()
    }

    /// Stored color of `texture` at `(x, y)`, bottom-left origin.
    pub fn texel(&self, texture: CpuTexture, x: u32, y: u32) -> Option<Rgba> {
        let CpuTexture::Color(index) = texture else {
            return None;
        };
        let s = self.surface(index)?;
        (x < s.width && y < s.height).then(|| s.color[s.index(x, y)])
    }

    /// Stored depth of `texture` at `(x, y)`, bottom-left origin.
    pub fn depth_texel(&self, texture: CpuTexture, x: u32, y: u32) -> Option<f32> {
        match texture {
            CpuTexture::Sentinel => Some(0.0),
            CpuTexture::Depth(index) => {
                let s = self.surface(index)?;
                let depth = s.depth.as_ref()?;
                (x < s.width && y < s.height).then(|| depth[s.index(x, y)])
            }
            CpuTexture::Color(_) => None,
        }
    }

    #[inline]
    fn surface(&self, index: usize) -> Option<&Surface> {
        self.surfaces.get(index).and_then(Option::as_ref)
    }

    fn current_index(&self) -> usize {
        match self.current {
            Destination::Screen => SCREEN,
            Destination::Target(CpuTarget(index)) => index,
        }
    }

    fn current_surface_mut(&mut self) -> Option<&mut Surface> {
        let index = self.current_index();
        let surface = self.surfaces.get_mut(index).and_then(Option::as_mut);
        if surface.is_none() {
            log::error!("render target {index} was destroyed; dropping work");
        }
        surface
    }

    /// Depth sampled the way the injected WGSL test does: fragment position
    /// scaled by the reciprocal screen size, times the texture dimensions.
    fn sample_prev_depth(&self, pass: &PassParams<CpuTexture>, fx: f32, fy: f32) -> f32 {
        match pass.prev_depth {
            CpuTexture::Sentinel => 0.0,
            CpuTexture::Depth(index) => {
                let Some(s) = self.surface(index) else {
                    return 0.0;
                };
                let Some(depth) = s.depth.as_ref() else {
                    return 0.0;
                };
                let tx = (fx * pass.reciprocal_screen_size[0] * s.width as f32).floor();
                let ty = (fy * pass.reciprocal_screen_size[1] * s.height as f32).floor();
                depth[s.clamped_index(tx as i64, ty as i64)]
            }
            CpuTexture::Color(_) => {
                log::error!("peel pass bound a color texture as previous depth");
                0.0
            }
        }
    }

    fn sample_color(&self, texture: CpuTexture, x: u32, y: u32) -> Rgba {
        match texture {
            CpuTexture::Color(index) => self
                .surface(index)
                .map(|s| s.color[s.clamped_index(x as i64, y as i64)])
                .unwrap_or(Rgba::TRANSPARENT),
            _ => Rgba::TRANSPARENT,
        }
    }

    fn draw_mesh(&mut self, mesh: &Mesh, view_proj: Mat4, pass: Option<&PassParams<CpuTexture>>) {
        let peel = pass.filter(|_| has_discard_test(mesh.material.program.active()));

        let index = self.current_index();
        let Some(mut surface) = self.surfaces.get_mut(index).and_then(Option::take) else {
            log::error!("render target {index} was destroyed; dropping draw");
            return;
        };

        for world in mesh.world_transforms() {
            let mvp = view_proj * world;
            for tri in mesh.geometry.triangles() {
                let clip = [
                    mvp * Vec4::from((Vec3::from(tri[0]), 1.0)),
                    mvp * Vec4::from((Vec3::from(tri[1]), 1.0)),
                    mvp * Vec4::from((Vec3::from(tri[2]), 1.0)),
                ];
                // No near-plane clipping: triangles crossing the eye plane are dropped.
                if clip.iter().any(|c| c.w <= f32::EPSILON) {
                    continue;
                }
                let screen = clip.map(|c| {
                    let ndc = c.truncate() / c.w;
                    Vec3::new(
                        (ndc.x + 1.0) * 0.5 * surface.width as f32,
                        (ndc.y + 1.0) * 0.5 * surface.height as f32,
                        ndc.z,
                    )
                });
                self.raster_triangle(&mut surface, mesh, screen, peel);
            }
        }

        self.surfaces[index] = Some(surface);
    }

    fn raster_triangle(
        &self,
        surface: &mut Surface,
        mesh: &Mesh,
        v: [Vec3; 3],
        peel: Option<&PassParams<CpuTexture>>,
    ) {
        let material = &mesh.material;
        let area = edge(v[0], v[1], v[2]);
        if area == 0.0 || !area.is_finite() {
            return;
        }
        // Counter-clockwise on screen (y up) is front-facing.
        if area < 0.0 && !material.double_sided {
            return;
        }
        let [a, b, c] = if area < 0.0 { [v[0], v[2], v[1]] } else { v };
        let area = area.abs();

        let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as i64;
        let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as i64;
        let max_x = (a.x.max(b.x).max(c.x).ceil() as i64).min(surface.width as i64 - 1);
        let max_y = (a.y.max(b.y).max(c.y).ceil() as i64).min(surface.height as i64 - 1);

        let edges = [(b, c), (c, a), (a, b)];
        for py in min_y..=max_y {
            for px in min_x..=max_x {
                let p = Vec3::new(px as f32 + 0.5, py as f32 + 0.5, 0.0);
                let mut w = [0.0f32; 3];
                let mut inside = true;
                for (i, (e0, e1)) in edges.iter().enumerate() {
                    w[i] = edge(*e0, *e1, p);
                    if w[i] < 0.0 || (w[i] == 0.0 && !is_top_left(*e0, *e1)) {
                        inside = false;
                        break;
                    }
                }
                if !inside {
                    continue;
                }

                let z = (w[0] * a.z + w[1] * b.z + w[2] * c.z) / area;
                if !(0.0..=1.0).contains(&z) {
                    continue;
                }

                if let Some(pass) = peel {
                    if self.sample_prev_depth(pass, p.x, p.y) + pass.epsilon >= z {
                        continue;
                    }
                }

                let idx = surface.index(px as u32, py as u32);
                if let Some(depth) = surface.depth.as_mut() {
                    if material.depth_test && z >= depth[idx] {
                        continue;
                    }
                    if material.depth_write {
                        depth[idx] = z;
                    }
                }

                let src = material.color;
                surface.color[idx] = match material.blend {
                    BlendMode::Opaque => src,
                    BlendMode::Normal => source_over(surface.color[idx], src),
                };
            }
        }
    }
}

/// `(b - a) × (p - a)`; positive when `p` lies left of `a → b`.
#[inline]
fn edge(a: Vec3, b: Vec3, p: Vec3) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

// Counter-clockwise, y up: top edges run right to left, left edges run downward.
#[inline]
fn is_top_left(a: Vec3, b: Vec3) -> bool {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    (dy == 0.0 && dx < 0.0) || dy < 0.0
}

/// Same equation as `wgpu::BlendState::ALPHA_BLENDING`.
#[inline]
fn source_over(dst: Rgba, src: Rgba) -> Rgba {
    let k = 1.0 - src.a;
    Rgba {
        r: src.r * src.a + dst.r * k,
        g: src.g * src.a + dst.g * k,
        b: src.b * src.a + dst.b * k,
        a: src.a + dst.a * k,
    }
}

impl RenderBackend for CpuBackend {
    type Target = CpuTarget;
    type Texture = CpuTexture;

    fn create_target(&mut self, desc: TargetDesc) -> CpuTarget {
        let width = desc.width.max(1);
        let height = desc.height.max(1);
        self.surfaces
            .push(Some(Surface::new(desc.label, width, height, desc.depth)));
        let target = CpuTarget(self.surfaces.len() - 1);
        log::trace!("created {:?} '{}' {width}x{height}", target, desc.label);
        target
    }

    fn destroy_target(&mut self, target: CpuTarget) {
        if target.0 == SCREEN {
            log::warn!("refusing to destroy the screen surface");
            return;
        }
        match self.surfaces.get_mut(target.0).and_then(Option::take) {
            Some(s) => log::trace!("destroyed {target:?} '{}'", s.label),
            None => log::warn!("destroy of unknown render target {target:?}"),
        }
        if self.current == Destination::Target(target) {
            self.current = Destination::Screen;
        }
    }

    fn color_texture(&self, target: CpuTarget) -> CpuTexture {
        CpuTexture::Color(target.0)
    }

    fn depth_texture(&self, target: CpuTarget) -> Option<CpuTexture> {
        self.surface(target.0)
            .and_then(|s| s.depth.as_ref())
            .map(|_| CpuTexture::Depth(target.0))
    }

    fn sentinel_depth(&self) -> CpuTexture {
        CpuTexture::Sentinel
    }

    fn screen_texture(&self) -> CpuTexture {
        CpuTexture::Color(SCREEN)
    }

    fn drawable_size(&self) -> (u32, u32) {
        self.logical_size
    }

    fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    fn render_target(&self) -> Destination<CpuTarget> {
        self.current
    }

    fn set_render_target(&mut self, destination: Destination<CpuTarget>) {
        self.current = destination;
    }

    fn clear_color(&self) -> Rgba {
        self.clear_color
    }

    fn set_clear_color(&mut self, color: Rgba) {
        self.clear_color = color;
    }

    fn clear(&mut self) {
        self.stats.clears += 1;
        let color = self.clear_color;
        if let Some(s) = self.current_surface_mut() {
            s.color.fill(color);
            if let Some(depth) = s.depth.as_mut() {
                depth.fill(1.0);
            }
        }
    }

    fn render_scene(
        &mut self,
        scene: &Scene,
        camera: &dyn Camera,
        pass: Option<&PassParams<CpuTexture>>,
    ) {
        self.stats.scene_renders += 1;
        let view_proj = camera.view_projection_matrix();
        scene.for_each_mesh(&mut |mesh| {
            if mesh.visible && !mesh.geometry.is_empty() {
                self.draw_mesh(mesh, view_proj, pass);
            }
        });
    }

    fn composite_under(&mut self, dst: CpuTexture, src: CpuTexture) {
        self.stats.composites += 1;
        let index = self.current_index();
        let Some((width, height)) = self.surface(index).map(|s| (s.width, s.height)) else {
            log::error!("render target {index} was destroyed; dropping composite");
            return;
        };

        // Sample everything first: `dst` or `src` may alias the target.
        let mut out = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                out.push(under(self.sample_color(dst, x, y), self.sample_color(src, x, y)));
            }
        }
        if let Some(s) = self.current_surface_mut() {
            s.color = out;
        }
    }

    fn read_pixel(&mut self, x: u32, y: u32) -> Result<[u8; 4], BackendError> {
        self.stats.readbacks += 1;
        let index = self.current_index();
        let s = self
            .surface(index)
            .ok_or_else(|| BackendError::UnknownTarget(format!("{:?}", self.current)))?;
        if x >= s.width || y >= s.height {
            return Err(BackendError::OutOfBounds {
                x,
                y,
                width: s.width,
                height: s.height,
            });
        }
        Ok(s.color[s.index(x, y)].to_unorm8())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::camera::PerspectiveCamera;
    use crate::scene::{Geometry, Material};

    /// Orthographic-ish setup: a camera at z = 5 looking at the origin.
    fn camera() -> PerspectiveCamera {
        PerspectiveCamera::default()
    }

    fn quad(color: Rgba, z: f32) -> Mesh {
        Mesh::new(Arc::new(Geometry::quad(2.0, 2.0, z)), Material::basic(color))
    }

    #[test]
    fn clear_fills_color_and_depth() {
        let mut b = CpuBackend::new(4, 4);
        b.set_clear_color(Rgba::opaque(1.0, 0.0, 0.0));
        b.clear();
        assert_eq!(b.read_pixel(2, 2).unwrap(), [255, 0, 0, 255]);
        assert_eq!(b.depth_texel(CpuTexture::Depth(0), 0, 0), Some(1.0));
    }

    #[test]
    fn read_pixel_rejects_out_of_bounds() {
        let mut b = CpuBackend::new(4, 4);
        let err = b.read_pixel(4, 0).unwrap_err();
        assert!(matches!(err, BackendError::OutOfBounds { width: 4, .. }));
    }

    #[test]
    fn pixel_ratio_scales_the_screen() {
        let mut b = CpuBackend::with_pixel_ratio(4, 3, 2.0);
        assert_eq!(b.drawable_size(), (4, 3));
        assert!(b.read_pixel(7, 5).is_ok());
        assert!(b.read_pixel(8, 0).is_err());
    }

    #[test]
    fn nearer_quad_wins_the_depth_test() {
        let mut b = CpuBackend::new(16, 16);
        let mut scene = Scene::new();
        scene.add(quad(Rgba::opaque(0.0, 0.0, 1.0), 0.5));
        scene.add(quad(Rgba::opaque(1.0, 0.0, 0.0), 0.0));
        b.clear();
        b.render_scene(&scene, &camera(), None);
        assert_eq!(b.read_pixel(8, 8).unwrap(), [0, 0, 255, 255]);
    }

    #[test]
    fn normal_blend_is_source_over() {
        let mut b = CpuBackend::new(8, 8);
        b.set_clear_color(Rgba::opaque(0.0, 0.0, 1.0));
        b.clear();
        let mut scene = Scene::new();
        scene.add(quad(Rgba::new(1.0, 0.0, 0.0, 0.5), 0.0));
        b.render_scene(&scene, &camera(), None);
        assert_eq!(b.read_pixel(4, 4).unwrap(), [128, 0, 128, 255]);
    }

    #[test]
    fn shared_diagonal_is_covered_once() {
        let mut b = CpuBackend::new(16, 16);
        b.clear();
        let mut scene = Scene::new();
        // Covers the whole viewport at z = 0 with this camera.
        let mut m = Mesh::new(
            Arc::new(Geometry::quad(8.0, 8.0, 0.0)),
            Material::basic(Rgba::new(1.0, 1.0, 1.0, 0.5)).with_depth_write(false),
        );
        m.material.depth_test = false;
        scene.add(m);
        b.render_scene(&scene, &camera(), None);
        for i in 0..16 {
            assert_eq!(b.read_pixel(i, i).unwrap()[3], 128, "pixel ({i}, {i})");
        }
    }

    #[test]
    fn back_faces_are_culled_when_single_sided() {
        let mut b = CpuBackend::new(8, 8);
        b.clear();
        let geometry = Geometry::new(vec![[-1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [1.0, -1.0, 0.0]]);
        let mut scene = Scene::new();
        scene.add(Mesh::new(
            Arc::new(geometry),
            Material::basic(Rgba::WHITE).with_double_sided(false),
        ));
        b.render_scene(&scene, &camera(), None);
        assert_eq!(b.read_pixel(5, 2).unwrap(), [0, 0, 0, 0]);
    }

    #[test]
    fn destroyed_targets_are_released() {
        let mut b = CpuBackend::new(4, 4);
        let t = b.create_target(TargetDesc {
            label: "t",
            width: 4,
            height: 4,
            depth: false,
        });
        assert_eq!(b.live_targets(), 1);
        assert_eq!(b.depth_texture(t), None);

        b.set_render_target(Destination::Target(t));
        b.destroy_target(t);
        assert_eq!(b.live_targets(), 0);
        assert_eq!(b.render_target(), Destination::Screen);
    }

    #[test]
    fn composite_applies_under() {
        let mut b = CpuBackend::new(2, 2);
        let desc = |label| TargetDesc {
            label,
            width: 2,
            height: 2,
            depth: false,
        };
        let dst = b.create_target(desc("dst"));
        let src = b.create_target(desc("src"));

        b.set_clear_color(Rgba::new(1.0, 0.0, 0.0, 0.5));
        b.set_render_target(Destination::Target(dst));
        b.clear();
        b.set_clear_color(Rgba::new(0.0, 1.0, 0.0, 0.5));
        b.set_render_target(Destination::Target(src));
        b.clear();

        b.set_render_target(Destination::Screen);
        b.composite_under(b.color_texture(dst), b.color_texture(src));
        let out = b.texel(b.screen_texture(), 0, 0).unwrap();
        assert!(out.approx_eq(Rgba::new(0.5, 0.25, 0.0, 0.75), 1e-6));
        assert_eq!(b.stats().composites, 1);
    }
}
