//! Rendering backend capabilities.
//!
//! The peeling engine and the indicator prober never talk to a device
//! directly. They drive a [`RenderBackend`], which owns targets and textures
//! and hands out copyable handles for them.
//!
//! Conventions shared by all implementations:
//! - render targets use straight-alpha RGBA color, depth in `[0, 1]`
//!   (smaller is nearer) cleared to `1.0`;
//! - read-back coordinates have a bottom-left origin, in physical pixels;
//! - the "screen" is the default framebuffer, addressed with [`Destination::Screen`].

pub mod cpu;
pub mod gpu;

use std::fmt::Debug;

use crate::camera::Camera;
use crate::color::Rgba;
use crate::error::BackendError;
use crate::scene::Scene;

/// Where draws and clears land.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Destination<T> {
    /// The default framebuffer.
    Screen,
    Target(T),
}

/// Render-target allocation request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TargetDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    /// Attach a sampleable depth texture.
    pub depth: bool,
}

/// Per-pass depth-peeling parameters.
///
/// Passed explicitly to each scene render so that no uniform state is shared
/// between the peel pass and the composite pass.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PassParams<T> {
    /// `1 / physical_viewport_size`, maps fragment coordinates to `[0, 1]`.
    pub reciprocal_screen_size: [f32; 2],
    /// Depth written by the previous pass (or the sentinel on the first pass).
    pub prev_depth: T,
    /// A fragment survives only if `depth > prev_depth + epsilon`.
    pub epsilon: f32,
}

/// Everything the core needs from a renderer.
pub trait RenderBackend {
    type Target: Copy + Eq + Debug;
    type Texture: Copy + Eq + Debug;

    fn create_target(&mut self, desc: TargetDesc) -> Self::Target;

    fn destroy_target(&mut self, target: Self::Target);

    fn color_texture(&self, target: Self::Target) -> Self::Texture;

    /// `None` when the target was created without depth.
    fn depth_texture(&self, target: Self::Target) -> Option<Self::Texture>;

    /// 1×1 depth texture at `0.0`: "nothing peeled yet".
    fn sentinel_depth(&self) -> Self::Texture;

    /// Color texture backing the default framebuffer.
    fn screen_texture(&self) -> Self::Texture;

    /// Logical drawable size.
    fn drawable_size(&self) -> (u32, u32);

    /// Physical pixels per logical pixel.
    fn pixel_ratio(&self) -> f32;

    fn render_target(&self) -> Destination<Self::Target>;

    fn set_render_target(&mut self, destination: Destination<Self::Target>);

    fn clear_color(&self) -> Rgba;

    fn set_clear_color(&mut self, color: Rgba);

    /// Clears color (to the clear color) and depth (to `1.0`) of the current target.
    fn clear(&mut self);

    /// Draws every visible mesh of `scene` into the current target.
    ///
    /// With `pass` set, meshes whose active program carries the peel discard
    /// test evaluate it against `pass`.
    fn render_scene(
        &mut self,
        scene: &Scene,
        camera: &dyn Camera,
        pass: Option<&PassParams<Self::Texture>>,
    );

    /// Full-screen pass writing `under(dst, src)` into the current target.
    fn composite_under(&mut self, dst: Self::Texture, src: Self::Texture);

    /// Synchronously reads one pixel of the current target.
    ///
    /// Blocks until all submitted GPU work has completed.
    fn read_pixel(&mut self, x: u32, y: u32) -> Result<[u8; 4], BackendError>;
}
