use crate::backend::{Destination, PassParams, RenderBackend};
use crate::camera::Camera;
use crate::color::Rgba;
use crate::error::PeelError;
use crate::scene::{BlendMode, Scene};

use super::buffers::LayerBuffers;
use super::config::PeelConfig;
use super::inject::ShaderInjector;

/// Where the final composite of a [`DepthPeeling::render`] goes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PeelTarget<T> {
    /// A caller-owned render target.
    Target(T),
    /// Keep the result in the engine's own composite buffer.
    Unset,
    /// The default framebuffer.
    Screen,
}

/// Order-independent transparency by depth peeling.
///
/// Each of `max_depth` passes renders the scene with a discard test that
/// removes everything at or in front of the depth peeled by the previous
/// pass. The surviving nearest surface is one more layer, composited under
/// the layers collected so far.
pub struct DepthPeeling<B: RenderBackend> {
    config: PeelConfig,
    buffers: LayerBuffers<B::Target>,
    injector: ShaderInjector,
    blend_snapshot: Vec<BlendMode>,
}

impl<B: RenderBackend> DepthPeeling<B> {
    /// Allocates the ping-pong buffers at `config.width × config.height`.
    pub fn new(backend: &mut B, config: PeelConfig) -> Result<Self, PeelError> {
        config.validate()?;
        let buffers = LayerBuffers::new(backend, config.width, config.height);
        Ok(Self {
            config,
            buffers,
            injector: ShaderInjector::new(),
            blend_snapshot: Vec::new(),
        })
    }

    #[inline]
    pub fn config(&self) -> &PeelConfig {
        &self.config
    }

    /// Recreates the buffers at a new size. The pass count is unchanged.
    pub fn resize(&mut self, backend: &mut B, width: u32, height: u32) -> Result<(), PeelError> {
        let config = PeelConfig {
            width,
            height,
            ..self.config
        };
        config.validate()?;
        if self.buffers.size() == (width, height) {
            return Ok(());
        }

        let fresh = LayerBuffers::new(backend, width, height);
        std::mem::replace(&mut self.buffers, fresh).destroy(backend);
        self.config = config;
        Ok(())
    }

    /// Instruments every drawable of `scene` for peeling.
    ///
    /// The peeling variant is stored beside each material's base program, so
    /// calling this again (for example after adding meshes) re-derives the
    /// same variants instead of instrumenting twice. Returns the number of
    /// drawables visited.
    pub fn prepare(&mut self, scene: &mut Scene) -> usize {
        let injector = &mut self.injector;
        let mut count = 0;
        scene.for_each_mesh_mut(&mut |mesh| {
            let variant = injector.variant(&mesh.material.program);
            mesh.material.program.set_variant(variant);
            count += 1;
        });
        log::debug!(
            "prepared {count} drawables ({} distinct peel variants)",
            self.injector.len()
        );
        count
    }

    /// Renders `scene` with `max_depth` peel passes and returns the texture
    /// holding the final composite.
    ///
    /// The backend's render target, clear color and every drawable's blend
    /// mode are restored before returning.
    pub fn render(
        &mut self,
        backend: &mut B,
        scene: &mut Scene,
        camera: &dyn Camera,
        target: PeelTarget<B::Target>,
    ) -> B::Texture {
        let original_target = backend.render_target();
        let original_clear = backend.clear_color();
        self.override_blending(scene);

        let reciprocal_screen_size = reciprocal_screen_size(backend);
        backend.set_clear_color(Rgba::TRANSPARENT);
        self.buffers.reset(backend);

        let max_depth = self.config.max_depth;
        let mut final_texture = backend.color_texture(self.buffers.source().composite);

        for pass in 0..max_depth {
            let source = self.buffers.source();
            let next = self.buffers.target();

            let prev_depth = if pass == 0 {
                backend.sentinel_depth()
            } else {
                match backend.depth_texture(source.layer) {
                    Some(depth) => depth,
                    None => {
                        log::error!("peel layer {:?} has no depth attachment", source.layer);
                        backend.sentinel_depth()
                    }
                }
            };
            let params = PassParams {
                reciprocal_screen_size,
                prev_depth,
                epsilon: self.config.epsilon,
            };

            backend.set_render_target(Destination::Target(next.layer));
            backend.clear();
            backend.render_scene(scene, camera, Some(&params));

            let destination = if pass + 1 < max_depth {
                Destination::Target(next.composite)
            } else {
                match target {
                    PeelTarget::Target(t) => Destination::Target(t),
                    PeelTarget::Unset => Destination::Target(next.composite),
                    PeelTarget::Screen => Destination::Screen,
                }
            };

            let accumulated = backend.color_texture(source.composite);
            let layer = backend.color_texture(next.layer);
            backend.set_render_target(destination);
            backend.clear();
            backend.composite_under(accumulated, layer);
            final_texture = match destination {
                Destination::Target(t) => backend.color_texture(t),
                Destination::Screen => backend.screen_texture(),
            };

            log::trace!("peel pass {}/{max_depth} -> {destination:?}", pass + 1);
            self.buffers.swap();
        }

        backend.set_render_target(original_target);
        backend.set_clear_color(original_clear);
        self.restore_blending(scene);

        final_texture
    }

    // Peeled layers must land unblended; the under operator does the blending.
    fn override_blending(&mut self, scene: &mut Scene) {
        let snapshot = &mut self.blend_snapshot;
        snapshot.clear();
        scene.for_each_mesh_mut(&mut |mesh| {
            snapshot.push(mesh.material.blend);
            mesh.material.blend = BlendMode::Opaque;
        });
    }

    fn restore_blending(&mut self, scene: &mut Scene) {
        let mut saved = self.blend_snapshot.drain(..);
        scene.for_each_mesh_mut(&mut |mesh| {
            if let Some(blend) = saved.next() {
                mesh.material.blend = blend;
            }
        });
    }
}

impl<B: RenderBackend> std::fmt::Debug for DepthPeeling<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthPeeling")
            .field("config", &self.config)
            .field("buffer_size", &self.buffers.size())
            .field("variants", &self.injector.len())
            .finish()
    }
}

fn reciprocal_screen_size<B: RenderBackend>(backend: &B) -> [f32; 2] {
    let (w, h) = backend.drawable_size();
    let ratio = backend.pixel_ratio();
    [
        1.0 / (w as f32 * ratio).max(1.0),
        1.0 / (h as f32 * ratio).max(1.0),
    ]
}
