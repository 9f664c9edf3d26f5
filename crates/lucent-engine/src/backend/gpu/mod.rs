//! Headless wgpu backend.
//!
//! All targets are offscreen `Rgba8Unorm` textures with optional
//! `Depth32Float` attachments that can be bound as `texture_depth_2d`. The
//! "screen" is one more offscreen target at the physical drawable size;
//! presenting it is the host's business.
//!
//! Every backend call records its own encoder and submits immediately, so
//! uniform uploads through `Queue::write_buffer` never race a later pass.

mod device;
mod pipelines;
mod readback;

use anyhow::Result;
use wgpu::util::DeviceExt;

pub use device::{Gpu, GpuInit};

use crate::backend::{Destination, PassParams, RenderBackend, TargetDesc};
use crate::camera::Camera;
use crate::color::Rgba;
use crate::error::BackendError;
use crate::scene::Scene;

use pipelines::{
    COLOR_FORMAT, CompositePipeline, DEPTH_FORMAT, DrawUniforms, InstanceRaw, PeelUniforms,
    PipelineCache, PipelineKey,
};

const SCREEN: usize = 0;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WgpuTarget(usize);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WgpuTexture {
    Color(usize),
    Depth(usize),
    Sentinel,
}

struct Attachment {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl Attachment {
    fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

struct GpuSurface {
    label: &'static str,
    width: u32,
    height: u32,
    color: Attachment,
    depth: Option<Attachment>,
}

impl GpuSurface {
    fn new(device: &wgpu::Device, label: &'static str, width: u32, height: u32, depth: bool) -> Self {
        let color = Attachment::new(
            device,
            label,
            width,
            height,
            COLOR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        );
        let depth = depth.then(|| {
            Attachment::new(
                device,
                label,
                width,
                height,
                DEPTH_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            )
        });
        Self {
            label,
            width,
            height,
            color,
            depth,
        }
    }
}

struct DrawItem {
    key: PipelineKey,
    vertices: std::ops::Range<u32>,
    instances: std::ops::Range<u32>,
    uniform_offset: u32,
}

/// wgpu implementation of [`RenderBackend`].
pub struct WgpuBackend {
    gpu: Gpu,
    surfaces: Vec<Option<GpuSurface>>,
    sentinel: Attachment,
    logical_size: (u32, u32),
    pixel_ratio: f32,
    current: Destination<WgpuTarget>,
    clear_color: Rgba,
    pipelines: PipelineCache,
    composite: CompositePipeline,
    uniform_stride: u32,
}

impl WgpuBackend {
    /// Creates a device and a `width × height` logical screen.
    pub fn new(width: u32, height: u32, pixel_ratio: f32, init: &GpuInit) -> Result<Self> {
        let gpu = Gpu::new_blocking(init)?;
        Ok(Self::with_gpu(gpu, width, height, pixel_ratio))
    }

    /// Builds the backend on an existing device.
    pub fn with_gpu(gpu: Gpu, width: u32, height: u32, pixel_ratio: f32) -> Self {
        let pixel_ratio = if pixel_ratio.is_finite() && pixel_ratio > 0.0 {
            pixel_ratio
        } else {
            1.0
        };
        let pw = ((width as f32 * pixel_ratio).round() as u32).max(1);
        let ph = ((height as f32 * pixel_ratio).round() as u32).max(1);

        let device = gpu.device();
        let screen = GpuSurface::new(device, "lucent screen", pw, ph, true);
        let sentinel = Attachment::new(
            device,
            "lucent peel sentinel",
            1,
            1,
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        let pipelines = PipelineCache::new(device);
        let composite = CompositePipeline::new(device);

        let align = device.limits().min_uniform_buffer_offset_alignment;
        let size = std::mem::size_of::<DrawUniforms>() as u32;
        let uniform_stride = size.div_ceil(align) * align;

        let backend = Self {
            gpu,
            surfaces: vec![Some(screen)],
            sentinel,
            logical_size: (width, height),
            pixel_ratio,
            current: Destination::Screen,
            clear_color: Rgba::TRANSPARENT,
            pipelines,
            composite,
            uniform_stride,
        };
        backend.clear_sentinel();
        backend
    }

    #[inline]
    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    fn clear_sentinel(&self) {
        let mut encoder = self.encoder("lucent sentinel encoder");
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("lucent sentinel clear"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.sentinel.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.gpu.queue().submit(std::iter::once(encoder.finish()));
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn current_index(&self) -> usize {
        match self.current {
            Destination::Screen => SCREEN,
            Destination::Target(WgpuTarget(index)) => index,
        }
    }

    fn surface(&self, index: usize) -> Option<&GpuSurface> {
        self.surfaces.get(index).and_then(Option::as_ref)
    }

    fn current_surface(&self) -> Option<&GpuSurface> {
        let index = self.current_index();
        let surface = self.surface(index);
        if surface.is_none() {
            log::error!("render target {index} was destroyed; dropping work");
        }
        surface
    }

    fn texture_view(&self, texture: WgpuTexture) -> Option<&wgpu::TextureView> {
        match texture {
            WgpuTexture::Color(index) => self.surface(index).map(|s| &s.color.view),
            WgpuTexture::Depth(index) => self
                .surface(index)
                .and_then(|s| s.depth.as_ref())
                .map(|d| &d.view),
            WgpuTexture::Sentinel => Some(&self.sentinel.view),
        }
    }

    fn peel_bind_group(&self, pass: Option<&PassParams<WgpuTexture>>) -> wgpu::BindGroup {
        let (uniforms, view) = match pass {
            Some(p) => {
                let view = match (p.prev_depth, self.texture_view(p.prev_depth)) {
                    (WgpuTexture::Color(_), _) | (_, None) => {
                        log::error!("invalid previous depth {:?}; using sentinel", p.prev_depth);
                        &self.sentinel.view
                    }
                    (_, Some(view)) => view,
                };
                let uniforms = PeelUniforms {
                    reciprocal_screen_size: p.reciprocal_screen_size,
                    epsilon: p.epsilon,
                    _pad: 0.0,
                };
                (uniforms, view)
            }
            None => (PeelUniforms::NEUTRAL, &self.sentinel.view),
        };

        let device = self.gpu.device();
        let ubo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lucent peel ubo"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lucent peel bind group"),
            layout: self.pipelines.peel_layout(),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: ubo.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view),
                },
            ],
        })
    }
}

impl RenderBackend for WgpuBackend {
    type Target = WgpuTarget;
    type Texture = WgpuTexture;

    fn create_target(&mut self, desc: TargetDesc) -> WgpuTarget {
        let surface = GpuSurface::new(
            self.gpu.device(),
            desc.label,
            desc.width.max(1),
            desc.height.max(1),
            desc.depth,
        );
        self.surfaces.push(Some(surface));
        let target = WgpuTarget(self.surfaces.len() - 1);
        log::trace!("created {target:?} '{}'", desc.label);
        target
    }

    fn destroy_target(&mut self, target: WgpuTarget) {
        if target.0 == SCREEN {
            log::warn!("refusing to destroy the screen target");
            return;
        }
        match self.surfaces.get_mut(target.0).and_then(Option::take) {
            Some(s) => {
                s.color.texture.destroy();
                if let Some(d) = s.depth {
                    d.texture.destroy();
                }
                log::trace!("destroyed {target:?} '{}'", s.label);
            }
            None => log::warn!("destroy of unknown render target {target:?}"),
        }
        if self.current == Destination::Target(target) {
            self.current = Destination::Screen;
        }
    }

    fn color_texture(&self, target: WgpuTarget) -> WgpuTexture {
        WgpuTexture::Color(target.0)
    }

    fn depth_texture(&self, target: WgpuTarget) -> Option<WgpuTexture> {
        self.surface(target.0)
            .and_then(|s| s.depth.as_ref())
            .map(|_| WgpuTexture::Depth(target.0))
    }

    fn sentinel_depth(&self) -> WgpuTexture {
        WgpuTexture::Sentinel
    }

    fn screen_texture(&self) -> WgpuTexture {
        WgpuTexture::Color(SCREEN)
    }

    fn drawable_size(&self) -> (u32, u32) {
        self.logical_size
    }

    fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    fn render_target(&self) -> Destination<WgpuTarget> {
        self.current
    }

    fn set_render_target(&mut self, destination: Destination<WgpuTarget>) {
        self.current = destination;
    }

    fn clear_color(&self) -> Rgba {
        self.clear_color
    }

    fn set_clear_color(&mut self, color: Rgba) {
        self.clear_color = color;
    }

    fn clear(&mut self) {
        let Some(surface) = self.current_surface() else {
            return;
        };
        let c = self.clear_color;
        let mut encoder = self.encoder("lucent clear encoder");
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("lucent clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &surface.color.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: c.r as f64,
                            g: c.g as f64,
                            b: c.b as f64,
                            a: c.a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: surface.depth.as_ref().map(|d| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view: &d.view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.gpu.queue().submit(std::iter::once(encoder.finish()));
    }

    fn render_scene(
        &mut self,
        scene: &Scene,
        camera: &dyn Camera,
        pass: Option<&PassParams<WgpuTexture>>,
    ) {
        let Some(has_depth) = self.current_surface().map(|s| s.depth.is_some()) else {
            return;
        };
        let view_proj = camera.view_projection_matrix();

        // Gather every drawable into shared vertex/instance/uniform uploads.
        let mut vertices: Vec<[f32; 3]> = Vec::new();
        let mut instances: Vec<InstanceRaw> = Vec::new();
        let mut uniforms: Vec<u8> = Vec::new();
        let mut items: Vec<DrawItem> = Vec::new();
        let stride = self.uniform_stride as usize;
        {
            let device = self.gpu.device();
            let pipelines = &mut self.pipelines;
            scene.for_each_mesh(&mut |mesh| {
                if !mesh.visible || mesh.geometry.is_empty() {
                    return;
                }
                let first_instance = instances.len() as u32;
                instances.extend(mesh.world_transforms().map(InstanceRaw::from));
                let last_instance = instances.len() as u32;
                if first_instance == last_instance {
                    return;
                }

                let first_vertex = vertices.len() as u32;
                vertices.extend_from_slice(&mesh.geometry.positions);

                let key = PipelineKey::new(&mesh.material, has_depth);
                pipelines.ensure(device, key, mesh.material.program.active());

                let uniform_offset = uniforms.len();
                uniforms.resize(uniform_offset + stride, 0);
                let u = DrawUniforms::new(view_proj, mesh.material.color);
                uniforms[uniform_offset..uniform_offset + std::mem::size_of::<DrawUniforms>()]
                    .copy_from_slice(bytemuck::bytes_of(&u));

                items.push(DrawItem {
                    key,
                    vertices: first_vertex..vertices.len() as u32,
                    instances: first_instance..last_instance,
                    uniform_offset: uniform_offset as u32,
                });
            });
        }
        if items.is_empty() {
            return;
        }

        let device = self.gpu.device();
        let vbo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lucent scene vbo"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let ibo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lucent scene instance vbo"),
            contents: bytemuck::cast_slice(&instances),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let ubo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lucent draw ubo"),
            contents: &uniforms,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let draw_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lucent draw bind group"),
            layout: self.pipelines.draw_layout(),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &ubo,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniforms>() as u64),
                }),
            }],
        });
        let peel_bind_group = self.peel_bind_group(pass);

        let Some(surface) = self.current_surface() else {
            return;
        };
        let mut encoder = self.encoder("lucent scene encoder");
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("lucent scene pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &surface.color.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: surface.depth.as_ref().map(|d| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view: &d.view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            rpass.set_vertex_buffer(0, vbo.slice(..));
            rpass.set_vertex_buffer(1, ibo.slice(..));
            rpass.set_bind_group(1, &peel_bind_group, &[]);
            for item in &items {
                let Some(pipeline) = self.pipelines.get(&item.key) else {
                    continue;
                };
                rpass.set_pipeline(pipeline);
                rpass.set_bind_group(0, &draw_bind_group, &[item.uniform_offset]);
                rpass.draw(item.vertices.clone(), item.instances.clone());
            }
        }
        self.gpu.queue().submit(std::iter::once(encoder.finish()));
    }

    fn composite_under(&mut self, dst: WgpuTexture, src: WgpuTexture) {
        let (Some(dst_view), Some(src_view)) = (self.texture_view(dst), self.texture_view(src))
        else {
            log::error!("composite of unknown textures {dst:?} / {src:?}");
            return;
        };
        let Some(surface) = self.current_surface() else {
            return;
        };

        let bind_group = self
            .gpu
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("lucent under bind group"),
                layout: self.composite.layout(),
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(dst_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(src_view),
                    },
                ],
            });

        let mut encoder = self.encoder("lucent under encoder");
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("lucent under pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &surface.color.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            rpass.set_pipeline(self.composite.pipeline());
            rpass.set_bind_group(0, &bind_group, &[]);
            rpass.draw(0..3, 0..1);
        }
        self.gpu.queue().submit(std::iter::once(encoder.finish()));
    }

    fn read_pixel(&mut self, x: u32, y: u32) -> Result<[u8; 4], BackendError> {
        let surface = self
            .surface(self.current_index())
            .ok_or_else(|| BackendError::UnknownTarget(format!("{:?}", self.current)))?;
        if x >= surface.width || y >= surface.height {
            return Err(BackendError::OutOfBounds {
                x,
                y,
                width: surface.width,
                height: surface.height,
            });
        }
        readback::read_texel(
            self.gpu.device(),
            self.gpu.queue(),
            &surface.color.texture,
            x,
            readback::flip_y(y, surface.height),
        )
    }
}
