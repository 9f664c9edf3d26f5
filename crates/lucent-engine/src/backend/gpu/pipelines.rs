//! Shader assembly and pipeline caching for the wgpu backend.

use std::collections::HashMap;
use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::color::Rgba;
use crate::scene::{BlendMode, Material, content_hash};

pub(super) const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub(super) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const PRELUDE: &str = include_str!("shaders/prelude.wgsl");
const ENTRY: &str = include_str!("shaders/entry.wgsl");

/// Full module text for a material program: prelude, program, entry point.
pub(super) fn assemble_program(program: &str) -> String {
    let mut out = String::with_capacity(PRELUDE.len() + program.len() + ENTRY.len() + 1);
    out.push_str(PRELUDE);
    out.push_str(program);
    if !program.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(ENTRY);
    out
}

// ── GPU types ─────────────────────────────────────────────────────────────

/// Per-draw uniforms (80 bytes), bound at a dynamic offset.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct DrawUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub color: [f32; 4],
}

impl DrawUniforms {
    pub fn new(view_proj: Mat4, color: Rgba) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            color: color.to_array(),
        }
    }
}

/// Must match `PeelUniforms` in the injected declarations.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct PeelUniforms {
    pub reciprocal_screen_size: [f32; 2],
    pub epsilon: f32,
    pub _pad: f32, // 16-byte alignment
}

impl PeelUniforms {
    /// Parameters under which the discard test never fires.
    pub const NEUTRAL: PeelUniforms = PeelUniforms {
        reciprocal_screen_size: [0.0; 2],
        epsilon: -1.0,
        _pad: 0.0,
    };
}

/// Instance data layout (64 bytes): world transform columns at locations 1-4.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct InstanceRaw {
    pub model: [[f32; 4]; 4],
}

impl From<Mat4> for InstanceRaw {
    fn from(m: Mat4) -> Self {
        Self {
            model: m.to_cols_array_2d(),
        }
    }
}

impl InstanceRaw {
    const ATTRS: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        1 => Float32x4,
        2 => Float32x4,
        3 => Float32x4,
        4 => Float32x4
    ];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceRaw>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRS,
        }
    }
}

const POSITION_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];

fn position_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 3]>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &POSITION_ATTRS,
    }
}

// ── pipeline cache ────────────────────────────────────────────────────────

/// Everything that selects a distinct scene pipeline.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(super) struct PipelineKey {
    pub program: u64,
    pub blend: BlendMode,
    pub depth_test: bool,
    pub depth_write: bool,
    pub double_sided: bool,
    /// Whether the destination has a depth attachment.
    pub has_depth: bool,
}

impl PipelineKey {
    pub fn new(material: &Material, has_depth: bool) -> Self {
        Self {
            program: material.program.active_hash(),
            blend: material.blend,
            depth_test: material.depth_test,
            depth_write: material.depth_write,
            double_sided: material.double_sided,
            has_depth,
        }
    }
}

/// Scene pipelines keyed by [`PipelineKey`], shader modules by program hash.
pub(super) struct PipelineCache {
    draw_layout: wgpu::BindGroupLayout,
    peel_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    modules: HashMap<u64, wgpu::ShaderModule>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl PipelineCache {
    pub fn new(device: &wgpu::Device) -> Self {
        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lucent draw bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<DrawUniforms>() as u64),
                },
                count: None,
            }],
        });

        // Bound for every draw; only instrumented programs read it.
        let peel_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lucent peel bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(
                            std::mem::size_of::<PeelUniforms>() as u64
                        ),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("lucent scene pipeline layout"),
            bind_group_layouts: &[&draw_layout, &peel_layout],
            immediate_size: 0,
        });

        Self {
            draw_layout,
            peel_layout,
            pipeline_layout,
            modules: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    #[inline]
    pub fn draw_layout(&self) -> &wgpu::BindGroupLayout {
        &self.draw_layout
    }

    #[inline]
    pub fn peel_layout(&self) -> &wgpu::BindGroupLayout {
        &self.peel_layout
    }

    #[inline]
    pub fn get(&self, key: &PipelineKey) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(key)
    }

    /// Builds the pipeline for `key` if it is not cached yet.
    ///
    /// `program` is the active program text whose hash is `key.program`.
    pub fn ensure(&mut self, device: &wgpu::Device, key: PipelineKey, program: &str) {
        if self.pipelines.contains_key(&key) {
            return;
        }
        debug_assert_eq!(key.program, content_hash(program));

        let module = &*self.modules.entry(key.program).or_insert_with(|| {
            log::debug!("compiling scene program {:016x}", key.program);
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("lucent scene shader"),
                source: wgpu::ShaderSource::Wgsl(assemble_program(program).into()),
            })
        });

        let blend = match key.blend {
            BlendMode::Opaque => None,
            BlendMode::Normal => Some(wgpu::BlendState::ALPHA_BLENDING),
        };

        let depth_stencil = key.has_depth.then(|| wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: key.depth_write,
            depth_compare: if key.depth_test {
                wgpu::CompareFunction::Less
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("lucent scene pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[position_layout(), InstanceRaw::layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: (!key.double_sided).then_some(wgpu::Face::Back),
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        self.pipelines.insert(key, pipeline);
    }
}

/// The full-screen under pass.
pub(super) struct CompositePipeline {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::RenderPipeline,
}

impl CompositePipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("lucent under shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/under.wgsl").into()),
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lucent under bgl"),
            entries: &[texture_entry(0), texture_entry(1)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("lucent under pipeline layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("lucent under pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        Self { layout, pipeline }
    }

    #[inline]
    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    #[inline]
    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }
}
