//! Programs and render pipelines.
//!
//! A program is one WGSL module plus the bind group layouts reflected from it.
//! The GL-style state that wgpu bakes into pipelines (blend, depth, cull,
//! topology, target formats) is collected into a [`PipelineKey`] at draw time
//! and pipelines are created on first use. Compute programs have no such state;
//! their pipeline is built with the program.

use std::borrow::Cow;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::format::wgpu_format;
use super::uniforms::UniformArena;
use crate::core::backend::{
    BlendMode, CullMode, DepthFunc, DepthState, ProgramId, ProgramKind, ProgramSource, Topology,
    VertexAttribute,
};
use crate::errors::{QuarkError, Result};
use crate::shader::ShaderStage;
use crate::shader::reflect::{
    ProgramReflection, StorageTextureBinding, TextureBinding, TextureSampleKind, TextureShape,
    reflect,
};

// ============================================================================
// Programs
// ============================================================================

pub struct GpuProgram {
    pub label: String,
    pub module: wgpu::ShaderModule,
    pub reflection: ProgramReflection,
    pub layout: wgpu::PipelineLayout,
    pub texture_layout: wgpu::BindGroupLayout,
    pub uniform_bind_group: wgpu::BindGroup,
    /// Set for compute programs.
    pub compute: Option<wgpu::ComputePipeline>,
    /// CPU copy of the uniform block.
    pub block: Vec<u8>,
    /// Texture unit per texture global, set through sampler uniforms.
    pub units: FxHashMap<String, u32>,
}

impl GpuProgram {
    pub fn compile(
        device: &wgpu::Device,
        arena: &UniformArena,
        source: &ProgramSource,
    ) -> Result<Self> {
        let reflection = reflect(&source.code).map_err(|log| QuarkError::ShaderCompile {
            stage: stage_at(source, None),
            log,
            shader_source: source.code.clone(),
        })?;
        source.check_entry_points(&reflection)?;
        let stages = match source.kind {
            ProgramKind::Render => wgpu::ShaderStages::VERTEX_FRAGMENT,
            ProgramKind::Compute => wgpu::ShaderStages::COMPUTE,
        };

        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&source.label),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&source.code)),
        });
        if let Some(error) = pollster::block_on(scope.pop()) {
            return Err(compile_error(source, &module, &error.to_string()));
        }

        let block_size = reflection
            .uniforms
            .as_ref()
            .map_or(0, |block| u64::from(block.size));
        let uniform_entries: Vec<_> = (block_size > 0)
            .then(|| wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: stages,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: std::num::NonZeroU64::new(block_size),
                },
                count: None,
            })
            .into_iter()
            .collect();
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Quark Uniform Layout"),
            entries: &uniform_entries,
        });
        let uniform_bind_group = if block_size > 0 {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Quark Uniforms"),
                layout: &uniform_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(arena.binding(block_size)),
                }],
            })
        } else {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Quark Uniforms (empty)"),
                layout: &uniform_layout,
                entries: &[],
            })
        };

        let texture_entries: Vec<_> = reflection
            .textures
            .iter()
            .flat_map(|binding| texture_layout_entries(binding, stages))
            .chain(reflection.storage_textures.iter().map(storage_layout_entry))
            .collect();
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Quark Texture Layout"),
            entries: &texture_entries,
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&source.label),
            bind_group_layouts: &[Some(&uniform_layout), Some(&texture_layout)],
            immediate_size: 0,
        });

        let compute = match source.kind {
            ProgramKind::Render => None,
            ProgramKind::Compute => {
                let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(&source.label),
                    layout: Some(&layout),
                    module: &module,
                    entry_point: Some(ShaderStage::Compute.entry_point()),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                });
                if let Some(error) = pollster::block_on(scope.pop()) {
                    return Err(QuarkError::ShaderLink(format!("'{}': {error}", source.label)));
                }
                Some(pipeline)
            }
        };

        log::debug!(
            "Compiled program '{}' ({} uniform bytes, {} textures)",
            source.label,
            block_size,
            reflection.textures.len()
        );

        Ok(Self {
            label: source.label.clone(),
            module,
            layout,
            texture_layout,
            uniform_bind_group,
            compute,
            block: vec![0; block_size as usize],
            units: FxHashMap::default(),
            reflection,
        })
    }

    /// Bytes of the uniform block, 0 when the program has none.
    pub fn block_size(&self) -> usize {
        self.block.len()
    }
}

fn texture_layout_entries(
    binding: &TextureBinding,
    stages: wgpu::ShaderStages,
) -> SmallVec<[wgpu::BindGroupLayoutEntry; 2]> {
    let view_dimension = match binding.shape {
        TextureShape::D2 => wgpu::TextureViewDimension::D2,
        TextureShape::Cube => wgpu::TextureViewDimension::Cube,
    };
    let sample_type = match binding.sample {
        TextureSampleKind::Depth => wgpu::TextureSampleType::Depth,
        TextureSampleKind::Float => wgpu::TextureSampleType::Float {
            filterable: !binding.multisampled,
        },
    };
    let mut entries = SmallVec::new();
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: binding.binding,
        visibility: stages,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension,
            multisampled: binding.multisampled,
        },
        count: None,
    });
    if let Some(sampler_binding) = binding.sampler_binding {
        let ty = if binding.comparison {
            wgpu::SamplerBindingType::Comparison
        } else if binding.sample == TextureSampleKind::Depth || binding.multisampled {
            wgpu::SamplerBindingType::NonFiltering
        } else {
            wgpu::SamplerBindingType::Filtering
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: sampler_binding,
            visibility: stages,
            ty: wgpu::BindingType::Sampler(ty),
            count: None,
        });
    }
    entries
}

fn storage_layout_entry(binding: &StorageTextureBinding) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: binding.binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: if binding.read_write {
                wgpu::StorageTextureAccess::ReadWrite
            } else {
                wgpu::StorageTextureAccess::WriteOnly
            },
            format: wgpu_format(binding.format),
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

/// Stage a diagnostic at `offset` belongs to.
fn stage_at(source: &ProgramSource, offset: Option<usize>) -> ShaderStage {
    if source.kind == ProgramKind::Compute {
        ShaderStage::Compute
    } else if offset.is_some_and(|offset| offset >= source.fragment_offset) {
        ShaderStage::Fragment
    } else {
        ShaderStage::Vertex
    }
}

fn compile_error(source: &ProgramSource, module: &wgpu::ShaderModule, fallback: &str) -> QuarkError {
    let info = pollster::block_on(module.get_compilation_info());
    let first_error = info
        .messages
        .iter()
        .find(|m| m.message_type == wgpu::CompilationMessageType::Error);
    let (stage, log) = match first_error {
        Some(message) => {
            let offset = message.location.map(|l| l.offset as usize);
            let log = match message.location {
                Some(l) => format!("{}:{}: {}", l.line_number, l.line_position, message.message),
                None => message.message.clone(),
            };
            (stage_at(source, offset), log)
        }
        None => (stage_at(source, None), fallback.to_string()),
    };
    let shader_source = match stage {
        ShaderStage::Vertex => source.code[..source.fragment_offset].to_string(),
        ShaderStage::Fragment => source.code[source.fragment_offset..].to_string(),
        ShaderStage::Compute => source.code.clone(),
    };
    QuarkError::ShaderCompile {
        stage,
        log,
        shader_source,
    }
}

// ============================================================================
// Pipeline cache
// ============================================================================

/// Everything a render pipeline is specialized on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub program: ProgramId,
    pub attributes: SmallVec<[VertexAttribute; 8]>,
    /// Format per color slot, in draw-buffer order.
    pub color_formats: SmallVec<[wgpu::TextureFormat; 4]>,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub samples: u32,
    pub blend: BlendMode,
    pub depth: DepthState,
    pub cull: CullMode,
    pub topology: Topology,
}

#[derive(Default)]
pub struct PipelineCache {
    pipelines: FxHashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl PipelineCache {
    pub fn get_or_create(
        &mut self,
        device: &wgpu::Device,
        key: &PipelineKey,
        program: &GpuProgram,
    ) -> Result<wgpu::RenderPipeline> {
        if let Some(pipeline) = self.pipelines.get(key) {
            return Ok(pipeline.clone());
        }
        let pipeline = create_pipeline(device, key, program)?;
        self.pipelines.insert(key.clone(), pipeline.clone());
        Ok(pipeline)
    }

    /// Drops every pipeline built for `program`.
    pub fn evict_program(&mut self, program: ProgramId) {
        self.pipelines.retain(|key, _| key.program != program);
    }

    pub fn clear(&mut self) {
        self.pipelines.clear();
    }
}

/// Splits attributes into the per-vertex (slot 0) and per-instance (slot 1)
/// buffers. Attribute `i` is read at `@location(i)`.
pub fn vertex_attributes(
    attributes: &[VertexAttribute],
) -> [(u64, Vec<wgpu::VertexAttribute>); 2] {
    let mut buffers: [(u64, Vec<wgpu::VertexAttribute>); 2] = Default::default();
    for (location, attribute) in attributes.iter().enumerate() {
        let slot = usize::from(attribute.instance_divisor != 0);
        let (stride, list) = &mut buffers[slot];
        list.push(wgpu::VertexAttribute {
            format: match attribute.components {
                1 => wgpu::VertexFormat::Float32,
                2 => wgpu::VertexFormat::Float32x2,
                3 => wgpu::VertexFormat::Float32x3,
                _ => wgpu::VertexFormat::Float32x4,
            },
            offset: *stride,
            shader_location: location as u32,
        });
        *stride += u64::from(attribute.components.clamp(1, 4)) * 4;
    }
    buffers
}

fn create_pipeline(
    device: &wgpu::Device,
    key: &PipelineKey,
    program: &GpuProgram,
) -> Result<wgpu::RenderPipeline> {
    let [(vertex_stride, vertex_attrs), (instance_stride, instance_attrs)] =
        vertex_attributes(&key.attributes);
    let buffers = [
        wgpu::VertexBufferLayout {
            array_stride: vertex_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &vertex_attrs,
        },
        wgpu::VertexBufferLayout {
            array_stride: instance_stride,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &instance_attrs,
        },
    ];

    let blend = match key.blend {
        BlendMode::Disabled => None,
        BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
        BlendMode::Additive => Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        }),
    };
    // Slots the fragment stage does not write must be masked out.
    let targets: SmallVec<[Option<wgpu::ColorTargetState>; 4]> = key
        .color_formats
        .iter()
        .enumerate()
        .map(|(slot, &format)| {
            let written = program.reflection.fragment_outputs.contains(&(slot as u32));
            Some(wgpu::ColorTargetState {
                format,
                blend: if written { blend } else { None },
                write_mask: if written {
                    wgpu::ColorWrites::ALL
                } else {
                    wgpu::ColorWrites::empty()
                },
            })
        })
        .collect();

    let depth_stencil = key.depth_format.map(|format| wgpu::DepthStencilState {
        format,
        depth_write_enabled: Some(key.depth.test && key.depth.write),
        depth_compare: Some(if key.depth.test {
            match key.depth.func {
                DepthFunc::Less => wgpu::CompareFunction::Less,
                DepthFunc::LessEqual => wgpu::CompareFunction::LessEqual,
                DepthFunc::Always => wgpu::CompareFunction::Always,
            }
        } else {
            wgpu::CompareFunction::Always
        }),
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    });

    let (topology, strip_index_format) = match key.topology {
        Topology::Triangles => (wgpu::PrimitiveTopology::TriangleList, None),
        Topology::TriangleStrip => (
            wgpu::PrimitiveTopology::TriangleStrip,
            Some(wgpu::IndexFormat::Uint32),
        ),
        Topology::Lines => (wgpu::PrimitiveTopology::LineList, None),
        Topology::Points => (wgpu::PrimitiveTopology::PointList, None),
    };
    let cull_mode = match key.cull {
        CullMode::None => None,
        CullMode::Back => Some(wgpu::Face::Back),
        CullMode::Front => Some(wgpu::Face::Front),
    };

    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&program.label),
        layout: Some(&program.layout),
        vertex: wgpu::VertexState {
            module: &program.module,
            entry_point: Some(ShaderStage::Vertex.entry_point()),
            buffers: &buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &program.module,
            entry_point: Some(ShaderStage::Fragment.entry_point()),
            targets: &targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology,
            strip_index_format,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode,
            ..Default::default()
        },
        depth_stencil,
        multisample: wgpu::MultisampleState {
            count: key.samples,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview_mask: None,
        cache: None,
    });
    if let Some(error) = pollster::block_on(scope.pop()) {
        return Err(QuarkError::ShaderLink(format!("'{}': {error}", program.label)));
    }
    log::debug!("Created pipeline for '{}' ({:?})", program.label, key.topology);
    Ok(pipeline)
}
