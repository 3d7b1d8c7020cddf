//! wgpu binding and execution of pipeline plans
//!
//! This module turns a pure-data [`SatPipeline`] into bound GPU resources:
//! one texture per arena slot, one render or compute pipeline plus bind group
//! per pass, and a command recorder that walks the sequence strictly in plan
//! order.

use crate::error::SatError;
use crate::levels::Axis;
use crate::pass::{PassKind, PassNode, TechniqueId, TechniqueKind, TechniqueRegistry};
use crate::pipeline::{BufferOrigin, BufferUsage, PixelFormat, RenderCaps, SatPipeline, ScanStrategy};
use wgpu::util::DeviceExt;

const SWEEP_SHADER: &str = include_str!("shaders/sweep.wgsl");
const BLOCK_SCAN_SHADER: &str = include_str!("shaders/block_scan.wgsl");
const ADD_SUM_SHADER: &str = include_str!("shaders/add_sum.wgsl");

/// Storage-format token the compute techniques are written against; swapped
/// for the 16-bit token when the fallback format is selected, so the chosen
/// precision flows into the WGSL declarations as well as the allocations.
const STORAGE_FORMAT_TOKEN: &str = "rgba32float";

/// Maps a plan format to its wgpu texture format
pub fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

fn wgpu_usages(usage: BufferUsage) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::empty();
    if usage.render_target {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.storage {
        usages |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usage.sampled {
        usages |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    usages
}

impl RenderCaps for wgpu::Adapter {
    fn supports_format(&self, format: PixelFormat, usage: BufferUsage) -> bool {
        self.get_texture_format_features(texture_format(format)).allowed_usages.contains(wgpu_usages(usage))
    }
}

/// Uniform block of the sweep techniques; layout matches `SweepParams` in
/// `shaders/sweep.wgsl`
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct SweepUniforms {
    addr_offset: [f32; 3],
    scale: f32,
    length: i32,
    _pad: [u32; 3],
}

/// The embedded shader technique library
#[derive(Debug)]
struct TechniqueLibrary {
    sweep: wgpu::ShaderModule,
    block_scan: wgpu::ShaderModule,
    add_sum: wgpu::ShaderModule,
}

/// One resolved technique: a module and its entry point
#[derive(Debug, Clone, Copy)]
struct Technique<'a> {
    module: &'a wgpu::ShaderModule,
    entry: &'static str,
}

impl TechniqueLibrary {
    fn load(device: &wgpu::Device, format: PixelFormat) -> Self {
        let storage_patched = |source: &str| match format {
            PixelFormat::Rgba32Float => source.to_string(),
            PixelFormat::Rgba16Float => source.replace(STORAGE_FORMAT_TOKEN, "rgba16float"),
        };
        let module = |label: &str, source: String| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        };
        Self {
            sweep: module("sat sweep", SWEEP_SHADER.to_string()),
            block_scan: module("sat block scan", storage_patched(BLOCK_SCAN_SHADER)),
            add_sum: module("sat add sum", storage_patched(ADD_SUM_SHADER)),
        }
    }

    /// Looks up the module and entry point for a technique identity
    fn technique(&self, id: TechniqueId) -> Option<Technique<'_>> {
        let (module, entry) = match (id.kind, id.axis) {
            (TechniqueKind::UpSweep, Axis::X) => (&self.sweep, "up_sweep_x"),
            (TechniqueKind::UpSweep, Axis::Y) => (&self.sweep, "up_sweep_y"),
            (TechniqueKind::DownSweep, Axis::X) => (&self.sweep, "down_sweep_x"),
            (TechniqueKind::DownSweep, Axis::Y) => (&self.sweep, "down_sweep_y"),
            (TechniqueKind::InBlockScan, Axis::X) => (&self.block_scan, "in_block_scan_x"),
            (TechniqueKind::InBlockScan, Axis::Y) => (&self.block_scan, "in_block_scan_y"),
            (TechniqueKind::AddSum, Axis::X) => (&self.add_sum, "add_sum_x"),
            (TechniqueKind::AddSum, Axis::Y) => (&self.add_sum, "add_sum_y"),
        };
        Some(Technique { module, entry })
    }
}

/// A single pass bound to wgpu resources
#[derive(Debug)]
enum BoundPass {
    Render {
        label: String,
        pipeline: wgpu::RenderPipeline,
        bind_group: wgpu::BindGroup,
        target: wgpu::TextureView,
    },
    Compute {
        label: String,
        pipeline: wgpu::ComputePipeline,
        bind_group: wgpu::BindGroup,
        groups: [u32; 3],
    },
}

/// A summed-area-table pipeline bound to wgpu resources, ready to run
///
/// Owns every intermediate texture for its lifetime; the source slot holds
/// the caller's texture handle. Nothing is shared between executors, and a
/// resize always goes through [`SatExecutor::set_input`], which rebuilds
/// everything from scratch.
#[derive(Debug)]
pub struct SatExecutor {
    plan: SatPipeline,
    textures: Vec<wgpu::Texture>,
    passes: Vec<BoundPass>,
    output: wgpu::Texture,
}

impl SatExecutor {
    /// Builds and binds a pipeline for the given source texture
    ///
    /// The source must allow `TEXTURE_BINDING`; the block strategy also
    /// requires `STORAGE_BINDING`, since its carry resolution writes the
    /// final result back through the source slot on deep pyramids.
    ///
    /// # Arguments
    /// * `device` - Device for resource creation
    /// * `caps` - Capability query, typically the `wgpu::Adapter`
    /// * `source` - The input image; its dimensions shape the whole pipeline
    /// * `strategy` - Which of the two pipelines to assemble
    ///
    /// # Returns
    /// The bound executor and the texture that will hold the finished
    /// summed-area table
    pub fn new(device: &wgpu::Device, caps: &impl RenderCaps, source: &wgpu::Texture, strategy: ScanStrategy) -> Result<(Self, wgpu::Texture), SatError> {
        let plan = SatPipeline::build(caps, source.width(), source.height(), strategy)?;
        Self::bind(device, plan, source)
    }

    fn bind(device: &wgpu::Device, plan: SatPipeline, source: &wgpu::Texture) -> Result<(Self, wgpu::Texture), SatError> {
        let library = TechniqueLibrary::load(device, plan.format);
        let registry = TechniqueRegistry::resolve(|id| library.technique(id))?;

        let textures: Vec<wgpu::Texture> = plan
            .buffers
            .iter()
            .enumerate()
            .map(|(index, desc)| match desc.origin {
                BufferOrigin::Borrowed => source.clone(),
                BufferOrigin::Owned => device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&format!("sat buffer {index}")),
                    size: wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: texture_format(plan.format),
                    usage: wgpu_usages(desc.usage) | wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                }),
            })
            .collect();
        let views: Vec<wgpu::TextureView> = textures.iter().map(|texture| texture.create_view(&wgpu::TextureViewDescriptor::default())).collect();

        let passes = plan
            .passes
            .iter()
            .map(|pass| {
                let technique = *registry.get(pass.technique);
                match pass.kind {
                    PassKind::Draw => Self::bind_draw_pass(device, &plan, pass, &library, technique, &views),
                    PassKind::Dispatch { groups } => Self::bind_dispatch_pass(device, &plan, pass, technique, groups, &views),
                }
            })
            .collect();

        let output = textures[plan.output.index()].clone();
        Ok((
            Self {
                plan,
                textures,
                passes,
                output: output.clone(),
            },
            output,
        ))
    }

    /// Binds one full-screen sweep pass: uniform block at binding 0, input
    /// textures behind it, the first output as the render target
    fn bind_draw_pass(device: &wgpu::Device, plan: &SatPipeline, pass: &PassNode, library: &TechniqueLibrary, technique: Technique<'_>, views: &[wgpu::TextureView]) -> BoundPass {
        let uniforms = SweepUniforms {
            addr_offset: pass.param_float3("addr_offset").unwrap(),
            scale: pass.param_float("scale").unwrap(),
            length: pass.param_int("length").unwrap(),
            _pad: [0; 3],
        };
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&pass.label),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut layout_entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        for position in 0..pass.inputs.len() {
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: (position + 1) as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&pass.label),
            entries: &layout_entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&pass.label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&pass.label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &library.sweep,
                entry_point: Some("fullscreen_vs"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: technique.module,
                entry_point: Some(technique.entry),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: texture_format(plan.format),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }];
        for (position, binding) in pass.inputs.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: (position + 1) as u32,
                resource: wgpu::BindingResource::TextureView(&views[binding.buffer.index()]),
            });
        }
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&pass.label),
            layout: &bind_group_layout,
            entries: &entries,
        });

        BoundPass::Render {
            label: pass.label.clone(),
            pipeline,
            bind_group,
            target: views[pass.outputs[0].buffer.index()].clone(),
        }
    }

    /// Binds one compute pass: input textures first, storage outputs after
    /// them, in binding order
    fn bind_dispatch_pass(device: &wgpu::Device, plan: &SatPipeline, pass: &PassNode, technique: Technique<'_>, groups: [u32; 3], views: &[wgpu::TextureView]) -> BoundPass {
        let mut layout_entries = Vec::new();
        for position in 0..pass.inputs.len() {
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: position as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        for position in 0..pass.outputs.len() {
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: (pass.inputs.len() + position) as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: texture_format(plan.format),
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            });
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&pass.label),
            entries: &layout_entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&pass.label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&pass.label),
            layout: Some(&pipeline_layout),
            module: technique.module,
            entry_point: Some(technique.entry),
            compilation_options: Default::default(),
            cache: None,
        });

        let entries: Vec<wgpu::BindGroupEntry> = pass
            .inputs
            .iter()
            .chain(pass.outputs.iter())
            .enumerate()
            .map(|(position, binding)| wgpu::BindGroupEntry {
                binding: position as u32,
                resource: wgpu::BindingResource::TextureView(&views[binding.buffer.index()]),
            })
            .collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&pass.label),
            layout: &bind_group_layout,
            entries: &entries,
        });

        BoundPass::Compute {
            label: pass.label.clone(),
            pipeline,
            bind_group,
            groups,
        }
    }

    /// Rebinds the pipeline to a new source texture
    ///
    /// Triggers a full reconstruction: new plan, new intermediate textures,
    /// new passes. Returns the new output texture.
    pub fn set_input(&mut self, device: &wgpu::Device, caps: &impl RenderCaps, source: &wgpu::Texture) -> Result<wgpu::Texture, SatError> {
        let (executor, output) = Self::new(device, caps, source, self.plan.strategy)?;
        *self = executor;
        Ok(output)
    }

    /// The texture holding the finished summed-area table after execution
    pub fn output(&self) -> &wgpu::Texture {
        &self.output
    }

    /// The plan this executor was bound from
    pub fn plan(&self) -> &SatPipeline {
        &self.plan
    }

    /// Records the whole pass sequence, in plan order, into `encoder`
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        for pass in &self.passes {
            match pass {
                BoundPass::Render { label, pipeline, bind_group, target } => {
                    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some(label),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: target,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    render_pass.set_pipeline(pipeline);
                    render_pass.set_bind_group(0, bind_group, &[]);
                    render_pass.draw(0..3, 0..1);
                }
                BoundPass::Compute { label, pipeline, bind_group, groups } => {
                    let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(label),
                        timestamp_writes: None,
                    });
                    compute_pass.set_pipeline(pipeline);
                    compute_pass.set_bind_group(0, bind_group, &[]);
                    compute_pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
                }
            }
        }
    }

    /// Encodes, submits, and waits for the pipeline, surfacing validation
    /// failures as [`SatError::DeviceExecutionFailure`]
    pub async fn execute(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<(), SatError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("sat pipeline") });
        self.encode(&mut encoder);
        queue.submit(std::iter::once(encoder.finish()));

        device.poll(wgpu::PollType::Wait).map_err(|error| SatError::DeviceExecutionFailure(error.to_string()))?;
        if let Some(error) = device.pop_error_scope().await {
            return Err(SatError::DeviceExecutionFailure(error.to_string()));
        }
        Ok(())
    }

    /// Borrow of the texture behind an arena slot, for readback or debugging
    pub fn buffer_texture(&self, index: usize) -> &wgpu::Texture {
        &self.textures[index]
    }
}
