//! Offscreen wgpu backend
//!
//! Renders into an RGBA8 texture owned by the backend. Draws issued during a frame are recorded
//! together with a snapshot of the bindings they use, then replayed in a single render pass when the
//! frame ends. The pass clears to the frame's clear color and blends additively.
//!
//! Constant buffers are kept on the CPU and copied into a fresh uniform buffer per draw, so constant
//! updates between draws of one frame behave as they would with immediate uniform updates. Vertex,
//! index and texture uploads go straight to the queue and therefore apply to the whole frame.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use wgpu::util::DeviceExt;

use super::{BufferKind, GraphicsBackend, ProgramInterface, Viewport};
use crate::error::BackendError;
use crate::shader::wgsl::{sampler_binding, texture_binding};
use crate::shader::{ConstantLayout, ShaderLanguage, ShaderStage, ShaderType, VertexLayout};

/// Format of the offscreen render target
const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Entry points of the generated modules
const VERTEX_ENTRY_POINT: &str = "vs_main";
const FRAGMENT_ENTRY_POINT: &str = "fs_main";

/// A compiled WGSL module for one stage
#[derive(Debug)]
pub struct WgpuShader {
    module: wgpu::ShaderModule,
    stage: ShaderStage,
}

/// A linked render pipeline with the metadata needed to bind its resources
#[derive(Debug, Clone)]
pub struct WgpuProgram {
    pipeline: wgpu::RenderPipeline,
    /// Layout of bind group 0, absent when the pipeline binds nothing
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    constant_layout: ConstantLayout,
    samplers: Vec<String>,
    /// Texture unit read by each sampler, in declaration order
    sampler_units: Vec<u32>,
}

/// A buffer created by [`WgpuBackend`]
#[derive(Debug, Clone)]
pub enum WgpuBuffer {
    /// Vertex or index data living on the GPU
    Device(wgpu::Buffer),
    /// Constant block contents, staged per draw
    Constants(Rc<RefCell<Vec<u8>>>),
}

/// A 2D RGBA8 texture with its default view
#[derive(Debug, Clone)]
pub struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// Resources bound at the time a draw is issued
#[derive(Debug, Default)]
struct Bindings {
    program: Option<WgpuProgram>,
    vertex_buffer: Option<wgpu::Buffer>,
    index_buffer: Option<wgpu::Buffer>,
    constants: Option<Rc<RefCell<Vec<u8>>>>,
    active_unit: u32,
    textures: HashMap<u32, WgpuTexture>,
}

/// A draw recorded during the frame, ready to be encoded
#[derive(Debug)]
struct RecordedDraw {
    pipeline: wgpu::RenderPipeline,
    bind_group: Option<wgpu::BindGroup>,
    vertex_buffer: Option<wgpu::Buffer>,
    index_buffer: wgpu::Buffer,
    viewport: Viewport,
    offset: u32,
    count: u32,
}

/// Backend rendering into an offscreen wgpu texture
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    /// Texture read by samplers whose unit has nothing bound
    fallback_texture: WgpuTexture,
    viewport: Viewport,
    bindings: Bindings,
    /// Clear color of the open frame, `None` outside of a frame
    frame: Option<[f32; 4]>,
    draws: Vec<RecordedDraw>,
}

impl WgpuBackend {
    /// Opens a GPU device without a surface and creates a backend rendering into a new target
    ///
    /// # Arguments
    /// * `width` - Render target width in pixels
    /// * `height` - Render target height in pixels
    pub async fn new_headless(width: u32, height: u32) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        tracing::info!(adapter = ?adapter.get_info().name, "GPU adapter selected");

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("pipeforge"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: Default::default(),
            })
            .await?;

        Ok(Self::from_device(device, queue, width, height))
    }

    /// Creates a backend on an existing device
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, width: u32, height: u32) -> Self {
        // Errors raised outside of an explicit scope are logged, not fatal
        device.on_uncaptured_error(Box::new(|error| {
            tracing::error!(%error, "uncaptured wgpu error");
        }));

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Render Target"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Texture Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let fallback = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("Fallback Texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        );
        let fallback_texture = WgpuTexture {
            view: fallback.create_view(&wgpu::TextureViewDescriptor::default()),
            texture: fallback,
        };

        Self {
            device,
            queue,
            target,
            target_view,
            sampler,
            fallback_texture,
            viewport: Viewport::new(width, height),
            bindings: Bindings::default(),
            frame: None,
            draws: Vec::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns the render target size in pixels
    pub fn target_size(&self) -> (u32, u32) {
        (self.target.width(), self.target.height())
    }

    /// Copies the render target back to the CPU
    ///
    /// # Returns
    /// The target contents as an RGBA8 image, top row first
    pub fn read_target(&self) -> Result<image::RgbaImage, BackendError> {
        let (width, height) = self.target_size();
        let unpadded_bytes_per_row = width * 4;
        let bytes_per_row = unpadded_bytes_per_row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::PollType::Wait)?;
        match pollster::block_on(receiver.receive()) {
            Some(result) => result?,
            None => return Err(BackendError::Validation("readback mapping was dropped".to_string())),
        }

        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        {
            let data = buffer_slice.get_mapped_range();
            for row in data.chunks(bytes_per_row as usize) {
                pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
            }
        }
        buffer.unmap();

        image::RgbaImage::from_raw(width, height, pixels).ok_or_else(|| BackendError::Validation("readback size mismatch".to_string()))
    }

    /// Runs `f` inside a validation error scope
    fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, BackendError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(BackendError::Validation(error.to_string())),
            None => Ok(value),
        }
    }

    /// Creates the bind group a draw of `program` reads from, using the current bindings
    fn snapshot_bind_group(&self, program: &WgpuProgram) -> Option<wgpu::BindGroup> {
        let layout = program.bind_group_layout.as_ref()?;

        let constants = (!program.constant_layout.is_empty()).then(|| {
            let mut contents = vec![0u8; program.constant_layout.size];
            if let Some(shadow) = &self.bindings.constants {
                let shadow = shadow.borrow();
                let len = shadow.len().min(contents.len());
                contents[..len].copy_from_slice(&shadow[..len]);
            }
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Constants Snapshot"),
                contents: &contents,
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });

        let mut entries = Vec::new();
        if let Some(buffer) = &constants {
            entries.push(wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            });
        }
        for (index, unit) in program.sampler_units.iter().enumerate() {
            let texture = self.bindings.textures.get(unit).unwrap_or(&self.fallback_texture);
            entries.push(wgpu::BindGroupEntry {
                binding: texture_binding(index),
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: sampler_binding(index),
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }

        Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Draw Bind Group"),
            layout,
            entries: &entries,
        }))
    }

    /// Clamps the current viewport to the render target and moves it to the target's top-left origin
    fn clamped_viewport(&self) -> Viewport {
        let (width, height) = self.target_size();
        target_viewport(self.viewport, width, height)
    }
}

/// Converts a bottom-left origin viewport into a clamped, top-left origin rectangle of the target
///
/// # Arguments
/// * `viewport` - Viewport with `y` counted up from the bottom edge
/// * `width` - Target width in pixels
/// * `height` - Target height in pixels
fn target_viewport(viewport: Viewport, width: u32, height: u32) -> Viewport {
    let x = viewport.x.min(width);
    let y = viewport.y.min(height);
    let clamped_width = viewport.width.min(width - x);
    let clamped_height = viewport.height.min(height - y);
    Viewport {
        x,
        y: height - y - clamped_height,
        width: clamped_width,
        height: clamped_height,
    }
}

/// Maps a vertex input column type to its buffer format
fn vertex_format(ty: ShaderType) -> wgpu::VertexFormat {
    match ty {
        ShaderType::Float => wgpu::VertexFormat::Float32,
        ShaderType::Vec2 => wgpu::VertexFormat::Float32x2,
        ShaderType::Vec3 => wgpu::VertexFormat::Float32x3,
        // Matrix attributes arrive split into columns
        ShaderType::Vec4 | ShaderType::Mat2 | ShaderType::Mat3 | ShaderType::Mat4 => wgpu::VertexFormat::Float32x4,
    }
}

/// Additive blending: source and destination both weighted by one
const ADDITIVE_BLEND: wgpu::BlendState = wgpu::BlendState {
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
};

impl GraphicsBackend for WgpuBackend {
    type Shader = WgpuShader;
    type Program = WgpuProgram;
    type Buffer = WgpuBuffer;
    type Texture = WgpuTexture;

    fn language(&self) -> ShaderLanguage {
        ShaderLanguage::Wgsl
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<WgpuShader, BackendError> {
        let label = format!("{stage} shader");
        let module = self.scoped(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        })?;
        Ok(WgpuShader { module, stage })
    }

    fn destroy_shader(&mut self, shader: WgpuShader) {
        tracing::trace!(stage = %shader.stage, "dropping shader module");
    }

    fn link_program(&mut self, vertex: &WgpuShader, fragment: &WgpuShader, interface: &ProgramInterface<'_>) -> Result<WgpuProgram, BackendError> {
        let mut layout_entries = Vec::new();
        if !interface.constant_layout.is_empty() {
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(interface.constant_layout.size as u64),
                },
                count: None,
            });
        }
        for index in 0..interface.samplers.len() {
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: texture_binding(index),
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: sampler_binding(index),
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }

        let locations = interface.vertex_layout.locations();
        let attributes: Vec<_> = locations
            .iter()
            .map(|location| wgpu::VertexAttribute {
                format: vertex_format(location.ty),
                offset: (location.offset * crate::shader::layout::FLOAT_SIZE) as u64,
                shader_location: location.location,
            })
            .collect();
        let buffers = [wgpu::VertexBufferLayout {
            array_stride: interface.vertex_layout.stride_bytes() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];
        let buffers: &[wgpu::VertexBufferLayout] = if attributes.is_empty() { &[] } else { &buffers };

        let (pipeline, bind_group_layout) = self.scoped(|device| {
            let bind_group_layout = (!layout_entries.is_empty()).then(|| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Pipeline Bind Group Layout"),
                    entries: &layout_entries,
                })
            });
            let bind_group_layouts: Vec<_> = bind_group_layout.iter().collect();
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Pipeline Layout"),
                bind_group_layouts: &bind_group_layouts,
                push_constant_ranges: &[],
            });
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Render Pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex.module,
                    entry_point: Some(VERTEX_ENTRY_POINT),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment.module,
                    entry_point: Some(FRAGMENT_ENTRY_POINT),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: Some(ADDITIVE_BLEND),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: Some(wgpu::IndexFormat::Uint16),
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            });
            (pipeline, bind_group_layout)
        })?;

        Ok(WgpuProgram {
            pipeline,
            bind_group_layout,
            constant_layout: interface.constant_layout.clone(),
            samplers: interface.samplers.to_vec(),
            sampler_units: (0..interface.samplers.len() as u32).collect(),
        })
    }

    fn destroy_program(&mut self, program: WgpuProgram) {
        tracing::trace!(samplers = program.samplers.len(), "dropping render pipeline");
    }

    fn use_program(&mut self, program: &WgpuProgram) {
        self.bindings.program = Some(program.clone());
    }

    fn set_sampler_unit(&mut self, program: &mut WgpuProgram, sampler: &str, unit: u32) {
        if let Some(index) = program.samplers.iter().position(|name| name == sampler) {
            program.sampler_units[index] = unit;
        }
    }

    fn create_buffer(&mut self, kind: BufferKind, byte_size: usize) -> Result<WgpuBuffer, BackendError> {
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
            BufferKind::Constant => return Ok(WgpuBuffer::Constants(Rc::new(RefCell::new(vec![0; byte_size])))),
        };
        let buffer = self.scoped(|device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(match kind {
                    BufferKind::Vertex => "Vertex Buffer",
                    _ => "Index Buffer",
                }),
                // Queue writes must be a multiple of four bytes
                size: byte_size.max(1).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize) as u64,
                usage: usage | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;
        Ok(WgpuBuffer::Device(buffer))
    }

    fn upload_buffer(&mut self, buffer: &WgpuBuffer, data: &[u8]) {
        match buffer {
            WgpuBuffer::Device(buffer) => {
                let aligned = data.len().next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize);
                if aligned == data.len() {
                    self.queue.write_buffer(buffer, 0, data);
                } else {
                    let mut padded = data.to_vec();
                    padded.resize(aligned, 0);
                    self.queue.write_buffer(buffer, 0, &padded);
                }
            }
            WgpuBuffer::Constants(shadow) => {
                let mut shadow = shadow.borrow_mut();
                let len = data.len().min(shadow.len());
                shadow[..len].copy_from_slice(&data[..len]);
            }
        }
    }

    fn destroy_buffer(&mut self, buffer: WgpuBuffer) {
        // Draws recorded in the open frame keep their own reference until the frame is submitted
        tracing::trace!(constants = matches!(buffer, WgpuBuffer::Constants(_)), "dropping buffer");
    }

    fn create_texture(&mut self, width: u32, height: u32, mip_levels: u32) -> Result<WgpuTexture, BackendError> {
        let texture = self.scoped(|device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: mip_levels.max(1),
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(WgpuTexture { texture, view })
    }

    fn upload_texture(&mut self, texture: &WgpuTexture, mip_level: u32, width: u32, height: u32, pixels: &[u8]) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn destroy_texture(&mut self, texture: WgpuTexture) {
        self.bindings.textures.retain(|_, bound| bound.texture != texture.texture);
        tracing::trace!(width = texture.texture.width(), height = texture.texture.height(), "dropping texture");
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn begin_frame(&mut self, clear_color: [f32; 4]) {
        self.frame = Some(clear_color);
        self.draws.clear();
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        let Some(clear_color) = self.frame.take() else {
            return Ok(());
        };
        let draws = std::mem::take(&mut self.draws);
        let [r, g, b, a] = clear_color.map(f64::from);

        self.scoped(|device| {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Frame Encoder") });
            {
                let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Frame Render Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &self.target_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });

                for draw in &draws {
                    let viewport = draw.viewport;
                    render_pass.set_viewport(viewport.x as f32, viewport.y as f32, viewport.width as f32, viewport.height as f32, 0.0, 1.0);
                    render_pass.set_pipeline(&draw.pipeline);
                    if let Some(bind_group) = &draw.bind_group {
                        render_pass.set_bind_group(0, bind_group, &[]);
                    }
                    if let Some(vertex_buffer) = &draw.vertex_buffer {
                        render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
                    }
                    render_pass.set_index_buffer(draw.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                    render_pass.draw_indexed(draw.offset..draw.offset + draw.count, 0, 0..1);
                }
            }
            self.queue.submit(std::iter::once(encoder.finish()));
        })?;

        tracing::debug!(draws = draws.len(), "frame submitted");
        Ok(())
    }

    fn bind_program(&mut self, program: &WgpuProgram) {
        self.bindings.program = Some(program.clone());
    }

    fn bind_vertex_buffer(&mut self, buffer: &WgpuBuffer, _layout: &VertexLayout) {
        // The attribute wiring is baked into the render pipeline at link time
        match buffer {
            WgpuBuffer::Device(buffer) => self.bindings.vertex_buffer = Some(buffer.clone()),
            WgpuBuffer::Constants(_) => tracing::warn!("constant buffer bound as vertex buffer"),
        }
    }

    fn bind_index_buffer(&mut self, buffer: &WgpuBuffer) {
        match buffer {
            WgpuBuffer::Device(buffer) => self.bindings.index_buffer = Some(buffer.clone()),
            WgpuBuffer::Constants(_) => tracing::warn!("constant buffer bound as index buffer"),
        }
    }

    fn bind_constant_buffer(&mut self, buffer: &WgpuBuffer) {
        match buffer {
            WgpuBuffer::Constants(shadow) => self.bindings.constants = Some(Rc::clone(shadow)),
            WgpuBuffer::Device(_) => tracing::warn!("device buffer bound as constant buffer"),
        }
    }

    fn set_active_texture_unit(&mut self, unit: u32) {
        self.bindings.active_unit = unit;
    }

    fn bind_texture(&mut self, texture: &WgpuTexture) {
        self.bindings.textures.insert(self.bindings.active_unit, texture.clone());
    }

    fn update_constant(&mut self, program: &WgpuProgram, buffer: &WgpuBuffer, name: &str, _ty: ShaderType, data: &[f32]) -> Result<(), BackendError> {
        let field = program.constant_layout.field(name).ok_or_else(|| BackendError::ConstantNotInLayout { name: name.to_string() })?;
        let WgpuBuffer::Constants(shadow) = buffer else {
            return Err(BackendError::Validation("constant update targets a device buffer".to_string()));
        };

        let bytes: &[u8] = bytemuck::cast_slice(data);
        let end = field.offset + bytes.len();
        let mut shadow = shadow.borrow_mut();
        if shadow.len() < end {
            shadow.resize(end, 0);
        }
        shadow[field.offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn draw_triangle_strip(&mut self, offset: u32, count: u32) {
        if self.frame.is_none() {
            tracing::warn!("draw outside of a frame ignored");
            return;
        }
        let (Some(program), Some(index_buffer)) = (&self.bindings.program, &self.bindings.index_buffer) else {
            tracing::warn!("draw without a bound program or index buffer ignored");
            return;
        };

        let viewport = self.clamped_viewport();
        if viewport.width == 0 || viewport.height == 0 {
            tracing::trace!(?viewport, "draw into an empty viewport skipped");
            return;
        }

        let draw = RecordedDraw {
            pipeline: program.pipeline.clone(),
            bind_group: self.snapshot_bind_group(program),
            vertex_buffer: self.bindings.vertex_buffer.clone(),
            index_buffer: index_buffer.clone(),
            viewport,
            offset,
            count,
        };
        self.draws.push(draw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererConfig;
    use crate::renderer::Renderer;
    use crate::shader::Semantic;

    /// Opens a headless device, or returns `None` on machines without a usable adapter
    fn headless(width: u32, height: u32) -> Option<WgpuBackend> {
        match pollster::block_on(WgpuBackend::new_headless(width, height)) {
            Ok(backend) => Some(backend),
            Err(err) => {
                eprintln!("skipping GPU test: {err}");
                None
            }
        }
    }

    #[test]
    fn test_vertex_format_per_column() {
        assert_eq!(vertex_format(ShaderType::Float), wgpu::VertexFormat::Float32);
        assert_eq!(vertex_format(ShaderType::Vec3), wgpu::VertexFormat::Float32x3);
        assert_eq!(vertex_format(ShaderType::Mat4), wgpu::VertexFormat::Float32x4);
    }

    #[test]
    fn test_viewport_origin_is_bottom_left() {
        assert_eq!(target_viewport(Viewport::new(8, 8), 8, 8), Viewport::new(8, 8));
        assert_eq!(target_viewport(Viewport { x: 2, y: 1, width: 4, height: 3 }, 8, 8), Viewport { x: 2, y: 4, width: 4, height: 3 });
        assert_eq!(target_viewport(Viewport { x: 6, y: 6, width: 4, height: 4 }, 8, 8), Viewport { x: 6, y: 0, width: 2, height: 2 });
        assert_eq!(target_viewport(Viewport { x: 9, y: 9, width: 4, height: 4 }, 8, 8), Viewport { x: 8, y: 0, width: 0, height: 0 });
    }

    #[test]
    fn test_quad_blends_over_clear_color() {
        let Some(backend) = headless(8, 8) else {
            return;
        };
        let mut renderer = Renderer::new(backend, RendererConfig::default());
        renderer.reinit(Viewport::new(8, 8));

        let mut builder = renderer.begin_pipeline().unwrap();
        builder.add_vertex_shader_input(ShaderType::Vec3, "a_pos", Semantic::Position0).unwrap();
        builder.add_pixel_shader_input(ShaderType::Vec4, "v_pos", Semantic::ClipPosition).unwrap();
        builder.begin_vertex_shader().unwrap();
        builder.assign_input(Some(ShaderType::Vec3), "pos", "a_pos").unwrap();
        builder.assign_output("v_pos", "vec4(pos.x, pos.y, pos.z, 1.0)").unwrap();
        builder.end_vertex_shader().unwrap();
        builder.begin_pixel_shader().unwrap();
        builder.return_color("vec4(1.0, 1.0, 1.0, 1.0)").unwrap();
        builder.end_pixel_shader().unwrap();
        let pipeline = builder.end_pipeline().unwrap();

        let vertices = renderer.create_vertex_buffer(12).unwrap();
        renderer.upload_vertex_buffer(vertices, &[0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 0.5, 0.0]).unwrap();
        let indices = renderer.create_index_buffer(4).unwrap();
        renderer.upload_index_buffer(indices, &[0, 1, 2, 3]).unwrap();

        renderer.begin_frame().unwrap();
        renderer.bind_pipeline(pipeline).unwrap();
        renderer.bind_vertex_buffer(vertices).unwrap();
        renderer.bind_index_buffer(indices).unwrap();
        renderer.draw_triangle_strip(0, 4).unwrap();
        renderer.end_frame().unwrap();

        let image = renderer.backend().read_target().unwrap();
        assert_eq!(image.dimensions(), (8, 8));
        // Covered: white added onto the (0, 0, 1, 0) clear color saturates every channel
        assert_eq!(image.get_pixel(5, 3).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(1, 6).0, [0, 0, 255, 0]);
    }

    #[test]
    fn test_invalid_wgsl_is_a_compile_error() {
        let Some(mut backend) = headless(1, 1) else {
            return;
        };
        let err = backend.compile_shader(ShaderStage::Vertex, "fn vs_main( {").unwrap_err();
        assert!(matches!(err, BackendError::Validation(_)), "{err}");
    }
}
