//! Graphics backend abstraction
//!
//! The renderer drives the GPU exclusively through [`GraphicsBackend`]. A backend owns its native
//! objects and hands out opaque handles for them; the renderer stores those handles in its resource
//! pools and gives them back for binding and destruction.
//!
//! Two backends are provided:
//! - [`RecordingBackend`]: records every call as a [`Command`], with injectable failures
//! - [`WgpuBackend`]: renders into an offscreen RGBA8 target through wgpu

mod recording;
mod wgpu_backend;

pub use recording::{Command, ObjectId, RecordingBackend};
pub use wgpu_backend::{WgpuBackend, WgpuBuffer, WgpuProgram, WgpuShader, WgpuTexture};

use crate::error::BackendError;
use crate::shader::{ConstantLayout, ShaderLanguage, ShaderStage, ShaderType, VertexLayout};

/// Buffer roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Constant,
}

/// Rectangle of the render target that draws are mapped to
///
/// The origin is the bottom-left corner of the target and `y` grows upwards, on every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Creates a viewport covering a `width x height` target from its origin
    pub fn new(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }
}

/// Everything a backend needs to know about a pipeline to link it
#[derive(Debug, Clone, Copy)]
pub struct ProgramInterface<'a> {
    pub vertex_layout: &'a VertexLayout,
    pub constant_layout: &'a ConstantLayout,
    /// Sampler names in declaration order
    pub samplers: &'a [String],
}

/// Operations the renderer needs from a graphics API
///
/// Calls are synchronous and issued from a single thread. Operations that cannot fail on a valid
/// handle have no error return; handles are always ones this backend produced and has not yet
/// destroyed.
pub trait GraphicsBackend {
    type Shader;
    type Program;
    type Buffer;
    type Texture;

    /// Shading language accepted by [`compile_shader`](Self::compile_shader)
    fn language(&self) -> ShaderLanguage;

    /// Compiles one stage
    ///
    /// # Errors
    /// Returns the compiler diagnostic on failure; no object is left behind
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<Self::Shader, BackendError>;
    fn destroy_shader(&mut self, shader: Self::Shader);

    /// Links two compiled stages into a program and creates its vertex input state
    ///
    /// # Errors
    /// Returns the linker diagnostic on failure; the stages stay owned by the caller
    fn link_program(&mut self, vertex: &Self::Shader, fragment: &Self::Shader, interface: &ProgramInterface<'_>) -> Result<Self::Program, BackendError>;
    fn destroy_program(&mut self, program: Self::Program);

    /// Makes `program` the current program without touching vertex input state
    fn use_program(&mut self, program: &Self::Program);

    /// Points a sampler of `program` at a texture bind unit
    fn set_sampler_unit(&mut self, program: &mut Self::Program, sampler: &str, unit: u32);

    fn create_buffer(&mut self, kind: BufferKind, byte_size: usize) -> Result<Self::Buffer, BackendError>;
    fn upload_buffer(&mut self, buffer: &Self::Buffer, data: &[u8]);
    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    fn create_texture(&mut self, width: u32, height: u32, mip_levels: u32) -> Result<Self::Texture, BackendError>;
    /// Replaces one mip level with RGBA8 pixels of exactly that level's size
    fn upload_texture(&mut self, texture: &Self::Texture, mip_level: u32, width: u32, height: u32, pixels: &[u8]);
    fn destroy_texture(&mut self, texture: Self::Texture);

    fn set_viewport(&mut self, viewport: Viewport);

    /// Starts a frame: clears the target and enables additive blending
    fn begin_frame(&mut self, clear_color: [f32; 4]);
    /// Flushes everything issued since [`begin_frame`](Self::begin_frame)
    fn end_frame(&mut self) -> Result<(), BackendError>;

    /// Makes `program` current together with its vertex input state
    fn bind_program(&mut self, program: &Self::Program);
    /// Feeds the current program's vertex inputs from `buffer` using `layout`
    fn bind_vertex_buffer(&mut self, buffer: &Self::Buffer, layout: &VertexLayout);
    fn bind_index_buffer(&mut self, buffer: &Self::Buffer);
    fn bind_constant_buffer(&mut self, buffer: &Self::Buffer);

    /// Selects the texture unit that [`bind_texture`](Self::bind_texture) attaches to
    fn set_active_texture_unit(&mut self, unit: u32);
    fn bind_texture(&mut self, texture: &Self::Texture);

    /// Writes one constant of `program`'s constant block into `buffer`
    fn update_constant(&mut self, program: &Self::Program, buffer: &Self::Buffer, name: &str, ty: ShaderType, data: &[f32]) -> Result<(), BackendError>;

    /// Draws `count` 16-bit indices from the bound index buffer, starting at index `offset`, as a
    /// triangle strip
    fn draw_triangle_strip(&mut self, offset: u32, count: u32);
}
