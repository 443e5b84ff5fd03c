//! Deterministic backend that records calls instead of talking to a GPU

use std::collections::BTreeSet;

use super::{BufferKind, GraphicsBackend, ProgramInterface, Viewport};
use crate::error::BackendError;
use crate::shader::{ShaderLanguage, ShaderStage, ShaderType, VertexLayout};

/// Handle of an object created by [`RecordingBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CompileShader { id: ObjectId, stage: ShaderStage, source: String },
    DestroyShader { id: ObjectId },
    LinkProgram { id: ObjectId, vertex: ObjectId, fragment: ObjectId },
    DestroyProgram { id: ObjectId },
    UseProgram { id: ObjectId },
    SetSamplerUnit { program: ObjectId, sampler: String, unit: u32 },
    CreateBuffer { id: ObjectId, kind: BufferKind, byte_size: usize },
    UploadBuffer { id: ObjectId, data: Vec<u8> },
    DestroyBuffer { id: ObjectId },
    CreateTexture { id: ObjectId, width: u32, height: u32, mip_levels: u32 },
    UploadTexture { id: ObjectId, mip_level: u32, width: u32, height: u32 },
    DestroyTexture { id: ObjectId },
    SetViewport(Viewport),
    BeginFrame { clear_color: [f32; 4] },
    EndFrame,
    BindProgram { id: ObjectId },
    /// Vertex input wiring: stride and per-attribute offsets, in bytes
    BindVertexBuffer { id: ObjectId, stride: usize, offsets: Vec<usize> },
    BindIndexBuffer { id: ObjectId },
    BindConstantBuffer { id: ObjectId },
    ActiveTextureUnit(u32),
    BindTexture { id: ObjectId },
    UpdateConstant { program: ObjectId, buffer: ObjectId, name: String, ty: ShaderType, data: Vec<f32> },
    DrawTriangleStrip { offset: u32, count: u32 },
}

/// Backend that keeps a log of every call
///
/// Every created object gets a fresh id and stays in the live set until destroyed, so tests can
/// check that nothing leaks. Compile and link failures can be injected to exercise error paths.
#[derive(Debug)]
pub struct RecordingBackend {
    language: ShaderLanguage,
    commands: Vec<Command>,
    next_id: u32,
    live: BTreeSet<ObjectId>,
    fail_compile: Option<ShaderStage>,
    fail_link: bool,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new(ShaderLanguage::Glsl)
    }
}

impl RecordingBackend {
    /// Creates a recorder that accepts sources in `language`
    pub fn new(language: ShaderLanguage) -> Self {
        Self {
            language,
            commands: Vec::new(),
            next_id: 1,
            live: BTreeSet::new(),
            fail_compile: None,
            fail_link: false,
        }
    }

    /// Returns the commands recorded so far
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Returns and clears the recorded commands
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Returns the number of objects created and not destroyed yet
    pub fn live_objects(&self) -> usize {
        self.live.len()
    }

    /// Makes every compile of `stage` fail until cleared with `None`
    pub fn fail_compile(&mut self, stage: Option<ShaderStage>) {
        self.fail_compile = stage;
    }

    /// Makes every link fail while `fail` is set
    pub fn fail_link(&mut self, fail: bool) {
        self.fail_link = fail;
    }

    fn create(&mut self) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.live.insert(id);
        id
    }

    fn destroy(&mut self, id: ObjectId) {
        if !self.live.remove(&id) {
            tracing::warn!(id = id.0, "recording backend destroyed an unknown object");
        }
    }
}

impl GraphicsBackend for RecordingBackend {
    type Shader = ObjectId;
    type Program = ObjectId;
    type Buffer = ObjectId;
    type Texture = ObjectId;

    fn language(&self) -> ShaderLanguage {
        self.language
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ObjectId, BackendError> {
        if self.fail_compile == Some(stage) {
            return Err(BackendError::Validation(format!("0:1: injected {stage} compile failure")));
        }
        let id = self.create();
        self.commands.push(Command::CompileShader {
            id,
            stage,
            source: source.to_string(),
        });
        Ok(id)
    }

    fn destroy_shader(&mut self, shader: ObjectId) {
        self.destroy(shader);
        self.commands.push(Command::DestroyShader { id: shader });
    }

    fn link_program(&mut self, vertex: &ObjectId, fragment: &ObjectId, _interface: &ProgramInterface<'_>) -> Result<ObjectId, BackendError> {
        if self.fail_link {
            return Err(BackendError::Validation("injected link failure".to_string()));
        }
        let id = self.create();
        self.commands.push(Command::LinkProgram {
            id,
            vertex: *vertex,
            fragment: *fragment,
        });
        Ok(id)
    }

    fn destroy_program(&mut self, program: ObjectId) {
        self.destroy(program);
        self.commands.push(Command::DestroyProgram { id: program });
    }

    fn use_program(&mut self, program: &ObjectId) {
        self.commands.push(Command::UseProgram { id: *program });
    }

    fn set_sampler_unit(&mut self, program: &mut ObjectId, sampler: &str, unit: u32) {
        self.commands.push(Command::SetSamplerUnit {
            program: *program,
            sampler: sampler.to_string(),
            unit,
        });
    }

    fn create_buffer(&mut self, kind: BufferKind, byte_size: usize) -> Result<ObjectId, BackendError> {
        let id = self.create();
        self.commands.push(Command::CreateBuffer { id, kind, byte_size });
        Ok(id)
    }

    fn upload_buffer(&mut self, buffer: &ObjectId, data: &[u8]) {
        self.commands.push(Command::UploadBuffer { id: *buffer, data: data.to_vec() });
    }

    fn destroy_buffer(&mut self, buffer: ObjectId) {
        self.destroy(buffer);
        self.commands.push(Command::DestroyBuffer { id: buffer });
    }

    fn create_texture(&mut self, width: u32, height: u32, mip_levels: u32) -> Result<ObjectId, BackendError> {
        let id = self.create();
        self.commands.push(Command::CreateTexture { id, width, height, mip_levels });
        Ok(id)
    }

    fn upload_texture(&mut self, texture: &ObjectId, mip_level: u32, width: u32, height: u32, _pixels: &[u8]) {
        self.commands.push(Command::UploadTexture {
            id: *texture,
            mip_level,
            width,
            height,
        });
    }

    fn destroy_texture(&mut self, texture: ObjectId) {
        self.destroy(texture);
        self.commands.push(Command::DestroyTexture { id: texture });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.commands.push(Command::SetViewport(viewport));
    }

    fn begin_frame(&mut self, clear_color: [f32; 4]) {
        self.commands.push(Command::BeginFrame { clear_color });
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        self.commands.push(Command::EndFrame);
        Ok(())
    }

    fn bind_program(&mut self, program: &ObjectId) {
        self.commands.push(Command::BindProgram { id: *program });
    }

    fn bind_vertex_buffer(&mut self, buffer: &ObjectId, layout: &VertexLayout) {
        self.commands.push(Command::BindVertexBuffer {
            id: *buffer,
            stride: layout.stride_bytes(),
            offsets: layout.attributes.iter().map(|attribute| attribute.offset * crate::shader::layout::FLOAT_SIZE).collect(),
        });
    }

    fn bind_index_buffer(&mut self, buffer: &ObjectId) {
        self.commands.push(Command::BindIndexBuffer { id: *buffer });
    }

    fn bind_constant_buffer(&mut self, buffer: &ObjectId) {
        self.commands.push(Command::BindConstantBuffer { id: *buffer });
    }

    fn set_active_texture_unit(&mut self, unit: u32) {
        self.commands.push(Command::ActiveTextureUnit(unit));
    }

    fn bind_texture(&mut self, texture: &ObjectId) {
        self.commands.push(Command::BindTexture { id: *texture });
    }

    fn update_constant(&mut self, program: &ObjectId, buffer: &ObjectId, name: &str, ty: ShaderType, data: &[f32]) -> Result<(), BackendError> {
        self.commands.push(Command::UpdateConstant {
            program: *program,
            buffer: *buffer,
            name: name.to_string(),
            ty,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn draw_triangle_strip(&mut self, offset: u32, count: u32) {
        self.commands.push(Command::DrawTriangleStrip { offset, count });
    }
}
