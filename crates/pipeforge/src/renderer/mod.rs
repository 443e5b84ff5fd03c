//! The renderer: resource pools, binding state and the frame state machine
//!
//! [`Renderer`] owns one [`ResourcePool`] per resource kind and drives a [`GraphicsBackend`]. Every
//! resource is addressed through a typed handle wrapping a generation-checked [`SlotId`], so a handle
//! that outlived its resource (or a re-initialization) is rejected instead of aliasing a new one.
//!
//! Frames follow `Idle -> FrameActive -> Idle`:
//!
//! ```text
//! begin_frame -> bind_pipeline -> bind_vertex_buffer / bind_index_buffer -> draw_triangle_strip -> end_frame
//! ```

mod builder;
mod resources;

pub use builder::PipelineBuilder;

use std::collections::BTreeMap;
use std::fmt;

use crate::backend::{GraphicsBackend, Viewport};
use crate::config::RendererConfig;
use crate::error::RenderError;
use crate::pool::{ResourceKind, ResourcePool, SlotId};
use crate::shader::{ConstantLayout, PipelineDesc, ShaderSources, VertexLayout};

macro_rules! define_handle {
    ($name:ident, $kind:expr) => {
        /// Typed handle to a renderer resource
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(SlotId);

        impl $name {
            /// Resource kind this handle refers to
            pub const KIND: ResourceKind = $kind;

            /// Returns the pool slot behind this handle
            pub fn slot(&self) -> SlotId {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} {}", Self::KIND, self.0)
            }
        }
    };
}

define_handle!(PipelineHandle, ResourceKind::Pipeline);
define_handle!(VertexBufferHandle, ResourceKind::VertexBuffer);
define_handle!(IndexBufferHandle, ResourceKind::IndexBuffer);
define_handle!(ConstantBufferHandle, ResourceKind::ConstantBuffer);
define_handle!(TextureHandle, ResourceKind::Texture);

/// A compiled and linked pipeline
struct Pipeline<B: GraphicsBackend> {
    desc: PipelineDesc,
    sources: ShaderSources,
    vertex_shader: B::Shader,
    fragment_shader: B::Shader,
    program: B::Program,
    vertex_layout: VertexLayout,
    constant_layout: ConstantLayout,
    /// Bind unit of each sampler, in declaration order
    sampler_units: Vec<(String, u32)>,
}

/// A backend buffer with its declared size
///
/// The size unit depends on the pool: floats for vertex buffers, 16-bit indices for index buffers
/// and bytes for constant buffers.
struct Buffer<B: GraphicsBackend> {
    handle: B::Buffer,
    size: usize,
}

struct Texture<B: GraphicsBackend> {
    handle: B::Texture,
    width: u32,
    height: u32,
    mip_levels: u32,
}

/// Currently bound resources
#[derive(Debug, Default)]
struct Bindings {
    pipeline: Option<PipelineHandle>,
    vertex_buffer: Option<VertexBufferHandle>,
    index_buffer: Option<IndexBufferHandle>,
    constant_buffer: Option<ConstantBufferHandle>,
    /// Texture attached to each bind unit
    textures: BTreeMap<u32, TextureHandle>,
}

/// Number of live resources per pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub pipelines: usize,
    pub vertex_buffers: usize,
    pub index_buffers: usize,
    pub constant_buffers: usize,
    pub textures: usize,
}

impl ResourceCounts {
    /// Returns the number of live resources across all pools
    pub fn total(&self) -> usize {
        self.pipelines + self.vertex_buffers + self.index_buffers + self.constant_buffers + self.textures
    }
}

/// Owns every GPU resource created through it and the state needed to draw with them
///
/// All calls are synchronous and go straight to the backend on the calling thread.
pub struct Renderer<B: GraphicsBackend> {
    backend: B,
    config: RendererConfig,
    pipelines: ResourcePool<Pipeline<B>>,
    vertex_buffers: ResourcePool<Buffer<B>>,
    index_buffers: ResourcePool<Buffer<B>>,
    constant_buffers: ResourcePool<Buffer<B>>,
    textures: ResourcePool<Texture<B>>,
    bindings: Bindings,
    frame_active: bool,
    viewport: Option<Viewport>,
    first_frame_after_reinit: bool,
    reinit_count: u32,
}

impl<B: GraphicsBackend> Renderer<B> {
    /// Creates a renderer with empty pools sized by `config`
    ///
    /// The backend is not touched until the first call; use [`reinit`](Self::reinit) to set the
    /// initial viewport.
    ///
    /// # Arguments
    /// * `backend` - The graphics backend to drive
    /// * `config` - Pool capacities, assembly limits and frame defaults
    pub fn new(backend: B, config: RendererConfig) -> Self {
        tracing::debug!(language = %backend.language(), ?config, "creating renderer");
        Self {
            pipelines: ResourcePool::new(ResourceKind::Pipeline, config.pipelines),
            vertex_buffers: ResourcePool::new(ResourceKind::VertexBuffer, config.vertex_buffers),
            index_buffers: ResourcePool::new(ResourceKind::IndexBuffer, config.index_buffers),
            constant_buffers: ResourcePool::new(ResourceKind::ConstantBuffer, config.constant_buffers),
            textures: ResourcePool::new(ResourceKind::Texture, config.textures),
            backend,
            config,
            bindings: Bindings::default(),
            frame_active: false,
            viewport: None,
            first_frame_after_reinit: false,
            reinit_count: 0,
        }
    }

    /// Tears down every resource and starts over with a new viewport
    ///
    /// All handles issued so far become invalid. The next frame is reported as the first after
    /// re-initialization until it ends.
    pub fn reinit(&mut self, viewport: Viewport) {
        if self.frame_active {
            tracing::warn!("re-initializing with a frame still active; the frame is discarded");
            self.frame_active = false;
        }

        let released = self.release_all();
        self.backend.set_viewport(viewport);
        self.viewport = Some(viewport);
        self.first_frame_after_reinit = true;
        self.reinit_count += 1;
        tracing::info!(?viewport, released, reinit_count = self.reinit_count, "renderer re-initialized");
    }

    /// Changes the viewport without touching any resource
    pub fn resize(&mut self, viewport: Viewport) {
        tracing::debug!(?viewport, "viewport resized");
        self.backend.set_viewport(viewport);
        self.viewport = Some(viewport);
    }

    /// Releases every live resource in all pools and clears the bindings
    ///
    /// # Returns
    /// The number of resources released
    fn release_all(&mut self) -> usize {
        let mut released = 0;
        for pipeline in self.pipelines.clear() {
            self.release_pipeline(pipeline);
            released += 1;
        }
        for buffer in self.vertex_buffers.clear().into_iter().chain(self.index_buffers.clear()).chain(self.constant_buffers.clear()) {
            self.backend.destroy_buffer(buffer.handle);
            released += 1;
        }
        for texture in self.textures.clear() {
            self.backend.destroy_texture(texture.handle);
            released += 1;
        }
        self.bindings = Bindings::default();
        released
    }

    fn release_pipeline(&mut self, pipeline: Pipeline<B>) {
        self.backend.destroy_program(pipeline.program);
        self.backend.destroy_shader(pipeline.vertex_shader);
        self.backend.destroy_shader(pipeline.fragment_shader);
    }

    /// Starts a frame
    ///
    /// Clears the target to the configured color and enables additive blending.
    ///
    /// # Errors
    /// Returns [`RenderError::FrameAlreadyActive`] if the previous frame was not ended
    pub fn begin_frame(&mut self) -> Result<(), RenderError> {
        if self.frame_active {
            return Err(RenderError::FrameAlreadyActive);
        }
        self.backend.begin_frame(self.config.clear_color);
        self.frame_active = true;
        tracing::trace!("frame started");
        Ok(())
    }

    /// Ends the frame and flushes everything issued since [`begin_frame`](Self::begin_frame)
    ///
    /// # Errors
    /// Returns [`RenderError::FrameNotActive`] outside a frame, or the backend's flush error
    pub fn end_frame(&mut self) -> Result<(), RenderError> {
        if !self.frame_active {
            return Err(RenderError::FrameNotActive);
        }
        self.frame_active = false;
        self.first_frame_after_reinit = false;
        self.backend.end_frame()?;
        tracing::trace!("frame ended");
        Ok(())
    }

    /// Returns true between [`begin_frame`](Self::begin_frame) and [`end_frame`](Self::end_frame)
    pub fn is_frame_active(&self) -> bool {
        self.frame_active
    }

    /// Activates a pipeline's program and vertex input state
    pub fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), RenderError> {
        let p = self.pipelines.get(pipeline.0)?;
        self.backend.bind_program(&p.program);
        self.bindings.pipeline = Some(pipeline);
        Ok(())
    }

    /// Binds a vertex buffer and wires it to the inputs of the bound pipeline
    ///
    /// Attribute offsets and stride are taken from whichever pipeline is bound at the time of this
    /// call, so bind the pipeline first. Without a bound pipeline the buffer is bound with no input
    /// wiring.
    pub fn bind_vertex_buffer(&mut self, buffer: VertexBufferHandle) -> Result<(), RenderError> {
        let b = self.vertex_buffers.get(buffer.0)?;
        match self.bindings.pipeline.and_then(|p| self.pipelines.get(p.0).ok()) {
            Some(pipeline) => self.backend.bind_vertex_buffer(&b.handle, &pipeline.vertex_layout),
            None => {
                tracing::warn!(%buffer, "vertex buffer bound without a pipeline; attributes are not wired");
                self.backend.bind_vertex_buffer(&b.handle, &VertexLayout::default());
            }
        }
        self.bindings.vertex_buffer = Some(buffer);
        Ok(())
    }

    pub fn bind_index_buffer(&mut self, buffer: IndexBufferHandle) -> Result<(), RenderError> {
        let b = self.index_buffers.get(buffer.0)?;
        self.backend.bind_index_buffer(&b.handle);
        self.bindings.index_buffer = Some(buffer);
        Ok(())
    }

    pub fn bind_constant_buffer(&mut self, buffer: ConstantBufferHandle) -> Result<(), RenderError> {
        let b = self.constant_buffers.get(buffer.0)?;
        self.backend.bind_constant_buffer(&b.handle);
        self.bindings.constant_buffer = Some(buffer);
        Ok(())
    }

    /// Attaches a texture to a bind unit
    ///
    /// Unit 0 is left as the active unit afterwards.
    ///
    /// # Arguments
    /// * `unit` - Bind unit, matching the unit recorded for a sampler
    /// * `texture` - The texture to attach
    pub fn bind_texture(&mut self, unit: u32, texture: TextureHandle) -> Result<(), RenderError> {
        let t = self.textures.get(texture.0)?;
        self.backend.set_active_texture_unit(unit);
        self.backend.bind_texture(&t.handle);
        self.backend.set_active_texture_unit(0);
        self.bindings.textures.insert(unit, texture);
        Ok(())
    }

    /// Draws `count` indices of the bound index buffer, starting at index `offset`, as a triangle strip
    ///
    /// # Errors
    /// - [`RenderError::FrameNotActive`] outside a frame
    /// - [`RenderError::MissingBinding`] without a bound pipeline or index buffer
    /// - [`RenderError::BufferOverflow`] if the range runs past the end of the index buffer
    pub fn draw_triangle_strip(&mut self, offset: u32, count: u32) -> Result<(), RenderError> {
        if !self.frame_active {
            return Err(RenderError::FrameNotActive);
        }
        if self.bindings.pipeline.is_none() {
            return Err(RenderError::MissingBinding(ResourceKind::Pipeline));
        }
        let Some(index_buffer) = self.bindings.index_buffer else {
            return Err(RenderError::MissingBinding(ResourceKind::IndexBuffer));
        };

        let indices = self.index_buffers.get(index_buffer.0)?;
        let end = offset as usize + count as usize;
        if end > indices.size {
            return Err(RenderError::BufferOverflow {
                kind: ResourceKind::IndexBuffer,
                capacity: indices.size,
                actual: end,
            });
        }

        self.backend.draw_triangle_strip(offset, count);
        Ok(())
    }

    /// Returns the generated source text of a pipeline
    pub fn pipeline_sources(&self, pipeline: PipelineHandle) -> Result<&ShaderSources, RenderError> {
        Ok(&self.pipelines.get(pipeline.0)?.sources)
    }

    /// Returns the description a pipeline was built from
    pub fn pipeline_desc(&self, pipeline: PipelineHandle) -> Result<&PipelineDesc, RenderError> {
        Ok(&self.pipelines.get(pipeline.0)?.desc)
    }

    /// Returns the bind unit assigned to each sampler of a pipeline, in declaration order
    pub fn sampler_units(&self, pipeline: PipelineHandle) -> Result<&[(String, u32)], RenderError> {
        Ok(&self.pipelines.get(pipeline.0)?.sampler_units)
    }

    /// Returns the vertex layout a pipeline reads its vertex buffer with
    pub fn vertex_layout(&self, pipeline: PipelineHandle) -> Result<&VertexLayout, RenderError> {
        Ok(&self.pipelines.get(pipeline.0)?.vertex_layout)
    }

    /// Returns the layout of a pipeline's constant block
    pub fn constant_layout(&self, pipeline: PipelineHandle) -> Result<&ConstantLayout, RenderError> {
        Ok(&self.pipelines.get(pipeline.0)?.constant_layout)
    }

    /// Returns true until the first frame after the last [`reinit`](Self::reinit) has ended
    pub fn is_first_frame_after_reinit(&self) -> bool {
        self.first_frame_after_reinit
    }

    /// Returns how many times [`reinit`](Self::reinit) has been called
    pub fn reinit_count(&self) -> u32 {
        self.reinit_count
    }

    /// Returns the viewport set by the last [`reinit`](Self::reinit) or [`resize`](Self::resize)
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Returns the number of live resources per pool
    pub fn live_resources(&self) -> ResourceCounts {
        ResourceCounts {
            pipelines: self.pipelines.len(),
            vertex_buffers: self.vertex_buffers.len(),
            index_buffers: self.index_buffers.len(),
            constant_buffers: self.constant_buffers.len(),
            textures: self.textures.len(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: GraphicsBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        let released = self.release_all();
        if released > 0 {
            tracing::debug!(released, "renderer dropped with live resources");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, RecordingBackend};
    use crate::shader::{Semantic, ShaderLanguage, ShaderType};

    /// Builds the reference quad pipeline: a vec3 position copied into the clip position, white output
    pub(crate) fn build_quad(renderer: &mut Renderer<RecordingBackend>) -> Result<PipelineHandle, RenderError> {
        let mut builder = renderer.begin_pipeline()?;
        builder.add_vertex_shader_input(ShaderType::Vec3, "a_pos", Semantic::Position0)?;
        builder.add_pixel_shader_input(ShaderType::Vec4, "v_pos", Semantic::ClipPosition)?;
        builder.begin_vertex_shader()?;
        builder.assign_input(Some(ShaderType::Vec3), "pos", "a_pos")?;
        builder.assign_output("v_pos", "vec4(pos.x, pos.y, pos.z, 1.0)")?;
        builder.end_vertex_shader()?;
        builder.begin_pixel_shader()?;
        builder.return_color("vec4(1.0, 1.0, 1.0, 1.0)")?;
        builder.end_pixel_shader()?;
        builder.end_pipeline()
    }

    fn renderer() -> Renderer<RecordingBackend> {
        let mut renderer = Renderer::new(RecordingBackend::default(), RendererConfig::default());
        renderer.reinit(Viewport::new(640, 480));
        renderer
    }

    fn draws(renderer: &Renderer<RecordingBackend>) -> Vec<(u32, u32)> {
        renderer
            .backend()
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::DrawTriangleStrip { offset, count } => Some((*offset, *count)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_quad_end_to_end() {
        let mut renderer = renderer();
        let pipeline = build_quad(&mut renderer).unwrap();

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

        assert_eq!(draws(&renderer), vec![(0, 4)]);

        let wiring = renderer.backend().commands().iter().find_map(|command| match command {
            Command::BindVertexBuffer { stride, offsets, .. } => Some((*stride, offsets.clone())),
            _ => None,
        });
        assert_eq!(wiring, Some((12, vec![0])));

        let sources = renderer.pipeline_sources(pipeline).unwrap();
        assert_eq!(sources.language, ShaderLanguage::Glsl);
        assert!(sources.vertex.contains("gl_Position = vec4(pos.x, pos.y, pos.z, 1.0);"));
        assert!(!sources.vertex.contains("varying vec4 v_pos;"));
        assert!(sources.fragment.contains("gl_FragColor = vec4(1.0, 1.0, 1.0, 1.0);"));
    }

    #[test]
    fn test_frame_uses_configured_clear_color() {
        let config = RendererConfig {
            clear_color: [0.25, 0.5, 0.75, 1.0],
            ..RendererConfig::default()
        };
        let mut renderer = Renderer::new(RecordingBackend::default(), config);
        renderer.begin_frame().unwrap();
        assert!(renderer.backend().commands().contains(&Command::BeginFrame { clear_color: [0.25, 0.5, 0.75, 1.0] }));
    }

    #[test]
    fn test_frame_state_errors() {
        let mut renderer = renderer();
        assert!(matches!(renderer.end_frame(), Err(RenderError::FrameNotActive)));
        assert!(matches!(renderer.draw_triangle_strip(0, 4), Err(RenderError::FrameNotActive)));

        renderer.begin_frame().unwrap();
        assert!(renderer.is_frame_active());
        assert!(matches!(renderer.begin_frame(), Err(RenderError::FrameAlreadyActive)));
        renderer.end_frame().unwrap();
        assert!(!renderer.is_frame_active());
    }

    #[test]
    fn test_draw_requires_pipeline_and_index_buffer() {
        let mut renderer = renderer();
        let pipeline = build_quad(&mut renderer).unwrap();
        let indices = renderer.create_index_buffer(4).unwrap();

        renderer.begin_frame().unwrap();
        assert!(matches!(renderer.draw_triangle_strip(0, 4), Err(RenderError::MissingBinding(ResourceKind::Pipeline))));
        renderer.bind_pipeline(pipeline).unwrap();
        assert!(matches!(renderer.draw_triangle_strip(0, 4), Err(RenderError::MissingBinding(ResourceKind::IndexBuffer))));
        renderer.bind_index_buffer(indices).unwrap();
        assert!(matches!(
            renderer.draw_triangle_strip(2, 4),
            Err(RenderError::BufferOverflow {
                kind: ResourceKind::IndexBuffer,
                capacity: 4,
                actual: 6
            })
        ));
        renderer.draw_triangle_strip(1, 3).unwrap();
        renderer.end_frame().unwrap();

        assert_eq!(draws(&renderer), vec![(1, 3)]);
    }

    #[test]
    fn test_vertex_buffer_without_pipeline_is_not_wired() {
        let mut renderer = renderer();
        let vertices = renderer.create_vertex_buffer(12).unwrap();
        renderer.bind_vertex_buffer(vertices).unwrap();
        assert!(matches!(
            renderer.backend().commands().last(),
            Some(Command::BindVertexBuffer { stride: 0, offsets, .. }) if offsets.is_empty()
        ));
    }

    #[test]
    fn test_bind_texture_restores_unit_zero() {
        let mut renderer = renderer();
        let texture = renderer.create_texture(4, 4, 1).unwrap();
        renderer.backend_mut().take_commands();

        renderer.bind_texture(2, texture).unwrap();
        let commands = renderer.backend().commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], Command::ActiveTextureUnit(2));
        assert!(matches!(commands[1], Command::BindTexture { .. }));
        assert_eq!(commands[2], Command::ActiveTextureUnit(0));
    }

    #[test]
    fn test_reinit_empties_pools_and_invalidates_handles() {
        let mut renderer = renderer();
        let pipeline = build_quad(&mut renderer).unwrap();
        let vertices = renderer.create_vertex_buffer(12).unwrap();
        let indices = renderer.create_index_buffer(4).unwrap();
        let constants = renderer.create_constant_buffer(64).unwrap();
        let texture = renderer.create_texture(8, 8, 4).unwrap();
        assert_eq!(renderer.live_resources().total(), 5);
        assert!(renderer.backend().live_objects() > 0);

        renderer.end_frame().unwrap_err();
        renderer.begin_frame().unwrap();
        renderer.end_frame().unwrap();
        assert!(!renderer.is_first_frame_after_reinit());

        renderer.reinit(Viewport::new(320, 240));
        assert_eq!(renderer.live_resources(), ResourceCounts::default());
        assert_eq!(renderer.backend().live_objects(), 0);
        assert_eq!(renderer.reinit_count(), 2);
        assert!(renderer.is_first_frame_after_reinit());
        assert_eq!(renderer.viewport(), Some(Viewport::new(320, 240)));
        assert_eq!(renderer.backend().commands().last(), Some(&Command::SetViewport(Viewport::new(320, 240))));

        assert!(matches!(renderer.bind_pipeline(pipeline), Err(RenderError::InvalidHandle { kind: ResourceKind::Pipeline })));
        assert!(matches!(renderer.bind_vertex_buffer(vertices), Err(RenderError::InvalidHandle { .. })));
        assert!(matches!(renderer.bind_index_buffer(indices), Err(RenderError::InvalidHandle { .. })));
        assert!(matches!(renderer.bind_constant_buffer(constants), Err(RenderError::InvalidHandle { .. })));
        assert!(matches!(renderer.bind_texture(0, texture), Err(RenderError::InvalidHandle { .. })));

        // Slots are reused with a new generation
        let rebuilt = build_quad(&mut renderer).unwrap();
        assert_eq!(rebuilt.slot().index(), pipeline.slot().index());
        assert_ne!(rebuilt, pipeline);
    }

    #[test]
    fn test_reinit_discards_active_frame() {
        let mut renderer = renderer();
        renderer.begin_frame().unwrap();
        renderer.reinit(Viewport::new(1, 1));
        assert!(!renderer.is_frame_active());
        renderer.begin_frame().unwrap();
    }

    #[test]
    fn test_resize_keeps_resources() {
        let mut renderer = renderer();
        renderer.create_vertex_buffer(3).unwrap();
        renderer.resize(Viewport { x: 10, y: 20, width: 30, height: 40 });
        assert_eq!(renderer.live_resources().vertex_buffers, 1);
        assert_eq!(renderer.reinit_count(), 1);
        assert_eq!(renderer.viewport(), Some(Viewport { x: 10, y: 20, width: 30, height: 40 }));
    }

    #[test]
    fn test_handle_display() {
        let mut renderer = renderer();
        let texture = renderer.create_texture(1, 1, 1).unwrap();
        assert_eq!(texture.to_string(), "texture #0v0");
        assert_eq!(TextureHandle::KIND, ResourceKind::Texture);
    }
}
