//! Pipeline assembly and GPU resource management
//!
//! pipeforge lets an application describe a rendering pipeline through an imperative builder
//! (constants, samplers, vertex inputs, interpolated values and shader-body statements), compiles
//! the description into shading-language source for the active backend, links it, and manages the
//! buffers and textures used to draw with it.
//!
//! ```no_run
//! use pipeforge::backend::{RecordingBackend, Viewport};
//! use pipeforge::shader::{Semantic, ShaderType};
//! use pipeforge::{Renderer, RendererConfig};
//!
//! # fn main() -> Result<(), pipeforge::RenderError> {
//! let mut renderer = Renderer::new(RecordingBackend::default(), RendererConfig::default());
//! renderer.reinit(Viewport::new(640, 480));
//!
//! let mut builder = renderer.begin_pipeline()?;
//! builder.add_vertex_shader_input(ShaderType::Vec3, "a_pos", Semantic::Position0)?;
//! builder.add_pixel_shader_input(ShaderType::Vec4, "v_pos", Semantic::ClipPosition)?;
//! builder.begin_vertex_shader()?;
//! builder.assign_output("v_pos", "vec4(a_pos, 1.0)")?;
//! builder.end_vertex_shader()?;
//! builder.begin_pixel_shader()?;
//! builder.return_color("vec4(1.0, 1.0, 1.0, 1.0)")?;
//! builder.end_pixel_shader()?;
//! let pipeline = builder.end_pipeline()?;
//!
//! let indices = renderer.create_index_buffer(4)?;
//! renderer.upload_index_buffer(indices, &[0, 1, 2, 3])?;
//! renderer.begin_frame()?;
//! renderer.bind_pipeline(pipeline)?;
//! renderer.bind_index_buffer(indices)?;
//! renderer.draw_triangle_strip(0, 4)?;
//! renderer.end_frame()?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod pixels;
pub mod pool;
pub mod renderer;
pub mod shader;

pub use backend::GraphicsBackend;
pub use config::RendererConfig;
pub use error::{AssemblyError, BackendError, ConfigError, RenderError};
pub use pixels::PixelSource;
pub use renderer::{ConstantBufferHandle, IndexBufferHandle, PipelineBuilder, PipelineHandle, Renderer, ResourceCounts, TextureHandle, VertexBufferHandle};
