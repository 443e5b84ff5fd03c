//! Buffer, texture and constant operations

use super::{Buffer, ConstantBufferHandle, IndexBufferHandle, PipelineHandle, Renderer, Texture, TextureHandle, VertexBufferHandle};
use crate::backend::{BufferKind, GraphicsBackend};
use crate::error::RenderError;
use crate::pixels::{PixelSource, mip_level_size};
use crate::pool::ResourceKind;
use crate::shader::ShaderType;
use crate::shader::layout::FLOAT_SIZE;

impl<B: GraphicsBackend> Renderer<B> {
    /// Creates a vertex buffer holding `float_count` floats
    pub fn create_vertex_buffer(&mut self, float_count: usize) -> Result<VertexBufferHandle, RenderError> {
        let slot = self.vertex_buffers.reserve()?;
        match self.backend.create_buffer(BufferKind::Vertex, float_count * FLOAT_SIZE) {
            Ok(handle) => {
                self.vertex_buffers.fill(slot, Buffer { handle, size: float_count })?;
                tracing::debug!(%slot, float_count, "vertex buffer created");
                Ok(VertexBufferHandle(slot))
            }
            Err(err) => {
                self.vertex_buffers.free(slot)?;
                Err(err.into())
            }
        }
    }

    /// Replaces the contents of a vertex buffer
    ///
    /// # Errors
    /// Returns [`RenderError::BufferOverflow`] if `data` holds more floats than the buffer was created with
    pub fn upload_vertex_buffer(&mut self, buffer: VertexBufferHandle, data: &[f32]) -> Result<(), RenderError> {
        let b = self.vertex_buffers.get(buffer.0)?;
        check_fits(ResourceKind::VertexBuffer, b.size, data.len())?;
        self.backend.upload_buffer(&b.handle, bytemuck::cast_slice(data));
        Ok(())
    }

    pub fn destroy_vertex_buffer(&mut self, buffer: VertexBufferHandle) -> Result<(), RenderError> {
        if let Some(b) = self.vertex_buffers.free(buffer.0)? {
            self.backend.destroy_buffer(b.handle);
        }
        if self.bindings.vertex_buffer == Some(buffer) {
            self.bindings.vertex_buffer = None;
        }
        Ok(())
    }

    /// Creates an index buffer holding `index_count` 16-bit indices
    pub fn create_index_buffer(&mut self, index_count: usize) -> Result<IndexBufferHandle, RenderError> {
        let slot = self.index_buffers.reserve()?;
        match self.backend.create_buffer(BufferKind::Index, index_count * std::mem::size_of::<u16>()) {
            Ok(handle) => {
                self.index_buffers.fill(slot, Buffer { handle, size: index_count })?;
                tracing::debug!(%slot, index_count, "index buffer created");
                Ok(IndexBufferHandle(slot))
            }
            Err(err) => {
                self.index_buffers.free(slot)?;
                Err(err.into())
            }
        }
    }

    /// Replaces the contents of an index buffer
    ///
    /// # Errors
    /// Returns [`RenderError::BufferOverflow`] if `data` holds more indices than the buffer was created with
    pub fn upload_index_buffer(&mut self, buffer: IndexBufferHandle, data: &[u16]) -> Result<(), RenderError> {
        let b = self.index_buffers.get(buffer.0)?;
        check_fits(ResourceKind::IndexBuffer, b.size, data.len())?;
        self.backend.upload_buffer(&b.handle, bytemuck::cast_slice(data));
        Ok(())
    }

    pub fn destroy_index_buffer(&mut self, buffer: IndexBufferHandle) -> Result<(), RenderError> {
        if let Some(b) = self.index_buffers.free(buffer.0)? {
            self.backend.destroy_buffer(b.handle);
        }
        if self.bindings.index_buffer == Some(buffer) {
            self.bindings.index_buffer = None;
        }
        Ok(())
    }

    /// Creates a constant buffer of `byte_size` bytes
    ///
    /// A constant buffer stores the values written by [`update_constant`](Self::update_constant) at the
    /// offsets of the pipeline's constant block.
    pub fn create_constant_buffer(&mut self, byte_size: usize) -> Result<ConstantBufferHandle, RenderError> {
        let slot = self.constant_buffers.reserve()?;
        match self.backend.create_buffer(BufferKind::Constant, byte_size) {
            Ok(handle) => {
                self.constant_buffers.fill(slot, Buffer { handle, size: byte_size })?;
                tracing::debug!(%slot, byte_size, "constant buffer created");
                Ok(ConstantBufferHandle(slot))
            }
            Err(err) => {
                self.constant_buffers.free(slot)?;
                Err(err.into())
            }
        }
    }

    pub fn destroy_constant_buffer(&mut self, buffer: ConstantBufferHandle) -> Result<(), RenderError> {
        if let Some(b) = self.constant_buffers.free(buffer.0)? {
            self.backend.destroy_buffer(b.handle);
        }
        if self.bindings.constant_buffer == Some(buffer) {
            self.bindings.constant_buffer = None;
        }
        Ok(())
    }

    /// Writes one named constant of a pipeline
    ///
    /// # Arguments
    /// * `pipeline` - Pipeline declaring the constant
    /// * `buffer` - Constant buffer receiving the value
    /// * `name` - Name the constant was declared with
    /// * `data` - Component values; matrices are column-major
    ///
    /// # Errors
    /// - [`RenderError::UnknownConstant`] if the pipeline declares no constant `name`; the backend is not called
    /// - [`RenderError::UnsupportedConstantType`] for samplers, `mat2` and `mat3`
    /// - [`RenderError::ConstantSizeMismatch`] if `data` does not hold exactly one value of the declared type
    /// - [`RenderError::BufferOverflow`] if the constant lies past the end of `buffer`
    pub fn update_constant(&mut self, pipeline: PipelineHandle, buffer: ConstantBufferHandle, name: &str, data: &[f32]) -> Result<(), RenderError> {
        let p = self.pipelines.get(pipeline.0)?;
        let b = self.constant_buffers.get(buffer.0)?;

        let Some(uniform) = p.desc.uniforms.iter().find(|uniform| uniform.name == name) else {
            tracing::warn!(%pipeline, name, "update of an undeclared constant");
            return Err(RenderError::UnknownConstant { name: name.to_string() });
        };
        let ty = match uniform.constant_type() {
            Some(ty @ (ShaderType::Float | ShaderType::Vec2 | ShaderType::Vec3 | ShaderType::Vec4 | ShaderType::Mat4)) => ty,
            _ => {
                return Err(RenderError::UnsupportedConstantType {
                    name: name.to_string(),
                    type_name: uniform.type_name(),
                });
            }
        };
        if data.len() != ty.components() {
            return Err(RenderError::ConstantSizeMismatch {
                name: name.to_string(),
                expected: ty.components(),
                actual: data.len(),
            });
        }
        if let Some(field) = p.constant_layout.field(name) {
            let end = field.offset + data.len() * FLOAT_SIZE;
            check_fits(ResourceKind::ConstantBuffer, b.size, end)?;
        }

        self.backend.update_constant(&p.program, &b.handle, name, ty, data)?;
        Ok(())
    }

    /// Creates a 2D RGBA8 texture with a mip chain of `mip_levels` levels
    pub fn create_texture(&mut self, width: u32, height: u32, mip_levels: u32) -> Result<TextureHandle, RenderError> {
        let slot = self.textures.reserve()?;
        let mip_levels = mip_levels.max(1);
        match self.backend.create_texture(width, height, mip_levels) {
            Ok(handle) => {
                self.textures.fill(
                    slot,
                    Texture {
                        handle,
                        width,
                        height,
                        mip_levels,
                    },
                )?;
                tracing::debug!(%slot, width, height, mip_levels, "texture created");
                Ok(TextureHandle(slot))
            }
            Err(err) => {
                self.textures.free(slot)?;
                Err(err.into())
            }
        }
    }

    /// Replaces one mip level of a texture
    ///
    /// # Arguments
    /// * `texture` - The texture to write
    /// * `mip_level` - Level index, 0 being full size
    /// * `image` - Pixels exactly the size of that level
    ///
    /// # Errors
    /// Returns [`RenderError::MipLevelOutOfRange`] or [`RenderError::TextureSizeMismatch`] without touching the texture
    pub fn upload_texture(&mut self, texture: TextureHandle, mip_level: u32, image: &impl PixelSource) -> Result<(), RenderError> {
        let t = self.textures.get(texture.0)?;
        if mip_level >= t.mip_levels {
            return Err(RenderError::MipLevelOutOfRange { level: mip_level, levels: t.mip_levels });
        }

        let (expected_width, expected_height) = mip_level_size(t.width, t.height, mip_level);
        if (image.width(), image.height()) != (expected_width, expected_height) {
            return Err(RenderError::TextureSizeMismatch {
                level: mip_level,
                expected_width,
                expected_height,
                actual_width: image.width(),
                actual_height: image.height(),
            });
        }

        let pixels = image.pixels();
        let expected_len = expected_width as usize * expected_height as usize * 4;
        if pixels.len() != expected_len {
            return Err(RenderError::BufferOverflow {
                kind: ResourceKind::Texture,
                capacity: expected_len,
                actual: pixels.len(),
            });
        }

        self.backend.upload_texture(&t.handle, mip_level, expected_width, expected_height, pixels);
        Ok(())
    }

    pub fn destroy_texture(&mut self, texture: TextureHandle) -> Result<(), RenderError> {
        if let Some(t) = self.textures.free(texture.0)? {
            self.backend.destroy_texture(t.handle);
        }
        self.bindings.textures.retain(|_, bound| *bound != texture);
        Ok(())
    }
}

fn check_fits(kind: ResourceKind, capacity: usize, actual: usize) -> Result<(), RenderError> {
    if actual > capacity {
        tracing::warn!(%kind, capacity, actual, "upload larger than the resource");
        return Err(RenderError::BufferOverflow { kind, capacity, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::build_quad;
    use super::*;
    use crate::backend::{Command, RecordingBackend, Viewport};
    use crate::config::RendererConfig;
    use crate::shader::Semantic;

    fn renderer() -> Renderer<RecordingBackend> {
        let mut renderer = Renderer::new(RecordingBackend::default(), RendererConfig::default());
        renderer.reinit(Viewport::new(64, 64));
        renderer
    }

    /// Builds a pipeline declaring one constant of every type plus a sampler
    fn constants_pipeline(renderer: &mut Renderer<RecordingBackend>) -> PipelineHandle {
        let mut builder = renderer.begin_pipeline().unwrap();
        for (ty, name) in [
            (ShaderType::Float, "u_float"),
            (ShaderType::Vec2, "u_vec2"),
            (ShaderType::Vec3, "u_vec3"),
            (ShaderType::Vec4, "u_vec4"),
            (ShaderType::Mat2, "u_mat2"),
            (ShaderType::Mat3, "u_mat3"),
            (ShaderType::Mat4, "u_mat4"),
        ] {
            builder.add_constant(ty, name, "").unwrap();
        }
        builder.add_sampler("s_tex", "").unwrap();
        builder.add_vertex_shader_input(ShaderType::Vec4, "a_pos", Semantic::Position0).unwrap();
        builder.add_pixel_shader_input(ShaderType::Vec4, "v_pos", Semantic::ClipPosition).unwrap();
        builder.begin_vertex_shader().unwrap();
        builder.assign_output("v_pos", "u_mat4 * a_pos").unwrap();
        builder.end_vertex_shader().unwrap();
        builder.begin_pixel_shader().unwrap();
        builder.return_color("u_vec4").unwrap();
        builder.end_pixel_shader().unwrap();
        builder.end_pipeline().unwrap()
    }

    #[test]
    fn test_unknown_constant_makes_no_backend_call() {
        let mut renderer = renderer();
        let pipeline = build_quad(&mut renderer).unwrap();
        let constants = renderer.create_constant_buffer(64).unwrap();
        let before = renderer.backend().commands().len();

        let err = renderer.update_constant(pipeline, constants, "u_missing", &[1.0]).unwrap_err();
        assert!(matches!(err, RenderError::UnknownConstant { ref name } if name == "u_missing"));
        assert_eq!(renderer.backend().commands().len(), before);
    }

    #[test]
    fn test_update_constant_dispatch() {
        let mut renderer = renderer();
        let pipeline = constants_pipeline(&mut renderer);
        let size = renderer.constant_layout(pipeline).unwrap().size;
        let constants = renderer.create_constant_buffer(size).unwrap();

        renderer.update_constant(pipeline, constants, "u_float", &[0.5]).unwrap();
        renderer.update_constant(pipeline, constants, "u_vec3", &[1.0, 2.0, 3.0]).unwrap();
        let identity = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        renderer.update_constant(pipeline, constants, "u_mat4", &identity).unwrap();

        let updates: Vec<(String, ShaderType, usize)> = renderer
            .backend()
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::UpdateConstant { name, ty, data, .. } => Some((name.clone(), *ty, data.len())),
                _ => None,
            })
            .collect();
        assert_eq!(
            updates,
            vec![
                ("u_float".to_string(), ShaderType::Float, 1),
                ("u_vec3".to_string(), ShaderType::Vec3, 3),
                ("u_mat4".to_string(), ShaderType::Mat4, 16),
            ]
        );
    }

    #[test]
    fn test_update_constant_rejections() {
        let mut renderer = renderer();
        let pipeline = constants_pipeline(&mut renderer);
        let constants = renderer.create_constant_buffer(256).unwrap();
        let before = renderer.backend().commands().len();

        for (name, type_name) in [("u_mat2", "mat2"), ("u_mat3", "mat3"), ("s_tex", "sampler2D")] {
            let err = renderer.update_constant(pipeline, constants, name, &[0.0; 4]).unwrap_err();
            assert!(matches!(err, RenderError::UnsupportedConstantType { type_name: t, .. } if t == type_name), "{err}");
        }

        let err = renderer.update_constant(pipeline, constants, "u_vec2", &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            err,
            RenderError::ConstantSizeMismatch {
                expected: 2,
                actual: 3,
                ..
            }
        ));

        let small = renderer.create_constant_buffer(4).unwrap();
        let err = renderer.update_constant(pipeline, small, "u_mat4", &[0.0; 16]).unwrap_err();
        assert!(matches!(err, RenderError::BufferOverflow { kind: ResourceKind::ConstantBuffer, capacity: 4, .. }));

        // Only the creation of `small` reached the backend
        assert_eq!(renderer.backend().commands().len(), before + 1);
    }

    #[test]
    fn test_upload_overflow() {
        let mut renderer = renderer();
        let vertices = renderer.create_vertex_buffer(3).unwrap();
        let indices = renderer.create_index_buffer(2).unwrap();

        assert!(matches!(
            renderer.upload_vertex_buffer(vertices, &[0.0; 4]),
            Err(RenderError::BufferOverflow {
                kind: ResourceKind::VertexBuffer,
                capacity: 3,
                actual: 4
            })
        ));
        assert!(matches!(
            renderer.upload_index_buffer(indices, &[0, 1, 2]),
            Err(RenderError::BufferOverflow {
                kind: ResourceKind::IndexBuffer,
                capacity: 2,
                actual: 3
            })
        ));

        renderer.upload_vertex_buffer(vertices, &[1.0, 2.0]).unwrap();
        renderer.upload_index_buffer(indices, &[7, 8]).unwrap();
        let uploads: Vec<Vec<u8>> = renderer
            .backend()
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::UploadBuffer { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(uploads[0], bytemuck::cast_slice::<f32, u8>(&[1.0, 2.0]));
        assert_eq!(uploads[1], vec![7, 0, 8, 0]);
    }

    #[test]
    fn test_buffer_sizes_reach_backend_in_bytes() {
        let mut renderer = renderer();
        renderer.create_vertex_buffer(12).unwrap();
        renderer.create_index_buffer(4).unwrap();
        renderer.create_constant_buffer(80).unwrap();
        let sizes: Vec<(BufferKind, usize)> = renderer
            .backend()
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::CreateBuffer { kind, byte_size, .. } => Some((*kind, *byte_size)),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![(BufferKind::Vertex, 48), (BufferKind::Index, 8), (BufferKind::Constant, 80)]);
    }

    #[test]
    fn test_texture_upload_checks_mip_size() {
        let mut renderer = renderer();
        let texture = renderer.create_texture(16, 8, 3).unwrap();

        renderer.upload_texture(texture, 0, &image::RgbaImage::new(16, 8)).unwrap();
        renderer.upload_texture(texture, 2, &image::RgbaImage::new(4, 2)).unwrap();

        assert!(matches!(
            renderer.upload_texture(texture, 1, &image::RgbaImage::new(16, 8)),
            Err(RenderError::TextureSizeMismatch {
                level: 1,
                expected_width: 8,
                expected_height: 4,
                actual_width: 16,
                actual_height: 8
            })
        ));
        assert!(matches!(
            renderer.upload_texture(texture, 3, &image::RgbaImage::new(2, 1)),
            Err(RenderError::MipLevelOutOfRange { level: 3, levels: 3 })
        ));

        let uploads = renderer.backend().commands().iter().filter(|command| matches!(command, Command::UploadTexture { .. })).count();
        assert_eq!(uploads, 2);
    }

    #[test]
    fn test_destroy_clears_bindings() {
        let mut renderer = renderer();
        let pipeline = build_quad(&mut renderer).unwrap();
        let vertices = renderer.create_vertex_buffer(12).unwrap();
        let indices = renderer.create_index_buffer(4).unwrap();
        let texture = renderer.create_texture(2, 2, 1).unwrap();

        renderer.bind_pipeline(pipeline).unwrap();
        renderer.bind_vertex_buffer(vertices).unwrap();
        renderer.bind_index_buffer(indices).unwrap();
        renderer.bind_texture(1, texture).unwrap();

        renderer.destroy_index_buffer(indices).unwrap();
        renderer.destroy_vertex_buffer(vertices).unwrap();
        renderer.destroy_texture(texture).unwrap();
        renderer.begin_frame().unwrap();
        assert!(matches!(renderer.draw_triangle_strip(0, 4), Err(RenderError::MissingBinding(ResourceKind::IndexBuffer))));

        renderer.destroy_pipeline(pipeline).unwrap();
        assert!(matches!(renderer.draw_triangle_strip(0, 4), Err(RenderError::MissingBinding(ResourceKind::Pipeline))));
        renderer.end_frame().unwrap();

        assert_eq!(renderer.live_resources().total(), 0);
        assert_eq!(renderer.backend().live_objects(), 0);
        assert!(matches!(renderer.destroy_texture(texture), Err(RenderError::InvalidHandle { kind: ResourceKind::Texture })));
    }

    #[test]
    fn test_pool_capacity_per_kind() {
        let config = RendererConfig {
            textures: 1,
            vertex_buffers: 1,
            ..RendererConfig::default()
        };
        let mut renderer = Renderer::new(RecordingBackend::default(), config);
        let texture = renderer.create_texture(1, 1, 1).unwrap();
        assert!(matches!(renderer.create_texture(1, 1, 1), Err(RenderError::Capacity { kind: ResourceKind::Texture, capacity: 1 })));
        renderer.create_vertex_buffer(3).unwrap();
        assert!(matches!(renderer.create_vertex_buffer(3), Err(RenderError::Capacity { kind: ResourceKind::VertexBuffer, .. })));

        renderer.destroy_texture(texture).unwrap();
        renderer.create_texture(1, 1, 1).unwrap();
    }
}
