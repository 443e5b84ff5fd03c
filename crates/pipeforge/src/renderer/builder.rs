//! Pipeline construction and compilation

use std::ops::{Deref, DerefMut};

use super::{Pipeline, PipelineHandle, Renderer};
use crate::backend::{GraphicsBackend, ProgramInterface};
use crate::error::{BackendError, RenderError};
use crate::pool::SlotId;
use crate::shader::{self, ConstantLayout, PipelineDesc, ShaderAssembler, ShaderStage, VertexLayout};

/// A pipeline under construction
///
/// Returned by [`Renderer::begin_pipeline`]. It dereferences to [`ShaderAssembler`], so declarations
/// and statements are issued directly on the builder. The builder holds the renderer mutably, so no
/// other renderer call can interleave with the construction.
///
/// Finish with [`end_pipeline`](Self::end_pipeline). Dropping the builder without finishing releases
/// the reserved pipeline slot.
pub struct PipelineBuilder<'r, B: GraphicsBackend> {
    renderer: &'r mut Renderer<B>,
    slot: SlotId,
    assembler: ShaderAssembler,
    finished: bool,
}

impl<B: GraphicsBackend> Renderer<B> {
    /// Starts a new pipeline
    ///
    /// # Returns
    /// A builder owning a reserved pipeline slot
    ///
    /// # Errors
    /// Returns [`RenderError::Capacity`] if the pipeline pool is full
    pub fn begin_pipeline(&mut self) -> Result<PipelineBuilder<'_, B>, RenderError> {
        let slot = self.pipelines.reserve()?;
        tracing::debug!(%slot, "pipeline construction started");
        let assembler = ShaderAssembler::new(self.config.max_declarations);
        Ok(PipelineBuilder {
            renderer: self,
            slot,
            assembler,
            finished: false,
        })
    }

    /// Destroys a pipeline and its backend program
    ///
    /// Unbinds the pipeline if it is currently bound.
    pub fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), RenderError> {
        if let Some(p) = self.pipelines.free(pipeline.0)? {
            self.release_pipeline(p);
        }
        if self.bindings.pipeline == Some(pipeline) {
            self.bindings.pipeline = None;
        }
        tracing::debug!(%pipeline, "pipeline destroyed");
        Ok(())
    }

    /// Renders, compiles and links a finished description
    ///
    /// Every backend object created along the way is released again if a later step fails.
    fn compile_pipeline(&mut self, desc: PipelineDesc) -> Result<Pipeline<B>, RenderError> {
        let sources = shader::render(&desc, self.backend.language())?;
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            let size = sources.stage(stage).len();
            if size > self.config.max_shader_source_bytes {
                tracing::error!(%stage, size, limit = self.config.max_shader_source_bytes, "generated shader source too large");
                return Err(RenderError::ShaderSourceTooLarge {
                    stage,
                    size,
                    limit: self.config.max_shader_source_bytes,
                });
            }
        }

        let vertex_shader = self.compile_stage(ShaderStage::Vertex, &sources.vertex)?;
        let fragment_shader = match self.compile_stage(ShaderStage::Fragment, &sources.fragment) {
            Ok(shader) => shader,
            Err(err) => {
                self.backend.destroy_shader(vertex_shader);
                return Err(err);
            }
        };

        let vertex_layout = VertexLayout::from_desc(&desc);
        let constant_layout = ConstantLayout::from_desc(&desc);
        let samplers: Vec<String> = desc.samplers().map(|sampler| sampler.name.clone()).collect();
        let interface = ProgramInterface {
            vertex_layout: &vertex_layout,
            constant_layout: &constant_layout,
            samplers: &samplers,
        };

        let mut program = match self.backend.link_program(&vertex_shader, &fragment_shader, &interface) {
            Ok(program) => program,
            Err(err) => {
                let log = diagnostic(err);
                tracing::error!("program link failed:\n{log}");
                self.backend.destroy_shader(vertex_shader);
                self.backend.destroy_shader(fragment_shader);
                return Err(RenderError::Link { log });
            }
        };

        // Sampler units follow declaration order among samplers only
        self.backend.use_program(&program);
        let sampler_units: Vec<(String, u32)> = samplers.into_iter().zip(0..).collect();
        for (name, unit) in &sampler_units {
            self.backend.set_sampler_unit(&mut program, name, *unit);
        }
        if let Some(bound) = self.bindings.pipeline.and_then(|p| self.pipelines.get(p.0).ok()) {
            self.backend.use_program(&bound.program);
        }

        Ok(Pipeline {
            desc,
            sources,
            vertex_shader,
            fragment_shader,
            program,
            vertex_layout,
            constant_layout,
            sampler_units,
        })
    }

    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<B::Shader, RenderError> {
        self.backend.compile_shader(stage, source).map_err(|err| {
            let log = diagnostic(err);
            tracing::error!(%stage, "shader compile failed:\n{log}\n{source}");
            RenderError::Compile { stage, log }
        })
    }
}

/// Extracts the compiler or linker message from a backend error
fn diagnostic(err: BackendError) -> String {
    match err {
        BackendError::Validation(log) => log,
        other => other.to_string(),
    }
}

impl<B: GraphicsBackend> PipelineBuilder<'_, B> {
    /// Compiles and links the pipeline
    ///
    /// The pipeline gets its sampler bind units assigned and the previously bound pipeline's program
    /// is made current again.
    ///
    /// # Returns
    /// The handle of the new pipeline
    ///
    /// # Errors
    /// Fails on an unfinished description, an oversized source, or a compile or link error. No
    /// backend object and no pool slot is left behind in that case.
    pub fn end_pipeline(mut self) -> Result<PipelineHandle, RenderError> {
        let assembler = std::mem::take(&mut self.assembler);
        let desc = assembler.finish()?;
        let pipeline = self.renderer.compile_pipeline(desc)?;
        self.renderer.pipelines.fill(self.slot, pipeline)?;
        self.finished = true;

        let handle = PipelineHandle(self.slot);
        tracing::debug!(pipeline = %handle, "pipeline linked");
        Ok(handle)
    }
}

impl<B: GraphicsBackend> Deref for PipelineBuilder<'_, B> {
    type Target = ShaderAssembler;

    fn deref(&self) -> &ShaderAssembler {
        &self.assembler
    }
}

impl<B: GraphicsBackend> DerefMut for PipelineBuilder<'_, B> {
    fn deref_mut(&mut self) -> &mut ShaderAssembler {
        &mut self.assembler
    }
}

impl<B: GraphicsBackend> Drop for PipelineBuilder<'_, B> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::debug!(slot = %self.slot, "pipeline construction abandoned");
        if let Err(err) = self.renderer.pipelines.free(self.slot) {
            tracing::warn!(slot = %self.slot, "failed to release pipeline slot: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::build_quad;
    use super::*;
    use crate::backend::{Command, RecordingBackend, Viewport};
    use crate::config::RendererConfig;
    use crate::error::AssemblyError;
    use crate::pool::ResourceKind;
    use crate::shader::{Semantic, ShaderLanguage, ShaderType};

    fn renderer_with(config: RendererConfig, backend: RecordingBackend) -> Renderer<RecordingBackend> {
        let mut renderer = Renderer::new(backend, config);
        renderer.reinit(Viewport::new(64, 64));
        renderer
    }

    fn renderer() -> Renderer<RecordingBackend> {
        renderer_with(RendererConfig::default(), RecordingBackend::default())
    }

    #[test]
    fn test_capacity_and_slot_reuse() {
        let config = RendererConfig {
            pipelines: 2,
            ..RendererConfig::default()
        };
        let mut renderer = renderer_with(config, RecordingBackend::default());
        let first = build_quad(&mut renderer).unwrap();
        build_quad(&mut renderer).unwrap();
        assert!(matches!(
            build_quad(&mut renderer),
            Err(RenderError::Capacity {
                kind: ResourceKind::Pipeline,
                capacity: 2
            })
        ));

        renderer.destroy_pipeline(first).unwrap();
        let reused = build_quad(&mut renderer).unwrap();
        assert_eq!(reused.slot().index(), first.slot().index());
        assert!(renderer.pipeline_sources(first).is_err());
        assert!(matches!(renderer.destroy_pipeline(first), Err(RenderError::InvalidHandle { .. })));
    }

    #[test]
    fn test_sampler_units_follow_declaration_order() {
        let mut renderer = renderer();
        let mut builder = renderer.begin_pipeline().unwrap();
        builder.add_sampler("s_base", "base color").unwrap();
        builder.add_constant(ShaderType::Float, "u_alpha", "opacity").unwrap();
        builder.add_sampler("s_mask", "").unwrap();
        builder.add_constant(ShaderType::Mat4, "u_mvp", "").unwrap();
        builder.add_sampler("s_rule", "").unwrap();
        builder.add_vertex_shader_input(ShaderType::Vec2, "a_pos", Semantic::Position0).unwrap();
        builder.add_pixel_shader_input(ShaderType::Vec4, "v_pos", Semantic::ClipPosition).unwrap();
        builder.begin_vertex_shader().unwrap();
        builder.assign_output("v_pos", "u_mvp * vec4(a_pos, 0.0, 1.0)").unwrap();
        builder.end_vertex_shader().unwrap();
        builder.begin_pixel_shader().unwrap();
        builder.return_color("vec4(u_alpha)").unwrap();
        builder.end_pixel_shader().unwrap();
        let pipeline = builder.end_pipeline().unwrap();

        let units = renderer.sampler_units(pipeline).unwrap();
        assert_eq!(units, &[("s_base".to_string(), 0), ("s_mask".to_string(), 1), ("s_rule".to_string(), 2)]);

        let assigned: Vec<(String, u32)> = renderer
            .backend()
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::SetSamplerUnit { sampler, unit, .. } => Some((sampler.clone(), *unit)),
                _ => None,
            })
            .collect();
        assert_eq!(assigned, units);
    }

    #[test]
    fn test_previous_program_is_restored() {
        let mut renderer = renderer();
        let first = build_quad(&mut renderer).unwrap();
        renderer.bind_pipeline(first).unwrap();
        let first_program = renderer.backend().commands().iter().find_map(|command| match command {
            Command::BindProgram { id } => Some(*id),
            _ => None,
        });
        renderer.backend_mut().take_commands();

        build_quad(&mut renderer).unwrap();
        let commands = renderer.backend().commands();
        let second_program = commands.iter().find_map(|command| match command {
            Command::LinkProgram { id, .. } => Some(*id),
            _ => None,
        });
        let uses: Vec<_> = commands
            .iter()
            .filter_map(|command| match command {
                Command::UseProgram { id } => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(uses.len(), 2);
        assert_eq!(Some(uses[0]), second_program);
        assert_eq!(Some(uses[1]), first_program);
    }

    #[test]
    fn test_compile_failure_releases_everything() {
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            let mut backend = RecordingBackend::default();
            backend.fail_compile(Some(stage));
            let mut renderer = renderer_with(RendererConfig::default(), backend);

            match build_quad(&mut renderer) {
                Err(RenderError::Compile { stage: failed, log }) => {
                    assert_eq!(failed, stage);
                    assert!(log.contains("injected"), "{log}");
                }
                other => panic!("expected a compile error, got {:?}", other.map(|_| ())),
            }
            assert_eq!(renderer.backend().live_objects(), 0);
            assert_eq!(renderer.live_resources().pipelines, 0);

            renderer.backend_mut().fail_compile(None);
            build_quad(&mut renderer).unwrap();
        }
    }

    #[test]
    fn test_link_failure_releases_everything() {
        let mut backend = RecordingBackend::default();
        backend.fail_link(true);
        let config = RendererConfig {
            pipelines: 1,
            ..RendererConfig::default()
        };
        let mut renderer = renderer_with(config, backend);

        assert!(matches!(build_quad(&mut renderer), Err(RenderError::Link { .. })));
        assert_eq!(renderer.backend().live_objects(), 0);

        // The only slot was released, so a retry fits
        renderer.backend_mut().fail_link(false);
        build_quad(&mut renderer).unwrap();
    }

    #[test]
    fn test_abandoned_builder_releases_slot() {
        let config = RendererConfig {
            pipelines: 1,
            ..RendererConfig::default()
        };
        let mut renderer = renderer_with(config, RecordingBackend::default());
        {
            let mut builder = renderer.begin_pipeline().unwrap();
            builder.add_constant(ShaderType::Vec4, "u_color", "").unwrap();
        }
        assert_eq!(renderer.live_resources().pipelines, 0);
        build_quad(&mut renderer).unwrap();
    }

    #[test]
    fn test_structure_errors_surface_at_end_pipeline() {
        let mut renderer = renderer();
        let mut builder = renderer.begin_pipeline().unwrap();
        builder.begin_vertex_shader().unwrap();
        builder.begin_if("a > 0.0").unwrap();
        assert_eq!(builder.end_vertex_shader(), Err(AssemblyError::UnclosedBlock { stage: ShaderStage::Vertex, depth: 1 }));
        assert!(matches!(
            builder.end_pipeline(),
            Err(RenderError::Assembly(AssemblyError::UnterminatedBody { stage: ShaderStage::Vertex }))
        ));
        assert_eq!(renderer.live_resources().pipelines, 0);
        assert!(renderer.backend().commands().iter().all(|command| !matches!(command, Command::CompileShader { .. })));
    }

    #[test]
    fn test_declaration_limit_from_config() {
        let config = RendererConfig {
            max_declarations: 1,
            ..RendererConfig::default()
        };
        let mut renderer = renderer_with(config, RecordingBackend::default());
        let mut builder = renderer.begin_pipeline().unwrap();
        builder.add_constant(ShaderType::Float, "u_a", "").unwrap();
        assert!(matches!(builder.add_sampler("s_b", ""), Err(AssemblyError::TooManyDeclarations { limit: 1, .. })));
    }

    #[test]
    fn test_source_size_limit() {
        let config = RendererConfig {
            max_shader_source_bytes: 64,
            ..RendererConfig::default()
        };
        let mut renderer = renderer_with(config, RecordingBackend::default());
        assert!(matches!(
            build_quad(&mut renderer),
            Err(RenderError::ShaderSourceTooLarge {
                stage: ShaderStage::Vertex,
                limit: 64,
                ..
            })
        ));
        assert_eq!(renderer.live_resources().pipelines, 0);
        assert_eq!(renderer.backend().live_objects(), 0);
    }

    #[test]
    fn test_wgsl_backend_gets_wgsl_sources() {
        let mut renderer = renderer_with(RendererConfig::default(), RecordingBackend::new(ShaderLanguage::Wgsl));
        let pipeline = build_quad(&mut renderer).unwrap();
        let sources = renderer.pipeline_sources(pipeline).unwrap();
        assert_eq!(sources.language, ShaderLanguage::Wgsl);
        assert!(sources.vertex.contains("fn vs_main("));
        assert!(sources.fragment.contains("fn fs_main("));
    }
}
