//! pipeforge command-line renderer
//!
//! Builds a small pipeline through the pipeforge builder, renders one frame offscreen with wgpu and
//! saves the result as an image. The generated shader sources can also be printed for either
//! dialect without touching the GPU.
//!
//! # Usage
//! ```bash
//! pipeforge out.png --width 512 --height 512 --scene textured --texture input.png
//! pipeforge --dump-shaders glsl --scene textured
//! ```

use clap::{Parser, ValueEnum};
use pipeforge::backend::{RecordingBackend, Viewport, WgpuBackend};
use pipeforge::shader::{Semantic, ShaderLanguage, ShaderStage, ShaderType};
use pipeforge::{GraphicsBackend, PipelineHandle, RenderError, Renderer, RendererConfig};
use std::path::PathBuf;

/// Scenes the tool can build
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scene {
    /// A white quad covering the upper right quarter of the target
    Quad,
    /// A full-target quad sampling a texture, tinted by a constant
    Textured,
}

/// Shading languages accepted by `--dump-shaders`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Dialect {
    Glsl,
    Wgsl,
}

impl From<Dialect> for ShaderLanguage {
    fn from(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Glsl => ShaderLanguage::Glsl,
            Dialect::Wgsl => ShaderLanguage::Wgsl,
        }
    }
}

#[derive(Parser)]
#[command(version, about = "Render a pipeforge pipeline offscreen")]
struct Args {
    /// Output image file path
    #[arg(default_value = "pipeforge.png")]
    output: PathBuf,

    /// Render target width in pixels
    #[arg(long, default_value_t = 256)]
    width: u32,

    /// Render target height in pixels
    #[arg(long, default_value_t = 256)]
    height: u32,

    /// Scene to render
    #[arg(long, value_enum, default_value_t = Scene::Quad)]
    scene: Scene,

    /// Image sampled by the textured scene; a checkerboard is used when omitted
    #[arg(long)]
    texture: Option<PathBuf>,

    /// Print the generated shader sources in the given dialect instead of rendering
    #[arg(long, value_enum)]
    dump_shaders: Option<Dialect>,

    /// Renderer configuration file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Vertices of the quad scene: four positions on the z = 0 plane
const QUAD_VERTICES: [f32; 12] = [0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 0.5, 0.0];

/// Vertices of the textured scene: position then texture coordinate, ordered for a triangle strip
const TEXTURED_VERTICES: [f32; 20] = [
    -1.0, -1.0, 0.0, 0.0, 1.0, //
    1.0, -1.0, 0.0, 1.0, 1.0, //
    -1.0, 1.0, 0.0, 0.0, 0.0, //
    1.0, 1.0, 0.0, 1.0, 0.0,
];

const QUAD_INDICES: [u16; 4] = [0, 1, 2, 3];

const TINT: [f32; 4] = [1.0, 0.9, 0.8, 1.0];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();

    let config = match &args.config {
        Some(path) => RendererConfig::from_file(path)?,
        None => RendererConfig::default(),
    };

    if let Some(dialect) = args.dump_shaders {
        let mut renderer = Renderer::new(RecordingBackend::new(dialect.into()), config);
        let pipeline = build_pipeline(&mut renderer, args.scene)?;
        let sources = renderer.pipeline_sources(pipeline)?;
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            println!("// {stage} shader ({})", sources.language);
            println!("{}", sources.stage(stage));
        }
        return Ok(());
    }

    tracing::info!(width = args.width, height = args.height, scene = ?args.scene, "initializing GPU");
    let backend = pollster::block_on(WgpuBackend::new_headless(args.width, args.height))?;
    let mut renderer = Renderer::new(backend, config);
    renderer.reinit(Viewport::new(args.width, args.height));

    let pipeline = build_pipeline(&mut renderer, args.scene)?;
    match args.scene {
        Scene::Quad => draw_quad(&mut renderer, pipeline)?,
        Scene::Textured => {
            let image = match &args.texture {
                Some(path) => {
                    tracing::info!(path = %path.display(), "loading texture");
                    image::open(path)?.to_rgba8()
                }
                None => checkerboard(64, 64, 8),
            };
            draw_textured(&mut renderer, pipeline, &image)?;
        }
    }

    let output = renderer.backend().read_target()?;
    output.save(&args.output)?;
    tracing::info!(path = %args.output.display(), "saved {}x{} image", output.width(), output.height());

    Ok(())
}

/// Picks the expression text for the backend's dialect
///
/// Expressions are passed through verbatim, so anything beyond the common constructor syntax has
/// to be spelled per dialect.
fn dialect_expr<'a>(language: ShaderLanguage, glsl: &'a str, wgsl: &'a str) -> &'a str {
    match language {
        ShaderLanguage::Glsl => glsl,
        ShaderLanguage::Wgsl => wgsl,
    }
}

/// Describes and links the pipeline of a scene
///
/// # Arguments
/// * `renderer` - Renderer to build the pipeline with
/// * `scene` - Scene whose pipeline to build
///
/// # Returns
/// The handle of the linked pipeline
fn build_pipeline<B: GraphicsBackend>(renderer: &mut Renderer<B>, scene: Scene) -> Result<PipelineHandle, RenderError> {
    let language = renderer.backend().language();
    let mut builder = renderer.begin_pipeline()?;
    match scene {
        Scene::Quad => {
            builder.add_vertex_shader_input(ShaderType::Vec3, "a_pos", Semantic::Position0)?;
            builder.add_pixel_shader_input(ShaderType::Vec4, "v_pos", Semantic::ClipPosition)?;
            builder.begin_vertex_shader()?;
            builder.assign_input(Some(ShaderType::Vec3), "pos", "a_pos")?;
            builder.assign_output("v_pos", "vec4(pos.x, pos.y, pos.z, 1.0)")?;
            builder.end_vertex_shader()?;
            builder.begin_pixel_shader()?;
            builder.return_color("vec4(1.0, 1.0, 1.0, 1.0)")?;
            builder.end_pixel_shader()?;
        }
        Scene::Textured => {
            builder.add_constant(ShaderType::Vec4, "u_tint", "color multiplier")?;
            builder.add_sampler("s_tex", "base color")?;
            builder.add_vertex_shader_input(ShaderType::Vec3, "a_pos", Semantic::Position0)?;
            builder.add_vertex_shader_input(ShaderType::Vec2, "a_uv", Semantic::TexCoord0)?;
            builder.add_pixel_shader_input(ShaderType::Vec4, "v_pos", Semantic::ClipPosition)?;
            builder.add_pixel_shader_input(ShaderType::Vec2, "v_uv", Semantic::TexCoord0)?;
            builder.begin_vertex_shader()?;
            builder.assign_output("v_pos", "vec4(a_pos, 1.0)")?;
            builder.assign_output("v_uv", "a_uv")?;
            builder.end_vertex_shader()?;
            builder.begin_pixel_shader()?;
            let sample = dialect_expr(language, "texture2D(s_tex, v_uv)", "textureSample(s_tex, s_tex_sampler, v_uv)");
            builder.assign_tmp(Some(ShaderType::Vec4), "color", sample)?;
            builder.assign_constant(Some(ShaderType::Vec4), "tint", "u_tint")?;
            builder.return_color("color * tint")?;
            builder.end_pixel_shader()?;
        }
    }
    builder.end_pipeline()
}

fn draw_quad<B: GraphicsBackend>(renderer: &mut Renderer<B>, pipeline: PipelineHandle) -> Result<(), RenderError> {
    let vertices = renderer.create_vertex_buffer(QUAD_VERTICES.len())?;
    renderer.upload_vertex_buffer(vertices, &QUAD_VERTICES)?;
    let indices = renderer.create_index_buffer(QUAD_INDICES.len())?;
    renderer.upload_index_buffer(indices, &QUAD_INDICES)?;

    renderer.begin_frame()?;
    renderer.bind_pipeline(pipeline)?;
    renderer.bind_vertex_buffer(vertices)?;
    renderer.bind_index_buffer(indices)?;
    renderer.draw_triangle_strip(0, QUAD_INDICES.len() as u32)?;
    renderer.end_frame()
}

fn draw_textured<B: GraphicsBackend>(renderer: &mut Renderer<B>, pipeline: PipelineHandle, image: &image::RgbaImage) -> Result<(), RenderError> {
    let vertices = renderer.create_vertex_buffer(TEXTURED_VERTICES.len())?;
    renderer.upload_vertex_buffer(vertices, &TEXTURED_VERTICES)?;
    let indices = renderer.create_index_buffer(QUAD_INDICES.len())?;
    renderer.upload_index_buffer(indices, &QUAD_INDICES)?;

    let texture = renderer.create_texture(image.width(), image.height(), 1)?;
    renderer.upload_texture(texture, 0, image)?;

    let block_size = renderer.constant_layout(pipeline)?.size;
    let constants = renderer.create_constant_buffer(block_size)?;
    renderer.update_constant(pipeline, constants, "u_tint", &TINT)?;

    let unit = renderer.sampler_units(pipeline)?.iter().find(|(name, _)| name == "s_tex").map_or(0, |(_, unit)| *unit);

    renderer.begin_frame()?;
    renderer.bind_pipeline(pipeline)?;
    renderer.bind_vertex_buffer(vertices)?;
    renderer.bind_index_buffer(indices)?;
    renderer.bind_constant_buffer(constants)?;
    renderer.bind_texture(unit, texture)?;
    renderer.draw_triangle_strip(0, QUAD_INDICES.len() as u32)?;
    renderer.end_frame()
}

/// Generates a black and white checkerboard with `cell` pixel squares
fn checkerboard(width: u32, height: u32, cell: u32) -> image::RgbaImage {
    image::RgbaImage::from_fn(width, height, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            image::Rgba([255, 255, 255, 255])
        } else {
            image::Rgba([0, 0, 0, 255])
        }
    })
}
