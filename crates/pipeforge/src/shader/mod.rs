//! Shader description, assembly and source generation
//!
//! A pipeline is described through [`ShaderAssembler`] into a dialect-neutral [`PipelineDesc`],
//! which is then rendered to source text for the shading language a backend consumes.

use std::fmt;

pub mod assembler;
pub mod glsl;
pub mod ir;
pub mod layout;
pub mod types;
pub mod wgsl;

pub use assembler::ShaderAssembler;
pub use ir::PipelineDesc;
pub use layout::{ConstantLayout, VertexLayout};
pub use types::{Semantic, ShaderType};

use crate::error::AssemblyError;

/// Programmable pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        })
    }
}

/// Shading languages a pipeline can be rendered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderLanguage {
    /// GLSL ES 1.00, two separate stage sources
    Glsl,
    /// WGSL, one module per stage with `vs_main` and `fs_main` entry points
    Wgsl,
}

impl fmt::Display for ShaderLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderLanguage::Glsl => "glsl",
            ShaderLanguage::Wgsl => "wgsl",
        })
    }
}

/// Generated source text of both stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    pub language: ShaderLanguage,
    pub vertex: String,
    pub fragment: String,
}

impl ShaderSources {
    /// Returns the source of one stage
    pub fn stage(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }
}

/// Renders a finished description to source text
///
/// # Arguments
/// * `desc` - The pipeline description
/// * `language` - Target shading language
///
/// # Returns
/// Source text for both stages, or an error if the description uses a construct the target
/// language cannot express
pub fn render(desc: &PipelineDesc, language: ShaderLanguage) -> Result<ShaderSources, AssemblyError> {
    let (vertex, fragment) = match language {
        ShaderLanguage::Glsl => (glsl::render_vertex(desc), glsl::render_fragment(desc)),
        ShaderLanguage::Wgsl => (wgsl::render_vertex(desc)?, wgsl::render_fragment(desc)?),
    };
    Ok(ShaderSources { language, vertex, fragment })
}

/// Indentation unit of generated source
const INDENT: &str = "    ";

/// Writes a statement list with block structure, delegating leaf statements to the dialect
///
/// Conditional blocks share the same brace syntax in every supported language.
fn emit_body(code: &mut String, body: &[ir::Statement], mut leaf: impl FnMut(&ir::Statement) -> String) {
    let mut depth = 1;
    for statement in body {
        let (indent, line) = match statement {
            ir::Statement::If { cond } => {
                depth += 1;
                (depth - 1, format!("if ({cond}) {{"))
            }
            ir::Statement::ElseIf { cond } => (depth - 1, format!("}} else if ({cond}) {{")),
            ir::Statement::Else => (depth - 1, "} else {".to_string()),
            ir::Statement::EndIf => {
                depth -= 1;
                (depth, "}".to_string())
            }
            other => (depth, leaf(other)),
        };
        code.push_str(&INDENT.repeat(indent));
        code.push_str(&line);
        code.push('\n');
    }
}
