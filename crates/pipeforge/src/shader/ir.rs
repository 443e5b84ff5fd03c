//! Intermediate representation of a pipeline description
//!
//! The builder protocol appends declarations and statements here; source text is only produced when
//! a finished [`PipelineDesc`] is handed to one of the dialect renderers.

use std::fmt;

use super::types::{Semantic, ShaderType};

/// Declaration lists of a pipeline, each with its own size limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    /// Constants and samplers
    Uniform,
    /// Vertex shader inputs
    Attribute,
    /// Pixel shader inputs
    Varying,
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeclarationKind::Uniform => "constant/sampler",
            DeclarationKind::Attribute => "vertex shader input",
            DeclarationKind::Varying => "pixel shader input",
        })
    }
}

/// What a uniform declaration holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Constant(ShaderType),
    Sampler,
}

/// A constant or sampler declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: String,
    pub kind: UniformKind,
    /// Free-form role description, carried for diagnostics only
    pub note: String,
}

impl UniformDecl {
    pub fn is_sampler(&self) -> bool {
        matches!(self.kind, UniformKind::Sampler)
    }

    /// Returns the constant type, or `None` for samplers
    pub fn constant_type(&self) -> Option<ShaderType> {
        match self.kind {
            UniformKind::Constant(ty) => Some(ty),
            UniformKind::Sampler => None,
        }
    }

    /// Returns the neutral type name, `sampler2D` for samplers
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            UniformKind::Constant(ty) => ty.name(),
            UniformKind::Sampler => "sampler2D",
        }
    }
}

/// A vertex shader input declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDecl {
    pub ty: ShaderType,
    pub name: String,
    pub semantic: Semantic,
}

impl AttributeDecl {
    /// Returns the number of floats this attribute occupies in a vertex
    pub fn width(&self) -> usize {
        self.ty.components()
    }
}

/// A pixel shader input declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaryingDecl {
    pub ty: ShaderType,
    pub name: String,
    pub semantic: Semantic,
}

impl VaryingDecl {
    pub fn is_clip_position(&self) -> bool {
        self.semantic.is_clip_position()
    }
}

/// Which declaration an assignment reads from
///
/// All three render identically; the distinction documents intent in the statement list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignSource {
    Constant,
    Input,
    Temporary,
}

/// One statement of a shader body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `[type] lhs = rhs;`
    Assign { source: AssignSource, ty: Option<ShaderType>, lhs: String, rhs: String },
    /// Write to a pixel shader input from the vertex stage
    AssignOutput { target: String, expr: String },
    /// Final color of the pixel stage
    ReturnColor { expr: String },
    If { cond: String },
    ElseIf { cond: String },
    Else,
    EndIf,
}

/// A complete, structurally valid pipeline description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineDesc {
    pub uniforms: Vec<UniformDecl>,
    pub attributes: Vec<AttributeDecl>,
    pub varyings: Vec<VaryingDecl>,
    pub vertex_body: Vec<Statement>,
    pub fragment_body: Vec<Statement>,
}

impl PipelineDesc {
    /// Iterates over the constant declarations with their types
    pub fn constants(&self) -> impl Iterator<Item = (&UniformDecl, ShaderType)> {
        self.uniforms.iter().filter_map(|uniform| uniform.constant_type().map(|ty| (uniform, ty)))
    }

    /// Iterates over the sampler declarations in declaration order
    pub fn samplers(&self) -> impl Iterator<Item = &UniformDecl> {
        self.uniforms.iter().filter(|uniform| uniform.is_sampler())
    }

    /// Returns the varying carrying the clip-space position, if one is declared
    pub fn clip_position(&self) -> Option<&VaryingDecl> {
        self.varyings.iter().find(|varying| varying.is_clip_position())
    }

    /// Iterates over the varyings that are interpolated between stages
    pub fn interpolated_varyings(&self) -> impl Iterator<Item = &VaryingDecl> {
        self.varyings.iter().filter(|varying| !varying.is_clip_position())
    }

    /// Looks up a varying by name
    pub fn varying(&self, name: &str) -> Option<&VaryingDecl> {
        self.varyings.iter().find(|varying| varying.name == name)
    }

    /// Returns the per-vertex stride in floats
    pub fn vertex_stride(&self) -> usize {
        self.attributes.iter().map(AttributeDecl::width).sum()
    }
}
