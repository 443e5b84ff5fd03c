//! Builder protocol for pipeline descriptions
//!
//! [`ShaderAssembler`] is a small state machine that accepts declarations and statements one call at
//! a time and rejects structurally invalid sequences as soon as they happen, so a finished
//! [`PipelineDesc`] always renders to balanced source text.

use super::ShaderStage;
use super::ir::{AssignSource, AttributeDecl, DeclarationKind, PipelineDesc, Statement, UniformDecl, UniformKind, VaryingDecl};
use super::types::{Semantic, ShaderType};
use super::wgsl;
use crate::error::AssemblyError;

/// Default limit for each declaration list of a pipeline
pub const DEFAULT_MAX_DECLARATIONS: usize = 32;

/// Branch state of an open conditional block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    /// Inside an `if` or `else if` branch
    Conditional,
    /// Inside the final `else` branch
    Else,
}

/// A shader body currently accepting statements
#[derive(Debug)]
struct OpenBody {
    stage: ShaderStage,
    blocks: Vec<Branch>,
}

/// Accumulates a pipeline description through the builder protocol
#[derive(Debug)]
pub struct ShaderAssembler {
    desc: PipelineDesc,
    max_declarations: usize,
    open: Option<OpenBody>,
    vertex_defined: bool,
    fragment_defined: bool,
}

impl Default for ShaderAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECLARATIONS)
    }
}

impl ShaderAssembler {
    /// Creates an empty assembler
    ///
    /// # Arguments
    /// * `max_declarations` - Limit applied to each declaration list separately
    pub fn new(max_declarations: usize) -> Self {
        Self {
            desc: PipelineDesc::default(),
            max_declarations,
            open: None,
            vertex_defined: false,
            fragment_defined: false,
        }
    }

    /// Returns the description assembled so far
    pub fn desc(&self) -> &PipelineDesc {
        &self.desc
    }

    /// Declares a constant visible to both stages
    pub fn add_constant(&mut self, ty: ShaderType, name: &str, note: &str) -> Result<(), AssemblyError> {
        self.check_declaration(DeclarationKind::Uniform, name, &[])?;
        self.desc.uniforms.push(UniformDecl {
            name: name.to_string(),
            kind: UniformKind::Constant(ty),
            note: note.to_string(),
        });
        Ok(())
    }

    /// Declares a 2D texture sampler visible to the pixel stage
    ///
    /// Samplers receive bind units in declaration order when the pipeline is linked.
    pub fn add_sampler(&mut self, name: &str, note: &str) -> Result<(), AssemblyError> {
        self.check_declaration(DeclarationKind::Uniform, name, &[wgsl::sampler_binding_name(name)])?;
        self.desc.uniforms.push(UniformDecl {
            name: name.to_string(),
            kind: UniformKind::Sampler,
            note: note.to_string(),
        });
        Ok(())
    }

    /// Declares a per-vertex input read from the bound vertex buffer
    pub fn add_vertex_shader_input(&mut self, ty: ShaderType, name: &str, semantic: Semantic) -> Result<(), AssemblyError> {
        self.check_declaration(DeclarationKind::Attribute, name, &column_fields(ty, name))?;
        self.desc.attributes.push(AttributeDecl {
            ty,
            name: name.to_string(),
            semantic,
        });
        Ok(())
    }

    /// Declares a value written by the vertex stage and read by the pixel stage
    ///
    /// A varying with [`Semantic::ClipPosition`] becomes the rasterizer position instead of an
    /// interpolated value. At most one may be declared.
    pub fn add_pixel_shader_input(&mut self, ty: ShaderType, name: &str, semantic: Semantic) -> Result<(), AssemblyError> {
        self.check_declaration(DeclarationKind::Varying, name, &[])?;
        if semantic.is_clip_position() && self.desc.clip_position().is_some() {
            return Err(AssemblyError::DuplicateClipPosition { name: name.to_string() });
        }
        self.desc.varyings.push(VaryingDecl {
            ty,
            name: name.to_string(),
            semantic,
        });
        Ok(())
    }

    pub fn begin_vertex_shader(&mut self) -> Result<(), AssemblyError> {
        self.open_body(ShaderStage::Vertex)
    }

    pub fn end_vertex_shader(&mut self) -> Result<(), AssemblyError> {
        self.close_body(ShaderStage::Vertex)
    }

    pub fn begin_pixel_shader(&mut self) -> Result<(), AssemblyError> {
        self.open_body(ShaderStage::Fragment)
    }

    pub fn end_pixel_shader(&mut self) -> Result<(), AssemblyError> {
        self.close_body(ShaderStage::Fragment)
    }

    /// Appends `[type] lhs = rhs;` reading a constant
    pub fn assign_constant(&mut self, ty: Option<ShaderType>, lhs: &str, rhs: &str) -> Result<(), AssemblyError> {
        self.assign("assign_constant", AssignSource::Constant, ty, lhs, rhs)
    }

    /// Appends `[type] lhs = rhs;` reading a stage input
    pub fn assign_input(&mut self, ty: Option<ShaderType>, lhs: &str, rhs: &str) -> Result<(), AssemblyError> {
        self.assign("assign_input", AssignSource::Input, ty, lhs, rhs)
    }

    /// Appends `[type] lhs = expr;` computing a temporary
    pub fn assign_tmp(&mut self, ty: Option<ShaderType>, lhs: &str, expr: &str) -> Result<(), AssemblyError> {
        self.assign("assign_tmp", AssignSource::Temporary, ty, lhs, expr)
    }

    /// Writes a pixel shader input from the vertex stage
    ///
    /// # Arguments
    /// * `target` - Name of a declared pixel shader input
    /// * `expr` - Expression text, passed through verbatim
    pub fn assign_output(&mut self, target: &str, expr: &str) -> Result<(), AssemblyError> {
        let body = self.body_mut("assign_output")?;
        if body.stage != ShaderStage::Vertex {
            return Err(AssemblyError::WrongStage {
                statement: "assign_output",
                stage: body.stage,
            });
        }
        if self.desc.varying(target).is_none() {
            return Err(AssemblyError::UnknownOutput { name: target.to_string() });
        }
        self.push(
            ShaderStage::Vertex,
            Statement::AssignOutput {
                target: target.to_string(),
                expr: expr.to_string(),
            },
        );
        Ok(())
    }

    /// Sets the final color of the pixel stage
    pub fn return_color(&mut self, expr: &str) -> Result<(), AssemblyError> {
        let body = self.body_mut("return_color")?;
        if body.stage != ShaderStage::Fragment {
            return Err(AssemblyError::WrongStage {
                statement: "return_color",
                stage: body.stage,
            });
        }
        self.push(ShaderStage::Fragment, Statement::ReturnColor { expr: expr.to_string() });
        Ok(())
    }

    pub fn begin_if(&mut self, cond: &str) -> Result<(), AssemblyError> {
        let body = self.body_mut("begin_if")?;
        body.blocks.push(Branch::Conditional);
        let stage = body.stage;
        self.push(stage, Statement::If { cond: cond.to_string() });
        Ok(())
    }

    pub fn begin_else_if(&mut self, cond: &str) -> Result<(), AssemblyError> {
        let stage = self.enter_branch("begin_else_if", Branch::Conditional)?;
        self.push(stage, Statement::ElseIf { cond: cond.to_string() });
        Ok(())
    }

    pub fn begin_else(&mut self) -> Result<(), AssemblyError> {
        let stage = self.enter_branch("begin_else", Branch::Else)?;
        self.push(stage, Statement::Else);
        Ok(())
    }

    pub fn end_if(&mut self) -> Result<(), AssemblyError> {
        let body = self.body_mut("end_if")?;
        if body.blocks.pop().is_none() {
            return Err(AssemblyError::EndIfWithoutIf);
        }
        let stage = body.stage;
        self.push(stage, Statement::EndIf);
        Ok(())
    }

    /// Validates the protocol state and returns the finished description
    ///
    /// # Errors
    /// Fails if a body is still open or either body was never defined
    pub fn finish(self) -> Result<PipelineDesc, AssemblyError> {
        if let Some(body) = &self.open {
            return Err(AssemblyError::UnterminatedBody { stage: body.stage });
        }
        if !self.vertex_defined {
            return Err(AssemblyError::MissingBody { stage: ShaderStage::Vertex });
        }
        if !self.fragment_defined {
            return Err(AssemblyError::MissingBody { stage: ShaderStage::Fragment });
        }
        Ok(self.desc)
    }

    /// Checks the per-list limit and that `name` and the identifiers generated for it are free
    ///
    /// # Arguments
    /// * `kind` - Declaration list the name goes into
    /// * `name` - Declared name
    /// * `generated` - Extra identifiers the generated source derives from this declaration
    fn check_declaration(&self, kind: DeclarationKind, name: &str, generated: &[String]) -> Result<(), AssemblyError> {
        let count = match kind {
            DeclarationKind::Uniform => self.desc.uniforms.len(),
            DeclarationKind::Attribute => self.desc.attributes.len(),
            DeclarationKind::Varying => self.desc.varyings.len(),
        };
        if count >= self.max_declarations {
            tracing::warn!(%kind, limit = self.max_declarations, name, "declaration limit reached");
            return Err(AssemblyError::TooManyDeclarations {
                kind,
                limit: self.max_declarations,
            });
        }

        if self.is_declared(name) {
            return Err(AssemblyError::DuplicateDeclaration { name: name.to_string() });
        }

        let existing_generated: Vec<String> = self.generated_names().collect();
        if wgsl::RESERVED_NAMES.contains(&name) || existing_generated.iter().any(|g| g == name) {
            return Err(AssemblyError::ReservedName {
                name: name.to_string(),
                generated: name.to_string(),
            });
        }
        for candidate in generated {
            let clashes = wgsl::RESERVED_NAMES.contains(&candidate.as_str()) || existing_generated.contains(candidate) || self.is_declared(candidate);
            if clashes {
                return Err(AssemblyError::ReservedName {
                    name: name.to_string(),
                    generated: candidate.clone(),
                });
            }
        }
        Ok(())
    }

    fn is_declared(&self, name: &str) -> bool {
        let desc = &self.desc;
        desc.uniforms.iter().any(|u| u.name == name) || desc.attributes.iter().any(|a| a.name == name) || desc.varyings.iter().any(|v| v.name == name)
    }

    /// Identifiers derived from the declarations made so far
    fn generated_names(&self) -> impl Iterator<Item = String> + '_ {
        let samplers = self.desc.samplers().map(|sampler| wgsl::sampler_binding_name(&sampler.name));
        let columns = self.desc.attributes.iter().flat_map(|attribute| column_fields(attribute.ty, &attribute.name));
        samplers.chain(columns)
    }

    fn open_body(&mut self, stage: ShaderStage) -> Result<(), AssemblyError> {
        if let Some(body) = &self.open {
            return Err(AssemblyError::BodyAlreadyOpen { requested: stage, open: body.stage });
        }
        let defined = match stage {
            ShaderStage::Vertex => self.vertex_defined,
            ShaderStage::Fragment => self.fragment_defined,
        };
        if defined {
            return Err(AssemblyError::BodyAlreadyDefined { stage });
        }
        self.open = Some(OpenBody { stage, blocks: Vec::new() });
        Ok(())
    }

    fn close_body(&mut self, stage: ShaderStage) -> Result<(), AssemblyError> {
        match &self.open {
            Some(body) if body.stage == stage => {
                if !body.blocks.is_empty() {
                    return Err(AssemblyError::UnclosedBlock { stage, depth: body.blocks.len() });
                }
            }
            _ => return Err(AssemblyError::BodyNotOpen { stage }),
        }
        self.open = None;
        match stage {
            ShaderStage::Vertex => self.vertex_defined = true,
            ShaderStage::Fragment => self.fragment_defined = true,
        }
        Ok(())
    }

    fn body_mut(&mut self, statement: &'static str) -> Result<&mut OpenBody, AssemblyError> {
        self.open.as_mut().ok_or(AssemblyError::NoOpenBody { statement })
    }

    /// Moves the innermost open block to its next branch
    fn enter_branch(&mut self, statement: &'static str, next: Branch) -> Result<ShaderStage, AssemblyError> {
        let body = self.body_mut(statement)?;
        match body.blocks.last_mut() {
            None => Err(AssemblyError::ElseWithoutIf { statement }),
            Some(Branch::Else) => Err(AssemblyError::ElseAfterElse { statement }),
            Some(branch) => {
                *branch = next;
                Ok(body.stage)
            }
        }
    }

    fn assign(&mut self, statement: &'static str, source: AssignSource, ty: Option<ShaderType>, lhs: &str, rhs: &str) -> Result<(), AssemblyError> {
        let stage = self.body_mut(statement)?.stage;
        // A typed assignment declares `lhs` in the entry point scope
        if ty.is_some() && wgsl::RESERVED_NAMES.contains(&lhs) {
            return Err(AssemblyError::ReservedName {
                name: lhs.to_string(),
                generated: lhs.to_string(),
            });
        }
        self.push(
            stage,
            Statement::Assign {
                source,
                ty,
                lhs: lhs.to_string(),
                rhs: rhs.to_string(),
            },
        );
        Ok(())
    }

    fn push(&mut self, stage: ShaderStage, statement: Statement) {
        match stage {
            ShaderStage::Vertex => self.desc.vertex_body.push(statement),
            ShaderStage::Fragment => self.desc.fragment_body.push(statement),
        }
    }
}

/// Returns the per-column input fields of a matrix attribute, empty for other types
fn column_fields(ty: ShaderType, name: &str) -> Vec<String> {
    if !ty.is_matrix() {
        return Vec::new();
    }
    let (count, _) = ty.columns();
    (0..count).map(|column| wgsl::column_field_name(name, column)).collect()
}
