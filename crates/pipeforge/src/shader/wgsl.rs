//! WGSL source generation
//!
//! Resource bindings all live in group 0:
//! - binding 0: the `Constants` uniform block, present only when constants are declared
//! - binding `1 + 2k` / `2 + 2k`: texture and sampler of the `k`-th declared sampler
//!
//! Vertex shader inputs become `@location` fields of `VertexInput` in the order given by
//! [`VertexLayout::locations`], with matrices split into columns. Pixel shader inputs become fields of
//! `VertexOutput`, which always carries the `@builtin(position)` field. Entry points rebind every
//! declared name as a local so statement text can use the same names as in GLSL.

use super::emit_body;
use super::ir::{PipelineDesc, Statement};
use super::layout::VertexLayout;
use crate::error::AssemblyError;

/// Name of the builtin clip-position field of the vertex output
const CLIP_POSITION_FIELD: &str = "clip_position";

/// Identifiers every generated module may declare on its own
///
/// Declared names share the entry point scope with these, so the assembler refuses them.
pub const RESERVED_NAMES: [&str; 10] = [
    "constants",
    "vertex_in",
    "fragment_in",
    "vertex_out",
    CLIP_POSITION_FIELD,
    "Constants",
    "VertexInput",
    "VertexOutput",
    "vs_main",
    "fs_main",
];

/// Returns the name of the sampler binding paired with a sampler's texture
pub fn sampler_binding_name(sampler: &str) -> String {
    format!("{sampler}_sampler")
}

/// Returns the `VertexInput` field carrying one column of a matrix attribute
pub fn column_field_name(attribute: &str, column: usize) -> String {
    format!("{attribute}_{column}")
}

/// Returns the texture binding index of the `k`-th sampler
pub fn texture_binding(sampler_index: usize) -> u32 {
    1 + 2 * sampler_index as u32
}

/// Returns the sampler binding index of the `k`-th sampler
pub fn sampler_binding(sampler_index: usize) -> u32 {
    2 + 2 * sampler_index as u32
}

/// Renders the vertex stage module with its `vs_main` entry point
pub fn render_vertex(desc: &PipelineDesc) -> Result<String, AssemblyError> {
    let mut code = String::new();
    write_constants(&mut code, desc);

    let layout = VertexLayout::from_desc(desc);
    let locations = layout.locations();
    if !locations.is_empty() {
        code.push_str("struct VertexInput {\n");
        for location in &locations {
            let attribute = &layout.attributes[location.attribute];
            let field = if attribute.ty.is_matrix() { column_field_name(&attribute.name, location.column) } else { attribute.name.clone() };
            code.push_str(&format!("    @location({}) {field}: {},\n", location.location, location.ty.wgsl_name()));
        }
        code.push_str("}\n\n");
    }
    write_vertex_output(&mut code, desc)?;

    code.push_str("@vertex\n");
    if locations.is_empty() {
        code.push_str("fn vs_main() -> VertexOutput {\n");
    } else {
        code.push_str("fn vs_main(vertex_in: VertexInput) -> VertexOutput {\n");
    }
    write_constant_locals(&mut code, desc);
    for attribute in &layout.attributes {
        let value = if attribute.ty.is_matrix() {
            let (count, _) = attribute.ty.columns();
            let columns: Vec<_> = (0..count).map(|column| format!("vertex_in.{}", column_field_name(&attribute.name, column))).collect();
            format!("{}({})", attribute.ty.wgsl_name(), columns.join(", "))
        } else {
            format!("vertex_in.{}", attribute.name)
        };
        code.push_str(&format!("    let {} = {value};\n", attribute.name));
    }
    code.push_str("    var vertex_out: VertexOutput;\n");
    emit_body(&mut code, &desc.vertex_body, |statement| statement_line(desc, statement));
    code.push_str("    return vertex_out;\n");
    code.push_str("}\n");
    Ok(code)
}

/// Renders the fragment stage module with its `fs_main` entry point
pub fn render_fragment(desc: &PipelineDesc) -> Result<String, AssemblyError> {
    let mut code = String::new();
    write_constants(&mut code, desc);

    let mut any_sampler = false;
    for (index, sampler) in desc.samplers().enumerate() {
        code.push_str(&format!("@group(0) @binding({}) var {}: texture_2d<f32>;\n", texture_binding(index), sampler.name));
        code.push_str(&format!("@group(0) @binding({}) var {}: sampler;\n", sampler_binding(index), sampler_binding_name(&sampler.name)));
        any_sampler = true;
    }
    if any_sampler {
        code.push('\n');
    }
    write_vertex_output(&mut code, desc)?;

    code.push_str("@fragment\n");
    code.push_str("fn fs_main(fragment_in: VertexOutput) -> @location(0) vec4<f32> {\n");
    write_constant_locals(&mut code, desc);
    for varying in desc.interpolated_varyings() {
        code.push_str(&format!("    let {0} = fragment_in.{0};\n", varying.name));
    }
    emit_body(&mut code, &desc.fragment_body, |statement| statement_line(desc, statement));
    if !matches!(desc.fragment_body.last(), Some(Statement::ReturnColor { .. })) {
        // Paths that never set a color produce transparent black
        code.push_str("    return vec4<f32>(0.0, 0.0, 0.0, 0.0);\n");
    }
    code.push_str("}\n");
    Ok(code)
}

fn write_constants(code: &mut String, desc: &PipelineDesc) {
    let mut constants = desc.constants().peekable();
    if constants.peek().is_none() {
        return;
    }
    code.push_str("struct Constants {\n");
    for (uniform, ty) in constants {
        code.push_str(&format!("    {}: {},\n", uniform.name, ty.wgsl_name()));
    }
    code.push_str("}\n\n");
    code.push_str("@group(0) @binding(0) var<uniform> constants: Constants;\n\n");
}

fn write_constant_locals(code: &mut String, desc: &PipelineDesc) {
    for (uniform, _) in desc.constants() {
        code.push_str(&format!("    let {0} = constants.{0};\n", uniform.name));
    }
}

fn write_vertex_output(code: &mut String, desc: &PipelineDesc) -> Result<(), AssemblyError> {
    code.push_str("struct VertexOutput {\n");
    code.push_str(&format!("    @builtin(position) {CLIP_POSITION_FIELD}: vec4<f32>,\n"));
    for (location, varying) in desc.interpolated_varyings().enumerate() {
        if varying.ty.is_matrix() {
            return Err(AssemblyError::MatrixVarying { name: varying.name.clone() });
        }
        code.push_str(&format!("    @location({location}) {}: {},\n", varying.name, varying.ty.wgsl_name()));
    }
    code.push_str("}\n\n");
    Ok(())
}

fn statement_line(desc: &PipelineDesc, statement: &Statement) -> String {
    match statement {
        Statement::Assign { ty: Some(ty), lhs, rhs, .. } => format!("var {lhs}: {} = {rhs};", ty.wgsl_name()),
        Statement::Assign { ty: None, lhs, rhs, .. } => format!("{lhs} = {rhs};"),
        Statement::AssignOutput { target, expr } => {
            let is_clip_position = desc.varying(target).is_some_and(|varying| varying.is_clip_position());
            let field = if is_clip_position { CLIP_POSITION_FIELD } else { target.as_str() };
            format!("vertex_out.{field} = {expr};")
        }
        Statement::ReturnColor { expr } => format!("return {expr};"),
        // Block statements are written by `emit_body`
        Statement::If { .. } | Statement::ElseIf { .. } | Statement::Else | Statement::EndIf => String::new(),
    }
}
