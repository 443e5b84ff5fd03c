//! GLSL ES 1.00 source generation
//!
//! Both stages start with the version marker and a default float precision. Constants are declared
//! in both stages, samplers only in the fragment stage. The clip-position varying is never declared;
//! writes to it go to `gl_Position` instead.

use super::emit_body;
use super::ir::{PipelineDesc, Statement};

/// Boilerplate shared by both stages
const PRELUDE: &str = "#version 100\nprecision mediump float;\n";

/// Reserved output of the vertex stage
const CLIP_POSITION: &str = "gl_Position";

/// Reserved output of the fragment stage
const FRAG_COLOR: &str = "gl_FragColor";

/// Renders the vertex stage source
pub fn render_vertex(desc: &PipelineDesc) -> String {
    let mut code = String::from(PRELUDE);

    for (uniform, ty) in desc.constants() {
        code.push_str(&format!("uniform {} {};\n", ty.glsl_name(), uniform.name));
    }
    for attribute in &desc.attributes {
        code.push_str(&format!("attribute {} {};\n", attribute.ty.glsl_name(), attribute.name));
    }
    write_varyings(&mut code, desc);

    code.push_str("void main() {\n");
    emit_body(&mut code, &desc.vertex_body, |statement| statement_line(desc, statement));
    code.push_str("}\n");
    code
}

/// Renders the fragment stage source
pub fn render_fragment(desc: &PipelineDesc) -> String {
    let mut code = String::from(PRELUDE);

    for uniform in &desc.uniforms {
        let type_name = match uniform.constant_type() {
            Some(ty) => ty.glsl_name(),
            None => "sampler2D",
        };
        code.push_str(&format!("uniform {type_name} {};\n", uniform.name));
    }
    write_varyings(&mut code, desc);

    code.push_str("void main() {\n");
    emit_body(&mut code, &desc.fragment_body, |statement| statement_line(desc, statement));
    code.push_str("}\n");
    code
}

fn write_varyings(code: &mut String, desc: &PipelineDesc) {
    for varying in desc.interpolated_varyings() {
        code.push_str(&format!("varying {} {};\n", varying.ty.glsl_name(), varying.name));
    }
}

fn statement_line(desc: &PipelineDesc, statement: &Statement) -> String {
    match statement {
        Statement::Assign { ty: Some(ty), lhs, rhs, .. } => format!("{} {lhs} = {rhs};", ty.glsl_name()),
        Statement::Assign { ty: None, lhs, rhs, .. } => format!("{lhs} = {rhs};"),
        Statement::AssignOutput { target, expr } => {
            let is_clip_position = desc.varying(target).is_some_and(|varying| varying.is_clip_position());
            let lhs = if is_clip_position { CLIP_POSITION } else { target.as_str() };
            format!("{lhs} = {expr};")
        }
        Statement::ReturnColor { expr } => format!("{FRAG_COLOR} = {expr};"),
        // Block statements are written by `emit_body`
        Statement::If { .. } | Statement::ElseIf { .. } | Statement::Else | Statement::EndIf => String::new(),
    }
}
