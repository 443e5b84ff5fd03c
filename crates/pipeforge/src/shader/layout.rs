//! Memory layouts derived from a pipeline description
//!
//! Two layouts are derived here and shared by every consumer so that generated shader text and the
//! backend wiring can never disagree:
//! - the vertex layout: attribute offsets within one vertex and the per-vertex stride
//! - the constant block layout: byte offsets of constants inside the uniform block

use super::ir::{AttributeDecl, PipelineDesc};
use super::types::ShaderType;

/// Size in bytes of one vertex component
pub const FLOAT_SIZE: usize = std::mem::size_of::<f32>();

/// One vertex attribute placed within the vertex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub name: String,
    pub ty: ShaderType,
    /// Offset from the start of the vertex, in floats
    pub offset: usize,
}

impl VertexAttribute {
    /// Returns the width of this attribute in floats
    pub fn width(&self) -> usize {
        self.ty.components()
    }
}

/// A shader input location fed from the vertex buffer
///
/// Matrix attributes occupy one location per column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeLocation {
    pub location: u32,
    /// Index of the attribute in declaration order
    pub attribute: usize,
    /// Column index, always 0 for non-matrix attributes
    pub column: usize,
    /// Type fed through this location
    pub ty: ShaderType,
    /// Offset from the start of the vertex, in floats
    pub offset: usize,
}

/// Interleaved layout of one vertex
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayout {
    pub attributes: Vec<VertexAttribute>,
    /// Per-vertex stride, in floats
    pub stride: usize,
}

impl VertexLayout {
    /// Derives the layout from a pipeline's vertex shader inputs
    pub fn from_desc(desc: &PipelineDesc) -> Self {
        Self::from_attributes(&desc.attributes)
    }

    /// Packs attributes tightly in declaration order
    ///
    /// # Arguments
    /// * `attributes` - Vertex shader inputs in declaration order
    ///
    /// # Returns
    /// A layout whose attribute `i` starts at the sum of the widths of attributes `0..i`
    pub fn from_attributes(attributes: &[AttributeDecl]) -> Self {
        let mut offset = 0;
        let attributes = attributes
            .iter()
            .map(|attribute| {
                let placed = VertexAttribute {
                    name: attribute.name.clone(),
                    ty: attribute.ty,
                    offset,
                };
                offset += attribute.width();
                placed
            })
            .collect();

        Self { attributes, stride: offset }
    }

    /// Returns the per-vertex stride in bytes
    pub fn stride_bytes(&self) -> usize {
        self.stride * FLOAT_SIZE
    }

    /// Assigns shader input locations to attributes and matrix columns
    pub fn locations(&self) -> Vec<AttributeLocation> {
        let mut locations = Vec::new();
        for (index, attribute) in self.attributes.iter().enumerate() {
            let (count, column_ty) = attribute.ty.columns();
            for column in 0..count {
                locations.push(AttributeLocation {
                    location: locations.len() as u32,
                    attribute: index,
                    column,
                    ty: column_ty,
                    offset: attribute.offset + column * column_ty.components(),
                });
            }
        }
        locations
    }
}

/// A constant placed within the uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantField {
    pub name: String,
    pub ty: ShaderType,
    /// Byte offset from the start of the block
    pub offset: usize,
}

/// Byte layout of a pipeline's constants in one uniform block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantLayout {
    pub fields: Vec<ConstantField>,
    /// Block size in bytes, a multiple of 16
    pub size: usize,
}

/// Returns `(size, alignment)` in bytes of a type inside a uniform block
///
/// Matrix columns are padded to vec4 alignment except for 2-column matrices.
pub fn uniform_size_align(ty: ShaderType) -> (usize, usize) {
    match ty {
        ShaderType::Float => (4, 4),
        ShaderType::Vec2 => (8, 8),
        ShaderType::Vec3 => (12, 16),
        ShaderType::Vec4 => (16, 16),
        ShaderType::Mat2 => (16, 8),
        ShaderType::Mat3 => (48, 16),
        ShaderType::Mat4 => (64, 16),
    }
}

impl ConstantLayout {
    /// Places every constant of a pipeline in declaration order, skipping samplers
    pub fn from_desc(desc: &PipelineDesc) -> Self {
        let mut offset: usize = 0;
        let fields = desc
            .constants()
            .map(|(uniform, ty)| {
                let (size, align) = uniform_size_align(ty);
                let field = ConstantField {
                    name: uniform.name.clone(),
                    ty,
                    offset: offset.next_multiple_of(align),
                };
                offset = field.offset + size;
                field
            })
            .collect();

        Self {
            fields,
            size: offset.next_multiple_of(16),
        }
    }

    /// Looks up a constant by name
    pub fn field(&self, name: &str) -> Option<&ConstantField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ir::{UniformDecl, UniformKind};
    use crate::shader::types::Semantic;

    fn attribute(name: &str, ty: ShaderType) -> AttributeDecl {
        AttributeDecl {
            ty,
            name: name.to_string(),
            semantic: Semantic::Position0,
        }
    }

    #[test]
    fn test_offsets_are_running_sums_of_widths() {
        let layout = VertexLayout::from_attributes(&[attribute("a_pos", ShaderType::Vec3), attribute("a_uv", ShaderType::Vec2), attribute("a_color", ShaderType::Vec4), attribute("a_weight", ShaderType::Float)]);

        let offsets: Vec<_> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 3, 5, 9]);
        assert_eq!(layout.stride, 10);
        assert_eq!(layout.stride_bytes(), 40);
    }

    #[test]
    fn test_matrix_widths_count_towards_stride() {
        let layout = VertexLayout::from_attributes(&[attribute("a_m2", ShaderType::Mat2), attribute("a_m3", ShaderType::Mat3), attribute("a_m4", ShaderType::Mat4)]);
        assert_eq!(layout.attributes[1].offset, 4);
        assert_eq!(layout.attributes[2].offset, 13);
        assert_eq!(layout.stride, 29);
    }

    #[test]
    fn test_empty_layout() {
        let layout = VertexLayout::from_attributes(&[]);
        assert_eq!(layout.stride, 0);
        assert!(layout.locations().is_empty());
    }

    #[test]
    fn test_matrix_attributes_take_one_location_per_column() {
        let layout = VertexLayout::from_attributes(&[attribute("a_pos", ShaderType::Vec3), attribute("a_model", ShaderType::Mat4), attribute("a_uv", ShaderType::Vec2)]);
        let locations = layout.locations();

        assert_eq!(locations.len(), 6);
        assert_eq!(locations[1], AttributeLocation { location: 1, attribute: 1, column: 0, ty: ShaderType::Vec4, offset: 3 });
        assert_eq!(locations[4], AttributeLocation { location: 4, attribute: 1, column: 3, ty: ShaderType::Vec4, offset: 15 });
        assert_eq!(locations[5], AttributeLocation { location: 5, attribute: 2, column: 0, ty: ShaderType::Vec2, offset: 19 });
    }

    #[test]
    fn test_constant_block_follows_uniform_alignment() {
        let constant = |name: &str, ty| UniformDecl {
            name: name.to_string(),
            kind: UniformKind::Constant(ty),
            note: String::new(),
        };
        let desc = PipelineDesc {
            uniforms: vec![
                constant("u_alpha", ShaderType::Float),
                UniformDecl {
                    name: "u_tex".to_string(),
                    kind: UniformKind::Sampler,
                    note: String::new(),
                },
                constant("u_offset", ShaderType::Vec2),
                constant("u_tint", ShaderType::Vec3),
                constant("u_gain", ShaderType::Float),
                constant("u_basis", ShaderType::Mat3),
                constant("u_mvp", ShaderType::Mat4),
            ],
            ..Default::default()
        };

        let layout = ConstantLayout::from_desc(&desc);
        let offsets: Vec<_> = layout.fields.iter().map(|f| (f.name.as_str(), f.offset)).collect();
        assert_eq!(offsets, vec![("u_alpha", 0), ("u_offset", 8), ("u_tint", 16), ("u_gain", 28), ("u_basis", 32), ("u_mvp", 80)]);
        assert_eq!(layout.size, 144);
        assert!(layout.field("u_tex").is_none());
    }

    #[test]
    fn test_block_size_is_padded_to_16() {
        let desc = PipelineDesc {
            uniforms: vec![UniformDecl {
                name: "u_time".to_string(),
                kind: UniformKind::Constant(ShaderType::Float),
                note: String::new(),
            }],
            ..Default::default()
        };
        assert_eq!(ConstantLayout::from_desc(&desc).size, 16);
        assert_eq!(ConstantLayout::from_desc(&PipelineDesc::default()).size, 0);
    }
}
