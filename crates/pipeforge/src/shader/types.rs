//! Closed set of shader value types and declaration semantics

use std::fmt;
use std::str::FromStr;

/// Value types a declaration or typed statement can carry
///
/// The set is closed: every declaration type maps to a fixed component width, so a pipeline can never
/// describe an attribute whose size is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl ShaderType {
    /// All shader types, scalars first
    pub const ALL: [ShaderType; 7] = [ShaderType::Float, ShaderType::Vec2, ShaderType::Vec3, ShaderType::Vec4, ShaderType::Mat2, ShaderType::Mat3, ShaderType::Mat4];

    /// Returns the neutral type name used in pipeline descriptions
    pub fn name(&self) -> &'static str {
        match self {
            ShaderType::Float => "float",
            ShaderType::Vec2 => "vec2",
            ShaderType::Vec3 => "vec3",
            ShaderType::Vec4 => "vec4",
            ShaderType::Mat2 => "mat2",
            ShaderType::Mat3 => "mat3",
            ShaderType::Mat4 => "mat4",
        }
    }

    /// Returns the number of floats in a value of this type
    pub fn components(&self) -> usize {
        match self {
            ShaderType::Float => 1,
            ShaderType::Vec2 => 2,
            ShaderType::Vec3 => 3,
            ShaderType::Vec4 | ShaderType::Mat2 => 4,
            ShaderType::Mat3 => 9,
            ShaderType::Mat4 => 16,
        }
    }

    /// Returns true for the square matrix types
    pub fn is_matrix(&self) -> bool {
        matches!(self, ShaderType::Mat2 | ShaderType::Mat3 | ShaderType::Mat4)
    }

    /// Splits a value of this type into column vectors
    ///
    /// # Returns
    /// `(column_count, column_type)`; non-matrix types are a single column of themselves
    pub fn columns(&self) -> (usize, ShaderType) {
        match self {
            ShaderType::Mat2 => (2, ShaderType::Vec2),
            ShaderType::Mat3 => (3, ShaderType::Vec3),
            ShaderType::Mat4 => (4, ShaderType::Vec4),
            other => (1, *other),
        }
    }

    /// Returns the GLSL ES 1.00 spelling of this type
    pub fn glsl_name(&self) -> &'static str {
        // GLSL shares the neutral names
        self.name()
    }

    /// Returns the WGSL spelling of this type
    pub fn wgsl_name(&self) -> &'static str {
        match self {
            ShaderType::Float => "f32",
            ShaderType::Vec2 => "vec2<f32>",
            ShaderType::Vec3 => "vec3<f32>",
            ShaderType::Vec4 => "vec4<f32>",
            ShaderType::Mat2 => "mat2x2<f32>",
            ShaderType::Mat3 => "mat3x3<f32>",
            ShaderType::Mat4 => "mat4x4<f32>",
        }
    }
}

impl fmt::Display for ShaderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ShaderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShaderType::ALL.into_iter().find(|ty| ty.name() == s).ok_or_else(|| format!("unknown shader type '{s}'"))
    }
}

/// Role of a vertex attribute or varying
///
/// Semantics are descriptive except for [`Semantic::ClipPosition`], which marks the varying that
/// feeds the rasterizer's clip-space position instead of being interpolated like the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semantic {
    Position0,
    Position1,
    Position2,
    ClipPosition,
    TexCoord0,
    TexCoord1,
    TexCoord2,
    Color0,
    Color1,
    Color2,
    Normal0,
    Normal1,
    Normal2,
}

impl Semantic {
    pub const ALL: [Semantic; 13] = [
        Semantic::Position0,
        Semantic::Position1,
        Semantic::Position2,
        Semantic::ClipPosition,
        Semantic::TexCoord0,
        Semantic::TexCoord1,
        Semantic::TexCoord2,
        Semantic::Color0,
        Semantic::Color1,
        Semantic::Color2,
        Semantic::Normal0,
        Semantic::Normal1,
        Semantic::Normal2,
    ];

    /// Returns the semantic's name as written in pipeline descriptions
    pub fn name(&self) -> &'static str {
        match self {
            Semantic::Position0 => "position0",
            Semantic::Position1 => "position1",
            Semantic::Position2 => "position2",
            Semantic::ClipPosition => "sv_position",
            Semantic::TexCoord0 => "texcoord0",
            Semantic::TexCoord1 => "texcoord1",
            Semantic::TexCoord2 => "texcoord2",
            Semantic::Color0 => "color0",
            Semantic::Color1 => "color1",
            Semantic::Color2 => "color2",
            Semantic::Normal0 => "normal0",
            Semantic::Normal1 => "normal1",
            Semantic::Normal2 => "normal2",
        }
    }

    pub fn is_clip_position(&self) -> bool {
        *self == Semantic::ClipPosition
    }
}

impl fmt::Display for Semantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Semantic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Semantic::ALL.into_iter().find(|semantic| semantic.name() == s).ok_or_else(|| format!("unknown semantic '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_widths() {
        let widths: Vec<_> = ShaderType::ALL.iter().map(ShaderType::components).collect();
        assert_eq!(widths, vec![1, 2, 3, 4, 4, 9, 16]);
    }

    #[test]
    fn test_matrix_columns_cover_components() {
        for ty in ShaderType::ALL {
            let (count, column) = ty.columns();
            assert_eq!(count * column.components(), ty.components(), "{ty}");
            assert!(!column.is_matrix());
        }
    }

    #[test]
    fn test_names_round_trip() {
        assert_eq!("mat3".parse::<ShaderType>().unwrap(), ShaderType::Mat3);
        assert_eq!("sv_position".parse::<Semantic>().unwrap(), Semantic::ClipPosition);
        assert!("double".parse::<ShaderType>().is_err());
        assert!("position3".parse::<Semantic>().is_err());
    }

    #[test]
    fn test_wgsl_names() {
        assert_eq!(ShaderType::Float.wgsl_name(), "f32");
        assert_eq!(ShaderType::Vec3.wgsl_name(), "vec3<f32>");
        assert_eq!(ShaderType::Mat4.wgsl_name(), "mat4x4<f32>");
    }
}
