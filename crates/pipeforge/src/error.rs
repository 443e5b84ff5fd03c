//! Error types for pipeline assembly, resource management and backend failures

use crate::pool::ResourceKind;
use crate::shader::ShaderStage;
use crate::shader::ir::DeclarationKind;

/// Errors raised while a pipeline description is being assembled or rendered to source text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    #[error("too many {kind} declarations (limit {limit})")]
    TooManyDeclarations { kind: DeclarationKind, limit: usize },

    #[error("`{name}` is already declared in this pipeline")]
    DuplicateDeclaration { name: String },

    #[error("`{name}` clashes with the generated identifier `{generated}`")]
    ReservedName { name: String, generated: String },

    #[error("`{name}` is a second clip-position varying; only one is allowed")]
    DuplicateClipPosition { name: String },

    #[error("`{statement}` issued outside of a shader body")]
    NoOpenBody { statement: &'static str },

    #[error("cannot open the {requested} body while the {open} body is still open")]
    BodyAlreadyOpen { requested: ShaderStage, open: ShaderStage },

    #[error("the {stage} body has already been defined")]
    BodyAlreadyDefined { stage: ShaderStage },

    #[error("the {stage} body is not open")]
    BodyNotOpen { stage: ShaderStage },

    #[error("the {stage} body was never defined")]
    MissingBody { stage: ShaderStage },

    #[error("the {stage} body is still open")]
    UnterminatedBody { stage: ShaderStage },

    #[error("{depth} conditional block(s) left open in the {stage} body")]
    UnclosedBlock { stage: ShaderStage, depth: usize },

    #[error("`{statement}` without an open `if` block")]
    ElseWithoutIf { statement: &'static str },

    #[error("`{statement}` after the `else` branch of the same block")]
    ElseAfterElse { statement: &'static str },

    #[error("`end_if` without an open `if` block")]
    EndIfWithoutIf,

    #[error("`{statement}` is not allowed in the {stage} body")]
    WrongStage { statement: &'static str, stage: ShaderStage },

    #[error("`{name}` is not a declared pixel shader input")]
    UnknownOutput { name: String },

    #[error("varying `{name}` has a matrix type, which the target dialect cannot interpolate")]
    MatrixVarying { name: String },
}

/// Errors reported by a graphics backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("no suitable GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to open GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("failed to map readback buffer: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),

    #[error("failed to wait for the GPU: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("GPU validation error: {0}")]
    Validation(String),

    #[error("constant `{name}` is not part of the program's constant block")]
    ConstantNotInLayout { name: String },

    #[error("backend object was already released")]
    StaleObject,
}

/// Top-level error type of the renderer
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("{kind} pool exhausted (capacity {capacity})")]
    Capacity { kind: ResourceKind, capacity: usize },

    #[error("invalid or stale {kind} handle")]
    InvalidHandle { kind: ResourceKind },

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("{stage} shader failed to compile:\n{log}")]
    Compile { stage: ShaderStage, log: String },

    #[error("program failed to link:\n{log}")]
    Link { log: String },

    #[error("{stage} shader source is {size} bytes, over the {limit} byte limit")]
    ShaderSourceTooLarge { stage: ShaderStage, size: usize, limit: usize },

    #[error("pipeline has no constant named `{name}`")]
    UnknownConstant { name: String },

    #[error("constant `{name}` of type {type_name} cannot be updated through a constant buffer")]
    UnsupportedConstantType { name: String, type_name: &'static str },

    #[error("constant `{name}` expects {expected} floats, got {actual}")]
    ConstantSizeMismatch { name: String, expected: usize, actual: usize },

    #[error("upload of {actual} elements exceeds the {kind} size of {capacity}")]
    BufferOverflow { kind: ResourceKind, capacity: usize, actual: usize },

    #[error("mip level {level} is {expected_width}x{expected_height}, image is {actual_width}x{actual_height}")]
    TextureSizeMismatch { level: u32, expected_width: u32, expected_height: u32, actual_width: u32, actual_height: u32 },

    #[error("mip level {level} is out of range ({levels} levels)")]
    MipLevelOutOfRange { level: u32, levels: u32 },

    #[error("no frame is active")]
    FrameNotActive,

    #[error("a frame is already active")]
    FrameAlreadyActive,

    #[error("draw requires a bound {0}")]
    MissingBinding(ResourceKind),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors raised while loading a [`RendererConfig`](crate::RendererConfig)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_norway::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
