//! Renderer configuration
//!
//! Every field has a default, so a YAML document only needs to name the values it changes:
//!
//! ```yaml
//! pipelines: 16
//! max_declarations: 8
//! clear_color: [0.0, 0.0, 0.0, 1.0]
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Pool capacities, assembly limits and frame defaults of a [`Renderer`](crate::Renderer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// Capacity of the pipeline pool
    pub pipelines: usize,
    /// Capacity of the vertex buffer pool
    pub vertex_buffers: usize,
    /// Capacity of the index buffer pool
    pub index_buffers: usize,
    /// Capacity of the constant buffer pool
    pub constant_buffers: usize,
    /// Capacity of the texture pool
    pub textures: usize,
    /// Limit of each declaration list of a pipeline
    pub max_declarations: usize,
    /// Limit on the generated source of one stage, in bytes
    pub max_shader_source_bytes: usize,
    /// RGBA color the target is cleared to at the start of a frame
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            pipelines: 128,
            vertex_buffers: 1024,
            index_buffers: 1024,
            constant_buffers: 1024,
            textures: 1024,
            max_declarations: crate::shader::assembler::DEFAULT_MAX_DECLARATIONS,
            max_shader_source_bytes: 32768,
            clear_color: [0.0, 0.0, 1.0, 0.0],
        }
    }
}

impl RendererConfig {
    /// Parses a configuration from YAML
    ///
    /// # Arguments
    /// * `yaml_content` - YAML string containing the configuration
    pub fn from_yaml(yaml_content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_norway::from_str(yaml_content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Checks that every capacity and limit is usable
    ///
    /// # Returns
    /// Ok(()) if valid, or the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("pipelines", self.pipelines),
            ("vertex_buffers", self.vertex_buffers),
            ("index_buffers", self.index_buffers),
            ("constant_buffers", self.constant_buffers),
            ("textures", self.textures),
            ("max_declarations", self.max_declarations),
            ("max_shader_source_bytes", self.max_shader_source_bytes),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
            if value > u32::MAX as usize {
                return Err(ConfigError::Invalid(format!("{name} must fit in 32 bits")));
            }
        }

        if let Some(component) = self.clear_color.iter().find(|c| !c.is_finite()) {
            return Err(ConfigError::Invalid(format!("clear_color component {component} is not finite")));
        }
        Ok(())
    }
}
