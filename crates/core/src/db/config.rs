use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::Arch;
use crate::lifter::{DEFAULT_MAX_BLOCK_INSTRUCTIONS, MAX_BLOCK_INSTRUCTIONS};

/// Config format version this crate writes and understands.
pub const CONFIG_VERSION: &str = "0.1.0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Only `.json`, `.yaml` and `.yml` are recognised.
    #[error("Unsupported config extension for {0}")]
    UnsupportedExtension(PathBuf),

    #[error("Unsupported config version {found}; expected {expected}")]
    UnsupportedVersion { found: String, expected: &'static str },

    #[error("max_block_instructions must be between 1 and {max}, got {value}")]
    BlockLimit { value: usize, max: usize },
}

/// Tunables for one translation run. Every field has a default, so an empty
/// file is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub config_version: String,
    /// Treat constants found in lifted code as candidate block addresses.
    pub extract_addresses: bool,
    /// Shortest printable run that marks a candidate as string data.
    pub min_string_len: usize,
    /// Instructions decoded per lifted unit; 1 means single-step.
    pub max_block_instructions: usize,
    /// Name of the function at the program entry point.
    pub entry_name: String,
    pub function_prefix: String,
    /// Decode as this architecture instead of the one in the headers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<Arch>,
    pub jump_table_detection: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION.to_string(),
            extract_addresses: true,
            min_string_len: 2,
            max_block_instructions: DEFAULT_MAX_BLOCK_INSTRUCTIONS,
            entry_name: "entry_point".to_string(),
            function_prefix: "function".to_string(),
            arch: None,
            jump_table_detection: true,
        }
    }
}

impl TranslatorConfig {
    /// Load a config from JSON or YAML, chosen by file extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        let config: TranslatorConfig = match ext.as_deref() {
            Some("json") => serde_json::from_str(&text)?,
            Some("yaml") | Some("yml") => {
                if text.trim().is_empty() {
                    TranslatorConfig::default()
                } else {
                    serde_yaml::from_str(&text)?
                }
            }
            _ => return Err(ConfigError::UnsupportedExtension(path.to_path_buf())),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config_version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: self.config_version.clone(),
                expected: CONFIG_VERSION,
            });
        }
        if !(1..=MAX_BLOCK_INSTRUCTIONS).contains(&self.max_block_instructions) {
            return Err(ConfigError::BlockLimit {
                value: self.max_block_instructions,
                max: MAX_BLOCK_INSTRUCTIONS,
            });
        }
        Ok(())
    }
}
