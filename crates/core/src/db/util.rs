use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::db::{RunDb, TranslatorConfig};

/// Load a translator config, or the defaults when no path is given.
pub fn load_translator_config(path: Option<&Path>) -> Result<TranslatorConfig> {
    let Some(path) = path else {
        return Ok(TranslatorConfig::default());
    };
    TranslatorConfig::load(path)
        .with_context(|| format!("Failed to load translator config at {}", path.display()))
}

/// Open (or create) the run history database.
pub fn open_run_db(path: &Path) -> Result<RunDb> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create directory for run database at {}", parent.display())
        })?;
    }
    RunDb::open(path)
        .with_context(|| format!("Failed to open run database at {}", path.display()))
}

/// Hex SHA-256 of an in-memory buffer.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
