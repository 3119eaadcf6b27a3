use std::path::{Path, PathBuf};

/// Directory name prefix for experiment-mode output directories.
pub const EXPERIMENT_PREFIX: &str = "binlift-out-";

/// Symlink that always points at the newest experiment directory.
pub const LAST_EXPERIMENT_LINK: &str = "binlift-last";

/// Where the artifacts of one translation go.
///
/// This is derived from a chosen output directory. It does *not* perform any IO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub root: PathBuf,
    /// Serialized IR module (JSON).
    pub module_path: PathBuf,
    /// Block start addresses, one per line.
    pub bblist_path: PathBuf,
    /// Function entry addresses, one per line.
    pub functions_path: PathBuf,
    pub stats_path: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            module_path: root.join("module.json"),
            bblist_path: root.join("bblist.txt"),
            functions_path: root.join("functions.txt"),
            stats_path: root.join("stats.txt"),
            root,
        }
    }

    /// Layout for experiment number `index` under `parent`.
    pub fn experiment(parent: impl AsRef<Path>, index: u32) -> Self {
        Self::new(parent.as_ref().join(format!("{EXPERIMENT_PREFIX}{index}")))
    }

    pub fn artifacts(&self) -> [&Path; 4] {
        [&self.module_path, &self.bblist_path, &self.functions_path, &self.stats_path]
    }
}

/// Parse the index out of an experiment directory name.
pub fn experiment_index(name: &str) -> Option<u32> {
    name.strip_prefix(EXPERIMENT_PREFIX)?.parse().ok()
}
