use serde::{Deserialize, Serialize};

/// Outcome of a translation run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    /// Decode a stored status; anything unknown reads as failed.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "succeeded" => RunStatus::Succeeded,
            _ => RunStatus::Failed,
        }
    }
}

/// One row of translation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslationRecord {
    /// File name of the translated binary.
    pub binary: String,
    /// SHA-256 of the input file.
    pub binary_hash: Option<String>,
    pub arch: String,
    pub entry_points: Vec<u64>,
    pub status: RunStatus,
    /// Error message for failed runs.
    pub error: Option<String>,
    pub blocks: usize,
    pub functions: usize,
    pub relocations: usize,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRecord {
    pub address: u64,
    pub size: u64,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionRecord {
    pub name: String,
    pub entry: u64,
    pub low: u64,
    pub high: u64,
    pub blocks: usize,
}
