use std::path::Path;

use anyhow::{anyhow, Context, Result};

use binlift_core::db::{open_run_db, RunDb, TranslationRecord};
use binlift_core::services::TranslationOutput;

/// Append a run (and, for successful runs, its inventory) to the history database.
pub fn record_run(
    db_path: &Path,
    record: &TranslationRecord,
    output: Option<&TranslationOutput>,
) -> Result<i64> {
    let db = open_run_db(db_path)?;
    let id = db.insert_translation(record).context("Failed to insert translation record")?;
    if let Some(output) = output {
        db.insert_inventory(id, &output.block_records(), &output.function_records())
            .context("Failed to store block and function inventory")?;
    }
    Ok(id)
}

/// Open a history database that must already exist.
pub fn open_existing_run_db(db_path: &Path) -> Result<RunDb> {
    if !db_path.is_file() {
        return Err(anyhow!("Run database does not exist: {}", db_path.display()));
    }
    open_run_db(db_path)
}

/// Comma-separated `0x` addresses, or `(none)`.
pub fn format_addresses(addresses: &[u64]) -> String {
    if addresses.is_empty() {
        return "(none)".to_string();
    }
    addresses.iter().map(|a| format!("{a:#x}")).collect::<Vec<_>>().join(", ")
}
