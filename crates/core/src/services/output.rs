use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};

use crate::db::{experiment_index, OutputLayout, LAST_EXPERIMENT_LINK};
use crate::services::{RunStats, TranslationOutput};

/// Create `dir` (if needed) and return its layout.
pub fn prepare_output_dir(dir: &Path) -> Result<OutputLayout> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    Ok(OutputLayout::new(dir))
}

/// Allocate the next `binlift-out-N` directory under `parent` and point
/// `binlift-last` at it.
pub fn allocate_experiment(parent: &Path) -> Result<OutputLayout> {
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory {}", parent.display()))?;

    let mut next = 0;
    let entries = fs::read_dir(parent)
        .with_context(|| format!("Failed to list directory {}", parent.display()))?;
    for entry in entries {
        let entry = entry?;
        if let Some(index) = entry.file_name().to_str().and_then(experiment_index) {
            next = next.max(index + 1);
        }
    }

    let layout = OutputLayout::experiment(parent, next);
    fs::create_dir(&layout.root).with_context(|| {
        format!("Failed to create experiment directory {}", layout.root.display())
    })?;
    refresh_last_link(parent, &layout)?;
    info!("experiment directory {}", layout.root.display());
    Ok(layout)
}

#[cfg(unix)]
fn refresh_last_link(parent: &Path, layout: &OutputLayout) -> Result<()> {
    let link = parent.join(LAST_EXPERIMENT_LINK);
    if fs::symlink_metadata(&link).is_ok() {
        fs::remove_file(&link)
            .with_context(|| format!("Failed to remove stale link {}", link.display()))?;
    }
    let target = layout.root.file_name().map(Path::new).unwrap_or(layout.root.as_path());
    std::os::unix::fs::symlink(target, &link)
        .with_context(|| format!("Failed to create link {}", link.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn refresh_last_link(_parent: &Path, _layout: &OutputLayout) -> Result<()> {
    warn!("{LAST_EXPERIMENT_LINK} is only maintained on unix hosts");
    Ok(())
}

/// One `0x...` address per line.
pub fn render_addresses(addresses: &[u64]) -> String {
    addresses.iter().map(|address| format!("{address:#x}\n")).collect()
}

pub fn render_stats(stats: &RunStats, timestamp: &str) -> String {
    let counters = [
        ("entry_points", stats.entry_points),
        ("explored", stats.explored),
        ("lifted", stats.lifted),
        ("dropped", stats.dropped),
        ("blocks", stats.blocks),
        ("functions", stats.functions),
        ("relocations", stats.relocations),
        ("skipped_relocations", stats.skipped_relocations),
        ("memory_accesses", stats.memory_accesses),
        ("hardcoded_accesses", stats.hardcoded_accesses),
        ("splits", stats.splits),
        ("duplicates", stats.duplicates),
        ("jump_tables", stats.jump_tables),
        ("direct_calls", stats.direct_calls),
        ("import_calls", stats.import_calls),
        ("indirect_calls", stats.indirect_calls),
        ("wrappers", stats.wrappers),
    ];
    let overlapping: Vec<String> =
        stats.overlapping_entries.iter().map(|a| format!("{a:#x}")).collect();

    let mut lines = vec![
        format!("timestamp: {timestamp}"),
        format!("elapsed_secs: {:.3}", stats.elapsed_secs),
    ];
    lines.extend(counters.iter().map(|(name, value)| format!("{name}: {value}")));
    lines.push(format!("overlapping_entries: [{}]", overlapping.join(", ")));
    lines.iter().map(|line| format!("{line}\n")).collect()
}

/// Write every artifact of a finished run.
pub fn write_artifacts(layout: &OutputLayout, output: &TranslationOutput) -> Result<()> {
    if !output.stats.overlapping_entries.is_empty() {
        warn!("{} overlapping function entries", output.stats.overlapping_entries.len());
    }

    let module_json = serde_json::to_string_pretty(&output.module)
        .context("Failed to serialize module to JSON")?;
    let timestamp = Utc::now().to_rfc3339();
    let files = [
        (&layout.module_path, module_json),
        (&layout.bblist_path, render_addresses(&output.block_addresses())),
        (&layout.functions_path, render_addresses(&output.function_addresses())),
        (&layout.stats_path, render_stats(&output.stats, &timestamp)),
    ];
    for (path, contents) in files {
        fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    info!("wrote artifacts to {}", layout.root.display());
    Ok(())
}
