use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use binlift_core::db::{BlockRecord, FunctionRecord};

use crate::commands::util::{format_addresses, open_existing_run_db};

/// List recorded translations, optionally for one binary only.
pub fn list_runs_command(db: &str, binary: Option<&str>, json: bool) -> Result<()> {
    let db = open_existing_run_db(Path::new(db))?;
    let runs = db.list_translations(binary).context("Failed to list translations")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    println!("Translations:");
    if runs.is_empty() {
        println!("(none)");
        return Ok(());
    }
    for run in runs {
        println!(
            "- {} [{}] entries: {}, blocks: {}, functions: {}, relocations: {} ({} -> {})",
            run.binary,
            run.status.as_str(),
            format_addresses(&run.entry_points),
            run.blocks,
            run.functions,
            run.relocations,
            run.started_at,
            run.finished_at
        );
        if let Some(error) = &run.error {
            println!("    error: {}", error);
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct RunInventory {
    binary: String,
    run_id: i64,
    blocks: Vec<BlockRecord>,
    functions: Vec<FunctionRecord>,
}

/// Show the block and function inventory of the newest run for `binary`.
pub fn show_run_command(db: &str, binary: &str, json: bool) -> Result<()> {
    let db = open_existing_run_db(Path::new(db))?;
    let run_id = db
        .latest_translation_id(binary)
        .context("Failed to query translations")?
        .ok_or_else(|| anyhow!("No translations recorded for {}", binary))?;
    let inventory = RunInventory {
        binary: binary.to_string(),
        run_id,
        blocks: db.load_blocks(run_id).context("Failed to load blocks")?,
        functions: db.load_functions(run_id).context("Failed to load functions")?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&inventory)?);
        return Ok(());
    }

    println!("Run {} of {}:", inventory.run_id, inventory.binary);
    println!("Functions:");
    if inventory.functions.is_empty() {
        println!("(none)");
    }
    for f in &inventory.functions {
        println!(
            "- {} at {:#x} ({:#x}..{:#x}, {} blocks)",
            f.name, f.entry, f.low, f.high, f.blocks
        );
    }
    println!("Blocks: {}", inventory.blocks.len());
    for b in &inventory.blocks {
        println!("- {:#x} +{} {}", b.address, b.size, b.kind);
    }

    Ok(())
}
