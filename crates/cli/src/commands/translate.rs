use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Args;
use log::{error, info};
use serde::Serialize;

use binlift_core::db::{RunStatus, TranslationRecord, TranslatorConfig};
use binlift_core::image::Arch;
use binlift_core::lifter::MAX_BLOCK_INSTRUCTIONS;
use binlift_core::services::{
    allocate_experiment, prepare_output_dir, write_artifacts, RunStats, TranslateRequest,
    TranslationOutput, Translator,
};

use crate::commands::util::record_run;
use crate::{binary_name, canonicalize_or_current, parse_address, sha256_file};

/// Options of the `translate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct TranslateArgs {
    /// Binary to translate (ELF or PE, x86 or x86-64).
    pub input: String,

    /// Directory the artifacts are written to.
    #[arg(long, default_value = ".")]
    pub output_dir: String,

    /// Entry point address (hex or decimal). Repeatable; replaces the image entry.
    #[arg(long = "entrypoint", value_name = "ADDRESS")]
    pub entry_points: Vec<String>,

    /// Do not fall back to the entry point recorded in the image.
    #[arg(long, default_value_t = false)]
    pub no_default_entry: bool,

    /// Write into a fresh `binlift-out-N` directory under the output dir.
    #[arg(long, default_value_t = false)]
    pub exp_mode: bool,

    /// Translator config file (.json, .yaml or .yml).
    #[arg(long)]
    pub config: Option<String>,

    /// Record the run in this SQLite history database.
    #[arg(long)]
    pub db: Option<String>,

    /// Decode as this architecture (x86, x86_64) regardless of the headers.
    #[arg(long)]
    pub arch: Option<String>,

    /// Instructions per lifted unit; 1 lifts one instruction at a time.
    #[arg(long)]
    pub max_block_instructions: Option<usize>,

    /// Emit a JSON summary instead of human-readable text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct TranslateSummary<'a> {
    binary: String,
    output_dir: PathBuf,
    entry_points: Vec<String>,
    stats: &'a RunStats,
}

/// Merge the config file (if any) with command-line overrides.
pub fn effective_config(args: &TranslateArgs) -> Result<TranslatorConfig> {
    let config_path = args.config.as_deref().map(Path::new);
    let mut config = binlift_core::db::load_translator_config(config_path)?;
    if let Some(arch) = &args.arch {
        config.arch = Some(Arch::from_str(arch).with_context(|| format!("Invalid --arch {arch}"))?);
    }
    if let Some(max) = args.max_block_instructions {
        if !(1..=MAX_BLOCK_INSTRUCTIONS).contains(&max) {
            return Err(anyhow!(
                "--max-block-instructions must be between 1 and {MAX_BLOCK_INSTRUCTIONS}"
            ));
        }
        config.max_block_instructions = max;
    }
    Ok(config)
}

pub fn build_request(args: &TranslateArgs, name: &str) -> Result<TranslateRequest> {
    let mut request = TranslateRequest::new(name);
    for text in &args.entry_points {
        request = request.with_entry(parse_address(text)?);
    }
    request.use_image_entry = !args.no_default_entry;
    Ok(request)
}

/// Translate one binary and write its artifacts.
///
/// Nothing is written to the output directory unless the whole pipeline succeeds.
pub fn translate_command(args: &TranslateArgs) -> Result<()> {
    let input = canonicalize_or_current(&args.input)?;
    if !input.is_file() {
        return Err(anyhow!("Input binary does not exist: {}", input.display()));
    }
    let config = effective_config(args)?;
    let name = binary_name(&input);
    let request = build_request(args, &name)?;

    let started_at = Utc::now().to_rfc3339();
    let translator = Translator::new(config);
    let result = translator.translate_file(&input, &request);

    let output = match result {
        Ok(output) => output,
        Err(err) => {
            match err.address() {
                Some(address) => error!("translation of {name} failed at {address:#x}: {err}"),
                None => error!("translation of {name} failed: {err}"),
            }
            if let Some(db) = &args.db {
                let record = run_record(&input, &name, &translator, &request, None, &started_at)
                    .map(|r| TranslationRecord { error: Some(err.to_string()), ..r })?;
                record_run(Path::new(db), &record, None)?;
            }
            return Err(err).with_context(|| format!("Failed to translate {}", input.display()));
        }
    };

    let output_dir = canonicalize_or_current(&args.output_dir)?;
    let layout = if args.exp_mode {
        allocate_experiment(&output_dir)?
    } else {
        prepare_output_dir(&output_dir)?
    };
    write_artifacts(&layout, &output)?;
    info!("{name}: {} blocks, {} functions", output.stats.blocks, output.stats.functions);

    if let Some(db) = &args.db {
        let record = run_record(&input, &name, &translator, &request, Some(&output), &started_at)?;
        record_run(Path::new(db), &record, Some(&output))?;
    }

    if args.json {
        let summary = TranslateSummary {
            binary: name,
            output_dir: layout.root.clone(),
            entry_points: output.entry_points.iter().map(|e| format!("{e:#x}")).collect(),
            stats: &output.stats,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Translated {}:", name);
    println!("  Output dir: {}", layout.root.display());
    println!("  Blocks: {}", output.stats.blocks);
    println!("  Functions: {}", output.stats.functions);
    println!("  Relocations: {}", output.stats.relocations);
    println!(
        "  Memory accesses: {} ({} hard-coded)",
        output.stats.memory_accesses, output.stats.hardcoded_accesses
    );
    if !output.stats.overlapping_entries.is_empty() {
        println!("  Overlapping entries: {}", output.stats.overlapping_entries.len());
    }
    println!("  Elapsed: {:.3}s", output.stats.elapsed_secs);

    Ok(())
}

fn run_record(
    input: &Path,
    name: &str,
    translator: &Translator,
    request: &TranslateRequest,
    output: Option<&TranslationOutput>,
    started_at: &str,
) -> Result<TranslationRecord> {
    let arch = output
        .map(|o| o.arch)
        .or(translator.config().arch)
        .map(|a| a.to_string())
        .unwrap_or_else(|| "auto".into());
    Ok(TranslationRecord {
        binary: name.to_string(),
        binary_hash: Some(sha256_file(input)?),
        arch,
        entry_points: output
            .map(|o| o.entry_points.clone())
            .unwrap_or_else(|| request.entry_points.clone()),
        status: if output.is_some() { RunStatus::Succeeded } else { RunStatus::Failed },
        error: None,
        blocks: output.map(|o| o.stats.blocks).unwrap_or_default(),
        functions: output.map(|o| o.stats.functions).unwrap_or_default(),
        relocations: output.map(|o| o.stats.relocations).unwrap_or_default(),
        started_at: started_at.to_string(),
        finished_at: Utc::now().to_rfc3339(),
    })
}
