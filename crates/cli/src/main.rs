use anyhow::Result;
use binlift::commands::{
    inspect_command, list_runs_command, show_run_command, translate_command, TranslateArgs,
};
use clap::{Parser, Subcommand};

/// Static CFG and function-boundary reconstruction for native binaries.
///
/// This CLI is a thin wrapper around `binlift-core` (exposed in code as `binlift_core`).
/// All substantive logic lives in the library so it can be tested thoroughly
/// and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "binlift",
    version,
    about = "Lift native binaries to IR with reconstructed CFGs and functions",
    long_about = None
)]
struct Cli {
    /// Log every lifted address and pass decision.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate a binary into an IR module.
    ///
    /// Writes `module.json`, `bblist.txt`, `functions.txt` and `stats.txt`
    /// to the output directory, only if the whole translation succeeds.
    Translate(TranslateArgs),

    /// Show the sections, imports and relocations the loader finds in a binary.
    Inspect {
        /// Binary to inspect.
        input: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List translations recorded in a run history database.
    Runs {
        /// Run history database (as passed to `translate --db`).
        #[arg(long)]
        db: String,

        /// Only show runs of this binary.
        #[arg(long)]
        binary: Option<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the block and function inventory of the newest run of a binary.
    ShowRun {
        #[arg(long)]
        db: String,

        #[arg(long)]
        binary: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    env_logger::Builder::new()
        .filter_module("binlift", level)
        .filter_module("binlift_core", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Translate(args) => translate_command(&args)?,
        Command::Inspect { input, json } => inspect_command(&input, json)?,
        Command::Runs { db, binary, json } => list_runs_command(&db, binary.as_deref(), json)?,
        Command::ShowRun { db, binary, json } => show_run_command(&db, &binary, json)?,
    }

    Ok(())
}
