//! Pipeline orchestration and artifact output.

pub mod output;
pub mod translator;

pub use output::{
    allocate_experiment, prepare_output_dir, render_addresses, render_stats, write_artifacts,
};
pub use translator::{RunStats, TranslateError, TranslateRequest, TranslationOutput, Translator};
