//! Configuration, output layout and the optional run-history database.
//!
//! - `TranslatorConfig`: serde config loaded from JSON or YAML.
//! - `OutputLayout`: computed artifact paths for one run.
//! - `RunDb`: a small SQLite wrapper recording translations and their
//!   block and function inventories.

pub mod config;
pub mod layout;
pub mod models;
pub mod run_db;
pub mod util;

pub use config::{ConfigError, TranslatorConfig, CONFIG_VERSION};
pub use layout::{experiment_index, OutputLayout, EXPERIMENT_PREFIX, LAST_EXPERIMENT_LINK};
pub use models::{BlockRecord, FunctionRecord, RunStatus, TranslationRecord};
pub use run_db::{DbError, DbResult, RunDb, CURRENT_SCHEMA_VERSION};
pub use util::{load_translator_config, open_run_db, sha256_hex};
