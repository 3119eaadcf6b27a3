//! binlift-core
//!
//! Static control-flow and function-boundary reconstruction for native
//! binaries, lifted to a small owned IR.
//!
//! The pipeline runs in order:
//! - `cfg`: worklist exploration into a store of disjoint basic blocks;
//! - `functions`: entry inference and per-function IR assembly;
//! - `resolve`: relocation patching, data/function/import references and call resolution.
//!
//! `image` and `lifter` are the seams the pipeline consumes; `services` ties it
//! together for frontends, and `db` holds config, output layout and run history.

pub mod cfg;
pub mod db;
pub mod functions;
pub mod image;
pub mod ir;
pub mod lifter;
pub mod resolve;
pub mod services;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
