//! Relocation and symbol resolution over an assembled module.
//!
//! Setup creates one global per loaded section. Pass 1 patches relocated
//! constants and then rewrites every remaining constant that names a function,
//! an import slot or section data. Pass 2 turns call markers into typed calls.

pub mod calls;
pub mod relocations;

use std::collections::BTreeMap;

use log::info;
use serde::Serialize;
use thiserror::Error;

use crate::cfg::BlockStore;
use crate::image::{BinaryImage, Section};
use crate::ir::{GlobalData, Inst, Module, Operand, VerifyError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("relocation at {site:#x}: value {value:#x} not found in the lifted instruction")]
    RelocationValueNotFound { site: u64, value: u64 },

    #[error("relocation at {site:#x}: value {value:#x} matches no function, import or section")]
    UnresolvedRelocation { site: u64, value: u64 },

    #[error("call at {site:#x} to {target:#x} resolves to neither a function nor an import")]
    UnresolvedCall { site: u64, target: u64 },

    #[error(transparent)]
    Verify(#[from] VerifyError),
}

impl ResolveError {
    pub fn site(&self) -> Option<u64> {
        match self {
            ResolveError::RelocationValueNotFound { site, .. }
            | ResolveError::UnresolvedRelocation { site, .. }
            | ResolveError::UnresolvedCall { site, .. } => Some(*site),
            ResolveError::Verify(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveStats {
    pub relocations: usize,
    /// Relocations whose site is not in explored code.
    pub skipped_relocations: usize,
    pub rewritten_constants: usize,
    pub memory_accesses: usize,
    /// Loads and stores through a statically known address.
    pub hardcoded_accesses: usize,
    pub direct_calls: usize,
    pub import_calls: usize,
    pub indirect_calls: usize,
    pub wrappers: usize,
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim_start_matches('.')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "section".to_string()
    } else {
        cleaned
    }
}

pub fn global_name(section: &Section) -> String {
    format!("{}_global_{:x}", sanitize(&section.name), section.address)
}

/// One global per loaded section; zero-filled sections carry no initialiser.
pub fn create_globals(image: &dyn BinaryImage) -> Vec<GlobalData> {
    image
        .sections()
        .iter()
        .map(|section| GlobalData {
            name: global_name(section),
            section: section.name.clone(),
            address: section.address,
            size: section.size,
            init: section.data.clone(),
        })
        .collect()
}

pub struct Resolver<'a> {
    image: &'a dyn BinaryImage,
    store: &'a BlockStore,
    /// Reconstructed function entry -> function name.
    functions: BTreeMap<u64, String>,
}

impl<'a> Resolver<'a> {
    pub fn new(image: &'a dyn BinaryImage, store: &'a BlockStore, module: &Module) -> Self {
        let functions = module.functions.iter().map(|f| (f.address, f.name.clone())).collect();
        Self { image, store, functions }
    }

    /// Typed replacement for a constant equal to `value`, by priority:
    /// function entry, import slot, section data.
    pub fn classify(&self, value: u64) -> Option<Operand> {
        if let Some(name) = self.functions.get(&value) {
            return Some(Operand::FunctionRef { name: name.clone(), address: value });
        }
        if let Some(import) = self.image.imports().get(&value) {
            return Some(Operand::ImportRef { name: import.name.clone(), slot: value });
        }
        self.image.section_containing(value).map(|section| Operand::DataRef {
            global: global_name(section),
            offset: value - section.address,
            address: value,
        })
    }

    /// Run both passes in place and verify the result.
    pub fn resolve(&self, module: &mut Module) -> Result<ResolveStats, ResolveError> {
        let mut stats = ResolveStats::default();
        module.globals = create_globals(self.image);

        self.patch_relocations(module, &mut stats)?;
        self.rewrite_constants(module, &mut stats);
        count_memory_accesses(module, &mut stats);
        self.resolve_calls(module, &mut stats)?;

        module.verify()?;
        info!(
            "resolved {} relocations, {} constants, {} calls ({} via imports)",
            stats.relocations,
            stats.rewritten_constants,
            stats.direct_calls + stats.import_calls + stats.indirect_calls,
            stats.import_calls
        );
        Ok(stats)
    }

    /// Rewrite every remaining data constant that classifies.
    fn rewrite_constants(&self, module: &mut Module, stats: &mut ResolveStats) {
        for func in &mut module.functions {
            for inst in func.insts_mut() {
                for op in inst.operands_mut() {
                    if let Operand::Const { value } = op {
                        if let Some(replacement) = self.classify(*value) {
                            *op = replacement;
                            stats.rewritten_constants += 1;
                        }
                    }
                }
            }
        }
    }
}

fn count_memory_accesses(module: &Module, stats: &mut ResolveStats) {
    for inst in module.insts() {
        let addr = match inst {
            Inst::Load { addr, .. } | Inst::Store { addr, .. } => addr,
            _ => continue,
        };
        stats.memory_accesses += 1;
        if addr.static_address().is_some() {
            stats.hardcoded_accesses += 1;
        }
    }
}

/// Resolve `module` against the image it was lifted from.
pub fn resolve(
    module: &mut Module,
    image: &dyn BinaryImage,
    store: &BlockStore,
) -> Result<ResolveStats, ResolveError> {
    Resolver::new(image, store, module).resolve(module)
}
