use std::collections::BTreeSet;
#[cfg(feature = "capstone-backend")]
use std::path::Path;
use std::time::Instant;

use log::info;
use serde::Serialize;
use thiserror::Error;

use crate::cfg::{explore, BlockStore, ExploreError, ExploreOptions};
use crate::db::{BlockRecord, ConfigError, FunctionRecord, TranslatorConfig};
use crate::functions::{
    infer_functions, overlapping_entries, AssembleError, AssembleOptions, FunctionAssembler,
    FunctionLayout,
};
use crate::image::{Arch, BinaryImage, ImageError};
use crate::ir::Module;
use crate::lifter::{LiftError, Lifter};
use crate::resolve::{resolve, ResolveError};

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("no entry points: the image has none and none were given")]
    NoEntryPoints,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Lifter(#[from] LiftError),

    #[error("exploration failed: {0}")]
    Explore(#[from] ExploreError),

    #[error("function assembly failed: {0}")]
    Assemble(#[from] AssembleError),

    #[error("resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}

impl TranslateError {
    /// Guest address the failure is attributed to, when there is one.
    pub fn address(&self) -> Option<u64> {
        match self {
            TranslateError::Explore(ExploreError::Block(err)) => err.address(),
            TranslateError::Assemble(AssembleError::UnknownEntry(entry)) => Some(*entry),
            TranslateError::Assemble(AssembleError::MissingTarget { block, .. }) => Some(*block),
            TranslateError::Resolve(err) => err.site(),
            _ => None,
        }
    }
}

/// What to translate and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslateRequest {
    /// Name given to the output module.
    pub name: String,
    /// Explicit entry points; when non-empty they replace the image entry.
    pub entry_points: Vec<u64>,
    /// Fall back to the image's own entry point when no explicit one is given.
    pub use_image_entry: bool,
}

impl TranslateRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), entry_points: Vec::new(), use_image_entry: true }
    }

    pub fn with_entry(mut self, address: u64) -> Self {
        self.entry_points.push(address);
        self
    }
}

/// Counters reported in `stats.txt`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub elapsed_secs: f64,
    pub entry_points: usize,
    pub explored: usize,
    pub lifted: usize,
    pub dropped: usize,
    pub blocks: usize,
    pub functions: usize,
    pub relocations: usize,
    pub skipped_relocations: usize,
    pub memory_accesses: usize,
    pub hardcoded_accesses: usize,
    pub splits: usize,
    pub duplicates: usize,
    pub jump_tables: usize,
    pub direct_calls: usize,
    pub import_calls: usize,
    pub indirect_calls: usize,
    pub wrappers: usize,
    /// Function entries lying strictly inside another function's range.
    pub overlapping_entries: Vec<u64>,
}

/// Everything a successful run produces.
#[derive(Debug)]
pub struct TranslationOutput {
    pub arch: Arch,
    pub module: Module,
    pub blocks: BlockStore,
    pub layouts: Vec<FunctionLayout>,
    pub entry_points: Vec<u64>,
    pub stats: RunStats,
}

impl TranslationOutput {
    pub fn block_addresses(&self) -> Vec<u64> {
        self.blocks.addresses().collect()
    }

    pub fn function_addresses(&self) -> Vec<u64> {
        self.layouts.iter().map(|l| l.entry).collect()
    }

    pub fn block_records(&self) -> Vec<BlockRecord> {
        self.blocks
            .iter()
            .map(|b| BlockRecord { address: b.address, size: b.size, kind: b.kind.to_string() })
            .collect()
    }

    pub fn function_records(&self) -> Vec<FunctionRecord> {
        self.layouts
            .iter()
            .map(|l| FunctionRecord {
                name: l.name.clone(),
                entry: l.entry,
                low: l.low,
                high: l.high,
                blocks: l.blocks.len(),
            })
            .collect()
    }
}

/// Runs the whole pipeline: explore, infer, assemble, resolve.
#[derive(Debug, Clone, Default)]
pub struct Translator {
    config: TranslatorConfig,
}

impl Translator {
    pub fn new(config: TranslatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    pub fn explore_options(&self) -> ExploreOptions {
        ExploreOptions {
            extract_addresses: self.config.extract_addresses,
            min_string_len: self.config.min_string_len,
            detect_jump_tables: self.config.jump_table_detection,
        }
    }

    pub fn assemble_options(&self, program_entry: Option<u64>) -> AssembleOptions {
        AssembleOptions {
            entry_name: self.config.entry_name.clone(),
            function_prefix: self.config.function_prefix.clone(),
            program_entry,
        }
    }

    /// Explicit entries win; otherwise the image entry unless disabled.
    pub fn entry_points(
        &self,
        image: &dyn BinaryImage,
        request: &TranslateRequest,
    ) -> Result<Vec<u64>, TranslateError> {
        let entries: BTreeSet<u64> = if !request.entry_points.is_empty() {
            request.entry_points.iter().copied().collect()
        } else if request.use_image_entry {
            image.entry_point().into_iter().collect()
        } else {
            BTreeSet::new()
        };
        if entries.is_empty() {
            return Err(TranslateError::NoEntryPoints);
        }
        Ok(entries.into_iter().collect())
    }

    pub fn translate(
        &self,
        lifter: &mut dyn Lifter,
        image: &dyn BinaryImage,
        request: &TranslateRequest,
    ) -> Result<TranslationOutput, TranslateError> {
        let started = Instant::now();
        let entry_points = self.entry_points(image, request)?;
        info!(
            "translating {} ({}) with {} lifter from {} entry point(s)",
            request.name,
            image.arch(),
            lifter.name(),
            entry_points.len()
        );

        let exploration = explore(lifter, image, &entry_points, &self.explore_options())?;
        let entries = infer_functions(&exploration.blocks);
        info!("inferred {} functions", entries.len());

        let program_entry = image.entry_point();
        let assembler = FunctionAssembler::new(
            &exploration.blocks,
            &entries,
            self.assemble_options(program_entry),
        );
        let (functions, layouts) = assembler.assemble_all()?;
        let overlapping = overlapping_entries(&layouts);

        let mut module = Module::new(request.name.clone());
        module.functions = functions;
        let resolved = resolve(&mut module, image, &exploration.blocks)?;

        let stats = RunStats {
            elapsed_secs: started.elapsed().as_secs_f64(),
            entry_points: entry_points.len(),
            explored: exploration.explored.len(),
            lifted: exploration.stats.lifted,
            dropped: exploration.dropped.len(),
            blocks: exploration.blocks.len(),
            functions: layouts.len(),
            relocations: resolved.relocations,
            skipped_relocations: resolved.skipped_relocations,
            memory_accesses: resolved.memory_accesses,
            hardcoded_accesses: resolved.hardcoded_accesses,
            splits: exploration.stats.splits,
            duplicates: exploration.stats.duplicates,
            jump_tables: exploration.jump_tables.len(),
            direct_calls: resolved.direct_calls,
            import_calls: resolved.import_calls,
            indirect_calls: resolved.indirect_calls,
            wrappers: resolved.wrappers,
            overlapping_entries: overlapping,
        };
        info!("translation of {} finished in {:.3}s", request.name, stats.elapsed_secs);

        Ok(TranslationOutput {
            arch: image.arch(),
            module,
            blocks: exploration.blocks,
            layouts,
            entry_points,
            stats,
        })
    }

    /// Load the binary at `path` and translate it with the bundled capstone lifter.
    #[cfg(feature = "capstone-backend")]
    pub fn translate_file(
        &self,
        path: &Path,
        request: &TranslateRequest,
    ) -> Result<TranslationOutput, TranslateError> {
        use crate::image::MemoryImage;
        use crate::lifter::CapstoneLifter;

        let mut image = MemoryImage::open(path)?;
        if let Some(arch) = self.config.arch {
            image = image.with_arch(arch);
        }
        let mut lifter = CapstoneLifter::new(self.config.max_block_instructions);
        self.translate(&mut lifter, &image, request)
    }
}
