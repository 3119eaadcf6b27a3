use log::{debug, trace};

use crate::ir::{Inst, Module, Operand};
use crate::resolve::{ResolveError, ResolveStats, Resolver};

/// Outcome of looking for a relocated constant in one function copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Site {
    /// The instruction is not part of this function.
    Absent,
    /// The instruction is here but none of its operands carries the value.
    Missing,
    Found,
}

/// Replace the first `Const { value }` between the marker for `pc` and the next marker.
fn patch_site(insts: &mut [Inst], pc: u64, value: u64, replacement: Option<&Operand>) -> Site {
    let Some(start) = insts
        .iter()
        .position(|inst| matches!(inst, Inst::InstructionMarker { pc: p } if *p == pc))
    else {
        return Site::Absent;
    };
    let span = insts[start + 1..]
        .iter_mut()
        .take_while(|inst| !matches!(inst, Inst::InstructionMarker { .. }));
    for inst in span {
        for op in inst.operands_mut() {
            if *op == (Operand::Const { value }) {
                if let Some(replacement) = replacement {
                    *op = replacement.clone();
                }
                return Site::Found;
            }
        }
    }
    Site::Missing
}

impl Resolver<'_> {
    /// Pass 1a: every relocation inside explored code must name a known target.
    pub(crate) fn patch_relocations(
        &self,
        module: &mut Module,
        stats: &mut ResolveStats,
    ) -> Result<(), ResolveError> {
        for reloc in self.image.relocations() {
            let Some(pc) = self.store.find_containing(reloc.site).and_then(|b| b.instruction_at(reloc.site))
            else {
                trace!("relocation at {:#x} is outside explored code", reloc.site);
                stats.skipped_relocations += 1;
                continue;
            };
            let value = reloc.expected_value();
            let replacement = self.classify(value);

            let mut located = false;
            for func in &mut module.functions {
                for block in &mut func.blocks {
                    match patch_site(&mut block.insts, pc, value, replacement.as_ref()) {
                        Site::Absent => {}
                        Site::Missing => {
                            return Err(ResolveError::RelocationValueNotFound {
                                site: reloc.site,
                                value,
                            })
                        }
                        Site::Found if replacement.is_none() => {
                            return Err(ResolveError::UnresolvedRelocation {
                                site: reloc.site,
                                value,
                            })
                        }
                        Site::Found => located = true,
                    }
                }
            }

            if located {
                stats.relocations += 1;
                debug!("relocation at {:#x} -> {value:#x}", reloc.site);
            } else {
                stats.skipped_relocations += 1;
                debug!("relocation at {:#x}: instruction {pc:#x} is in no function", reloc.site);
            }
        }
        Ok(())
    }
}
