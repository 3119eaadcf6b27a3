use std::collections::BTreeMap;

use log::debug;

use crate::cfg::BasicBlock;
use crate::image::Import;
use crate::ir::{Callee, Inst, IrBlock, IrFunction, Module, Operand};
use crate::resolve::{sanitize, ResolveError, ResolveStats, Resolver};

/// Generated wrappers, keyed by import slot.
type Wrappers = BTreeMap<u64, IrFunction>;

impl Resolver<'_> {
    /// Pass 2: replace every call marker with a typed call.
    pub(crate) fn resolve_calls(
        &self,
        module: &mut Module,
        stats: &mut ResolveStats,
    ) -> Result<(), ResolveError> {
        let mut wrappers = Wrappers::new();
        for func in &mut module.functions {
            for block in &mut func.blocks {
                let mut site = func.address;
                for idx in 0..block.insts.len() {
                    match block.insts[idx].clone() {
                        Inst::InstructionMarker { pc } => site = pc,
                        Inst::CallMarker { target, is_static, state } => {
                            let callee = self.callee(
                                &block.insts[..idx],
                                &target,
                                is_static,
                                site,
                                &mut wrappers,
                            )?;
                            match callee {
                                Callee::Function { .. } => stats.direct_calls += 1,
                                Callee::Import { .. } => stats.import_calls += 1,
                                Callee::Indirect { .. } => stats.indirect_calls += 1,
                            }
                            block.insts[idx] = Inst::Call { callee, state };
                        }
                        _ => {}
                    }
                }
            }
        }
        stats.wrappers = wrappers.len();
        module.wrappers = wrappers.into_values().collect();
        Ok(())
    }

    fn callee(
        &self,
        preceding: &[Inst],
        target: &Operand,
        is_static: bool,
        site: u64,
        wrappers: &mut Wrappers,
    ) -> Result<Callee, ResolveError> {
        if is_static {
            let address = target.static_address().unwrap_or_default();
            if let Some(name) = self.functions.get(&address) {
                return Ok(Callee::Function { name: name.clone(), address });
            }
            let slot = self.store.get(address).and_then(BasicBlock::stub_slot);
            if let Some((slot, import)) =
                slot.and_then(|s| self.image.imports().get(&s).map(|i| (s, i)))
            {
                return Ok(self.import_callee(slot, import, wrappers));
            }
            return Err(ResolveError::UnresolvedCall { site, target: address });
        }

        // call [slot] loads the destination from an import slot.
        let loaded_from = target.as_temp().and_then(|temp| {
            preceding.iter().rev().find_map(|inst| match inst {
                Inst::Load { dst, addr, .. } if *dst == temp => addr.static_address(),
                _ => None,
            })
        });
        if let Some((slot, import)) =
            loaded_from.and_then(|s| self.image.imports().get(&s).map(|i| (s, i)))
        {
            return Ok(self.import_callee(slot, import, wrappers));
        }
        debug!("indirect call at {site:#x}");
        Ok(Callee::Indirect { target: target.clone() })
    }

    fn import_callee(&self, slot: u64, import: &Import, wrappers: &mut Wrappers) -> Callee {
        if !wrappers.contains_key(&slot) {
            let mut name = format!("import_{}", sanitize(&import.name));
            if wrappers.values().any(|w| w.name == name) {
                name = format!("{name}_{slot:x}");
            }
            let call = Inst::ImportCall {
                import: import.name.clone(),
                library: import.library.clone(),
                convention: self.image.calling_convention(),
            };
            let entry = IrBlock::new("entry".to_string(), vec![call, Inst::Return]);
            debug!("wrapper {name} for import {} at slot {slot:#x}", import.name);
            wrappers.insert(slot, IrFunction { name, address: slot, blocks: vec![entry], next_temp: 0 });
        }
        let wrapper = wrappers.get(&slot).map(|w| w.name.clone()).unwrap_or_default();
        Callee::Import { wrapper, import: import.name.clone(), slot }
    }
}
