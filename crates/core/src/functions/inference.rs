use std::collections::BTreeMap;

use log::{debug, warn};

use crate::cfg::BlockStore;
use crate::functions::FunctionLayout;

/// Function entries: stored blocks with no incoming successor edge, minus import stubs.
///
/// Call targets are not edges, so a called block with no other predecessor
/// becomes an entry. Entries are returned in address order.
pub fn infer_functions(store: &BlockStore) -> Vec<u64> {
    let mut in_degree: BTreeMap<u64, usize> = store.addresses().map(|a| (a, 0)).collect();
    for block in store.iter() {
        for succ in &block.successors {
            if let Some(count) = in_degree.get_mut(succ) {
                *count += 1;
            }
        }
    }

    in_degree
        .into_iter()
        .filter(|(_, count)| *count == 0)
        .map(|(address, _)| address)
        .filter(|address| match store.get(*address) {
            Some(block) if block.is_import_stub() => {
                debug!("{address:#x} is an import stub, not a function");
                false
            }
            Some(_) => true,
            None => false,
        })
        .collect()
}

/// Entries that lie strictly inside another function's address range.
pub fn overlapping_entries(layouts: &[FunctionLayout]) -> Vec<u64> {
    let mut overlapping = Vec::new();
    for layout in layouts {
        let inside = layouts.iter().find(|other| {
            other.entry != layout.entry && layout.entry > other.low && layout.entry < other.high
        });
        if let Some(other) = inside {
            warn!(
                "function {:#x} lies inside function {:#x} ({:#x}..{:#x})",
                layout.entry, other.entry, other.low, other.high
            );
            overlapping.push(layout.entry);
        }
    }
    overlapping
}
