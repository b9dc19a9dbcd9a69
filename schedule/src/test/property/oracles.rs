//! Oracles over scheduled output.

use std::collections::{HashMap, HashSet};

use twill_ir::{Block, Refinement, StmtId, StmtKind};

use crate::mem::MemRange;

fn is_cache_entry(name: &str) -> bool {
    name.contains('^')
}

/// Budget: every cache-entry refinement fits inside the configured memory.
pub fn check_budget(block: &Block, mem_bytes: usize) {
    for r in &block.refs {
        if is_cache_entry(&r.into) {
            assert!(
                r.offset + r.interior_shape.byte_size() <= mem_bytes,
                "entry {} at offset {} size {} exceeds budget {}",
                r.into,
                r.offset,
                r.interior_shape.byte_size(),
                mem_bytes
            );
        }
    }
}

/// Name uniqueness: refinement names are pairwise distinct.
pub fn check_name_uniqueness(block: &Block) {
    let mut seen = HashSet::new();
    for r in &block.refs {
        assert!(seen.insert(r.into.clone()), "duplicate refinement name {}", r.into);
    }
}

/// Dependency sanity: edges point backwards in runtime order, and no direct
/// edge is implied by a longer chain.
pub fn check_deps(block: &Block) {
    let mut position: HashMap<StmtId, usize> = HashMap::new();
    for (pos, (id, _)) in block.stmts.iter().enumerate() {
        position.insert(id, pos);
    }

    let mut closure: HashMap<StmtId, HashSet<StmtId>> = HashMap::new();
    for (id, stmt) in block.stmts.iter() {
        let mut transitive: HashSet<StmtId> = HashSet::new();
        for dep in &stmt.deps {
            assert!(
                position[dep] < position[&id],
                "dep of statement {} points forward",
                position[&id]
            );
            if let Some(deps_of_dep) = closure.get(dep) {
                transitive.extend(deps_of_dep.iter().copied());
            }
        }
        for dep in &stmt.deps {
            assert!(
                !transitive.contains(dep),
                "redundant dep edge at statement {}",
                position[&id]
            );
        }
        transitive.extend(stmt.deps.iter().copied());
        closure.insert(id, transitive);
    }
}

fn transfer_refs(b: &Block) -> (&Refinement, &Refinement) {
    let src = b.ref_by_into("src").expect("transfer block has a src ref");
    let dst = b.ref_by_into("dst").expect("transfer block has a dst ref");
    (src, dst)
}

/// Swap symmetry: swap-outs mirror the swap-in templates of their source.
pub fn check_swap_symmetry(block: &Block) {
    let mut in_sides: HashMap<String, (&Refinement, &Refinement)> = HashMap::new();
    let mut out_sides: HashMap<String, (&Refinement, &Refinement)> = HashMap::new();
    for (_, stmt) in block.stmts.iter() {
        let StmtKind::Block(b) = &stmt.kind else { continue };
        let (src, dst) = transfer_refs(b);
        if let Some(entry) = b.name.strip_prefix("swap_in_") {
            let source = entry.split('^').next().expect("entry name").to_string();
            // src is the backing side, dst the cache side.
            in_sides.insert(source, (src, dst));
        } else if let Some(entry) = b.name.strip_prefix("swap_out_") {
            let source = entry.split('^').next().expect("entry name").to_string();
            // src is the cache side, dst the backing side.
            out_sides.insert(source, (dst, src));
        }
    }
    for (source, (in_backing, in_cache)) in &in_sides {
        let Some((out_backing, out_cache)) = out_sides.get(source) else { continue };
        assert_eq!(in_backing.access, out_backing.access, "backing access mismatch for {source}");
        assert_eq!(in_backing.interior_shape, out_backing.interior_shape, "backing shape mismatch for {source}");
        assert_eq!(in_cache.access, out_cache.access, "cache access mismatch for {source}");
        assert_eq!(in_cache.interior_shape, out_cache.interior_shape, "cache shape mismatch for {source}");
    }
}

/// Conservation: every written output refinement reaches backing memory.
pub fn check_conservation(block: &Block, originally_written: &HashSet<String>) {
    for name in originally_written {
        let backing = block.ref_by_into(name).expect("written refinement survives scheduling");
        if !backing.dir.is_write() {
            continue;
        }
        let delivered = block.stmts.iter().any(|(_, stmt)| {
            let StmtKind::Block(b) = &stmt.kind else { return false };
            b.ref_by_into("dst").is_some_and(|dst| dst.from == *name)
        });
        assert!(delivered, "no swap-out delivers {name} to backing memory");
    }
}

/// Dataflow simulation: running the scheduled statements in list order,
/// every read observes a value that was actually produced.
///
/// Cache entries sharing memory invalidate each other on write; backing
/// refinements start defined when their direction reads, and become defined
/// when a swap-out writes them.
pub fn check_dataflow(block: &Block, original_dirs: &HashMap<String, twill_ir::RefDir>) {
    let mut ranges: HashMap<String, MemRange> = HashMap::new();
    for r in &block.refs {
        if is_cache_entry(&r.into) {
            ranges.insert(r.into.clone(), MemRange::new(r.offset, r.offset + r.interior_shape.byte_size()));
        }
    }

    let mut defined_entries: HashSet<String> = HashSet::new();
    let mut defined_backing: HashSet<String> =
        original_dirs.iter().filter(|(_, d)| d.is_read()).map(|(n, _)| n.clone()).collect();

    let read = |name: &str, defined_entries: &HashSet<String>, defined_backing: &HashSet<String>| {
        if is_cache_entry(name) {
            assert!(defined_entries.contains(name), "read of undefined cache entry {name}");
        } else {
            assert!(defined_backing.contains(name), "read of undefined backing memory {name}");
        }
    };
    let write = |name: &str, defined_entries: &mut HashSet<String>, defined_backing: &mut HashSet<String>,
                 ranges: &HashMap<String, MemRange>| {
        if is_cache_entry(name) {
            let range = ranges[name];
            defined_entries.retain(|other| !ranges[other].overlaps(range));
            defined_entries.insert(name.to_string());
        } else {
            defined_backing.insert(name.to_string());
        }
    };

    for (_, stmt) in block.stmts.iter() {
        match &stmt.kind {
            StmtKind::Load { from, .. } => read(from, &defined_entries, &defined_backing),
            StmtKind::Store { into, .. } => {
                write(into, &mut defined_entries, &mut defined_backing, &ranges)
            }
            StmtKind::Special { inputs, outputs, .. } => {
                for input in inputs {
                    read(input, &defined_entries, &defined_backing);
                }
                for output in outputs {
                    write(output, &mut defined_entries, &mut defined_backing, &ranges);
                }
            }
            StmtKind::Block(b) => {
                let (src, dst) = transfer_refs(b);
                read(&src.from, &defined_entries, &defined_backing);
                write(&dst.from, &mut defined_entries, &mut defined_backing, &ranges);
            }
            StmtKind::Intrinsic { .. } | StmtKind::Constant { .. } => {}
        }
    }
}
