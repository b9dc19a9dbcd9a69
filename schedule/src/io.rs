//! Statement I/O gathering and deferred refinement-name rewriting.
//!
//! [`gather_ios`] describes which refinements a statement touches; the
//! returned [`Binder`] remembers where the names live so they can be
//! rewritten after placement has chosen cache entries. The binder reads the
//! RefInfo table at apply time, so it must be applied before the next
//! statement is scheduled.

use std::collections::BTreeMap;

use smallvec::SmallVec;
use twill_ir::{fixup_refs, Affine, Location, RefDir, Statement, StmtKind, TensorShape};

use crate::ref_info::{CacheEntry, RefInfo, RefKey};

/// One unit of I/O performed by a statement.
#[derive(Debug, Clone)]
pub(crate) struct Io {
    pub ref_key: RefKey,
    pub dir: RefDir,
    /// Shape the statement sees; for sub-blocks, the interior slice shape
    /// restrided to compact form. Exterior shape otherwise.
    pub interior_shape: TensorShape,
    /// Sub-block interior refinement name; empty for non-block statements.
    pub interior_name: String,
    /// Sub-block access affines; empty for non-block statements.
    pub access: SmallVec<[Affine; 4]>,
}

/// Where a statement keeps the refinement names that placement rewrites.
#[derive(Debug)]
pub(crate) enum Binder {
    None,
    Names(Vec<NameSlot>),
    /// `(index into the sub-block's refs, refinement key)` pairs.
    Block(Vec<(usize, RefKey)>),
}

#[derive(Debug)]
pub(crate) enum NameSlot {
    LoadFrom(RefKey),
    StoreInto(RefKey),
    SpecialInput(usize, RefKey),
    SpecialOutput(usize, RefKey),
}

fn exterior_io(key: &str, dir: RefDir, ri: &RefInfo) -> Io {
    Io {
        ref_key: key.to_string(),
        dir,
        interior_shape: ri.exterior_cache_shape.clone(),
        interior_name: String::new(),
        access: SmallVec::new(),
    }
}

/// Describe every refinement `stmt` touches, with a binder for the rewrite.
///
/// A special accessing one tensor through several slots collapses to a
/// single I/O with the directions unioned.
pub(crate) fn gather_ios(stmt: &Statement, ri_map: &BTreeMap<RefKey, RefInfo>) -> (Vec<Io>, Binder) {
    match &stmt.kind {
        StmtKind::Load { from, .. } => {
            let io = exterior_io(from, RefDir::In, &ri_map[from]);
            (vec![io], Binder::Names(vec![NameSlot::LoadFrom(from.clone())]))
        }
        StmtKind::Store { into, .. } => {
            let io = exterior_io(into, RefDir::Out, &ri_map[into]);
            (vec![io], Binder::Names(vec![NameSlot::StoreInto(into.clone())]))
        }
        StmtKind::Special { inputs, outputs, .. } => {
            let mut accesses: BTreeMap<RefKey, RefDir> = BTreeMap::new();
            let mut slots = Vec::with_capacity(inputs.len() + outputs.len());
            for (i, name) in inputs.iter().enumerate() {
                let dir = accesses.entry(name.clone()).or_default();
                *dir = dir.union(RefDir::In);
                slots.push(NameSlot::SpecialInput(i, name.clone()));
            }
            for (i, name) in outputs.iter().enumerate() {
                let dir = accesses.entry(name.clone()).or_default();
                *dir = dir.union(RefDir::Out);
                slots.push(NameSlot::SpecialOutput(i, name.clone()));
            }
            let ios = accesses.iter().map(|(key, dir)| exterior_io(key, *dir, &ri_map[key])).collect();
            (ios, Binder::Names(slots))
        }
        StmtKind::Block(block) => {
            let mut ios = Vec::new();
            let mut updates = Vec::new();
            for (idx, r) in block.refs.iter().enumerate() {
                if r.dir == RefDir::None {
                    continue;
                }
                updates.push((idx, r.from.clone()));
                ios.push(Io {
                    ref_key: r.from.clone(),
                    dir: r.dir,
                    interior_shape: r.interior_shape.with_natural_striding(),
                    interior_name: r.into.clone(),
                    access: r.access.clone(),
                });
            }
            (ios, Binder::Block(updates))
        }
        StmtKind::Intrinsic { .. } | StmtKind::Constant { .. } => (Vec::new(), Binder::None),
    }
}

impl Binder {
    /// Rewrite the statement's refinement names to the chosen cache entries.
    ///
    /// For sub-blocks this also retargets location, shape, and access, and
    /// propagates the change through descendants.
    pub(crate) fn apply(
        self,
        stmt: &mut Statement,
        ri_map: &BTreeMap<RefKey, RefInfo>,
        entries: &[CacheEntry],
        mem_loc: &Location,
    ) {
        let entry_name = |key: &RefKey| -> String {
            let eid = ri_map[key].cache_entry.expect("bound refinement must hold a cache entry");
            entries[eid.0].name.clone()
        };
        match self {
            Binder::None => {}
            Binder::Names(slots) => {
                for slot in slots {
                    match (slot, &mut stmt.kind) {
                        (NameSlot::LoadFrom(key), StmtKind::Load { from, .. }) => *from = entry_name(&key),
                        (NameSlot::StoreInto(key), StmtKind::Store { into, .. }) => *into = entry_name(&key),
                        (NameSlot::SpecialInput(i, key), StmtKind::Special { inputs, .. }) => {
                            inputs[i] = entry_name(&key)
                        }
                        (NameSlot::SpecialOutput(i, key), StmtKind::Special { outputs, .. }) => {
                            outputs[i] = entry_name(&key)
                        }
                        _ => unreachable!("name slot does not match statement kind"),
                    }
                }
            }
            Binder::Block(updates) => {
                let StmtKind::Block(block) = &mut stmt.kind else {
                    unreachable!("block binder on non-block statement")
                };
                for (ref_idx, key) in updates {
                    let ri = &ri_map[&key];
                    let eid = ri.cache_entry.expect("bound refinement must hold a cache entry");
                    let ent = &entries[eid.0];
                    let r = &mut block.refs[ref_idx];
                    r.from = ent.name.clone();
                    r.location = mem_loc.clone();
                    if let Some(unit) = &ri.backing.cache_unit {
                        r.location.unit = unit.clone();
                    }
                    if ent.is_internal {
                        r.interior_shape = ent.shape.clone();
                        for access in r.access.iter_mut() {
                            *access = Affine::default();
                        }
                    } else {
                        for (dim, src) in r.interior_shape.dims.iter_mut().zip(&ri.exterior_cache_shape.dims) {
                            dim.stride = src.stride;
                        }
                    }
                    let into = r.into.clone();
                    fixup_refs(block, &into);
                }
            }
        }
    }
}
