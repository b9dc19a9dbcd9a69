//! Construction and wiring of swap-in / swap-out transfer blocks.
//!
//! Every transfer is a freshly built block whose body is a single load/store
//! pair over the source's swap-template indices, tagged with the configured
//! transfer location.

use std::collections::HashSet;

use smallvec::SmallVec;
use tracing::debug;
use twill_ir::{Affine, Block, Index, Location, RefDir, Refinement, Statement, StmtId, StmtKind};

use crate::ref_info::{CacheEntry, CacheEntryId, RefInfo};
use crate::scheduler::Scheduler;

/// The cache-side location: `mem_loc`, with the unit overridden when the
/// source refinement pins a cache unit.
fn banked_mem_loc(source: &RefInfo, mem_loc: &Location) -> Location {
    let mut loc = mem_loc.clone();
    if let Some(unit) = &source.backing.cache_unit {
        loc.unit = unit.clone();
    }
    loc
}

/// Refinement for the backing-memory side of a transfer.
fn backing_side_ref(source: &RefInfo, dir: RefDir, into: &str) -> Refinement {
    Refinement {
        dir,
        from: source.backing.into.clone(),
        into: into.to_string(),
        access: source.ref_swap_access.clone(),
        interior_shape: source.ref_swap_shape.clone(),
        agg_op: String::new(),
        location: source.backing.location.clone(),
        is_const: source.backing.is_const,
        offset: 0,
        bank_dim: source.backing.bank_dim,
        cache_unit: None,
    }
}

/// Refinement for the cache side of a transfer.
fn cache_side_ref(source: &RefInfo, from: &str, dir: RefDir, into: &str, mem_loc: &Location) -> Refinement {
    Refinement {
        dir,
        from: from.to_string(),
        into: into.to_string(),
        access: source.cache_swap_access.clone(),
        interior_shape: source.cache_swap_shape.clone(),
        agg_op: String::new(),
        location: banked_mem_loc(source, mem_loc),
        is_const: source.backing.is_const,
        offset: 0,
        bank_dim: source.backing.bank_dim,
        cache_unit: None,
    }
}

/// A block that copies `src` to `dst` element by element.
fn copy_block(name: String, xfer_loc: &Location, idxs: Vec<Index>, src: Refinement, dst: Refinement) -> Block {
    let mut block = Block::named(name);
    block.location = xfer_loc.clone();
    block.idxs = idxs;
    block.refs.push(src);
    block.refs.push(dst);
    block.stmts.push_back(Statement::new(StmtKind::Load { from: "src".to_string(), into: "$X".to_string() }));
    block.stmts.push_back(Statement::new(StmtKind::Store { from: "$X".to_string(), into: "dst".to_string() }));
    block
}

impl Scheduler<'_> {
    /// Insert a swap-in block just before `at` (end of list when `None`).
    ///
    /// The new block becomes a writer of the entry, joins the source's
    /// swap-in readers, picks up every current reader of the entry as a
    /// dependent, and marks the entry as primed. Any dependency the swap-in
    /// itself needs is the caller's business.
    pub(crate) fn schedule_swap_in(&mut self, at: Option<StmtId>, eid: CacheEntryId) -> StmtId {
        let ent = &self.entries[eid.0];
        let source_key = ent.source.clone();
        let source = &self.ri_map[&source_key];
        debug!(entry = %ent.name, range = %ent.range, "scheduling swap-in");

        let swap_block = copy_block(
            format!("swap_in_{}", ent.name),
            &self.xfer_loc,
            source.swap_idxs.clone(),
            backing_side_ref(source, RefDir::In, "src"),
            cache_side_ref(source, &ent.name, RefDir::Out, "dst", &self.mem_loc),
        );
        let alias_info = source.alias_info.clone();

        let id = self.block.stmts.insert_before(at, Statement::new(StmtKind::Block(swap_block)));
        self.entries[eid.0].writers.insert(id, alias_info);
        let source = self.ri_map.get_mut(&source_key).expect("entry source is in the ref table");
        source.used = true;
        source.swap_in_readers.insert(id);
        let readers: Vec<StmtId> = self.entries[eid.0].readers.keys().copied().collect();
        for reader in readers {
            self.block.stmts.get_mut(reader).deps.push(id);
        }
        self.entries[eid.0].saw_earliest_writer = true;
        id
    }

    /// Insert a swap-out block just before `at`.
    ///
    /// Each supplied swap-in reader gains a dependency on the swap-out, and
    /// the source sees its final write. The caller adds the swap-out's own
    /// dependency on the producing statement.
    pub(crate) fn schedule_swap_out(
        &mut self,
        at: Option<StmtId>,
        eid: CacheEntryId,
        swap_in_readers: &HashSet<StmtId>,
    ) -> StmtId {
        let ent = &self.entries[eid.0];
        let source_key = ent.source.clone();
        let source = &self.ri_map[&source_key];
        debug!(entry = %ent.name, range = %ent.range, "scheduling swap-out");

        let swap_block = copy_block(
            format!("swap_out_{}", ent.name),
            &self.xfer_loc,
            source.swap_idxs.clone(),
            cache_side_ref(source, &ent.name, RefDir::In, "src", &self.mem_loc),
            backing_side_ref(source, RefDir::Out, "dst"),
        );

        let id = self.block.stmts.insert_before(at, Statement::new(StmtKind::Block(swap_block)));
        for reader in swap_in_readers {
            self.block.stmts.get_mut(*reader).deps.push(id);
        }
        let source = self.ri_map.get_mut(&source_key).expect("entry source is in the ref table");
        source.used = true;
        source.saw_final_write = true;
        id
    }
}

/// Index set for a sub-block transfer: one size-1 index per distinct name in
/// the offset affines, plus one fresh index per data dimension.
fn subblock_swap_idxs(
    swap_block: &mut Block,
    ent: &CacheEntry,
    access: &[Affine],
) -> (SmallVec<[Affine; 4]>, SmallVec<[Affine; 4]>) {
    let mut seen = HashSet::new();
    for acc in access {
        for name in acc.terms().keys() {
            if seen.insert(name.clone()) {
                swap_block
                    .idxs
                    .push(Index { name: name.clone(), range: 1, affine: Affine::ident(name.clone()) });
            }
        }
    }

    let mut over_entry = SmallVec::new();
    let mut offset_sums = SmallVec::new();
    for (i, acc) in access.iter().enumerate() {
        let iname = swap_block.unique_idx_name(&format!("i{i}"));
        swap_block.idxs.push(Index::range(iname.clone(), ent.shape.dims[i].size as u64));
        offset_sums.push(Affine::ident(iname.clone()) + acc);
        over_entry.push(Affine::ident(iname));
    }
    (over_entry, offset_sums)
}

/// Prepend a transfer that reads the backing slice into the sub-block's
/// interior cache view.
pub(crate) fn add_subblock_swap_in(
    block: &mut Block,
    ent: &CacheEntry,
    source: &RefInfo,
    backing_ref_name: &str,
    access: &[Affine],
    mem_loc: &Location,
    xfer_loc: &Location,
) {
    let mut swap_block = Block::named(format!("read_slice_of_{}", source.name));
    swap_block.location = xfer_loc.clone();
    let (over_entry, offset_sums) = subblock_swap_idxs(&mut swap_block, ent, access);

    let mut src = backing_side_ref(source, RefDir::In, "src");
    src.from = backing_ref_name.to_string();
    src.access = offset_sums;
    let mut dst = cache_side_ref(source, &ent.interior_name, RefDir::Out, "dst", mem_loc);
    dst.access = over_entry;

    swap_block.refs.push(src);
    swap_block.refs.push(dst);
    swap_block.stmts.push_back(Statement::new(StmtKind::Load { from: "src".to_string(), into: "$X".to_string() }));
    swap_block.stmts.push_back(Statement::new(StmtKind::Store { from: "$X".to_string(), into: "dst".to_string() }));

    block.stmts.push_front(Statement::new(StmtKind::Block(swap_block)));
}

/// Append a transfer that writes the sub-block's interior cache view back to
/// the backing slice.
pub(crate) fn add_subblock_swap_out(
    block: &mut Block,
    ent: &CacheEntry,
    source: &RefInfo,
    backing_ref_name: &str,
    access: &[Affine],
    mem_loc: &Location,
    xfer_loc: &Location,
) {
    let mut swap_block = Block::named(format!("write_slice_of_{}", source.name));
    swap_block.location = xfer_loc.clone();
    let (over_entry, offset_sums) = subblock_swap_idxs(&mut swap_block, ent, access);

    let mut src = cache_side_ref(source, &ent.interior_name, RefDir::In, "src", mem_loc);
    src.access = over_entry;
    let mut dst = backing_side_ref(source, RefDir::Out, "dst");
    dst.from = backing_ref_name.to_string();
    dst.access = offset_sums;

    swap_block.refs.push(src);
    swap_block.refs.push(dst);
    swap_block.stmts.push_back(Statement::new(StmtKind::Load { from: "src".to_string(), into: "$X".to_string() }));
    swap_block.stmts.push_back(Statement::new(StmtKind::Store { from: "$X".to_string(), into: "dst".to_string() }));

    block.stmts.push_back(Statement::new(StmtKind::Block(swap_block)));
}
