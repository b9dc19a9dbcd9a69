//! The caching memory scheduler: a single linear pass over one block.
//!
//! The pass scans the block's statements in *reverse* runtime order —
//! statements in the future of the scan are in the past of runtime
//! execution. At the top of the loop, the scheduler's state describes what
//! the runtime-future expects to find resident in cache; scheduling a
//! statement extends that state to cover it, inserting swap blocks as needed
//! so that the already-scheduled statements' assumptions keep holding.
//!
//! Scanning in reverse initiates data movement as early (in runtime terms)
//! as possible, and lets the state track the desired runtime-future of the
//! system instead of fixing up its past.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, trace};
use twill_ir::{
    Affine, AliasInfo, AliasMap, AliasType, Block, Location, RefDir, Refinement, StmtId, StmtKind,
};

use crate::deps::rebuild_transitive_deps;
use crate::error::{ResourceExhaustedSnafu, Result};
use crate::io::gather_ios;
use crate::mem::{overlaps_any, subtract_range};
use crate::options::ScheduleOptions;
use crate::ref_info::{build_ref_info_map, ActiveList, CacheEntry, CacheEntryId, RefInfo, RefKey};
use crate::xfer::{add_subblock_swap_in, add_subblock_swap_out};

/// Plan the use of a fast local cache for `block`'s statements, rewriting
/// the block in place.
///
/// `alias_map` must cover every refinement of the block. On success the
/// block's statements target cache entries, swap blocks move data between
/// the cache and backing memory, and dependency edges order the result; on
/// infeasibility the block is left partially rewritten and
/// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) names the
/// statement's refinements.
pub fn schedule_block(alias_map: &AliasMap, block: &mut Block, options: &ScheduleOptions) -> Result<()> {
    Scheduler::new(alias_map, block, options).run()
}

pub(crate) struct Scheduler<'a> {
    pub(crate) block: &'a mut Block,
    pub(crate) mem_loc: Location,
    pub(crate) mem_bytes: usize,
    pub(crate) alignment: usize,
    pub(crate) xfer_loc: Location,
    pub(crate) ri_map: BTreeMap<RefKey, RefInfo>,
    /// Refinements grouped by alias-analysis base, i.e. the alias sets.
    pub(crate) alias_sets: BTreeMap<String, Vec<RefKey>>,
    /// Append-only arena of every cache entry created during the pass.
    pub(crate) entries: Vec<CacheEntry>,
    /// Per affine unit, the entries the runtime-future expects to find live,
    /// kept sorted by range begin.
    pub(crate) active: BTreeMap<Affine, ActiveList>,
}

impl<'a> Scheduler<'a> {
    fn new(alias_map: &AliasMap, block: &'a mut Block, options: &ScheduleOptions) -> Self {
        let ri_map = build_ref_info_map(block, alias_map);
        let mut alias_sets: BTreeMap<String, Vec<RefKey>> = BTreeMap::new();
        for (key, ri) in &ri_map {
            alias_sets.entry(ri.alias_info.base_ref.clone()).or_default().push(key.clone());
        }
        Self {
            block,
            mem_loc: options.mem_loc.clone(),
            mem_bytes: options.mem_bytes(),
            alignment: options.effective_alignment(),
            xfer_loc: options.xfer_loc.clone(),
            ri_map,
            alias_sets,
            entries: Vec::new(),
            active: BTreeMap::new(),
        }
    }

    fn run(mut self) -> Result<()> {
        // Reverse walk. `cursor` is one past the statement being scheduled
        // (`None` = end of list), so insertions between the statement and
        // the cursor land in the runtime-future of the statement.
        let mut cursor: Option<StmtId> = None;
        loop {
            let si = match cursor {
                None => self.block.stmts.last(),
                Some(id) => self.block.stmts.prev(id),
            };
            let Some(si) = si else { break };
            self.schedule_statement(si, cursor)?;
            cursor = Some(si);
        }
        self.finalize();
        Ok(())
    }

    fn schedule_statement(&mut self, si: StmtId, mut si_next: Option<StmtId>) -> Result<()> {
        let (ios, binder) = gather_ios(self.block.stmts.get(si), &self.ri_map);
        let (is_block, sub_name) = match &self.block.stmts.get(si).kind {
            StmtKind::Block(b) => (true, b.name.clone()),
            _ => (false, String::new()),
        };
        debug!(stmt = si.index(), block = %sub_name, ios = ios.len(), "scheduling statement");

        // Invalidate cache entries of aliases this statement writes over,
        // swapping each one in just after the statement so runtime-earlier
        // readers still find their value. Collect, per written refinement,
        // the swap-in readers that must depend on its eventual swap-out.
        let mut writer_swap_readers: HashMap<RefKey, HashSet<StmtId>> = HashMap::new();
        for io in &ios {
            if !io.dir.is_write() {
                continue;
            }
            let ri_alias = self.ri_map[&io.ref_key].alias_info.clone();
            let mut readers = writer_swap_readers.remove(&io.ref_key).unwrap_or_default();
            for akey in self.alias_sets[&ri_alias.base_ref].clone() {
                let same = akey == io.ref_key;
                if !same && AliasInfo::compare(&ri_alias, &self.ri_map[&akey].alias_info) == AliasType::None {
                    continue;
                }
                // Every access to the alias will depend on this write.
                if !same && let Some(eid) = self.ri_map[&akey].cache_entry {
                    trace!(alias = %akey, "write invalidates aliased cache entry");
                    si_next = Some(self.schedule_swap_in(si_next, eid));
                    self.ri_map.get_mut(&akey).expect("alias is in the ref table").cache_entry = None;
                }
                readers.extend(self.ri_map[&akey].swap_in_readers.iter().copied());
            }
            writer_swap_readers.insert(io.ref_key.clone(), readers);
        }

        let Some(mut plan) = self.try_make_plan(is_block, &ios) else {
            let block = if is_block { sub_name } else { self.block.name.clone() };
            let mut refs: Vec<String> = ios.iter().map(|io| io.ref_key.clone()).collect();
            refs.sort();
            refs.dedup();
            debug!(block = %block, ?refs, "no placement plan fits the memory budget");
            return ResourceExhaustedSnafu { block, refs }.fail();
        };

        // Apply the plan. New entries may occupy memory that runtime-future
        // entries expect to own; each such collision subtracts from the
        // future entry's uncovered ranges, primes it with a swap-in when it
        // has no writer yet, and orders its writers after us.
        let mut added_active: BTreeMap<Affine, Vec<CacheEntryId>> = BTreeMap::new();
        let mut added_refs: Vec<Refinement> = Vec::new();
        let mut internal_backing: HashMap<RefKey, String> = HashMap::new();

        for (pkey, placement) in plan.iter_mut() {
            let ri_key = pkey.ref_key.clone();
            trace!(ref_key = %ri_key, "applying placement");

            let is_new = placement.entry.is_none();
            let eid = match placement.entry {
                Some(eid) => eid,
                None => {
                    let eid = CacheEntryId(self.entries.len());
                    let ri = self.ri_map.get_mut(&ri_key).expect("planned refinement is in the ref table");
                    let name = format!("{}^{}", ri.name, ri.next_cache_entry);
                    ri.next_cache_entry += 1;
                    ri.cache_entry = Some(eid);
                    debug!(
                        entry = %name,
                        range = %placement.range,
                        internal = placement.is_internal,
                        "created cache entry"
                    );
                    self.entries.push(CacheEntry {
                        source: ri_key.clone(),
                        name,
                        range: placement.range,
                        shape: pkey.cache_shape.clone(),
                        is_internal: placement.is_internal,
                        interior_name: placement.interior_name.clone(),
                        first_accessor: None,
                        writers: HashMap::new(),
                        readers: HashMap::new(),
                        saw_earliest_writer: false,
                        uncovered_ranges: vec![placement.range],
                        active_prev: None,
                        active_next: None,
                    });
                    placement.entry = Some(eid);
                    eid
                }
            };

            let mut reuse_dep = si;

            if placement.is_internal {
                // Temporary cache space confined to the sub-block: declare a
                // backing view on the sub-block once per refinement, and
                // swap the slice in/out inside the sub-block itself.
                let backing_name = match internal_backing.get(&ri_key) {
                    Some(name) => name.clone(),
                    None => {
                        let ri = &self.ri_map[&ri_key];
                        let StmtKind::Block(sub) = &self.block.stmts.get(si).kind else {
                            unreachable!("internal placement on a non-block statement")
                        };
                        let name = sub.unique_ref_name(&format!("{}_storage", ri.name));
                        added_refs.push(Refinement {
                            dir: placement.dir,
                            from: ri.backing.into.clone(),
                            into: name.clone(),
                            access: ri.alias_info.access.clone(),
                            interior_shape: ri.alias_info.shape.clone(),
                            agg_op: String::new(),
                            location: ri.backing.location.clone(),
                            is_const: ri.backing.is_const,
                            offset: 0,
                            bank_dim: ri.backing.bank_dim,
                            cache_unit: None,
                        });
                        internal_backing.insert(ri_key.clone(), name.clone());
                        name
                    }
                };
                let ri = self.ri_map[&ri_key].clone();
                let ent = self.entries[eid.0].clone();
                let StmtKind::Block(sub) = &mut self.block.stmts.get_mut(si).kind else {
                    unreachable!("internal placement on a non-block statement")
                };
                if placement.dir.is_read() {
                    add_subblock_swap_in(sub, &ent, &ri, &backing_name, &pkey.access, &self.mem_loc, &self.xfer_loc);
                }
                if placement.dir.is_write() {
                    add_subblock_swap_out(sub, &ent, &ri, &backing_name, &pkey.access, &self.mem_loc, &self.xfer_loc);
                }
            } else {
                // Reusable between sub-statements: track accessors and
                // swap out when this write must reach backing memory.
                if placement.dir.is_write() {
                    let ri_alias = self.ri_map[&ri_key].alias_info.clone();
                    let colliding: Vec<StmtId> = self.entries[eid.0]
                        .readers
                        .iter()
                        .filter(|(_, reader_alias)| AliasInfo::compare(&ri_alias, reader_alias) != AliasType::None)
                        .map(|(id, _)| *id)
                        .collect();
                    for reader in colliding {
                        self.block.stmts.get_mut(reader).deps.push(si);
                    }
                    self.entries[eid.0].writers.insert(si, ri_alias);
                    if self.ri_map[&ri_key].earliest_writer == Some(si) {
                        self.entries[eid.0].saw_earliest_writer = true;
                    }
                }
                if placement.dir.is_read() {
                    let ri_alias = self.ri_map[&ri_key].alias_info.clone();
                    self.entries[eid.0].readers.insert(si, ri_alias);
                }
                self.entries[eid.0].first_accessor = Some(si);

                let ri = &self.ri_map[&ri_key];
                let finalizes_out = ri.backing.dir.is_write() && !ri.saw_final_write;
                let feeds_swap_ins = writer_swap_readers.get(&ri_key).is_some_and(|s| !s.is_empty());
                if placement.dir.is_write() && (finalizes_out || feeds_swap_ins) {
                    let readers = writer_swap_readers.get(&ri_key).cloned().unwrap_or_default();
                    let at = self.block.stmts.next(si);
                    let swap_out = self.schedule_swap_out(at, eid, &readers);
                    self.block.stmts.get_mut(swap_out).deps.push(si);
                    reuse_dep = swap_out;
                }
            }

            // Conflict resolution against runtime-future entries on the
            // same affine unit.
            let unit = self.ri_map[&ri_key].backing.location.unit.clone();
            let ent_range = self.entries[eid.0].range;
            let future_ids = self.active.get(&unit).map(|l| l.ids(&self.entries)).unwrap_or_default();
            for fid in future_ids {
                if fid == eid || !overlaps_any(ent_range, &self.entries[fid.0].uncovered_ranges) {
                    continue;
                }
                if is_new {
                    debug!(
                        entry = %self.entries[eid.0].name,
                        future = %self.entries[fid.0].name,
                        "new entry collides with future entry"
                    );
                    if !self.entries[fid.0].saw_earliest_writer {
                        let at = self.block.stmts.next(reuse_dep);
                        self.schedule_swap_in(at, fid);
                    }
                    subtract_range(ent_range, &mut self.entries[fid.0].uncovered_ranges);
                    if self.entries[fid.0].uncovered_ranges.is_empty() {
                        trace!(future = %self.entries[fid.0].name, "future entry fully covered; retiring");
                        if let Some(list) = self.active.get_mut(&unit) {
                            list.remove(&mut self.entries, fid);
                        }
                    }
                    // The covered entry is no longer where this refinement
                    // lives for statements scheduled after this point.
                    let future_src = self.entries[fid.0].source.clone();
                    let future_ri = self.ri_map.get_mut(&future_src).expect("entry source is in the ref table");
                    if future_ri.cache_entry == Some(fid) {
                        future_ri.cache_entry = None;
                    }
                }
                let writers: Vec<StmtId> = self.entries[fid.0].writers.keys().copied().collect();
                for writer in writers {
                    self.block.stmts.get_mut(writer).deps.push(reuse_dep);
                }
            }

            if is_new && !placement.is_internal {
                added_active.entry(unit).or_default().push(eid);
            }
        }

        // Splice the new entries into the active index, re-sorting each
        // touched affine bucket by range begin.
        for (unit, mut order) in added_active {
            let list = self.active.entry(unit).or_default();
            order.extend(list.ids(&self.entries));
            order.sort_by_key(|id| self.entries[id.0].range.begin);
            list.relink(&mut self.entries, &order);
        }

        binder.apply(self.block.stmts.get_mut(si), &self.ri_map, &self.entries, &self.mem_loc);
        if !added_refs.is_empty() {
            let StmtKind::Block(sub) = &mut self.block.stmts.get_mut(si).kind else {
                unreachable!("synthetic backing refs on a non-block statement")
            };
            sub.refs.extend(added_refs);
        }

        // Sub-block-confined entries must not be reused by the next
        // statement.
        for pkey in plan.keys() {
            let ri = self.ri_map.get_mut(&pkey.ref_key).expect("planned refinement is in the ref table");
            if let Some(eid) = ri.cache_entry
                && self.entries[eid.0].is_internal
            {
                ri.cache_entry = None;
            }
        }

        Ok(())
    }

    fn finalize(&mut self) {
        // Entries still live at the head of the program whose value comes
        // from outside the block need a swap-in before first use. They can
        // all coexist (outputs never clobber them before use), so each goes
        // directly before its first accessor; with no dependencies they are
        // free to start transferring as early as the hardware likes.
        let still_active: Vec<CacheEntryId> =
            self.active.values().flat_map(|list| list.ids(&self.entries)).collect();
        for eid in still_active {
            let source = self.entries[eid.0].source.clone();
            if self.ri_map[&source].earliest_writer.is_none() {
                debug!(entry = %self.entries[eid.0].name, "adding final swap-in");
                let at = self.entries[eid.0].first_accessor;
                self.schedule_swap_in(at, eid);
            }
        }

        // One refinement per cache entry.
        for eid in 0..self.entries.len() {
            let ent = &self.entries[eid];
            let ri = &self.ri_map[&ent.source];
            let mut cache_ref = ri.backing.clone();
            cache_ref.dir = RefDir::None;
            cache_ref.from = String::new();
            cache_ref.into = ent.name.clone();
            cache_ref.interior_shape = ent.shape.clone();
            cache_ref.location = self.mem_loc.clone();
            if let Some(unit) = &ri.backing.cache_unit {
                cache_ref.location.unit = unit.clone();
            }
            cache_ref.offset = ent.range.begin;
            match self.block.ref_by_into_mut(&ent.name) {
                Some(existing) => *existing = cache_ref,
                None => self.block.refs.push(cache_ref),
            }
        }

        // Restore the backing refinement of every ref the schedule used.
        for ri in self.ri_map.values() {
            if !ri.used {
                continue;
            }
            match self.block.ref_by_into_mut(&ri.backing.into) {
                Some(existing) => *existing = ri.backing.clone(),
                None => self.block.refs.push(ri.backing.clone()),
            }
        }

        rebuild_transitive_deps(self.block);

        // Refinement order is irrelevant; sort by name to stabilize output.
        self.block.refs.sort_by(|a, b| a.into.cmp(&b.into));
    }
}
