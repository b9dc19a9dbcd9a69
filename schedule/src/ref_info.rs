//! Per-refinement scheduling state and cache-entry storage.
//!
//! A [`RefInfo`] tracks one backing refinement across the whole pass; a
//! [`CacheEntry`] is one local instantiation of its data (swapping a value
//! out and back in produces a new entry). Entries live in an append-only
//! arena and are referenced everywhere by [`CacheEntryId`], so nothing
//! dangles while the pass rearranges its indexes.

use std::collections::{BTreeMap, HashMap, HashSet};

use smallvec::SmallVec;
use tracing::debug;
use twill_ir::{Affine, AliasInfo, AliasMap, Block, Index, Refinement, StmtId, TensorShape};

use crate::mem::MemRange;

/// Refinements are identified by their `into` name within the scheduled block.
pub(crate) type RefKey = String;

/// Scheduling state for one backing refinement.
#[derive(Debug, Clone)]
pub(crate) struct RefInfo {
    /// Copy of the backing refinement; the block's own refinement list is
    /// reshaped at the end of the pass, so we never point into it.
    pub backing: Refinement,
    pub alias_info: AliasInfo,
    /// The backing data's shape when resident in cache and shared across
    /// sub-statements: same sizes, compact row-major strides.
    pub exterior_cache_shape: TensorShape,
    /// Swap-template shapes: per-dim sizes collapsed to 1 so transfer blocks
    /// index element by element.
    pub ref_swap_shape: TensorShape,
    pub cache_swap_shape: TensorShape,
    pub ref_swap_access: SmallVec<[Affine; 4]>,
    pub cache_swap_access: SmallVec<[Affine; 4]>,
    pub swap_idxs: Vec<Index>,
    /// Cached byte size of `exterior_cache_shape`.
    pub size: usize,
    /// True once any transfer block references the backing refinement.
    pub used: bool,
    /// Set by the first swap-out in scheduling order, which is the last
    /// write in runtime order.
    pub saw_final_write: bool,
    /// The entry a runtime-earlier reader would currently find the value in.
    pub cache_entry: Option<CacheEntryId>,
    /// Swap-in blocks that will read the backing memory; they must depend on
    /// whichever swap-out eventually produces it.
    pub swap_in_readers: HashSet<StmtId>,
    pub next_cache_entry: usize,
    /// First statement in runtime order that writes this refinement.
    pub earliest_writer: Option<StmtId>,
    pub name: String,
}

impl RefInfo {
    pub fn new(backing: &Refinement, alias_info: AliasInfo) -> Self {
        let exterior_cache_shape = backing.interior_shape.with_natural_striding();
        let size = exterior_cache_shape.byte_size();

        let mut swap_idxs = Vec::new();
        let mut ref_swap_access = SmallVec::new();
        let mut cache_swap_access = SmallVec::new();
        for (i, dim_size) in exterior_cache_shape.sizes().iter().enumerate() {
            let iname = format!("i{i}");
            swap_idxs.push(Index::range(iname.clone(), *dim_size as u64));
            ref_swap_access.push(Affine::ident(iname.clone()));
            cache_swap_access.push(Affine::ident(iname));
        }

        let mut ref_swap_shape = backing.interior_shape.clone();
        let mut cache_swap_shape = exterior_cache_shape.clone();
        for dim in ref_swap_shape.dims.iter_mut() {
            dim.size = 1;
        }
        for dim in cache_swap_shape.dims.iter_mut() {
            dim.size = 1;
        }

        debug!(name = %backing.into, size, shape = %exterior_cache_shape, "created ref info");

        Self {
            backing: backing.clone(),
            alias_info,
            exterior_cache_shape,
            ref_swap_shape,
            cache_swap_shape,
            ref_swap_access,
            cache_swap_access,
            swap_idxs,
            size,
            used: false,
            saw_final_write: false,
            cache_entry: None,
            swap_in_readers: HashSet::new(),
            next_cache_entry: 0,
            earliest_writer: None,
            name: backing.into.clone(),
        }
    }
}

/// Handle into the scheduler's append-only cache-entry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct CacheEntryId(pub usize);

/// One local instantiation of a refinement's data.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub source: RefKey,
    /// `<source>^<n>`, unique across the pass.
    pub name: String,
    pub range: MemRange,
    /// Compact exterior shape, or the interior slice shape for entries
    /// confined to one sub-block.
    pub shape: TensorShape,
    pub is_internal: bool,
    /// For internal entries, the name the sub-block knows the data by.
    pub interior_name: String,
    /// Earliest accessing statement in runtime order.
    pub first_accessor: Option<StmtId>,
    pub writers: HashMap<StmtId, AliasInfo>,
    pub readers: HashMap<StmtId, AliasInfo>,
    /// True once the runtime-first writer has been scheduled; such an entry
    /// never needs a swap-in to prime its value.
    pub saw_earliest_writer: bool,
    /// Sub-intervals of `range` not yet overwritten by runtime-earlier
    /// entries; when empty the entry retires from the active index.
    pub uncovered_ranges: Vec<MemRange>,
    pub active_prev: Option<CacheEntryId>,
    pub active_next: Option<CacheEntryId>,
}

/// Intrusive doubly-linked list of active entries for one affine unit.
///
/// The links live inside the entries themselves, so retiring a covered entry
/// is an O(1) unlink through its own handle.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ActiveList {
    head: Option<CacheEntryId>,
    tail: Option<CacheEntryId>,
}

impl ActiveList {
    pub fn ids(&self, entries: &[CacheEntry]) -> Vec<CacheEntryId> {
        let mut ids = Vec::new();
        let mut cursor = self.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = entries[id.0].active_next;
        }
        ids
    }

    pub fn remove(&mut self, entries: &mut [CacheEntry], id: CacheEntryId) {
        let (prev, next) = (entries[id.0].active_prev, entries[id.0].active_next);
        match prev {
            Some(p) => entries[p.0].active_next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => entries[n.0].active_prev = prev,
            None => self.tail = prev,
        }
        entries[id.0].active_prev = None;
        entries[id.0].active_next = None;
    }

    /// Rebuild the list to hold exactly `order`, in order.
    pub fn relink(&mut self, entries: &mut [CacheEntry], order: &[CacheEntryId]) {
        self.head = order.first().copied();
        self.tail = order.last().copied();
        for (i, &id) in order.iter().enumerate() {
            entries[id.0].active_prev = if i > 0 { Some(order[i - 1]) } else { None };
            entries[id.0].active_next = order.get(i + 1).copied();
        }
    }
}

/// Build one [`RefInfo`] per refinement of `block`, keyed by `into` name,
/// with `earliest_writer` resolved from a runtime-order statement walk.
///
/// Every refinement must have an alias entry; a missing one is a caller
/// precondition violation.
pub(crate) fn build_ref_info_map(block: &Block, alias_map: &AliasMap) -> BTreeMap<RefKey, RefInfo> {
    let mut ri_map = BTreeMap::new();
    for backing in &block.refs {
        let alias_info = alias_map[&backing.into].clone();
        ri_map.insert(backing.into.clone(), RefInfo::new(backing, alias_info));
    }

    for (id, stmt) in block.stmts.iter() {
        let reads = stmt.buffer_reads();
        for written in stmt.buffer_writes() {
            // A statement that also reads the refinement does not prime its
            // value; only a pure overwrite removes the need for a swap-in.
            if reads.contains(&written) {
                continue;
            }
            let ri = ri_map
                .get_mut(written)
                .unwrap_or_else(|| panic!("statement writes unknown refinement {written}"));
            if ri.earliest_writer.is_none() {
                ri.earliest_writer = Some(id);
            }
        }
    }

    ri_map
}
