//! The placement planner: given one statement's I/O set, choose a legal set
//! of cache ranges, trying successively weaker strategies.

use std::collections::BTreeMap;

use smallvec::SmallVec;
use tracing::{debug, trace};
use twill_ir::{Affine, RefDir, TensorShape};

use crate::io::Io;
use crate::mem::{align_up, subtract_range, MemRange};
use crate::ref_info::{CacheEntryId, RefKey};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct PlacementKey {
    pub ref_key: RefKey,
    pub cache_shape: TensorShape,
    pub access: SmallVec<[Affine; 4]>,
}

/// One proposed placement of a statement input or output.
#[derive(Debug, Clone)]
pub(crate) struct Placement {
    pub dir: RefDir,
    pub size: usize,
    pub range: MemRange,
    /// Filled in when the plan is applied, unless an existing entry is reused.
    pub entry: Option<CacheEntryId>,
    /// Internal placements cache a partial slice swapped within the
    /// sub-block being scheduled; external placements are reusable between
    /// sub-statements.
    pub is_internal: bool,
    pub interior_name: String,
}

/// A placement plan for one statement. Ordered map, so plan application and
/// planning itself are deterministic given deterministic input.
pub(crate) type PlacementPlan = BTreeMap<PlacementKey, Placement>;

impl Scheduler<'_> {
    fn make_full_placements(&self, ios: &[Io]) -> Vec<(PlacementKey, Placement)> {
        ios.iter()
            .map(|io| {
                let ri = &self.ri_map[&io.ref_key];
                (
                    PlacementKey {
                        ref_key: io.ref_key.clone(),
                        cache_shape: ri.exterior_cache_shape.clone(),
                        access: SmallVec::new(),
                    },
                    Placement {
                        dir: io.dir,
                        size: ri.size,
                        range: MemRange::default(),
                        entry: None,
                        is_internal: false,
                        interior_name: String::new(),
                    },
                )
            })
            .collect()
    }

    fn make_partial_placements(&self, ios: &[Io]) -> Vec<(PlacementKey, Placement)> {
        ios.iter()
            .map(|io| {
                let ri = &self.ri_map[&io.ref_key];
                let interior_size = io.interior_shape.byte_size();
                let is_internal = interior_size != ri.size;
                trace!(
                    ref_key = %io.ref_key,
                    interior_size,
                    exterior_size = ri.size,
                    is_internal,
                    "partial placement candidate"
                );
                let access = if is_internal { io.access.clone() } else { SmallVec::new() };
                (
                    PlacementKey { ref_key: io.ref_key.clone(), cache_shape: io.interior_shape.clone(), access },
                    Placement {
                        dir: io.dir,
                        size: interior_size,
                        range: MemRange::default(),
                        entry: None,
                        is_internal,
                        interior_name: io.interior_name.clone(),
                    },
                )
            })
            .collect()
    }

    /// Seed the plan with placements for entries runtime-future statements
    /// have already established, and bucket the rest by affine unit,
    /// largest-first.
    fn gather_placement_state(&self, ios: &[Io]) -> (PlacementPlan, BTreeMap<Affine, Vec<Io>>) {
        let mut plan = PlacementPlan::new();
        let mut todo_map: BTreeMap<RefKey, Io> = BTreeMap::new();

        for io in ios {
            let ri = &self.ri_map[&io.ref_key];
            let pkey = PlacementKey {
                ref_key: io.ref_key.clone(),
                cache_shape: ri.exterior_cache_shape.clone(),
                access: SmallVec::new(),
            };
            if let Some(existing) = plan.get_mut(&pkey) {
                existing.dir = existing.dir.union(io.dir);
                continue;
            }
            if let Some(eid) = ri.cache_entry
                && !self.entries[eid.0].saw_earliest_writer
            {
                let range = self.entries[eid.0].range;
                plan.insert(
                    pkey,
                    Placement {
                        dir: io.dir,
                        size: range.size(),
                        range,
                        entry: Some(eid),
                        is_internal: false,
                        interior_name: String::new(),
                    },
                );
                continue;
            }
            match todo_map.entry(io.ref_key.clone()) {
                std::collections::btree_map::Entry::Occupied(mut e) => {
                    let dir = e.get().dir.union(io.dir);
                    e.get_mut().dir = dir;
                }
                std::collections::btree_map::Entry::Vacant(e) => {
                    e.insert(io.clone());
                }
            }
        }

        let mut todos: BTreeMap<Affine, Vec<Io>> = BTreeMap::new();
        for (key, io) in todo_map {
            let unit = self.ri_map[&key].backing.location.unit.clone();
            todos.entry(unit).or_default().push(io);
        }
        for unit_ios in todos.values_mut() {
            unit_ios.sort_by(|a, b| {
                let ka = (self.ri_map[&a.ref_key].size, a.ref_key.as_str());
                let kb = (self.ri_map[&b.ref_key].size, b.ref_key.as_str());
                kb.cmp(&ka)
            });
        }

        (plan, todos)
    }

    /// Place each pending placement into the free ranges, best-fit: smallest
    /// range still large enough, strictly-less-than on waste so ties keep
    /// the earlier range.
    fn try_place_in_ranges(
        &self,
        plan: &mut PlacementPlan,
        placements: &[(PlacementKey, Placement)],
        mut ranges: Vec<MemRange>,
    ) -> bool {
        for (pkey, placement) in placements {
            if let Some(existing) = plan.get_mut(pkey) {
                existing.dir = existing.dir.union(placement.dir);
                continue;
            }
            let size = placement.size;
            trace!(ref_key = %pkey.ref_key, size, "finding placement");
            let mut best: Option<usize> = None;
            let mut best_waste = usize::MAX;
            for (i, range) in ranges.iter().enumerate() {
                if range.size() < size {
                    continue;
                }
                let waste = range.size() - size;
                if waste < best_waste {
                    best = Some(i);
                    best_waste = waste;
                }
            }
            let Some(best) = best else {
                return false;
            };
            let assigned = MemRange::new(ranges[best].begin, ranges[best].begin + size);
            subtract_range(assigned, &mut ranges);
            let mut placement = placement.clone();
            placement.range = assigned;
            plan.insert(pkey.clone(), placement);
        }
        true
    }

    /// Extend the existing-entry plan using the active index's free holes.
    ///
    /// Without swaps, an active entry's range is only available when the
    /// entry has already seen its earliest writer (no swap-in would be
    /// forced) and the current statement does not itself need that entry.
    /// With swaps, only ranges of entries in the plan are off-limits; every
    /// other overwrite induces a swap-in for the victim.
    fn try_plan_in_active(
        &self,
        existing_entry_plan: &PlacementPlan,
        todos: &BTreeMap<Affine, Vec<(PlacementKey, Placement)>>,
        allow_swaps: bool,
    ) -> Option<PlacementPlan> {
        let mut plan = existing_entry_plan.clone();

        for (unit, placements) in todos {
            trace!(unit = %unit, allow_swaps, "planning memory for affine unit");
            let mut ranges = vec![MemRange::new(0, self.mem_bytes)];
            if let Some(list) = self.active.get(unit) {
                for eid in list.ids(&self.entries) {
                    let ent = &self.entries[eid.0];
                    let pkey = PlacementKey {
                        ref_key: ent.source.clone(),
                        cache_shape: self.ri_map[&ent.source].exterior_cache_shape.clone(),
                        access: SmallVec::new(),
                    };
                    let in_plan = plan.contains_key(&pkey);
                    let subtract =
                        if allow_swaps { in_plan } else { !(ent.saw_earliest_writer && !in_plan) };
                    if subtract {
                        trace!(entry = %ent.name, range = %ent.range, "range in use");
                        subtract_range(ent.range, &mut ranges);
                    }
                }
            }
            if !self.try_place_in_ranges(&mut plan, placements, ranges) {
                return None;
            }
        }

        Some(plan)
    }

    /// Worst-case plan: ignore the active index and pack placements
    /// sequentially from offset zero per affine unit. Works iff every
    /// refinement of the statement fits into memory simultaneously.
    fn try_fallback_plan(&self, placements: &[(PlacementKey, Placement)]) -> Option<PlacementPlan> {
        let mut plan = PlacementPlan::new();
        let mut offsets: BTreeMap<Affine, usize> = BTreeMap::new();

        for (pkey, _) in placements {
            offsets.insert(self.ri_map[&pkey.ref_key].backing.location.unit.clone(), 0);
        }

        for (pkey, placement) in placements {
            if let Some(existing) = plan.get_mut(pkey) {
                existing.dir = existing.dir.union(placement.dir);
                continue;
            }
            let unit = self.ri_map[&pkey.ref_key].backing.location.unit.clone();
            let offset = offsets.get_mut(&unit).expect("offset seeded for every placement unit");
            let mut placement = placement.clone();
            placement.range = MemRange::new(*offset, *offset + placement.size);
            *offset += align_up(placement.size, self.alignment);
            trace!(ref_key = %pkey.ref_key, range = %placement.range, next = *offset, "fallback placement");
            plan.insert(pkey.clone(), placement);
        }

        if offsets.values().any(|&offset| self.mem_bytes < offset) {
            return None;
        }

        Some(plan)
    }

    /// The strategy ladder. Returns the first plan that fits, or `None` when
    /// even the fallback cannot fit the statement's refinements.
    pub(crate) fn try_make_plan(&self, is_block: bool, ios: &[Io]) -> Option<PlacementPlan> {
        let (existing_entry_plan, todos) = self.gather_placement_state(ios);

        let todo_fulls: BTreeMap<Affine, Vec<(PlacementKey, Placement)>> =
            todos.iter().map(|(unit, ios)| (unit.clone(), self.make_full_placements(ios))).collect();
        let todo_partials: BTreeMap<Affine, Vec<(PlacementKey, Placement)>> =
            todos.iter().map(|(unit, ios)| (unit.clone(), self.make_partial_placements(ios))).collect();

        if let Some(plan) = self.try_plan_in_active(&existing_entry_plan, &todo_fulls, false) {
            debug!("made plan with full IO and no swaps");
            return Some(plan);
        }
        if let Some(plan) = self.try_plan_in_active(&existing_entry_plan, &todo_partials, false) {
            debug!("made plan with loop IO and no swaps");
            return Some(plan);
        }
        if let Some(plan) = self.try_plan_in_active(&existing_entry_plan, &todo_fulls, true) {
            debug!("made plan with full IO and swaps");
            return Some(plan);
        }
        if let Some(plan) = self.try_plan_in_active(&existing_entry_plan, &todo_partials, true) {
            debug!("made plan with loop IO and swaps");
            return Some(plan);
        }
        if let Some(plan) = self.try_fallback_plan(&self.make_full_placements(ios)) {
            debug!("made no-loop plan ignoring existing entries");
            return Some(plan);
        }
        if is_block
            && let Some(plan) = self.try_fallback_plan(&self.make_partial_placements(ios))
        {
            debug!("made looping plan ignoring existing entries");
            return Some(plan);
        }

        debug!("failed to make plan");
        None
    }
}
