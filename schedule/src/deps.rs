//! Transitive dependency cleanup.

use std::collections::{BTreeSet, HashMap, HashSet};

use twill_ir::{Block, StmtId};

/// Drop every dependency edge made redundant by a longer chain.
///
/// Walks statements in runtime order, accumulating each statement's
/// transitive dependency set; a direct edge already implied by a
/// dependency's own closure is removed. Scheduling emits edges
/// conservatively (including duplicates), so this runs once at the end of
/// the pass. Surviving edges are ordered by statement id.
pub(crate) fn rebuild_transitive_deps(block: &mut Block) {
    let mut tdeps: HashMap<StmtId, HashSet<StmtId>> = HashMap::with_capacity(block.stmts.len());

    let ids: Vec<StmtId> = block.stmts.ids().collect();
    for id in ids {
        let direct: BTreeSet<StmtId> = block.stmts.get(id).deps.iter().copied().collect();
        let mut transitive: HashSet<StmtId> = HashSet::new();
        for dep in &direct {
            if let Some(deps_of_dep) = tdeps.get(dep) {
                transitive.extend(deps_of_dep.iter().copied());
            }
        }
        block.stmts.get_mut(id).deps = direct.iter().copied().filter(|d| !transitive.contains(d)).collect();
        transitive.extend(direct);
        tdeps.insert(id, transitive);
    }
}
