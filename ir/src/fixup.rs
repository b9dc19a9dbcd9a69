//! Propagation of refinement changes through nested blocks.

use crate::block::{Block, StmtKind};

/// Push the location, offset, and strides of `block`'s refinement named
/// `name` down to every descendant refinement that views it.
///
/// Sub-block refinements are matched by their `from` field; the walk recurses
/// through each match under the sub-block's own `into` name. No-op when
/// `name` is not a refinement of `block`.
pub fn fixup_refs(block: &mut Block, name: &str) {
    let Some(outer) = block.ref_by_into(name) else {
        return;
    };
    let location = outer.location.clone();
    let offset = outer.offset;
    let bank_dim = outer.bank_dim;
    let strides: Vec<usize> = outer.interior_shape.dims.iter().map(|d| d.stride).collect();

    let ids: Vec<_> = block.stmts.ids().collect();
    for id in ids {
        let StmtKind::Block(inner) = &mut block.stmts.get_mut(id).kind else {
            continue;
        };
        let mut renamed = Vec::new();
        for r in inner.refs.iter_mut() {
            if r.from != name {
                continue;
            }
            r.location = location.clone();
            r.offset = offset;
            r.bank_dim = bank_dim;
            for (dim, stride) in r.interior_shape.dims.iter_mut().zip(&strides) {
                dim.stride = *stride;
            }
            renamed.push(r.into.clone());
        }
        for inner_name in renamed {
            fixup_refs(inner, &inner_name);
        }
    }
}
