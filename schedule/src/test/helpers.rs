//! Test utilities for scheduler tests.
//!
//! Builders for blocks, refinements, alias maps, and options, plus lookups
//! over scheduled output.

use smallvec::smallvec;
use twill_ir::{
    Affine, AliasInfo, AliasMap, Block, DType, Extent, Location, RefDir, Refinement, Statement, StmtId,
    StmtKind, TensorShape,
};

use crate::ScheduleOptions;

/// A one-dimensional f32 refinement in DRAM.
pub fn dram_ref(name: &str, dir: RefDir, elems: usize) -> Refinement {
    Refinement {
        dir,
        from: name.to_string(),
        into: name.to_string(),
        access: smallvec![Affine::constant(0)],
        interior_shape: TensorShape::new(DType::Float32, &[elems]),
        agg_op: String::new(),
        location: Location::new("dram"),
        is_const: false,
        offset: 0,
        bank_dim: None,
        cache_unit: None,
    }
}

/// Alias facts for a refinement viewing `base` at an element offset.
pub fn alias_at(base: &str, offset: i64, elems: usize) -> AliasInfo {
    AliasInfo {
        base_ref: base.to_string(),
        access: smallvec![Affine::constant(offset)],
        shape: TensorShape::new(DType::Float32, &[elems]),
        extents: smallvec![Extent { min: offset, max: offset + elems as i64 - 1 }],
    }
}

/// An alias map where every refinement is its own base (all disjoint).
pub fn disjoint_alias_map(block: &Block) -> AliasMap {
    block
        .refs
        .iter()
        .map(|r| {
            let access = r.interior_shape.dims.iter().map(|_| Affine::constant(0)).collect();
            let extents =
                r.interior_shape.dims.iter().map(|d| Extent { min: 0, max: d.size as i64 - 1 }).collect();
            let info = AliasInfo {
                base_ref: r.into.clone(),
                access,
                shape: r.interior_shape.clone(),
                extents,
            };
            (r.into.clone(), info)
        })
        .collect()
}

pub fn load(from: &str) -> Statement {
    Statement::new(StmtKind::Load { from: from.to_string(), into: "$x".to_string() })
}

pub fn store(into: &str) -> Statement {
    Statement::new(StmtKind::Store { from: "$x".to_string(), into: into.to_string() })
}

pub fn special(name: &str, inputs: &[&str], outputs: &[&str]) -> Statement {
    Statement::new(StmtKind::Special {
        name: name.to_string(),
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
    })
}

/// Options with a `mem_kib`-KiB cache at "sram" and transfers tagged "dma".
pub fn options_kib(mem_kib: u64) -> ScheduleOptions {
    ScheduleOptions::builder()
        .mem_loc(Location::new("sram"))
        .mem_kib(mem_kib)
        .xfer_loc(Location::new("dma"))
        .build()
}

/// Short descriptors of the block's statements, in runtime order.
pub fn stmt_names(block: &Block) -> Vec<String> {
    block
        .stmts
        .iter()
        .map(|(_, stmt)| match &stmt.kind {
            StmtKind::Load { from, .. } => format!("load {from}"),
            StmtKind::Store { into, .. } => format!("store {into}"),
            StmtKind::Special { name, .. } => format!("special {name}"),
            StmtKind::Intrinsic { name, .. } => format!("intrinsic {name}"),
            StmtKind::Constant { name } => format!("const {name}"),
            StmtKind::Block(b) => b.name.clone(),
        })
        .collect()
}

/// Id of the sub-block statement with the given name.
pub fn find_block_stmt(block: &Block, name: &str) -> Option<StmtId> {
    block.stmts.iter().find_map(|(id, stmt)| match &stmt.kind {
        StmtKind::Block(b) if b.name == name => Some(id),
        _ => None,
    })
}

/// Position of the first statement matching `name` in runtime order.
pub fn position_of(block: &Block, name: &str) -> usize {
    stmt_names(block)
        .iter()
        .position(|n| n == name)
        .unwrap_or_else(|| panic!("no statement named {name}; have {:?}", stmt_names(block)))
}
