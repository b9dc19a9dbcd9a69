//! Scheduling of nested-block statements: exterior reuse and
//! sub-block-confined slice caching.

use smallvec::smallvec;
use twill_ir::{Affine, Block, DType, Index, Location, RefDir, Refinement, Statement, StmtKind, TensorShape};

use crate::schedule_block;
use crate::test::helpers::*;

const KIB: usize = 1024;

/// A sub-block looping over the outer dim of `A`, viewing one row per step.
fn slice_block(name: &str, dir: RefDir) -> Block {
    let mut inner = Block::named(name);
    inner.idxs.push(Index::range("o", 4));
    inner.refs.push(Refinement {
        dir,
        from: "A".to_string(),
        into: "a_view".to_string(),
        access: smallvec![Affine::ident("o"), Affine::constant(0)],
        interior_shape: TensorShape::new(DType::Float32, &[1, 256]),
        agg_op: String::new(),
        location: Location::new("dram"),
        is_const: false,
        offset: 0,
        bank_dim: None,
        cache_unit: None,
    });
    inner.stmts.push_back(load("a_view"));
    inner
}

fn parent_with(inner: Block, a_dir: RefDir) -> Block {
    let mut block = Block::named("main");
    block.refs.push(Refinement {
        dir: a_dir,
        from: "A".to_string(),
        into: "A".to_string(),
        access: smallvec![Affine::constant(0), Affine::constant(0)],
        interior_shape: TensorShape::new(DType::Float32, &[4, 256]),
        agg_op: String::new(),
        location: Location::new("dram"),
        is_const: false,
        offset: 0,
        bank_dim: None,
        cache_unit: None,
    });
    block.stmts.push_back(Statement::new(StmtKind::Block(inner)));
    block
}

fn inner_block(block: &Block, name: &str) -> Block {
    let id = find_block_stmt(block, name).unwrap_or_else(|| panic!("no sub-block {name}"));
    let StmtKind::Block(b) = &block.stmts.get(id).kind else { unreachable!() };
    b.clone()
}

#[test]
fn whole_tensor_fits_and_is_cached_exterior() {
    let mut block = parent_with(slice_block("inner", RefDir::In), RefDir::In);
    let alias_map = disjoint_alias_map(&block);

    schedule_block(&alias_map, &mut block, &options_kib(4)).unwrap();

    // The whole tensor fits, so the sub-block reads a slice of the exterior
    // cache entry and keeps its access affines.
    assert_eq!(stmt_names(&block), vec!["swap_in_A^0", "inner"]);
    let entry = block.ref_by_into("A^0").unwrap();
    assert_eq!(entry.interior_shape.byte_size(), 4 * KIB);
    assert_eq!(entry.offset, 0);

    let inner = inner_block(&block, "inner");
    let view = inner.ref_by_into("a_view").unwrap();
    assert_eq!(view.from, "A^0");
    assert_eq!(view.location.name, "sram");
    assert_eq!(view.access[0], Affine::ident("o"));
    // Strides follow the exterior cache layout.
    assert_eq!(view.interior_shape.dims[0].stride, 256);
}

#[test]
fn oversized_tensor_is_sliced_inside_the_subblock() {
    let mut block = parent_with(slice_block("inner", RefDir::In), RefDir::In);
    let alias_map = disjoint_alias_map(&block);

    schedule_block(&alias_map, &mut block, &options_kib(1)).unwrap();

    // Only one row fits: the cache entry is confined to the sub-block, which
    // gains a backing view and a leading slice-read transfer.
    assert_eq!(stmt_names(&block), vec!["inner"]);
    let entry = block.ref_by_into("A^0").unwrap();
    assert_eq!(entry.interior_shape.byte_size(), KIB);

    let inner = inner_block(&block, "inner");
    let names = stmt_names(&inner);
    assert_eq!(names[0], "read_slice_of_A");

    let storage = inner.ref_by_into("A_storage").unwrap();
    assert_eq!(storage.from, "A");
    assert_eq!(storage.dir, RefDir::In);

    let view = inner.ref_by_into("a_view").unwrap();
    assert_eq!(view.from, "A^0");
    assert!(view.access.iter().all(|a| a.is_zero()));
    assert_eq!(view.interior_shape.byte_size(), KIB);

    // The slice transfer offsets its source access by the loop index.
    let read_slice = inner_block(&inner, "read_slice_of_A");
    let src = read_slice.ref_by_into("src").unwrap();
    assert_eq!(src.from, "A_storage");
    assert_eq!(src.access[0], Affine::ident("i0") + &Affine::ident("o"));
    let dst = read_slice.ref_by_into("dst").unwrap();
    assert_eq!(dst.from, "a_view");
    assert_eq!(dst.access[1], Affine::ident("i1"));
}

#[test]
fn inout_slice_gets_read_and_write_transfers() {
    let mut block = parent_with(slice_block("inner", RefDir::InOut), RefDir::InOut);
    let alias_map = disjoint_alias_map(&block);

    schedule_block(&alias_map, &mut block, &options_kib(1)).unwrap();

    let inner = inner_block(&block, "inner");
    let names = stmt_names(&inner);
    assert_eq!(names.first().map(String::as_str), Some("read_slice_of_A"));
    assert_eq!(names.last().map(String::as_str), Some("write_slice_of_A"));

    let storage = inner.ref_by_into("A_storage").unwrap();
    assert_eq!(storage.dir, RefDir::InOut);
}
