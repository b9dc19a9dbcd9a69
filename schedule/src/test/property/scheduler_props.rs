//! Random-block invariant tests.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use twill_ir::{Block, RefDir};

use super::oracles;
use crate::test::helpers::*;
use crate::{schedule_block, Error};

const NAMES: [&str; 4] = ["A", "B", "C", "D"];

fn dir_of(choice: usize) -> RefDir {
    match choice % 3 {
        0 => RefDir::In,
        1 => RefDir::Out,
        _ => RefDir::InOut,
    }
}

fn elems_of(choice: usize) -> usize {
    [64, 128, 256][choice % 3]
}

/// Build a flat block from raw op choices, repaired so that every read has a
/// producer: reads touch input-direction refs or refs already written, and a
/// pure overwrite never follows the first read of an unprimed ref.
fn build_block(ref_choices: &[(usize, usize)], op_choices: &[(usize, usize, usize)]) -> (Block, HashMap<String, RefDir>, HashSet<String>) {
    let mut block = Block::named("main");
    let dirs: Vec<RefDir> = ref_choices.iter().map(|(_, d)| dir_of(*d)).collect();
    for (i, (e, _)) in ref_choices.iter().enumerate() {
        block.refs.push(dram_ref(NAMES[i], dirs[i], elems_of(*e)));
    }

    let n = dirs.len();
    let mut read: HashSet<usize> = HashSet::new();
    let mut written: HashSet<usize> = HashSet::new();
    let mut originally_written: HashSet<String> = HashSet::new();
    let readable = |r: usize, written: &HashSet<usize>| dirs[r].is_read() || written.contains(&r);

    for &(kind, a, b) in op_choices {
        match kind % 3 {
            0 => {
                let r = a % n;
                if readable(r, &written) {
                    block.stmts.push_back(load(NAMES[r]));
                    read.insert(r);
                }
            }
            1 => {
                let r = a % n;
                if dirs[r].is_write() && (!read.contains(&r) || written.contains(&r)) {
                    block.stmts.push_back(store(NAMES[r]));
                    written.insert(r);
                    originally_written.insert(NAMES[r].to_string());
                }
            }
            _ => {
                let input = a % n;
                let output = b % n;
                let rmw = input == output;
                let ok = if rmw {
                    dirs[output].is_write() && readable(output, &written)
                } else {
                    readable(input, &written)
                        && dirs[output].is_write()
                        && (!read.contains(&output) || written.contains(&output))
                };
                if ok {
                    block.stmts.push_back(special("op", &[NAMES[input]], &[NAMES[output]]));
                    read.insert(input);
                    if rmw {
                        read.insert(output);
                    } else {
                        written.insert(output);
                    }
                    originally_written.insert(NAMES[output].to_string());
                }
            }
        }
    }

    let dir_map = dirs.iter().enumerate().map(|(i, d)| (NAMES[i].to_string(), *d)).collect();
    (block, dir_map, originally_written)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn scheduled_blocks_satisfy_invariants(
        ref_choices in proptest::collection::vec((0..3usize, 0..3usize), 2..=4),
        op_choices in proptest::collection::vec((0..3usize, 0..8usize, 0..8usize), 0..=8),
        mem_kib in 1u64..=4,
    ) {
        let (mut block, dirs, originally_written) = build_block(&ref_choices, &op_choices);
        let alias_map = disjoint_alias_map(&block);
        let options = options_kib(mem_kib);

        if let Err(Error::ResourceExhausted { .. }) = schedule_block(&alias_map, &mut block, &options) {
            // An infeasible budget is a valid outcome, not a property failure.
            return Ok(());
        }

        oracles::check_budget(&block, options.mem_bytes());
        oracles::check_name_uniqueness(&block);
        oracles::check_deps(&block);
        oracles::check_swap_symmetry(&block);
        oracles::check_conservation(&block, &originally_written);
        oracles::check_dataflow(&block, &dirs);
    }

    #[test]
    fn scheduling_is_deterministic(
        ref_choices in proptest::collection::vec((0..3usize, 0..3usize), 2..=4),
        op_choices in proptest::collection::vec((0..3usize, 0..8usize, 0..8usize), 0..=8),
        mem_kib in 1u64..=4,
    ) {
        let (block, _, _) = build_block(&ref_choices, &op_choices);
        let alias_map = disjoint_alias_map(&block);
        let options = options_kib(mem_kib);

        let mut first = block.clone();
        let mut second = block;
        let first_result = schedule_block(&alias_map, &mut first, &options);
        let second_result = schedule_block(&alias_map, &mut second, &options);

        prop_assert_eq!(&first_result, &second_result);
        if first_result.is_ok() {
            prop_assert_eq!(first.to_string(), second.to_string());
        }
    }
}
