//! Behavioral tests for the coverage instrumenter: emitted sequences,
//! map writes observed through the evaluator, counters, ratio obedience
//! and reproducibility.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use rstest::rstest;

use graymap_ir::{
    verify_module, BinaryOp, BlockId, Evaluator, FuncId, Function,
    GlobalVariable, InstBuilder, InstData, InstFlags, IntConst, IntTy,
    Linkage, Module, Operand, Ty,
};
use graymap_pass::consts::{
    AFL_AREA_PTR, AFL_LAF_AREA_PTR, AFL_PREV_LOC, LAF_AFL_PREV_LOC,
    LAF_CMP_CHAIN_BIT, LAF_MAP_BITS, MAP_SIZE,
};
use graymap_pass::prelude::{
    AflCoverage, CoverageSummary, ModulePass, PassConfig, SanitizeMode,
    SplitSwitches,
};

/// One function whose blocks carry the given names and fall through to a
/// final return.
fn named_blocks_module(names: &[&str]) -> (Module, FuncId) {
    let mut module = Module::new("cov");
    let mut func = Function::new("f");
    let blocks: Vec<BlockId> =
        names.iter().map(|name| func.add_block(name)).collect();
    for pair in blocks.windows(2) {
        InstBuilder::at_end(&mut func, pair[0]).br(pair[1]);
    }
    let last = *blocks.last().expect("at least one block");
    InstBuilder::at_end(&mut func, last).ret(None);
    let fid = module.add_function(func);
    (module, fid)
}

fn instrument(module: &mut Module, ratio: u32, seed: u64) -> CoverageSummary {
    let config = PassConfig {
        inst_ratio: ratio,
        quiet: true,
        mode: SanitizeMode::NonHardened,
    };
    AflCoverage::with_seed(config, seed)
        .instrument(module)
        .unwrap()
}

/// The pass-time random id a block was given, read back from the xor it
/// emits.
fn emitted_loc(func: &Function, block: BlockId) -> u32 {
    for &id in func.block(block).insts() {
        if let InstData::Binary {
            op: BinaryOp::Xor,
            rhs: Operand::Const(c),
            ..
        } = func.inst(id).data()
        {
            return c.value() as u32;
        }
    }
    panic!("block carries no instrumentation xor");
}

#[test]
fn normal_block_gets_the_edge_sequence() {
    let (mut module, fid) = named_blocks_module(&["normal_basicblock"]);
    let summary = instrument(&mut module, 100, 3);
    assert_eq!(summary.inst_blocks, 1);
    assert_eq!(summary.split_blocks, 0);
    verify_module(&module).unwrap();

    let func = module.function(fid);
    let block = func.entry().unwrap();
    let insts = func.block(block).insts();

    // load prev, load map, xor, gep, load, add, store, store, ret
    assert_eq!(insts.len(), 9);
    assert!(matches!(
        func.inst(insts[0]).data(),
        InstData::Load { ty, .. } if *ty == Ty::Int(IntTy::I32)
    ));
    assert!(matches!(
        func.inst(insts[1]).data(),
        InstData::Load { ty: Ty::Ptr, .. }
    ));
    assert!(matches!(
        func.inst(insts[2]).data(),
        InstData::Binary { op: BinaryOp::Xor, .. }
    ));
    assert!(matches!(func.inst(insts[3]).data(), InstData::Gep { .. }));
    assert!(matches!(
        func.inst(insts[4]).data(),
        InstData::Load { ty, .. } if *ty == Ty::Int(IntTy::I8)
    ));
    assert!(matches!(
        func.inst(insts[5]).data(),
        InstData::Binary { op: BinaryOp::Add, .. }
    ));
    assert!(matches!(func.inst(insts[6]).data(), InstData::Store { .. }));
    assert!(matches!(
        func.inst(insts[7]).data(),
        InstData::Store { value: Operand::Const(_), .. }
    ));

    // Every memory access is tagged for sanitizer silence.
    for &id in insts {
        let inst = func.inst(id);
        if matches!(
            inst.data(),
            InstData::Load { .. } | InstData::Store { .. }
        ) {
            assert!(inst.flags().contains(InstFlags::NOSANITIZE));
        }
    }

    let cur_loc = emitted_loc(func, block);
    assert!(cur_loc < MAP_SIZE);

    // Behavior: with prev = 0, the cell at cur_loc increments and prev
    // becomes cur_loc >> 1.
    let mut eval = Evaluator::new(&module);
    let map = eval.alloc(MAP_SIZE as usize);
    eval.write_global(AFL_AREA_PTR, map).unwrap();
    eval.run(fid, block).unwrap();
    assert_eq!(eval.read_byte(map + cur_loc as u64).unwrap(), 1);
    assert_eq!(
        eval.read_global(AFL_PREV_LOC).unwrap(),
        (cur_loc >> 1) as u64
    );
}

#[test]
fn consecutive_normal_blocks_chain_their_ids() {
    let (mut module, fid) =
        named_blocks_module(&["normal_basicblock", "normal_basicblock"]);
    let summary = instrument(&mut module, 100, 8);
    assert_eq!(summary.inst_blocks, 2);

    let func = module.function(fid);
    let blocks: Vec<BlockId> = func.blocks().collect();
    let cur_a = emitted_loc(func, blocks[0]) as u64;
    let cur_b = emitted_loc(func, blocks[1]) as u64;

    let mut eval = Evaluator::new(&module);
    let map = eval.alloc(MAP_SIZE as usize);
    eval.write_global(AFL_AREA_PTR, map).unwrap();
    eval.run(fid, blocks[0]).unwrap();

    let mut expected: HashMap<u64, u8> = HashMap::new();
    *expected.entry(cur_a).or_default() += 1;
    *expected.entry((cur_a >> 1) ^ cur_b).or_default() += 1;
    for (index, count) in expected {
        assert_eq!(eval.read_byte(map + index).unwrap(), count);
    }
    assert_eq!(eval.read_global(AFL_PREV_LOC).unwrap(), cur_b >> 1);
}

#[test]
fn cmp_added_block_sets_the_tagged_bit() {
    let (mut module, fid) = named_blocks_module(&["cmp_added_17"]);
    let summary = instrument(&mut module, 100, 5);
    assert_eq!(summary.inst_blocks, 0);
    assert_eq!(summary.split_blocks, 1);
    assert_eq!(summary.strcmp_blocks, 1);
    verify_module(&module).unwrap();

    let func = module.function(fid);
    let block = func.entry().unwrap();
    let block_id = emitted_loc(func, block);
    assert!(block_id < LAF_MAP_BITS);

    for prev in [0u32, 0x1234, 0x3FFFF] {
        let mut eval = Evaluator::new(&module);
        let map = eval.alloc(MAP_SIZE as usize);
        eval.write_global(AFL_LAF_AREA_PTR, map).unwrap();
        eval.write_global(LAF_AFL_PREV_LOC, prev as u64).unwrap();
        eval.run(fid, block).unwrap();

        let edge = prev ^ block_id;
        let byte_index = ((edge | LAF_CMP_CHAIN_BIT) >> 3) as u64;
        assert_eq!(
            eval.read_byte(map + byte_index).unwrap(),
            1u8 << (edge & 7),
            "prev {prev:#x}"
        );
        assert_eq!(
            eval.read_global(LAF_AFL_PREV_LOC).unwrap(),
            (block_id >> 1) as u64
        );
    }
}

#[rstest]
#[case("cmp_added", 0x8000..=0xFFFF)]
#[case("inv_cmp", 0x4000..=0x7FFF)]
#[case("injected", 0x4000..=0x7FFF)]
#[case("sign", 0x4000..=0x7FFF)]
#[case("NodeBlock", 0x0000..=0x3FFF)]
#[case("NewDefault", 0x0000..=0x3FFF)]
fn laf_classes_write_into_disjoint_ranges(
    #[case] name: &str,
    #[case] range: RangeInclusive<u64>,
) {
    let (mut module, fid) = named_blocks_module(&[name]);
    instrument(&mut module, 100, 11);

    let func = module.function(fid);
    let block = func.entry().unwrap();
    let block_id = emitted_loc(func, block);

    // Previous ids the runtime can actually hold: stores always write
    // block_id >> 1, plus the initial zero.
    for prev in [0u32, 1, 0x1FF, 0x2AAAA, LAF_MAP_BITS / 2 - 1] {
        let mut eval = Evaluator::new(&module);
        let map = eval.alloc(MAP_SIZE as usize);
        eval.write_global(AFL_LAF_AREA_PTR, map).unwrap();
        eval.write_global(LAF_AFL_PREV_LOC, prev as u64).unwrap();
        eval.run(fid, block).unwrap();

        let mut set = Vec::new();
        for index in 0..MAP_SIZE as u64 {
            let value = eval.read_byte(map + index).unwrap();
            if value != 0 {
                set.push((index, value));
            }
        }
        assert_eq!(set.len(), 1, "exactly one byte written");
        let (index, value) = set[0];
        assert!(
            range.contains(&index),
            "byte {index:#x} outside {range:?} for `{name}`"
        );
        // The bit position always comes from the pre-tag edge.
        let edge = prev ^ block_id;
        assert_eq!(value, 1u8 << (edge & 7));
    }
}

#[test]
fn unrecognized_blocks_are_skipped() {
    let (mut module, _) = named_blocks_module(&["xyzzy", "plugh"]);
    let summary = instrument(&mut module, 100, 5);
    assert_eq!(summary, CoverageSummary {
        skipped_blocks: 2,
        ..Default::default()
    });
    verify_module(&module).unwrap();
}

#[test]
fn counters_break_down_by_role() {
    let (mut module, _) = named_blocks_module(&[
        "normal_basicblock",
        "normal_basicblock",
        "cmp_added",
        "inv_cmp",
        "injected",
        "sign",
        "NewDefault",
        "NodeBlock",
        "xyzzy",
    ]);
    let summary = instrument(&mut module, 100, 13);
    assert_eq!(summary.inst_blocks, 2);
    assert_eq!(summary.strcmp_blocks, 1);
    assert_eq!(summary.compare_blocks, 3);
    assert_eq!(summary.switch_blocks, 2);
    assert_eq!(summary.split_blocks, 6);
    assert_eq!(summary.skipped_blocks, 1);
}

#[test]
fn instrumentation_ratio_is_obeyed() {
    let names: Vec<&str> = std::iter::repeat("normal_basicblock")
        .take(2000)
        .collect();
    let (mut module, _) = named_blocks_module(&names);
    let summary = instrument(&mut module, 30, 99);

    assert_eq!(summary.inst_blocks + summary.skipped_blocks, 2000);
    let fraction = summary.inst_blocks as f64 / 2000.0;
    assert!(
        (0.25..=0.35).contains(&fraction),
        "instrumented fraction {fraction} strays too far from 0.30"
    );
}

#[test]
fn reruns_with_one_seed_are_identical() {
    let (module, _) = named_blocks_module(&[
        "normal_basicblock",
        "cmp_added",
        "NodeBlock",
    ]);
    let mut a = module.clone();
    let mut b = module.clone();
    instrument(&mut a, 100, 77);
    instrument(&mut b, 100, 77);
    assert_eq!(a, b);
}

/// A switch lowered by the splitter, ready for coverage instrumentation.
fn lowered_switch_module() -> (Module, FuncId) {
    let ty = IntTy::new(16).unwrap();
    let mut module = Module::new("pipeline");
    let input = module.get_or_declare_global(GlobalVariable::new(
        "input",
        Ty::Int(ty),
        Linkage::External,
    ));

    let mut func = Function::new("dispatch");
    let entry = func.add_block("entry");
    let one = func.add_block("one");
    let two = func.add_block("two");
    let fallback = func.add_block("fallback");
    for (block, result) in [(one, 1u64), (two, 2), (fallback, 0)] {
        InstBuilder::at_end(&mut func, block)
            .ret(Some(IntConst::i64(result).into()));
    }
    let mut b = InstBuilder::at_end(&mut func, entry);
    let scrutinee = b.load(Ty::Int(ty), input);
    b.switch(
        scrutinee,
        fallback,
        vec![
            (IntConst::new(ty, 0x0102), one),
            (IntConst::new(ty, 0x8001), two),
        ],
    );
    drop(b);
    let fid = module.add_function(func);

    SplitSwitches::new().run(&mut module).unwrap();
    (module, fid)
}

#[test]
fn instrumenting_twice_layers_cleanly() {
    let (mut module, _) = lowered_switch_module();

    let first = instrument(&mut module, 100, 21);
    verify_module(&module).unwrap();
    let second = instrument(&mut module, 100, 22);
    verify_module(&module).unwrap();

    // The instrumenter does not recognize its own output; the second
    // layer lands on exactly the same blocks as the first.
    assert_eq!(first.inst_blocks, second.inst_blocks);
    assert_eq!(first.split_blocks, second.split_blocks);
    assert_eq!(first.switch_blocks, second.switch_blocks);
    assert!(first.inst_blocks > 0);
    assert!(first.switch_blocks > 0);
}

#[test]
fn second_layer_lands_ahead_of_the_first() {
    let (mut module, fid) = named_blocks_module(&["normal_basicblock"]);
    instrument(&mut module, 100, 31);
    instrument(&mut module, 100, 32);
    verify_module(&module).unwrap();

    let func = module.function(fid);
    let block = func.entry().unwrap();
    // Two 8-instruction layers ahead of the original return.
    assert_eq!(func.block(block).insts().len(), 17);
}

#[test]
fn lowered_switch_still_dispatches_after_instrumentation() {
    let (mut module, fid) = lowered_switch_module();
    instrument(&mut module, 100, 41);
    verify_module(&module).unwrap();

    for (probe, expected) in
        [(0x0102u64, 1u64), (0x8001, 2), (0x0103, 0), (0xFFFF, 0)]
    {
        let mut eval = Evaluator::new(&module);
        let edge_map = eval.alloc(MAP_SIZE as usize);
        let laf_map = eval.alloc(MAP_SIZE as usize);
        eval.write_global(AFL_AREA_PTR, edge_map).unwrap();
        eval.write_global(AFL_LAF_AREA_PTR, laf_map).unwrap();
        eval.write_global("input", probe).unwrap();

        let entry = module.function(fid).entry().unwrap();
        let result = eval.run(fid, entry).unwrap();
        assert_eq!(result, Some(expected), "probe {probe:#x}");

        // The taken path left marks in both maps.
        let edge_hits = (0..MAP_SIZE as u64)
            .filter(|i| eval.read_byte(edge_map + i).unwrap() != 0)
            .count();
        let laf_hits = (0..MAP_SIZE as u64)
            .filter(|i| eval.read_byte(laf_map + i).unwrap() != 0)
            .count();
        assert!(edge_hits > 0);
        assert!(laf_hits > 0);
    }
}
