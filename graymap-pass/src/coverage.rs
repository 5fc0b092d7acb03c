//! Block coverage instrumentation pass
//!
//! Walks every basic block in the module and, keyed on the block's role,
//! inserts one of two counting sequences at the first legal insertion
//! point: ordinary program blocks bump a byte counter in the edge map,
//! synthetic decision blocks set a single bit in the laf map. Both
//! sequences index their map with the xor of the previous block's rolling
//! id and the current block's pass-time random id, so every dynamic edge
//! has its own cell.
//!
//! The counter updates are deliberately non-atomic; racing threads lose
//! increments, never memory safety, and the consumer tolerates the loss.

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{info, warn};

use graymap_ir::{
    BlockId, Function, GlobalId, GlobalVariable, InstBuilder, IntConst, IntTy,
    Linkage, Module, ThreadLocalMode, Ty,
};

use crate::{
    config::PassConfig,
    consts::{
        AFL_AREA_PTR, AFL_LAF_AREA_PTR, AFL_PREV_LOC, LAF_AFL_PREV_LOC,
        LAF_CMP_CHAIN_BIT, LAF_MAP_BITS, LAF_SIGN_SPLIT_BIT,
        LAF_SIGN_SPLIT_MASK, LAF_SWITCH_MASK, MAP_SIZE,
    },
    error::PassError,
    registry::ModulePass,
    role::BlockRole,
};

/// Counters accumulated over one instrumentation run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoverageSummary {
    /// Normal blocks given edge-map instrumentation.
    pub inst_blocks: usize,
    /// Synthetic decision blocks given laf-map instrumentation.
    pub split_blocks: usize,
    /// Laf blocks tagged as string-compare chain nodes.
    pub strcmp_blocks: usize,
    /// Laf blocks tagged as integer-compare rewrite nodes.
    pub compare_blocks: usize,
    /// Laf blocks tagged as switch-lowering nodes.
    pub switch_blocks: usize,
    /// Blocks left alone by the ratio draw or by name classification.
    pub skipped_blocks: usize,
}

/// Ids of the four externally-linked globals the inserted code uses.
struct RuntimeGlobals {
    area_ptr: GlobalId,
    laf_area_ptr: GlobalId,
    prev_loc: GlobalId,
    laf_prev_loc: GlobalId,
}

impl RuntimeGlobals {
    fn declare(module: &mut Module) -> Self {
        let area_ptr = module.get_or_declare_global(GlobalVariable::new(
            AFL_AREA_PTR,
            Ty::Ptr,
            Linkage::External,
        ));
        let laf_area_ptr = module.get_or_declare_global(GlobalVariable::new(
            AFL_LAF_AREA_PTR,
            Ty::Ptr,
            Linkage::External,
        ));
        let prev_loc = module.get_or_declare_global(
            GlobalVariable::new(
                AFL_PREV_LOC,
                Ty::Int(IntTy::I32),
                Linkage::External,
            )
            .with_thread_local(ThreadLocalMode::GeneralDynamic),
        );
        let laf_prev_loc = module.get_or_declare_global(
            GlobalVariable::new(
                LAF_AFL_PREV_LOC,
                Ty::Int(IntTy::I32),
                Linkage::External,
            )
            .with_thread_local(ThreadLocalMode::GeneralDynamic),
        );
        Self {
            area_ptr,
            laf_area_ptr,
            prev_loc,
            laf_prev_loc,
        }
    }
}

/// The coverage instrumentation module pass.
pub struct AflCoverage {
    config: PassConfig,
    rng: StdRng,
}

impl AflCoverage {
    /// Create the pass with an entropy-seeded random source.
    pub fn new(config: PassConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create the pass with a fixed seed, making every `cur_loc` and
    /// `block_id` choice reproducible.
    pub fn with_seed(config: PassConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create the pass from the process environment.
    pub fn from_env() -> Result<Self, PassError> {
        Ok(Self::new(PassConfig::from_env()?))
    }

    /// Instrument every classifiable block and return the counters.
    pub fn instrument(
        &mut self,
        module: &mut Module,
    ) -> Result<CoverageSummary, PassError> {
        let globals = RuntimeGlobals::declare(module);
        let mut summary = CoverageSummary::default();

        for func_id in module.function_ids() {
            let func = module.function_mut(func_id);
            let blocks: Vec<BlockId> = func.blocks().collect();
            for block in blocks {
                let at = func.first_insertion_point(block);

                // The ratio draw happens for every block, before the
                // block is classified.
                if self.rng.gen_range(0..100u32) >= self.config.inst_ratio {
                    summary.skipped_blocks += 1;
                    continue;
                }

                match BlockRole::classify(func.block(block).name()) {
                    None => summary.skipped_blocks += 1,
                    Some(BlockRole::Normal) => {
                        self.instrument_edge(func, block, at, &globals);
                        summary.inst_blocks += 1;
                    }
                    Some(role) => {
                        self.instrument_laf(func, block, at, &globals, role);
                        summary.split_blocks += 1;
                        match role {
                            BlockRole::CmpChain => summary.strcmp_blocks += 1,
                            BlockRole::SignSplit => summary.compare_blocks += 1,
                            _ => summary.switch_blocks += 1,
                        }
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Edge scheme: count `prev ^ cur` in the byte-per-edge map.
    fn instrument_edge(
        &mut self,
        func: &mut Function,
        block: BlockId,
        at: usize,
        globals: &RuntimeGlobals,
    ) {
        let cur_loc: u32 = self.rng.gen_range(0..MAP_SIZE);

        let mut b = InstBuilder::at(func, block, at);
        let prev = b.load(Ty::Int(IntTy::I32), globals.prev_loc);
        b.mark_nosanitize(prev);
        let map_ptr = b.load(Ty::Ptr, globals.area_ptr);
        b.mark_nosanitize(map_ptr);

        let index = b.xor(prev, IntConst::i32(cur_loc));
        let cell = b.gep(map_ptr, index);

        let counter = b.load(Ty::Int(IntTy::I8), cell);
        b.mark_nosanitize(counter);
        let bumped = b.add(counter, IntConst::i8(1));
        let store = b.store(bumped, cell);
        b.mark_nosanitize(store);

        let store = b.store(IntConst::i32(cur_loc >> 1), globals.prev_loc);
        b.mark_nosanitize(store);
    }

    /// Laf scheme: set bit `edge & 7` of byte `tagged_edge >> 3` in the
    /// bit-per-edge map, where the tag keeps the three block classes in
    /// disjoint ranges.
    fn instrument_laf(
        &mut self,
        func: &mut Function,
        block: BlockId,
        at: usize,
        globals: &RuntimeGlobals,
        role: BlockRole,
    ) {
        let block_id: u32 = self.rng.gen_range(0..LAF_MAP_BITS);

        let mut b = InstBuilder::at(func, block, at);
        let prev = b.load(Ty::Int(IntTy::I32), globals.laf_prev_loc);
        b.mark_nosanitize(prev);
        let map_ptr = b.load(Ty::Ptr, globals.laf_area_ptr);
        b.mark_nosanitize(map_ptr);

        let edge = b.xor(prev, IntConst::i32(block_id));
        let tagged = match role {
            BlockRole::CmpChain => {
                b.or(edge, IntConst::i32(LAF_CMP_CHAIN_BIT))
            }
            BlockRole::SignSplit => {
                let masked = b.and(edge, IntConst::i32(LAF_SIGN_SPLIT_MASK));
                b.or(masked, IntConst::i32(LAF_SIGN_SPLIT_BIT))
            }
            _ => b.and(edge, IntConst::i32(LAF_SWITCH_MASK)),
        };

        let byte_index = b.lshr(tagged, IntConst::i32(3));
        let cell = b.gep(map_ptr, byte_index);

        // The bit position comes from the pre-tag edge; the tag bits
        // live above bit 16, so the low three bits coincide anyway.
        let low3 = b.and(edge, IntConst::i32(7));
        let low3 = b.trunc(low3, IntTy::I8);
        let mask = b.shl(IntConst::i8(1), low3);

        let cell_val = b.load(Ty::Int(IntTy::I8), cell);
        b.mark_nosanitize(cell_val);
        let set = b.or(cell_val, mask);
        let store = b.store(set, cell);
        b.mark_nosanitize(store);

        let store =
            b.store(IntConst::i32(block_id >> 1), globals.laf_prev_loc);
        b.mark_nosanitize(store);
    }

    fn report(&self, summary: &CoverageSummary) {
        if self.config.quiet {
            return;
        }
        info!(total = summary.split_blocks, "split blocks instrumented");
        info!(total = summary.strcmp_blocks, "strcmp blocks instrumented");
        info!(total = summary.compare_blocks, "compare blocks instrumented");
        info!(total = summary.switch_blocks, "switch blocks instrumented");
        if summary.inst_blocks == 0 {
            warn!("no instrumentation targets found");
        } else {
            info!(
                locations = summary.inst_blocks,
                mode = %self.config.mode,
                ratio = self.config.inst_ratio,
                "instrumented locations"
            );
        }
    }
}

impl ModulePass for AflCoverage {
    fn name(&self) -> &'static str {
        "afl-coverage"
    }

    fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        if !self.config.quiet {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                "afl coverage instrumentation"
            );
        }
        let summary = self.instrument(module)?;
        self.report(&summary);
        Ok(true)
    }
}
