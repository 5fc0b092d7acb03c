//! Switch-lowering pass
//!
//! Replaces every switch keyed on a byte-multiple integer with a tree of
//! single-byte decisions. Each tree node shifts the scrutinee, truncates
//! it to one byte and either checks the byte for equality (when all
//! remaining cases agree on it) or partitions the cases around the median
//! byte value. Every node a fuzzer can now observe is one byte-sized
//! decision instead of one opaque multi-byte jump.
//!
//! Synthesized blocks are named `NodeBlock` and `NewDefault`; before any
//! switch is touched, functions without a `normal_basicblock` block get
//! every block renamed to that marker so the downstream coverage
//! instrumenter can tell original program blocks from synthetic ones.

use itertools::Itertools;
use tracing::info;

use graymap_ir::{
    verify_module, BlockId, FuncId, Function, InstBuilder, InstData, IntConst,
    IntTy, Module, Operand,
};

use crate::{
    error::{PassError, StructuralError},
    registry::ModulePass,
    role::{NEW_DEFAULT, NODE_BLOCK, NORMAL_BLOCK},
};

/// One switch case picked up for conversion.
#[derive(Debug, Clone, Copy)]
struct Case {
    value: IntConst,
    dest: BlockId,
}

/// The switch-splitting module pass.
#[derive(Debug, Default)]
pub struct SplitSwitches;

impl SplitSwitches {
    /// Create the pass.
    pub fn new() -> Self {
        Self
    }
}

impl ModulePass for SplitSwitches {
    fn name(&self) -> &'static str {
        "split-switches"
    }

    fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        let mutated = split_switches(module)?;
        verify_module(module)?;
        Ok(mutated)
    }
}

fn split_switches(module: &mut Module) -> Result<bool, PassError> {
    // Collect rewrite sites module-wide. While scanning, functions that
    // contain no block named `normal_basicblock` get every block renamed
    // to it; the marker must be in place before the first synthetic block
    // appears.
    let mut sites: Vec<(FuncId, BlockId)> = Vec::new();
    for func_id in module.function_ids() {
        let func = module.function_mut(func_id);
        let keep_names = func
            .blocks()
            .any(|b| func.block(b).name().contains(NORMAL_BLOCK));
        let blocks: Vec<BlockId> = func.blocks().collect();
        for block in blocks {
            if !keep_names {
                func.set_block_name(block, NORMAL_BLOCK);
            }
            let Some(term) = func.terminator(block) else {
                continue;
            };
            if let InstData::Switch { cases, .. } = func.inst(term).data() {
                if !cases.is_empty() {
                    sites.push((func_id, block));
                }
            }
        }
    }

    if sites.is_empty() {
        return Ok(false);
    }
    info!(switches = sites.len(), "rewriting switch statements");

    for (func_id, block) in sites {
        rewrite_switch(module.function_mut(func_id), block)?;
    }
    Ok(true)
}

/// Rewrite a single switch terminator into a byte-decision tree.
///
/// The rewrite is atomic per switch: the scrutinee width is validated
/// before anything is created, and the original block's terminator is
/// only replaced once the whole tree exists.
fn rewrite_switch(func: &mut Function, orig: BlockId) -> Result<(), PassError> {
    let Some(term) = func.terminator(orig) else {
        return Ok(());
    };
    let InstData::Switch {
        value,
        default,
        cases,
    } = func.inst(term).data().clone()
    else {
        return Ok(());
    };
    let Some((first_case, _)) = cases.first() else {
        return Ok(());
    };
    let scrutinee_ty = first_case.ty();
    if !scrutinee_ty.is_byte_sized() {
        return Err(
            StructuralError::UnsplittableScrutinee(scrutinee_ty.bits()).into()
        );
    }

    // Fresh default collecting every "no byte matched" edge, placed
    // immediately before the original default so the layout stays
    // readable.
    let new_default = func.add_block_before(default, NEW_DEFAULT);
    InstBuilder::at_end(func, new_default).br(default);

    let cases: Vec<Case> = cases
        .into_iter()
        .map(|(value, dest)| Case { value, dest })
        .collect();
    let bytes_checked = vec![false; scrutinee_ty.bytes()];
    let root = switch_convert(
        func,
        &cases,
        &bytes_checked,
        orig,
        new_default,
        value,
        scrutinee_ty,
    )?;

    // Branch into the tree and delete the switch.
    func.remove_inst(orig, term);
    InstBuilder::at_end(func, orig).br(root);

    redirect_first_incoming(func, default, orig, new_default);
    Ok(())
}

/// Build the decision tree for the remaining `cases` and return its root.
///
/// `bytes_checked` marks scrutinee byte positions already pinned to a
/// single value on this path. Each node examines the unchecked position
/// with the fewest distinct byte values; a single-valued position becomes
/// an equality check, a multi-valued one becomes a median split.
fn switch_convert(
    func: &mut Function,
    cases: &[Case],
    bytes_checked: &[bool],
    orig: BlockId,
    new_default: BlockId,
    value: Operand,
    scrutinee_ty: IntTy,
) -> Result<BlockId, PassError> {
    if cases.is_empty() {
        return Err(StructuralError::EmptyCaseSet.into());
    }

    // Distinct byte values at each position across the remaining cases.
    let byte_sets: Vec<Vec<u8>> = (0..bytes_checked.len())
        .map(|i| {
            cases
                .iter()
                .map(|case| case.value.byte(i))
                .sorted()
                .dedup()
                .collect()
        })
        .collect();

    // Smallest unchecked set wins; ties fall to the lowest index.
    let (index, set) = byte_sets
        .iter()
        .enumerate()
        .filter(|(i, _)| !bytes_checked[*i])
        .min_by_key(|(_, set)| set.len())
        .ok_or(StructuralError::EmptyCaseSet)?;

    let node = func.add_block(NODE_BLOCK);
    let shift = IntConst::new(scrutinee_ty, (index as u64) * 8);

    if let [byte] = set.as_slice() {
        let byte = *byte;
        let mut checked = bytes_checked.to_vec();
        checked[index] = true;

        let mut b = InstBuilder::at_end(func, node);
        let shifted = b.lshr(value, shift);
        let byte_val: Operand = if scrutinee_ty.bits() > 8 {
            b.trunc(shifted, IntTy::I8).into()
        } else {
            shifted.into()
        };
        let cmp = b.icmp_eq(byte_val, IntConst::i8(byte));
        drop(b);

        if checked.iter().all(|&done| done) {
            // Every byte is pinned, so exactly one case can remain.
            debug_assert_eq!(cases.len(), 1);
            let case = cases[0];
            InstBuilder::at_end(func, node).cond_br(cmp, case.dest, new_default);
            redirect_first_incoming(func, case.dest, orig, node);
        } else {
            let sub = switch_convert(
                func,
                cases,
                &checked,
                orig,
                new_default,
                value,
                scrutinee_ty,
            )?;
            InstBuilder::at_end(func, node).cond_br(cmp, sub, new_default);
        }
    } else {
        // The set is sorted, so the middle element is the median; cases
        // whose byte is strictly below it go left, the rest go right.
        let pivot = set[set.len() / 2];
        let (lhs, rhs): (Vec<Case>, Vec<Case>) = cases
            .iter()
            .copied()
            .partition(|case| case.value.byte(index) < pivot);

        let lbb = switch_convert(
            func,
            &lhs,
            bytes_checked,
            orig,
            new_default,
            value,
            scrutinee_ty,
        )?;
        let rbb = switch_convert(
            func,
            &rhs,
            bytes_checked,
            orig,
            new_default,
            value,
            scrutinee_ty,
        )?;

        let mut b = InstBuilder::at_end(func, node);
        let shifted = b.lshr(value, shift);
        let byte_val: Operand = if scrutinee_ty.bits() > 8 {
            b.trunc(shifted, IntTy::I8).into()
        } else {
            shifted.into()
        };
        let cmp = b.icmp_ult(byte_val, IntConst::i8(pivot));
        b.cond_br(cmp, lbb, rbb);
    }

    Ok(node)
}

/// Rewrite the first incoming-block entry referencing `from` in each phi
/// of `succ`. Only the first occurrence moves; a predecessor appearing
/// through several edges keeps its remaining entries.
fn redirect_first_incoming(
    func: &mut Function,
    succ: BlockId,
    from: BlockId,
    to: BlockId,
) {
    for phi in func.phi_ids(succ) {
        if let Some(incoming) = func.inst_mut(phi).phi_incoming_mut() {
            if let Some(entry) =
                incoming.iter_mut().find(|(_, block)| *block == from)
            {
                entry.1 = to;
            }
        }
    }
}
