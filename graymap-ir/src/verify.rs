//! Structural verification of modules and functions

use std::collections::HashSet;

use crate::{
    BlockId, Function, InstData, InstId, IntTy, IrError, Module, Operand, Ty,
};

/// Verify every function in the module.
pub fn verify_module(module: &Module) -> Result<(), IrError> {
    for id in module.function_ids() {
        verify_function(module.function(id))?;
    }
    Ok(())
}

/// Verify a single function's structural integrity.
///
/// Checks block shape (non-empty, exactly one trailing terminator, phis
/// only at the head), operand liveness, instruction typing, switch case
/// discipline, and that each phi's incoming-block list matches the block's
/// true predecessor edges including multiplicity.
pub fn verify_function(func: &Function) -> Result<(), IrError> {
    let live: HashSet<InstId> = func
        .blocks()
        .flat_map(|b| func.block(b).insts().iter().copied())
        .collect();

    for b in func.blocks() {
        verify_block_shape(func, b)?;
        verify_operands(func, b, &live)?;
        verify_types(func, b)?;
        verify_phis(func, b)?;
    }
    Ok(())
}

fn ctx(func: &Function, block: BlockId) -> (String, String) {
    (func.name().to_owned(), func.block(block).name().to_owned())
}

fn verify_block_shape(func: &Function, b: BlockId) -> Result<(), IrError> {
    if func.block(b).is_empty() {
        let (func, block) = ctx(func, b);
        return Err(IrError::EmptyBlock { func, block });
    }
    let insts = func.block(b).insts();
    for (i, &id) in insts.iter().enumerate() {
        let inst = func.inst(id);
        let is_last = i + 1 == insts.len();
        if inst.is_terminator() && !is_last {
            let (func, block) = ctx(func, b);
            return Err(IrError::EarlyTerminator { func, block });
        }
        if is_last && !inst.is_terminator() {
            let (func, block) = ctx(func, b);
            return Err(IrError::MissingTerminator { func, block });
        }
    }
    let head = func.first_insertion_point(b);
    if insts[head..].iter().any(|&id| func.inst(id).is_phi()) {
        let (func, block) = ctx(func, b);
        return Err(IrError::MisplacedPhi { func, block });
    }
    Ok(())
}

fn verify_operands(
    func: &Function,
    b: BlockId,
    live: &HashSet<InstId>,
) -> Result<(), IrError> {
    for &id in func.block(b).insts() {
        for op in func.inst(id).operands() {
            if let Operand::Inst(target) = op {
                if !live.contains(&target) {
                    let (func, block) = ctx(func, b);
                    return Err(IrError::DanglingOperand { func, block });
                }
            }
        }
    }
    Ok(())
}

fn int_ty_of(
    func: &Function,
    b: BlockId,
    op: Operand,
    what: &str,
) -> Result<IntTy, IrError> {
    match func.value_ty(op) {
        Some(Ty::Int(ty)) => Ok(ty),
        Some(Ty::Ptr) => {
            let (func, block) = ctx(func, b);
            Err(IrError::TypeMismatch {
                func,
                block,
                detail: format!("{what} must be an integer"),
            })
        }
        None => {
            let (func, block) = ctx(func, b);
            Err(IrError::UntypedValue { func, block })
        }
    }
}

/// An address operand: a pointer, or a raw `i64` byte index.
fn check_addr(
    func: &Function,
    b: BlockId,
    op: Operand,
    what: &str,
) -> Result<(), IrError> {
    match func.value_ty(op) {
        Some(Ty::Ptr) | Some(Ty::Int(IntTy::I64)) => Ok(()),
        Some(_) => {
            let (func, block) = ctx(func, b);
            Err(IrError::TypeMismatch {
                func,
                block,
                detail: format!("{what} must be a pointer or i64 address"),
            })
        }
        None => {
            let (func, block) = ctx(func, b);
            Err(IrError::UntypedValue { func, block })
        }
    }
}

fn verify_types(func: &Function, b: BlockId) -> Result<(), IrError> {
    for &id in func.block(b).insts() {
        match func.inst(id).data() {
            InstData::Binary { op, lhs, rhs } => {
                let l = int_ty_of(func, b, *lhs, "binary operand")?;
                let r = int_ty_of(func, b, *rhs, "binary operand")?;
                if l != r {
                    let (func, block) = ctx(func, b);
                    return Err(IrError::TypeMismatch {
                        func,
                        block,
                        detail: format!(
                            "{op} operands must share one width, got {l} and {r}"
                        ),
                    });
                }
            }
            InstData::Cmp { pred, lhs, rhs } => {
                let l = int_ty_of(func, b, *lhs, "compare operand")?;
                let r = int_ty_of(func, b, *rhs, "compare operand")?;
                if l != r {
                    let (func, block) = ctx(func, b);
                    return Err(IrError::TypeMismatch {
                        func,
                        block,
                        detail: format!(
                            "{pred} operands must share one width, got {l} and {r}"
                        ),
                    });
                }
            }
            InstData::Trunc { value, ty } => {
                let from = int_ty_of(func, b, *value, "trunc source")?;
                if from.bits() <= ty.bits() {
                    let (func, block) = ctx(func, b);
                    return Err(IrError::TypeMismatch {
                        func,
                        block,
                        detail: format!("trunc must narrow, got {from} to {ty}"),
                    });
                }
            }
            InstData::ZExt { value, ty } => {
                let from = int_ty_of(func, b, *value, "zext source")?;
                if from.bits() >= ty.bits() {
                    let (func, block) = ctx(func, b);
                    return Err(IrError::TypeMismatch {
                        func,
                        block,
                        detail: format!("zext must widen, got {from} to {ty}"),
                    });
                }
            }
            InstData::Load { addr, .. } => {
                check_addr(func, b, *addr, "load address")?;
            }
            InstData::Store { value, addr } => {
                if func.value_ty(*value).is_none() {
                    let (func, block) = ctx(func, b);
                    return Err(IrError::UntypedValue { func, block });
                }
                check_addr(func, b, *addr, "store address")?;
            }
            InstData::Gep { base, index } => {
                check_addr(func, b, *base, "gep base")?;
                int_ty_of(func, b, *index, "gep index")?;
            }
            InstData::Phi { ty, incoming } => {
                for (op, _) in incoming {
                    if func.value_ty(*op) != Some(*ty) {
                        let (func, block) = ctx(func, b);
                        return Err(IrError::TypeMismatch {
                            func,
                            block,
                            detail: format!(
                                "phi incoming value does not match type {ty}"
                            ),
                        });
                    }
                }
            }
            InstData::CondBr { cond, .. } => {
                let ty = int_ty_of(func, b, *cond, "branch condition")?;
                if ty != IntTy::I1 {
                    let (func, block) = ctx(func, b);
                    return Err(IrError::TypeMismatch {
                        func,
                        block,
                        detail: format!("branch condition must be i1, got {ty}"),
                    });
                }
            }
            InstData::Switch { value, cases, .. } => {
                let scrutinee = int_ty_of(func, b, *value, "switch scrutinee")?;
                let mut seen = HashSet::new();
                for (case, _) in cases {
                    if case.ty() != scrutinee {
                        let (func, block) = ctx(func, b);
                        return Err(IrError::CaseWidthMismatch { func, block });
                    }
                    if !seen.insert(case.value()) {
                        let (func, block) = ctx(func, b);
                        return Err(IrError::DuplicateCaseValue { func, block });
                    }
                }
            }
            InstData::Br { .. } | InstData::Ret { .. } => {}
        }
    }
    Ok(())
}

fn verify_phis(func: &Function, b: BlockId) -> Result<(), IrError> {
    let phis = func.phi_ids(b);
    if phis.is_empty() {
        return Ok(());
    }
    let mut preds = func.predecessors(b);
    preds.sort_unstable();
    for id in phis {
        let incoming = func
            .inst(id)
            .phi_incoming()
            .expect("phi_ids returns phi nodes only");
        let mut blocks: Vec<BlockId> =
            incoming.iter().map(|(_, block)| *block).collect();
        blocks.sort_unstable();
        if blocks != preds {
            let (func, block) = ctx(func, b);
            return Err(IrError::PhiPredecessorMismatch { func, block });
        }
    }
    Ok(())
}
