//! A small IR evaluator
//!
//! Executes one function at a time against a flat byte memory, with
//! module globals bound to allocated cells. Made for tests that need to
//! observe what rewritten control flow actually does: run the original
//! and the transformed function on the same inputs and compare, or run
//! instrumented code and inspect the coverage maps it wrote.

use crate::{
    BinaryOp, BlockId, CmpPred, EvalError, FuncId, Function, InstData,
    Module, Operand, Ty, Word,
};

/// Lowest valid address; everything below it is a null guard region.
const NULL_GUARD: Word = 16;

/// Default bound on executed instructions per [`Evaluator::run`].
pub const DEFAULT_STEP_LIMIT: usize = 1 << 20;

/// Executes functions of one module against a byte-addressed memory.
pub struct Evaluator<'m> {
    module: &'m Module,
    memory: Vec<u8>,
    global_addrs: Vec<Word>,
    step_limit: usize,
}

impl<'m> Evaluator<'m> {
    /// Create an evaluator with every module global bound to a zeroed
    /// 8-byte cell.
    pub fn new(module: &'m Module) -> Self {
        let mut memory = vec![0u8; NULL_GUARD as usize];
        let global_addrs = module
            .globals()
            .iter()
            .map(|_| {
                let addr = memory.len() as Word;
                memory.extend_from_slice(&[0u8; 8]);
                addr
            })
            .collect();
        Self {
            module,
            memory,
            global_addrs,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    /// Replace the step budget.
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Allocate `len` zeroed bytes and return their base address.
    pub fn alloc(&mut self, len: usize) -> Word {
        let addr = self.memory.len() as Word;
        self.memory.resize(self.memory.len() + len, 0);
        addr
    }

    /// Write a value into the named global's cell, sized by its type.
    pub fn write_global(&mut self, name: &str, value: Word) -> Result<(), EvalError> {
        let id = self
            .module
            .global_by_name(name)
            .ok_or_else(|| EvalError::UnknownGlobal(name.to_owned()))?;
        let size = self.module.global(id).ty().store_size();
        let addr = self.global_addrs[id.index()];
        self.store_mem(addr, size, value)
    }

    /// Read the named global's cell, sized by its type.
    pub fn read_global(&self, name: &str) -> Result<Word, EvalError> {
        let id = self
            .module
            .global_by_name(name)
            .ok_or_else(|| EvalError::UnknownGlobal(name.to_owned()))?;
        let size = self.module.global(id).ty().store_size();
        let addr = self.global_addrs[id.index()];
        self.load_mem(addr, size)
    }

    /// Read one byte of memory.
    pub fn read_byte(&self, addr: Word) -> Result<u8, EvalError> {
        Ok(self.load_mem(addr, 1)? as u8)
    }

    fn check_range(&self, addr: Word, len: usize) -> Result<usize, EvalError> {
        if addr < NULL_GUARD {
            return Err(EvalError::NullAccess(addr));
        }
        let start = usize::try_from(addr)
            .map_err(|_| EvalError::OutOfBounds { addr, len })?;
        let end = start
            .checked_add(len)
            .ok_or(EvalError::OutOfBounds { addr, len })?;
        if end > self.memory.len() {
            return Err(EvalError::OutOfBounds { addr, len });
        }
        Ok(start)
    }

    fn load_mem(&self, addr: Word, len: usize) -> Result<Word, EvalError> {
        let start = self.check_range(addr, len)?;
        let mut value: Word = 0;
        for (i, byte) in self.memory[start..start + len].iter().enumerate() {
            value |= (*byte as Word) << (i * 8);
        }
        Ok(value)
    }

    fn store_mem(&mut self, addr: Word, len: usize, value: Word) -> Result<(), EvalError> {
        let start = self.check_range(addr, len)?;
        for i in 0..len {
            self.memory[start + i] = (value >> (i * 8)) as u8;
        }
        Ok(())
    }

    fn operand_value(
        &self,
        values: &[Option<Word>],
        op: Operand,
    ) -> Result<Word, EvalError> {
        match op {
            Operand::Const(c) => Ok(c.value()),
            Operand::Inst(id) => values
                .get(id.index())
                .copied()
                .flatten()
                .ok_or(EvalError::UseBeforeDef),
            Operand::Global(g) => Ok(self.global_addrs[g.index()]),
        }
    }

    fn int_width(func: &Function, op: Operand) -> Result<u16, EvalError> {
        match func.value_ty(op) {
            Some(Ty::Int(ty)) => Ok(ty.bits()),
            _ => Err(EvalError::Untyped),
        }
    }

    /// Execute `func` starting at `entry` until a return, a fault, or the
    /// step budget runs out. Returns the `ret` operand's value, if any.
    pub fn run(
        &mut self,
        func: FuncId,
        entry: BlockId,
    ) -> Result<Option<Word>, EvalError> {
        let module: &'m Module = self.module;
        let func = module.function(func);
        let mut values: Vec<Option<Word>> = vec![None; func.inst_count()];
        let mut block = entry;
        let mut pred: Option<BlockId> = None;
        let mut steps = 0usize;

        loop {
            // Phi nodes read their incoming values simultaneously before
            // any of them is written.
            let phis = func.phi_ids(block);
            let mut staged = Vec::with_capacity(phis.len());
            for id in phis {
                steps += 1;
                if steps > self.step_limit {
                    return Err(EvalError::StepLimit(self.step_limit));
                }
                let p = pred.ok_or(EvalError::PhiWithoutPredecessor)?;
                let incoming = func
                    .inst(id)
                    .phi_incoming()
                    .expect("phi_ids returns phi nodes only");
                let (op, _) = incoming
                    .iter()
                    .find(|(_, b)| *b == p)
                    .ok_or(EvalError::PhiMissingIncoming)?;
                staged.push((id, self.operand_value(&values, *op)?));
            }
            for (id, value) in staged {
                values[id.index()] = Some(value);
            }

            let start = func.first_insertion_point(block);
            let insts = func.block(block).insts()[start..].to_vec();
            let mut next: Option<BlockId> = None;
            for id in insts {
                steps += 1;
                if steps > self.step_limit {
                    return Err(EvalError::StepLimit(self.step_limit));
                }
                match func.inst(id).data().clone() {
                    InstData::Binary { op, lhs, rhs } => {
                        let bits = Self::int_width(func, lhs)?;
                        let mask = if bits >= 64 {
                            Word::MAX
                        } else {
                            (1u64 << bits) - 1
                        };
                        let a = self.operand_value(&values, lhs)?;
                        let b = self.operand_value(&values, rhs)?;
                        let result = match op {
                            BinaryOp::And => a & b,
                            BinaryOp::Or => a | b,
                            BinaryOp::Xor => a ^ b,
                            BinaryOp::Add => a.wrapping_add(b) & mask,
                            BinaryOp::Shl => {
                                if b >= bits as Word {
                                    0
                                } else {
                                    (a << b) & mask
                                }
                            }
                            BinaryOp::LShr => {
                                if b >= bits as Word {
                                    0
                                } else {
                                    a >> b
                                }
                            }
                        };
                        values[id.index()] = Some(result);
                    }
                    InstData::Cmp { pred: p, lhs, rhs } => {
                        let a = self.operand_value(&values, lhs)?;
                        let b = self.operand_value(&values, rhs)?;
                        let result = match p {
                            CmpPred::Eq => (a == b) as Word,
                            CmpPred::Ult => (a < b) as Word,
                        };
                        values[id.index()] = Some(result);
                    }
                    InstData::Trunc { value, ty } => {
                        let v = self.operand_value(&values, value)?;
                        values[id.index()] = Some(v & ty.mask());
                    }
                    InstData::ZExt { value, .. } => {
                        let v = self.operand_value(&values, value)?;
                        values[id.index()] = Some(v);
                    }
                    InstData::Load { ty, addr } => {
                        let a = self.operand_value(&values, addr)?;
                        let mut v = self.load_mem(a, ty.store_size())?;
                        if let Some(int) = ty.as_int() {
                            v &= int.mask();
                        }
                        values[id.index()] = Some(v);
                    }
                    InstData::Store { value, addr } => {
                        let size = func
                            .value_ty(value)
                            .ok_or(EvalError::Untyped)?
                            .store_size();
                        let v = self.operand_value(&values, value)?;
                        let a = self.operand_value(&values, addr)?;
                        self.store_mem(a, size, v)?;
                    }
                    InstData::Gep { base, index } => {
                        let b = self.operand_value(&values, base)?;
                        let i = self.operand_value(&values, index)?;
                        let addr = b.checked_add(i).ok_or(EvalError::OutOfBounds {
                            addr: b,
                            len: i as usize,
                        })?;
                        values[id.index()] = Some(addr);
                    }
                    InstData::Phi { .. } => {
                        // Leading phis were handled; the verifier rejects
                        // any other placement.
                        return Err(EvalError::PhiWithoutPredecessor);
                    }
                    InstData::Br { dest } => {
                        next = Some(dest);
                    }
                    InstData::CondBr {
                        cond,
                        on_true,
                        on_false,
                    } => {
                        let c = self.operand_value(&values, cond)?;
                        next = Some(match c {
                            0 => on_false,
                            1 => on_true,
                            other => {
                                return Err(EvalError::NonBooleanCondition(other))
                            }
                        });
                    }
                    InstData::Switch {
                        value,
                        default,
                        cases,
                    } => {
                        let v = self.operand_value(&values, value)?;
                        let dest = cases
                            .iter()
                            .find(|(case, _)| case.value() == v)
                            .map(|(_, dest)| *dest)
                            .unwrap_or(default);
                        next = Some(dest);
                    }
                    InstData::Ret { value } => {
                        return value
                            .map(|op| self.operand_value(&values, op))
                            .transpose();
                    }
                }
            }

            match next {
                Some(dest) => {
                    pred = Some(block);
                    block = dest;
                }
                None => return Err(EvalError::MissingTerminator),
            }
        }
    }
}
