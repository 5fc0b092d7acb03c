//! Positional instruction builder

use crate::{
    BinaryOp, BlockId, CmpPred, Function, InstData, InstFlags, InstId,
    Instruction, IntConst, IntTy, Operand, Ty,
};

/// Builds instructions into a block at a moving insertion position.
///
/// Every emitted instruction advances the position, so consecutive calls
/// append in program order starting from where the builder was placed.
pub struct InstBuilder<'f> {
    func: &'f mut Function,
    block: BlockId,
    at: usize,
}

impl<'f> InstBuilder<'f> {
    /// Place a builder at an explicit instruction position in `block`.
    pub fn at(func: &'f mut Function, block: BlockId, at: usize) -> Self {
        Self { func, block, at }
    }

    /// Place a builder at the first legal insertion point of `block`,
    /// after any leading phi nodes.
    pub fn at_insertion_point(func: &'f mut Function, block: BlockId) -> Self {
        let at = func.first_insertion_point(block);
        Self { func, block, at }
    }

    /// Place a builder at the end of `block`.
    pub fn at_end(func: &'f mut Function, block: BlockId) -> Self {
        let at = func.block(block).insts().len();
        Self { func, block, at }
    }

    /// The block being built into.
    pub fn block(&self) -> BlockId {
        self.block
    }

    fn push(&mut self, data: InstData) -> InstId {
        let id = self.func.insert_inst(self.block, self.at, Instruction::new(data));
        self.at += 1;
        id
    }

    /// Emit a binary operation.
    pub fn binary(
        &mut self,
        op: BinaryOp,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> InstId {
        self.push(InstData::Binary {
            op,
            lhs: lhs.into(),
            rhs: rhs.into(),
        })
    }

    /// Emit a bitwise and.
    pub fn and(&mut self, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> InstId {
        self.binary(BinaryOp::And, lhs, rhs)
    }

    /// Emit a bitwise or.
    pub fn or(&mut self, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> InstId {
        self.binary(BinaryOp::Or, lhs, rhs)
    }

    /// Emit a bitwise exclusive or.
    pub fn xor(&mut self, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> InstId {
        self.binary(BinaryOp::Xor, lhs, rhs)
    }

    /// Emit a wrapping addition.
    pub fn add(&mut self, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> InstId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    /// Emit a logical left shift.
    pub fn shl(&mut self, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> InstId {
        self.binary(BinaryOp::Shl, lhs, rhs)
    }

    /// Emit a logical right shift.
    pub fn lshr(&mut self, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> InstId {
        self.binary(BinaryOp::LShr, lhs, rhs)
    }

    /// Emit an equality comparison producing an `i1`.
    pub fn icmp_eq(
        &mut self,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> InstId {
        self.push(InstData::Cmp {
            pred: CmpPred::Eq,
            lhs: lhs.into(),
            rhs: rhs.into(),
        })
    }

    /// Emit an unsigned less-than comparison producing an `i1`.
    pub fn icmp_ult(
        &mut self,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> InstId {
        self.push(InstData::Cmp {
            pred: CmpPred::Ult,
            lhs: lhs.into(),
            rhs: rhs.into(),
        })
    }

    /// Emit a truncation to `ty`.
    pub fn trunc(&mut self, value: impl Into<Operand>, ty: IntTy) -> InstId {
        self.push(InstData::Trunc {
            value: value.into(),
            ty,
        })
    }

    /// Emit a zero extension to `ty`.
    pub fn zext(&mut self, value: impl Into<Operand>, ty: IntTy) -> InstId {
        self.push(InstData::ZExt {
            value: value.into(),
            ty,
        })
    }

    /// Emit a load of a `ty` value from `addr`.
    pub fn load(&mut self, ty: Ty, addr: impl Into<Operand>) -> InstId {
        self.push(InstData::Load {
            ty,
            addr: addr.into(),
        })
    }

    /// Emit a store of `value` to `addr`.
    pub fn store(
        &mut self,
        value: impl Into<Operand>,
        addr: impl Into<Operand>,
    ) -> InstId {
        self.push(InstData::Store {
            value: value.into(),
            addr: addr.into(),
        })
    }

    /// Emit a byte-granular address computation `base + index`.
    pub fn gep(
        &mut self,
        base: impl Into<Operand>,
        index: impl Into<Operand>,
    ) -> InstId {
        self.push(InstData::Gep {
            base: base.into(),
            index: index.into(),
        })
    }

    /// Emit a phi node of type `ty` with the given incoming pairs.
    pub fn phi(&mut self, ty: Ty, incoming: Vec<(Operand, BlockId)>) -> InstId {
        self.push(InstData::Phi { ty, incoming })
    }

    /// Emit an unconditional branch.
    pub fn br(&mut self, dest: BlockId) -> InstId {
        self.push(InstData::Br { dest })
    }

    /// Emit a conditional branch.
    pub fn cond_br(
        &mut self,
        cond: impl Into<Operand>,
        on_true: BlockId,
        on_false: BlockId,
    ) -> InstId {
        self.push(InstData::CondBr {
            cond: cond.into(),
            on_true,
            on_false,
        })
    }

    /// Emit a switch.
    pub fn switch(
        &mut self,
        value: impl Into<Operand>,
        default: BlockId,
        cases: Vec<(IntConst, BlockId)>,
    ) -> InstId {
        self.push(InstData::Switch {
            value: value.into(),
            default,
            cases,
        })
    }

    /// Emit a return.
    pub fn ret(&mut self, value: Option<Operand>) -> InstId {
        self.push(InstData::Ret { value })
    }

    /// Tag an instruction so sanitizers ignore its memory accesses.
    pub fn mark_nosanitize(&mut self, inst: InstId) {
        self.func.inst_mut(inst).flags_mut().insert(InstFlags::NOSANITIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_inserts_in_order_at_point() {
        let mut f = Function::new("f");
        let entry = f.add_block("entry");
        {
            let mut b = InstBuilder::at_end(&mut f, entry);
            b.ret(None);
        }
        // Insert two instructions ahead of the return.
        let mut b = InstBuilder::at_insertion_point(&mut f, entry);
        let x = b.xor(IntConst::i32(1), IntConst::i32(2));
        let y = b.add(x, IntConst::i32(1));
        drop(b);

        let insts = f.block(entry).insts().to_vec();
        assert_eq!(insts[0], x);
        assert_eq!(insts[1], y);
        assert!(f.inst(insts[2]).is_terminator());
    }

    #[test]
    fn nosanitize_marking() {
        let mut f = Function::new("f");
        let entry = f.add_block("entry");
        let mut b = InstBuilder::at_end(&mut f, entry);
        let ld = b.load(Ty::Int(IntTy::I8), IntConst::i64(16));
        b.mark_nosanitize(ld);
        drop(b);
        assert!(f.inst(ld).flags().contains(InstFlags::NOSANITIZE));
    }
}
