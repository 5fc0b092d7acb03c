//! Functions: instruction arena plus ordered block layout

use std::collections::HashSet;

use crate::{
    BasicBlock, BlockId, InstData, InstId, Instruction, IntTy, Operand, Ty,
};

/// A function: an arena of instructions and an ordered list of basic
/// blocks.
///
/// Blocks and instructions are referenced by copyable ids. The arena only
/// grows; erasing an instruction unlinks it from its block, and anything
/// not reachable through the block layout is dead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    name: String,
    insts: Vec<Instruction>,
    blocks: Vec<BasicBlock>,
    layout: Vec<BlockId>,
}

impl Function {
    /// Create an empty function.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            insts: Vec::new(),
            blocks: Vec::new(),
            layout: Vec::new(),
        }
    }

    /// The function's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a new block at the end of the layout.
    ///
    /// The requested name is kept unique within the function by appending
    /// a numeric suffix when it is already taken.
    pub fn add_block(&mut self, name: &str) -> BlockId {
        let id = self.alloc_block(name);
        self.layout.push(id);
        id
    }

    /// Insert a new block into the layout immediately before `before`.
    pub fn add_block_before(&mut self, before: BlockId, name: &str) -> BlockId {
        let id = self.alloc_block(name);
        let at = self
            .layout
            .iter()
            .position(|&b| b == before)
            .unwrap_or(self.layout.len());
        self.layout.insert(at, id);
        id
    }

    fn alloc_block(&mut self, name: &str) -> BlockId {
        let unique = self.unique_block_name(name, None);
        let id = BlockId::from_index(self.blocks.len());
        self.blocks.push(BasicBlock::new(unique));
        id
    }

    /// Rename a block, uniquifying the name against the other blocks.
    pub fn set_block_name(&mut self, block: BlockId, name: &str) {
        let unique = self.unique_block_name(name, Some(block));
        self.blocks[block.index()].name = unique;
    }

    fn unique_block_name(&self, base: &str, skip: Option<BlockId>) -> String {
        let taken = |candidate: &str| {
            self.layout.iter().any(|&b| {
                Some(b) != skip && self.blocks[b.index()].name == candidate
            })
        };
        if !taken(base) {
            return base.to_owned();
        }
        let mut suffix = 1usize;
        loop {
            let candidate = format!("{base}{suffix}");
            if !taken(&candidate) {
                return candidate;
            }
            suffix = suffix.saturating_add(1);
        }
    }

    /// The block ids in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.layout.iter().copied()
    }

    /// The layout order as a slice.
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    /// The entry block, when the function has any block.
    pub fn entry(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Shared access to a block.
    pub fn block(&self, block: BlockId) -> &BasicBlock {
        &self.blocks[block.index()]
    }

    /// Shared access to an instruction.
    pub fn inst(&self, inst: InstId) -> &Instruction {
        &self.insts[inst.index()]
    }

    /// Mutable access to an instruction.
    pub fn inst_mut(&mut self, inst: InstId) -> &mut Instruction {
        &mut self.insts[inst.index()]
    }

    /// Number of instructions ever allocated in the arena, including
    /// erased ones.
    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    /// Insert an instruction into `block` at position `at`.
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        at: usize,
        inst: Instruction,
    ) -> InstId {
        let id = InstId::from_index(self.insts.len());
        self.insts.push(inst);
        self.blocks[block.index()].insts.insert(at, id);
        id
    }

    /// Append an instruction at the end of `block`.
    pub fn push_inst(&mut self, block: BlockId, inst: Instruction) -> InstId {
        let at = self.blocks[block.index()].insts.len();
        self.insert_inst(block, at, inst)
    }

    /// Unlink an instruction from `block`. The arena slot stays allocated
    /// but the instruction no longer executes.
    pub fn remove_inst(&mut self, block: BlockId, inst: InstId) {
        self.blocks[block.index()].insts.retain(|&id| id != inst);
    }

    /// The block's terminator, when its final instruction is one.
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = *self.blocks[block.index()].insts.last()?;
        self.insts[last.index()].is_terminator().then_some(last)
    }

    /// Index of the first legal insertion point: past any leading phis.
    pub fn first_insertion_point(&self, block: BlockId) -> usize {
        self.blocks[block.index()]
            .insts
            .iter()
            .take_while(|&&id| self.insts[id.index()].is_phi())
            .count()
    }

    /// Ids of the leading phi nodes of `block`.
    pub fn phi_ids(&self, block: BlockId) -> Vec<InstId> {
        self.blocks[block.index()]
            .insts
            .iter()
            .take_while(|&&id| self.insts[id.index()].is_phi())
            .copied()
            .collect()
    }

    /// Predecessors of `block` in layout order, one entry per incoming
    /// edge. A block branching to `block` through two edges appears twice.
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        let mut preds = Vec::new();
        for &b in &self.layout {
            if let Some(term) = self.terminator(b) {
                for succ in self.inst(term).successors() {
                    if succ == block {
                        preds.push(b);
                    }
                }
            }
        }
        preds
    }

    /// Type of a value, when it can be resolved.
    ///
    /// Instruction results are resolved structurally; a reference cycle
    /// that never passes through a phi yields `None`.
    pub fn value_ty(&self, operand: Operand) -> Option<Ty> {
        self.operand_ty_guarded(operand, &mut HashSet::new())
    }

    /// Result type of an instruction; `None` for stores and terminators.
    pub fn result_ty(&self, inst: InstId) -> Option<Ty> {
        self.result_ty_guarded(inst, &mut HashSet::new())
    }

    fn operand_ty_guarded(
        &self,
        operand: Operand,
        seen: &mut HashSet<InstId>,
    ) -> Option<Ty> {
        match operand {
            Operand::Const(c) => Some(Ty::Int(c.ty())),
            Operand::Global(_) => Some(Ty::Ptr),
            Operand::Inst(id) => self.result_ty_guarded(id, seen),
        }
    }

    fn result_ty_guarded(
        &self,
        inst: InstId,
        seen: &mut HashSet<InstId>,
    ) -> Option<Ty> {
        if !seen.insert(inst) {
            return None;
        }
        match self.insts.get(inst.index())?.data() {
            InstData::Binary { lhs, .. } => self.operand_ty_guarded(*lhs, seen),
            InstData::Cmp { .. } => Some(Ty::Int(IntTy::I1)),
            InstData::Trunc { ty, .. } | InstData::ZExt { ty, .. } => {
                Some(Ty::Int(*ty))
            }
            InstData::Load { ty, .. } => Some(*ty),
            InstData::Gep { .. } => Some(Ty::Ptr),
            InstData::Phi { ty, .. } => Some(*ty),
            InstData::Store { .. }
            | InstData::Br { .. }
            | InstData::CondBr { .. }
            | InstData::Switch { .. }
            | InstData::Ret { .. } => None,
        }
    }
}
