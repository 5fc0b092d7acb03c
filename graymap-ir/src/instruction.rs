//! Instruction representation

use crate::{BlockId, IntConst, IntTy, Operand, Ty};

/// Stable identifier of an instruction within its [`Function`] arena.
///
/// The identifier doubles as a reference to the instruction's result value.
///
/// [`Function`]: crate::Function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);

impl InstId {
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        Self(index as u32)
    }

    /// Position of the instruction in the function arena.
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

bitflags::bitflags! {
    /// Metadata bits attached to an instruction.
    pub struct InstFlags: u8 {
        /// Memory accesses through this instruction must not be reported
        /// by sanitizers.
        const NOSANITIZE = 0b0000_0001;
    }
}

/// Binary integer operations. Both operands share one integer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    /// Bitwise conjunction.
    And,
    /// Bitwise disjunction.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Wrapping addition.
    Add,
    /// Logical left shift.
    Shl,
    /// Logical right shift.
    LShr,
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CmpPred {
    /// Equality.
    Eq,
    /// Unsigned less-than.
    Ult,
}

/// The operation an instruction performs together with its operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstData {
    /// Two-operand integer arithmetic or logic.
    Binary {
        /// The operation.
        op: BinaryOp,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// Integer comparison producing an `i1`.
    Cmp {
        /// The predicate.
        pred: CmpPred,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// Truncate an integer to a narrower width.
    Trunc {
        /// Value to truncate.
        value: Operand,
        /// Target type.
        ty: IntTy,
    },
    /// Zero-extend an integer to a wider width.
    ZExt {
        /// Value to extend.
        value: Operand,
        /// Target type.
        ty: IntTy,
    },
    /// Load a value of type `ty` from memory.
    Load {
        /// Type of the loaded value.
        ty: Ty,
        /// Address to read.
        addr: Operand,
    },
    /// Store a value to memory.
    Store {
        /// Value to write.
        value: Operand,
        /// Address to write.
        addr: Operand,
    },
    /// Compute `base + index` as a byte-granular address.
    Gep {
        /// Base pointer.
        base: Operand,
        /// Byte offset.
        index: Operand,
    },
    /// Merge values flowing in from predecessor blocks.
    Phi {
        /// Result type.
        ty: Ty,
        /// `(incoming value, incoming block)` pairs, one per predecessor
        /// edge.
        incoming: Vec<(Operand, BlockId)>,
    },
    /// Unconditional branch.
    Br {
        /// Destination block.
        dest: BlockId,
    },
    /// Two-way conditional branch on an `i1`.
    CondBr {
        /// Branch condition.
        cond: Operand,
        /// Destination when the condition is one.
        on_true: BlockId,
        /// Destination when the condition is zero.
        on_false: BlockId,
    },
    /// Multi-way branch on an integer scrutinee.
    Switch {
        /// The scrutinee.
        value: Operand,
        /// Destination when no case matches.
        default: BlockId,
        /// `(case value, destination)` pairs; case values are distinct.
        cases: Vec<(IntConst, BlockId)>,
    },
    /// Return from the function.
    Ret {
        /// Optional return value.
        value: Option<Operand>,
    },
}

/// An instruction: operation, operands and metadata flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    data: InstData,
    flags: InstFlags,
}

impl Instruction {
    /// Wrap `data` with empty metadata.
    pub fn new(data: InstData) -> Self {
        Self {
            data,
            flags: InstFlags::empty(),
        }
    }

    /// The operation and operands.
    pub fn data(&self) -> &InstData {
        &self.data
    }

    /// Metadata flags.
    pub fn flags(&self) -> InstFlags {
        self.flags
    }

    /// Mutable access to the metadata flags.
    pub fn flags_mut(&mut self) -> &mut InstFlags {
        &mut self.flags
    }

    /// Whether this instruction ends a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.data,
            InstData::Br { .. }
                | InstData::CondBr { .. }
                | InstData::Switch { .. }
                | InstData::Ret { .. }
        )
    }

    /// Whether this instruction is a phi node.
    pub fn is_phi(&self) -> bool {
        matches!(self.data, InstData::Phi { .. })
    }

    /// Successor blocks of a terminator, in branch order. Empty for
    /// non-terminators and returns.
    pub fn successors(&self) -> Vec<BlockId> {
        match &self.data {
            InstData::Br { dest } => vec![*dest],
            InstData::CondBr {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            InstData::Switch { default, cases, .. } => {
                let mut succs = vec![*default];
                succs.extend(cases.iter().map(|(_, dest)| *dest));
                succs
            }
            _ => Vec::new(),
        }
    }

    /// Incoming `(value, block)` pairs of a phi node.
    pub fn phi_incoming(&self) -> Option<&[(Operand, BlockId)]> {
        match &self.data {
            InstData::Phi { incoming, .. } => Some(incoming),
            _ => None,
        }
    }

    /// Mutable incoming pairs of a phi node.
    pub fn phi_incoming_mut(&mut self) -> Option<&mut Vec<(Operand, BlockId)>> {
        match &mut self.data {
            InstData::Phi { incoming, .. } => Some(incoming),
            _ => None,
        }
    }

    /// Value operands read by this instruction. Phi incoming values are
    /// included; block references are not operands.
    pub fn operands(&self) -> Vec<Operand> {
        match &self.data {
            InstData::Binary { lhs, rhs, .. } | InstData::Cmp { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            InstData::Trunc { value, .. } | InstData::ZExt { value, .. } => vec![*value],
            InstData::Load { addr, .. } => vec![*addr],
            InstData::Store { value, addr } => vec![*value, *addr],
            InstData::Gep { base, index } => vec![*base, *index],
            InstData::Phi { incoming, .. } => {
                incoming.iter().map(|(op, _)| *op).collect()
            }
            InstData::CondBr { cond, .. } => vec![*cond],
            InstData::Switch { value, .. } => vec![*value],
            InstData::Ret { value } => value.iter().copied().collect(),
            InstData::Br { .. } => Vec::new(),
        }
    }
}
