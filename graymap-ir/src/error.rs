//! IR error types

use thiserror::Error;

use crate::Word;

/// Structural defects detected while verifying or mutating IR.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    /// A block holds no instructions at all.
    #[error("function `{func}`: block `{block}` is empty")]
    EmptyBlock {
        /// Offending function.
        func: String,
        /// Offending block.
        block: String,
    },
    /// A block's final instruction is not a terminator.
    #[error("function `{func}`: block `{block}` has no terminator")]
    MissingTerminator {
        /// Offending function.
        func: String,
        /// Offending block.
        block: String,
    },
    /// A terminator appears before the end of a block.
    #[error("function `{func}`: block `{block}` terminates before its end")]
    EarlyTerminator {
        /// Offending function.
        func: String,
        /// Offending block.
        block: String,
    },
    /// A phi node appears after the first non-phi instruction.
    #[error("function `{func}`: block `{block}` has a misplaced phi node")]
    MisplacedPhi {
        /// Offending function.
        func: String,
        /// Offending block.
        block: String,
    },
    /// A phi node's incoming blocks do not match the block's predecessor
    /// edges.
    #[error(
        "function `{func}`: block `{block}`: phi incoming blocks do not \
         match the predecessor edges"
    )]
    PhiPredecessorMismatch {
        /// Offending function.
        func: String,
        /// Offending block.
        block: String,
    },
    /// An operand references an instruction that is not linked into any
    /// block.
    #[error(
        "function `{func}`: block `{block}`: operand references an unlinked \
         instruction"
    )]
    DanglingOperand {
        /// Offending function.
        func: String,
        /// Offending block.
        block: String,
    },
    /// A switch lists the same case value twice.
    #[error("function `{func}`: block `{block}`: duplicate switch case value")]
    DuplicateCaseValue {
        /// Offending function.
        func: String,
        /// Offending block.
        block: String,
    },
    /// A switch case value's width differs from the scrutinee's width.
    #[error(
        "function `{func}`: block `{block}`: switch case width differs from \
         the scrutinee"
    )]
    CaseWidthMismatch {
        /// Offending function.
        func: String,
        /// Offending block.
        block: String,
    },
    /// Operand types violate an instruction's typing rule.
    #[error("function `{func}`: block `{block}`: {detail}")]
    TypeMismatch {
        /// Offending function.
        func: String,
        /// Offending block.
        block: String,
        /// What was violated.
        detail: String,
    },
    /// A value's type could not be resolved (operand reference cycle).
    #[error("function `{func}`: block `{block}`: value type cannot be resolved")]
    UntypedValue {
        /// Offending function.
        func: String,
        /// Offending block.
        block: String,
    },
}

/// Faults raised while executing IR in the [`Evaluator`].
///
/// [`Evaluator`]: crate::Evaluator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// No global with the given symbol name exists in the module.
    #[error("unknown global `{0}`")]
    UnknownGlobal(String),
    /// An instruction result was read before the instruction executed.
    #[error("use of a value before its definition")]
    UseBeforeDef,
    /// A phi node executed in a block entered without a predecessor.
    #[error("phi node executed without a predecessor block")]
    PhiWithoutPredecessor,
    /// A phi node has no incoming entry for the executed predecessor.
    #[error("phi node has no incoming entry for the executed predecessor")]
    PhiMissingIncoming,
    /// A memory access fell outside the allocated arena.
    #[error("memory access out of bounds: address {addr}, length {len}")]
    OutOfBounds {
        /// Accessed address.
        addr: Word,
        /// Access length in bytes.
        len: usize,
    },
    /// A memory access hit the reserved null guard region.
    #[error("access through the null guard region at address {0}")]
    NullAccess(Word),
    /// A conditional branch condition evaluated to neither 0 nor 1.
    #[error("condition value {0} is not a boolean")]
    NonBooleanCondition(Word),
    /// The step budget ran out; the executed code likely loops.
    #[error("step budget exhausted after {0} instructions")]
    StepLimit(usize),
    /// Control fell off the end of a block with no terminator.
    #[error("block fell through without a terminator")]
    MissingTerminator,
    /// An operand's type could not be resolved during execution.
    #[error("operand type could not be resolved")]
    Untyped,
}
