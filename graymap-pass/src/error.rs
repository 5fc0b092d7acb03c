//! Pass error taxonomy
//!
//! Configuration and structural errors are fatal; there is no
//! partial-success mode. Skipping a block (ratio draw, unrecognized name)
//! is not an error and only shows up in the end-of-pass counters.

use graymap_ir::IrError;
use thiserror::Error;

/// Fatal configuration mistakes detected at pass entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `AFL_INST_RATIO` was set to something other than an integer in
    /// `[1, 100]`.
    #[error("bad value of AFL_INST_RATIO `{0}` (must be between 1 and 100)")]
    BadInstRatio(String),
}

/// Structural defects in the module that abort compilation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    /// A switch scrutinee's width is not a whole number of bytes.
    #[error("switch scrutinee of width {0} bits cannot be split bytewise")]
    UnsplittableScrutinee(u16),
    /// The case set drained while a decision tree was being built.
    #[error("switch case set drained during decision-tree construction")]
    EmptyCaseSet,
}

/// Any failure a graymap pass can produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PassError {
    /// The process environment configured the pass incorrectly.
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    /// The module violates a structural assumption.
    #[error("structural: {0}")]
    Structural(#[from] StructuralError),
    /// The rewritten module failed IR verification.
    #[error("verification: {0}")]
    Ir(#[from] IrError),
}
