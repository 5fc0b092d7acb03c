//! Instrumentation passes over graymap IR
//!
//! Two module transformations plus their shared plumbing:
//!
//! - [`SplitSwitches`](split_switches::SplitSwitches) shatters multi-byte
//!   integer switches into trees of single-byte decisions, naming the
//!   synthetic blocks so the instrumenter can recognize them.
//! - [`AflCoverage`](coverage::AflCoverage) inserts edge-coverage probes
//!   at the head of every classifiable block: byte counters in the edge
//!   map for ordinary code, single bits in the laf map for synthetic
//!   decision blocks.
//!
//! The runtime owning the shared-memory maps, the compiler driver that
//! invokes the pipeline, and any comparison-splitting producer of
//! `cmp_added`/`inv_cmp`/`injected`/`sign` blocks are external
//! collaborators; this crate only honors their contracts.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod config;
pub mod consts;
pub mod coverage;
pub mod error;
pub mod registry;
pub mod role;
pub mod split_switches;

pub mod prelude {
    //! Everything a pass host typically needs.
    #[doc(no_inline)]
    pub use graymap_ir::{
        verify_module, Evaluator, Function, InstBuilder, IntConst, IntTy,
        Module, Operand, Ty,
    };

    pub use crate::{
        config::{PassConfig, SanitizeMode},
        consts::{LAF_MAP_BITS, MAP_SIZE},
        coverage::{AflCoverage, CoverageSummary},
        error::{ConfigError, PassError, StructuralError},
        registry::{
            register_default_passes, ExtensionPoint, ModulePass, PassRegistry,
        },
        role::BlockRole,
        split_switches::SplitSwitches,
    };
}
