//! Block role classification
//!
//! The instrumenter's only signal about a block is its name. Passes that
//! explode wide constructs into byte-level decisions leave well-known
//! substrings in the names of the blocks they synthesize; the splitter in
//! this crate emits [`NODE_BLOCK`] and [`NEW_DEFAULT`], and its pre-pass
//! names untouched program blocks [`NORMAL_BLOCK`]. Independent
//! comparison-splitting passes only need to agree on these markers.

/// Name given to ordinary program blocks.
pub const NORMAL_BLOCK: &str = "normal_basicblock";

/// Name of a byte-decision node synthesized by switch lowering.
pub const NODE_BLOCK: &str = "NodeBlock";

/// Name of the collector default block synthesized by switch lowering.
pub const NEW_DEFAULT: &str = "NewDefault";

/// Marker of equality-chain nodes from string/memory compare expansion.
pub const CMP_ADDED: &str = "cmp_added";

/// Marker of inverted-compare nodes from integer compare rewrites.
pub const INV_CMP: &str = "inv_cmp";

/// Marker of injected helper nodes from integer compare rewrites.
pub const INJECTED: &str = "injected";

/// Marker of sign-handling nodes from integer compare rewrites.
pub const SIGN: &str = "sign";

/// How a block participates in coverage instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BlockRole {
    /// Ordinary program block, counted in the edge map.
    Normal,
    /// Equality-chain node from a string/memory compare expansion.
    CmpChain,
    /// Node from signed/unsigned integer compare rewrites.
    SignSplit,
    /// Decision node or collector default from switch lowering.
    SwitchNode,
}

impl BlockRole {
    /// Classify a block by its name.
    ///
    /// Substring matches are checked in a fixed order and the first match
    /// wins; a block matching nothing is not instrumented.
    pub fn classify(name: &str) -> Option<Self> {
        if name.contains(NORMAL_BLOCK) {
            Some(Self::Normal)
        } else if name.contains(CMP_ADDED) {
            Some(Self::CmpChain)
        } else if name.contains(INV_CMP)
            || name.contains(INJECTED)
            || name.contains(SIGN)
        {
            Some(Self::SignSplit)
        } else if name.contains(NEW_DEFAULT) || name.contains(NODE_BLOCK) {
            Some(Self::SwitchNode)
        } else {
            None
        }
    }

    /// Numeric type tag used in the laf edge encoding; `None` for normal
    /// blocks, which go to the edge map instead.
    pub const fn laf_tag(&self) -> Option<u8> {
        match self {
            Self::Normal => None,
            Self::CmpChain => Some(1),
            Self::SignSplit => Some(2),
            Self::SwitchNode => Some(3),
        }
    }
}
