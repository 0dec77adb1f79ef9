//! Exploration error implementation.
//!
//! Path-local conditions (unknown mnemonics, unresolved indirect jumps,
//! symbolic returns, visit saturation) are not errors: the explorer drops
//! the path and keeps going; see [`crate::state::PathEnd`]. Only structural
//! violations of the instruction contract abort a whole exploration.

use thiserror::Error;

/// Fatal errors that abort the exploration of a binary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ExploreError {
    /// An instruction violated the canonical syntax contract in a way the
    /// semantics cannot recover from, e.g. `ret` with a non-immediate
    /// operand.
    #[error("invalid instruction format at {address:#x}: {text}")]
    InvalidInstruction {
        /// Address of the offending instruction.
        address: u64,
        /// Its canonical text.
        text: String,
    },
    /// The requested entry address has no disassembled instruction.
    #[error("no instruction at entry address {0:#x}")]
    MissingEntry(u64),
}

/// Result alias for exploration.
pub type ExploreResult<T> = Result<T, ExploreError>;
