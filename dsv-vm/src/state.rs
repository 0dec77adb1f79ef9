//! Per-step and per-path state classification.

/// Resulting state of one instruction's semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Proceed to the fall-through successor.
    Proceed,
    /// A `ret` popped a concrete return target.
    Return(u64),
    /// A `ret` found a non-concrete value at the stack pointer.
    SymbolicReturn,
    /// `hlt`: state untouched, path over.
    Halt,
    /// The mnemonic has no modeled semantics; destinations were made
    /// unknown and flags cleared. The path stops descending.
    Unknown,
}

/// Why a path stopped. Every variant is recoverable at the exploration
/// level: the path is logged and dropped, other paths continue.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PathEnd {
    /// `ret` with nothing left to return into, or a return target outside
    /// the disassembly.
    Return,
    /// `ret` found a symbolic return address.
    SymbolicReturn,
    /// `hlt` reached.
    Halt,
    /// Call into a termination symbol such as `exit` or `abort`.
    Terminated(String),
    /// Mnemonic without modeled semantics.
    UnknownInstruction(String),
    /// The normalizer flagged the instruction as under-specified.
    AmbiguousOperandSize,
    /// Indirect jump whose target could not be recovered.
    UnresolvedIndirect,
    /// The successor address saturated the per-address visit bound.
    VisitSaturated,
    /// The successor address lies outside the known sections.
    OutsideImage,
    /// Fall-through ran into a labelled function boundary.
    Boundary,
}
