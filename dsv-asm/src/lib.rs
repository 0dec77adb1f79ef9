//! Atomic types of the DSV disassembly-soundness checker.
//!
//! This crate models the canonical Intel-syntax instruction stream the
//! normalizer produces: register names with their sub-register overlay
//! slices, condition codes, mnemonics with modeled semantics, operands with
//! effective-address expressions, and the instruction-line parser.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod cond;
mod error;
mod flag;
mod instruction;
mod mnemonic;
mod operand;
mod register;

pub use cond::{Cond, Predicate};
pub use error::ParseError;
pub use flag::Flag;
pub use instruction::Instruction;
pub use mnemonic::{Mnemonic, RepPrefix};
pub use operand::{
    parse_imm, AddrExpr, AddrTerm, AddrTermKind, MemOperand, Operand,
};
pub use register::{Reg64, Register, SegReg, WideRegs};
