//! Mnemonic kinds the engine has semantics for.

use core::fmt;
use core::str::FromStr;

use crate::Cond;

/// Instruction kinds with modeled semantics.
///
/// Condition-code families carry their decoded [`Cond`]; everything the
/// engine has no transformer for stays out of this enum and is handled by
/// the unknown-mnemonic policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Mnemonic {
    /// Data move.
    Mov,
    /// 64-bit immediate move; alias of `mov`.
    Movabs,
    /// Load effective address.
    Lea,
    /// Push onto the stack.
    Push,
    /// Pop from the stack.
    Pop,
    /// Push all 16-bit registers.
    Pusha,
    /// Push all 32-bit registers.
    Pushad,
    /// Pop all 16-bit registers.
    Popa,
    /// Pop all 32-bit registers.
    Popad,
    /// Integer add.
    Add,
    /// Integer subtract.
    Sub,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Shift left.
    Shl,
    /// Arithmetic shift left; alias of `shl`.
    Sal,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    Sar,
    /// Rotate left.
    Rol,
    /// Rotate right.
    Ror,
    /// Increment.
    Inc,
    /// Decrement.
    Dec,
    /// Two's-complement negate.
    Neg,
    /// Bitwise complement.
    Not,
    /// Add with carry.
    Adc,
    /// Subtract with borrow.
    Sbb,
    /// Unsigned widening multiply.
    Mul,
    /// Signed multiply.
    Imul,
    /// Unsigned divide.
    Div,
    /// Signed divide.
    Idiv,
    /// Logical compare.
    Test,
    /// Arithmetic compare.
    Cmp,
    /// Exchange.
    Xchg,
    /// Compare and exchange.
    Cmpxchg,
    /// Zero-extending move.
    Movzx,
    /// Sign-extending move.
    Movsx,
    /// Sign-extending doubleword move.
    Movsxd,
    /// Sign-extend `al` into `ax`.
    Cbw,
    /// Sign-extend `ax` into `eax`.
    Cwde,
    /// Sign-extend `eax` into `rax`.
    Cdqe,
    /// Sign-extend `ax` into `dx:ax`.
    Cwd,
    /// Sign-extend `eax` into `edx:eax`.
    Cdq,
    /// Sign-extend `rax` into `rdx:rax`.
    Cqo,
    /// Tear down the stack frame.
    Leave,
    /// Return from procedure.
    Ret,
    /// Call procedure.
    Call,
    /// Unconditional jump.
    Jmp,
    /// No operation.
    Nop,
    /// Halt.
    Hlt,
    /// Bit test.
    Bt,
    /// Conditional jump.
    J(Cond),
    /// Conditional byte set.
    Set(Cond),
    /// Conditional move.
    Cmov(Cond),
}

impl Mnemonic {
    /// Decode a mnemonic token, after any prefix stripping.
    pub fn parse(name: &str) -> Option<Self> {
        use Mnemonic::*;
        let known = match name {
            "mov" => Mov,
            "movabs" => Movabs,
            "lea" => Lea,
            "push" => Push,
            "pop" => Pop,
            "pusha" => Pusha,
            "pushad" => Pushad,
            "popa" => Popa,
            "popad" => Popad,
            "add" => Add,
            "sub" => Sub,
            "and" => And,
            "or" => Or,
            "xor" => Xor,
            "shl" => Shl,
            "sal" => Sal,
            "shr" => Shr,
            "sar" => Sar,
            "rol" => Rol,
            "ror" => Ror,
            "inc" => Inc,
            "dec" => Dec,
            "neg" => Neg,
            "not" => Not,
            "adc" => Adc,
            "sbb" => Sbb,
            "mul" => Mul,
            "imul" => Imul,
            "div" => Div,
            "idiv" => Idiv,
            "test" => Test,
            "cmp" => Cmp,
            "xchg" => Xchg,
            "cmpxchg" => Cmpxchg,
            "movzx" => Movzx,
            "movsx" => Movsx,
            "movsxd" => Movsxd,
            "cbw" => Cbw,
            "cwde" => Cwde,
            "cdqe" => Cdqe,
            "cwd" => Cwd,
            "cdq" => Cdq,
            "cqo" => Cqo,
            "leave" => Leave,
            "ret" => Ret,
            "call" => Call,
            "jmp" => Jmp,
            "nop" => Nop,
            "hlt" => Hlt,
            "bt" => Bt,
            _ => {
                let with_cond = |prefix: &str| {
                    name.strip_prefix(prefix)
                        .and_then(|rest| Cond::from_str(rest).ok())
                };
                return None
                    .or_else(|| with_cond("set").map(Set))
                    .or_else(|| with_cond("cmov").map(Cmov))
                    .or_else(|| with_cond("j").map(J));
            }
        };
        Some(known)
    }

    /// Whether this is a control-transfer instruction (`jmp`, `j<cc>`,
    /// `call`, `ret`).
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Mnemonic::Jmp | Mnemonic::J(_) | Mnemonic::Call | Mnemonic::Ret
        )
    }

    /// Whether this is a conditional jump.
    pub const fn is_cond_jump(self) -> bool {
        matches!(self, Mnemonic::J(_))
    }

    /// Whether this instruction derives flag values from its computation,
    /// excluding the pure comparison forms `cmp` and `test`.
    ///
    /// Drives the auxiliary-memory witness recording: a concrete memory
    /// operand observed by one of these becomes part of the soundness
    /// witness set.
    pub const fn affects_flags(self) -> bool {
        use Mnemonic::*;
        matches!(
            self,
            Add | Sub
                | Xor
                | And
                | Or
                | Sar
                | Shr
                | Sal
                | Shl
                | Neg
                | Not
                | Imul
                | Mul
                | Inc
                | Dec
                | Adc
                | Sbb
                | Ror
                | Rol
                | Bt
        )
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mnemonic::J(cond) => write!(f, "j{cond}"),
            Mnemonic::Set(cond) => write!(f, "set{cond}"),
            Mnemonic::Cmov(cond) => write!(f, "cmov{cond}"),
            other => {
                let raw = format!("{other:?}").to_lowercase();
                write!(f, "{raw}")
            }
        }
    }
}

/// Repeat prefixes wrapping a string instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepPrefix {
    /// Repeat while `rcx != 0`.
    Rep,
    /// Repeat while `rcx != 0` and `ZF == 1` (`repz`/`repe`).
    Repz,
    /// Repeat while `rcx != 0` and `ZF == 0` (`repnz`/`repne`).
    Repnz,
}

impl RepPrefix {
    /// Decode a repeat-prefix token.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "rep" => Some(Self::Rep),
            "repz" | "repe" => Some(Self::Repz),
            "repnz" | "repne" => Some(Self::Repnz),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_condition_families() {
        assert_eq!(Mnemonic::parse("jz"), Some(Mnemonic::J(Cond::Z)));
        assert_eq!(Mnemonic::parse("jnbe"), Some(Mnemonic::J(Cond::Nbe)));
        assert_eq!(Mnemonic::parse("setle"), Some(Mnemonic::Set(Cond::Le)));
        assert_eq!(Mnemonic::parse("cmovns"), Some(Mnemonic::Cmov(Cond::Ns)));
        assert_eq!(Mnemonic::parse("jmp"), Some(Mnemonic::Jmp));
    }

    #[test]
    fn unknown_mnemonics_stay_unknown() {
        assert_eq!(Mnemonic::parse("movsb"), None);
        assert_eq!(Mnemonic::parse("fld"), None);
        assert_eq!(Mnemonic::parse("jxx"), None);
        assert_eq!(Mnemonic::parse(""), None);
    }

    #[test]
    fn display_matches_canonical_names() {
        assert_eq!(Mnemonic::J(Cond::Nz).to_string(), "jnz");
        assert_eq!(Mnemonic::Cmpxchg.to_string(), "cmpxchg");
        assert_eq!(Mnemonic::Set(Cond::A).to_string(), "seta");
    }

    #[test]
    fn repeat_prefix_aliases() {
        assert_eq!(RepPrefix::parse("repe"), Some(RepPrefix::Repz));
        assert_eq!(RepPrefix::parse("repne"), Some(RepPrefix::Repnz));
        assert_eq!(RepPrefix::parse("repx"), None);
    }
}
