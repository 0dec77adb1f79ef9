//! Operand model and the canonical-text operand parser.
//!
//! The normalizer hands the core operands in a fixed shape: memory operands
//! are `[expr]` with an optional `<size> ptr ` prefix, segment overrides are
//! `fs:[expr]`, effective-address expressions carry no spaces around
//! `+`/`-`/`*`, rip-relative stays `rip+<hex>`, immediates are `0x…` hex.

use core::fmt;
use core::str::FromStr;

use crate::{ParseError, Register, SegReg};

/// A parsed instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// A general-purpose register name.
    Reg(Register),
    /// A segment register used as a data operand.
    Seg(SegReg),
    /// An immediate value.
    Imm(i128),
    /// A `hi:lo` register pair, as in the implicit `edx:eax` operands.
    Pair(Register, Register),
    /// A memory reference.
    Mem(MemOperand),
    /// A floating-point stack register; named but not modeled.
    St(u8),
    /// A token the parser has no shape for; semantics treat it as opaque.
    Other(String),
}

/// A memory reference: optional width annotation, optional segment
/// override, and the effective-address expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemOperand {
    /// Width in bits from an explicit `<size> ptr` annotation.
    pub width: Option<u32>,
    /// Segment override register.
    pub segment: Option<SegReg>,
    /// The bracketed effective-address expression.
    pub expr: AddrExpr,
}

/// An effective-address expression: a signed sum of terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AddrExpr {
    /// Additive terms in source order; the first carries no written sign.
    pub terms: Vec<AddrTerm>,
}

/// One additive term of an effective address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddrTerm {
    /// Whether the term is subtracted.
    pub negated: bool,
    /// The term itself.
    pub kind: AddrTermKind,
}

/// The shapes an address term can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrTermKind {
    /// An optionally scaled register.
    Reg {
        /// The register supplying the term value.
        reg: Register,
        /// Scale factor; `1` when the source carried no `*`.
        scale: u64,
    },
    /// The instruction pointer.
    Rip,
    /// A constant displacement.
    Imm(i128),
}

impl AddrExpr {
    /// Whether the expression is anchored on the instruction pointer.
    pub fn is_rip_relative(&self) -> bool {
        self.terms
            .iter()
            .any(|term| matches!(term.kind, AddrTermKind::Rip))
    }

    /// Whether any term is a register with an explicit scale factor.
    pub fn has_scaled_index(&self) -> bool {
        self.terms.iter().any(
            |term| matches!(term.kind, AddrTermKind::Reg { scale, .. } if scale > 1),
        )
    }

    /// Whether the expression is a sum of at least two terms.
    pub fn is_compound(&self) -> bool {
        self.terms.len() > 1
    }

    /// The registers appearing in the expression, in source order.
    pub fn registers(&self) -> impl Iterator<Item = Register> + '_ {
        self.terms.iter().filter_map(|term| match term.kind {
            AddrTermKind::Reg { reg, .. } => Some(reg),
            _ => None,
        })
    }

    /// Width of the address representation: the width of the first register
    /// appearing in the expression, or `default` when register-free.
    pub fn rep_width(&self, default: u32) -> u32 {
        self.registers()
            .next()
            .map(Register::width)
            .unwrap_or(default)
    }

    fn parse(text: &str) -> Result<Self, ParseError> {
        let mut terms = Vec::new();
        let mut rest = text;
        let mut negated = false;
        if let Some(tail) = rest.strip_prefix('-') {
            negated = true;
            rest = tail;
        }
        while !rest.is_empty() {
            let split = rest[1..]
                .find(|c| c == '+' || c == '-')
                .map(|pos| pos + 1)
                .unwrap_or(rest.len());
            let (token, tail) = rest.split_at(split);
            terms.push(AddrTerm::parse(token, negated)?);
            match tail.as_bytes().first() {
                Some(b'+') => negated = false,
                Some(b'-') => negated = true,
                _ => {}
            }
            rest = tail.get(1..).unwrap_or("");
        }
        if terms.is_empty() {
            return Err(ParseError::BadImmediate(text.to_string()));
        }
        Ok(Self { terms })
    }
}

impl AddrTerm {
    fn parse(token: &str, negated: bool) -> Result<Self, ParseError> {
        let kind = match token.split_once('*') {
            Some((lhs, rhs)) => {
                // normalized form is reg*scale; tolerate scale*reg
                let (reg, scale) = match Register::from_str(lhs) {
                    Ok(reg) => (reg, rhs),
                    Err(()) => (
                        Register::from_str(rhs)
                            .map_err(|()| ParseError::BadScale(token.to_string()))?,
                        lhs,
                    ),
                };
                let scale = parse_imm(scale)
                    .ok()
                    .and_then(|value| u64::try_from(value).ok())
                    .filter(|scale| scale.is_power_of_two())
                    .ok_or_else(|| ParseError::BadScale(token.to_string()))?;
                AddrTermKind::Reg { reg, scale }
            }
            None if token == "rip" => AddrTermKind::Rip,
            None => match Register::from_str(token) {
                Ok(reg) => AddrTermKind::Reg { reg, scale: 1 },
                Err(()) => AddrTermKind::Imm(
                    parse_imm(token)
                        .map_err(|()| ParseError::BadImmediate(token.to_string()))?,
                ),
            },
        };
        Ok(Self { negated, kind })
    }
}

impl Operand {
    /// Parse one comma-separated operand token.
    pub fn parse(token: &str) -> Result<Self, ParseError> {
        let token = token.trim();
        let (width, rest) = split_width_annotation(token);
        if width.is_some() || rest.starts_with('[') || rest.contains(":[") {
            return Self::parse_mem(width, rest);
        }
        if let Ok(reg) = Register::from_str(rest) {
            return Ok(Self::Reg(reg));
        }
        if let Ok(seg) = SegReg::from_str(rest) {
            return Ok(Self::Seg(seg));
        }
        if let Some(digit) = rest
            .strip_prefix("st")
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| *n < 8)
        {
            return Ok(Self::St(digit));
        }
        if let Some((lhs, rhs)) = rest.split_once(':') {
            if let (Ok(hi), Ok(lo)) = (Register::from_str(lhs), Register::from_str(rhs))
            {
                return Ok(Self::Pair(hi, lo));
            }
            if SegReg::from_str(lhs).is_ok() {
                return Self::parse_mem(width, rest);
            }
        }
        if let Ok(value) = parse_imm(rest) {
            return Ok(Self::Imm(value));
        }
        Ok(Self::Other(rest.to_string()))
    }

    fn parse_mem(width: Option<u32>, rest: &str) -> Result<Self, ParseError> {
        let (segment, rest) = match rest.split_once(':') {
            Some((seg, tail)) => match SegReg::from_str(seg) {
                Ok(seg) => (Some(seg), tail),
                Err(_) => (None, rest),
            },
            None => (None, rest),
        };
        let expr = if let Some(inner) = rest.strip_prefix('[') {
            let inner = inner
                .strip_suffix(']')
                .ok_or_else(|| ParseError::UnterminatedBracket(rest.to_string()))?;
            AddrExpr::parse(inner)?
        } else {
            // segment-relative bare displacement, e.g. `fs:0x28`
            AddrExpr::parse(rest)?
        };
        Ok(Self::Mem(MemOperand {
            width,
            segment,
            expr,
        }))
    }

    /// Operand width in bits: an explicit memory annotation wins, then the
    /// register width, then the pair sum, otherwise `default`.
    pub fn width(&self, default: u32) -> u32 {
        match self {
            Self::Reg(reg) => reg.width(),
            Self::Pair(hi, lo) => hi.width() + lo.width(),
            Self::Mem(mem) => mem.width.unwrap_or(default),
            Self::Seg(_) | Self::Imm(_) | Self::St(_) | Self::Other(_) => default,
        }
    }

    /// The memory reference, when this operand is one.
    pub fn as_mem(&self) -> Option<&MemOperand> {
        match self {
            Self::Mem(mem) => Some(mem),
            _ => None,
        }
    }

    /// The register, when this operand is a plain register.
    pub fn as_reg(&self) -> Option<Register> {
        match self {
            Self::Reg(reg) => Some(*reg),
            _ => None,
        }
    }
}

/// Split a leading `<size> ptr ` annotation off a token.
fn split_width_annotation(token: &str) -> (Option<u32>, &str) {
    let Some((annot, rest)) = token.split_once(" ptr ") else {
        return (None, token);
    };
    let width = match annot {
        "byte" => 8,
        "word" => 16,
        "dword" => 32,
        "qword" => 64,
        // xmmword, tbyte and friends all widen past a qword
        _ => 128,
    };
    (Some(width), rest.trim_start())
}

/// Parse an immediate token: `0x…` hex, bare hex containing `a`-`f`
/// digits, or decimal; either may carry a leading `-`.
pub fn parse_imm(token: &str) -> Result<i128, ()> {
    let (negated, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    if digits.is_empty() {
        return Err(());
    }
    let value = if let Some(hex) = digits.strip_prefix("0x") {
        i128::from_str_radix(hex, 16).map_err(|_| ())?
    } else if digits.bytes().all(|b| b.is_ascii_hexdigit())
        && digits.bytes().any(|b| b.is_ascii_alphabetic())
    {
        i128::from_str_radix(digits, 16).map_err(|_| ())?
    } else {
        digits.parse::<i128>().map_err(|_| ())?
    };
    Ok(if negated { -value } else { value })
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reg(reg) => write!(f, "{reg}"),
            Self::Seg(seg) => write!(f, "{seg}"),
            Self::Imm(value) => fmt_imm(f, *value),
            Self::Pair(hi, lo) => write!(f, "{hi}:{lo}"),
            Self::Mem(mem) => write!(f, "{mem}"),
            Self::St(n) => write!(f, "st{n}"),
            Self::Other(raw) => write!(f, "{raw}"),
        }
    }
}

impl fmt::Display for MemOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(width) = self.width {
            let annot = match width {
                8 => "byte",
                16 => "word",
                32 => "dword",
                64 => "qword",
                _ => "xmmword",
            };
            write!(f, "{annot} ptr ")?;
        }
        if let Some(seg) = self.segment {
            write!(f, "{seg}:")?;
        }
        write!(f, "[{}]", self.expr)
    }
}

impl fmt::Display for AddrExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, term) in self.terms.iter().enumerate() {
            if term.negated {
                write!(f, "-")?;
            } else if idx > 0 {
                write!(f, "+")?;
            }
            match term.kind {
                AddrTermKind::Reg { reg, scale: 1 } => write!(f, "{reg}")?,
                AddrTermKind::Reg { reg, scale } => write!(f, "{reg}*{scale}")?,
                AddrTermKind::Rip => write!(f, "rip")?,
                AddrTermKind::Imm(value) => fmt_imm(f, value)?,
            }
        }
        Ok(())
    }
}

fn fmt_imm(f: &mut fmt::Formatter<'_>, value: i128) -> fmt::Result {
    if value < 0 {
        write!(f, "-{:#x}", value.unsigned_abs())
    } else {
        write!(f, "{value:#x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Reg64;
    use test_case::test_case;

    #[test]
    fn parses_register_and_immediate() {
        assert_eq!(
            Operand::parse("eax").unwrap(),
            Operand::Reg(Register::new(Reg64::Rax, 0, 32))
        );
        assert_eq!(Operand::parse("0x5").unwrap(), Operand::Imm(5));
        assert_eq!(Operand::parse("-0x14").unwrap(), Operand::Imm(-0x14));
        assert_eq!(
            Operand::parse("edx:eax").unwrap(),
            Operand::Pair(
                Register::new(Reg64::Rdx, 0, 32),
                Register::new(Reg64::Rax, 0, 32)
            )
        );
    }

    #[test_case("qword ptr [rax]", Some(64), None, 1)]
    #[test_case("dword ptr [rcx+rdx*4]", Some(32), None, 2)]
    #[test_case("[rbp-0x14]", None, None, 2)]
    #[test_case("byte ptr fs:[rbx+0x10]", Some(8), Some(SegReg::Fs), 2)]
    #[test_case("xmmword ptr [rsp]", Some(128), None, 1)]
    fn parses_memory(
        token: &str,
        width: Option<u32>,
        segment: Option<SegReg>,
        terms: usize,
    ) {
        let Operand::Mem(mem) = Operand::parse(token).unwrap() else {
            panic!("expected a memory operand for {token}");
        };
        assert_eq!(mem.width, width);
        assert_eq!(mem.segment, segment);
        assert_eq!(mem.expr.terms.len(), terms);
    }

    #[test]
    fn parses_rip_relative() {
        let Operand::Mem(mem) = Operand::parse("qword ptr [rip+0x2009a6]").unwrap()
        else {
            panic!("expected memory");
        };
        assert!(mem.expr.is_rip_relative());
        assert!(!mem.expr.has_scaled_index());
    }

    #[test]
    fn parses_segment_bare_displacement() {
        let Operand::Mem(mem) = Operand::parse("qword ptr fs:0x28").unwrap() else {
            panic!("expected memory");
        };
        assert_eq!(mem.segment, Some(SegReg::Fs));
        assert_eq!(
            mem.expr.terms,
            vec![AddrTerm {
                negated: false,
                kind: AddrTermKind::Imm(0x28)
            }]
        );
    }

    #[test]
    fn scaled_index_detection() {
        let Operand::Mem(mem) = Operand::parse("[rcx+rdx*8]").unwrap() else {
            panic!("expected memory");
        };
        assert!(mem.expr.has_scaled_index());
        assert!(mem.expr.is_compound());
        assert_eq!(
            mem.expr.registers().map(|r| r.parent()).collect::<Vec<_>>(),
            vec![Reg64::Rcx, Reg64::Rdx]
        );
    }

    #[test]
    fn rejects_unterminated_bracket() {
        assert!(matches!(
            Operand::parse("qword ptr [rax"),
            Err(ParseError::UnterminatedBracket(_))
        ));
        assert!(matches!(
            Operand::parse("[rcx+rdx*3]"),
            Err(ParseError::BadScale(_))
        ));
    }

    #[test_case("qword ptr [rcx+rdx*8]")]
    #[test_case("dword ptr [rbp-0x14]")]
    #[test_case("byte ptr fs:[rax+0x10]")]
    #[test_case("[rip+0x2009a6]")]
    fn memory_display_round_trips(token: &str) {
        let operand = Operand::parse(token).unwrap();
        assert_eq!(operand.to_string(), token);
        assert_eq!(Operand::parse(&operand.to_string()).unwrap(), operand);
    }

    #[rstest::rstest]
    #[case("eax", 32)]
    #[case("r9b", 8)]
    #[case("qword ptr [rax]", 64)]
    #[case("[rbp-0x8]", 64)]
    #[case("edx:eax", 64)]
    #[case("0x5", 64)]
    fn width_derivation_order(#[case] token: &str, #[case] width: u32) {
        assert_eq!(Operand::parse(token).unwrap().width(64), width);
    }

    #[test]
    fn unknown_tokens_stay_opaque() {
        assert_eq!(
            Operand::parse("xmm0").unwrap(),
            Operand::Other("xmm0".to_string())
        );
        assert_eq!(Operand::parse("st3").unwrap(), Operand::St(3));
    }
}
