//! Register naming and the sub-register overlay table.
//!
//! Every legal general-purpose name is a (parent, offset, width) slice of one
//! of the sixteen canonical 64-bit registers. The `ah`/`bh`/`ch`/`dh` forms
//! sit at bit offset 8; everything else starts at bit 0.

use core::fmt;
use core::str::FromStr;

/// The sixteen canonical 64-bit general-purpose registers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Reg64 {
    /// Accumulator.
    Rax = 0,
    /// Base.
    Rbx,
    /// Counter.
    Rcx,
    /// Data.
    Rdx,
    /// Stack pointer.
    Rsp,
    /// Base pointer.
    Rbp,
    /// Source index.
    Rsi,
    /// Destination index.
    Rdi,
    /// Extended register 8.
    R8,
    /// Extended register 9.
    R9,
    /// Extended register 10.
    R10,
    /// Extended register 11.
    R11,
    /// Extended register 12.
    R12,
    /// Extended register 13.
    R13,
    /// Extended register 14.
    R14,
    /// Extended register 15.
    R15,
}

impl Reg64 {
    /// Number of canonical registers.
    pub const COUNT: usize = 16;

    /// Index into a fixed register file array.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The caller-saved registers clobbered by an external call, in the
    /// order they are refreshed.
    pub const CALLER_SAVED: [Reg64; 9] = [
        Reg64::Rax,
        Reg64::Rcx,
        Reg64::Rdx,
        Reg64::Rsi,
        Reg64::Rdi,
        Reg64::R8,
        Reg64::R9,
        Reg64::R10,
        Reg64::R11,
    ];
}

/// Segment registers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum SegReg {
    /// Code segment.
    Cs = 0,
    /// Data segment.
    Ds,
    /// Extra segment.
    Es,
    /// F segment.
    Fs,
    /// G segment.
    Gs,
    /// Stack segment.
    Ss,
}

impl SegReg {
    /// Number of segment registers.
    pub const COUNT: usize = 6;

    /// Index into a fixed segment base array.
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Any legal general-purpose register name, resolved to its overlay slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    parent: Reg64,
    offset: u32,
    width: u32,
}

impl Register {
    /// Build a register reference from its overlay slice.
    ///
    /// Callers are expected to pass a slice that corresponds to a legal
    /// name; `Register::from_str` is the checked entry point.
    pub const fn new(parent: Reg64, offset: u32, width: u32) -> Self {
        Self {
            parent,
            offset,
            width,
        }
    }

    /// The full-width register from its canonical form.
    pub const fn full(parent: Reg64) -> Self {
        Self::new(parent, 0, 64)
    }

    /// The canonical 64-bit register this name overlays.
    pub const fn parent(self) -> Reg64 {
        self.parent
    }

    /// Bit offset of the slice within the parent.
    pub const fn offset(self) -> u32 {
        self.offset
    }

    /// Width of the slice in bits.
    pub const fn width(self) -> u32 {
        self.width
    }

    /// Whether this name covers the whole 64-bit parent.
    pub const fn is_full(self) -> bool {
        self.offset == 0 && self.width == 64
    }
}

/// Sub-register names of `rax`..`rdi` keyed by width, `[8, 16, 32]`.
const LEGACY_SUB_NAMES: [(Reg64, [&str; 3]); 8] = [
    (Reg64::Rax, ["al", "ax", "eax"]),
    (Reg64::Rbx, ["bl", "bx", "ebx"]),
    (Reg64::Rcx, ["cl", "cx", "ecx"]),
    (Reg64::Rdx, ["dl", "dx", "edx"]),
    (Reg64::Rsp, ["spl", "sp", "esp"]),
    (Reg64::Rbp, ["bpl", "bp", "ebp"]),
    (Reg64::Rsi, ["sil", "si", "esi"]),
    (Reg64::Rdi, ["dil", "di", "edi"]),
];

/// High-byte forms at bit offset 8.
const HIGH_BYTE_NAMES: [(&str, Reg64); 4] = [
    ("ah", Reg64::Rax),
    ("bh", Reg64::Rbx),
    ("ch", Reg64::Rcx),
    ("dh", Reg64::Rdx),
];

impl FromStr for Register {
    type Err = ();

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if let Ok(parent) = Reg64::from_str(name) {
            return Ok(Register::full(parent));
        }
        for (high, parent) in HIGH_BYTE_NAMES {
            if name == high {
                return Ok(Register::new(parent, 8, 8));
            }
        }
        for (parent, subs) in LEGACY_SUB_NAMES {
            for (idx, sub) in subs.iter().enumerate() {
                if name == *sub {
                    return Ok(Register::new(parent, 0, 8 << idx));
                }
            }
        }
        // r8b/r8w/r8d style names for the extended registers.
        if let Some(rest) = name.strip_prefix('r') {
            let split = rest.len().checked_sub(1).ok_or(())?;
            let (num, suffix) = rest.split_at(split);
            let width = match suffix {
                "b" => 8,
                "w" => 16,
                "d" => 32,
                _ => return Err(()),
            };
            let parent = Reg64::from_str(&format!("r{num}")).map_err(|_| ())?;
            if (parent as u8) < Reg64::R8 as u8 {
                return Err(());
            }
            return Ok(Register::new(parent, 0, width));
        }
        Err(())
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_full() {
            return write!(f, "{}", self.parent);
        }
        if self.offset == 8 {
            for (high, parent) in HIGH_BYTE_NAMES {
                if parent == self.parent {
                    return write!(f, "{high}");
                }
            }
        }
        if (self.parent as u8) >= Reg64::R8 as u8 {
            let suffix = match self.width {
                8 => "b",
                16 => "w",
                _ => "d",
            };
            return write!(f, "{}{suffix}", self.parent);
        }
        let idx = match self.width {
            8 => 0,
            16 => 1,
            _ => 2,
        };
        for (parent, subs) in LEGACY_SUB_NAMES {
            if parent == self.parent {
                return write!(f, "{}", subs[idx]);
            }
        }
        write!(f, "{}", self.parent)
    }
}

/// Implicit low/high register pair for widening multiply, divide, and the
/// sign-extending convert family, keyed by operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WideRegs {
    /// Low half of the product; quotient destination.
    pub lo: Register,
    /// High half of the product; remainder destination.
    pub hi: Register,
}

impl WideRegs {
    /// The pair for a given operand width, if the width is legal.
    ///
    /// At width 8 the pair is `al`/`ah` inside `rax`; wider forms use the
    /// A and D registers of the matching width.
    pub fn for_width(width: u32) -> Option<Self> {
        let pair = match width {
            8 => Self {
                lo: Register::new(Reg64::Rax, 0, 8),
                hi: Register::new(Reg64::Rax, 8, 8),
            },
            16 => Self {
                lo: Register::new(Reg64::Rax, 0, 16),
                hi: Register::new(Reg64::Rdx, 0, 16),
            },
            32 => Self {
                lo: Register::new(Reg64::Rax, 0, 32),
                hi: Register::new(Reg64::Rdx, 0, 32),
            },
            64 => Self {
                lo: Register::full(Reg64::Rax),
                hi: Register::full(Reg64::Rdx),
            },
            _ => return None,
        };
        Some(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;
    use test_case::test_case;

    #[test_case("rax", Reg64::Rax, 0, 64)]
    #[test_case("eax", Reg64::Rax, 0, 32)]
    #[test_case("ax", Reg64::Rax, 0, 16)]
    #[test_case("al", Reg64::Rax, 0, 8)]
    #[test_case("ah", Reg64::Rax, 8, 8)]
    #[test_case("bpl", Reg64::Rbp, 0, 8)]
    #[test_case("sil", Reg64::Rsi, 0, 8)]
    #[test_case("r8", Reg64::R8, 0, 64)]
    #[test_case("r10d", Reg64::R10, 0, 32)]
    #[test_case("r15w", Reg64::R15, 0, 16)]
    #[test_case("r9b", Reg64::R9, 0, 8)]
    fn resolves_overlay_slice(name: &str, parent: Reg64, offset: u32, width: u32) {
        let reg: Register = name.parse().unwrap();
        assert_eq!(reg.parent(), parent);
        assert_eq!(reg.offset(), offset);
        assert_eq!(reg.width(), width);
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("rip".parse::<Register>().is_err());
        assert!("xmm0".parse::<Register>().is_err());
        assert!("r16".parse::<Register>().is_err());
        assert!("rb".parse::<Register>().is_err());
    }

    #[test]
    fn every_name_round_trips_through_display() {
        for parent in Reg64::iter() {
            for width in [8u32, 16, 32, 64] {
                let reg = Register::new(parent, 0, width);
                let back: Register = reg.to_string().parse().unwrap();
                assert_eq!(back, reg);
            }
        }
        for (high, _) in HIGH_BYTE_NAMES {
            let reg: Register = high.parse().unwrap();
            assert_eq!(reg.to_string(), high);
        }
    }

    #[test]
    fn wide_pair_at_byte_width_lives_in_rax() {
        let pair = WideRegs::for_width(8).unwrap();
        assert_eq!(pair.lo, Register::new(Reg64::Rax, 0, 8));
        assert_eq!(pair.hi, Register::new(Reg64::Rax, 8, 8));
        assert!(WideRegs::for_width(128).is_none());
    }
}
