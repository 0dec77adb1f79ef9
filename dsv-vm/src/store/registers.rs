//! The general-purpose register file.

use dsv_asm::{Reg64, Register};

use crate::expr::Expr;

/// The sixteen canonical 64-bit registers.
///
/// Sub-register names read and write through their overlay slice; a 32-bit
/// write zeroes the upper half of the parent, every narrower write leaves
/// the surrounding bits alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    values: [Expr; Reg64::COUNT],
}

impl RegisterFile {
    /// Build a file with every canonical register produced by `fill`.
    pub fn new(mut fill: impl FnMut(Reg64) -> Expr) -> Self {
        use strum::IntoEnumIterator;
        let mut values: Vec<Expr> = Reg64::iter().map(&mut fill).collect();
        values.truncate(Reg64::COUNT);
        let values = values
            .try_into()
            .unwrap_or_else(|_| unreachable!("Reg64 iterates its own count"));
        Self { values }
    }

    /// The full 64-bit value of a canonical register.
    pub fn get64(&self, reg: Reg64) -> &Expr {
        &self.values[reg.index()]
    }

    /// Read a register through its overlay slice.
    pub fn read(&self, reg: Register) -> Expr {
        let parent = self.values[reg.parent().index()].clone();
        if reg.is_full() {
            return parent;
        }
        Expr::extract(reg.offset() + reg.width() - 1, reg.offset(), parent)
    }

    /// Write a register through its overlay slice.
    pub fn write(&mut self, reg: Register, value: Expr) {
        debug_assert_eq!(value.width(), reg.width(), "value width must match slice");
        let slot = &mut self.values[reg.parent().index()];
        if reg.is_full() {
            *slot = value;
            return;
        }
        if reg.offset() == 0 && reg.width() == 32 {
            // x86-64: a 32-bit destination zeroes bits 63..32
            *slot = Expr::zero_ext(64, value);
            return;
        }
        let current = slot.clone();
        let mut spliced = value;
        if reg.offset() > 0 {
            spliced = Expr::concat(spliced, Expr::extract(reg.offset() - 1, 0, current.clone()));
        }
        let top = reg.offset() + reg.width();
        if top < 64 {
            spliced = Expr::concat(Expr::extract(63, top, current), spliced);
        }
        *slot = spliced;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsv_asm::Register;

    fn file() -> RegisterFile {
        RegisterFile::new(|reg| Expr::var(reg.to_string(), 64))
    }

    fn reg(name: &str) -> Register {
        name.parse().unwrap()
    }

    #[test]
    fn full_width_round_trip() {
        let mut regs = file();
        regs.write(reg("rbx"), Expr::constant(0xdead_beef, 64));
        assert_eq!(regs.read(reg("rbx")), Expr::constant(0xdead_beef, 64));
    }

    #[test]
    fn dword_write_zeroes_upper_half() {
        let mut regs = file();
        regs.write(reg("rax"), Expr::constant(u64::MAX as u128, 64));
        regs.write(reg("eax"), Expr::constant(0x1234, 32));
        assert_eq!(regs.read(reg("rax")), Expr::constant(0x1234, 64));
    }

    #[test]
    fn narrow_writes_preserve_surroundings() {
        let mut regs = file();
        regs.write(reg("rax"), Expr::constant(0x1111_2222_3333_4444, 64));
        regs.write(reg("al"), Expr::constant(0xaa, 8));
        assert_eq!(regs.read(reg("rax")), Expr::constant(0x1111_2222_3333_44aa, 64));
        regs.write(reg("ah"), Expr::constant(0xbb, 8));
        assert_eq!(regs.read(reg("rax")), Expr::constant(0x1111_2222_3333_bbaa, 64));
        regs.write(reg("ax"), Expr::constant(0xcccc, 16));
        assert_eq!(regs.read(reg("rax")), Expr::constant(0x1111_2222_3333_cccc, 64));
    }

    #[test]
    fn sub_register_reads_slice_symbolic_parents() {
        let regs = file();
        let low = regs.read(reg("cl"));
        assert_eq!(low.width(), 8);
        assert!(!low.is_concrete());
    }
}
