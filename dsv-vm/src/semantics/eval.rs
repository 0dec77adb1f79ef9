//! Operand evaluation: values in, values out, effective addresses.

use dsv_asm::{AddrTermKind, MemOperand, Operand};

use crate::expr::{Expr, Width};
use crate::program::BinaryInfo;
use crate::store::Store;

use super::Ctx;

/// Compute the effective address of a memory operand.
///
/// The address is represented at the width of the first register in the
/// expression (an `esp`-based frame stays 32 bits wide) and falls back to
/// the configured address width for register-free expressions. A segment
/// override adds the segment base.
pub fn effective_address<B: BinaryInfo>(
    store: &Store,
    ctx: &Ctx<'_, B>,
    mem: &MemOperand,
) -> Expr {
    let width = mem.expr.rep_width(ctx.addr_width);
    let mut addr = Expr::constant(0, width);
    for term in &mem.expr.terms {
        let value = match term.kind {
            AddrTermKind::Reg { reg, scale } => {
                let base = Expr::resize(width, store.read_reg(reg));
                Expr::mul(base, Expr::constant(u128::from(scale), width))
            }
            AddrTermKind::Rip => Expr::constant(u128::from(ctx.rip), width),
            AddrTermKind::Imm(value) => Expr::imm(value, width),
        };
        addr = if term.negated {
            Expr::sub(addr, value)
        } else {
            Expr::add(addr, value)
        };
    }
    match mem.segment {
        Some(seg) => Expr::add(Expr::resize(width, store.seg_base(seg)), addr),
        None => addr,
    }
}

/// Read an operand as a value of the given width.
pub fn read_operand<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    operand: &Operand,
    width: Width,
) -> Expr {
    match operand {
        Operand::Reg(reg) => Expr::resize(width, store.read_reg(*reg)),
        Operand::Seg(seg) => Expr::resize(width, store.seg_base(*seg)),
        Operand::Imm(value) => Expr::imm(*value, width),
        Operand::Pair(hi, lo) => {
            let value = Expr::concat(store.read_reg(*hi), store.read_reg(*lo));
            Expr::resize(width, value)
        }
        Operand::Mem(mem) => {
            let addr = effective_address(store, ctx, mem);
            store.read_mem(ctx.binary, &addr, width)
        }
        Operand::St(_) | Operand::Other(_) => store.fresh(width),
    }
}

/// Write a value into an operand destination.
pub fn write_operand<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    operand: &Operand,
    value: Expr,
) {
    match operand {
        Operand::Reg(reg) => {
            store.write_reg(*reg, Expr::resize(reg.width(), value));
        }
        Operand::Pair(hi, lo) => {
            let split = lo.width();
            let total = hi.width() + split;
            let value = Expr::resize(total, value);
            store.write_reg(*lo, Expr::extract(split - 1, 0, value.clone()));
            store.write_reg(*hi, Expr::extract(total - 1, split, value));
        }
        Operand::Mem(mem) => {
            let addr = effective_address(store, ctx, mem);
            store.write_mem(&addr, value);
        }
        // segment loads and fpu stack traffic are not modeled
        Operand::Seg(_) | Operand::St(_) | Operand::Imm(_) | Operand::Other(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::ExplorerParams;
    use crate::testing::NoImage;
    use dsv_asm::{Instruction, Reg64, Register};

    fn ctx(rip: u64) -> Ctx<'static, NoImage> {
        Ctx {
            binary: &NoImage,
            addr_width: 64,
            addr: rip.saturating_sub(4),
            rip,
        }
    }

    fn mem_operand(text: &str) -> MemOperand {
        match Operand::parse(text).unwrap() {
            Operand::Mem(mem) => mem,
            other => panic!("expected memory, got {other:?}"),
        }
    }

    #[test]
    fn base_index_scale_displacement() {
        let mut store = Store::entry(&ExplorerParams::default());
        store.write_reg(Register::full(Reg64::Rcx), Expr::constant(0x1000, 64));
        store.write_reg(Register::full(Reg64::Rdx), Expr::constant(3, 64));
        let addr = effective_address(
            &store,
            &ctx(0),
            &mem_operand("qword ptr [rcx+rdx*8+0x10]"),
        );
        assert_eq!(addr, Expr::constant(0x1028, 64));
    }

    #[test]
    fn rip_relative_folds_against_next_address() {
        let store = Store::entry(&ExplorerParams::default());
        let addr =
            effective_address(&store, &ctx(0x40_0010), &mem_operand("[rip+0x100]"));
        assert_eq!(addr, Expr::constant(0x40_0110, 64));
    }

    #[test]
    fn segment_override_adds_base() {
        let store = Store::entry(&ExplorerParams::default());
        let addr =
            effective_address(&store, &ctx(0), &mem_operand("qword ptr fs:0x28"));
        // segment bases initialize to zero
        assert_eq!(addr, Expr::constant(0x28, 64));
    }

    #[test]
    fn pair_write_splits_across_registers() {
        let mut store = Store::entry(&ExplorerParams::default());
        let inst = Instruction::parse("mov edx:eax, 0x0").unwrap();
        let pair = inst.operand(0).unwrap().clone();
        write_operand(
            &mut store,
            &ctx(0),
            &pair,
            Expr::constant(0x1234_5678_9abc_def0, 64),
        );
        assert_eq!(
            store.read_reg("eax".parse().unwrap()),
            Expr::constant(0x9abc_def0, 32)
        );
        assert_eq!(
            store.read_reg("edx".parse().unwrap()),
            Expr::constant(0x1234_5678, 32)
        );
    }
}
