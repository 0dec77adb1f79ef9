//! The symbolic machine state.
//!
//! One store belongs to one block. Forks deep-copy everything: register
//! file, flags, segment bases, memory, the auxiliary witness set, the heap
//! cursor, and the fresh-symbol counter, so sibling paths never alias.

use dsv_asm::{Flag, Reg64, Register, SegReg};
use tracing::debug;

use crate::consts::ExplorerParams;
use crate::expr::{Expr, Width};
use crate::program::BinaryInfo;

mod flags;
mod memory;
mod registers;

pub use flags::FlagState;
pub use memory::Memory;
pub use registers::RegisterFile;

use std::collections::BTreeSet;

/// The symbolic state of one path.
#[derive(Debug, Clone, PartialEq)]
pub struct Store {
    regs: RegisterFile,
    flags: FlagState,
    segs: [Expr; SegReg::COUNT],
    mem: Memory,
    aux_mem: BTreeSet<u64>,
    heap_cursor: u64,
    addr_width: Width,
    sym_counter: u64,
}

impl Store {
    /// The machine state at a program entry: every general-purpose
    /// register a fresh symbol, the stack pointer at its configured
    /// constant, segment bases at theirs, flags unknown, and a fresh
    /// symbol at `[SP]` standing for the entry return address.
    pub fn entry(params: &ExplorerParams) -> Self {
        let mut counter = 0;
        let regs = RegisterFile::new(|_| {
            let name = format!("s{counter}");
            counter += 1;
            Expr::var(name, 64)
        });
        let mut store = Self {
            regs,
            flags: FlagState::unknown(),
            segs: core::array::from_fn(|_| {
                Expr::constant(u128::from(params.segment_init), params.addr_width)
            }),
            mem: Memory::default(),
            aux_mem: BTreeSet::new(),
            heap_cursor: params.heap_start,
            addr_width: params.addr_width,
            sym_counter: counter,
        };
        store.write_reg(
            Register::full(Reg64::Rsp),
            Expr::constant(u128::from(params.stack_init), 64),
        );
        let sp = store.stack_pointer();
        let ret = store.fresh(params.addr_width);
        store.mem.write(&sp, ret);
        store
    }

    /// Address width W of this exploration.
    pub const fn addr_width(&self) -> Width {
        self.addr_width
    }

    /// A fresh free symbol of the given width.
    pub fn fresh(&mut self, width: Width) -> Expr {
        let name = format!("s{}", self.sym_counter);
        self.sym_counter += 1;
        Expr::var(name, width)
    }

    /// Read a register through its overlay slice.
    pub fn read_reg(&self, reg: Register) -> Expr {
        self.regs.read(reg)
    }

    /// Write a register through its overlay slice.
    pub fn write_reg(&mut self, reg: Register, value: Expr) {
        self.regs.write(reg, value);
    }

    /// The full 64-bit value of a canonical register.
    pub fn reg64(&self, reg: Reg64) -> &Expr {
        self.regs.get64(reg)
    }

    /// The stack pointer at the address width.
    pub fn stack_pointer(&self) -> Expr {
        let sp = self.regs.read(Register::full(Reg64::Rsp));
        Expr::resize(self.addr_width, sp)
    }

    /// Current value of a flag.
    pub fn flag(&self, flag: Flag) -> Option<bool> {
        self.flags.get(flag)
    }

    /// Set a flag to a literal or unknown.
    pub fn set_flag(&mut self, flag: Flag, value: Option<bool>) {
        self.flags.set(flag, value);
    }

    /// Clear every flag to unknown.
    pub fn clear_flags(&mut self) {
        self.flags.clear_all();
    }

    /// Clear every flag except one to unknown.
    pub fn clear_flags_but(&mut self, keep: Flag) {
        self.flags.clear_all_but(keep);
    }

    /// Base value of a segment register.
    pub fn seg_base(&self, seg: SegReg) -> Expr {
        self.segs[seg.index()].clone()
    }

    /// Overlay read of memory; `None` when the stored entries do not cover
    /// the requested range.
    pub fn load_mem(&self, addr: &Expr, width: Width) -> Option<Expr> {
        self.mem.load(addr, width)
    }

    /// Memory read with the section-backed fallback: a miss at a concrete
    /// in-image address fetches and caches the image bytes, any other miss
    /// caches a fresh symbol.
    pub fn read_mem<B: BinaryInfo>(
        &mut self,
        binary: &B,
        addr: &Expr,
        width: Width,
    ) -> Expr {
        if let Some(value) = self.mem.load(addr, width) {
            return value;
        }
        let value = match addr.as_u64() {
            Some(a) => match binary.read_addr(a, width / 8) {
                Some(bytes) => Expr::constant(bytes, width),
                None => Expr::var(format!("mem@{a:#x}"), width),
            },
            None => self.fresh(width),
        };
        self.mem.cache(addr, value.clone());
        value
    }

    /// Write memory, splitting overlapped entries.
    pub fn write_mem(&mut self, addr: &Expr, value: Expr) {
        if let Some(a) = addr.as_u64() {
            if self.aux_mem.contains(&a) {
                debug!(addr = format_args!("{a:#x}"), "flag witness address overwritten");
            }
        }
        self.mem.write(addr, value);
    }

    /// Drop the memory entry keyed exactly at `addr`.
    pub fn remove_mem(&mut self, addr: &Expr) {
        self.mem.remove(addr);
    }

    /// Direct access to the memory overlay.
    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    /// Record a concrete address whose value a flag-affecting instruction
    /// observed.
    pub fn record_witness(&mut self, addr: u64) {
        self.aux_mem.insert(addr);
    }

    /// The recorded witness addresses.
    pub fn witnesses(&self) -> &BTreeSet<u64> {
        &self.aux_mem
    }

    /// Next allocation address, advancing the cursor by `size` bytes.
    pub fn allocate(&mut self, size: u64) -> u64 {
        let chunk = self.heap_cursor;
        self.heap_cursor = self.heap_cursor.wrapping_add(size);
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::NoImage;

    #[test]
    fn entry_state_shape() {
        let params = ExplorerParams::default();
        let store = Store::entry(&params);
        assert_eq!(
            store.stack_pointer(),
            Expr::constant(u128::from(params.stack_init), 64)
        );
        assert!(!store.reg64(Reg64::Rax).is_concrete());
        assert_eq!(store.flag(Flag::Zf), None);
        let ret = store.load_mem(&store.stack_pointer(), 64);
        assert!(matches!(ret, Some(expr) if !expr.is_concrete()));
    }

    #[test]
    fn fork_is_deep() {
        let params = ExplorerParams::default();
        let parent = Store::entry(&params);
        let mut child = parent.clone();
        child.write_reg(Register::full(Reg64::Rbx), Expr::constant(7, 64));
        child.write_mem(&Expr::constant(0x100, 64), Expr::constant(1, 8));
        child.set_flag(Flag::Cf, Some(true));
        assert_ne!(parent.reg64(Reg64::Rbx), child.reg64(Reg64::Rbx));
        assert!(parent.load_mem(&Expr::constant(0x100, 64), 8).is_none());
        assert_eq!(parent.flag(Flag::Cf), None);
    }

    #[test]
    fn missed_reads_cache_fresh_symbols() {
        let params = ExplorerParams::default();
        let mut store = Store::entry(&params);
        let addr = Expr::constant(0x9999, 64);
        let first = store.read_mem(&NoImage, &addr, 32);
        let second = store.read_mem(&NoImage, &addr, 32);
        assert!(!first.is_concrete());
        assert_eq!(first, second);
    }

    #[test]
    fn fresh_symbols_are_deterministic() {
        let params = ExplorerParams::default();
        let mut a = Store::entry(&params);
        let mut b = Store::entry(&params);
        assert_eq!(a.fresh(64), b.fresh(64));
    }
}
