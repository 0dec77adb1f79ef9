//! Universal store invariants, driven by quickcheck.

use quickcheck::TestResult;
use quickcheck_macros::quickcheck;

use dsv_vm::prelude::*;

fn entry_store() -> Store {
    Store::entry(&ExplorerParams::default())
}

fn width_of(selector: u8) -> u32 {
    [8u32, 16, 32, 64][(selector % 4) as usize]
}

#[quickcheck]
fn register_round_trips_and_preserves_neighbors(value: u64, selector: u8) -> bool {
    let mut store = entry_store();
    let width = width_of(selector);
    let reg = Register::new(Reg64::Rbx, 0, width);
    let initial = 0x1111_2222_3333_4444u64;
    store.write_reg(Register::full(Reg64::Rbx), Expr::constant(initial.into(), 64));
    let truncated = u128::from(value) & ((1u128 << width) - 1).min(u128::from(u64::MAX));
    store.write_reg(reg, Expr::constant(truncated, width));

    if store.read_reg(reg) != Expr::constant(truncated, width) {
        return false;
    }
    let full = store.read_reg(Register::full(Reg64::Rbx)).as_u64().unwrap();
    match width {
        // a dword write zeroes the upper half, a qword write replaces
        32 | 64 => u128::from(full) == truncated,
        _ => {
            full >> width == initial >> width
                && u128::from(full) & ((1 << width) - 1) == truncated
        }
    }
}

#[quickcheck]
fn memory_round_trips_at_every_width(addr: u32, value: u64, selector: u8) -> TestResult {
    // keep clear of the entry return-address slot
    if u64::from(addr) >= ExplorerParams::default().stack_init {
        return TestResult::discard();
    }
    let mut store = entry_store();
    let width = width_of(selector);
    let truncated = u128::from(value) & ((1u128 << width) - 1);
    let key = Expr::constant(u128::from(addr), 64);
    store.write_mem(&key, Expr::constant(truncated, width));
    TestResult::from_bool(
        store.load_mem(&key, width) == Some(Expr::constant(truncated, width)),
    )
}

#[quickcheck]
fn overlapping_writes_keep_the_prefix(low: u64, byte: u8) -> bool {
    let mut store = entry_store();
    let base = Expr::constant(0x4000, 64);
    store.write_mem(&base, Expr::constant(u128::from(low), 64));
    let poke = Expr::constant(0x4003, 64);
    store.write_mem(&poke, Expr::constant(u128::from(byte), 8));

    // bytes below the poke survive, the poke reads back, and the old
    // entry's tail past the poke is gone
    let prefix = u128::from(low) & 0xff_ffff;
    store.load_mem(&base, 24) == Some(Expr::constant(prefix, 24))
        && store.load_mem(&poke, 8) == Some(Expr::constant(u128::from(byte), 8))
        && store.load_mem(&Expr::constant(0x4004, 64), 32).is_none()
}

#[quickcheck]
fn pushed_values_pop_back(value: u64) -> bool {
    let mut store = entry_store();
    let sp_before = store.stack_pointer();
    let width = store.addr_width();
    let pushed = Expr::constant(u128::from(value), width);

    // push
    let new_sp = Expr::sub(sp_before.clone(), Expr::constant(8, width));
    store.write_reg(Register::full(Reg64::Rsp), new_sp.clone());
    store.write_mem(&new_sp, pushed.clone());
    // pop
    let popped = store.load_mem(&new_sp, width);
    store.write_reg(Register::full(Reg64::Rsp), sp_before.clone());

    popped == Some(pushed) && store.stack_pointer() == sp_before
}

#[quickcheck]
fn forked_stores_do_not_alias(value: u64) -> bool {
    let parent = entry_store();
    let mut child = parent.clone();
    child.write_reg(Register::full(Reg64::R9), Expr::constant(u128::from(value), 64));
    child.write_mem(&Expr::constant(0x8000, 64), Expr::constant(1, 8));
    child.set_flag(Flag::Sf, Some(true));

    parent.load_mem(&Expr::constant(0x8000, 64), 8).is_none()
        && parent.flag(Flag::Sf).is_none()
        && !parent.reg64(Reg64::R9).is_concrete()
}
