//! Per-mnemonic state transformers.
//!
//! The dispatcher maps a decoded mnemonic to its transformer; transformers
//! mutate the store in place and report how the path continues. Only `ret`,
//! `hlt`, and mnemonics without semantics suspend a path.

use dsv_asm::{
    Flag, Instruction, Mnemonic, Operand, Reg64, Register, RepPrefix, WideRegs,
};

use crate::error::{ExploreError, ExploreResult};
use crate::expr::{BinOp, Expr, Width};
use crate::program::BinaryInfo;
use crate::state::Step;
use crate::store::Store;

pub(crate) mod eval;
pub(crate) mod flags;

use eval::{effective_address, read_operand, write_operand};
use flags::{
    add_carry, add_overflow, eq3, eval_cond, not3, set_mul_flags,
    set_status_flags, sub_borrow, sub_overflow,
};

/// Execution context of one instruction.
pub(crate) struct Ctx<'a, B> {
    /// Binary image oracle, for section-backed memory reads.
    pub binary: &'a B,
    /// Address width W.
    pub addr_width: Width,
    /// Address of the instruction being executed.
    pub addr: u64,
    /// Address of the next instruction in program order; what `rip` reads
    /// as inside operands, and what `call` pushes.
    pub rip: u64,
}

/// The stack-pointer name at the address width.
fn sp_reg(width: Width) -> Register {
    Register::new(Reg64::Rsp, 0, width)
}

/// Apply one instruction to the store.
pub(crate) fn execute<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    inst: &Instruction,
) -> ExploreResult<Step> {
    record_flag_witness(store, ctx, inst);
    if inst.prefix().is_some() {
        return rep(store, ctx, inst);
    }
    dispatch(store, ctx, inst)
}

fn dispatch<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    inst: &Instruction,
) -> ExploreResult<Step> {
    use Mnemonic::*;
    let Some(mnemonic) = inst.mnemonic() else {
        if inst.name().starts_with("cmp") {
            // string-compare family: flags gone, nothing else modeled
            store.clear_flags();
            return Ok(Step::Unknown);
        }
        return Ok(undefined(store, ctx, inst));
    };
    match mnemonic {
        Mov | Movabs => {
            let [dest, src] = expect_operands(ctx, inst)?;
            mov(store, ctx, dest, src);
        }
        Lea => {
            let [dest, src] = expect_operands(ctx, inst)?;
            lea(store, ctx, dest, src);
        }
        Push => {
            let [src] = expect_operands(ctx, inst)?;
            let width = src.width(ctx.addr_width);
            let value = read_operand(store, ctx, src, width);
            push_value(store, ctx, value);
        }
        Pop => {
            let [dest] = expect_operands(ctx, inst)?;
            pop(store, ctx, dest);
        }
        Pusha => push_all(store, ctx, 16),
        Pushad => push_all(store, ctx, 32),
        Popa => pop_all(store, ctx, 16),
        Popad => pop_all(store, ctx, 32),
        Add | Sub | And | Or | Xor => {
            let [dest, src] = expect_operands(ctx, inst)?;
            arith(store, ctx, alu_op(mnemonic), dest, src);
        }
        Shl | Sal | Shr | Sar => {
            let [dest, src] = expect_operands(ctx, inst)?;
            shift(store, ctx, alu_op(mnemonic), dest, src);
        }
        Rol | Ror => {
            let [dest, src] = expect_operands(ctx, inst)?;
            rotate(store, ctx, mnemonic == Rol, dest, src);
        }
        Inc | Dec => {
            let [dest] = expect_operands(ctx, inst)?;
            inc_dec(store, ctx, mnemonic == Inc, dest);
        }
        Adc | Sbb => {
            let [dest, src] = expect_operands(ctx, inst)?;
            let op = if mnemonic == Adc { BinOp::Add } else { BinOp::Sub };
            with_carry(store, ctx, op, dest, src);
        }
        Neg => {
            let [dest] = expect_operands(ctx, inst)?;
            neg(store, ctx, dest);
        }
        Not => {
            let [dest] = expect_operands(ctx, inst)?;
            let width = dest.width(ctx.addr_width);
            let value = read_operand(store, ctx, dest, width);
            write_operand(store, ctx, dest, Expr::not(value));
        }
        Test => {
            let [dest, src] = expect_operands(ctx, inst)?;
            test(store, ctx, dest, src);
        }
        Cmp => {
            let [dest, src] = expect_operands(ctx, inst)?;
            cmp(store, ctx, dest, src);
        }
        Xchg => {
            let [dest, src] = expect_operands(ctx, inst)?;
            xchg(store, ctx, dest, src);
        }
        Cmpxchg => {
            let [dest, src] = expect_operands(ctx, inst)?;
            cmpxchg(store, ctx, dest, src);
        }
        Mul => {
            let [src] = expect_operands(ctx, inst)?;
            mul(store, ctx, src);
        }
        Imul => imul(store, ctx, inst)?,
        Div | Idiv => {
            let [src] = expect_operands(ctx, inst)?;
            div(store, ctx, mnemonic == Idiv, src);
        }
        Movzx => {
            let [dest, src] = expect_operands(ctx, inst)?;
            mov_extend(store, ctx, false, dest, src);
        }
        Movsx | Movsxd => {
            let [dest, src] = expect_operands(ctx, inst)?;
            mov_extend(store, ctx, true, dest, src);
        }
        Cbw => widen_accumulator(store, 8),
        Cwde => widen_accumulator(store, 16),
        Cdqe => widen_accumulator(store, 32),
        Cwd => widen_into_pair(store, 16),
        Cdq => widen_into_pair(store, 32),
        Cqo => widen_into_pair(store, 64),
        Bt => {
            let [base, offset] = expect_operands(ctx, inst)?;
            bt(store, ctx, base, offset);
        }
        Leave => leave(store, ctx),
        Ret => return ret(store, ctx, inst),
        Call => {
            let width = ctx.addr_width;
            push_value(store, ctx, Expr::constant(u128::from(ctx.rip), width));
        }
        Jmp | J(_) => {}
        Set(cond) => {
            let [dest] = expect_operands(ctx, inst)?;
            let width = dest.width(8);
            let value = match eval_cond(store, cond) {
                Some(taken) => Expr::constant(u128::from(taken), width),
                None => store.fresh(width),
            };
            write_operand(store, ctx, dest, value);
        }
        Cmov(cond) => {
            let [dest, src] = expect_operands(ctx, inst)?;
            match eval_cond(store, cond) {
                Some(true) => mov(store, ctx, dest, src),
                Some(false) => {}
                None => {
                    let width = dest.width(ctx.addr_width);
                    let fresh = store.fresh(width);
                    write_operand(store, ctx, dest, fresh);
                }
            }
        }
        Nop => {}
        Hlt => return Ok(Step::Halt),
        _ => return Ok(undefined(store, ctx, inst)),
    }
    Ok(Step::Proceed)
}

fn alu_op(mnemonic: Mnemonic) -> BinOp {
    match mnemonic {
        Mnemonic::Add => BinOp::Add,
        Mnemonic::Sub => BinOp::Sub,
        Mnemonic::And => BinOp::And,
        Mnemonic::Or => BinOp::Or,
        Mnemonic::Xor => BinOp::Xor,
        Mnemonic::Shl | Mnemonic::Sal => BinOp::Shl,
        Mnemonic::Shr => BinOp::LShr,
        _ => BinOp::AShr,
    }
}

fn expect_operands<'i, const N: usize, B>(
    ctx: &Ctx<'_, B>,
    inst: &'i Instruction,
) -> ExploreResult<&'i [Operand; N]> {
    inst.operands()
        .try_into()
        .map_err(|_| ExploreError::InvalidInstruction {
            address: ctx.addr,
            text: inst.text().to_string(),
        })
}

/// Unknown mnemonic: memory destinations become fresh unknowns, flags are
/// cleared, and the path stops descending.
fn undefined<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    inst: &Instruction,
) -> Step {
    for operand in inst.operands() {
        if let Operand::Mem(_) = operand {
            let width = operand.width(ctx.addr_width);
            let fresh = store.fresh(width);
            write_operand(store, ctx, operand, fresh);
        }
    }
    store.clear_flags();
    Step::Unknown
}

/// Record a concrete memory operand observed by a flag-deriving
/// instruction into the auxiliary witness set.
fn record_flag_witness<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    inst: &Instruction,
) {
    let relevant = inst.mnemonic().is_some_and(|m| {
        m.affects_flags() || matches!(m, Mnemonic::Cmp | Mnemonic::Test)
    });
    if !relevant {
        return;
    }
    for operand in inst.operands() {
        if let Operand::Mem(mem) = operand {
            let addr = effective_address(store, ctx, mem);
            if let Some(a) = addr.as_u64() {
                if store
                    .memory()
                    .concrete_at(a)
                    .is_some_and(Expr::is_concrete)
                {
                    store.record_witness(a);
                }
            }
            break;
        }
    }
}

fn mov<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    dest: &Operand,
    src: &Operand,
) {
    let width = dest.width(ctx.addr_width);
    let value = read_operand(store, ctx, src, width);
    write_operand(store, ctx, dest, value);
}

fn lea<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    dest: &Operand,
    src: &Operand,
) {
    let Some(mem) = src.as_mem() else {
        return;
    };
    let addr = effective_address(store, ctx, mem);
    let width = dest.width(ctx.addr_width);
    write_operand(store, ctx, dest, Expr::resize(width, addr));
}

fn push_value<B>(store: &mut Store, ctx: &Ctx<'_, B>, value: Expr) {
    let sp = sp_reg(ctx.addr_width);
    let bytes = u128::from(value.width() / 8);
    let new_sp = Expr::sub(
        store.read_reg(sp),
        Expr::constant(bytes, ctx.addr_width),
    );
    store.write_reg(sp, new_sp.clone());
    store.write_mem(&new_sp, value);
}

fn pop<B: BinaryInfo>(store: &mut Store, ctx: &Ctx<'_, B>, dest: &Operand) {
    let width = dest.width(ctx.addr_width);
    let sp = sp_reg(ctx.addr_width);
    let sp_val = store.read_reg(sp);
    let value = store
        .load_mem(&sp_val, width)
        .unwrap_or_else(|| store.fresh(width));
    write_operand(store, ctx, dest, value);
    let new_sp = Expr::add(
        store.read_reg(sp),
        Expr::constant(u128::from(width / 8), ctx.addr_width),
    );
    store.write_reg(sp, new_sp);
}

fn push_all<B: BinaryInfo>(store: &mut Store, ctx: &Ctx<'_, B>, width: Width) {
    let old_sp = store.read_reg(Register::new(Reg64::Rsp, 0, width));
    for reg in [Reg64::Rax, Reg64::Rcx, Reg64::Rdx, Reg64::Rbx] {
        let value = store.read_reg(Register::new(reg, 0, width));
        push_value(store, ctx, value);
    }
    push_value(store, ctx, old_sp);
    for reg in [Reg64::Rbp, Reg64::Rsi, Reg64::Rdi] {
        let value = store.read_reg(Register::new(reg, 0, width));
        push_value(store, ctx, value);
    }
}

fn pop_all<B: BinaryInfo>(store: &mut Store, ctx: &Ctx<'_, B>, width: Width) {
    for reg in [Reg64::Rdi, Reg64::Rsi, Reg64::Rbp] {
        pop(store, ctx, &Operand::Reg(Register::new(reg, 0, width)));
    }
    // skip the stored stack-pointer slot
    let sp = sp_reg(ctx.addr_width);
    let skipped = Expr::add(
        store.read_reg(sp),
        Expr::constant(u128::from(width / 8), ctx.addr_width),
    );
    store.write_reg(sp, skipped);
    for reg in [Reg64::Rbx, Reg64::Rdx, Reg64::Rcx, Reg64::Rax] {
        pop(store, ctx, &Operand::Reg(Register::new(reg, 0, width)));
    }
}

fn arith<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    op: BinOp,
    dest: &Operand,
    src: &Operand,
) {
    let width = dest.width(ctx.addr_width);
    let d = read_operand(store, ctx, dest, width);
    let s = read_operand(store, ctx, src, width);
    let result = Expr::binary(op, d.clone(), s.clone());
    write_operand(store, ctx, dest, result.clone());
    set_status_flags(store, &result);
    let (cf, of) = match op {
        BinOp::Add => (add_carry(&d, &s), add_overflow(&d, &s, &result)),
        BinOp::Sub => (sub_borrow(&d, &s), sub_overflow(&d, &s, &result)),
        _ => (Some(false), Some(false)),
    };
    store.set_flag(Flag::Cf, cf);
    store.set_flag(Flag::Of, of);
}

fn shift<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    op: BinOp,
    dest: &Operand,
    src: &Operand,
) {
    let width = dest.width(ctx.addr_width);
    let count = read_operand(store, ctx, src, 8);
    let Some(raw) = count.as_const() else {
        let fresh = store.fresh(width);
        write_operand(store, ctx, dest, fresh);
        store.clear_flags();
        return;
    };
    let masked = raw & if width == 64 { 0x3f } else { 0x1f };
    if masked == 0 {
        return;
    }
    let d = read_operand(store, ctx, dest, width);
    let result = Expr::binary(op, d, Expr::constant(masked, width));
    write_operand(store, ctx, dest, result.clone());
    set_status_flags(store, &result);
    store.set_flag(Flag::Cf, Some(false));
    store.set_flag(Flag::Of, Some(false));
}

fn rotate<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    left: bool,
    dest: &Operand,
    src: &Operand,
) {
    let width = dest.width(ctx.addr_width);
    let count = read_operand(store, ctx, src, 8);
    let Some(raw) = count.as_const() else {
        let fresh = store.fresh(width);
        write_operand(store, ctx, dest, fresh);
        store.clear_flags();
        return;
    };
    let masked = (raw & if width == 64 { 0x3f } else { 0x1f }) as u32;
    let amount = masked % width;
    if amount == 0 {
        return;
    }
    let d = read_operand(store, ctx, dest, width);
    let result = if let Some(value) = d.as_const() {
        let rotated = if left {
            value << amount | value >> (width - amount)
        } else {
            value >> amount | value << (width - amount)
        };
        Expr::constant(rotated, width)
    } else {
        let (a, b) = if left {
            (amount, width - amount)
        } else {
            (width - amount, amount)
        };
        Expr::binary(
            BinOp::Or,
            Expr::binary(BinOp::Shl, d.clone(), Expr::constant(u128::from(a), width)),
            Expr::binary(BinOp::LShr, d, Expr::constant(u128::from(b), width)),
        )
    };
    write_operand(store, ctx, dest, result.clone());
    let cf = if left { result.lsb() } else { result.msb() };
    store.set_flag(Flag::Cf, cf);
    let of = if masked == 1 {
        if left {
            not3(eq3(result.msb(), cf))
        } else {
            not3(eq3(result.msb(), result.bit(width - 2)))
        }
    } else {
        None
    };
    store.set_flag(Flag::Of, of);
}

fn inc_dec<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    increment: bool,
    dest: &Operand,
) {
    let width = dest.width(ctx.addr_width);
    let d = read_operand(store, ctx, dest, width);
    let one = Expr::constant(1, width);
    let (op, result) = if increment {
        (BinOp::Add, Expr::add(d.clone(), one.clone()))
    } else {
        (BinOp::Sub, Expr::sub(d.clone(), one.clone()))
    };
    write_operand(store, ctx, dest, result.clone());
    set_status_flags(store, &result);
    // CF is architecturally untouched by inc/dec
    let of = match op {
        BinOp::Add => add_overflow(&d, &one, &result),
        _ => sub_overflow(&d, &one, &result),
    };
    store.set_flag(Flag::Of, of);
}

fn with_carry<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    op: BinOp,
    dest: &Operand,
    src: &Operand,
) {
    let width = dest.width(ctx.addr_width);
    let carry = store.flag(Flag::Cf);
    arith(store, ctx, op, dest, src);
    match carry {
        Some(true) => arith(store, ctx, op, dest, &Operand::Imm(1)),
        Some(false) => {}
        None => {
            let fresh = store.fresh(width);
            write_operand(store, ctx, dest, fresh);
        }
    }
}

fn neg<B: BinaryInfo>(store: &mut Store, ctx: &Ctx<'_, B>, dest: &Operand) {
    let width = dest.width(ctx.addr_width);
    let d = read_operand(store, ctx, dest, width);
    let zero = Expr::constant(0, width);
    store.set_flag(Flag::Cf, not3(Expr::eq_value(&d, &zero)));
    write_operand(store, ctx, dest, Expr::neg(d));
}

fn test<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    dest: &Operand,
    src: &Operand,
) {
    let width = dest.width(ctx.addr_width);
    let d = read_operand(store, ctx, dest, width);
    let s = read_operand(store, ctx, src, width);
    let result = Expr::binary(BinOp::And, d, s);
    set_status_flags(store, &result);
    store.set_flag(Flag::Cf, Some(false));
    store.set_flag(Flag::Of, Some(false));
}

fn cmp<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    dest: &Operand,
    src: &Operand,
) {
    let width = dest.width(ctx.addr_width);
    let d = read_operand(store, ctx, dest, width);
    let s = read_operand(store, ctx, src, width);
    let mut result = Expr::sub(d.clone(), s.clone());
    if let Some(value) = result.as_const() {
        // a spuriously concrete difference of two symbols says nothing;
        // regenerate both sides
        if value != 0 && !d.is_concrete() && !s.is_concrete() {
            result = store.fresh(width);
            let fresh = store.fresh(width);
            write_operand(store, ctx, src, fresh);
        }
    }
    set_status_flags(store, &result);
    store.set_flag(Flag::Cf, sub_borrow(&d, &s));
    store.set_flag(Flag::Of, sub_overflow(&d, &s, &result));
}

fn xchg<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    dest: &Operand,
    src: &Operand,
) {
    if dest == src {
        return;
    }
    let width = dest.width(ctx.addr_width);
    let d = read_operand(store, ctx, dest, width);
    let s = read_operand(store, ctx, src, width);
    write_operand(store, ctx, dest, s);
    write_operand(store, ctx, src, d);
}

fn cmpxchg<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    dest: &Operand,
    src: &Operand,
) {
    let width = dest.width(ctx.addr_width);
    let Some(pair) = WideRegs::for_width(width) else {
        return;
    };
    let accumulator = Operand::Reg(pair.lo);
    let lhs = read_operand(store, ctx, &accumulator, width);
    let rhs = read_operand(store, ctx, dest, width);
    match Expr::eq_value(&lhs, &rhs) {
        Some(true) => {
            store.set_flag(Flag::Zf, Some(true));
            mov(store, ctx, dest, src);
        }
        Some(false) => {
            store.set_flag(Flag::Zf, Some(false));
            write_operand(store, ctx, &accumulator, rhs);
        }
        None => {
            store.set_flag(Flag::Zf, None);
            let fresh_dest = store.fresh(width);
            write_operand(store, ctx, dest, fresh_dest);
            let fresh_acc = store.fresh(width);
            write_operand(store, ctx, &accumulator, fresh_acc);
        }
    }
}

fn mul<B: BinaryInfo>(store: &mut Store, ctx: &Ctx<'_, B>, src: &Operand) {
    let width = src.width(ctx.addr_width);
    let Some(pair) = WideRegs::for_width(width) else {
        return;
    };
    let a = store.read_reg(pair.lo);
    let s = read_operand(store, ctx, src, width);
    let product = Expr::widening_mul(false, a, s);
    store.write_reg(pair.lo, Expr::extract(width - 1, 0, product.clone()));
    let upper = Expr::extract(2 * width - 1, width, product);
    store.write_reg(pair.hi, upper.clone());
    let fits = Expr::eq_value(&upper, &Expr::constant(0, width));
    set_mul_flags(store, fits);
}

fn imul<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    inst: &Instruction,
) -> ExploreResult<()> {
    let ops = inst.operands();
    match ops {
        [src] => {
            let width = src.width(ctx.addr_width);
            let Some(pair) = WideRegs::for_width(width) else {
                return Ok(());
            };
            let a = store.read_reg(pair.lo);
            let s = read_operand(store, ctx, src, width);
            let product = Expr::widening_mul(true, a, s);
            let low = Expr::extract(width - 1, 0, product.clone());
            store.write_reg(pair.lo, low.clone());
            store.write_reg(
                pair.hi,
                Expr::extract(2 * width - 1, width, product.clone()),
            );
            let fits =
                Expr::eq_value(&Expr::sign_ext(2 * width, low), &product);
            set_mul_flags(store, fits);
        }
        [dest, src] | [dest, src, _] => {
            let width = dest.width(ctx.addr_width);
            let (lhs, rhs) = match ops {
                [_, src1, src2] => (
                    read_operand(store, ctx, src1, width),
                    read_operand(store, ctx, src2, width),
                ),
                _ => (
                    read_operand(store, ctx, dest, width),
                    read_operand(store, ctx, src, width),
                ),
            };
            let product = Expr::widening_mul(true, lhs, rhs);
            let low = Expr::extract(width - 1, 0, product.clone());
            write_operand(store, ctx, dest, low.clone());
            let fits =
                Expr::eq_value(&Expr::sign_ext(2 * width, low), &product);
            set_mul_flags(store, fits);
        }
        _ => {
            return Err(ExploreError::InvalidInstruction {
                address: ctx.addr,
                text: inst.text().to_string(),
            })
        }
    }
    Ok(())
}

fn div<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    signed: bool,
    src: &Operand,
) {
    let width = src.width(ctx.addr_width);
    let Some(pair) = WideRegs::for_width(width) else {
        return;
    };
    let dividend = Expr::concat(store.read_reg(pair.hi), store.read_reg(pair.lo));
    let s = read_operand(store, ctx, src, width);
    let divisor = Expr::extend(signed, 2 * width, s);
    let (quotient, remainder) = if divisor.as_const() == Some(0) {
        // divide-by-zero is not modeled as a fault
        (store.fresh(2 * width), store.fresh(2 * width))
    } else {
        let (div_op, rem_op) = if signed {
            (BinOp::SDiv, BinOp::SRem)
        } else {
            (BinOp::UDiv, BinOp::URem)
        };
        (
            Expr::binary(div_op, dividend.clone(), divisor.clone()),
            Expr::binary(rem_op, dividend, divisor),
        )
    };
    store.write_reg(pair.lo, Expr::resize(width, quotient));
    store.write_reg(pair.hi, Expr::resize(width, remainder));
    store.clear_flags();
}

fn mov_extend<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    signed: bool,
    dest: &Operand,
    src: &Operand,
) {
    let src_width = src.width(ctx.addr_width);
    let dest_width = dest.width(ctx.addr_width);
    let value = read_operand(store, ctx, src, src_width);
    let value = if dest_width >= src_width {
        Expr::extend(signed, dest_width, value)
    } else {
        Expr::extract(dest_width - 1, 0, value)
    };
    write_operand(store, ctx, dest, value);
}

/// `cbw`/`cwde`/`cdqe`: sign-extend the A register in place.
fn widen_accumulator(store: &mut Store, width: Width) {
    let narrow = Register::new(Reg64::Rax, 0, width);
    let wide = Register::new(Reg64::Rax, 0, width * 2);
    let value = Expr::sign_ext(width * 2, store.read_reg(narrow));
    store.write_reg(wide, value);
}

/// `cwd`/`cdq`/`cqo`: sign-extend the A register into the D:A pair.
fn widen_into_pair(store: &mut Store, width: Width) {
    let Some(pair) = WideRegs::for_width(width) else {
        return;
    };
    let value = Expr::sign_ext(width * 2, store.read_reg(pair.lo));
    store.write_reg(pair.hi, Expr::extract(2 * width - 1, width, value));
}

fn bt<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    base: &Operand,
    offset: &Operand,
) {
    let width = base.width(ctx.addr_width);
    let base_val = read_operand(store, ctx, base, width);
    let offset_val = read_operand(store, ctx, offset, width);
    store.clear_flags_but(Flag::Zf);
    if let Some(raw) = offset_val.as_const() {
        let idx = (raw % u128::from(width)) as Width;
        store.set_flag(Flag::Cf, base_val.bit(idx));
    }
}

fn leave<B: BinaryInfo>(store: &mut Store, ctx: &Ctx<'_, B>) {
    let width = ctx.addr_width;
    let bp = Register::new(Reg64::Rbp, 0, width);
    let value = store.read_reg(bp);
    store.write_reg(sp_reg(width), value);
    pop(store, ctx, &Operand::Reg(bp));
}

fn ret<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    inst: &Instruction,
) -> ExploreResult<Step> {
    let width = ctx.addr_width;
    let sp = sp_reg(width);
    let sp_val = store.read_reg(sp);
    let target = store.load_mem(&sp_val, width);
    if target.is_some() {
        store.remove_mem(&sp_val);
    }
    let mut new_sp = Expr::add(
        sp_val,
        Expr::constant(u128::from(width / 8), width),
    );
    if let Some(operand) = inst.operand(0) {
        let Operand::Imm(bytes) = operand else {
            return Err(ExploreError::InvalidInstruction {
                address: ctx.addr,
                text: inst.text().to_string(),
            });
        };
        new_sp = Expr::add(new_sp, Expr::imm(*bytes, width));
    }
    store.write_reg(sp, new_sp);
    Ok(match target.as_ref().and_then(Expr::as_u64) {
        Some(address) => Step::Return(address),
        None => Step::SymbolicReturn,
    })
}

fn rep<B: BinaryInfo>(
    store: &mut Store,
    ctx: &Ctx<'_, B>,
    inst: &Instruction,
) -> ExploreResult<Step> {
    let prefix = inst.prefix().unwrap_or(RepPrefix::Rep);
    let rcx = Register::full(Reg64::Rcx);
    let zero = Expr::constant(0, 64);
    loop {
        let count = store.read_reg(rcx);
        match Expr::eq_value(&count, &zero) {
            Some(true) => break,
            None => {
                // symbolic count: the loop is unbounded, poison the
                // explicit destination and stop iterating
                if let Some(dest) = inst.operand(0).cloned() {
                    let width = dest.width(ctx.addr_width);
                    let fresh = store.fresh(width);
                    write_operand(store, ctx, &dest, fresh);
                }
                break;
            }
            Some(false) => {
                match dispatch(store, ctx, inst)? {
                    Step::Proceed => {}
                    // inner transformer gave up; effects so far stay
                    Step::Unknown => break,
                    // a control-transfer inner instruction fires once
                    other => return Ok(other),
                }
                let next = Expr::sub(store.read_reg(rcx), Expr::constant(1, 64));
                store.write_reg(rcx, next.clone());
                if Expr::eq_value(&next, &zero) == Some(true) {
                    break;
                }
                match (prefix, store.flag(Flag::Zf)) {
                    (RepPrefix::Repz, Some(false))
                    | (RepPrefix::Repnz, Some(true)) => break,
                    _ => {}
                }
            }
        }
    }
    Ok(Step::Proceed)
}
