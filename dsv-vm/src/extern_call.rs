//! External-symbol call abstraction.
//!
//! Calls that leave the disassembled image are not descended into. A call
//! to a known termination symbol ends the path; any other external call
//! clobbers the caller-saved registers, makes the flags unknown, and for
//! the allocator family returns a concrete heap pointer so downstream
//! loads stay resolvable.

use dsv_asm::{Reg64, Register};
use tracing::debug;

use crate::consts::ExplorerParams;
use crate::expr::Expr;
use crate::store::Store;

/// Library symbols that never return.
pub const TERMINATION_SYMBOLS: [&str; 16] = [
    "__stack_chk_fail",
    "__overflow",
    "err",
    "error",
    "error_at_line",
    "errx",
    "exit",
    "_exit",
    "abort",
    "raise",
    "__assert_fail",
    "g_assertion_message_expr",
    "g_assertion_message",
    "g_abort",
    "obstack_alloc_failed_handler",
    "pthread_exit",
];

/// Strip linkage decoration from a symbol name.
fn base_name(symbol: &str) -> &str {
    symbol.split('@').next().unwrap_or(symbol)
}

/// Whether a call to this symbol terminates the path.
pub fn is_termination_symbol(symbol: &str) -> bool {
    TERMINATION_SYMBOLS.contains(&base_name(symbol))
}

/// Whether this symbol is a modeled heap allocator.
pub fn is_allocator(symbol: &str) -> bool {
    matches!(base_name(symbol), "malloc" | "calloc" | "realloc")
}

/// The requested allocation size, clamped; symbolic sizes take the clamp.
fn allocation_size(store: &Store, symbol: &str, params: &ExplorerParams) -> u64 {
    let read = |reg: Reg64| store.reg64(reg).as_u64();
    let requested = match base_name(symbol) {
        "malloc" => read(Reg64::Rdi),
        "calloc" => match (read(Reg64::Rdi), read(Reg64::Rsi)) {
            (Some(count), Some(each)) => count.checked_mul(each),
            _ => None,
        },
        _ => read(Reg64::Rsi),
    };
    requested
        .unwrap_or(params.max_malloc)
        .min(params.max_malloc)
}

/// Apply the canned effect of calling an external symbol.
///
/// Caller-saved registers become fresh unknowns and the flags go unknown;
/// memory is left alone. Allocators instead leave a concrete heap pointer
/// in RAX. The return address the call pushed is consumed, since the
/// callee's `ret` is what would have consumed it.
pub fn apply_external_call(
    store: &mut Store,
    params: &ExplorerParams,
    symbol: &str,
) {
    let allocation = is_allocator(symbol)
        .then(|| allocation_size(store, symbol, params));

    for reg in Reg64::CALLER_SAVED {
        let fresh = store.fresh(64);
        store.write_reg(Register::full(reg), fresh);
    }
    store.clear_flags();

    if let Some(size) = allocation {
        let chunk = store.allocate(size);
        debug!(symbol, size, chunk = format_args!("{chunk:#x}"), "modeled allocation");
        store.write_reg(
            Register::full(Reg64::Rax),
            Expr::constant(u128::from(chunk), 64),
        );
    }

    // drop the pushed return address the way the callee's ret would
    let width = store.addr_width();
    let sp = Register::new(Reg64::Rsp, 0, width);
    let sp_val = store.read_reg(sp);
    store.remove_mem(&sp_val);
    let restored = Expr::add(
        sp_val,
        Expr::constant(u128::from(width / 8), width),
    );
    store.write_reg(sp, restored);
}
