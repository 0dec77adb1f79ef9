//! Flag computation and predicate evaluation.
//!
//! Everything here is three-valued: a flag derived from a symbolic result
//! is unknown, and unknown propagates through the condition formulas the
//! way the explorer needs it to — an unknown branch condition explores
//! both sides.

use dsv_asm::{Cond, Flag, Predicate};

use crate::expr::Expr;
use crate::store::Store;

/// Three-valued conjunction.
pub fn and3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

/// Three-valued disjunction.
pub fn or3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

/// Three-valued negation.
pub fn not3(a: Option<bool>) -> Option<bool> {
    a.map(|value| !value)
}

/// Three-valued equivalence.
pub fn eq3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a == b),
        _ => None,
    }
}

/// Set ZF, SF, and PF from a result value.
pub fn set_status_flags(store: &mut Store, result: &Expr) {
    store.set_flag(Flag::Zf, Expr::eq_value(result, &Expr::constant(0, result.width())));
    store.set_flag(Flag::Sf, result.msb());
    store.set_flag(Flag::Pf, result.parity_even());
}

/// Carry out of an addition.
pub fn add_carry(dest: &Expr, src: &Expr) -> Option<bool> {
    let wide = dest.width() + 1;
    Expr::add(
        Expr::zero_ext(wide, dest.clone()),
        Expr::zero_ext(wide, src.clone()),
    )
    .msb()
}

/// Borrow out of a subtraction.
pub fn sub_borrow(dest: &Expr, src: &Expr) -> Option<bool> {
    Expr::ult(dest, src)
}

/// Signed overflow of an addition.
pub fn add_overflow(dest: &Expr, src: &Expr, result: &Expr) -> Option<bool> {
    let case1 = and3(
        and3(dest.msb(), src.msb()),
        not3(result.msb()),
    );
    let case2 = and3(
        and3(not3(dest.msb()), not3(src.msb())),
        result.msb(),
    );
    or3(case1, case2)
}

/// Signed overflow of a subtraction.
pub fn sub_overflow(dest: &Expr, src: &Expr, result: &Expr) -> Option<bool> {
    let case1 = and3(
        and3(dest.msb(), not3(src.msb())),
        not3(result.msb()),
    );
    let case2 = and3(
        and3(not3(dest.msb()), src.msb()),
        result.msb(),
    );
    or3(case1, case2)
}

/// Set CF and OF after a widening multiply: both become the negation of
/// "the result fits the destination width"; every other flag goes unknown.
pub fn set_mul_flags(store: &mut Store, fits: Option<bool>) {
    store.clear_flags();
    store.set_flag(Flag::Cf, not3(fits));
    store.set_flag(Flag::Of, not3(fits));
}

/// Evaluate a condition code over the current flags.
pub fn eval_cond(store: &Store, cond: Cond) -> Option<bool> {
    let cf = store.flag(Flag::Cf);
    let zf = store.flag(Flag::Zf);
    let of = store.flag(Flag::Of);
    let sf = store.flag(Flag::Sf);
    match cond.predicate() {
        Predicate::Above => and3(not3(cf), not3(zf)),
        Predicate::AboveEq => not3(cf),
        Predicate::Below => cf,
        Predicate::BelowEq => or3(cf, zf),
        Predicate::Equal => zf,
        Predicate::NotEqual => not3(zf),
        Predicate::Greater => and3(not3(zf), eq3(sf, of)),
        Predicate::GreaterEq => eq3(sf, of),
        Predicate::Less => not3(eq3(sf, of)),
        Predicate::LessEq => or3(zf, not3(eq3(sf, of))),
        Predicate::FlagIs(flag, expected) => {
            store.flag(flag).map(|value| value == expected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::ExplorerParams;
    use test_case::test_case;

    fn store_with(
        cf: Option<bool>,
        zf: Option<bool>,
        of: Option<bool>,
        sf: Option<bool>,
        pf: Option<bool>,
    ) -> Store {
        let mut store = Store::entry(&ExplorerParams::default());
        store.set_flag(Flag::Cf, cf);
        store.set_flag(Flag::Zf, zf);
        store.set_flag(Flag::Of, of);
        store.set_flag(Flag::Sf, sf);
        store.set_flag(Flag::Pf, pf);
        store
    }

    #[test_case(Cond::A, Some(false), Some(false), Some(true); "above taken")]
    #[test_case(Cond::A, Some(true), Some(false), Some(false); "above not taken on carry")]
    #[test_case(Cond::Be, Some(false), Some(true), Some(true); "below-eq taken on zero")]
    #[test_case(Cond::Z, Some(false), Some(true), Some(true); "zero taken")]
    #[test_case(Cond::Nz, Some(false), Some(true), Some(false); "not-zero not taken")]
    fn flag_formulas(
        cond: Cond,
        cf: Option<bool>,
        zf: Option<bool>,
        expected: Option<bool>,
    ) {
        let store = store_with(cf, zf, Some(false), Some(false), Some(false));
        assert_eq!(eval_cond(&store, cond), expected);
    }

    #[test]
    fn signed_comparisons_use_sign_and_overflow() {
        // SF != OF means less
        let store = store_with(None, Some(false), Some(true), Some(false), None);
        assert_eq!(eval_cond(&store, Cond::L), Some(true));
        assert_eq!(eval_cond(&store, Cond::Ge), Some(false));
        assert_eq!(eval_cond(&store, Cond::G), Some(false));
        assert_eq!(eval_cond(&store, Cond::Le), Some(true));
    }

    #[test]
    fn unknown_flags_poison_only_what_they_touch() {
        let store = store_with(Some(true), None, None, None, None);
        // below depends on CF alone
        assert_eq!(eval_cond(&store, Cond::B), Some(true));
        // above needs ZF too, but CF=1 already decides it
        assert_eq!(eval_cond(&store, Cond::A), Some(false));
        // equality needs the unknown ZF
        assert_eq!(eval_cond(&store, Cond::E), None);
    }

    #[test]
    fn carry_and_overflow_are_three_valued() {
        let a = Expr::constant(0xffff_ffff_ffff_ffff, 64);
        let one = Expr::constant(1, 64);
        assert_eq!(add_carry(&a, &one), Some(true));
        assert_eq!(sub_borrow(&one, &a), Some(true));
        let x = Expr::var("x", 64);
        assert_eq!(add_carry(&x, &one), None);
        let big = Expr::constant(0x7fff_ffff_ffff_ffff, 64);
        let sum = Expr::add(big.clone(), one.clone());
        assert_eq!(add_overflow(&big, &one, &sum), Some(true));
    }
}
