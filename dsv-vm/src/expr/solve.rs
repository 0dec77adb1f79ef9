//! Restricted model finding over bitvector terms.
//!
//! Jump-table enumeration needs exactly one solver shape: given the
//! symbolic term an index register holds, find the assignment of its single
//! free variable that makes the term equal a concrete index, then
//! substitute it back. Terms in that position are affine chains over one
//! variable (extends, adds, subtracts, multiplies by a constant), so the
//! inversion walks the chain instead of calling out to a full SMT solver.

use super::{mask, to_signed, BinOp, Expr, Width};

/// Replace every occurrence of the named variable and re-canonicalize.
pub fn substitute(expr: &Expr, name: &str, value: &Expr) -> Expr {
    match expr {
        Expr::Const { .. } => expr.clone(),
        Expr::Var { name: n, .. } if n == name => value.clone(),
        Expr::Var { .. } => expr.clone(),
        Expr::Unary { op, arg } => {
            let arg = substitute(arg, name, value);
            match op {
                super::UnOp::Not => Expr::not(arg),
                super::UnOp::Neg => Expr::neg(arg),
            }
        }
        Expr::Binary { op, lhs, rhs } => Expr::binary(
            *op,
            substitute(lhs, name, value),
            substitute(rhs, name, value),
        ),
        Expr::Extract { hi, lo, arg } => {
            Expr::extract(*hi, *lo, substitute(arg, name, value))
        }
        Expr::Concat { hi, lo } => Expr::concat(
            substitute(hi, name, value),
            substitute(lo, name, value),
        ),
        Expr::Extend { signed, width, arg } => {
            Expr::extend(*signed, *width, substitute(arg, name, value))
        }
    }
}

/// Solve `expr == target` for the single free variable of `expr`.
///
/// Returns the satisfying assignment, or `None` when the term is not an
/// invertible single-variable chain or no assignment exists at the
/// variable's width.
pub fn solve_eq(expr: &Expr, target: u128) -> Option<(String, u128)> {
    expr.single_var()?;
    let mut node = expr;
    let mut target = target & mask(expr.width());
    loop {
        match node {
            Expr::Var { name, width } => {
                if target & !mask(*width) != 0 {
                    return None;
                }
                return Some((name.clone(), target));
            }
            Expr::Binary { op, lhs, rhs } => {
                let width = node.width();
                match (op, lhs.as_const(), rhs.as_const()) {
                    (BinOp::Add, Some(c), None) => {
                        target = target.wrapping_sub(c) & mask(width);
                        node = rhs;
                    }
                    (BinOp::Add, None, Some(c)) => {
                        target = target.wrapping_sub(c) & mask(width);
                        node = lhs;
                    }
                    (BinOp::Sub, None, Some(c)) => {
                        target = target.wrapping_add(c) & mask(width);
                        node = lhs;
                    }
                    (BinOp::Sub, Some(c), None) => {
                        target = c.wrapping_sub(target) & mask(width);
                        node = rhs;
                    }
                    (BinOp::Mul, Some(c), None) if c != 0 && target % c == 0 => {
                        target /= c;
                        node = rhs;
                    }
                    (BinOp::Mul, None, Some(c)) if c != 0 && target % c == 0 => {
                        target /= c;
                        node = lhs;
                    }
                    (BinOp::Xor, Some(c), None) => {
                        target ^= c;
                        node = rhs;
                    }
                    (BinOp::Xor, None, Some(c)) => {
                        target ^= c;
                        node = lhs;
                    }
                    _ => return None,
                }
            }
            Expr::Extend { signed, arg, .. } => {
                let narrow = arg.width();
                if extension_consistent(*signed, target, narrow, node.width()) {
                    target &= mask(narrow);
                    node = arg;
                } else {
                    return None;
                }
            }
            Expr::Extract { lo: 0, arg, .. } => {
                // low slice: any widening of the target that keeps the
                // low bits works; pick the zero-filled one
                node = arg;
            }
            _ => return None,
        }
    }
}

/// Whether `target` at `wide` bits is a valid extension of some value at
/// `narrow` bits.
fn extension_consistent(signed: bool, target: u128, narrow: Width, wide: Width) -> bool {
    let low = target & mask(narrow);
    let expected = if signed {
        (to_signed(low, narrow) as u128) & mask(wide)
    } else {
        low
    };
    expected == target & mask(wide)
}

/// Force a single-variable term to a concrete value: solve, substitute,
/// and demand the result folds to a literal.
pub fn constrain(expr: &Expr, target: u128) -> Option<Expr> {
    let (name, assignment) = solve_eq(expr, target)?;
    let width = var_width(expr, &name)?;
    let solved = substitute(expr, &name, &Expr::constant(assignment, width));
    solved.is_concrete().then_some(solved)
}

fn var_width(expr: &Expr, name: &str) -> Option<Width> {
    match expr.single_var() {
        Some((n, width)) if n == name => Some(width),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverts_affine_chain() {
        // zext64(x32)*8 + 0x601000 == 0x601010  =>  x = 2
        let x = Expr::var("x", 32);
        let addr = Expr::add(
            Expr::mul(Expr::zero_ext(64, x), Expr::constant(8, 64)),
            Expr::constant(0x60_1000, 64),
        );
        let (name, value) = solve_eq(&addr, 0x60_1010).unwrap();
        assert_eq!(name, "x");
        assert_eq!(value, 2);
    }

    #[test]
    fn constrain_yields_literal() {
        let x = Expr::var("x", 64);
        let term = Expr::add(x, Expr::constant(4, 64));
        assert_eq!(constrain(&term, 10), Some(Expr::constant(10, 64)));
    }

    #[test]
    fn rejects_multi_variable_terms() {
        let sum = Expr::add(Expr::var("x", 64), Expr::var("y", 64));
        assert_eq!(solve_eq(&sum, 4), None);
    }

    #[test]
    fn rejects_inconsistent_extension() {
        // zext64(x8) can never equal 0x1_00
        let term = Expr::zero_ext(64, Expr::var("x", 8));
        assert_eq!(solve_eq(&term, 0x100), None);
    }

    #[test]
    fn substitution_re_simplifies() {
        let x = Expr::var("x", 64);
        let term = Expr::add(x.clone(), Expr::constant(1, 64));
        let result = substitute(&term, "x", &Expr::constant(41, 64));
        assert_eq!(result, Expr::constant(42, 64));
    }
}
