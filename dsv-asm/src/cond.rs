//! Condition codes for `j<cc>`, `set<cc>`, and `cmov<cc>`.

use crate::Flag;

/// The condition-code suffixes accepted after `j`, `set`, and `cmov`.
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
pub enum Cond {
    /// Above: `CF==0 and ZF==0`.
    A,
    /// Above or equal: `CF==0`.
    Ae,
    /// Below: `CF==1`.
    B,
    /// Below or equal: `CF==1 or ZF==1`.
    Be,
    /// Carry: `CF==1`.
    C,
    /// Equal: `ZF==1`.
    E,
    /// Greater: `ZF==0 and SF==OF`.
    G,
    /// Greater or equal: `SF==OF`.
    Ge,
    /// Less: `SF<>OF`.
    L,
    /// Less or equal: `ZF==1 or SF<>OF`.
    Le,
    /// Not above.
    Na,
    /// Not above nor equal.
    Nae,
    /// Not below.
    Nb,
    /// Not below nor equal.
    Nbe,
    /// No carry.
    Nc,
    /// Not equal.
    Ne,
    /// Not greater.
    Ng,
    /// Not greater nor equal.
    Nge,
    /// Not less.
    Nl,
    /// Not less nor equal.
    Nle,
    /// No overflow: `OF==0`.
    No,
    /// No parity: `PF==0`.
    Np,
    /// No sign: `SF==0`.
    Ns,
    /// Not zero: `ZF==0`.
    Nz,
    /// Overflow: `OF==1`.
    O,
    /// Parity: `PF==1`.
    P,
    /// Parity even: `PF==1`.
    Pe,
    /// Parity odd: `PF==0`.
    Po,
    /// Sign: `SF==1`.
    S,
    /// Zero: `ZF==1`.
    Z,
}

/// The canonical predicate behind a condition code, over the five status
/// flags. Aliases (`c`/`b`/`nae`, `z`/`e`, ...) collapse onto one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// `CF==0 and ZF==0`
    Above,
    /// `CF==0`
    AboveEq,
    /// `CF==1`
    Below,
    /// `CF==1 or ZF==1`
    BelowEq,
    /// `ZF==1`
    Equal,
    /// `ZF==0`
    NotEqual,
    /// `ZF==0 and SF==OF`
    Greater,
    /// `SF==OF`
    GreaterEq,
    /// `SF<>OF`
    Less,
    /// `ZF==1 or SF<>OF`
    LessEq,
    /// A single flag equals the given literal.
    FlagIs(Flag, bool),
}

impl Cond {
    /// The canonical predicate this condition decodes to.
    pub const fn predicate(self) -> Predicate {
        use Predicate::*;
        match self {
            Cond::A | Cond::Nbe => Above,
            Cond::Ae | Cond::Nb | Cond::Nc => AboveEq,
            Cond::B | Cond::C | Cond::Nae => Below,
            Cond::Be | Cond::Na => BelowEq,
            Cond::E | Cond::Z => Equal,
            Cond::Ne | Cond::Nz => NotEqual,
            Cond::G | Cond::Nle => Greater,
            Cond::Ge | Cond::Nl => GreaterEq,
            Cond::L | Cond::Nge => Less,
            Cond::Le | Cond::Ng => LessEq,
            Cond::O => FlagIs(Flag::Of, true),
            Cond::No => FlagIs(Flag::Of, false),
            Cond::P | Cond::Pe => FlagIs(Flag::Pf, true),
            Cond::Np | Cond::Po => FlagIs(Flag::Pf, false),
            Cond::S => FlagIs(Flag::Sf, true),
            Cond::Ns => FlagIs(Flag::Sf, false),
        }
    }

    /// Upper bound on a table index guarded by this taken-branch condition.
    ///
    /// A jump table is bounded by a comparison of the index against a
    /// constant followed by a taken out-of-range branch. A strict
    /// above/greater branch at boundary `b` leaves indices `0..=b` in
    /// range, a non-strict one leaves `0..b`; conditions that do not
    /// compare for above/greater bound nothing.
    pub fn index_upper_bound(self, boundary: u64) -> Option<u64> {
        match self.predicate() {
            Predicate::Above | Predicate::Greater => boundary.checked_add(1),
            Predicate::AboveEq | Predicate::GreaterEq => Some(boundary),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("a", Predicate::Above)]
    #[test_case("nbe", Predicate::Above)]
    #[test_case("nc", Predicate::AboveEq)]
    #[test_case("nae", Predicate::Below)]
    #[test_case("z", Predicate::Equal)]
    #[test_case("nge", Predicate::Less)]
    #[test_case("pe", Predicate::FlagIs(Flag::Pf, true))]
    #[test_case("ns", Predicate::FlagIs(Flag::Sf, false))]
    fn aliases_collapse(name: &str, expected: Predicate) {
        let cond: Cond = name.parse().unwrap();
        assert_eq!(cond.predicate(), expected);
    }

    #[test_case(Cond::A, 10, Some(11); "strict above")]
    #[test_case(Cond::Ae, 10, Some(10); "non-strict above")]
    #[test_case(Cond::G, 4, Some(5); "strict greater")]
    #[test_case(Cond::Nl, 4, Some(4); "not less is greater-or-equal")]
    #[test_case(Cond::B, 4, None; "below bounds nothing")]
    #[test_case(Cond::E, 4, None; "equality bounds nothing")]
    fn index_bounds(cond: Cond, boundary: u64, expected: Option<u64>) {
        assert_eq!(cond.index_upper_bound(boundary), expected);
    }
}
