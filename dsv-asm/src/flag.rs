//! Status-flag naming.

/// The status flags the semantics model.
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
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum Flag {
    /// Carry.
    Cf = 0,
    /// Zero.
    Zf,
    /// Overflow.
    Of,
    /// Sign.
    Sf,
    /// Parity.
    Pf,
}

impl Flag {
    /// Number of modeled flags.
    pub const COUNT: usize = 5;

    /// Index into a fixed flag array.
    pub const fn index(self) -> usize {
        self as usize
    }
}
