use thiserror::Error;

/// Errors raised while parsing canonical instruction text.
///
/// The normalizer contract guarantees well-formed input, so most token-level
/// oddities are kept as opaque operands instead of failing the whole
/// instruction; only structural violations surface here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The instruction text was empty after prefix stripping.
    #[error("empty instruction text")]
    Empty,
    /// A memory operand opened a bracket that never closes.
    #[error("unterminated memory operand: {0}")]
    UnterminatedBracket(String),
    /// An immediate token was not a valid decimal or `0x` hexadecimal value.
    #[error("malformed immediate: {0}")]
    BadImmediate(String),
    /// A scale factor in an effective address was not a power-of-two constant.
    #[error("malformed address scale: {0}")]
    BadScale(String),
}
