//! Exact fixed-point decimal arithmetic for SQL evaluation.
//!
//! This library provides two exact-precision decimal types backed by
//! two's-complement integers scaled by a power of ten:
//! - [`Numeric`]: 128-bit, 9 fractional digits (precision 38, scale 9)
//! - [`BigNumeric`]: 256-bit, 38 fractional digits (precision 76, scale 38)
//!
//! Along with the value types it ships the streaming aggregators a query
//! engine needs to fold billions of rows without losing a digit: SUM/AVG,
//! variance, covariance and correlation, all mergeable and serializable.

mod aggregate;
mod bignumeric;
mod fixed_int;
mod format;
mod numeric;
mod parse;

pub use aggregate::{
    BigNumericCorrelationAggregator, BigNumericCovarianceAggregator,
    BigNumericSumAggregator, BigNumericVarianceAggregator, NumericCorrelationAggregator,
    NumericCovarianceAggregator, NumericSumAggregator, NumericVarianceAggregator,
};
pub use bignumeric::BigNumeric;
pub use numeric::Numeric;

use thiserror::Error;

/// Failure kinds surfaced by every fallible operation.
///
/// Statistical getters with an insufficient sample count return `None`
/// rather than an error, matching SQL NULL semantics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NumericError {
    /// The input text or encoding does not represent a valid value.
    #[error("invalid numeric value: {0}")]
    InvalidValue(String),
    /// The exact result lies outside the representable range.
    #[error("numeric overflow: {0}")]
    Overflow(String),
    /// Division or modulo by zero.
    #[error("division by zero: {0}")]
    DivisionByZero(String),
    /// The operation's precondition was violated, e.g. converting a
    /// non-finite double or raising a negative base to a fractional power.
    #[error("{0}")]
    FailedPrecondition(String),
    /// An internal invariant failed. Not reachable through the public API.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NumericError {
    /// Appends operation context (operand texts, operation name) to the
    /// payload, keeping the error kind.
    pub(crate) fn annotate(self, context: &str) -> Self {
        let compose = |payload: String| {
            if payload.is_empty() {
                context.to_string()
            } else {
                format!("{payload}: {context}")
            }
        };
        match self {
            Self::InvalidValue(p) => Self::InvalidValue(compose(p)),
            Self::Overflow(p) => Self::Overflow(compose(p)),
            Self::DivisionByZero(p) => Self::DivisionByZero(compose(p)),
            Self::FailedPrecondition(p) => Self::FailedPrecondition(compose(p)),
            Self::Internal(p) => Self::Internal(compose(p)),
        }
    }
}

/// Result type alias for fallible decimal operations.
pub type Result<T> = core::result::Result<T, NumericError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            NumericError::Overflow("1 + 2".into()).to_string(),
            "numeric overflow: 1 + 2"
        );
        assert_eq!(
            NumericError::DivisionByZero("AVG".into()).to_string(),
            "division by zero: AVG"
        );
        assert_eq!(
            NumericError::InvalidValue("abc".into()).to_string(),
            "invalid numeric value: abc"
        );
    }

    #[test]
    fn test_error_annotate() {
        let err = NumericError::Overflow(String::new()).annotate("POW(2, 200)");
        assert_eq!(err.to_string(), "numeric overflow: POW(2, 200)");
        let err = NumericError::FailedPrecondition("bad base".into()).annotate("POW(-2, 0.5)");
        assert_eq!(err.to_string(), "bad base: POW(-2, 0.5)");
    }
}
