use thiserror::Error;

/// Canonical Flint error taxonomy used across crates.
///
/// Classification guidance:
/// - [`FlintError::Planning`]: name/type/semantic failures discovered while analyzing a query
/// - [`FlintError::Internal`]: analyzer/rule bugs (never caused by user input)
/// - [`FlintError::InvalidConfig`]: configuration contract violations
/// - [`FlintError::Unsupported`]: valid query shape that the current version intentionally rejects
/// - [`FlintError::Io`]: raw filesystem/network IO failures from std APIs
#[derive(Debug, Error)]
pub enum FlintError {
    /// Invalid or inconsistent configuration state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Query analysis failures surfaced to the user.
    ///
    /// Examples:
    /// - unknown table/column/function
    /// - ambiguous column reference
    /// - type mismatch in expressions
    /// - DISTINCT on an aggregate that does not support it
    #[error("planning error: {0}")]
    Planning(String),

    /// Analyzer implementation defects: a rule batch failed to reach a fixed
    /// point within its iteration budget, or a rule produced a plan that
    /// violates an internal invariant.
    ///
    /// These indicate a bug in a rule, not a problem with the query.
    #[error("internal error: {0}")]
    Internal(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature/shape not implemented in the current version.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Standard Flint result alias.
pub type Result<T> = std::result::Result<T, FlintError>;
