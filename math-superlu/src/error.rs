//! Error types surfaced at the solver boundary
//!
//! Three families:
//! - input validation ([`SluError::TypeMismatch`], [`SluError::ShapeError`],
//!   [`SluError::ConfigError`]), raised before the solver is entered;
//! - solver execution ([`SluError::SolverFailure`], [`SluError::MemoryError`]),
//!   raised only after every solver allocation of the call has been released;
//! - misuse ([`SluError::UseAfterRelease`]).

use thiserror::Error;

/// Errors returned by the adapter layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SluError {
    /// A buffer has an element or index type the solver does not accept
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// Dimensions or buffer lengths are inconsistent
    #[error("shape error: {0}")]
    ShapeError(String),
    /// The option mapping contains an unknown key or an invalid value
    #[error("invalid option: {0}")]
    ConfigError(String),
    /// The solver terminated abnormally or reported a fatal diagnostic
    #[error("solver failure: {0}")]
    SolverFailure(String),
    /// The solver ran out of memory (or exceeded its memory budget)
    #[error("out of memory: {0}")]
    MemoryError(String),
    /// A released factorization was used again
    #[error("factorization used after release: {0}")]
    UseAfterRelease(String),
}

impl SluError {
    /// Whether the error was detected before the solver was entered
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SluError::TypeMismatch(_) | SluError::ShapeError(_) | SluError::ConfigError(_)
        )
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SluError>;
