//! Self-contained sparse LU solver layer
//!
//! This module plays the part of the C library behind the adapter: it
//! allocates through a tracked allocator ([`alloc`]), writes its results into
//! caller-provided descriptors and reports unrecoverable failures through
//! [`abort`], which never returns. The routines follow the classic driver
//! split:
//!
//! - [`driver::gssv`]: order, factor and solve in one call
//! - [`driver::gstrf`]: order and factor (complete or incomplete)
//! - [`solve::gstrs`]: triangular solves with existing factors
//!
//! Nothing in here knows about host arrays or `Result`s; the adapter layer
//! establishes the recovery point and converts aborts into errors.

pub mod alloc;
pub(crate) mod driver;
pub(crate) mod equil;
pub(crate) mod factor;
pub mod matrix;
pub(crate) mod ordering;
pub(crate) mod solve;
pub mod stats;

pub use alloc::{
    NativeBuf, live_allocations, live_bytes, memory_budget, peak_bytes, set_memory_budget,
};
pub use matrix::{MatrixFormat, NativeMatrix, Ownership};
pub use stats::Statistics;

use std::fmt;

/// Cause of an abrupt termination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortKind {
    /// An allocation failed or exceeded the memory budget
    Allocation,
    /// Internal consistency check failed (e.g. corrupt indices)
    Internal,
}

/// Payload carried from [`abort`] to the recovery point
#[derive(Debug, Clone)]
pub struct AbortSignal {
    pub kind: AbortKind,
    pub message: String,
}

impl fmt::Display for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Terminate the current solver call.
///
/// Control does not return to the caller: the stack unwinds straight to the
/// innermost recovery point of this thread. Calling this without a live
/// recovery point is a bug and panics.
pub(crate) fn abort(kind: AbortKind, message: impl Into<String>) -> ! {
    let message = message.into();
    if !crate::trampoline::recovery_active() {
        panic!("solver abort outside a recovery point: {message}");
    }
    std::panic::resume_unwind(Box::new(AbortSignal { kind, message }))
}

/// Convert a stored index, aborting if it is negative or not below `bound`
#[inline]
pub(crate) fn checked_index(value: i32, bound: usize, what: &str) -> usize {
    match usize::try_from(value) {
        Ok(i) if i < bound => i,
        _ => abort(
            AbortKind::Internal,
            format!("{what} {value} out of range 0..{bound}"),
        ),
    }
}
