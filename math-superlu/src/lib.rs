//! Safe adapter over a SuperLU-style sparse direct solver
//!
//! This crate exposes sparse LU solves to host code working with `ndarray`
//! arrays, while the solver layer underneath follows the conventions of a C
//! library: caller-owned descriptors, integer return codes and abrupt
//! termination on fatal errors.
//!
//! # Features
//!
//! - **Matrix views**: compressed column/row matrices borrowed from host arrays
//!   without copying
//! - **Options**: key/value mappings translated into typed solver options
//! - **Recovery**: solver aborts become [`SluError`]s, with every solver
//!   resource released
//! - **Direct solves**: one-shot `A·X = B`, copying or in place
//! - **Factorizations**: complete or incomplete LU kept for repeated solves
//! - **Element kinds**: f32, f64, Complex32, Complex64
//!
//! # Example
//!
//! ```ignore
//! use math_audio_superlu::{SluOptions, SparseView, direct_solve, factorize};
//! use ndarray::array;
//!
//! let values = array![4.0, 1.0, 1.0, 3.0];
//! let rows = array![0, 1, 0, 1];
//! let cols = array![0, 2, 4];
//! let a = SparseView::csc(2, 4, &values, &rows, &cols)?;
//! let b = array![1.0, 2.0];
//!
//! let solution = direct_solve(a, (&b).into(), &SluOptions::default())?;
//! let x = solution.into_solution()?.into_f64();
//! ```

mod error;
mod facade;
pub mod handle;
pub mod host;
pub mod native;
pub mod options;
mod trampoline;
pub mod traits;
pub mod view;

pub use error::{Result, SluError};
pub use facade::{DirectSolution, direct_solve, direct_solve_in_place, factorize};
pub use handle::{CscFactor, FactorizationHandle};
pub use host::{DenseArray, HostArray, HostArrayMut, HostDType};
pub use traits::{ElementKind, SluScalar};
pub use view::SparseView;

// Re-export option types
pub use options::{
    ColPerm, DropRule, Fact, IluNorm, IterRefine, Milu, OPTION_TABLE, OptionSpec, RowPerm,
    SluOptions, Trans, lookup_option,
};

// Re-export solver-layer bookkeeping
pub use native::{
    MatrixFormat, Ownership, Statistics, live_allocations, live_bytes, memory_budget, peak_bytes,
    set_memory_budget,
};
