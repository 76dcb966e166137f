//! Solver entry points
//!
//! Every entry point follows the same sequence:
//! 1. validate host inputs (no solver state touched on failure);
//! 2. claim the thread's [`RecoveryPoint`];
//! 3. run the solver routine with all of its resources in a [`CallFrame`];
//! 4. move results out of the frame, release the rest, inspect the code.

use crate::error::{Result, SluError};
use crate::handle::{FactorizationHandle, OwnedFactors};
use crate::host::{DenseArray, HostArray, HostArrayMut};
use crate::native::matrix::Buffer;
use crate::native::{AbortKind, MatrixFormat, NativeBuf, NativeMatrix, Statistics, abort, driver};
use crate::options::SluOptions;
use crate::trampoline::{CallFrame, RecoveryPoint, Slot};
use crate::traits::SluScalar;
use crate::view::{self, SparseView, with_matrix};

/// Result of [`direct_solve`]
#[derive(Debug, Clone, PartialEq)]
pub struct DirectSolution {
    /// Solution, shaped like the right-hand side. Holds the unmodified
    /// right-hand side copy when `info != 0`.
    pub x: DenseArray,
    /// 0 on success, the 1-based column of a zero pivot if positive, or the
    /// negated position of an invalid argument
    pub info: i32,
    pub statistics: Statistics,
}

impl DirectSolution {
    /// Treat any nonzero `info` as an error
    pub fn into_solution(self) -> Result<DenseArray> {
        info_to_result(self.info)?;
        Ok(self.x)
    }
}

fn info_to_result(info: i32) -> Result<()> {
    match info {
        0 => Ok(()),
        i if i > 0 => Err(SluError::SolverFailure(format!(
            "Factor is exactly singular (zero pivot in column {i})"
        ))),
        i => Err(SluError::SolverFailure(format!(
            "illegal value of argument {}",
            -i
        ))),
    }
}

/// Solve `op(A)·X = B` with a one-shot factorization.
///
/// `b` (N or N×k) is copied into a column-major buffer of the matrix kind;
/// the caller's buffer is not modified. A singular matrix is reported through
/// [`DirectSolution::info`], not as an error.
pub fn direct_solve(
    a: SparseView<'_>,
    b: HostArray<'_>,
    options: &SluOptions,
) -> Result<DirectSolution> {
    with_matrix!(a, |m| solve_copied(m, &b, options))
}

fn solve_copied<T: SluScalar>(
    a: NativeMatrix<'_, T>,
    b: &HostArray<'_>,
    options: &SluOptions,
) -> Result<DirectSolution> {
    let (mut x, nrhs) = view::dense_copy::<T>(b, a.ncol())?;
    let (info, statistics) = {
        let bvals = x.as_slice_memory_order_mut().ok_or_else(|| {
            SluError::ShapeError("b array copy is not contiguous".into())
        })?;
        run_gssv(a, bvals, nrhs, options)?
    };
    Ok(DirectSolution {
        x: T::into_dense(x),
        info,
        statistics,
    })
}

/// Like [`direct_solve`], but overwrites `b`, which must be Fortran-contiguous
/// and of the matrix kind. Returns `(info, statistics)`.
pub fn direct_solve_in_place(
    a: SparseView<'_>,
    b: HostArrayMut<'_>,
    options: &SluOptions,
) -> Result<(i32, Statistics)> {
    with_matrix!(a, |m| {
        let (bvals, nrhs) = view::dense_in_place(b, m.ncol())?;
        run_gssv(m, bvals, nrhs, options)
    })
}

fn run_gssv<'a, T: SluScalar>(
    a: NativeMatrix<'a, T>,
    bvals: &'a mut [T],
    nrhs: usize,
    options: &SluOptions,
) -> Result<(i32, Statistics)> {
    let n = a.ncol();
    let point = RecoveryPoint::establish()?;
    let mut frame = CallFrame::new(n);
    frame.track(Slot::A);
    frame.a = a;
    frame.track(Slot::B);
    frame.b = NativeMatrix::dense(n, nrhs, Buffer::BorrowedMut(bvals));

    let outcome = point.run(|| {
        frame.track(Slot::PermC);
        frame.perm_c = Some(NativeBuf::zeroed(n));
        frame.track(Slot::PermR);
        frame.perm_r = Some(NativeBuf::zeroed(n));
        frame.track(Slot::Stat);
        frame.stat.init();
        frame.track(Slot::Scaling);
        frame.track(Slot::L);
        frame.track(Slot::U);

        let CallFrame {
            a,
            b,
            perm_c,
            perm_r,
            scaling,
            l,
            u,
            stat,
            ..
        } = &mut frame;
        let (Some(perm_c), Some(perm_r)) = (perm_c.as_mut(), perm_r.as_mut()) else {
            abort(AbortKind::Internal, "permutation vectors missing");
        };
        let info = driver::gssv(options, a, perm_c, perm_r, scaling, l, u, b, stat);
        (info, stat.snapshot())
    });
    frame.release();
    let (info, statistics) = outcome?;

    if info > 0 {
        log::debug!(
            "{}gssv: matrix of order {n} is singular at column {info}",
            T::KIND.prefix()
        );
    }
    if options.print_stat {
        statistics.log(&format!("{}gssv", T::KIND.prefix()));
    }
    Ok((info, statistics))
}

/// Factor A once for repeated solves.
///
/// `incomplete` selects the threshold incomplete factorization. A zero pivot
/// in a complete factorization is an error; the incomplete factorization
/// replaces zero pivots instead.
pub fn factorize(
    a: SparseView<'_>,
    options: &SluOptions,
    incomplete: bool,
) -> Result<FactorizationHandle> {
    with_matrix!(a, |m| {
        let (factors, statistics) = factorize_typed(m, options, incomplete)?;
        Ok(FactorizationHandle::new(
            factors.into(),
            options.clone(),
            incomplete,
            statistics,
        ))
    })
}

fn factorize_typed<T: SluScalar>(
    a: NativeMatrix<'_, T>,
    options: &SluOptions,
    ilu: bool,
) -> Result<(OwnedFactors<T>, Statistics)> {
    let n = a.ncol();
    let point = RecoveryPoint::establish()?;
    let mut frame = CallFrame::new(n);
    frame.track(Slot::A);
    frame.a = a;

    let outcome = point.run(|| {
        if frame.a.format() == Some(MatrixFormat::CompressedRow) {
            let transposed = match frame.a.compressed() {
                Some((stored, _)) => view::transpose_to_csc(&stored),
                None => abort(AbortKind::Internal, "matrix descriptor is empty"),
            };
            frame.a = transposed;
        }
        frame.track(Slot::PermC);
        frame.perm_c = Some(NativeBuf::zeroed(n));
        frame.track(Slot::PermR);
        frame.perm_r = Some(NativeBuf::zeroed(n));
        frame.track(Slot::Stat);
        frame.stat.init();
        frame.track(Slot::Scaling);
        frame.track(Slot::L);
        frame.track(Slot::U);

        let CallFrame {
            a,
            perm_c,
            perm_r,
            scaling,
            l,
            u,
            stat,
            ..
        } = &mut frame;
        let (Some((acol, _)), Some(perm_c), Some(perm_r)) =
            (a.compressed(), perm_c.as_mut(), perm_r.as_mut())
        else {
            abort(AbortKind::Internal, "factorization inputs missing");
        };
        let info = driver::gstrf(options, ilu, &acol, perm_c, perm_r, scaling, l, u, stat);
        (info, stat.snapshot())
    });

    let (info, statistics) = match outcome {
        Ok(done) => done,
        Err(e) => {
            frame.release();
            return Err(e);
        }
    };
    if let Err(e) = info_to_result(info) {
        frame.release();
        return Err(e);
    }

    let (Some(perm_c), Some(perm_r)) = (frame.perm_c.take(), frame.perm_r.take()) else {
        frame.release();
        return Err(SluError::SolverFailure(
            "factorization returned without permutations".into(),
        ));
    };
    let factors = OwnedFactors {
        l: frame.l.take(),
        u: frame.u.take(),
        perm_c,
        perm_r,
        scaling: frame.scaling.take(),
    };
    frame.release();

    let routine = format!("{}{}", T::KIND.prefix(), if ilu { "gsitrf" } else { "gstrf" });
    log::debug!("{routine}: factored matrix of order {n}");
    if options.print_stat {
        statistics.log(&routine);
    }
    Ok((factors, statistics))
}
