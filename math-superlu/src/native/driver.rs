//! Driver routines: ordering, scaling, factorization and solve in sequence
//!
//! Both drivers write into descriptors and buffers owned by the caller and
//! report through their return code:
//! - `0`: success
//! - `> 0`: the 1-based column at which a zero pivot was met
//! - `< 0`: the 1-based position of an invalid argument

use super::alloc::NativeBuf;
use super::equil::{self, Equilibration};
use super::factor::{self, FactorInput};
use super::matrix::{CompRef, MatrixFormat, NativeMatrix};
use super::ordering;
use super::solve::{self, Factors};
use super::stats::{Phase, SolverStats};
use crate::options::{Fact, IterRefine, RowPerm, SluOptions, Trans};
use crate::traits::SluScalar;

/// Equilibrate, order and factor the compressed-column matrix `a`.
///
/// `perm_c` and `perm_r` must have length `n`; `scaling`, `l` and `u` are
/// filled in. Reciprocal pivot growth and condition number are recorded in
/// `stat` when the options ask for them and the factorization succeeded.
#[allow(clippy::too_many_arguments)]
pub(crate) fn gstrf<T: SluScalar>(
    options: &SluOptions,
    ilu: bool,
    a: &CompRef<'_, T>,
    perm_c: &mut [i32],
    perm_r: &mut [i32],
    scaling: &mut Option<Equilibration>,
    l: &mut NativeMatrix<'static, T>,
    u: &mut NativeMatrix<'static, T>,
    stat: &mut SolverStats,
) -> i32 {
    if options.equil {
        *scaling = Some(stat.timed(Phase::Equil, |_| equil::gsequ(a)));
    }
    stat.timed(Phase::ColPerm, |_| {
        ordering::get_perm_c(options.col_perm, options.symmetric_mode, a, perm_c)
    });
    let pre: Option<NativeBuf<i32>> = (options.row_perm == RowPerm::LargeDiag)
        .then(|| stat.timed(Phase::RowPerm, |_| ordering::large_diag(a, scaling.as_ref())));

    let input = FactorInput {
        a: *a,
        perm_c,
        pre: pre.as_deref(),
        scaling: scaling.as_ref(),
    };
    let info = stat.timed(Phase::Fact, |stat| {
        factor::gstrf(options, ilu, &input, perm_r, l, u, stat)
    });
    if info != 0 {
        return info;
    }

    if options.pivot_growth {
        stat.rpg = Some(factor::pivot_growth(&input, u));
    }
    if options.condition_number {
        let anorm = solve::one_norm(a);
        let factors = Factors::new(l, u, input.perm_c, perm_r, input.scaling);
        let rcond = stat.timed(Phase::Rcond, |stat| solve::gscon(&factors, anorm, stat));
        stat.rcond = Some(rcond);
    }
    0
}

/// Solve `op(A)·X = B` from scratch: factor A, then overwrite B with X.
///
/// A row-compressed `a` is used as the column-compressed form of Aᵀ, so no
/// copy is made; the requested operation is adjusted instead. On a positive
/// return code B is left untouched.
#[allow(clippy::too_many_arguments)]
pub(crate) fn gssv<T: SluScalar>(
    options: &SluOptions,
    a: &NativeMatrix<'_, T>,
    perm_c: &mut [i32],
    perm_r: &mut [i32],
    scaling: &mut Option<Equilibration>,
    l: &mut NativeMatrix<'static, T>,
    u: &mut NativeMatrix<'static, T>,
    b: &mut NativeMatrix<'_, T>,
    stat: &mut SolverStats,
) -> i32 {
    if options.fact != Fact::DoFact {
        return -1;
    }
    let Some((acol, format)) = a.compressed() else {
        return -2;
    };
    let n = acol.n;
    if a.nrow() != a.ncol() || perm_c.len() != n || perm_r.len() != n {
        return -2;
    }

    let (b_rows, nrhs) = (b.nrow(), b.ncol());
    let Some(dense) = b.dense_mut() else {
        return -7;
    };
    let ldb = dense.lda;
    let Some(bvals) = dense.values.as_mut_slice() else {
        return -7;
    };
    if b_rows != n || ldb < n.max(1) || bvals.len() < ldb * nrhs.saturating_sub(1) + n {
        return -7;
    }

    // the stored arrays describe Aᵀ for row-compressed input
    let (trans, conjugate) = match (format, options.trans) {
        (MatrixFormat::CompressedRow, Trans::NoTrans) => (Trans::Trans, false),
        (MatrixFormat::CompressedRow, Trans::Trans) => (Trans::NoTrans, false),
        (MatrixFormat::CompressedRow, Trans::Conj) => (Trans::NoTrans, true),
        (_, t) => (t, false),
    };

    let info = gstrf(options, false, &acol, perm_c, perm_r, scaling, l, u, stat);
    if info != 0 {
        return info;
    }

    if conjugate {
        bvals.iter_mut().for_each(|v| *v = v.conj());
    }
    let original =
        (options.iter_refine != IterRefine::NoRefine).then(|| NativeBuf::from_slice(bvals));
    let factors = Factors::new(l, u, perm_c, perm_r, scaling.as_ref());
    stat.timed(Phase::Solve, |stat| {
        solve::gstrs(trans, &factors, bvals, ldb, nrhs, Phase::Solve, stat)
    });
    if let Some(original) = original {
        stat.timed(Phase::Refine, |stat| {
            solve::gsrfs(
                trans,
                &acol,
                &factors,
                &original,
                bvals,
                ldb,
                nrhs,
                options.iter_refine,
                stat,
            )
        });
    }
    if conjugate {
        bvals.iter_mut().for_each(|v| *v = v.conj());
    }
    0
}
