//! Triangular solves, iterative refinement and condition estimation

use super::alloc::NativeBuf;
use super::equil::Equilibration;
use super::matrix::{CompRef, NativeMatrix, PermutedStore, SupernodalStore};
use super::stats::{Phase, SolverStats};
use super::{AbortKind, abort};
use crate::options::{IterRefine, Trans};
use crate::traits::SluScalar;

const ITMAX: usize = 5;

/// Read-only view of a complete set of factors
pub(crate) struct Factors<'f, T: SluScalar> {
    pub l: &'f SupernodalStore<T>,
    pub u: &'f PermutedStore<T>,
    pub perm_c: &'f [i32],
    pub perm_r: &'f [i32],
    pub scaling: Option<&'f Equilibration>,
}

impl<'f, T: SluScalar> Factors<'f, T> {
    pub fn new(
        l: &'f NativeMatrix<'static, T>,
        u: &'f NativeMatrix<'static, T>,
        perm_c: &'f [i32],
        perm_r: &'f [i32],
        scaling: Option<&'f Equilibration>,
    ) -> Self {
        let (Some(ls), Some(us)) = (l.supernodal(), u.permuted()) else {
            abort(AbortKind::Internal, "factors are not allocated");
        };
        let n = perm_r.len();
        if perm_c.len() != n || ls.colptr.len() != n + 1 || us.colend.len() != n {
            abort(AbortKind::Internal, "factor dimensions disagree");
        }
        Self {
            l: ls,
            u: us,
            perm_c,
            perm_r,
            scaling,
        }
    }

    pub fn order(&self) -> usize {
        self.perm_r.len()
    }

    #[inline]
    fn row_scale(&self, i: usize) -> f64 {
        self.scaling.map_or(1.0, |s| s.row_scale(i))
    }

    #[inline]
    fn col_scale(&self, j: usize) -> f64 {
        self.scaling.map_or(1.0, |s| s.col_scale(j))
    }
}

/// Solve `op(A)·X = B` in place for the `nrhs` columns of `b` (leading
/// dimension `ldb`), using the factors of A.
pub(crate) fn gstrs<T: SluScalar>(
    trans: Trans,
    f: &Factors<'_, T>,
    b: &mut [T],
    ldb: usize,
    nrhs: usize,
    phase: Phase,
    stat: &mut SolverStats,
) {
    let n = f.order();
    if nrhs == 0 || n == 0 {
        return;
    }
    if ldb < n || b.len() < ldb * (nrhs - 1) + n {
        abort(
            AbortKind::Internal,
            format!("right-hand side buffer too small for {n}x{nrhs}"),
        );
    }

    let (l, u) = (f.l, f.u);
    let op = |v: T| if trans == Trans::Conj { v.conj() } else { v };
    let mut work = NativeBuf::<T>::zeroed(n);
    let mut flops = 0.0;

    for k in 0..nrhs {
        let col = &mut b[k * ldb..k * ldb + n];
        match trans {
            Trans::NoTrans => {
                for (i, &v) in col.iter().enumerate() {
                    work[f.perm_r[i] as usize] = v.scale(f.row_scale(i));
                }
                for j in 0..n {
                    let yj = work[j];
                    if yj == T::zero() {
                        continue;
                    }
                    let (start, end) = (l.colptr[j] as usize, l.colptr[j + 1] as usize);
                    for idx in start..end {
                        work[l.rowind[idx] as usize] -= l.values[idx] * yj;
                    }
                    flops += 2.0 * (end - start) as f64;
                }
                for j in (0..n).rev() {
                    let (start, end) = (u.colbeg[j] as usize, u.colend[j] as usize);
                    work[j] /= u.values[end - 1];
                    let yj = work[j];
                    if yj == T::zero() {
                        continue;
                    }
                    for idx in start..end - 1 {
                        work[u.rowind[idx] as usize] -= u.values[idx] * yj;
                    }
                    flops += 2.0 * (end - start) as f64;
                }
                for (i, v) in col.iter_mut().enumerate() {
                    *v = work[f.perm_c[i] as usize].scale(f.col_scale(i));
                }
            }
            Trans::Trans | Trans::Conj => {
                for (i, &v) in col.iter().enumerate() {
                    work[f.perm_c[i] as usize] = v.scale(f.col_scale(i));
                }
                for j in 0..n {
                    let (start, end) = (u.colbeg[j] as usize, u.colend[j] as usize);
                    let mut s = work[j];
                    for idx in start..end - 1 {
                        s -= op(u.values[idx]) * work[u.rowind[idx] as usize];
                    }
                    work[j] = s / op(u.values[end - 1]);
                    flops += 2.0 * (end - start) as f64;
                }
                for j in (0..n).rev() {
                    let (start, end) = (l.colptr[j] as usize, l.colptr[j + 1] as usize);
                    let mut s = work[j];
                    for idx in start..end {
                        s -= op(l.values[idx]) * work[l.rowind[idx] as usize];
                    }
                    work[j] = s;
                    flops += 2.0 * (end - start) as f64;
                }
                for (i, v) in col.iter_mut().enumerate() {
                    *v = work[f.perm_r[i] as usize].scale(f.row_scale(i));
                }
            }
        }
    }
    stat.add_ops(phase, flops);
}

/// `r = b - op(A)·x` accumulated in `S`; returns the componentwise backward
/// error `max_i |r_i| / (|op(A)|·|x| + |b|)_i`.
fn residual<S: SluScalar, T: SluScalar>(
    trans: Trans,
    a: &CompRef<'_, T>,
    b: &[T],
    x: &[T],
    r: &mut [T],
    widen: impl Fn(T) -> S,
) -> f64 {
    let n = a.n;
    let mut res = NativeBuf::<S>::zeroed(n);
    let mut bound = NativeBuf::<f64>::zeroed(n);
    for i in 0..n {
        res[i] = widen(b[i]);
        bound[i] = b[i].norm();
    }
    for c in 0..n {
        for (row, v) in a.column(c) {
            let row = row as usize;
            let v = if trans == Trans::Conj { v.conj() } else { *v };
            let (dst, src) = if trans == Trans::NoTrans {
                (row, c)
            } else {
                (c, row)
            };
            res[dst] -= widen(v) * widen(x[src]);
            bound[dst] += v.norm() * x[src].norm();
        }
    }

    let mut berr = 0.0_f64;
    for i in 0..n {
        r[i] = T::from_c64(res[i].to_c64());
        if bound[i] > 0.0 {
            berr = berr.max(res[i].norm() / bound[i]);
        }
    }
    berr
}

/// Improve the solution `x` of `op(A)·x = b` by iterative refinement.
///
/// Each right-hand side is refined until its backward error reaches machine
/// precision, stops halving, or [`ITMAX`] steps were taken.
#[allow(clippy::too_many_arguments)]
pub(crate) fn gsrfs<T: SluScalar>(
    trans: Trans,
    a: &CompRef<'_, T>,
    f: &Factors<'_, T>,
    b: &[T],
    x: &mut [T],
    ldb: usize,
    nrhs: usize,
    refine: IterRefine,
    stat: &mut SolverStats,
) {
    let n = a.n;
    if refine == IterRefine::NoRefine || n == 0 {
        return;
    }
    let mut r = NativeBuf::<T>::zeroed(n);

    for k in 0..nrhs {
        let bk = &b[k * ldb..k * ldb + n];
        let mut last_berr = f64::INFINITY;
        for _ in 0..ITMAX {
            let xk = &x[k * ldb..k * ldb + n];
            let berr = if refine.extended() {
                residual(trans, a, bk, xk, &mut r, |v: T| v.to_c64())
            } else {
                residual(trans, a, bk, xk, &mut r, |v: T| v)
            };
            stat.add_ops(Phase::Refine, 4.0 * a.nnz as f64);
            if berr <= T::EPSILON || berr > 0.5 * last_berr {
                break;
            }
            gstrs(trans, f, &mut r, n, 1, Phase::Refine, stat);
            for (xi, &di) in x[k * ldb..k * ldb + n].iter_mut().zip(r.iter()) {
                *xi += di;
            }
            stat.refine_steps += 1;
            last_berr = berr;
        }
    }
    log::debug!(
        "{}gsrfs: {} refinement steps for {nrhs} right-hand sides",
        T::KIND.prefix(),
        stat.refine_steps
    );
}

/// 1-norm of A: largest column sum of magnitudes
pub(crate) fn one_norm<T: SluScalar>(a: &CompRef<'_, T>) -> f64 {
    (0..a.n)
        .map(|c| a.column(c).map(|(_, v)| v.norm()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Estimate the reciprocal 1-norm condition number from the factors.
///
/// `‖A⁻¹‖₁` is estimated with Hager's method: alternating solves with A and
/// Aᴴ climb towards the column of A⁻¹ with the largest 1-norm.
pub(crate) fn gscon<T: SluScalar>(f: &Factors<'_, T>, anorm: f64, stat: &mut SolverStats) -> f64 {
    let n = f.order();
    if n == 0 {
        return 1.0;
    }
    if anorm == 0.0 {
        return 0.0;
    }

    let mut x = NativeBuf::<T>::filled(n, T::from_real(1.0 / n as f64));
    let mut est = 0.0_f64;
    let mut last_j = usize::MAX;
    for iter in 0..5 {
        gstrs(Trans::NoTrans, f, &mut x, n, 1, Phase::Rcond, stat);
        let new_est: f64 = x.iter().map(|v| v.norm()).sum();
        if iter > 0 && new_est <= est {
            break;
        }
        est = new_est;

        for v in x.iter_mut() {
            *v = v.signum();
        }
        gstrs(Trans::Conj, f, &mut x, n, 1, Phase::Rcond, stat);
        let (j, _) = x
            .iter()
            .enumerate()
            .fold((0, -1.0_f64), |(bj, bm), (i, v)| {
                if v.norm() > bm { (i, v.norm()) } else { (bj, bm) }
            });
        if j == last_j {
            break;
        }
        last_j = j;
        x.fill(T::zero());
        x[j] = T::one();
    }

    if est > 0.0 && est.is_finite() {
        1.0 / (anorm * est)
    } else {
        0.0
    }
}
