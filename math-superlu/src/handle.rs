//! Persistent LU factors
//!
//! A [`FactorizationHandle`] owns every buffer of a factorization: L, U, both
//! permutations and the equilibration scalings. Solves only read the factors.
//! After [`FactorizationHandle::release`] (or drop) the buffers are gone and
//! every method reports [`SluError::UseAfterRelease`].

use crate::error::{Result, SluError};
use crate::host::{DenseArray, HostArray};
use crate::native::equil::Equilibration;
use crate::native::matrix::Buffer;
use crate::native::solve::{self, Factors};
use crate::native::stats::Phase;
use crate::native::{AbortKind, NativeBuf, NativeMatrix, Statistics, abort};
use crate::options::{SluOptions, Trans};
use crate::trampoline::{CallFrame, RecoveryPoint, Slot};
use crate::traits::{ElementKind, SluScalar};
use crate::view;
use ndarray::Array1;
use num_complex::{Complex32, Complex64};
use std::cell::Cell;
use std::marker::PhantomData;

/// Factors of one element kind, all allocated by the solver layer
#[derive(Debug)]
pub(crate) struct OwnedFactors<T: SluScalar> {
    pub l: NativeMatrix<'static, T>,
    pub u: NativeMatrix<'static, T>,
    pub perm_c: NativeBuf<i32>,
    pub perm_r: NativeBuf<i32>,
    pub scaling: Option<Equilibration>,
}

impl<T: SluScalar> OwnedFactors<T> {
    fn view(&self) -> Factors<'_, T> {
        Factors::new(
            &self.l,
            &self.u,
            &self.perm_c,
            &self.perm_r,
            self.scaling.as_ref(),
        )
    }

    fn nnz(&self) -> usize {
        self.l.nnz() + self.u.nnz()
    }

    /// Scale factors of one side, ones where that side was left unscaled
    fn scales(&self, rows: bool) -> Array1<f64> {
        Array1::from_shape_fn(self.perm_r.len(), |i| match &self.scaling {
            Some(s) if rows => s.row_scale(i),
            Some(s) => s.col_scale(i),
            None => 1.0,
        })
    }

    /// Solve in place under a fresh recovery point
    fn solve(&self, b: &mut [T], nrhs: usize, trans: Trans) -> Result<Statistics> {
        let n = self.perm_r.len();
        let point = RecoveryPoint::establish()?;
        let mut frame = CallFrame::<T>::new(n);
        frame.track(Slot::B);
        frame.b = NativeMatrix::dense(n, nrhs, Buffer::BorrowedMut(b));

        let outcome = point.run(|| {
            frame.track(Slot::Stat);
            frame.stat.init();
            let CallFrame { b, stat, .. } = &mut frame;
            let Some(dense) = b.dense_mut() else {
                abort(AbortKind::Internal, "right-hand side descriptor missing");
            };
            let ldb = dense.lda;
            let Some(bvals) = dense.values.as_mut_slice() else {
                abort(AbortKind::Internal, "right-hand side is read-only");
            };
            let factors = self.view();
            stat.timed(Phase::Solve, |stat| {
                solve::gstrs(trans, &factors, bvals, ldb, nrhs, Phase::Solve, stat)
            });
            stat.snapshot()
        });
        frame.release();
        outcome
    }

    /// L with its unit diagonal, as compressed columns
    fn l_csc(&self) -> Result<CscFactor> {
        let ls = self
            .l
            .supernodal()
            .ok_or_else(|| SluError::SolverFailure("lower factor missing".into()))?;
        let n = self.l.ncol();
        let mut indptr = Vec::with_capacity(n + 1);
        let mut indices = Vec::with_capacity(ls.nnz + n);
        let mut data = Vec::with_capacity(ls.nnz + n);
        indptr.push(0);
        for j in 0..n {
            indices.push(j as i32);
            data.push(T::one());
            let (start, end) = (ls.colptr[j] as usize, ls.colptr[j + 1] as usize);
            indices.extend_from_slice(&ls.rowind[start..end]);
            data.extend_from_slice(&ls.values[start..end]);
            indptr.push(indices.len() as i32);
        }
        Ok(CscFactor::new(n, indptr, indices, data))
    }

    fn u_csc(&self) -> Result<CscFactor> {
        let us = self
            .u
            .permuted()
            .ok_or_else(|| SluError::SolverFailure("upper factor missing".into()))?;
        let n = self.u.ncol();
        let mut indptr = Vec::with_capacity(n + 1);
        let mut indices = Vec::with_capacity(us.nnz);
        let mut data = Vec::with_capacity(us.nnz);
        indptr.push(0);
        for j in 0..n {
            let (start, end) = (us.colbeg[j] as usize, us.colend[j] as usize);
            indices.extend_from_slice(&us.rowind[start..end]);
            data.extend_from_slice(&us.values[start..end]);
            indptr.push(indices.len() as i32);
        }
        Ok(CscFactor::new(n, indptr, indices, data))
    }
}

#[derive(Debug)]
pub(crate) enum AnyFactors {
    Single(OwnedFactors<f32>),
    Double(OwnedFactors<f64>),
    ComplexSingle(OwnedFactors<Complex32>),
    ComplexDouble(OwnedFactors<Complex64>),
}

macro_rules! with_factors {
    ($factors:expr, |$f:ident| $body:expr) => {
        match $factors {
            AnyFactors::Single($f) => $body,
            AnyFactors::Double($f) => $body,
            AnyFactors::ComplexSingle($f) => $body,
            AnyFactors::ComplexDouble($f) => $body,
        }
    };
}

macro_rules! impl_from_factors {
    ($t:ty, $variant:ident) => {
        impl From<OwnedFactors<$t>> for AnyFactors {
            fn from(factors: OwnedFactors<$t>) -> Self {
                AnyFactors::$variant(factors)
            }
        }
    };
}

impl_from_factors!(f32, Single);
impl_from_factors!(f64, Double);
impl_from_factors!(Complex32, ComplexSingle);
impl_from_factors!(Complex64, ComplexDouble);

/// Sparse factor exported in compressed sparse column form.
///
/// Rows and columns are numbered in elimination order, so `L·U` equals
/// `Pr·diag(R)·A·diag(C)·Pc` with the handle's permutations and the scale
/// factors from [`FactorizationHandle::row_scale`] and
/// [`FactorizationHandle::col_scale`].
#[derive(Debug, Clone, PartialEq)]
pub struct CscFactor {
    pub shape: (usize, usize),
    pub indptr: Array1<i32>,
    pub indices: Array1<i32>,
    pub data: DenseArray,
}

impl CscFactor {
    fn new<T: SluScalar>(n: usize, indptr: Vec<i32>, indices: Vec<i32>, data: Vec<T>) -> Self {
        Self {
            shape: (n, n),
            indptr: Array1::from(indptr),
            indices: Array1::from(indices),
            data: T::into_dense(Array1::from(data).into_dyn()),
        }
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }
}

/// Owner of a completed factorization.
///
/// Solving takes `&mut self` (statistics are updated), so one handle is never
/// used by two solves at once. The handle may move between threads but is not
/// shared between them.
#[derive(Debug)]
pub struct FactorizationHandle {
    n: usize,
    kind: ElementKind,
    incomplete: bool,
    options: SluOptions,
    statistics: Statistics,
    factors: Option<AnyFactors>,
    _not_sync: PhantomData<Cell<()>>,
}

impl FactorizationHandle {
    pub(crate) fn new(
        factors: AnyFactors,
        options: SluOptions,
        incomplete: bool,
        statistics: Statistics,
    ) -> Self {
        let (n, kind) = with_factors!(&factors, |f| (f.perm_r.len(), f.l.kind()));
        Self {
            n,
            kind,
            incomplete,
            options,
            statistics,
            factors: Some(factors),
            _not_sync: PhantomData,
        }
    }

    fn factors(&self, operation: &str) -> Result<&AnyFactors> {
        self.factors.as_ref().ok_or_else(|| {
            SluError::UseAfterRelease(format!("cannot {operation}: factors were released"))
        })
    }

    /// Solve `A·x = rhs`
    pub fn solve(&mut self, rhs: HostArray<'_>) -> Result<DenseArray> {
        self.solve_with(rhs, Trans::NoTrans)
    }

    /// Solve `op(A)·x = rhs` for a 1-D or 2-D right-hand side.
    ///
    /// The right-hand side is copied (and cast to the factor kind); the
    /// factors are left unchanged.
    pub fn solve_with(&mut self, rhs: HostArray<'_>, trans: Trans) -> Result<DenseArray> {
        let n = self.n;
        let (x, stats) = with_factors!(self.factors("solve")?, |f| {
            let (mut x, nrhs) = view::dense_copy(&rhs, n)?;
            let bvals = x.as_slice_memory_order_mut().ok_or_else(|| {
                SluError::ShapeError("b array copy is not contiguous".into())
            })?;
            let stats = f.solve(bvals, nrhs, trans)?;
            (SluScalar::into_dense(x), stats)
        });
        self.statistics.accumulate_solve(&stats);
        if self.options.print_stat {
            stats.log(&format!("{}gstrs", self.kind.prefix()));
        }
        Ok(x)
    }

    /// Free all factor buffers. Further calls do nothing.
    pub fn release(&mut self) {
        if self.factors.take().is_some() {
            log::debug!(
                "released {} factorization of order {}",
                self.kind,
                self.n
            );
        }
    }

    pub fn is_released(&self) -> bool {
        self.factors.is_none()
    }

    pub fn shape(&self) -> Result<(usize, usize)> {
        self.factors("query shape")?;
        Ok((self.n, self.n))
    }

    pub fn kind(&self) -> Result<ElementKind> {
        self.factors("query kind")?;
        Ok(self.kind)
    }

    pub fn is_incomplete(&self) -> Result<bool> {
        self.factors("query factorization type")?;
        Ok(self.incomplete)
    }

    /// Stored entries of L (unit diagonal excluded) plus U
    pub fn nnz(&self) -> Result<usize> {
        Ok(with_factors!(self.factors("count nonzeros")?, |f| f.nnz()))
    }

    /// Row permutation: original row `i` is pivot row `perm_r[i]`
    pub fn perm_r(&self) -> Result<Array1<i32>> {
        Ok(with_factors!(self.factors("read perm_r")?, |f| {
            Array1::from(f.perm_r.to_vec())
        }))
    }

    /// Column permutation: original column `j` is eliminated at step `perm_c[j]`
    pub fn perm_c(&self) -> Result<Array1<i32>> {
        Ok(with_factors!(self.factors("read perm_c")?, |f| {
            Array1::from(f.perm_c.to_vec())
        }))
    }

    /// Row scale factors `R` the matrix was equilibrated with
    pub fn row_scale(&self) -> Result<Array1<f64>> {
        Ok(with_factors!(self.factors("read row scaling")?, |f| f.scales(true)))
    }

    /// Column scale factors `C` the matrix was equilibrated with
    pub fn col_scale(&self) -> Result<Array1<f64>> {
        Ok(with_factors!(self.factors("read column scaling")?, |f| f.scales(false)))
    }

    pub fn l_factor(&self) -> Result<CscFactor> {
        with_factors!(self.factors("export L")?, |f| f.l_csc())
    }

    pub fn u_factor(&self) -> Result<CscFactor> {
        with_factors!(self.factors("export U")?, |f| f.u_csc())
    }

    pub fn statistics(&self) -> Result<&Statistics> {
        self.factors("read statistics")?;
        Ok(&self.statistics)
    }

    pub fn options(&self) -> Result<&SluOptions> {
        self.factors("read options")?;
        Ok(&self.options)
    }
}

impl Drop for FactorizationHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_handle_is_send() {
        assert_send::<FactorizationHandle>();
    }
}
