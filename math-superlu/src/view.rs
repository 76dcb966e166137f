//! Matrix views over host buffers
//!
//! [`SparseView`] validates a compressed triple handed over by the host and
//! wraps it, without copying, into a solver descriptor of the matching element
//! kind. Validation never touches the solver: a rejected input leaves no
//! solver allocation behind.
//!
//! Dense right-hand sides are either copied into a column-major buffer of the
//! matrix kind ([`dense_copy`]) or, for in-place solves, borrowed as they are
//! ([`dense_in_place`]).

use crate::error::{Result, SluError};
use crate::host::{HostArray, HostArrayMut, HostDType};
use crate::native::matrix::{Buffer, CompRef, CompressedStore};
use crate::native::{AbortKind, MatrixFormat, NativeBuf, NativeMatrix, abort, checked_index};
use crate::traits::{ElementKind, SluScalar};
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use num_complex::{Complex32, Complex64};

/// Validated sparse matrix borrowed from host buffers
#[derive(Debug)]
pub enum SparseView<'a> {
    Single(NativeMatrix<'a, f32>),
    Double(NativeMatrix<'a, f64>),
    ComplexSingle(NativeMatrix<'a, Complex32>),
    ComplexDouble(NativeMatrix<'a, Complex64>),
}

/// Evaluate `$body` with `$m` bound to the typed descriptor inside a view
macro_rules! with_matrix {
    ($view:expr, |$m:ident| $body:expr) => {
        match $view {
            $crate::view::SparseView::Single($m) => $body,
            $crate::view::SparseView::Double($m) => $body,
            $crate::view::SparseView::ComplexSingle($m) => $body,
            $crate::view::SparseView::ComplexDouble($m) => $body,
        }
    };
}
pub(crate) use with_matrix;

impl<'a> SparseView<'a> {
    /// Compressed sparse column matrix of order `n` with `nnz` stored entries
    pub fn csc(
        n: usize,
        nnz: usize,
        values: impl Into<HostArray<'a>>,
        row_indices: impl Into<HostArray<'a>>,
        col_pointers: impl Into<HostArray<'a>>,
    ) -> Result<Self> {
        Self::compressed(
            n,
            nnz,
            values.into(),
            row_indices.into(),
            col_pointers.into(),
            MatrixFormat::CompressedColumn,
        )
    }

    /// Compressed sparse row matrix of order `n` with `nnz` stored entries
    pub fn csr(
        n: usize,
        nnz: usize,
        values: impl Into<HostArray<'a>>,
        col_indices: impl Into<HostArray<'a>>,
        row_pointers: impl Into<HostArray<'a>>,
    ) -> Result<Self> {
        Self::compressed(
            n,
            nnz,
            values.into(),
            col_indices.into(),
            row_pointers.into(),
            MatrixFormat::CompressedRow,
        )
    }

    fn compressed(
        n: usize,
        nnz: usize,
        values: HostArray<'a>,
        indices: HostArray<'a>,
        pointers: HostArray<'a>,
        format: MatrixFormat,
    ) -> Result<Self> {
        let (index_name, pointer_name) = match format {
            MatrixFormat::CompressedRow => ("column indices", "row pointers"),
            _ => ("row indices", "column pointers"),
        };
        let indices = index_slice(&indices, index_name)?;
        let pointers = index_slice(&pointers, pointer_name)?;
        let kind = values.dtype().element_kind().ok_or_else(|| {
            SluError::TypeMismatch(format!(
                "nzvals is not of a type supported by SuperLU ({:?})",
                values.dtype()
            ))
        })?;
        check_pattern(n, nnz, indices, pointers, index_name, pointer_name)?;

        Ok(match kind {
            ElementKind::Single => {
                SparseView::Single(typed(n, nnz, &values, indices, pointers, format)?)
            }
            ElementKind::Double => {
                SparseView::Double(typed(n, nnz, &values, indices, pointers, format)?)
            }
            ElementKind::ComplexSingle => {
                SparseView::ComplexSingle(typed(n, nnz, &values, indices, pointers, format)?)
            }
            ElementKind::ComplexDouble => {
                SparseView::ComplexDouble(typed(n, nnz, &values, indices, pointers, format)?)
            }
        })
    }

    pub fn kind(&self) -> ElementKind {
        with_matrix!(self, |m| m.kind())
    }

    /// Order of the (square) matrix
    pub fn order(&self) -> usize {
        with_matrix!(self, |m| m.ncol())
    }

    pub fn nnz(&self) -> usize {
        with_matrix!(self, |m| m.nnz())
    }

    pub fn format(&self) -> Option<MatrixFormat> {
        with_matrix!(self, |m| m.format())
    }
}

/// Index buffers must be contiguous 1-D arrays of C `int`
fn index_slice<'a>(host: &HostArray<'a>, name: &str) -> Result<&'a [i32]> {
    if host.dtype() != HostDType::Int32 {
        return Err(SluError::TypeMismatch(format!(
            "{name} must be of type cint, got {:?}",
            host.dtype()
        )));
    }
    if host.ndim() != 1 {
        return Err(SluError::ShapeError(format!(
            "{name} must be one-dimensional, got shape {:?}",
            host.shape()
        )));
    }
    host.as_index_slice()
        .ok_or_else(|| SluError::ShapeError(format!("{name} must be contiguous")))
}

fn check_pattern(
    n: usize,
    nnz: usize,
    indices: &[i32],
    pointers: &[i32],
    index_name: &str,
    pointer_name: &str,
) -> Result<()> {
    if indices.len() < nnz {
        return Err(SluError::ShapeError(format!(
            "{index_name} hold {} entries, fewer than nnz = {nnz}",
            indices.len()
        )));
    }
    if pointers.len().checked_sub(1) != Some(n) {
        return Err(SluError::ShapeError(format!(
            "{pointer_name} must have n + 1 entries for n = {n}, got {}",
            pointers.len()
        )));
    }
    if pointers[0] != 0 {
        return Err(SluError::ShapeError(format!(
            "{pointer_name} must start at 0, got {}",
            pointers[0]
        )));
    }
    if let Some(k) = pointers.windows(2).position(|w| w[1] < w[0]) {
        return Err(SluError::ShapeError(format!(
            "{pointer_name} decrease at position {}",
            k + 1
        )));
    }
    if usize::try_from(pointers[n]).ok() != Some(nnz) {
        return Err(SluError::ShapeError(format!(
            "{pointer_name} end at {}, expected nnz = {nnz}",
            pointers[n]
        )));
    }
    Ok(())
}

fn typed<'a, T: SluScalar>(
    n: usize,
    nnz: usize,
    values: &HostArray<'a>,
    indices: &'a [i32],
    pointers: &'a [i32],
    format: MatrixFormat,
) -> Result<NativeMatrix<'a, T>> {
    let view = T::host_view(values).ok_or_else(|| {
        SluError::TypeMismatch(format!("nzvals must be of type {}", T::KIND))
    })?;
    if view.ndim() != 1 {
        return Err(SluError::ShapeError(format!(
            "nzvals must be one-dimensional, got shape {:?}",
            view.shape()
        )));
    }
    let values = view
        .to_slice()
        .ok_or_else(|| SluError::ShapeError("nzvals must be contiguous".into()))?;
    if values.len() < nnz {
        return Err(SluError::ShapeError(format!(
            "nzvals holds {} entries, fewer than nnz = {nnz}",
            values.len()
        )));
    }

    let store = CompressedStore {
        nnz,
        values: Buffer::Borrowed(values),
        indices: Buffer::Borrowed(indices),
        pointers: Buffer::Borrowed(pointers),
    };
    Ok(match format {
        MatrixFormat::CompressedRow => NativeMatrix::compressed_row(n, store),
        _ => NativeMatrix::compressed_column(n, store),
    })
}

/// Column-major copy of a 1-D or 2-D right-hand side, cast to `T`.
///
/// Returns the copy and its number of columns.
pub(crate) fn dense_copy<T: SluScalar>(b: &HostArray<'_>, n: usize) -> Result<(ArrayD<T>, usize)> {
    let nrhs = rhs_columns(b.shape(), n)?;
    if !T::KIND.can_cast_from(b.dtype()) {
        return Err(SluError::TypeMismatch(format!(
            "cannot cast b array of type {:?} to {}",
            b.dtype(),
            T::KIND
        )));
    }

    let mut out = ArrayD::<T>::zeros(IxDyn(b.shape()).f());
    match b {
        HostArray::Float32(v) => {
            out.zip_mut_with(v, |o, &x| *o = T::from_c64(Complex64::new(x as f64, 0.0)))
        }
        HostArray::Float64(v) => out.zip_mut_with(v, |o, &x| *o = T::from_c64(Complex64::new(x, 0.0))),
        HostArray::Complex32(v) => out.zip_mut_with(v, |o, &x| {
            *o = T::from_c64(Complex64::new(x.re as f64, x.im as f64))
        }),
        HostArray::Complex64(v) => out.zip_mut_with(v, |o, &x| *o = T::from_c64(x)),
        HostArray::Int32(_) | HostArray::Int64(_) => {
            return Err(SluError::TypeMismatch(
                "b array must hold floating-point values".into(),
            ));
        }
    }
    Ok((out, nrhs))
}

/// Borrow an in-place right-hand side as a column-major slice
pub(crate) fn dense_in_place<T: SluScalar>(
    b: HostArrayMut<'_>,
    n: usize,
) -> Result<(&mut [T], usize)> {
    let nrhs = rhs_columns(b.shape(), n)?;
    if b.dtype() != T::KIND.dtype() {
        return Err(SluError::TypeMismatch(format!(
            "in-place b array must be of type {}, got {:?}",
            T::KIND,
            b.dtype()
        )));
    }
    if !b.is_fortran_contiguous() {
        return Err(SluError::ShapeError(
            "in-place b array must be Fortran-contiguous".into(),
        ));
    }
    let slice = T::host_view_mut(b)
        .and_then(|view| view.reversed_axes().into_slice())
        .ok_or_else(|| SluError::ShapeError("b array is not contiguous".into()))?;
    Ok((slice, nrhs))
}

fn rhs_columns(shape: &[usize], n: usize) -> Result<usize> {
    let nrhs = match shape {
        [_] => 1,
        [_, k] => *k,
        _ => {
            return Err(SluError::ShapeError(format!(
                "b array must be 1-D or 2-D, got shape {shape:?}"
            )));
        }
    };
    if shape[0] != n {
        return Err(SluError::ShapeError(format!(
            "b array has invalid shape {shape:?} for a matrix of order {n}"
        )));
    }
    Ok(nrhs)
}

/// Owned column-compressed copy of a row-compressed matrix.
///
/// The stored arrays of `a` describe Aᵀ in column form; transposing them gives
/// A in column form. Runs inside a solver call: indices are range-checked and
/// buffers come from the solver allocator.
pub(crate) fn transpose_to_csc<T: SluScalar>(a: &CompRef<'_, T>) -> NativeMatrix<'static, T> {
    let n = a.n;
    let mut counts = NativeBuf::<i32>::zeroed(n + 1);
    for c in 0..n {
        for (r, _) in a.column(c) {
            counts[checked_index(r, n, a.index_name) + 1] += 1;
        }
    }
    for i in 0..n {
        counts[i + 1] += counts[i];
    }
    if counts[n] as usize != a.nnz {
        abort(AbortKind::Internal, "index count disagrees with nnz");
    }

    let mut next = NativeBuf::from_slice(&counts[..n]);
    let mut rowind = NativeBuf::<i32>::zeroed(a.nnz);
    let mut values = NativeBuf::<T>::zeroed(a.nnz);
    for c in 0..n {
        for (r, &v) in a.column(c) {
            let slot = &mut next[r as usize];
            rowind[*slot as usize] = c as i32;
            values[*slot as usize] = v;
            *slot += 1;
        }
    }

    NativeMatrix::compressed_column(
        n,
        CompressedStore {
            nnz: a.nnz,
            values: Buffer::Owned(values),
            indices: Buffer::Owned(rowind),
            pointers: Buffer::Owned(counts),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn test_csc_view_borrows() {
        let values = array![1.0_f64, 2.0, 3.0];
        let rows = vec![0_i32, 1, 2];
        let ptrs = vec![0_i32, 1, 2, 3];
        let view = SparseView::csc(3, 3, &values, &rows, &ptrs).unwrap();
        assert_eq!(view.kind(), ElementKind::Double);
        assert_eq!(view.order(), 3);
        assert_eq!(view.format(), Some(MatrixFormat::CompressedColumn));
        match &view {
            SparseView::Double(m) => {
                assert_eq!(m.ownership(), Some(crate::native::Ownership::Borrowed))
            }
            other => panic!("unexpected view {other:?}"),
        }
    }

    #[test]
    fn test_wide_indices_rejected() {
        let values = array![1.0_f64, 2.0];
        let rows = vec![0_i64, 1];
        let ptrs = vec![0_i32, 1, 2];
        let err = SparseView::csc(2, 2, &values, &rows, &ptrs).unwrap_err();
        assert!(matches!(err, SluError::TypeMismatch(ref m) if m.contains("cint")));
    }

    #[test]
    fn test_integer_values_rejected() {
        let values = vec![1_i32, 2];
        let rows = vec![0_i32, 1];
        let ptrs = vec![0_i32, 1, 2];
        let err = SparseView::csr(2, 2, &values, &rows, &ptrs).unwrap_err();
        assert!(matches!(err, SluError::TypeMismatch(_)));
    }

    #[test]
    fn test_pattern_checks() {
        let values = vec![1.0_f32, 2.0];
        let rows = vec![0_i32, 1];
        for ptrs in [vec![0_i32, 1], vec![1, 1, 2], vec![0, 2, 1], vec![0, 1, 3]] {
            let err = SparseView::csc(2, 2, &values, &rows, &ptrs).unwrap_err();
            assert!(matches!(err, SluError::ShapeError(_)), "{ptrs:?}: {err}");
        }
        let short = vec![1.0_f32];
        let err = SparseView::csc(2, 2, &short, &rows, &vec![0_i32, 1, 2]).unwrap_err();
        assert!(matches!(err, SluError::ShapeError(_)));
    }

    #[test]
    fn test_order_without_room_for_pointers() {
        let values = vec![1.0_f64];
        let rows = vec![0_i32];
        for ptrs in [vec![], vec![0_i32]] {
            let err = SparseView::csr(usize::MAX, 1, &values, &rows, &ptrs).unwrap_err();
            assert!(matches!(err, SluError::ShapeError(ref m) if m.contains("row pointers")));
        }
    }

    #[test]
    fn test_dense_copy_is_fortran_and_cast() {
        let b = array![[1.0_f32, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let (copy, nrhs) = dense_copy::<f64>(&HostArray::from(&b), 3).unwrap();
        assert_eq!(nrhs, 2);
        assert_eq!(
            copy.as_slice_memory_order().unwrap(),
            &[1.0, 3.0, 5.0, 2.0, 4.0, 6.0]
        );

        let narrowing = array![1.0_f64, 2.0, 3.0];
        assert!(matches!(
            dense_copy::<f32>(&HostArray::from(&narrowing), 3),
            Err(SluError::TypeMismatch(_))
        ));
        assert!(matches!(
            dense_copy::<f64>(&HostArray::from(&narrowing), 4),
            Err(SluError::ShapeError(_))
        ));
    }

    #[test]
    fn test_in_place_requires_fortran_layout() {
        let mut c_order = Array2::<f64>::zeros((2, 2));
        assert!(matches!(
            dense_in_place::<f64>(HostArrayMut::from(&mut c_order), 2),
            Err(SluError::ShapeError(_))
        ));

        let mut f_order = Array2::<f64>::zeros((2, 3).f());
        let (slice, nrhs) = dense_in_place::<f64>(HostArrayMut::from(&mut f_order), 2).unwrap();
        assert_eq!((slice.len(), nrhs), (6, 3));

        let mut single = Array2::<f32>::zeros((2, 1).f());
        assert!(matches!(
            dense_in_place::<f64>(HostArrayMut::from(&mut single), 2),
            Err(SluError::TypeMismatch(_))
        ));
    }
}
