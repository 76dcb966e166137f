//! Persistent factorizations and their handles

use approx::assert_relative_eq;
use math_audio_superlu::{
    CscFactor, ElementKind, FactorizationHandle, SluError, SluOptions, SparseView, Trans,
    factorize, live_allocations, live_bytes,
};
use ndarray::{Array1, Array2, array};
use num_complex::Complex64;

fn to_csc<T: Copy + PartialEq + Default>(a: &Array2<T>) -> (Vec<T>, Vec<i32>, Vec<i32>) {
    let mut values = Vec::new();
    let mut rows = Vec::new();
    let mut ptrs = vec![0];
    for c in 0..a.ncols() {
        for r in 0..a.nrows() {
            if a[[r, c]] != T::default() {
                values.push(a[[r, c]]);
                rows.push(r as i32);
            }
        }
        ptrs.push(values.len() as i32);
    }
    (values, rows, ptrs)
}

fn tridiagonal(n: usize) -> Array2<f64> {
    let mut a = Array2::zeros((n, n));
    for i in 0..n {
        a[[i, i]] = 4.0;
        if i + 1 < n {
            a[[i, i + 1]] = -1.0;
            a[[i + 1, i]] = -2.0;
        }
    }
    a
}

fn solve_f64(
    handle: &mut FactorizationHandle,
    b: &Array1<f64>,
    trans: Trans,
) -> Array1<f64> {
    handle
        .solve_with(b.into(), trans)
        .unwrap()
        .into_f64()
        .unwrap()
        .into_dimensionality()
        .unwrap()
}

fn dense_factor(f: &CscFactor) -> Array2<f64> {
    let data: Array1<f64> = f
        .data
        .clone()
        .into_f64()
        .unwrap()
        .into_dimensionality()
        .unwrap();
    let mut m = Array2::<f64>::zeros(f.shape);
    for j in 0..f.shape.1 {
        for k in f.indptr[j] as usize..f.indptr[j + 1] as usize {
            m[[f.indices[k] as usize, j]] = data[k];
        }
    }
    m
}

/// `Pr·diag(R)·A·diag(C)·Pc` for the handle's permutations and scalings
fn permuted_scaled(a: &Array2<f64>, handle: &FactorizationHandle) -> Array2<f64> {
    let n = a.nrows();
    let perm_r = handle.perm_r().unwrap();
    let perm_c = handle.perm_c().unwrap();
    let r = handle.row_scale().unwrap();
    let c = handle.col_scale().unwrap();
    let mut out = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            out[[perm_r[i] as usize, perm_c[j] as usize]] = r[i] * a[[i, j]] * c[j];
        }
    }
    out
}

#[test]
fn test_factors_reproduce_inverse() {
    let a = tridiagonal(6);
    let (values, rows, ptrs) = to_csc(&a);
    let view = SparseView::csc(6, values.len(), &values, &rows, &ptrs).unwrap();
    let mut handle = factorize(view, &SluOptions::default(), false).unwrap();
    assert_eq!(handle.shape().unwrap(), (6, 6));
    assert_eq!(handle.kind().unwrap(), ElementKind::Double);
    assert!(!handle.is_incomplete().unwrap());

    let mut inverse = Array2::<f64>::zeros((6, 6));
    for j in 0..6 {
        let mut e = Array1::zeros(6);
        e[j] = 1.0;
        let x = solve_f64(&mut handle, &e, Trans::NoTrans);
        inverse.column_mut(j).assign(&x);
    }
    let identity = a.dot(&inverse);
    for ((r, c), v) in identity.indexed_iter() {
        let want = if r == c { 1.0 } else { 0.0 };
        assert_relative_eq!(*v, want, epsilon = 1e-12);
    }
}

#[test]
fn test_transposed_solves_share_factors() {
    let a = tridiagonal(5);
    let (values, rows, ptrs) = to_csc(&a);
    let view = SparseView::csc(5, values.len(), &values, &rows, &ptrs).unwrap();
    let mut handle = factorize(view, &SluOptions::default(), false).unwrap();
    let b = array![1.0, 2.0, 3.0, 4.0, 5.0];

    let x = solve_f64(&mut handle, &b, Trans::NoTrans);
    let xt = solve_f64(&mut handle, &b, Trans::Trans);
    for (got, want) in a.dot(&x).iter().zip(b.iter()) {
        assert_relative_eq!(*got, *want, epsilon = 1e-12);
    }
    for (got, want) in a.t().dot(&xt).iter().zip(b.iter()) {
        assert_relative_eq!(*got, *want, epsilon = 1e-12);
    }
    assert!(handle.statistics().unwrap().solve_flops > 0.0);
}

#[test]
fn test_complex_conjugate_solve() {
    let i = Complex64::new(0.0, 1.0);
    let one = Complex64::new(1.0, 0.0);
    let zero = Complex64::new(0.0, 0.0);
    let a = array![
        [one * 2.0, i, zero],
        [-i, one * 3.0, one],
        [zero, one + i, one * 4.0],
    ];
    let (values, rows, ptrs) = to_csc(&a);
    let view = SparseView::csc(3, values.len(), &values, &rows, &ptrs).unwrap();
    let mut handle = factorize(view, &SluOptions::default(), false).unwrap();

    // real right-hand sides are cast to the factor kind
    let b = array![1.0, 0.0, -1.0];
    let x: Array1<Complex64> = handle
        .solve_with((&b).into(), Trans::Conj)
        .unwrap()
        .into_c64()
        .unwrap()
        .into_dimensionality()
        .unwrap();
    let ah = a.t().mapv(|z| z.conj());
    for (got, want) in ah.dot(&x).iter().zip(b.iter()) {
        assert!((got - Complex64::new(*want, 0.0)).norm() < 1e-12);
    }
}

#[test]
fn test_incomplete_factors_approximate_inverse() {
    let a = tridiagonal(8);
    let (values, rows, ptrs) = to_csc(&a);
    let view = SparseView::csc(8, values.len(), &values, &rows, &ptrs).unwrap();
    let mut handle = factorize(view, &SluOptions::ilu_default(), true).unwrap();
    assert!(handle.is_incomplete().unwrap());

    let b = Array1::from_elem(8, 1.0);
    let x = solve_f64(&mut handle, &b, Trans::NoTrans);
    let residual = a.dot(&x) - &b;
    let relative = residual.mapv(f64::abs).sum() / b.sum();
    assert!(relative < 1e-2, "relative residual {relative}");
}

#[test]
fn test_release_and_use_after_release() {
    let base = live_allocations();
    let a = tridiagonal(4);
    let (values, rows, ptrs) = to_csc(&a);
    let view = SparseView::csc(4, values.len(), &values, &rows, &ptrs).unwrap();
    let mut handle = factorize(view, &SluOptions::default(), false).unwrap();
    assert!(live_allocations() > base);

    handle.release();
    assert!(handle.is_released());
    assert_eq!(live_allocations(), base);
    handle.release();
    assert_eq!(live_allocations(), base);

    let b = array![1.0, 1.0, 1.0, 1.0];
    assert!(matches!(
        handle.solve((&b).into()),
        Err(SluError::UseAfterRelease(_))
    ));
    assert!(matches!(handle.perm_r(), Err(SluError::UseAfterRelease(_))));
    assert!(matches!(handle.l_factor(), Err(SluError::UseAfterRelease(_))));
    assert!(matches!(handle.shape(), Err(SluError::UseAfterRelease(_))));
}

#[test]
fn test_drop_frees_factors() {
    let base = live_allocations();
    {
        let a = tridiagonal(4);
        let (values, rows, ptrs) = to_csc(&a);
        let view = SparseView::csc(4, values.len(), &values, &rows, &ptrs).unwrap();
        let _handle = factorize(view, &SluOptions::default(), false).unwrap();
        assert!(live_allocations() > base);
    }
    assert_eq!(live_allocations(), base);
}

#[test]
fn test_exported_factors_multiply_back() {
    let a = tridiagonal(5);
    let (values, rows, ptrs) = to_csc(&a);
    let options = SluOptions {
        equil: false,
        ..SluOptions::default()
    };
    let view = SparseView::csc(5, values.len(), &values, &rows, &ptrs).unwrap();
    let handle = factorize(view, &options, false).unwrap();
    assert_eq!(handle.row_scale().unwrap(), Array1::from_elem(5, 1.0));

    let l_factor = handle.l_factor().unwrap();
    let u_factor = handle.u_factor().unwrap();
    assert_eq!(handle.nnz().unwrap() + 5, l_factor.nnz() + u_factor.nnz());
    let (l, u) = (dense_factor(&l_factor), dense_factor(&u_factor));
    for j in 0..5 {
        assert_eq!(l[[j, j]], 1.0);
    }

    // L·U = Pr·A·Pc
    for (got, want) in l.dot(&u).iter().zip(permuted_scaled(&a, &handle).iter()) {
        assert_relative_eq!(*got, *want, epsilon = 1e-12);
    }
}

#[test]
fn test_exported_factors_carry_equilibration() {
    let a = array![[1e6, 2e6, 0.0], [1.0, 3.0, 1.0], [0.0, 1e-3, 4e-3]];
    let (values, rows, ptrs) = to_csc(&a);
    let view = SparseView::csc(3, values.len(), &values, &rows, &ptrs).unwrap();
    let handle = factorize(view, &SluOptions::default(), false).unwrap();

    // rows span nine orders of magnitude, so they are scaled to unit maxima
    let r = handle.row_scale().unwrap();
    assert_relative_eq!(r[0], 1.0 / 2e6);
    assert_relative_eq!(r[2], 1.0 / 4e-3);

    let l = dense_factor(&handle.l_factor().unwrap());
    let u = dense_factor(&handle.u_factor().unwrap());
    let lu = l.dot(&u);
    let target = permuted_scaled(&a, &handle);
    for (got, want) in lu.iter().zip(target.iter()) {
        assert_relative_eq!(*got, *want, epsilon = 1e-12);
    }
}

#[test]
fn test_handle_dropped_on_another_thread() {
    let base = (live_allocations(), live_bytes());
    let a = tridiagonal(6);
    let (values, rows, ptrs) = to_csc(&a);
    let view = SparseView::csc(6, values.len(), &values, &rows, &ptrs).unwrap();
    let handle = factorize(view, &SluOptions::default(), false).unwrap();
    assert!(live_allocations() > base.0);
    assert!(live_bytes() > base.1);

    std::thread::spawn(move || drop(handle)).join().unwrap();
    assert_eq!((live_allocations(), live_bytes()), base);
}

#[test]
fn test_singular_factorization_is_an_error() {
    let base = live_allocations();
    let a = array![[1.0, 2.0, 0.0], [2.0, 4.0, 0.0], [0.0, 0.0, 5.0]];
    let (values, rows, ptrs) = to_csc(&a);
    let view = SparseView::csc(3, values.len(), &values, &rows, &ptrs).unwrap();
    let err = factorize(view, &SluOptions::default(), false).unwrap_err();
    assert!(matches!(err, SluError::SolverFailure(ref m) if m.contains("singular")));
    assert_eq!(live_allocations(), base);
}

#[test]
fn test_csr_factorization() {
    let a = tridiagonal(4);
    // CSR of A is CSC of Aᵀ
    let (values, cols, ptrs) = to_csc(&a.t().to_owned());
    let view = SparseView::csr(4, values.len(), &values, &cols, &ptrs).unwrap();
    let mut handle = factorize(view, &SluOptions::default(), false).unwrap();

    let b = array![1.0, -1.0, 1.0, -1.0];
    let x = solve_f64(&mut handle, &b, Trans::NoTrans);
    for (got, want) in a.dot(&x).iter().zip(b.iter()) {
        assert_relative_eq!(*got, *want, epsilon = 1e-12);
    }
}
