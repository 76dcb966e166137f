//! Row and column equilibration
//!
//! Scale factors make the largest entry of every row and column of
//! `diag(R)·A·diag(C)` have unit magnitude. They are only applied when the
//! matrix is badly scaled: ratios of smallest to largest scale below
//! [`THRESH`] switch the corresponding side on.

use super::alloc::NativeBuf;
use super::checked_index;
use super::matrix::CompRef;
use crate::traits::SluScalar;

const THRESH: f64 = 0.1;

/// Which scalings are in effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Equed {
    None,
    Row,
    Col,
    Both,
}

/// Scale factors computed for one matrix
#[derive(Debug)]
pub(crate) struct Equilibration {
    pub equed: Equed,
    r: NativeBuf<f64>,
    c: NativeBuf<f64>,
}

impl Equilibration {
    #[inline]
    pub fn row_scale(&self, i: usize) -> f64 {
        match self.equed {
            Equed::Row | Equed::Both => self.r[i],
            _ => 1.0,
        }
    }

    #[inline]
    pub fn col_scale(&self, j: usize) -> f64 {
        match self.equed {
            Equed::Col | Equed::Both => self.c[j],
            _ => 1.0,
        }
    }
}

/// Compute scale factors for `a` and decide which to apply.
///
/// A matrix with an empty row or column is left unscaled.
pub(crate) fn gsequ<T: SluScalar>(a: &CompRef<'_, T>) -> Equilibration {
    let n = a.n;
    let mut r = NativeBuf::zeroed(n);
    let mut c = NativeBuf::zeroed(n);
    let unscaled = |r, c| Equilibration {
        equed: Equed::None,
        r,
        c,
    };

    if n == 0 {
        return unscaled(r, c);
    }

    for col in 0..n {
        for (i, v) in a.column(col) {
            let i = checked_index(i, n, a.index_name);
            r[i] = f64::max(r[i], v.norm());
        }
    }
    let amax = r.iter().copied().fold(0.0, f64::max);
    if let Some(i) = r.iter().position(|&x| x == 0.0) {
        log::debug!("equilibration skipped: row {i} is empty");
        return unscaled(r, c);
    }
    let rmin = r.iter().copied().fold(f64::INFINITY, f64::min);
    let rowcnd = rmin / amax;
    for x in r.iter_mut() {
        *x = 1.0 / *x;
    }

    for col in 0..n {
        for (i, v) in a.column(col) {
            let i = i as usize;
            c[col] = f64::max(c[col], v.norm() * r[i]);
        }
    }
    if let Some(j) = c.iter().position(|&x| x == 0.0) {
        log::debug!("equilibration skipped: column {j} is empty");
        return unscaled(r, c);
    }
    let cmin = c.iter().copied().fold(f64::INFINITY, f64::min);
    let cmax = c.iter().copied().fold(0.0, f64::max);
    let colcnd = cmin / cmax;
    for x in c.iter_mut() {
        *x = 1.0 / *x;
    }

    let small = f64::MIN_POSITIVE / T::EPSILON;
    let large = 1.0 / small;
    let rows_ok = rowcnd >= THRESH && amax >= small && amax <= large;
    let cols_ok = colcnd >= THRESH;
    let equed = match (rows_ok, cols_ok) {
        (true, true) => Equed::None,
        (true, false) => Equed::Col,
        (false, true) => Equed::Row,
        (false, false) => Equed::Both,
    };
    log::debug!("equilibration: rowcnd {rowcnd:.3e}, colcnd {colcnd:.3e}, applied {equed:?}");

    Equilibration { equed, r, c }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn diag(values: &[f64]) -> (Vec<i32>, Vec<i32>) {
        let n = values.len() as i32;
        ((0..n).collect(), (0..=n).collect())
    }

    #[test]
    fn test_well_scaled_matrix_untouched() {
        let values = [2.0, 1.5, 1.0];
        let (rowind, colptr) = diag(&values);
        let a = CompRef {
            n: 3,
            nnz: 3,
            values: &values,
            rowind: &rowind,
            colptr: &colptr,
            index_name: "row index",
        };
        let eq = gsequ(&a);
        assert_eq!(eq.equed, Equed::None);
        assert_eq!(eq.row_scale(0), 1.0);
    }

    #[test]
    fn test_badly_scaled_rows() {
        let values = [1.0e6, 1.0, 1.0e-3];
        let (rowind, colptr) = diag(&values);
        let a = CompRef {
            n: 3,
            nnz: 3,
            values: &values,
            rowind: &rowind,
            colptr: &colptr,
            index_name: "row index",
        };
        let eq = gsequ(&a);
        assert_eq!(eq.equed, Equed::Row);
        for i in 0..3 {
            assert_relative_eq!(eq.row_scale(i) * values[i], 1.0, epsilon = 1e-12);
            assert_eq!(eq.col_scale(i), 1.0);
        }
    }

    #[test]
    fn test_empty_row_disables_scaling() {
        let values = [1.0e6, 1.0e-6];
        let rowind = [0, 0];
        let colptr = [0, 1, 2];
        let a = CompRef {
            n: 2,
            nnz: 2,
            values: &values,
            rowind: &rowind,
            colptr: &colptr,
            index_name: "row index",
        };
        assert_eq!(gsequ(&a).equed, Equed::None);
    }
}
