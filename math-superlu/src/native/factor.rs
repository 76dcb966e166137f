//! Left-looking sparse LU with threshold partial pivoting
//!
//! Columns are factored in the order given by the column permutation, one
//! panel of `PanelSize` columns at a time. Each column is scattered into a
//! dense accumulator, updated by the previously computed columns of L it
//! depends on (visited in elimination order), and split into its U part
//! (rows already pivoted) and L part (rows not yet pivoted).
//!
//! The same sweep performs the incomplete factorization: entries of the new
//! column are dropped by the configured rules before the L part is scaled,
//! and zero pivots are replaced instead of being reported.
//!
//! During the sweep L stores row indices in the (pre-permuted) row space;
//! they are rewritten to pivot positions once every row has been pivoted.

use super::alloc::NativeBuf;
use super::equil::Equilibration;
use super::matrix::{CompRef, NativeMatrix, PermutedStore, Store, SupernodalStore};
use super::stats::{Phase, SolverStats};
use super::{AbortKind, abort, checked_index};
use crate::options::{DropRule, IluNorm, Milu, SluOptions};
use crate::traits::SluScalar;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

const UNSET: usize = usize::MAX;

/// Matrix and permutations a factorization works from
pub(crate) struct FactorInput<'s, T> {
    pub a: CompRef<'s, T>,
    pub perm_c: &'s [i32],
    /// Row pre-permutation (original row to row slot)
    pub pre: Option<&'s [i32]>,
    pub scaling: Option<&'s Equilibration>,
}

impl<T: SluScalar> FactorInput<'_, T> {
    #[inline]
    fn scale(&self, r: usize, c: usize) -> f64 {
        self.scaling
            .map_or(1.0, |s| s.row_scale(r) * s.col_scale(c))
    }

    #[inline]
    fn slot(&self, r: usize) -> usize {
        match self.pre {
            Some(pre) => checked_index(pre[r], self.a.n, "row pre-permutation entry"),
            None => r,
        }
    }

    /// Inverse of the column permutation: `order[j]` is the column eliminated at step `j`
    pub fn column_order(&self) -> NativeBuf<usize> {
        let n = self.a.n;
        if self.perm_c.len() != n {
            abort(
                AbortKind::Internal,
                format!("perm_c has length {} for order {n}", self.perm_c.len()),
            );
        }
        let mut order = NativeBuf::filled(n, UNSET);
        for (c, &p) in self.perm_c.iter().enumerate() {
            let p = checked_index(p, n, "column permutation entry");
            if order[p] != UNSET {
                abort(AbortKind::Internal, "perm_c is not a permutation");
            }
            order[p] = c;
        }
        order
    }
}

/// Drop settings of an incomplete factorization
struct DropPolicy {
    basic: bool,
    column_cap: bool,
    area_cap: bool,
    drop_tol: f64,
    fill_tol: f64,
    fill_factor: f64,
    norm: IluNorm,
    milu: Milu,
}

impl DropPolicy {
    fn new(options: &SluOptions) -> Self {
        let rule = options.ilu_drop_rule;
        if rule.intersects(DropRule::DYNAMIC | DropRule::INTERP) {
            log::debug!("drop rule {rule}: DYNAMIC and INTERP have no effect here");
        }
        Self {
            basic: rule.contains(DropRule::BASIC),
            column_cap: rule.intersects(DropRule::COLUMN | DropRule::PROWS),
            area_cap: rule.contains(DropRule::AREA),
            drop_tol: options.ilu_drop_tol,
            fill_tol: options.ilu_fill_tol,
            fill_factor: options.ilu_fill_factor,
            norm: options.ilu_norm,
            milu: options.ilu_milu,
        }
    }

    fn column_norm(&self, magnitudes: impl Iterator<Item = f64>) -> f64 {
        let (count, sum, sum_sq, max) = magnitudes.fold((0usize, 0.0, 0.0, 0.0_f64), |acc, m| {
            (acc.0 + 1, acc.1 + m, acc.2 + m * m, acc.3.max(m))
        });
        if count == 0 {
            return 0.0;
        }
        match self.norm {
            IluNorm::OneNorm => sum / count as f64,
            IluNorm::TwoNorm => (sum_sq / count as f64).sqrt(),
            IluNorm::InfNorm => max,
        }
    }
}

/// Running totals of entries removed from one column
struct Dropped<T> {
    sum: T,
    abs_sum: f64,
    count: usize,
}

impl<T: SluScalar> Dropped<T> {
    fn new() -> Self {
        Self {
            sum: T::zero(),
            abs_sum: 0.0,
            count: 0,
        }
    }

    fn record(&mut self, v: T) {
        self.sum += v;
        self.abs_sum += v.norm();
        self.count += 1;
    }

    fn drop_below(&mut self, entries: &mut NativeBuf<(usize, T)>, tol: f64) {
        entries.retain(|&(_, v)| {
            let keep = v.norm() >= tol;
            if !keep {
                self.record(v);
            }
            keep
        });
    }

    fn keep_largest(&mut self, entries: &mut NativeBuf<(usize, T)>, keep: usize) {
        if entries.len() <= keep {
            return;
        }
        entries.sort_by(|x, y| y.1.norm().total_cmp(&x.1.norm()));
        for &(_, v) in &entries[keep..] {
            self.record(v);
        }
        entries.truncate(keep);
    }

    /// Compensate the pivot for the dropped mass
    fn compensate(&self, milu: Milu, pivot: T) -> T {
        match milu {
            Milu::Silu => pivot,
            Milu::Smilu1 => pivot + self.sum,
            Milu::Smilu2 => pivot + pivot.signum().scale(self.sum.norm()),
            Milu::Smilu3 => pivot + pivot.signum().scale(self.abs_sum),
        }
    }
}

/// Factor `P_r·diag(R)·A·diag(C)·P_c = L·U` (or an incomplete version).
///
/// Fills `l` with a supernodal store, `u` with a permuted column store and
/// `perm_r` with the row permutation. Returns 0 on success, or `j + 1` when
/// column `j` of a complete factorization has no usable pivot; the sweep
/// still runs to the end so that the factors are fully formed.
pub(crate) fn gstrf<T: SluScalar>(
    options: &SluOptions,
    ilu: bool,
    input: &FactorInput<'_, T>,
    perm_r: &mut [i32],
    l: &mut NativeMatrix<'static, T>,
    u: &mut NativeMatrix<'static, T>,
    stat: &mut SolverStats,
) -> i32 {
    let a = &input.a;
    let n = a.n;
    if perm_r.len() != n {
        abort(
            AbortKind::Internal,
            format!("perm_r has length {} for order {n}", perm_r.len()),
        );
    }
    let order = input.column_order();

    l.store = Some(Store::Supernodal(SupernodalStore {
        nnz: 0,
        nsuper: 0,
        values: NativeBuf::with_capacity(a.nnz),
        rowind: NativeBuf::with_capacity(a.nnz),
        colptr: NativeBuf::with_capacity(n + 1),
        sup_to_col: NativeBuf::with_capacity(n + 1),
        col_to_sup: NativeBuf::zeroed(n),
    }));
    u.store = Some(Store::PermutedCompressedColumn(PermutedStore {
        nnz: 0,
        values: NativeBuf::with_capacity(a.nnz + n),
        rowind: NativeBuf::with_capacity(a.nnz + n),
        colbeg: NativeBuf::zeroed(n),
        colend: NativeBuf::zeroed(n),
    }));
    let (Some(ls), Some(us)) = (l.supernodal_mut(), u.permuted_mut()) else {
        abort(AbortKind::Internal, "factor stores missing after allocation");
    };

    let mut x = NativeBuf::<T>::zeroed(n);
    let mut in_pattern = NativeBuf::<bool>::zeroed(n);
    let mut touched = NativeBuf::<usize>::with_capacity(n);
    let mut pivrow = NativeBuf::<usize>::filled(n, UNSET);
    let mut pos_of = NativeBuf::<usize>::filled(n, UNSET);
    let mut upper = NativeBuf::<(usize, T)>::with_capacity(n);
    let mut lower = NativeBuf::<(usize, T)>::with_capacity(n);

    let mut anorm = 0.0_f64;
    for c in 0..n {
        for (r, v) in a.column(c) {
            let r = checked_index(r, n, a.index_name);
            anorm = anorm.max(v.norm() * input.scale(r, c));
        }
    }
    let tiny = T::EPSILON.sqrt() * anorm;

    let policy = ilu.then(|| DropPolicy::new(options));
    let thresh = options.diag_pivot_thresh;
    let panel = options.panel_size.max(1);
    let mut info = 0_i32;
    let mut next_free = 0_usize;
    let mut a_nnz_seen = 0_usize;
    let mut flops = 0.0_f64;
    let mut heap = BinaryHeap::new();

    ls.colptr.push(0);
    for panel_start in (0..n).step_by(panel) {
        stat.panels += 1;
        for j in panel_start..(panel_start + panel).min(n) {
            let c = order[j];

            let mut a_count = 0;
            for (r, v) in a.column(c) {
                let r = checked_index(r, n, a.index_name);
                let rp = input.slot(r);
                if !in_pattern[rp] {
                    in_pattern[rp] = true;
                    touched.push(rp);
                }
                x[rp] += v.scale(input.scale(r, c));
                a_count += 1;
            }
            a_nnz_seen += a_count;
            let col_norm = policy.as_ref().map_or(0.0, |p| {
                p.column_norm(touched.iter().map(|&rp| x[rp].norm()))
            });

            // updates from earlier columns, in elimination order
            for &rp in touched.iter() {
                if pos_of[rp] != UNSET {
                    heap.push(Reverse(pos_of[rp]));
                }
            }
            while let Some(Reverse(k)) = heap.pop() {
                let xk = x[pivrow[k]];
                if xk == T::zero() {
                    continue;
                }
                let start = ls.colptr[k] as usize;
                let end = ls.colptr[k + 1] as usize;
                for idx in start..end {
                    let rp = ls.rowind[idx] as usize;
                    if !in_pattern[rp] {
                        in_pattern[rp] = true;
                        touched.push(rp);
                        if pos_of[rp] != UNSET {
                            heap.push(Reverse(pos_of[rp]));
                        }
                    }
                    x[rp] -= ls.values[idx] * xk;
                }
                flops += 2.0 * (end - start) as f64;
            }

            upper.clear();
            lower.clear();
            for &rp in touched.iter() {
                let v = x[rp];
                if v == T::zero() {
                    continue;
                }
                if pos_of[rp] != UNSET {
                    upper.push((pos_of[rp], v));
                } else {
                    lower.push((rp, v));
                }
            }

            // threshold pivoting, preferring the diagonal slot `c`
            let (max_idx, maxabs) = lower.iter().enumerate().fold(
                (None, 0.0_f64),
                |(best, bm), (i, (_, v))| {
                    let m = v.norm();
                    if m > bm { (Some(i), m) } else { (best, bm) }
                },
            );
            let diag_idx = lower
                .iter()
                .position(|&(rp, v)| rp == c && v.norm() >= thresh * maxabs);
            let (piv_row, mut piv) = match diag_idx.or(max_idx) {
                Some(i) => lower.swap_remove(i),
                None => {
                    let rp = if pos_of[c] == UNSET {
                        c
                    } else {
                        while next_free < n && pos_of[next_free] != UNSET {
                            next_free += 1;
                        }
                        if next_free == n {
                            abort(AbortKind::Internal, "no unpivoted row left");
                        }
                        next_free
                    };
                    (rp, T::zero())
                }
            };

            if let Some(policy) = &policy {
                let mut dropped = Dropped::new();
                if policy.basic {
                    let tol = policy.drop_tol * col_norm;
                    dropped.drop_below(&mut upper, tol);
                    dropped.drop_below(&mut lower, tol);
                }
                if policy.column_cap {
                    let cap = (policy.fill_factor * a_count as f64).ceil() as usize;
                    dropped.keep_largest(&mut lower, cap);
                }
                if policy.area_cap {
                    let allowed = (policy.fill_factor * a_nnz_seen as f64).ceil() as usize;
                    let used = ls.values.len() + us.values.len() + upper.len() + 1;
                    dropped.keep_largest(&mut lower, allowed.saturating_sub(used));
                }
                if dropped.count > 0 && piv != T::zero() {
                    piv = dropped.compensate(policy.milu, piv);
                }
                if piv == T::zero() {
                    let fill = policy.fill_tol * col_norm;
                    piv = T::from_real(if fill > 0.0 { fill } else { 1.0 });
                    stat.tiny_pivots += 1;
                }
            } else if piv == T::zero() && info == 0 {
                info = (j + 1) as i32;
                log::debug!("zero pivot in column {j} (original column {c})");
            }

            if options.replace_tiny_pivot && piv != T::zero() && piv.norm() < tiny {
                piv = piv.signum().scale(tiny);
                stat.tiny_pivots += 1;
            }

            upper.sort_unstable_by_key(|&(p, _)| p);
            us.colbeg[j] = us.values.len() as i32;
            for &(p, v) in upper.iter() {
                us.rowind.push(p as i32);
                us.values.push(v);
            }
            us.rowind.push(j as i32);
            us.values.push(piv);
            us.colend[j] = us.values.len() as i32;

            if piv != T::zero() {
                let inv = piv.inv();
                for &(rp, v) in lower.iter() {
                    ls.rowind.push(rp as i32);
                    ls.values.push(v * inv);
                }
                flops += lower.len() as f64;
            }
            ls.colptr.push(ls.values.len() as i32);

            pivrow[j] = piv_row;
            pos_of[piv_row] = j;

            for &rp in touched.iter() {
                x[rp] = T::zero();
                in_pattern[rp] = false;
            }
            touched.truncate(0);
        }
    }

    // row slots to pivot positions
    for rp in ls.rowind.iter_mut() {
        *rp = pos_of[*rp as usize] as i32;
    }
    let mut column = NativeBuf::<(i32, T)>::with_capacity(n);
    for j in 0..n {
        let start = ls.colptr[j] as usize;
        let end = ls.colptr[j + 1] as usize;
        column.clear();
        for (&r, &v) in ls.rowind[start..end].iter().zip(&ls.values[start..end]) {
            column.push((r, v));
        }
        column.sort_unstable_by_key(|&(r, _)| r);
        for (k, &(r, v)) in column.iter().enumerate() {
            ls.rowind[start + k] = r;
            ls.values[start + k] = v;
        }
    }
    for (r, p) in perm_r.iter_mut().enumerate() {
        *p = pos_of[input.slot(r)] as i32;
    }

    partition_supernodes(ls, n, options.relax);
    ls.nnz = ls.values.len();
    us.nnz = us.values.len();
    stat.nsuper = ls.nsuper;
    stat.add_ops(Phase::Fact, flops);

    log::debug!(
        "{}{} factored order {n}: nnz(L) = {}, nnz(U) = {}, {} supernodes, info = {info}",
        T::KIND.prefix(),
        if ilu { "gsitrf" } else { "gstrf" },
        ls.nnz,
        us.nnz,
        ls.nsuper
    );
    info
}

/// Group consecutive columns whose L structure nests into supernodes of at
/// most `relax` columns.
fn partition_supernodes<T: SluScalar>(ls: &mut SupernodalStore<T>, n: usize, relax: usize) {
    ls.sup_to_col.truncate(0);
    ls.nsuper = 0;
    if n == 0 {
        ls.sup_to_col.push(0);
        return;
    }

    fn rows<T: SluScalar>(ls: &SupernodalStore<T>, j: usize) -> &[i32] {
        &ls.rowind[ls.colptr[j] as usize..ls.colptr[j + 1] as usize]
    }

    let mut starts = NativeBuf::<usize>::with_capacity(n);
    starts.push(0);
    let mut col_to_sup = NativeBuf::<usize>::zeroed(n);
    for j in 1..n {
        let start = *starts.last().unwrap_or(&0);
        let prev = rows(ls, j - 1);
        let nests = prev.first() == Some(&(j as i32)) && &prev[1..] == rows(ls, j);
        if !(nests && j - start < relax) {
            starts.push(j);
        }
        col_to_sup[j] = starts.len() - 1;
    }

    for (dst, &s) in ls.col_to_sup.iter_mut().zip(col_to_sup.iter()) {
        *dst = s as i32;
    }
    for &s in starts.iter() {
        ls.sup_to_col.push(s as i32);
    }
    ls.sup_to_col.push(n as i32);
    ls.nsuper = starts.len();
}

/// Reciprocal pivot growth `min_j max|A_s(:, c_j)| / max|U(:, j)|`
pub(crate) fn pivot_growth<T: SluScalar>(
    input: &FactorInput<'_, T>,
    u: &NativeMatrix<'static, T>,
) -> f64 {
    let Some(us) = u.permuted() else {
        abort(AbortKind::Internal, "upper factor missing");
    };
    let order = input.column_order();
    let mut rpg = 1.0 / f64::MIN_POSITIVE;
    for (j, &c) in order.iter().enumerate() {
        let max_a = input
            .a
            .column(c)
            .map(|(r, v)| v.norm() * input.scale(r as usize, c))
            .fold(0.0, f64::max);
        let max_u = us.values[us.colbeg[j] as usize..us.colend[j] as usize]
            .iter()
            .map(|v| v.norm())
            .fold(0.0, f64::max);
        rpg = if max_u == 0.0 {
            rpg.min(1.0)
        } else {
            rpg.min(max_a / max_u)
        };
    }
    rpg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trampoline::RecoveryPoint;
    use approx::assert_relative_eq;

    struct Fixture {
        values: Vec<f64>,
        rowind: Vec<i32>,
        colptr: Vec<i32>,
    }

    impl Fixture {
        /// Column-major dense matrix to compressed columns
        fn from_dense(n: usize, dense: &[f64]) -> Self {
            let mut f = Fixture {
                values: vec![],
                rowind: vec![],
                colptr: vec![0],
            };
            for c in 0..n {
                for r in 0..n {
                    let v = dense[c * n + r];
                    if v != 0.0 {
                        f.values.push(v);
                        f.rowind.push(r as i32);
                    }
                }
                f.colptr.push(f.values.len() as i32);
            }
            f
        }

        fn comp(&self) -> CompRef<'_, f64> {
            CompRef {
                n: self.colptr.len() - 1,
                nnz: self.values.len(),
                values: &self.values,
                rowind: &self.rowind,
                colptr: &self.colptr,
                index_name: "row index",
            }
        }
    }

    fn factor(
        f: &Fixture,
        options: &SluOptions,
        ilu: bool,
    ) -> (i32, Vec<i32>, NativeMatrix<'static, f64>, NativeMatrix<'static, f64>) {
        let n = f.colptr.len() - 1;
        let perm_c: Vec<i32> = (0..n as i32).collect();
        let input = FactorInput {
            a: f.comp(),
            perm_c: &perm_c,
            pre: None,
            scaling: None,
        };
        let mut perm_r = vec![0; n];
        let mut l = NativeMatrix::empty(n, n);
        let mut u = NativeMatrix::empty(n, n);
        let mut stat = SolverStats::default();
        let point = RecoveryPoint::establish().unwrap();
        let info = point
            .run(|| gstrf(options, ilu, &input, &mut perm_r, &mut l, &mut u, &mut stat))
            .unwrap();
        (info, perm_r, l, u)
    }

    #[test]
    fn test_partial_pivoting_swaps_rows() {
        // [[1, 2], [3, 4]] column-major
        let f = Fixture::from_dense(2, &[1.0, 3.0, 2.0, 4.0]);
        let (info, perm_r, l, u) = factor(&f, &SluOptions::default(), false);
        assert_eq!(info, 0);
        // row 1 holds the larger entry of column 0
        assert_eq!(perm_r, vec![1, 0]);

        let ls = l.supernodal().unwrap();
        assert_eq!(ls.rowind.as_slice(), &[1]);
        assert_relative_eq!(ls.values[0], 1.0 / 3.0);

        let us = u.permuted().unwrap();
        // U = [[3, 4], [0, 2 - 4/3]]
        assert_relative_eq!(us.values[us.colend[0] as usize - 1], 3.0);
        assert_relative_eq!(us.values[us.colend[1] as usize - 1], 2.0 - 4.0 / 3.0);
    }

    #[test]
    fn test_small_threshold_keeps_diagonal() {
        let f = Fixture::from_dense(2, &[1.0, 3.0, 2.0, 4.0]);
        let options = SluOptions {
            diag_pivot_thresh: 0.1,
            ..SluOptions::default()
        };
        let (_, perm_r, _, _) = factor(&f, &options, false);
        assert_eq!(perm_r, vec![0, 1]);
    }

    #[test]
    fn test_singular_column_reported() {
        // second column is a multiple of the first
        let f = Fixture::from_dense(3, &[1.0, 2.0, 0.0, 2.0, 4.0, 0.0, 0.0, 0.0, 5.0]);
        let (info, perm_r, _, _) = factor(&f, &SluOptions::default(), false);
        assert_eq!(info, 2);
        let mut sorted = perm_r.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 2]);
    }

    #[test]
    fn test_incomplete_replaces_zero_pivot() {
        let f = Fixture::from_dense(3, &[1.0, 2.0, 0.0, 2.0, 4.0, 0.0, 0.0, 0.0, 5.0]);
        let (info, _, _, u) = factor(&f, &SluOptions::ilu_default(), true);
        assert_eq!(info, 0);
        let us = u.permuted().unwrap();
        for j in 0..3 {
            assert_ne!(us.values[us.colend[j] as usize - 1], 0.0);
        }
    }

    #[test]
    fn test_dense_supernodes_respect_relax() {
        let n = 4;
        let mut dense = vec![1.0; n * n];
        for i in 0..n {
            dense[i * n + i] = 10.0;
        }
        let f = Fixture::from_dense(n, &dense);

        let options = SluOptions {
            relax: 2,
            ..SluOptions::default()
        };
        let (info, _, l, _) = factor(&f, &options, false);
        assert_eq!(info, 0);
        let ls = l.supernodal().unwrap();
        assert_eq!(ls.nsuper, 2);
        assert_eq!(ls.sup_to_col.as_slice(), &[0, 2, 4]);
        assert_eq!(ls.col_to_sup.as_slice(), &[0, 0, 1, 1]);

        let (_, _, l, _) = factor(&f, &SluOptions::default(), false);
        assert_eq!(l.supernodal().unwrap().nsuper, 1);
    }

    #[test]
    fn test_tridiagonal_columns_stay_separate() {
        let n = 5;
        let mut dense = vec![0.0; n * n];
        for i in 0..n {
            dense[i * n + i] = 4.0;
            if i + 1 < n {
                dense[i * n + i + 1] = -1.0;
                dense[(i + 1) * n + i] = -1.0;
            }
        }
        let f = Fixture::from_dense(n, &dense);
        let (info, _, l, u) = factor(&f, &SluOptions::default(), false);
        assert_eq!(info, 0);
        // only the trailing pair nests
        assert_eq!(l.supernodal().unwrap().nsuper, 4);
        // no fill: one sub-diagonal per L column, one super-diagonal per U column
        assert_eq!(l.nnz(), n - 1);
        assert_eq!(u.nnz(), 2 * n - 1);
    }
}
