//! Column orderings and row pre-permutation
//!
//! Orderings are returned in the solver's convention: `perm_c[c]` is the
//! position at which original column `c` is eliminated. The row
//! pre-permutation maps original row `r` to the row slot `pre[r]` whose
//! diagonal it is meant to occupy.

use super::alloc::NativeBuf;
use super::equil::Equilibration;
use super::matrix::CompRef;
use super::{AbortKind, abort, checked_index};
use crate::options::ColPerm;
use crate::traits::SluScalar;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

const UNSET: usize = usize::MAX;

/// Adjacency lists of a graph on `0..n`, without self loops or duplicates
type Graph = Vec<NativeBuf<usize>>;

/// Compute the column ordering into `perm_c` (length `n`).
///
/// `COLAMD` and `MMD_ATA` both order on the structure of AᵀA; symmetric mode
/// forces the Aᵀ+A graph unless the natural ordering was asked for.
pub(crate) fn get_perm_c<T: SluScalar>(
    col_perm: ColPerm,
    symmetric_mode: bool,
    a: &CompRef<'_, T>,
    perm_c: &mut [i32],
) {
    let n = a.n;
    if perm_c.len() != n {
        abort(
            AbortKind::Internal,
            format!("perm_c has length {} for order {n}", perm_c.len()),
        );
    }

    let order = match (col_perm, symmetric_mode) {
        (ColPerm::Natural, _) => {
            let mut order = NativeBuf::with_capacity(n);
            (0..n).for_each(|c| order.push(c));
            order
        }
        (_, true) | (ColPerm::MmdAtPlusA, _) => minimum_degree(at_plus_a_graph(a)),
        (ColPerm::MmdAtA | ColPerm::Colamd, false) => minimum_degree(ata_graph(a)),
    };

    for (position, &col) in order.iter().enumerate() {
        perm_c[col] = position as i32;
    }
    log::debug!("column ordering {col_perm:?} computed for order {n}");
}

fn empty_graph(n: usize) -> Graph {
    (0..n).map(|_| NativeBuf::with_capacity(0)).collect()
}

/// Adjacency of columns sharing a row
fn ata_graph<T: SluScalar>(a: &CompRef<'_, T>) -> Graph {
    let n = a.n;

    // columns of every row, as compressed rows
    let mut row_ptr = NativeBuf::<usize>::zeroed(n + 1);
    for c in 0..n {
        for (r, _) in a.column(c) {
            row_ptr[checked_index(r, n, a.index_name) + 1] += 1;
        }
    }
    for i in 0..n {
        row_ptr[i + 1] += row_ptr[i];
    }
    let mut next = NativeBuf::from_slice(&row_ptr[..n]);
    let mut row_cols = NativeBuf::<usize>::zeroed(row_ptr[n]);
    for c in 0..n {
        for (r, _) in a.column(c) {
            let slot = &mut next[r as usize];
            row_cols[*slot] = c;
            *slot += 1;
        }
    }

    let mut seen = NativeBuf::filled(n, UNSET);
    let mut adj = empty_graph(n);
    for c in 0..n {
        seen[c] = c;
        for (r, _) in a.column(c) {
            let r = r as usize;
            for &other in &row_cols[row_ptr[r]..row_ptr[r + 1]] {
                if seen[other] != c {
                    seen[other] = c;
                    adj[c].push(other);
                }
            }
        }
    }
    adj
}

/// Adjacency of the symmetrized pattern
fn at_plus_a_graph<T: SluScalar>(a: &CompRef<'_, T>) -> Graph {
    let n = a.n;
    let mut adj = empty_graph(n);
    for c in 0..n {
        for (r, _) in a.column(c) {
            let r = checked_index(r, n, a.index_name);
            if r != c {
                adj[r].push(c);
                adj[c].push(r);
            }
        }
    }
    for list in adj.iter_mut() {
        list.sort_unstable();
        list.dedup();
    }
    adj
}

/// Vertex of the quotient graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    /// Not yet eliminated, with its current degree
    Variable(usize),
    /// Eliminated; its list holds the variables of the clique it induced
    Element,
    /// Element merged into a later one
    Absorbed,
}

impl Default for Node {
    fn default() -> Self {
        Node::Variable(0)
    }
}

/// Minimum degree elimination on the quotient graph.
///
/// An eliminated vertex becomes an element standing for the clique of its
/// neighbours, so fill edges are never stored. Elements adjacent to the
/// pivot are absorbed into the new one, and variables drop direct edges that
/// the new element already implies. Degrees are exact counts over direct
/// neighbours and elements. The heap keeps stale entries and skips them on
/// pop; ties go to the lowest vertex number, so the ordering is deterministic.
fn minimum_degree(mut adj: Graph) -> NativeBuf<usize> {
    let n = adj.len();
    let mut node = NativeBuf::<Node>::zeroed(n);
    let mut mark = NativeBuf::<usize>::zeroed(n);
    let mut stamp = 0_usize;
    let mut heap = BinaryHeap::with_capacity(n);
    for (v, list) in adj.iter().enumerate() {
        node[v] = Node::Variable(list.len());
        heap.push(Reverse((list.len(), v)));
    }

    let mut order = NativeBuf::with_capacity(n);
    let mut reach = NativeBuf::<usize>::with_capacity(n);
    while let Some(Reverse((degree, p))) = heap.pop() {
        if node[p] != Node::Variable(degree) {
            continue;
        }
        order.push(p);

        // variables adjacent to p in the elimination graph
        stamp += 1;
        mark[p] = stamp;
        reach.clear();
        let neighbours = std::mem::replace(&mut adj[p], NativeBuf::with_capacity(0));
        for &v in neighbours.iter() {
            match node[v] {
                Node::Variable(_) => {
                    if mark[v] != stamp {
                        mark[v] = stamp;
                        reach.push(v);
                    }
                }
                Node::Element => {
                    for &w in adj[v].iter() {
                        if matches!(node[w], Node::Variable(_)) && mark[w] != stamp {
                            mark[w] = stamp;
                            reach.push(w);
                        }
                    }
                    node[v] = Node::Absorbed;
                    adj[v] = NativeBuf::with_capacity(0);
                }
                Node::Absorbed => {}
            }
        }
        drop(neighbours);
        node[p] = Node::Element;
        adj[p] = NativeBuf::from_slice(&reach);

        for &v in reach.iter() {
            adj[v].retain(|&w| match node[w] {
                Node::Variable(_) => mark[w] != stamp,
                Node::Element => w != p,
                Node::Absorbed => false,
            });
            adj[v].push(p);
        }

        for &v in reach.iter() {
            stamp += 1;
            mark[v] = stamp;
            let mut degree = 0;
            for &w in adj[v].iter() {
                match node[w] {
                    Node::Variable(_) => {
                        if mark[w] != stamp {
                            mark[w] = stamp;
                            degree += 1;
                        }
                    }
                    Node::Element => {
                        for &x in adj[w].iter() {
                            if matches!(node[x], Node::Variable(_)) && mark[x] != stamp {
                                mark[x] = stamp;
                                degree += 1;
                            }
                        }
                    }
                    Node::Absorbed => {}
                }
            }
            node[v] = Node::Variable(degree);
            heap.push(Reverse((degree, v)));
        }
    }

    if order.len() != n {
        abort(AbortKind::Internal, "minimum degree left vertices unordered");
    }
    order
}

/// Greedy large-diagonal row matching.
///
/// Columns are visited by decreasing largest (scaled) magnitude; each takes
/// the unmatched row holding its largest entry. Rows left unmatched fill the
/// remaining slots in increasing order. Returns `pre` with `pre[r]` the slot
/// of original row `r`.
pub(crate) fn large_diag<T: SluScalar>(
    a: &CompRef<'_, T>,
    scaling: Option<&Equilibration>,
) -> NativeBuf<i32> {
    let n = a.n;
    let magnitude = |r: usize, c: usize, v: &T| -> f64 {
        scaling.map_or(1.0, |s| s.row_scale(r) * s.col_scale(c)) * v.norm()
    };

    let mut col_max = NativeBuf::<f64>::zeroed(n);
    for (c, max) in col_max.iter_mut().enumerate() {
        for (r, v) in a.column(c) {
            let r = checked_index(r, n, a.index_name);
            *max = max.max(magnitude(r, c, v));
        }
    }
    let mut cols = NativeBuf::<usize>::with_capacity(n);
    (0..n).for_each(|c| cols.push(c));
    cols.sort_by(|&x, &y| col_max[y].total_cmp(&col_max[x]));

    let mut pre = NativeBuf::filled(n, -1_i32);
    let mut slot_taken = NativeBuf::<bool>::zeroed(n);
    for &c in cols.iter() {
        let best = a
            .column(c)
            .map(|(r, v)| (r as usize, magnitude(r as usize, c, v)))
            .filter(|&(r, m)| m > 0.0 && pre[r] < 0)
            .fold(None, |best: Option<(usize, f64)>, (r, m)| match best {
                Some((_, bm)) if bm >= m => best,
                _ => Some((r, m)),
            });
        if let Some((r, _)) = best {
            pre[r] = c as i32;
            slot_taken[c] = true;
        }
    }

    let mut free_slots = (0..n).filter(|&s| !slot_taken[s]);
    for r in 0..n {
        if pre[r] < 0 {
            match free_slots.next() {
                Some(s) => pre[r] = s as i32,
                None => abort(AbortKind::Internal, "row matching ran out of slots"),
            }
        }
    }
    log::debug!(
        "large-diagonal row matching placed {} of {n} rows",
        slot_taken.iter().filter(|&&t| t).count()
    );
    pre
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_permutation(p: &[i32]) -> bool {
        let mut seen = vec![false; p.len()];
        p.iter().all(|&i| {
            let i = i as usize;
            i < p.len() && !std::mem::replace(&mut seen[i], true)
        })
    }

    fn graph(n: usize, edges: &[(usize, usize)]) -> Graph {
        let mut adj = empty_graph(n);
        for &(u, v) in edges {
            adj[u].push(v);
            adj[v].push(u);
        }
        adj
    }

    #[test]
    fn test_minimum_degree_prefers_leaves() {
        // star graph: centre 0 linked to 1, 2, 3
        let order = minimum_degree(graph(4, &[(0, 1), (0, 2), (0, 3)]));
        assert_eq!(order.as_slice(), &[1, 2, 0, 3]);
    }

    #[test]
    fn test_path_is_eliminated_from_the_ends() {
        let order = minimum_degree(graph(5, &[(0, 1), (1, 2), (2, 3), (3, 4)]));
        assert_eq!(order[0], 0);
        assert_eq!(order.len(), 5);
        let mut sorted = order.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_grid_ordering_scales() {
        // five-point stencil on a 60 x 60 grid
        let side = 60;
        let mut edges = Vec::new();
        for i in 0..side {
            for j in 0..side {
                let v = i * side + j;
                if j + 1 < side {
                    edges.push((v, v + 1));
                }
                if i + 1 < side {
                    edges.push((v, v + side));
                }
            }
        }
        let base = crate::native::live_allocations();
        let order = minimum_degree(graph(side * side, &edges));
        // corners have the smallest degree
        assert_eq!(order[0], 0);
        let perm: Vec<i32> = order.iter().map(|&v| v as i32).collect();
        assert!(is_permutation(&perm));
        drop(order);
        assert_eq!(crate::native::live_allocations(), base);
    }

    #[test]
    fn test_orderings_are_permutations() {
        // arrow matrix: dense first row and column plus diagonal
        let colptr = [0, 4, 6, 8, 10];
        let rowind = [0, 1, 2, 3, 0, 1, 0, 2, 0, 3];
        let values = [4.0_f64; 10];
        let a = CompRef {
            n: 4,
            nnz: 10,
            values: &values,
            rowind: &rowind,
            colptr: &colptr,
            index_name: "row index",
        };
        for (col_perm, symmetric) in [
            (ColPerm::Natural, false),
            (ColPerm::MmdAtA, false),
            (ColPerm::MmdAtPlusA, false),
            (ColPerm::Colamd, true),
        ] {
            let mut perm_c = [0_i32; 4];
            get_perm_c(col_perm, symmetric, &a, &mut perm_c);
            assert!(is_permutation(&perm_c), "{col_perm:?}: {perm_c:?}");
        }

        let mut perm_c = [0_i32; 4];
        get_perm_c(ColPerm::MmdAtPlusA, false, &a, &mut perm_c);
        // the dense column waits until its degree has dropped to one
        assert!(perm_c[0] >= 2, "{perm_c:?}");
    }
}
