//! Matrix descriptors of the solver layer
//!
//! A [`NativeMatrix`] is a tagged descriptor: dimensions plus an optional
//! [`Store`]. Input stores alias caller memory through [`Buffer::Borrowed`];
//! factor stores are built from [`NativeBuf`]s and are therefore always owned.
//! A descriptor whose store was never filled (or was already destroyed) has
//! `store == None`, so [`NativeMatrix::destroy`] is safe on any state.

use super::alloc::NativeBuf;
use crate::traits::{ElementKind, SluScalar};

/// Who frees a descriptor's arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Arrays alias caller memory; destroying frees the descriptor only
    Borrowed,
    /// Arrays were allocated by the solver layer and are freed with it
    Owned,
}

/// Storage format of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixFormat {
    CompressedColumn,
    CompressedRow,
    Dense,
    Supernodal,
    PermutedCompressedColumn,
}

/// Array referenced by a descriptor
#[derive(Debug)]
pub enum Buffer<'a, T: Copy + Default> {
    Borrowed(&'a [T]),
    BorrowedMut(&'a mut [T]),
    Owned(NativeBuf<T>),
}

impl<T: Copy + Default> Buffer<'_, T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            Buffer::Borrowed(s) => s,
            Buffer::BorrowedMut(s) => s,
            Buffer::Owned(buf) => buf.as_slice(),
        }
    }

    /// Writable access; read-only borrows have none
    pub fn as_mut_slice(&mut self) -> Option<&mut [T]> {
        match self {
            Buffer::Borrowed(_) => None,
            Buffer::BorrowedMut(s) => Some(s),
            Buffer::Owned(buf) => Some(buf.as_mut_slice()),
        }
    }

    pub fn ownership(&self) -> Ownership {
        match self {
            Buffer::Borrowed(_) | Buffer::BorrowedMut(_) => Ownership::Borrowed,
            Buffer::Owned(_) => Ownership::Owned,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compressed column or row triple
#[derive(Debug)]
pub struct CompressedStore<'a, T: Copy + Default> {
    pub nnz: usize,
    pub values: Buffer<'a, T>,
    /// Row indices (column format) or column indices (row format)
    pub indices: Buffer<'a, i32>,
    /// Column starts (column format) or row starts (row format)
    pub pointers: Buffer<'a, i32>,
}

/// Column-major dense block
#[derive(Debug)]
pub struct DenseStore<'a, T: Copy + Default> {
    /// Leading dimension
    pub lda: usize,
    pub values: Buffer<'a, T>,
}

/// Lower factor: unit lower triangular, partitioned into supernodes
#[derive(Debug)]
pub struct SupernodalStore<T: Copy + Default> {
    pub nnz: usize,
    pub nsuper: usize,
    /// Strictly-lower entries, diagonal implied
    pub values: NativeBuf<T>,
    pub rowind: NativeBuf<i32>,
    pub colptr: NativeBuf<i32>,
    /// First column of each supernode, plus a trailing `n`
    pub sup_to_col: NativeBuf<i32>,
    pub col_to_sup: NativeBuf<i32>,
}

/// Upper factor: column `j` occupies `colbeg[j]..colend[j]`, diagonal last
#[derive(Debug)]
pub struct PermutedStore<T: Copy + Default> {
    pub nnz: usize,
    pub values: NativeBuf<T>,
    pub rowind: NativeBuf<i32>,
    pub colbeg: NativeBuf<i32>,
    pub colend: NativeBuf<i32>,
}

#[derive(Debug)]
pub enum Store<'a, T: Copy + Default> {
    CompressedColumn(CompressedStore<'a, T>),
    CompressedRow(CompressedStore<'a, T>),
    Dense(DenseStore<'a, T>),
    Supernodal(SupernodalStore<T>),
    PermutedCompressedColumn(PermutedStore<T>),
}

impl<T: Copy + Default> Store<'_, T> {
    pub fn format(&self) -> MatrixFormat {
        match self {
            Store::CompressedColumn(_) => MatrixFormat::CompressedColumn,
            Store::CompressedRow(_) => MatrixFormat::CompressedRow,
            Store::Dense(_) => MatrixFormat::Dense,
            Store::Supernodal(_) => MatrixFormat::Supernodal,
            Store::PermutedCompressedColumn(_) => MatrixFormat::PermutedCompressedColumn,
        }
    }

    pub fn ownership(&self) -> Ownership {
        match self {
            Store::CompressedColumn(s) | Store::CompressedRow(s) => s.values.ownership(),
            Store::Dense(s) => s.values.ownership(),
            Store::Supernodal(_) | Store::PermutedCompressedColumn(_) => Ownership::Owned,
        }
    }
}

/// Borrowed compressed-column arrays of a square matrix
#[derive(Debug, Clone, Copy)]
pub struct CompRef<'s, T> {
    pub n: usize,
    pub nnz: usize,
    pub values: &'s [T],
    pub rowind: &'s [i32],
    pub colptr: &'s [i32],
    /// What the stored indices are called in the caller's format, for
    /// range-check messages
    pub index_name: &'static str,
}

/// Solver matrix descriptor
#[derive(Debug)]
pub struct NativeMatrix<'a, T: Copy + Default> {
    pub(crate) nrow: usize,
    pub(crate) ncol: usize,
    pub(crate) store: Option<Store<'a, T>>,
}

impl<'a, T: SluScalar> NativeMatrix<'a, T> {
    /// Descriptor without a store
    pub(crate) fn empty(nrow: usize, ncol: usize) -> Self {
        Self {
            nrow,
            ncol,
            store: None,
        }
    }

    pub(crate) fn compressed_column(n: usize, store: CompressedStore<'a, T>) -> Self {
        Self {
            nrow: n,
            ncol: n,
            store: Some(Store::CompressedColumn(store)),
        }
    }

    pub(crate) fn compressed_row(n: usize, store: CompressedStore<'a, T>) -> Self {
        Self {
            nrow: n,
            ncol: n,
            store: Some(Store::CompressedRow(store)),
        }
    }

    pub(crate) fn dense(nrow: usize, ncol: usize, values: Buffer<'a, T>) -> Self {
        Self {
            nrow,
            ncol,
            store: Some(Store::Dense(DenseStore {
                lda: nrow.max(1),
                values,
            })),
        }
    }

    pub fn nrow(&self) -> usize {
        self.nrow
    }

    pub fn ncol(&self) -> usize {
        self.ncol
    }

    pub fn kind(&self) -> ElementKind {
        T::KIND
    }

    /// `None` once destroyed (or never filled)
    pub fn format(&self) -> Option<MatrixFormat> {
        self.store.as_ref().map(Store::format)
    }

    pub fn ownership(&self) -> Option<Ownership> {
        self.store.as_ref().map(Store::ownership)
    }

    pub fn is_allocated(&self) -> bool {
        self.store.is_some()
    }

    pub fn nnz(&self) -> usize {
        match &self.store {
            Some(Store::CompressedColumn(s) | Store::CompressedRow(s)) => s.nnz,
            Some(Store::Dense(_)) => self.nrow * self.ncol,
            Some(Store::Supernodal(s)) => s.nnz,
            Some(Store::PermutedCompressedColumn(s)) => s.nnz,
            None => 0,
        }
    }

    /// Release the store. Owned arrays are freed, borrowed arrays are only
    /// forgotten. Calling this on an empty descriptor does nothing.
    pub(crate) fn destroy(&mut self) {
        if let Some(store) = self.store.take() {
            log::trace!(
                "destroying {:?} descriptor {}x{} ({:?})",
                store.format(),
                self.nrow,
                self.ncol,
                store.ownership()
            );
        }
    }

    /// Compressed arrays with their storage format
    pub(crate) fn compressed(&self) -> Option<(CompRef<'_, T>, MatrixFormat)> {
        let (s, format) = match &self.store {
            Some(Store::CompressedColumn(s)) => (s, MatrixFormat::CompressedColumn),
            Some(Store::CompressedRow(s)) => (s, MatrixFormat::CompressedRow),
            _ => return None,
        };
        Some((
            CompRef {
                n: self.ncol,
                nnz: s.nnz,
                values: s.values.as_slice(),
                rowind: s.indices.as_slice(),
                colptr: s.pointers.as_slice(),
                index_name: match format {
                    MatrixFormat::CompressedRow => "column index",
                    _ => "row index",
                },
            },
            format,
        ))
    }

    pub(crate) fn dense_mut(&mut self) -> Option<&mut DenseStore<'a, T>> {
        match &mut self.store {
            Some(Store::Dense(s)) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn supernodal(&self) -> Option<&SupernodalStore<T>> {
        match &self.store {
            Some(Store::Supernodal(s)) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn supernodal_mut(&mut self) -> Option<&mut SupernodalStore<T>> {
        match &mut self.store {
            Some(Store::Supernodal(s)) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn permuted(&self) -> Option<&PermutedStore<T>> {
        match &self.store {
            Some(Store::PermutedCompressedColumn(s)) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn permuted_mut(&mut self) -> Option<&mut PermutedStore<T>> {
        match &mut self.store {
            Some(Store::PermutedCompressedColumn(s)) => Some(s),
            _ => None,
        }
    }

    /// Move the store out, leaving this descriptor empty
    pub(crate) fn take(&mut self) -> NativeMatrix<'a, T> {
        NativeMatrix {
            nrow: self.nrow,
            ncol: self.ncol,
            store: self.store.take(),
        }
    }
}

impl<'s, T> CompRef<'s, T> {
    /// Entries of column `c` as `(row index, value)` pairs.
    ///
    /// Row indices are returned raw; the caller checks their range.
    pub(crate) fn column(&self, c: usize) -> impl Iterator<Item = (i32, &'s T)> + use<'s, T> {
        let start = self.colptr[c] as usize;
        let end = self.colptr[c + 1] as usize;
        self.rowind[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrowed_descriptor() {
        let values = [1.0_f64, 2.0];
        let rows = [0_i32, 1];
        let ptrs = [0_i32, 1, 2];
        let mut m = NativeMatrix::compressed_column(
            2,
            CompressedStore {
                nnz: 2,
                values: Buffer::Borrowed(&values),
                indices: Buffer::Borrowed(&rows),
                pointers: Buffer::Borrowed(&ptrs),
            },
        );
        assert_eq!(m.format(), Some(MatrixFormat::CompressedColumn));
        assert_eq!(m.ownership(), Some(Ownership::Borrowed));
        assert_eq!(m.kind(), ElementKind::Double);
        assert_eq!(m.nnz(), 2);

        let (a, _) = m.compressed().unwrap();
        let col1: Vec<(i32, f64)> = a.column(1).map(|(r, v)| (r, *v)).collect();
        assert_eq!(col1, vec![(1, 2.0)]);

        m.destroy();
        m.destroy();
        assert!(!m.is_allocated());
        assert_eq!(values, [1.0, 2.0]);
    }

    #[test]
    fn test_owned_dense_is_freed() {
        let base = super::super::live_allocations();
        let mut m = NativeMatrix::<f32>::dense(3, 1, Buffer::Owned(NativeBuf::zeroed(3)));
        assert_eq!(m.ownership(), Some(Ownership::Owned));
        assert_eq!(super::super::live_allocations(), base + 1);
        m.destroy();
        assert_eq!(super::super::live_allocations(), base);
    }
}
