//! Host array interface
//!
//! The host owns its buffers as `ndarray` arrays. Values cross the boundary as
//! kind-erased views ([`HostArray`], [`HostArrayMut`]) so that element and
//! index types can be checked at runtime, the way a dynamically typed caller
//! would hand them over. Results come back as owned [`DenseArray`]s.

use crate::traits::ElementKind;
use ndarray::{Array, ArrayD, ArrayView, ArrayViewD, ArrayViewMut, ArrayViewMutD, Dimension};
use num_complex::{Complex32, Complex64};

/// Element type of a host buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostDType {
    Int32,
    Int64,
    Float32,
    Float64,
    Complex32,
    Complex64,
}

impl HostDType {
    /// Solver element kind stored by this dtype, if any
    pub fn element_kind(self) -> Option<ElementKind> {
        match self {
            HostDType::Float32 => Some(ElementKind::Single),
            HostDType::Float64 => Some(ElementKind::Double),
            HostDType::Complex32 => Some(ElementKind::ComplexSingle),
            HostDType::Complex64 => Some(ElementKind::ComplexDouble),
            HostDType::Int32 | HostDType::Int64 => None,
        }
    }
}

/// Borrowed host buffer of any supported dtype
#[derive(Debug, Clone)]
pub enum HostArray<'a> {
    Int32(ArrayViewD<'a, i32>),
    Int64(ArrayViewD<'a, i64>),
    Float32(ArrayViewD<'a, f32>),
    Float64(ArrayViewD<'a, f64>),
    Complex32(ArrayViewD<'a, Complex32>),
    Complex64(ArrayViewD<'a, Complex64>),
}

/// Mutably borrowed host buffer, used for in-place solves
#[derive(Debug)]
pub enum HostArrayMut<'a> {
    Int32(ArrayViewMutD<'a, i32>),
    Int64(ArrayViewMutD<'a, i64>),
    Float32(ArrayViewMutD<'a, f32>),
    Float64(ArrayViewMutD<'a, f64>),
    Complex32(ArrayViewMutD<'a, Complex32>),
    Complex64(ArrayViewMutD<'a, Complex64>),
}

macro_rules! dispatch_host {
    ($host:expr, $enum:ident, |$v:ident| $body:expr) => {
        match $host {
            $enum::Int32($v) => $body,
            $enum::Int64($v) => $body,
            $enum::Float32($v) => $body,
            $enum::Float64($v) => $body,
            $enum::Complex32($v) => $body,
            $enum::Complex64($v) => $body,
        }
    };
}

impl<'a> HostArray<'a> {
    pub fn dtype(&self) -> HostDType {
        match self {
            HostArray::Int32(_) => HostDType::Int32,
            HostArray::Int64(_) => HostDType::Int64,
            HostArray::Float32(_) => HostDType::Float32,
            HostArray::Float64(_) => HostDType::Float64,
            HostArray::Complex32(_) => HostDType::Complex32,
            HostArray::Complex64(_) => HostDType::Complex64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch_host!(self, HostArray, |v| v.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        dispatch_host!(self, HostArray, |v| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the buffer is laid out column-major without gaps
    pub fn is_fortran_contiguous(&self) -> bool {
        dispatch_host!(self, HostArray, |v| v.t().is_standard_layout())
    }

    /// Borrow as an `i32` slice when the buffer is a contiguous 1-D `Int32` array
    pub fn as_index_slice(&self) -> Option<&'a [i32]> {
        match self {
            HostArray::Int32(v) if v.ndim() == 1 => v.to_slice(),
            _ => None,
        }
    }
}

impl<'a> HostArrayMut<'a> {
    pub fn dtype(&self) -> HostDType {
        match self {
            HostArrayMut::Int32(_) => HostDType::Int32,
            HostArrayMut::Int64(_) => HostDType::Int64,
            HostArrayMut::Float32(_) => HostDType::Float32,
            HostArrayMut::Float64(_) => HostDType::Float64,
            HostArrayMut::Complex32(_) => HostDType::Complex32,
            HostArrayMut::Complex64(_) => HostDType::Complex64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch_host!(self, HostArrayMut, |v| v.shape())
    }

    pub fn is_fortran_contiguous(&self) -> bool {
        dispatch_host!(self, HostArrayMut, |v| v.t().is_standard_layout())
    }
}

/// Element types a host buffer may hold
pub trait HostElement: Sized + 'static {
    fn wrap(view: ArrayViewD<'_, Self>) -> HostArray<'_>;
    fn wrap_mut(view: ArrayViewMutD<'_, Self>) -> HostArrayMut<'_>;
}

macro_rules! impl_host_element {
    ($t:ty, $variant:ident) => {
        impl HostElement for $t {
            fn wrap(view: ArrayViewD<'_, Self>) -> HostArray<'_> {
                HostArray::$variant(view)
            }

            fn wrap_mut(view: ArrayViewMutD<'_, Self>) -> HostArrayMut<'_> {
                HostArrayMut::$variant(view)
            }
        }
    };
}

impl_host_element!(i32, Int32);
impl_host_element!(i64, Int64);
impl_host_element!(f32, Float32);
impl_host_element!(f64, Float64);
impl_host_element!(Complex32, Complex32);
impl_host_element!(Complex64, Complex64);

impl<'a, T: HostElement, D: Dimension> From<ArrayView<'a, T, D>> for HostArray<'a> {
    fn from(view: ArrayView<'a, T, D>) -> Self {
        T::wrap(view.into_dyn())
    }
}

impl<'a, T: HostElement, D: Dimension> From<&'a Array<T, D>> for HostArray<'a> {
    fn from(array: &'a Array<T, D>) -> Self {
        T::wrap(array.view().into_dyn())
    }
}

impl<'a, T: HostElement> From<&'a [T]> for HostArray<'a> {
    fn from(slice: &'a [T]) -> Self {
        T::wrap(ArrayView::from(slice).into_dyn())
    }
}

impl<'a, T: HostElement> From<&'a Vec<T>> for HostArray<'a> {
    fn from(vec: &'a Vec<T>) -> Self {
        HostArray::from(vec.as_slice())
    }
}

impl<'a, T: HostElement, D: Dimension> From<ArrayViewMut<'a, T, D>> for HostArrayMut<'a> {
    fn from(view: ArrayViewMut<'a, T, D>) -> Self {
        T::wrap_mut(view.into_dyn())
    }
}

impl<'a, T: HostElement, D: Dimension> From<&'a mut Array<T, D>> for HostArrayMut<'a> {
    fn from(array: &'a mut Array<T, D>) -> Self {
        T::wrap_mut(array.view_mut().into_dyn())
    }
}

/// Owned dense result in one of the solver's element kinds.
///
/// Arrays are stored column-major (Fortran order) and keep the shape of the
/// right-hand side they were computed from.
#[derive(Debug, Clone, PartialEq)]
pub enum DenseArray {
    Single(ArrayD<f32>),
    Double(ArrayD<f64>),
    ComplexSingle(ArrayD<Complex32>),
    ComplexDouble(ArrayD<Complex64>),
}

impl DenseArray {
    pub fn kind(&self) -> ElementKind {
        match self {
            DenseArray::Single(_) => ElementKind::Single,
            DenseArray::Double(_) => ElementKind::Double,
            DenseArray::ComplexSingle(_) => ElementKind::ComplexSingle,
            DenseArray::ComplexDouble(_) => ElementKind::ComplexDouble,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            DenseArray::Single(a) => a.shape(),
            DenseArray::Double(a) => a.shape(),
            DenseArray::ComplexSingle(a) => a.shape(),
            DenseArray::ComplexDouble(a) => a.shape(),
        }
    }

    /// Unwrap into a typed array; `None` if the kind differs
    pub fn into_typed<T: crate::SluScalar>(self) -> Option<ArrayD<T>> {
        T::from_dense(self)
    }

    pub fn into_f32(self) -> Option<ArrayD<f32>> {
        self.into_typed()
    }

    pub fn into_f64(self) -> Option<ArrayD<f64>> {
        self.into_typed()
    }

    pub fn into_c32(self) -> Option<ArrayD<Complex32>> {
        self.into_typed()
    }

    pub fn into_c64(self) -> Option<ArrayD<Complex64>> {
        self.into_typed()
    }

    /// Borrow as a host view, e.g. to feed a solution back in as a right-hand side
    pub fn as_host(&self) -> HostArray<'_> {
        match self {
            DenseArray::Single(a) => HostArray::Float32(a.view()),
            DenseArray::Double(a) => HostArray::Float64(a.view()),
            DenseArray::ComplexSingle(a) => HostArray::Complex32(a.view()),
            DenseArray::ComplexDouble(a) => HostArray::Complex64(a.view()),
        }
    }
}
