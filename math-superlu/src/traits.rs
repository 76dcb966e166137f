//! Element kinds and the scalar trait the solver layer is generic over
//!
//! The solver supports exactly four numeric element kinds, following the
//! classic `s`/`d`/`c`/`z` routine prefixes:
//! - [`ElementKind::Single`] (`f32`)
//! - [`ElementKind::Double`] (`f64`)
//! - [`ElementKind::ComplexSingle`] (`Complex32`)
//! - [`ElementKind::ComplexDouble`] (`Complex64`)

use crate::host::{DenseArray, HostArray, HostArrayMut, HostDType};
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};
use num_complex::{Complex32, Complex64};
use num_traits::{NumAssign, One, Zero};
use std::fmt::{self, Debug};
use std::ops::Neg;

/// Numeric element kind of a solver matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Single,
    Double,
    ComplexSingle,
    ComplexDouble,
}

impl ElementKind {
    /// Routine prefix used by the solver (`s`, `d`, `c`, `z`)
    pub fn prefix(self) -> char {
        match self {
            ElementKind::Single => 's',
            ElementKind::Double => 'd',
            ElementKind::ComplexSingle => 'c',
            ElementKind::ComplexDouble => 'z',
        }
    }

    pub fn is_complex(self) -> bool {
        matches!(self, ElementKind::ComplexSingle | ElementKind::ComplexDouble)
    }

    /// Host dtype storing this kind without conversion
    pub fn dtype(self) -> HostDType {
        match self {
            ElementKind::Single => HostDType::Float32,
            ElementKind::Double => HostDType::Float64,
            ElementKind::ComplexSingle => HostDType::Complex32,
            ElementKind::ComplexDouble => HostDType::Complex64,
        }
    }

    /// Whether a dense host buffer of `dtype` may be copied into this kind.
    ///
    /// Only value-preserving conversions are allowed: identity, single to
    /// double precision and real to complex of at least the same precision.
    pub fn can_cast_from(self, dtype: HostDType) -> bool {
        use HostDType::*;
        match self {
            ElementKind::Single => matches!(dtype, Float32),
            ElementKind::Double => matches!(dtype, Float32 | Float64),
            ElementKind::ComplexSingle => matches!(dtype, Float32 | Complex32),
            ElementKind::ComplexDouble => {
                matches!(dtype, Float32 | Float64 | Complex32 | Complex64)
            }
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Single => "float32",
            ElementKind::Double => "float64",
            ElementKind::ComplexSingle => "complex32",
            ElementKind::ComplexDouble => "complex64",
        };
        f.write_str(name)
    }
}

/// Scalar types the solver layer can factor.
///
/// Magnitudes and tolerances are carried as `f64` regardless of the working
/// precision, which keeps pivoting and dropping code free of precision
/// generics.
pub trait SluScalar:
    NumAssign + Copy + Default + Send + Sync + Debug + Zero + One + Neg<Output = Self> + 'static
{
    /// Element kind tag of this scalar
    const KIND: ElementKind;

    /// Unit roundoff of the working precision
    const EPSILON: f64;

    /// Complex conjugate
    fn conj(&self) -> Self;

    /// Magnitude |z|
    fn norm(&self) -> f64;

    /// Multiplicative inverse (1/z)
    fn inv(&self) -> Self;

    /// Create from a real value
    fn from_real(r: f64) -> Self;

    /// Widen to double complex (used for extended-precision residuals)
    fn to_c64(&self) -> Complex64;

    /// Narrow from double complex; real kinds keep the real part
    fn from_c64(z: Complex64) -> Self;

    /// Multiply by a real factor
    #[inline]
    fn scale(self, s: f64) -> Self {
        self * Self::from_real(s)
    }

    /// Unit-modulus sign of the value (1 for zero)
    #[inline]
    fn signum(&self) -> Self {
        let r = self.norm();
        if r == 0.0 { Self::one() } else { self.scale(1.0 / r) }
    }

    /// Wrap an owned array into the kind-erased output type
    fn into_dense(array: ArrayD<Self>) -> DenseArray;

    /// Unwrap the kind-erased output type if it holds this kind
    fn from_dense(dense: DenseArray) -> Option<ArrayD<Self>>;

    /// Borrow a host view if it holds exactly this kind
    fn host_view<'a>(host: &HostArray<'a>) -> Option<ArrayViewD<'a, Self>>;

    /// Take a mutable host view if it holds exactly this kind
    fn host_view_mut(host: HostArrayMut<'_>) -> Option<ArrayViewMutD<'_, Self>>;
}

macro_rules! impl_slu_scalar {
    ($t:ty, $kind:ident, $host:ident, $eps:expr,
     norm: |$n:ident| $norm:expr,
     conj: |$c:ident| $conj:expr,
     inv: |$i:ident| $inv:expr,
     from_real: |$r:ident| $from_real:expr,
     to_c64: |$w:ident| $to_c64:expr,
     from_c64: |$z:ident| $from_c64:expr) => {
        impl SluScalar for $t {
            const KIND: ElementKind = ElementKind::$kind;
            const EPSILON: f64 = $eps;

            #[inline]
            fn conj(&self) -> Self {
                let $c = *self;
                $conj
            }

            #[inline]
            fn norm(&self) -> f64 {
                let $n = *self;
                $norm
            }

            #[inline]
            fn inv(&self) -> Self {
                let $i = *self;
                $inv
            }

            #[inline]
            fn from_real($r: f64) -> Self {
                $from_real
            }

            #[inline]
            fn to_c64(&self) -> Complex64 {
                let $w = *self;
                $to_c64
            }

            #[inline]
            fn from_c64($z: Complex64) -> Self {
                $from_c64
            }

            fn into_dense(array: ArrayD<Self>) -> DenseArray {
                DenseArray::$kind(array)
            }

            fn from_dense(dense: DenseArray) -> Option<ArrayD<Self>> {
                match dense {
                    DenseArray::$kind(array) => Some(array),
                    _ => None,
                }
            }

            fn host_view<'a>(host: &HostArray<'a>) -> Option<ArrayViewD<'a, Self>> {
                match host {
                    HostArray::$host(view) => Some(view.clone()),
                    _ => None,
                }
            }

            fn host_view_mut(host: HostArrayMut<'_>) -> Option<ArrayViewMutD<'_, Self>> {
                match host {
                    HostArrayMut::$host(view) => Some(view),
                    _ => None,
                }
            }
        }
    };
}

impl_slu_scalar!(f32, Single, Float32, f32::EPSILON as f64,
    norm: |x| f32::abs(x) as f64,
    conj: |x| x,
    inv: |x| 1.0 / x,
    from_real: |r| r as f32,
    to_c64: |x| Complex64::new(x as f64, 0.0),
    from_c64: |z| z.re as f32);

impl_slu_scalar!(f64, Double, Float64, f64::EPSILON,
    norm: |x| f64::abs(x),
    conj: |x| x,
    inv: |x| 1.0 / x,
    from_real: |r| r,
    to_c64: |x| Complex64::new(x, 0.0),
    from_c64: |z| z.re);

impl_slu_scalar!(Complex32, ComplexSingle, Complex32, f32::EPSILON as f64,
    norm: |z| Complex32::norm(z) as f64,
    conj: |z| Complex32::conj(&z),
    inv: |z| {
        let denom = z.re * z.re + z.im * z.im;
        Complex32::new(z.re / denom, -z.im / denom)
    },
    from_real: |r| Complex32::new(r as f32, 0.0),
    to_c64: |z| Complex64::new(z.re as f64, z.im as f64),
    from_c64: |z| Complex32::new(z.re as f32, z.im as f32));

impl_slu_scalar!(Complex64, ComplexDouble, Complex64, f64::EPSILON,
    norm: |z| Complex64::norm(z),
    conj: |z| Complex64::conj(&z),
    inv: |z| {
        let denom = z.re * z.re + z.im * z.im;
        Complex64::new(z.re / denom, -z.im / denom)
    },
    from_real: |r| Complex64::new(r, 0.0),
    to_c64: |z| z,
    from_c64: |z| z);

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_complex64_scalar() {
        let z = Complex64::new(3.0, 4.0);
        assert_relative_eq!(SluScalar::norm(&z), 5.0);

        let z_conj = SluScalar::conj(&z);
        assert_relative_eq!(z_conj.re, 3.0);
        assert_relative_eq!(z_conj.im, -4.0);

        let product = z * SluScalar::inv(&z);
        assert_relative_eq!(product.re, 1.0, epsilon = 1e-12);
        assert_relative_eq!(product.im, 0.0, epsilon = 1e-12);

        let s = SluScalar::signum(&z);
        assert_relative_eq!(SluScalar::norm(&s), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_real_scalars() {
        assert_relative_eq!(SluScalar::norm(&-2.5_f64), 2.5);
        assert_relative_eq!(SluScalar::inv(&4.0_f32), 0.25);
        assert_eq!(<f64 as SluScalar>::from_c64(Complex64::new(1.5, 9.0)), 1.5);
        assert_eq!(SluScalar::signum(&0.0_f64), 1.0);
        assert_eq!(<f32 as SluScalar>::KIND.prefix(), 's');
    }

    #[test]
    fn test_cast_rules() {
        assert!(ElementKind::ComplexDouble.can_cast_from(HostDType::Float32));
        assert!(ElementKind::Double.can_cast_from(HostDType::Float32));
        assert!(!ElementKind::Single.can_cast_from(HostDType::Float64));
        assert!(!ElementKind::Double.can_cast_from(HostDType::Complex64));
        assert!(!ElementKind::Double.can_cast_from(HostDType::Int32));
        assert!(!ElementKind::ComplexSingle.can_cast_from(HostDType::Float64));
    }
}
