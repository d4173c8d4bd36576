//! Trait describing host types that can be stored in device arrays

use crate::dtype::{Constant, DType};
use half::f16;

/// Scalar trait is implemented for all [dtypes](DType)
pub trait Scalar:
    bytemuck::Pod + Copy + Clone + Sized + core::fmt::Debug + 'static + PartialEq + Send + Sync
{
    /// Get dtype of Self
    #[must_use]
    fn dtype() -> DType;
    /// Wrap self as a typed constant
    #[must_use]
    fn into_constant(self) -> Constant;
    /// Unwrap a typed constant, `None` if it holds a different type
    #[must_use]
    fn from_constant(constant: Constant) -> Option<Self>;
    /// Byte size of Self
    #[must_use]
    fn byte_size() -> usize {
        Self::dtype().byte_size()
    }
}

/// Floating point scalars, the element types accepted by math functions
pub trait Float: Scalar {}

macro_rules! impl_scalar {
    ($t:ty, $variant:ident) => {
        impl Scalar for $t {
            fn dtype() -> DType {
                DType::$variant
            }

            fn into_constant(self) -> Constant {
                Constant::$variant(self)
            }

            fn from_constant(constant: Constant) -> Option<Self> {
                if let Constant::$variant(x) = constant {
                    Some(x)
                } else {
                    None
                }
            }
        }
    };
}

impl_scalar!(f16, F16);
impl_scalar!(f32, F32);
impl_scalar!(f64, F64);
impl_scalar!(u8, U8);
impl_scalar!(u16, U16);
impl_scalar!(u32, U32);
impl_scalar!(u64, U64);
impl_scalar!(i8, I8);
impl_scalar!(i16, I16);
impl_scalar!(i32, I32);
impl_scalar!(i64, I64);

impl Float for f16 {}
impl Float for f32 {}
impl Float for f64 {}
