//! Elementwise math functions

use super::{Expr, IntoExpr, Node};
use crate::{dtype::Constant, scalar::Float};

macro_rules! unary_funcs {
    ($($fn:ident => $variant:ident, $host:expr;)*) => {
        /// Elementwise function applied by a unary node
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub(crate) enum UnaryFunc {
            Neg,
            $($variant,)*
        }

        impl UnaryFunc {
            /// Tag in kernel names, also the `OpenCL` builtin name
            pub(crate) const fn tag(self) -> &'static str {
                match self {
                    UnaryFunc::Neg => "neg",
                    $(UnaryFunc::$variant => stringify!($fn),)*
                }
            }

            /// Text around the argument in kernel source
            pub(crate) const fn ocl(self) -> (&'static str, &'static str) {
                match self {
                    UnaryFunc::Neg => ("(-", ")"),
                    $(UnaryFunc::$variant => (concat!(stringify!($fn), "("), ")"),)*
                }
            }

            fn eval_f64(self, x: f64) -> f64 {
                match self {
                    UnaryFunc::Neg => -x,
                    $(UnaryFunc::$variant => {
                        let f: fn(f64) -> f64 = $host;
                        f(x)
                    })*
                }
            }
        }

        $(
            #[doc = concat!("Elementwise `", stringify!($fn), "`")]
            pub fn $fn<'a, T: Float>(x: impl IntoExpr<'a, T>) -> Expr<'a, T> {
                Expr::new(Node::Unary { func: UnaryFunc::$variant, x: Box::new(x.into_expr().node) })
            }
        )*
    };
}

unary_funcs! {
    acos => Acos, f64::acos;
    acosh => Acosh, f64::acosh;
    acospi => Acospi, |x| x.acos() / core::f64::consts::PI;
    asin => Asin, f64::asin;
    asinh => Asinh, f64::asinh;
    asinpi => Asinpi, |x| x.asin() / core::f64::consts::PI;
    atan => Atan, f64::atan;
    atanh => Atanh, f64::atanh;
    atanpi => Atanpi, |x| x.atan() / core::f64::consts::PI;
    cbrt => Cbrt, f64::cbrt;
    ceil => Ceil, f64::ceil;
    cos => Cos, f64::cos;
    cosh => Cosh, f64::cosh;
    cospi => Cospi, |x| (x * core::f64::consts::PI).cos();
    exp => Exp, f64::exp;
    exp2 => Exp2, f64::exp2;
    exp10 => Exp10, |x| 10f64.powf(x);
    expm1 => Expm1, f64::exp_m1;
    fabs => Fabs, f64::abs;
    floor => Floor, f64::floor;
    log => Log, f64::ln;
    log2 => Log2, f64::log2;
    log10 => Log10, f64::log10;
    log1p => Log1p, f64::ln_1p;
    rint => Rint, f64::round_ties_even;
    round => Round, f64::round;
    rsqrt => Rsqrt, |x| 1.0 / x.sqrt();
    sin => Sin, f64::sin;
    sinh => Sinh, f64::sinh;
    sinpi => Sinpi, |x| (x * core::f64::consts::PI).sin();
    sqrt => Sqrt, f64::sqrt;
    tan => Tan, f64::tan;
    tanh => Tanh, f64::tanh;
    tanpi => Tanpi, |x| (x * core::f64::consts::PI).tan();
    trunc => Trunc, f64::trunc;
}

impl UnaryFunc {
    /// Host evaluation. Math functions only see floats, negation wraps on integers.
    pub(crate) fn apply(self, x: Constant) -> Constant {
        match (self, x) {
            (UnaryFunc::Neg, Constant::U8(v)) => Constant::U8(v.wrapping_neg()),
            (UnaryFunc::Neg, Constant::U16(v)) => Constant::U16(v.wrapping_neg()),
            (UnaryFunc::Neg, Constant::U32(v)) => Constant::U32(v.wrapping_neg()),
            (UnaryFunc::Neg, Constant::U64(v)) => Constant::U64(v.wrapping_neg()),
            (UnaryFunc::Neg, Constant::I8(v)) => Constant::I8(v.wrapping_neg()),
            (UnaryFunc::Neg, Constant::I16(v)) => Constant::I16(v.wrapping_neg()),
            (UnaryFunc::Neg, Constant::I32(v)) => Constant::I32(v.wrapping_neg()),
            (UnaryFunc::Neg, Constant::I64(v)) => Constant::I64(v.wrapping_neg()),
            (func, x) => Constant::from_f64(x.dtype(), func.eval_f64(x.as_f64())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::UnaryFunc;
    use crate::dtype::Constant;

    #[test]
    fn tags() {
        assert_eq!(UnaryFunc::Sqrt.tag(), "sqrt");
        assert_eq!(UnaryFunc::Exp10.ocl(), ("exp10(", ")"));
        assert_eq!(UnaryFunc::Neg.ocl(), ("(-", ")"));
    }

    #[test]
    fn host_eval() {
        assert_eq!(UnaryFunc::Sqrt.apply(Constant::F32(9.0)), Constant::F32(3.0));
        assert_eq!(UnaryFunc::Rint.apply(Constant::F64(2.5)), Constant::F64(2.0));
        assert_eq!(UnaryFunc::Round.apply(Constant::F64(2.5)), Constant::F64(3.0));
        assert_eq!(UnaryFunc::Neg.apply(Constant::I32(5)), Constant::I32(-5));
        assert_eq!(UnaryFunc::Neg.apply(Constant::F32(1.5)), Constant::F32(-1.5));
    }
}
