//! User defined device functions

use super::{Expr, IntoExpr, Node};
use crate::{
    dtype::{Constant, DType},
    error::ClError,
    scalar::Scalar,
};
use core::{fmt::Write, marker::PhantomData};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};

type HostFn = Box<dyn Fn(&[Constant]) -> Constant + Send + Sync>;

/// Untyped definition shared by every call node of one function
pub(crate) struct FunctionDef {
    pub(crate) name: String,
    pub(crate) body: String,
    pub(crate) ret: DType,
    pub(crate) args: Vec<DType>,
    host: Option<HostFn>,
}

impl core::fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("ret", &self.ret)
            .field("args", &self.args)
            .field("host", &self.host.is_some())
            .finish()
    }
}

impl FunctionDef {
    /// Emits `ret name(A1 prm1, ..., AN prmN) { body }`
    pub(crate) fn declare(&self, sink: &mut String, name: &str) {
        let _ = write!(sink, "{} {name}(", self.ret.ocl());
        for (k, arg) in self.args.iter().enumerate() {
            if k > 0 {
                sink.push(',');
            }
            let _ = write!(sink, "\n\t{} prm{}", arg.ocl(), k + 1);
        }
        let _ = write!(sink, "\n\t)\n{{\n{}\n}}\n\n", self.body);
    }

    pub(crate) fn has_host(&self) -> bool {
        self.host.is_some()
    }

    /// Host evaluation, zero of the return type when no host implementation exists
    pub(crate) fn call_host(&self, args: &[Constant]) -> Constant {
        self.host.as_ref().map_or_else(|| Constant::zero(self.ret), |host| host(args))
    }
}

// name => definition every function of that name shares
static REGISTRY: Mutex<BTreeMap<String, Arc<FunctionDef>>> = Mutex::new(BTreeMap::new());

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Argument tuples of user functions
pub trait FunctionArgs: Sized + 'static {
    /// Element types of the arguments
    fn dtypes() -> Vec<DType>;
    /// Unwraps typed constants into the tuple
    fn from_constants(args: &[Constant]) -> Option<Self>;
}

/// Device function with return type `R` and argument tuple `Args`.
///
/// The body is `OpenCL` C referring to its arguments as `prm1..prmN`.
/// Functions used on host devices also need a host implementation.
///
/// ```ignore
/// let greater = UserFunction::<i32, (f32, f32)>::with_host(
///     "greater",
///     "return prm1 > prm2 ? 1 : 0;",
///     |(a, b)| i32::from(a > b),
/// )?;
/// c.assign(greater.call(&a, &b))?;
/// ```
pub struct UserFunction<R, Args> {
    def: Arc<FunctionDef>,
    _marker: PhantomData<fn(Args) -> R>,
}

impl<R, Args> Clone for UserFunction<R, Args> {
    fn clone(&self) -> Self {
        UserFunction { def: self.def.clone(), _marker: PhantomData }
    }
}

impl<R, Args> core::fmt::Debug for UserFunction<R, Args> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&*self.def, f)
    }
}

impl<R: Scalar, Args: FunctionArgs> UserFunction<R, Args> {
    /// Device only function
    ///
    /// # Errors
    /// Returns error if `name` is not an identifier or is already registered
    /// with a different body or signature.
    pub fn new(name: &str, body: &str) -> Result<Self, ClError> {
        Self::define(name, body, None)
    }

    /// Function with a host implementation, usable on every backend.
    ///
    /// Functions of one name share one definition. The first host implementation
    /// registered under a name stays in use, `host` is ignored if one already exists.
    ///
    /// # Errors
    /// Returns error if `name` is not an identifier or is already registered
    /// with a different body or signature.
    pub fn with_host(
        name: &str,
        body: &str,
        host: impl Fn(Args) -> R + Send + Sync + 'static,
    ) -> Result<Self, ClError> {
        let ret = R::dtype();
        let host: HostFn = Box::new(move |args| {
            Args::from_constants(args).map_or_else(|| Constant::zero(ret), |args| host(args).into_constant())
        });
        Self::define(name, body, Some(host))
    }

    fn define(name: &str, body: &str, host: Option<HostFn>) -> Result<Self, ClError> {
        if !is_identifier(name) {
            return Err(ClError::InvalidFunctionName(name.into()));
        }
        let ret = R::dtype();
        let args = Args::dtypes();
        let mut registry = REGISTRY.lock();
        let def = match registry.get(name).cloned() {
            Some(def) if def.body != body || def.ret != ret || def.args != args => {
                return Err(ClError::FunctionRedefined(name.into()));
            }
            Some(def) if def.has_host() || host.is_none() => def,
            _ => {
                let def = Arc::new(FunctionDef { name: name.into(), body: body.into(), ret, args, host });
                registry.insert(name.into(), def.clone());
                def
            }
        };
        drop(registry);
        Ok(UserFunction { def, _marker: PhantomData })
    }

    /// Name of the function
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    fn call_node<'a>(&self, args: Vec<Node<'a>>) -> Expr<'a, R> {
        Expr::new(Node::Call { func: self.def.clone(), args })
    }
}

macro_rules! impl_function_args {
    ($($t:ident $a:ident),+) => {
        impl<$($t: Scalar),+> FunctionArgs for ($($t,)+) {
            fn dtypes() -> Vec<DType> {
                vec![$($t::dtype()),+]
            }

            fn from_constants(args: &[Constant]) -> Option<Self> {
                let mut args = args.iter();
                Some(($($t::from_constant(*args.next()?)?,)+))
            }
        }

        impl<R: Scalar, $($t: Scalar),+> UserFunction<R, ($($t,)+)> {
            /// Call node applying the function to the arguments elementwise
            #[allow(clippy::too_many_arguments)]
            pub fn call<'a>(&self, $($a: impl IntoExpr<'a, $t>),+) -> Expr<'a, R> {
                self.call_node(vec![$($a.into_expr().node),+])
            }
        }
    };
}

impl_function_args!(A a);
impl_function_args!(A a, B b);
impl_function_args!(A a, B b, C c);
impl_function_args!(A a, B b, C c, D d);
impl_function_args!(A a, B b, C c, D d, E e);
impl_function_args!(A a, B b, C c, D d, E e, F f);

#[cfg(test)]
mod tests {
    use super::UserFunction;
    use crate::error::ClError;

    #[test]
    fn declaration() -> Result<(), ClError> {
        let f = UserFunction::<f32, (f32, i32)>::new("scale_by", "return prm1 * prm2;")?;
        let mut sink = String::new();
        f.def.declare(&mut sink, "prm_fun");
        assert_eq!(sink, "float prm_fun(\n\tfloat prm1,\n\tint prm2\n\t)\n{\nreturn prm1 * prm2;\n}\n\n");
        Ok(())
    }

    #[test]
    fn registry() {
        assert!(matches!(
            UserFunction::<f32, (f32,)>::new("9lives", "return prm1;"),
            Err(ClError::InvalidFunctionName(_))
        ));
        assert!(UserFunction::<f32, (f32,)>::new("ident_twice", "return prm1;").is_ok());
        assert!(UserFunction::<f32, (f32,)>::new("ident_twice", "return prm1;").is_ok());
        assert!(matches!(
            UserFunction::<f32, (f32,)>::new("ident_twice", "return -prm1;"),
            Err(ClError::FunctionRedefined(_))
        ));
    }

    #[test]
    fn host_call() -> Result<(), ClError> {
        use crate::dtype::Constant;
        let f = UserFunction::<i32, (f32, f32)>::with_host("greater_host", "return prm1 > prm2;", |(a, b)| {
            i32::from(a > b)
        })?;
        assert_eq!(f.def.call_host(&[Constant::F32(2.0), Constant::F32(1.0)]), Constant::I32(1));
        assert_eq!(f.def.call_host(&[Constant::F32(0.0), Constant::F32(1.0)]), Constant::I32(0));
        Ok(())
    }
}
