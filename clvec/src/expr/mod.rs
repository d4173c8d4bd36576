//! Lazy expression trees over arrays.
//!
//! Operators on [`Array`] references, scalars and other expressions build an
//! [`Expr`]. Nothing runs until the expression is assigned to an array, at which
//! point the whole tree becomes one kernel.
//!
//! Every node answers the same six questions used by kernel synthesis and launch:
//! helper declarations it needs (`preamble`), its tag in the kernel name
//! (`kernel_name`), its formal parameters (`kernel_params`), the runtime values
//! bound to those parameters on a device (`kernel_args`), its contribution to the
//! per element body (`kernel_expr`) and how many elements it spans on a device
//! (`part_size`).

use crate::{
    array::Array,
    backend::{Buffer, KernelArg},
    context::Queue,
    dtype::{Constant, DType},
    error::ClError,
    scalar::Scalar,
};
use core::{fmt::Write, marker::PhantomData};
use half::f16;
use std::sync::Arc;

pub(crate) mod function;
pub(crate) mod unary;

pub use function::UserFunction;
use function::FunctionDef;
use unary::UnaryFunc;

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BOp {
    const fn tag(self) -> &'static str {
        match self {
            BOp::Add => "p",
            BOp::Sub => "m",
            BOp::Mul => "t",
            BOp::Div => "d",
        }
    }

    const fn ocl(self) -> &'static str {
        match self {
            BOp::Add => "+",
            BOp::Sub => "-",
            BOp::Mul => "*",
            BOp::Div => "/",
        }
    }

    /// Host evaluation. Integers wrap, integer division by zero gives zero.
    pub(crate) fn apply(self, x: Constant, y: Constant) -> Constant {
        macro_rules! float {
            ($x:expr, $y:expr) => {
                match self {
                    BOp::Add => $x + $y,
                    BOp::Sub => $x - $y,
                    BOp::Mul => $x * $y,
                    BOp::Div => $x / $y,
                }
            };
        }
        macro_rules! int {
            ($x:expr, $y:expr) => {
                match self {
                    BOp::Add => $x.wrapping_add($y),
                    BOp::Sub => $x.wrapping_sub($y),
                    BOp::Mul => $x.wrapping_mul($y),
                    BOp::Div => {
                        if $y == 0 {
                            0
                        } else {
                            $x.wrapping_div($y)
                        }
                    }
                }
            };
        }
        match (x, y) {
            (Constant::F16(x), Constant::F16(y)) => {
                Constant::F16(f16::from_f32(float!(x.to_f32(), y.to_f32())))
            }
            (Constant::F32(x), Constant::F32(y)) => Constant::F32(float!(x, y)),
            (Constant::F64(x), Constant::F64(y)) => Constant::F64(float!(x, y)),
            (Constant::U8(x), Constant::U8(y)) => Constant::U8(int!(x, y)),
            (Constant::U16(x), Constant::U16(y)) => Constant::U16(int!(x, y)),
            (Constant::U32(x), Constant::U32(y)) => Constant::U32(int!(x, y)),
            (Constant::U64(x), Constant::U64(y)) => Constant::U64(int!(x, y)),
            (Constant::I8(x), Constant::I8(y)) => Constant::I8(int!(x, y)),
            (Constant::I16(x), Constant::I16(y)) => Constant::I16(int!(x, y)),
            (Constant::I32(x), Constant::I32(y)) => Constant::I32(int!(x, y)),
            (Constant::I64(x), Constant::I64(y)) => Constant::I64(int!(x, y)),
            // Operands of one binary node always share a type
            (x, _) => x,
        }
    }
}

/// Borrowed view of an array inside an expression
#[derive(Debug, Clone, Copy)]
pub(crate) struct Terminal<'a> {
    pub(crate) dtype: DType,
    pub(crate) part: &'a [usize],
    pub(crate) buffers: &'a [Option<Buffer>],
    pub(crate) queues: &'a [Queue],
}

impl Terminal<'_> {
    fn part_size(&self, device: usize) -> usize {
        if device + 1 < self.part.len() {
            self.part[device + 1] - self.part[device]
        } else {
            0
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Node<'a> {
    Vector(Terminal<'a>),
    Scalar(Constant),
    Unary { func: UnaryFunc, x: Box<Node<'a>> },
    Binary { op: BOp, x: Box<Node<'a>>, y: Box<Node<'a>> },
    Call { func: Arc<FunctionDef>, args: Vec<Node<'a>> },
}

impl Node<'_> {
    /// Helper declarations, children first
    pub(crate) fn preamble(&self, sink: &mut String, name: &str) {
        match self {
            Node::Vector(_) | Node::Scalar(_) => {}
            Node::Unary { x, .. } => x.preamble(sink, name),
            Node::Binary { x, y, .. } => {
                x.preamble(sink, &format!("{name}l"));
                y.preamble(sink, &format!("{name}r"));
            }
            Node::Call { func, args } => {
                for (k, arg) in args.iter().enumerate() {
                    arg.preamble(sink, &format!("{name}{}", k + 1));
                }
                func.declare(sink, &format!("{name}_fun"));
            }
        }
    }

    /// Pre-order concatenation of node tags
    pub(crate) fn kernel_name(&self) -> String {
        let mut name = String::new();
        self.push_tag(&mut name);
        name
    }

    fn push_tag(&self, name: &mut String) {
        match self {
            Node::Vector(_) => name.push('v'),
            Node::Scalar(_) => name.push('c'),
            Node::Unary { func, x } => {
                name.push_str(func.tag());
                x.push_tag(name);
            }
            Node::Binary { op, x, y } => {
                name.push_str(op.tag());
                x.push_tag(name);
                y.push_tag(name);
            }
            Node::Call { func, args } => {
                let _ = write!(name, "uf{}{}", func.name.len(), func.name);
                for arg in args {
                    arg.push_tag(name);
                }
            }
        }
    }

    /// Element types of the parameters in binding order
    pub(crate) fn param_types(&self, types: &mut Vec<DType>) {
        match self {
            Node::Vector(terminal) => types.push(terminal.dtype),
            Node::Scalar(value) => types.push(value.dtype()),
            Node::Unary { x, .. } => x.param_types(types),
            Node::Binary { x, y, .. } => {
                x.param_types(types);
                y.param_types(types);
            }
            Node::Call { args, .. } => args.iter().for_each(|arg| arg.param_types(types)),
        }
    }

    /// Formal parameters, each prefixed by a separator
    pub(crate) fn kernel_params(&self, sink: &mut String, name: &str) {
        match self {
            Node::Vector(terminal) => {
                let _ = write!(sink, ",\n\tglobal {} *{name}", terminal.dtype.ocl());
            }
            Node::Scalar(value) => {
                let _ = write!(sink, ",\n\t{} {name}", value.dtype().ocl());
            }
            Node::Unary { x, .. } => x.kernel_params(sink, name),
            Node::Binary { x, y, .. } => {
                x.kernel_params(sink, &format!("{name}l"));
                y.kernel_params(sink, &format!("{name}r"));
            }
            Node::Call { args, .. } => {
                for (k, arg) in args.iter().enumerate() {
                    arg.kernel_params(sink, &format!("{name}{}", k + 1));
                }
            }
        }
    }

    /// Binds runtime values of one device, in the same order as `kernel_params`
    pub(crate) fn kernel_args(&self, args: &mut Vec<KernelArg>, device: usize) -> Result<(), ClError> {
        match self {
            Node::Vector(terminal) => {
                let Some(Some(buffer)) = terminal.buffers.get(device) else {
                    return Err(ClError::PartitionMismatch {
                        device,
                        expected: 1,
                        found: 0,
                    });
                };
                args.push(KernelArg::Buffer(buffer.clone()));
            }
            Node::Scalar(value) => args.push(KernelArg::Scalar(*value)),
            Node::Unary { x, .. } => x.kernel_args(args, device)?,
            Node::Binary { x, y, .. } => {
                x.kernel_args(args, device)?;
                y.kernel_args(args, device)?;
            }
            Node::Call { args: children, .. } => {
                for child in children {
                    child.kernel_args(args, device)?;
                }
            }
        }
        Ok(())
    }

    /// Contribution to the per element body
    pub(crate) fn kernel_expr(&self, sink: &mut String, name: &str) {
        match self {
            Node::Vector(_) => {
                let _ = write!(sink, "{name}[i]");
            }
            Node::Scalar(_) => sink.push_str(name),
            Node::Unary { func, x } => {
                let (open, close) = func.ocl();
                sink.push_str(open);
                x.kernel_expr(sink, name);
                sink.push_str(close);
            }
            Node::Binary { op, x, y } => {
                sink.push('(');
                x.kernel_expr(sink, &format!("{name}l"));
                let _ = write!(sink, " {} ", op.ocl());
                y.kernel_expr(sink, &format!("{name}r"));
                sink.push(')');
            }
            Node::Call { args, .. } => {
                let _ = write!(sink, "{name}_fun(");
                for (k, arg) in args.iter().enumerate() {
                    if k > 0 {
                        sink.push_str(", ");
                    }
                    arg.kernel_expr(sink, &format!("{name}{}", k + 1));
                }
                sink.push(')');
            }
        }
    }

    /// Elements spanned on a device, zero for scalars
    pub(crate) fn part_size(&self, device: usize) -> usize {
        match self {
            Node::Vector(terminal) => terminal.part_size(device),
            Node::Scalar(_) => 0,
            Node::Unary { x, .. } => x.part_size(device),
            Node::Binary { x, y, .. } => x.part_size(device).max(y.part_size(device)),
            Node::Call { args, .. } => {
                args.iter().map(|arg| arg.part_size(device)).max().unwrap_or(0)
            }
        }
    }

    /// First vector operand spanning a different number of elements than `size` on a device
    pub(crate) fn mismatched_part(&self, device: usize, size: usize) -> Option<usize> {
        match self {
            Node::Vector(terminal) => {
                let found = terminal.part_size(device);
                (found != size).then_some(found)
            }
            Node::Scalar(_) => None,
            Node::Unary { x, .. } => x.mismatched_part(device, size),
            Node::Binary { x, y, .. } => {
                x.mismatched_part(device, size).or_else(|| y.mismatched_part(device, size))
            }
            Node::Call { args, .. } => {
                args.iter().find_map(|arg| arg.mismatched_part(device, size))
            }
        }
    }

    /// First device on which a vector operand is not on the same queue as `queues`.
    /// Operands with a different number of parts mismatch at the first missing part.
    pub(crate) fn mismatched_queue(&self, queues: &[Queue]) -> Option<usize> {
        match self {
            Node::Vector(terminal) => terminal
                .queues
                .iter()
                .zip(queues)
                .position(|(found, expected)| found != expected)
                .or_else(|| {
                    (terminal.queues.len() != queues.len()).then(|| terminal.queues.len().min(queues.len()))
                }),
            Node::Scalar(_) => None,
            Node::Unary { x, .. } => x.mismatched_queue(queues),
            Node::Binary { x, y, .. } => x.mismatched_queue(queues).or_else(|| y.mismatched_queue(queues)),
            Node::Call { args, .. } => args.iter().find_map(|arg| arg.mismatched_queue(queues)),
        }
    }
}

/// Lazily evaluated elementwise expression with element type `T`
#[derive(Debug, Clone)]
pub struct Expr<'a, T: Scalar> {
    pub(crate) node: Node<'a>,
    _marker: PhantomData<T>,
}

impl<'a, T: Scalar> Expr<'a, T> {
    pub(crate) const fn new(node: Node<'a>) -> Expr<'a, T> {
        Expr { node, _marker: PhantomData }
    }

    fn binary(op: BOp, x: Expr<'a, T>, y: Expr<'a, T>) -> Expr<'a, T> {
        Expr::new(Node::Binary { op, x: Box::new(x.node), y: Box::new(y.node) })
    }

    /// Name of the kernel this expression compiles to. Depends only on the shape of the tree.
    #[must_use]
    pub fn kernel_name(&self) -> String {
        self.node.kernel_name()
    }

    /// Number of elements the expression spans on the device at `device` index
    #[must_use]
    pub fn part_size(&self, device: usize) -> usize {
        self.node.part_size(device)
    }
}

/// Anything usable as an operand of an expression: arrays, expressions and scalars
pub trait IntoExpr<'a, T: Scalar> {
    /// Wrap self as an expression node
    fn into_expr(self) -> Expr<'a, T>;
}

impl<'a, T: Scalar> IntoExpr<'a, T> for Expr<'a, T> {
    fn into_expr(self) -> Expr<'a, T> {
        self
    }
}

impl<'a, T: Scalar> IntoExpr<'a, T> for &Expr<'a, T> {
    fn into_expr(self) -> Expr<'a, T> {
        self.clone()
    }
}

impl<'a, T: Scalar> IntoExpr<'a, T> for &'a Array<T> {
    fn into_expr(self) -> Expr<'a, T> {
        Expr::new(Node::Vector(self.terminal()))
    }
}

macro_rules! impl_binary {
    ($trait:ident, $fn:ident, $op:expr) => {
        impl<'a, T: Scalar, R: IntoExpr<'a, T>> core::ops::$trait<R> for Expr<'a, T> {
            type Output = Expr<'a, T>;
            fn $fn(self, rhs: R) -> Expr<'a, T> {
                Expr::binary($op, self, rhs.into_expr())
            }
        }

        impl<'a, T: Scalar, R: IntoExpr<'a, T>> core::ops::$trait<R> for &Expr<'a, T> {
            type Output = Expr<'a, T>;
            fn $fn(self, rhs: R) -> Expr<'a, T> {
                Expr::binary($op, self.clone(), rhs.into_expr())
            }
        }

        impl<'a, T: Scalar, R: IntoExpr<'a, T>> core::ops::$trait<R> for &'a Array<T> {
            type Output = Expr<'a, T>;
            fn $fn(self, rhs: R) -> Expr<'a, T> {
                Expr::binary($op, self.into_expr(), rhs.into_expr())
            }
        }
    };
}

impl_binary!(Add, add, BOp::Add);
impl_binary!(Sub, sub, BOp::Sub);
impl_binary!(Mul, mul, BOp::Mul);
impl_binary!(Div, div, BOp::Div);

impl<'a, T: Scalar> core::ops::Neg for Expr<'a, T> {
    type Output = Expr<'a, T>;
    fn neg(self) -> Expr<'a, T> {
        Expr::new(Node::Unary { func: UnaryFunc::Neg, x: Box::new(self.node) })
    }
}

impl<'a, T: Scalar> core::ops::Neg for &'a Array<T> {
    type Output = Expr<'a, T>;
    fn neg(self) -> Expr<'a, T> {
        -self.into_expr()
    }
}

// Scalars on the left hand side and scalars as operands
macro_rules! impl_scalar_lhs {
    ($t:ty, $trait:ident, $fn:ident, $op:expr) => {
        impl<'a> core::ops::$trait<Expr<'a, $t>> for $t {
            type Output = Expr<'a, $t>;
            fn $fn(self, rhs: Expr<'a, $t>) -> Expr<'a, $t> {
                Expr::binary($op, self.into_expr(), rhs)
            }
        }

        impl<'a> core::ops::$trait<&Expr<'a, $t>> for $t {
            type Output = Expr<'a, $t>;
            fn $fn(self, rhs: &Expr<'a, $t>) -> Expr<'a, $t> {
                Expr::binary($op, self.into_expr(), rhs.clone())
            }
        }

        impl<'a> core::ops::$trait<&'a Array<$t>> for $t {
            type Output = Expr<'a, $t>;
            fn $fn(self, rhs: &'a Array<$t>) -> Expr<'a, $t> {
                Expr::binary($op, self.into_expr(), rhs.into_expr())
            }
        }
    };
}

macro_rules! impl_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl<'a> IntoExpr<'a, $t> for $t {
                fn into_expr(self) -> Expr<'a, $t> {
                    Expr::new(Node::Scalar(self.into_constant()))
                }
            }

            impl_scalar_lhs!($t, Add, add, BOp::Add);
            impl_scalar_lhs!($t, Sub, sub, BOp::Sub);
            impl_scalar_lhs!($t, Mul, mul, BOp::Mul);
            impl_scalar_lhs!($t, Div, div, BOp::Div);
        )*
    };
}

impl_scalar!(f16, f32, f64, u8, u16, u32, u64, i8, i16, i32, i64);
