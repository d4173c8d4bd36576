//! Kernel synthesis from expression trees

use crate::{
    backend::DeviceKind,
    debug,
    dtype::DType,
    expr::{function::FunctionDef, unary::UnaryFunc, BOp, Node},
};
use core::fmt::Write;
use std::sync::Arc;

/// Identity of a compiled kernel: the shape of the tree and the element types it works on
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct KernelKey {
    pub(crate) name: String,
    // destination type followed by parameter types in binding order
    pub(crate) signature: Vec<DType>,
}

impl KernelKey {
    pub(crate) fn new(node: &Node, dtype: DType) -> KernelKey {
        let mut signature = vec![dtype];
        node.param_types(&mut signature);
        KernelKey { name: node.kernel_name(), signature }
    }
}

/// Tree lowered for host execution. Parameter indices count from the first kernel
/// argument, so index 0 is the length and index 1 the destination.
#[derive(Debug, Clone)]
pub(crate) enum KernelBody {
    Load { param: usize, dtype: DType },
    Param { param: usize },
    Unary { func: UnaryFunc, x: Box<KernelBody> },
    Binary { op: BOp, x: Box<KernelBody>, y: Box<KernelBody> },
    Call { func: Arc<FunctionDef>, args: Vec<KernelBody> },
}

impl KernelBody {
    fn lower(node: &Node, param: &mut usize) -> KernelBody {
        match node {
            Node::Vector(terminal) => {
                *param += 1;
                KernelBody::Load { param: *param - 1, dtype: terminal.dtype }
            }
            Node::Scalar(_) => {
                *param += 1;
                KernelBody::Param { param: *param - 1 }
            }
            Node::Unary { func, x } => {
                KernelBody::Unary { func: *func, x: Box::new(KernelBody::lower(x, param)) }
            }
            Node::Binary { op, x, y } => {
                let x = Box::new(KernelBody::lower(x, param));
                let y = Box::new(KernelBody::lower(y, param));
                KernelBody::Binary { op: *op, x, y }
            }
            Node::Call { func, args } => KernelBody::Call {
                func: func.clone(),
                args: args.iter().map(|arg| KernelBody::lower(arg, param)).collect(),
            },
        }
    }

    /// User functions without a host implementation
    pub(crate) fn device_only_functions(&self, names: &mut Vec<String>) {
        match self {
            KernelBody::Load { .. } | KernelBody::Param { .. } => {}
            KernelBody::Unary { x, .. } => x.device_only_functions(names),
            KernelBody::Binary { x, y, .. } => {
                x.device_only_functions(names);
                y.device_only_functions(names);
            }
            KernelBody::Call { func, args } => {
                if !func.has_host() && !names.contains(&func.name) {
                    names.push(func.name.clone());
                }
                args.iter().for_each(|arg| arg.device_only_functions(names));
            }
        }
    }
}

/// Generated kernel, ready for compilation by any backend
#[derive(Debug)]
pub(crate) struct KernelSource {
    pub(crate) name: String,
    pub(crate) source: String,
    pub(crate) body: KernelBody,
    pub(crate) dtype: DType,
    pub(crate) kind: DeviceKind,
}

const HEADER: &str = "#if defined(cl_khr_fp64)\n\
#  pragma OPENCL EXTENSION cl_khr_fp64: enable\n\
#elif defined(cl_amd_fp64)\n\
#  pragma OPENCL EXTENSION cl_amd_fp64: enable\n\
#endif\n";

/// Synthesizes `res[i] = <tree>` for `n` elements of type `dtype`.
pub(crate) fn synthesize(node: &Node, dtype: DType, kind: DeviceKind) -> KernelSource {
    let name = node.kernel_name();

    let mut preamble = String::new();
    node.preamble(&mut preamble, "prm");

    let mut params = String::new();
    node.kernel_params(&mut params, "prm");

    let mut expr = String::new();
    node.kernel_expr(&mut expr, "prm");

    let mut source = String::from(HEADER);
    source += &preamble;
    let _ = write!(source, "kernel void {name}(\n\tulong n,\n\tglobal {} *res{params}\n\t)\n{{\n", dtype.ocl());
    match kind {
        DeviceKind::Cpu => {
            source += "\tsize_t i = get_global_id(0);\n";
            let _ = writeln!(source, "\tif (i < n) {{\n\t\tres[i] = {expr};\n\t}}");
        }
        DeviceKind::Gpu => {
            source += "\tsize_t i = get_global_id(0);\n";
            source += "\tsize_t grid_size = get_num_groups(0) * get_local_size(0);\n";
            let _ = writeln!(source, "\twhile (i < n) {{\n\t\tres[i] = {expr};\n\t\ti += grid_size;\n\t}}");
        }
    }
    source += "}\n";

    if source.contains("half") {
        source.insert_str(0, "#pragma OPENCL EXTENSION cl_khr_fp16 : enable\n");
    }

    if debug().asm() {
        tracing::info!(target: "clvec::kernel", kernel = %name, "\n{source}");
    }

    // length and destination come first
    let mut param = 2;
    let body = KernelBody::lower(node, &mut param);
    KernelSource { name, source, body, dtype, kind }
}

#[cfg(test)]
mod tests {
    use super::{synthesize, KernelBody, KernelKey};
    use crate::{
        backend::DeviceKind,
        dtype::{Constant, DType},
        expr::{BOp, Node},
    };

    fn tree() -> Node<'static> {
        Node::Binary {
            op: BOp::Add,
            x: Box::new(Node::Scalar(Constant::F32(2.0))),
            y: Box::new(Node::Binary {
                op: BOp::Mul,
                x: Box::new(Node::Scalar(Constant::F32(1.0))),
                y: Box::new(Node::Scalar(Constant::F32(3.0))),
            }),
        }
    }

    #[test]
    fn cpu_source() {
        let kernel = synthesize(&tree(), DType::F32, DeviceKind::Cpu);
        assert_eq!(kernel.name, "pctcc");
        assert!(kernel.source.contains(
            "kernel void pctcc(\n\tulong n,\n\tglobal float *res,\n\tfloat prml,\n\tfloat prmrl,\n\tfloat prmrr\n\t)"
        ));
        assert!(kernel.source.contains("if (i < n) {\n\t\tres[i] = (prml + (prmrl * prmrr));"));
        assert!(!kernel.source.contains("grid_size"));
        assert!(!kernel.source.contains("cl_khr_fp16"));
    }

    #[test]
    fn gpu_source() {
        let kernel = synthesize(&tree(), DType::F32, DeviceKind::Gpu);
        assert!(kernel.source.contains("while (i < n)"));
        assert!(kernel.source.contains("i += grid_size;"));
    }

    #[test]
    fn lowering_order() {
        let kernel = synthesize(&tree(), DType::F32, DeviceKind::Cpu);
        let KernelBody::Binary { x, y, .. } = kernel.body else { panic!() };
        assert!(matches!(*x, KernelBody::Param { param: 2 }));
        let KernelBody::Binary { x, y, .. } = *y else { panic!() };
        assert!(matches!(*x, KernelBody::Param { param: 3 }));
        assert!(matches!(*y, KernelBody::Param { param: 4 }));
    }

    #[test]
    fn key_includes_types() {
        let f32_key = KernelKey::new(&tree(), DType::F32);
        let f64_tree = Node::Binary {
            op: BOp::Add,
            x: Box::new(Node::Scalar(Constant::F64(2.0))),
            y: Box::new(Node::Binary {
                op: BOp::Mul,
                x: Box::new(Node::Scalar(Constant::F64(1.0))),
                y: Box::new(Node::Scalar(Constant::F64(3.0))),
            }),
        };
        let f64_key = KernelKey::new(&f64_tree, DType::F64);
        assert_eq!(f32_key.name, f64_key.name);
        assert_ne!(f32_key, f64_key);
        assert_eq!(f32_key.signature, vec![DType::F32; 4]);
    }
}
