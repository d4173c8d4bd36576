//! # clvec
//!
//! Arithmetic over arrays split across several compute devices.
//!
//! Operators on arrays build lazy expression trees. Assigning a tree to an
//! [`Array`] fuses it into a single kernel, compiled once per context and tree
//! shape, and launches it on every device holding part of the destination.
//!
//! ```ignore
//! use clvec::{sin, Array, Context, HostConfig};
//!
//! let context = Context::host(&HostConfig::default().with_devices(2))?;
//! let queues = context.queues();
//! let x = Array::from_slice(&queues, &[1f32, 2., 3., 4.])?;
//! let y = Array::from_slice(&queues, &[2f32, 2., 2., 2.])?;
//! let z = Array::<f32>::new(&queues, 4)?;
//! z.assign(2f32 * &x + sin(&y))?;
//! ```
//!
//! Set `CLVEC_DEBUG` to a bitmask to log device discovery (1), performance
//! measurements (2), kernel scheduling (4) and generated kernel source (8).

#![warn(missing_docs)]

mod array;
mod backend;
mod config;
mod context;
mod dtype;
mod error;
mod expr;
mod kernel;
mod kernel_cache;
mod partition;
mod scalar;

use std::sync::OnceLock;

pub use array::{Array, Transfer};
pub use backend::{host::HostConfig, opencl::OpenCLConfig, DeviceInfo, DeviceKey, DeviceKind, MemFlags};
pub use config::Config;
pub use context::{discover, queue_list, Context, Queue};
pub use dtype::{Constant, DType, VectorType};
pub use error::{BackendError, ClError, ErrorStatus};
pub use expr::unary::{
    acos, acosh, acospi, asin, asinh, asinpi, atan, atanh, atanpi, cbrt, ceil, cos, cosh, cospi, exp, exp10, exp2,
    expm1, fabs, floor, log, log10, log1p, log2, rint, round, rsqrt, sin, sinh, sinpi, sqrt, tan, tanh, tanpi, trunc,
};
pub use expr::{function::FunctionArgs, Expr, IntoExpr, UserFunction};
pub use partition::{
    alignup, device_vector_perf, partition, partition_by_vector_perf, partition_by_weights, partition_equal,
    partition_policy, set_partition_policy, PartitionPolicy, ALIGNMENT,
};
pub use scalar::{Float, Scalar};

/// Logging categories selected by the `CLVEC_DEBUG` bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugMask(u32);

impl DebugMask {
    /// Mask from raw bits
    #[must_use]
    pub const fn new(bits: u32) -> DebugMask {
        DebugMask(bits)
    }

    /// Device discovery and configuration
    #[must_use]
    pub const fn dev(self) -> bool {
        self.0 % 2 == 1
    }

    /// Benchmarks and device weights
    #[must_use]
    pub const fn perf(self) -> bool {
        (self.0 >> 1) % 2 == 1
    }

    /// Kernel cache misses and launches
    #[must_use]
    pub const fn sched(self) -> bool {
        (self.0 >> 2) % 2 == 1
    }

    /// Generated kernel source
    #[must_use]
    pub const fn asm(self) -> bool {
        (self.0 >> 3) % 2 == 1
    }
}

static DEBUG: OnceLock<DebugMask> = OnceLock::new();

/// Process wide debug mask, read from `CLVEC_DEBUG` on first use
#[must_use]
pub fn debug() -> DebugMask {
    *DEBUG.get_or_init(|| {
        DebugMask(std::env::var("CLVEC_DEBUG").ok().and_then(|x| x.parse::<u32>().ok()).unwrap_or(0))
    })
}

#[test]
fn debug_bits() {
    let mask = DebugMask::new(0b1010);
    assert!(!mask.dev());
    assert!(mask.perf());
    assert!(!mask.sched());
    assert!(mask.asm());
    assert_eq!(DebugMask::default(), DebugMask::new(0));
}
