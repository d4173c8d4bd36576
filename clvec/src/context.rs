//! Contexts group devices that share allocations and compiled kernels.
//! A queue is one device of a context.

use crate::{
    backend::{host, host::HostConfig, opencl, opencl::OpenCLConfig, BackendContext, BackendQueue, DeviceInfo, DeviceKind},
    config::Config,
    debug,
    dtype::DType,
    error::ClError,
    expr::Node,
    kernel::{synthesize, KernelKey},
    kernel_cache::{CachedKernel, KernelCache},
    partition::set_partition_policy,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(0);

/// Devices of one backend sharing compiled kernels.
/// Cloning is cheap, all clones refer to the same devices and kernel cache.
#[derive(Clone)]
pub struct Context(Arc<ContextInner>);

struct ContextInner {
    id: u64,
    // Dropped before the backend, programs go before the context releasing them
    kernels: KernelCache,
    backend: BackendContext,
}

impl Context {
    fn wrap(backend: BackendContext) -> Context {
        Context(Arc::new(ContextInner {
            id: NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed),
            kernels: KernelCache::new(),
            backend,
        }))
    }

    /// Context of host devices running kernels on the CPU
    ///
    /// # Errors
    /// Returns error if the configuration disables all host devices.
    pub fn host(config: &HostConfig) -> Result<Context, ClError> {
        Ok(Context::wrap(BackendContext::Host(host::initialize_device(config)?)))
    }

    /// One context per `OpenCL` platform with at least one device
    ///
    /// # Errors
    /// Returns error if the `OpenCL` runtime can not be loaded or was configured out.
    pub fn opencl(config: &OpenCLConfig) -> Result<Vec<Context>, ClError> {
        Ok(opencl::initialize_device(config)?
            .into_iter()
            .map(|context| Context::wrap(BackendContext::OpenCL(context)))
            .collect())
    }

    /// One queue per device of the context
    #[must_use]
    pub fn queues(&self) -> Vec<Queue> {
        (0..self.devices().len()).map(|device| Queue { context: self.clone(), device }).collect()
    }

    /// Devices of the context
    #[must_use]
    pub fn devices(&self) -> &[DeviceInfo] {
        self.0.backend.devices()
    }

    /// Class of the first device, decides the loop form of generated kernels
    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        self.devices().first().map_or(DeviceKind::Cpu, |device| device.kind)
    }

    /// Number of kernels compiled for this context
    #[must_use]
    pub fn cached_kernels(&self) -> usize {
        self.0.kernels.len()
    }

    /// Drops every compiled kernel of this context
    pub fn clear_kernel_cache(&self) {
        self.0.kernels.clear();
    }

    /// Kernel evaluating `node` into a destination of type `dtype`,
    /// synthesized and compiled on first use of its identity.
    pub(crate) fn kernel(&self, node: &Node, dtype: DType) -> Result<Arc<CachedKernel>, ClError> {
        let key = KernelKey::new(node, dtype);
        self.0.kernels.get_or_build(&key, || {
            let kind = self.kind();
            if debug().sched() {
                tracing::info!(kernel = %key.name, context = self.0.id, "Compiling kernel for {kind:?} devices");
            }
            let source = synthesize(node, dtype, kind);
            let (program, workgroup_size) = self.0.backend.build(&source)?;
            Ok(CachedKernel { program, workgroup_size, kind })
        })
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Context {}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context").field("id", &self.0.id).field("devices", &self.devices()).finish()
    }
}

/// In-order command queue of one device
#[derive(Clone, PartialEq, Eq)]
pub struct Queue {
    context: Context,
    device: usize,
}

impl Queue {
    /// Context the device belongs to
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    /// Information about the device
    #[must_use]
    pub fn info(&self) -> &DeviceInfo {
        &self.context.devices()[self.device]
    }

    /// Blocks until every command enqueued so far has completed
    ///
    /// # Errors
    /// Returns the error of the first failed command.
    pub fn finish(&self) -> Result<(), ClError> {
        Ok(self.backend().finish()?)
    }

    pub(crate) fn backend(&self) -> &BackendQueue {
        &self.context.0.backend.queues()[self.device]
    }
}

impl core::fmt::Debug for Queue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("Queue({}, context {})", self.info().name, self.context.0.id))
    }
}

/// Initializes every configured backend.
/// `OpenCL` contexts come first, host devices last.
/// Also applies the configured partitioning policy if one is set.
///
/// # Errors
/// Returns [`ClError::NoDeviceAvailable`] if no backend has any device.
pub fn discover(config: &Config) -> Result<Vec<Context>, ClError> {
    let debug_dev = debug().dev();
    if config.partitioning.is_some() {
        set_partition_policy(config.partition_policy());
    }
    let mut contexts = Vec::new();
    match Context::opencl(&config.opencl) {
        Ok(opencl) => contexts.extend(opencl),
        Err(e) => {
            if debug_dev {
                tracing::warn!("OpenCL backend unavailable, {e}");
            }
        }
    }
    match Context::host(&config.host) {
        Ok(host) => contexts.push(host),
        Err(e) => {
            if debug_dev {
                tracing::warn!("Host backend unavailable, {e}");
            }
        }
    }
    if contexts.is_empty() {
        return Err(ClError::NoDeviceAvailable);
    }
    Ok(contexts)
}

/// Queues of every device of every context, in context order
#[must_use]
pub fn queue_list(contexts: &[Context]) -> Vec<Queue> {
    contexts.iter().flat_map(Context::queues).collect()
}

#[cfg(test)]
mod tests {
    use super::{queue_list, Context};
    use crate::{backend::host::HostConfig, error::ClError};

    #[test]
    fn host_queues() -> Result<(), ClError> {
        let a = Context::host(&HostConfig::default().with_devices(2))?;
        let b = Context::host(&HostConfig::default())?;
        let queues = queue_list(&[a.clone(), b.clone()]);
        assert_eq!(queues.len(), 3);
        assert_eq!(queues[0].context(), &a);
        assert_ne!(queues[0], queues[1]);
        assert_eq!(queues[0], a.queues()[0]);
        assert_ne!(queues[0].info().key, queues[2].info().key);
        queues.iter().try_for_each(super::Queue::finish)?;
        Ok(())
    }

    #[test]
    fn configured_out() {
        assert!(Context::host(&HostConfig::default().with_devices(0)).is_err());
    }
}
