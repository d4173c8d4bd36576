use crate::{backend::{DeviceKind, Program}, error::ClError, kernel::KernelKey};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};

/// Compiled kernel shared by all devices of a context
#[derive(Debug)]
pub(crate) struct CachedKernel {
    pub(crate) program: Program,
    pub(crate) workgroup_size: usize,
    // decides launch geometry, must match the loop the kernel was generated with
    pub(crate) kind: DeviceKind,
}

/// Kernels of one context keyed by identity. Entries are immutable once inserted.
#[derive(Debug, Default)]
pub(crate) struct KernelCache {
    kernels: Mutex<BTreeMap<KernelKey, Arc<CachedKernel>>>,
}

impl KernelCache {
    pub(crate) const fn new() -> KernelCache {
        KernelCache { kernels: Mutex::new(BTreeMap::new()) }
    }

    /// Returns the cached kernel, building it on first use.
    /// The lock is held while building, so each identity is built exactly once.
    pub(crate) fn get_or_build(
        &self,
        key: &KernelKey,
        build: impl FnOnce() -> Result<CachedKernel, ClError>,
    ) -> Result<Arc<CachedKernel>, ClError> {
        let mut kernels = self.kernels.lock();
        if let Some(kernel) = kernels.get(key) {
            return Ok(kernel.clone());
        }
        let kernel = Arc::new(build()?);
        kernels.insert(key.clone(), kernel.clone());
        Ok(kernel)
    }

    pub(crate) fn len(&self) -> usize {
        self.kernels.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.kernels.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{CachedKernel, KernelCache};
    use crate::{
        backend::{host::HostProgram, DeviceKind, Program},
        dtype::{Constant, DType},
        error::ClError,
        expr::Node,
        kernel::{synthesize, KernelKey},
    };
    use std::sync::Arc;

    fn build(calls: &mut usize) -> Result<CachedKernel, ClError> {
        *calls += 1;
        let source = synthesize(&Node::Scalar(Constant::F32(1.0)), DType::F32, DeviceKind::Cpu);
        Ok(CachedKernel {
            program: Program::Host(Arc::new(HostProgram::new(&source)?)),
            workgroup_size: 16,
            kind: DeviceKind::Cpu,
        })
    }

    #[test]
    fn builds_once() -> Result<(), ClError> {
        let cache = KernelCache::new();
        let key = KernelKey::new(&Node::Scalar(Constant::F32(1.0)), DType::F32);
        let mut calls = 0;
        let first = cache.get_or_build(&key, || build(&mut calls))?;
        let second = cache.get_or_build(&key, || build(&mut calls))?;
        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert_eq!(cache.len(), 0);
        Ok(())
    }

    #[test]
    fn failed_build_is_not_cached() {
        let cache = KernelCache::new();
        let key = KernelKey::new(&Node::Scalar(Constant::I32(1)), DType::I32);
        assert!(cache.get_or_build(&key, || Err(ClError::NoDeviceAvailable)).is_err());
        assert_eq!(cache.len(), 0);
    }
}
