//! Backend agnostic API to backends.
//! Enums here dispatch calls to the host or `OpenCL` implementation.
//! Every device has one in-order queue, completion is observed through events.

use crate::{
    dtype::Constant,
    error::{BackendError, ErrorStatus},
    kernel::KernelSource,
};
use parking_lot::Mutex;
use std::sync::Arc;

pub(crate) mod host;
pub(crate) mod opencl;

/// Class of device, decides the shape of generated kernel bodies and launch geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceKind {
    /// Few wide cores, one work item per element
    Cpu,
    /// Many narrow cores, fixed grid striding over elements
    Gpu,
}

/// Process unique identity of a physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceKey {
    /// Host device, numbered in creation order
    Host(u64),
    /// `OpenCL` device id
    OpenCL(usize),
}

/// Information about a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device name
    pub name: String,
    /// Device class
    pub kind: DeviceKind,
    /// Number of compute units
    pub compute_units: usize,
    /// Largest workgroup the device accepts
    pub max_workgroup_size: usize,
    /// Identity of the device
    pub key: DeviceKey,
}

/// Access hint for device buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemFlags {
    /// Kernels read and write the buffer
    #[default]
    ReadWrite,
    /// Kernels only read the buffer
    ReadOnly,
    /// Kernels only write the buffer
    WriteOnly,
}

pub(crate) enum BackendContext {
    Host(host::HostContext),
    OpenCL(opencl::OpenCLContext),
}

pub(crate) enum BackendQueue {
    Host(host::HostQueue),
    OpenCL(opencl::OpenCLQueue),
}

#[derive(Debug, Clone)]
pub(crate) enum Buffer {
    Host(host::HostBuffer),
    OpenCL(opencl::OpenCLBuffer),
}

#[derive(Debug, Clone)]
pub(crate) enum Event {
    Host(host::HostEvent),
    OpenCL(opencl::OpenCLEvent),
}

#[derive(Debug, Clone)]
pub(crate) enum Program {
    Host(Arc<host::HostProgram>),
    OpenCL(Arc<opencl::OpenCLProgram>),
}

#[derive(Debug, Clone)]
pub(crate) enum KernelArg {
    Buffer(Buffer),
    Scalar(Constant),
}

/// Pending device to host copy. Staging memory stays alive until the copy finishes.
#[derive(Debug)]
pub(crate) struct ReadBack {
    event: Event,
    staging: Arc<Mutex<Vec<u8>>>,
}

impl ReadBack {
    pub(crate) fn finish(self) -> Result<Vec<u8>, BackendError> {
        self.event.wait()?;
        Ok(core::mem::take(&mut *self.staging.lock()))
    }
}

fn mismatch(what: &str) -> BackendError {
    BackendError::new(ErrorStatus::IncorrectKernelArg, format!("{what} belongs to a different backend"))
}

impl BackendContext {
    pub(crate) fn devices(&self) -> &[DeviceInfo] {
        match self {
            BackendContext::Host(context) => context.devices(),
            BackendContext::OpenCL(context) => context.devices(),
        }
    }

    pub(crate) fn queues(&self) -> &[BackendQueue] {
        match self {
            BackendContext::Host(context) => context.queues(),
            BackendContext::OpenCL(context) => context.queues(),
        }
    }

    /// Compiles kernel source for all devices of the context,
    /// returns the program and workgroup size usable on every device.
    pub(crate) fn build(&self, source: &KernelSource) -> Result<(Program, usize), BackendError> {
        match self {
            BackendContext::Host(context) => {
                let (program, wgsize) = context.build(source)?;
                Ok((Program::Host(program), wgsize))
            }
            BackendContext::OpenCL(context) => {
                let (program, wgsize) = context.build(source)?;
                Ok((Program::OpenCL(program), wgsize))
            }
        }
    }
}

impl BackendQueue {
    pub(crate) fn allocate(&self, bytes: usize, flags: MemFlags) -> Result<Buffer, BackendError> {
        match self {
            BackendQueue::Host(_) => Ok(Buffer::Host(host::HostBuffer::new(bytes))),
            BackendQueue::OpenCL(queue) => Ok(Buffer::OpenCL(queue.allocate(bytes, flags)?)),
        }
    }

    pub(crate) fn write(
        &self,
        buffer: &Buffer,
        offset: usize,
        src: &[u8],
        blocking: bool,
    ) -> Result<Event, BackendError> {
        match (self, buffer) {
            (BackendQueue::Host(queue), Buffer::Host(buffer)) => {
                Ok(Event::Host(queue.write(buffer, offset, src, blocking)?))
            }
            (BackendQueue::OpenCL(queue), Buffer::OpenCL(buffer)) => {
                Ok(Event::OpenCL(queue.write(buffer, offset, src, blocking)?))
            }
            _ => Err(mismatch("Buffer")),
        }
    }

    pub(crate) fn read(
        &self,
        buffer: &Buffer,
        offset: usize,
        bytes: usize,
        blocking: bool,
    ) -> Result<ReadBack, BackendError> {
        let staging = Arc::new(Mutex::new(vec![0; bytes]));
        let event = match (self, buffer) {
            (BackendQueue::Host(queue), Buffer::Host(buffer)) => {
                Event::Host(queue.read(buffer, offset, staging.clone(), blocking)?)
            }
            (BackendQueue::OpenCL(queue), Buffer::OpenCL(buffer)) => {
                Event::OpenCL(queue.read(buffer, offset, staging.clone(), blocking)?)
            }
            _ => return Err(mismatch("Buffer")),
        };
        Ok(ReadBack { event, staging })
    }

    pub(crate) fn copy(
        &self,
        src: &Buffer,
        src_offset: usize,
        dst: &Buffer,
        dst_offset: usize,
        bytes: usize,
    ) -> Result<Event, BackendError> {
        match (self, src, dst) {
            (BackendQueue::Host(queue), Buffer::Host(src), Buffer::Host(dst)) => {
                Ok(Event::Host(queue.copy(src, src_offset, dst, dst_offset, bytes)))
            }
            (BackendQueue::OpenCL(queue), Buffer::OpenCL(src), Buffer::OpenCL(dst)) => {
                Ok(Event::OpenCL(queue.copy(src, src_offset, dst, dst_offset, bytes)?))
            }
            _ => Err(mismatch("Buffer")),
        }
    }

    pub(crate) fn launch(
        &self,
        program: &Program,
        global_work_size: usize,
        local_work_size: usize,
        args: Vec<KernelArg>,
    ) -> Result<Event, BackendError> {
        match (self, program) {
            (BackendQueue::Host(queue), Program::Host(program)) => {
                Ok(Event::Host(queue.launch(program, global_work_size, args)))
            }
            (BackendQueue::OpenCL(queue), Program::OpenCL(program)) => Ok(Event::OpenCL(
                queue.launch(program, global_work_size, local_work_size, &args)?,
            )),
            _ => Err(mismatch("Program")),
        }
    }

    pub(crate) fn finish(&self) -> Result<(), BackendError> {
        match self {
            BackendQueue::Host(queue) => queue.finish(),
            BackendQueue::OpenCL(queue) => queue.finish(),
        }
    }
}

impl Event {
    pub(crate) fn wait(&self) -> Result<(), BackendError> {
        match self {
            Event::Host(event) => event.wait(),
            Event::OpenCL(event) => event.wait(),
        }
    }
}
