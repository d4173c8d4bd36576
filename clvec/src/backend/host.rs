//! Host backend. Each device is a worker thread consuming an in-order command queue,
//! kernels are interpreted from their lowered body and run data parallel on rayon.

use super::{Buffer, DeviceInfo, DeviceKey, DeviceKind, KernelArg};
use crate::{
    debug,
    dtype::{Constant, DType},
    error::{BackendError, ErrorStatus},
    kernel::{KernelBody, KernelSource},
};
use nanoserde::DeJson;
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use rayon::prelude::*;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Arc,
    },
    thread::JoinHandle,
};

/// Host backend configuration
#[derive(Debug, Default, Clone, DeJson)]
pub struct HostConfig {
    /// Number of host devices, 0 disables the host backend. default = 1
    pub devices: Option<usize>,
    /// `"cpu"` or `"gpu"`, selects kernel loop form and launch geometry. default = "cpu"
    pub kind: Option<String>,
    /// Compute units reported per device. default = available parallelism
    pub compute_units: Option<usize>,
    /// Largest workgroup per device. default = 1024
    pub max_workgroup_size: Option<usize>,
}

impl HostConfig {
    /// Sets the number of devices
    #[must_use]
    pub fn with_devices(mut self, devices: usize) -> HostConfig {
        self.devices = Some(devices);
        self
    }

    /// Sets the device class
    #[must_use]
    pub fn with_kind(mut self, kind: DeviceKind) -> HostConfig {
        self.kind = Some(match kind {
            DeviceKind::Cpu => "cpu".into(),
            DeviceKind::Gpu => "gpu".into(),
        });
        self
    }

    /// Sets compute units per device
    #[must_use]
    pub fn with_compute_units(mut self, compute_units: usize) -> HostConfig {
        self.compute_units = Some(compute_units);
        self
    }

    /// Sets the largest workgroup per device
    #[must_use]
    pub fn with_max_workgroup_size(mut self, max_workgroup_size: usize) -> HostConfig {
        self.max_workgroup_size = Some(max_workgroup_size);
        self
    }

    /// Number of devices
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.unwrap_or(1)
    }

    /// Device class
    #[must_use]
    pub fn device_kind(&self) -> DeviceKind {
        match self.kind.as_deref() {
            Some("gpu") => DeviceKind::Gpu,
            _ => DeviceKind::Cpu,
        }
    }

    /// Compute units per device
    #[must_use]
    pub fn compute_units(&self) -> usize {
        self.compute_units
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, usize::from))
            .max(1)
    }

    /// Largest workgroup per device
    #[must_use]
    pub fn max_workgroup_size(&self) -> usize {
        self.max_workgroup_size.unwrap_or(1024).max(1)
    }
}

static NEXT_DEVICE: AtomicU64 = AtomicU64::new(0);

pub(crate) struct HostContext {
    devices: Vec<DeviceInfo>,
    queues: Vec<super::BackendQueue>,
}

pub(crate) struct HostQueue {
    sender: Option<mpsc::Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub(crate) struct HostBuffer(Arc<RwLock<Vec<u8>>>);

#[derive(Debug, Clone)]
pub(crate) struct HostEvent(Arc<EventState>);

#[derive(Debug, Default)]
struct EventState {
    result: Mutex<Option<Result<(), (ErrorStatus, Box<str>)>>>,
    done: Condvar,
}

#[derive(Debug)]
pub(crate) struct HostProgram {
    name: String,
    body: KernelBody,
    dtype: DType,
    kind: DeviceKind,
}

enum Command {
    Write { buffer: HostBuffer, offset: usize, data: Vec<u8>, event: HostEvent },
    Read { buffer: HostBuffer, offset: usize, staging: Arc<Mutex<Vec<u8>>>, event: HostEvent },
    Copy { src: HostBuffer, src_offset: usize, dst: HostBuffer, dst_offset: usize, bytes: usize, event: HostEvent },
    Launch { program: Arc<HostProgram>, global_work_size: usize, args: Vec<KernelArg>, event: HostEvent },
    Marker { event: HostEvent },
}

pub(crate) fn initialize_device(config: &HostConfig) -> Result<HostContext, BackendError> {
    let count = config.device_count();
    if count == 0 {
        return Err(BackendError::new(ErrorStatus::Initialization, "Host backend was configured out"));
    }
    let mut devices = Vec::with_capacity(count);
    let mut queues = Vec::with_capacity(count);
    for _ in 0..count {
        let id = NEXT_DEVICE.fetch_add(1, Ordering::Relaxed);
        let info = DeviceInfo {
            name: format!("host{id}"),
            kind: config.device_kind(),
            compute_units: config.compute_units(),
            max_workgroup_size: config.max_workgroup_size(),
            key: DeviceKey::Host(id),
        };
        if debug().dev() {
            tracing::info!(
                "Using host device {}, kind {:?}, {} compute units",
                info.name,
                info.kind,
                info.compute_units
            );
        }
        queues.push(super::BackendQueue::Host(HostQueue::new(&info.name)?));
        devices.push(info);
    }
    Ok(HostContext { devices, queues })
}

impl HostContext {
    pub(crate) fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub(crate) fn queues(&self) -> &[super::BackendQueue] {
        &self.queues
    }

    pub(crate) fn build(&self, source: &KernelSource) -> Result<(Arc<HostProgram>, usize), BackendError> {
        let program = HostProgram::new(source)?;
        let mut wgsize = 1024;
        while wgsize > 1 && self.devices.iter().any(|dev| wgsize > dev.max_workgroup_size) {
            wgsize /= 2;
        }
        Ok((Arc::new(program), wgsize))
    }
}

impl HostQueue {
    fn new(name: &str) -> Result<HostQueue, BackendError> {
        let (sender, receiver) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name(format!("clvec-{name}"))
            .spawn(move || run(&receiver))
            .map_err(|e| BackendError::new(ErrorStatus::Initialization, e.to_string()))?;
        Ok(HostQueue { sender: Some(sender), worker: Some(worker) })
    }

    fn submit(&self, command: Command) -> Result<(), BackendError> {
        self.sender
            .as_ref()
            .and_then(|sender| sender.send(command).ok())
            .ok_or_else(|| BackendError::new(ErrorStatus::KernelSync, "Host queue worker has stopped"))
    }

    pub(crate) fn write(
        &self,
        buffer: &HostBuffer,
        offset: usize,
        src: &[u8],
        blocking: bool,
    ) -> Result<HostEvent, BackendError> {
        let event = HostEvent::new();
        self.submit(Command::Write { buffer: buffer.clone(), offset, data: src.to_vec(), event: event.clone() })?;
        if blocking {
            event.wait()?;
        }
        Ok(event)
    }

    pub(crate) fn read(
        &self,
        buffer: &HostBuffer,
        offset: usize,
        staging: Arc<Mutex<Vec<u8>>>,
        blocking: bool,
    ) -> Result<HostEvent, BackendError> {
        let event = HostEvent::new();
        self.submit(Command::Read { buffer: buffer.clone(), offset, staging, event: event.clone() })?;
        if blocking {
            event.wait()?;
        }
        Ok(event)
    }

    pub(crate) fn copy(
        &self,
        src: &HostBuffer,
        src_offset: usize,
        dst: &HostBuffer,
        dst_offset: usize,
        bytes: usize,
    ) -> HostEvent {
        let event = HostEvent::new();
        let command = Command::Copy {
            src: src.clone(),
            src_offset,
            dst: dst.clone(),
            dst_offset,
            bytes,
            event: event.clone(),
        };
        if let Err(e) = self.submit(command) {
            event.complete(Err(e));
        }
        event
    }

    pub(crate) fn launch(
        &self,
        program: &Arc<HostProgram>,
        global_work_size: usize,
        args: Vec<KernelArg>,
    ) -> HostEvent {
        let event = HostEvent::new();
        let command =
            Command::Launch { program: program.clone(), global_work_size, args, event: event.clone() };
        if let Err(e) = self.submit(command) {
            event.complete(Err(e));
        }
        event
    }

    pub(crate) fn finish(&self) -> Result<(), BackendError> {
        let event = HostEvent::new();
        self.submit(Command::Marker { event: event.clone() })?;
        event.wait()
    }
}

impl Drop for HostQueue {
    fn drop(&mut self) {
        // Closing the channel stops the worker once queued commands are done
        self.sender = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(receiver: &mpsc::Receiver<Command>) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Write { buffer, offset, data, event } => {
                let mut mem = buffer.0.write();
                let result = match mem.get_mut(offset..offset + data.len()) {
                    Some(dst) => {
                        dst.copy_from_slice(&data);
                        Ok(())
                    }
                    None => Err(out_of_bounds(ErrorStatus::MemoryCopyH2D, offset, data.len(), mem.len())),
                };
                drop(mem);
                event.complete(result);
            }
            Command::Read { buffer, offset, staging, event } => {
                let mem = buffer.0.read();
                let mut staging = staging.lock();
                let len = staging.len();
                let result = match mem.get(offset..offset + len) {
                    Some(src) => {
                        staging.copy_from_slice(src);
                        Ok(())
                    }
                    None => Err(out_of_bounds(ErrorStatus::MemoryCopyD2H, offset, len, mem.len())),
                };
                drop(staging);
                drop(mem);
                event.complete(result);
            }
            Command::Copy { src, src_offset, dst, dst_offset, bytes, event } => {
                event.complete(copy(&src, src_offset, &dst, dst_offset, bytes));
            }
            Command::Launch { program, global_work_size, args, event } => {
                // A panicking host closure fails the launch, the worker keeps serving the queue
                let result = panic::catch_unwind(AssertUnwindSafe(|| program.execute(global_work_size, &args)))
                    .unwrap_or_else(|payload| {
                        Err(BackendError::new(
                            ErrorStatus::KernelLaunch,
                            format!("Kernel {} panicked: {}", program.name, panic_message(&*payload)),
                        ))
                    });
                event.complete(result);
            }
            Command::Marker { event } => event.complete(Ok(())),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn out_of_bounds(status: ErrorStatus, offset: usize, len: usize, bytes: usize) -> BackendError {
    BackendError::new(status, format!("Range {offset}..{} exceeds buffer of {bytes} bytes", offset + len))
}

fn copy(src: &HostBuffer, src_offset: usize, dst: &HostBuffer, dst_offset: usize, bytes: usize) -> Result<(), BackendError> {
    if Arc::ptr_eq(&src.0, &dst.0) {
        let mut mem = dst.0.write();
        let len = mem.len();
        if src_offset.max(dst_offset) + bytes > len {
            return Err(out_of_bounds(ErrorStatus::MemoryCopyD2D, src_offset.max(dst_offset), bytes, len));
        }
        mem.copy_within(src_offset..src_offset + bytes, dst_offset);
        return Ok(());
    }
    // Stage through a temporary so no two buffer locks are held at once
    let from = src.0.read();
    let Some(staged) = from.get(src_offset..src_offset + bytes).map(<[u8]>::to_vec) else {
        return Err(out_of_bounds(ErrorStatus::MemoryCopyD2D, src_offset, bytes, from.len()));
    };
    drop(from);
    let mut to = dst.0.write();
    let to_len = to.len();
    let Some(to) = to.get_mut(dst_offset..dst_offset + bytes) else {
        return Err(out_of_bounds(ErrorStatus::MemoryCopyD2D, dst_offset, bytes, to_len));
    };
    to.copy_from_slice(&staged);
    Ok(())
}

impl HostBuffer {
    pub(crate) fn new(bytes: usize) -> HostBuffer {
        HostBuffer(Arc::new(RwLock::new(vec![0; bytes])))
    }

    pub(crate) fn bytes(&self) -> usize {
        self.0.read().len()
    }
}

impl core::fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("HostBuffer({} bytes)", self.bytes()))
    }
}

impl HostEvent {
    fn new() -> HostEvent {
        HostEvent(Arc::new(EventState::default()))
    }

    fn complete(&self, result: Result<(), BackendError>) {
        *self.0.result.lock() = Some(result.map_err(|e| (e.status, e.context)));
        self.0.done.notify_all();
    }

    pub(crate) fn wait(&self) -> Result<(), BackendError> {
        let mut result = self.0.result.lock();
        while result.is_none() {
            self.0.done.wait(&mut result);
        }
        match result.as_ref() {
            Some(Err((status, context))) => Err(BackendError::new(*status, context.clone())),
            _ => Ok(()),
        }
    }
}

/// Kernel argument bound for the duration of one launch
enum Bound<'a> {
    Output,
    Buffer(RwLockReadGuard<'a, Vec<u8>>),
    Scalar(Constant),
}

impl HostProgram {
    pub(crate) fn new(source: &KernelSource) -> Result<HostProgram, BackendError> {
        let mut missing = Vec::new();
        source.body.device_only_functions(&mut missing);
        if !missing.is_empty() {
            return Err(BackendError::new(
                ErrorStatus::KernelCompilation,
                format!("User functions {missing:?} have no host implementation"),
            ));
        }
        Ok(HostProgram {
            name: source.name.clone(),
            body: source.body.clone(),
            dtype: source.dtype,
            kind: source.kind,
        })
    }

    fn execute(&self, global_work_size: usize, args: &[KernelArg]) -> Result<(), BackendError> {
        let arg_error = |context: String| BackendError::new(ErrorStatus::IncorrectKernelArg, context);
        let (Some(KernelArg::Scalar(Constant::U64(n))), Some(KernelArg::Buffer(Buffer::Host(dst)))) =
            (args.first(), args.get(1))
        else {
            return Err(arg_error(format!("Kernel {} expects length and destination first", self.name)));
        };
        let n = usize::try_from(*n).map_err(|e| arg_error(e.to_string()))?;
        let size = self.dtype.byte_size();
        if dst.bytes() < n * size {
            return Err(arg_error(format!("Destination of kernel {} is shorter than {n} elements", self.name)));
        }
        // Work items that reach each element, matching the generated loop form
        let covered = match self.kind {
            DeviceKind::Cpu => n.min(global_work_size),
            DeviceKind::Gpu if global_work_size == 0 => 0,
            DeviceKind::Gpu => n,
        };
        let params = args
            .iter()
            .enumerate()
            .map(|(i, arg)| match arg {
                _ if i == 1 => Ok(Bound::Output),
                KernelArg::Scalar(value) => Ok(Bound::Scalar(*value)),
                KernelArg::Buffer(Buffer::Host(buffer)) => Ok(Bound::Buffer(buffer.0.read_recursive())),
                KernelArg::Buffer(Buffer::OpenCL(_)) => {
                    Err(arg_error(format!("Argument {i} of kernel {} is an OpenCL buffer", self.name)))
                }
            })
            .collect::<Result<Vec<Bound>, BackendError>>()?;
        self.body.check(&params, n).map_err(arg_error)?;

        let mut out = vec![0u8; covered * size];
        out.par_chunks_mut(size).enumerate().for_each(|(i, slot)| {
            self.body.eval(i, &params).write(slot);
        });
        drop(params);
        dst.0.write()[..covered * size].copy_from_slice(&out);
        Ok(())
    }
}

impl KernelBody {
    fn check(&self, params: &[Bound], n: usize) -> Result<(), String> {
        match self {
            KernelBody::Load { param, dtype } => match params.get(*param) {
                Some(Bound::Buffer(mem)) if mem.len() >= n * dtype.byte_size() => Ok(()),
                _ => Err(format!("Argument {param} is not a buffer of {n} {dtype} elements")),
            },
            KernelBody::Param { param } => match params.get(*param) {
                Some(Bound::Scalar(_)) => Ok(()),
                _ => Err(format!("Argument {param} is not a scalar")),
            },
            KernelBody::Unary { x, .. } => x.check(params, n),
            KernelBody::Binary { x, y, .. } => {
                x.check(params, n)?;
                y.check(params, n)
            }
            KernelBody::Call { args, .. } => args.iter().try_for_each(|arg| arg.check(params, n)),
        }
    }

    fn eval(&self, i: usize, params: &[Bound]) -> Constant {
        match self {
            KernelBody::Load { param, dtype } => match &params[*param] {
                Bound::Buffer(mem) => Constant::read(*dtype, &mem[i * dtype.byte_size()..]),
                _ => unreachable!("checked before execution"),
            },
            KernelBody::Param { param } => match &params[*param] {
                Bound::Scalar(value) => *value,
                _ => unreachable!("checked before execution"),
            },
            KernelBody::Unary { func, x } => func.apply(x.eval(i, params)),
            KernelBody::Binary { op, x, y } => op.apply(x.eval(i, params), y.eval(i, params)),
            KernelBody::Call { func, args } => {
                let values: Vec<Constant> = args.iter().map(|arg| arg.eval(i, params)).collect();
                func.call_host(&values)
            }
        }
    }
}
