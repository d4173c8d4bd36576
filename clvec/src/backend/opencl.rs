//! `OpenCL` backend

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use super::{BackendQueue, Buffer, DeviceInfo, DeviceKey, DeviceKind, KernelArg, MemFlags};
use crate::{
    debug,
    error::{BackendError, ErrorStatus},
    kernel::KernelSource,
};
use libloading::Library;
use nanoserde::DeJson;
use parking_lot::Mutex;
use std::{
    ffi::{c_char, c_void, CString},
    ptr,
    sync::Arc,
};

/// `OpenCL` backend configuration
#[derive(Debug, Default, Clone, DeJson)]
pub struct OpenCLConfig {
    /// Select which platforms will be used by `OpenCL` backend
    /// If set to None, uses all available platforms.
    /// default = None
    pub platform_ids: Option<Vec<usize>>,
}

// Entry points of the OpenCL runtime, loaded once per initialization
struct OpenCLApi {
    clGetPlatformIDs: unsafe extern "C" fn(cl_uint, *mut *mut c_void, *mut cl_uint) -> cl_int,
    clGetPlatformInfo: unsafe extern "C" fn(*mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> cl_int,
    clGetDeviceIDs:
        unsafe extern "C" fn(*mut c_void, cl_bitfield, cl_uint, *mut *mut c_void, *mut cl_uint) -> cl_int,
    clGetDeviceInfo: unsafe extern "C" fn(*mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> cl_int,
    clCreateContext: unsafe extern "C" fn(
        *const isize,
        cl_uint,
        *const *mut c_void,
        Option<unsafe extern "C" fn(*const c_char, *const c_void, usize, *mut c_void)>,
        *mut c_void,
        *mut cl_int,
    ) -> *mut c_void,
    clReleaseContext: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clCreateCommandQueue: unsafe extern "C" fn(*mut c_void, *mut c_void, cl_bitfield, *mut cl_int) -> *mut c_void,
    clReleaseCommandQueue: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clFinish: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clCreateBuffer: unsafe extern "C" fn(*mut c_void, cl_bitfield, usize, *mut c_void, *mut cl_int) -> *mut c_void,
    clReleaseMemObject: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clEnqueueWriteBuffer: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        usize,
        usize,
        *const c_void,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> cl_int,
    clEnqueueReadBuffer: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        usize,
        usize,
        *mut c_void,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> cl_int,
    clEnqueueCopyBuffer: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        *mut c_void,
        usize,
        usize,
        usize,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> cl_int,
    clCreateProgramWithSource:
        unsafe extern "C" fn(*mut c_void, cl_uint, *const *const c_char, *const usize, *mut cl_int) -> *mut c_void,
    clBuildProgram: unsafe extern "C" fn(
        *mut c_void,
        cl_uint,
        *const *mut c_void,
        *const c_char,
        Option<unsafe extern "C" fn(*mut c_void, *mut c_void)>,
        *mut c_void,
    ) -> cl_int,
    clGetProgramBuildInfo:
        unsafe extern "C" fn(*mut c_void, *mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> cl_int,
    clReleaseProgram: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clCreateKernel: unsafe extern "C" fn(*mut c_void, *const c_char, *mut cl_int) -> *mut c_void,
    clReleaseKernel: unsafe extern "C" fn(*mut c_void) -> cl_int,
    clSetKernelArg: unsafe extern "C" fn(*mut c_void, cl_uint, usize, *const c_void) -> cl_int,
    clGetKernelWorkGroupInfo:
        unsafe extern "C" fn(*mut c_void, *mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> cl_int,
    clEnqueueNDRangeKernel: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        *const usize,
        *const usize,
        *const usize,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> cl_int,
    clWaitForEvents: unsafe extern "C" fn(cl_uint, *const *mut c_void) -> cl_int,
    clReleaseEvent: unsafe extern "C" fn(*mut c_void) -> cl_int,
    // Keeps the function pointers valid
    _library: Library,
}

pub(crate) struct OpenCLContext {
    api: Arc<OpenCLApi>,
    context: *mut c_void,
    device_ptrs: Vec<*mut c_void>,
    devices: Vec<DeviceInfo>,
    queues: Vec<BackendQueue>,
}

pub(crate) struct OpenCLQueue {
    api: Arc<OpenCLApi>,
    queue: *mut c_void,
    context: *mut c_void,
}

#[derive(Clone)]
pub(crate) struct OpenCLBuffer(Arc<OpenCLBufferInner>);

struct OpenCLBufferInner {
    api: Arc<OpenCLApi>,
    mem: *mut c_void,
    bytes: usize,
}

#[derive(Clone)]
pub(crate) struct OpenCLEvent(Arc<OpenCLEventInner>);

struct OpenCLEventInner {
    api: Arc<OpenCLApi>,
    event: *mut c_void,
    // Host memory the device reads from or writes to until the event completes
    staging: Option<Staging>,
}

enum Staging {
    Upload(#[allow(dead_code)] Vec<u8>),
    Download(#[allow(dead_code)] Arc<Mutex<Vec<u8>>>),
}

pub(crate) struct OpenCLProgram {
    api: Arc<OpenCLApi>,
    name: String,
    program: *mut c_void,
    kernel: *mut c_void,
    // Kernel arguments are state of the kernel object, set and enqueue atomically
    launch: Mutex<()>,
}

// Handles are reference counted by the OpenCL runtime, which is thread safe
// except for clSetKernelArg, guarded by OpenCLProgram::launch.
unsafe impl Send for OpenCLContext {}
unsafe impl Sync for OpenCLContext {}
unsafe impl Send for OpenCLQueue {}
unsafe impl Sync for OpenCLQueue {}
unsafe impl Send for OpenCLBufferInner {}
unsafe impl Sync for OpenCLBufferInner {}
unsafe impl Send for OpenCLEventInner {}
unsafe impl Sync for OpenCLEventInner {}
unsafe impl Send for OpenCLProgram {}
unsafe impl Sync for OpenCLProgram {}

macro_rules! load {
    ($lib:expr, $name:ident) => {
        *unsafe { $lib.get(concat!(stringify!($name), "\0").as_bytes()) }.map_err(|e| {
            BackendError::new(ErrorStatus::DyLibNotFound, format!("{}: {e}", stringify!($name)))
        })?
    };
}

impl OpenCLApi {
    fn load() -> Result<OpenCLApi, BackendError> {
        let opencl_paths = [
            "libOpenCL.so.1",
            "libOpenCL.so",
            "/lib/libOpenCL.so",
            "/lib64/libOpenCL.so",
            "/lib/x86_64-linux-gnu/libOpenCL.so",
            "/lib64/x86_64-linux-gnu/libOpenCL.so",
            "/usr/lib/libOpenCL.so",
            "/usr/lib64/libOpenCL.so",
            "/usr/lib/x86_64-linux-gnu/libOpenCL.so",
            "/usr/lib64/x86_64-linux-gnu/libOpenCL.so",
            "/System/Library/Frameworks/OpenCL.framework/OpenCL",
            "OpenCL.dll",
        ];
        let opencl = opencl_paths.iter().find_map(|path| unsafe { Library::new(path) }.ok());
        let Some(opencl) = opencl else {
            return Err(BackendError::new(ErrorStatus::DyLibNotFound, "OpenCL runtime not found."));
        };
        Ok(OpenCLApi {
            clGetPlatformIDs: load!(opencl, clGetPlatformIDs),
            clGetPlatformInfo: load!(opencl, clGetPlatformInfo),
            clGetDeviceIDs: load!(opencl, clGetDeviceIDs),
            clGetDeviceInfo: load!(opencl, clGetDeviceInfo),
            clCreateContext: load!(opencl, clCreateContext),
            clReleaseContext: load!(opencl, clReleaseContext),
            clCreateCommandQueue: load!(opencl, clCreateCommandQueue),
            clReleaseCommandQueue: load!(opencl, clReleaseCommandQueue),
            clFinish: load!(opencl, clFinish),
            clCreateBuffer: load!(opencl, clCreateBuffer),
            clReleaseMemObject: load!(opencl, clReleaseMemObject),
            clEnqueueWriteBuffer: load!(opencl, clEnqueueWriteBuffer),
            clEnqueueReadBuffer: load!(opencl, clEnqueueReadBuffer),
            clEnqueueCopyBuffer: load!(opencl, clEnqueueCopyBuffer),
            clCreateProgramWithSource: load!(opencl, clCreateProgramWithSource),
            clBuildProgram: load!(opencl, clBuildProgram),
            clGetProgramBuildInfo: load!(opencl, clGetProgramBuildInfo),
            clReleaseProgram: load!(opencl, clReleaseProgram),
            clCreateKernel: load!(opencl, clCreateKernel),
            clReleaseKernel: load!(opencl, clReleaseKernel),
            clSetKernelArg: load!(opencl, clSetKernelArg),
            clGetKernelWorkGroupInfo: load!(opencl, clGetKernelWorkGroupInfo),
            clEnqueueNDRangeKernel: load!(opencl, clEnqueueNDRangeKernel),
            clWaitForEvents: load!(opencl, clWaitForEvents),
            clReleaseEvent: load!(opencl, clReleaseEvent),
            _library: opencl,
        })
    }

    fn platform_ids(&self) -> Result<Vec<*mut c_void>, BackendError> {
        let mut count: cl_uint = 0;
        OpenCLStatus::from(unsafe { (self.clGetPlatformIDs)(0, ptr::null_mut(), &mut count) })
            .check(ErrorStatus::DeviceEnumeration)?;
        let mut ids: Vec<*mut c_void> = vec![ptr::null_mut(); count as usize];
        if count > 0 {
            OpenCLStatus::from(unsafe { (self.clGetPlatformIDs)(count, ids.as_mut_ptr(), ptr::null_mut()) })
                .check(ErrorStatus::DeviceEnumeration)?;
        }
        Ok(ids)
    }

    fn device_ids(&self, platform: *mut c_void) -> Result<Vec<*mut c_void>, BackendError> {
        let mut count: cl_uint = 0;
        let status = OpenCLStatus::from(unsafe {
            (self.clGetDeviceIDs)(platform, CL_DEVICE_TYPE_ALL, 0, ptr::null_mut(), &mut count)
        });
        if status == OpenCLStatus::CL_DEVICE_NOT_FOUND || count == 0 {
            return Ok(Vec::new());
        }
        status.check(ErrorStatus::DeviceEnumeration)?;
        let mut ids: Vec<*mut c_void> = vec![ptr::null_mut(); count as usize];
        OpenCLStatus::from(unsafe {
            (self.clGetDeviceIDs)(platform, CL_DEVICE_TYPE_ALL, count, ids.as_mut_ptr(), ptr::null_mut())
        })
        .check(ErrorStatus::DeviceEnumeration)?;
        Ok(ids)
    }

    fn platform_name(&self, platform: *mut c_void) -> Result<String, BackendError> {
        let mut size: usize = 0;
        OpenCLStatus::from(unsafe {
            (self.clGetPlatformInfo)(platform, CL_PLATFORM_NAME, 0, ptr::null_mut(), &mut size)
        })
        .check(ErrorStatus::DeviceQuery)?;
        let mut data: Vec<u8> = vec![0; size];
        OpenCLStatus::from(unsafe {
            (self.clGetPlatformInfo)(platform, CL_PLATFORM_NAME, size, data.as_mut_ptr().cast(), ptr::null_mut())
        })
        .check(ErrorStatus::DeviceQuery)?;
        Ok(c_string(&data))
    }

    fn device_data(&self, device: *mut c_void, param_name: cl_uint) -> Result<Vec<u8>, BackendError> {
        let mut size: usize = 0;
        let status =
            OpenCLStatus::from(unsafe { (self.clGetDeviceInfo)(device, param_name, 0, ptr::null_mut(), &mut size) });
        if status != OpenCLStatus::CL_SUCCESS {
            return Err(BackendError::new(
                ErrorStatus::DeviceQuery,
                format!("Failed to get device info {param_name}, {status:?}"),
            ));
        }
        let mut data: Vec<u8> = vec![0; size];
        OpenCLStatus::from(unsafe {
            (self.clGetDeviceInfo)(device, param_name, size, data.as_mut_ptr().cast(), ptr::null_mut())
        })
        .check(ErrorStatus::DeviceQuery)?;
        Ok(data)
    }

    fn device_info(&self, device: *mut c_void) -> Result<DeviceInfo, BackendError> {
        let name = c_string(&self.device_data(device, CL_DEVICE_NAME)?);
        let device_type = u64::from_ne_bytes(ne_bytes(&self.device_data(device, CL_DEVICE_TYPE)?)?);
        let compute_units = u32::from_ne_bytes(ne_bytes(&self.device_data(device, CL_DEVICE_MAX_COMPUTE_UNITS)?)?);
        let max_workgroup_size =
            usize::from_ne_bytes(ne_bytes(&self.device_data(device, CL_DEVICE_MAX_WORK_GROUP_SIZE)?)?);
        Ok(DeviceInfo {
            name,
            kind: if device_type & CL_DEVICE_TYPE_CPU != 0 { DeviceKind::Cpu } else { DeviceKind::Gpu },
            compute_units: (compute_units as usize).max(1),
            max_workgroup_size: max_workgroup_size.max(1),
            key: DeviceKey::OpenCL(device as usize),
        })
    }

    fn build_log(&self, program: *mut c_void, device: *mut c_void) -> String {
        let mut size: usize = 0;
        let status = OpenCLStatus::from(unsafe {
            (self.clGetProgramBuildInfo)(program, device, CL_PROGRAM_BUILD_LOG, 0, ptr::null_mut(), &mut size)
        });
        if status != OpenCLStatus::CL_SUCCESS {
            return format!("{status:?}");
        }
        let mut data: Vec<u8> = vec![0; size];
        let status = OpenCLStatus::from(unsafe {
            (self.clGetProgramBuildInfo)(
                program,
                device,
                CL_PROGRAM_BUILD_LOG,
                size,
                data.as_mut_ptr().cast(),
                ptr::null_mut(),
            )
        });
        if status == OpenCLStatus::CL_SUCCESS {
            c_string(&data)
        } else {
            format!("{status:?}")
        }
    }

    fn wait(&self, event: *mut c_void) -> Result<(), BackendError> {
        let events = [event];
        OpenCLStatus::from(unsafe { (self.clWaitForEvents)(1, events.as_ptr()) }).check(ErrorStatus::KernelSync)
    }
}

fn c_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

fn ne_bytes<const N: usize>(data: &[u8]) -> Result<[u8; N], BackendError> {
    data.get(..N).and_then(|bytes| bytes.try_into().ok()).ok_or_else(|| {
        BackendError::new(ErrorStatus::DeviceQuery, format!("Expected {N} bytes of device info, got {}", data.len()))
    })
}

/// Creates one context per platform, holding every device of the platform.
pub(crate) fn initialize_device(config: &OpenCLConfig) -> Result<Vec<OpenCLContext>, BackendError> {
    let debug_dev = debug().dev();
    if let Some(platform_ids) = &config.platform_ids {
        if platform_ids.is_empty() {
            return Err(BackendError::new(ErrorStatus::Initialization, "OpenCL was configured out"));
        }
    }
    let api = Arc::new(OpenCLApi::load()?);
    let mut contexts = Vec::new();
    for (platform_id, platform) in api
        .platform_ids()?
        .into_iter()
        .enumerate()
        .filter(|(id, _)| config.platform_ids.as_ref().map_or(true, |ids| ids.contains(id)))
    {
        let device_ptrs = match api.device_ids(platform) {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) => continue,
            Err(e) => {
                if debug_dev {
                    tracing::warn!("OpenCL platform {platform_id}: {e}");
                }
                continue;
            }
        };
        let devices = match device_ptrs.iter().map(|&dev| api.device_info(dev)).collect::<Result<Vec<_>, _>>() {
            Ok(devices) => devices,
            Err(e) => {
                if debug_dev {
                    tracing::warn!("OpenCL platform {platform_id}: {e}");
                }
                continue;
            }
        };
        let mut status: cl_int = 0;
        let context = unsafe {
            (api.clCreateContext)(
                ptr::null(),
                cl_uint::try_from(device_ptrs.len()).unwrap_or(cl_uint::MAX),
                device_ptrs.as_ptr(),
                None,
                ptr::null_mut(),
                &mut status,
            )
        };
        if let Err(e) = OpenCLStatus::from(status).check(ErrorStatus::Initialization) {
            if debug_dev {
                tracing::warn!("OpenCL platform {platform_id}: {e}");
            }
            continue;
        }
        let mut context = OpenCLContext { api: api.clone(), context, device_ptrs, devices, queues: Vec::new() };
        for &device in &context.device_ptrs {
            let queue = unsafe { (api.clCreateCommandQueue)(context.context, device, 0, &mut status) };
            OpenCLStatus::from(status).check(ErrorStatus::Initialization)?;
            context.queues.push(BackendQueue::OpenCL(OpenCLQueue {
                api: api.clone(),
                queue,
                context: context.context,
            }));
        }
        if debug_dev {
            let platform_name = api.platform_name(platform).unwrap_or_default();
            tracing::info!("Using OpenCL platform, platform id {platform_id}, name {platform_name} on devices:");
            for device in &context.devices {
                tracing::info!(
                    "    {}, {:?}, {} compute units, max workgroup {}",
                    device.name,
                    device.kind,
                    device.compute_units,
                    device.max_workgroup_size
                );
            }
        }
        contexts.push(context);
    }
    Ok(contexts)
}

impl OpenCLContext {
    pub(crate) fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub(crate) fn queues(&self) -> &[BackendQueue] {
        &self.queues
    }

    pub(crate) fn build(&self, source: &KernelSource) -> Result<(Arc<OpenCLProgram>, usize), BackendError> {
        let api = &self.api;
        let sources = [source.source.as_ptr().cast::<c_char>()];
        let lengths = [source.source.len()];
        let mut status: cl_int = 0;
        let program =
            unsafe { (api.clCreateProgramWithSource)(self.context, 1, sources.as_ptr(), lengths.as_ptr(), &mut status) };
        OpenCLStatus::from(status).check(ErrorStatus::KernelCompilation)?;
        // Owns the program from here on, released on any error below
        let mut compiled = OpenCLProgram {
            api: api.clone(),
            name: source.name.clone(),
            program,
            kernel: ptr::null_mut(),
            launch: Mutex::new(()),
        };
        let status = OpenCLStatus::from(unsafe {
            (api.clBuildProgram)(
                program,
                cl_uint::try_from(self.device_ptrs.len()).unwrap_or(cl_uint::MAX),
                self.device_ptrs.as_ptr(),
                c"".as_ptr(),
                None,
                ptr::null_mut(),
            )
        });
        if status != OpenCLStatus::CL_SUCCESS {
            let logs: Vec<String> = self.device_ptrs.iter().map(|&dev| api.build_log(program, dev)).collect();
            return Err(BackendError::new(
                ErrorStatus::KernelCompilation,
                format!("{status:?} building {}\n{}\n{}", source.name, logs.join("\n"), source.source),
            ));
        }
        let name = CString::new(source.name.as_str())
            .map_err(|e| BackendError::new(ErrorStatus::KernelCompilation, e.to_string()))?;
        let mut status: cl_int = 0;
        compiled.kernel = unsafe { (api.clCreateKernel)(program, name.as_ptr(), &mut status) };
        OpenCLStatus::from(status).check(ErrorStatus::KernelCompilation)?;

        let mut wgsize: usize = 1024;
        for &device in &self.device_ptrs {
            let mut max: usize = 0;
            OpenCLStatus::from(unsafe {
                (api.clGetKernelWorkGroupInfo)(
                    compiled.kernel,
                    device,
                    CL_KERNEL_WORK_GROUP_SIZE,
                    core::mem::size_of::<usize>(),
                    ptr::from_mut(&mut max).cast(),
                    ptr::null_mut(),
                )
            })
            .check(ErrorStatus::DeviceQuery)?;
            while wgsize > 1 && wgsize > max {
                wgsize /= 2;
            }
        }
        Ok((Arc::new(compiled), wgsize))
    }
}

impl Drop for OpenCLContext {
    fn drop(&mut self) {
        // Queues hold their own reference to the context
        self.queues.clear();
        let _ = OpenCLStatus::from(unsafe { (self.api.clReleaseContext)(self.context) })
            .check(ErrorStatus::Deinitialization);
    }
}

impl OpenCLQueue {
    pub(crate) fn allocate(&self, bytes: usize, flags: MemFlags) -> Result<OpenCLBuffer, BackendError> {
        let flags = match flags {
            MemFlags::ReadWrite => CL_MEM_READ_WRITE,
            MemFlags::ReadOnly => CL_MEM_READ_ONLY,
            MemFlags::WriteOnly => CL_MEM_WRITE_ONLY,
        };
        let mut status: cl_int = 0;
        let mem = unsafe { (self.api.clCreateBuffer)(self.context, flags, bytes, ptr::null_mut(), &mut status) };
        OpenCLStatus::from(status).check(ErrorStatus::MemoryAllocation)?;
        Ok(OpenCLBuffer(Arc::new(OpenCLBufferInner { api: self.api.clone(), mem, bytes })))
    }

    fn event(&self, event: *mut c_void, staging: Option<Staging>) -> OpenCLEvent {
        OpenCLEvent(Arc::new(OpenCLEventInner { api: self.api.clone(), event, staging }))
    }

    pub(crate) fn write(
        &self,
        buffer: &OpenCLBuffer,
        offset: usize,
        src: &[u8],
        blocking: bool,
    ) -> Result<OpenCLEvent, BackendError> {
        // Non-blocking writes read from a copy owned by the event
        let staging = (!blocking).then(|| src.to_vec());
        let ptr = staging.as_ref().map_or(src.as_ptr(), Vec::as_ptr);
        let mut event = ptr::null_mut();
        OpenCLStatus::from(unsafe {
            (self.api.clEnqueueWriteBuffer)(
                self.queue,
                buffer.0.mem,
                if blocking { CL_BLOCKING } else { CL_NON_BLOCKING },
                offset,
                src.len(),
                ptr.cast(),
                0,
                ptr::null(),
                &mut event,
            )
        })
        .check(ErrorStatus::MemoryCopyH2D)?;
        Ok(self.event(event, staging.map(Staging::Upload)))
    }

    pub(crate) fn read(
        &self,
        buffer: &OpenCLBuffer,
        offset: usize,
        staging: Arc<Mutex<Vec<u8>>>,
        blocking: bool,
    ) -> Result<OpenCLEvent, BackendError> {
        let (dst, bytes) = {
            let mut data = staging.lock();
            (data.as_mut_ptr(), data.len())
        };
        let mut event = ptr::null_mut();
        OpenCLStatus::from(unsafe {
            (self.api.clEnqueueReadBuffer)(
                self.queue,
                buffer.0.mem,
                if blocking { CL_BLOCKING } else { CL_NON_BLOCKING },
                offset,
                bytes,
                dst.cast(),
                0,
                ptr::null(),
                &mut event,
            )
        })
        .check(ErrorStatus::MemoryCopyD2H)?;
        Ok(self.event(event, Some(Staging::Download(staging))))
    }

    pub(crate) fn copy(
        &self,
        src: &OpenCLBuffer,
        src_offset: usize,
        dst: &OpenCLBuffer,
        dst_offset: usize,
        bytes: usize,
    ) -> Result<OpenCLEvent, BackendError> {
        let mut event = ptr::null_mut();
        OpenCLStatus::from(unsafe {
            (self.api.clEnqueueCopyBuffer)(
                self.queue,
                src.0.mem,
                dst.0.mem,
                src_offset,
                dst_offset,
                bytes,
                0,
                ptr::null(),
                &mut event,
            )
        })
        .check(ErrorStatus::MemoryCopyD2D)?;
        Ok(self.event(event, None))
    }

    pub(crate) fn launch(
        &self,
        program: &OpenCLProgram,
        global_work_size: usize,
        local_work_size: usize,
        args: &[KernelArg],
    ) -> Result<OpenCLEvent, BackendError> {
        let _guard = program.launch.lock();
        for (i, arg) in args.iter().enumerate() {
            let index = cl_uint::try_from(i)
                .map_err(|e| BackendError::new(ErrorStatus::IncorrectKernelArg, e.to_string()))?;
            let status = match arg {
                KernelArg::Buffer(Buffer::OpenCL(buffer)) => {
                    let mem = buffer.0.mem;
                    unsafe {
                        (self.api.clSetKernelArg)(
                            program.kernel,
                            index,
                            core::mem::size_of::<*mut c_void>(),
                            ptr::from_ref(&mem).cast(),
                        )
                    }
                }
                KernelArg::Scalar(value) => {
                    let bytes = value.to_ne_bytes();
                    unsafe { (self.api.clSetKernelArg)(program.kernel, index, bytes.len(), bytes.as_ptr().cast()) }
                }
                KernelArg::Buffer(Buffer::Host(_)) => {
                    return Err(BackendError::new(
                        ErrorStatus::IncorrectKernelArg,
                        format!("Argument {i} of kernel {} is a host buffer", program.name),
                    ));
                }
            };
            OpenCLStatus::from(status).check(ErrorStatus::IncorrectKernelArg)?;
        }
        let global = [global_work_size];
        let local = [local_work_size];
        let mut event = ptr::null_mut();
        OpenCLStatus::from(unsafe {
            (self.api.clEnqueueNDRangeKernel)(
                self.queue,
                program.kernel,
                1,
                ptr::null(),
                global.as_ptr(),
                local.as_ptr(),
                0,
                ptr::null(),
                &mut event,
            )
        })
        .check(ErrorStatus::KernelLaunch)?;
        Ok(self.event(event, None))
    }

    pub(crate) fn finish(&self) -> Result<(), BackendError> {
        OpenCLStatus::from(unsafe { (self.api.clFinish)(self.queue) }).check(ErrorStatus::KernelSync)
    }
}

impl Drop for OpenCLQueue {
    fn drop(&mut self) {
        let _ = self.finish();
        let _ = OpenCLStatus::from(unsafe { (self.api.clReleaseCommandQueue)(self.queue) })
            .check(ErrorStatus::Deinitialization);
    }
}

impl Drop for OpenCLBufferInner {
    fn drop(&mut self) {
        let _ = OpenCLStatus::from(unsafe { (self.api.clReleaseMemObject)(self.mem) })
            .check(ErrorStatus::Deinitialization);
    }
}

impl OpenCLEvent {
    pub(crate) fn wait(&self) -> Result<(), BackendError> {
        if self.0.event.is_null() {
            return Ok(());
        }
        self.0.api.wait(self.0.event)
    }
}

impl Drop for OpenCLEventInner {
    fn drop(&mut self) {
        if self.event.is_null() {
            return;
        }
        if self.staging.is_some() {
            let _ = self.api.wait(self.event);
        }
        let _ = OpenCLStatus::from(unsafe { (self.api.clReleaseEvent)(self.event) })
            .check(ErrorStatus::Deinitialization);
    }
}

impl Drop for OpenCLProgram {
    fn drop(&mut self) {
        if !self.kernel.is_null() {
            let _ = OpenCLStatus::from(unsafe { (self.api.clReleaseKernel)(self.kernel) })
                .check(ErrorStatus::Deinitialization);
        }
        let _ = OpenCLStatus::from(unsafe { (self.api.clReleaseProgram)(self.program) })
            .check(ErrorStatus::Deinitialization);
    }
}

impl core::fmt::Debug for OpenCLBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("OpenCLBuffer({:?}, {} bytes)", self.0.mem, self.0.bytes))
    }
}

impl core::fmt::Debug for OpenCLEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("OpenCLEvent({:?})", self.0.event))
    }
}

impl core::fmt::Debug for OpenCLProgram {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("OpenCLProgram({})", self.name))
    }
}

impl OpenCLStatus {
    fn check(self, status: ErrorStatus) -> Result<(), BackendError> {
        if self == Self::CL_SUCCESS {
            Ok(())
        } else {
            Err(BackendError { status, context: format!("{self:?}").into() })
        }
    }
}

type cl_int = i32;
type cl_uint = u32;
type cl_bitfield = u64;

const CL_PLATFORM_NAME: cl_uint = 0x0902; // 2306
const CL_DEVICE_TYPE: cl_uint = 0x1000; // 4096
const CL_DEVICE_MAX_COMPUTE_UNITS: cl_uint = 0x1002; // 4098
const CL_DEVICE_MAX_WORK_GROUP_SIZE: cl_uint = 0x1004; // 4100
const CL_DEVICE_NAME: cl_uint = 0x102B; // 4139
const CL_DEVICE_TYPE_CPU: cl_bitfield = 1 << 1;
const CL_DEVICE_TYPE_ALL: cl_bitfield = 0xFFFF_FFFF;
const CL_KERNEL_WORK_GROUP_SIZE: cl_uint = 0x11B0; // 4528
const CL_MEM_READ_WRITE: cl_bitfield = 1;
const CL_MEM_WRITE_ONLY: cl_bitfield = 2;
const CL_MEM_READ_ONLY: cl_bitfield = 4;
const CL_NON_BLOCKING: cl_uint = 0;
const CL_BLOCKING: cl_uint = 1;
const CL_PROGRAM_BUILD_LOG: cl_uint = 0x1183; // 4483

#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, PartialEq, Debug, Eq)]
enum OpenCLStatus {
    CL_SUCCESS,
    CL_DEVICE_NOT_FOUND,
    CL_DEVICE_NOT_AVAILABLE,
    CL_COMPILER_NOT_AVAILABLE,
    CL_MEM_OBJECT_ALLOCATION_FAILURE,
    CL_OUT_OF_RESOURCES,
    CL_OUT_OF_HOST_MEMORY,
    CL_MEM_COPY_OVERLAP,
    CL_BUILD_PROGRAM_FAILURE,
    CL_MISALIGNED_SUB_BUFFER_OFFSET,
    CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
    CL_INVALID_VALUE,
    CL_INVALID_DEVICE_TYPE,
    CL_INVALID_PLATFORM,
    CL_INVALID_DEVICE,
    CL_INVALID_CONTEXT,
    CL_INVALID_COMMAND_QUEUE,
    CL_INVALID_HOST_PTR,
    CL_INVALID_MEM_OBJECT,
    CL_INVALID_BINARY,
    CL_INVALID_BUILD_OPTIONS,
    CL_INVALID_PROGRAM,
    CL_INVALID_PROGRAM_EXECUTABLE,
    CL_INVALID_KERNEL_NAME,
    CL_INVALID_KERNEL_DEFINITION,
    CL_INVALID_KERNEL,
    CL_INVALID_ARG_INDEX,
    CL_INVALID_ARG_VALUE,
    CL_INVALID_ARG_SIZE,
    CL_INVALID_KERNEL_ARGS,
    CL_INVALID_WORK_DIMENSION,
    CL_INVALID_WORK_GROUP_SIZE,
    CL_INVALID_WORK_ITEM_SIZE,
    CL_INVALID_GLOBAL_OFFSET,
    CL_INVALID_EVENT_WAIT_LIST,
    CL_INVALID_EVENT,
    CL_INVALID_OPERATION,
    CL_INVALID_BUFFER_SIZE,
    CL_INVALID_GLOBAL_WORK_SIZE,
    CL_INVALID_PROPERTY,
    CL_MAX_SIZE_RESTRICTION_EXCEEDED,
    UNKNOWN(cl_int),
}

impl From<cl_int> for OpenCLStatus {
    fn from(status: cl_int) -> Self {
        match status {
            0 => Self::CL_SUCCESS,
            -1 => Self::CL_DEVICE_NOT_FOUND,
            -2 => Self::CL_DEVICE_NOT_AVAILABLE,
            -3 => Self::CL_COMPILER_NOT_AVAILABLE,
            -4 => Self::CL_MEM_OBJECT_ALLOCATION_FAILURE,
            -5 => Self::CL_OUT_OF_RESOURCES,
            -6 => Self::CL_OUT_OF_HOST_MEMORY,
            -8 => Self::CL_MEM_COPY_OVERLAP,
            -11 => Self::CL_BUILD_PROGRAM_FAILURE,
            -13 => Self::CL_MISALIGNED_SUB_BUFFER_OFFSET,
            -14 => Self::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
            -30 => Self::CL_INVALID_VALUE,
            -31 => Self::CL_INVALID_DEVICE_TYPE,
            -32 => Self::CL_INVALID_PLATFORM,
            -33 => Self::CL_INVALID_DEVICE,
            -34 => Self::CL_INVALID_CONTEXT,
            -36 => Self::CL_INVALID_COMMAND_QUEUE,
            -37 => Self::CL_INVALID_HOST_PTR,
            -38 => Self::CL_INVALID_MEM_OBJECT,
            -42 => Self::CL_INVALID_BINARY,
            -43 => Self::CL_INVALID_BUILD_OPTIONS,
            -44 => Self::CL_INVALID_PROGRAM,
            -45 => Self::CL_INVALID_PROGRAM_EXECUTABLE,
            -46 => Self::CL_INVALID_KERNEL_NAME,
            -47 => Self::CL_INVALID_KERNEL_DEFINITION,
            -48 => Self::CL_INVALID_KERNEL,
            -49 => Self::CL_INVALID_ARG_INDEX,
            -50 => Self::CL_INVALID_ARG_VALUE,
            -51 => Self::CL_INVALID_ARG_SIZE,
            -52 => Self::CL_INVALID_KERNEL_ARGS,
            -53 => Self::CL_INVALID_WORK_DIMENSION,
            -54 => Self::CL_INVALID_WORK_GROUP_SIZE,
            -55 => Self::CL_INVALID_WORK_ITEM_SIZE,
            -56 => Self::CL_INVALID_GLOBAL_OFFSET,
            -57 => Self::CL_INVALID_EVENT_WAIT_LIST,
            -58 => Self::CL_INVALID_EVENT,
            -59 => Self::CL_INVALID_OPERATION,
            -61 => Self::CL_INVALID_BUFFER_SIZE,
            -63 => Self::CL_INVALID_GLOBAL_WORK_SIZE,
            -64 => Self::CL_INVALID_PROPERTY,
            -72 => Self::CL_MAX_SIZE_RESTRICTION_EXCEEDED,
            status => Self::UNKNOWN(status),
        }
    }
}
