//! OpenCL device running an externally supplied search kernel.
//!
//! The kernel source is loaded at runtime. Its entry point takes the three
//! buffers of the contract in order: constants, params, results.

use std::fs;
use std::path::Path;
use std::ptr;

use log::{debug, info, warn};
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{get_all_devices, Device, CL_DEVICE_TYPE_GPU};
use opencl3::error_codes::ClError;
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::{Buffer, CL_MEM_ALLOC_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE};
use opencl3::program::Program;
use opencl3::types::{cl_int, cl_uint, CL_BLOCKING};

use crate::error::{MinerError, Result};

use super::{
    ComputeDevice, DeviceProvider, DispatchGeometry, DispatchParams, KernelConstants,
    CONSTANTS_WORDS, PARAMS_WORDS, RESULT_BYTES, RESULT_WORDS,
};

/// Default kernel entry point.
pub const DEFAULT_ENTRY_POINT: &str = "safe_create2_search";

// Error codes that mean the device or its queue is gone.
const CL_DEVICE_NOT_AVAILABLE: cl_int = -2;
const CL_OUT_OF_RESOURCES: cl_int = -5;
const CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: cl_int = -14;
const CL_INVALID_CONTEXT: cl_int = -34;
const CL_INVALID_COMMAND_QUEUE: cl_int = -36;

fn dispatch_error(what: &str, e: ClError) -> MinerError {
    match e.0 {
        CL_DEVICE_NOT_AVAILABLE
        | CL_OUT_OF_RESOURCES
        | CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST
        | CL_INVALID_CONTEXT
        | CL_INVALID_COMMAND_QUEUE => MinerError::DeviceLost(format!("{}: {}", what, e)),
        _ => MinerError::DispatchFailed(format!("{}: {}", what, e)),
    }
}

fn init_error(what: &str, e: impl std::fmt::Display) -> MinerError {
    MinerError::GpuInitError(format!("{}: {}", what, e))
}

/// Lists available OpenCL GPU devices.
pub fn list_devices() -> Vec<String> {
    match get_all_devices(CL_DEVICE_TYPE_GPU) {
        Ok(device_ids) => device_ids
            .iter()
            .filter_map(|&id| Device::new(id).name().ok())
            .collect(),
        Err(_) => vec![],
    }
}

/// Acquires OpenCL GPU devices and builds the search kernel on them.
#[derive(Debug, Clone)]
pub struct OpenClProvider {
    device_index: usize,
    kernel_source: String,
    entry_point: String,
    geometry: DispatchGeometry,
}

impl OpenClProvider {
    pub fn new(
        device_index: usize,
        kernel_source: String,
        entry_point: impl Into<String>,
        geometry: DispatchGeometry,
    ) -> Self {
        Self {
            device_index,
            kernel_source,
            entry_point: entry_point.into(),
            geometry,
        }
    }

    pub fn from_kernel_file(
        path: &Path,
        device_index: usize,
        entry_point: impl Into<String>,
        geometry: DispatchGeometry,
    ) -> Result<Self> {
        let source = fs::read_to_string(path)
            .map_err(|e| init_error(&format!("reading kernel {}", path.display()), e))?;
        Ok(Self::new(device_index, source, entry_point, geometry))
    }
}

impl DeviceProvider for OpenClProvider {
    fn acquire(&self) -> Result<Box<dyn ComputeDevice>> {
        let device = OpenClDevice::new(
            self.device_index,
            &self.kernel_source,
            &self.entry_point,
            self.geometry,
        )?;
        Ok(Box::new(device))
    }
}

struct ClBuffers {
    constants: Buffer<cl_uint>,
    params: Buffer<cl_uint>,
    results: Buffer<cl_uint>,
    staging: Buffer<cl_uint>,
}

/// One OpenCL GPU with a compiled search kernel. Fields drop in
/// declaration order: buffers before the queue and context.
pub struct OpenClDevice {
    buffers: Option<ClBuffers>,
    kernel: Kernel,
    _program: Program,
    queue: CommandQueue,
    context: Context,
    name: String,
    geometry: DispatchGeometry,
}

impl OpenClDevice {
    pub fn new(
        device_index: usize,
        kernel_source: &str,
        entry_point: &str,
        geometry: DispatchGeometry,
    ) -> Result<Self> {
        let device_ids = get_all_devices(CL_DEVICE_TYPE_GPU)
            .map_err(|e| MinerError::GpuUnavailable(e.to_string()))?;
        let Some(&device_id) = device_ids.get(device_index) else {
            return Err(MinerError::GpuUnavailable(format!(
                "no OpenCL GPU at index {} ({} found)",
                device_index,
                device_ids.len()
            )));
        };

        let device = Device::new(device_id);
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        info!("Using OpenCL device: {}", name);

        let context = Context::from_device(&device).map_err(|e| init_error("context", e))?;
        let queue = CommandQueue::create_default_with_properties(&context, 0, 0)
            .map_err(|e| init_error("command queue", e))?;

        debug!("Compiling OpenCL kernel {}", entry_point);
        let program = Program::create_and_build_from_source(&context, kernel_source, "")
            .map_err(|e| init_error("kernel build", e))?;
        let kernel =
            Kernel::create(&program, entry_point).map_err(|e| init_error("kernel create", e))?;

        Ok(Self {
            buffers: None,
            kernel,
            _program: program,
            queue,
            context,
            name,
            geometry,
        })
    }

    fn create_buffer(&self, flags: u64, len: usize) -> Result<Buffer<cl_uint>> {
        unsafe { Buffer::<cl_uint>::create(&self.context, flags, len, ptr::null_mut()) }
            .map_err(|e| init_error("buffer", e))
    }
}

impl ComputeDevice for OpenClDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn geometry(&self) -> DispatchGeometry {
        self.geometry
    }

    fn allocate(&mut self, constants: &KernelConstants) -> Result<()> {
        let mut constants_buf = self.create_buffer(CL_MEM_READ_ONLY, CONSTANTS_WORDS)?;
        let params = self.create_buffer(CL_MEM_READ_ONLY, PARAMS_WORDS)?;
        let results = self.create_buffer(CL_MEM_READ_WRITE, RESULT_WORDS)?;
        let staging = self.create_buffer(CL_MEM_READ_WRITE | CL_MEM_ALLOC_HOST_PTR, RESULT_WORDS)?;

        let words = constants.to_words();
        unsafe {
            self.queue
                .enqueue_write_buffer(&mut constants_buf, CL_BLOCKING, 0, &words, &[])
                .map_err(|e| init_error("constants upload", e))?;
        }

        self.buffers = Some(ClBuffers {
            constants: constants_buf,
            params,
            results,
            staging,
        });
        Ok(())
    }

    fn seed_results(&mut self, words: &[u32; RESULT_WORDS]) -> Result<()> {
        let queue = &self.queue;
        let buffers = self
            .buffers
            .as_mut()
            .ok_or_else(|| MinerError::DispatchFailed("buffers not allocated".into()))?;
        unsafe {
            queue
                .enqueue_write_buffer(&mut buffers.results, CL_BLOCKING, 0, words, &[])
                .map_err(|e| dispatch_error("seed results", e))?;
        }
        Ok(())
    }

    fn write_params(&mut self, params: &DispatchParams) -> Result<()> {
        let words = params.to_words();
        let queue = &self.queue;
        let buffers = self
            .buffers
            .as_mut()
            .ok_or_else(|| MinerError::DispatchFailed("buffers not allocated".into()))?;
        // Blocking write: visible to the device before the dispatch is queued.
        unsafe {
            queue
                .enqueue_write_buffer(&mut buffers.params, CL_BLOCKING, 0, &words, &[])
                .map_err(|e| dispatch_error("params upload", e))?;
        }
        Ok(())
    }

    fn dispatch(&mut self) -> Result<()> {
        let geometry = self.geometry;
        let global = [
            geometry.workgroup_size as usize * geometry.dispatch_x as usize,
            geometry.dispatch_y as usize,
        ];
        let local = [geometry.workgroup_size as usize, 1];

        let queue = &self.queue;
        let kernel = &self.kernel;
        let Some(buffers) = self.buffers.as_mut() else {
            return Err(MinerError::DispatchFailed("buffers not allocated".into()));
        };

        unsafe {
            ExecuteKernel::new(kernel)
                .set_arg(&buffers.constants)
                .set_arg(&buffers.params)
                .set_arg(&buffers.results)
                .set_global_work_sizes(&global)
                .set_local_work_sizes(&local)
                .enqueue_nd_range(queue)
                .map_err(|e| dispatch_error("kernel enqueue", e))?;

            queue
                .enqueue_copy_buffer(
                    &buffers.results,
                    &mut buffers.staging,
                    0,
                    0,
                    RESULT_BYTES,
                    &[],
                )
                .map_err(|e| dispatch_error("result copy", e))?;
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.queue
            .finish()
            .map_err(|e| dispatch_error("queue finish", e))
    }

    fn read_results(&mut self) -> Result<Vec<u8>> {
        let queue = &self.queue;
        let buffers = self
            .buffers
            .as_ref()
            .ok_or_else(|| MinerError::DispatchFailed("buffers not allocated".into()))?;
        let mut out = [0 as cl_uint; RESULT_WORDS];
        unsafe {
            queue
                .enqueue_read_buffer(&buffers.staging, CL_BLOCKING, 0, &mut out, &[])
                .map_err(|e| dispatch_error("staging read", e))?;
        }
        Ok(out.iter().flat_map(|w| w.to_le_bytes()).collect())
    }

    fn release(&mut self) {
        if let Err(e) = self.queue.finish() {
            warn!("Ignoring error while draining OpenCL queue: {}", e);
        }
        self.buffers = None;
    }
}
