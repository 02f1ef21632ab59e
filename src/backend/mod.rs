//! Compute backends executing the salt-search kernel.
//!
//! The kernel itself is an external unit with a fixed buffer contract:
//!
//! - constants (read-only, 24 x u32): initializer hash (8 words),
//!   factory address (5 words), proxy code hash (8 words), 3 words padding.
//!   Each word holds four bytes of the value in little-endian order.
//! - params (uniform, 4 x u32): iteration index, 3 reserved words.
//! - results (read-write, 8 x u32): nonce low, nonce high, address
//!   (5 words), found flag.
//!
//! Each dispatch covers `items_per_dispatch` nonces, disjoint per iteration
//! index. The kernel keeps the smallest address it has seen in the result
//! buffer, but nonce and address words are written by independent threads
//! without a combined atomic commit: consumers must re-derive the address.

use std::fmt;
use std::str::FromStr;

use crate::address::Address;
use crate::crypto::SafeSetup;
use crate::error::Result;

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod opencl;

pub use cpu::{CpuDevice, CpuProvider};
#[cfg(feature = "gpu")]
pub use opencl::{list_devices, OpenClDevice, OpenClProvider};

pub const CONSTANTS_WORDS: usize = 24;
pub const PARAMS_WORDS: usize = 4;
pub const RESULT_WORDS: usize = 8;
pub const RESULT_BYTES: usize = RESULT_WORDS * 4;

/// Index of the found flag in the result buffer.
pub const FOUND_WORD: usize = 7;

/// "No candidate found, worst possible address" written to the result
/// buffer before the first dispatch.
pub const RESULT_SENTINEL: [u32; RESULT_WORDS] = [
    u32::MAX,
    u32::MAX,
    u32::MAX,
    u32::MAX,
    u32::MAX,
    u32::MAX,
    u32::MAX,
    0,
];

/// Launch shape of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGeometry {
    pub workgroup_size: u32,
    pub dispatch_x: u32,
    pub dispatch_y: u32,
}

impl DispatchGeometry {
    /// Roughly 67M hashes per dispatch; keeps a discrete GPU busy for tens
    /// of milliseconds.
    pub const GPU_DEFAULT: DispatchGeometry = DispatchGeometry {
        workgroup_size: 64,
        dispatch_x: 65535,
        dispatch_y: 16,
    };

    pub const CPU_DEFAULT: DispatchGeometry = DispatchGeometry {
        workgroup_size: 64,
        dispatch_x: 1024,
        dispatch_y: 1,
    };

    pub fn new(workgroup_size: u32, dispatch_x: u32, dispatch_y: u32) -> Self {
        Self {
            workgroup_size,
            dispatch_x,
            dispatch_y,
        }
    }

    /// workgroup_size x dispatch_x x dispatch_y.
    pub fn items_per_dispatch(&self) -> u64 {
        self.workgroup_size as u64 * self.dispatch_x as u64 * self.dispatch_y as u64
    }
}

impl fmt::Display for DispatchGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x {} x {} ({} per dispatch)",
            self.workgroup_size,
            self.dispatch_x,
            self.dispatch_y,
            self.items_per_dispatch()
        )
    }
}

/// Read-only inputs shared by every kernel thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConstants {
    pub initializer_hash: [u8; 32],
    pub factory: Address,
    pub proxy_code_hash: [u8; 32],
}

impl KernelConstants {
    pub fn from_setup(setup: &SafeSetup) -> Self {
        let constants = setup.deriver().constants();
        Self {
            initializer_hash: *setup.initializer_hash(),
            factory: constants.factory,
            proxy_code_hash: constants.proxy_code_hash,
        }
    }

    pub fn to_bytes(&self) -> [u8; CONSTANTS_WORDS * 4] {
        let mut out = [0u8; CONSTANTS_WORDS * 4];
        out[0..32].copy_from_slice(&self.initializer_hash);
        out[32..52].copy_from_slice(self.factory.as_bytes());
        out[52..84].copy_from_slice(&self.proxy_code_hash);
        out
    }

    pub fn to_words(&self) -> [u32; CONSTANTS_WORDS] {
        let bytes = self.to_bytes();
        let mut words = [0u32; CONSTANTS_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words
    }
}

/// Per-dispatch uniform parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchParams {
    pub iteration: u32,
}

impl DispatchParams {
    pub fn to_words(&self) -> [u32; PARAMS_WORDS] {
        [self.iteration, 0, 0, 0]
    }
}

/// One acquired compute device and the buffers bound to it.
///
/// Calls are strictly sequential: `write_params`, `dispatch`, `wait_idle`,
/// `read_results`, then the next iteration. `dispatch` enqueues both the
/// compute pass and the copy of the result buffer into a host-readable
/// staging buffer.
pub trait ComputeDevice: Send {
    fn name(&self) -> &str;

    fn geometry(&self) -> DispatchGeometry;

    /// Uploads the constants and allocates params, result, and staging
    /// buffers. Fails with `GpuInitError`.
    fn allocate(&mut self, constants: &KernelConstants) -> Result<()>;

    /// Overwrites the device result buffer.
    fn seed_results(&mut self, words: &[u32; RESULT_WORDS]) -> Result<()>;

    fn write_params(&mut self, params: &DispatchParams) -> Result<()>;

    fn dispatch(&mut self) -> Result<()>;

    /// Blocks until queued compute and copy work has completed.
    fn wait_idle(&mut self) -> Result<()>;

    /// Maps the staging buffer and returns its raw bytes.
    fn read_results(&mut self) -> Result<Vec<u8>>;

    /// Releases all buffers. Waits for in-flight work and ignores errors.
    fn release(&mut self);
}

/// Source of compute devices. Fails with `GpuUnavailable` when no
/// compute-capable device can be acquired.
pub trait DeviceProvider: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn ComputeDevice>>;
}

impl<F> DeviceProvider for F
where
    F: Fn() -> Result<Box<dyn ComputeDevice>> + Send + Sync,
{
    fn acquire(&self) -> Result<Box<dyn ComputeDevice>> {
        (self)()
    }
}

/// Backend selector for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Cpu,
    OpenCl,
}

impl FromStr for BackendKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(BackendKind::Cpu),
            "opencl" | "gpu" | "cl" => Ok(BackendKind::OpenCl),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "cpu"),
            BackendKind::OpenCl => write!(f, "opencl"),
        }
    }
}
