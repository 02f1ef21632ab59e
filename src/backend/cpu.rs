//! Reference kernel executed on CPU threads.
//!
//! Implements the same buffer contract as the GPU kernel so the whole engine
//! runs (and is tested) without a GPU. Thread `g` of iteration `i` evaluates
//! nonce `i * items_per_dispatch + g`. Work is deferred until the queue is
//! drained, like a real command queue.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::address::Address;
use crate::crypto::create2::{create2_address, salt_from_nonce_bytes};
use crate::error::{MinerError, Result};

use super::{
    ComputeDevice, DeviceProvider, DispatchGeometry, DispatchParams, KernelConstants,
    FOUND_WORD, PARAMS_WORDS, RESULT_WORDS,
};

/// Hands out [`CpuDevice`]s backed by a dedicated rayon pool.
#[derive(Debug, Clone)]
pub struct CpuProvider {
    threads: usize,
    geometry: DispatchGeometry,
}

impl CpuProvider {
    pub fn new(threads: usize, geometry: DispatchGeometry) -> Self {
        Self { threads, geometry }
    }
}

impl Default for CpuProvider {
    fn default() -> Self {
        Self::new(num_cpus::get(), DispatchGeometry::CPU_DEFAULT)
    }
}

impl DeviceProvider for CpuProvider {
    fn acquire(&self) -> Result<Box<dyn ComputeDevice>> {
        let device = CpuDevice::new(self.threads, self.geometry)?;
        Ok(Box::new(device))
    }
}

/// Host-memory "device": buffers are plain arrays, dispatches run on the
/// pool when the queue is drained.
pub struct CpuDevice {
    name: String,
    geometry: DispatchGeometry,
    pool: ThreadPool,
    constants: Option<KernelConstants>,
    params: [u32; PARAMS_WORDS],
    results: [u32; RESULT_WORDS],
    staging: [u32; RESULT_WORDS],
    /// Iteration index captured at dispatch time, not yet executed.
    pending: Option<u32>,
}

impl CpuDevice {
    pub fn new(threads: usize, geometry: DispatchGeometry) -> Result<Self> {
        let threads = threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("safe-miner-cpu-{}", i))
            .build()
            .map_err(|e| MinerError::GpuUnavailable(e.to_string()))?;

        Ok(Self {
            name: format!("CPU reference kernel ({} threads)", threads),
            geometry,
            pool,
            constants: None,
            params: [0; PARAMS_WORDS],
            results: [0; RESULT_WORDS],
            staging: [0; RESULT_WORDS],
            pending: None,
        })
    }

    fn constants(&self) -> Result<&KernelConstants> {
        self.constants
            .as_ref()
            .ok_or_else(|| MinerError::DispatchFailed("buffers not allocated".into()))
    }

    /// Runs the queued dispatch, then the result -> staging copy.
    fn drain(&mut self) -> Result<()> {
        let Some(iteration) = self.pending.take() else {
            return Ok(());
        };
        let constants = *self.constants()?;
        let items = self.geometry.items_per_dispatch();
        let base = iteration as u64 * items;

        let best = self.pool.install(|| {
            (0..items)
                .into_par_iter()
                .map(|gid| {
                    let nonce = base + gid;
                    (evaluate(&constants, nonce), nonce)
                })
                .min()
        });

        if let Some((address, nonce)) = best {
            let stored_words: [u32; 5] = [
                self.results[2],
                self.results[3],
                self.results[4],
                self.results[5],
                self.results[6],
            ];
            if address < Address::from_le_words(stored_words) {
                self.results[0] = nonce as u32;
                self.results[1] = (nonce >> 32) as u32;
                self.results[2..7].copy_from_slice(&address.to_le_words());
                self.results[FOUND_WORD] = 1;
            }
        }

        self.staging = self.results;
        Ok(())
    }
}

/// One kernel thread: the Safe address for a 64-bit nonce.
#[inline]
fn evaluate(constants: &KernelConstants, nonce: u64) -> Address {
    let mut packed = [0u8; 32];
    packed[24..].copy_from_slice(&nonce.to_be_bytes());
    let salt = salt_from_nonce_bytes(&constants.initializer_hash, &packed);
    create2_address(&constants.factory, &salt, &constants.proxy_code_hash)
}

impl ComputeDevice for CpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn geometry(&self) -> DispatchGeometry {
        self.geometry
    }

    fn allocate(&mut self, constants: &KernelConstants) -> Result<()> {
        if self.geometry.items_per_dispatch() == 0 {
            return Err(MinerError::GpuInitError("empty dispatch geometry".into()));
        }
        self.constants = Some(*constants);
        self.params = [0; PARAMS_WORDS];
        self.results = [0; RESULT_WORDS];
        self.staging = [0; RESULT_WORDS];
        self.pending = None;
        Ok(())
    }

    fn seed_results(&mut self, words: &[u32; RESULT_WORDS]) -> Result<()> {
        self.drain()?;
        self.results = *words;
        Ok(())
    }

    fn write_params(&mut self, params: &DispatchParams) -> Result<()> {
        // In-order queue: a write lands after earlier dispatches.
        self.drain()?;
        self.params = params.to_words();
        Ok(())
    }

    fn dispatch(&mut self) -> Result<()> {
        self.constants()?;
        self.drain()?;
        self.pending = Some(self.params[0]);
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.drain()
    }

    fn read_results(&mut self) -> Result<Vec<u8>> {
        self.drain()?;
        Ok(self.staging.iter().flat_map(|w| w.to_le_bytes()).collect())
    }

    fn release(&mut self) {
        self.pending = None;
        self.constants = None;
    }
}
