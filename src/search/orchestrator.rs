//! One session's device resources and the per-iteration dispatch protocol.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};

use crate::address::Address;
use crate::backend::{
    ComputeDevice, DeviceProvider, DispatchGeometry, DispatchParams, KernelConstants,
    FOUND_WORD, RESULT_BYTES, RESULT_SENTINEL,
};
use crate::crypto::SafeSetup;
use crate::error::{MinerError, Result};
use crate::nonce::SaltNonce;

/// Result buffer contents as reported by the kernel. Unverified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCandidate {
    pub found: bool,
    pub nonce_low: u32,
    pub nonce_high: u32,
    pub address_words: [u32; 5],
}

impl RawCandidate {
    /// Decodes the 32-byte staging buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RESULT_BYTES {
            return Err(MinerError::DecodeError(format!(
                "expected {} bytes, got {}",
                RESULT_BYTES,
                bytes.len()
            )));
        }
        let mut words = [0u32; 8];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let found = match words[FOUND_WORD] {
            0 => false,
            1 => true,
            other => {
                return Err(MinerError::DecodeError(format!(
                    "found flag must be 0 or 1, got {}",
                    other
                )))
            }
        };
        Ok(Self {
            found,
            nonce_low: words[0],
            nonce_high: words[1],
            address_words: [words[2], words[3], words[4], words[5], words[6]],
        })
    }

    pub fn nonce(&self) -> SaltNonce {
        SaltNonce::from_words(self.nonce_low, self.nonce_high)
    }

    /// The address the kernel claims; may belong to a different nonce.
    pub fn reported_address(&self) -> Address {
        Address::from_le_words(self.address_words)
    }
}

/// Outcome of one `run_once` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed(RawCandidate),
    /// The cancel flag was seen before the results were read.
    Cancelled,
}

/// A device with allocated, seeded buffers, exclusively owned by one
/// session. Buffers are released on drop.
pub struct SearchResources {
    device: Box<dyn ComputeDevice>,
    geometry: DispatchGeometry,
}

impl SearchResources {
    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    pub fn geometry(&self) -> DispatchGeometry {
        self.geometry
    }

    pub fn items_per_dispatch(&self) -> u64 {
        self.geometry.items_per_dispatch()
    }
}

impl Drop for SearchResources {
    fn drop(&mut self) {
        debug!("Releasing buffers on {}", self.device.name());
        self.device.release();
    }
}

/// Prepares device resources and drives single dispatch iterations.
pub struct SearchOrchestrator;

impl SearchOrchestrator {
    /// Acquires a device, uploads the constants for `setup`, and seeds the
    /// result buffer with the "nothing found" sentinel.
    pub fn prepare(provider: &dyn DeviceProvider, setup: &SafeSetup) -> Result<SearchResources> {
        let device = provider.acquire()?;
        let geometry = device.geometry();

        // From here on a failure still releases through Drop.
        let mut resources = SearchResources { device, geometry };
        resources
            .device
            .allocate(&KernelConstants::from_setup(setup))?;
        resources
            .device
            .seed_results(&RESULT_SENTINEL)
            .map_err(|e| MinerError::GpuInitError(e.to_string()))?;

        info!(
            "Prepared {} with geometry {}",
            resources.device.name(),
            geometry
        );
        Ok(resources)
    }

    /// Writes `iteration` to the params buffer, dispatches one batch and
    /// reads back the result buffer. `cancel` is checked before the
    /// dispatch and again before each blocking device wait.
    pub fn run_once(
        resources: &mut SearchResources,
        iteration: u32,
        cancel: &AtomicBool,
    ) -> Result<IterationOutcome> {
        if cancel.load(Ordering::Acquire) {
            return Ok(IterationOutcome::Cancelled);
        }

        let device = &mut resources.device;
        device.write_params(&DispatchParams { iteration })?;
        device.dispatch()?;

        if cancel.load(Ordering::Acquire) {
            return Ok(IterationOutcome::Cancelled);
        }
        device.wait_idle()?;

        if cancel.load(Ordering::Acquire) {
            return Ok(IterationOutcome::Cancelled);
        }
        let bytes = device.read_results()?;
        let raw = RawCandidate::decode(&bytes)?;
        Ok(IterationOutcome::Completed(raw))
    }
}
