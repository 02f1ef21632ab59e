//! Error taxonomy shared by the deriver, the backends, and the mining session.

/// Errors surfaced by the mining engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MinerError {
    #[error("Invalid wallet config: {0}")]
    ConfigInvalid(String),

    #[error("Invalid salt nonce: {0}")]
    InvalidNonce(String),

    #[error("No compute-capable device available: {0}")]
    GpuUnavailable(String),

    #[error("GPU initialization failed: {0}")]
    GpuInitError(String),

    #[error("Device lost: {0}")]
    DeviceLost(String),

    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Malformed result buffer: {0}")]
    DecodeError(String),

    #[error("Cannot {op} while session is {state}")]
    InvalidState { op: &'static str, state: &'static str },
}

impl MinerError {
    /// True for errors that are expected when a stop races with an
    /// in-flight dispatch.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, MinerError::DeviceLost(_))
    }
}

pub type Result<T> = std::result::Result<T, MinerError>;
