//! Command line configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::address::Address;
use crate::backend::{BackendKind, CpuProvider, DeviceProvider, DispatchGeometry};
use crate::deployment::DeploymentConstants;
use crate::error::MinerError;
use crate::nonce::SaltNonce;
use crate::session::{EstimatorConfig, MiningOptions};
use crate::wallet::WalletConfig;

/// Safe Vanity Salt Miner
///
/// Searches saltNonce values for the numerically smallest CREATE2 address
/// of a Safe proxy with the given owners and threshold.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Mine for the smallest Safe address
    Mine(MineArgs),
    /// Derive the Safe address for one salt nonce
    Derive(DeriveArgs),
    /// Measure hashrate with a throwaway owner
    Bench(BenchArgs),
    /// List OpenCL GPU devices
    Devices,
}

#[derive(Args, Debug, Clone)]
pub struct WalletArgs {
    /// Owner addresses, separated by commas or whitespace
    #[arg(short, long)]
    pub owners: String,

    /// Number of required confirmations
    #[arg(short, long, default_value = "1")]
    pub threshold: u64,
}

impl WalletArgs {
    pub fn wallet_config(&self) -> Result<WalletConfig, ConfigError> {
        Ok(WalletConfig::parse(&self.owners, self.threshold)?)
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct DeploymentArgs {
    /// SafeProxyFactory address (default: Safe v1.3.0)
    #[arg(long)]
    pub factory: Option<String>,

    /// keccak256(proxy creation code || singleton), 32 bytes hex
    #[arg(long)]
    pub proxy_code_hash: Option<String>,

    /// Fallback handler passed to setup()
    #[arg(long)]
    pub fallback_handler: Option<String>,
}

impl DeploymentArgs {
    pub fn constants(&self) -> Result<DeploymentConstants, ConfigError> {
        let mut constants = DeploymentConstants::default();
        if let Some(factory) = &self.factory {
            constants.factory = factory.parse::<Address>()?;
        }
        if let Some(hash) = &self.proxy_code_hash {
            constants.proxy_code_hash = parse_hash(hash)?;
        }
        if let Some(handler) = &self.fallback_handler {
            constants.fallback_handler = handler.parse::<Address>()?;
        }
        Ok(constants)
    }
}

fn parse_hash(s: &str) -> Result<[u8; 32], ConfigError> {
    let h = s.strip_prefix("0x").unwrap_or(s);
    if h.len() != 64 || !h.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::InvalidConfig(
            "proxy_code_hash must be 32 bytes (64 hex chars)".into(),
        ));
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(h, &mut out)
        .map_err(|e| ConfigError::InvalidConfig(format!("proxy_code_hash: {}", e)))?;
    Ok(out)
}

#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Compute backend: cpu or opencl
    #[arg(short, long, default_value = "cpu")]
    pub backend: BackendKind,

    /// GPU index (see `devices`)
    #[arg(long, default_value = "0")]
    pub device: usize,

    /// OpenCL kernel source implementing the search contract
    #[arg(long)]
    pub kernel: Option<PathBuf>,

    /// Kernel entry point
    #[arg(long, default_value = "safe_create2_search")]
    pub entry_point: String,

    /// Threads per workgroup
    #[arg(long)]
    pub workgroup_size: Option<u32>,

    /// Workgroups along x per dispatch
    #[arg(long)]
    pub dispatch_x: Option<u32>,

    /// Workgroups along y per dispatch
    #[arg(long)]
    pub dispatch_y: Option<u32>,

    /// CPU backend threads (default: number of CPU cores)
    #[arg(short = 'w', long)]
    pub threads: Option<usize>,
}

impl BackendArgs {
    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }

    pub fn geometry(&self) -> DispatchGeometry {
        let base = match self.backend {
            BackendKind::Cpu => DispatchGeometry::CPU_DEFAULT,
            BackendKind::OpenCl => DispatchGeometry::GPU_DEFAULT,
        };
        DispatchGeometry::new(
            self.workgroup_size.unwrap_or(base.workgroup_size),
            self.dispatch_x.unwrap_or(base.dispatch_x),
            self.dispatch_y.unwrap_or(base.dispatch_y),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.geometry().items_per_dispatch() == 0 {
            return Err(ConfigError::InvalidConfig(
                "workgroup size and dispatch counts must be non-zero".into(),
            ));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::InvalidConfig("threads must be non-zero".into()));
        }
        if self.backend == BackendKind::OpenCl && self.kernel.is_none() {
            return Err(ConfigError::InvalidConfig(
                "the opencl backend needs --kernel".into(),
            ));
        }
        Ok(())
    }

    pub fn provider(&self) -> Result<Arc<dyn DeviceProvider>, ConfigError> {
        match self.backend {
            BackendKind::Cpu => Ok(Arc::new(CpuProvider::new(
                self.thread_count(),
                self.geometry(),
            ))),
            BackendKind::OpenCl => self.opencl_provider(),
        }
    }

    #[cfg(feature = "gpu")]
    fn opencl_provider(&self) -> Result<Arc<dyn DeviceProvider>, ConfigError> {
        let path = self
            .kernel
            .as_ref()
            .ok_or_else(|| ConfigError::InvalidConfig("the opencl backend needs --kernel".into()))?;
        let provider = crate::backend::OpenClProvider::from_kernel_file(
            path,
            self.device,
            self.entry_point.clone(),
            self.geometry(),
        )?;
        Ok(Arc::new(provider))
    }

    #[cfg(not(feature = "gpu"))]
    fn opencl_provider(&self) -> Result<Arc<dyn DeviceProvider>, ConfigError> {
        Err(ConfigError::InvalidConfig(
            "built without the `gpu` feature; rebuild with --features gpu".into(),
        ))
    }
}

#[derive(Args, Debug, Clone)]
pub struct MineArgs {
    #[command(flatten)]
    pub wallet: WalletArgs,

    #[command(flatten)]
    pub deployment: DeploymentArgs,

    #[command(flatten)]
    pub backend: BackendArgs,

    /// First iteration index (continue a previous search)
    #[arg(long, default_value = "0")]
    pub start_iteration: u32,

    /// Stop once the best address has this many leading zero nibbles
    #[arg(long)]
    pub stop_at: Option<u32>,

    /// Confidence level for the time estimate
    #[arg(long, default_value = "0.9")]
    pub confidence: f64,

    /// Progress report interval in seconds
    #[arg(short = 'r', long, default_value = "5")]
    pub report_interval: u64,
}

impl MineArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend.validate()?;
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(ConfigError::InvalidConfig(
                "confidence must be between 0 and 1".into(),
            ));
        }
        if matches!(self.stop_at, Some(n) if n == 0 || n > 40) {
            return Err(ConfigError::InvalidConfig(
                "stop_at must be between 1 and 40 nibbles".into(),
            ));
        }
        Ok(())
    }

    pub fn options(&self) -> MiningOptions {
        MiningOptions {
            start_iteration: self.start_iteration,
            stop_at_zero_nibbles: self.stop_at,
            estimator: EstimatorConfig {
                confidence: self.confidence,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval.max(1))
    }
}

#[derive(Args, Debug, Clone)]
pub struct DeriveArgs {
    #[command(flatten)]
    pub wallet: WalletArgs,

    #[command(flatten)]
    pub deployment: DeploymentArgs,

    /// Salt nonce, decimal or 0x-prefixed hex
    #[arg(short, long)]
    pub nonce: SaltNonce,
}

#[derive(Args, Debug, Clone)]
pub struct BenchArgs {
    #[command(flatten)]
    pub deployment: DeploymentArgs,

    #[command(flatten)]
    pub backend: BackendArgs,

    /// Run time in seconds
    #[arg(short = 'd', long, default_value = "10")]
    pub duration: u64,

    /// Stop after this many hashes instead
    #[arg(long)]
    pub hashes: Option<u64>,
}

impl Config {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.command {
            Command::Mine(args) => args.validate(),
            Command::Bench(args) => {
                args.backend.validate()?;
                if args.duration == 0 && args.hashes.is_none() {
                    return Err(ConfigError::InvalidConfig(
                        "bench needs a non-zero --duration or --hashes".into(),
                    ));
                }
                Ok(())
            }
            Command::Derive(_) | Command::Devices => Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Miner(#[from] MinerError),
}
