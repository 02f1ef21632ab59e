//! # safe_miner
//!
//! Safe (Gnosis Safe) salt miner. Searches saltNonce values for the
//! numerically smallest CREATE2 proxy address, i.e. the address with the
//! most leading zero bytes.
//!
//! Uses the same formula as SafeProxyFactory: salt = keccak256(initializerHash || saltNonce),
//! then address = keccak256(0xff || factory || salt || proxyCodeHash)[12..32].
//!
//! The search itself runs on a [`backend::ComputeDevice`]; every candidate
//! the device reports is re-derived on the host before it is accepted.

pub mod address;
pub mod backend;
pub mod config;
pub mod crypto;
pub mod deployment;
pub mod error;
pub mod format;
pub mod nonce;
pub mod search;
pub mod session;
pub mod wallet;

pub use address::Address;
pub use config::{Command, Config, ConfigError};
pub use crypto::{AddressDeriver, Derivation, SafeSetup};
pub use deployment::DeploymentConstants;
pub use error::{MinerError, Result};
pub use nonce::SaltNonce;
pub use search::{BestResult, CandidateResult};
pub use session::{MiningOptions, MiningSession, Progress, SessionState, StopHandle};
pub use wallet::WalletConfig;
