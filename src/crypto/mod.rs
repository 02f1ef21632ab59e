//! Safe proxy address derivation.
//!
//! - initializer = abi-encoded `setup(owners, threshold, ...)` calldata
//! - salt = keccak256(keccak256(initializer) || saltNonce)  [64 bytes -> 32 bytes]
//! - address = keccak256(0xff || factory || salt || proxyCodeHash)[12..32]  [85 bytes -> 20 bytes]

pub mod create2;
pub mod derive;
pub mod setup;

pub use create2::{create2_address, safe_address, safe_salt};
pub use derive::{AddressDeriver, Derivation, SafeSetup};
pub use setup::{encode_setup, SETUP_SELECTOR};
use tiny_keccak::{Hasher, Keccak};

/// Keccak-256 of arbitrary bytes (output 32 bytes).
pub fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(input);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}
