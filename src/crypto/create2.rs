//! CREATE2 address computation.
//!
//! Matches SafeProxyFactory.createProxyWithNonce:
//!   salt = keccak256(abi.encodePacked(keccak256(initializer), saltNonce))
//!   address = CREATE2(factory, salt, keccak256(deploymentData))[12:32]

use crate::address::Address;
use crate::crypto::keccak256;
use crate::nonce::SaltNonce;

/// Computes the CREATE2 salt used by Safe: keccak256(initializer_hash || salt_nonce).
pub fn safe_salt(initializer_hash: &[u8; 32], salt_nonce: &SaltNonce) -> [u8; 32] {
    salt_from_nonce_bytes(initializer_hash, &salt_nonce.to_be_bytes())
}

/// Same as [`safe_salt`] for a nonce already laid out as 32 big-endian bytes.
#[inline]
pub fn salt_from_nonce_bytes(initializer_hash: &[u8; 32], nonce_be: &[u8; 32]) -> [u8; 32] {
    let mut preimage = [0u8; 64];
    preimage[0..32].copy_from_slice(initializer_hash);
    preimage[32..64].copy_from_slice(nonce_be);
    keccak256(&preimage)
}

/// Generic CREATE2 address.
/// Preimage: 0xff (1) || deployer (20) || salt (32) || init_code_hash (32) = 85 bytes.
/// Address = keccak256(preimage)[12..32].
#[inline]
pub fn create2_address(deployer: &Address, salt: &[u8; 32], init_code_hash: &[u8; 32]) -> Address {
    let mut preimage = [0u8; 85];
    preimage[0] = 0xff;
    preimage[1..21].copy_from_slice(deployer.as_bytes());
    preimage[21..53].copy_from_slice(salt);
    preimage[53..85].copy_from_slice(init_code_hash);

    let hash = keccak256(&preimage);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..32]);
    Address::from_bytes(addr)
}

/// Computes the Safe proxy address deployed by `factory` for `salt`.
pub fn safe_address(factory: &Address, proxy_code_hash: &[u8; 32], salt: &[u8; 32]) -> Address {
    create2_address(factory, salt, proxy_code_hash)
}
