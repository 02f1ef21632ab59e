//! Single source of truth for Safe address derivation. Seeds the kernel
//! constants and re-verifies every candidate the kernel reports.

use crate::address::Address;
use crate::crypto::create2::{safe_address, safe_salt, salt_from_nonce_bytes};
use crate::crypto::keccak256;
use crate::crypto::setup::encode_setup;
use crate::deployment::DeploymentConstants;
use crate::nonce::SaltNonce;
use crate::wallet::WalletConfig;

/// Everything derived for one (config, nonce) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivation {
    pub initializer: Vec<u8>,
    pub initializer_hash: [u8; 32],
    pub salt: [u8; 32],
    pub address: Address,
}

/// Pure derivation functions bound to one set of deployment constants.
/// Holds no mutable state; safe to share across threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressDeriver {
    constants: DeploymentConstants,
}

impl AddressDeriver {
    pub fn new(constants: DeploymentConstants) -> Self {
        Self { constants }
    }

    pub fn constants(&self) -> &DeploymentConstants {
        &self.constants
    }

    /// Safe `setup` calldata for `config`.
    pub fn encode_setup_payload(&self, config: &WalletConfig) -> Vec<u8> {
        encode_setup(config, &self.constants.fallback_handler)
    }

    /// keccak256(initializer_hash || be256(nonce)).
    pub fn compute_salt(&self, initializer_hash: &[u8; 32], nonce: &SaltNonce) -> [u8; 32] {
        safe_salt(initializer_hash, nonce)
    }

    /// CREATE2 address of the proxy for `salt`.
    pub fn compute_address(&self, salt: &[u8; 32]) -> Address {
        safe_address(&self.constants.factory, &self.constants.proxy_code_hash, salt)
    }

    pub fn derive(&self, config: &WalletConfig, nonce: &SaltNonce) -> Derivation {
        let initializer = self.encode_setup_payload(config);
        let initializer_hash = keccak256(&initializer);
        let salt = self.compute_salt(&initializer_hash, nonce);
        let address = self.compute_address(&salt);
        Derivation {
            initializer,
            initializer_hash,
            salt,
            address,
        }
    }

    /// Encodes and hashes the initializer once so per-nonce derivations
    /// only pay for the two salt/address hashes.
    pub fn prepare(&self, config: &WalletConfig) -> SafeSetup {
        let initializer = self.encode_setup_payload(config);
        let initializer_hash = keccak256(&initializer);
        SafeSetup {
            deriver: *self,
            config: config.clone(),
            initializer,
            initializer_hash,
        }
    }
}

/// A wallet config with its initializer already derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeSetup {
    deriver: AddressDeriver,
    config: WalletConfig,
    initializer: Vec<u8>,
    initializer_hash: [u8; 32],
}

impl SafeSetup {
    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    pub fn initializer(&self) -> &[u8] {
        &self.initializer
    }

    pub fn initializer_hash(&self) -> &[u8; 32] {
        &self.initializer_hash
    }

    pub fn address_for(&self, nonce: &SaltNonce) -> Address {
        let salt = self.deriver.compute_salt(&self.initializer_hash, nonce);
        self.deriver.compute_address(&salt)
    }

    /// Hot-path variant for 64-bit nonces.
    #[inline]
    pub fn address_for_u64(&self, nonce: u64) -> Address {
        let mut packed = [0u8; 32];
        packed[24..].copy_from_slice(&nonce.to_be_bytes());
        let salt = salt_from_nonce_bytes(&self.initializer_hash, &packed);
        self.deriver.compute_address(&salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OWNER: &str = "0xB5856d4598c919834913b8656ebc15a64d3C7836";

    fn single_owner() -> WalletConfig {
        WalletConfig::parse(OWNER, 1).unwrap()
    }

    #[test]
    fn test_known_single_owner_vectors() {
        let deriver = AddressDeriver::default();
        let config = single_owner();

        let small = deriver.derive(&config, &"115982355759".parse().unwrap());
        assert_eq!(
            hex::encode(small.initializer_hash),
            "ab5dc6f04dbdcc2e05908ab61ab3ae36f1631a859480d27a62fcc3f7235a794e"
        );
        assert_eq!(
            hex::encode(small.salt),
            "f33eccd2ecdb36453f85d91116de62539857b850829d1c8a40d6b288f6955827"
        );
        assert_eq!(
            small.address.to_checksum(),
            "0xC12ec2734a7Cce6997daBcBB38A11ecE9ed25337"
        );

        let zero = deriver.derive(&config, &SaltNonce::ZERO);
        assert_eq!(
            hex::encode(zero.salt),
            "0f865a4fccb7bec81763f47775b52bc0517a8035dec0b4740f9dd87753180b18"
        );
        assert_eq!(
            zero.address.to_checksum(),
            "0x695D839B3fcebB0CBf43604cBc2E72a6bF658b08"
        );
        assert_ne!(small.address, zero.address);
        assert_eq!(small.initializer, zero.initializer);
    }

    #[test]
    fn test_known_multisig_vector() {
        let config = WalletConfig::parse(
            "0xB5856d4598c919834913b8656ebc15a64d3C7836,\
             0x1234567890123456789012345678901234567890,\
             0xabcdefabcdefabcdefabcdefabcdefabcdefabcd",
            2,
        )
        .unwrap();
        let d = AddressDeriver::default().derive(&config, &SaltNonce::from(42));
        assert_eq!(
            hex::encode(d.initializer_hash),
            "25071f368494a628b4578a8e7f69e81f5a9707026a6c540df11fad47606937b3"
        );
        assert_eq!(
            d.address.to_hex_prefixed(),
            "0xf306756807de048bf9b96d23c24756b493db9086"
        );
    }

    #[test]
    fn test_derive_is_deterministic() {
        let deriver = AddressDeriver::default();
        let config = single_owner();
        for nonce in [0u64, 1, 42, u64::MAX] {
            let nonce = SaltNonce::from(nonce);
            assert_eq!(deriver.derive(&config, &nonce), deriver.derive(&config, &nonce));
        }
    }

    #[test]
    fn test_prepared_setup_matches_full_derivation() {
        let deriver = AddressDeriver::default();
        let config = single_owner();
        let setup = deriver.prepare(&config);
        for n in [0u64, 7, 115_982_355_759, u64::MAX] {
            let full = deriver.derive(&config, &SaltNonce::from(n));
            assert_eq!(setup.address_for(&SaltNonce::from(n)), full.address);
            assert_eq!(setup.address_for_u64(n), full.address);
            assert_eq!(setup.initializer_hash(), &full.initializer_hash);
        }
    }

    #[test]
    fn test_concurrent_derivation() {
        let deriver = AddressDeriver::default();
        let config = single_owner();
        let expected = deriver.derive(&config, &SaltNonce::from(99)).address;
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let config = config.clone();
                std::thread::spawn(move || deriver.derive(&config, &SaltNonce::from(99)).address)
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), expected);
        }
    }
}
