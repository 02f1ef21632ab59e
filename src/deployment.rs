//! Deployment-contract constants the derivation depends on.
//!
//! These come from the Safe deployment registry for the target network and
//! are plain configuration here. The defaults are the Safe v1.3.0 contracts,
//! deployed at identical addresses on every supported chain.

use crate::address::Address;

/// SafeProxyFactory v1.3.0.
pub const DEFAULT_PROXY_FACTORY: [u8; 20] = [
    0xa6, 0xb7, 0x1e, 0x26, 0xc5, 0xe0, 0x84, 0x5f, 0x74, 0xc8, 0x12, 0x10, 0x2c, 0xa7, 0x11, 0x4b,
    0x6a, 0x89, 0x6a, 0xb2,
];

/// keccak256(proxyCreationCode ++ abi.encode(GnosisSafeL2 singleton
/// 0x3E5c63644E683549055b9Be8653de26E0B4CD36E)).
pub const DEFAULT_PROXY_CODE_HASH: [u8; 32] = [
    0xca, 0xf2, 0xdc, 0x2f, 0x91, 0xb8, 0x04, 0xb2, 0xfc, 0xf1, 0xed, 0x3a, 0x96, 0x5a, 0x1f, 0xf4,
    0x40, 0x4b, 0x84, 0x0b, 0x80, 0xc1, 0x24, 0x27, 0x7b, 0x00, 0xa4, 0x3b, 0x46, 0x34, 0xb2, 0xce,
];

/// CompatibilityFallbackHandler v1.3.0.
pub const DEFAULT_FALLBACK_HANDLER: [u8; 20] = [
    0xf4, 0x8f, 0x2b, 0x2d, 0x2a, 0x53, 0x4e, 0x40, 0x24, 0x87, 0xb3, 0xee, 0x7c, 0x18, 0xc3, 0x3a,
    0xec, 0x0f, 0xe5, 0xe4,
];

/// Factory, proxy code hash, and the fallback handler baked into `setup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentConstants {
    pub factory: Address,
    pub proxy_code_hash: [u8; 32],
    pub fallback_handler: Address,
}

impl Default for DeploymentConstants {
    fn default() -> Self {
        Self {
            factory: Address::from_bytes(DEFAULT_PROXY_FACTORY),
            proxy_code_hash: DEFAULT_PROXY_CODE_HASH,
            fallback_handler: Address::from_bytes(DEFAULT_FALLBACK_HANDLER),
        }
    }
}
