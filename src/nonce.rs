//! Salt nonce: the 256-bit value the miner searches over.

use std::fmt;
use std::str::FromStr;

use primitive_types::U256;

use crate::error::MinerError;

/// Non-negative integer below 2^256, passed as `saltNonce` to
/// `createProxyWithNonce`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SaltNonce(U256);

impl SaltNonce {
    pub const ZERO: SaltNonce = SaltNonce(U256([0; 4]));

    pub fn new(value: U256) -> Self {
        Self(value)
    }

    /// Rebuilds the nonce reported by the kernel: `high * 2^32 + low`.
    pub fn from_words(low: u32, high: u32) -> Self {
        Self::from(((high as u64) << 32) | low as u64)
    }

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(U256::from_big_endian(&bytes))
    }

    /// Big-endian 32-byte encoding, as packed into the salt preimage.
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.0.to_big_endian(&mut out);
        out
    }

    pub fn value(&self) -> U256 {
        self.0
    }

    /// Lowercase hex with 0x prefix and no leading zeros.
    pub fn to_hex(&self) -> String {
        format!("0x{:x}", self.0)
    }

    /// Decimal string (for Safe SDK `saltNonce`).
    pub fn to_decimal(&self) -> String {
        self.0.to_string()
    }
}

impl From<u64> for SaltNonce {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl FromStr for SaltNonce {
    type Err = MinerError;

    /// Accepts decimal text or `0x`-prefixed hex text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return parse_hex(digits).ok_or_else(|| MinerError::InvalidNonce(s.to_string()));
        }

        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(MinerError::InvalidNonce(s.to_string()));
        }
        U256::from_dec_str(s)
            .map(Self)
            .map_err(|_| MinerError::InvalidNonce(format!("{} does not fit in 256 bits", s)))
    }
}

fn parse_hex(digits: &str) -> Option<SaltNonce> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let significant = digits.trim_start_matches('0');
    if significant.len() > 64 {
        return None;
    }
    let padded = format!("{:0>64}", significant);
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(padded, &mut bytes).ok()?;
    Some(SaltNonce::from_be_bytes(bytes))
}

impl fmt::Display for SaltNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SaltNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SaltNonce({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_and_hex_agree() {
        let dec: SaltNonce = "115982355759".parse().unwrap();
        let hex: SaltNonce = "0x1b01164d2f".parse().unwrap();
        assert_eq!(dec, hex);
        assert_eq!(dec, SaltNonce::from(115_982_355_759));
        assert_eq!(dec.to_hex(), "0x1b01164d2f");
        assert_eq!(dec.to_decimal(), "115982355759");
    }

    #[test]
    fn test_be_bytes() {
        let n = SaltNonce::from(0x1b01164d2f);
        let bytes = n.to_be_bytes();
        assert_eq!(&bytes[..27], &[0u8; 27]);
        assert_eq!(&bytes[27..], &[0x1b, 0x01, 0x16, 0x4d, 0x2f]);
        assert_eq!(SaltNonce::from_be_bytes(bytes), n);
    }

    #[test]
    fn test_from_words() {
        assert_eq!(SaltNonce::from_words(0x01164d2f, 0x1b), SaltNonce::from(0x1b01164d2f));
        assert_eq!(SaltNonce::from_words(u32::MAX, u32::MAX), SaltNonce::from(u64::MAX));
    }

    #[test]
    fn test_bounds() {
        let max = format!("0x{}", "f".repeat(64));
        assert_eq!(max.parse::<SaltNonce>().unwrap().to_be_bytes(), [0xff; 32]);
        assert!(format!("0x1{}", "0".repeat(64)).parse::<SaltNonce>().is_err());
        // 2^256
        assert!(
            "115792089237316195423570985008687907853269984665640564039457584007913129639936"
                .parse::<SaltNonce>()
                .is_err()
        );
        assert!("".parse::<SaltNonce>().is_err());
        assert!("0x".parse::<SaltNonce>().is_err());
        assert!("-1".parse::<SaltNonce>().is_err());
        assert!("12ab".parse::<SaltNonce>().is_err());
    }
}
