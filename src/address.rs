//! 20-byte account/contract address.
//!
//! Addresses order as unsigned 160-bit big-endian integers, so the derived
//! `Ord` on the byte array is the vanity ordering: smaller is better.

use std::fmt;
use std::str::FromStr;

use crate::crypto::keccak256;
use crate::error::MinerError;

/// A 20-byte address (owner, factory, or derived Safe proxy).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The all-zero address used for unused `setup` parameters.
    pub const ZERO: Address = Address([0u8; 20]);

    /// The numerically largest address; worst possible vanity result.
    pub const MAX: Address = Address([0xffu8; 20]);

    #[inline]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Rebuilds an address from the kernel's packing: five u32 words, each
    /// holding four address bytes in little-endian order.
    pub fn from_le_words(words: [u32; 5]) -> Self {
        let mut bytes = [0u8; 20];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Self(bytes)
    }

    /// Inverse of [`Address::from_le_words`].
    pub fn to_le_words(&self) -> [u32; 5] {
        let mut words = [0u32; 5];
        for (word, chunk) in words.iter_mut().zip(self.0.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words
    }

    /// Lowercase hex (no 0x).
    #[inline]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// With 0x prefix.
    pub fn to_hex_prefixed(&self) -> String {
        format!("0x{}", self.to_hex())
    }

    /// EIP-55 checksum encoding.
    pub fn to_checksum(&self) -> String {
        let hex_addr = self.to_hex();
        let hash = keccak256(hex_addr.as_bytes());

        let mut checksum = String::with_capacity(42);
        checksum.push_str("0x");
        for (i, c) in hex_addr.chars().enumerate() {
            let hash_nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if c.is_ascii_alphabetic() && hash_nibble >= 8 {
                checksum.push(c.to_ascii_uppercase());
            } else {
                checksum.push(c);
            }
        }
        checksum
    }

    /// Number of leading zero hex characters. Display metric only; use
    /// `Ord` to compare candidates.
    pub fn leading_zero_nibbles(&self) -> u32 {
        let mut count = 0;
        for &byte in &self.0 {
            if byte == 0 {
                count += 2;
                continue;
            }
            if byte >> 4 == 0 {
                count += 1;
            }
            break;
        }
        count
    }

    /// Number of leading zero bytes.
    pub fn leading_zero_bytes(&self) -> u32 {
        self.0.iter().take_while(|&&b| b == 0).count() as u32
    }
}

impl FromStr for Address {
    type Err = MinerError;

    /// Parses 40 hex characters with an optional `0x` prefix. Mixed-case
    /// input must carry a valid EIP-55 checksum.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MinerError::ConfigInvalid(format!("Invalid address: {}", s)));
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| MinerError::ConfigInvalid(format!("Invalid address {}: {}", s, e)))?;
        let address = Self(bytes);

        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *digits {
            return Err(MinerError::ConfigInvalid(format!(
                "Invalid address checksum: {}",
                s
            )));
        }

        Ok(address)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(hex_str: &str) -> Address {
        hex_str.parse().unwrap()
    }

    #[test]
    fn test_checksum_address() {
        // Test vector from EIP-55
        let a = addr("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed");
        assert_eq!(a.to_checksum(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        assert!("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
            .parse::<Address>()
            .is_ok());
        assert!("0x5AAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
            .parse::<Address>()
            .is_err());
        assert!("0x5aaeb6053f3e94c9b9a09f33669435e7ef1bea".parse::<Address>().is_err());
        assert!("0xzzaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse::<Address>().is_err());
    }

    #[test]
    fn test_numeric_order() {
        let small = addr("0x00000000000000000000000000000000000000ff");
        let big = addr("0x0000000000000000000000000000000000000100");
        assert!(small < big);
        assert!(big < Address::MAX);
        assert!(Address::ZERO < small);
    }

    #[test]
    fn test_leading_zeros() {
        assert_eq!(addr("0x000abc0000000000000000000000000000000000").leading_zero_nibbles(), 3);
        assert_eq!(addr("0x000abc0000000000000000000000000000000000").leading_zero_bytes(), 1);
        assert_eq!(addr("0xf000000000000000000000000000000000000000").leading_zero_nibbles(), 0);
        assert_eq!(Address::ZERO.leading_zero_nibbles(), 40);
        assert_eq!(Address::ZERO.leading_zero_bytes(), 20);
    }

    #[test]
    fn test_word_packing() {
        let a = addr("0x0102030405060708090a0b0c0d0e0f1011121314");
        let words = a.to_le_words();
        assert_eq!(words[0], 0x0403_0201);
        assert_eq!(words[4], 0x1413_1211);
        assert_eq!(Address::from_le_words(words), a);
        assert_eq!(Address::from_le_words([u32::MAX; 5]), Address::MAX);
    }
}
