//! Multi-signature wallet configuration: the owners and threshold passed to
//! Safe `setup`.

use std::collections::HashSet;

use crate::address::Address;
use crate::error::{MinerError, Result};

/// Owners and signing threshold. Immutable once mining starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalletConfig {
    owners: Vec<Address>,
    threshold: u64,
}

impl WalletConfig {
    /// Validates and builds a config. Owners keep their given order, which
    /// is part of the encoded initializer.
    pub fn new(owners: Vec<Address>, threshold: u64) -> Result<Self> {
        if owners.is_empty() {
            return Err(MinerError::ConfigInvalid(
                "at least one owner address is required".into(),
            ));
        }

        let mut seen = HashSet::with_capacity(owners.len());
        for owner in &owners {
            if !seen.insert(*owner) {
                return Err(MinerError::ConfigInvalid(format!(
                    "duplicate owner address: {}",
                    owner
                )));
            }
        }

        if threshold < 1 || threshold > owners.len() as u64 {
            return Err(MinerError::ConfigInvalid(format!(
                "threshold must be between 1 and {}",
                owners.len()
            )));
        }

        Ok(Self { owners, threshold })
    }

    /// Parses an owner list separated by commas, newlines, or spaces.
    pub fn parse(owners: &str, threshold: u64) -> Result<Self> {
        let owners = owners
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::parse::<Address>)
            .collect::<Result<Vec<Address>>>()?;
        Self::new(owners, threshold)
    }

    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}
