//! Host-side verification of kernel candidates.
//!
//! The kernel writes the winning nonce and the winning address from
//! independent threads, so the pair it reports may not belong together.
//! Only the nonce is taken from the device; the address is always re-derived.

use crate::address::Address;
use crate::crypto::SafeSetup;
use crate::nonce::SaltNonce;

use super::orchestrator::RawCandidate;

/// A candidate whose address was recomputed on the host.
///
/// Only [`verify`] constructs these, so holding one means the address is
/// the true CREATE2 output for `nonce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateResult {
    nonce: SaltNonce,
    address: Address,
    verified: bool,
}

/// The numerically smallest verified candidate of a session.
pub type BestResult = CandidateResult;

impl CandidateResult {
    pub(crate) fn verified(nonce: SaltNonce, address: Address) -> Self {
        Self {
            nonce,
            address,
            verified: true,
        }
    }

    pub fn nonce(&self) -> SaltNonce {
        self.nonce
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }
}

/// Re-derives the address for the reported nonce. Returns `None` when the
/// kernel has not found anything yet.
pub fn verify(setup: &SafeSetup, raw: &RawCandidate) -> Option<CandidateResult> {
    if !raw.found {
        return None;
    }
    let nonce = raw.nonce();
    let address = setup.address_for(&nonce);
    if address != raw.reported_address() {
        log::debug!(
            "Kernel reported {} for nonce {}, recomputed {}",
            raw.reported_address(),
            nonce,
            address
        );
    }
    Some(CandidateResult::verified(nonce, address))
}

/// Keeps whichever of `current` and `candidate` has the smaller address.
/// Ties keep `current`. A missing `current` counts as the worst address.
pub fn promote(current: Option<BestResult>, candidate: Option<CandidateResult>) -> Option<BestResult> {
    match (current, candidate) {
        (Some(best), Some(candidate)) if candidate.address < best.address => Some(candidate),
        (Some(best), _) => Some(best),
        (None, candidate) => candidate,
    }
}
