//! Dispatch orchestration and candidate verification.

pub mod orchestrator;
pub mod verifier;

pub use orchestrator::{IterationOutcome, RawCandidate, SearchOrchestrator, SearchResources};
pub use verifier::{promote, verify, BestResult, CandidateResult};
