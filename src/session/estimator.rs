//! Advisory "time to next improvement" estimate.
//!
//! Each hash hits an address with at least `k` leading zero nibbles with
//! probability `16^-k`. The estimator locks a target one nibble beyond the
//! current best and measures work since the lock. When most of the predicted
//! work has been spent without success the window re-anchors, so the ETA
//! does not collapse to zero and stay there.

/// Estimator tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    /// Confidence level for the required-work figure.
    pub confidence: f64,
    /// Re-anchor once remaining work drops below this share of the
    /// required work.
    pub relock_fraction: f64,
    /// Lowest target ever reported.
    pub min_target: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            confidence: 0.9,
            relock_fraction: 0.5,
            min_target: 1,
        }
    }
}

/// One estimate, emitted with every progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Leading zero nibbles being aimed for.
    pub target_zero_nibbles: u32,
    /// Chance that the target has been hit by now, given the work since
    /// the lock.
    pub probability: f64,
    /// Hashes still needed to reach `confidence`.
    pub hashes_remaining: f64,
    /// `hashes_remaining / hashrate`; `None` without a hashrate.
    pub seconds_remaining: Option<f64>,
}

const MAX_NIBBLES: u32 = 40;

#[derive(Debug, Clone)]
pub struct ProbabilityEstimator {
    config: EstimatorConfig,
    locked_target: Option<u32>,
    hashes_at_lock: u64,
}

impl ProbabilityEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            locked_target: None,
            hashes_at_lock: 0,
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn locked_target(&self) -> Option<u32> {
        self.locked_target
    }

    /// Hashes needed to hit `target` with the configured confidence.
    pub fn required_hashes(&self, target: u32) -> f64 {
        let confidence = self.config.confidence.clamp(1e-6, 1.0 - 1e-12);
        (1.0 / (1.0 - confidence)).ln() * 16f64.powi(target as i32)
    }

    pub fn update(&mut self, best_zero_nibbles: Option<u32>, total_hashes: u64, hashrate: f64) -> Estimate {
        let target = (best_zero_nibbles.unwrap_or(0) + 1)
            .max(self.config.min_target)
            .min(MAX_NIBBLES);

        if self.locked_target != Some(target) {
            self.locked_target = Some(target);
            self.hashes_at_lock = total_hashes;
        }

        let required = self.required_hashes(target);
        let mut since = total_hashes.saturating_sub(self.hashes_at_lock) as f64;
        let mut remaining = required - since;
        if remaining < self.config.relock_fraction * required {
            self.hashes_at_lock = total_hashes;
            since = 0.0;
            remaining = required;
        }

        let per_hash = 16f64.powi(-(target as i32));
        let probability = (1.0 - (since * (-per_hash).ln_1p()).exp()).clamp(0.0, 1.0);
        let seconds_remaining = (hashrate.is_finite() && hashrate > 0.0).then(|| remaining / hashrate);

        Estimate {
            target_zero_nibbles: target,
            probability,
            hashes_remaining: remaining,
            seconds_remaining,
        }
    }
}

impl Default for ProbabilityEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}
