//! PoW difficulty retargeting.
//!
//! Keeps the average mining time near `pow_target_time_s` by scaling the
//! previous target with the observed mean inter-block time, clamped to a
//! 4x move per block. Integer-only arithmetic: every verifier recomputes
//! the exact same target from the same history.

use polaris_core::ConsensusConfig;
use primitive_types::U256;

#[derive(Debug, Clone)]
pub struct DifficultyCalculator {
    base_target: U256,
    target_time_ms: u64,
    window: usize,
}

impl DifficultyCalculator {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            // `pow_base_difficulty` counts expected hash attempts; the
            // comparison threshold is the full space divided by it.
            base_target: U256::MAX / config.pow_base_difficulty.max(U256::one()),
            target_time_ms: config.pow_target_time_s * 1_000,
            window: config.difficulty_window,
        }
    }

    /// Threshold target for the first mined block after genesis.
    pub fn base_target(&self) -> U256 {
        self.base_target
    }

    /// Target for the next block.
    ///
    /// `timestamps` are the millisecond timestamps of recent post-genesis
    /// blocks in ascending height order (the genesis timestamp is synthetic
    /// and never enters the window). With fewer than two entries there is
    /// no measurable interval yet and the base target applies.
    ///
    /// `new = prev · Σ(intervals) / (count · T_target)`, clamped into
    /// `[prev/4, prev·4]` and floored at 1. Fast blocks shrink the target
    /// (harder), slow blocks widen it.
    pub fn next_target(&self, prev_target: U256, timestamps: &[u64]) -> U256 {
        let window = if timestamps.len() > self.window + 1 {
            &timestamps[timestamps.len() - (self.window + 1)..]
        } else {
            timestamps
        };
        if window.len() < 2 {
            return self.base_target;
        }

        let mut sum_intervals: u128 = 0;
        for pair in window.windows(2) {
            sum_intervals += pair[1].saturating_sub(pair[0]) as u128;
        }
        let count = (window.len() - 1) as u128;

        let scaled = prev_target * U256::from(sum_intervals)
            / U256::from(count * self.target_time_ms as u128);

        let floor = prev_target / 4;
        let ceil = prev_target.saturating_mul(U256::from(4u64));
        scaled.max(floor).min(ceil).max(U256::one())
    }
}
