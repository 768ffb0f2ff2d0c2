use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// Consensus configuration.
///
/// A single immutable value passed explicitly to every component
/// constructor, validated once at boot. Loading (TOML, CLI, …) is the
/// embedding application's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Total number of super nodes expected per round.
    pub super_node_count: usize,
    /// Permanent seats. `core + rotate` must equal `super_node_count`.
    pub core_node_count: usize,
    /// Rotating seats.
    pub rotate_node_count: usize,

    /// Target wall time per block, also the per-round budget.
    pub block_time_ms: u64,
    /// How long to wait for VRF announcements before closing on quorum.
    pub vrf_collection_timeout_ms: u64,
    /// Budget for building and mining a block once elected.
    pub block_production_timeout_ms: u64,

    /// Number of top-scored nodes sharing the block reward.
    pub rewarded_top_x: usize,

    /// PoW target for the first block after genesis.
    pub pow_base_difficulty: U256,
    /// Desired average mining time in seconds.
    pub pow_target_time_s: u64,
    /// Number of recent inter-block intervals fed into retargeting.
    pub difficulty_window: usize,

    /// Minimum bonded stake for a core seat.
    pub min_stake_core: u128,
    /// Minimum bonded stake for a rotating seat.
    pub min_stake_rotate: u128,

    pub max_transactions_per_block: usize,
    pub max_block_size_mb: usize,

    /// Accepted clock drift for live block timestamps.
    pub clock_skew_ms: u64,
    /// Epoch length; the epoch number salts every round seed.
    pub epoch_length_ms: u64,
    /// Days over which the election decay factor falls from 1.0 to 0.5.
    pub decay_days: u64,
    /// Tolerance when cross-checking announced scores against recomputation.
    pub score_epsilon: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            super_node_count: 50,
            core_node_count: 25,
            rotate_node_count: 25,
            block_time_ms: 3_000,
            vrf_collection_timeout_ms: 2_000,
            block_production_timeout_ms: 3_000,
            rewarded_top_x: 15,
            pow_base_difficulty: U256::from(2_500_000u64),
            pow_target_time_s: 3,
            difficulty_window: 10,
            min_stake_core: 1_000_000,
            min_stake_rotate: 100_000,
            max_transactions_per_block: 2_000,
            max_block_size_mb: 2,
            clock_skew_ms: 1_000,
            epoch_length_ms: 86_400_000, // one day
            decay_days: 30,
            score_epsilon: 1e-9,
        }
    }
}

impl ConsensusConfig {
    /// Validate all cross-field constraints. Run once at boot; components
    /// may assume a validated config afterwards.
    pub fn validate(&self) -> Result<()> {
        if self.super_node_count == 0 {
            return Err(CoreError::InvalidConfig("super_node_count must be positive".into()));
        }
        if self.core_node_count + self.rotate_node_count != self.super_node_count {
            return Err(CoreError::InvalidConfig(format!(
                "core ({}) + rotate ({}) must equal super_node_count ({})",
                self.core_node_count, self.rotate_node_count, self.super_node_count
            )));
        }
        if self.block_time_ms == 0 {
            return Err(CoreError::InvalidConfig("block_time_ms must be positive".into()));
        }
        if self.vrf_collection_timeout_ms >= self.block_production_timeout_ms {
            return Err(CoreError::InvalidConfig(
                "vrf_collection_timeout_ms must be < block_production_timeout_ms".into(),
            ));
        }
        if self.block_production_timeout_ms > self.block_time_ms {
            return Err(CoreError::InvalidConfig(
                "block_production_timeout_ms must be <= block_time_ms".into(),
            ));
        }
        if self.rewarded_top_x == 0 || self.rewarded_top_x > self.super_node_count {
            return Err(CoreError::InvalidConfig(format!(
                "rewarded_top_x ({}) must be in 1..=super_node_count ({})",
                self.rewarded_top_x, self.super_node_count
            )));
        }
        if self.pow_base_difficulty.is_zero() {
            return Err(CoreError::InvalidConfig("pow_base_difficulty must be positive".into()));
        }
        if self.pow_target_time_s == 0 {
            return Err(CoreError::InvalidConfig("pow_target_time_s must be positive".into()));
        }
        if self.difficulty_window == 0 {
            return Err(CoreError::InvalidConfig("difficulty_window must be positive".into()));
        }
        if self.max_transactions_per_block == 0 || self.max_block_size_mb == 0 {
            return Err(CoreError::InvalidConfig("block limits must be positive".into()));
        }
        if self.epoch_length_ms == 0 {
            return Err(CoreError::InvalidConfig("epoch_length_ms must be positive".into()));
        }
        if !(self.score_epsilon > 0.0) {
            return Err(CoreError::InvalidConfig("score_epsilon must be positive".into()));
        }
        Ok(())
    }

    /// Quorum threshold: `⌈(2/3)·N⌉`.
    pub fn quorum(&self) -> usize {
        (2 * self.super_node_count).div_ceil(3)
    }

    /// Maximum serialized block size in bytes.
    pub fn max_block_size_bytes(&self) -> usize {
        self.max_block_size_mb * 1024 * 1024
    }

    /// Epoch number for a millisecond wall-clock timestamp.
    pub fn epoch_for(&self, timestamp_ms: u64) -> u64 {
        timestamp_ms / self.epoch_length_ms
    }
}
