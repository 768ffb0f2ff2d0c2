use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::block::Block;

/// Live consensus position of this node. Mutated only by the consensus
/// engine at commit time; everyone else reads a clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainState {
    pub current_height: u64,
    pub current_round: u32,
    pub total_supply: u128,
    pub super_node_count: usize,
    pub current_difficulty: U256,
    pub last_update_ms: u64,
}

impl ChainState {
    /// State as of a committed tip block.
    pub fn at_tip(tip: &Block, total_supply: u128, super_node_count: usize, now_ms: u64) -> Self {
        Self {
            current_height: tip.height,
            current_round: 0,
            total_supply,
            super_node_count,
            current_difficulty: tip.difficulty_target,
            last_update_ms: now_ms,
        }
    }

    /// Advance past a newly committed block. Resets the round counter and
    /// folds the commit delta's net supply change into `total_supply`
    /// (zero for pure transfers and fee redistribution; nonzero only once
    /// something mints or burns).
    pub fn advance(&mut self, block: &Block, supply_change: i128, now_ms: u64) {
        debug_assert_eq!(block.height, self.current_height + 1);
        self.current_height = block.height;
        self.current_round = 0;
        self.current_difficulty = block.difficulty_target;
        self.total_supply = if supply_change.is_negative() {
            self.total_supply.saturating_sub(supply_change.unsigned_abs())
        } else {
            self.total_supply.saturating_add(supply_change as u128)
        };
        self.last_update_ms = now_ms;
    }
}
