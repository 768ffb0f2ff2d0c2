//! Super-node registry.
//!
//! Tracks the staked nodes allowed into the per-round eligible set, their
//! core vs. rotating roles, election times, and reported uptime. Owned by
//! the embedding application behind a lock; the engine reads an
//! [`EligibleSet`] snapshot per round.

use std::collections::HashMap;

use polaris_core::ConsensusConfig;
use polaris_crypto::PublicKey;
use serde::{Deserialize, Serialize};

use crate::error::{ConsensusError, Result};

/// Seat class of a super node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Permanent seat; higher stake minimum.
    Core,
    /// Rotating seat.
    Rotating,
}

/// One registered super node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperNode {
    pub public_key: PublicKey,
    pub stake: u128,
    pub role: NodeRole,
    /// Wall time (ms) of the node's most recent election; drives the score
    /// decay factor.
    pub elected_at_ms: u64,
    /// Reported uptime percentage, 0–100.
    pub uptime_pct: f64,
    pub active: bool,
}

impl SuperNode {
    pub fn new(public_key: PublicKey, stake: u128, role: NodeRole, elected_at_ms: u64) -> Self {
        Self { public_key, stake, role, elected_at_ms, uptime_pct: 100.0, active: true }
    }
}

/// Stake, election time, and uptime for one eligible node — the inputs the
/// score calculator needs.
#[derive(Debug, Clone, Copy)]
pub struct NodeProfile {
    pub stake: u128,
    pub elected_at_ms: u64,
    pub uptime_pct: f64,
}

/// Immutable per-round snapshot of the eligible nodes.
#[derive(Debug, Clone, Default)]
pub struct EligibleSet {
    pub profiles: HashMap<PublicKey, NodeProfile>,
    pub average_stake: f64,
}

impl EligibleSet {
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn contains(&self, pk: &PublicKey) -> bool {
        self.profiles.contains_key(pk)
    }

    pub fn get(&self, pk: &PublicKey) -> Option<&NodeProfile> {
        self.profiles.get(pk)
    }
}

/// Registry of all registered super nodes.
#[derive(Debug, Clone)]
pub struct SuperNodeRegistry {
    nodes: HashMap<PublicKey, SuperNode>,
    min_stake_core: u128,
    min_stake_rotate: u128,
    total_stake: u128,
}

impl SuperNodeRegistry {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            nodes: HashMap::new(),
            min_stake_core: config.min_stake_core,
            min_stake_rotate: config.min_stake_rotate,
            total_stake: 0,
        }
    }

    fn min_stake_for(&self, role: NodeRole) -> u128 {
        match role {
            NodeRole::Core => self.min_stake_core,
            NodeRole::Rotating => self.min_stake_rotate,
        }
    }

    /// Register a node. The stake must meet the role's minimum.
    pub fn add(&mut self, node: SuperNode) -> Result<()> {
        let required = self.min_stake_for(node.role);
        if node.stake < required {
            return Err(ConsensusError::InsufficientStake { provided: node.stake, required });
        }
        if self.nodes.contains_key(&node.public_key) {
            return Err(ConsensusError::NodeAlreadyRegistered(node.public_key.to_string()));
        }
        self.total_stake += node.stake;
        self.nodes.insert(node.public_key, node);
        Ok(())
    }

    pub fn remove(&mut self, pk: &PublicKey) -> Result<SuperNode> {
        let node = self
            .nodes
            .remove(pk)
            .ok_or_else(|| ConsensusError::NodeNotFound(pk.to_string()))?;
        self.total_stake -= node.stake;
        Ok(node)
    }

    pub fn update_stake(&mut self, pk: &PublicKey, new_stake: u128) -> Result<()> {
        let min_rotate = self.min_stake_rotate;
        let min_core = self.min_stake_core;
        let node = self
            .nodes
            .get_mut(pk)
            .ok_or_else(|| ConsensusError::NodeNotFound(pk.to_string()))?;
        let required = match node.role {
            NodeRole::Core => min_core,
            NodeRole::Rotating => min_rotate,
        };
        if new_stake < required {
            return Err(ConsensusError::InsufficientStake { provided: new_stake, required });
        }
        self.total_stake = self.total_stake - node.stake + new_stake;
        node.stake = new_stake;
        Ok(())
    }

    /// Record an uptime report for a node.
    pub fn report_uptime(&mut self, pk: &PublicKey, uptime_pct: f64) -> Result<()> {
        let node = self
            .nodes
            .get_mut(pk)
            .ok_or_else(|| ConsensusError::NodeNotFound(pk.to_string()))?;
        node.uptime_pct = uptime_pct.clamp(0.0, 100.0);
        Ok(())
    }

    /// Record a (re-)election, resetting the node's decay clock.
    pub fn record_election(&mut self, pk: &PublicKey, now_ms: u64) -> Result<()> {
        let node = self
            .nodes
            .get_mut(pk)
            .ok_or_else(|| ConsensusError::NodeNotFound(pk.to_string()))?;
        node.elected_at_ms = now_ms;
        Ok(())
    }

    pub fn set_active(&mut self, pk: &PublicKey, active: bool) -> Result<()> {
        let node = self
            .nodes
            .get_mut(pk)
            .ok_or_else(|| ConsensusError::NodeNotFound(pk.to_string()))?;
        node.active = active;
        Ok(())
    }

    pub fn get(&self, pk: &PublicKey) -> Option<&SuperNode> {
        self.nodes.get(pk)
    }

    pub fn contains(&self, pk: &PublicKey) -> bool {
        self.nodes.contains_key(pk)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn total_stake(&self) -> u128 {
        self.total_stake
    }

    /// Snapshot of the active, stake-eligible nodes with their average
    /// stake. This is what the collector and validator score against.
    pub fn eligible_set(&self) -> EligibleSet {
        let profiles: HashMap<PublicKey, NodeProfile> = self
            .nodes
            .values()
            .filter(|n| n.active && n.stake >= self.min_stake_for(n.role))
            .map(|n| {
                (
                    n.public_key,
                    NodeProfile {
                        stake: n.stake,
                        elected_at_ms: n.elected_at_ms,
                        uptime_pct: n.uptime_pct,
                    },
                )
            })
            .collect();

        let average_stake = if profiles.is_empty() {
            0.0
        } else {
            let total: u128 = profiles.values().map(|p| p.stake).sum();
            total as f64 / profiles.len() as f64
        };

        EligibleSet { profiles, average_stake }
    }
}
