//! Block validation pipeline.
//!
//! Twelve short-circuiting stages, each returning a categorized
//! [`RejectionKind`] on failure. The pipeline is pure: it never mutates
//! state and never panics on adversary-controlled input. The failing check
//! is logged here; recovery policy belongs to the engine.

use std::collections::{HashMap, HashSet};

use polaris_core::{round_seed, Block, ConsensusConfig, StateSnapshot};
use polaris_crypto::{verify_signature, vrf_verify, PublicKey};
use primitive_types::U256;
use tracing::warn;

use crate::difficulty::DifficultyCalculator;
use crate::error::{ConsensusError, RejectionKind, Result};
use crate::pow;
use crate::registry::EligibleSet;
use crate::score::ScoreCalculator;

/// Whether the block is being checked during live consensus or historical
/// catch-up. Catch-up skips the wall-clock timestamp check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Live,
    CatchUp,
}

/// Everything the validator needs besides the block itself. Assembled by
/// the engine per validation call.
pub struct ValidationContext<'a> {
    pub previous_block: &'a Block,
    pub expected_height: u64,
    pub eligible: &'a EligibleSet,
    /// Account state as of `previous_block.height`.
    pub state: &'a StateSnapshot,
    /// Timestamps of recent post-genesis blocks, ascending, for the
    /// difficulty recomputation.
    pub recent_timestamps: &'a [u64],
    pub now_ms: u64,
    pub mode: ValidationMode,
}

pub struct BlockValidator {
    config: ConsensusConfig,
    score_calculator: ScoreCalculator,
    difficulty_calculator: DifficultyCalculator,
}

impl BlockValidator {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            config: config.clone(),
            score_calculator: ScoreCalculator::new(config),
            difficulty_calculator: DifficultyCalculator::new(config),
        }
    }

    /// Run the full pipeline. `Ok(())` means the block may be committed.
    pub fn validate(&self, block: &Block, ctx: &ValidationContext<'_>) -> Result<()> {
        let result = self.run_pipeline(block, ctx);
        if let Err(ConsensusError::Rejected { kind, detail }) = &result {
            warn!(height = block.height, %kind, detail, "block rejected");
        }
        result
    }

    fn run_pipeline(&self, block: &Block, ctx: &ValidationContext<'_>) -> Result<()> {
        self.check_format(block)?;

        // Genesis mode: height 0 carries no announcements, PoW, or
        // transactions to check beyond structure.
        if ctx.expected_height == 0 {
            return self.check_genesis(block);
        }

        self.check_timestamp(block, ctx)?;
        self.check_height(block, ctx)?;
        self.check_previous_hash(block, ctx)?;
        self.check_vrf_set(block, ctx)?;
        self.check_sorting_and_proposer(block)?;
        self.check_rewards(block)?;
        self.check_merkle(block)?;
        self.check_pow(block)?;
        self.check_difficulty(block, ctx)?;
        self.check_signatures(block, ctx)?;
        self.check_transactions(block, ctx)?;
        Ok(())
    }

    // ── Stage 1: format ────────────────────────────────────────────────

    fn check_format(&self, block: &Block) -> Result<()> {
        if block.difficulty_target.is_zero() {
            return Err(ConsensusError::rejected(
                RejectionKind::Format,
                "zero difficulty target",
            ));
        }
        if block.transactions.len() > self.config.max_transactions_per_block {
            return Err(ConsensusError::rejected(
                RejectionKind::Format,
                format!(
                    "{} transactions exceeds maximum {}",
                    block.transactions.len(),
                    self.config.max_transactions_per_block
                ),
            ));
        }
        for ann in &block.all_vrf_announcements {
            if !ann.score.is_finite() || !(0.0..=1.0).contains(&ann.score) {
                return Err(ConsensusError::rejected(
                    RejectionKind::Format,
                    format!("announcement score {} outside [0, 1]", ann.score),
                ));
            }
        }
        let size = block.encoded_size();
        if size > self.config.max_block_size_bytes() {
            return Err(ConsensusError::rejected(
                RejectionKind::Format,
                format!("serialized size {size} exceeds {}", self.config.max_block_size_bytes()),
            ));
        }
        Ok(())
    }

    fn check_genesis(&self, block: &Block) -> Result<()> {
        if block.height != 0
            || block.previous_hash != [0u8; 32]
            || !block.all_vrf_announcements.is_empty()
            || !block.transactions.is_empty()
        {
            return Err(ConsensusError::rejected(
                RejectionKind::Format,
                "malformed genesis block",
            ));
        }
        self.check_merkle(block)
    }

    // ── Stage 2: timestamp ─────────────────────────────────────────────

    fn check_timestamp(&self, block: &Block, ctx: &ValidationContext<'_>) -> Result<()> {
        if ctx.mode == ValidationMode::CatchUp {
            return Ok(());
        }
        let skew = self.config.clock_skew_ms;
        let delta = ctx.now_ms.abs_diff(block.timestamp);
        if delta > skew {
            return Err(ConsensusError::rejected(
                RejectionKind::Timing,
                format!("timestamp {} drifts {delta} ms from local clock", block.timestamp),
            ));
        }
        Ok(())
    }

    // ── Stages 3-4: chain linkage ──────────────────────────────────────

    fn check_height(&self, block: &Block, ctx: &ValidationContext<'_>) -> Result<()> {
        if block.height != ctx.expected_height {
            return Err(ConsensusError::rejected(
                RejectionKind::HeightMismatch,
                format!("height {} but expected {}", block.height, ctx.expected_height),
            ));
        }
        Ok(())
    }

    fn check_previous_hash(&self, block: &Block, ctx: &ValidationContext<'_>) -> Result<()> {
        let expected = ctx.previous_block.hash();
        if block.previous_hash != expected {
            return Err(ConsensusError::rejected(
                RejectionKind::PrevHash,
                "previous hash does not match the committed tip",
            ));
        }
        Ok(())
    }

    // ── Stage 5: VRF announcement set ──────────────────────────────────

    fn check_vrf_set(&self, block: &Block, ctx: &ValidationContext<'_>) -> Result<()> {
        let quorum = self.config.quorum();
        if block.all_vrf_announcements.len() < quorum {
            return Err(ConsensusError::rejected(
                RejectionKind::VrfSetSize,
                format!(
                    "{} announcements below quorum {quorum}",
                    block.all_vrf_announcements.len()
                ),
            ));
        }

        let epoch = self.config.epoch_for(block.timestamp);
        let epoch_ms = epoch * self.config.epoch_length_ms;
        let seed = round_seed(&block.previous_hash, block.round as u64, epoch);

        let mut seen: HashSet<PublicKey> = HashSet::new();
        for ann in &block.all_vrf_announcements {
            if ann.round != block.round as u64 {
                return Err(ConsensusError::rejected(
                    RejectionKind::VrfProof,
                    format!("announcement for round {} in round-{} block", ann.round, block.round),
                ));
            }
            let profile = ctx.eligible.get(&ann.public_key).ok_or_else(|| {
                ConsensusError::rejected(
                    RejectionKind::VrfProof,
                    format!("announcer {} not in super-node set", ann.public_key),
                )
            })?;
            if !seen.insert(ann.public_key) {
                return Err(ConsensusError::rejected(
                    RejectionKind::VrfProof,
                    format!("duplicate announcement from {}", ann.public_key),
                ));
            }
            if !vrf_verify(&ann.public_key, &seed, &ann.vrf_output, &ann.vrf_proof) {
                return Err(ConsensusError::rejected(
                    RejectionKind::VrfProof,
                    format!("invalid VRF proof from {}", ann.public_key),
                ));
            }
            let recomputed = self.score_calculator.score(
                &ann.vrf_output,
                profile.stake,
                ctx.eligible.average_stake,
                profile.elected_at_ms,
                epoch_ms,
                profile.uptime_pct,
            );
            if (recomputed - ann.score).abs() > self.config.score_epsilon {
                return Err(ConsensusError::rejected(
                    RejectionKind::VrfProof,
                    format!(
                        "score {} from {} not reproducible (recomputed {recomputed})",
                        ann.score, ann.public_key
                    ),
                ));
            }
        }
        Ok(())
    }

    // ── Stage 6: ordering and proposer identity ────────────────────────

    fn check_sorting_and_proposer(&self, block: &Block) -> Result<()> {
        if !ScoreCalculator::is_ranked(&block.all_vrf_announcements) {
            return Err(ConsensusError::rejected(
                RejectionKind::ProposerMismatch,
                "announcements not sorted by (-score, pk)",
            ));
        }
        let head = &block.all_vrf_announcements[0];
        if block.proposer != head.public_key {
            return Err(ConsensusError::rejected(
                RejectionKind::ProposerMismatch,
                format!("proposer {} is not the top-ranked announcer", block.proposer),
            ));
        }
        if block.vrf_output != head.vrf_output || block.vrf_proof != head.vrf_proof {
            return Err(ConsensusError::rejected(
                RejectionKind::ProposerMismatch,
                "header VRF output/proof differ from the winning announcement",
            ));
        }
        Ok(())
    }

    // ── Stage 7: reward set ────────────────────────────────────────────

    fn check_rewards(&self, block: &Block) -> Result<()> {
        let expected: Vec<PublicKey> =
            ScoreCalculator::select_top_x(&block.all_vrf_announcements, self.config.rewarded_top_x)
                .iter()
                .map(|a| a.public_key)
                .collect();
        if block.rewarded_nodes != expected {
            return Err(ConsensusError::rejected(
                RejectionKind::RewardMismatch,
                "rewarded nodes differ from the top-X announcement keys",
            ));
        }
        Ok(())
    }

    // ── Stages 8-10: content integrity ─────────────────────────────────

    fn check_merkle(&self, block: &Block) -> Result<()> {
        let recomputed = Block::merkle_root_of(&block.transactions);
        if recomputed != block.merkle_root {
            return Err(ConsensusError::rejected(
                RejectionKind::Merkle,
                "merkle root does not match transactions",
            ));
        }
        Ok(())
    }

    fn check_pow(&self, block: &Block) -> Result<()> {
        if !pow::verify(block) {
            return Err(ConsensusError::rejected(
                RejectionKind::Pow,
                format!("nonce {} does not satisfy the difficulty target", block.nonce),
            ));
        }
        Ok(())
    }

    fn check_difficulty(&self, block: &Block, ctx: &ValidationContext<'_>) -> Result<()> {
        let expected = self
            .difficulty_calculator
            .next_target(ctx.previous_block.difficulty_target, ctx.recent_timestamps);
        if block.difficulty_target != expected {
            return Err(ConsensusError::rejected(
                RejectionKind::Difficulty,
                format!(
                    "advertised target {} but retargeting yields {expected}",
                    block.difficulty_target
                ),
            ));
        }
        Ok(())
    }

    // ── Stage 11: signatures ───────────────────────────────────────────

    fn check_signatures(&self, block: &Block, ctx: &ValidationContext<'_>) -> Result<()> {
        let hash = block.hash();
        if !block.signatures.contains_key(&block.proposer) {
            return Err(ConsensusError::rejected(
                RejectionKind::Signature,
                "proposer signature missing",
            ));
        }
        for (signer, signature) in &block.signatures {
            if signer != &block.proposer && !ctx.eligible.contains(signer) {
                return Err(ConsensusError::rejected(
                    RejectionKind::Signature,
                    format!("attestation from non-super-node {signer}"),
                ));
            }
            if !verify_signature(signer, &hash, signature).unwrap_or(false) {
                return Err(ConsensusError::rejected(
                    RejectionKind::Signature,
                    format!("invalid signature from {signer}"),
                ));
            }
        }
        Ok(())
    }

    // ── Stage 12: transactions ─────────────────────────────────────────

    fn check_transactions(&self, block: &Block, ctx: &ValidationContext<'_>) -> Result<()> {
        let mut balances: HashMap<PublicKey, u64> = HashMap::new();
        let mut nonces: HashMap<PublicKey, u64> = HashMap::new();

        for (i, tx) in block.transactions.iter().enumerate() {
            if !tx.verify_signature() {
                return Err(ConsensusError::rejected(
                    RejectionKind::TxSignature,
                    format!("tx[{i}] signature invalid"),
                ));
            }
            let sender = tx.sender;
            let nonce = *nonces.entry(sender).or_insert_with(|| ctx.state.nonce_of(&sender));
            if tx.nonce != nonce {
                return Err(ConsensusError::rejected(
                    RejectionKind::TxNonce,
                    format!("tx[{i}] nonce {} but account is at {nonce}", tx.nonce),
                ));
            }
            let cost = tx.amount.checked_add(tx.fee).ok_or_else(|| {
                ConsensusError::rejected(RejectionKind::TxFormat, format!("tx[{i}] cost overflow"))
            })?;
            let balance =
                *balances.entry(sender).or_insert_with(|| ctx.state.balance_of(&sender));
            if balance < cost {
                return Err(ConsensusError::rejected(
                    RejectionKind::TxBalance,
                    format!("tx[{i}] cost {cost} exceeds balance {balance}"),
                ));
            }

            nonces.insert(sender, nonce + 1);
            balances.insert(sender, balance - cost);
            *balances
                .entry(tx.recipient)
                .or_insert_with(|| ctx.state.balance_of(&tx.recipient)) += tx.amount;
        }
        Ok(())
    }
}

/// Convenience used by the engine and tests: the expected difficulty for
/// the block following `previous`.
pub fn expected_target(
    config: &ConsensusConfig,
    previous: &Block,
    recent_timestamps: &[u64],
) -> U256 {
    DifficultyCalculator::new(config).next_target(previous.difficulty_target, recent_timestamps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConsensusConfig {
        ConsensusConfig::default()
    }

    fn genesis() -> Block {
        Block::genesis(U256::from(2_500_000u64))
    }

    fn ctx<'a>(
        previous: &'a Block,
        eligible: &'a EligibleSet,
        state: &'a StateSnapshot,
        expected_height: u64,
        now_ms: u64,
    ) -> ValidationContext<'a> {
        ValidationContext {
            previous_block: previous,
            expected_height,
            eligible,
            state,
            recent_timestamps: &[],
            now_ms,
            mode: ValidationMode::Live,
        }
    }

    fn kind_of(result: Result<()>) -> RejectionKind {
        match result {
            Err(ConsensusError::Rejected { kind, .. }) => kind,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_genesis_mode_accepts_canonical_genesis() {
        let validator = BlockValidator::new(&config());
        let genesis = genesis();
        let eligible = EligibleSet::default();
        let state = StateSnapshot::default();
        let context = ctx(&genesis, &eligible, &state, 0, 0);
        validator.validate(&genesis, &context).unwrap();
    }

    #[test]
    fn test_genesis_mode_rejects_malformed_genesis() {
        let validator = BlockValidator::new(&config());
        let genesis = genesis();
        let mut bad = genesis.clone();
        bad.previous_hash = [1u8; 32];
        let eligible = EligibleSet::default();
        let state = StateSnapshot::default();
        let context = ctx(&genesis, &eligible, &state, 0, 0);
        assert_eq!(kind_of(validator.validate(&bad, &context)), RejectionKind::Format);
    }

    #[test]
    fn test_timestamp_drift_rejected_live_only() {
        let validator = BlockValidator::new(&config());
        let genesis = genesis();
        let mut block = genesis.clone();
        block.height = 1;
        block.timestamp = 100_000;
        block.previous_hash = genesis.hash();

        let eligible = EligibleSet::default();
        let state = StateSnapshot::default();
        // 5 s of drift against a 1 s skew allowance.
        let context = ctx(&genesis, &eligible, &state, 1, 105_000);
        assert_eq!(kind_of(validator.validate(&block, &context)), RejectionKind::Timing);

        // Catch-up mode skips the clock check and fails later (empty VRF set).
        let mut catchup = ctx(&genesis, &eligible, &state, 1, 105_000);
        catchup.mode = ValidationMode::CatchUp;
        assert_eq!(kind_of(validator.validate(&block, &catchup)), RejectionKind::VrfSetSize);
    }

    #[test]
    fn test_height_mismatch_rejected() {
        let validator = BlockValidator::new(&config());
        let genesis = genesis();
        let mut block = genesis.clone();
        block.height = 7;
        block.timestamp = 1_000;

        let eligible = EligibleSet::default();
        let state = StateSnapshot::default();
        let context = ctx(&genesis, &eligible, &state, 1, 1_000);
        assert_eq!(kind_of(validator.validate(&block, &context)), RejectionKind::HeightMismatch);
    }

    #[test]
    fn test_previous_hash_mismatch_rejected() {
        let validator = BlockValidator::new(&config());
        let genesis = genesis();
        let mut block = genesis.clone();
        block.height = 1;
        block.timestamp = 1_000;
        block.previous_hash = [9u8; 32];

        let eligible = EligibleSet::default();
        let state = StateSnapshot::default();
        let context = ctx(&genesis, &eligible, &state, 1, 1_000);
        assert_eq!(kind_of(validator.validate(&block, &context)), RejectionKind::PrevHash);
    }

    #[test]
    fn test_oversized_transaction_count_rejected() {
        let mut cfg = config();
        cfg.max_transactions_per_block = 1;
        let validator = BlockValidator::new(&cfg);
        let genesis = genesis();

        let kp = polaris_crypto::Keypair::from_secret_bytes(&[1u8; 32]).unwrap();
        let tx = |n| {
            polaris_core::Transaction::new_signed(&kp, kp.public_key(), 1, 1, n, 0)
        };
        let mut block = genesis.clone();
        block.height = 1;
        block.transactions = vec![tx(0), tx(1)];

        let eligible = EligibleSet::default();
        let state = StateSnapshot::default();
        let context = ctx(&genesis, &eligible, &state, 1, 0);
        assert_eq!(kind_of(validator.validate(&block, &context)), RejectionKind::Format);
    }
}
