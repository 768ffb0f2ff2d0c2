//! Block proposal construction.
//!
//! The proposer assembles every header field, selects transactions, and
//! hands a [`CandidateBlock`] to the mining worker. Once a nonce comes
//! back, [`BlockProposer::finalize`] materializes the immutable block and
//! the proposer's own signature in one step — announcement vectors move by
//! ownership into the finished block, never by re-cloning.

use std::collections::HashMap;
use std::time::Instant;

use polaris_core::{Block, ConsensusConfig, StateSnapshot, Transaction};
use polaris_crypto::{Hash, Keypair, PublicKey, VrfProof};
use primitive_types::U256;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::collector::RoundResult;
use crate::error::{ConsensusError, Result};
use crate::pow::{self, MiningOutcome, MiningParams};

/// A fully assembled block awaiting its PoW nonce and signature.
#[derive(Debug, Clone)]
pub struct CandidateBlock {
    pub height: u64,
    pub round: u32,
    pub timestamp: u64,
    pub previous_hash: Hash,
    pub proposer: PublicKey,
    pub vrf_output: Hash,
    pub vrf_proof: VrfProof,
    pub all_vrf_announcements: Vec<polaris_core::VrfAnnouncement>,
    pub rewarded_nodes: Vec<PublicKey>,
    pub transactions: Vec<Transaction>,
    pub merkle_root: Hash,
    pub difficulty_target: U256,
}

impl CandidateBlock {
    pub fn mining_params(&self) -> MiningParams {
        MiningParams {
            height: self.height,
            round: self.round,
            timestamp: self.timestamp,
            previous_hash: self.previous_hash,
            proposer: self.proposer,
            vrf_output: self.vrf_output,
            merkle_root: self.merkle_root,
            difficulty_target: self.difficulty_target,
        }
    }
}

pub struct BlockProposer {
    config: ConsensusConfig,
    keypair: Keypair,
}

impl BlockProposer {
    pub fn new(config: ConsensusConfig, keypair: Keypair) -> Self {
        Self { config, keypair }
    }

    /// Assemble a candidate block from the closed round.
    ///
    /// Refuses with [`ConsensusError::NotProposer`] unless this node's key
    /// won the round. `transactions` must already be in mempool proposal
    /// order (fee desc, timestamp asc, hash asc); invalid entries are
    /// dropped, and selection stops at the count or size limit.
    #[allow(clippy::too_many_arguments)]
    pub fn build_candidate(
        &self,
        previous: &Block,
        round: u32,
        round_result: RoundResult,
        transactions: Vec<Transaction>,
        state: &StateSnapshot,
        difficulty_target: U256,
        timestamp_ms: u64,
    ) -> Result<CandidateBlock> {
        let my_pk = self.keypair.public_key();
        if round_result.winner.public_key != my_pk {
            return Err(ConsensusError::NotProposer);
        }

        let rewarded_nodes: Vec<PublicKey> =
            round_result.top_x.iter().map(|a| a.public_key).collect();

        let mut candidate = CandidateBlock {
            height: previous.height + 1,
            round,
            timestamp: timestamp_ms,
            previous_hash: previous.hash(),
            proposer: my_pk,
            vrf_output: round_result.winner.vrf_output,
            vrf_proof: round_result.winner.vrf_proof,
            all_vrf_announcements: round_result.all_valid,
            rewarded_nodes,
            transactions: Vec::new(),
            merkle_root: [0u8; 32],
            difficulty_target,
        };

        candidate.transactions = self.select_transactions(&candidate, transactions, state);
        candidate.merkle_root = Block::merkle_root_of(&candidate.transactions);
        Ok(candidate)
    }

    /// Pick transactions that fit the block, dropping invalid ones.
    fn select_transactions(
        &self,
        candidate: &CandidateBlock,
        ordered: Vec<Transaction>,
        state: &StateSnapshot,
    ) -> Vec<Transaction> {
        // Size budget: the encoded block without transactions, plus headroom
        // for the proposer's signature entry.
        let empty_size = self.empty_block_size(candidate);
        let mut budget = self
            .config
            .max_block_size_bytes()
            .saturating_sub(empty_size + 128);

        let mut balances: HashMap<PublicKey, u64> = HashMap::new();
        let mut nonces: HashMap<PublicKey, u64> = HashMap::new();
        let mut selected = Vec::new();

        for tx in ordered {
            if selected.len() >= self.config.max_transactions_per_block {
                break;
            }
            let encoded_len = tx.encode().len();
            if encoded_len > budget {
                break;
            }
            if !tx.verify_signature() {
                debug!(tx = %hex::encode(tx.hash()), "dropping tx with bad signature");
                continue;
            }
            let sender = tx.sender;
            let nonce = *nonces.entry(sender).or_insert_with(|| state.nonce_of(&sender));
            if tx.nonce != nonce {
                debug!(tx = %hex::encode(tx.hash()), "dropping tx with out-of-order nonce");
                continue;
            }
            let balance =
                *balances.entry(sender).or_insert_with(|| state.balance_of(&sender));
            let cost = match tx.amount.checked_add(tx.fee) {
                Some(c) => c,
                None => continue,
            };
            if balance < cost {
                debug!(tx = %hex::encode(tx.hash()), "dropping tx exceeding sender balance");
                continue;
            }

            nonces.insert(sender, nonce + 1);
            balances.insert(sender, balance - cost);
            *balances.entry(tx.recipient).or_insert_with(|| state.balance_of(&tx.recipient)) +=
                tx.amount;
            budget -= encoded_len;
            selected.push(tx);
        }
        selected
    }

    fn empty_block_size(&self, candidate: &CandidateBlock) -> usize {
        let probe = Block {
            height: candidate.height,
            round: candidate.round,
            timestamp: candidate.timestamp,
            previous_hash: candidate.previous_hash,
            proposer: candidate.proposer,
            vrf_output: candidate.vrf_output,
            vrf_proof: candidate.vrf_proof,
            all_vrf_announcements: candidate.all_vrf_announcements.clone(),
            rewarded_nodes: candidate.rewarded_nodes.clone(),
            transactions: vec![],
            merkle_root: [0u8; 32],
            nonce: 0,
            difficulty_target: candidate.difficulty_target,
            signatures: Default::default(),
        };
        probe.encoded_size()
    }

    /// Mine the candidate on the calling thread. Run via `spawn_blocking`.
    pub fn mine(
        candidate: &CandidateBlock,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<MiningOutcome> {
        pow::mine(&candidate.mining_params(), deadline, cancel)
    }

    /// Materialize the final block: nonce in place, hash computed, and the
    /// proposer's signature as the first attestation.
    pub fn finalize(&self, candidate: CandidateBlock, nonce: u64) -> Block {
        let mut block = Block {
            height: candidate.height,
            round: candidate.round,
            timestamp: candidate.timestamp,
            previous_hash: candidate.previous_hash,
            proposer: candidate.proposer,
            vrf_output: candidate.vrf_output,
            vrf_proof: candidate.vrf_proof,
            all_vrf_announcements: candidate.all_vrf_announcements,
            rewarded_nodes: candidate.rewarded_nodes,
            transactions: candidate.transactions,
            merkle_root: candidate.merkle_root,
            nonce,
            difficulty_target: candidate.difficulty_target,
            signatures: Default::default(),
        };
        let hash = block.hash();
        let signature = self.keypair.sign(&hash);
        block.signatures.insert(self.keypair.public_key(), signature);
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polaris_core::{AccountState, VrfAnnouncement};
    use polaris_crypto::vrf_evaluate;

    fn config() -> ConsensusConfig {
        ConsensusConfig::default()
    }

    fn round_result_for(kp: &Keypair) -> RoundResult {
        let (output, proof) = vrf_evaluate(kp, b"seed");
        let ann = VrfAnnouncement {
            round: 0,
            public_key: kp.public_key(),
            vrf_output: output,
            vrf_proof: proof,
            score: 0.9,
            timestamp: 0,
        };
        RoundResult { winner: ann.clone(), top_x: vec![ann.clone()], all_valid: vec![ann] }
    }

    fn funded_state(kp: &Keypair, balance: u64) -> StateSnapshot {
        let mut snapshot = StateSnapshot { height: 0, ..Default::default() };
        snapshot
            .accounts
            .insert(kp.public_key(), AccountState { balance, nonce: 0 });
        snapshot
    }

    #[test]
    fn test_refuses_when_not_winner() {
        let me = Keypair::from_secret_bytes(&[1u8; 32]).unwrap();
        let winner = Keypair::from_secret_bytes(&[2u8; 32]).unwrap();
        let proposer = BlockProposer::new(config(), me);
        let previous = Block::genesis(U256::from(2_500_000u64));

        let err = proposer.build_candidate(
            &previous,
            0,
            round_result_for(&winner),
            vec![],
            &StateSnapshot::default(),
            U256::from(2_500_000u64),
            1_000,
        );
        assert!(matches!(err, Err(ConsensusError::NotProposer)));
    }

    #[test]
    fn test_builds_candidate_with_round_data() {
        let me = Keypair::from_secret_bytes(&[1u8; 32]).unwrap();
        let proposer = BlockProposer::new(config(), me.clone());
        let previous = Block::genesis(U256::from(2_500_000u64));

        let candidate = proposer
            .build_candidate(
                &previous,
                2,
                round_result_for(&me),
                vec![],
                &StateSnapshot::default(),
                U256::from(2_500_000u64),
                5_000,
            )
            .unwrap();

        assert_eq!(candidate.height, 1);
        assert_eq!(candidate.round, 2);
        assert_eq!(candidate.previous_hash, previous.hash());
        assert_eq!(candidate.proposer, me.public_key());
        assert_eq!(candidate.rewarded_nodes, vec![me.public_key()]);
        assert_eq!(candidate.merkle_root, [0u8; 32]); // no transactions
    }

    #[test]
    fn test_drops_invalid_transactions() {
        let me = Keypair::from_secret_bytes(&[1u8; 32]).unwrap();
        let sender = Keypair::from_secret_bytes(&[3u8; 32]).unwrap();
        let proposer = BlockProposer::new(config(), me.clone());
        let previous = Block::genesis(U256::from(2_500_000u64));
        let state = funded_state(&sender, 100);

        let good = Transaction::new_signed(&sender, me.public_key(), 50, 10, 0, 1_000);
        let overspend = Transaction::new_signed(&sender, me.public_key(), 500, 10, 1, 1_000);
        let bad_nonce = Transaction::new_signed(&sender, me.public_key(), 1, 1, 7, 1_000);
        let mut forged = Transaction::new_signed(&sender, me.public_key(), 1, 1, 1, 1_000);
        forged.amount = 5;

        let candidate = proposer
            .build_candidate(
                &previous,
                0,
                round_result_for(&me),
                vec![good.clone(), overspend, bad_nonce, forged],
                &state,
                U256::from(2_500_000u64),
                1_000,
            )
            .unwrap();

        assert_eq!(candidate.transactions, vec![good]);
        assert_eq!(
            candidate.merkle_root,
            Block::merkle_root_of(&candidate.transactions)
        );
    }

    #[test]
    fn test_respects_transaction_count_limit() {
        let me = Keypair::from_secret_bytes(&[1u8; 32]).unwrap();
        let sender = Keypair::from_secret_bytes(&[3u8; 32]).unwrap();
        let mut cfg = config();
        cfg.max_transactions_per_block = 2;
        let proposer = BlockProposer::new(cfg, me.clone());
        let previous = Block::genesis(U256::from(2_500_000u64));
        let state = funded_state(&sender, 1_000_000);

        let txs: Vec<Transaction> = (0..5)
            .map(|n| Transaction::new_signed(&sender, me.public_key(), 1, 1, n, 1_000))
            .collect();

        let candidate = proposer
            .build_candidate(
                &previous,
                0,
                round_result_for(&me),
                txs,
                &state,
                U256::from(2_500_000u64),
                1_000,
            )
            .unwrap();
        assert_eq!(candidate.transactions.len(), 2);
    }

    #[test]
    fn test_finalize_signs_block() {
        let me = Keypair::from_secret_bytes(&[1u8; 32]).unwrap();
        let proposer = BlockProposer::new(config(), me.clone());
        let previous = Block::genesis(U256::from(2_500_000u64));

        let candidate = proposer
            .build_candidate(
                &previous,
                0,
                round_result_for(&me),
                vec![],
                &StateSnapshot::default(),
                U256::MAX / 16,
                1_000,
            )
            .unwrap();

        let outcome = BlockProposer::mine(
            &candidate,
            Instant::now() + std::time::Duration::from_secs(30),
            &CancellationToken::new(),
        )
        .unwrap();

        let block = proposer.finalize(candidate, outcome.nonce);
        assert!(pow::verify(&block));
        let sig = block.signatures.get(&me.public_key()).unwrap();
        assert!(polaris_crypto::verify_signature(&me.public_key(), &block.hash(), sig).unwrap());
    }
}
