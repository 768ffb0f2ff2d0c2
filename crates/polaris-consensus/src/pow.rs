//! Lightweight Proof-of-Work engine.
//!
//! Not a mining competition — an anti-spam cost amplifier. The proposer
//! scans nonces from zero and the first (therefore smallest) nonce whose
//! preimage hash falls strictly below the target wins. Verification is a
//! pure recomputation from the block's own fields.

use std::time::{Duration, Instant};

use polaris_core::{codec::put_var_bytes, target_to_bytes, Block};
use polaris_crypto::{sha256, Hash, PublicKey};
use primitive_types::U256;
use tokio_util::sync::CancellationToken;

use crate::error::{ConsensusError, Result};

/// Header fields bound into the PoW preimage. Fixed before mining starts;
/// only the nonce varies across attempts.
#[derive(Debug, Clone)]
pub struct MiningParams {
    pub height: u64,
    pub round: u32,
    pub timestamp: u64,
    pub previous_hash: Hash,
    pub proposer: PublicKey,
    pub vrf_output: Hash,
    pub merkle_root: Hash,
    pub difficulty_target: U256,
}

impl MiningParams {
    pub fn for_block(block: &Block) -> Self {
        Self {
            height: block.height,
            round: block.round,
            timestamp: block.timestamp,
            previous_hash: block.previous_hash,
            proposer: block.proposer,
            vrf_output: block.vrf_output,
            merkle_root: block.merkle_root,
            difficulty_target: block.difficulty_target,
        }
    }

    /// All preimage bytes before the nonce:
    /// `height(8) ‖ round(4) ‖ timestamp(8) ‖ previous_hash(32) ‖
    /// proposer(lp) ‖ vrf_output(32) ‖ merkle_root(32)`.
    fn preimage_prefix(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(&self.round.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.previous_hash);
        put_var_bytes(&mut buf, self.proposer.as_bytes());
        buf.extend_from_slice(&self.vrf_output);
        buf.extend_from_slice(&self.merkle_root);
        buf
    }
}

/// The full preimage hash for one nonce attempt.
pub fn pow_hash(params: &MiningParams, nonce: u64) -> Hash {
    let mut buf = params.preimage_prefix();
    buf.extend_from_slice(&nonce.to_be_bytes());
    buf.extend_from_slice(&target_to_bytes(&params.difficulty_target));
    sha256(&buf)
}

/// Strict inequality: a hash exactly equal to the target is rejected.
pub fn hash_meets_target(hash: &Hash, target: &U256) -> bool {
    U256::from_big_endian(hash) < *target
}

/// Result of a successful mining run.
#[derive(Debug, Clone)]
pub struct MiningOutcome {
    pub nonce: u64,
    pub hash: Hash,
    pub attempts: u64,
    pub elapsed: Duration,
}

/// Mine a nonce satisfying `pow_hash < target`.
///
/// Scans nonces from 0 upward, so the returned nonce is the smallest
/// accepting one in the explored space. Cancellation and the deadline are
/// observed on every iteration — the caller gets control back within one
/// hash attempt. CPU-bound: run on a blocking worker.
pub fn mine(
    params: &MiningParams,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<MiningOutcome> {
    let started = Instant::now();
    let prefix = params.preimage_prefix();
    let target_bytes = target_to_bytes(&params.difficulty_target);

    let mut buf = Vec::with_capacity(prefix.len() + 8 + target_bytes.len());
    for nonce in 0u64.. {
        if cancel.is_cancelled() {
            return Err(ConsensusError::Timeout("mining cancelled"));
        }
        if Instant::now() >= deadline {
            return Err(ConsensusError::Timeout("mining deadline"));
        }

        buf.clear();
        buf.extend_from_slice(&prefix);
        buf.extend_from_slice(&nonce.to_be_bytes());
        buf.extend_from_slice(&target_bytes);
        let hash = sha256(&buf);

        if hash_meets_target(&hash, &params.difficulty_target) {
            return Ok(MiningOutcome {
                nonce,
                hash,
                attempts: nonce + 1,
                elapsed: started.elapsed(),
            });
        }
    }
    // The u64 nonce space cannot be exhausted within any realistic deadline.
    Err(ConsensusError::Timeout("nonce space exhausted"))
}

/// Verify the PoW of a received block. Deterministic and side-effect free.
pub fn verify(block: &Block) -> bool {
    let params = MiningParams::for_block(block);
    let hash = pow_hash(&params, block.nonce);
    hash_meets_target(&hash, &block.difficulty_target)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A target high enough that a few thousand attempts always succeed.
    fn easy_target() -> U256 {
        U256::MAX / 16
    }

    fn params(target: U256) -> MiningParams {
        MiningParams {
            height: 1,
            round: 0,
            timestamp: 1_700_000_000_000,
            previous_hash: [1u8; 32],
            proposer: PublicKey::new([2u8; 32]),
            vrf_output: [3u8; 32],
            merkle_root: [0u8; 32],
            difficulty_target: target,
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[test]
    fn test_mine_finds_smallest_nonce() {
        let p = params(easy_target());
        let outcome = mine(&p, far_deadline(), &CancellationToken::new()).unwrap();
        assert!(hash_meets_target(&outcome.hash, &p.difficulty_target));
        // Every nonce below the returned one must fail the target.
        for nonce in 0..outcome.nonce {
            assert!(!hash_meets_target(&pow_hash(&p, nonce), &p.difficulty_target));
        }
    }

    #[test]
    fn test_mine_is_deterministic() {
        let p = params(easy_target());
        let cancel = CancellationToken::new();
        let a = mine(&p, far_deadline(), &cancel).unwrap();
        let b = mine(&p, far_deadline(), &cancel).unwrap();
        assert_eq!(a.nonce, b.nonce);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_cancellation_stops_mining() {
        // Target of 1 is unreachable in practice; cancellation must exit.
        let p = params(U256::one());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = mine(&p, far_deadline(), &cancel);
        assert!(matches!(err, Err(ConsensusError::Timeout(_))));
    }

    #[test]
    fn test_deadline_stops_mining() {
        let p = params(U256::one());
        let deadline = Instant::now() + Duration::from_millis(30);
        let err = mine(&p, deadline, &CancellationToken::new());
        assert!(matches!(err, Err(ConsensusError::Timeout(_))));
    }

    #[test]
    fn test_hash_equal_to_target_rejected() {
        let hash = [5u8; 32];
        let target = U256::from_big_endian(&hash);
        assert!(!hash_meets_target(&hash, &target));
        assert!(hash_meets_target(&hash, &(target + 1)));
    }

    #[test]
    fn test_verify_matches_mining() {
        let p = params(easy_target());
        let outcome = mine(&p, far_deadline(), &CancellationToken::new()).unwrap();

        let mut block = Block::genesis(p.difficulty_target);
        block.height = p.height;
        block.round = p.round;
        block.timestamp = p.timestamp;
        block.previous_hash = p.previous_hash;
        block.proposer = p.proposer;
        block.vrf_output = p.vrf_output;
        block.merkle_root = p.merkle_root;
        block.nonce = outcome.nonce;
        assert!(verify(&block));

        // A wrong nonce (with overwhelming probability) fails verification.
        block.nonce = outcome.nonce + 1;
        let params_check = MiningParams::for_block(&block);
        let rehash = pow_hash(&params_check, block.nonce);
        assert_eq!(verify(&block), hash_meets_target(&rehash, &block.difficulty_target));
    }

    #[test]
    fn test_nonce_zero_fails_hard_target() {
        // A block claiming nonce = 0 against a target of 1 cannot satisfy
        // the strict inequality.
        let mut block = Block::genesis(U256::one());
        block.height = 1;
        block.nonce = 0;
        assert!(!verify(&block));
    }
}
