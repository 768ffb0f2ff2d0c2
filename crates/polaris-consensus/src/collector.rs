//! VRF announcement collection for one `(height, round)`.
//!
//! The collector is a synchronous state machine; the engine owns it, feeds
//! it announcements in receipt order, and decides when to close based on
//! the wall clock. `Idle → Collecting → Closed` — transitions are
//! single-writer and a cancelled round simply never admits again.

use std::collections::HashSet;

use polaris_core::{ConsensusConfig, VrfAnnouncement};
use polaris_crypto::{vrf_verify, Hash, PublicKey};
use tracing::debug;

use crate::error::{ConsensusError, Result};
use crate::registry::EligibleSet;
use crate::score::ScoreCalculator;

/// Outcome of a closed collection round.
#[derive(Debug, Clone)]
pub struct RoundResult {
    /// Highest-ranked announcement; its emitter proposes the block.
    pub winner: VrfAnnouncement,
    /// The first X ranked announcements; their emitters share the reward.
    pub top_x: Vec<VrfAnnouncement>,
    /// All valid announcements in rank order.
    pub all_valid: Vec<VrfAnnouncement>,
}

/// Why an announcement was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitReject {
    /// Collector is not in the `Collecting` state.
    NotCollecting,
    /// Emitter is not in the round's eligible super-node set.
    NotEligible,
    /// Announcement round does not match the collector's round.
    WrongRound,
    /// VRF proof does not verify against the round seed.
    InvalidProof,
    /// A valid announcement from this key was already admitted.
    Duplicate,
    /// Announced score disagrees with local recomputation.
    ScoreMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectorState {
    Collecting,
    Closed,
}

pub struct VrfCollector {
    seed: Hash,
    round: u64,
    eligible: EligibleSet,
    epoch_ms: u64,
    quorum: usize,
    top_x: usize,
    score_epsilon: f64,
    calculator: ScoreCalculator,
    /// Admitted announcements in receipt order; scores already recomputed.
    entries: Vec<VrfAnnouncement>,
    seen: HashSet<PublicKey>,
    state: CollectorState,
}

impl VrfCollector {
    pub fn new(
        config: &ConsensusConfig,
        eligible: EligibleSet,
        seed: Hash,
        round: u64,
        epoch_ms: u64,
    ) -> Self {
        Self {
            seed,
            round,
            eligible,
            epoch_ms,
            quorum: config.quorum(),
            top_x: config.rewarded_top_x,
            score_epsilon: config.score_epsilon,
            calculator: ScoreCalculator::new(config),
            entries: Vec::new(),
            seen: HashSet::new(),
            state: CollectorState::Collecting,
        }
    }

    /// Admit one announcement. First-writer-wins on duplicates; the locally
    /// recomputed score replaces the announced one on success.
    pub fn admit(&mut self, mut ann: VrfAnnouncement) -> std::result::Result<(), AdmitReject> {
        if self.state != CollectorState::Collecting {
            return Err(AdmitReject::NotCollecting);
        }
        if ann.round != self.round {
            debug!(got = ann.round, expected = self.round, "announcement for wrong round");
            return Err(AdmitReject::WrongRound);
        }
        let profile = match self.eligible.get(&ann.public_key) {
            Some(p) => *p,
            None => {
                debug!(node = %ann.public_key, "announcement from non-eligible node");
                return Err(AdmitReject::NotEligible);
            }
        };
        if self.seen.contains(&ann.public_key) {
            return Err(AdmitReject::Duplicate);
        }
        if !vrf_verify(&ann.public_key, &self.seed, &ann.vrf_output, &ann.vrf_proof) {
            debug!(node = %ann.public_key, "announcement VRF proof invalid");
            return Err(AdmitReject::InvalidProof);
        }

        let recomputed = self.calculator.score(
            &ann.vrf_output,
            profile.stake,
            self.eligible.average_stake,
            profile.elected_at_ms,
            self.epoch_ms,
            profile.uptime_pct,
        );
        if (recomputed - ann.score).abs() > self.score_epsilon {
            debug!(
                node = %ann.public_key,
                announced = ann.score,
                recomputed,
                "announced score disagrees with recomputation"
            );
            return Err(AdmitReject::ScoreMismatch);
        }
        // Recomputed score takes precedence; the announced one was advisory.
        ann.score = recomputed;

        self.seen.insert(ann.public_key);
        self.entries.push(ann);
        Ok(())
    }

    /// All expected nodes have replied.
    pub fn is_complete(&self) -> bool {
        self.entries.len() == self.eligible.len()
    }

    /// Valid announcements gathered so far.
    pub fn valid_count(&self) -> usize {
        self.entries.len()
    }

    pub fn has_quorum(&self) -> bool {
        self.entries.len() >= self.quorum
    }

    /// Close the round and rank the gathered set.
    ///
    /// Fails with `InsufficientQuorum` when fewer than `⌈(2/3)·N⌉` valid
    /// announcements arrived. Either way the collector stops admitting.
    pub fn close(&mut self) -> Result<RoundResult> {
        self.state = CollectorState::Closed;

        if self.entries.len() < self.quorum {
            return Err(ConsensusError::InsufficientQuorum {
                got: self.entries.len(),
                needed: self.quorum,
            });
        }

        let all_valid = ScoreCalculator::rank(std::mem::take(&mut self.entries));
        let winner = all_valid[0].clone();
        let top_x = ScoreCalculator::select_top_x(&all_valid, self.top_x).to_vec();
        Ok(RoundResult { winner, top_x, all_valid })
    }

    /// Forced close for a round abort: drops everything gathered.
    pub fn abort(&mut self) {
        self.state = CollectorState::Closed;
        self.entries.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeProfile;
    use polaris_core::round_seed;
    use polaris_crypto::{vrf_evaluate, Keypair};

    struct Fixture {
        config: ConsensusConfig,
        keypairs: Vec<Keypair>,
        eligible: EligibleSet,
        seed: Hash,
    }

    fn fixture(n: usize) -> Fixture {
        let mut config = ConsensusConfig::default();
        config.super_node_count = n;
        config.core_node_count = n;
        config.rotate_node_count = 0;
        config.rewarded_top_x = n.min(15);

        let keypairs: Vec<Keypair> =
            (0..n).map(|i| Keypair::from_secret_bytes(&[i as u8 + 1; 32]).unwrap()).collect();

        let profiles = keypairs
            .iter()
            .map(|kp| {
                (
                    kp.public_key(),
                    NodeProfile { stake: 100_000, elected_at_ms: 0, uptime_pct: 100.0 },
                )
            })
            .collect();
        let eligible = EligibleSet { profiles, average_stake: 100_000.0 };
        let seed = round_seed(&[7u8; 32], 0, 1);

        Fixture { config, keypairs, eligible, seed }
    }

    fn announcement(fx: &Fixture, kp: &Keypair) -> VrfAnnouncement {
        let (output, proof) = vrf_evaluate(kp, &fx.seed);
        let calc = ScoreCalculator::new(&fx.config);
        let score = calc.score(&output, 100_000, fx.eligible.average_stake, 0, 0, 100.0);
        VrfAnnouncement {
            round: 0,
            public_key: kp.public_key(),
            vrf_output: output,
            vrf_proof: proof,
            score,
            timestamp: 0,
        }
    }

    fn collector(fx: &Fixture) -> VrfCollector {
        VrfCollector::new(&fx.config, fx.eligible.clone(), fx.seed, 0, 0)
    }

    #[test]
    fn test_admits_valid_announcements_until_complete() {
        let fx = fixture(3);
        let mut coll = collector(&fx);
        for kp in &fx.keypairs {
            coll.admit(announcement(&fx, kp)).unwrap();
        }
        assert!(coll.is_complete());
        assert!(coll.has_quorum());

        let result = coll.close().unwrap();
        assert_eq!(result.all_valid.len(), 3);
        assert_eq!(result.winner.public_key, result.all_valid[0].public_key);
        assert!(ScoreCalculator::is_ranked(&result.all_valid));
        // X = 3 here, so everyone is rewarded, in rank order.
        assert_eq!(result.top_x.len(), 3);
    }

    #[test]
    fn test_duplicate_first_writer_wins() {
        let fx = fixture(3);
        let mut coll = collector(&fx);
        let ann = announcement(&fx, &fx.keypairs[0]);
        coll.admit(ann.clone()).unwrap();
        assert_eq!(coll.admit(ann), Err(AdmitReject::Duplicate));
        assert_eq!(coll.valid_count(), 1);
    }

    #[test]
    fn test_rejects_non_member() {
        let fx = fixture(3);
        let mut coll = collector(&fx);
        let outsider = Keypair::from_secret_bytes(&[99u8; 32]).unwrap();
        let mut ann = announcement(&fx, &fx.keypairs[0]);
        let (output, proof) = vrf_evaluate(&outsider, &fx.seed);
        ann.public_key = outsider.public_key();
        ann.vrf_output = output;
        ann.vrf_proof = proof;
        assert_eq!(coll.admit(ann), Err(AdmitReject::NotEligible));
    }

    #[test]
    fn test_rejects_wrong_round() {
        let fx = fixture(3);
        let mut coll = collector(&fx);
        let mut ann = announcement(&fx, &fx.keypairs[0]);
        ann.round = 5;
        assert_eq!(coll.admit(ann), Err(AdmitReject::WrongRound));
    }

    #[test]
    fn test_rejects_invalid_proof() {
        let fx = fixture(3);
        let mut coll = collector(&fx);
        let mut ann = announcement(&fx, &fx.keypairs[0]);
        ann.vrf_output[0] ^= 0xff;
        assert_eq!(coll.admit(ann), Err(AdmitReject::InvalidProof));
    }

    #[test]
    fn test_rejects_score_mismatch() {
        let fx = fixture(3);
        let mut coll = collector(&fx);
        let mut ann = announcement(&fx, &fx.keypairs[0]);
        ann.score = (ann.score + 0.25).min(1.0);
        assert_eq!(coll.admit(ann), Err(AdmitReject::ScoreMismatch));
    }

    #[test]
    fn test_insufficient_quorum() {
        // N = 50 configured, only 30 arrive; threshold is 34.
        let fx = fixture(50);
        let mut coll = collector(&fx);
        for kp in fx.keypairs.iter().take(30) {
            coll.admit(announcement(&fx, kp)).unwrap();
        }
        assert!(!coll.has_quorum());
        match coll.close() {
            Err(ConsensusError::InsufficientQuorum { got, needed }) => {
                assert_eq!(got, 30);
                assert_eq!(needed, 34);
            }
            other => panic!("expected InsufficientQuorum, got {other:?}"),
        }
    }

    #[test]
    fn test_quorum_without_completion_closes() {
        let fx = fixture(50);
        let mut coll = collector(&fx);
        for kp in fx.keypairs.iter().take(34) {
            coll.admit(announcement(&fx, kp)).unwrap();
        }
        assert!(coll.has_quorum());
        assert!(!coll.is_complete());
        let result = coll.close().unwrap();
        assert_eq!(result.all_valid.len(), 34);
        assert_eq!(result.top_x.len(), 15);
    }

    #[test]
    fn test_no_admission_after_close() {
        let fx = fixture(3);
        let mut coll = collector(&fx);
        for kp in &fx.keypairs {
            coll.admit(announcement(&fx, kp)).unwrap();
        }
        coll.close().unwrap();
        assert_eq!(
            coll.admit(announcement(&fx, &fx.keypairs[0])),
            Err(AdmitReject::NotCollecting)
        );
    }

    #[test]
    fn test_abort_drops_entries() {
        let fx = fixture(3);
        let mut coll = collector(&fx);
        coll.admit(announcement(&fx, &fx.keypairs[0])).unwrap();
        coll.abort();
        assert_eq!(coll.valid_count(), 0);
        assert_eq!(
            coll.admit(announcement(&fx, &fx.keypairs[1])),
            Err(AdmitReject::NotCollecting)
        );
    }
}
