//! Score calculation and ranking.
//!
//! `score = s_vrf · √w_stake · f_decay · f_perf`, clamped into [0, 1].
//! Every factor is a pure function of values all honest nodes share, so the
//! same announcement scores identically everywhere. Ranking ties are broken
//! by ascending public-key bytes — the tie-break is a safety requirement,
//! not cosmetics.

use polaris_core::{ConsensusConfig, VrfAnnouncement};
use polaris_crypto::{PublicKey, VrfOutput};

const MS_PER_DAY: f64 = 86_400_000.0;

/// Stateless score calculator configured once at boot.
#[derive(Debug, Clone)]
pub struct ScoreCalculator {
    decay_days: u64,
}

impl ScoreCalculator {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self { decay_days: config.decay_days }
    }

    /// VRF output as a big-endian fraction of the full 256-bit space.
    ///
    /// Only the leading 128 bits feed the conversion — already past f64
    /// precision, and identical on every node.
    pub fn vrf_fraction(output: &VrfOutput) -> f64 {
        let mut high = [0u8; 16];
        high.copy_from_slice(&output[..16]);
        u128::from_be_bytes(high) as f64 / 2f64.powi(128)
    }

    /// `min(stake / (2·average_stake), 1)`.
    pub fn stake_weight(stake: u128, average_stake: f64) -> f64 {
        if average_stake <= 0.0 {
            return 0.0;
        }
        (stake as f64 / (2.0 * average_stake)).min(1.0)
    }

    /// Election-age decay: 1.0 right after election, falling linearly to a
    /// floor of 0.5 over `decay_days`.
    pub fn decay_factor(&self, elected_at_ms: u64, epoch_ms: u64) -> f64 {
        if self.decay_days == 0 {
            return 1.0;
        }
        let age_days = epoch_ms.saturating_sub(elected_at_ms) as f64 / MS_PER_DAY;
        (1.0 - 0.5 * (age_days / self.decay_days as f64)).clamp(0.5, 1.0)
    }

    /// Uptime factor: linear in reported uptime, 100% → 1.0, 70% → 0.7,
    /// clamped to [0.7, 1.0].
    pub fn performance_factor(uptime_pct: f64) -> f64 {
        (uptime_pct / 100.0).clamp(0.7, 1.0)
    }

    /// Composite score for one announcement.
    ///
    /// `epoch_ms` is the epoch start time of the round being scored — using
    /// epoch time rather than local wall time keeps the decay factor
    /// identical on all nodes cross-checking the same announcement.
    pub fn score(
        &self,
        vrf_output: &VrfOutput,
        stake: u128,
        average_stake: f64,
        elected_at_ms: u64,
        epoch_ms: u64,
        uptime_pct: f64,
    ) -> f64 {
        let s_vrf = Self::vrf_fraction(vrf_output);
        let w_stake = Self::stake_weight(stake, average_stake);
        let f_decay = self.decay_factor(elected_at_ms, epoch_ms);
        let f_perf = Self::performance_factor(uptime_pct);
        (s_vrf * w_stake.sqrt() * f_decay * f_perf).clamp(0.0, 1.0)
    }

    /// Sort announcements by `(−score, public_key_bytes)`.
    pub fn rank(mut announcements: Vec<VrfAnnouncement>) -> Vec<VrfAnnouncement> {
        announcements.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.public_key.cmp(&b.public_key))
        });
        announcements
    }

    /// Check that a list is already in `(−score, pk)` order.
    pub fn is_ranked(announcements: &[VrfAnnouncement]) -> bool {
        announcements.windows(2).all(|w| {
            w[0].score
                .total_cmp(&w[1].score)
                .then_with(|| w[1].public_key.cmp(&w[0].public_key))
                .is_ge()
        })
    }

    /// The proposer is the head of the ranked list.
    pub fn select_proposer(sorted: &[VrfAnnouncement]) -> Option<&VrfAnnouncement> {
        sorted.first()
    }

    /// The first X ranked entries receive the block reward.
    pub fn select_top_x(sorted: &[VrfAnnouncement], x: usize) -> &[VrfAnnouncement] {
        &sorted[..x.min(sorted.len())]
    }

    pub fn is_top_x(pk: &PublicKey, sorted: &[VrfAnnouncement], x: usize) -> bool {
        Self::select_top_x(sorted, x).iter().any(|a| a.public_key == *pk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polaris_crypto::VrfProof;

    fn ann(pk_byte: u8, score: f64) -> VrfAnnouncement {
        VrfAnnouncement {
            round: 0,
            public_key: PublicKey::new([pk_byte; 32]),
            vrf_output: [pk_byte; 32],
            vrf_proof: VrfProof::new([0u8; 64]),
            score,
            timestamp: 0,
        }
    }

    fn calculator() -> ScoreCalculator {
        ScoreCalculator::new(&ConsensusConfig::default())
    }

    #[test]
    fn test_vrf_fraction_bounds() {
        assert_eq!(ScoreCalculator::vrf_fraction(&[0u8; 32]), 0.0);
        let max = ScoreCalculator::vrf_fraction(&[0xff; 32]);
        assert!(max > 0.999 && max <= 1.0);
    }

    #[test]
    fn test_stake_weight_saturates() {
        // Zero stake scores zero.
        assert_eq!(ScoreCalculator::stake_weight(0, 100_000.0), 0.0);
        // Equal to average: half weight.
        assert_eq!(ScoreCalculator::stake_weight(100_000, 100_000.0), 0.5);
        // At or above 2x average: saturates at 1.
        assert_eq!(ScoreCalculator::stake_weight(200_000, 100_000.0), 1.0);
        assert_eq!(ScoreCalculator::stake_weight(1_000_000, 100_000.0), 1.0);
        // Degenerate average.
        assert_eq!(ScoreCalculator::stake_weight(100, 0.0), 0.0);
    }

    #[test]
    fn test_decay_factor_curve() {
        let calc = calculator(); // 30-day decay
        let day = MS_PER_DAY as u64;
        // Fresh election: no decay.
        assert_eq!(calc.decay_factor(1_000, 1_000), 1.0);
        // Halfway through the window: 1.0 - 0.25.
        let f = calc.decay_factor(0, 15 * day);
        assert!((f - 0.75).abs() < 1e-9);
        // Past the window: floored at 0.5.
        assert_eq!(calc.decay_factor(0, 90 * day), 0.5);
    }

    #[test]
    fn test_performance_factor() {
        assert_eq!(ScoreCalculator::performance_factor(100.0), 1.0);
        assert!((ScoreCalculator::performance_factor(85.0) - 0.85).abs() < 1e-12);
        assert_eq!(ScoreCalculator::performance_factor(70.0), 0.7);
        // Below 70% clamps to the floor, above 100% to the ceiling.
        assert_eq!(ScoreCalculator::performance_factor(10.0), 0.7);
        assert_eq!(ScoreCalculator::performance_factor(150.0), 1.0);
    }

    #[test]
    fn test_zero_stake_zeroes_score() {
        let calc = calculator();
        let score = calc.score(&[0xff; 32], 0, 100_000.0, 0, 0, 100.0);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_score_within_unit_interval() {
        let calc = calculator();
        let score = calc.score(&[0xff; 32], u128::MAX, 1.0, 0, 0, 100.0);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_rank_orders_by_score_descending() {
        let ranked = ScoreCalculator::rank(vec![ann(3, 0.55), ann(1, 0.82), ann(2, 0.64)]);
        let scores: Vec<f64> = ranked.iter().map(|a| a.score).collect();
        assert_eq!(scores, vec![0.82, 0.64, 0.55]);
        assert_eq!(ranked[0].public_key, PublicKey::new([1u8; 32]));
    }

    #[test]
    fn test_tie_break_by_public_key() {
        // Equal scores: the lexicographically smaller key wins.
        let ranked = ScoreCalculator::rank(vec![ann(2, 0.50), ann(1, 0.50)]);
        assert_eq!(ranked[0].public_key, PublicKey::new([1u8; 32]));
        assert_eq!(ranked[1].public_key, PublicKey::new([2u8; 32]));
        assert!(ScoreCalculator::is_ranked(&ranked));
    }

    #[test]
    fn test_select_proposer_and_top_x() {
        let ranked = ScoreCalculator::rank(vec![ann(1, 0.82), ann(2, 0.64), ann(3, 0.55)]);
        let proposer = ScoreCalculator::select_proposer(&ranked).unwrap();
        assert_eq!(proposer.public_key, PublicKey::new([1u8; 32]));

        let top = ScoreCalculator::select_top_x(&ranked, 2);
        assert_eq!(top.len(), 2);
        assert!(ScoreCalculator::is_top_x(&PublicKey::new([2u8; 32]), &ranked, 2));
        assert!(!ScoreCalculator::is_top_x(&PublicKey::new([3u8; 32]), &ranked, 2));

        // X larger than the set is truncated, not an error.
        assert_eq!(ScoreCalculator::select_top_x(&ranked, 10).len(), 3);
    }

    #[test]
    fn test_is_ranked_detects_disorder() {
        assert!(!ScoreCalculator::is_ranked(&[ann(1, 0.2), ann(2, 0.9)]));
        assert!(!ScoreCalculator::is_ranked(&[ann(2, 0.5), ann(1, 0.5)]));
    }
}
