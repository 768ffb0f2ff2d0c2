// Polaris consensus core.
//
// Stateless components (score, collector, difficulty, PoW, proposer,
// validator) composed by one stateful engine. No component holds a
// back-reference; the engine orchestrates.

pub mod collector;
pub mod difficulty;
pub mod engine;
pub mod error;
pub mod pow;
pub mod proposer;
pub mod registry;
pub mod score;
pub mod validator;

pub use collector::{AdmitReject, RoundResult, VrfCollector};
pub use difficulty::DifficultyCalculator;
pub use engine::{
    ingress_channel, now_ms, ConsensusEngine, IngressReceiver, IngressSender, RetryReason,
    RoundOutcome,
};
pub use error::{ConsensusError, RejectionKind, Result};
pub use pow::{MiningOutcome, MiningParams};
pub use proposer::{BlockProposer, CandidateBlock};
pub use registry::{EligibleSet, NodeProfile, NodeRole, SuperNode, SuperNodeRegistry};
pub use score::ScoreCalculator;
pub use validator::{expected_target, BlockValidator, ValidationContext, ValidationMode};
