use polaris_core::{CoreError, NetworkError, StoreError};
use thiserror::Error;

/// Categorized reason a block failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    Format,
    Timing,
    HeightMismatch,
    PrevHash,
    VrfSetSize,
    VrfProof,
    ProposerMismatch,
    RewardMismatch,
    Merkle,
    Pow,
    Difficulty,
    Signature,
    TxFormat,
    TxSignature,
    TxNonce,
    TxBalance,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectionKind::Format => "format",
            RejectionKind::Timing => "timing",
            RejectionKind::HeightMismatch => "height-mismatch",
            RejectionKind::PrevHash => "prev-hash",
            RejectionKind::VrfSetSize => "vrf-set-size",
            RejectionKind::VrfProof => "vrf-proof",
            RejectionKind::ProposerMismatch => "proposer-mismatch",
            RejectionKind::RewardMismatch => "reward-mismatch",
            RejectionKind::Merkle => "merkle",
            RejectionKind::Pow => "pow",
            RejectionKind::Difficulty => "difficulty",
            RejectionKind::Signature => "signature",
            RejectionKind::TxFormat => "tx-format",
            RejectionKind::TxSignature => "tx-signature",
            RejectionKind::TxNonce => "tx-nonce",
            RejectionKind::TxBalance => "tx-balance",
        };
        write!(f, "{s}")
    }
}

#[derive(Error, Debug)]
pub enum ConsensusError {
    /// A round deadline elapsed. Recovery: increment the round and retry.
    #[error("Consensus timeout during {0}")]
    Timeout(&'static str),

    /// Too few valid VRF announcements to close the round.
    #[error("Insufficient quorum: {got} valid announcements, {needed} required")]
    InsufficientQuorum { got: usize, needed: usize },

    /// A block failed the validation pipeline. The block is dropped and no
    /// state is mutated.
    #[error("Block rejected ({kind}): {detail}")]
    Rejected { kind: RejectionKind, detail: String },

    /// This node was asked to propose but did not win the round.
    #[error("Not the elected proposer for this round")]
    NotProposer,

    #[error("Node not registered: {0}")]
    NodeNotFound(String),

    #[error("Node already registered: {0}")]
    NodeAlreadyRegistered(String),

    #[error("Insufficient stake: provided {provided}, required {required}")]
    InsufficientStake { provided: u128, required: u128 },

    /// Crypto failure on our own key material. Fatal: the node must halt
    /// rather than participate with a broken key.
    #[error("Fatal crypto failure on own key: {0}")]
    FatalCrypto(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("Network failure: {0}")]
    Network(#[from] NetworkError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// An engine ingress channel closed while the engine was running.
    #[error("Engine channel closed")]
    ChannelClosed,
}

impl ConsensusError {
    pub fn rejected(kind: RejectionKind, detail: impl Into<String>) -> Self {
        Self::Rejected { kind, detail: detail.into() }
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
