use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid announcement: {0}")]
    InvalidAnnouncement(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Mempool full: capacity {0}")]
    MempoolFull(usize),

    #[error("Duplicate transaction")]
    DuplicateTransaction,

    #[error("Crypto error: {0}")]
    Crypto(#[from] polaris_crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
