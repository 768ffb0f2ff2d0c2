use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid secret key")]
    InvalidSecretKey,

    #[error("Invalid signature length: expected 64, got {0}")]
    InvalidSignatureLength(usize),

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    #[error("Ed25519 error: {0}")]
    Ed25519(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
