//! Ed25519 keys and signatures.
//!
//! Signatures are deterministic per RFC 8032, which the VRF construction in
//! [`crate::vrf`] relies on. Verification uses `verify_strict` so that
//! malleable or mixed-order signatures are rejected uniformly on every node.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{CryptoError, Result};

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// A 32-byte Ed25519 public key in its encoded (compressed point) form.
///
/// Provides type safety over raw `[u8; 32]` arrays. The derived `Ord` is
/// plain byte-lexicographic order — consensus tie-breaking depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn into_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Parse from a byte slice, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(arr))
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Ed25519 keypair for signing and VRF evaluation.
///
/// The secret key material lives inside `ed25519_dalek::SigningKey`, which
/// zeroizes itself on drop.
pub struct Keypair {
    signing_key: SigningKey,
    public_key: PublicKey,
}

impl Keypair {
    /// Generate a new random keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let public_key = PublicKey(signing_key.verifying_key().to_bytes());
        Self { signing_key, public_key }
    }

    /// Reconstruct a keypair from the 32-byte secret seed.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let seed: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidSecretKey)?;
        let signing_key = SigningKey::from_bytes(&seed);
        let public_key = PublicKey(signing_key.verifying_key().to_bytes());
        Ok(Self { signing_key, public_key })
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Sign a message. Deterministic: same `(key, msg)` always yields the
    /// same 64 bytes.
    pub fn sign(&self, msg: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(msg).to_bytes()
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
            public_key: self.public_key,
        }
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secret material.
        f.debug_struct("Keypair").field("public_key", &self.public_key).finish()
    }
}

/// Verify an Ed25519 signature against a message and public key.
///
/// Returns `Ok(false)` for a well-formed but non-matching signature, and
/// `Err` only when the public key itself cannot be decoded.
pub fn verify_signature(
    public_key: &PublicKey,
    msg: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let sig_bytes: [u8; SIGNATURE_LEN] = signature
        .try_into()
        .map_err(|_| CryptoError::InvalidSignatureLength(signature.len()))?;

    let verifying_key = VerifyingKey::from_bytes(public_key.as_bytes())
        .map_err(|_| CryptoError::InvalidPublicKey)?;

    let sig = Signature::from_bytes(&sig_bytes);
    Ok(verifying_key.verify_strict(msg, &sig).is_ok())
}
