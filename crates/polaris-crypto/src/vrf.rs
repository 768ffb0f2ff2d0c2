//! VRF (Verifiable Random Function) over Ed25519.
//!
//! Construction: the proof is the RFC 8032 deterministic Ed25519 signature
//! over the input, and the output is `SHA256(proof)`. This gives the three
//! VRF guarantees directly:
//!
//! - determinism — Ed25519 signatures are a pure function of `(sk, input)`;
//! - unpredictability — producing the proof requires the secret key;
//! - verifiability — any holder of `pk` verifies the signature and
//!   recomputes the output.
//!
//! All nodes must agree on this suite; changing it is a hard fork.

use crate::keys::{verify_signature, Keypair, PublicKey, SIGNATURE_LEN};
use crate::{sha256, Hash};

/// VRF output hash type (32 bytes).
pub type VrfOutput = Hash;

/// VRF proof: a 64-byte Ed25519 signature over the VRF input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VrfProof([u8; SIGNATURE_LEN]);

impl VrfProof {
    pub fn new(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; SIGNATURE_LEN] {
        self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; SIGNATURE_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

/// Evaluate the VRF for `input`. Returns `(output, proof)`.
pub fn vrf_evaluate(keypair: &Keypair, input: &[u8]) -> (VrfOutput, VrfProof) {
    let proof = keypair.sign(input);
    let output = sha256(&proof);
    (output, VrfProof(proof))
}

/// Verify a VRF output/proof pair against a public key and input.
///
/// Pure and side-effect free. Returns `false` for any malformed or
/// non-matching combination — bad peer input is never an error here.
pub fn vrf_verify(
    public_key: &PublicKey,
    input: &[u8],
    output: &VrfOutput,
    proof: &VrfProof,
) -> bool {
    match verify_signature(public_key, input, proof.as_bytes()) {
        Ok(true) => sha256(proof.as_bytes()) == *output,
        _ => false,
    }
}
