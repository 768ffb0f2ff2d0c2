// Polaris cryptographic primitives.
// Everything in this crate is a pure function or a value type — safe to call
// from any task.

pub mod error;
pub mod hash;
pub mod hex_codec;
pub mod keys;
pub mod merkle;
pub mod vrf;

pub use error::{CryptoError, Result};
pub use hash::{sha256, sha256_concat, Hash};
pub use hex_codec::{from_hex, to_hex};
pub use keys::{verify_signature, Keypair, PublicKey, SIGNATURE_LEN};
pub use merkle::MerkleTree;
pub use vrf::{vrf_evaluate, vrf_verify, VrfOutput, VrfProof};
