use std::collections::BTreeMap;

use polaris_crypto::{sha256, sha256_concat, Hash, PublicKey, VrfOutput, VrfProof};
use primitive_types::U256;

use crate::announcement::VrfAnnouncement;
use crate::codec::{put_u16, put_u32, put_u64, put_var_bytes, ByteReader};
use crate::transaction::Transaction;
use crate::{CoreError, Result};

/// Strip a `U256` down to its minimal big-endian byte representation.
/// Zero encodes as a single zero byte so the round-trip stays exact.
pub fn target_to_bytes(target: &U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    target.to_big_endian(&mut buf);
    let start = buf.iter().position(|&b| b != 0).unwrap_or(31);
    buf[start..].to_vec()
}

/// Per-round VRF seed: `SHA256(previous_hash ‖ round_be_u64 ‖ epoch_be_u64)`.
pub fn round_seed(previous_hash: &Hash, round: u64, epoch: u64) -> Hash {
    sha256_concat(&[previous_hash, &round.to_be_bytes(), &epoch.to_be_bytes()])
}

/// An immutable, content-addressed block.
///
/// The block hash is SHA-256 of the canonical encoding with the signature
/// section replaced by an empty one — signatures attest the hash and cannot
/// feed back into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub height: u64,
    pub round: u32,
    pub timestamp: u64,
    pub previous_hash: Hash,
    pub proposer: PublicKey,
    pub vrf_output: VrfOutput,
    pub vrf_proof: VrfProof,
    /// Sorted by descending score, then ascending public-key bytes.
    pub all_vrf_announcements: Vec<VrfAnnouncement>,
    /// Public keys of the first X sorted announcements.
    pub rewarded_nodes: Vec<PublicKey>,
    pub transactions: Vec<Transaction>,
    pub merkle_root: Hash,
    pub nonce: u64,
    pub difficulty_target: U256,
    /// Attestations over the block hash, keyed by signer. The proposer's own
    /// entry is mandatory for acceptance.
    pub signatures: BTreeMap<PublicKey, [u8; 64]>,
}

impl Block {
    /// Canonical encoding per the wire contract. With
    /// `include_signatures = false` the signature section is written as
    /// `sig_count = 0`, which is the hashing form.
    pub fn canonical_encoding(&self, include_signatures: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1024);
        put_u64(&mut buf, self.height);
        put_u32(&mut buf, self.round);
        put_u64(&mut buf, self.timestamp);
        buf.extend_from_slice(&self.previous_hash);
        put_var_bytes(&mut buf, self.proposer.as_bytes());
        buf.extend_from_slice(&self.vrf_output);
        buf.extend_from_slice(self.vrf_proof.as_bytes());

        put_u32(&mut buf, self.all_vrf_announcements.len() as u32);
        for ann in &self.all_vrf_announcements {
            ann.encode_for_block(&mut buf);
        }

        put_u32(&mut buf, self.rewarded_nodes.len() as u32);
        for pk in &self.rewarded_nodes {
            put_var_bytes(&mut buf, pk.as_bytes());
        }

        put_u32(&mut buf, self.transactions.len() as u32);
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.encode());
        }

        put_u64(&mut buf, self.nonce);
        let target_bytes = target_to_bytes(&self.difficulty_target);
        put_u16(&mut buf, target_bytes.len() as u16);
        buf.extend_from_slice(&target_bytes);

        if include_signatures {
            put_u32(&mut buf, self.signatures.len() as u32);
            for (pk, sig) in &self.signatures {
                put_var_bytes(&mut buf, pk.as_bytes());
                buf.extend_from_slice(sig);
            }
        } else {
            put_u32(&mut buf, 0);
        }
        buf
    }

    /// Full wire encoding, signatures included.
    pub fn encode(&self) -> Vec<u8> {
        self.canonical_encoding(true)
    }

    /// Decode a block from its wire encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);

        let height = r.read_u64()?;
        let round = r.read_u32()?;
        let timestamp = r.read_u64()?;
        let previous_hash = r.read_hash()?;
        let proposer = PublicKey::from_slice(r.read_var_bytes()?)
            .map_err(|_| CoreError::Decode("bad proposer key".into()))?;
        let vrf_output = r.read_hash()?;
        let vrf_proof = VrfProof::new(r.read_signature()?);

        let ann_count = r.read_u32()? as usize;
        let mut all_vrf_announcements = Vec::with_capacity(ann_count.min(1024));
        for _ in 0..ann_count {
            all_vrf_announcements.push(VrfAnnouncement::decode_from_block(&mut r)?);
        }

        let rewarded_count = r.read_u32()? as usize;
        let mut rewarded_nodes = Vec::with_capacity(rewarded_count.min(1024));
        for _ in 0..rewarded_count {
            rewarded_nodes.push(
                PublicKey::from_slice(r.read_var_bytes()?)
                    .map_err(|_| CoreError::Decode("bad rewarded key".into()))?,
            );
        }

        let tx_count = r.read_u32()? as usize;
        let mut transactions = Vec::with_capacity(tx_count.min(4096));
        for _ in 0..tx_count {
            transactions.push(Transaction::decode(&mut r)?);
        }

        let nonce = r.read_u64()?;
        let target_bytes = r.read_var_bytes()?;
        if target_bytes.len() > 32 {
            return Err(CoreError::Decode("difficulty target wider than 256 bits".into()));
        }
        let difficulty_target = U256::from_big_endian(target_bytes);

        let sig_count = r.read_u32()? as usize;
        let mut signatures = BTreeMap::new();
        for _ in 0..sig_count {
            let pk = PublicKey::from_slice(r.read_var_bytes()?)
                .map_err(|_| CoreError::Decode("bad signer key".into()))?;
            let sig = r.read_signature()?;
            signatures.insert(pk, sig);
        }

        if !r.is_empty() {
            return Err(CoreError::Decode("trailing bytes after block".into()));
        }

        // Merkle root is not carried on the wire separately from the
        // transactions; recompute it so the decoded value round-trips.
        let merkle_root = Self::merkle_root_of(&transactions);

        Ok(Self {
            height,
            round,
            timestamp,
            previous_hash,
            proposer,
            vrf_output,
            vrf_proof,
            all_vrf_announcements,
            rewarded_nodes,
            transactions,
            merkle_root,
            nonce,
            difficulty_target,
            signatures,
        })
    }

    /// SHA-256 Merkle root over transaction hashes; empty set = zero root.
    pub fn merkle_root_of(transactions: &[Transaction]) -> Hash {
        let leaves: Vec<Hash> = transactions.iter().map(|tx| tx.hash()).collect();
        polaris_crypto::MerkleTree::new(leaves).root()
    }

    /// Block hash: canonical encoding with an empty signature section.
    pub fn hash(&self) -> Hash {
        sha256(&self.canonical_encoding(false))
    }

    /// Size of the serialized block in bytes.
    pub fn encoded_size(&self) -> usize {
        self.encode().len()
    }

    /// The deterministic genesis block for a given base difficulty.
    pub fn genesis(base_difficulty: U256) -> Self {
        Self {
            height: 0,
            round: 0,
            timestamp: 0,
            previous_hash: [0u8; 32],
            proposer: PublicKey::new([0u8; 32]),
            vrf_output: [0u8; 32],
            vrf_proof: VrfProof::new([0u8; 64]),
            all_vrf_announcements: vec![],
            rewarded_nodes: vec![],
            transactions: vec![],
            merkle_root: [0u8; 32],
            nonce: 0,
            difficulty_target: base_difficulty,
            signatures: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polaris_crypto::{vrf_evaluate, Keypair};

    fn sample_block() -> Block {
        let kp = Keypair::from_secret_bytes(&[1u8; 32]).unwrap();
        let seed = round_seed(&[9u8; 32], 0, 1);
        let (output, proof) = vrf_evaluate(&kp, &seed);
        let ann = VrfAnnouncement {
            round: 0,
            public_key: kp.public_key(),
            vrf_output: output,
            vrf_proof: proof,
            score: 0.75,
            timestamp: 1_700_000_000_000,
        };
        let tx = Transaction::new_signed(
            &kp,
            Keypair::from_secret_bytes(&[2u8; 32]).unwrap().public_key(),
            10,
            1,
            0,
            1_700_000_000_000,
        );
        let merkle_root = Block::merkle_root_of(std::slice::from_ref(&tx));
        let mut block = Block {
            height: 1,
            round: 0,
            timestamp: 1_700_000_000_500,
            previous_hash: [9u8; 32],
            proposer: kp.public_key(),
            vrf_output: output,
            vrf_proof: proof,
            all_vrf_announcements: vec![ann],
            rewarded_nodes: vec![kp.public_key()],
            transactions: vec![tx],
            merkle_root,
            nonce: 42,
            difficulty_target: U256::from(2_500_000u64),
            signatures: BTreeMap::new(),
        };
        let sig = kp.sign(&block.hash());
        block.signatures.insert(kp.public_key(), sig);
        block
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let block = sample_block();
        let decoded = Block::decode(&block.encode()).unwrap();
        assert_eq!(block, decoded);
    }

    #[test]
    fn test_hash_excludes_signatures() {
        let mut block = sample_block();
        let hash_before = block.hash();
        let extra = Keypair::from_secret_bytes(&[7u8; 32]).unwrap();
        block.signatures.insert(extra.public_key(), extra.sign(&hash_before));
        assert_eq!(block.hash(), hash_before);
    }

    #[test]
    fn test_hash_changes_with_nonce() {
        let mut block = sample_block();
        let h1 = block.hash();
        block.nonce += 1;
        assert_ne!(block.hash(), h1);
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let g1 = Block::genesis(U256::from(2_500_000u64));
        let g2 = Block::genesis(U256::from(2_500_000u64));
        assert_eq!(g1.hash(), g2.hash());
        assert_eq!(g1.height, 0);
        assert_eq!(g1.previous_hash, [0u8; 32]);
        assert_eq!(g1.nonce, 0);
    }

    #[test]
    fn test_target_bytes_minimal() {
        assert_eq!(target_to_bytes(&U256::from(2_500_000u64)), vec![0x26, 0x25, 0xa0]);
        assert_eq!(target_to_bytes(&U256::zero()), vec![0x00]);
        assert_eq!(target_to_bytes(&U256::from(1u64)), vec![0x01]);
    }

    #[test]
    fn test_round_seed_depends_on_all_inputs() {
        let base = round_seed(&[0u8; 32], 0, 1);
        assert_ne!(base, round_seed(&[0u8; 32], 1, 1));
        assert_ne!(base, round_seed(&[0u8; 32], 0, 2));
        assert_ne!(base, round_seed(&[1u8; 32], 0, 1));
    }
}
