use polaris_crypto::{verify_signature, Keypair, PublicKey, VrfOutput, VrfProof};

use crate::codec::{put_f64, put_u64, put_var_bytes, ByteReader};
use crate::{CoreError, Result};

/// A node's VRF contribution for one `(height, round)`.
///
/// `timestamp` is the local wall time at receipt, used only for expiry. It
/// is not part of the signed content and every node records its own value.
#[derive(Debug, Clone, PartialEq)]
pub struct VrfAnnouncement {
    pub round: u64,
    pub public_key: PublicKey,
    pub vrf_output: VrfOutput,
    pub vrf_proof: VrfProof,
    pub score: f64,
    pub timestamp: u64,
}

impl VrfAnnouncement {
    /// Encoding of one announcement as embedded in a block:
    /// `round(8) ‖ pk(lp u16) ‖ out(32) ‖ proof(64) ‖ score(f64) ‖ ts(8)`.
    pub fn encode_for_block(&self, buf: &mut Vec<u8>) {
        put_u64(buf, self.round);
        put_var_bytes(buf, self.public_key.as_bytes());
        buf.extend_from_slice(&self.vrf_output);
        buf.extend_from_slice(self.vrf_proof.as_bytes());
        put_f64(buf, self.score);
        put_u64(buf, self.timestamp);
    }

    pub fn decode_from_block(reader: &mut ByteReader<'_>) -> Result<Self> {
        let round = reader.read_u64()?;
        let public_key = PublicKey::from_slice(reader.read_var_bytes()?)
            .map_err(|_| CoreError::Decode("bad announcement key".into()))?;
        let vrf_output = reader.read_hash()?;
        let vrf_proof = VrfProof::new(reader.read_signature()?);
        let score = reader.read_f64()?;
        let timestamp = reader.read_u64()?;
        Ok(Self { round, public_key, vrf_output, vrf_proof, score, timestamp })
    }
}

/// Gossip envelope: an announcement plus the announcer's signature.
///
/// Wire format: `round(8) ‖ pk(lp) ‖ vrf_output(32) ‖ vrf_proof(64) ‖
/// score(f64 BE) ‖ announcer_signature(64)`. The signature covers all prior
/// bytes. The receipt timestamp is assigned by the receiver, not carried on
/// the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedAnnouncement {
    pub announcement: VrfAnnouncement,
    pub signature: [u8; 64],
}

impl SignedAnnouncement {
    /// Sign an announcement for gossip.
    pub fn new(keypair: &Keypair, announcement: VrfAnnouncement) -> Self {
        let signature = keypair.sign(&Self::signing_bytes(&announcement));
        Self { announcement, signature }
    }

    fn signing_bytes(a: &VrfAnnouncement) -> Vec<u8> {
        let mut buf = Vec::with_capacity(150);
        put_u64(&mut buf, a.round);
        put_var_bytes(&mut buf, a.public_key.as_bytes());
        buf.extend_from_slice(&a.vrf_output);
        buf.extend_from_slice(a.vrf_proof.as_bytes());
        put_f64(&mut buf, a.score);
        buf
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Self::signing_bytes(&self.announcement);
        buf.extend_from_slice(&self.signature);
        buf
    }

    /// Decode from the wire, stamping the receiver's wall time.
    pub fn decode(bytes: &[u8], received_at_ms: u64) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let round = reader.read_u64()?;
        let public_key = PublicKey::from_slice(reader.read_var_bytes()?)
            .map_err(|_| CoreError::Decode("bad announcer key".into()))?;
        let vrf_output = reader.read_hash()?;
        let vrf_proof = VrfProof::new(reader.read_signature()?);
        let score = reader.read_f64()?;
        let signature = reader.read_signature()?;
        if !reader.is_empty() {
            return Err(CoreError::Decode("trailing bytes after announcement".into()));
        }
        Ok(Self {
            announcement: VrfAnnouncement {
                round,
                public_key,
                vrf_output,
                vrf_proof,
                score,
                timestamp: received_at_ms,
            },
            signature,
        })
    }

    /// Verify the announcer's signature over the wire content.
    pub fn verify(&self) -> bool {
        verify_signature(
            &self.announcement.public_key,
            &Self::signing_bytes(&self.announcement),
            &self.signature,
        )
        .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polaris_crypto::vrf_evaluate;

    fn announcement(kp: &Keypair, round: u64) -> VrfAnnouncement {
        let (output, proof) = vrf_evaluate(kp, b"test seed");
        VrfAnnouncement {
            round,
            public_key: kp.public_key(),
            vrf_output: output,
            vrf_proof: proof,
            score: 0.5,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_signed_round_trip() {
        let kp = Keypair::from_secret_bytes(&[1u8; 32]).unwrap();
        let signed = SignedAnnouncement::new(&kp, announcement(&kp, 3));
        let bytes = signed.encode();
        let decoded = SignedAnnouncement::decode(&bytes, 1_700_000_000_000).unwrap();
        assert_eq!(signed, decoded);
        assert!(decoded.verify());
    }

    #[test]
    fn test_tampered_score_fails() {
        let kp = Keypair::from_secret_bytes(&[2u8; 32]).unwrap();
        let mut signed = SignedAnnouncement::new(&kp, announcement(&kp, 0));
        signed.announcement.score = 0.999;
        assert!(!signed.verify());
    }

    #[test]
    fn test_block_embedding_round_trip() {
        let kp = Keypair::from_secret_bytes(&[3u8; 32]).unwrap();
        let ann = announcement(&kp, 1);
        let mut buf = Vec::new();
        ann.encode_for_block(&mut buf);
        let mut reader = ByteReader::new(&buf);
        let decoded = VrfAnnouncement::decode_from_block(&mut reader).unwrap();
        assert_eq!(ann, decoded);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let kp = Keypair::from_secret_bytes(&[4u8; 32]).unwrap();
        let mut bytes = SignedAnnouncement::new(&kp, announcement(&kp, 0)).encode();
        bytes.push(0);
        assert!(SignedAnnouncement::decode(&bytes, 0).is_err());
    }
}
