use polaris_crypto::{sha256, verify_signature, Hash, Keypair, PublicKey};

use crate::codec::{put_u64, put_var_bytes, ByteReader};
use crate::{CoreError, Result};

/// A value transfer between two accounts.
///
/// The canonical encoding is
/// `sender(lp u16) ‖ recipient(lp u16) ‖ amount(8) ‖ fee(8) ‖ nonce(8) ‖
/// timestamp(8) ‖ signature(64)`, big-endian. The signature covers all
/// prior bytes; the transaction hash is SHA-256 of the full encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub sender: PublicKey,
    pub recipient: PublicKey,
    pub amount: u64,
    pub fee: u64,
    pub nonce: u64,
    pub timestamp: u64,
    pub signature: [u8; 64],
}

impl Transaction {
    /// Build and sign a transaction in one step.
    pub fn new_signed(
        keypair: &Keypair,
        recipient: PublicKey,
        amount: u64,
        fee: u64,
        nonce: u64,
        timestamp: u64,
    ) -> Self {
        let mut tx = Self {
            sender: keypair.public_key(),
            recipient,
            amount,
            fee,
            nonce,
            timestamp,
            signature: [0u8; 64],
        };
        tx.signature = keypair.sign(&tx.signing_bytes());
        tx
    }

    /// The bytes the sender signs: everything except the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(100);
        put_var_bytes(&mut buf, self.sender.as_bytes());
        put_var_bytes(&mut buf, self.recipient.as_bytes());
        put_u64(&mut buf, self.amount);
        put_u64(&mut buf, self.fee);
        put_u64(&mut buf, self.nonce);
        put_u64(&mut buf, self.timestamp);
        buf
    }

    /// Full canonical encoding (signing bytes plus signature).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.signing_bytes();
        buf.extend_from_slice(&self.signature);
        buf
    }

    /// Decode from a [`ByteReader`] positioned at the start of a transaction.
    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        let sender = PublicKey::from_slice(reader.read_var_bytes()?)
            .map_err(|_| CoreError::Decode("bad sender key".into()))?;
        let recipient = PublicKey::from_slice(reader.read_var_bytes()?)
            .map_err(|_| CoreError::Decode("bad recipient key".into()))?;
        let amount = reader.read_u64()?;
        let fee = reader.read_u64()?;
        let nonce = reader.read_u64()?;
        let timestamp = reader.read_u64()?;
        let signature = reader.read_signature()?;
        Ok(Self { sender, recipient, amount, fee, nonce, timestamp, signature })
    }

    /// Transaction hash: SHA-256 of the full canonical encoding.
    pub fn hash(&self) -> Hash {
        sha256(&self.encode())
    }

    /// Verify the sender's signature. Pure; bad input is `false`, never a panic.
    pub fn verify_signature(&self) -> bool {
        verify_signature(&self.sender, &self.signing_bytes(), &self.signature).unwrap_or(false)
    }
}
