//! Transaction signing
//!
//! Every witness is an Ed25519 signature over the transaction id.

use ed25519_dalek::{Signer as _, SigningKey};
use serde::Deserialize;
use tracing::debug;

use crate::constants::{SIGNATURE_LEN, VERIFICATION_KEY_LEN};
use crate::error::{LedgerError, Result};
use crate::hash::blake2b_224;
use crate::serialize;
use crate::types::*;

/// CBOR header of a 32-byte byte string, as found in key envelopes
const ENVELOPE_KEY_PREFIX: &str = "5820";

/// Something holding a payment key
pub trait Signer {
    fn verification_key(&self) -> [u8; VERIFICATION_KEY_LEN];

    fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN];

    /// KeyHash: blake2b-224(verification key)
    fn key_hash(&self) -> KeyHash {
        blake2b_224(&self.verification_key())
    }

    fn witness(&self, id: &TransactionId) -> VkeyWitness {
        VkeyWitness {
            vkey: self.verification_key(),
            signature: self.sign(id),
        }
    }
}

pub struct Ed25519Signer {
    key: SigningKey,
}

#[derive(Debug, Deserialize)]
struct TextEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "cborHex")]
    cbor_hex: String,
}

impl Ed25519Signer {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Reads a `cardano-cli` signing key envelope:
    /// `{"type": "PaymentSigningKeyShelley_ed25519", "cborHex": "5820<seed>"}`.
    pub fn from_text_envelope(json: &str) -> Result<Self> {
        let envelope: TextEnvelope = serde_json::from_str(json)
            .map_err(|e| LedgerError::Config(format!("malformed key envelope: {e}")))?;
        if !envelope.kind.contains("SigningKey") {
            return Err(LedgerError::Config(format!(
                "envelope holds a {}, not a signing key",
                envelope.kind
            )));
        }
        let hex_seed = envelope
            .cbor_hex
            .strip_prefix(ENVELOPE_KEY_PREFIX)
            .ok_or_else(|| LedgerError::Config("signing key is not a 32-byte string".to_string()))?;
        let seed: [u8; 32] = hex::decode(hex_seed)
            .map_err(|e| LedgerError::Config(format!("signing key is not hex: {e}")))?
            .try_into()
            .map_err(|_| LedgerError::Config("signing key must be 32 bytes".to_string()))?;
        Ok(Self::from_seed(&seed))
    }
}

impl Signer for Ed25519Signer {
    fn verification_key(&self) -> [u8; VERIFICATION_KEY_LEN] {
        self.key.verifying_key().to_bytes()
    }

    fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("key_hash", &hex::encode(self.key_hash()))
            .finish()
    }
}

/// Signs `draft` with every signer and serializes it for submission.
pub fn sign_draft(draft: &TransactionDraft, signers: &[&dyn Signer]) -> Result<SignedTransaction> {
    let id = serialize::transaction_id(draft)?;
    let mut witnesses: Vec<VkeyWitness> = Vec::with_capacity(signers.len());
    for signer in signers {
        let witness = signer.witness(&id);
        if !witnesses.iter().any(|w| w.vkey == witness.vkey) {
            witnesses.push(witness);
        }
    }
    let bytes = serialize::encode_transaction(draft, &witnesses)?;
    debug!(
        "signed transaction {} with {} witnesses ({} bytes)",
        hex::encode(id),
        witnesses.len(),
        bytes.len()
    );
    Ok(SignedTransaction { id, bytes })
}
