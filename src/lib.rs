//! # DID Ledger
//!
//! UTxO transaction construction for decentralized identifier state records
//! locked under a validator script.
//!
//! A DID's state is a structured record carried as an inline datum on one
//! script-locked output. Registering, updating, verifying and revoking it
//! are transactions that spend that output with an action record and lock
//! the successor record in the same transaction.
//!
//! ## Architecture
//!
//! Leaf-first:
//! - records and their wire encodings ([`record`], [`encoding`], [`plutus`])
//! - the UTxO model and input selection ([`utxo`], [`selection`])
//! - fee estimation, serialization and assembly ([`fee`], [`serialize`], [`builder`])
//! - signing, submission and confirmation ([`signer`], [`ledger`], [`tracker`])
//! - adapters to external services ([`blockfrost`], [`content`])
//! - the DID lifecycle ([`did`])
//!
//! ## Design Principles
//!
//! 1. **Pure construction**: encoding, selection, fee estimation and
//!    building perform no I/O
//! 2. **Fail before I/O**: records and transactions are validated locally
//!    before anything reaches the ledger
//! 3. **One internal model**: external services are reached only through
//!    the [`ledger::LedgerService`] and [`content::ContentStore`] traits
//! 4. **Explicit errors**: callers tell transient from permanent failures
//!    with [`LedgerError::is_retryable`]
//!
//! ## Usage
//!
//! ```rust
//! use did_ledger::DidLedger;
//! use did_ledger::record::Action;
//!
//! let kit = DidLedger::new();
//! let bytes = kit.encode_record(&Action::Register.to_record()).unwrap();
//! assert_eq!(bytes, vec![0x81, 0x00]);
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod hash;
pub mod record;
pub mod encoding;
pub mod plutus;
pub mod utxo;
pub mod selection;
pub mod serialize;
pub mod fee;
pub mod builder;
pub mod signer;
pub mod ledger;
pub mod tracker;
pub mod content;
pub mod blockfrost;
pub mod config;
pub mod did;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{LedgerError, Result};

use std::collections::BTreeMap;

use builder::{BuildSettings, TransactionRequest};
use encoding::DatumEncoding;
use record::StructuredRecord;
use selection::Selection;

/// Stateless entry point to the pure construction steps
///
/// # Examples
///
/// ```
/// use did_ledger::DidLedger;
/// use did_ledger::types::*;
///
/// let kit = DidLedger::new();
/// let wallet = Address::key(Network::Testnet, [1; 28]);
/// let utxos = vec![Utxo::plain(OutputReference::new([7; 32], 0), wallet, 5_000_000)];
///
/// let selection = kit.select_inputs(&utxos, 2_200_000).unwrap();
/// assert_eq!(selection.change, 2_800_000);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DidLedger {
    encoding: DatumEncoding,
    settings: BuildSettings,
}

impl DidLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: BuildSettings) -> Self {
        Self {
            encoding: settings.datum_encoding,
            settings,
        }
    }

    pub fn encode_record(&self, record: &StructuredRecord) -> Result<ByteString> {
        self.encoding.encode(record)
    }

    pub fn decode_record(&self, bytes: &[u8]) -> Result<StructuredRecord> {
        self.encoding.decode(bytes)
    }

    pub fn select_inputs(&self, available: &[Utxo], target: Amount) -> Result<Selection> {
        selection::select(available, target, self.settings.max_inputs)
    }

    pub fn estimate_fee(
        &self,
        draft: &TransactionDraft,
        params: &ProtocolParams,
        signers: usize,
    ) -> Result<Amount> {
        fee::estimate(draft, params, signers)
    }

    pub fn build_transaction(
        &self,
        inputs: &[Utxo],
        outputs: Vec<TransactionOutput>,
        fee: Amount,
        redeemers: BTreeMap<OutputReference, Redeemer>,
    ) -> Result<TransactionDraft> {
        builder::build(inputs, outputs, fee, redeemers)
    }

    pub fn assemble_transaction(
        &self,
        request: &TransactionRequest,
        wallet: &[Utxo],
        params: &ProtocolParams,
    ) -> Result<TransactionDraft> {
        builder::assemble(request, wallet, params, &self.settings)
    }
}
