//! DID state record lifecycle
//!
//! A DID lives as one output locked at the validator, carrying its state
//! record as an inline datum. Each lifecycle step spends that output with
//! an action and, unless revoking, re-locks the successor record at output
//! index 0 of the same transaction.
//!
//! ```text
//! Created --Register--> Registered --Verify--> Verified
//!                           |  ^                  |
//!                        Update |                Update
//!                           v  |                  v
//!                          Updated <--------------+
//!
//! any live stage --Revoke--> Revoked
//! ```
//!
//! Building on an output requires its transaction to be confirmed first.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::builder::{self, TransactionRequest};
use crate::config::Config;
use crate::content::{ContentHash, ContentStore};
use crate::error::{LedgerError, Result};
use crate::ledger::LedgerService;
use crate::record::{Action, DidDatum};
use crate::signer::{sign_draft, Signer};
use crate::tracker::{CancelToken, Clock, Confirmation, SystemClock, Tracker};
use crate::types::*;
use crate::utxo::UtxoSet;

/// Position of the state record output in every lifecycle transaction
pub const STATE_OUTPUT_INDEX: Natural = 0;

/// Lifecycle stage of a DID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Created,
    Registered,
    Updated,
    Verified,
    Revoked,
}

impl Stage {
    /// Stage reached by applying `action`, or `Validation` if the action is
    /// not allowed from here.
    pub fn after(self, action: Action) -> Result<Stage> {
        use Stage::*;
        let next = match (action, self) {
            (Action::Register, Created) => Registered,
            (Action::Verify, Registered | Updated) => Verified,
            (Action::Update, Registered | Updated | Verified) => Updated,
            (Action::Revoke, Created | Registered | Updated | Verified) => Revoked,
            _ => {
                return Err(LedgerError::Validation(format!(
                    "cannot {action} a DID in stage {self:?}"
                )))
            }
        };
        Ok(next)
    }
}

/// Client-side view of one DID
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DidEntity {
    /// Confirmed on-chain at `reference`
    Live { stage: Stage, reference: OutputReference },
    /// Submitted, moving to `stage` once `tx_id` confirms
    Awaiting { stage: Stage, tx_id: TransactionId },
    Revoked,
}

impl DidEntity {
    pub fn stage(&self) -> Stage {
        match self {
            DidEntity::Live { stage, .. } | DidEntity::Awaiting { stage, .. } => *stage,
            DidEntity::Revoked => Stage::Revoked,
        }
    }
}

/// A state record as found at the script address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedState {
    pub reference: OutputReference,
    pub value: Amount,
    pub datum: DidDatum,
}

/// Report on one DID: its stage, live record and unconfirmed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidStatus {
    pub stage: Stage,
    /// `None` once revoked or before the creation confirms
    pub state: Option<LockedState>,
    pub pending: Option<(TransactionId, TxStatus)>,
}

/// A submitted lifecycle transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub tx_id: TransactionId,
    /// The successor state record, `None` after a revocation
    pub datum: Option<DidDatum>,
}

impl Submitted {
    pub fn state_reference(&self) -> Option<OutputReference> {
        self.datum
            .as_ref()
            .map(|_| OutputReference::new(self.tx_id, STATE_OUTPUT_INDEX))
    }
}

/// Builds, signs and tracks lifecycle transactions for one wallet
pub struct DidRegistry<L: LedgerService, S: Signer, C: Clock = SystemClock> {
    config: Config,
    ledger: L,
    signer: S,
    clock: C,
    script_hash: ScriptHash,
    validator: ByteString,
    /// Inputs consumed by submitted but unconfirmed transactions
    in_flight: HashMap<TransactionId, Vec<OutputReference>>,
}

impl<L: LedgerService, S: Signer> DidRegistry<L, S, SystemClock> {
    pub fn new(config: Config, ledger: L, signer: S) -> Result<Self> {
        Self::with_clock(config, ledger, signer, SystemClock)
    }
}

impl<L: LedgerService, S: Signer, C: Clock> DidRegistry<L, S, C> {
    pub fn with_clock(config: Config, ledger: L, signer: S, clock: C) -> Result<Self> {
        config.validate()?;
        let script_hash = config.script_hash()?;
        let validator = config.script_code()?;
        Ok(Self {
            config,
            ledger,
            signer,
            clock,
            script_hash,
            validator,
            in_flight: HashMap::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn wallet_address(&self) -> Address {
        Address::key(self.config.network, self.signer.key_hash())
    }

    pub fn script_address(&self) -> Address {
        Address::script(self.config.network, self.script_hash)
    }

    /// Outputs held back because an unconfirmed transaction spends them.
    pub fn reserved(&self) -> HashSet<OutputReference> {
        self.in_flight.values().flatten().copied().collect()
    }

    /// Forgets an unconfirmed transaction, releasing its inputs.
    pub fn release(&mut self, tx_id: &TransactionId) {
        if self.in_flight.remove(tx_id).is_some() {
            debug!("released inputs of {}", hex::encode(tx_id));
        }
    }

    /// Locks a fresh, unverified state record at the script address.
    ///
    /// The record is validated before the ledger is contacted.
    pub fn create_state_record(
        &mut self,
        identifier: &[u8],
        content_hash: &[u8],
        owner_key_hash: &[u8],
    ) -> Result<Submitted> {
        let datum = DidDatum::new(identifier, content_hash, owner_key_hash, unix_millis()?)?;
        let encoded = self.encode_datum(&datum)?;

        let request = TransactionRequest::new(self.wallet_address()).pay(
            TransactionOutput::new(self.script_address(), self.config.script.lock_value)
                .with_datum(encoded),
        );
        let tx_id = self.submit_request(&request)?;
        info!(
            "created state record for {} in {}",
            String::from_utf8_lossy(identifier),
            hex::encode(tx_id)
        );
        Ok(Submitted {
            tx_id,
            datum: Some(datum),
        })
    }

    /// Stores `document` and locks a state record pointing at it.
    pub fn publish_document(
        &mut self,
        store: &impl ContentStore,
        identifier: &[u8],
        document: &[u8],
        owner_key_hash: &[u8],
    ) -> Result<(ContentHash, Submitted)> {
        if identifier.is_empty() {
            return Err(LedgerError::Validation("identifier cannot be empty".to_string()));
        }
        let hash = store.put(document)?;
        let submitted = self.create_state_record(identifier, hash.as_bytes(), owner_key_hash)?;
        Ok((hash, submitted))
    }

    pub fn transition(&mut self, reference: &OutputReference, action: Action) -> Result<Submitted> {
        self.transition_with_content(reference, action, None)
    }

    /// Spends the state record at `reference` with `action`.
    ///
    /// Register keeps the record, Update replaces the content hash when one
    /// is given and clears `verified`, Verify sets `verified`, Revoke
    /// returns the locked value to the wallet without a successor.
    pub fn transition_with_content(
        &mut self,
        reference: &OutputReference,
        action: Action,
        new_content_hash: Option<&[u8]>,
    ) -> Result<Submitted> {
        if self.reserved().contains(reference) {
            return Err(LedgerError::Validation(format!(
                "{reference} is already being spent by an unconfirmed transaction"
            )));
        }
        let script_address = self.script_address();
        let locked = UtxoSet::new(script_address, self.ledger.get_utxos(&script_address)?);
        let utxo = locked
            .find_by_reference(reference)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("state record {reference}")))?;
        let current = self.decode_datum(&utxo)?;
        if current.owner_key_hash != self.signer.key_hash() {
            return Err(LedgerError::Validation(format!(
                "state record {reference} is owned by {}",
                hex::encode(current.owner_key_hash)
            )));
        }

        let next = successor(&current, action, new_content_hash)?;
        let mut request = TransactionRequest::new(self.wallet_address())
            .spend(utxo.clone(), action)
            .signed_by(current.owner_key_hash)
            .with_validator(self.validator.clone());
        if let Some(datum) = &next {
            request = request.pay(
                TransactionOutput::new(script_address, utxo.value).with_datum(self.encode_datum(datum)?),
            );
        }

        let tx_id = self.submit_request(&request)?;
        info!("{} of {} submitted in {}", action, reference, hex::encode(tx_id));
        Ok(Submitted { tx_id, datum: next })
    }

    /// Every well-formed state record at the script address.
    ///
    /// Outputs that do not decode as a state record are skipped.
    pub fn list_states(&self) -> Result<Vec<LockedState>> {
        let script_address = self.script_address();
        let locked = UtxoSet::new(script_address, self.ledger.get_utxos(&script_address)?);
        let mut states = Vec::with_capacity(locked.len());
        for utxo in locked.iter() {
            match self.decode_datum(utxo) {
                Ok(datum) => states.push(LockedState {
                    reference: utxo.reference,
                    value: utxo.value,
                    datum,
                }),
                Err(e) => debug!("ignoring {} at the script address: {}", utxo.reference, e),
            }
        }
        Ok(states)
    }

    /// The live state record for `identifier`, if any.
    pub fn get_state(&self, identifier: &[u8]) -> Result<Option<LockedState>> {
        Ok(self
            .list_states()?
            .into_iter()
            .find(|state| state.datum.identifier == identifier))
    }

    /// Stage, on-chain record and pending transaction of `entity`.
    ///
    /// An awaiting entity's transaction status is queried once; nothing
    /// waits here.
    pub fn status(&self, identifier: &[u8], entity: &DidEntity) -> Result<DidStatus> {
        let pending = match entity {
            DidEntity::Awaiting { tx_id, .. } => {
                Some((*tx_id, self.ledger.get_transaction_status(tx_id)?))
            }
            _ => None,
        };
        Ok(DidStatus {
            stage: entity.stage(),
            state: self.get_state(identifier)?,
            pending,
        })
    }

    /// Waits for `tx_id`; its inputs are released once it confirms, or once
    /// the wait ends with the ledger no longer knowing the transaction.
    pub fn await_confirmation(&mut self, tx_id: &TransactionId, cancel: &CancelToken) -> Result<Confirmation> {
        let outcome = Tracker::with_clock(&self.ledger, self.config.tracker_config(), &self.clock)
            .await_confirmation(tx_id, cancel)?;
        match outcome {
            Confirmation::Confirmed { .. } => self.release(tx_id),
            Confirmation::TimedOut => match self.ledger.get_transaction_status(tx_id) {
                Ok(TxStatus::NotFound) => {
                    warn!("{} was lost, releasing its inputs", hex::encode(tx_id));
                    self.release(tx_id);
                }
                Ok(_) => {}
                Err(e) => debug!("status of {} unknown after the wait: {}", hex::encode(tx_id), e),
            },
            Confirmation::Cancelled => {}
        }
        Ok(outcome)
    }

    /// Submits the creation transaction and returns the entity awaiting it.
    pub fn create(
        &mut self,
        identifier: &[u8],
        content_hash: &[u8],
        owner_key_hash: &[u8],
    ) -> Result<DidEntity> {
        let submitted = self.create_state_record(identifier, content_hash, owner_key_hash)?;
        Ok(DidEntity::Awaiting {
            stage: Stage::Created,
            tx_id: submitted.tx_id,
        })
    }

    /// Moves an awaiting entity forward once its transaction confirms.
    /// Anything else, or an unconfirmed wait, returns the entity as is.
    pub fn settle(&mut self, entity: DidEntity, cancel: &CancelToken) -> Result<DidEntity> {
        let DidEntity::Awaiting { stage, tx_id } = entity else {
            return Ok(entity);
        };
        match self.await_confirmation(&tx_id, cancel)? {
            Confirmation::Confirmed { .. } if stage == Stage::Revoked => Ok(DidEntity::Revoked),
            Confirmation::Confirmed { .. } => Ok(DidEntity::Live {
                stage,
                reference: OutputReference::new(tx_id, STATE_OUTPUT_INDEX),
            }),
            other => {
                warn!("{} not confirmed: {:?}", hex::encode(tx_id), other);
                Ok(entity)
            }
        }
    }

    /// Applies `action` to `entity`, first waiting for any pending
    /// transaction. Fails with a retryable `Query` error if that
    /// transaction does not confirm in time.
    pub fn apply(
        &mut self,
        entity: DidEntity,
        action: Action,
        new_content_hash: Option<&[u8]>,
        cancel: &CancelToken,
    ) -> Result<DidEntity> {
        let (stage, reference) = match self.settle(entity, cancel)? {
            DidEntity::Live { stage, reference } => (stage, reference),
            DidEntity::Awaiting { tx_id, .. } => {
                return Err(LedgerError::Query(format!(
                    "transaction {} is not confirmed yet",
                    hex::encode(tx_id)
                )))
            }
            DidEntity::Revoked => {
                return Err(LedgerError::Validation(format!("cannot {action} a revoked DID")))
            }
        };
        let next = stage.after(action)?;
        let submitted = self.transition_with_content(&reference, action, new_content_hash)?;
        Ok(DidEntity::Awaiting {
            stage: next,
            tx_id: submitted.tx_id,
        })
    }

    fn encode_datum(&self, datum: &DidDatum) -> Result<ByteString> {
        self.config
            .script
            .datum_encoding
            .encode(&datum.to_record(self.config.script.bool_encoding))
    }

    fn decode_datum(&self, utxo: &Utxo) -> Result<DidDatum> {
        let bytes = utxo.inline_datum.as_deref().ok_or_else(|| {
            LedgerError::Encoding(format!("{} carries no inline datum", utxo.reference))
        })?;
        let record = self.config.script.datum_encoding.decode(bytes)?;
        DidDatum::from_record(&record, self.config.script.bool_encoding)
    }

    /// Fresh wallet query, assembly, signing and a single submission.
    fn submit_request(&mut self, request: &TransactionRequest) -> Result<TransactionId> {
        let wallet_address = self.wallet_address();
        let wallet = UtxoSet::new(wallet_address, self.ledger.get_utxos(&wallet_address)?)
            .excluding(&self.reserved());
        let params = self.ledger.get_protocol_params()?;

        let draft = builder::assemble(
            request,
            &wallet.plain_outputs(),
            &params,
            &self.config.build_settings(),
        )?;
        let signed = sign_draft(&draft, &[&self.signer])?;
        let tx_id = Tracker::with_clock(&self.ledger, self.config.tracker_config(), &self.clock)
            .submit(&signed)?;
        self.in_flight
            .insert(tx_id, draft.inputs.iter().copied().collect());
        Ok(tx_id)
    }
}

/// Next: 𝒟 × 𝒜 × 𝔹? → 𝒟?
///
/// - Register: d
/// - Update: d with content_hash = c (if given), verified = false
/// - Verify: d with verified = true
/// - Revoke: ∅
pub fn successor(current: &DidDatum, action: Action, new_content_hash: Option<&[u8]>) -> Result<Option<DidDatum>> {
    let next = match action {
        Action::Register => current.clone(),
        Action::Update => DidDatum {
            content_hash: new_content_hash
                .map(<[u8]>::to_vec)
                .unwrap_or_else(|| current.content_hash.clone()),
            verified: false,
            ..current.clone()
        },
        Action::Verify => DidDatum {
            verified: true,
            ..current.clone()
        },
        Action::Revoke => return Ok(None),
    };
    next.validate()?;
    Ok(Some(next))
}

fn unix_millis() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| LedgerError::Validation(format!("system clock before the epoch: {e}")))?;
    Ok(elapsed.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datum() -> DidDatum {
        DidDatum::new(b"did:ada:7".to_vec(), b"Qmold".to_vec(), &[3; 28], 1_700_000_000_000).unwrap()
    }

    #[test]
    fn test_stage_transitions() {
        assert_eq!(Stage::Created.after(Action::Register).unwrap(), Stage::Registered);
        assert_eq!(Stage::Registered.after(Action::Verify).unwrap(), Stage::Verified);
        assert_eq!(Stage::Updated.after(Action::Verify).unwrap(), Stage::Verified);
        assert_eq!(Stage::Verified.after(Action::Update).unwrap(), Stage::Updated);
        assert_eq!(Stage::Created.after(Action::Revoke).unwrap(), Stage::Revoked);
        assert_eq!(Stage::Verified.after(Action::Revoke).unwrap(), Stage::Revoked);

        assert!(Stage::Created.after(Action::Verify).is_err());
        assert!(Stage::Created.after(Action::Update).is_err());
        assert!(Stage::Registered.after(Action::Register).is_err());
        assert!(Stage::Verified.after(Action::Verify).is_err());
        assert!(Stage::Revoked.after(Action::Revoke).is_err());
    }

    #[test]
    fn test_successor_records() {
        let current = datum();
        assert_eq!(successor(&current, Action::Register, None).unwrap(), Some(current.clone()));

        let verified = successor(&current, Action::Verify, None).unwrap().unwrap();
        assert!(verified.verified);
        assert_eq!(verified.content_hash, current.content_hash);

        let updated = successor(&verified, Action::Update, Some(b"Qmnew")).unwrap().unwrap();
        assert_eq!(updated.content_hash, b"Qmnew".to_vec());
        assert!(!updated.verified);
        assert_eq!(updated.created_at, current.created_at);

        assert_eq!(successor(&current, Action::Revoke, None).unwrap(), None);
    }

    #[test]
    fn test_update_rejects_empty_content() {
        assert!(matches!(
            successor(&datum(), Action::Update, Some(b"")),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_entity_stage() {
        let live = DidEntity::Live {
            stage: Stage::Verified,
            reference: OutputReference::new([1; 32], 0),
        };
        assert_eq!(live.stage(), Stage::Verified);
        assert_eq!(DidEntity::Revoked.stage(), Stage::Revoked);
    }
}
