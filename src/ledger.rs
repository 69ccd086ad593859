//! Ledger query and submission service
//!
//! [`LedgerService`] is the boundary to whatever node or indexer the
//! process talks to. [`InMemoryLedger`] applies the ledger's acceptance
//! rules locally and is what the tests run against.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::{debug, info, warn};

use crate::builder::required_collateral;
use crate::error::{LedgerError, Result};
use crate::hash::{blake2b_224, blake2b_256, plutus_v3_script_hash};
use crate::serialize::{self, DecodedTransaction};
use crate::types::*;

/// Chain access needed to build, submit and track transactions
pub trait LedgerService {
    /// Unspent outputs currently held by `address`.
    fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>>;

    fn get_protocol_params(&self) -> Result<ProtocolParams>;

    /// Hands signed transaction bytes to the ledger. Returns the id the
    /// ledger accepted, or `Rejection` with its reason.
    fn submit(&self, tx: &[u8]) -> Result<TransactionId>;

    fn get_transaction_status(&self, id: &TransactionId) -> Result<TxStatus>;
}

struct Pending {
    tx: DecodedTransaction,
    polls: usize,
}

struct LedgerState {
    utxos: BTreeMap<OutputReference, Utxo>,
    mempool: BTreeMap<TransactionId, Pending>,
    confirmed: HashMap<TransactionId, (String, Natural)>,
    params: ProtocolParams,
    confirm_after: Option<usize>,
    drop_submissions: bool,
    failing_queries: usize,
    slot: Natural,
    fundings: u64,
}

/// In-memory ledger
///
/// Submitted transactions sit in a mempool until they have been polled
/// `confirm_after` times, then their inputs are consumed and their outputs
/// become spendable. Outputs of unconfirmed transactions cannot be spent.
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    /// An empty ledger confirming each transaction on its first status poll.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                utxos: BTreeMap::new(),
                mempool: BTreeMap::new(),
                confirmed: HashMap::new(),
                params: ProtocolParams::default(),
                confirm_after: Some(1),
                drop_submissions: false,
                failing_queries: 0,
                slot: 0,
                fundings: 0,
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Query("ledger state lock poisoned".to_string()))
    }

    /// Creates a plain output of `value` at `address` out of thin air.
    pub fn fund(&self, address: Address, value: Amount) -> Result<OutputReference> {
        let mut state = self.state()?;
        state.fundings += 1;
        let mut preimage = b"funding".to_vec();
        preimage.extend_from_slice(&state.fundings.to_be_bytes());
        let reference = OutputReference::new(blake2b_256(&preimage), 0);
        state
            .utxos
            .insert(reference, Utxo::plain(reference, address, value));
        Ok(reference)
    }

    /// Status polls before a transaction confirms; `None` never confirms.
    pub fn set_confirm_after(&self, polls: Option<usize>) -> Result<()> {
        self.state()?.confirm_after = polls;
        Ok(())
    }

    /// Accept submissions but forget them, so their status is `NotFound`.
    pub fn set_drop_submissions(&self, drop: bool) -> Result<()> {
        self.state()?.drop_submissions = drop;
        Ok(())
    }

    /// The next `count` status queries fail with a transient error.
    pub fn fail_next_status_queries(&self, count: usize) -> Result<()> {
        self.state()?.failing_queries = count;
        Ok(())
    }

    pub fn set_protocol_params(&self, params: ProtocolParams) -> Result<()> {
        self.state()?.params = params;
        Ok(())
    }

    pub fn utxo(&self, reference: &OutputReference) -> Result<Option<Utxo>> {
        Ok(self.state()?.utxos.get(reference).cloned())
    }

    pub fn pending_count(&self) -> Result<usize> {
        Ok(self.state()?.mempool.len())
    }

    /// Confirms everything in the mempool without waiting for polls.
    pub fn confirm_all(&self) -> Result<Vec<TransactionId>> {
        let mut state = self.state()?;
        let ids: Vec<TransactionId> = state.mempool.keys().copied().collect();
        for id in &ids {
            state.confirm(id);
        }
        Ok(ids)
    }
}

impl LedgerState {
    /// Ledger rules for a transaction against the current UTxO set.
    fn validate(&self, tx: &DecodedTransaction) -> Result<()> {
        let draft = &tx.draft;
        if draft.inputs.is_empty() {
            return Err(LedgerError::Rejection("transaction has no inputs".to_string()));
        }

        let missing: Vec<String> = draft
            .inputs
            .iter()
            .filter(|r| !self.utxos.contains_key(r))
            .map(|r| r.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(LedgerError::Rejection(format!(
                "inputs not found: {}",
                missing.join(", ")
            )));
        }
        if let Some(conflict) = draft
            .inputs
            .iter()
            .find(|r| self.mempool.values().any(|p| p.tx.draft.inputs.contains(r)))
        {
            return Err(LedgerError::Rejection(format!(
                "input {conflict} already spent by a pending transaction"
            )));
        }
        let resolved: Vec<&Utxo> = draft.inputs.iter().filter_map(|r| self.utxos.get(r)).collect();

        let input_total: Amount = resolved.iter().map(|u| u.value).sum();
        if input_total != draft.output_total() + draft.fee {
            return Err(LedgerError::Rejection(format!(
                "value not conserved: consumed {input_total}, produced {} with fee {}",
                draft.output_total(),
                draft.fee
            )));
        }

        let mut witnessed = HashSet::new();
        for witness in &tx.witnesses {
            let key = VerifyingKey::from_bytes(&witness.vkey)
                .map_err(|_| LedgerError::Rejection("malformed verification key".to_string()))?;
            let key_hash = blake2b_224(&witness.vkey);
            key.verify(&tx.id, &Signature::from_bytes(&witness.signature))
                .map_err(|_| {
                    LedgerError::Rejection(format!("invalid signature from {}", hex::encode(key_hash)))
                })?;
            witnessed.insert(key_hash);
        }
        if let Some(missing) = draft.required_signers.iter().find(|k| !witnessed.contains(*k)) {
            return Err(LedgerError::Rejection(format!(
                "missing signature from required signer {}",
                hex::encode(missing)
            )));
        }

        let attached: HashSet<ScriptHash> = draft
            .scripts
            .iter()
            .map(|s| plutus_v3_script_hash(s))
            .collect();
        for (position, utxo) in resolved.iter().enumerate() {
            match utxo.address.payment {
                Credential::Key(hash) if !witnessed.contains(&hash) => {
                    return Err(LedgerError::Rejection(format!(
                        "input {} is not signed by its owner",
                        utxo.reference
                    )));
                }
                Credential::Key(_) => {}
                Credential::Script(hash) => {
                    if !draft.redeemers.contains_key(&position) {
                        return Err(LedgerError::Rejection(format!(
                            "script input {} has no redeemer",
                            utxo.reference
                        )));
                    }
                    if !attached.contains(&hash) {
                        return Err(LedgerError::Rejection(format!(
                            "validator {} is not attached",
                            hex::encode(hash)
                        )));
                    }
                }
            }
        }

        if let Some(index) = draft
            .outputs
            .iter()
            .position(|o| o.address.is_script() && o.datum.is_none())
        {
            return Err(LedgerError::Rejection(format!(
                "output {index} at a script address has no datum"
            )));
        }

        if !draft.redeemers.is_empty() {
            self.validate_collateral(tx, &witnessed)?;
            let expected = serialize::script_data_hash(draft, &self.params.language_views)?;
            if draft.script_data_hash != Some(expected) {
                return Err(LedgerError::Rejection("script data hash mismatch".to_string()));
            }
        }
        Ok(())
    }

    fn validate_collateral(&self, tx: &DecodedTransaction, witnessed: &HashSet<KeyHash>) -> Result<()> {
        let mut total: Amount = 0;
        for reference in &tx.draft.collateral {
            let utxo = self.utxos.get(reference).ok_or_else(|| {
                LedgerError::Rejection(format!("collateral {reference} not found"))
            })?;
            match utxo.address.payment {
                Credential::Key(hash) if witnessed.contains(&hash) => total += utxo.value,
                _ => {
                    return Err(LedgerError::Rejection(format!(
                        "collateral {reference} is not a signed key output"
                    )))
                }
            }
        }
        let required = required_collateral(tx.draft.fee, &self.params);
        if total < required {
            return Err(LedgerError::Rejection(format!(
                "insufficient collateral: {total} < {required}"
            )));
        }
        Ok(())
    }

    fn confirm(&mut self, id: &TransactionId) -> TxStatus {
        let Some(pending) = self.mempool.remove(id) else {
            return TxStatus::NotFound;
        };
        let draft = pending.tx.draft;
        for input in &draft.inputs {
            self.utxos.remove(input);
        }
        for (index, output) in draft.outputs.into_iter().enumerate() {
            let reference = OutputReference::new(*id, index as Natural);
            self.utxos.insert(
                reference,
                Utxo {
                    reference,
                    address: output.address,
                    value: output.value,
                    data_hash: output.datum.as_deref().map(blake2b_256),
                    inline_datum: output.datum,
                    script: output.script,
                },
            );
        }

        self.slot += 1;
        let mut preimage = id.to_vec();
        preimage.extend_from_slice(&self.slot.to_be_bytes());
        let block = hex::encode(blake2b_256(&preimage));
        self.confirmed.insert(*id, (block.clone(), self.slot));
        info!("confirmed {} in slot {}", hex::encode(id), self.slot);
        TxStatus::Confirmed {
            block,
            slot: self.slot,
        }
    }
}

impl LedgerService for InMemoryLedger {
    fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>> {
        Ok(self
            .state()?
            .utxos
            .values()
            .filter(|u| &u.address == address)
            .cloned()
            .collect())
    }

    fn get_protocol_params(&self) -> Result<ProtocolParams> {
        Ok(self.state()?.params.clone())
    }

    fn submit(&self, tx: &[u8]) -> Result<TransactionId> {
        let decoded = serialize::decode_transaction(tx)
            .map_err(|e| LedgerError::Rejection(format!("malformed transaction: {e}")))?;
        let id = decoded.id;

        let mut state = self.state()?;
        if state.mempool.contains_key(&id) || state.confirmed.contains_key(&id) {
            debug!("duplicate submission of {}", hex::encode(id));
            return Ok(id);
        }
        state.validate(&decoded)?;

        if state.drop_submissions {
            warn!("dropping accepted transaction {}", hex::encode(id));
            return Ok(id);
        }
        state.mempool.insert(
            id,
            Pending {
                tx: decoded,
                polls: 0,
            },
        );
        info!("accepted {} into the mempool", hex::encode(id));
        Ok(id)
    }

    fn get_transaction_status(&self, id: &TransactionId) -> Result<TxStatus> {
        let mut state = self.state()?;
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            return Err(LedgerError::Query("status service unavailable".to_string()));
        }
        if let Some((block, slot)) = state.confirmed.get(id) {
            return Ok(TxStatus::Confirmed {
                block: block.clone(),
                slot: *slot,
            });
        }

        let confirm_after = state.confirm_after;
        let Some(pending) = state.mempool.get_mut(id) else {
            return Ok(TxStatus::NotFound);
        };
        pending.polls += 1;
        match confirm_after {
            Some(polls) if pending.polls >= polls => Ok(state.confirm(id)),
            _ => Ok(TxStatus::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{sign_draft, Ed25519Signer, Signer};

    fn signer() -> Ed25519Signer {
        Ed25519Signer::from_seed(&[11; 32])
    }

    fn wallet() -> Address {
        Address::key(Network::Testnet, signer().key_hash())
    }

    fn payment(input: OutputReference, value: Amount, fee: Amount) -> TransactionDraft {
        let mut draft = TransactionDraft {
            fee,
            ..Default::default()
        };
        draft.inputs.insert(input);
        draft.outputs.push(TransactionOutput::new(wallet(), value - fee));
        draft
    }

    #[test]
    fn test_fund_and_query() {
        let ledger = InMemoryLedger::new();
        let reference = ledger.fund(wallet(), 5_000_000).unwrap();
        let utxos = ledger.get_utxos(&wallet()).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].reference, reference);
        assert!(ledger
            .get_utxos(&Address::key(Network::Testnet, [0; 28]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_submit_and_confirm() {
        let ledger = InMemoryLedger::new();
        let input = ledger.fund(wallet(), 5_000_000).unwrap();
        let signed = sign_draft(&payment(input, 5_000_000, 200_000), &[&signer()]).unwrap();

        let id = ledger.submit(&signed.bytes).unwrap();
        assert_eq!(id, signed.id);
        assert!(matches!(
            ledger.get_transaction_status(&id).unwrap(),
            TxStatus::Confirmed { slot: 1, .. }
        ));
        assert!(ledger.utxo(&input).unwrap().is_none());
        let output = ledger.utxo(&OutputReference::new(id, 0)).unwrap().unwrap();
        assert_eq!(output.value, 4_800_000);
    }

    #[test]
    fn test_duplicate_submit_is_noop() {
        let ledger = InMemoryLedger::new();
        ledger.set_confirm_after(None).unwrap();
        let input = ledger.fund(wallet(), 5_000_000).unwrap();
        let signed = sign_draft(&payment(input, 5_000_000, 200_000), &[&signer()]).unwrap();
        assert_eq!(ledger.submit(&signed.bytes).unwrap(), signed.id);
        assert_eq!(ledger.submit(&signed.bytes).unwrap(), signed.id);
        assert_eq!(ledger.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_rejects_unknown_inputs() {
        let ledger = InMemoryLedger::new();
        let signed = sign_draft(
            &payment(OutputReference::new([9; 32], 0), 5_000_000, 200_000),
            &[&signer()],
        )
        .unwrap();
        let err = ledger.submit(&signed.bytes).unwrap_err();
        assert!(matches!(err, LedgerError::Rejection(ref m) if m.starts_with("inputs not found")));
    }

    #[test]
    fn test_rejects_unconfirmed_output() {
        let ledger = InMemoryLedger::new();
        ledger.set_confirm_after(None).unwrap();
        let input = ledger.fund(wallet(), 5_000_000).unwrap();
        let first = sign_draft(&payment(input, 5_000_000, 200_000), &[&signer()]).unwrap();
        ledger.submit(&first.bytes).unwrap();

        let chained = payment(OutputReference::new(first.id, 0), 4_800_000, 200_000);
        let second = sign_draft(&chained, &[&signer()]).unwrap();
        assert!(matches!(
            ledger.submit(&second.bytes),
            Err(LedgerError::Rejection(_))
        ));
    }

    #[test]
    fn test_rejects_double_spend_in_mempool() {
        let ledger = InMemoryLedger::new();
        ledger.set_confirm_after(None).unwrap();
        let input = ledger.fund(wallet(), 5_000_000).unwrap();
        let first = sign_draft(&payment(input, 5_000_000, 200_000), &[&signer()]).unwrap();
        let second = sign_draft(&payment(input, 5_000_000, 300_000), &[&signer()]).unwrap();
        ledger.submit(&first.bytes).unwrap();
        assert!(ledger.submit(&second.bytes).is_err());
    }

    #[test]
    fn test_rejects_imbalance_and_missing_witness() {
        let ledger = InMemoryLedger::new();
        let input = ledger.fund(wallet(), 5_000_000).unwrap();

        let mut unbalanced = payment(input, 5_000_000, 200_000);
        unbalanced.fee = 100_000;
        let signed = sign_draft(&unbalanced, &[&signer()]).unwrap();
        assert!(ledger.submit(&signed.bytes).is_err());

        let unsigned = sign_draft(&payment(input, 5_000_000, 200_000), &[]).unwrap();
        assert!(ledger.submit(&unsigned.bytes).is_err());

        let stranger = Ed25519Signer::from_seed(&[12; 32]);
        let wrong = sign_draft(&payment(input, 5_000_000, 200_000), &[&stranger]).unwrap();
        assert!(ledger.submit(&wrong.bytes).is_err());
    }

    #[test]
    fn test_pending_until_polled_enough() {
        let ledger = InMemoryLedger::new();
        ledger.set_confirm_after(Some(3)).unwrap();
        let input = ledger.fund(wallet(), 5_000_000).unwrap();
        let signed = sign_draft(&payment(input, 5_000_000, 200_000), &[&signer()]).unwrap();
        let id = ledger.submit(&signed.bytes).unwrap();

        assert_eq!(ledger.get_transaction_status(&id).unwrap(), TxStatus::Pending);
        assert_eq!(ledger.get_transaction_status(&id).unwrap(), TxStatus::Pending);
        assert!(matches!(
            ledger.get_transaction_status(&id).unwrap(),
            TxStatus::Confirmed { .. }
        ));
        // stays confirmed
        assert!(matches!(
            ledger.get_transaction_status(&id).unwrap(),
            TxStatus::Confirmed { .. }
        ));
    }

    #[test]
    fn test_injected_failures_and_unknown_ids() {
        let ledger = InMemoryLedger::new();
        ledger.fail_next_status_queries(2).unwrap();
        let err = ledger.get_transaction_status(&[0; 32]).unwrap_err();
        assert!(err.is_retryable());
        assert!(ledger.get_transaction_status(&[0; 32]).is_err());
        assert_eq!(ledger.get_transaction_status(&[0; 32]).unwrap(), TxStatus::NotFound);
    }

    #[test]
    fn test_dropped_submission_is_not_found() {
        let ledger = InMemoryLedger::new();
        ledger.set_drop_submissions(true).unwrap();
        let input = ledger.fund(wallet(), 5_000_000).unwrap();
        let signed = sign_draft(&payment(input, 5_000_000, 200_000), &[&signer()]).unwrap();
        let id = ledger.submit(&signed.bytes).unwrap();
        assert_eq!(ledger.get_transaction_status(&id).unwrap(), TxStatus::NotFound);
        assert!(ledger.utxo(&input).unwrap().is_some());
    }
}
