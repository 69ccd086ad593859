//! Transaction construction
//!
//! [`build`] checks a fully specified transaction. [`assemble`] derives
//! one from a request: it selects wallet inputs, converges the fee, adds
//! change, collateral and the validator witness, then runs the same
//! checks. Neither performs I/O.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::constants::*;
use crate::encoding::DatumEncoding;
use crate::error::{LedgerError, Result};
use crate::fee::{self, FeeSettings};
use crate::record::Action;
use crate::selection::{self, Selection};
use crate::serialize;
use crate::types::*;

/// Tunables for [`assemble`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    pub max_inputs: usize,
    pub min_output: Amount,
    pub fee: FeeSettings,
    pub datum_encoding: DatumEncoding,
    pub ex_units: ExUnits,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            max_inputs: DEFAULT_MAX_INPUTS,
            min_output: MIN_OUTPUT_VALUE,
            fee: FeeSettings::default(),
            datum_encoding: DatumEncoding::default(),
            ex_units: ExUnits::default(),
        }
    }
}

/// A script-locked output to spend and the action to spend it with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInput {
    pub utxo: Utxo,
    pub action: Action,
}

/// What the caller wants the transaction to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub script_inputs: Vec<ScriptInput>,
    pub outputs: Vec<TransactionOutput>,
    pub required_signers: BTreeSet<KeyHash>,
    /// Compiled validator, attached when script inputs are spent
    pub validator: Option<ByteString>,
    pub change_address: Address,
}

impl TransactionRequest {
    pub fn new(change_address: Address) -> Self {
        Self {
            script_inputs: Vec::new(),
            outputs: Vec::new(),
            required_signers: BTreeSet::new(),
            validator: None,
            change_address,
        }
    }

    pub fn spend(mut self, utxo: Utxo, action: Action) -> Self {
        self.script_inputs.push(ScriptInput { utxo, action });
        self
    }

    pub fn pay(mut self, output: TransactionOutput) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn signed_by(mut self, key_hash: KeyHash) -> Self {
        self.required_signers.insert(key_hash);
        self
    }

    pub fn with_validator(mut self, script: ByteString) -> Self {
        self.validator = Some(script);
        self
    }

    /// Distinct keys expected to sign: required signers plus the change key.
    fn signer_count(&self) -> usize {
        let mut keys = self.required_signers.clone();
        if let Credential::Key(hash) = self.change_address.payment {
            keys.insert(hash);
        }
        keys.len().max(1)
    }
}

/// Build: 𝒰* × 𝒪ᵤₜ* × ℕ × (𝒪 → ℛ) → 𝒯
///
/// For inputs is, outputs os, fee f and redeemers rs:
/// 1. Σ is.value = Σ os.value + f, else UnbalancedTransaction
/// 2. ∀ o ∈ os at a script address: o.datum ≠ ∅, else MissingDatum
/// 3. ∀ i ∈ is at a script address: i ∈ dom(rs), else MissingRedeemer
///
/// Redeemers are re-keyed by position in the canonical input order.
pub fn build(
    inputs: &[Utxo],
    outputs: Vec<TransactionOutput>,
    fee: Amount,
    redeemers: BTreeMap<OutputReference, Redeemer>,
) -> Result<TransactionDraft> {
    let mut draft = TransactionDraft {
        inputs: inputs.iter().map(|u| u.reference).collect(),
        outputs,
        fee,
        ..Default::default()
    };
    for (reference, redeemer) in redeemers {
        let position = draft.input_position(&reference).ok_or_else(|| {
            LedgerError::Validation(format!("redeemer for {reference}, which is not an input"))
        })?;
        draft.redeemers.insert(position, redeemer);
    }
    check(&draft, inputs)?;
    Ok(draft)
}

/// Balance, datum and redeemer checks shared by [`build`] and [`assemble`].
///
/// `resolved` must hold exactly one UTxO per draft input; the balance is
/// summed over the draft's inputs as resolved through it.
pub fn check(draft: &TransactionDraft, resolved: &[Utxo]) -> Result<()> {
    let by_reference = resolve(draft, resolved)?;

    let input_total = draft
        .inputs
        .iter()
        .filter_map(|r| by_reference.get(r))
        .try_fold(0 as Amount, |acc, u| acc.checked_add(u.value))
        .ok_or_else(|| LedgerError::Validation("input value overflows".to_string()))?;
    let output_total = draft.output_total();
    if Some(input_total) != output_total.checked_add(draft.fee) {
        return Err(LedgerError::UnbalancedTransaction {
            inputs: input_total,
            outputs: output_total,
            fee: draft.fee,
        });
    }

    if let Some(index) = draft
        .outputs
        .iter()
        .position(|o| o.address.is_script() && o.datum.is_none())
    {
        return Err(LedgerError::MissingDatum(index));
    }

    for (position, reference) in draft.inputs.iter().enumerate() {
        let is_script = by_reference
            .get(reference)
            .is_some_and(|u| u.address.is_script());
        let redeemed = draft.redeemers.contains_key(&position);
        if is_script && !redeemed {
            return Err(LedgerError::MissingRedeemer(*reference));
        }
        if redeemed && !is_script {
            return Err(LedgerError::Validation(format!(
                "redeemer for {reference}, which is not locked by a script"
            )));
        }
    }
    if let Some(position) = draft.redeemers.keys().find(|p| **p >= draft.inputs.len()) {
        return Err(LedgerError::Validation(format!(
            "redeemer at position {position} has no input"
        )));
    }
    Ok(())
}

/// Maps each draft input to its UTxO, rejecting repeated or unknown ones.
fn resolve<'a>(
    draft: &TransactionDraft,
    resolved: &'a [Utxo],
) -> Result<BTreeMap<OutputReference, &'a Utxo>> {
    let mut by_reference = BTreeMap::new();
    for utxo in resolved {
        if by_reference.insert(utxo.reference, utxo).is_some() {
            return Err(LedgerError::Validation(format!(
                "input {} is listed more than once",
                utxo.reference
            )));
        }
    }
    if let Some(missing) = draft.inputs.iter().find(|r| !by_reference.contains_key(r)) {
        return Err(LedgerError::Validation(format!("input {missing} is not resolved")));
    }
    if let Some(extra) = by_reference.keys().find(|r| !draft.inputs.contains(r)) {
        return Err(LedgerError::Validation(format!("{extra} is not an input")));
    }
    Ok(by_reference)
}

/// Assemble: ℛ𝑞 × 𝒰* × 𝒫 → 𝒯
///
/// 1. Reject declared outputs below the minimum output value
/// 2. Select wallet inputs for Σ outputs + fee - Σ script inputs
/// 3. Converge the fee and change over the selection
/// 4. If inputs fall short of the converged fee, raise the target and reselect
/// 5. For script spends, pick collateral covering ⌈fee × collateral% / 100⌉
/// 6. Check balance, datums and redeemers
pub fn assemble(
    request: &TransactionRequest,
    wallet: &[Utxo],
    params: &ProtocolParams,
    settings: &BuildSettings,
) -> Result<TransactionDraft> {
    if let Some((index, output)) = request
        .outputs
        .iter()
        .enumerate()
        .find(|(_, o)| o.value < settings.min_output)
    {
        return Err(LedgerError::Validation(format!(
            "output {index} carries {} lovelace, below the minimum of {}",
            output.value, settings.min_output
        )));
    }

    let spending: BTreeSet<OutputReference> = request
        .script_inputs
        .iter()
        .map(|s| s.utxo.reference)
        .collect();
    let candidates: Vec<Utxo> = wallet
        .iter()
        .filter(|u| u.is_plain() && !spending.contains(&u.reference))
        .cloned()
        .collect();

    let script_total: Amount = request.script_inputs.iter().map(|s| s.utxo.value).sum();
    let declared_total: Amount = request.outputs.iter().map(|o| o.value).sum();
    let signers = request.signer_count();
    let mut fee_target: Amount = 0;

    for round in 0..settings.fee.max_iterations {
        let need = (declared_total + fee_target).saturating_sub(script_total);
        let chosen = if need == 0 && !request.script_inputs.is_empty() {
            Selection {
                chosen: Vec::new(),
                change: 0,
                folded: 0,
            }
        } else {
            selection::select(&candidates, need, settings.max_inputs)?
        };
        debug!(
            "round {}: selected {} wallet inputs worth {} for target {}",
            round,
            chosen.chosen.len(),
            chosen.total(),
            need
        );

        let mut resolved: Vec<Utxo> = request.script_inputs.iter().map(|s| s.utxo.clone()).collect();
        resolved.extend(chosen.chosen.iter().cloned());

        let mut draft = skeleton(request, &resolved, settings)?;
        if !request.script_inputs.is_empty() {
            let collateral = pick_collateral(&candidates, fee_target, params, settings.min_output)?;
            draft.collateral.insert(collateral.reference);
            draft.script_data_hash = Some(serialize::script_data_hash(&draft, &params.language_views)?);
        }

        let input_total = script_total + chosen.total();
        let draft = match fee::converge(
            draft,
            input_total,
            &request.change_address,
            params,
            signers,
            &settings.fee,
        ) {
            Ok(draft) => draft,
            Err(LedgerError::InsufficientFunds { required, .. }) => {
                fee_target = required.saturating_sub(declared_total);
                continue;
            }
            Err(e) => return Err(e),
        };

        if !request.script_inputs.is_empty() && collateral_short(&draft, &candidates, params) {
            fee_target = draft.fee;
            continue;
        }

        check(&draft, &resolved)?;
        info!(
            "assembled transaction: {} inputs, {} outputs, fee {}",
            draft.inputs.len(),
            draft.outputs.len(),
            draft.fee
        );
        return Ok(draft);
    }

    Err(LedgerError::FeeConvergence(settings.fee.max_iterations))
}

/// Inputs, declared outputs, redeemers, signers and validator, with no fee.
fn skeleton(
    request: &TransactionRequest,
    resolved: &[Utxo],
    settings: &BuildSettings,
) -> Result<TransactionDraft> {
    let mut draft = TransactionDraft {
        inputs: resolved.iter().map(|u| u.reference).collect(),
        outputs: request.outputs.clone(),
        required_signers: request.required_signers.clone(),
        ..Default::default()
    };
    for script_input in &request.script_inputs {
        let position = draft
            .input_position(&script_input.utxo.reference)
            .ok_or(LedgerError::MissingRedeemer(script_input.utxo.reference))?;
        let data = settings
            .datum_encoding
            .encode(&script_input.action.to_record())?;
        draft.redeemers.insert(
            position,
            Redeemer {
                action: script_input.action,
                data,
                ex_units: settings.ex_units,
            },
        );
    }
    if !request.script_inputs.is_empty() {
        draft.scripts.extend(request.validator.iter().cloned());
    }
    Ok(draft)
}

/// CollateralRequired: ⌈fee × collateral_percent / 100⌉
///
/// Saturates at the largest amount, which no UTxO can cover.
pub fn required_collateral(fee: Amount, params: &ProtocolParams) -> Amount {
    let required = (fee as u128 * params.collateral_percent as u128).div_ceil(100);
    Amount::try_from(required).unwrap_or(Amount::MAX)
}

/// Smallest plain output covering the collateral for `fee`, with a floor of
/// `min_output`.
fn pick_collateral<'a>(
    candidates: &'a [Utxo],
    fee: Amount,
    params: &ProtocolParams,
    min_output: Amount,
) -> Result<&'a Utxo> {
    let required = required_collateral(fee, params).max(min_output);
    candidates
        .iter()
        .filter(|u| u.value >= required)
        .min_by_key(|u| u.value)
        .ok_or_else(|| LedgerError::InsufficientFunds {
            available: candidates.iter().map(|u| u.value).max().unwrap_or(0),
            required,
        })
}

fn collateral_short(draft: &TransactionDraft, candidates: &[Utxo], params: &ProtocolParams) -> bool {
    let required = required_collateral(draft.fee, params);
    let covered: Amount = candidates
        .iter()
        .filter(|u| draft.collateral.contains(&u.reference))
        .map(|u| u.value)
        .sum();
    covered < required
}
