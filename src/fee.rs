//! Fee estimation and change convergence
//!
//! The fee depends on the serialized size, the size depends on the fee and
//! change fields, so the two are refined together until the estimate stops
//! moving.

use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::serialize;
use crate::types::*;

/// Limits for [`converge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSettings {
    /// Change below this is folded into the fee
    pub min_change: Amount,
    pub max_iterations: usize,
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            min_change: crate::constants::MIN_CHANGE_VALUE,
            max_iterations: crate::constants::MAX_FEE_ITERATIONS,
        }
    }
}

/// EstimateFee: 𝒯 × 𝒫 × ℕ → ℕ
///
/// For draft tx, parameters p and s expected signers:
/// 1. size = |serialize(tx, s placeholder witnesses)|
/// 2. size > p.max_tx_size: fail with Validation
/// 3. fee = p.fixed + p.per_byte × size + Σ_{r ∈ redeemers} ⌈r.mem × p.mem + r.steps × p.steps⌉
pub fn estimate(draft: &TransactionDraft, params: &ProtocolParams, signers: usize) -> Result<Amount> {
    let placeholders = vec![
        VkeyWitness {
            vkey: [0; crate::constants::VERIFICATION_KEY_LEN],
            signature: [0; crate::constants::SIGNATURE_LEN],
        };
        signers
    ];
    let size = serialize::encode_transaction(draft, &placeholders)?.len();
    if size > params.max_tx_size {
        return Err(LedgerError::Validation(format!(
            "transaction of {size} bytes exceeds the {} byte limit",
            params.max_tx_size
        )));
    }

    let mut total = params.fee.fee_for_size(size)?;
    for redeemer in draft.redeemers.values() {
        total = total
            .checked_add(params.prices.fee_for(&redeemer.ex_units)?)
            .ok_or_else(|| LedgerError::Validation("fee overflows".to_string()))?;
    }
    Ok(total)
}

/// Converge: 𝒯 × ℕ × 𝒜 → 𝒯
///
/// `draft` carries the inputs and declared outputs; `input_total` is the
/// value they consume. Starting from fee 0:
/// 1. change = input_total - (Σ outputs + fee), fail with InsufficientFunds if negative
/// 2. change ≥ min_change: append a change output, otherwise fold it into the fee
/// 3. estimate the fee of the result
/// 4. estimate ≤ fee paid: done, otherwise fee = estimate and repeat
///
/// The returned draft is balanced: Σ inputs = Σ outputs + fee.
pub fn converge(
    mut draft: TransactionDraft,
    input_total: Amount,
    change_address: &Address,
    params: &ProtocolParams,
    signers: usize,
    settings: &FeeSettings,
) -> Result<TransactionDraft> {
    let declared = draft.outputs.clone();
    let declared_total = draft.output_total();
    let mut fee: Amount = 0;

    for iteration in 0..settings.max_iterations {
        let required = declared_total + fee;
        if input_total < required {
            return Err(LedgerError::InsufficientFunds {
                available: input_total,
                required,
            });
        }
        let change = input_total - required;

        draft.outputs = declared.clone();
        if change >= settings.min_change {
            draft.outputs.push(TransactionOutput::new(*change_address, change));
            draft.fee = fee;
        } else {
            draft.fee = fee + change;
        }

        let estimated = estimate(&draft, params, signers)?;
        debug!(
            "fee iteration {}: paying {}, estimated {}, change {}",
            iteration, draft.fee, estimated, change
        );
        if estimated <= draft.fee {
            return Ok(draft);
        }
        fee = estimated;
    }

    Err(LedgerError::FeeConvergence(settings.max_iterations))
}
