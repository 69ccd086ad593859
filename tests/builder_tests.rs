//! Transaction construction tests

use std::collections::BTreeMap;

use did_ledger::builder::{assemble, BuildSettings, TransactionRequest};
use did_ledger::fee::{self, FeeSettings};
use did_ledger::record::{Action, BoolEncoding, DidDatum};
use did_ledger::serialize;
use did_ledger::*;
use proptest::prelude::*;

fn wallet_address() -> Address {
    Address::key(Network::Testnet, [1; 28])
}

fn script_address() -> Address {
    Address::script(Network::Testnet, [8; 28])
}

fn plain(id: u8, value: Amount) -> Utxo {
    Utxo::plain(OutputReference::new([id; 32], 0), wallet_address(), value)
}

fn state_bytes() -> ByteString {
    let datum = DidDatum::new(b"did:ada:bob".to_vec(), b"Qmdoc".to_vec(), &[1; 28], 1_700_000_000_000).unwrap();
    DidLedger::new()
        .encode_record(&datum.to_record(BoolEncoding::Constructor))
        .unwrap()
}

#[test]
fn test_lock_without_datum_is_rejected() {
    let kit = DidLedger::new();
    let outputs = vec![
        TransactionOutput::new(script_address(), 2_000_000),
        TransactionOutput::new(wallet_address(), 2_800_000),
    ];
    let err = kit
        .build_transaction(&[plain(1, 5_000_000)], outputs, 200_000, BTreeMap::new())
        .unwrap_err();
    assert_eq!(err, LedgerError::MissingDatum(0));
    assert!(!err.is_retryable());
}

#[test]
fn test_assembled_lock_without_datum_is_rejected() {
    let request = TransactionRequest::new(wallet_address())
        .pay(TransactionOutput::new(script_address(), 2_000_000));
    let err = DidLedger::new()
        .assemble_transaction(&request, &[plain(1, 5_000_000)], &ProtocolParams::default())
        .unwrap_err();
    assert_eq!(err, LedgerError::MissingDatum(0));
}

#[test]
fn test_unbalanced_is_rejected() {
    let outputs = vec![TransactionOutput::new(wallet_address(), 5_000_000)];
    let err = DidLedger::new()
        .build_transaction(&[plain(1, 5_000_000)], outputs, 200_000, BTreeMap::new())
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnbalancedTransaction { .. }));
}

#[test]
fn test_repeated_input_is_counted_once() {
    let input = plain(1, 5_000_000);
    let outputs = vec![TransactionOutput::new(wallet_address(), 9_800_000)];
    let err = DidLedger::new()
        .build_transaction(&[input.clone(), input], outputs, 200_000, BTreeMap::new())
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[test]
fn test_check_sums_draft_inputs() {
    let kept = plain(1, 5_000_000);
    let stray = plain(2, 5_000_000);
    let mut draft = TransactionDraft::default();
    draft.inputs.insert(kept.reference);
    draft.outputs.push(TransactionOutput::new(wallet_address(), 9_800_000));
    draft.fee = 200_000;
    // a UTxO that is not an input cannot fund the draft
    assert!(matches!(
        did_ledger::builder::check(&draft, &[kept.clone(), stray]),
        Err(LedgerError::Validation(_))
    ));
    draft.outputs[0].value = 4_800_000;
    assert!(did_ledger::builder::check(&draft, &[kept]).is_ok());
}

#[test]
fn test_lock_serializes_and_decodes() {
    let request = TransactionRequest::new(wallet_address())
        .pay(TransactionOutput::new(script_address(), 2_000_000).with_datum(state_bytes()));
    let params = ProtocolParams::default();
    let draft = DidLedger::new()
        .assemble_transaction(&request, &[plain(1, 5_000_000), plain(2, 1_500_000)], &params)
        .unwrap();

    let bytes = serialize::encode_transaction(&draft, &[]).unwrap();
    let decoded = serialize::decode_transaction(&bytes).unwrap();
    assert_eq!(decoded.draft, draft);
    assert_eq!(decoded.id, serialize::transaction_id(&draft).unwrap());
    assert_eq!(decoded.draft.outputs[0].datum, Some(state_bytes()));
}

#[test]
fn test_fee_covers_one_signature() {
    let request = TransactionRequest::new(wallet_address())
        .pay(TransactionOutput::new(script_address(), 2_000_000).with_datum(state_bytes()));
    let params = ProtocolParams::default();
    let draft = assemble(&request, &[plain(1, 9_000_000)], &params, &BuildSettings::default()).unwrap();
    assert!(draft.fee >= fee::estimate(&draft, &params, 1).unwrap());
    assert!(draft.fee < fee::estimate(&draft, &params, 1).unwrap() + params.fee.per_byte * 10);
}

#[test]
fn test_revoke_returns_locked_value() {
    let locked = Utxo {
        inline_datum: Some(state_bytes()),
        ..Utxo::plain(OutputReference::new([3; 32], 0), script_address(), 2_000_000)
    };
    let request = TransactionRequest::new(wallet_address())
        .spend(locked.clone(), Action::Revoke)
        .signed_by([1; 28])
        .with_validator(vec![0x4e, 0x4d, 0x01, 0x00]);
    let draft = DidLedger::new()
        .assemble_transaction(&request, &[plain(1, 5_000_000)], &ProtocolParams::default())
        .unwrap();

    assert_eq!(draft.inputs.len(), 1);
    assert_eq!(draft.outputs.len(), 1);
    assert_eq!(draft.outputs[0].address, wallet_address());
    assert_eq!(draft.outputs[0].value + draft.fee, 2_000_000);
    assert_eq!(draft.collateral.len(), 1);
    assert_eq!(draft.redeemers.len(), 1);
}

proptest! {
    #[test]
    fn prop_fee_converges_for_small_transactions(
        inputs in 1u8..=10,
        outputs in prop::collection::vec(1_000_000u64..20_000_000, 1..=10),
        slack in 1_000_000u64..5_000_000,
    ) {
        let mut draft = TransactionDraft::default();
        for i in 0..inputs {
            draft.inputs.insert(OutputReference::new([i; 32], i as Natural));
        }
        for value in &outputs {
            draft.outputs.push(TransactionOutput::new(script_address(), *value).with_datum(vec![0x81, 0x00]));
        }
        let input_total: Amount = outputs.iter().sum::<Amount>() + slack;
        let params = ProtocolParams::default();

        let converged = fee::converge(
            draft,
            input_total,
            &wallet_address(),
            &params,
            1,
            &FeeSettings::default(),
        ).unwrap();

        prop_assert_eq!(converged.output_total() + converged.fee, input_total);
        prop_assert!(converged.fee >= fee::estimate(&converged, &params, 1).unwrap());
        let change = converged.outputs.len() - outputs.len();
        prop_assert!(change <= 1);
        if change == 1 {
            prop_assert!(converged.outputs.last().unwrap().value >= MIN_CHANGE_VALUE);
        }
    }
}
