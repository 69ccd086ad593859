//! Input selection tests

use did_ledger::selection::select;
use did_ledger::*;
use proptest::prelude::*;

fn wallet() -> Address {
    Address::key(Network::Testnet, [4; 28])
}

fn utxos(values: &[Amount]) -> Vec<Utxo> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| Utxo::plain(OutputReference::new([i as u8; 32], i as Natural), wallet(), *v))
        .collect()
}

#[test]
fn test_single_output_covers_payment_and_fee() {
    let selection = select(&utxos(&[5_000_000]), 2_000_000 + 200_000, 20).unwrap();
    assert_eq!(selection.chosen.len(), 1);
    assert_eq!(selection.chosen[0].value, 5_000_000);
    assert_eq!(selection.change, 2_800_000);
}

#[test]
fn test_largest_first() {
    let selection = select(&utxos(&[1_000_000, 7_000_000, 3_000_000]), 8_000_000, 20).unwrap();
    let values: Vec<Amount> = selection.chosen.iter().map(|u| u.value).collect();
    assert_eq!(values, vec![7_000_000, 3_000_000]);
    assert_eq!(selection.change, 2_000_000);
}

#[test]
fn test_cap_limits_inputs() {
    let err = select(&utxos(&[1_000_000; 5]), 4_000_000, 3).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            available: 3_000_000,
            required: 4_000_000
        }
    ));
}

#[test]
fn test_empty_wallet() {
    assert!(matches!(
        select(&[], 1, 20),
        Err(LedgerError::InsufficientFunds { available: 0, .. })
    ));
}

#[test]
fn test_dust_change_folds_into_fee() {
    let selection = select(&utxos(&[2_300_000]), 2_000_000, 20)
        .unwrap()
        .fold_dust(MIN_CHANGE_VALUE);
    assert_eq!(selection.change, 0);
    assert_eq!(selection.folded, 300_000);
}

proptest! {
    #[test]
    fn prop_selection_covers_target(
        values in prop::collection::vec(1u64..50_000_000, 1..30),
        target in 0u64..200_000_000,
    ) {
        let available = utxos(&values);
        match select(&available, target, 20) {
            Ok(selection) => {
                prop_assert!(selection.total() >= target);
                prop_assert_eq!(selection.total() - target, selection.change);
                prop_assert!(selection.chosen.len() <= 20);
            }
            Err(LedgerError::InsufficientFunds { available: got, required }) => {
                prop_assert_eq!(required, target);
                prop_assert!(got < target);
            }
            Err(e) => prop_assert!(false, "unexpected error {}", e),
        }
    }

    #[test]
    fn prop_selection_is_deterministic(
        values in prop::collection::vec(1u64..10_000_000, 1..20),
        target in 0u64..50_000_000,
    ) {
        let available = utxos(&values);
        prop_assert_eq!(select(&available, target, 20).ok(), select(&available, target, 20).ok());
    }
}
