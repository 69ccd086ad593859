//! Deterministic largest-first input selection

use crate::error::{LedgerError, Result};
use crate::types::*;

/// Outcome of a selection: consumed outputs and leftover change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub chosen: Vec<Utxo>,
    pub change: Amount,
    /// Change that was too small for its own output and goes to the fee
    pub folded: Amount,
}

impl Selection {
    pub fn total(&self) -> Amount {
        self.chosen.iter().map(|u| u.value).sum()
    }

    /// FoldDust: change < m → (0, change)
    ///
    /// Change below the minimum viable output is not worth an output of its
    /// own; it is handed to the fee instead.
    pub fn fold_dust(mut self, min_change: Amount) -> Self {
        if self.change > 0 && self.change < min_change {
            self.folded += self.change;
            self.change = 0;
        }
        self
    }
}

/// Select: 𝒰* × ℕ × ℕ → 𝒰* × ℕ
///
/// For candidates us, target t and cap k:
/// 1. Order us by value descending, ties keeping input order
/// 2. Take from the front while Σ taken < t and |taken| < k
/// 3. If Σ taken < t: fail with InsufficientFunds
/// 4. Return (taken, Σ taken - t)
pub fn select(available: &[Utxo], target: Amount, max_inputs: usize) -> Result<Selection> {
    let mut candidates: Vec<&Utxo> = available.iter().collect();
    // stable: equal values keep their input order
    candidates.sort_by(|a, b| b.value.cmp(&a.value));

    let mut chosen = Vec::new();
    let mut cumulative: Amount = 0;
    for utxo in candidates.into_iter().take(max_inputs) {
        if cumulative >= target && !chosen.is_empty() {
            break;
        }
        cumulative += utxo.value;
        chosen.push(utxo.clone());
    }

    if cumulative < target {
        return Err(LedgerError::InsufficientFunds {
            available: cumulative,
            required: target,
        });
    }

    Ok(Selection {
        chosen,
        change: cumulative - target,
        folded: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo(id: u8, value: Amount) -> Utxo {
        Utxo::plain(
            OutputReference::new([id; 32], 0),
            Address::key(Network::Testnet, [0; 28]),
            value,
        )
    }

    #[test]
    fn test_select_single_large() {
        let selection = select(&[utxo(1, 5_000_000)], 2_200_000, 10).unwrap();
        assert_eq!(selection.chosen.len(), 1);
        assert_eq!(selection.change, 2_800_000);
    }

    #[test]
    fn test_select_largest_first_and_stops_early() {
        let available = vec![utxo(1, 1_000_000), utxo(2, 4_000_000), utxo(3, 3_000_000)];
        let selection = select(&available, 6_000_000, 10).unwrap();
        let ids: Vec<u8> = selection.chosen.iter().map(|u| u.reference.transaction_id[0]).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(selection.change, 1_000_000);
    }

    #[test]
    fn test_select_ties_keep_input_order() {
        let available = vec![utxo(7, 2_000_000), utxo(3, 2_000_000), utxo(5, 2_000_000)];
        let selection = select(&available, 3_000_000, 10).unwrap();
        let ids: Vec<u8> = selection.chosen.iter().map(|u| u.reference.transaction_id[0]).collect();
        assert_eq!(ids, vec![7, 3]);
    }

    #[test]
    fn test_select_insufficient() {
        let available = vec![utxo(1, 1_000_000), utxo(2, 1_000_000)];
        let err = select(&available, 3_000_000, 10).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                available: 2_000_000,
                required: 3_000_000
            }
        );
    }

    #[test]
    fn test_select_respects_max_inputs() {
        let available = vec![utxo(1, 1_000_000), utxo(2, 1_000_000), utxo(3, 1_000_000)];
        assert!(select(&available, 3_000_000, 2).is_err());
        assert!(select(&available, 3_000_000, 3).is_ok());
    }

    #[test]
    fn test_select_zero_target_takes_one_input() {
        let selection = select(&[utxo(1, 1_000_000)], 0, 10).unwrap();
        assert_eq!(selection.chosen.len(), 1);
        assert_eq!(selection.change, 1_000_000);
    }

    #[test]
    fn test_fold_dust() {
        let selection = select(&[utxo(1, 2_500_000)], 2_000_000, 10).unwrap();
        let folded = selection.fold_dust(1_000_000);
        assert_eq!(folded.change, 0);
        assert_eq!(folded.folded, 500_000);

        let kept = select(&[utxo(1, 5_000_000)], 2_000_000, 10)
            .unwrap()
            .fold_dust(1_000_000);
        assert_eq!(kept.change, 3_000_000);
        assert_eq!(kept.folded, 0);
    }
}
