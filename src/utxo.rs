//! UTxO set model for a single address
//!
//! A set is a snapshot of one query. It is never cached across a
//! submission boundary: build a fresh one before every transaction.

use std::collections::HashSet;

use crate::types::*;

/// UtxoSet: 𝒰𝒮 = 𝒜 × 𝒰*, in the order the ledger returned them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoSet {
    address: Address,
    utxos: Vec<Utxo>,
}

impl UtxoSet {
    pub fn new(address: Address, utxos: Vec<Utxo>) -> Self {
        Self { address, utxos }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.iter()
    }

    /// TotalValue: Σᵤ u.value
    pub fn total_value(&self) -> Amount {
        self.utxos.iter().map(|u| u.value).sum()
    }

    /// Outputs with no datum and no script attached.
    ///
    /// Anything carrying data is already committed to a script state and
    /// must not be spent as general funds.
    pub fn plain_outputs(&self) -> Vec<Utxo> {
        self.utxos.iter().filter(|u| u.is_plain()).cloned().collect()
    }

    /// Outputs carrying a datum hash, an inline datum or a script.
    pub fn script_outputs(&self) -> Vec<Utxo> {
        self.utxos.iter().filter(|u| !u.is_plain()).cloned().collect()
    }

    pub fn find_by_reference(&self, reference: &OutputReference) -> Option<&Utxo> {
        self.utxos.iter().find(|u| &u.reference == reference)
    }

    /// A copy of this set without the given references (e.g. inputs of
    /// in-flight submissions).
    pub fn excluding(&self, references: &HashSet<OutputReference>) -> Self {
        Self {
            address: self.address,
            utxos: self
                .utxos
                .iter()
                .filter(|u| !references.contains(&u.reference))
                .cloned()
                .collect(),
        }
    }
}

impl IntoIterator for UtxoSet {
    type Item = Utxo;
    type IntoIter = std::vec::IntoIter<Utxo>;

    fn into_iter(self) -> Self::IntoIter {
        self.utxos.into_iter()
    }
}
