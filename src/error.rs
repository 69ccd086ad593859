//! Error types for transaction construction and ledger interaction

use thiserror::Error;

use crate::types::{Amount, OutputReference};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: Amount, required: Amount },

    #[error("Unbalanced transaction: inputs {inputs} != outputs {outputs} + fee {fee}")]
    UnbalancedTransaction {
        inputs: Amount,
        outputs: Amount,
        fee: Amount,
    },

    #[error("Output {0} locks value at a script address without a datum")]
    MissingDatum(usize),

    #[error("Script input {0} has no redeemer")]
    MissingRedeemer(OutputReference),

    #[error("Fee did not converge after {0} iterations")]
    FeeConvergence(usize),

    #[error("Ledger rejected transaction: {0}")]
    Rejection(String),

    #[error("Ledger query failed: {0}")]
    Query(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Whether the same call may succeed if repeated unchanged.
    ///
    /// Only transient query and transport failures qualify. A rejection may
    /// succeed after the caller re-queries its UTxOs and rebuilds, which is
    /// a different call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Query(_) | LedgerError::Transport(_))
    }
}

impl From<minicbor::decode::Error> for LedgerError {
    fn from(e: minicbor::decode::Error) -> Self {
        LedgerError::Encoding(format!("cbor: {e}"))
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for LedgerError {
    fn from(e: minicbor::encode::Error<E>) -> Self {
        LedgerError::Encoding(format!("cbor: {e}"))
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        LedgerError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(LedgerError::Query("503".into()).is_retryable());
        assert!(LedgerError::Transport("reset".into()).is_retryable());
        assert!(!LedgerError::Rejection("inputs not found".into()).is_retryable());
        assert!(!LedgerError::Validation("empty identifier".into()).is_retryable());
        assert!(!LedgerError::FeeConvergence(10).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = LedgerError::InsufficientFunds {
            available: 10,
            required: 20,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: available 10, required 20"
        );
        assert_eq!(
            LedgerError::MissingDatum(1).to_string(),
            "Output 1 locks value at a script address without a datum"
        );
    }
}
