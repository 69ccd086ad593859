//! Ledger constants and library defaults

/// Lovelace per ADA
pub const LOVELACE_PER_ADA: u64 = 1_000_000;

/// Length of a transaction id, data hash or script data hash: blake2b-256
pub const HASH_LEN: usize = 32;

/// Length of a key hash or script hash: blake2b-224
pub const KEY_HASH_LEN: usize = 28;

/// Length of an Ed25519 verification key
pub const VERIFICATION_KEY_LEN: usize = 32;

/// Length of an Ed25519 signature
pub const SIGNATURE_LEN: usize = 64;

/// Fee coefficient per serialized byte (`min_fee_a`) when the ledger does not supply one
pub const DEFAULT_FEE_PER_BYTE: u64 = 44;

/// Fixed fee component (`min_fee_b`) when the ledger does not supply one
pub const DEFAULT_FEE_FIXED: u64 = 155_381;

/// Price of one memory unit: 0.0577 lovelace
pub const DEFAULT_PRICE_MEM: (u64, u64) = (577, 10_000);

/// Price of one CPU step: 0.0000721 lovelace
pub const DEFAULT_PRICE_STEPS: (u64, u64) = (721, 10_000_000);

/// Collateral required as a percentage of the fee
pub const DEFAULT_COLLATERAL_PERCENT: u64 = 150;

/// Maximum serialized transaction size
pub const MAX_TX_SIZE: usize = 16_384;

/// Upper bound on fee refinement rounds
pub const MAX_FEE_ITERATIONS: usize = 10;

/// Maximum inputs consumed by one selection
pub const DEFAULT_MAX_INPUTS: usize = 20;

/// Smallest change output worth creating; anything less goes to the fee
pub const MIN_CHANGE_VALUE: u64 = 1_000_000;

/// Smallest value a declared output may carry
pub const MIN_OUTPUT_VALUE: u64 = 1_000_000;

/// Value locked with each DID state record
pub const DEFAULT_LOCK_VALUE: u64 = 2_000_000;

/// Execution budget reserved for one validator run: memory units
pub const DEFAULT_EX_UNITS_MEM: u64 = 500_000;

/// Execution budget reserved for one validator run: CPU steps
pub const DEFAULT_EX_UNITS_STEPS: u64 = 200_000_000;

/// Byte strings longer than this are chunked in Plutus Data
pub const PLUTUS_BYTES_CHUNK: usize = 64;
