//! Hash functions used by the ledger model

use blake2::digest::consts::{U28, U32};
use blake2::{Blake2b, Digest};
use sha2::Sha256;

use crate::types::{Hash28, Hash32};

type Blake2b224 = Blake2b<U28>;
type Blake2b256 = Blake2b<U32>;

/// blake2b-256: transaction ids, datum hashes, script data hashes
pub fn blake2b_256(data: &[u8]) -> Hash32 {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Blake2b256::digest(data));
    out
}

/// blake2b-224: verification key hashes and script hashes
pub fn blake2b_224(data: &[u8]) -> Hash28 {
    let mut out = [0u8; 28];
    out.copy_from_slice(&Blake2b224::digest(data));
    out
}

/// sha2-256, used for content addressing of off-chain blobs
pub fn sha256(data: &[u8]) -> Hash32 {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// ScriptHash: blake2b-224(0x03 ‖ script), the Plutus V3 language prefix
pub fn plutus_v3_script_hash(script: &[u8]) -> Hash28 {
    let mut hasher = Blake2b224::new();
    hasher.update([PLUTUS_V3_PREFIX]);
    hasher.update(script);
    let mut out = [0u8; 28];
    out.copy_from_slice(&hasher.finalize());
    out
}

const PLUTUS_V3_PREFIX: u8 = 0x03;
