//! Core ledger types for transaction construction

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use bech32::{FromBase32, ToBase32, Variant};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{LedgerError, Result};
use crate::record::Action;

/// Hash type: 256-bit hash
pub type Hash32 = [u8; 32];

/// Hash type: 224-bit hash (key and script hashes)
pub type Hash28 = [u8; 28];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Natural number type
pub type Natural = u64;

/// Value in lovelace
pub type Amount = u64;

/// Transaction id: blake2b-256 of the transaction body
pub type TransactionId = Hash32;

/// Hash of an Ed25519 verification key
pub type KeyHash = Hash28;

/// Hash of a validator script
pub type ScriptHash = Hash28;

/// OutputReference: 𝒪 = ℍ × ℕ
///
/// Ordering is the ledger's canonical input order: transaction id bytes,
/// then output index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputReference {
    pub transaction_id: TransactionId,
    pub output_index: Natural,
}

impl OutputReference {
    pub fn new(transaction_id: TransactionId, output_index: Natural) -> Self {
        Self {
            transaction_id,
            output_index,
        }
    }
}

impl fmt::Display for OutputReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", hex::encode(self.transaction_id), self.output_index)
    }
}

impl FromStr for OutputReference {
    type Err = LedgerError;

    /// Parses `<hex transaction id>#<index>`.
    fn from_str(s: &str) -> Result<Self> {
        let (id, index) = s
            .split_once('#')
            .ok_or_else(|| LedgerError::Validation(format!("malformed output reference: {s}")))?;
        let output_index = index
            .parse()
            .map_err(|_| LedgerError::Validation(format!("malformed output index: {index}")))?;
        Ok(Self::new(parse_hash32(id)?, output_index))
    }
}

/// Parses a hex-encoded 32-byte hash.
pub fn parse_hash32(s: &str) -> Result<Hash32> {
    let bytes = hex::decode(s).map_err(|e| LedgerError::Validation(format!("bad hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| LedgerError::Validation(format!("expected {HASH_LEN} bytes: {s}")))
}

/// Parses a hex-encoded 28-byte hash.
pub fn parse_hash28(s: &str) -> Result<Hash28> {
    let bytes = hex::decode(s).map_err(|e| LedgerError::Validation(format!("bad hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| LedgerError::Validation(format!("expected {KEY_HASH_LEN} bytes: {s}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Testnet,
}

impl Network {
    fn id(self) -> u8 {
        match self {
            Network::Mainnet => 1,
            Network::Testnet => 0,
        }
    }

    fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Network::Mainnet),
            0 => Ok(Network::Testnet),
            other => Err(LedgerError::Validation(format!("unknown network id {other}"))),
        }
    }

    fn hrp(self) -> &'static str {
        match self {
            Network::Mainnet => "addr",
            Network::Testnet => "addr_test",
        }
    }
}

impl FromStr for Network {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" | "preprod" | "preview" => Ok(Network::Testnet),
            other => Err(LedgerError::Config(format!("unknown network: {other}"))),
        }
    }
}

/// Payment or stake credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Credential {
    Key(KeyHash),
    Script(ScriptHash),
}

impl Credential {
    pub fn hash(&self) -> &Hash28 {
        match self {
            Credential::Key(h) | Credential::Script(h) => h,
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self, Credential::Script(_))
    }
}

/// Address: network × payment credential × optional stake credential
///
/// Byte layout: one header byte `(type << 4) | network_id`, the 28-byte
/// payment hash, then the 28-byte stake hash for base addresses. Types 0-3
/// are base addresses (bit 0: script payment, bit 1: script stake), types
/// 6 and 7 are enterprise addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub network: Network,
    pub payment: Credential,
    pub stake: Option<Credential>,
}

impl Address {
    /// Enterprise address paying to a verification key hash.
    pub fn key(network: Network, key_hash: KeyHash) -> Self {
        Self {
            network,
            payment: Credential::Key(key_hash),
            stake: None,
        }
    }

    /// Enterprise address locked by a validator script.
    pub fn script(network: Network, script_hash: ScriptHash) -> Self {
        Self {
            network,
            payment: Credential::Script(script_hash),
            stake: None,
        }
    }

    pub fn is_script(&self) -> bool {
        self.payment.is_script()
    }

    pub fn to_bytes(&self) -> ByteString {
        let kind: u8 = match (&self.payment, &self.stake) {
            (Credential::Key(_), Some(Credential::Key(_))) => 0,
            (Credential::Script(_), Some(Credential::Key(_))) => 1,
            (Credential::Key(_), Some(Credential::Script(_))) => 2,
            (Credential::Script(_), Some(Credential::Script(_))) => 3,
            (Credential::Key(_), None) => 6,
            (Credential::Script(_), None) => 7,
        };
        let mut bytes = Vec::with_capacity(1 + 2 * KEY_HASH_LEN);
        bytes.push((kind << 4) | self.network.id());
        bytes.extend_from_slice(self.payment.hash());
        if let Some(stake) = &self.stake {
            bytes.extend_from_slice(stake.hash());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = *bytes
            .first()
            .ok_or_else(|| LedgerError::Validation("empty address".to_string()))?;
        let network = Network::from_id(header & 0x0f)?;
        let kind = header >> 4;

        let hash_at = |offset: usize| -> Result<Hash28> {
            bytes
                .get(offset..offset + KEY_HASH_LEN)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| LedgerError::Validation("truncated address".to_string()))
        };

        let expected_len = match kind {
            0..=3 => 1 + 2 * KEY_HASH_LEN,
            6 | 7 => 1 + KEY_HASH_LEN,
            other => {
                return Err(LedgerError::Validation(format!(
                    "unsupported address type {other}"
                )))
            }
        };
        if bytes.len() != expected_len {
            return Err(LedgerError::Validation(format!(
                "address of type {kind} must be {expected_len} bytes, got {}",
                bytes.len()
            )));
        }

        let payment_hash = hash_at(1)?;
        let payment = if kind & 1 == 1 {
            Credential::Script(payment_hash)
        } else {
            Credential::Key(payment_hash)
        };
        let stake = match kind {
            0..=3 => {
                let stake_hash = hash_at(1 + KEY_HASH_LEN)?;
                Some(if kind & 2 == 2 {
                    Credential::Script(stake_hash)
                } else {
                    Credential::Key(stake_hash)
                })
            }
            _ => None,
        };

        Ok(Self {
            network,
            payment,
            stake,
        })
    }

    pub fn to_bech32(&self) -> Result<String> {
        bech32::encode(
            self.network.hrp(),
            self.to_bytes().to_base32(),
            Variant::Bech32,
        )
        .map_err(|e| LedgerError::Encoding(format!("bech32: {e}")))
    }

    pub fn from_bech32(s: &str) -> Result<Self> {
        let (hrp, data, _variant) =
            bech32::decode(s).map_err(|e| LedgerError::Validation(format!("bech32: {e}")))?;
        let bytes = Vec::<u8>::from_base32(&data)
            .map_err(|e| LedgerError::Validation(format!("bech32: {e}")))?;
        let address = Self::from_bytes(&bytes)?;
        if address.network.hrp() != hrp {
            return Err(LedgerError::Validation(format!(
                "prefix {hrp} does not match network {:?}",
                address.network
            )));
        }
        Ok(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_bech32() {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str(&hex::encode(self.to_bytes())),
        }
    }
}

impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_bech32(s)
    }
}

/// Unspent output: 𝒰 = 𝒪 × 𝒜 × ℕ × ℍ? × 𝕊? × 𝕊?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub reference: OutputReference,
    pub address: Address,
    pub value: Amount,
    pub data_hash: Option<Hash32>,
    pub inline_datum: Option<ByteString>,
    pub script: Option<ByteString>,
}

impl Utxo {
    /// An output with no datum and no script: general spending money.
    pub fn plain(reference: OutputReference, address: Address, value: Amount) -> Self {
        Self {
            reference,
            address,
            value,
            data_hash: None,
            inline_datum: None,
            script: None,
        }
    }

    pub fn is_plain(&self) -> bool {
        self.data_hash.is_none() && self.inline_datum.is_none() && self.script.is_none()
    }
}

/// Transaction output: address × value × datum? × script?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub address: Address,
    pub value: Amount,
    pub datum: Option<ByteString>,
    pub script: Option<ByteString>,
}

impl TransactionOutput {
    pub fn new(address: Address, value: Amount) -> Self {
        Self {
            address,
            value,
            datum: None,
            script: None,
        }
    }

    pub fn with_datum(mut self, datum: ByteString) -> Self {
        self.datum = Some(datum);
        self
    }

    pub fn with_script(mut self, script: ByteString) -> Self {
        self.script = Some(script);
        self
    }
}

/// Execution budget reserved for one validator run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExUnits {
    pub mem: Natural,
    pub steps: Natural,
}

impl Default for ExUnits {
    fn default() -> Self {
        Self {
            mem: DEFAULT_EX_UNITS_MEM,
            steps: DEFAULT_EX_UNITS_STEPS,
        }
    }
}

/// Spend-time data for a script input: the action and its encoded form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redeemer {
    pub action: Action,
    pub data: ByteString,
    pub ex_units: ExUnits,
}

/// Transaction under construction.
///
/// `redeemers` is keyed by position in the canonical (sorted) input order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionDraft {
    pub inputs: BTreeSet<OutputReference>,
    pub outputs: Vec<TransactionOutput>,
    pub fee: Amount,
    pub redeemers: BTreeMap<usize, Redeemer>,
    pub collateral: BTreeSet<OutputReference>,
    pub required_signers: BTreeSet<KeyHash>,
    pub scripts: Vec<ByteString>,
    pub script_data_hash: Option<Hash32>,
}

impl TransactionDraft {
    pub fn output_total(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Position of `reference` in the canonical input order.
    pub fn input_position(&self, reference: &OutputReference) -> Option<usize> {
        self.inputs.iter().position(|r| r == reference)
    }
}

/// Verification key and signature over the transaction id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VkeyWitness {
    pub vkey: [u8; VERIFICATION_KEY_LEN],
    pub signature: [u8; SIGNATURE_LEN],
}

/// Signed transaction ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub id: TransactionId,
    pub bytes: ByteString,
}

/// Linear fee model: fixed + per_byte × size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearFee {
    pub fixed: Amount,
    pub per_byte: Amount,
}

impl LinearFee {
    /// Fails with `Validation` when the fee does not fit in an amount.
    pub fn fee_for_size(&self, size: usize) -> Result<Amount> {
        Amount::try_from(size)
            .ok()
            .and_then(|size| self.per_byte.checked_mul(size))
            .and_then(|variable| variable.checked_add(self.fixed))
            .ok_or_else(|| {
                LedgerError::Validation(format!(
                    "fee for {size} bytes overflows with {} + {} per byte",
                    self.fixed, self.per_byte
                ))
            })
    }
}

impl Default for LinearFee {
    fn default() -> Self {
        Self {
            fixed: DEFAULT_FEE_FIXED,
            per_byte: DEFAULT_FEE_PER_BYTE,
        }
    }
}

/// Non-negative rational number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub numerator: u64,
    pub denominator: u64,
}

impl Rational {
    pub fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Approximates a decimal price with a fixed denominator.
    pub fn from_f64(value: f64, denominator: u64) -> Self {
        Self::new((value * denominator as f64).round() as u64, denominator)
    }
}

/// Prices of script execution units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPrices {
    pub mem: Rational,
    pub steps: Rational,
}

impl ExecutionPrices {
    /// ceil(mem × price_mem + steps × price_steps)
    pub fn fee_for(&self, units: &ExUnits) -> Result<Amount> {
        let (mn, md) = (self.mem.numerator as u128, self.mem.denominator.max(1) as u128);
        let (sn, sd) = (self.steps.numerator as u128, self.steps.denominator.max(1) as u128);
        let overflow = || {
            LedgerError::Validation(format!(
                "execution fee overflows for {} mem and {} steps",
                units.mem, units.steps
            ))
        };
        let mem = (units.mem as u128)
            .checked_mul(mn)
            .and_then(|x| x.checked_mul(sd))
            .ok_or_else(overflow)?;
        let steps = (units.steps as u128)
            .checked_mul(sn)
            .and_then(|x| x.checked_mul(md))
            .ok_or_else(overflow)?;
        let numerator = mem.checked_add(steps).ok_or_else(overflow)?;
        Amount::try_from(numerator.div_ceil(md * sd)).map_err(|_| overflow())
    }
}

impl Default for ExecutionPrices {
    fn default() -> Self {
        Self {
            mem: Rational::new(DEFAULT_PRICE_MEM.0, DEFAULT_PRICE_MEM.1),
            steps: Rational::new(DEFAULT_PRICE_STEPS.0, DEFAULT_PRICE_STEPS.1),
        }
    }
}

/// Protocol parameters consumed by fee estimation and collateral selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    pub fee: LinearFee,
    pub prices: ExecutionPrices,
    pub collateral_percent: u64,
    pub max_tx_size: usize,
    /// Pre-encoded language views folded into the script data hash
    pub language_views: ByteString,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            fee: LinearFee::default(),
            prices: ExecutionPrices::default(),
            collateral_percent: DEFAULT_COLLATERAL_PERCENT,
            max_tx_size: MAX_TX_SIZE,
            language_views: Vec::new(),
        }
    }
}

/// Ledger view of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed { block: String, slot: Natural },
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_reference_ordering() {
        let a = OutputReference::new([1; 32], 5);
        let b = OutputReference::new([1; 32], 7);
        let c = OutputReference::new([2; 32], 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_output_reference_parse_display() {
        let r = OutputReference::new([0xab; 32], 3);
        let parsed: OutputReference = r.to_string().parse().unwrap();
        assert_eq!(parsed, r);
        assert!("deadbeef".parse::<OutputReference>().is_err());
    }

    #[test]
    fn test_enterprise_address_bytes() {
        let addr = Address::key(Network::Testnet, [7; 28]);
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), 29);
        assert_eq!(bytes[0], 0x60);
        assert_eq!(Address::from_bytes(&bytes).unwrap(), addr);

        let script = Address::script(Network::Mainnet, [9; 28]);
        assert_eq!(script.to_bytes()[0], 0x71);
        assert!(script.is_script());
    }

    #[test]
    fn test_base_address_bytes() {
        let addr = Address {
            network: Network::Testnet,
            payment: Credential::Script([1; 28]),
            stake: Some(Credential::Key([2; 28])),
        };
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), 57);
        assert_eq!(bytes[0], 0x10);
        assert_eq!(Address::from_bytes(&bytes).unwrap(), addr);
    }

    #[test]
    fn test_address_bech32() {
        let addr = Address::key(Network::Testnet, [3; 28]);
        let text = addr.to_bech32().unwrap();
        assert!(text.starts_with("addr_test1"));
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_address_rejects_bad_length() {
        assert!(Address::from_bytes(&[0x60, 1, 2, 3]).is_err());
        assert!(Address::from_bytes(&[]).is_err());
        assert!(Address::from_bytes(&[0x40; 29]).is_err());
    }

    #[test]
    fn test_linear_fee() {
        let fee = LinearFee {
            fixed: 155_381,
            per_byte: 44,
        };
        assert_eq!(fee.fee_for_size(0).unwrap(), 155_381);
        assert_eq!(fee.fee_for_size(300).unwrap(), 155_381 + 13_200);
    }

    #[test]
    fn test_execution_prices_round_up() {
        let prices = ExecutionPrices::default();
        let units = ExUnits {
            mem: 500_000,
            steps: 200_000_000,
        };
        // 500_000 * 0.0577 = 28_850; 200_000_000 * 0.0000721 = 14_420
        assert_eq!(prices.fee_for(&units).unwrap(), 43_270);
        assert_eq!(prices.fee_for(&ExUnits { mem: 1, steps: 0 }).unwrap(), 1);
    }

    #[test]
    fn test_fee_overflow_is_an_error() {
        let fee = LinearFee {
            fixed: u64::MAX,
            per_byte: 44,
        };
        assert!(matches!(fee.fee_for_size(1), Err(LedgerError::Validation(_))));
        let fee = LinearFee {
            fixed: 0,
            per_byte: u64::MAX / 2,
        };
        assert!(matches!(fee.fee_for_size(3), Err(LedgerError::Validation(_))));

        let prices = ExecutionPrices {
            mem: Rational::new(u64::MAX, 1),
            steps: Rational::new(u64::MAX, 1),
        };
        let units = ExUnits {
            mem: u64::MAX,
            steps: u64::MAX,
        };
        assert!(matches!(prices.fee_for(&units), Err(LedgerError::Validation(_))));
        assert!(matches!(
            prices.fee_for(&ExUnits { mem: 2, steps: 0 }),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_plain_utxo() {
        let mut utxo = Utxo::plain(
            OutputReference::new([0; 32], 0),
            Address::key(Network::Testnet, [0; 28]),
            5_000_000,
        );
        assert!(utxo.is_plain());
        utxo.inline_datum = Some(vec![0x81, 0x00]);
        assert!(!utxo.is_plain());
    }
}
