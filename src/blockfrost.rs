//! Blockfrost-backed ledger service
//!
//! Talks to the Blockfrost REST API with the blocking `reqwest` client.
//! Responses are mapped into the crate's own types here and nowhere else.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::ledger::LedgerService;
use crate::serialize::plutus_v3_language_views;
use crate::types::*;

const PAGE_SIZE: usize = 100;
/// Denominator used when turning decimal prices into rationals
const PRICE_DENOMINATOR: u64 = 10_000_000;
const LOVELACE_UNIT: &str = "lovelace";
const PLUTUS_V3_COST_MODEL: &str = "PlutusV3";

pub struct BlockfrostLedger {
    base_url: String,
    project_id: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct AmountEntry {
    unit: String,
    quantity: String,
}

#[derive(Debug, Deserialize)]
struct UtxoEntry {
    tx_hash: String,
    output_index: u64,
    amount: Vec<AmountEntry>,
    data_hash: Option<String>,
    inline_datum: Option<String>,
    reference_script_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScriptCbor {
    cbor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpochParameters {
    min_fee_a: u64,
    min_fee_b: u64,
    max_tx_size: usize,
    price_mem: Option<f64>,
    price_step: Option<f64>,
    collateral_percent: Option<u64>,
    /// Cost models as ordered integer lists, keyed by language name
    cost_models_raw: Option<HashMap<String, Vec<i64>>>,
}

#[derive(Debug, Deserialize)]
struct TxInfo {
    block: String,
    slot: u64,
}

impl BlockfrostLedger {
    pub fn new(base_url: impl Into<String>, project_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            project_id: project_id.into(),
            client,
        })
    }

    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        let project_id = config
            .project_id
            .clone()
            .ok_or_else(|| LedgerError::Config("Blockfrost project id is not set".to_string()))?;
        Self::new(
            config.base_url.clone(),
            project_id,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn get(&self, path: &str) -> Result<Response> {
        let url = self.endpoint(path);
        self.client
            .get(&url)
            .header("project_id", &self.project_id)
            .send()
            .map_err(|e| LedgerError::Transport(format!("HTTP GET {url} failed: {e}")))
    }

    fn fetch_script(&self, hash: &str) -> Result<Option<ByteString>> {
        let resp = self.get(&format!("scripts/{hash}/cbor"))?;
        let body: ScriptCbor = parse_json(check_status(resp)?)?;
        body.cbor
            .map(|h| hex::decode(h).map_err(|e| LedgerError::Encoding(format!("script cbor: {e}"))))
            .transpose()
    }

    fn to_utxo(&self, address: &Address, entry: UtxoEntry) -> Result<Option<Utxo>> {
        let mut value = None;
        for amount in &entry.amount {
            if amount.unit != LOVELACE_UNIT {
                // native assets would be burned by a lovelace-only transaction
                warn!(
                    "skipping {}#{} carrying {}",
                    entry.tx_hash, entry.output_index, amount.unit
                );
                return Ok(None);
            }
            value = Some(amount.quantity.parse::<Amount>().map_err(|e| {
                LedgerError::Encoding(format!("bad lovelace quantity {}: {e}", amount.quantity))
            })?);
        }
        let script = match &entry.reference_script_hash {
            Some(hash) => self.fetch_script(hash)?,
            None => None,
        };
        Ok(Some(Utxo {
            reference: OutputReference::new(parse_hash32(&entry.tx_hash)?, entry.output_index),
            address: *address,
            value: value.unwrap_or(0),
            data_hash: entry.data_hash.as_deref().map(parse_hash32).transpose()?,
            inline_datum: entry
                .inline_datum
                .as_deref()
                .map(hex::decode)
                .transpose()
                .map_err(|e| LedgerError::Encoding(format!("inline datum: {e}")))?,
            script,
        }))
    }
}

/// Maps HTTP failures onto error kinds: 429 and 5xx are transient, other
/// 4xx statuses are permanent.
fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => Err(LedgerError::NotFound(text)),
        StatusCode::TOO_MANY_REQUESTS => Err(LedgerError::Query(format!("rate limited: {text}"))),
        s if s.is_server_error() => Err(LedgerError::Query(format!("HTTP {s}: {text}"))),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LedgerError::Config(format!(
            "Blockfrost refused the project id: {text}"
        ))),
        s => Err(LedgerError::Rejection(format!("HTTP {s}: {text}"))),
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(resp: Response) -> Result<T> {
    resp.json::<T>()
        .map_err(|e| LedgerError::Encoding(format!("failed to parse JSON response: {e}")))
}

impl TryFrom<EpochParameters> for ProtocolParams {
    type Error = LedgerError;

    fn try_from(p: EpochParameters) -> Result<Self> {
        let defaults = ProtocolParams::default();
        let prices = match (p.price_mem, p.price_step) {
            (Some(mem), Some(steps)) => ExecutionPrices {
                mem: Rational::from_f64(mem, PRICE_DENOMINATOR),
                steps: Rational::from_f64(steps, PRICE_DENOMINATOR),
            },
            _ => defaults.prices,
        };
        let language_views = match p
            .cost_models_raw
            .as_ref()
            .and_then(|models| models.get(PLUTUS_V3_COST_MODEL))
        {
            Some(costs) => plutus_v3_language_views(costs)?,
            None => {
                // script spends will carry a data hash the node rejects
                warn!("no {} cost model in the epoch parameters", PLUTUS_V3_COST_MODEL);
                defaults.language_views
            }
        };
        Ok(ProtocolParams {
            fee: LinearFee {
                fixed: p.min_fee_b,
                per_byte: p.min_fee_a,
            },
            prices,
            collateral_percent: p.collateral_percent.unwrap_or(defaults.collateral_percent),
            max_tx_size: p.max_tx_size,
            language_views,
        })
    }
}

impl LedgerService for BlockfrostLedger {
    fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>> {
        let bech32 = address.to_bech32()?;
        let mut utxos = Vec::new();
        for page in 1u32.. {
            let resp = self.get(&format!(
                "addresses/{bech32}/utxos?page={page}&count={PAGE_SIZE}"
            ))?;
            let entries: Vec<UtxoEntry> = match check_status(resp) {
                Ok(resp) => parse_json(resp)?,
                // an address that never received funds is unknown to the indexer
                Err(LedgerError::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            };
            let last_page = entries.len() < PAGE_SIZE;
            for entry in entries {
                if let Some(utxo) = self.to_utxo(address, entry)? {
                    utxos.push(utxo);
                }
            }
            if last_page {
                break;
            }
        }
        debug!("{} utxos at {}", utxos.len(), bech32);
        Ok(utxos)
    }

    fn get_protocol_params(&self) -> Result<ProtocolParams> {
        let resp = self.get("epochs/latest/parameters")?;
        let params: EpochParameters = parse_json(check_status(resp)?)?;
        ProtocolParams::try_from(params)
    }

    fn submit(&self, tx: &[u8]) -> Result<TransactionId> {
        let url = self.endpoint("tx/submit");
        let resp = self
            .client
            .post(&url)
            .header("project_id", &self.project_id)
            .header("Content-Type", "application/cbor")
            .body(tx.to_vec())
            .send()
            .map_err(|e| LedgerError::Transport(format!("HTTP POST {url} failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST {
            return Err(LedgerError::Rejection(resp.text().unwrap_or_default()));
        }
        let id: String = parse_json(check_status(resp)?)?;
        info!("ledger accepted {}", id);
        parse_hash32(&id)
    }

    fn get_transaction_status(&self, id: &TransactionId) -> Result<TxStatus> {
        let hash = hex::encode(id);
        match check_status(self.get(&format!("txs/{hash}"))?) {
            Ok(resp) => {
                let info: TxInfo = parse_json(resp)?;
                return Ok(TxStatus::Confirmed {
                    block: info.block,
                    slot: info.slot,
                });
            }
            Err(LedgerError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match check_status(self.get(&format!("mempool/{hash}"))?) {
            Ok(_) => Ok(TxStatus::Pending),
            Err(LedgerError::NotFound(_)) => Ok(TxStatus::NotFound),
            Err(e) => Err(e),
        }
    }
}
