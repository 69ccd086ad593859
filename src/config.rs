//! Process configuration
//!
//! Built once at startup and passed by reference; nothing here is global.
//! Every field has a default so a partial JSON document is enough.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::builder::BuildSettings;
use crate::constants::*;
use crate::encoding::DatumEncoding;
use crate::error::{LedgerError, Result};
use crate::fee::FeeSettings;
use crate::hash::plutus_v3_script_hash;
use crate::record::BoolEncoding;
use crate::tracker::TrackerConfig;
use crate::types::*;

pub const ENV_PROJECT_ID: &str = "BLOCKFROST_PROJECT_ID";
pub const ENV_BASE_URL: &str = "BLOCKFROST_BASE_URL";
pub const ENV_IPFS_URL: &str = "IPFS_API_URL";
pub const ENV_NETWORK: &str = "DID_NETWORK";

const PREPROD_BASE_URL: &str = "https://cardano-preprod.blockfrost.io/api/v0";
const MAINNET_BASE_URL: &str = "https://cardano-mainnet.blockfrost.io/api/v0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub network: Network,
    pub ledger: LedgerConfig,
    pub content: ContentConfig,
    pub builder: BuilderConfig,
    pub tracker: TrackerSettings,
    pub script: ScriptConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub base_url: String,
    pub project_id: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: PREPROD_BASE_URL.to_string(),
            project_id: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub ipfs_api_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            ipfs_api_url: "http://127.0.0.1:5001".to_string(),
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub max_inputs: usize,
    pub min_change: Amount,
    pub min_output: Amount,
    pub max_fee_iterations: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_inputs: DEFAULT_MAX_INPUTS,
            min_change: MIN_CHANGE_VALUE,
            min_output: MIN_OUTPUT_VALUE,
            max_fee_iterations: MAX_FEE_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
    pub max_query_failures: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        let defaults = TrackerConfig::default();
        Self {
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            timeout_secs: defaults.timeout.as_secs(),
            max_query_failures: defaults.max_query_failures,
        }
    }
}

/// The validator guarding DID state records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Hex of the compiled Plutus V3 script
    pub compiled_code: String,
    /// Hex script hash; derived from `compiled_code` when absent
    pub script_hash: Option<String>,
    pub lock_value: Amount,
    pub datum_encoding: DatumEncoding,
    pub bool_encoding: BoolEncoding,
    pub ex_units: ExUnits,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            compiled_code: String::new(),
            script_hash: None,
            lock_value: DEFAULT_LOCK_VALUE,
            datum_encoding: DatumEncoding::default(),
            bool_encoding: BoolEncoding::default(),
            ex_units: ExUnits::default(),
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LedgerError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `BLOCKFROST_PROJECT_ID`, `BLOCKFROST_BASE_URL`,
    /// `IPFS_API_URL` and `DID_NETWORK`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(network) = lookup(ENV_NETWORK) {
            self.network = network.parse()?;
            if self.network == Network::Mainnet && self.ledger.base_url == PREPROD_BASE_URL {
                self.ledger.base_url = MAINNET_BASE_URL.to_string();
            }
        }
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.ledger.base_url = url;
        }
        if let Some(project_id) = lookup(ENV_PROJECT_ID) {
            self.ledger.project_id = Some(project_id);
        }
        if let Some(url) = lookup(ENV_IPFS_URL) {
            self.content.ipfs_api_url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.builder.max_inputs == 0 {
            return Err(LedgerError::Config("max_inputs must be at least 1".to_string()));
        }
        if self.builder.max_fee_iterations == 0 {
            return Err(LedgerError::Config(
                "max_fee_iterations must be at least 1".to_string(),
            ));
        }
        if self.script.lock_value < self.builder.min_output {
            return Err(LedgerError::Config(format!(
                "lock_value {} is below the minimum output value {}",
                self.script.lock_value, self.builder.min_output
            )));
        }
        if self.tracker.poll_interval_ms == 0 {
            return Err(LedgerError::Config("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn build_settings(&self) -> BuildSettings {
        BuildSettings {
            max_inputs: self.builder.max_inputs,
            min_output: self.builder.min_output,
            fee: FeeSettings {
                min_change: self.builder.min_change,
                max_iterations: self.builder.max_fee_iterations,
            },
            datum_encoding: self.script.datum_encoding,
            ex_units: self.script.ex_units,
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            poll_interval: Duration::from_millis(self.tracker.poll_interval_ms),
            timeout: Duration::from_secs(self.tracker.timeout_secs),
            max_query_failures: self.tracker.max_query_failures,
        }
    }

    pub fn script_code(&self) -> Result<ByteString> {
        hex::decode(&self.script.compiled_code)
            .map_err(|e| LedgerError::Config(format!("compiled_code is not hex: {e}")))
    }

    pub fn script_hash(&self) -> Result<ScriptHash> {
        match &self.script.script_hash {
            Some(hash) => parse_hash28(hash).map_err(|e| LedgerError::Config(e.to_string())),
            None => {
                let code = self.script_code()?;
                if code.is_empty() {
                    return Err(LedgerError::Config(
                        "neither script_hash nor compiled_code is configured".to_string(),
                    ));
                }
                Ok(plutus_v3_script_hash(&code))
            }
        }
    }

    pub fn script_address(&self) -> Result<Address> {
        Ok(Address::script(self.network, self.script_hash()?))
    }
}
