//! Structured records: constructor-tagged values carried as datums and redeemers
//!
//! Two record kinds are used on-chain:
//!
//! - the state record ([`DidDatum`]), constructor 0 with five fields,
//! - the action record ([`Action`]), a zero-field constructor whose tag is
//!   the whole payload.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::KEY_HASH_LEN;
use crate::error::{LedgerError, Result};
use crate::types::{ByteString, KeyHash};

/// Structured record: 𝒮 = ℕ × (𝔹 | ℤ | 𝒮)*
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub tag: u64,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Bytes(ByteString),
    Integer(i64),
    Record(StructuredRecord),
}

impl StructuredRecord {
    pub fn new(tag: u64, fields: Vec<Field>) -> Self {
        Self { tag, fields }
    }

    /// A constructor with no fields.
    pub fn unit(tag: u64) -> Self {
        Self::new(tag, Vec::new())
    }
}

/// Action record: the redeemer selecting a validator branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Register,
    Update,
    Verify,
    Revoke,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Register,
        Action::Update,
        Action::Verify,
        Action::Revoke,
    ];

    pub fn tag(self) -> u64 {
        match self {
            Action::Register => 0,
            Action::Update => 1,
            Action::Verify => 2,
            Action::Revoke => 3,
        }
    }

    pub fn from_tag(tag: u64) -> Result<Self> {
        match tag {
            0 => Ok(Action::Register),
            1 => Ok(Action::Update),
            2 => Ok(Action::Verify),
            3 => Ok(Action::Revoke),
            other => Err(LedgerError::Encoding(format!("unknown action tag {other}"))),
        }
    }

    pub fn to_record(self) -> StructuredRecord {
        StructuredRecord::unit(self.tag())
    }
}

impl TryFrom<&StructuredRecord> for Action {
    type Error = LedgerError;

    /// Rejects any record carrying fields: the tag is the entire payload.
    fn try_from(record: &StructuredRecord) -> Result<Self> {
        if !record.fields.is_empty() {
            return Err(LedgerError::Encoding(format!(
                "action record must carry no fields, found {}",
                record.fields.len()
            )));
        }
        Action::from_tag(record.tag)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Register => "Register",
            Action::Update => "Update",
            Action::Verify => "Verify",
            Action::Revoke => "Revoke",
        };
        f.write_str(name)
    }
}

/// How the `verified` flag of a state record is represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolEncoding {
    /// Zero-field constructor: False = 0, True = 1
    #[default]
    Constructor,
    /// Plain integer 0 / 1
    Integer,
}

impl BoolEncoding {
    fn encode(self, value: bool) -> Field {
        match self {
            BoolEncoding::Constructor => Field::Record(StructuredRecord::unit(value as u64)),
            BoolEncoding::Integer => Field::Integer(value as i64),
        }
    }

    fn decode(self, field: &Field) -> Result<bool> {
        let tag = match (self, field) {
            (BoolEncoding::Constructor, Field::Record(r)) if r.fields.is_empty() => r.tag,
            (BoolEncoding::Integer, Field::Integer(i)) if *i >= 0 => *i as u64,
            _ => {
                return Err(LedgerError::Encoding(format!(
                    "verified flag is not a {self:?} boolean"
                )))
            }
        };
        match tag {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(LedgerError::Encoding(format!("boolean out of range: {other}"))),
        }
    }
}

/// State record locked at the validator: the DID document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDatum {
    pub identifier: ByteString,
    pub content_hash: ByteString,
    pub owner_key_hash: KeyHash,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    pub verified: bool,
}

impl DidDatum {
    pub const TAG: u64 = 0;

    /// Builds and validates a fresh, unverified record.
    pub fn new(
        identifier: impl Into<ByteString>,
        content_hash: impl Into<ByteString>,
        owner_key_hash: &[u8],
        created_at: i64,
    ) -> Result<Self> {
        let owner_key_hash: KeyHash = owner_key_hash.try_into().map_err(|_| {
            LedgerError::Validation(format!(
                "owner key hash must be {KEY_HASH_LEN} bytes, got {}",
                owner_key_hash.len()
            ))
        })?;
        let datum = Self {
            identifier: identifier.into(),
            content_hash: content_hash.into(),
            owner_key_hash,
            created_at,
            verified: false,
        };
        datum.validate()?;
        Ok(datum)
    }

    /// CheckDatum: 𝒟 → {valid, invalid}
    ///
    /// 1. identifier ≠ ε
    /// 2. content_hash ≠ ε
    /// 3. created_at > 0
    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(LedgerError::Validation("identifier cannot be empty".to_string()));
        }
        if self.content_hash.is_empty() {
            return Err(LedgerError::Validation("content hash cannot be empty".to_string()));
        }
        if self.created_at <= 0 {
            return Err(LedgerError::Validation(format!(
                "created_at must be > 0, got {}",
                self.created_at
            )));
        }
        Ok(())
    }

    pub fn to_record(&self, booleans: BoolEncoding) -> StructuredRecord {
        StructuredRecord::new(
            Self::TAG,
            vec![
                Field::Bytes(self.identifier.clone()),
                Field::Bytes(self.content_hash.clone()),
                Field::Bytes(self.owner_key_hash.to_vec()),
                Field::Integer(self.created_at),
                booleans.encode(self.verified),
            ],
        )
    }

    pub fn from_record(record: &StructuredRecord, booleans: BoolEncoding) -> Result<Self> {
        if record.tag != Self::TAG {
            return Err(LedgerError::Encoding(format!(
                "state record must use constructor {}, found {}",
                Self::TAG,
                record.tag
            )));
        }
        let [identifier, content_hash, owner, created_at, verified] = record.fields.as_slice()
        else {
            return Err(LedgerError::Encoding(format!(
                "state record must carry 5 fields, found {}",
                record.fields.len()
            )));
        };

        let bytes = |field: &Field, name: &str| match field {
            Field::Bytes(b) => Ok(b.clone()),
            _ => Err(LedgerError::Encoding(format!("{name} must be a byte string"))),
        };
        let created_at = match created_at {
            Field::Integer(i) => *i,
            _ => return Err(LedgerError::Encoding("created_at must be an integer".to_string())),
        };

        let datum = Self::new(
            bytes(identifier, "identifier")?,
            bytes(content_hash, "content_hash")?,
            &bytes(owner, "owner_key_hash")?,
            created_at,
        )?;
        Ok(Self {
            verified: booleans.decode(verified)?,
            ..datum
        })
    }
}
