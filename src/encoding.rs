//! Compact binary encoding of structured records
//!
//! Layout, in canonical CBOR:
//!
//! - record = definite array of `1 + n` items: the constructor tag as an
//!   unsigned integer, then the `n` fields in declared order;
//! - byte string field = CBOR byte string (length-prefixed);
//! - integer field = CBOR integer in shortest form;
//! - nested record = the same array layout.
//!
//! A zero-field constructor is therefore two bytes: `0x81 <tag>` for tags
//! below 24. The array header carries the field count and the tag is always
//! the first item, so structurally different records never share an
//! encoding.

use minicbor::data::Type;
use minicbor::encode::Write;
use minicbor::{Decoder, Encoder};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::plutus;
use crate::record::{Field, StructuredRecord};
use crate::types::ByteString;

/// Deepest nesting accepted when decoding
pub const MAX_RECORD_DEPTH: usize = 32;

/// Wire codec used for datums and redeemers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatumEncoding {
    /// Tag-first arrays, see the module documentation
    #[default]
    Compact,
    /// Plutus Data constructors (CBOR tags 121.., 1280.., 102)
    PlutusData,
}

impl DatumEncoding {
    pub fn encode(self, record: &StructuredRecord) -> Result<ByteString> {
        match self {
            DatumEncoding::Compact => encode(record),
            DatumEncoding::PlutusData => plutus::encode(record),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<StructuredRecord> {
        match self {
            DatumEncoding::Compact => decode(bytes),
            DatumEncoding::PlutusData => plutus::decode(bytes),
        }
    }
}

/// Encode: 𝒮 → 𝔹
pub fn encode(record: &StructuredRecord) -> Result<ByteString> {
    let mut e = Encoder::new(Vec::new());
    write_record(&mut e, record)?;
    Ok(e.into_writer())
}

/// Decode: 𝔹 → 𝒮, the inverse of [`encode`]
///
/// Rejects indefinite-length items, unsupported field types and trailing
/// bytes.
pub fn decode(bytes: &[u8]) -> Result<StructuredRecord> {
    let mut d = Decoder::new(bytes);
    let record = read_record(&mut d, 0)?;
    if d.position() != bytes.len() {
        return Err(LedgerError::Encoding(format!(
            "{} trailing bytes after record",
            bytes.len() - d.position()
        )));
    }
    Ok(record)
}

fn write_record<W: Write>(
    e: &mut Encoder<W>,
    record: &StructuredRecord,
) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
    e.array(1 + record.fields.len() as u64)?.u64(record.tag)?;
    for field in &record.fields {
        match field {
            Field::Bytes(b) => {
                e.bytes(b)?;
            }
            Field::Integer(i) => {
                e.i64(*i)?;
            }
            Field::Record(nested) => write_record(e, nested)?,
        }
    }
    Ok(())
}

fn read_record(d: &mut Decoder<'_>, depth: usize) -> Result<StructuredRecord> {
    if depth > MAX_RECORD_DEPTH {
        return Err(LedgerError::Encoding("record nesting too deep".to_string()));
    }
    let len = d
        .array()?
        .ok_or_else(|| LedgerError::Encoding("indefinite-length record".to_string()))?;
    if len == 0 {
        return Err(LedgerError::Encoding("record without constructor tag".to_string()));
    }
    let tag = d.u64()?;

    let mut fields = Vec::with_capacity(len.min(64) as usize - 1);
    for _ in 1..len {
        let field = match d.datatype()? {
            Type::Bytes => Field::Bytes(d.bytes()?.to_vec()),
            Type::U8
            | Type::U16
            | Type::U32
            | Type::U64
            | Type::I8
            | Type::I16
            | Type::I32
            | Type::I64 => Field::Integer(d.i64()?),
            Type::Array => Field::Record(read_record(d, depth + 1)?),
            other => {
                return Err(LedgerError::Encoding(format!(
                    "unsupported field type {other:?}"
                )))
            }
        };
        fields.push(field);
    }
    Ok(StructuredRecord::new(tag, fields))
}
