//! Plutus Data encoding of structured records
//!
//! Constructor `i` is CBOR tag `121 + i` for `i < 7`, `1280 + (i - 7)` for
//! `7 <= i < 128`, and tag 102 wrapping `[i, fields]` otherwise. Non-empty
//! field lists are indefinite-length arrays and byte strings over 64 bytes
//! are split into 64-byte chunks, as Plutus-generated serializers emit them.

use minicbor::data::{Tag, Type};
use minicbor::encode::Write;
use minicbor::{Decoder, Encoder};

use crate::constants::PLUTUS_BYTES_CHUNK;
use crate::encoding::MAX_RECORD_DEPTH;
use crate::error::{LedgerError, Result};
use crate::record::{Field, StructuredRecord};
use crate::types::ByteString;

const COMPACT_TAG_BASE: u64 = 121;
const EXTENDED_TAG_BASE: u64 = 1280;
const GENERAL_TAG: u64 = 102;

pub fn encode(record: &StructuredRecord) -> Result<ByteString> {
    let mut e = Encoder::new(Vec::new());
    write_data(&mut e, record)?;
    Ok(e.into_writer())
}

pub fn decode(bytes: &[u8]) -> Result<StructuredRecord> {
    let mut d = Decoder::new(bytes);
    let record = read_data(&mut d, 0)?;
    if d.position() != bytes.len() {
        return Err(LedgerError::Encoding(format!(
            "{} trailing bytes after plutus data",
            bytes.len() - d.position()
        )));
    }
    Ok(record)
}

fn write_data<W: Write>(
    e: &mut Encoder<W>,
    record: &StructuredRecord,
) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
    match record.tag {
        t if t < 7 => {
            e.tag(Tag::new(COMPACT_TAG_BASE + t))?;
        }
        t if t < 128 => {
            e.tag(Tag::new(EXTENDED_TAG_BASE + t - 7))?;
        }
        t => {
            e.tag(Tag::new(GENERAL_TAG))?.array(2)?.u64(t)?;
        }
    }
    write_fields(e, &record.fields)
}

fn write_fields<W: Write>(
    e: &mut Encoder<W>,
    fields: &[Field],
) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
    if fields.is_empty() {
        e.array(0)?;
        return Ok(());
    }
    e.begin_array()?;
    for field in fields {
        match field {
            Field::Bytes(b) if b.len() > PLUTUS_BYTES_CHUNK => {
                e.begin_bytes()?;
                for chunk in b.chunks(PLUTUS_BYTES_CHUNK) {
                    e.bytes(chunk)?;
                }
                e.end()?;
            }
            Field::Bytes(b) => {
                e.bytes(b)?;
            }
            Field::Integer(i) => {
                e.i64(*i)?;
            }
            Field::Record(nested) => write_data(e, nested)?,
        }
    }
    e.end()?;
    Ok(())
}

fn read_data(d: &mut Decoder<'_>, depth: usize) -> Result<StructuredRecord> {
    if depth > MAX_RECORD_DEPTH {
        return Err(LedgerError::Encoding("plutus data nesting too deep".to_string()));
    }
    let tag = d.tag()?.as_u64();
    let constructor = match tag {
        121..=127 => tag - COMPACT_TAG_BASE,
        1280..=1400 => tag - EXTENDED_TAG_BASE + 7,
        GENERAL_TAG => {
            if d.array()? != Some(2) {
                return Err(LedgerError::Encoding(
                    "general constructor must be a 2-element array".to_string(),
                ));
            }
            d.u64()?
        }
        other => {
            return Err(LedgerError::Encoding(format!(
                "tag {other} is not a plutus constructor"
            )))
        }
    };
    let fields = read_fields(d, depth)?;
    Ok(StructuredRecord::new(constructor, fields))
}

fn read_fields(d: &mut Decoder<'_>, depth: usize) -> Result<Vec<Field>> {
    let mut fields = Vec::new();
    match d.array()? {
        Some(n) => {
            for _ in 0..n {
                fields.push(read_field(d, depth)?);
            }
        }
        None => loop {
            if d.datatype()? == Type::Break {
                d.set_position(d.position() + 1);
                break;
            }
            fields.push(read_field(d, depth)?);
        },
    }
    Ok(fields)
}

fn read_field(d: &mut Decoder<'_>, depth: usize) -> Result<Field> {
    let field = match d.datatype()? {
        Type::Bytes => Field::Bytes(d.bytes()?.to_vec()),
        Type::BytesIndef => {
            let mut bytes = Vec::new();
            for chunk in d.bytes_iter()? {
                bytes.extend_from_slice(chunk?);
            }
            Field::Bytes(bytes)
        }
        Type::U8
        | Type::U16
        | Type::U32
        | Type::U64
        | Type::I8
        | Type::I16
        | Type::I32
        | Type::I64 => Field::Integer(d.i64()?),
        Type::Tag => Field::Record(read_data(d, depth + 1)?),
        other => {
            return Err(LedgerError::Encoding(format!(
                "unsupported plutus field type {other:?}"
            )))
        }
    };
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Action, BoolEncoding, DidDatum};

    #[test]
    fn test_unit_constructors() {
        assert_eq!(encode(&Action::Register.to_record()).unwrap(), vec![0xd8, 0x79, 0x80]);
        assert_eq!(encode(&Action::Revoke.to_record()).unwrap(), vec![0xd8, 0x7c, 0x80]);
    }

    #[test]
    fn test_extended_and_general_tags() {
        let seven = encode(&StructuredRecord::unit(7)).unwrap();
        assert_eq!(seven, vec![0xd9, 0x05, 0x00, 0x80]);
        assert_eq!(decode(&seven).unwrap(), StructuredRecord::unit(7));

        let big = StructuredRecord::unit(500);
        let bytes = encode(&big).unwrap();
        assert_eq!(&bytes[..2], &[0xd8, 0x66]);
        assert_eq!(decode(&bytes).unwrap(), big);
    }

    #[test]
    fn test_fields_indefinite_array() {
        let record = StructuredRecord::new(0, vec![Field::Integer(1), Field::Bytes(vec![0xff])]);
        let bytes = encode(&record).unwrap();
        assert_eq!(bytes, vec![0xd8, 0x79, 0x9f, 0x01, 0x41, 0xff, 0xff]);
        assert_eq!(decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_definite_array_accepted() {
        // d8 79 82 01 02: Constr 0 [1, 2] with a definite-length list
        let record = decode(&[0xd8, 0x79, 0x82, 0x01, 0x02]).unwrap();
        assert_eq!(
            record,
            StructuredRecord::new(0, vec![Field::Integer(1), Field::Integer(2)])
        );
    }

    #[test]
    fn test_long_bytes_are_chunked() {
        let long = vec![0x5a; 100];
        let record = StructuredRecord::new(0, vec![Field::Bytes(long.clone())]);
        let bytes = encode(&record).unwrap();
        // tag, indefinite array, indefinite bytes
        assert_eq!(&bytes[..4], &[0xd8, 0x79, 0x9f, 0x5f]);
        assert_eq!(decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_datum_round_trip() {
        let datum =
            DidDatum::new(b"did:2".to_vec(), b"Qm2".to_vec(), &[1; 28], 1_700_000_000_000).unwrap();
        let record = datum.to_record(BoolEncoding::Constructor);
        assert_eq!(decode(&encode(&record).unwrap()).unwrap(), record);
    }

    #[test]
    fn test_rejects_non_constructor() {
        assert!(decode(&[0x81, 0x00]).is_err());
        assert!(decode(&[0xc2, 0x41, 0x00]).is_err());
    }
}
