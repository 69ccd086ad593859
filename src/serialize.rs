//! Transaction wire format
//!
//! A transaction is `[body, witness_set, true, null]`:
//!
//! - body: map `{0: inputs, 1: outputs, 2: fee, ?11: script_data_hash,
//!   ?13: collateral, ?14: required_signers}`
//! - input: `[transaction_id, output_index]`
//! - output: map `{0: address, 1: coin, ?2: [1, #6.24(datum)], ?3: #6.24([3, script])}`
//! - witness set: map `{?0: [[vkey, signature]], ?5: redeemers, ?7: [script]}`
//! - redeemer: `[0, input_position, data, [mem, steps]]`
//!
//! The transaction id is blake2b-256 of the body bytes exactly as they
//! appear on the wire.

use minicbor::data::Tag;
use minicbor::{Decoder, Encoder};

use crate::constants::{HASH_LEN, KEY_HASH_LEN};
use crate::encoding::DatumEncoding;
use crate::error::{LedgerError, Result};
use crate::hash::blake2b_256;
use crate::record::Action;
use crate::types::*;

const ENCODED_CBOR_TAG: u64 = 24;
const PLUTUS_V3: u8 = 3;
const INLINE_DATUM: u8 = 1;
const SPEND_PURPOSE: u8 = 0;
/// Key of Plutus V3 in the language views map
const PLUTUS_V3_LANGUAGE_ID: u8 = 2;

/// A transaction read back from its wire form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub id: TransactionId,
    pub draft: TransactionDraft,
    pub witnesses: Vec<VkeyWitness>,
}

pub fn encode_body(draft: &TransactionDraft) -> Result<ByteString> {
    let mut e = Encoder::new(Vec::new());

    let entries = 3
        + draft.script_data_hash.is_some() as u64
        + !draft.collateral.is_empty() as u64
        + !draft.required_signers.is_empty() as u64;
    e.map(entries)?;

    e.u8(0)?.array(draft.inputs.len() as u64)?;
    for input in &draft.inputs {
        write_reference(&mut e, input)?;
    }
    e.u8(1)?.array(draft.outputs.len() as u64)?;
    for output in &draft.outputs {
        write_output(&mut e, output)?;
    }
    e.u8(2)?.u64(draft.fee)?;

    if let Some(hash) = &draft.script_data_hash {
        e.u8(11)?.bytes(hash)?;
    }
    if !draft.collateral.is_empty() {
        e.u8(13)?.array(draft.collateral.len() as u64)?;
        for input in &draft.collateral {
            write_reference(&mut e, input)?;
        }
    }
    if !draft.required_signers.is_empty() {
        e.u8(14)?.array(draft.required_signers.len() as u64)?;
        for key_hash in &draft.required_signers {
            e.bytes(key_hash)?;
        }
    }
    Ok(e.into_writer())
}

/// TxId: blake2b-256(body)
pub fn transaction_id(draft: &TransactionDraft) -> Result<TransactionId> {
    Ok(blake2b_256(&encode_body(draft)?))
}

/// Encodes the full transaction with the given key witnesses.
pub fn encode_transaction(draft: &TransactionDraft, witnesses: &[VkeyWitness]) -> Result<ByteString> {
    let body = encode_body(draft)?;
    let mut e = Encoder::new(Vec::new());
    e.array(4)?;
    e.writer_mut().extend_from_slice(&body);
    write_witness_set(&mut e, draft, witnesses)?;
    e.bool(true)?.null()?;
    Ok(e.into_writer())
}

/// The redeemer list as it appears in the witness set.
pub fn encode_redeemers(draft: &TransactionDraft) -> Result<ByteString> {
    let mut e = Encoder::new(Vec::new());
    write_redeemers(&mut e, draft)?;
    Ok(e.into_writer())
}

/// ScriptDataHash: blake2b-256(redeemers ‖ language_views)
///
/// Datums travel inline in outputs, so no witness datums are hashed.
pub fn script_data_hash(draft: &TransactionDraft, language_views: &[u8]) -> Result<Hash32> {
    let mut preimage = encode_redeemers(draft)?;
    preimage.extend_from_slice(language_views);
    Ok(blake2b_256(&preimage))
}

/// LanguageViews: { 2 ↦ [c₀, …, cₙ] } for a Plutus V3 cost model
///
/// Costs stay in the order the protocol parameters list them.
pub fn plutus_v3_language_views(cost_model: &[i64]) -> Result<ByteString> {
    let mut e = Encoder::new(Vec::new());
    e.map(1)?
        .u8(PLUTUS_V3_LANGUAGE_ID)?
        .array(cost_model.len() as u64)?;
    for cost in cost_model {
        e.i64(*cost)?;
    }
    Ok(e.into_writer())
}

fn write_reference(
    e: &mut Encoder<Vec<u8>>,
    reference: &OutputReference,
) -> Result<()> {
    e.array(2)?
        .bytes(&reference.transaction_id)?
        .u64(reference.output_index)?;
    Ok(())
}

fn write_output(e: &mut Encoder<Vec<u8>>, output: &TransactionOutput) -> Result<()> {
    let entries = 2 + output.datum.is_some() as u64 + output.script.is_some() as u64;
    e.map(entries)?;
    e.u8(0)?.bytes(&output.address.to_bytes())?;
    e.u8(1)?.u64(output.value)?;
    if let Some(datum) = &output.datum {
        e.u8(2)?
            .array(2)?
            .u8(INLINE_DATUM)?
            .tag(Tag::new(ENCODED_CBOR_TAG))?
            .bytes(datum)?;
    }
    if let Some(script) = &output.script {
        let mut inner = Encoder::new(Vec::new());
        inner.array(2)?.u8(PLUTUS_V3)?.bytes(script)?;
        e.u8(3)?
            .tag(Tag::new(ENCODED_CBOR_TAG))?
            .bytes(&inner.into_writer())?;
    }
    Ok(())
}

fn write_redeemers(e: &mut Encoder<Vec<u8>>, draft: &TransactionDraft) -> Result<()> {
    e.array(draft.redeemers.len() as u64)?;
    for (position, redeemer) in &draft.redeemers {
        e.array(4)?.u8(SPEND_PURPOSE)?.u64(*position as u64)?;
        // already a complete CBOR item
        e.writer_mut().extend_from_slice(&redeemer.data);
        e.array(2)?
            .u64(redeemer.ex_units.mem)?
            .u64(redeemer.ex_units.steps)?;
    }
    Ok(())
}

fn write_witness_set(
    e: &mut Encoder<Vec<u8>>,
    draft: &TransactionDraft,
    witnesses: &[VkeyWitness],
) -> Result<()> {
    let entries = !witnesses.is_empty() as u64
        + !draft.redeemers.is_empty() as u64
        + !draft.scripts.is_empty() as u64;
    e.map(entries)?;
    if !witnesses.is_empty() {
        e.u8(0)?.array(witnesses.len() as u64)?;
        for witness in witnesses {
            e.array(2)?.bytes(&witness.vkey)?.bytes(&witness.signature)?;
        }
    }
    if !draft.redeemers.is_empty() {
        e.u8(5)?;
        write_redeemers(e, draft)?;
    }
    if !draft.scripts.is_empty() {
        e.u8(7)?.array(draft.scripts.len() as u64)?;
        for script in &draft.scripts {
            e.bytes(script)?;
        }
    }
    Ok(())
}

/// Decodes a transaction produced by [`encode_transaction`].
pub fn decode_transaction(bytes: &[u8]) -> Result<DecodedTransaction> {
    let mut d = Decoder::new(bytes);
    expect_array(&mut d, 4, "transaction")?;

    let body_start = d.position();
    let mut draft = read_body(&mut d)?;
    let id = blake2b_256(&bytes[body_start..d.position()]);

    let witnesses = read_witness_set(&mut d, bytes, &mut draft)?;
    if !d.bool()? {
        return Err(LedgerError::Encoding(
            "transaction is flagged as failing validation".to_string(),
        ));
    }
    d.null()?;

    if d.position() != bytes.len() {
        return Err(LedgerError::Encoding(format!(
            "{} trailing bytes after transaction",
            bytes.len() - d.position()
        )));
    }
    Ok(DecodedTransaction { id, draft, witnesses })
}

fn expect_array(d: &mut Decoder<'_>, len: u64, what: &str) -> Result<()> {
    match d.array()? {
        Some(n) if n == len => Ok(()),
        other => Err(LedgerError::Encoding(format!(
            "{what} must be an array of {len}, found {other:?}"
        ))),
    }
}

fn definite_map(d: &mut Decoder<'_>, what: &str) -> Result<u64> {
    d.map()?
        .ok_or_else(|| LedgerError::Encoding(format!("indefinite-length {what}")))
}

fn definite_array(d: &mut Decoder<'_>, what: &str) -> Result<u64> {
    d.array()?
        .ok_or_else(|| LedgerError::Encoding(format!("indefinite-length {what}")))
}

fn fixed_bytes<const N: usize>(d: &mut Decoder<'_>, what: &str) -> Result<[u8; N]> {
    let bytes = d.bytes()?;
    bytes.try_into().map_err(|_| {
        LedgerError::Encoding(format!("{what} must be {N} bytes, got {}", bytes.len()))
    })
}

fn read_reference(d: &mut Decoder<'_>) -> Result<OutputReference> {
    expect_array(d, 2, "input")?;
    let transaction_id = fixed_bytes::<HASH_LEN>(d, "transaction id")?;
    Ok(OutputReference::new(transaction_id, d.u64()?))
}

fn read_body(d: &mut Decoder<'_>) -> Result<TransactionDraft> {
    let mut draft = TransactionDraft::default();
    for _ in 0..definite_map(d, "body")? {
        match d.u64()? {
            0 => {
                for _ in 0..definite_array(d, "inputs")? {
                    draft.inputs.insert(read_reference(d)?);
                }
            }
            1 => {
                for _ in 0..definite_array(d, "outputs")? {
                    draft.outputs.push(read_output(d)?);
                }
            }
            2 => draft.fee = d.u64()?,
            11 => draft.script_data_hash = Some(fixed_bytes(d, "script data hash")?),
            13 => {
                for _ in 0..definite_array(d, "collateral")? {
                    draft.collateral.insert(read_reference(d)?);
                }
            }
            14 => {
                for _ in 0..definite_array(d, "required signers")? {
                    draft
                        .required_signers
                        .insert(fixed_bytes::<KEY_HASH_LEN>(d, "key hash")?);
                }
            }
            _ => d.skip()?,
        }
    }
    Ok(draft)
}

fn read_encoded_cbor<'b>(d: &mut Decoder<'b>) -> Result<&'b [u8]> {
    let tag = d.tag()?.as_u64();
    if tag != ENCODED_CBOR_TAG {
        return Err(LedgerError::Encoding(format!(
            "expected encoded-cbor tag, found {tag}"
        )));
    }
    Ok(d.bytes()?)
}

fn read_output(d: &mut Decoder<'_>) -> Result<TransactionOutput> {
    let mut address = None;
    let mut value = None;
    let mut datum = None;
    let mut script = None;
    for _ in 0..definite_map(d, "output")? {
        match d.u64()? {
            0 => address = Some(Address::from_bytes(d.bytes()?)?),
            1 => value = Some(d.u64()?),
            2 => {
                expect_array(d, 2, "datum option")?;
                let kind = d.u8()?;
                if kind != INLINE_DATUM {
                    return Err(LedgerError::Encoding(format!(
                        "unsupported datum option {kind}"
                    )));
                }
                datum = Some(read_encoded_cbor(d)?.to_vec());
            }
            3 => {
                let mut inner = Decoder::new(read_encoded_cbor(d)?);
                expect_array(&mut inner, 2, "script reference")?;
                let language = inner.u8()?;
                if language != PLUTUS_V3 {
                    return Err(LedgerError::Encoding(format!(
                        "unsupported script language {language}"
                    )));
                }
                script = Some(inner.bytes()?.to_vec());
            }
            _ => d.skip()?,
        }
    }
    let (Some(address), Some(value)) = (address, value) else {
        return Err(LedgerError::Encoding(
            "output without address or value".to_string(),
        ));
    };
    Ok(TransactionOutput {
        address,
        value,
        datum,
        script,
    })
}

fn read_witness_set(
    d: &mut Decoder<'_>,
    bytes: &[u8],
    draft: &mut TransactionDraft,
) -> Result<Vec<VkeyWitness>> {
    let mut witnesses = Vec::new();
    for _ in 0..definite_map(d, "witness set")? {
        match d.u64()? {
            0 => {
                for _ in 0..definite_array(d, "vkey witnesses")? {
                    expect_array(d, 2, "vkey witness")?;
                    witnesses.push(VkeyWitness {
                        vkey: fixed_bytes(d, "verification key")?,
                        signature: fixed_bytes(d, "signature")?,
                    });
                }
            }
            5 => {
                for _ in 0..definite_array(d, "redeemers")? {
                    let (position, redeemer) = read_redeemer(d, bytes)?;
                    draft.redeemers.insert(position, redeemer);
                }
            }
            7 => {
                for _ in 0..definite_array(d, "scripts")? {
                    draft.scripts.push(d.bytes()?.to_vec());
                }
            }
            _ => d.skip()?,
        }
    }
    Ok(witnesses)
}

fn read_redeemer(d: &mut Decoder<'_>, bytes: &[u8]) -> Result<(usize, Redeemer)> {
    expect_array(d, 4, "redeemer")?;
    let purpose = d.u8()?;
    if purpose != SPEND_PURPOSE {
        return Err(LedgerError::Encoding(format!(
            "unsupported redeemer purpose {purpose}"
        )));
    }
    let position = d.u64()? as usize;

    let start = d.position();
    d.skip()?;
    let data = bytes[start..d.position()].to_vec();
    // either codec may have produced the data
    let record = DatumEncoding::Compact
        .decode(&data)
        .or_else(|_| DatumEncoding::PlutusData.decode(&data))?;
    let action = Action::try_from(&record)?;

    expect_array(d, 2, "execution units")?;
    let ex_units = ExUnits {
        mem: d.u64()?,
        steps: d.u64()?,
    };
    Ok((
        position,
        Redeemer {
            action,
            data,
            ex_units,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding;
    use crate::constants::{SIGNATURE_LEN, VERIFICATION_KEY_LEN};

    fn script_address() -> Address {
        Address::script(Network::Testnet, [7; 28])
    }

    fn wallet_address() -> Address {
        Address::key(Network::Testnet, [3; 28])
    }

    fn sample_draft() -> TransactionDraft {
        let mut draft = TransactionDraft {
            fee: 180_000,
            ..Default::default()
        };
        draft.inputs.insert(OutputReference::new([2; 32], 1));
        draft.inputs.insert(OutputReference::new([1; 32], 0));
        draft.outputs.push(
            TransactionOutput::new(script_address(), 2_000_000).with_datum(vec![0x81, 0x00]),
        );
        draft
            .outputs
            .push(TransactionOutput::new(wallet_address(), 2_820_000));
        draft
    }

    fn with_script_spend(mut draft: TransactionDraft) -> TransactionDraft {
        draft.redeemers.insert(
            0,
            Redeemer {
                action: Action::Verify,
                data: encoding::encode(&Action::Verify.to_record()).unwrap(),
                ex_units: ExUnits::default(),
            },
        );
        draft.collateral.insert(OutputReference::new([1; 32], 0));
        draft.required_signers.insert([3; 28]);
        draft.scripts.push(vec![0x4e, 0x4d, 0x01, 0x00]);
        draft.script_data_hash = Some(script_data_hash(&draft, &[]).unwrap());
        draft
    }

    #[test]
    fn test_body_layout() {
        let body = encode_body(&TransactionDraft::default()).unwrap();
        // {0: [], 1: [], 2: 0}
        assert_eq!(body, vec![0xa3, 0x00, 0x80, 0x01, 0x80, 0x02, 0x00]);
    }

    #[test]
    fn test_transaction_id_is_body_hash() {
        let draft = sample_draft();
        let id = transaction_id(&draft).unwrap();
        assert_eq!(id, blake2b_256(&encode_body(&draft).unwrap()));

        let bytes = encode_transaction(&draft, &[]).unwrap();
        assert_eq!(decode_transaction(&bytes).unwrap().id, id);
    }

    #[test]
    fn test_transaction_id_tracks_fee() {
        let draft = sample_draft();
        let mut other = draft.clone();
        other.fee += 1;
        assert_ne!(transaction_id(&draft).unwrap(), transaction_id(&other).unwrap());
    }

    #[test]
    fn test_decode_plain_transaction() {
        let draft = sample_draft();
        let witness = VkeyWitness {
            vkey: [5; 32],
            signature: [6; 64],
        };
        let decoded = decode_transaction(&encode_transaction(&draft, &[witness]).unwrap()).unwrap();
        assert_eq!(decoded.draft, draft);
        assert_eq!(decoded.witnesses, vec![witness]);
    }

    #[test]
    fn test_decode_script_spend() {
        let draft = with_script_spend(sample_draft());
        let decoded = decode_transaction(&encode_transaction(&draft, &[]).unwrap()).unwrap();
        assert_eq!(decoded.draft, draft);
        assert_eq!(decoded.draft.redeemers[&0].action, Action::Verify);
    }

    #[test]
    fn test_plutus_redeemer_decodes() {
        let mut draft = sample_draft();
        draft.redeemers.insert(
            1,
            Redeemer {
                action: Action::Revoke,
                data: DatumEncoding::PlutusData
                    .encode(&Action::Revoke.to_record())
                    .unwrap(),
                ex_units: ExUnits::default(),
            },
        );
        let decoded = decode_transaction(&encode_transaction(&draft, &[]).unwrap()).unwrap();
        assert_eq!(decoded.draft.redeemers[&1].action, Action::Revoke);
    }

    #[test]
    fn test_inline_datum_is_wrapped() {
        let mut draft = TransactionDraft::default();
        draft
            .outputs
            .push(TransactionOutput::new(script_address(), 1).with_datum(vec![0x81, 0x00]));
        let body = encode_body(&draft).unwrap();
        // [1, 24(h'8100')]
        let wrapped = [0x02, 0x82, 0x01, 0xd8, 0x18, 0x42, 0x81, 0x00];
        assert!(body.windows(wrapped.len()).any(|w| w == wrapped));
    }

    #[test]
    fn test_script_data_hash_covers_redeemers() {
        let draft = with_script_spend(sample_draft());
        let mut other = draft.clone();
        if let Some(r) = other.redeemers.get_mut(&0) {
            r.ex_units.mem += 1;
        }
        assert_ne!(
            script_data_hash(&draft, &[]).unwrap(),
            script_data_hash(&other, &[]).unwrap()
        );
        assert_ne!(
            script_data_hash(&draft, &[]).unwrap(),
            script_data_hash(&draft, &[0xa0]).unwrap()
        );
    }

    #[test]
    fn test_language_views_layout() {
        // a1 02 83 00 18 64 20: {2: [0, 100, -1]}
        assert_eq!(
            plutus_v3_language_views(&[0, 100, -1]).unwrap(),
            vec![0xa1, 0x02, 0x83, 0x00, 0x18, 0x64, 0x20]
        );
    }

    #[test]
    fn test_witnesses_grow_size() {
        let draft = sample_draft();
        let witness = VkeyWitness {
            vkey: [0; 32],
            signature: [0; 64],
        };
        let none = encode_transaction(&draft, &[]).unwrap().len();
        let one = encode_transaction(&draft, &[witness]).unwrap().len();
        assert!(one - none >= VERIFICATION_KEY_LEN + SIGNATURE_LEN);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_transaction(&[]).is_err());
        assert!(decode_transaction(&[0x80]).is_err());
        let mut bytes = encode_transaction(&sample_draft(), &[]).unwrap();
        bytes.push(0x00);
        assert!(decode_transaction(&bytes).is_err());
    }
}
