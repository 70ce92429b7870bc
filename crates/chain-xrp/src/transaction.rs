//! `Payment` transactions: canonical encoding, signing hash, signature
//! assembly and decoding.

use k256::ecdsa::Signature;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::address::{decode_address, encode_account_id};
use crate::codec::{self, encode_field_id, encode_vl_length, encode_xrp_amount, FieldId, FieldReader};
use crate::error::XrpError;

/// `tfFullyCanonicalSig`.
pub const TF_FULLY_CANONICAL_SIG: u32 = 0x8000_0000;

/// Transaction type code of `Payment`.
pub const PAYMENT_TYPE: u16 = 0;

/// Reference cost of a plain payment in drops.
pub const BASE_FEE_DROPS: u64 = 10;

const SIGNING_PREFIX: [u8; 4] = [0x53, 0x54, 0x58, 0x00];
const TX_ID_PREFIX: [u8; 4] = [0x54, 0x58, 0x4E, 0x00];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrpMemo {
    pub memo_type: Option<Vec<u8>>,
    pub memo_data: Vec<u8>,
}

impl XrpMemo {
    pub fn text(data: &str) -> Self {
        Self {
            memo_type: Some(b"text/plain".to_vec()),
            memo_data: data.as_bytes().to_vec(),
        }
    }
}

/// An XRP-to-XRP payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrpPayment {
    pub account: String,
    pub destination: String,
    pub amount_drops: u64,
    pub fee_drops: u64,
    pub sequence: u32,
    pub last_ledger_sequence: Option<u32>,
    pub destination_tag: Option<u32>,
    pub memos: Vec<XrpMemo>,
    pub flags: u32,
}

impl XrpPayment {
    pub fn new(
        account: &str,
        destination: &str,
        amount_drops: u64,
        fee_drops: u64,
        sequence: u32,
    ) -> Result<Self, XrpError> {
        decode_address(account)?;
        decode_address(destination)?;
        if amount_drops == 0 {
            return Err(XrpError::InvalidAmount("payment amount must be non-zero".into()));
        }
        encode_xrp_amount(amount_drops)?;
        encode_xrp_amount(fee_drops)?;
        Ok(Self {
            account: account.to_string(),
            destination: destination.to_string(),
            amount_drops,
            fee_drops,
            sequence,
            last_ledger_sequence: None,
            destination_tag: None,
            memos: Vec::new(),
            flags: TF_FULLY_CANONICAL_SIG,
        })
    }
}

/// A signed payment ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedXrpTransaction {
    pub blob: Vec<u8>,
    pub tx_id: String,
}

/// A decoded payment with its signing material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayment {
    pub payment: XrpPayment,
    pub signing_pub_key: Vec<u8>,
    pub signature_der: Option<Vec<u8>>,
}

impl DecodedPayment {
    /// The `TxnSignature`, parsed as strict DER.
    pub fn signature(&self) -> Result<Option<Signature>, XrpError> {
        self.signature_der
            .as_deref()
            .map(Signature::from_der)
            .transpose()
            .map_err(|e| XrpError::DecodeError(format!("DER signature: {e}")))
    }
}

fn sha512_half(prefix: &[u8; 4], body: &[u8]) -> [u8; 32] {
    let digest = Sha512::new().chain_update(prefix).chain_update(body).finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

fn put_header(out: &mut Vec<u8>, id: FieldId) {
    encode_field_id(id, out);
}

fn put_vl(out: &mut Vec<u8>, id: FieldId, bytes: &[u8]) -> Result<(), XrpError> {
    put_header(out, id);
    encode_vl_length(bytes.len(), out)?;
    out.extend_from_slice(bytes);
    Ok(())
}

/// Serialize the payment in canonical field order. `signature` is omitted
/// when producing the signing preimage.
pub fn encode(
    payment: &XrpPayment,
    signing_pub_key: &[u8],
    signature: Option<&[u8]>,
) -> Result<Vec<u8>, XrpError> {
    let account = decode_address(&payment.account)?;
    let destination = decode_address(&payment.destination)?;

    let mut out = Vec::with_capacity(256);
    put_header(&mut out, codec::TRANSACTION_TYPE);
    out.extend_from_slice(&PAYMENT_TYPE.to_be_bytes());
    put_header(&mut out, codec::FLAGS);
    out.extend_from_slice(&payment.flags.to_be_bytes());
    put_header(&mut out, codec::SEQUENCE);
    out.extend_from_slice(&payment.sequence.to_be_bytes());
    if let Some(tag) = payment.destination_tag {
        put_header(&mut out, codec::DESTINATION_TAG);
        out.extend_from_slice(&tag.to_be_bytes());
    }
    if let Some(lls) = payment.last_ledger_sequence {
        put_header(&mut out, codec::LAST_LEDGER_SEQUENCE);
        out.extend_from_slice(&lls.to_be_bytes());
    }
    put_header(&mut out, codec::AMOUNT);
    out.extend_from_slice(&encode_xrp_amount(payment.amount_drops)?);
    put_header(&mut out, codec::FEE);
    out.extend_from_slice(&encode_xrp_amount(payment.fee_drops)?);
    put_vl(&mut out, codec::SIGNING_PUB_KEY, signing_pub_key)?;
    if let Some(sig) = signature {
        put_vl(&mut out, codec::TXN_SIGNATURE, sig)?;
    }
    put_vl(&mut out, codec::ACCOUNT, &account)?;
    put_vl(&mut out, codec::DESTINATION, &destination)?;

    if !payment.memos.is_empty() {
        put_header(&mut out, codec::MEMOS);
        for memo in &payment.memos {
            put_header(&mut out, codec::MEMO);
            if let Some(memo_type) = &memo.memo_type {
                put_vl(&mut out, codec::MEMO_TYPE, memo_type)?;
            }
            put_vl(&mut out, codec::MEMO_DATA, &memo.memo_data)?;
            put_header(&mut out, codec::OBJECT_END);
        }
        put_header(&mut out, codec::ARRAY_END);
    }
    Ok(out)
}

/// Hash an external signer must sign.
pub fn signing_hash(payment: &XrpPayment, signing_pub_key: &[u8; 33]) -> Result<[u8; 32], XrpError> {
    let body = encode(payment, signing_pub_key, None)?;
    Ok(sha512_half(&SIGNING_PREFIX, &body))
}

/// Transaction id of a signed blob.
pub fn transaction_id(blob: &[u8]) -> String {
    hex::encode_upper(sha512_half(&TX_ID_PREFIX, blob))
}

/// Attach a compact `r ‖ s` signature. High-S values are normalized.
pub fn encode_signed(
    payment: &XrpPayment,
    signing_pub_key: &[u8; 33],
    signature: &[u8; 64],
) -> Result<SignedXrpTransaction, XrpError> {
    let sig = Signature::from_slice(signature)
        .map_err(|e| XrpError::SigningError(format!("malformed signature: {e}")))?;
    let der = sig.normalize_s().unwrap_or(sig).to_der();

    let blob = encode(payment, signing_pub_key, Some(der.as_bytes()))?;
    let tx_id = transaction_id(&blob);
    Ok(SignedXrpTransaction { blob, tx_id })
}

/// Decode a signed or unsigned `Payment` blob.
pub fn decode_transaction(blob: &[u8]) -> Result<DecodedPayment, XrpError> {
    let mut reader = FieldReader::new(blob);
    let mut last: Option<FieldId> = None;

    let mut tx_type = None;
    let mut flags = 0u32;
    let mut sequence = None;
    let mut destination_tag = None;
    let mut last_ledger_sequence = None;
    let mut amount = None;
    let mut fee = None;
    let mut pub_key = None;
    let mut signature = None;
    let mut account = None;
    let mut destination = None;
    let mut memos = Vec::new();

    while !reader.is_empty() {
        let id = reader.field_id()?;
        if last.is_some_and(|prev| prev >= id) {
            return Err(XrpError::DecodeError(format!(
                "field ({}, {}) out of canonical order",
                id.type_code, id.field_code
            )));
        }
        last = Some(id);
        match id {
            codec::TRANSACTION_TYPE => tx_type = Some(reader.u16()?),
            codec::FLAGS => flags = reader.u32()?,
            codec::SEQUENCE => sequence = Some(reader.u32()?),
            codec::DESTINATION_TAG => destination_tag = Some(reader.u32()?),
            codec::LAST_LEDGER_SEQUENCE => last_ledger_sequence = Some(reader.u32()?),
            codec::AMOUNT => amount = Some(reader.xrp_amount()?),
            codec::FEE => fee = Some(reader.xrp_amount()?),
            codec::SIGNING_PUB_KEY => pub_key = Some(reader.vl_bytes()?.to_vec()),
            codec::TXN_SIGNATURE => signature = Some(reader.vl_bytes()?.to_vec()),
            codec::ACCOUNT => account = Some(encode_account_id(&reader.account_id()?)),
            codec::DESTINATION => destination = Some(encode_account_id(&reader.account_id()?)),
            codec::MEMOS => memos = decode_memos(&mut reader)?,
            other => {
                return Err(XrpError::DecodeError(format!(
                    "unsupported field ({}, {})",
                    other.type_code, other.field_code
                )))
            }
        }
    }

    let missing = |name: &str| XrpError::DecodeError(format!("missing {name}"));
    if tx_type.ok_or_else(|| missing("TransactionType"))? != PAYMENT_TYPE {
        return Err(XrpError::DecodeError("not a Payment transaction".into()));
    }
    Ok(DecodedPayment {
        payment: XrpPayment {
            account: account.ok_or_else(|| missing("Account"))?,
            destination: destination.ok_or_else(|| missing("Destination"))?,
            amount_drops: amount.ok_or_else(|| missing("Amount"))?,
            fee_drops: fee.ok_or_else(|| missing("Fee"))?,
            sequence: sequence.ok_or_else(|| missing("Sequence"))?,
            last_ledger_sequence,
            destination_tag,
            memos,
            flags,
        },
        signing_pub_key: pub_key.ok_or_else(|| missing("SigningPubKey"))?,
        signature_der: signature,
    })
}

fn decode_memos(reader: &mut FieldReader<'_>) -> Result<Vec<XrpMemo>, XrpError> {
    let mut memos = Vec::new();
    loop {
        match reader.field_id()? {
            codec::ARRAY_END => return Ok(memos),
            codec::MEMO => {
                let mut memo_type = None;
                let mut memo_data = None;
                loop {
                    match reader.field_id()? {
                        codec::OBJECT_END => break,
                        codec::MEMO_TYPE => memo_type = Some(reader.vl_bytes()?.to_vec()),
                        codec::MEMO_DATA => memo_data = Some(reader.vl_bytes()?.to_vec()),
                        other => {
                            return Err(XrpError::DecodeError(format!(
                                "unsupported memo field ({}, {})",
                                other.type_code, other.field_code
                            )))
                        }
                    }
                }
                memos.push(XrpMemo {
                    memo_type,
                    memo_data: memo_data.unwrap_or_default(),
                });
            }
            _ => return Err(XrpError::DecodeError("expected Memo object".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::pubkey_to_address;
    use k256::ecdsa::{signature::hazmat::PrehashVerifier, SigningKey, VerifyingKey};
    use k256::elliptic_curve::PrimeField;

    const DESTINATION: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    fn keypair() -> (SigningKey, [u8; 33], String) {
        let sk = SigningKey::from_bytes(&[0x11u8; 32].into()).unwrap();
        let pk: [u8; 33] = sk
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .try_into()
            .unwrap();
        let addr = pubkey_to_address(&pk).unwrap();
        (sk, pk, addr)
    }

    fn sign(sk: &SigningKey, hash: &[u8; 32]) -> [u8; 64] {
        let (sig, _) = sk.sign_prehash_recoverable(hash).unwrap();
        sig.to_bytes().as_slice().try_into().unwrap()
    }

    fn payment(account: &str) -> XrpPayment {
        let mut p = XrpPayment::new(account, DESTINATION, 1_000_000, 12, 7).unwrap();
        p.last_ledger_sequence = Some(90_000_020);
        p.destination_tag = Some(42);
        p.memos.push(XrpMemo::text("invoice 17"));
        p
    }

    #[test]
    fn encoding_starts_with_ordered_headers() {
        let (_, pk, addr) = keypair();
        let body = encode(&payment(&addr), &pk, None).unwrap();
        assert_eq!(
            &body[..20],
            &[
                0x12, 0x00, 0x00, // TransactionType = Payment
                0x22, 0x80, 0x00, 0x00, 0x00, // Flags
                0x24, 0x00, 0x00, 0x00, 0x07, // Sequence
                0x2E, 0x00, 0x00, 0x00, 0x2A, // DestinationTag
                0x20, 0x1B, // LastLedgerSequence header
            ]
        );
        assert_eq!(body.last(), Some(&0xF1));
    }

    #[test]
    fn zero_amount_is_refused() {
        let (_, _, addr) = keypair();
        assert!(matches!(
            XrpPayment::new(&addr, DESTINATION, 0, 12, 1),
            Err(XrpError::InvalidAmount(_))
        ));
    }

    #[test]
    fn bad_destination_is_refused() {
        let (_, _, addr) = keypair();
        assert!(XrpPayment::new(&addr, "rNotAnAddress", 5, 12, 1).is_err());
    }

    #[test]
    fn sign_and_decode() {
        let (sk, pk, addr) = keypair();
        let p = payment(&addr);
        let hash = signing_hash(&p, &pk).unwrap();
        let signed = encode_signed(&p, &pk, &sign(&sk, &hash)).unwrap();

        assert_eq!(signed.tx_id.len(), 64);
        assert_eq!(signed.tx_id, signed.tx_id.to_uppercase());
        assert_eq!(signed.tx_id, transaction_id(&signed.blob));

        let decoded = decode_transaction(&signed.blob).unwrap();
        assert_eq!(decoded.payment, p);
        assert_eq!(decoded.signing_pub_key, pk.to_vec());

        let vk = VerifyingKey::from_sec1_bytes(&pk).unwrap();
        let parsed = decoded.signature().unwrap().unwrap();
        assert!(parsed.normalize_s().is_none(), "signature must be low-S");
        vk.verify_prehash(&hash, &parsed).unwrap();
    }

    #[test]
    fn signature_changes_tx_id_not_signing_hash() {
        let (sk, pk, addr) = keypair();
        let p = payment(&addr);
        let hash = signing_hash(&p, &pk).unwrap();
        let signed = encode_signed(&p, &pk, &sign(&sk, &hash)).unwrap();
        let unsigned = encode(&p, &pk, None).unwrap();
        assert_ne!(transaction_id(&unsigned), signed.tx_id);
        assert_eq!(signing_hash(&p, &pk).unwrap(), hash);
    }

    #[test]
    fn high_s_is_normalized() {
        let (sk, pk, addr) = keypair();
        let p = payment(&addr);
        let hash = signing_hash(&p, &pk).unwrap();
        let low = sign(&sk, &hash);

        // n - s
        let s = k256::Scalar::from_repr(*k256::FieldBytes::from_slice(&low[32..])).unwrap();
        let high_s = (-s).to_bytes();
        let mut high = low;
        high[32..].copy_from_slice(&high_s);

        let a = encode_signed(&p, &pk, &low).unwrap();
        let b = encode_signed(&p, &pk, &high).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn non_minimal_der_is_rejected() {
        // r = 0x00 0x01 (superfluous leading zero)
        let der = vec![0x30, 0x07, 0x02, 0x02, 0x00, 0x01, 0x02, 0x01, 0x01];
        let (_, pk, addr) = keypair();
        let decoded = DecodedPayment {
            payment: payment(&addr),
            signing_pub_key: pk.to_vec(),
            signature_der: Some(der),
        };
        assert!(matches!(decoded.signature(), Err(XrpError::DecodeError(_))));
    }

    #[test]
    fn out_of_order_fields_are_rejected() {
        // Flags before TransactionType
        let blob = [0x22, 0, 0, 0, 0, 0x12, 0, 0];
        assert!(decode_transaction(&blob).is_err());
    }

    #[test]
    fn non_payment_is_rejected() {
        let (_, pk, addr) = keypair();
        let mut body = encode(&payment(&addr), &pk, None).unwrap();
        body[2] = 0x03; // AccountSet
        assert!(matches!(
            decode_transaction(&body),
            Err(XrpError::DecodeError(m)) if m.contains("Payment")
        ));
    }
}
