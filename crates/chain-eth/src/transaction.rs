use alloy_rlp::{Bytes, Decodable, Encodable, Header, RlpDecodable, RlpEncodable};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::address::{address_bytes_from_uncompressed, checksum_address, parse_address};
use crate::error::EthError;

/// Gas used by a plain value transfer with no calldata.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Minimum bump, in percent, nodes require before accepting a same-nonce replacement.
pub const REPLACEMENT_BUMP_PERCENT: u128 = 10;

const EIP1559_TX_TYPE: u8 = 0x02;

/// Fee fields of an EVM transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EthFee {
    /// Type-0 transaction with an EIP-155 protected signature.
    Legacy { gas_price: u128 },
    /// Type-2 (EIP-1559) transaction.
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl EthFee {
    /// Upper bound on the price paid per unit of gas.
    pub fn max_price_per_gas(&self) -> u128 {
        match *self {
            EthFee::Legacy { gas_price } => gas_price,
            EthFee::Eip1559 { max_fee_per_gas, .. } => max_fee_per_gas,
        }
    }

    /// Every price component multiplied by `(100 + percent) / 100`, rounded up.
    pub fn bumped(&self, percent: u128) -> EthFee {
        let bump = |v: u128| (v * (100 + percent)).div_ceil(100);
        match *self {
            EthFee::Legacy { gas_price } => EthFee::Legacy {
                gas_price: bump(gas_price),
            },
            EthFee::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => EthFee::Eip1559 {
                max_fee_per_gas: bump(max_fee_per_gas),
                max_priority_fee_per_gas: bump(max_priority_fee_per_gas),
            },
        }
    }

    /// Whether `self` may replace a pending transaction paying `original`.
    ///
    /// Both the fee cap and the tip have to rise by at least the node bump.
    pub fn can_replace(&self, original: &EthFee) -> bool {
        let min = original.bumped(REPLACEMENT_BUMP_PERCENT);
        match (*self, min) {
            (EthFee::Legacy { gas_price }, EthFee::Legacy { gas_price: floor }) => gas_price >= floor,
            (
                EthFee::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                },
                EthFee::Eip1559 {
                    max_fee_per_gas: fee_floor,
                    max_priority_fee_per_gas: tip_floor,
                },
            ) => max_fee_per_gas >= fee_floor && max_priority_fee_per_gas >= tip_floor,
            _ => false,
        }
    }

    /// The larger of `self` and the minimum acceptable replacement of `original`.
    pub fn at_least_replacing(&self, original: &EthFee) -> EthFee {
        let min = original.bumped(REPLACEMENT_BUMP_PERCENT);
        match (*self, min) {
            (EthFee::Legacy { gas_price }, EthFee::Legacy { gas_price: floor }) => EthFee::Legacy {
                gas_price: gas_price.max(floor),
            },
            (
                EthFee::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                },
                EthFee::Eip1559 {
                    max_fee_per_gas: fee_floor,
                    max_priority_fee_per_gas: tip_floor,
                },
            ) => {
                let tip = max_priority_fee_per_gas.max(tip_floor);
                EthFee::Eip1559 {
                    max_fee_per_gas: max_fee_per_gas.max(fee_floor).max(tip),
                    max_priority_fee_per_gas: tip,
                }
            }
            _ => min,
        }
    }
}

/// An unsigned EVM transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub fee: EthFee,
    pub gas_limit: u64,
    /// Recipient address as a 0x-prefixed hex string.
    pub to: String,
    /// Transfer value in wei.
    pub value: u128,
    /// Calldata (empty for simple transfers).
    pub data: Vec<u8>,
}

/// A signed EVM transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEthTransaction {
    /// Raw signed bytes: an RLP list for legacy, `0x02 || rlp` for EIP-1559.
    pub raw_tx: Vec<u8>,
    /// Keccak-256 of `raw_tx` as a 0x-prefixed hex string.
    pub tx_hash: String,
}

/// Fixed-width secp256k1 signature with its recovery parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub y_parity: bool,
}

/// Builds an unsigned native-currency transfer.
pub fn build_transfer(
    chain_id: u64,
    nonce: u64,
    to: &str,
    value_wei: u128,
    fee: EthFee,
    gas_limit: u64,
) -> Result<EthTransaction, EthError> {
    parse_address(to)?;
    if gas_limit < TRANSFER_GAS_LIMIT {
        return Err(EthError::TransactionBuildError(format!(
            "gas limit {gas_limit} below intrinsic {TRANSFER_GAS_LIMIT}"
        )));
    }
    if let EthFee::Eip1559 {
        max_fee_per_gas,
        max_priority_fee_per_gas,
    } = fee
    {
        if max_priority_fee_per_gas > max_fee_per_gas {
            return Err(EthError::TransactionBuildError(
                "priority fee exceeds max fee".into(),
            ));
        }
    }

    Ok(EthTransaction {
        chain_id,
        nonce,
        fee,
        gas_limit,
        to: to.to_string(),
        value: value_wei,
        data: Vec::new(),
    })
}

/// Intrinsic gas of a call carrying `data`: 21000 plus 16 per non-zero and 4 per zero byte.
pub fn intrinsic_gas(data: &[u8]) -> u64 {
    data.iter().fold(TRANSFER_GAS_LIMIT, |gas, b| {
        gas + if *b == 0 { 4 } else { 16 }
    })
}

/// Encodes the payload that is hashed for signing.
///
/// Legacy: `rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])` (EIP-155).
/// EIP-1559: `0x02 || rlp([chainId, nonce, tip, maxFee, gas, to, value, data, accessList])`.
pub fn encode_unsigned_tx(tx: &EthTransaction) -> Result<Vec<u8>, EthError> {
    let to = RlpAddress(parse_address(&tx.to)?);
    let mut buf = Vec::new();

    match tx.fee {
        EthFee::Legacy { gas_price } => {
            LegacyUnsignedFields {
                nonce: tx.nonce,
                gas_price,
                gas_limit: tx.gas_limit,
                to,
                value: tx.value,
                data: Bytes::from(tx.data.clone()),
                chain_id: tx.chain_id,
                empty_r: 0,
                empty_s: 0,
            }
            .encode(&mut buf);
        }
        EthFee::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            buf.push(EIP1559_TX_TYPE);
            Eip1559UnsignedFields {
                chain_id: tx.chain_id,
                nonce: tx.nonce,
                max_priority_fee_per_gas,
                max_fee_per_gas,
                gas_limit: tx.gas_limit,
                to,
                value: tx.value,
                data: Bytes::from(tx.data.clone()),
                access_list: Vec::new(),
            }
            .encode(&mut buf);
        }
    }
    Ok(buf)
}

/// Keccak-256 of the signing payload; the prehash an external signer signs.
pub fn signing_hash(tx: &EthTransaction) -> Result<[u8; 32], EthError> {
    Ok(Keccak256::digest(encode_unsigned_tx(tx)?).into())
}

/// Attach a signature and produce the broadcastable bytes.
///
/// High-S signatures are refused (EIP-2); callers normalize before this point.
pub fn encode_signed(
    tx: &EthTransaction,
    signature: &EthSignature,
) -> Result<SignedEthTransaction, EthError> {
    let parsed = parse_signature(signature)?;
    if parsed.normalize_s().is_some() {
        return Err(EthError::SigningError("signature s value is not low".into()));
    }

    let to = RlpAddress(parse_address(&tx.to)?);
    let mut raw_tx = Vec::new();

    match tx.fee {
        EthFee::Legacy { gas_price } => {
            LegacySignedFields {
                nonce: tx.nonce,
                gas_price,
                gas_limit: tx.gas_limit,
                to,
                value: tx.value,
                data: Bytes::from(tx.data.clone()),
                v: eip155_v(tx.chain_id, signature.y_parity),
                r: RlpU256(signature.r),
                s: RlpU256(signature.s),
            }
            .encode(&mut raw_tx);
        }
        EthFee::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            raw_tx.push(EIP1559_TX_TYPE);
            Eip1559SignedFields {
                chain_id: tx.chain_id,
                nonce: tx.nonce,
                max_priority_fee_per_gas,
                max_fee_per_gas,
                gas_limit: tx.gas_limit,
                to,
                value: tx.value,
                data: Bytes::from(tx.data.clone()),
                access_list: Vec::new(),
                signature_y_parity: signature.y_parity as u8,
                signature_r: RlpU256(signature.r),
                signature_s: RlpU256(signature.s),
            }
            .encode(&mut raw_tx);
        }
    }

    let tx_hash = format!("0x{}", hex::encode(Keccak256::digest(&raw_tx)));
    Ok(SignedEthTransaction { raw_tx, tx_hash })
}

/// Decode broadcastable bytes back into the transaction and its signature.
pub fn decode_signed(raw: &[u8]) -> Result<(EthTransaction, EthSignature), EthError> {
    let first = *raw
        .first()
        .ok_or_else(|| EthError::EncodingError("empty transaction".into()))?;

    let decoded = if first == EIP1559_TX_TYPE {
        let mut buf = &raw[1..];
        let fields = Eip1559SignedFields::decode(&mut buf).map_err(rlp_error)?;
        ensure_consumed(buf)?;
        let signature = EthSignature {
            r: fields.signature_r.0,
            s: fields.signature_s.0,
            y_parity: match fields.signature_y_parity {
                0 => false,
                1 => true,
                other => {
                    return Err(EthError::EncodingError(format!("invalid y parity {other}")))
                }
            },
        };
        let tx = EthTransaction {
            chain_id: fields.chain_id,
            nonce: fields.nonce,
            fee: EthFee::Eip1559 {
                max_fee_per_gas: fields.max_fee_per_gas,
                max_priority_fee_per_gas: fields.max_priority_fee_per_gas,
            },
            gas_limit: fields.gas_limit,
            to: checksum_address(&fields.to.0),
            value: fields.value,
            data: fields.data.to_vec(),
        };
        (tx, signature)
    } else if first >= 0xc0 {
        let mut buf = raw;
        let fields = LegacySignedFields::decode(&mut buf).map_err(rlp_error)?;
        ensure_consumed(buf)?;
        if fields.v < 35 {
            return Err(EthError::EncodingError(
                "legacy signature without EIP-155 replay protection".into(),
            ));
        }
        let chain_id = (fields.v - 35) / 2;
        let signature = EthSignature {
            r: fields.r.0,
            s: fields.s.0,
            y_parity: (fields.v - 35) % 2 == 1,
        };
        let tx = EthTransaction {
            chain_id,
            nonce: fields.nonce,
            fee: EthFee::Legacy {
                gas_price: fields.gas_price,
            },
            gas_limit: fields.gas_limit,
            to: checksum_address(&fields.to.0),
            value: fields.value,
            data: fields.data.to_vec(),
        };
        (tx, signature)
    } else {
        return Err(EthError::EncodingError(format!(
            "unsupported transaction type 0x{first:02x}"
        )));
    };
    Ok(decoded)
}

/// Recover the EIP-55 sender address from a transaction and its signature.
pub fn recover_sender(tx: &EthTransaction, signature: &EthSignature) -> Result<String, EthError> {
    let hash = signing_hash(tx)?;
    let parsed = parse_signature(signature)?;
    let recovery_id = RecoveryId::new(signature.y_parity, false);

    let key = VerifyingKey::recover_from_prehash(&hash, &parsed, recovery_id)
        .map_err(|e| EthError::SigningError(format!("sender recovery failed: {e}")))?;
    let uncompressed = key.to_encoded_point(false);
    Ok(checksum_address(&address_bytes_from_uncompressed(
        uncompressed.as_bytes(),
    )?))
}

fn eip155_v(chain_id: u64, y_parity: bool) -> u64 {
    chain_id * 2 + 35 + y_parity as u64
}

fn parse_signature(signature: &EthSignature) -> Result<Signature, EthError> {
    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&signature.r);
    rs[32..].copy_from_slice(&signature.s);
    Signature::from_slice(&rs).map_err(|e| EthError::SigningError(format!("malformed signature: {e}")))
}

fn ensure_consumed(rest: &[u8]) -> Result<(), EthError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(EthError::EncodingError(format!(
            "{} trailing bytes after transaction",
            rest.len()
        )))
    }
}

fn rlp_error(e: alloy_rlp::Error) -> EthError {
    EthError::EncodingError(format!("rlp: {e}"))
}

// ---------------------------------------------------------------------------
// RLP structures
// ---------------------------------------------------------------------------

#[derive(RlpEncodable)]
struct LegacyUnsignedFields {
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    to: RlpAddress,
    value: u128,
    data: Bytes,
    chain_id: u64,
    empty_r: u8,
    empty_s: u8,
}

#[derive(RlpEncodable, RlpDecodable)]
struct LegacySignedFields {
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    to: RlpAddress,
    value: u128,
    data: Bytes,
    v: u64,
    r: RlpU256,
    s: RlpU256,
}

#[derive(RlpEncodable)]
struct Eip1559UnsignedFields {
    chain_id: u64,
    nonce: u64,
    max_priority_fee_per_gas: u128,
    max_fee_per_gas: u128,
    gas_limit: u64,
    to: RlpAddress,
    value: u128,
    data: Bytes,
    access_list: Vec<AccessListItem>,
}

#[derive(RlpEncodable, RlpDecodable)]
struct Eip1559SignedFields {
    chain_id: u64,
    nonce: u64,
    max_priority_fee_per_gas: u128,
    max_fee_per_gas: u128,
    gas_limit: u64,
    to: RlpAddress,
    value: u128,
    data: Bytes,
    access_list: Vec<AccessListItem>,
    signature_y_parity: u8,
    signature_r: RlpU256,
    signature_s: RlpU256,
}

/// An EIP-2930 access list entry. Transfers always send an empty list.
#[derive(Debug, Clone, RlpEncodable, RlpDecodable)]
struct AccessListItem {
    address: RlpAddress,
    storage_keys: Vec<RlpFixedBytes<32>>,
}

/// A 20-byte address encoded as an RLP string.
#[derive(Debug, Clone)]
struct RlpAddress([u8; 20]);

impl Encodable for RlpAddress {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.0.as_slice().encode(out);
    }

    fn length(&self) -> usize {
        self.0.as_slice().length()
    }
}

impl Decodable for RlpAddress {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let bytes = Header::decode_bytes(buf, false)?;
        let addr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| alloy_rlp::Error::UnexpectedLength)?;
        Ok(Self(addr))
    }
}

/// A 256-bit big-endian integer with leading zeros stripped on the wire.
#[derive(Debug, Clone)]
struct RlpU256([u8; 32]);

impl RlpU256 {
    fn trimmed(&self) -> &[u8] {
        let start = self.0.iter().position(|&b| b != 0).unwrap_or(32);
        &self.0[start..]
    }
}

impl Encodable for RlpU256 {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.trimmed().encode(out);
    }

    fn length(&self) -> usize {
        self.trimmed().length()
    }
}

impl Decodable for RlpU256 {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let bytes = Header::decode_bytes(buf, false)?;
        if bytes.len() > 32 {
            return Err(alloy_rlp::Error::Overflow);
        }
        if bytes.first() == Some(&0) {
            return Err(alloy_rlp::Error::LeadingZero);
        }
        let mut word = [0u8; 32];
        word[32 - bytes.len()..].copy_from_slice(bytes);
        Ok(Self(word))
    }
}

#[derive(Debug, Clone)]
struct RlpFixedBytes<const N: usize>([u8; N]);

impl<const N: usize> Encodable for RlpFixedBytes<N> {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.0.as_slice().encode(out);
    }

    fn length(&self) -> usize {
        self.0.as_slice().length()
    }
}

impl<const N: usize> Decodable for RlpFixedBytes<N> {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let bytes = Header::decode_bytes(buf, false)?;
        let arr: [u8; N] = bytes
            .try_into()
            .map_err(|_| alloy_rlp::Error::UnexpectedLength)?;
        Ok(Self(arr))
    }
}
