//! Solana transaction wire format, built by hand without `solana-sdk`.
//!
//! ```text
//! Transaction:
//!   num_signatures          compact-u16
//!   signatures              64 bytes * num_signatures
//!   message:
//!     num_required_sigs     u8
//!     num_readonly_signed   u8
//!     num_readonly_unsigned u8
//!     num_accounts          compact-u16
//!     account_keys          32 bytes * num_accounts
//!     recent_blockhash      32 bytes
//!     num_instructions      compact-u16
//!     instructions[]        (see below)
//!
//! Instruction:
//!   program_id_index        u8
//!   num_accounts            compact-u16
//!   account_indices         u8 * num_accounts
//!   data_len                compact-u16
//!   data                    u8 * data_len
//! ```

use crate::address::{address_to_bytes, is_on_curve};
use crate::error::SolError;

// ---------------------------------------------------------------------------
// Programs
// ---------------------------------------------------------------------------

/// The System Program public key: 32 zero bytes.
pub const SYSTEM_PROGRAM_ID: [u8; 32] = [0u8; 32];

pub const COMPUTE_BUDGET_PROGRAM: &str = "ComputeBudget111111111111111111111111111111";

pub const MEMO_PROGRAM: &str = "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr";

/// Fee charged per signature, in lamports.
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

/// Compute units requested by default for a transfer carrying budget instructions.
pub const DEFAULT_TRANSFER_COMPUTE_UNITS: u32 = 1_000;

const SYSTEM_TRANSFER_IX_INDEX: u32 = 2;
const SET_COMPUTE_UNIT_LIMIT_IX: u8 = 2;
const SET_COMPUTE_UNIT_PRICE_IX: u8 = 3;
const MAX_MEMO_BYTES: usize = 566;

// ---------------------------------------------------------------------------
// Compact-u16 encoding
// ---------------------------------------------------------------------------

/// Encode a `u16` value in Solana's compact-u16 format (1 to 3 bytes, 7 bits each).
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(3);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

/// Decode a compact-u16 value, returning `(value, bytes_consumed)`.
pub fn decode_compact_u16(data: &[u8]) -> Result<(u16, usize), SolError> {
    let mut value: u32 = 0;
    let mut consumed = 0usize;

    loop {
        let byte = *data.get(consumed).ok_or_else(|| {
            SolError::SerializationError("unexpected end of data while decoding compact-u16".into())
        })?;
        value |= ((byte & 0x7f) as u32) << (7 * consumed);
        consumed += 1;

        if byte & 0x80 == 0 || consumed == 3 {
            break;
        }
    }

    u16::try_from(value)
        .map(|v| (v, consumed))
        .map_err(|_| SolError::SerializationError("compact-u16 value overflow".into()))
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A single account reference in a Solana instruction.
#[derive(Debug, Clone)]
pub struct SolAccountMeta {
    pub pubkey: [u8; 32],
    pub is_signer: bool,
    pub is_writable: bool,
}

/// A Solana instruction before compilation.
#[derive(Debug, Clone)]
pub struct SolInstruction {
    pub program_id: [u8; 32],
    pub accounts: Vec<SolAccountMeta>,
    pub data: Vec<u8>,
}

/// A compiled (unsigned) transaction message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolTransaction {
    /// Account keys in canonical order: writable signers, read-only signers,
    /// writable non-signers, read-only non-signers.
    pub account_keys: Vec<[u8; 32]>,
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
    /// Blockhash bounding the validity window.
    pub recent_blockhash: [u8; 32],
    pub compiled_instructions: Vec<CompiledInstruction>,
}

/// Instruction with account references replaced by indices into `account_keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

/// Parameters of a native SOL transfer.
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub from: [u8; 32],
    pub to: [u8; 32],
    pub lamports: u64,
    pub recent_blockhash: [u8; 32],
    /// Compute-unit limit; emitted only when a unit price is also set.
    pub compute_unit_limit: Option<u32>,
    /// Priority price in micro-lamports per compute unit.
    pub compute_unit_price: Option<u64>,
    pub memo: Option<String>,
}

/// Fields of a system transfer recovered from a compiled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub from: [u8; 32],
    pub to: [u8; 32],
    pub lamports: u64,
    pub compute_unit_price: Option<u64>,
    pub memo: Option<String>,
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Build a native SOL transfer, with optional priority fee and memo.
pub fn build_transfer(params: &TransferParams) -> Result<SolTransaction, SolError> {
    if params.lamports == 0 {
        return Err(SolError::TransactionBuildError("lamports must be > 0".into()));
    }
    if !is_on_curve(&params.from) {
        return Err(SolError::InvalidPublicKey(
            "fee payer is not an Ed25519 point".into(),
        ));
    }

    let mut instructions = Vec::with_capacity(4);
    if let Some(price) = params.compute_unit_price {
        let budget_program = address_to_bytes(COMPUTE_BUDGET_PROGRAM)?;
        let limit = params
            .compute_unit_limit
            .unwrap_or(DEFAULT_TRANSFER_COMPUTE_UNITS);
        instructions.push(set_compute_unit_limit_instruction(budget_program, limit));
        instructions.push(set_compute_unit_price_instruction(budget_program, price));
    }

    instructions.push(build_system_transfer_instruction(
        &params.from,
        &params.to,
        params.lamports,
    ));

    if let Some(memo) = &params.memo {
        if memo.len() > MAX_MEMO_BYTES {
            return Err(SolError::TransactionBuildError(format!(
                "memo is {} bytes, limit is {MAX_MEMO_BYTES}",
                memo.len()
            )));
        }
        instructions.push(SolInstruction {
            program_id: address_to_bytes(MEMO_PROGRAM)?,
            accounts: Vec::new(),
            data: memo.as_bytes().to_vec(),
        });
    }

    compile_transaction(&instructions, &params.from, &params.recent_blockhash)
}

/// Compile instructions with a single fee payer at account index 0.
pub fn compile_transaction(
    instructions: &[SolInstruction],
    fee_payer: &[u8; 32],
    recent_blockhash: &[u8; 32],
) -> Result<SolTransaction, SolError> {
    struct AccountEntry {
        pubkey: [u8; 32],
        is_signer: bool,
        is_writable: bool,
    }

    let mut entries: Vec<AccountEntry> = Vec::new();
    let mut upsert = |pubkey: [u8; 32], signer: bool, writable: bool| {
        if let Some(entry) = entries.iter_mut().find(|e| e.pubkey == pubkey) {
            entry.is_signer |= signer;
            entry.is_writable |= writable;
        } else {
            entries.push(AccountEntry {
                pubkey,
                is_signer: signer,
                is_writable: writable,
            });
        }
    };

    upsert(*fee_payer, true, true);
    for ix in instructions {
        for meta in &ix.accounts {
            upsert(meta.pubkey, meta.is_signer, meta.is_writable);
        }
        upsert(ix.program_id, false, false);
    }

    // Stable sort keeps insertion order inside each class, so the fee payer stays first.
    entries.sort_by_key(|e| match (e.is_signer, e.is_writable) {
        (true, true) => 0u8,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    });

    if entries.len() > u8::MAX as usize {
        return Err(SolError::TransactionBuildError("too many accounts".into()));
    }

    let count = |pred: fn(&AccountEntry) -> bool| entries.iter().filter(|e| pred(e)).count() as u8;
    let num_required_signatures = count(|e| e.is_signer);
    let num_readonly_signed = count(|e| e.is_signer && !e.is_writable);
    let num_readonly_unsigned = count(|e| !e.is_signer && !e.is_writable);

    let account_keys: Vec<[u8; 32]> = entries.iter().map(|e| e.pubkey).collect();
    let index_of = |key: &[u8; 32]| -> Result<u8, SolError> {
        account_keys
            .iter()
            .position(|k| k == key)
            .map(|i| i as u8)
            .ok_or_else(|| SolError::TransactionBuildError("account not in account keys".into()))
    };

    let compiled_instructions = instructions
        .iter()
        .map(|ix| {
            Ok(CompiledInstruction {
                program_id_index: index_of(&ix.program_id)?,
                account_indices: ix
                    .accounts
                    .iter()
                    .map(|m| index_of(&m.pubkey))
                    .collect::<Result<_, SolError>>()?,
                data: ix.data.clone(),
            })
        })
        .collect::<Result<Vec<_>, SolError>>()?;

    Ok(SolTransaction {
        account_keys,
        num_required_signatures,
        num_readonly_signed,
        num_readonly_unsigned,
        recent_blockhash: *recent_blockhash,
        compiled_instructions,
    })
}

/// Serialize the message: the exact bytes an Ed25519 signer signs.
pub fn serialize_message(tx: &SolTransaction) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    buf.push(tx.num_required_signatures);
    buf.push(tx.num_readonly_signed);
    buf.push(tx.num_readonly_unsigned);

    buf.extend_from_slice(&encode_compact_u16(tx.account_keys.len() as u16));
    for key in &tx.account_keys {
        buf.extend_from_slice(key);
    }

    buf.extend_from_slice(&tx.recent_blockhash);

    buf.extend_from_slice(&encode_compact_u16(tx.compiled_instructions.len() as u16));
    for ix in &tx.compiled_instructions {
        buf.push(ix.program_id_index);
        buf.extend_from_slice(&encode_compact_u16(ix.account_indices.len() as u16));
        buf.extend_from_slice(&ix.account_indices);
        buf.extend_from_slice(&encode_compact_u16(ix.data.len() as u16));
        buf.extend_from_slice(&ix.data);
    }

    buf
}

/// Wire bytes of a single-signer transaction: `compact(1) || signature || message`.
pub fn encode_signed(tx: &SolTransaction, signature: &[u8; 64]) -> Result<Vec<u8>, SolError> {
    if tx.num_required_signatures != 1 {
        return Err(SolError::SigningError(format!(
            "expected one required signature, message needs {}",
            tx.num_required_signatures
        )));
    }

    let message = serialize_message(tx);
    let mut wire = Vec::with_capacity(1 + 64 + message.len());
    wire.extend_from_slice(&encode_compact_u16(1));
    wire.extend_from_slice(signature);
    wire.extend_from_slice(&message);
    Ok(wire)
}

/// A transaction is identified by its first signature, Base58-encoded.
pub fn transaction_id(signature: &[u8; 64]) -> String {
    bs58::encode(signature).into_string()
}

/// Network fee: per-signature base fee plus the compute-unit priority fee.
pub fn estimate_fee(num_signatures: u64, compute_unit_limit: u32, compute_unit_price: u64) -> u64 {
    let priority = (compute_unit_limit as u128 * compute_unit_price as u128).div_ceil(1_000_000);
    num_signatures * LAMPORTS_PER_SIGNATURE + priority as u64
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SolError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len()).ok_or_else(|| {
            SolError::SerializationError(format!("truncated at byte {}", self.pos))
        })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, SolError> {
        Ok(self.take(1)?[0])
    }

    fn compact(&mut self) -> Result<usize, SolError> {
        let (value, used) = decode_compact_u16(&self.data[self.pos.min(self.data.len())..])?;
        self.pos += used;
        Ok(value as usize)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

/// Parse wire bytes into signatures and the compiled message.
pub fn decode_transaction(raw: &[u8]) -> Result<(Vec<[u8; 64]>, SolTransaction), SolError> {
    let mut r = Reader { data: raw, pos: 0 };

    let num_signatures = r.compact()?;
    let signatures = (0..num_signatures)
        .map(|_| r.array::<64>())
        .collect::<Result<Vec<_>, _>>()?;

    let num_required_signatures = r.byte()?;
    let num_readonly_signed = r.byte()?;
    let num_readonly_unsigned = r.byte()?;

    let num_accounts = r.compact()?;
    let account_keys = (0..num_accounts)
        .map(|_| r.array::<32>())
        .collect::<Result<Vec<_>, _>>()?;
    let recent_blockhash = r.array::<32>()?;

    let num_instructions = r.compact()?;
    let mut compiled_instructions = Vec::with_capacity(num_instructions);
    for _ in 0..num_instructions {
        let program_id_index = r.byte()?;
        let n = r.compact()?;
        let account_indices = r.take(n)?.to_vec();
        let len = r.compact()?;
        let data = r.take(len)?.to_vec();
        if program_id_index as usize >= account_keys.len()
            || account_indices.iter().any(|i| *i as usize >= account_keys.len())
        {
            return Err(SolError::SerializationError("account index out of range".into()));
        }
        compiled_instructions.push(CompiledInstruction {
            program_id_index,
            account_indices,
            data,
        });
    }

    if r.pos != raw.len() {
        return Err(SolError::SerializationError(format!(
            "{} trailing bytes",
            raw.len() - r.pos
        )));
    }
    if signatures.len() != num_required_signatures as usize {
        return Err(SolError::SerializationError(format!(
            "{} signatures for {} required signers",
            signatures.len(),
            num_required_signatures
        )));
    }

    Ok((
        signatures,
        SolTransaction {
            account_keys,
            num_required_signatures,
            num_readonly_signed,
            num_readonly_unsigned,
            recent_blockhash,
            compiled_instructions,
        },
    ))
}

/// Extract the system transfer (plus priority price and memo) from a message.
pub fn decode_transfer(tx: &SolTransaction) -> Result<DecodedTransfer, SolError> {
    let budget_program = address_to_bytes(COMPUTE_BUDGET_PROGRAM)?;
    let memo_program = address_to_bytes(MEMO_PROGRAM)?;

    let mut transfer = None;
    let mut compute_unit_price = None;
    let mut memo = None;

    for ix in &tx.compiled_instructions {
        let program = tx.account_keys[ix.program_id_index as usize];
        if program == SYSTEM_PROGRAM_ID
            && ix.data.len() == 12
            && ix.data[..4] == SYSTEM_TRANSFER_IX_INDEX.to_le_bytes()
            && ix.account_indices.len() == 2
        {
            let mut lamports = [0u8; 8];
            lamports.copy_from_slice(&ix.data[4..]);
            transfer = Some((
                tx.account_keys[ix.account_indices[0] as usize],
                tx.account_keys[ix.account_indices[1] as usize],
                u64::from_le_bytes(lamports),
            ));
        } else if program == budget_program
            && ix.data.len() == 9
            && ix.data[0] == SET_COMPUTE_UNIT_PRICE_IX
        {
            let mut price = [0u8; 8];
            price.copy_from_slice(&ix.data[1..]);
            compute_unit_price = Some(u64::from_le_bytes(price));
        } else if program == memo_program {
            memo = Some(String::from_utf8(ix.data.clone()).map_err(|e| {
                SolError::SerializationError(format!("memo is not utf-8: {e}"))
            })?);
        }
    }

    let (from, to, lamports) = transfer
        .ok_or_else(|| SolError::SerializationError("no system transfer instruction".into()))?;
    Ok(DecodedTransfer {
        from,
        to,
        lamports,
        compute_unit_price,
        memo,
    })
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// System Program `Transfer`: u32 LE index 2 followed by u64 LE lamports.
fn build_system_transfer_instruction(from: &[u8; 32], to: &[u8; 32], lamports: u64) -> SolInstruction {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER_IX_INDEX.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());

    SolInstruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta {
                pubkey: *from,
                is_signer: true,
                is_writable: true,
            },
            SolAccountMeta {
                pubkey: *to,
                is_signer: false,
                is_writable: true,
            },
        ],
        data,
    }
}

fn set_compute_unit_limit_instruction(program_id: [u8; 32], units: u32) -> SolInstruction {
    let mut data = vec![SET_COMPUTE_UNIT_LIMIT_IX];
    data.extend_from_slice(&units.to_le_bytes());
    SolInstruction {
        program_id,
        accounts: Vec::new(),
        data,
    }
}

fn set_compute_unit_price_instruction(program_id: [u8; 32], micro_lamports: u64) -> SolInstruction {
    let mut data = vec![SET_COMPUTE_UNIT_PRICE_IX];
    data.extend_from_slice(&micro_lamports.to_le_bytes());
    SolInstruction {
        program_id,
        accounts: Vec::new(),
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};

    fn signer(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn plain_transfer(from: [u8; 32], to: [u8; 32], lamports: u64) -> TransferParams {
        TransferParams {
            from,
            to,
            lamports,
            recent_blockhash: [0xCC; 32],
            compute_unit_limit: None,
            compute_unit_price: None,
            memo: None,
        }
    }

    #[test]
    fn compact_u16_encodings() {
        assert_eq!(encode_compact_u16(0), vec![0x00]);
        assert_eq!(encode_compact_u16(0x7f), vec![0x7f]);
        assert_eq!(encode_compact_u16(128), vec![0x80, 0x01]);
        assert_eq!(encode_compact_u16(16383), vec![0xff, 0x7f]);
        assert_eq!(encode_compact_u16(16384), vec![0x80, 0x80, 0x01]);
        assert_eq!(encode_compact_u16(u16::MAX), vec![0xff, 0xff, 0x03]);
    }

    #[test]
    fn compact_u16_decodes_boundaries() {
        assert_eq!(decode_compact_u16(&[0x80, 0x01]).unwrap(), (128, 2));
        assert_eq!(decode_compact_u16(&[0xff, 0xff, 0x03]).unwrap(), (u16::MAX, 3));
        assert!(decode_compact_u16(&[]).is_err());
        assert!(decode_compact_u16(&[0x80]).is_err());
        assert!(decode_compact_u16(&[0xff, 0xff, 0x7f]).is_err());
    }

    #[test]
    fn transfer_instruction_layout() {
        let ix = build_system_transfer_instruction(&[1u8; 32], &[2u8; 32], 1_000_000);
        assert_eq!(ix.data.len(), 12);
        assert_eq!(&ix.data[..4], &[2, 0, 0, 0]);
        assert_eq!(&ix.data[4..], &1_000_000u64.to_le_bytes());
        assert!(ix.accounts[0].is_signer && ix.accounts[0].is_writable);
        assert!(!ix.accounts[1].is_signer && ix.accounts[1].is_writable);
    }

    #[test]
    fn plain_transfer_account_order() {
        let from = signer(1).verifying_key().to_bytes();
        let tx = build_transfer(&plain_transfer(from, [2u8; 32], 1000)).unwrap();

        assert_eq!(tx.account_keys.len(), 3);
        assert_eq!(tx.account_keys[0], from);
        assert_eq!(tx.num_required_signatures, 1);
        assert_eq!(tx.num_readonly_signed, 0);
        assert_eq!(tx.num_readonly_unsigned, 1);
        assert_eq!(tx.recent_blockhash, [0xCC; 32]);
    }

    #[test]
    fn priority_fee_adds_compute_budget_instructions() {
        let from = signer(1).verifying_key().to_bytes();
        let mut params = plain_transfer(from, [2u8; 32], 1000);
        params.compute_unit_price = Some(5_000);
        let tx = build_transfer(&params).unwrap();

        assert_eq!(tx.compiled_instructions.len(), 3);
        let budget = address_to_bytes(COMPUTE_BUDGET_PROGRAM).unwrap();
        let limit_ix = &tx.compiled_instructions[0];
        assert_eq!(tx.account_keys[limit_ix.program_id_index as usize], budget);
        assert_eq!(limit_ix.data[0], 2);
        assert_eq!(&limit_ix.data[1..], &DEFAULT_TRANSFER_COMPUTE_UNITS.to_le_bytes());
        assert_eq!(tx.compiled_instructions[1].data[0], 3);
        assert_eq!(tx.num_readonly_unsigned, 2);
    }

    #[test]
    fn self_transfer_deduplicates_accounts() {
        let key = signer(3).verifying_key().to_bytes();
        let tx = build_transfer(&plain_transfer(key, key, 100)).unwrap();
        assert_eq!(tx.account_keys.len(), 2);
    }

    #[test]
    fn zero_lamports_and_off_curve_payer_fail() {
        let from = signer(1).verifying_key().to_bytes();
        assert!(build_transfer(&plain_transfer(from, [2u8; 32], 0)).is_err());

        // The system program id is not a curve point and can never sign.
        assert!(matches!(
            build_transfer(&plain_transfer(SYSTEM_PROGRAM_ID, [2u8; 32], 1)),
            Err(SolError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn oversized_memo_is_rejected() {
        let from = signer(1).verifying_key().to_bytes();
        let mut params = plain_transfer(from, [2u8; 32], 1);
        params.memo = Some("x".repeat(MAX_MEMO_BYTES + 1));
        assert!(build_transfer(&params).is_err());
    }

    #[test]
    fn message_has_header_and_blockhash() {
        let from = signer(1).verifying_key().to_bytes();
        let tx = build_transfer(&plain_transfer(from, [2u8; 32], 500)).unwrap();
        let msg = serialize_message(&tx);

        assert_eq!(msg[..3], [1, 0, 1]);
        let offset = 3 + 1 + 32 * tx.account_keys.len();
        assert_eq!(&msg[offset..offset + 32], &[0xCC; 32]);
    }

    #[test]
    fn signed_wire_verifies_and_decodes() {
        let key = signer(0x42);
        let from = key.verifying_key().to_bytes();
        let mut params = plain_transfer(from, [0xBB; 32], 1_000_000);
        params.compute_unit_price = Some(10_000);
        params.memo = Some("invoice 7".into());
        let tx = build_transfer(&params).unwrap();

        let signature = key.sign(&serialize_message(&tx)).to_bytes();
        let wire = encode_signed(&tx, &signature).unwrap();
        assert_eq!(wire[0], 0x01);

        let (sigs, decoded) = decode_transaction(&wire).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(sigs, vec![signature]);
        key.verifying_key()
            .verify(&serialize_message(&decoded), &Signature::from_bytes(&sigs[0]))
            .unwrap();

        let transfer = decode_transfer(&decoded).unwrap();
        assert_eq!(transfer.to, [0xBB; 32]);
        assert_eq!(transfer.lamports, 1_000_000);
        assert_eq!(transfer.compute_unit_price, Some(10_000));
        assert_eq!(transfer.memo.as_deref(), Some("invoice 7"));
        assert!(transaction_id(&signature).len() >= 86);
    }

    #[test]
    fn decode_rejects_truncated_and_trailing_bytes() {
        let key = signer(9);
        let tx = build_transfer(&plain_transfer(key.verifying_key().to_bytes(), [1; 32], 5)).unwrap();
        let wire = encode_signed(&tx, &key.sign(&serialize_message(&tx)).to_bytes()).unwrap();

        assert!(decode_transaction(&wire[..wire.len() - 1]).is_err());
        let mut longer = wire.clone();
        longer.push(0);
        assert!(decode_transaction(&longer).is_err());
        assert!(decode_transaction(&[]).is_err());
    }

    #[test]
    fn fee_includes_priority_component() {
        assert_eq!(estimate_fee(1, 200_000, 0), 5_000);
        // 0.2 lamports of priority fee rounds up to one.
        assert_eq!(estimate_fee(1, 200_000, 1), 5_001);
        assert_eq!(estimate_fee(1, 1_000, 50_000), 5_050);
    }
}
