//! Solana chain support for the transaction engine.
//!
//! Solana's compact binary wire format is implemented by hand, without
//! `solana-sdk`: message compilation, compute-budget and memo instructions,
//! single-signer wire encoding and decoding. Signatures come from an external
//! Ed25519 signer over [`serialize_message`].

pub mod address;
pub mod error;
pub mod transaction;

pub use address::{address_to_bytes, is_on_curve, pubkey_to_address, validate_address};
pub use error::SolError;
pub use transaction::{
    build_transfer, compile_transaction, decode_compact_u16, decode_transaction, decode_transfer,
    encode_compact_u16, encode_signed, estimate_fee, serialize_message, transaction_id,
    CompiledInstruction, DecodedTransfer, SolAccountMeta, SolInstruction, SolTransaction,
    TransferParams, SYSTEM_PROGRAM_ID,
};
