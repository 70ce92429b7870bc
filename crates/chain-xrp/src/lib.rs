//! XRP Ledger support for the transaction engine.
//!
//! Classic addresses, the canonical binary field codec for `Payment`
//! transactions, signing hashes for external secp256k1 signers, and
//! canonical DER signature assembly.

pub mod address;
pub mod codec;
pub mod error;
pub mod transaction;

pub use error::XrpError;
