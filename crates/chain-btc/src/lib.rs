//! Bitcoin-family chain support for the transaction engine.
//!
//! Provides P2WPKH addresses, coin selection with coin control, unsigned
//! transaction assembly with replace-by-fee signalling, segwit v0 sighash
//! computation for external signers, witness finalization, and the fee
//! arithmetic behind RBF and CPFP replacements.

pub mod address;
pub mod error;
pub mod network;
pub mod policy;
pub mod replacement;
pub mod transaction;
pub mod utxo;

pub use error::{BtcError, Result};
