//! Ethereum/EVM chain support for the transaction engine.
//!
//! This crate provides:
//! - EIP-55 address derivation, parsing and validation
//! - Legacy (EIP-155) and EIP-1559 transaction encoding, signing hashes and decoding
//! - Same-nonce replacement fee rules
//! - Static EVM network parameters

pub mod address;
pub mod chains;
pub mod error;
pub mod transaction;
