//! Solana addresses: Base58 of the raw 32-byte Ed25519 public key.

use curve25519_dalek::edwards::CompressedEdwardsY;

use crate::error::SolError;

/// Address of an Ed25519 public key. No hashing is applied.
pub fn pubkey_to_address(ed25519_pubkey: &[u8; 32]) -> String {
    bs58::encode(ed25519_pubkey).into_string()
}

/// Decode an address to its 32 bytes.
pub fn address_to_bytes(address: &str) -> Result<[u8; 32], SolError> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| SolError::InvalidAddress(format!("base58 decode failed: {e}")))?;

    bytes.try_into().map_err(|v: Vec<u8>| {
        SolError::InvalidAddress(format!("expected 32 bytes, got {}", v.len()))
    })
}

/// Validate an address string. Off-curve (program-derived) addresses are valid recipients.
pub fn validate_address(address: &str) -> Result<bool, SolError> {
    address_to_bytes(address).map(|_| true)
}

/// Whether the bytes decode to a point on the Ed25519 curve, i.e. can own a signing key.
pub fn is_on_curve(pubkey: &[u8; 32]) -> bool {
    CompressedEdwardsY(*pubkey).decompress().is_some()
}
