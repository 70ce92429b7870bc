use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::{EncodedPoint, PublicKey};
use sha3::{Digest, Keccak256};

use crate::error::EthError;

/// Raw 20-byte address of an uncompressed secp256k1 public key (65 bytes, 0x04 prefix).
///
/// Keccak-256 over the 64 coordinate bytes, last 20 bytes kept.
pub fn address_bytes_from_uncompressed(uncompressed_pubkey: &[u8]) -> Result<[u8; 20], EthError> {
    if uncompressed_pubkey.len() != 65 || uncompressed_pubkey[0] != 0x04 {
        return Err(EthError::InvalidPublicKey(
            "uncompressed key must be 65 bytes starting with 0x04".into(),
        ));
    }

    let hash = Keccak256::digest(&uncompressed_pubkey[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..]);
    Ok(addr)
}

/// EIP-55 address of a compressed secp256k1 public key (33 bytes).
pub fn pubkey_bytes_to_eth_address(pubkey_33_bytes: &[u8; 33]) -> Result<String, EthError> {
    let encoded = EncodedPoint::from_bytes(pubkey_33_bytes).map_err(|e| {
        EthError::InvalidPublicKey(format!("invalid compressed key encoding: {e}"))
    })?;

    let pubkey: Option<PublicKey> = PublicKey::from_encoded_point(&encoded).into();
    let pubkey = pubkey.ok_or_else(|| {
        EthError::InvalidPublicKey("point is not on the secp256k1 curve".into())
    })?;

    let uncompressed = pubkey.to_encoded_point(false);
    Ok(checksum_address(&address_bytes_from_uncompressed(
        uncompressed.as_bytes(),
    )?))
}

/// Parse a `0x`-prefixed address into its 20 bytes.
///
/// Mixed-case input must carry a valid EIP-55 checksum; all-lower and
/// all-upper input is accepted as unchecksummed.
pub fn parse_address(address: &str) -> Result<[u8; 20], EthError> {
    let hex_part = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| EthError::InvalidAddress("address must start with 0x".into()))?;

    if hex_part.len() != 40 {
        return Err(EthError::InvalidAddress(format!(
            "expected 40 hex characters, got {}",
            hex_part.len()
        )));
    }

    let bytes = hex::decode(hex_part)
        .map_err(|e| EthError::InvalidAddress(format!("invalid hex: {e}")))?;
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&bytes);

    let is_all_lower = !hex_part.chars().any(|c| c.is_ascii_uppercase());
    let is_all_upper = !hex_part.chars().any(|c| c.is_ascii_lowercase());
    if !is_all_lower && !is_all_upper && &checksum_address(&addr)[2..] != hex_part {
        return Err(EthError::InvalidAddress(format!(
            "EIP-55 checksum mismatch for {address}"
        )));
    }

    Ok(addr)
}

/// Validates an Ethereum address string.
///
/// Malformed input is an error; a well-formed address whose mixed case
/// fails the EIP-55 checksum returns `Ok(false)`.
pub fn validate_address(address: &str) -> Result<bool, EthError> {
    match parse_address(address) {
        Ok(_) => Ok(true),
        Err(EthError::InvalidAddress(msg)) if msg.starts_with("EIP-55") => Ok(false),
        Err(e) => Err(e),
    }
}

/// EIP-55 mixed-case rendering of a raw address.
pub fn checksum_address(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let hash = Keccak256::digest(lower.as_bytes());

    let mut checksummed = String::with_capacity(42);
    checksummed.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            checksummed.push(c.to_ascii_uppercase());
        } else {
            checksummed.push(c);
        }
    }
    checksummed
}
