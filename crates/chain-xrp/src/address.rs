//! Classic addresses: ripple-alphabet base58check of `0x00 || RIPEMD160(SHA256(pubkey))`.

use bs58::Alphabet;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::XrpError;

const ACCOUNT_ID_VERSION: u8 = 0x00;

/// 20-byte account id of a compressed secp256k1 public key.
pub fn account_id(pubkey: &[u8; 33]) -> Result<[u8; 20], XrpError> {
    if pubkey[0] != 0x02 && pubkey[0] != 0x03 {
        return Err(XrpError::InvalidPublicKey(
            "expected a compressed secp256k1 key".into(),
        ));
    }
    let sha = Sha256::digest(pubkey);
    Ok(Ripemd160::digest(sha).into())
}

pub fn encode_account_id(account_id: &[u8; 20]) -> String {
    bs58::encode(account_id)
        .with_alphabet(Alphabet::RIPPLE)
        .with_check_version(ACCOUNT_ID_VERSION)
        .into_string()
}

pub fn pubkey_to_address(pubkey: &[u8; 33]) -> Result<String, XrpError> {
    Ok(encode_account_id(&account_id(pubkey)?))
}

/// Decode a classic address to its account id, checking version and checksum.
pub fn decode_address(address: &str) -> Result<[u8; 20], XrpError> {
    let bytes = bs58::decode(address)
        .with_alphabet(Alphabet::RIPPLE)
        .with_check(Some(ACCOUNT_ID_VERSION))
        .into_vec()
        .map_err(|e| XrpError::InvalidAddress(format!("{address}: {e}")))?;

    // The decoder keeps the version byte in front of the payload.
    let payload = match bytes.split_first() {
        Some((&ACCOUNT_ID_VERSION, rest)) if rest.len() == 20 => rest,
        _ if bytes.len() == 20 => &bytes[..],
        _ => {
            return Err(XrpError::InvalidAddress(format!(
                "{address} does not hold a 20-byte account id"
            )))
        }
    };
    let mut id = [0u8; 20];
    id.copy_from_slice(payload);
    Ok(id)
}

pub fn validate_address(address: &str) -> Result<bool, XrpError> {
    decode_address(address).map(|_| true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_account_encodes_to_account_zero() {
        assert_eq!(encode_account_id(&[0u8; 20]), "rrrrrrrrrrrrrrrrrrrrrhoLvTp");
    }

    #[test]
    fn genesis_account_vector() {
        let pubkey: [u8; 33] =
            hex::decode("0330E7FC9D56BB25D6893BA3F317AE5BCF33B3291BD63DB32654A313222F7FD020")
                .unwrap()
                .try_into()
                .unwrap();
        let address = pubkey_to_address(&pubkey).unwrap();
        assert_eq!(address, "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh");
        assert_eq!(
            hex::encode_upper(decode_address(&address).unwrap()),
            "B5F762798A53D543A014CAF8B297CFF8F2F937E8"
        );
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        assert!(decode_address("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTj").is_err());
        assert!(validate_address("not an address").is_err());
    }

    #[test]
    fn uncompressed_prefix_is_rejected() {
        let mut key = [0u8; 33];
        key[0] = 0x04;
        assert!(matches!(account_id(&key), Err(XrpError::InvalidPublicKey(_))));
    }
}
