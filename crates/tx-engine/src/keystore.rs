//! Boundary between the engine and key material.
//!
//! The engine only ever holds a [`KeyRef`]. Implementations decide where the
//! secret lives; [`HdKeyStore`] keeps a BIP-39 seed in memory.

use ed25519_dalek::Signer as _;
use secrecy::{ExposeSecret, SecretBox};
use thiserror::Error;

use crate::hd_derivation::{derive_ed25519_key, derive_secp256k1_key};
use crate::mnemonic::mnemonic_to_seed;
use crate::types::{CurveType, KeyRef};

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("key derivation failed: {0}")]
    Derivation(String),
    #[error("unknown key: {0}")]
    UnknownKey(String),
    #[error("request does not match key curve: {0}")]
    CurveMismatch(String),
    #[error("signing backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKey {
    /// SEC1 compressed point.
    Secp256k1([u8; 33]),
    Ed25519([u8; 32]),
}

impl PublicKey {
    pub fn curve(&self) -> CurveType {
        match self {
            PublicKey::Secp256k1(_) => CurveType::Secp256k1,
            PublicKey::Ed25519(_) => CurveType::Ed25519,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PublicKey::Secp256k1(bytes) => bytes,
            PublicKey::Ed25519(bytes) => bytes,
        }
    }
}

/// What the key store is asked to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignRequest {
    /// A 32-byte digest signed as-is (no further hashing).
    Secp256k1Prehash([u8; 32]),
    /// The full message; Ed25519 hashes internally.
    Ed25519Message(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawSignature {
    /// Compact `r || s` plus the recovery id (bit 0: y parity).
    Ecdsa { signature: [u8; 64], recovery_id: u8 },
    Ed25519([u8; 64]),
}

pub trait KeyStore: Send + Sync {
    fn public_key(&self, key: &KeyRef) -> Result<PublicKey, KeyStoreError>;

    fn sign(&self, key: &KeyRef, request: &SignRequest) -> Result<RawSignature, KeyStoreError>;
}

/// Hierarchical-deterministic key store over a BIP-39 seed.
///
/// Keys are derived on demand and wiped right after use.
pub struct HdKeyStore {
    seed: SecretBox<[u8; 64]>,
}

impl HdKeyStore {
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self, KeyStoreError> {
        let seed = mnemonic_to_seed(phrase, passphrase)?;
        Ok(Self {
            seed: SecretBox::new(Box::new(*seed)),
        })
    }
}

impl std::fmt::Debug for HdKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdKeyStore").field("seed", &"[REDACTED]").finish()
    }
}

impl KeyStore for HdKeyStore {
    fn public_key(&self, key: &KeyRef) -> Result<PublicKey, KeyStoreError> {
        let seed = self.seed.expose_secret();
        match key.chain.curve() {
            CurveType::Secp256k1 => {
                let derived = derive_secp256k1_key(seed, key)?;
                Ok(PublicKey::Secp256k1(derived.public_key_compressed))
            }
            CurveType::Ed25519 => {
                let derived = derive_ed25519_key(seed, key)?;
                Ok(PublicKey::Ed25519(derived.public_key))
            }
        }
    }

    fn sign(&self, key: &KeyRef, request: &SignRequest) -> Result<RawSignature, KeyStoreError> {
        let seed = self.seed.expose_secret();
        match (key.chain.curve(), request) {
            (CurveType::Secp256k1, SignRequest::Secp256k1Prehash(digest)) => {
                let derived = derive_secp256k1_key(seed, key)?;
                let signing_key = k256::ecdsa::SigningKey::from_bytes(&derived.private_key.into())
                    .map_err(|e| KeyStoreError::Backend(e.to_string()))?;
                let (signature, recovery_id) = signing_key
                    .sign_prehash_recoverable(digest)
                    .map_err(|e| KeyStoreError::Backend(e.to_string()))?;
                let mut compact = [0u8; 64];
                compact.copy_from_slice(&signature.to_bytes());
                Ok(RawSignature::Ecdsa {
                    signature: compact,
                    recovery_id: recovery_id.to_byte(),
                })
            }
            (CurveType::Ed25519, SignRequest::Ed25519Message(message)) => {
                let derived = derive_ed25519_key(seed, key)?;
                let signing_key = ed25519_dalek::SigningKey::from_bytes(&derived.private_key);
                Ok(RawSignature::Ed25519(signing_key.sign(message).to_bytes()))
            }
            (curve, _) => Err(KeyStoreError::CurveMismatch(format!(
                "{} uses {curve:?}",
                key.chain
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chain;
    use k256::ecdsa::signature::hazmat::PrehashVerifier;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn store() -> HdKeyStore {
        HdKeyStore::from_mnemonic(PHRASE, "").unwrap()
    }

    #[test]
    fn debug_output_is_redacted() {
        let out = format!("{:?}", store());
        assert!(out.contains("REDACTED"));
        assert!(!out.contains("5eb00bbd"));
    }

    #[test]
    fn secp256k1_signature_verifies() {
        let ks = store();
        let key = KeyRef::new(Chain::Ethereum, 0, 0);
        let digest = [0x42u8; 32];
        let PublicKey::Secp256k1(pubkey) = ks.public_key(&key).unwrap() else {
            panic!("expected secp256k1 key");
        };
        let RawSignature::Ecdsa { signature, .. } =
            ks.sign(&key, &SignRequest::Secp256k1Prehash(digest)).unwrap()
        else {
            panic!("expected ecdsa signature");
        };
        let vk = k256::ecdsa::VerifyingKey::from_sec1_bytes(&pubkey).unwrap();
        let sig = k256::ecdsa::Signature::from_slice(&signature).unwrap();
        vk.verify_prehash(&digest, &sig).unwrap();
    }

    #[test]
    fn ed25519_signature_verifies() {
        let ks = store();
        let key = KeyRef::new(Chain::Solana, 0, 0);
        let PublicKey::Ed25519(pubkey) = ks.public_key(&key).unwrap() else {
            panic!("expected ed25519 key");
        };
        let RawSignature::Ed25519(sig) = ks
            .sign(&key, &SignRequest::Ed25519Message(b"hello".to_vec()))
            .unwrap()
        else {
            panic!("expected ed25519 signature");
        };
        let vk = ed25519_dalek::VerifyingKey::from_bytes(&pubkey).unwrap();
        vk.verify_strict(b"hello", &ed25519_dalek::Signature::from_bytes(&sig))
            .unwrap();
    }

    #[test]
    fn curve_mismatch_is_refused() {
        let ks = store();
        let err = ks
            .sign(
                &KeyRef::new(Chain::Solana, 0, 0),
                &SignRequest::Secp256k1Prehash([0u8; 32]),
            )
            .unwrap_err();
        assert!(matches!(err, KeyStoreError::CurveMismatch(_)));
    }
}
