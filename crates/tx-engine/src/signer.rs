//! Chain-specific signing through the [`KeyStore`] seam.
//!
//! Every signature is verified against the key's public key before the
//! signed bytes leave this module.

use chain_eth::transaction::EthSignature;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, VerifyingKey};

use crate::builder::{Payload, Relation, TxDetails, UnsignedTransaction};
use crate::error::{EngineError, ErrorKind, Result, ResultExt};
use crate::keystore::{KeyStore, PublicKey, RawSignature, SignRequest};
use crate::registry::Registry;
use crate::types::{Chain, KeyRef};

/// Immutable broadcastable bytes plus the id the network will know them by.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    chain: Chain,
    raw: Vec<u8>,
    txid: String,
    pub(crate) key: KeyRef,
    pub(crate) holder: String,
    pub(crate) from_address: String,
    pub(crate) details: TxDetails,
    pub(crate) relation: Option<Relation>,
}

impl SignedTransaction {
    pub(crate) fn new(
        key: KeyRef,
        raw: Vec<u8>,
        txid: String,
        holder: String,
        from_address: String,
        details: TxDetails,
        relation: Option<Relation>,
    ) -> Self {
        Self {
            chain: key.chain,
            raw,
            txid,
            key,
            holder,
            from_address,
            details,
            relation,
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn txid(&self) -> &str {
        &self.txid
    }

    pub fn from_address(&self) -> &str {
        &self.from_address
    }

    pub fn details(&self) -> &TxDetails {
        &self.details
    }

    /// The broadcast transaction this one replaces or bumps.
    pub fn relation(&self) -> Option<&Relation> {
        self.relation.as_ref()
    }
}

fn signing_error(chain: Chain, cause: impl Into<String>) -> EngineError {
    EngineError::new(ErrorKind::Signing, chain, cause)
}

fn key_error(chain: Chain, err: impl std::fmt::Display) -> EngineError {
    EngineError::new(ErrorKind::KeyStore, chain, err.to_string())
}

fn secp256k1_key(chain: Chain, pubkey: &PublicKey) -> Result<[u8; 33]> {
    match pubkey {
        PublicKey::Secp256k1(bytes) => Ok(*bytes),
        PublicKey::Ed25519(_) => Err(signing_error(chain, "expected a secp256k1 key")),
    }
}

/// Sign a digest, force low-S and check the result against `pubkey`.
/// Returns the compact signature and its y parity.
fn sign_ecdsa(keystore: &dyn KeyStore, key: &KeyRef, digest: &[u8; 32], pubkey: &[u8; 33]) -> Result<([u8; 64], bool)> {
    let chain = key.chain;
    let raw = keystore
        .sign(key, &SignRequest::Secp256k1Prehash(*digest))
        .map_err(|e| key_error(chain, e))?;
    let RawSignature::Ecdsa {
        signature,
        recovery_id,
    } = raw
    else {
        return Err(signing_error(chain, "key store returned a non-ECDSA signature"));
    };

    let mut parsed = Signature::from_slice(&signature)
        .map_err(|e| signing_error(chain, format!("malformed signature: {e}")))?;
    let mut y_parity = recovery_id & 1 == 1;
    if let Some(low) = parsed.normalize_s() {
        parsed = low;
        y_parity = !y_parity;
    }

    let verifying_key = VerifyingKey::from_sec1_bytes(pubkey)
        .map_err(|e| signing_error(chain, format!("invalid public key: {e}")))?;
    verifying_key
        .verify_prehash(digest, &parsed)
        .map_err(|_| signing_error(chain, "signature does not verify against the signing key"))?;

    let mut compact = [0u8; 64];
    compact.copy_from_slice(&parsed.to_bytes());
    Ok((compact, y_parity))
}

/// Sign `unsigned` with the key it was built for.
///
/// Synchronous; the key store is never called from inside an await point.
pub fn sign(keystore: &dyn KeyStore, registry: &Registry, unsigned: &UnsignedTransaction) -> Result<SignedTransaction> {
    let chain = unsigned.chain;
    let key = &unsigned.key;
    let pubkey = keystore.public_key(key).map_err(|e| key_error(chain, e))?;

    let owner = registry.derive_address(chain, &pubkey)?;
    if owner != unsigned.from_address {
        return Err(signing_error(
            chain,
            format!("key controls {owner}, transaction spends from {}", unsigned.from_address),
        ));
    }

    let (raw, txid) = match &unsigned.payload {
        Payload::Bitcoin(payload) => {
            let pk = secp256k1_key(chain, &pubkey)?;
            let digests = chain_btc::transaction::sighashes(&payload.unsigned, &pk).on_chain(chain)?;
            let signatures = digests
                .iter()
                .map(|digest| sign_ecdsa(keystore, key, digest, &pk).map(|(sig, _)| sig))
                .collect::<Result<Vec<_>>>()?;
            let tx = chain_btc::transaction::finalize(&payload.unsigned, &pk, &signatures).on_chain(chain)?;
            (chain_btc::transaction::serialize(&tx), chain_btc::transaction::txid(&tx))
        }
        Payload::Evm(tx) => {
            let pk = secp256k1_key(chain, &pubkey)?;
            let digest = chain_eth::transaction::signing_hash(tx).on_chain(chain)?;
            let (compact, y_parity) = sign_ecdsa(keystore, key, &digest, &pk)?;
            let mut signature = EthSignature {
                r: [0u8; 32],
                s: [0u8; 32],
                y_parity,
            };
            signature.r.copy_from_slice(&compact[..32]);
            signature.s.copy_from_slice(&compact[32..]);

            let sender = chain_eth::transaction::recover_sender(tx, &signature).on_chain(chain)?;
            if !sender.eq_ignore_ascii_case(&unsigned.from_address) {
                return Err(signing_error(chain, format!("signature recovers to {sender}")));
            }
            let signed = chain_eth::transaction::encode_signed(tx, &signature).on_chain(chain)?;
            (signed.raw_tx, signed.tx_hash)
        }
        Payload::Solana { tx, .. } => {
            let PublicKey::Ed25519(pk) = pubkey else {
                return Err(signing_error(chain, "expected an Ed25519 key"));
            };
            let message = chain_sol::serialize_message(tx);
            let raw = keystore
                .sign(key, &SignRequest::Ed25519Message(message.clone()))
                .map_err(|e| key_error(chain, e))?;
            let RawSignature::Ed25519(signature) = raw else {
                return Err(signing_error(chain, "key store returned a non-Ed25519 signature"));
            };

            let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&pk)
                .map_err(|e| signing_error(chain, format!("invalid public key: {e}")))?;
            verifying_key
                .verify_strict(&message, &ed25519_dalek::Signature::from_bytes(&signature))
                .map_err(|_| signing_error(chain, "signature does not verify against the signing key"))?;

            (
                chain_sol::encode_signed(tx, &signature).on_chain(chain)?,
                chain_sol::transaction_id(&signature),
            )
        }
        Payload::Xrp(payment) => {
            let pk = secp256k1_key(chain, &pubkey)?;
            let digest = chain_xrp::transaction::signing_hash(payment, &pk).on_chain(chain)?;
            let (compact, _) = sign_ecdsa(keystore, key, &digest, &pk)?;
            let signed = chain_xrp::transaction::encode_signed(payment, &pk, &compact).on_chain(chain)?;
            (signed.blob, signed.tx_id)
        }
    };

    log::info!("{chain}: signed {txid} from {}", unsigned.from_address);
    Ok(SignedTransaction::new(
        *key,
        raw,
        txid,
        unsigned.id.clone(),
        unsigned.from_address.clone(),
        unsigned.details()?,
        unsigned.relation.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::{HdKeyStore, KeyStoreError};
    use chain_eth::transaction::{build_transfer, EthFee};

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn keystore() -> HdKeyStore {
        HdKeyStore::from_mnemonic(PHRASE, "").unwrap()
    }

    /// Signs with the real key but flips a bit in every ECDSA signature.
    struct Corrupting(HdKeyStore);

    impl KeyStore for Corrupting {
        fn public_key(&self, key: &KeyRef) -> std::result::Result<PublicKey, KeyStoreError> {
            self.0.public_key(key)
        }

        fn sign(&self, key: &KeyRef, request: &SignRequest) -> std::result::Result<RawSignature, KeyStoreError> {
            match self.0.sign(key, request)? {
                RawSignature::Ecdsa {
                    mut signature,
                    recovery_id,
                } => {
                    signature[40] ^= 0x01;
                    Ok(RawSignature::Ecdsa {
                        signature,
                        recovery_id,
                    })
                }
                RawSignature::Ed25519(mut sig) => {
                    sig[0] ^= 0x01;
                    Ok(RawSignature::Ed25519(sig))
                }
            }
        }
    }

    fn eth_unsigned(from: &str) -> UnsignedTransaction {
        let tx = build_transfer(
            1,
            0,
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94",
            1_000,
            EthFee::Eip1559 {
                max_fee_per_gas: 30_000_000_000,
                max_priority_fee_per_gas: 1_000_000_000,
            },
            21_000,
        )
        .unwrap();
        UnsignedTransaction {
            id: "h1".into(),
            chain: Chain::Ethereum,
            key: KeyRef::new(Chain::Ethereum, 0, 0),
            from_address: from.into(),
            payload: Payload::Evm(tx),
            validity: None,
            resources: Vec::new(),
            relation: None,
        }
    }

    #[test]
    fn evm_signature_recovers_sender() {
        let unsigned = eth_unsigned("0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
        let signed = sign(&keystore(), &Registry::standard(), &unsigned).unwrap();
        let (decoded, sig) = chain_eth::transaction::decode_signed(signed.raw()).unwrap();
        assert_eq!(
            chain_eth::transaction::recover_sender(&decoded, &sig).unwrap(),
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"
        );
        assert!(signed.txid().starts_with("0x"));
        assert_eq!(signed.holder, "h1");
    }

    #[test]
    fn wrong_from_address_is_refused() {
        let unsigned = eth_unsigned("0x0000000000000000000000000000000000000001");
        let err = sign(&keystore(), &Registry::standard(), &unsigned).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Signing);
    }

    #[test]
    fn corrupted_backend_is_caught() {
        let unsigned = eth_unsigned("0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
        let err = sign(&Corrupting(keystore()), &Registry::standard(), &unsigned).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Signing);
    }
}
