use bip32::{DerivationPath, XPrv};
use hmac::{Hmac, Mac};
use k256::ecdsa::SigningKey;
use sha2::Sha512;
use zeroize::Zeroize;

use crate::keystore::KeyStoreError;
use crate::types::{Chain, KeyRef};

type HmacSha512 = Hmac<Sha512>;

/// BIP-44 derivation path: m/purpose'/coin_type'/account'/change/address_index
///
/// - BTC:  m/84'/0'/0'/0/0  (BIP-84 for native SegWit P2WPKH)
/// - ETH:  m/44'/60'/0'/0/0 (BIP-44 standard)
/// - XRP:  m/44'/144'/0'/0/0
/// - SOL:  m/44'/501'/0'/0' (Solana uses hardened at all levels)
pub fn derivation_path(key: &KeyRef) -> String {
    let (account, index) = (key.account, key.index);
    match key.chain {
        // BIP-84 for native SegWit
        Chain::Bitcoin => format!("m/84'/0'/{account}'/0/{index}"),
        Chain::BitcoinTestnet => format!("m/84'/1'/{account}'/0/{index}"),

        // Solana: all hardened
        Chain::Solana | Chain::SolanaDevnet => format!("m/44'/501'/{account}'/{index}'"),

        // Every EVM chain shares coin type 60; chain_id separates them at TX level
        chain => format!("m/44'/{}'/{account}'/0/{index}", chain.coin_type()),
    }
}

/// Derive a secp256k1 private key from seed using BIP-32
pub fn derive_secp256k1_key(seed: &[u8], key: &KeyRef) -> Result<DerivedKey, KeyStoreError> {
    let path_str = derivation_path(key);

    let path: DerivationPath = path_str
        .parse()
        .map_err(|e: bip32::Error| KeyStoreError::Derivation(e.to_string()))?;

    let xprv = XPrv::derive_from_path(seed, &path)
        .map_err(|e| KeyStoreError::Derivation(e.to_string()))?;

    let private_key_bytes: [u8; 32] = xprv.to_bytes().into();
    let signing_key = SigningKey::from_bytes(&private_key_bytes.into())
        .map_err(|e| KeyStoreError::Derivation(e.to_string()))?;

    let public_key_compressed: [u8; 33] = signing_key
        .verifying_key()
        .to_encoded_point(true)
        .as_bytes()
        .try_into()
        .map_err(|_| KeyStoreError::Derivation("Invalid public key length".into()))?;

    Ok(DerivedKey {
        private_key: private_key_bytes,
        public_key_compressed,
        derivation_path: path_str,
    })
}

/// Derive an Ed25519 private key from seed (for Solana)
/// Uses SLIP-0010 derivation for Ed25519
pub fn derive_ed25519_key(seed: &[u8], key: &KeyRef) -> Result<DerivedEd25519Key, KeyStoreError> {
    let path_str = derivation_path(key);

    // Master key: HMAC-SHA512(key="ed25519 seed", data=seed)
    let mut mac = HmacSha512::new_from_slice(b"ed25519 seed")
        .map_err(|e| KeyStoreError::Derivation(e.to_string()))?;
    mac.update(seed);
    let result = mac.finalize().into_bytes();

    let mut private_key = [0u8; 32];
    let mut chain_code = [0u8; 32];
    private_key.copy_from_slice(&result[..32]);
    chain_code.copy_from_slice(&result[32..]);

    // All components are hardened for Ed25519
    for child_index in parse_derivation_path(&path_str)? {
        let mut mac = HmacSha512::new_from_slice(&chain_code)
            .map_err(|e| KeyStoreError::Derivation(e.to_string()))?;
        // Hardened child: 0x00 || key || index (with hardened bit set)
        mac.update(&[0x00]);
        mac.update(&private_key);
        mac.update(&(child_index | 0x8000_0000).to_be_bytes());
        let result = mac.finalize().into_bytes();

        private_key.copy_from_slice(&result[..32]);
        chain_code.copy_from_slice(&result[32..]);
    }

    let signing_key = ed25519_dalek::SigningKey::from_bytes(&private_key);
    let derived = DerivedEd25519Key {
        private_key,
        public_key: signing_key.verifying_key().to_bytes(),
        derivation_path: path_str,
    };

    // Zeroize intermediates
    private_key.zeroize();
    chain_code.zeroize();

    Ok(derived)
}

/// Parse "m/44'/501'/0'/0'" into [44, 501, 0, 0]
fn parse_derivation_path(path: &str) -> Result<Vec<u32>, KeyStoreError> {
    let path = path
        .strip_prefix("m/")
        .ok_or_else(|| KeyStoreError::Derivation("Path must start with m/".into()))?;

    path.split('/')
        .map(|component| {
            let num_str = component
                .strip_suffix('\'')
                .or_else(|| component.strip_suffix('h'))
                .unwrap_or(component);
            num_str
                .parse::<u32>()
                .map_err(|e| KeyStoreError::Derivation(format!("Invalid path component: {e}")))
        })
        .collect()
}

/// Derived secp256k1 key (for BTC, EVM and XRP)
pub struct DerivedKey {
    pub private_key: [u8; 32],
    pub public_key_compressed: [u8; 33],
    pub derivation_path: String,
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// Derived Ed25519 key (for Solana)
pub struct DerivedEd25519Key {
    pub private_key: [u8; 32],
    pub public_key: [u8; 32],
    pub derivation_path: String,
}

impl Drop for DerivedEd25519Key {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mnemonic::mnemonic_to_seed;

    // BIP-39 test vector: "abandon" x11 + "about"
    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn test_seed() -> Vec<u8> {
        mnemonic_to_seed(TEST_MNEMONIC, "").unwrap().to_vec()
    }

    #[test]
    fn test_paths() {
        assert_eq!(derivation_path(&KeyRef::new(Chain::Bitcoin, 0, 0)), "m/84'/0'/0'/0/0");
        assert_eq!(derivation_path(&KeyRef::new(Chain::Ethereum, 1, 2)), "m/44'/60'/1'/0/2");
        assert_eq!(derivation_path(&KeyRef::new(Chain::Xrp, 0, 0)), "m/44'/144'/0'/0/0");
        assert_eq!(derivation_path(&KeyRef::new(Chain::Solana, 0, 0)), "m/44'/501'/0'/0'");
    }

    #[test]
    fn test_derive_eth_key() {
        let seed = test_seed();
        let key = derive_secp256k1_key(&seed, &KeyRef::new(Chain::Ethereum, 0, 0)).unwrap();
        assert_eq!(key.derivation_path, "m/44'/60'/0'/0/0");
        // Compressed key should start with 02 or 03
        assert!(key.public_key_compressed[0] == 0x02 || key.public_key_compressed[0] == 0x03);
    }

    #[test]
    fn test_known_eth_address() {
        // First account of the "abandon ... about" wallet.
        let seed = test_seed();
        let key = derive_secp256k1_key(&seed, &KeyRef::new(Chain::Ethereum, 0, 0)).unwrap();
        let address = chain_eth::address::pubkey_bytes_to_eth_address(&key.public_key_compressed).unwrap();
        assert_eq!(address, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
    }

    #[test]
    fn test_derive_sol_key() {
        let seed = test_seed();
        let key = derive_ed25519_key(&seed, &KeyRef::new(Chain::Solana, 0, 0)).unwrap();
        assert_eq!(key.derivation_path, "m/44'/501'/0'/0'");
        assert_eq!(key.public_key.len(), 32);
    }

    #[test]
    fn test_derivation_deterministic() {
        let seed = test_seed();
        let key_ref = KeyRef::new(Chain::Ethereum, 0, 0);
        let key1 = derive_secp256k1_key(&seed, &key_ref).unwrap();
        let key2 = derive_secp256k1_key(&seed, &key_ref).unwrap();
        assert_eq!(key1.private_key, key2.private_key);
    }

    #[test]
    fn test_different_accounts_different_keys() {
        let seed = test_seed();
        let key0 = derive_secp256k1_key(&seed, &KeyRef::new(Chain::Ethereum, 0, 0)).unwrap();
        let key1 = derive_secp256k1_key(&seed, &KeyRef::new(Chain::Ethereum, 1, 0)).unwrap();
        assert_ne!(key0.private_key, key1.private_key);
    }

    #[test]
    fn test_evm_chains_same_key() {
        // All EVM chains should derive the same key (differentiated by chain_id)
        let seed = test_seed();
        let eth = derive_secp256k1_key(&seed, &KeyRef::new(Chain::Ethereum, 0, 0)).unwrap();
        let poly = derive_secp256k1_key(&seed, &KeyRef::new(Chain::Polygon, 0, 0)).unwrap();
        assert_eq!(eth.private_key, poly.private_key);
    }

    #[test]
    fn test_parse_derivation_path() {
        let components = parse_derivation_path("m/44'/60'/0'/0/0").unwrap();
        assert_eq!(components, vec![44, 60, 0, 0, 0]);
        assert!(parse_derivation_path("44/60").is_err());
    }
}
