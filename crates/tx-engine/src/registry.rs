//! Static per-chain capability table.

use std::collections::HashMap;

use chain_btc::network::BtcNetwork;
use chain_btc::policy::{MIN_RELAY_FEE_RATE, P2WPKH_DUST_SAT};
use chain_eth::chains::{self as evm, EvmChain};
use serde::Serialize;

use crate::error::{EngineError, ErrorKind, Result, ResultExt};
use crate::keystore::PublicKey;
use crate::types::{Chain, CurveType};

/// How resources are reserved on a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChainFamily {
    Utxo,
    Account,
}

/// Wire protocol spoken by a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    Bitcoin,
    Evm,
    Solana,
    Xrp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AddressFormat {
    /// bech32 v0 witness program.
    Segwit,
    /// EIP-55 mixed-case hex.
    ChecksumHex,
    /// Base58 of the raw Ed25519 key.
    Base58,
    /// Ripple-alphabet base58check.
    XrpClassic,
}

/// Unit of [`ChainSpec::min_fee`] and [`ChainSpec::fallback_fee`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeeUnit {
    SatPerVbyte,
    WeiPerGas,
    MicroLamportsPerComputeUnit,
    Drops,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainSpec {
    pub chain: Chain,
    pub name: &'static str,
    pub symbol: &'static str,
    pub decimals: u8,
    pub curve: CurveType,
    pub family: ChainFamily,
    pub protocol: Protocol,
    pub address_format: AddressFormat,
    pub coin_type: u32,
    /// EIP-155 replay protection.
    pub chain_id: Option<u64>,
    pub supports_eip1559: bool,
    pub btc_network: Option<BtcNetwork>,
    pub block_time_ms: u64,
    pub required_confirmations: u32,
    /// Smallest output the network relays, in base units. Zero where no such rule exists.
    pub dust_threshold: u64,
    pub fee_unit: FeeUnit,
    /// Floor for fee estimates.
    pub min_fee: u64,
    /// Used when no provider can report fees.
    pub fallback_fee: u64,
    /// Blocks/slots/ledgers a built transaction stays valid for, when the chain expires them.
    pub validity_window: Option<u64>,
}

impl ChainSpec {
    pub fn is_utxo(&self) -> bool {
        self.family == ChainFamily::Utxo
    }

    pub fn btc_network(&self) -> Result<BtcNetwork> {
        self.btc_network.ok_or_else(|| {
            EngineError::new(ErrorKind::UnsupportedChain, self.chain, "not a bitcoin network")
        })
    }

    pub fn evm_chain_id(&self) -> Result<u64> {
        self.chain_id.ok_or_else(|| {
            EngineError::new(ErrorKind::UnsupportedChain, self.chain, "no EIP-155 chain id")
        })
    }

    fn bitcoin(chain: Chain, network: BtcNetwork, confirmations: u32, fallback: u64) -> Self {
        Self {
            chain,
            name: chain.display_name(),
            symbol: chain.symbol(),
            decimals: 8,
            curve: CurveType::Secp256k1,
            family: ChainFamily::Utxo,
            protocol: Protocol::Bitcoin,
            address_format: AddressFormat::Segwit,
            coin_type: chain.coin_type(),
            chain_id: None,
            supports_eip1559: false,
            btc_network: Some(network),
            block_time_ms: 600_000,
            required_confirmations: confirmations,
            dust_threshold: P2WPKH_DUST_SAT,
            fee_unit: FeeUnit::SatPerVbyte,
            min_fee: MIN_RELAY_FEE_RATE,
            fallback_fee: fallback,
            validity_window: None,
        }
    }

    fn evm(chain: Chain, params: &EvmChain) -> Self {
        Self {
            chain,
            name: params.name,
            symbol: params.symbol,
            decimals: params.decimals,
            curve: CurveType::Secp256k1,
            family: ChainFamily::Account,
            protocol: Protocol::Evm,
            address_format: AddressFormat::ChecksumHex,
            coin_type: chain.coin_type(),
            chain_id: Some(params.chain_id),
            supports_eip1559: params.supports_eip1559,
            btc_network: None,
            block_time_ms: params.block_time_ms,
            required_confirmations: params.required_confirmations,
            dust_threshold: 0,
            fee_unit: FeeUnit::WeiPerGas,
            min_fee: u64::try_from(params.min_gas_price_wei).unwrap_or(u64::MAX),
            fallback_fee: u64::try_from(params.fallback_gas_price_wei).unwrap_or(u64::MAX),
            validity_window: None,
        }
    }

    fn solana(chain: Chain) -> Self {
        Self {
            chain,
            name: chain.display_name(),
            symbol: chain.symbol(),
            decimals: 9,
            curve: CurveType::Ed25519,
            family: ChainFamily::Account,
            protocol: Protocol::Solana,
            address_format: AddressFormat::Base58,
            coin_type: chain.coin_type(),
            chain_id: None,
            supports_eip1559: false,
            btc_network: None,
            block_time_ms: 400,
            required_confirmations: 1,
            dust_threshold: 0,
            fee_unit: FeeUnit::MicroLamportsPerComputeUnit,
            min_fee: 1,
            fallback_fee: 10_000,
            // A blockhash is accepted for 150 slots.
            validity_window: Some(150),
        }
    }

    fn xrp(chain: Chain) -> Self {
        Self {
            chain,
            name: chain.display_name(),
            symbol: chain.symbol(),
            decimals: 6,
            curve: CurveType::Secp256k1,
            family: ChainFamily::Account,
            protocol: Protocol::Xrp,
            address_format: AddressFormat::XrpClassic,
            coin_type: chain.coin_type(),
            chain_id: None,
            supports_eip1559: false,
            btc_network: None,
            block_time_ms: 4_000,
            required_confirmations: 1,
            dust_threshold: 0,
            fee_unit: FeeUnit::Drops,
            min_fee: chain_xrp::transaction::BASE_FEE_DROPS,
            fallback_fee: 12,
            validity_window: Some(20),
        }
    }

    /// Built-in parameters for `chain`.
    pub fn standard(chain: Chain) -> Self {
        match chain {
            Chain::Bitcoin => Self::bitcoin(chain, BtcNetwork::Mainnet, 6, 20),
            Chain::BitcoinTestnet => Self::bitcoin(chain, BtcNetwork::Testnet, 1, 2),
            Chain::Ethereum => Self::evm(chain, &evm::ETHEREUM),
            Chain::Polygon => Self::evm(chain, &evm::POLYGON),
            Chain::Arbitrum => Self::evm(chain, &evm::ARBITRUM),
            Chain::Base => Self::evm(chain, &evm::BASE),
            Chain::Optimism => Self::evm(chain, &evm::OPTIMISM),
            Chain::Bsc => Self::evm(chain, &evm::BSC),
            Chain::Avalanche => Self::evm(chain, &evm::AVALANCHE),
            Chain::Sepolia => Self::evm(chain, &evm::SEPOLIA),
            Chain::PolygonAmoy => Self::evm(chain, &evm::POLYGON_AMOY),
            Chain::Solana | Chain::SolanaDevnet => Self::solana(chain),
            Chain::Xrp | Chain::XrpTestnet => Self::xrp(chain),
        }
    }
}

/// Immutable lookup table handed to the engine at startup.
#[derive(Debug, Clone)]
pub struct Registry {
    specs: HashMap<Chain, ChainSpec>,
}

impl Registry {
    /// Every supported chain with its built-in parameters.
    pub fn standard() -> Self {
        Self {
            specs: Chain::ALL
                .iter()
                .map(|chain| (*chain, ChainSpec::standard(*chain)))
                .collect(),
        }
    }

    /// Registry limited to `chains`.
    pub fn only(chains: &[Chain]) -> Self {
        Self {
            specs: chains
                .iter()
                .map(|chain| (*chain, ChainSpec::standard(*chain)))
                .collect(),
        }
    }

    pub fn get(&self, chain: Chain) -> Result<&ChainSpec> {
        self.specs.get(&chain).ok_or_else(|| {
            EngineError::new(ErrorKind::UnsupportedChain, chain, "chain is not registered")
        })
    }

    pub fn chains(&self) -> impl Iterator<Item = Chain> + '_ {
        self.specs.keys().copied()
    }

    /// `Ok(())` when `address` is well-formed for `chain`, `InvalidAddress` otherwise.
    pub fn validate_address(&self, chain: Chain, address: &str) -> Result<()> {
        let spec = self.get(chain)?;
        let valid = match spec.protocol {
            Protocol::Bitcoin => {
                chain_btc::address::validate_address(address, spec.btc_network()?).unwrap_or(false)
            }
            Protocol::Evm => chain_eth::address::validate_address(address).unwrap_or(false),
            Protocol::Solana => chain_sol::address::validate_address(address).unwrap_or(false),
            Protocol::Xrp => chain_xrp::address::validate_address(address).unwrap_or(false),
        };
        if valid {
            Ok(())
        } else {
            Err(EngineError::new(
                ErrorKind::InvalidAddress,
                chain,
                format!("{address} is not a valid {} address", spec.name),
            ))
        }
    }

    /// The address controlled by `pubkey` on `chain`.
    pub fn derive_address(&self, chain: Chain, pubkey: &PublicKey) -> Result<String> {
        let spec = self.get(chain)?;
        match (spec.protocol, pubkey) {
            (Protocol::Bitcoin, PublicKey::Secp256k1(key)) => {
                chain_btc::address::pubkey_to_p2wpkh_address(key, spec.btc_network()?).on_chain(chain)
            }
            (Protocol::Evm, PublicKey::Secp256k1(key)) => {
                chain_eth::address::pubkey_bytes_to_eth_address(key).on_chain(chain)
            }
            (Protocol::Xrp, PublicKey::Secp256k1(key)) => {
                chain_xrp::address::pubkey_to_address(key).on_chain(chain)
            }
            (Protocol::Solana, PublicKey::Ed25519(key)) => Ok(chain_sol::address::pubkey_to_address(key)),
            (_, key) => Err(EngineError::new(
                ErrorKind::KeyStore,
                chain,
                format!("{:?} key cannot own a {} address", key.curve(), spec.name),
            )),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}
