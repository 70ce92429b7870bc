use serde::Serialize;

/// Protocol parameters of an EVM-compatible network.
#[derive(Debug, Clone, Serialize)]
pub struct EvmChain {
    /// EIP-155 chain id, mixed into every signature.
    pub chain_id: u64,
    pub name: &'static str,
    pub symbol: &'static str,
    pub decimals: u8,
    /// Whether the network accepts type-2 (EIP-1559) transactions.
    pub supports_eip1559: bool,
    pub block_time_ms: u64,
    pub required_confirmations: u32,
    /// Lowest gas price (or priority fee) nodes will relay, in wei.
    pub min_gas_price_wei: u128,
    /// Static gas price used when no provider can report fees, in wei.
    pub fallback_gas_price_wei: u128,
    pub is_testnet: bool,
}

/// Ethereum Mainnet (chain ID 1).
pub const ETHEREUM: EvmChain = EvmChain {
    chain_id: 1,
    name: "Ethereum",
    symbol: "ETH",
    decimals: 18,
    supports_eip1559: true,
    block_time_ms: 12000,
    required_confirmations: 12,
    min_gas_price_wei: 1_000_000_000,
    fallback_gas_price_wei: 30_000_000_000,
    is_testnet: false,
};

/// Polygon PoS (chain ID 137).
pub const POLYGON: EvmChain = EvmChain {
    chain_id: 137,
    name: "Polygon",
    symbol: "MATIC",
    decimals: 18,
    supports_eip1559: true,
    block_time_ms: 2000,
    required_confirmations: 12,
    min_gas_price_wei: 25_000_000_000,
    fallback_gas_price_wei: 100_000_000_000,
    is_testnet: false,
};

/// Arbitrum One (chain ID 42161).
pub const ARBITRUM: EvmChain = EvmChain {
    chain_id: 42161,
    name: "Arbitrum One",
    symbol: "ETH",
    decimals: 18,
    supports_eip1559: true,
    block_time_ms: 250,
    required_confirmations: 1,
    min_gas_price_wei: 10_000_000,
    fallback_gas_price_wei: 100_000_000,
    is_testnet: false,
};

/// Base (chain ID 8453).
pub const BASE: EvmChain = EvmChain {
    chain_id: 8453,
    name: "Base",
    symbol: "ETH",
    decimals: 18,
    supports_eip1559: true,
    block_time_ms: 2000,
    required_confirmations: 1,
    min_gas_price_wei: 1_000_000,
    fallback_gas_price_wei: 100_000_000,
    is_testnet: false,
};

/// Optimism (chain ID 10).
pub const OPTIMISM: EvmChain = EvmChain {
    chain_id: 10,
    name: "Optimism",
    symbol: "ETH",
    decimals: 18,
    supports_eip1559: true,
    block_time_ms: 2000,
    required_confirmations: 1,
    min_gas_price_wei: 1_000_000,
    fallback_gas_price_wei: 100_000_000,
    is_testnet: false,
};

/// BNB Smart Chain (chain ID 56).
pub const BSC: EvmChain = EvmChain {
    chain_id: 56,
    name: "BNB Smart Chain",
    symbol: "BNB",
    decimals: 18,
    supports_eip1559: false,
    block_time_ms: 3000,
    required_confirmations: 12,
    min_gas_price_wei: 100_000_000,
    fallback_gas_price_wei: 3_000_000_000,
    is_testnet: false,
};

/// Avalanche C-Chain (chain ID 43114).
pub const AVALANCHE: EvmChain = EvmChain {
    chain_id: 43114,
    name: "Avalanche C-Chain",
    symbol: "AVAX",
    decimals: 18,
    supports_eip1559: true,
    block_time_ms: 2000,
    required_confirmations: 1,
    min_gas_price_wei: 1_000_000_000,
    fallback_gas_price_wei: 30_000_000_000,
    is_testnet: false,
};

/// Sepolia Testnet (chain ID 11155111).
pub const SEPOLIA: EvmChain = EvmChain {
    chain_id: 11155111,
    name: "Sepolia",
    symbol: "ETH",
    decimals: 18,
    supports_eip1559: true,
    block_time_ms: 12000,
    required_confirmations: 1,
    min_gas_price_wei: 1_000_000,
    fallback_gas_price_wei: 5_000_000_000,
    is_testnet: true,
};

/// Polygon Amoy Testnet (chain ID 80002).
pub const POLYGON_AMOY: EvmChain = EvmChain {
    chain_id: 80002,
    name: "Polygon Amoy",
    symbol: "MATIC",
    decimals: 18,
    supports_eip1559: true,
    block_time_ms: 2000,
    required_confirmations: 1,
    min_gas_price_wei: 25_000_000_000,
    fallback_gas_price_wei: 50_000_000_000,
    is_testnet: true,
};

const ALL_CHAINS: &[&EvmChain] = &[
    &ETHEREUM,
    &POLYGON,
    &ARBITRUM,
    &BASE,
    &OPTIMISM,
    &BSC,
    &AVALANCHE,
    &SEPOLIA,
    &POLYGON_AMOY,
];

/// Returns the chain definition for a given chain ID, or `None` if unsupported.
pub fn get_chain(chain_id: u64) -> Option<&'static EvmChain> {
    ALL_CHAINS.iter().find(|c| c.chain_id == chain_id).copied()
}

pub fn supported_chains() -> Vec<&'static EvmChain> {
    ALL_CHAINS.to_vec()
}
