use serde::{Deserialize, Serialize};

/// Supported blockchain networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Chain {
    Bitcoin,
    BitcoinTestnet,
    Ethereum,
    Polygon,
    Arbitrum,
    Base,
    Optimism,
    Bsc,
    Avalanche,
    Solana,
    SolanaDevnet,
    Xrp,
    XrpTestnet,
    // Testnets
    Sepolia,
    PolygonAmoy,
}

impl Chain {
    pub const ALL: [Chain; 15] = [
        Chain::Bitcoin,
        Chain::BitcoinTestnet,
        Chain::Ethereum,
        Chain::Polygon,
        Chain::Arbitrum,
        Chain::Base,
        Chain::Optimism,
        Chain::Bsc,
        Chain::Avalanche,
        Chain::Solana,
        Chain::SolanaDevnet,
        Chain::Xrp,
        Chain::XrpTestnet,
        Chain::Sepolia,
        Chain::PolygonAmoy,
    ];

    /// BIP-44 coin type for this chain
    pub fn coin_type(&self) -> u32 {
        match self {
            Chain::Bitcoin => 0,
            Chain::BitcoinTestnet => 1,
            Chain::Ethereum
            | Chain::Polygon
            | Chain::Arbitrum
            | Chain::Base
            | Chain::Optimism
            | Chain::Bsc
            | Chain::Avalanche
            | Chain::Sepolia
            | Chain::PolygonAmoy => 60,
            Chain::Solana | Chain::SolanaDevnet => 501,
            Chain::Xrp | Chain::XrpTestnet => 144,
        }
    }

    /// Whether this chain uses secp256k1 (BTC/ETH/XRP) or Ed25519 (SOL)
    pub fn curve(&self) -> CurveType {
        match self {
            Chain::Solana | Chain::SolanaDevnet => CurveType::Ed25519,
            _ => CurveType::Secp256k1,
        }
    }

    /// Display name
    pub fn display_name(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "Bitcoin",
            Chain::BitcoinTestnet => "Bitcoin Testnet",
            Chain::Ethereum => "Ethereum",
            Chain::Polygon => "Polygon",
            Chain::Arbitrum => "Arbitrum One",
            Chain::Base => "Base",
            Chain::Optimism => "Optimism",
            Chain::Bsc => "BNB Smart Chain",
            Chain::Avalanche => "Avalanche C-Chain",
            Chain::Solana => "Solana",
            Chain::SolanaDevnet => "Solana Devnet",
            Chain::Xrp => "XRP Ledger",
            Chain::XrpTestnet => "XRP Ledger Testnet",
            Chain::Sepolia => "Sepolia Testnet",
            Chain::PolygonAmoy => "Polygon Amoy Testnet",
        }
    }

    /// Native token symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Chain::Bitcoin | Chain::BitcoinTestnet => "BTC",
            Chain::Ethereum | Chain::Sepolia => "ETH",
            Chain::Polygon | Chain::PolygonAmoy => "MATIC",
            Chain::Arbitrum => "ETH",
            Chain::Base => "ETH",
            Chain::Optimism => "ETH",
            Chain::Bsc => "BNB",
            Chain::Avalanche => "AVAX",
            Chain::Solana | Chain::SolanaDevnet => "SOL",
            Chain::Xrp | Chain::XrpTestnet => "XRP",
        }
    }

    /// Whether this is a testnet
    pub fn is_testnet(&self) -> bool {
        matches!(
            self,
            Chain::BitcoinTestnet
                | Chain::Sepolia
                | Chain::PolygonAmoy
                | Chain::SolanaDevnet
                | Chain::XrpTestnet
        )
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveType {
    Secp256k1,
    Ed25519,
}

/// Opaque handle to key material held by a [`crate::keystore::KeyStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRef {
    pub chain: Chain,
    pub account: u32,
    pub index: u32,
}

impl KeyRef {
    pub fn new(chain: Chain, account: u32, index: u32) -> Self {
        Self {
            chain,
            account,
            index,
        }
    }
}

/// A `(chain, address)` pair; the unit that owns UTXOs and nonces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub chain: Chain,
    pub address: String,
}

impl AccountKey {
    pub fn new(chain: Chain, address: impl Into<String>) -> Self {
        Self {
            chain,
            address: address.into(),
        }
    }
}

impl std::fmt::Display for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.chain.symbol(), self.address)
    }
}

/// Fee tier requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Economy,
    #[default]
    Standard,
    Priority,
}

/// What the caller wants to send.
///
/// `amount` is in the chain's smallest unit (satoshi, wei, lamport, drop).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIntent {
    pub from: KeyRef,
    pub recipient: String,
    pub amount: u128,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub destination_tag: Option<u32>,
    /// Coin control: spend exactly these outpoints (`txid:vout`).
    #[serde(default)]
    pub inputs: Option<Vec<String>>,
    /// UTXO chains only. Replace-by-fee signalling is on unless cleared.
    #[serde(default = "default_rbf")]
    pub rbf: bool,
}

fn default_rbf() -> bool {
    true
}

impl TransactionIntent {
    pub fn new(from: KeyRef, recipient: impl Into<String>, amount: u128) -> Self {
        Self {
            from,
            recipient: recipient.into(),
            amount,
            priority: Priority::Standard,
            memo: None,
            destination_tag: None,
            inputs: None,
            rbf: true,
        }
    }

    pub fn chain(&self) -> Chain {
        self.from.chain
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn with_destination_tag(mut self, tag: u32) -> Self {
        self.destination_tag = Some(tag);
        self
    }

    pub fn with_inputs(mut self, outpoints: Vec<String>) -> Self {
        self.inputs = Some(outpoints);
        self
    }

    pub fn without_rbf(mut self) -> Self {
        self.rbf = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evm_chains_share_coin_type() {
        for chain in [Chain::Ethereum, Chain::Polygon, Chain::Bsc, Chain::Sepolia] {
            assert_eq!(chain.coin_type(), 60);
        }
        assert_eq!(Chain::Xrp.coin_type(), 144);
    }

    #[test]
    fn only_solana_is_ed25519() {
        for chain in Chain::ALL {
            let expected = matches!(chain, Chain::Solana | Chain::SolanaDevnet);
            assert_eq!(chain.curve() == CurveType::Ed25519, expected, "{chain}");
        }
    }

    #[test]
    fn intent_defaults_to_rbf_standard() {
        let intent: TransactionIntent = serde_json::from_str(
            r#"{"from":{"chain":"Bitcoin","account":0,"index":0},"recipient":"bc1q","amount":1000}"#,
        )
        .unwrap();
        assert!(intent.rbf);
        assert_eq!(intent.priority, Priority::Standard);
        assert_eq!(intent.chain(), Chain::Bitcoin);
    }
}
