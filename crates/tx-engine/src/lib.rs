//! Multi-chain transaction engine: fee estimation, building, signing,
//! broadcasting and confirmation tracking for Bitcoin, EVM chains, Solana
//! and XRP.

pub mod broadcaster;
pub mod builder;
pub mod config;
mod context;
pub mod decode;
pub mod engine;
pub mod error;
mod family;
pub mod fees;
pub mod hd_derivation;
pub mod keystore;
pub mod mnemonic;
pub mod nonce;
pub mod provider;
pub mod registry;
pub mod replace;
pub mod reservation;
pub mod signer;
pub mod store;
pub mod tracker;
pub mod types;

pub use builder::{Relation, UnsignedTransaction};
pub use config::EngineConfig;
pub use decode::DecodedTransfer;
pub use engine::Engine;
pub use error::{EngineError, ErrorCategory, ErrorKind, Result};
pub use fees::{FeeEstimate, FeeRate, FeeSignal};
pub use keystore::{HdKeyStore, KeyStore};
pub use provider::{ChainTip, NetworkProvider, ProviderError, ProviderSet, RejectReason};
pub use registry::Registry;
pub use replace::FeeBump;
pub use signer::SignedTransaction;
pub use store::{JsonFileStore, MemoryStore, StateStore};
pub use tracker::{Observation, TrackedTransaction, TrackerEvent, TxStatus};
pub use types::{AccountKey, Chain, KeyRef, Priority, TransactionIntent};
