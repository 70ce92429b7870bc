//! Network access seam. One implementation per chain backend; several
//! instances per chain give fallback.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chain_btc::utxo::Utxo;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{EngineError, ErrorKind, Result};
use crate::fees::FeeSignal;
use crate::tracker::Observation;
use crate::types::Chain;

/// Why a node refused a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    FeeTooLow,
    InvalidSignature,
    /// Spent input, used nonce, or expired blockhash.
    StaleInput,
    InsufficientFunds,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("transaction already known")]
    AlreadyKnown,
    #[error("rejected ({0:?}): {1}")]
    Rejected(RejectReason, String),
    #[error("not found")]
    NotFound,
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Worth trying again, here or on another provider.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout | ProviderError::Unavailable(_) | ProviderError::Malformed(_)
        )
    }
}

/// Current head of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    /// Block height, slot, or validated ledger index.
    pub height: u64,
    /// Solana only.
    pub recent_blockhash: Option<[u8; 32]>,
}

#[async_trait]
pub trait NetworkProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Submit raw signed bytes; returns the id the node assigned.
    async fn broadcast(&self, raw_tx: &[u8]) -> std::result::Result<String, ProviderError>;

    async fn get_utxos(&self, address: &str) -> std::result::Result<Vec<Utxo>, ProviderError> {
        Err(ProviderError::Unavailable(format!(
            "{} does not index outputs for {address}",
            self.name()
        )))
    }

    /// Next nonce (EVM), sequence (XRP) the network expects from `address`.
    async fn get_nonce(&self, address: &str) -> std::result::Result<u64, ProviderError> {
        Err(ProviderError::Unavailable(format!(
            "{} does not track account state for {address}",
            self.name()
        )))
    }

    async fn get_fee_signal(&self) -> std::result::Result<FeeSignal, ProviderError>;

    async fn get_tx_status(&self, txid: &str) -> std::result::Result<Observation, ProviderError>;

    async fn get_chain_tip(&self) -> std::result::Result<ChainTip, ProviderError>;
}

pub type SharedProvider = Arc<dyn NetworkProvider>;

/// Ordered providers per chain; the first is primary.
#[derive(Clone, Default)]
pub struct ProviderSet {
    by_chain: HashMap<Chain, Vec<SharedProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, chain: Chain, provider: SharedProvider) -> Self {
        self.add(chain, provider);
        self
    }

    pub fn add(&mut self, chain: Chain, provider: SharedProvider) {
        self.by_chain.entry(chain).or_default().push(provider);
    }

    pub fn for_chain(&self, chain: Chain) -> Result<&[SharedProvider]> {
        match self.by_chain.get(&chain) {
            Some(list) if !list.is_empty() => Ok(list),
            _ => Err(EngineError::new(
                ErrorKind::ProviderUnavailable,
                chain,
                "no provider configured",
            )),
        }
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (chain, list) in &self.by_chain {
            let names: Vec<&str> = list.iter().map(|p| p.name()).collect();
            map.entry(chain, &names);
        }
        map.finish()
    }
}

/// Run a read-only request against each provider in order, one timed
/// attempt each, moving on after transient failures.
pub(crate) async fn query<T, F, Fut>(
    chain: Chain,
    providers: &[SharedProvider],
    timeout: Duration,
    what: &str,
    call: F,
) -> Result<T>
where
    F: Fn(SharedProvider) -> Fut,
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
{
    let mut failures = Vec::new();
    for provider in providers {
        let outcome = tokio::time::timeout(timeout, call(provider.clone()))
            .await
            .unwrap_or(Err(ProviderError::Timeout));
        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                log::warn!("{chain}: {what} via {} failed: {err}", provider.name());
                failures.push(format!("{}: {err}", provider.name()));
            }
            Err(err) => {
                return Err(EngineError::new(
                    ErrorKind::Network,
                    chain,
                    format!("{what} via {}: {err}", provider.name()),
                ))
            }
        }
    }
    Err(EngineError::new(
        ErrorKind::ProviderUnavailable,
        chain,
        format!("{what} failed on every provider ({})", failures.join("; ")),
    ))
}
