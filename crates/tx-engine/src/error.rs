use serde::{Deserialize, Serialize};
use thiserror::Error;

use chain_btc::BtcError;
use chain_eth::error::EthError;
use chain_sol::SolError;
use chain_xrp::XrpError;

use crate::types::Chain;

/// Stable machine-readable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidAddress,
    AmountBelowDust,
    Validation,
    InsufficientFunds,
    StaleValidityWindow,
    StaleData,
    StaleReference,
    AlreadyConfirmed,
    Network,
    ProviderUnavailable,
    BroadcastRejected,
    Conflict,
    Signing,
    KeyStore,
    Persistence,
    UnsupportedChain,
    Encoding,
}

/// Coarse grouping callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    ValidationError,
    InsufficientFunds,
    StaleData,
    NetworkError,
    BroadcastRejected,
    Conflict,
    AlreadyConfirmed,
    ProviderUnavailable,
    SigningFailure,
    Internal,
}

impl ErrorKind {
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::InvalidAddress
            | ErrorKind::AmountBelowDust
            | ErrorKind::Validation
            | ErrorKind::UnsupportedChain => ErrorCategory::ValidationError,
            ErrorKind::InsufficientFunds => ErrorCategory::InsufficientFunds,
            ErrorKind::StaleValidityWindow | ErrorKind::StaleData | ErrorKind::StaleReference => {
                ErrorCategory::StaleData
            }
            ErrorKind::AlreadyConfirmed => ErrorCategory::AlreadyConfirmed,
            ErrorKind::Network => ErrorCategory::NetworkError,
            ErrorKind::ProviderUnavailable => ErrorCategory::ProviderUnavailable,
            ErrorKind::BroadcastRejected => ErrorCategory::BroadcastRejected,
            ErrorKind::Conflict => ErrorCategory::Conflict,
            ErrorKind::Signing | ErrorKind::KeyStore => ErrorCategory::SigningFailure,
            ErrorKind::Persistence | ErrorKind::Encoding => ErrorCategory::Internal,
        }
    }

    /// Only transport failures are worth retrying as-is.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::ProviderUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Error returned by every engine operation.
#[derive(Debug, Clone, Error)]
#[error("{kind}{}: {cause}", scope(.chain))]
pub struct EngineError {
    pub kind: ErrorKind,
    /// `None` only for failures not scoped to a chain (loading persisted state).
    pub chain: Option<Chain>,
    pub cause: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, chain: Chain, cause: impl Into<String>) -> Self {
        Self {
            kind,
            chain: Some(chain),
            cause: cause.into(),
        }
    }

    pub fn unscoped(kind: ErrorKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            chain: None,
            cause: cause.into(),
        }
    }

    pub fn validation(chain: Chain, cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, chain, cause)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

fn scope(chain: &Option<Chain>) -> String {
    match chain {
        Some(chain) => format!(" on {chain}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors from the per-chain protocol crates.
pub trait ChainError: std::fmt::Display {
    fn kind(&self) -> ErrorKind;
}

impl ChainError for BtcError {
    fn kind(&self) -> ErrorKind {
        match self {
            BtcError::InvalidAddress(_) => ErrorKind::InvalidAddress,
            BtcError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            BtcError::AmountBelowDust { .. } => ErrorKind::AmountBelowDust,
            BtcError::InvalidSelection(_) | BtcError::ReplacementError(_) => ErrorKind::Validation,
            BtcError::InvalidPublicKey(_) | BtcError::SigningError(_) => ErrorKind::Signing,
            BtcError::TransactionBuildError(_) | BtcError::DecodeError(_) => ErrorKind::Encoding,
        }
    }
}

impl ChainError for EthError {
    fn kind(&self) -> ErrorKind {
        match self {
            EthError::InvalidAddress(_) => ErrorKind::InvalidAddress,
            EthError::TransactionBuildError(_) => ErrorKind::Validation,
            EthError::InvalidPublicKey(_) | EthError::SigningError(_) => ErrorKind::Signing,
            EthError::EncodingError(_) => ErrorKind::Encoding,
            EthError::UnsupportedChain(_) => ErrorKind::UnsupportedChain,
        }
    }
}

impl ChainError for SolError {
    fn kind(&self) -> ErrorKind {
        match self {
            SolError::InvalidAddress(_) => ErrorKind::InvalidAddress,
            SolError::TransactionBuildError(_) => ErrorKind::Validation,
            SolError::InvalidPublicKey(_) | SolError::SigningError(_) => ErrorKind::Signing,
            SolError::SerializationError(_) => ErrorKind::Encoding,
        }
    }
}

impl ChainError for XrpError {
    fn kind(&self) -> ErrorKind {
        match self {
            XrpError::InvalidAddress(_) => ErrorKind::InvalidAddress,
            XrpError::InvalidAmount(_) => ErrorKind::Validation,
            XrpError::InvalidPublicKey(_) | XrpError::SigningError(_) => ErrorKind::Signing,
            XrpError::EncodingError(_) | XrpError::DecodeError(_) => ErrorKind::Encoding,
        }
    }
}

/// Attach the chain to a protocol-crate error.
pub trait ResultExt<T> {
    fn on_chain(self, chain: Chain) -> Result<T>;
}

impl<T, E: ChainError> ResultExt<T> for std::result::Result<T, E> {
    fn on_chain(self, chain: Chain) -> Result<T> {
        self.map_err(|e| EngineError::new(e.kind(), chain, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_chain_and_cause() {
        let err = EngineError::new(ErrorKind::Conflict, Chain::Bitcoin, "outpoint reserved");
        assert_eq!(err.to_string(), "Conflict on Bitcoin: outpoint reserved");

        let err = EngineError::unscoped(ErrorKind::Persistence, "disk full");
        assert_eq!(err.to_string(), "Persistence: disk full");

        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn only_transport_errors_retry() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::ProviderUnavailable.is_retryable());
        assert!(!ErrorKind::BroadcastRejected.is_retryable());
        assert!(!ErrorKind::InsufficientFunds.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
    }

    #[test]
    fn categories() {
        assert_eq!(ErrorKind::AmountBelowDust.category(), ErrorCategory::ValidationError);
        assert_eq!(ErrorKind::StaleValidityWindow.category(), ErrorCategory::StaleData);
        assert_eq!(ErrorKind::KeyStore.category(), ErrorCategory::SigningFailure);
    }

    #[test]
    fn btc_errors_keep_their_kind() {
        let res: std::result::Result<(), BtcError> = Err(BtcError::AmountBelowDust {
            amount: 100,
            threshold: 294,
        });
        let err = res.on_chain(Chain::Bitcoin).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AmountBelowDust);
        assert_eq!(err.chain, Some(Chain::Bitcoin));
    }
}
