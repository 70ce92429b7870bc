use thiserror::Error;

/// Bitcoin chain operation errors.
#[derive(Debug, Error)]
pub enum BtcError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("insufficient funds: have {available} sat, need {required} sat")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("amount {amount} sat is below the dust threshold of {threshold} sat")]
    AmountBelowDust { amount: u64, threshold: u64 },

    #[error("invalid coin selection: {0}")]
    InvalidSelection(String),

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),

    #[error("replacement error: {0}")]
    ReplacementError(String),

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("decode error: {0}")]
    DecodeError(String),
}

pub type Result<T> = std::result::Result<T, BtcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_insufficient_funds() {
        let err = BtcError::InsufficientFunds {
            available: 1_000,
            required: 5_000,
        };
        assert_eq!(
            err.to_string(),
            "insufficient funds: have 1000 sat, need 5000 sat"
        );
    }

    #[test]
    fn display_amount_below_dust() {
        let err = BtcError::AmountBelowDust {
            amount: 100,
            threshold: 294,
        };
        assert_eq!(
            err.to_string(),
            "amount 100 sat is below the dust threshold of 294 sat"
        );
    }

    #[test]
    fn display_invalid_address() {
        let err = BtcError::InvalidAddress("bad checksum".into());
        assert_eq!(err.to_string(), "invalid address: bad checksum");
    }

    #[test]
    fn display_replacement_error() {
        let err = BtcError::ReplacementError("fee rate not increased".into());
        assert_eq!(err.to_string(), "replacement error: fee rate not increased");
    }

    #[test]
    fn error_trait_is_implemented() {
        let err: Box<dyn std::error::Error> = Box::new(BtcError::SigningError("test".into()));
        assert!(err.to_string().contains("test"));
    }
}
