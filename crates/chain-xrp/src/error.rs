use thiserror::Error;

/// XRP Ledger operation errors.
#[derive(Debug, Error)]
pub enum XrpError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decode error: {0}")]
    DecodeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_amount() {
        let err = XrpError::InvalidAmount("exceeds supply".into());
        assert_eq!(err.to_string(), "invalid amount: exceeds supply");
    }

    #[test]
    fn display_decode_error() {
        let err = XrpError::DecodeError("unknown field".into());
        assert_eq!(err.to_string(), "decode error: unknown field");
    }
}
