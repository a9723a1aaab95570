//! Error types shared by every engine module.

use thiserror::Error;

use crate::types::TokenAddress;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A ratio group summed past the fixed-point whole. Fatal for checkout.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Conversion requested for a token without a usable exchange rate.
    #[error("No exchange rate known for token {0}")]
    MissingQuote(TokenAddress),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Arithmetic overflow: {0}")]
    Overflow(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
