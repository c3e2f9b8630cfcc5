//! Error types for the wallet engine
//!
//! Every chain-facing variant carries the currency, the address (or
//! transaction hash) involved and the underlying cause, so callers can render
//! a message without touching key material. No variant ever holds a secret.

use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::currency::Currency;

/// Why a broadcast was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The network refused the transaction
    Rejected,
    /// The nonce was consumed between build and broadcast
    StaleNonce,
}

/// Custom error type for wallet engine operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("Network error ({currency}, {address}): {cause}")]
    Network {
        currency: Currency,
        address: String,
        cause: String,
    },

    #[error("Key derivation error ({currency}): {cause}")]
    KeyDerivation { currency: Currency, cause: String },

    #[error("Signing error ({currency}, {address}): {cause}")]
    Signing {
        currency: Currency,
        address: String,
        cause: String,
    },

    #[error("Invalid address ({currency}, {address}): {cause}")]
    InvalidAddress {
        currency: Currency,
        address: String,
        cause: String,
    },

    #[error("Invalid amount ({currency}): {cause}")]
    InvalidAmount { currency: Currency, cause: String },

    #[error("Insufficient funds ({currency}, {address}): available {available}, required {required}")]
    InsufficientFunds {
        currency: Currency,
        address: String,
        available: Decimal,
        required: Decimal,
    },

    #[error("Fee limit exceeded ({currency}, {address}): limit {fee_limit}, required {required}")]
    FeeLimitExceeded {
        currency: Currency,
        address: String,
        fee_limit: u64,
        required: u64,
    },

    #[error("Unsupported operation ({currency}): {cause}")]
    UnsupportedOperation { currency: Currency, cause: String },

    #[error("Broadcast error ({currency}, {address}): {cause}")]
    Broadcast {
        currency: Currency,
        address: String,
        kind: RejectionKind,
        cause: String,
    },

    #[error("Timed out after {waited:?} waiting for the lock on {address} ({currency})")]
    LockTimeout {
        currency: Currency,
        address: String,
        waited: Duration,
    },

    #[error("Deadline of {deadline:?} exceeded ({currency}, {address})")]
    Timeout {
        currency: Currency,
        address: String,
        deadline: Duration,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    pub(crate) fn network(currency: Currency, address: &str, cause: impl ToString) -> Self {
        Self::Network {
            currency,
            address: address.to_string(),
            cause: cause.to_string(),
        }
    }

    pub(crate) fn key_derivation(currency: Currency, cause: impl ToString) -> Self {
        Self::KeyDerivation {
            currency,
            cause: cause.to_string(),
        }
    }

    pub(crate) fn signing(currency: Currency, address: &str, cause: impl ToString) -> Self {
        Self::Signing {
            currency,
            address: address.to_string(),
            cause: cause.to_string(),
        }
    }

    pub(crate) fn invalid_address(currency: Currency, address: &str, cause: impl ToString) -> Self {
        Self::InvalidAddress {
            currency,
            address: address.to_string(),
            cause: cause.to_string(),
        }
    }

    pub(crate) fn invalid_amount(currency: Currency, cause: impl ToString) -> Self {
        Self::InvalidAmount {
            currency,
            cause: cause.to_string(),
        }
    }

    pub(crate) fn unsupported(currency: Currency, cause: impl ToString) -> Self {
        Self::UnsupportedOperation {
            currency,
            cause: cause.to_string(),
        }
    }

    pub(crate) fn broadcast(
        currency: Currency,
        address: &str,
        kind: RejectionKind,
        cause: impl ToString,
    ) -> Self {
        Self::Broadcast {
            currency,
            address: address.to_string(),
            kind,
            cause: cause.to_string(),
        }
    }

    /// Whether the caller may retry the same call later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::LockTimeout { .. } | Self::Timeout { .. }
        )
    }

    /// Whether this is a broadcast rejected because the nonce went stale
    pub fn is_stale_nonce(&self) -> bool {
        matches!(
            self,
            Self::Broadcast {
                kind: RejectionKind::StaleNonce,
                ..
            }
        )
    }

    /// The currency the failing call was made for, if any
    pub fn currency(&self) -> Option<Currency> {
        match self {
            Self::Configuration(_)
            | Self::UnknownCurrency(_)
            | Self::NotFound(_)
            | Self::Storage(_) => None,
            Self::Network { currency, .. }
            | Self::KeyDerivation { currency, .. }
            | Self::Signing { currency, .. }
            | Self::InvalidAddress { currency, .. }
            | Self::InvalidAmount { currency, .. }
            | Self::InsufficientFunds { currency, .. }
            | Self::FeeLimitExceeded { currency, .. }
            | Self::UnsupportedOperation { currency, .. }
            | Self::Broadcast { currency, .. }
            | Self::LockTimeout { currency, .. }
            | Self::Timeout { currency, .. } => Some(*currency),
        }
    }
}

/// Result type for wallet engine operations
pub type Result<T> = std::result::Result<T, Error>;
