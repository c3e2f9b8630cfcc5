//! Cryptographic primitives and operations
//!
//! This module provides mnemonic generation, BIP-32 key derivation and the
//! address encodings used by the supported chains. Errors here carry no chain
//! context; adapters attach the currency when they surface them.

pub mod mnemonic;
pub mod keys;

pub use mnemonic::*;
pub use keys::*;

use thiserror::Error;

/// Failure inside the key layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid mnemonic: {0}")]
    Mnemonic(String),

    #[error("derivation failed: {0}")]
    Derivation(String),

    #[error("invalid private key: {0}")]
    PrivateKey(String),

    #[error("invalid address: {0}")]
    Address(String),
}

/// Result type for the key layer
pub type KeyResult<T> = std::result::Result<T, KeyError>;
