//! Key derivation and management
//!
//! All supported chains use secp256k1; they differ only in derivation path
//! and address encoding.

pub mod ethereum;
pub mod bitcoin;
pub mod tron;
mod derivation;

pub use derivation::*;
