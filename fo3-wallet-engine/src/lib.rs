//! FO3 Wallet Engine - Multi-chain key, balance and transfer engine
//!
//! This library manages wallets on EVM chains (Ethereum, BSC, Polygon),
//! UTXO chains (Bitcoin, Litecoin) and Tron: mnemonic generation and key
//! derivation, address validation, balance queries, and building, signing,
//! broadcasting and tracking native transfers.

pub mod error;
pub mod currency;
pub mod units;
pub mod config;
pub mod crypto;
pub mod account;
pub mod transaction;
pub mod lock;
pub mod engine;

// Re-export commonly used types for convenience
pub use error::{Error, RejectionKind, Result};
pub use currency::{ChainFamily, Currency};
pub use units::UnitConverter;
pub use config::{ChainConfig, EngineConfig};
pub use account::{
    InMemoryLedger, InMemoryWalletStore, KeyMaterial, LedgerStore, RecordStatus, TransactionRecord, UserId,
    WalletRecordStore, WalletSummary,
};
pub use transaction::{ChainAdapter, ChainParams, FeePolicy, TransactionStatus, WalletFactory};
pub use engine::{Transfer, WalletEngine};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a `fmt` subscriber filtered by `RUST_LOG`
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fo3_wallet_engine=info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
