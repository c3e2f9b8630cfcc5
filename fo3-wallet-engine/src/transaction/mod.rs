//! Transaction functionality
//!
//! This module provides one adapter per chain family for building, signing,
//! broadcasting and tracking transfers, plus the registry that resolves a
//! currency to its adapter.

pub mod types;
pub mod adapter;
pub mod ethereum;
pub mod bitcoin;
pub mod tron;
pub mod provider;

pub use types::*;
pub use adapter::ChainAdapter;
pub use ethereum::{EvmAdapter, EvmReceipt, EvmRpc, HttpEvmRpc};
pub use bitcoin::{EsploraClient, UtxoAdapter, UtxoIndexer, UtxoTxStatus};
pub use tron::{TronAccount, TronAdapter, TronGridClient, TronRpc, TronTxInfo, TronUnsignedTx};
pub use provider::{ChainParams, WalletFactory};
