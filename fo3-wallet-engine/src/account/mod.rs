//! Account management functionality
//!
//! Wallet records, the one-shot key material returned at creation, and the
//! storage collaborators for wallets and broadcast transactions.

mod wallet;
pub mod store;
pub mod ledger;

pub use wallet::*;
pub use store::{InMemoryWalletStore, WalletRecordStore};
pub use ledger::{InMemoryLedger, LedgerStore, RecordStatus, TransactionRecord};
