//! Ledger of broadcast transactions

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::Currency;
use crate::error::{Error, Result};
use super::wallet::UserId;

/// Lifecycle of a ledger record; it only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Confirmed,
    Failed,
}

impl RecordStatus {
    /// Whether moving from `self` to `next` is allowed
    pub fn can_advance_to(&self, next: RecordStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, _) | (Self::Confirmed, Self::Confirmed) | (Self::Failed, Self::Failed)
        )
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A transaction the engine broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_hash: String,
    pub user_id: UserId,
    pub from_address: String,
    pub to_address: String,
    /// Amount in display units
    pub amount: Decimal,
    pub currency: Currency,
    pub network: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

/// Ledger store
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a record; inserting an existing hash returns the stored record unchanged
    async fn insert(&self, record: TransactionRecord) -> Result<TransactionRecord>;

    async fn get(&self, tx_hash: &str) -> Result<Option<TransactionRecord>>;

    /// Advance a record's status; backwards transitions are rejected
    async fn update_status(&self, tx_hash: &str, status: RecordStatus) -> Result<TransactionRecord>;

    /// A user's records, newest first
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<TransactionRecord>>;
}

/// In-memory ledger
#[derive(Default)]
pub struct InMemoryLedger {
    records: RwLock<HashMap<String, TransactionRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert(&self, record: TransactionRecord) -> Result<TransactionRecord> {
        let mut records = self.records.write()
            .map_err(|_| Error::Storage("ledger lock poisoned".to_string()))?;
        Ok(records
            .entry(record.tx_hash.clone())
            .or_insert(record)
            .clone())
    }

    async fn get(&self, tx_hash: &str) -> Result<Option<TransactionRecord>> {
        let records = self.records.read()
            .map_err(|_| Error::Storage("ledger lock poisoned".to_string()))?;
        Ok(records.get(tx_hash).cloned())
    }

    async fn update_status(&self, tx_hash: &str, status: RecordStatus) -> Result<TransactionRecord> {
        let mut records = self.records.write()
            .map_err(|_| Error::Storage("ledger lock poisoned".to_string()))?;
        let record = records
            .get_mut(tx_hash)
            .ok_or_else(|| Error::NotFound(format!("transaction {}", tx_hash)))?;

        if !record.status.can_advance_to(status) {
            return Err(Error::Storage(format!(
                "transaction {} cannot move from {:?} to {:?}",
                tx_hash, record.status, status
            )));
        }
        record.status = status;
        Ok(record.clone())
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<TransactionRecord>> {
        let records = self.records.read()
            .map_err(|_| Error::Storage("ledger lock poisoned".to_string()))?;
        let mut listed: Vec<TransactionRecord> = records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listed)
    }
}
