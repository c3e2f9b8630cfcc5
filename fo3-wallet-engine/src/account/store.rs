//! Wallet record persistence
//!
//! The engine treats storage as an opaque collaborator. Secrets are handed to
//! the store as-is: encryption at rest is the store's responsibility and must
//! be added by any real deployment.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use super::wallet::{UserId, Wallet, WalletSummary};

/// Wallet record store
#[async_trait]
pub trait WalletRecordStore: Send + Sync {
    /// Persist a new wallet; an address may exist only once per network
    async fn save(&self, wallet: Wallet) -> Result<Uuid>;

    /// The secret key of a user's wallet, `None` when the user has no such address
    async fn get_private_key(&self, user_id: UserId, address: &str) -> Result<Option<Zeroizing<String>>>;

    /// All wallets of a user, newest first
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<WalletSummary>>;
}

/// In-memory wallet store
#[derive(Default)]
pub struct InMemoryWalletStore {
    wallets: RwLock<HashMap<Uuid, Wallet>>,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletRecordStore for InMemoryWalletStore {
    async fn save(&self, wallet: Wallet) -> Result<Uuid> {
        let mut wallets = self.wallets.write()
            .map_err(|_| Error::Storage("wallet store lock poisoned".to_string()))?;

        let key = wallet.currency.address_key(&wallet.address);
        let duplicate = wallets
            .values()
            .any(|w| w.network == wallet.network && w.currency.address_key(&w.address) == key);
        if duplicate {
            return Err(Error::Storage(format!(
                "wallet {} already exists on {}",
                wallet.address, wallet.network
            )));
        }

        let id = wallet.id;
        wallets.insert(id, wallet);
        Ok(id)
    }

    async fn get_private_key(&self, user_id: UserId, address: &str) -> Result<Option<Zeroizing<String>>> {
        let wallets = self.wallets.read()
            .map_err(|_| Error::Storage("wallet store lock poisoned".to_string()))?;

        Ok(wallets
            .values()
            .find(|w| {
                w.user_id == user_id && w.currency.address_key(&w.address) == w.currency.address_key(address)
            })
            .map(|w| w.private_key.clone()))
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<WalletSummary>> {
        let wallets = self.wallets.read()
            .map_err(|_| Error::Storage("wallet store lock poisoned".to_string()))?;

        let mut summaries: Vec<WalletSummary> = wallets
            .values()
            .filter(|w| w.user_id == user_id)
            .map(Wallet::summary)
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}
