//! Per-address submission locks
//!
//! Build, sign and broadcast for one (currency, address) pair run under an
//! advisory lock so two concurrent sends never pick the same nonce or the same
//! inputs. Waiting is bounded; independent pairs never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::currency::Currency;
use crate::error::{Error, Result};

type LockKey = (Currency, String);

/// Held while a submission is in flight; dropping it releases the address
#[derive(Debug)]
pub struct AddressGuard {
    currency: Currency,
    address: String,
    _guard: OwnedMutexGuard<()>,
}

impl AddressGuard {
    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Drop for AddressGuard {
    fn drop(&mut self) {
        tracing::debug!(currency = %self.currency, address = %self.address, "Released address lock");
    }
}

/// Registry of advisory locks keyed by (currency, address)
#[derive(Debug, Default)]
pub struct AddressLocks {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `wait` for exclusive use of `address` on `currency`
    pub async fn acquire(&self, currency: Currency, address: &str, wait: Duration) -> Result<AddressGuard> {
        let lock = self.entry(currency, address)?;

        let guard = tokio::time::timeout(wait, lock.lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(currency = %currency, address = %address, waited = ?wait, "Timed out waiting for address lock");
                Error::LockTimeout {
                    currency,
                    address: address.to_string(),
                    waited: wait,
                }
            })?;

        tracing::debug!(currency = %currency, address = %address, "Acquired address lock");
        Ok(AddressGuard {
            currency,
            address: address.to_string(),
            _guard: guard,
        })
    }

    /// Number of addresses with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, currency: Currency, address: &str) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::Storage("address lock registry poisoned".to_string()))?;

        // entries nobody holds or waits on can go
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        Ok(locks
            .entry(lock_key(currency, address))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }
}

fn lock_key(currency: Currency, address: &str) -> LockKey {
    (currency, currency.address_key(address))
}
