//! Wallet records and the key material handed out at creation time

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::currency::Currency;

/// Identifier of the user owning a wallet, as given by the orchestration layer
pub type UserId = i64;

/// Freshly generated or imported keys for one address
///
/// Returned to the caller once; the engine keeps no copy. Secret fields are
/// wiped when the value is dropped and never appear in `Debug` output.
pub struct KeyMaterial {
    currency: Currency,
    address: String,
    public_key: String,
    private_key: Zeroizing<String>,
    mnemonic: Option<Zeroizing<String>>,
    wif: Option<Zeroizing<String>>,
    derivation_path: Option<String>,
}

impl KeyMaterial {
    pub(crate) fn new(
        currency: Currency,
        address: String,
        public_key: String,
        private_key: Zeroizing<String>,
    ) -> Self {
        Self {
            currency,
            address,
            public_key,
            private_key,
            mnemonic: None,
            wif: None,
            derivation_path: None,
        }
    }

    pub(crate) fn with_mnemonic(mut self, mnemonic: Zeroizing<String>, derivation_path: String) -> Self {
        self.mnemonic = Some(mnemonic);
        self.derivation_path = Some(derivation_path);
        self
    }

    pub(crate) fn with_wif(mut self, wif: Zeroizing<String>) -> Self {
        self.wif = Some(wif);
        self
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Hex encoded secret key
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Recovery phrase, when the keys were derived from one
    pub fn mnemonic(&self) -> Option<&str> {
        self.mnemonic.as_deref().map(String::as_str)
    }

    /// Wallet import format of the secret key (Bitcoin-family chains)
    pub fn wif(&self) -> Option<&str> {
        self.wif.as_deref().map(String::as_str)
    }

    pub fn derivation_path(&self) -> Option<&str> {
        self.derivation_path.as_deref()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("currency", &self.currency)
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("mnemonic", &self.mnemonic.as_ref().map(|_| "<redacted>"))
            .field("derivation_path", &self.derivation_path)
            .finish()
    }
}

/// A persisted wallet
///
/// Never mutated after creation; removal is an external policy decision.
#[derive(Clone)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: UserId,
    pub network: String,
    pub currency: Currency,
    pub address: String,
    pub private_key: Zeroizing<String>,
    pub public_key: String,
    pub mnemonic: Option<Zeroizing<String>>,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// Build the record to persist for a user's new keys
    pub fn from_key_material(user_id: UserId, keys: &KeyMaterial) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            network: keys.currency.network().to_string(),
            currency: keys.currency,
            address: keys.address.clone(),
            private_key: keys.private_key.clone(),
            public_key: keys.public_key.clone(),
            mnemonic: keys.mnemonic.clone(),
            created_at: Utc::now(),
        }
    }

    /// The public view of this wallet
    pub fn summary(&self) -> WalletSummary {
        WalletSummary {
            id: self.id,
            user_id: self.user_id,
            network: self.network.clone(),
            currency: self.currency,
            address: self.address.clone(),
            public_key: self.public_key.clone(),
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("currency", &self.currency)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Wallet fields safe to display or serialize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSummary {
    pub id: Uuid,
    pub user_id: UserId,
    pub network: String,
    pub currency: Currency,
    pub address: String,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}
