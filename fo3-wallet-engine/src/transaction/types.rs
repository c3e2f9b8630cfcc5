//! Common transaction types

use serde::{Deserialize, Serialize};

use crate::account::RecordStatus;
use crate::currency::{ChainFamily, Currency};

/// Fee selection for a transfer
///
/// Each variant belongs to one chain family; adapters reject the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeePolicy {
    /// Let the adapter pick (node gas price, indexer estimate, configured fee limit)
    #[default]
    Default,
    /// EVM gas price in wei and an optional gas limit
    GasPrice {
        gas_price_wei: u128,
        gas_limit: Option<u64>,
    },
    /// UTXO fee rate in smallest units per virtual byte
    SatPerVbyte(u64),
    /// TRX fee limit in sun
    FeeLimit(u64),
}

impl FeePolicy {
    /// Family the policy applies to; `None` for `Default`
    pub fn family(&self) -> Option<ChainFamily> {
        match self {
            Self::Default => None,
            Self::GasPrice { .. } => Some(ChainFamily::Evm),
            Self::SatPerVbyte(_) => Some(ChainFamily::Utxo),
            Self::FeeLimit(_) => Some(ChainFamily::Resource),
        }
    }
}

/// An unspent output owned by the sending address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Value in smallest units
    pub value: u64,
    pub confirmed: bool,
}

/// Unsigned transfer, shaped by the chain family that built it
///
/// Amounts are in smallest units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum TransactionRequest {
    Evm {
        chain_id: u64,
        from: String,
        to: String,
        value: u128,
        nonce: u64,
        gas_price: u128,
        gas_limit: u64,
    },
    Utxo {
        from: String,
        to: String,
        amount: u64,
        inputs: Vec<Utxo>,
        /// Value returned to `from`; zero when the remainder was dust
        change: u64,
        fee: u64,
        fee_rate: u64,
    },
    Tron {
        from: String,
        to: String,
        amount: u64,
        fee_limit: u64,
        tx_id: String,
        raw_data: serde_json::Value,
        raw_data_hex: String,
    },
}

impl TransactionRequest {
    pub fn family(&self) -> ChainFamily {
        match self {
            Self::Evm { .. } => ChainFamily::Evm,
            Self::Utxo { .. } => ChainFamily::Utxo,
            Self::Tron { .. } => ChainFamily::Resource,
        }
    }

    pub fn from(&self) -> &str {
        match self {
            Self::Evm { from, .. } | Self::Utxo { from, .. } | Self::Tron { from, .. } => from,
        }
    }

    pub fn to(&self) -> &str {
        match self {
            Self::Evm { to, .. } | Self::Utxo { to, .. } | Self::Tron { to, .. } => to,
        }
    }

    /// Account nonce, for EVM requests
    pub fn nonce(&self) -> Option<u64> {
        match self {
            Self::Evm { nonce, .. } => Some(*nonce),
            _ => None,
        }
    }
}

/// Signed bytes ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignedPayload {
    /// Serialized transaction (EVM RLP, Bitcoin consensus encoding)
    Raw(Vec<u8>),
    /// Signed transaction envelope as the node accepts it (Tron)
    Json(serde_json::Value),
}

/// A signed transaction together with its locally computed hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub currency: Currency,
    pub from: String,
    pub tx_hash: String,
    pub payload: SignedPayload,
}

/// A node or indexer answered and refused the request
///
/// RPC collaborators wrap refusals in this type so adapters can tell them
/// apart from transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("node rejected the request: {0}")]
pub struct NodeRejection(pub String);

/// On-chain state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Known but below the confirmation threshold
    Pending,
    /// Confirmed with the given number of confirmations
    Confirmed(u64),
    /// Included but reverted or rejected
    Failed,
    /// Not known to the network
    Unknown,
}

impl TransactionStatus {
    /// Confirmation policy shared by every family
    pub(crate) fn from_confirmations(confirmations: u64, min_confirmations: u64) -> Self {
        if confirmations >= min_confirmations {
            Self::Confirmed(confirmations)
        } else {
            Self::Pending
        }
    }

    /// Ledger status this chain state settles to, if it is final
    pub fn settled_record_status(&self) -> Option<RecordStatus> {
        match self {
            Self::Confirmed(_) => Some(RecordStatus::Confirmed),
            Self::Failed => Some(RecordStatus::Failed),
            Self::Pending | Self::Unknown => None,
        }
    }
}
