//! Supported currencies and the chain family each one is bound to

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Transaction model of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainFamily {
    /// Account based, nonce + gas (ETH, BSC, MATIC)
    Evm,
    /// Unspent outputs + change (BTC, LTC)
    Utxo,
    /// Account based, bandwidth/energy + fee limit (TRX)
    Resource,
}

/// A currency code from the fixed supported set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Btc,
    Ltc,
    Eth,
    Bsc,
    Matic,
    Trx,
}

impl Currency {
    /// Every supported currency, in display order
    pub const ALL: [Currency; 6] = [
        Currency::Btc,
        Currency::Ltc,
        Currency::Eth,
        Currency::Bsc,
        Currency::Matic,
        Currency::Trx,
    ];

    /// Upper-case ticker
    pub fn code(&self) -> &'static str {
        match self {
            Self::Btc => "BTC",
            Self::Ltc => "LTC",
            Self::Eth => "ETH",
            Self::Bsc => "BSC",
            Self::Matic => "MATIC",
            Self::Trx => "TRX",
        }
    }

    /// The adapter family this currency is served by
    pub fn family(&self) -> ChainFamily {
        match self {
            Self::Btc | Self::Ltc => ChainFamily::Utxo,
            Self::Eth | Self::Bsc | Self::Matic => ChainFamily::Evm,
            Self::Trx => ChainFamily::Resource,
        }
    }

    /// Network name stored alongside wallet and ledger records
    pub fn network(&self) -> &'static str {
        match self {
            Self::Btc => "bitcoin",
            Self::Ltc => "litecoin",
            Self::Eth => "ethereum",
            Self::Bsc => "bsc",
            Self::Matic => "polygon",
            Self::Trx => "tron",
        }
    }

    /// Number of decimals between the smallest unit and the display unit
    pub fn decimals(&self) -> u32 {
        match self.family() {
            ChainFamily::Evm => 18,
            ChainFamily::Utxo => 8,
            ChainFamily::Resource => 6,
        }
    }

    /// BIP-44 coin type
    pub fn coin_type(&self) -> u32 {
        match self {
            Self::Btc => 0,
            Self::Ltc => 2,
            // BSC and Polygon share Ethereum's account space
            Self::Eth | Self::Bsc | Self::Matic => 60,
            Self::Trx => 195,
        }
    }

    /// Default derivation path for the first external address
    pub fn derivation_path(&self) -> String {
        format!("m/44'/{}'/0'/0/0", self.coin_type())
    }

    /// Form under which two spellings of the same address compare equal
    ///
    /// EVM addresses are case-insensitive; Base58 ones are not.
    pub fn address_key(&self, address: &str) -> String {
        match self.family() {
            ChainFamily::Evm => address.to_ascii_lowercase(),
            ChainFamily::Utxo | ChainFamily::Resource => address.to_string(),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BTC" => Ok(Self::Btc),
            "LTC" => Ok(Self::Ltc),
            "ETH" => Ok(Self::Eth),
            "BSC" | "BNB" => Ok(Self::Bsc),
            "MATIC" | "POL" => Ok(Self::Matic),
            "TRX" => Ok(Self::Trx),
            _ => Err(Error::UnknownCurrency(s.to_string())),
        }
    }
}
