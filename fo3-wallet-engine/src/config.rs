//! Engine configuration
//!
//! Loading the file or environment is the embedding application's job; this
//! module only parses and validates what it is given.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::currency::{ChainFamily, Currency};
use crate::error::{Error, Result};
use crate::transaction::provider::ChainParams;

/// Default confirmations before a Bitcoin-family transfer counts as confirmed
pub const DEFAULT_UTXO_CONFIRMATIONS: u64 = 3;

/// Default fee limit for TRX transfers, in sun
pub const DEFAULT_TRX_FEE_LIMIT: u64 = 5_000_000;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Per-chain settings as written in the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: Option<String>,
    pub api_key: Option<String>,
    pub chain_id: Option<u64>,
    pub min_confirmations: Option<u64>,
    pub default_fee_limit: Option<u64>,
    pub timeout_secs: Option<u64>,
}

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Keyed by currency code (`[chains.ETH]`)
    pub chains: BTreeMap<String, ChainConfig>,
    /// Upper bound on a whole engine call
    pub call_deadline_secs: u64,
    /// Bounded wait for the per-address submission lock
    pub lock_wait_secs: u64,
    /// Attempts for idempotent reads (balance, status)
    pub read_retries: u32,
    /// Base delay of the exponential read backoff
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chains: BTreeMap::new(),
            call_deadline_secs: 60,
            lock_wait_secs: 30,
            read_retries: 3,
            retry_backoff_ms: 250,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; chains it does not mention keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| Error::Configuration(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn call_deadline(&self) -> Duration {
        Duration::from_secs(self.call_deadline_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Resolved parameters for one chain
    pub fn chain_params(&self, currency: Currency) -> Result<ChainParams> {
        let overrides = self
            .chains
            .iter()
            .find(|(code, _)| code.parse::<Currency>().ok() == Some(currency))
            .map(|(_, chain)| chain.clone())
            .unwrap_or_default();

        let min_confirmations = overrides.min_confirmations.unwrap_or(match currency.family() {
            ChainFamily::Utxo => DEFAULT_UTXO_CONFIRMATIONS,
            ChainFamily::Evm | ChainFamily::Resource => 1,
        });
        let chain_id = match currency.family() {
            ChainFamily::Evm => Some(overrides.chain_id.unwrap_or_else(|| default_chain_id(currency))),
            _ => overrides.chain_id,
        };
        let default_fee_limit = match currency.family() {
            ChainFamily::Resource => Some(overrides.default_fee_limit.unwrap_or(DEFAULT_TRX_FEE_LIMIT)),
            _ => overrides.default_fee_limit,
        };

        let params = ChainParams {
            currency,
            rpc_url: overrides
                .rpc_url
                .unwrap_or_else(|| default_rpc_url(currency).to_string()),
            api_key: overrides.api_key,
            chain_id,
            min_confirmations,
            default_fee_limit,
            timeout: Duration::from_secs(overrides.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        };
        params.validate()?;
        Ok(params)
    }

    /// Fail fast on settings no call could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.call_deadline_secs == 0 {
            return Err(Error::Configuration("call_deadline_secs must be positive".to_string()));
        }
        if self.lock_wait_secs == 0 {
            return Err(Error::Configuration("lock_wait_secs must be positive".to_string()));
        }
        if self.read_retries == 0 {
            return Err(Error::Configuration("read_retries must be at least 1".to_string()));
        }
        for code in self.chains.keys() {
            code.parse::<Currency>()
                .map_err(|_| Error::Configuration(format!("unsupported chain in config: {}", code)))?;
        }
        for currency in Currency::ALL {
            self.chain_params(currency)?;
        }
        Ok(())
    }
}

/// Public endpoint used when the config names none
pub fn default_rpc_url(currency: Currency) -> &'static str {
    match currency {
        Currency::Btc => "https://blockstream.info/api",
        Currency::Ltc => "https://litecoinspace.org/api",
        Currency::Eth => "https://cloudflare-eth.com",
        Currency::Bsc => "https://bsc-dataseed.binance.org/",
        Currency::Matic => "https://polygon-rpc.com",
        Currency::Trx => "https://api.trongrid.io",
    }
}

fn default_chain_id(currency: Currency) -> u64 {
    match currency {
        Currency::Bsc => 56,
        Currency::Matic => 137,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_all_chains() {
        let config = EngineConfig::default();
        config.validate().unwrap();

        let btc = config.chain_params(Currency::Btc).unwrap();
        assert_eq!(btc.min_confirmations, 3);
        assert_eq!(btc.chain_id, None);

        let bsc = config.chain_params(Currency::Bsc).unwrap();
        assert_eq!(bsc.chain_id, Some(56));
        assert_eq!(config.chain_params(Currency::Matic).unwrap().chain_id, Some(137));

        let trx = config.chain_params(Currency::Trx).unwrap();
        assert_eq!(trx.default_fee_limit, Some(DEFAULT_TRX_FEE_LIMIT));
    }

    #[test]
    fn test_toml_overrides_merge_with_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            lock_wait_secs = 5

            [chains.ETH]
            rpc_url = "http://localhost:8545"
            chain_id = 11155111

            [chains.BTC]
            min_confirmations = 6
            "#,
        )
        .unwrap();

        assert_eq!(config.lock_wait(), Duration::from_secs(5));
        assert_eq!(config.read_retries, 3);

        let eth = config.chain_params(Currency::Eth).unwrap();
        assert_eq!(eth.rpc_url, "http://localhost:8545");
        assert_eq!(eth.chain_id, Some(11155111));
        assert_eq!(config.chain_params(Currency::Btc).unwrap().min_confirmations, 6);
        assert_eq!(config.chain_params(Currency::Ltc).unwrap().rpc_url, "https://litecoinspace.org/api");
    }

    #[test]
    fn test_bad_endpoint_fails_fast() {
        let err = EngineConfig::from_toml_str(
            r#"
            [chains.TRX]
            rpc_url = "ftp://api.trongrid.io"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unknown_currency_key_is_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [chains.DOGE]
            rpc_url = "https://doge.example.com"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_zero_chain_id_is_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [chains.MATIC]
            chain_id = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
