//! Chain parameters and the adapter registry

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::config::EngineConfig;
use crate::currency::{ChainFamily, Currency};
use crate::error::{Error, Result};
use super::adapter::ChainAdapter;
use super::bitcoin::{EsploraClient, UtxoAdapter};
use super::ethereum::{EvmAdapter, HttpEvmRpc};
use super::tron::{TronAdapter, TronGridClient};

/// Immutable configuration of one chain adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub currency: Currency,
    /// Node or indexer endpoint
    pub rpc_url: String,
    /// Sent as `TRON-PRO-API-KEY` to TronGrid, ignored elsewhere
    pub api_key: Option<String>,
    /// EIP-155 chain id, EVM chains only
    pub chain_id: Option<u64>,
    /// Confirmations before a transaction is reported confirmed
    pub min_confirmations: u64,
    /// Fee limit used when the caller passes no policy, in sun (TRX only)
    pub default_fee_limit: Option<u64>,
    /// Per-request HTTP timeout
    pub timeout: Duration,
}

impl ChainParams {
    /// Parameters with the built-in defaults for `currency`
    pub fn for_currency(currency: Currency, rpc_url: impl Into<String>) -> Result<Self> {
        let mut params = EngineConfig::default().chain_params(currency)?;
        params.rpc_url = rpc_url.into();
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.rpc_url).map_err(|e| {
            Error::Configuration(format!("{}: invalid rpc_url {}: {}", self.currency, self.rpc_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(Error::Configuration(format!(
                "{}: rpc_url must be an http(s) URL with a host, got {}",
                self.currency, self.rpc_url
            )));
        }

        if self.currency.family() == ChainFamily::Evm && !matches!(self.chain_id, Some(id) if id > 0) {
            return Err(Error::Configuration(format!("{}: a positive chain_id is required", self.currency)));
        }
        if self.min_confirmations == 0 {
            return Err(Error::Configuration(format!("{}: min_confirmations must be at least 1", self.currency)));
        }
        if self.currency.family() == ChainFamily::Resource && !matches!(self.default_fee_limit, Some(limit) if limit > 0) {
            return Err(Error::Configuration(format!("{}: a positive default_fee_limit is required", self.currency)));
        }
        if self.timeout.is_zero() {
            return Err(Error::Configuration(format!("{}: timeout must be positive", self.currency)));
        }
        Ok(())
    }

    /// EIP-155 chain id, validated at construction for EVM chains
    pub(crate) fn evm_chain_id(&self) -> u64 {
        self.chain_id.unwrap_or(1)
    }
}

/// Registry resolving a currency to its configured adapter
///
/// Built once at startup and shared; adapters are never swapped afterwards.
#[derive(Clone)]
pub struct WalletFactory {
    adapters: HashMap<Currency, Arc<dyn ChainAdapter>>,
}

impl WalletFactory {
    /// Build HTTP-backed adapters for every supported currency
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let mut adapters: HashMap<Currency, Arc<dyn ChainAdapter>> = HashMap::new();
        for currency in Currency::ALL {
            let params = config.chain_params(currency)?;
            let adapter: Arc<dyn ChainAdapter> = match currency.family() {
                ChainFamily::Evm => {
                    let rpc = HttpEvmRpc::new(&params)?;
                    Arc::new(EvmAdapter::new(params, Arc::new(rpc))?)
                }
                ChainFamily::Utxo => {
                    let indexer = EsploraClient::new(&params)?;
                    Arc::new(UtxoAdapter::new(params, Arc::new(indexer))?)
                }
                ChainFamily::Resource => {
                    let rpc = TronGridClient::new(&params)?;
                    Arc::new(TronAdapter::new(params, Arc::new(rpc))?)
                }
            };
            adapters.insert(currency, adapter);
        }

        tracing::info!(chains = adapters.len(), "Wallet factory initialized");
        Ok(Self { adapters })
    }

    /// Build a factory from ready-made adapters
    pub fn from_adapters<I>(adapters: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn ChainAdapter>>,
    {
        let mut registry = HashMap::new();
        for adapter in adapters {
            let currency = adapter.currency();
            if registry.insert(currency, adapter).is_some() {
                return Err(Error::Configuration(format!("adapter for {} registered twice", currency)));
            }
        }
        Ok(Self { adapters: registry })
    }

    /// The adapter serving `currency`
    pub fn adapter(&self, currency: Currency) -> Result<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(&currency)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("no adapter configured for {}", currency)))
    }

    /// Resolve a currency code such as `"eth"` or `"TRX"`
    pub fn resolve(&self, code: &str) -> Result<Arc<dyn ChainAdapter>> {
        let currency: Currency = code.parse()?;
        self.adapter(currency)
    }

    /// Currencies with a registered adapter
    pub fn currencies(&self) -> Vec<Currency> {
        let mut currencies: Vec<Currency> = self.adapters.keys().copied().collect();
        currencies.sort();
        currencies
    }
}
