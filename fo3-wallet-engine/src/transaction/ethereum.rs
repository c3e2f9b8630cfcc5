//! EVM transaction functionality (Ethereum, BSC, Polygon)

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ethers::prelude::{Address, BlockNumber, Bytes, TransactionRequest as EthersTransactionRequest, H256, U256};
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::utils::to_checksum;
use ethers_providers::{Http, Middleware, Provider, RpcError};
use ethers_signers::{LocalWallet, Signer};
use rust_decimal::Decimal;
use zeroize::Zeroizing;

use crate::account::KeyMaterial;
use crate::crypto::keys::{ethereum, KeyPair};
use crate::currency::{ChainFamily, Currency};
use crate::error::{Error, RejectionKind, Result};
use crate::units::UnitConverter;
use super::adapter::{derive_from_phrase, ensure_fee_policy, ensure_request_family, rejection_message, ChainAdapter};
use super::provider::ChainParams;
use super::types::{FeePolicy, NodeRejection, SignedPayload, SignedTransaction, TransactionRequest, TransactionStatus};

/// Gas used by a plain value transfer
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;

const STALE_NONCE_RETRIES: u32 = 2;

/// Receipt fields the adapter needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvmReceipt {
    pub block_number: Option<u64>,
    /// Receipt status 1
    pub success: bool,
}

/// JSON-RPC calls used by the EVM adapter
///
/// Refusals by the node are reported as [`NodeRejection`].
#[async_trait]
pub trait EvmRpc: Send + Sync {
    /// `eth_getBalance` at the latest block
    async fn get_balance(&self, address: Address) -> anyhow::Result<U256>;

    /// `eth_getTransactionCount` including pending transactions
    async fn get_pending_nonce(&self, address: Address) -> anyhow::Result<u64>;

    async fn gas_price(&self) -> anyhow::Result<U256>;

    async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<H256>;

    async fn get_receipt(&self, hash: H256) -> anyhow::Result<Option<EvmReceipt>>;

    /// Whether the node knows the transaction, mined or not
    async fn transaction_known(&self, hash: H256) -> anyhow::Result<bool>;

    async fn block_number(&self) -> anyhow::Result<u64>;
}

/// [`EvmRpc`] over an ethers HTTP provider
pub struct HttpEvmRpc {
    provider: Arc<Provider<Http>>,
}

impl HttpEvmRpc {
    pub fn new(params: &ChainParams) -> Result<Self> {
        let url = url::Url::parse(&params.rpc_url)
            .map_err(|e| Error::Configuration(format!("{}: invalid rpc_url: {}", params.currency, e)))?;
        let client = reqwest::Client::builder()
            .timeout(params.timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("{}: failed to build HTTP client: {}", params.currency, e)))?;

        let provider = Provider::new(Http::new_with_client(url, client));
        Ok(Self {
            provider: Arc::new(provider),
        })
    }
}

#[async_trait]
impl EvmRpc for HttpEvmRpc {
    async fn get_balance(&self, address: Address) -> anyhow::Result<U256> {
        self.provider
            .get_balance(address, Some(BlockNumber::Latest.into()))
            .await
            .context("eth_getBalance")
    }

    async fn get_pending_nonce(&self, address: Address) -> anyhow::Result<u64> {
        let nonce = self
            .provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .context("eth_getTransactionCount")?;
        Ok(nonce.low_u64())
    }

    async fn gas_price(&self) -> anyhow::Result<U256> {
        self.provider.get_gas_price().await.context("eth_gasPrice")
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<H256> {
        match self.provider.send_raw_transaction(raw).await {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(e) => match e.as_error_response() {
                Some(response) => Err(NodeRejection(response.message.clone()).into()),
                None => Err(anyhow::Error::new(e).context("eth_sendRawTransaction")),
            },
        }
    }

    async fn get_receipt(&self, hash: H256) -> anyhow::Result<Option<EvmReceipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .context("eth_getTransactionReceipt")?;
        Ok(receipt.map(|r| EvmReceipt {
            block_number: r.block_number.map(|n| n.as_u64()),
            success: r.status.map_or(true, |status| status.as_u64() == 1),
        }))
    }

    async fn transaction_known(&self, hash: H256) -> anyhow::Result<bool> {
        let tx = self
            .provider
            .get_transaction(hash)
            .await
            .context("eth_getTransactionByHash")?;
        Ok(tx.is_some())
    }

    async fn block_number(&self) -> anyhow::Result<u64> {
        let number = self.provider.get_block_number().await.context("eth_blockNumber")?;
        Ok(number.as_u64())
    }
}

/// Chain adapter for account-based EVM networks
pub struct EvmAdapter {
    params: ChainParams,
    rpc: Arc<dyn EvmRpc>,
    units: UnitConverter,
}

impl EvmAdapter {
    pub fn new(params: ChainParams, rpc: Arc<dyn EvmRpc>) -> Result<Self> {
        if params.currency.family() != ChainFamily::Evm {
            return Err(Error::Configuration(format!("{} is not an EVM chain", params.currency)));
        }
        params.validate()?;

        let units = UnitConverter::for_currency(params.currency);
        Ok(Self { params, rpc, units })
    }

    fn currency_code(&self) -> Currency {
        self.params.currency
    }

    fn parse_address(&self, address: &str) -> Result<Address> {
        ethereum::parse_address(address).map_err(|e| Error::invalid_address(self.currency_code(), address, e))
    }

    fn key_material(&self, key_pair: &KeyPair) -> KeyMaterial {
        KeyMaterial::new(
            self.currency_code(),
            ethereum::public_key_to_address(key_pair.public_key()),
            key_pair.uncompressed_public_hex(),
            key_pair.secret_hex(),
        )
    }

    async fn fetch_balance(&self, address: Address, display: &str) -> Result<u128> {
        let balance = self
            .rpc
            .get_balance(address)
            .await
            .map_err(|e| Error::network(self.currency_code(), display, format!("{:#}", e)))?;
        self.to_u128(balance)
    }

    fn to_u128(&self, value: U256) -> Result<u128> {
        if value > U256::from(u128::MAX) {
            return Err(Error::invalid_amount(self.currency_code(), format!("{} wei does not fit 128 bits", value)));
        }
        Ok(value.low_u128())
    }

    fn parse_hash(&self, tx_hash: &str) -> Result<H256> {
        H256::from_str(tx_hash)
            .map_err(|e| Error::invalid_address(self.currency_code(), tx_hash, format!("malformed transaction hash: {}", e)))
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn params(&self) -> &ChainParams {
        &self.params
    }

    fn create_wallet(&self, seed_phrase: Option<&str>) -> Result<KeyMaterial> {
        let (mnemonic, key_pair, path) = derive_from_phrase(self.currency_code(), seed_phrase)?;
        Ok(self.key_material(&key_pair).with_mnemonic(mnemonic, path))
    }

    fn import_private_key(&self, private_key: &str) -> Result<KeyMaterial> {
        let key_pair = KeyPair::from_hex(private_key).map_err(|e| Error::key_derivation(self.currency_code(), e))?;
        Ok(self.key_material(&key_pair))
    }

    fn validate_address(&self, address: &str) -> Result<()> {
        self.parse_address(address).map(|_| ())
    }

    async fn get_balance(&self, address: &str) -> Result<Decimal> {
        let parsed = self.parse_address(address)?;
        let wei = self.fetch_balance(parsed, address).await?;
        self.units.to_display(wei)
    }

    async fn build_transaction(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        fee_policy: &FeePolicy,
    ) -> Result<TransactionRequest> {
        let currency = self.currency_code();
        ensure_fee_policy(currency, fee_policy)?;
        let from_address = self.parse_address(from)?;
        let to_address = self.parse_address(to)?;
        let value = self.units.to_positive_smallest(amount)?;

        let (gas_price, gas_limit) = match *fee_policy {
            FeePolicy::GasPrice { gas_price_wei, gas_limit } => {
                (gas_price_wei, gas_limit.unwrap_or(NATIVE_TRANSFER_GAS))
            }
            _ => {
                let price = self
                    .rpc
                    .gas_price()
                    .await
                    .map_err(|e| Error::network(currency, from, format!("{:#}", e)))?;
                (self.to_u128(price)?, NATIVE_TRANSFER_GAS)
            }
        };
        if gas_limit < NATIVE_TRANSFER_GAS {
            return Err(Error::invalid_amount(
                currency,
                format!("gas limit {} is below the {} needed for a transfer", gas_limit, NATIVE_TRANSFER_GAS),
            ));
        }

        let nonce = self
            .rpc
            .get_pending_nonce(from_address)
            .await
            .map_err(|e| Error::network(currency, from, format!("{:#}", e)))?;
        let balance = self.fetch_balance(from_address, from).await?;

        let required = (gas_limit as u128)
            .checked_mul(gas_price)
            .and_then(|fee| fee.checked_add(value))
            .ok_or_else(|| Error::invalid_amount(currency, "amount plus fee overflows"))?;
        if balance < required {
            return Err(Error::InsufficientFunds {
                currency,
                address: from.to_string(),
                available: self.units.to_display(balance)?,
                required: self.units.to_display(required)?,
            });
        }

        tracing::debug!(
            currency = %currency,
            from = %from,
            nonce,
            gas_price = %gas_price,
            gas_limit,
            "Built EVM transfer"
        );

        Ok(TransactionRequest::Evm {
            chain_id: self.params.evm_chain_id(),
            from: to_checksum(&from_address, None),
            to: to_checksum(&to_address, None),
            value,
            nonce,
            gas_price,
            gas_limit,
        })
    }

    fn sign_transaction(&self, request: &TransactionRequest, private_key: &str) -> Result<SignedTransaction> {
        let currency = self.currency_code();
        ensure_request_family(currency, request)?;
        let TransactionRequest::Evm {
            chain_id,
            from,
            to,
            value,
            nonce,
            gas_price,
            gas_limit,
        } = request
        else {
            return Err(Error::signing(currency, request.from(), "not an EVM request"));
        };

        let key_pair = KeyPair::from_hex(private_key).map_err(|e| Error::signing(currency, from, e))?;
        let secret = Zeroizing::new(key_pair.secret_key().secret_bytes());
        let wallet = LocalWallet::from_bytes(secret.as_slice())
            .map_err(|e| Error::signing(currency, from, e))?
            .with_chain_id(*chain_id);

        let from_address = self.parse_address(from)?;
        if wallet.address() != from_address {
            return Err(Error::signing(currency, from, "private key does not control the sending address"));
        }
        let to_address = self.parse_address(to)?;

        let tx: TypedTransaction = EthersTransactionRequest::new()
            .from(from_address)
            .to(to_address)
            .value(U256::from(*value))
            .nonce(*nonce)
            .gas_price(U256::from(*gas_price))
            .gas(*gas_limit)
            .chain_id(*chain_id)
            .into();

        let signature = wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| Error::signing(currency, from, e))?;
        let raw = tx.rlp_signed(&signature);
        let tx_hash = format!("0x{}", hex::encode(ethereum::keccak256(&raw)));

        Ok(SignedTransaction {
            currency,
            from: from.clone(),
            tx_hash,
            payload: SignedPayload::Raw(raw.to_vec()),
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String> {
        let currency = self.currency_code();
        let SignedPayload::Raw(raw) = &signed.payload else {
            return Err(Error::broadcast(currency, &signed.from, RejectionKind::Rejected, "expected a raw EVM transaction"));
        };

        let err = match self.rpc.send_raw_transaction(Bytes::from(raw.clone())).await {
            Ok(hash) => {
                let node_hash = format!("0x{}", hex::encode(hash.as_bytes()));
                if node_hash != signed.tx_hash {
                    tracing::warn!(currency = %currency, local = %signed.tx_hash, node = %node_hash, "Node reported a different transaction hash");
                }
                tracing::info!(currency = %currency, from = %signed.from, tx_hash = %signed.tx_hash, "Broadcast EVM transaction");
                return Ok(signed.tx_hash.clone());
            }
            Err(e) => e,
        };

        let Some(message) = rejection_message(&err) else {
            return Err(Error::network(currency, &signed.from, format!("{:#}", err)));
        };
        let lowered = message.to_ascii_lowercase();

        if lowered.contains("already known") || lowered.contains("known transaction") {
            tracing::info!(currency = %currency, tx_hash = %signed.tx_hash, "Transaction already known to the network");
            return Ok(signed.tx_hash.clone());
        }

        if lowered.contains("nonce too low") {
            let hash = self.parse_hash(&signed.tx_hash)?;
            let known = self
                .rpc
                .transaction_known(hash)
                .await
                .map_err(|e| Error::network(currency, &signed.from, format!("{:#}", e)))?;
            if known {
                tracing::info!(currency = %currency, tx_hash = %signed.tx_hash, "Transaction already on chain");
                return Ok(signed.tx_hash.clone());
            }
            tracing::warn!(currency = %currency, from = %signed.from, "Broadcast rejected with a stale nonce");
            return Err(Error::broadcast(currency, &signed.from, RejectionKind::StaleNonce, message));
        }

        Err(Error::broadcast(currency, &signed.from, RejectionKind::Rejected, message))
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> Result<TransactionStatus> {
        let currency = self.currency_code();
        let hash = self.parse_hash(tx_hash)?;
        let network_error = |e: anyhow::Error| Error::network(currency, tx_hash, format!("{:#}", e));

        let receipt = self.rpc.get_receipt(hash).await.map_err(network_error)?;
        let status = match receipt {
            None => {
                if self.rpc.transaction_known(hash).await.map_err(network_error)? {
                    TransactionStatus::Pending
                } else {
                    TransactionStatus::Unknown
                }
            }
            Some(receipt) if !receipt.success => TransactionStatus::Failed,
            Some(EvmReceipt { block_number: None, .. }) => TransactionStatus::Pending,
            Some(EvmReceipt { block_number: Some(block), .. }) => {
                let tip = self.rpc.block_number().await.map_err(network_error)?;
                let confirmations = tip.saturating_sub(block) + 1;
                TransactionStatus::from_confirmations(confirmations, self.params.min_confirmations)
            }
        };

        tracing::debug!(currency = %currency, tx_hash = %tx_hash, status = ?status, "Fetched EVM transaction status");
        Ok(status)
    }

    fn stale_nonce_retries(&self) -> u32 {
        STALE_NONCE_RETRIES
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ethers_core::utils::rlp::Rlp;

    use super::*;

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const ADDRESS: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";
    const RECIPIENT: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";

    #[derive(Default)]
    struct StubRpc {
        balance: u128,
        nonce: u64,
        reject_with: Option<String>,
        known: bool,
        sent: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl EvmRpc for StubRpc {
        async fn get_balance(&self, _address: Address) -> anyhow::Result<U256> {
            Ok(U256::from(self.balance))
        }

        async fn get_pending_nonce(&self, _address: Address) -> anyhow::Result<u64> {
            Ok(self.nonce)
        }

        async fn gas_price(&self) -> anyhow::Result<U256> {
            Ok(U256::from(10_000_000_000u64))
        }

        async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<H256> {
            self.sent.lock().unwrap().push(raw.clone());
            match &self.reject_with {
                Some(message) => Err(NodeRejection(message.clone()).into()),
                None => Ok(H256::from(ethereum::keccak256(&raw))),
            }
        }

        async fn get_receipt(&self, _hash: H256) -> anyhow::Result<Option<EvmReceipt>> {
            Ok(None)
        }

        async fn transaction_known(&self, _hash: H256) -> anyhow::Result<bool> {
            Ok(self.known)
        }

        async fn block_number(&self) -> anyhow::Result<u64> {
            Ok(100)
        }
    }

    fn adapter(rpc: StubRpc) -> EvmAdapter {
        let params = ChainParams::for_currency(Currency::Eth, "http://localhost:8545").unwrap();
        EvmAdapter::new(params, Arc::new(rpc)).unwrap()
    }

    #[tokio::test]
    async fn test_sign_produces_recoverable_legacy_transaction() {
        let adapter = adapter(StubRpc {
            balance: 10u128.pow(18),
            nonce: 3,
            ..Default::default()
        });
        let request = adapter
            .build_transaction(ADDRESS, RECIPIENT, Decimal::new(1, 2), &FeePolicy::Default)
            .await
            .unwrap();
        let signed = adapter.sign_transaction(&request, KEY).unwrap();

        let SignedPayload::Raw(raw) = &signed.payload else {
            panic!("expected raw payload");
        };
        assert_eq!(signed.tx_hash, format!("0x{}", hex::encode(ethereum::keccak256(raw))));

        let (decoded, signature) = TypedTransaction::decode_signed(&Rlp::new(raw)).unwrap();
        assert_eq!(decoded.nonce(), Some(&U256::from(3)));
        assert_eq!(decoded.value(), Some(&U256::from(10_000_000_000_000_000u64)));
        assert_eq!(signature.recover(decoded.sighash()).unwrap(), ethereum::parse_address(ADDRESS).unwrap());
    }

    #[test]
    fn test_sign_rejects_foreign_key() {
        let adapter = adapter(StubRpc::default());
        let request = TransactionRequest::Evm {
            chain_id: 1,
            from: RECIPIENT.to_string(),
            to: ADDRESS.to_string(),
            value: 1,
            nonce: 0,
            gas_price: 1,
            gas_limit: NATIVE_TRANSFER_GAS,
        };
        let err = adapter.sign_transaction(&request, KEY).unwrap_err();
        assert!(matches!(err, Error::Signing { .. }));
        assert!(!err.to_string().contains(KEY));
    }

    #[tokio::test]
    async fn test_gas_limit_below_transfer_cost_is_rejected() {
        let adapter = adapter(StubRpc {
            balance: 10u128.pow(18),
            ..Default::default()
        });
        let policy = FeePolicy::GasPrice {
            gas_price_wei: 1,
            gas_limit: Some(20_000),
        };
        let err = adapter
            .build_transaction(ADDRESS, RECIPIENT, Decimal::ONE, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAmount { .. }));
    }

    #[tokio::test]
    async fn test_stale_nonce_classification() {
        let adapter = adapter(StubRpc {
            reject_with: Some("nonce too low".to_string()),
            ..Default::default()
        });
        let signed = SignedTransaction {
            currency: Currency::Eth,
            from: ADDRESS.to_string(),
            tx_hash: format!("0x{}", "ab".repeat(32)),
            payload: SignedPayload::Raw(vec![0xc0]),
        };
        let err = adapter.broadcast_transaction(&signed).await.unwrap_err();
        assert!(err.is_stale_nonce());

        // the same rejection for a hash the node already has is a success
        let mined = self::adapter(StubRpc {
            reject_with: Some("nonce too low".to_string()),
            known: true,
            ..Default::default()
        });
        assert_eq!(mined.broadcast_transaction(&signed).await.unwrap(), signed.tx_hash);
    }

    #[tokio::test]
    async fn test_unknown_hash_without_receipt() {
        let adapter = adapter(StubRpc::default());
        let status = adapter
            .get_transaction_status(&format!("0x{}", "11".repeat(32)))
            .await
            .unwrap();
        assert_eq!(status, TransactionStatus::Unknown);
    }
}
