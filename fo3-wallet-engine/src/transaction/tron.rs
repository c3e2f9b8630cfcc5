//! Tron transaction functionality
//!
//! Transfers are created by the node, checked locally against their id and
//! signed with a recoverable secp256k1 signature over that id. Fees are paid in
//! bandwidth; when the sender's free and staked bandwidth cannot cover the
//! transaction it is burned from the balance instead.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rust_decimal::Decimal;
use secp256k1::{Message, Secp256k1};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::account::KeyMaterial;
use crate::crypto::keys::{tron, KeyPair};
use crate::currency::{ChainFamily, Currency};
use crate::error::{Error, RejectionKind, Result};
use crate::units::UnitConverter;
use super::adapter::{derive_from_phrase, ensure_fee_policy, ensure_request_family, rejection_message, ChainAdapter};
use super::provider::ChainParams;
use super::types::{FeePolicy, NodeRejection, SignedPayload, SignedTransaction, TransactionRequest, TransactionStatus};

/// Sun burned per byte when bandwidth runs out
pub const BANDWIDTH_PRICE_SUN: u64 = 1_000;

/// Sun burned when a transfer activates the recipient account
pub const ACCOUNT_ACTIVATION_FEE_SUN: u64 = 1_000_000;

/// Signature and protobuf framing added to the raw data on the wire
const SIGNED_OVERHEAD_BYTES: u64 = 70;

/// Sun burned for a transaction of `size` bytes given the bandwidth at hand
///
/// Bandwidth is consumed all-or-nothing: a transaction either fits in the
/// available bandwidth or pays for every byte.
pub fn bandwidth_burn(size: u64, available_bandwidth: u64) -> u64 {
    if available_bandwidth >= size {
        0
    } else {
        size * BANDWIDTH_PRICE_SUN
    }
}

/// Account state relevant to transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TronAccount {
    /// Balance in sun
    pub balance: u64,
    /// Whether the account has been activated on chain
    pub exists: bool,
}

/// Transfer created by the node, not yet signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TronUnsignedTx {
    pub tx_id: String,
    pub raw_data: Value,
    pub raw_data_hex: String,
}

/// Execution info of an included transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TronTxInfo {
    pub block_number: u64,
    pub failed: bool,
}

/// HTTP API calls used by the Tron adapter
///
/// Refusals by the node are reported as [`NodeRejection`].
#[async_trait]
pub trait TronRpc: Send + Sync {
    async fn get_account(&self, address: &str) -> anyhow::Result<TronAccount>;

    /// Free plus staked bandwidth left, in bytes
    async fn available_bandwidth(&self, address: &str) -> anyhow::Result<u64>;

    async fn create_transfer(&self, from: &str, to: &str, amount: u64) -> anyhow::Result<TronUnsignedTx>;

    /// Submit a signed envelope, returning its id
    async fn broadcast(&self, envelope: &Value) -> anyhow::Result<String>;

    /// `None` until the transaction is in a block
    async fn transaction_info(&self, tx_id: &str) -> anyhow::Result<Option<TronTxInfo>>;

    /// Whether the node knows the transaction at all
    async fn transaction_known(&self, tx_id: &str) -> anyhow::Result<bool>;

    async fn now_block(&self) -> anyhow::Result<u64>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AccountResources {
    free_net_limit: u64,
    free_net_used: u64,
    #[serde(rename = "NetLimit")]
    net_limit: u64,
    #[serde(rename = "NetUsed")]
    net_used: u64,
}

#[derive(Debug, Deserialize)]
struct CreatedTransaction {
    #[serde(rename = "txID")]
    tx_id: Option<String>,
    raw_data: Option<Value>,
    raw_data_hex: Option<String>,
    #[serde(rename = "Error")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    result: bool,
    txid: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

/// [`TronRpc`] over the TronGrid HTTP API
pub struct TronGridClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl TronGridClient {
    pub fn new(params: &ChainParams) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(params.timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("{}: failed to build HTTP client: {}", params.currency, e)))?;

        Ok(Self {
            base_url: params.rpc_url.trim_end_matches('/').to_string(),
            api_key: params.api_key.clone(),
            client,
        })
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: &Value) -> anyhow::Result<T> {
        tracing::debug!(path = %path, "TronGrid request");
        let mut request = self.client.post(format!("{}{}", self.base_url, path)).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("TRON-PRO-API-KEY", key);
        }

        request
            .send()
            .await
            .with_context(|| format!("POST {}", path))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", path))
    }
}

#[async_trait]
impl TronRpc for TronGridClient {
    async fn get_account(&self, address: &str) -> anyhow::Result<TronAccount> {
        let account: Value = self
            .post("/wallet/getaccount", &json!({ "address": address, "visible": true }))
            .await?;
        // an account that was never activated comes back as `{}`
        Ok(TronAccount {
            balance: account.get("balance").and_then(Value::as_u64).unwrap_or(0),
            exists: account.get("address").is_some(),
        })
    }

    async fn available_bandwidth(&self, address: &str) -> anyhow::Result<u64> {
        let resources: AccountResources = self
            .post("/wallet/getaccountresource", &json!({ "address": address, "visible": true }))
            .await?;
        Ok(resources.free_net_limit.saturating_sub(resources.free_net_used)
            + resources.net_limit.saturating_sub(resources.net_used))
    }

    async fn create_transfer(&self, from: &str, to: &str, amount: u64) -> anyhow::Result<TronUnsignedTx> {
        let created: CreatedTransaction = self
            .post(
                "/wallet/createtransaction",
                &json!({
                    "owner_address": from,
                    "to_address": to,
                    "amount": amount,
                    "visible": true,
                }),
            )
            .await?;

        if let Some(error) = created.error {
            return Err(NodeRejection(error).into());
        }
        match (created.tx_id, created.raw_data, created.raw_data_hex) {
            (Some(tx_id), Some(raw_data), Some(raw_data_hex)) => Ok(TronUnsignedTx {
                tx_id,
                raw_data,
                raw_data_hex,
            }),
            _ => anyhow::bail!("createtransaction response is missing transaction fields"),
        }
    }

    async fn broadcast(&self, envelope: &Value) -> anyhow::Result<String> {
        let response: BroadcastResponse = self.post("/wallet/broadcasttransaction", envelope).await?;
        if response.result {
            return response.txid.context("broadcast response is missing the txid");
        }

        // messages come back hex encoded
        let message = response
            .message
            .map(|m| hex::decode(&m).ok().and_then(|b| String::from_utf8(b).ok()).unwrap_or(m))
            .unwrap_or_default();
        let code = response.code.unwrap_or_else(|| "UNKNOWN".to_string());
        Err(NodeRejection(format!("{}: {}", code, message)).into())
    }

    async fn transaction_info(&self, tx_id: &str) -> anyhow::Result<Option<TronTxInfo>> {
        let info: Value = self
            .post("/wallet/gettransactioninfobyid", &json!({ "value": tx_id }))
            .await?;
        let Some(block_number) = info.get("blockNumber").and_then(Value::as_u64) else {
            return Ok(None);
        };

        let failed_result = info.get("result").and_then(Value::as_str) == Some("FAILED");
        let failed_receipt = info
            .pointer("/receipt/result")
            .and_then(Value::as_str)
            .map_or(false, |result| result != "SUCCESS");
        Ok(Some(TronTxInfo {
            block_number,
            failed: failed_result || failed_receipt,
        }))
    }

    async fn transaction_known(&self, tx_id: &str) -> anyhow::Result<bool> {
        let tx: Value = self
            .post("/wallet/gettransactionbyid", &json!({ "value": tx_id }))
            .await?;
        Ok(tx.get("txID").is_some())
    }

    async fn now_block(&self) -> anyhow::Result<u64> {
        let block: Value = self.post("/wallet/getnowblock", &json!({})).await?;
        block
            .pointer("/block_header/raw_data/number")
            .and_then(Value::as_u64)
            .context("getnowblock response is missing the block number")
    }
}

/// Chain adapter for Tron
pub struct TronAdapter {
    params: ChainParams,
    rpc: Arc<dyn TronRpc>,
    units: UnitConverter,
}

impl TronAdapter {
    pub fn new(params: ChainParams, rpc: Arc<dyn TronRpc>) -> Result<Self> {
        if params.currency.family() != ChainFamily::Resource {
            return Err(Error::Configuration(format!("{} is not a Tron chain", params.currency)));
        }
        params.validate()?;

        let units = UnitConverter::for_currency(params.currency);
        Ok(Self { params, rpc, units })
    }

    fn currency_code(&self) -> Currency {
        self.params.currency
    }

    fn key_material(&self, key_pair: &KeyPair) -> KeyMaterial {
        KeyMaterial::new(
            self.currency_code(),
            tron::public_key_to_address(key_pair.public_key()),
            key_pair.uncompressed_public_hex(),
            key_pair.secret_hex(),
        )
    }

    async fn account(&self, address: &str) -> Result<TronAccount> {
        self.rpc
            .get_account(address)
            .await
            .map_err(|e| Error::network(self.currency_code(), address, format!("{:#}", e)))
    }

    /// Transaction id of the raw data, which must equal the node's `txID`
    fn verify_tx_id(&self, from: &str, tx_id: &str, raw_data_hex: &str) -> Result<[u8; 32]> {
        let raw = hex::decode(raw_data_hex)
            .map_err(|e| Error::signing(self.currency_code(), from, format!("raw_data_hex is not hex: {}", e)))?;
        let digest: [u8; 32] = Sha256::digest(&raw).into();
        if !hex::encode(digest).eq_ignore_ascii_case(tx_id) {
            return Err(Error::signing(
                self.currency_code(),
                from,
                "transaction id does not match the raw data",
            ));
        }
        Ok(digest)
    }

    fn validate_tx_id(&self, tx_id: &str) -> Result<()> {
        if tx_id.len() != 64 || !tx_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::invalid_address(self.currency_code(), tx_id, "malformed transaction id"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainAdapter for TronAdapter {
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
        tron::parse_address(address)
            .map(|_| ())
            .map_err(|e| Error::invalid_address(self.currency_code(), address, e))
    }

    async fn get_balance(&self, address: &str) -> Result<Decimal> {
        self.validate_address(address)?;
        let account = self.account(address).await?;
        self.units.to_display(account.balance as u128)
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
        self.validate_address(from)?;
        self.validate_address(to)?;
        if from == to {
            return Err(Error::invalid_address(currency, to, "cannot transfer to the sending account"));
        }

        let amount = u64::try_from(self.units.to_positive_smallest(amount)?)
            .map_err(|_| Error::invalid_amount(currency, "amount exceeds the chain's supply"))?;
        let fee_limit = match *fee_policy {
            FeePolicy::FeeLimit(0) => return Err(Error::invalid_amount(currency, "fee limit must be positive")),
            FeePolicy::FeeLimit(limit) => limit,
            _ => self.params.default_fee_limit.unwrap_or(crate::config::DEFAULT_TRX_FEE_LIMIT),
        };

        let insufficient = |balance: u64, required: u64| -> Result<Error> {
            Ok(Error::InsufficientFunds {
                currency,
                address: from.to_string(),
                available: self.units.to_display(balance as u128)?,
                required: self.units.to_display(required as u128)?,
            })
        };

        let sender = self.account(from).await?;
        if sender.balance < amount {
            return Err(insufficient(sender.balance, amount)?);
        }
        let recipient = self.account(to).await?;
        let bandwidth = self
            .rpc
            .available_bandwidth(from)
            .await
            .map_err(|e| Error::network(currency, from, format!("{:#}", e)))?;

        let unsigned = self.rpc.create_transfer(from, to, amount).await.map_err(|e| {
            match rejection_message(&e) {
                Some(message) => Error::broadcast(currency, from, RejectionKind::Rejected, message),
                None => Error::network(currency, from, format!("{:#}", e)),
            }
        })?;
        self.verify_tx_id(from, &unsigned.tx_id, &unsigned.raw_data_hex)?;

        let size = (unsigned.raw_data_hex.len() / 2) as u64 + SIGNED_OVERHEAD_BYTES;
        let mut burn = bandwidth_burn(size, bandwidth);
        if !recipient.exists {
            burn += ACCOUNT_ACTIVATION_FEE_SUN;
        }
        if burn > fee_limit {
            return Err(Error::FeeLimitExceeded {
                currency,
                address: from.to_string(),
                fee_limit,
                required: burn,
            });
        }
        let required = amount
            .checked_add(burn)
            .ok_or_else(|| Error::invalid_amount(currency, "amount plus fee overflows"))?;
        if sender.balance < required {
            return Err(insufficient(sender.balance, required)?);
        }

        tracing::debug!(
            currency = %currency,
            from = %from,
            tx_id = %unsigned.tx_id,
            size,
            bandwidth,
            burn,
            "Built TRX transfer"
        );

        Ok(TransactionRequest::Tron {
            from: from.to_string(),
            to: to.to_string(),
            amount,
            fee_limit,
            tx_id: unsigned.tx_id,
            raw_data: unsigned.raw_data,
            raw_data_hex: unsigned.raw_data_hex,
        })
    }

    fn sign_transaction(&self, request: &TransactionRequest, private_key: &str) -> Result<SignedTransaction> {
        let currency = self.currency_code();
        ensure_request_family(currency, request)?;
        let TransactionRequest::Tron {
            from,
            tx_id,
            raw_data,
            raw_data_hex,
            ..
        } = request
        else {
            return Err(Error::signing(currency, request.from(), "not a Tron request"));
        };

        let key_pair = KeyPair::from_hex(private_key).map_err(|e| Error::signing(currency, from, e))?;
        if tron::public_key_to_address(key_pair.public_key()) != *from {
            return Err(Error::signing(currency, from, "private key does not control the sending address"));
        }
        let digest = self.verify_tx_id(from, tx_id, raw_data_hex)?;

        let secp = Secp256k1::signing_only();
        let signature = secp.sign_ecdsa_recoverable(&Message::from_digest(digest), key_pair.secret_key());
        let (recovery_id, compact) = signature.serialize_compact();
        let mut signature_bytes = compact.to_vec();
        signature_bytes.push(recovery_id.to_i32() as u8);

        let envelope = json!({
            "txID": tx_id,
            "raw_data": raw_data,
            "raw_data_hex": raw_data_hex,
            "signature": [hex::encode(signature_bytes)],
            "visible": true,
        });

        Ok(SignedTransaction {
            currency,
            from: from.clone(),
            tx_hash: tx_id.to_ascii_lowercase(),
            payload: SignedPayload::Json(envelope),
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String> {
        let currency = self.currency_code();
        let SignedPayload::Json(envelope) = &signed.payload else {
            return Err(Error::broadcast(currency, &signed.from, RejectionKind::Rejected, "expected a signed Tron envelope"));
        };

        let err = match self.rpc.broadcast(envelope).await {
            Ok(_) => {
                tracing::info!(currency = %currency, from = %signed.from, tx_hash = %signed.tx_hash, "Broadcast TRX transaction");
                return Ok(signed.tx_hash.clone());
            }
            Err(e) => e,
        };

        let Some(message) = rejection_message(&err) else {
            return Err(Error::network(currency, &signed.from, format!("{:#}", err)));
        };

        // expiration and TaPoS checks run before the duplicate check, so a
        // confirmed transaction sent again can come back with any of them
        let known = message.contains("DUP_TRANSACTION_ERROR")
            || self
                .rpc
                .transaction_known(&signed.tx_hash)
                .await
                .map_err(|e| Error::network(currency, &signed.from, format!("{:#}", e)))?;
        if known {
            tracing::info!(currency = %currency, tx_hash = %signed.tx_hash, reply = %message, "Transaction already known to the network");
            return Ok(signed.tx_hash.clone());
        }

        Err(Error::broadcast(currency, &signed.from, RejectionKind::Rejected, message))
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> Result<TransactionStatus> {
        let currency = self.currency_code();
        self.validate_tx_id(tx_hash)?;
        let network_error = |e: anyhow::Error| Error::network(currency, tx_hash, format!("{:#}", e));

        let status = match self.rpc.transaction_info(tx_hash).await.map_err(network_error)? {
            Some(info) if info.failed => TransactionStatus::Failed,
            Some(info) => {
                let tip = self.rpc.now_block().await.map_err(network_error)?;
                let confirmations = tip.saturating_sub(info.block_number) + 1;
                TransactionStatus::from_confirmations(confirmations, self.params.min_confirmations)
            }
            None => {
                if self.rpc.transaction_known(tx_hash).await.map_err(network_error)? {
                    TransactionStatus::Pending
                } else {
                    TransactionStatus::Unknown
                }
            }
        };

        tracing::debug!(currency = %currency, tx_hash = %tx_hash, status = ?status, "Fetched TRX transaction status");
        Ok(status)
    }
}
