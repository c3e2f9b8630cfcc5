//! Bitcoin-family transaction functionality (Bitcoin, Litecoin)

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::account::KeyMaterial;
use crate::crypto::keys::bitcoin::{self as keys, UtxoNetwork};
use crate::crypto::keys::KeyPair;
use crate::currency::Currency;
use crate::error::{Error, RejectionKind, Result};
use crate::units::UnitConverter;
use super::adapter::{derive_from_phrase, ensure_fee_policy, ensure_request_family, rejection_message, ChainAdapter};
use super::provider::ChainParams;
use super::types::{FeePolicy, NodeRejection, SignedPayload, SignedTransaction, TransactionRequest, TransactionStatus, Utxo};

/// Outputs at or below this value are not worth creating
pub const DUST_THRESHOLD: u64 = 546;

/// Confirmation target used for the default fee rate
pub const DEFAULT_FEE_TARGET_BLOCKS: u16 = 3;

/// Virtual size of a P2PKH spend with the given input and output counts
pub fn estimate_vsize(inputs: usize, outputs: usize) -> u64 {
    10 + 148 * inputs as u64 + 34 * outputs as u64
}

/// Inputs chosen for a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<Utxo>,
    pub change: u64,
    pub fee: u64,
}

/// Greedy largest-first input selection
///
/// Returns `None` when the outputs cannot cover `amount` plus fee. A remainder
/// at or below [`DUST_THRESHOLD`] is left to the fee instead of becoming change.
pub fn select_inputs(utxos: &[Utxo], amount: u64, fee_rate: u64) -> Option<Selection> {
    let mut candidates: Vec<&Utxo> = utxos.iter().collect();
    candidates.sort_by(|a, b| b.value.cmp(&a.value));

    let mut inputs = Vec::new();
    let mut total: u64 = 0;
    for utxo in candidates {
        inputs.push(utxo.clone());
        total = total.checked_add(utxo.value)?;

        let fee_with_change = estimate_vsize(inputs.len(), 2).checked_mul(fee_rate)?;
        if let Some(change) = total.checked_sub(amount.checked_add(fee_with_change)?) {
            if change > DUST_THRESHOLD {
                return Some(Selection { inputs, change, fee: fee_with_change });
            }
        }

        let fee_without_change = estimate_vsize(inputs.len(), 1).checked_mul(fee_rate)?;
        if total >= amount.checked_add(fee_without_change)? {
            let fee = total - amount;
            return Some(Selection { inputs, change: 0, fee });
        }
    }
    None
}

/// Inclusion state reported by the indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UtxoTxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
}

/// Address indexer used by the UTXO adapter
///
/// Refusals by the indexer are reported as [`NodeRejection`].
#[async_trait]
pub trait UtxoIndexer: Send + Sync {
    /// Unspent outputs of an address, confirmed and unconfirmed
    async fn list_unspent(&self, address: &str) -> anyhow::Result<Vec<Utxo>>;

    /// Fee rate in smallest units per vbyte for inclusion within `target_blocks`
    async fn fee_rate(&self, target_blocks: u16) -> anyhow::Result<u64>;

    /// Submit a raw transaction, returning its txid
    async fn broadcast(&self, raw_hex: &str) -> anyhow::Result<String>;

    /// `None` when the indexer has never seen the transaction
    async fn transaction_status(&self, txid: &str) -> anyhow::Result<Option<UtxoTxStatus>>;

    async fn tip_height(&self) -> anyhow::Result<u64>;
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: UtxoTxStatus,
}

/// [`UtxoIndexer`] over an Esplora-compatible REST API
pub struct EsploraClient {
    base_url: String,
    client: reqwest::Client,
}

impl EsploraClient {
    pub fn new(params: &ChainParams) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(params.timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("{}: failed to build HTTP client: {}", params.currency, e)))?;

        Ok(Self {
            base_url: params.rpc_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get(&self, path: &str) -> anyhow::Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "Esplora request");
        self.client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", path))
    }
}

#[async_trait]
impl UtxoIndexer for EsploraClient {
    async fn list_unspent(&self, address: &str) -> anyhow::Result<Vec<Utxo>> {
        let utxos: Vec<EsploraUtxo> = self
            .get(&format!("/address/{}/utxo", address))
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse UTXO list")?;

        Ok(utxos
            .into_iter()
            .map(|u| Utxo {
                txid: u.txid,
                vout: u.vout,
                value: u.value,
                confirmed: u.status.confirmed,
            })
            .collect())
    }

    async fn fee_rate(&self, target_blocks: u16) -> anyhow::Result<u64> {
        let estimates: HashMap<String, f64> = self
            .get("/fee-estimates")
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse fee estimates")?;

        // closest target that is not faster than requested
        let rate = estimates
            .iter()
            .filter_map(|(target, rate)| target.parse::<u16>().ok().map(|t| (t, *rate)))
            .filter(|(t, _)| *t >= target_blocks)
            .min_by_key(|(t, _)| *t)
            .map(|(_, rate)| rate)
            .context("No fee estimate for the requested target")?;

        Ok((rate.ceil() as u64).max(1))
    }

    async fn broadcast(&self, raw_hex: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .post(format!("{}/tx", self.base_url))
            .body(raw_hex.to_string())
            .send()
            .await
            .context("POST /tx")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read broadcast response")?;
        if status.is_success() {
            Ok(body.trim().to_string())
        } else if status.is_client_error() {
            Err(NodeRejection(body).into())
        } else {
            anyhow::bail!("POST /tx returned {}: {}", status, body)
        }
    }

    async fn transaction_status(&self, txid: &str) -> anyhow::Result<Option<UtxoTxStatus>> {
        let response = self.get(&format!("/tx/{}/status", txid)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse transaction status")?;
        Ok(Some(status))
    }

    async fn tip_height(&self) -> anyhow::Result<u64> {
        let body = self.get("/blocks/tip/height").await?.error_for_status()?.text().await?;
        body.trim().parse().context("Failed to parse tip height")
    }
}

/// Chain adapter for Bitcoin-family networks, spending P2PKH outputs
pub struct UtxoAdapter {
    params: ChainParams,
    network: UtxoNetwork,
    indexer: Arc<dyn UtxoIndexer>,
    units: UnitConverter,
    /// Outpoints spent by accepted broadcasts, per sending address, until the indexer drops them
    spent: Mutex<HashMap<String, HashSet<(String, u32)>>>,
}

impl UtxoAdapter {
    pub fn new(params: ChainParams, indexer: Arc<dyn UtxoIndexer>) -> Result<Self> {
        let network = match params.currency {
            Currency::Btc => UtxoNetwork::Bitcoin,
            Currency::Ltc => UtxoNetwork::Litecoin,
            other => return Err(Error::Configuration(format!("{} is not a UTXO chain", other))),
        };
        params.validate()?;

        let units = UnitConverter::for_currency(params.currency);
        Ok(Self {
            params,
            network,
            indexer,
            units,
            spent: Mutex::new(HashMap::new()),
        })
    }

    pub fn network(&self) -> UtxoNetwork {
        self.network
    }

    fn currency_code(&self) -> Currency {
        self.params.currency
    }

    fn script_for(&self, address: &str) -> Result<ScriptBuf> {
        keys::address_to_script(address, self.network)
            .map_err(|e| Error::invalid_address(self.currency_code(), address, e))
    }

    fn key_material(&self, key_pair: &KeyPair) -> KeyMaterial {
        KeyMaterial::new(
            self.currency_code(),
            keys::public_key_to_address(key_pair.public_key(), self.network),
            key_pair.compressed_public_hex(),
            key_pair.secret_hex(),
        )
        .with_wif(keys::to_wif(key_pair, self.network))
    }

    async fn unspent(&self, address: &str) -> Result<Vec<Utxo>> {
        self.indexer
            .list_unspent(address)
            .await
            .map_err(|e| Error::network(self.currency_code(), address, format!("{:#}", e)))
    }

    /// Unspent outputs that no accepted broadcast of ours has consumed yet
    async fn spendable(&self, address: &str) -> Result<Vec<Utxo>> {
        let utxos = self.unspent(address).await?;

        let mut spent = self.spent.lock().await;
        let Some(pending) = spent.get_mut(address) else {
            return Ok(utxos);
        };
        pending.retain(|(txid, vout)| utxos.iter().any(|u| u.txid == *txid && u.vout == *vout));

        let listed = utxos.len();
        let spendable: Vec<Utxo> = utxos
            .into_iter()
            .filter(|u| !pending.contains(&(u.txid.clone(), u.vout)))
            .collect();
        if listed > spendable.len() {
            tracing::debug!(
                currency = %self.currency_code(),
                address = %address,
                skipped = listed - spendable.len(),
                "Skipping outputs spent by a pending broadcast"
            );
        }
        if pending.is_empty() {
            spent.remove(address);
        }
        Ok(spendable)
    }

    async fn mark_spent(&self, from: &str, tx: &Transaction) {
        let mut spent = self.spent.lock().await;
        spent
            .entry(from.to_string())
            .or_default()
            .extend(tx.input.iter().map(|i| (i.previous_output.txid.to_string(), i.previous_output.vout)));
    }

    /// Hand the raw transaction to the indexer, treating "already known" answers as success
    async fn submit_raw(&self, signed: &SignedTransaction, raw: &[u8]) -> Result<()> {
        let currency = self.currency_code();
        let err = match self.indexer.broadcast(&hex::encode(raw)).await {
            Ok(txid) => {
                if txid != signed.tx_hash {
                    tracing::warn!(currency = %currency, local = %signed.tx_hash, indexer = %txid, "Indexer reported a different txid");
                }
                tracing::info!(currency = %currency, from = %signed.from, tx_hash = %signed.tx_hash, "Broadcast UTXO transaction");
                return Ok(());
            }
            Err(e) => e,
        };

        let Some(message) = rejection_message(&err) else {
            return Err(Error::network(currency, &signed.from, format!("{:#}", err)));
        };
        let lowered = message.to_ascii_lowercase();

        let already_known = ["already in block chain", "txn-already-known", "txn-already-in-mempool"]
            .iter()
            .any(|marker| lowered.contains(marker));
        if already_known {
            tracing::info!(currency = %currency, tx_hash = %signed.tx_hash, "Transaction already known to the network");
            return Ok(());
        }

        // inputs count as missing once this very transaction spent them
        if lowered.contains("missing-inputs") || lowered.contains("missingorspent") {
            let known = self
                .indexer
                .transaction_status(&signed.tx_hash)
                .await
                .map_err(|e| Error::network(currency, &signed.from, format!("{:#}", e)))?;
            if known.is_some() {
                tracing::info!(currency = %currency, tx_hash = %signed.tx_hash, "Transaction already spent its inputs");
                return Ok(());
            }
        }

        Err(Error::broadcast(currency, &signed.from, RejectionKind::Rejected, message))
    }

    fn validate_txid(&self, txid: &str) -> Result<()> {
        Txid::from_str(txid)
            .map(|_| ())
            .map_err(|e| Error::invalid_address(self.currency_code(), txid, format!("malformed txid: {}", e)))
    }
}

#[async_trait]
impl ChainAdapter for UtxoAdapter {
    fn params(&self) -> &ChainParams {
        &self.params
    }

    fn create_wallet(&self, seed_phrase: Option<&str>) -> Result<KeyMaterial> {
        let (mnemonic, key_pair, path) = derive_from_phrase(self.currency_code(), seed_phrase)?;
        Ok(self.key_material(&key_pair).with_mnemonic(mnemonic, path))
    }

    fn import_private_key(&self, private_key: &str) -> Result<KeyMaterial> {
        let key_pair = keys::parse_private_key(private_key, self.network)
            .map_err(|e| Error::key_derivation(self.currency_code(), e))?;
        Ok(self.key_material(&key_pair))
    }

    fn validate_address(&self, address: &str) -> Result<()> {
        self.script_for(address).map(|_| ())
    }

    async fn get_balance(&self, address: &str) -> Result<Decimal> {
        self.validate_address(address)?;
        let total: u128 = self.unspent(address).await?.iter().map(|u| u.value as u128).sum();
        self.units.to_display(total)
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

        if !self.script_for(from)?.is_p2pkh() {
            return Err(Error::unsupported(currency, format!("cannot spend from non-P2PKH address {}", from)));
        }
        self.script_for(to)?;

        let amount = u64::try_from(self.units.to_positive_smallest(amount)?)
            .map_err(|_| Error::invalid_amount(currency, "amount exceeds the chain's supply"))?;
        if amount <= DUST_THRESHOLD {
            return Err(Error::invalid_amount(
                currency,
                format!("{} is at or below the dust threshold of {}", amount, DUST_THRESHOLD),
            ));
        }

        let fee_rate = match *fee_policy {
            FeePolicy::SatPerVbyte(0) => return Err(Error::invalid_amount(currency, "fee rate must be positive")),
            FeePolicy::SatPerVbyte(rate) => rate,
            _ => self
                .indexer
                .fee_rate(DEFAULT_FEE_TARGET_BLOCKS)
                .await
                .map_err(|e| Error::network(currency, from, format!("{:#}", e)))?,
        };

        let utxos = self.spendable(from).await?;
        let Some(selection) = select_inputs(&utxos, amount, fee_rate) else {
            let available: u128 = utxos.iter().map(|u| u.value as u128).sum();
            let fee = estimate_vsize(utxos.len().max(1), 2) as u128 * fee_rate as u128;
            return Err(Error::InsufficientFunds {
                currency,
                address: from.to_string(),
                available: self.units.to_display(available)?,
                required: self.units.to_display(amount as u128 + fee)?,
            });
        };

        tracing::debug!(
            currency = %currency,
            from = %from,
            inputs = selection.inputs.len(),
            fee = selection.fee,
            change = selection.change,
            "Built UTXO transfer"
        );

        Ok(TransactionRequest::Utxo {
            from: from.to_string(),
            to: to.to_string(),
            amount,
            inputs: selection.inputs,
            change: selection.change,
            fee: selection.fee,
            fee_rate,
        })
    }

    fn sign_transaction(&self, request: &TransactionRequest, private_key: &str) -> Result<SignedTransaction> {
        let currency = self.currency_code();
        ensure_request_family(currency, request)?;
        let TransactionRequest::Utxo {
            from,
            to,
            amount,
            inputs,
            change,
            ..
        } = request
        else {
            return Err(Error::signing(currency, request.from(), "not a UTXO request"));
        };

        let key_pair = keys::parse_private_key(private_key, self.network)
            .map_err(|e| Error::signing(currency, from, e))?;
        if keys::public_key_to_address(key_pair.public_key(), self.network) != *from {
            return Err(Error::signing(currency, from, "private key does not control the sending address"));
        }
        let own_script = keys::p2pkh_script(key_pair.public_key());

        let mut tx_inputs = Vec::with_capacity(inputs.len());
        for utxo in inputs {
            let txid = Txid::from_str(&utxo.txid)
                .map_err(|e| Error::signing(currency, from, format!("bad input txid {}: {}", utxo.txid, e)))?;
            tx_inputs.push(TxIn {
                previous_output: OutPoint { txid, vout: utxo.vout },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            });
        }

        let mut outputs = vec![TxOut {
            value: Amount::from_sat(*amount),
            script_pubkey: self.script_for(to)?,
        }];
        if *change > 0 {
            outputs.push(TxOut {
                value: Amount::from_sat(*change),
                script_pubkey: own_script.clone(),
            });
        }

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: tx_inputs,
            output: outputs,
        };

        let secp = Secp256k1::signing_only();
        let public_key = bitcoin::PublicKey::new(*key_pair.public_key());
        let mut script_sigs = Vec::with_capacity(tx.input.len());
        {
            let cache = SighashCache::new(&tx);
            for index in 0..tx.input.len() {
                let sighash = cache
                    .legacy_signature_hash(index, &own_script, EcdsaSighashType::All.to_u32())
                    .map_err(|e| Error::signing(currency, from, e))?;
                let message = Message::from_digest(sighash.to_byte_array());
                let signature = secp.sign_ecdsa(&message, key_pair.secret_key());

                let mut signature_bytes = signature.serialize_der().to_vec();
                signature_bytes.push(EcdsaSighashType::All as u8);
                let push = PushBytesBuf::try_from(signature_bytes)
                    .map_err(|e| Error::signing(currency, from, e))?;

                script_sigs.push(Builder::new().push_slice(push).push_key(&public_key).into_script());
            }
        }
        for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
            input.script_sig = script_sig;
        }

        Ok(SignedTransaction {
            currency,
            from: from.clone(),
            tx_hash: tx.txid().to_string(),
            payload: SignedPayload::Raw(serialize(&tx)),
        })
    }

    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String> {
        let currency = self.currency_code();
        let SignedPayload::Raw(raw) = &signed.payload else {
            return Err(Error::broadcast(currency, &signed.from, RejectionKind::Rejected, "expected a raw transaction"));
        };
        let tx: Transaction = deserialize(raw).map_err(|e| {
            Error::broadcast(currency, &signed.from, RejectionKind::Rejected, format!("malformed raw transaction: {}", e))
        })?;

        self.submit_raw(signed, raw).await?;
        self.mark_spent(&signed.from, &tx).await;
        Ok(signed.tx_hash.clone())
    }

    async fn get_transaction_status(&self, tx_hash: &str) -> Result<TransactionStatus> {
        let currency = self.currency_code();
        self.validate_txid(tx_hash)?;
        let network_error = |e: anyhow::Error| Error::network(currency, tx_hash, format!("{:#}", e));

        let status = match self.indexer.transaction_status(tx_hash).await.map_err(network_error)? {
            None => TransactionStatus::Unknown,
            Some(UtxoTxStatus {
                confirmed: true,
                block_height: Some(height),
            }) => {
                let tip = self.indexer.tip_height().await.map_err(network_error)?;
                let confirmations = tip.saturating_sub(height) + 1;
                TransactionStatus::from_confirmations(confirmations, self.params.min_confirmations)
            }
            Some(_) => TransactionStatus::Pending,
        };

        tracing::debug!(currency = %currency, tx_hash = %tx_hash, status = ?status, "Fetched UTXO transaction status");
        Ok(status)
    }
}
