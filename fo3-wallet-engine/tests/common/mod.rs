//! In-memory chain backends shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ethers::prelude::{Address, Bytes, H256, U256};
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::utils::rlp::Rlp;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use fo3_wallet_engine::crypto::keys::ethereum::keccak256;
use fo3_wallet_engine::transaction::{
    EvmAdapter, EvmReceipt, EvmRpc, NodeRejection, TronAccount, TronAdapter, TronRpc, TronTxInfo, TronUnsignedTx,
    UtxoAdapter, UtxoIndexer, UtxoTxStatus, Utxo,
};
use fo3_wallet_engine::{
    ChainAdapter, ChainParams, Currency, EngineConfig, InMemoryLedger, InMemoryWalletStore, WalletEngine,
    WalletFactory,
};

pub const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub const EVM_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const EVM_ADDRESS: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";
pub const EVM_RECIPIENT: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";

pub const GAS_PRICE_WEI: u64 = 20_000_000_000;

/// A transaction the EVM node accepted
#[derive(Debug, Clone)]
pub struct Accepted {
    pub hash: H256,
    pub from: Address,
    pub nonce: u64,
    pub value: U256,
}

/// Single-account EVM node that enforces nonce order
#[derive(Default)]
pub struct MockEvmRpc {
    pub balance: Mutex<U256>,
    /// Next nonce the node will accept
    pub nonce: AtomicU64,
    /// Pending-nonce reads that still report one less than the real nonce
    pub stale_reads: AtomicU32,
    pub send_delay: Mutex<Duration>,
    pub accepted: Mutex<Vec<Accepted>>,
    pub receipts: Mutex<HashMap<H256, EvmReceipt>>,
    pub tip: AtomicU64,
    pub balance_failures: AtomicU32,
}

impl MockEvmRpc {
    pub fn with_balance(wei: u128) -> Self {
        let rpc = Self::default();
        *rpc.balance.lock().unwrap() = U256::from(wei);
        rpc
    }

    pub fn accepted(&self) -> Vec<Accepted> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn mine(&self, hash: &str, block_number: u64, success: bool) {
        let hash = H256::from_str(hash).unwrap();
        self.receipts.lock().unwrap().insert(
            hash,
            EvmReceipt {
                block_number: Some(block_number),
                success,
            },
        );
    }
}

#[async_trait]
impl EvmRpc for MockEvmRpc {
    async fn get_balance(&self, _address: Address) -> anyhow::Result<U256> {
        let left = self.balance_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.balance_failures.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("connection refused");
        }
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_pending_nonce(&self, _address: Address) -> anyhow::Result<u64> {
        let nonce = self.nonce.load(Ordering::SeqCst);
        let stale = self.stale_reads.load(Ordering::SeqCst);
        if stale > 0 && nonce > 0 {
            self.stale_reads.store(stale - 1, Ordering::SeqCst);
            return Ok(nonce - 1);
        }
        Ok(nonce)
    }

    async fn gas_price(&self) -> anyhow::Result<U256> {
        Ok(U256::from(GAS_PRICE_WEI))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<H256> {
        let delay = *self.send_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let hash = H256::from(keccak256(&raw));
        let (tx, signature) = TypedTransaction::decode_signed(&Rlp::new(&raw))?;
        let from = signature.recover(tx.sighash())?;
        let nonce = tx.nonce().map(|n| n.as_u64()).unwrap_or_default();

        let mut accepted = self.accepted.lock().unwrap();
        if accepted.iter().any(|a| a.hash == hash) {
            return Err(NodeRejection("already known".to_string()).into());
        }
        let expected = self.nonce.load(Ordering::SeqCst);
        if nonce < expected {
            return Err(NodeRejection("nonce too low".to_string()).into());
        }
        if nonce > expected {
            return Err(NodeRejection("nonce too high".to_string()).into());
        }

        self.nonce.store(expected + 1, Ordering::SeqCst);
        accepted.push(Accepted {
            hash,
            from,
            nonce,
            value: tx.value().copied().unwrap_or_default(),
        });
        Ok(hash)
    }

    async fn get_receipt(&self, hash: H256) -> anyhow::Result<Option<EvmReceipt>> {
        Ok(self.receipts.lock().unwrap().get(&hash).copied())
    }

    async fn transaction_known(&self, hash: H256) -> anyhow::Result<bool> {
        Ok(self.accepted.lock().unwrap().iter().any(|a| a.hash == hash))
    }

    async fn block_number(&self) -> anyhow::Result<u64> {
        Ok(self.tip.load(Ordering::SeqCst))
    }
}

/// Esplora-like indexer holding one address's outputs
#[derive(Default)]
pub struct MockIndexer {
    /// Served as is; outputs stay listed after being spent until [`MockIndexer::catch_up`]
    pub utxos: Mutex<Vec<Utxo>>,
    pub fee_rate: AtomicU64,
    pub broadcasts: Mutex<Vec<String>>,
    pub statuses: Mutex<HashMap<String, UtxoTxStatus>>,
    pub tip: AtomicU64,
    /// Spent outpoint and the txid that spent it
    pub spent: Mutex<HashMap<(String, u32), String>>,
}

impl MockIndexer {
    pub fn with_utxos(values: &[u64], fee_rate: u64) -> Self {
        let utxos = values
            .iter()
            .enumerate()
            .map(|(index, value)| Utxo {
                txid: format!("{:064x}", index + 1),
                vout: index as u32,
                value: *value,
                confirmed: true,
            })
            .collect();
        Self {
            utxos: Mutex::new(utxos),
            fee_rate: AtomicU64::new(fee_rate),
            ..Default::default()
        }
    }

    /// Stop listing outputs that a broadcast transaction has spent
    pub fn catch_up(&self) {
        let spent = self.spent.lock().unwrap();
        self.utxos
            .lock()
            .unwrap()
            .retain(|u| !spent.contains_key(&(u.txid.clone(), u.vout)));
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().unwrap().len()
    }

    /// Every broadcast transaction, decoded
    pub fn broadcast_transactions(&self) -> Vec<bitcoin::Transaction> {
        self.broadcasts
            .lock()
            .unwrap()
            .iter()
            .map(|raw| bitcoin::consensus::deserialize(&hex::decode(raw).unwrap()).unwrap())
            .collect()
    }

    /// The last broadcast transaction, decoded
    pub fn last_broadcast(&self) -> bitcoin::Transaction {
        let raw = self.broadcasts.lock().unwrap().last().cloned().unwrap();
        bitcoin::consensus::deserialize(&hex::decode(raw).unwrap()).unwrap()
    }
}

#[async_trait]
impl UtxoIndexer for MockIndexer {
    async fn list_unspent(&self, _address: &str) -> anyhow::Result<Vec<Utxo>> {
        Ok(self.utxos.lock().unwrap().clone())
    }

    async fn fee_rate(&self, _target_blocks: u16) -> anyhow::Result<u64> {
        Ok(self.fee_rate.load(Ordering::SeqCst))
    }

    async fn broadcast(&self, raw_hex: &str) -> anyhow::Result<String> {
        let tx: bitcoin::Transaction = bitcoin::consensus::deserialize(&hex::decode(raw_hex)?)?;
        let txid = tx.txid().to_string();

        let mut broadcasts = self.broadcasts.lock().unwrap();
        if broadcasts.iter().any(|b| b == raw_hex) {
            return Err(NodeRejection("sendrawtransaction RPC error: txn-already-in-mempool".to_string()).into());
        }

        let mut spent = self.spent.lock().unwrap();
        let outpoints: Vec<(String, u32)> = tx
            .input
            .iter()
            .map(|i| (i.previous_output.txid.to_string(), i.previous_output.vout))
            .collect();
        if outpoints.iter().any(|o| spent.get(o).is_some_and(|by| *by != txid)) {
            return Err(NodeRejection("sendrawtransaction RPC error: bad-txns-inputs-missingorspent".to_string()).into());
        }
        for outpoint in outpoints {
            spent.insert(outpoint, txid.clone());
        }

        broadcasts.push(raw_hex.to_string());
        self.statuses.lock().unwrap().insert(
            txid.clone(),
            UtxoTxStatus {
                confirmed: false,
                block_height: None,
            },
        );
        Ok(txid)
    }

    async fn transaction_status(&self, txid: &str) -> anyhow::Result<Option<UtxoTxStatus>> {
        Ok(self.statuses.lock().unwrap().get(txid).copied())
    }

    async fn tip_height(&self) -> anyhow::Result<u64> {
        Ok(self.tip.load(Ordering::SeqCst))
    }
}

/// TronGrid-like node with per-address accounts
#[derive(Default)]
pub struct MockTronRpc {
    pub accounts: Mutex<HashMap<String, TronAccount>>,
    pub bandwidth: AtomicU64,
    pub broadcasts: Mutex<Vec<Value>>,
    pub infos: Mutex<HashMap<String, TronTxInfo>>,
    pub known: Mutex<HashSet<String>>,
    pub now_block: AtomicU64,
    /// Refusal returned by every broadcast ahead of the duplicate check
    pub reject_with: Mutex<Option<String>>,
}

impl MockTronRpc {
    pub fn fund(&self, address: &str, balance: u64) {
        self.accounts
            .lock()
            .unwrap()
            .insert(address.to_string(), TronAccount { balance, exists: true });
    }
}

#[async_trait]
impl TronRpc for MockTronRpc {
    async fn get_account(&self, address: &str) -> anyhow::Result<TronAccount> {
        Ok(self.accounts.lock().unwrap().get(address).copied().unwrap_or_default())
    }

    async fn available_bandwidth(&self, _address: &str) -> anyhow::Result<u64> {
        Ok(self.bandwidth.load(Ordering::SeqCst))
    }

    async fn create_transfer(&self, from: &str, to: &str, amount: u64) -> anyhow::Result<TronUnsignedTx> {
        let raw_data = json!({
            "contract": [{
                "parameter": {
                    "value": { "owner_address": from, "to_address": to, "amount": amount },
                    "type_url": "type.googleapis.com/protocol.TransferContract"
                },
                "type": "TransferContract"
            }],
            "expiration": 1_700_000_060_000u64,
            "timestamp": 1_700_000_000_000u64
        });
        // stands in for the protobuf encoding; about 200 bytes like a real transfer
        let mut raw = format!("{}:{}:{}", from, to, amount).into_bytes();
        raw.resize(200, 0x5a);
        let raw_data_hex = hex::encode(&raw);
        let tx_id = hex::encode(Sha256::digest(&raw));
        Ok(TronUnsignedTx {
            tx_id,
            raw_data,
            raw_data_hex,
        })
    }

    async fn broadcast(&self, envelope: &Value) -> anyhow::Result<String> {
        let tx_id = envelope["txID"].as_str().unwrap_or_default().to_string();
        if let Some(reason) = self.reject_with.lock().unwrap().clone() {
            return Err(NodeRejection(reason).into());
        }
        let mut known = self.known.lock().unwrap();
        if !known.insert(tx_id.clone()) {
            return Err(NodeRejection("DUP_TRANSACTION_ERROR: dup transaction".to_string()).into());
        }
        self.broadcasts.lock().unwrap().push(envelope.clone());
        Ok(tx_id)
    }

    async fn transaction_info(&self, tx_id: &str) -> anyhow::Result<Option<TronTxInfo>> {
        Ok(self.infos.lock().unwrap().get(tx_id).copied())
    }

    async fn transaction_known(&self, tx_id: &str) -> anyhow::Result<bool> {
        Ok(self.known.lock().unwrap().contains(tx_id))
    }

    async fn now_block(&self) -> anyhow::Result<u64> {
        Ok(self.now_block.load(Ordering::SeqCst))
    }
}

pub fn evm_adapter(currency: Currency, rpc: Arc<MockEvmRpc>) -> EvmAdapter {
    let params = ChainParams::for_currency(currency, "http://localhost:8545").unwrap();
    EvmAdapter::new(params, rpc).unwrap()
}

pub fn utxo_adapter(currency: Currency, indexer: Arc<MockIndexer>) -> UtxoAdapter {
    let params = ChainParams::for_currency(currency, "http://localhost:3000").unwrap();
    UtxoAdapter::new(params, indexer).unwrap()
}

pub fn tron_adapter(rpc: Arc<MockTronRpc>) -> TronAdapter {
    let params = ChainParams::for_currency(Currency::Trx, "http://localhost:8090").unwrap();
    TronAdapter::new(params, rpc).unwrap()
}

/// Mock backends behind a fully wired engine
pub struct Harness {
    pub engine: Arc<WalletEngine>,
    pub evm: Arc<MockEvmRpc>,
    pub indexer: Arc<MockIndexer>,
    pub tron: Arc<MockTronRpc>,
    pub ledger: Arc<InMemoryLedger>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        Self::assemble(
            config,
            Arc::new(MockEvmRpc::with_balance(10u128.pow(18))),
            Arc::new(MockIndexer::with_utxos(&[80_000], 10)),
            Arc::new(MockTronRpc::default()),
            Arc::new(InMemoryLedger::new()),
        )
    }

    /// A second engine over the same backends and ledger, with fresh adapters and wallet store
    pub fn sibling(&self, config: EngineConfig) -> Self {
        Self::assemble(config, self.evm.clone(), self.indexer.clone(), self.tron.clone(), self.ledger.clone())
    }

    fn assemble(
        config: EngineConfig,
        evm: Arc<MockEvmRpc>,
        indexer: Arc<MockIndexer>,
        tron: Arc<MockTronRpc>,
        ledger: Arc<InMemoryLedger>,
    ) -> Self {
        let adapters: Vec<Arc<dyn ChainAdapter>> = vec![
            Arc::new(evm_adapter(Currency::Eth, evm.clone())),
            Arc::new(utxo_adapter(Currency::Btc, indexer.clone())),
            Arc::new(tron_adapter(tron.clone())),
        ];
        let factory = WalletFactory::from_adapters(adapters).unwrap();
        let engine = WalletEngine::new(factory, Arc::new(InMemoryWalletStore::new()), ledger.clone(), config).unwrap();

        Self {
            engine: Arc::new(engine),
            evm,
            indexer,
            tron,
            ledger,
        }
    }
}

pub fn fast_config() -> EngineConfig {
    EngineConfig {
        call_deadline_secs: 10,
        lock_wait_secs: 5,
        retry_backoff_ms: 1,
        ..EngineConfig::default()
    }
}
