//! The wallet engine
//!
//! Every operation is one awaited call that returns a value or a typed error.
//! The engine resolves the adapter, applies the call deadline, retries
//! idempotent reads, serializes submissions per address and persists wallet
//! and transaction records.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::account::{
    KeyMaterial, LedgerStore, RecordStatus, TransactionRecord, UserId, Wallet, WalletRecordStore, WalletSummary,
};
use crate::config::EngineConfig;
use crate::currency::Currency;
use crate::error::{Error, RejectionKind, Result};
use crate::lock::AddressLocks;
use crate::transaction::{ChainAdapter, FeePolicy, TransactionStatus, WalletFactory};

/// A transfer to submit through [`WalletEngine::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub currency: Currency,
    pub from: String,
    pub to: String,
    /// Amount in display units
    pub amount: Decimal,
    pub fee_policy: FeePolicy,
    /// Overrides the configured call deadline
    pub deadline: Option<Duration>,
}

impl Transfer {
    pub fn new(currency: Currency, from: impl Into<String>, to: impl Into<String>, amount: Decimal) -> Self {
        Self {
            currency,
            from: from.into(),
            to: to.into(),
            amount,
            fee_policy: FeePolicy::Default,
            deadline: None,
        }
    }

    pub fn fee_policy(mut self, fee_policy: FeePolicy) -> Self {
        self.fee_policy = fee_policy;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Multi-chain wallet engine
pub struct WalletEngine {
    factory: WalletFactory,
    wallets: Arc<dyn WalletRecordStore>,
    ledger: Arc<dyn LedgerStore>,
    locks: AddressLocks,
    config: EngineConfig,
}

impl WalletEngine {
    /// Create an engine over ready-made adapters
    pub fn new(
        factory: WalletFactory,
        wallets: Arc<dyn WalletRecordStore>,
        ledger: Arc<dyn LedgerStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            factory,
            wallets,
            ledger,
            locks: AddressLocks::new(),
            config,
        })
    }

    /// Create an engine with HTTP-backed adapters for every supported chain
    pub fn from_config(
        config: EngineConfig,
        wallets: Arc<dyn WalletRecordStore>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Result<Self> {
        let factory = WalletFactory::from_config(&config)?;
        Self::new(factory, wallets, ledger, config)
    }

    pub fn factory(&self) -> &WalletFactory {
        &self.factory
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Generate (or restore) keys for `currency` and store the wallet
    ///
    /// The returned key material is the caller's only copy of the recovery
    /// phrase.
    pub async fn create_wallet(
        &self,
        user_id: UserId,
        currency: Currency,
        seed_phrase: Option<&str>,
    ) -> Result<(WalletSummary, KeyMaterial)> {
        let adapter = self.factory.adapter(currency)?;
        let keys = adapter.create_wallet(seed_phrase)?;
        let summary = self.store_wallet(user_id, &keys).await?;

        tracing::info!(
            user_id,
            currency = %currency,
            address = %summary.address,
            restored = seed_phrase.is_some(),
            "Created wallet"
        );
        Ok((summary, keys))
    }

    /// Store a wallet for an existing private key (hex, or WIF on Bitcoin-family chains)
    pub async fn import_private_key(
        &self,
        user_id: UserId,
        currency: Currency,
        private_key: &str,
    ) -> Result<WalletSummary> {
        let adapter = self.factory.adapter(currency)?;
        let keys = adapter.import_private_key(private_key)?;
        let summary = self.store_wallet(user_id, &keys).await?;

        tracing::info!(user_id, currency = %currency, address = %summary.address, "Imported wallet");
        Ok(summary)
    }

    /// A user's wallets, newest first
    pub async fn list_wallets(&self, user_id: UserId) -> Result<Vec<WalletSummary>> {
        self.wallets.list_by_user(user_id).await
    }

    /// A user's transactions, newest first
    pub async fn list_transactions(&self, user_id: UserId) -> Result<Vec<TransactionRecord>> {
        self.ledger.list_by_user(user_id).await
    }

    /// Live balance in display units
    pub async fn get_balance(&self, currency: Currency, address: &str) -> Result<Decimal> {
        let adapter = self.factory.adapter(currency)?;
        self.with_deadline(currency, address, self.config.call_deadline(), async {
            self.read_with_retry(currency, address, || adapter.get_balance(address)).await
        })
        .await
    }

    /// Build, sign and broadcast a transfer, then record it as pending
    ///
    /// Nothing is persisted unless the broadcast succeeded.
    pub async fn send(&self, user_id: UserId, transfer: Transfer) -> Result<TransactionRecord> {
        let deadline = transfer.deadline.unwrap_or_else(|| self.config.call_deadline());
        self.with_deadline(transfer.currency, &transfer.from, deadline, self.submit(user_id, &transfer))
            .await
    }

    /// Query the chain and move the ledger record forward if the transaction settled
    pub async fn refresh_status(&self, currency: Currency, tx_hash: &str) -> Result<TransactionStatus> {
        let adapter = self.factory.adapter(currency)?;
        let status = self
            .with_deadline(currency, tx_hash, self.config.call_deadline(), async {
                self.read_with_retry(currency, tx_hash, || adapter.get_transaction_status(tx_hash))
                    .await
            })
            .await?;

        if let Some(settled) = status.settled_record_status() {
            self.settle_record(tx_hash, settled).await?;
        }
        Ok(status)
    }

    /// Check an address without touching the network
    pub fn validate_address(&self, currency: Currency, address: &str) -> Result<()> {
        self.factory.adapter(currency)?.validate_address(address)
    }

    async fn store_wallet(&self, user_id: UserId, keys: &KeyMaterial) -> Result<WalletSummary> {
        let wallet = Wallet::from_key_material(user_id, keys);
        let summary = wallet.summary();
        self.wallets.save(wallet).await?;
        Ok(summary)
    }

    async fn submit(&self, user_id: UserId, transfer: &Transfer) -> Result<TransactionRecord> {
        let currency = transfer.currency;
        let adapter = self.factory.adapter(currency)?;
        adapter.validate_address(&transfer.from)?;
        adapter.validate_address(&transfer.to)?;

        let private_key = self
            .wallets
            .get_private_key(user_id, &transfer.from)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("{} wallet {} of user {}", currency, transfer.from, user_id))
            })?;

        let _guard = self
            .locks
            .acquire(currency, &transfer.from, self.config.lock_wait())
            .await?;

        let tx_hash = self
            .build_sign_broadcast(adapter.as_ref(), transfer, &private_key)
            .await?;

        // a hash already in the ledger means this send collapsed into an earlier one
        if self.ledger.get(&tx_hash).await?.is_some() {
            return Err(Error::broadcast(
                currency,
                &transfer.from,
                RejectionKind::Rejected,
                format!("transaction {} duplicates an earlier send", tx_hash),
            ));
        }

        let record = self
            .ledger
            .insert(TransactionRecord {
                tx_hash,
                user_id,
                from_address: transfer.from.clone(),
                to_address: transfer.to.clone(),
                amount: transfer.amount.normalize(),
                currency,
                network: currency.network().to_string(),
                status: RecordStatus::Pending,
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            user_id,
            currency = %currency,
            from = %record.from_address,
            to = %record.to_address,
            amount = %record.amount,
            tx_hash = %record.tx_hash,
            "Recorded pending transaction"
        );
        Ok(record)
    }

    /// One submission; a stale nonce is answered with a rebuild while retries last
    async fn build_sign_broadcast(
        &self,
        adapter: &dyn ChainAdapter,
        transfer: &Transfer,
        private_key: &str,
    ) -> Result<String> {
        let mut retries_left = adapter.stale_nonce_retries();
        loop {
            let request = adapter
                .build_transaction(&transfer.from, &transfer.to, transfer.amount, &transfer.fee_policy)
                .await?;
            let signed = adapter.sign_transaction(&request, private_key)?;

            match adapter.broadcast_transaction(&signed).await {
                Ok(tx_hash) => return Ok(tx_hash),
                Err(e) if e.is_stale_nonce() && retries_left > 0 => {
                    retries_left -= 1;
                    tracing::warn!(
                        currency = %transfer.currency,
                        from = %transfer.from,
                        nonce = ?request.nonce(),
                        retries_left,
                        "Stale nonce, rebuilding transaction"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn settle_record(&self, tx_hash: &str, settled: RecordStatus) -> Result<()> {
        let Some(record) = self.ledger.get(tx_hash).await? else {
            return Ok(());
        };
        if record.status == settled {
            return Ok(());
        }
        if !record.status.can_advance_to(settled) {
            tracing::warn!(
                tx_hash = %tx_hash,
                recorded = ?record.status,
                observed = ?settled,
                "Ignoring backwards status change"
            );
            return Ok(());
        }

        self.ledger.update_status(tx_hash, settled).await?;
        tracing::info!(currency = %record.currency, tx_hash = %tx_hash, status = ?settled, "Transaction settled");
        Ok(())
    }

    /// Retry a read on network errors with exponential backoff
    async fn read_with_retry<T, F, Fut>(&self, currency: Currency, subject: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.config.retry_backoff();
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e @ Error::Network { .. }) if attempt < self.config.read_retries => {
                    tracing::warn!(
                        currency = %currency,
                        subject = %subject,
                        attempt,
                        error = %e,
                        "Read failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn with_deadline<T>(
        &self,
        currency: Currency,
        address: &str,
        deadline: Duration,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(deadline, call).await.map_err(|_| {
            tracing::warn!(currency = %currency, address = %address, deadline = ?deadline, "Call deadline exceeded");
            Error::Timeout {
                currency,
                address: address.to_string(),
                deadline,
            }
        })?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::account::{InMemoryLedger, InMemoryWalletStore};
    use crate::transaction::{ChainParams, SignedTransaction, TransactionRequest};

    /// Balance reads fail until `failures` is used up
    struct FlakyAdapter {
        params: ChainParams,
        failures: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChainAdapter for FlakyAdapter {
        fn params(&self) -> &ChainParams {
            &self.params
        }

        fn create_wallet(&self, _seed_phrase: Option<&str>) -> Result<KeyMaterial> {
            Err(Error::unsupported(self.currency(), "not needed"))
        }

        fn import_private_key(&self, _private_key: &str) -> Result<KeyMaterial> {
            Err(Error::unsupported(self.currency(), "not needed"))
        }

        fn validate_address(&self, _address: &str) -> Result<()> {
            Ok(())
        }

        async fn get_balance(&self, address: &str) -> Result<Decimal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(Error::network(self.currency(), address, "connection reset"));
            }
            Ok(Decimal::new(15, 1))
        }

        async fn build_transaction(
            &self,
            _from: &str,
            _to: &str,
            _amount: Decimal,
            _fee_policy: &FeePolicy,
        ) -> Result<TransactionRequest> {
            Err(Error::unsupported(self.currency(), "not needed"))
        }

        fn sign_transaction(&self, _request: &TransactionRequest, _private_key: &str) -> Result<SignedTransaction> {
            Err(Error::unsupported(self.currency(), "not needed"))
        }

        async fn broadcast_transaction(&self, _signed: &SignedTransaction) -> Result<String> {
            Err(Error::unsupported(self.currency(), "not needed"))
        }

        async fn get_transaction_status(&self, _tx_hash: &str) -> Result<TransactionStatus> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(TransactionStatus::Unknown)
        }
    }

    fn engine(failures: u32) -> (WalletEngine, Arc<FlakyAdapter>) {
        let adapter = Arc::new(FlakyAdapter {
            params: ChainParams::for_currency(Currency::Eth, "http://localhost:8545").unwrap(),
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        });
        let factory = WalletFactory::from_adapters([adapter.clone() as Arc<dyn ChainAdapter>]).unwrap();
        let config = EngineConfig {
            call_deadline_secs: 1,
            retry_backoff_ms: 1,
            ..EngineConfig::default()
        };
        let engine = WalletEngine::new(
            factory,
            Arc::new(InMemoryWalletStore::new()),
            Arc::new(InMemoryLedger::new()),
            config,
        )
        .unwrap();
        (engine, adapter)
    }

    #[tokio::test]
    async fn test_balance_read_is_retried() {
        let (engine, adapter) = engine(2);
        let balance = engine.get_balance(Currency::Eth, "0xabc").await.unwrap();
        assert_eq!(balance, Decimal::new(15, 1));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (engine, adapter) = engine(10);
        let err = engine.get_balance(Currency::Eth, "0xabc").await.unwrap_err();
        assert!(matches!(err, Error::Network { .. }));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slow_status_hits_deadline() {
        let (engine, _) = engine(0);
        let err = engine.refresh_status(Currency::Eth, "0x01").await.unwrap_err();
        assert!(matches!(err, Error::Timeout { currency: Currency::Eth, .. }));
    }

    #[tokio::test]
    async fn test_unconfigured_currency() {
        let (engine, _) = engine(0);
        let err = engine.get_balance(Currency::Btc, "1abc").await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_transfer_builder() {
        let transfer = Transfer::new(Currency::Ltc, "Lfrom", "Lto", Decimal::ONE)
            .fee_policy(FeePolicy::SatPerVbyte(3))
            .deadline(Duration::from_secs(5));
        assert_eq!(transfer.fee_policy, FeePolicy::SatPerVbyte(3));
        assert_eq!(transfer.deadline, Some(Duration::from_secs(5)));
    }
}
