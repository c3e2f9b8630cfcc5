//! The contract every chain family implements

use async_trait::async_trait;
use rust_decimal::Decimal;
use zeroize::Zeroizing;

use crate::account::KeyMaterial;
use crate::crypto::keys::{derive_key_pair, KeyPair};
use crate::crypto::{generate_mnemonic, mnemonic_to_seed, normalize_phrase, MnemonicStrength};
use crate::currency::Currency;
use crate::error::{Error, Result};
use super::provider::ChainParams;
use super::types::{FeePolicy, NodeRejection, SignedTransaction, TransactionRequest, TransactionStatus};

/// Build, sign, broadcast and query transfers on one chain
///
/// Implementations hold only immutable parameters and pooled RPC clients, so a
/// single instance is shared by every caller.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Parameters the adapter was configured with
    fn params(&self) -> &ChainParams;

    fn currency(&self) -> Currency {
        self.params().currency
    }

    /// Generate keys, or restore them from a BIP-39 phrase
    fn create_wallet(&self, seed_phrase: Option<&str>) -> Result<KeyMaterial>;

    /// Wrap an existing secret key
    fn import_private_key(&self, private_key: &str) -> Result<KeyMaterial>;

    /// Check that an address is in the chain's canonical format
    fn validate_address(&self, address: &str) -> Result<()>;

    /// Live balance in display units
    async fn get_balance(&self, address: &str) -> Result<Decimal>;

    /// Prepare an unsigned transfer of `amount` display units
    async fn build_transaction(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        fee_policy: &FeePolicy,
    ) -> Result<TransactionRequest>;

    /// Sign a request built by this adapter
    fn sign_transaction(&self, request: &TransactionRequest, private_key: &str) -> Result<SignedTransaction>;

    /// Submit a signed transaction, returning its hash
    ///
    /// A transaction the network already knows counts as submitted.
    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String>;

    async fn get_transaction_status(&self, tx_hash: &str) -> Result<TransactionStatus>;

    /// How often a stale-nonce rejection may be answered with a rebuild
    fn stale_nonce_retries(&self) -> u32 {
        0
    }
}

/// Resolve the recovery phrase and the key pair at the currency's default path
pub(crate) fn derive_from_phrase(
    currency: Currency,
    seed_phrase: Option<&str>,
) -> Result<(Zeroizing<String>, KeyPair, String)> {
    let mnemonic = match seed_phrase {
        Some(phrase) => normalize_phrase(phrase),
        None => generate_mnemonic(MnemonicStrength::Words12)
            .map_err(|e| Error::key_derivation(currency, e))?,
    };

    let seed = mnemonic_to_seed(&mnemonic, None).map_err(|e| Error::key_derivation(currency, e))?;
    let path = currency.derivation_path();
    let key_pair = derive_key_pair(&seed, &path).map_err(|e| Error::key_derivation(currency, e))?;

    Ok((mnemonic, key_pair, path))
}

/// Reject a fee policy that belongs to another chain family
pub(crate) fn ensure_fee_policy(currency: Currency, fee_policy: &FeePolicy) -> Result<()> {
    match fee_policy.family() {
        Some(family) if family != currency.family() => Err(Error::unsupported(
            currency,
            format!("fee policy {:?} does not apply to {:?} chains", fee_policy, currency.family()),
        )),
        _ => Ok(()),
    }
}

/// Reject a request built by another chain family
pub(crate) fn ensure_request_family(currency: Currency, request: &TransactionRequest) -> Result<()> {
    if request.family() != currency.family() {
        return Err(Error::signing(
            currency,
            request.from(),
            format!("cannot sign a {:?} request", request.family()),
        ));
    }
    Ok(())
}

/// The node's refusal message, when the RPC error is a refusal rather than a transport failure
pub(crate) fn rejection_message(err: &anyhow::Error) -> Option<String> {
    err.downcast_ref::<NodeRejection>().map(|rejection| rejection.0.clone())
}
