//! Tron address encoding

use secp256k1::PublicKey;

use crate::crypto::{KeyError, KeyResult};
use super::ethereum::account_id;

/// Mainnet address prefix byte
pub const ADDRESS_PREFIX: u8 = 0x41;

/// Base58Check address (`T...`) of a public key
pub fn public_key_to_address(public_key: &PublicKey) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(ADDRESS_PREFIX);
    payload.extend_from_slice(&account_id(public_key));
    bs58::encode(payload).with_check().into_string()
}

/// Validate a Base58Check address and return its 21-byte payload
pub fn parse_address(address: &str) -> KeyResult<[u8; 21]> {
    let payload = bs58::decode(address)
        .with_check(Some(ADDRESS_PREFIX))
        .into_vec()
        .map_err(|e| KeyError::Address(e.to_string()))?;
    payload
        .try_into()
        .map_err(|payload: Vec<u8>| KeyError::Address(format!("unexpected payload length {}", payload.len())))
}
