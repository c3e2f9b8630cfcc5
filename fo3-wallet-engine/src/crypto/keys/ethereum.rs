//! EVM address encoding (Ethereum, BSC, Polygon)

use std::str::FromStr;

use ethers_core::types::Address;
use ethers_core::utils::to_checksum;
use secp256k1::PublicKey;
use sha3::{Digest, Keccak256};

use crate::crypto::{KeyError, KeyResult};

/// Calculate the Keccak-256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// The 20-byte account id shared by EVM and Tron addresses
pub fn account_id(public_key: &PublicKey) -> [u8; 20] {
    // Skip the 0x04 prefix of the uncompressed encoding
    let key_hash = keccak256(&public_key.serialize_uncompressed()[1..]);
    let mut id = [0u8; 20];
    id.copy_from_slice(&key_hash[12..]);
    id
}

/// EIP-55 checksummed address of a public key
pub fn public_key_to_address(public_key: &PublicKey) -> String {
    to_checksum(&Address::from(account_id(public_key)), None)
}

/// Parse an address, enforcing the EIP-55 checksum when the input is mixed case
pub fn parse_address(address: &str) -> KeyResult<Address> {
    let hex_part = address
        .strip_prefix("0x")
        .ok_or_else(|| KeyError::Address("missing 0x prefix".to_string()))?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(KeyError::Address("expected 20 hex-encoded bytes".to_string()));
    }

    let parsed = Address::from_str(address).map_err(|e| KeyError::Address(e.to_string()))?;

    let is_mixed_case = hex_part.chars().any(|c| c.is_ascii_lowercase())
        && hex_part.chars().any(|c| c.is_ascii_uppercase());
    if is_mixed_case && to_checksum(&parsed, None) != address {
        return Err(KeyError::Address("checksum mismatch".to_string()));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;

    #[test]
    fn test_address_from_known_key() {
        let key_pair = KeyPair::from_hex("4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318").unwrap();
        assert_eq!(
            public_key_to_address(key_pair.public_key()),
            "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23"
        );
    }

    #[test]
    fn test_parse_address() {
        assert!(parse_address("0x2c7536E3605D9C16a7a3D7b1898e529396a65c23").is_ok());
        assert!(parse_address("0x2c7536e3605d9c16a7a3d7b1898e529396a65c23").is_ok());
        // one flipped letter case breaks the checksum
        assert!(parse_address("0x2C7536E3605D9C16a7a3D7b1898e529396a65c23").is_err());
        assert!(parse_address("2c7536E3605D9C16a7a3D7b1898e529396a65c23").is_err());
        assert!(parse_address("0x1234").is_err());
    }
}
