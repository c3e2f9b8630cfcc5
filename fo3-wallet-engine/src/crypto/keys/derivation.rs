//! BIP-32 derivation shared by every secp256k1 chain

use hmac::{Hmac, Mac};
use hmac::digest::KeyInit;
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::crypto::{KeyError, KeyResult};

const HARDENED: u32 = 0x8000_0000;

/// A secp256k1 key pair
#[derive(Clone)]
pub struct KeyPair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Build a key pair from a secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self { secret_key, public_key }
    }

    /// Parse a hex private key, with or without a `0x` prefix
    pub fn from_hex(private_key: &str) -> KeyResult<Self> {
        let trimmed = private_key.trim();
        let bytes = Zeroizing::new(
            hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
                .map_err(|e| KeyError::PrivateKey(e.to_string()))?,
        );
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| KeyError::PrivateKey(e.to_string()))?;
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Lower-case hex of the 32 secret bytes
    pub fn secret_hex(&self) -> Zeroizing<String> {
        let bytes = Zeroizing::new(self.secret_key.secret_bytes());
        Zeroizing::new(hex::encode(bytes.as_slice()))
    }

    /// Hex of the 33-byte compressed public key
    pub fn compressed_public_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Hex of the 65-byte uncompressed public key
    pub fn uncompressed_public_hex(&self) -> String {
        hex::encode(self.public_key.serialize_uncompressed())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.compressed_public_hex())
            .finish_non_exhaustive()
    }
}

/// Derive a key pair from a seed along a BIP-32 path such as `m/44'/60'/0'/0/0`
pub fn derive_key_pair(seed: &[u8], path: &str) -> KeyResult<KeyPair> {
    let path_components = parse_derivation_path(path)?;

    let (mut secret_key, mut chain_code) = derive_master_key(seed)?;

    for component in path_components {
        (secret_key, chain_code) = derive_child_key(&secret_key, &chain_code, component)?;
    }

    let secret_key = SecretKey::from_slice(secret_key.as_slice())
        .map_err(|e| KeyError::Derivation(format!("Invalid secret key: {}", e)))?;

    Ok(KeyPair::from_secret_key(secret_key))
}

/// Parse a BIP-32 derivation path
pub fn parse_derivation_path(path: &str) -> KeyResult<Vec<u32>> {
    if !path.starts_with("m/") {
        return Err(KeyError::Derivation(format!("Invalid derivation path: {}", path)));
    }

    let mut result = Vec::new();

    for component in path.trim_start_matches("m/").split('/') {
        if component.is_empty() {
            continue;
        }

        let hardened = component.ends_with('\'') || component.ends_with('h');
        let digits = component.trim_end_matches(|c: char| c == '\'' || c == 'h');
        let index = digits.parse::<u32>()
            .ok()
            .filter(|index| *index < HARDENED)
            .ok_or_else(|| KeyError::Derivation(format!("Invalid derivation path component: {}", component)))?;

        result.push(if hardened { HARDENED + index } else { index });
    }

    Ok(result)
}

type KeyBytes = Zeroizing<[u8; 32]>;

/// Derive the master key from a seed
fn derive_master_key(seed: &[u8]) -> KeyResult<(KeyBytes, [u8; 32])> {
    let mut hmac = <Hmac<Sha512> as KeyInit>::new_from_slice(b"Bitcoin seed")
        .map_err(|_| KeyError::Derivation("HMAC error".to_string()))?;

    hmac.update(seed);
    let result = hmac.finalize().into_bytes();

    let mut secret_key = Zeroizing::new([0u8; 32]);
    let mut chain_code = [0u8; 32];

    secret_key.copy_from_slice(&result[0..32]);
    chain_code.copy_from_slice(&result[32..64]);

    Ok((secret_key, chain_code))
}

/// Derive a child key from a parent key
fn derive_child_key(parent_key: &KeyBytes, parent_chain_code: &[u8; 32], index: u32) -> KeyResult<(KeyBytes, [u8; 32])> {
    let secp = Secp256k1::signing_only();
    let parent_secret_key = SecretKey::from_slice(parent_key.as_slice())
        .map_err(|e| KeyError::Derivation(format!("Invalid parent key: {}", e)))?;

    let mut data = Zeroizing::new(Vec::with_capacity(37));

    if index >= HARDENED {
        data.push(0);
        data.extend_from_slice(parent_key.as_slice());
    } else {
        let parent_public_key = PublicKey::from_secret_key(&secp, &parent_secret_key);
        data.extend_from_slice(&parent_public_key.serialize());
    }

    data.extend_from_slice(&index.to_be_bytes());

    let mut hmac = <Hmac<Sha512> as KeyInit>::new_from_slice(parent_chain_code)
        .map_err(|_| KeyError::Derivation("HMAC error".to_string()))?;

    hmac.update(&data);
    let result = hmac.finalize().into_bytes();

    let mut child_chain_code = [0u8; 32];
    child_chain_code.copy_from_slice(&result[32..64]);

    // child = IL + parent (mod n)
    let tweak = SecretKey::from_slice(&result[0..32])
        .map_err(|e| KeyError::Derivation(format!("Invalid child key: {}", e)))?;
    let child_secret_key = tweak.add_tweak(&Scalar::from(parent_secret_key))
        .map_err(|e| KeyError::Derivation(format!("Key addition error: {}", e)))?;

    Ok((Zeroizing::new(child_secret_key.secret_bytes()), child_chain_code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_derivation_path() {
        assert_eq!(
            parse_derivation_path("m/44'/60'/0'/0/1").unwrap(),
            vec![HARDENED + 44, HARDENED + 60, HARDENED, 0, 1]
        );
        assert_eq!(parse_derivation_path("m/44h/0h").unwrap(), vec![HARDENED + 44, HARDENED]);
        assert!(parse_derivation_path("44'/60'").is_err());
        assert!(parse_derivation_path("m/abc").is_err());
        assert!(parse_derivation_path("m/2147483648").is_err());
    }

    #[test]
    fn test_bip32_vector_one_master() {
        // BIP-32 test vector 1, chain m/0'
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let key_pair = derive_key_pair(&seed, "m/0'").unwrap();
        assert_eq!(
            key_pair.compressed_public_hex(),
            "035a784662a4a20a65bf6aab9ae98a6c068a81c52e4b032c0fb5400c706cfccc56"
        );
    }

    #[test]
    fn test_from_hex_accepts_prefix() {
        let plain = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
        let a = KeyPair::from_hex(plain).unwrap();
        let b = KeyPair::from_hex(&format!("0x{}", plain)).unwrap();
        assert_eq!(a.compressed_public_hex(), b.compressed_public_hex());
        assert_eq!(a.secret_hex().as_str(), plain);
        assert!(KeyPair::from_hex("not-hex").is_err());
        assert!(KeyPair::from_hex("00").is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let key_pair = KeyPair::from_hex("4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318").unwrap();
        let rendered = format!("{:?}", key_pair);
        assert!(!rendered.contains("4c0883a6"));
    }
}
