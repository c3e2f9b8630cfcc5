//! Bitcoin-family address and key encoding (Bitcoin, Litecoin)

use bitcoin::hashes::{hash160, Hash};
use bitcoin::{PubkeyHash, ScriptBuf, ScriptHash};
use secp256k1::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{KeyError, KeyResult};
use super::derivation::KeyPair;

/// Mainnet encoding parameters of a Bitcoin-family chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UtxoNetwork {
    Bitcoin,
    Litecoin,
}

impl UtxoNetwork {
    /// Base58 version byte of pay-to-pubkey-hash addresses
    pub fn p2pkh_version(&self) -> u8 {
        match self {
            Self::Bitcoin => 0x00,
            Self::Litecoin => 0x30,
        }
    }

    /// Base58 version bytes accepted for pay-to-script-hash addresses
    pub fn p2sh_versions(&self) -> &'static [u8] {
        match self {
            Self::Bitcoin => &[0x05],
            // 0x05 is the legacy "3..." form still accepted by Litecoin wallets
            Self::Litecoin => &[0x32, 0x05],
        }
    }

    /// Human readable part of native segwit addresses
    pub fn bech32_hrp(&self) -> &'static str {
        match self {
            Self::Bitcoin => "bc",
            Self::Litecoin => "ltc",
        }
    }

    /// WIF private key prefix
    pub fn wif_prefix(&self) -> u8 {
        match self {
            Self::Bitcoin => 0x80,
            Self::Litecoin => 0xb0,
        }
    }
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

/// P2PKH address of a compressed public key
pub fn public_key_to_address(public_key: &PublicKey, network: UtxoNetwork) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(network.p2pkh_version());
    payload.extend_from_slice(&hash160(&public_key.serialize()));
    bs58::encode(payload).with_check().into_string()
}

/// Locking script of the P2PKH output owned by a public key
pub fn p2pkh_script(public_key: &PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash160(&public_key.serialize())))
}

/// Decode any standard address of the network into its locking script
///
/// Accepts P2PKH and P2SH Base58Check addresses and native segwit bech32
/// addresses.
pub fn address_to_script(address: &str, network: UtxoNetwork) -> KeyResult<ScriptBuf> {
    let lower = address.to_ascii_lowercase();
    if lower.starts_with(&format!("{}1", network.bech32_hrp())) {
        return segwit_script(address, network);
    }

    let payload = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| KeyError::Address(e.to_string()))?;
    if payload.len() != 21 {
        return Err(KeyError::Address(format!("unexpected payload length {}", payload.len())));
    }

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    let version = payload[0];

    if version == network.p2pkh_version() {
        Ok(ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash)))
    } else if network.p2sh_versions().contains(&version) {
        Ok(ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash)))
    } else {
        Err(KeyError::Address(format!("version byte 0x{:02x} belongs to another network", version)))
    }
}

fn segwit_script(address: &str, network: UtxoNetwork) -> KeyResult<ScriptBuf> {
    let (hrp, version, program) = bech32::segwit::decode(address)
        .map_err(|e| KeyError::Address(e.to_string()))?;
    if !hrp.as_str().eq_ignore_ascii_case(network.bech32_hrp()) {
        return Err(KeyError::Address(format!("prefix {} belongs to another network", hrp)));
    }

    let version = version.to_u8();
    let mut script = Vec::with_capacity(program.len() + 2);
    // OP_0, or OP_1..OP_16
    script.push(if version == 0 { 0x00 } else { 0x50 + version });
    script.push(program.len() as u8);
    script.extend_from_slice(&program);
    Ok(ScriptBuf::from_bytes(script))
}

/// Export a secret key in compressed WIF form
pub fn to_wif(key_pair: &KeyPair, network: UtxoNetwork) -> Zeroizing<String> {
    let mut payload = Zeroizing::new(Vec::with_capacity(34));
    payload.push(network.wif_prefix());
    payload.extend_from_slice(&key_pair.secret_key().secret_bytes());
    payload.push(0x01);
    Zeroizing::new(bs58::encode(payload.as_slice()).with_check().into_string())
}

/// Import a compressed WIF secret key for the given network
pub fn from_wif(wif: &str, network: UtxoNetwork) -> KeyResult<KeyPair> {
    let payload = Zeroizing::new(
        bs58::decode(wif.trim())
            .with_check(Some(network.wif_prefix()))
            .into_vec()
            .map_err(|e| KeyError::PrivateKey(format!("invalid WIF: {}", e)))?,
    );
    match payload.len() {
        34 if payload[33] == 0x01 => {}
        33 => return Err(KeyError::PrivateKey("uncompressed WIF keys are not supported".to_string())),
        n => return Err(KeyError::PrivateKey(format!("unexpected WIF length {}", n))),
    }
    let secret_key = SecretKey::from_slice(&payload[1..33])
        .map_err(|e| KeyError::PrivateKey(e.to_string()))?;
    Ok(KeyPair::from_secret_key(secret_key))
}

/// Parse a private key given either as WIF or as hex
pub fn parse_private_key(private_key: &str, network: UtxoNetwork) -> KeyResult<KeyPair> {
    let trimmed = private_key.trim();
    let is_hex = trimmed.len() == 64 || trimmed.starts_with("0x");
    if is_hex {
        KeyPair::from_hex(trimmed)
    } else {
        from_wif(trimmed, network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0c28fca386c7a227600b2fe50b7cae11ec86d3bf1fbe471be89827e19d72aa1d";

    #[test]
    fn test_wif_round_trip() {
        let key_pair = KeyPair::from_hex(SECRET).unwrap();
        let wif = to_wif(&key_pair, UtxoNetwork::Bitcoin);
        assert_eq!(wif.as_str(), "KwdMAjGmerYanjeui5SHS7JkmpZvVipYvB2LJGU1ZxJwYvP98617");

        let restored = from_wif(&wif, UtxoNetwork::Bitcoin).unwrap();
        assert_eq!(restored.compressed_public_hex(), key_pair.compressed_public_hex());
        assert!(from_wif(&wif, UtxoNetwork::Litecoin).is_err());
    }

    #[test]
    fn test_address_versions() {
        let key_pair = KeyPair::from_hex(SECRET).unwrap();
        let btc = public_key_to_address(key_pair.public_key(), UtxoNetwork::Bitcoin);
        let ltc = public_key_to_address(key_pair.public_key(), UtxoNetwork::Litecoin);
        assert!(btc.starts_with('1'));
        assert!(ltc.starts_with('L'));
        assert_eq!(address_to_script(&btc, UtxoNetwork::Bitcoin).unwrap(), p2pkh_script(key_pair.public_key()));
        assert_eq!(address_to_script(&ltc, UtxoNetwork::Litecoin).unwrap(), p2pkh_script(key_pair.public_key()));
    }

    #[test]
    fn test_cross_network_address_is_rejected() {
        let key_pair = KeyPair::from_hex(SECRET).unwrap();
        let ltc = public_key_to_address(key_pair.public_key(), UtxoNetwork::Litecoin);
        assert!(address_to_script(&ltc, UtxoNetwork::Bitcoin).is_err());
        assert!(address_to_script("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", UtxoNetwork::Litecoin).is_err());
    }

    #[test]
    fn test_segwit_and_p2sh_destinations() {
        let script = address_to_script("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", UtxoNetwork::Bitcoin).unwrap();
        assert_eq!(hex::encode(script.as_bytes()), "0014751e76e8199196d454941c45d1b3a323f1433bd6");

        let script = address_to_script("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy", UtxoNetwork::Bitcoin).unwrap();
        assert!(script.is_p2sh());
    }
}
