//! BIP-39 recovery phrases
//!
//! Phrases are English, 12 or 24 words. Whitespace is normalized before
//! parsing so a phrase pasted across lines restores the same wallet.

use bip39::Mnemonic;
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use super::{KeyError, KeyResult};

/// Phrase length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MnemonicStrength {
    /// 12 words (128 bits)
    Words12,
    /// 24 words (256 bits)
    Words24,
}

impl MnemonicStrength {
    fn entropy_bytes(&self) -> usize {
        match self {
            Self::Words12 => 16,
            Self::Words24 => 32,
        }
    }

    pub fn word_count(&self) -> usize {
        self.entropy_bytes() * 3 / 4
    }
}

/// Collapse runs of whitespace into single spaces
pub fn normalize_phrase(phrase: &str) -> Zeroizing<String> {
    Zeroizing::new(phrase.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// A fresh phrase from OS randomness
pub fn generate_mnemonic(strength: MnemonicStrength) -> KeyResult<Zeroizing<String>> {
    let mut entropy = Zeroizing::new(vec![0u8; strength.entropy_bytes()]);
    OsRng.fill_bytes(&mut entropy);

    let mnemonic = Mnemonic::from_entropy(&entropy).map_err(|e| KeyError::Mnemonic(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

fn parse(phrase: &str) -> KeyResult<Mnemonic> {
    let normalized = normalize_phrase(phrase);
    let word_count = normalized.split(' ').count();
    if word_count != MnemonicStrength::Words12.word_count() && word_count != MnemonicStrength::Words24.word_count() {
        return Err(KeyError::Mnemonic(format!("expected 12 or 24 words, got {}", word_count)));
    }
    Mnemonic::parse_normalized(&normalized).map_err(|e| KeyError::Mnemonic(e.to_string()))
}

/// Check word count, wordlist membership and checksum
pub fn validate_mnemonic(phrase: &str) -> KeyResult<()> {
    parse(phrase).map(|_| ())
}

/// 64-byte BIP-39 seed, with an optional passphrase
pub fn mnemonic_to_seed(phrase: &str, passphrase: Option<&str>) -> KeyResult<Zeroizing<Vec<u8>>> {
    let seed = parse(phrase)?.to_seed(passphrase.unwrap_or(""));
    Ok(Zeroizing::new(seed.to_vec()))
}
