pub mod lifecycle;
pub mod viewkey;

pub use lifecycle::{LifecycleSnapshot, LifecycleState, WalletLifecycle};
pub use viewkey::{generate_view_key, ViewKey, ViewKeyType};

use crate::chain::{PrivacyAddress, SupportedChain};
use crate::errors::{Result, VeilError};
use crate::keys::{EngineEncryptionKey, MnemonicEntropy, OwnerKeyBytes};
use alloy::signers::local::PrivateKeySigner;
use bip39::{Language, Mnemonic};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const MNEMONIC_WORDS: usize = 12;

/// Everything needed to resume a session without touching mnemonic material again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletIdentity {
    pub smart_wallet_address: String,
    #[serde(rename = "railgunAddress")]
    pub privacy_address: PrivacyAddress,
    pub wallet_id: String,
    #[serde(rename = "railgunEncryptionKey")]
    pub engine_encryption_key: EngineEncryptionKey,
    pub chain: SupportedChain,
}

/// Decrypted contents of the `wallet-secrets` record. Lives only for the unlock that read it.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct WalletSecrets {
    pub mnemonic: String,
    pub owner_key_hex: String,
    pub smart_wallet_address: String,
    pub railgun_address: String,
}

impl fmt::Debug for WalletSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSecrets")
            .field("mnemonic", &"[REDACTED]")
            .field("owner_key_hex", &"[REDACTED]")
            .field("smart_wallet_address", &self.smart_wallet_address)
            .field("railgun_address", &self.railgun_address)
            .finish()
    }
}

/// Contents of the `wallet-state` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    pub smart_wallet_address: String,
    pub railgun_address: String,
    pub chain: SupportedChain,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

pub fn mnemonic_from_entropy(entropy: &MnemonicEntropy) -> Result<Zeroizing<String>> {
    let m = Mnemonic::from_entropy_in(Language::English, entropy.expose_secret())
        .map_err(|e| VeilError::Derivation(format!("mnemonic from entropy: {e}")))?;
    Ok(Zeroizing::new(m.to_string()))
}

/// Collapse runs of whitespace and require exactly twelve words.
pub fn normalize_mnemonic(phrase: &str) -> Result<Zeroizing<String>> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.len() != MNEMONIC_WORDS {
        return Err(VeilError::Format(format!(
            "mnemonic must be exactly {MNEMONIC_WORDS} words, got {}",
            words.len()
        )));
    }
    Ok(Zeroizing::new(words.join(" ")))
}

/// EIP-55 address of the secp256k1 account whose secret key is `key`.
pub fn owner_account_address(key: &OwnerKeyBytes) -> Result<String> {
    let signer = PrivateKeySigner::from_slice(key.expose_secret())
        .map_err(|e| VeilError::Derivation(format!("owner key: {e}")))?;
    Ok(signer.address().to_checksum(None))
}

pub(crate) fn owner_key_hex(key: &OwnerKeyBytes) -> Zeroizing<String> {
    Zeroizing::new(format!("0x{}", hex::encode(key.expose_secret())))
}
