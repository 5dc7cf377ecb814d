//! Secret material of the key hierarchy.
//!
//! ```text
//! AuthSecret ──PBKDF2──▶ MasterSeed ──HKDF──┬─▶ EncryptionKey        (local store)
//!                                           ├─▶ EngineEncryptionKey  (engine database)
//!                                           ├─▶ OwnerKeyBytes        (secp256k1 account)
//!                                           └─▶ MnemonicEntropy      (12-word phrase)
//! ```
//!
//! Every type here zeroizes its buffer on drop, so a seed or key is released on every exit path
//! of the function that owns it, including early returns through `?`.

pub mod cipher;
pub mod derive;

use secrecy::{ExposeSecret as _, SecretSlice, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use derive::{
    derive_encryption_key, derive_engine_encryption_key, derive_master_seed,
    derive_mnemonic_entropy, derive_owner_key_bytes, KdfParams, PBKDF2_ITERATIONS,
};

/// User-supplied credential bytes. Never persisted.
pub struct AuthSecret(SecretSlice<u8>);

impl AuthSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(SecretSlice::from(bytes))
    }

    pub fn from_password(password: &SecretString) -> Self {
        Self::new(password.expose_secret().as_bytes().to_vec())
    }

    pub(crate) fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl fmt::Debug for AuthSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthSecret([REDACTED])")
    }
}

/// 256-bit root of every sub-key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterSeed(pub(crate) [u8; 32]);

impl MasterSeed {
    pub const fn expose_secret(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for MasterSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSeed([REDACTED])")
    }
}

/// AES-256-GCM key for the local record store.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub(crate) [u8; 32]);

impl EncryptionKey {
    pub const fn expose_secret(&self) -> &[u8; 32] {
        &self.0
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Lowercase hex key handed to the privacy engine for its internal database.
///
/// It is also kept as a public record so the engine can be reattached before unlock.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct EngineEncryptionKey(String);

impl EngineEncryptionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }
}

impl fmt::Debug for EngineEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EngineEncryptionKey([REDACTED])")
    }
}

/// Secret scalar of the public secp256k1 account.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct OwnerKeyBytes(pub(crate) [u8; 32]);

impl OwnerKeyBytes {
    pub const fn expose_secret(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for OwnerKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OwnerKeyBytes([REDACTED])")
    }
}

/// 128 bits of BIP-39 entropy (12 words).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MnemonicEntropy(pub(crate) [u8; 16]);

impl MnemonicEntropy {
    pub const fn expose_secret(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for MnemonicEntropy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MnemonicEntropy([REDACTED])")
    }
}

/// Overwrite a caller-owned buffer with zeros.
pub fn zeroize(buf: &mut [u8]) {
    buf.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let auth = AuthSecret::new(b"hunter2".to_vec());
        let seed = MasterSeed([9_u8; 32]);
        let rendered = format!("{auth:?} {seed:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains('9'));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn zeroize_clears_buffer() {
        let mut buf = vec![0xAA_u8; 24];
        zeroize(&mut buf);
        assert!(buf.iter().all(|b| *b == 0));
    }
}
