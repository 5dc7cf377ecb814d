//! AES-256-GCM records: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use super::EncryptionKey;
use crate::errors::{Result, VeilError};
use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use rand::Rng as _;
use zeroize::Zeroizing;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const MIN_RECORD_LEN: usize = NONCE_LEN + TAG_LEN;

pub fn fill_random(buf: &mut [u8]) {
    let mut rng = rand::rng();
    rng.fill_bytes(buf);
}

fn cipher_for(key: &EncryptionKey) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.expose_secret())
        .map_err(|e| VeilError::Configuration(format!("aes init: {e}")))
}

/// Encrypt with a fresh random nonce. Two calls on the same input never produce the same record.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let mut nonce = [0_u8; NONCE_LEN];
    fill_random(&mut nonce);
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| VeilError::Storage(format!("aes encrypt: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Authenticate and decrypt a record. Any failure, including a short record, is `Decrypt`.
pub fn decrypt(key: &EncryptionKey, record: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if record.len() < MIN_RECORD_LEN {
        return Err(VeilError::Decrypt);
    }
    let (nonce, ct) = record.split_at(NONCE_LEN);
    let cipher = cipher_for(key)?;
    let pt = cipher
        .decrypt(Nonce::from_slice(nonce), ct)
        .map_err(|_e| VeilError::Decrypt)?;
    Ok(Zeroizing::new(pt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_gcm_roundtrip() -> eyre::Result<()> {
        let key = EncryptionKey::from_bytes([7_u8; 32]);
        let rec = encrypt(&key, b"test plaintext")?;
        assert_eq!(rec.len(), MIN_RECORD_LEN + b"test plaintext".len());
        let out = decrypt(&key, &rec)?;
        assert_eq!(out.as_slice(), b"test plaintext");
        Ok(())
    }

    #[test]
    fn empty_plaintext_roundtrips() -> eyre::Result<()> {
        let key = EncryptionKey::from_bytes([1_u8; 32]);
        let rec = encrypt(&key, b"")?;
        assert_eq!(rec.len(), MIN_RECORD_LEN);
        assert!(decrypt(&key, &rec)?.is_empty());
        Ok(())
    }

    #[test]
    fn nonces_are_fresh() -> eyre::Result<()> {
        let key = EncryptionKey::from_bytes([7_u8; 32]);
        let a = encrypt(&key, b"same")?;
        let b = encrypt(&key, b"same")?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn wrong_key_fails_closed() -> eyre::Result<()> {
        let key = EncryptionKey::from_bytes([7_u8; 32]);
        let rec = encrypt(&key, b"test plaintext")?;
        let wrong = EncryptionKey::from_bytes([8_u8; 32]);
        assert_eq!(decrypt(&wrong, &rec).err(), Some(VeilError::Decrypt));
        Ok(())
    }

    #[test]
    fn tampered_record_fails_closed() -> eyre::Result<()> {
        let key = EncryptionKey::from_bytes([7_u8; 32]);
        let mut rec = encrypt(&key, b"test plaintext")?;
        if let Some(b) = rec.last_mut() {
            *b ^= 0x01;
        }
        assert_eq!(decrypt(&key, &rec).err(), Some(VeilError::Decrypt));
        Ok(())
    }

    #[test]
    fn truncated_record_fails_closed() {
        let key = EncryptionKey::from_bytes([7_u8; 32]);
        assert_eq!(decrypt(&key, &[0_u8; 27]).err(), Some(VeilError::Decrypt));
        assert_eq!(decrypt(&key, &[]).err(), Some(VeilError::Decrypt));
    }
}
