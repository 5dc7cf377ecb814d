//! Encrypted and public records over a [`KvBackend`].
//!
//! Encrypted and public records share one namespace; which is which is decided by the record key
//! the caller uses. Public records must only hold values that are needed before unlock.

pub mod backend;

pub use backend::{FileKv, KvBackend, MemoryKv};

use crate::errors::{Result, VeilError};
use crate::keys::{cipher, EncryptionKey};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use zeroize::Zeroizing;

pub const WALLET_SECRETS: &str = "wallet-secrets";
pub const WALLET_STATE: &str = "wallet-state";
pub const WALLET_ID: &str = "wallet-id";
pub const ENGINE_ENC_KEY: &str = "railgun-enc-key";
pub const WALLET_EXISTS: &str = "wallet-exists";

#[derive(Clone)]
pub struct EncryptedStore {
    kv: Arc<dyn KvBackend>,
}

impl std::fmt::Debug for EncryptedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedStore").finish_non_exhaustive()
    }
}

impl EncryptedStore {
    pub fn new(kv: Arc<dyn KvBackend>) -> Self {
        Self { kv }
    }

    pub async fn set_encrypted(&self, key: &str, bytes: &[u8], enc: &EncryptionKey) -> Result<()> {
        let record = cipher::encrypt(enc, bytes)?;
        self.kv.put(key, &record).await
    }

    pub async fn get_encrypted(
        &self,
        key: &str,
        enc: &EncryptionKey,
    ) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match self.kv.get(key).await? {
            None => Ok(None),
            Some(record) => cipher::decrypt(enc, &record).map(Some),
        }
    }

    pub async fn set_encrypted_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        enc: &EncryptionKey,
    ) -> Result<()> {
        let json = Zeroizing::new(
            serde_json::to_vec(value)
                .map_err(|e| VeilError::Format(format!("encode {key}: {e}")))?,
        );
        self.set_encrypted(key, &json, enc).await
    }

    /// A record that authenticates but does not parse is `Corruption`: the key was right.
    pub async fn get_encrypted_json<T: DeserializeOwned>(
        &self,
        key: &str,
        enc: &EncryptionKey,
    ) -> Result<Option<T>> {
        let Some(pt) = self.get_encrypted(key, enc).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&pt)
            .map(Some)
            .map_err(|e| VeilError::Corruption(format!("{key}: {e}")))
    }

    pub async fn set_public<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_vec(value)
            .map_err(|e| VeilError::Format(format!("encode {key}: {e}")))?;
        self.kv.put(key, &json).await
    }

    pub async fn get_public<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| VeilError::Corruption(format!("{key}: {e}")))
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.kv.delete(key).await
    }

    pub async fn list_keys(&self) -> Result<Vec<String>> {
        self.kv.keys().await
    }

    /// Delete every record. Each deletion stands alone, so an interrupted wipe leaves only
    /// missing records. Keeps going past failures and reports the first one.
    pub async fn clear_all(&self) -> Result<()> {
        let keys = self.kv.keys().await?;
        let mut first_err = None;
        for key in &keys {
            if let Err(e) = self.kv.delete(key).await {
                tracing::warn!(key = %key, error = %e, "failed to delete record");
                first_err.get_or_insert(e);
            }
        }
        tracing::info!(count = keys.len(), "cleared record store");
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;

    fn store() -> EncryptedStore {
        EncryptedStore::new(Arc::new(MemoryKv::new()))
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Rec {
        a: u32,
        b: String,
    }

    #[tokio::test]
    async fn encrypted_json_roundtrip() -> eyre::Result<()> {
        let s = store();
        let k = EncryptionKey::from_bytes([4_u8; 32]);
        let v = Rec {
            a: 7,
            b: "x".into(),
        };
        s.set_encrypted_json("rec", &v, &k).await?;
        let back: Option<Rec> = s.get_encrypted_json("rec", &k).await?;
        assert_eq!(back, Some(v));

        let missing: Option<Rec> = s.get_encrypted_json("other", &k).await?;
        assert_eq!(missing, None);
        Ok(())
    }

    #[tokio::test]
    async fn encrypted_record_is_not_plaintext() -> eyre::Result<()> {
        let kv = Arc::new(MemoryKv::new());
        let s = EncryptedStore::new(Arc::clone(&kv) as Arc<dyn KvBackend>);
        let k = EncryptionKey::from_bytes([4_u8; 32]);
        s.set_encrypted("rec", b"super secret words", &k).await?;
        let raw = kv.get("rec").await?.unwrap_or_default();
        assert!(!raw.windows(6).any(|w| w == b"secret"));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_key_is_decrypt_error() -> eyre::Result<()> {
        let s = store();
        s.set_encrypted("rec", b"payload", &EncryptionKey::from_bytes([1_u8; 32]))
            .await?;
        let got = s
            .get_encrypted("rec", &EncryptionKey::from_bytes([2_u8; 32]))
            .await;
        assert_eq!(got.err(), Some(VeilError::Decrypt));
        Ok(())
    }

    #[tokio::test]
    async fn public_records_roundtrip() -> eyre::Result<()> {
        let s = store();
        s.set_public(WALLET_EXISTS, &true).await?;
        s.set_public(WALLET_ID, &"w-1").await?;
        assert_eq!(s.get_public::<bool>(WALLET_EXISTS).await?, Some(true));
        assert_eq!(
            s.get_public::<String>(WALLET_ID).await?,
            Some("w-1".to_owned())
        );
        s.remove(WALLET_ID).await?;
        assert_eq!(s.get_public::<String>(WALLET_ID).await?, None);
        Ok(())
    }

    struct FlakyDelete {
        inner: MemoryKv,
        poisoned: &'static str,
    }

    #[async_trait]
    impl KvBackend for FlakyDelete {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
            self.inner.put(key, value).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            if key == self.poisoned {
                return Err(VeilError::Storage("disk on fire".into()));
            }
            self.inner.delete(key).await
        }
        async fn keys(&self) -> Result<Vec<String>> {
            self.inner.keys().await
        }
    }

    #[tokio::test]
    async fn clear_all_continues_past_failures() -> eyre::Result<()> {
        let kv = Arc::new(FlakyDelete {
            inner: MemoryKv::new(),
            poisoned: "b",
        });
        let s = EncryptedStore::new(Arc::clone(&kv) as Arc<dyn KvBackend>);
        for key in ["a", "b", "c"] {
            s.set_public(key, &1_u8).await?;
        }
        let err = s.clear_all().await.err();
        assert!(matches!(err, Some(VeilError::Storage(_))));
        assert_eq!(s.list_keys().await?, vec!["b".to_owned()]);
        Ok(())
    }
}
