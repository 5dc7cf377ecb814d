use crate::errors::{Result, VeilError};
use crate::fsutil;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const MAX_KEY_LEN: usize = 128;

/// Durable string-keyed byte store underneath [`super::EncryptedStore`].
///
/// Writes to one key are linearizable with reads of that key. Nothing is promised across keys.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;
}

pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(VeilError::Format(format!(
            "record key must be 1-{MAX_KEY_LEN} characters"
        )));
    }
    if key.starts_with(fsutil::TMP_PREFIX) {
        return Err(VeilError::Format("record key must not start with '.'".into()));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(VeilError::Format(format!("invalid record key: {key:?}")));
    }
    Ok(())
}

/// One file per record inside a private directory.
#[derive(Debug, Clone)]
pub struct FileKv {
    dir: PathBuf,
}

impl FileKv {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fsutil::ensure_private_dir(&dir).map_err(|e| VeilError::storage("open store", e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl KvBackend for FileKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let p = self.path_for(key)?;
        match tokio::fs::read(&p).await {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VeilError::storage(&format!("read {key}"), e)),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let p = self.path_for(key)?;
        let bytes = value.to_vec();
        tokio::task::spawn_blocking(move || {
            fsutil::write_atomic_restrictive(&p, &bytes, fsutil::MODE_FILE_PRIVATE)
        })
        .await
        .map_err(|e| VeilError::storage("write task", e))?
        .map_err(|e| VeilError::storage(&format!("write {key}"), e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let p = self.path_for(key)?;
        tokio::task::spawn_blocking(move || fsutil::remove_if_exists(&p))
            .await
            .map_err(|e| VeilError::storage("delete task", e))?
            .map_err(|e| VeilError::storage(&format!("delete {key}"), e))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut rd = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VeilError::storage("list store", e)),
        };
        let mut out = Vec::new();
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| VeilError::storage("list store", e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map_err(|e| VeilError::storage("list store", e))?
                .is_file();
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_key(name).is_ok() {
                    out.push(name.to_owned());
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

/// In-process store. Contents vanish with the value.
#[derive(Debug, Default)]
pub struct MemoryKv {
    inner: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.inner
            .lock()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.inner.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().await.keys().cloned().collect())
    }
}
