//! Create, import, unlock, lock and wipe.
//!
//! ```text
//! uninitialized ──create──▶ creating ──┐
//! uninitialized ──import──▶ importing ─┼──▶ active ──lock/wipe──▶ uninitialized
//! uninitialized ──unlock──▶ unlocking ─┘
//! ```
//!
//! Any transition can end in `errored`, which remembers the state it started from; the next
//! operation starts from there. A failed transition never exposes a partial identity.

use super::{
    mnemonic_from_entropy, normalize_mnemonic, owner_account_address, owner_key_hex,
    WalletIdentity, WalletSecrets, WalletState,
};
use crate::chain::{PrivacyAddress, SupportedChain};
use crate::engine::{EngineBootstrap, EngineWallet, PrivacyEngine};
use crate::errors::{ErrorReport, Result, VeilError};
use crate::keys::{
    derive_encryption_key, derive_engine_encryption_key, derive_master_seed,
    derive_mnemonic_entropy, derive_owner_key_bytes, AuthSecret, EncryptionKey,
    EngineEncryptionKey, KdfParams, MasterSeed,
};
use crate::store::{
    EncryptedStore, ENGINE_ENC_KEY, WALLET_EXISTS, WALLET_ID, WALLET_SECRETS, WALLET_STATE,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Creating,
    Importing,
    Unlocking,
    Active,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleSnapshot {
    pub state: LifecycleState,
    /// Set only while `active`.
    pub identity: Option<WalletIdentity>,
    /// Set only while `errored`.
    pub last_error: Option<ErrorReport>,
    /// State the failed transition started from.
    pub prior_state: Option<LifecycleState>,
}

impl LifecycleSnapshot {
    const fn uninitialized() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            identity: None,
            last_error: None,
            prior_state: None,
        }
    }

    /// The state the next operation starts from.
    pub fn effective_state(&self) -> LifecycleState {
        match (self.state, self.prior_state) {
            (LifecycleState::Errored, Some(prior)) => prior,
            (LifecycleState::Errored, None) => LifecycleState::Uninitialized,
            (s, _) => s,
        }
    }
}

/// Publishes `errored` if a transition's future is dropped before it settles.
struct TransitionGuard<'a> {
    snapshot: &'a watch::Sender<LifecycleSnapshot>,
    prior: LifecycleState,
    armed: bool,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.snapshot.send_replace(LifecycleSnapshot {
            state: LifecycleState::Errored,
            identity: None,
            last_error: Some(VeilError::Cancelled.report()),
            prior_state: Some(self.prior),
        });
        tracing::warn!("wallet transition interrupted");
    }
}

struct Session {
    identity: WalletIdentity,
    // Held for the unlocked session only; dropped (and zeroized) on lock.
    _encryption_key: EncryptionKey,
}

pub struct WalletLifecycle {
    store: EncryptedStore,
    engine: Arc<EngineBootstrap>,
    kdf: KdfParams,
    op_lock: Mutex<()>,
    session: Mutex<Option<Session>>,
    snapshot: watch::Sender<LifecycleSnapshot>,
}

impl std::fmt::Debug for WalletLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletLifecycle")
            .field("state", &self.snapshot.borrow().state)
            .finish_non_exhaustive()
    }
}

fn creation_blocks() -> BTreeMap<String, u64> {
    BTreeMap::from([(SupportedChain::Polygon.engine_label().to_owned(), 0)])
}

impl WalletLifecycle {
    pub fn new(store: EncryptedStore, engine: Arc<EngineBootstrap>) -> Self {
        let (snapshot, _rx) = watch::channel(LifecycleSnapshot::uninitialized());
        Self {
            store,
            engine,
            kdf: KdfParams::default(),
            op_lock: Mutex::new(()),
            session: Mutex::new(None),
            snapshot,
        }
    }

    #[must_use]
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn store(&self) -> &EncryptedStore {
        &self.store
    }

    pub fn engine(&self) -> &Arc<EngineBootstrap> {
        &self.engine
    }

    /// Identity of the unlocked wallet, if any.
    pub async fn session(&self) -> Option<WalletIdentity> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.identity.clone())
    }

    pub(crate) async fn require_session(&self) -> Result<WalletIdentity> {
        self.session()
            .await
            .ok_or_else(|| VeilError::NotFound("no unlocked wallet".into()))
    }

    /// Reads only the public flag, so it works before any password is known.
    pub async fn check_wallet_exists(&self) -> Result<bool> {
        Ok(self.store.get_public::<bool>(WALLET_EXISTS).await? == Some(true))
    }

    /// Public wallet id, readable before unlock.
    pub async fn stored_wallet_id(&self) -> Result<Option<String>> {
        self.store.get_public(WALLET_ID).await
    }

    pub async fn create_wallet(
        &self,
        auth: &AuthSecret,
        chain: SupportedChain,
    ) -> Result<WalletIdentity> {
        self.transition(LifecycleState::Creating, async {
            self.engine.ready_engine()?;
            let seed = derive_master_seed(auth, None, self.kdf).await?;
            let entropy = derive_mnemonic_entropy(&seed)?;
            let phrase = mnemonic_from_entropy(&entropy)?;
            self.build_wallet(&seed, &phrase, chain).await
        })
        .await
    }

    /// Restores the privacy address of the phrase. The public account address follows the
    /// password, so a different password yields a different public address.
    pub async fn import_wallet(
        &self,
        auth: &AuthSecret,
        mnemonic: &str,
        chain: SupportedChain,
    ) -> Result<WalletIdentity> {
        self.transition(LifecycleState::Importing, async {
            let phrase = normalize_mnemonic(mnemonic)?;
            self.engine.ready_engine()?;
            let seed = derive_master_seed(auth, None, self.kdf).await?;
            self.build_wallet(&seed, &phrase, chain).await
        })
        .await
    }

    pub async fn load_wallet(&self, auth: &AuthSecret) -> Result<WalletIdentity> {
        self.transition(LifecycleState::Unlocking, async {
            let engine = self.engine.ready_engine()?;
            let seed = derive_master_seed(auth, None, self.kdf).await?;
            self.reattach(&seed, engine.as_ref()).await
        })
        .await
    }

    /// Drop the session keys.
    pub async fn lock(&self) -> Result<()> {
        let _guard = self.op_lock.try_lock().map_err(|_e| VeilError::Busy)?;
        self.end_session().await;
        Ok(())
    }

    /// Delete every record, then lock.
    pub async fn wipe(&self) -> Result<()> {
        let _guard = self.op_lock.try_lock().map_err(|_e| VeilError::Busy)?;
        let cleared = self.store.clear_all().await;
        self.end_session().await;
        tracing::warn!(ok = cleared.is_ok(), "wallet wiped");
        cleared
    }

    async fn end_session(&self) {
        self.session.lock().await.take();
        self.snapshot
            .send_replace(LifecycleSnapshot::uninitialized());
        tracing::info!("wallet locked");
    }

    async fn transition<Fut>(&self, busy: LifecycleState, op: Fut) -> Result<WalletIdentity>
    where
        Fut: Future<Output = Result<(WalletIdentity, EncryptionKey)>>,
    {
        let _guard = self.op_lock.try_lock().map_err(|_e| VeilError::Busy)?;
        let prior = self.snapshot.borrow().effective_state();
        if prior == LifecycleState::Active {
            return Err(VeilError::Busy);
        }

        self.snapshot.send_replace(LifecycleSnapshot {
            state: busy,
            identity: None,
            last_error: None,
            prior_state: None,
        });
        tracing::debug!(state = ?busy, "wallet transition started");
        let mut guard = TransitionGuard {
            snapshot: &self.snapshot,
            prior,
            armed: true,
        };

        match op.await {
            Ok((identity, key)) => {
                *self.session.lock().await = Some(Session {
                    identity: identity.clone(),
                    _encryption_key: key,
                });
                guard.armed = false;
                self.snapshot.send_replace(LifecycleSnapshot {
                    state: LifecycleState::Active,
                    identity: Some(identity.clone()),
                    last_error: None,
                    prior_state: None,
                });
                tracing::info!(chain = %identity.chain, from = ?busy, "wallet active");
                Ok(identity)
            }
            Err(e) => {
                guard.armed = false;
                self.snapshot.send_replace(LifecycleSnapshot {
                    state: LifecycleState::Errored,
                    identity: None,
                    last_error: Some(e.report()),
                    prior_state: Some(prior),
                });
                tracing::warn!(state = ?busy, code = e.code(), error = %e, "wallet transition failed");
                Err(e)
            }
        }
    }

    async fn engine_wallet(
        engine: &dyn PrivacyEngine,
        key: &EngineEncryptionKey,
        mnemonic: &str,
    ) -> Result<(EngineWallet, PrivacyAddress)> {
        let ew = engine.create_wallet(key, mnemonic, &creation_blocks()).await?;
        let addr = PrivacyAddress::parse(&ew.railgun_address)?;
        Ok((ew, addr))
    }

    /// Shared by create and import. Encrypted records are written before the public ones, and
    /// `wallet-exists` last, so an interrupted build never claims a wallet it cannot open.
    async fn build_wallet(
        &self,
        seed: &MasterSeed,
        mnemonic: &str,
        chain: SupportedChain,
    ) -> Result<(WalletIdentity, EncryptionKey)> {
        let engine = self.engine.ready_engine()?;
        let enc = derive_encryption_key(seed)?;
        let engine_key = derive_engine_encryption_key(seed)?;
        let owner = derive_owner_key_bytes(seed)?;

        let (ew, privacy_address) = Self::engine_wallet(engine.as_ref(), &engine_key, mnemonic).await?;
        let smart_wallet_address = owner_account_address(&owner)?;

        let secrets = WalletSecrets {
            mnemonic: mnemonic.to_owned(),
            owner_key_hex: owner_key_hex(&owner).as_str().to_owned(),
            smart_wallet_address: smart_wallet_address.clone(),
            railgun_address: privacy_address.to_string(),
        };
        let state = WalletState {
            smart_wallet_address: smart_wallet_address.clone(),
            railgun_address: privacy_address.to_string(),
            chain,
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        self.store
            .set_encrypted_json(WALLET_SECRETS, &secrets, &enc)
            .await?;
        self.store
            .set_encrypted_json(WALLET_STATE, &state, &enc)
            .await?;
        self.store.set_public(WALLET_ID, &ew.id).await?;
        self.store.set_public(ENGINE_ENC_KEY, &engine_key).await?;
        self.store.set_public(WALLET_EXISTS, &true).await?;

        let identity = WalletIdentity {
            smart_wallet_address,
            privacy_address,
            wallet_id: ew.id,
            engine_encryption_key: engine_key,
            chain,
        };
        Ok((identity, enc))
    }

    async fn reattach(
        &self,
        seed: &MasterSeed,
        engine: &dyn PrivacyEngine,
    ) -> Result<(WalletIdentity, EncryptionKey)> {
        let enc = derive_encryption_key(seed)?;
        let secrets: WalletSecrets = self
            .store
            .get_encrypted_json(WALLET_SECRETS, &enc)
            .await?
            .ok_or_else(|| VeilError::NotFound("no wallet on this device".into()))?;
        let stored_id: String = self
            .store
            .get_public(WALLET_ID)
            .await?
            .ok_or_else(|| VeilError::Corruption("wallet-id missing".into()))?;
        let state: WalletState = self
            .store
            .get_encrypted_json(WALLET_STATE, &enc)
            .await?
            .ok_or_else(|| VeilError::Corruption("wallet-state missing".into()))?;

        let engine_key = derive_engine_encryption_key(seed)?;
        let (ew, privacy_address) =
            Self::engine_wallet(engine, &engine_key, &secrets.mnemonic).await?;
        if ew.id != stored_id {
            tracing::warn!("engine wallet id differs from stored id; using engine id");
            self.store.set_public(WALLET_ID, &ew.id).await?;
        }

        let identity = WalletIdentity {
            smart_wallet_address: secrets.smart_wallet_address.clone(),
            privacy_address,
            wallet_id: ew.id,
            engine_encryption_key: engine_key,
            chain: state.chain,
        };
        Ok((identity, enc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RpcConfig, VeilConfig};
    use crate::engine::EngineLocations;
    use crate::store::{KvBackend, MemoryKv};
    use crate::testing::MockEngine;
    use std::path::PathBuf;
    use std::time::Duration;

    const FAST: KdfParams = KdfParams::insecure_for_tests(1_000);

    async fn ready_engine(engine: Arc<MockEngine>) -> eyre::Result<Arc<EngineBootstrap>> {
        let boot = Arc::new(EngineBootstrap::new(engine));
        let cfg = VeilConfig {
            rpc: RpcConfig {
                polygon_rpc_url: Some("https://polygon.example".into()),
                arbitrum_rpc_url: Some("https://arbitrum.example".into()),
                ethereum_rpc_url: None,
            },
            ..VeilConfig::default()
        };
        let loc = EngineLocations {
            db_path: PathBuf::from("db"),
            artifact_dir: PathBuf::from("artifacts"),
        };
        boot.init_engine(&cfg, &loc).await?;
        Ok(boot)
    }

    async fn lifecycle() -> eyre::Result<WalletLifecycle> {
        let boot = ready_engine(Arc::new(MockEngine::new())).await?;
        let store = EncryptedStore::new(Arc::new(MemoryKv::new()));
        Ok(WalletLifecycle::new(store, boot).with_kdf_params(FAST))
    }

    fn pw(s: &str) -> AuthSecret {
        AuthSecret::new(s.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn interrupted_create_restores_prior_state() -> eyre::Result<()> {
        let engine = Arc::new(MockEngine::new());
        let boot = ready_engine(Arc::clone(&engine)).await?;
        let lc = WalletLifecycle::new(EncryptedStore::new(Arc::new(MemoryKv::new())), boot)
            .with_kdf_params(FAST);
        engine.set_wallet_delay(Duration::from_secs(60));

        let timed_out = tokio::time::timeout(
            Duration::from_millis(100),
            lc.create_wallet(&pw("pw"), SupportedChain::Polygon),
        )
        .await;
        assert!(timed_out.is_err(), "creation should still be pending");

        let snap = lc.snapshot();
        assert_eq!(snap.state, LifecycleState::Errored);
        assert_eq!(snap.prior_state, Some(LifecycleState::Uninitialized));
        assert_eq!(
            snap.last_error.map(|r| r.code),
            Some("cancelled".to_owned())
        );
        assert!(!lc.check_wallet_exists().await?);
        assert_eq!(lc.session().await, None);

        engine.set_wallet_delay(Duration::ZERO);
        lc.create_wallet(&pw("pw"), SupportedChain::Polygon).await?;
        assert_eq!(lc.snapshot().state, LifecycleState::Active);
        Ok(())
    }

    #[tokio::test]
    async fn create_publishes_active_snapshot() -> eyre::Result<()> {
        let lc = lifecycle().await?;
        let mut rx = lc.subscribe();
        assert!(!lc.check_wallet_exists().await?);

        let id = lc.create_wallet(&pw("pw-one"), SupportedChain::Polygon).await?;
        assert!(lc.check_wallet_exists().await?);
        assert!(id.smart_wallet_address.starts_with("0x"));
        assert!(id.privacy_address.as_str().starts_with("0zk"));

        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.state, LifecycleState::Active);
        assert_eq!(snap.identity, Some(id.clone()));
        assert_eq!(lc.session().await, Some(id));
        Ok(())
    }

    #[tokio::test]
    async fn active_wallet_must_be_locked_before_new_transition() -> eyre::Result<()> {
        let lc = lifecycle().await?;
        lc.create_wallet(&pw("pw-one"), SupportedChain::Polygon).await?;
        assert_eq!(
            lc.load_wallet(&pw("pw-one")).await.err(),
            Some(VeilError::Busy)
        );
        lc.lock().await?;
        assert_eq!(lc.snapshot().state, LifecycleState::Uninitialized);
        assert_eq!(lc.session().await, None);
        lc.load_wallet(&pw("pw-one")).await?;
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_transition_is_busy() -> eyre::Result<()> {
        let lc = lifecycle().await?;
        let _held = lc.op_lock.try_lock()?;
        assert_eq!(
            lc.create_wallet(&pw("x"), SupportedChain::Polygon)
                .await
                .err(),
            Some(VeilError::Busy)
        );
        assert_eq!(lc.lock().await.err(), Some(VeilError::Busy));
        Ok(())
    }

    #[tokio::test]
    async fn failure_records_error_and_prior_state() -> eyre::Result<()> {
        let lc = lifecycle().await?;
        let err = lc.load_wallet(&pw("nobody")).await.err();
        assert!(matches!(err, Some(VeilError::NotFound(_))));

        let snap = lc.snapshot();
        assert_eq!(snap.state, LifecycleState::Errored);
        assert_eq!(snap.prior_state, Some(LifecycleState::Uninitialized));
        assert_eq!(snap.identity, None);
        assert_eq!(
            snap.last_error.as_ref().map(|r| r.code.as_str()),
            Some("not_found")
        );
        assert_eq!(snap.effective_state(), LifecycleState::Uninitialized);

        // Retry starts from the prior state.
        lc.create_wallet(&pw("nobody"), SupportedChain::Polygon).await?;
        Ok(())
    }

    #[tokio::test]
    async fn engine_not_ready_blocks_creation() -> eyre::Result<()> {
        let boot = Arc::new(EngineBootstrap::new(Arc::new(MockEngine::new())));
        let store = EncryptedStore::new(Arc::new(MemoryKv::new()));
        let lc = WalletLifecycle::new(store, boot).with_kdf_params(FAST);
        assert_eq!(
            lc.create_wallet(&pw("x"), SupportedChain::Polygon)
                .await
                .err(),
            Some(VeilError::EngineNotReady)
        );
        assert!(!lc.check_wallet_exists().await?);
        Ok(())
    }

    #[tokio::test]
    async fn missing_wallet_id_is_corruption() -> eyre::Result<()> {
        let lc = lifecycle().await?;
        lc.create_wallet(&pw("pw"), SupportedChain::Arbitrum).await?;
        lc.lock().await?;
        lc.store().remove(WALLET_ID).await?;
        assert!(matches!(
            lc.load_wallet(&pw("pw")).await,
            Err(VeilError::Corruption(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn missing_wallet_state_is_corruption() -> eyre::Result<()> {
        let lc = lifecycle().await?;
        lc.create_wallet(&pw("pw"), SupportedChain::Arbitrum).await?;
        lc.lock().await?;
        lc.store().remove(WALLET_STATE).await?;
        assert!(matches!(
            lc.load_wallet(&pw("pw")).await,
            Err(VeilError::Corruption(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unlock_restores_chain_from_state() -> eyre::Result<()> {
        let lc = lifecycle().await?;
        let created = lc.create_wallet(&pw("pw"), SupportedChain::Arbitrum).await?;
        lc.lock().await?;
        let loaded = lc.load_wallet(&pw("pw")).await?;
        assert_eq!(loaded.chain, SupportedChain::Arbitrum);
        assert_eq!(loaded, created);
        Ok(())
    }

    #[tokio::test]
    async fn wipe_clears_records_and_session() -> eyre::Result<()> {
        let lc = lifecycle().await?;
        lc.create_wallet(&pw("pw"), SupportedChain::Polygon).await?;
        lc.wipe().await?;
        assert!(!lc.check_wallet_exists().await?);
        assert!(lc.store().list_keys().await?.is_empty());
        assert_eq!(lc.session().await, None);
        Ok(())
    }

    #[tokio::test]
    async fn no_plaintext_secrets_in_store() -> eyre::Result<()> {
        let kv = Arc::new(MemoryKv::new());
        let boot = ready_engine(Arc::new(MockEngine::new())).await?;
        let store = EncryptedStore::new(Arc::clone(&kv) as Arc<dyn KvBackend>);
        let lc = WalletLifecycle::new(store, boot).with_kdf_params(FAST);
        let phrase = "legal winner thank year wave sausage worth useful legal winner thank yellow";
        lc.import_wallet(&pw("pw"), phrase, SupportedChain::Polygon)
            .await?;

        for key in kv.keys().await? {
            let raw = kv
                .get(&key)
                .await?
                .unwrap_or_default();
            let text = String::from_utf8_lossy(&raw);
            assert!(!text.contains("sausage"), "mnemonic leaked into {key}");
            assert!(!text.contains("ownerKeyHex"), "secrets leaked into {key}");
        }
        Ok(())
    }
}
