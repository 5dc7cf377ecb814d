use super::{ChainProviderConfig, PrivacyEngine, StartEngineParams};
use crate::chain::SupportedChain;
use crate::config::VeilConfig;
use crate::errors::{Result, VeilError};
use crate::paths::VeilPaths;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Uninitialized,
    Initializing,
    Ready,
    /// Startup failed; `init_engine` may be called again.
    Error(String),
}

/// Where the engine keeps its database and proving artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLocations {
    pub db_path: PathBuf,
    pub artifact_dir: PathBuf,
}

impl From<&VeilPaths> for EngineLocations {
    fn from(p: &VeilPaths) -> Self {
        Self {
            db_path: p.engine_db_dir(),
            artifact_dir: p.artifact_dir(),
        }
    }
}

/// Marks startup as failed if `init_engine` is dropped while the engine is still starting.
struct StartupGuard<'a> {
    status: &'a watch::Sender<EngineStatus>,
    armed: bool,
}

impl Drop for StartupGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.status
                .send_replace(EngineStatus::Error("initialization interrupted".into()));
            tracing::warn!("privacy engine startup interrupted");
        }
    }
}

/// Shared handle to the process-wide engine and its readiness.
///
/// Clone the surrounding `Arc` to share it; readiness flips to `Ready` only after the engine has
/// started and every configured chain provider has loaded.
pub struct EngineBootstrap {
    engine: Arc<dyn PrivacyEngine>,
    status: watch::Sender<EngineStatus>,
    init_lock: Mutex<()>,
}

impl std::fmt::Debug for EngineBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBootstrap")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl EngineBootstrap {
    pub fn new(engine: Arc<dyn PrivacyEngine>) -> Self {
        let (status, _rx) = watch::channel(EngineStatus::Uninitialized);
        Self {
            engine,
            status,
            init_lock: Mutex::new(()),
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.status.borrow(), EngineStatus::Ready)
    }

    /// The engine, if startup has completed.
    pub fn ready_engine(&self) -> Result<Arc<dyn PrivacyEngine>> {
        if self.is_ready() {
            Ok(Arc::clone(&self.engine))
        } else {
            Err(VeilError::EngineNotReady)
        }
    }

    /// Start the engine and load chain providers. A no-op once ready.
    pub async fn init_engine(&self, cfg: &VeilConfig, locations: &EngineLocations) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        cfg.validate()?;

        let _guard = self.init_lock.lock().await;
        if self.is_ready() {
            return Ok(());
        }
        self.status.send_replace(EngineStatus::Initializing);
        tracing::info!("starting privacy engine");
        let mut guard = StartupGuard {
            status: &self.status,
            armed: true,
        };

        let res = self.start_sequence(cfg, locations).await;
        guard.armed = false;
        match res {
            Ok(()) => {
                self.status.send_replace(EngineStatus::Ready);
                tracing::info!("privacy engine ready");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "privacy engine startup failed");
                self.status.send_replace(EngineStatus::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn start_sequence(&self, cfg: &VeilConfig, locations: &EngineLocations) -> Result<()> {
        let params = StartEngineParams {
            wallet_source: cfg.engine.wallet_source.clone(),
            db_path: locations.db_path.clone(),
            debug: cfg.engine.debug,
            artifact_dir: locations.artifact_dir.clone(),
            use_native_artifacts: false,
            skip_merkletree_scans: false,
            poi_node_urls: cfg.engine.poi_node_urls.clone(),
            custom_poi_lists: Vec::new(),
            verbose_scan_logging: false,
        };
        self.engine.start_engine(&params).await?;

        for chain in [
            SupportedChain::Polygon,
            SupportedChain::Arbitrum,
            SupportedChain::Ethereum,
        ] {
            // Polygon and Arbitrum presence was checked by validate(); Ethereum is optional.
            let Some(url) = cfg.rpc.url_for(chain) else {
                continue;
            };
            let provider = ChainProviderConfig::single(chain, url);
            self.engine
                .load_provider(
                    &provider,
                    chain.engine_label(),
                    cfg.engine.polling_interval_ms,
                )
                .await?;
            tracing::debug!(chain = %chain, "loaded chain provider");
        }
        Ok(())
    }

    /// Wait out an in-progress startup. Fails unless the engine ends up ready.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.status.subscribe();
        let settled = rx
            .wait_for(|s| !matches!(s, EngineStatus::Initializing))
            .await
            .map_err(|_e| VeilError::EngineNotReady)?;
        if matches!(*settled, EngineStatus::Ready) {
            Ok(())
        } else {
            Err(VeilError::EngineNotReady)
        }
    }
}
