use crate::chain::SupportedChain;
use crate::errors::VeilError;
use crate::paths::VeilPaths;
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

pub const DEFAULT_POI_NODE_URL: &str = "https://poi-aggregator.railgun.org";
pub const DEFAULT_WALLET_SOURCE: &str = "veilwallet";
/// Engine balance polling interval (5 minutes).
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Required before the privacy engine can start.
    pub polygon_rpc_url: Option<String>,
    /// Required before the privacy engine can start.
    pub arbitrum_rpc_url: Option<String>,
    pub ethereum_rpc_url: Option<String>,
}

impl RpcConfig {
    /// Configured URL for a chain, blank values treated as unset.
    pub fn url_for(&self, chain: SupportedChain) -> Option<&str> {
        let v = match chain {
            SupportedChain::Ethereum => self.ethereum_rpc_url.as_deref(),
            SupportedChain::Polygon => self.polygon_rpc_url.as_deref(),
            SupportedChain::Arbitrum => self.arbitrum_rpc_url.as_deref(),
        };
        v.map(str::trim).filter(|s| !s.is_empty())
    }

    /// Endpoints to broadcast through, configured one first.
    pub fn broadcast_urls(&self, chain: SupportedChain) -> Vec<String> {
        let mut out = Vec::with_capacity(2);
        if let Some(u) = self.url_for(chain) {
            out.push(u.to_owned());
        }
        let fallback = chain.default_rpc_url();
        if !out.iter().any(|u| u == fallback) {
            out.push(fallback.to_owned());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Identifier the engine records as the originating wallet software.
    pub wallet_source: String,
    pub debug: bool,
    /// Proof-of-innocence aggregator nodes.
    pub poi_node_urls: Vec<String>,
    pub polling_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wallet_source: DEFAULT_WALLET_SOURCE.into(),
            debug: false,
            poi_node_urls: vec![DEFAULT_POI_NODE_URL.into()],
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
        }
    }
}

fn check_url(label: &str, url: &str) -> Result<(), VeilError> {
    let u: reqwest::Url = url
        .parse()
        .map_err(|e| VeilError::Configuration(format!("invalid {label} url: {e}")))?;
    if !matches!(u.scheme(), "http" | "https" | "ws" | "wss") {
        return Err(VeilError::Configuration(format!(
            "unsupported {label} url scheme: {}",
            u.scheme()
        )));
    }
    Ok(())
}

impl EngineConfig {
    /// Runs before any engine call so a bad config never half-starts the engine.
    pub fn validate(&self, rpc: &RpcConfig) -> Result<(), VeilError> {
        let src = &self.wallet_source;
        if src.is_empty()
            || src.len() > 16
            || !src
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(VeilError::Configuration(
                "engine.wallet_source must be 1-16 lowercase alphanumerics".into(),
            ));
        }
        if self.polling_interval_ms == 0 {
            return Err(VeilError::Configuration(
                "engine.polling_interval_ms must be positive".into(),
            ));
        }

        for chain in [SupportedChain::Polygon, SupportedChain::Arbitrum] {
            let url = rpc.url_for(chain).ok_or_else(|| {
                VeilError::Configuration(format!("missing rpc url for {chain}"))
            })?;
            check_url(chain.as_str(), url)?;
        }
        if let Some(url) = rpc.url_for(SupportedChain::Ethereum) {
            check_url("ethereum", url)?;
        }
        for url in &self.poi_node_urls {
            check_url("poi node", url)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Submit private transactions directly when no relay is available.
    ///
    /// Direct submission reveals the submitting public address.
    pub allow_direct_private_fallback: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            allow_direct_private_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VeilConfig {
    pub rpc: RpcConfig,
    pub engine: EngineConfig,
    pub broadcast: BroadcastConfig,
}

impl VeilConfig {
    pub fn validate(&self) -> Result<(), VeilError> {
        self.engine.validate(&self.rpc)
    }
}

fn is_truthy_env(v: &str) -> bool {
    matches!(
        v.trim(),
        "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON"
    )
}

fn apply_env_overrides(cfg: &mut VeilConfig) {
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("VEIL_POLYGON_RPC_URL", |v| {
        cfg.rpc.polygon_rpc_url = Some(v.to_owned());
    });
    apply_env("VEIL_ARBITRUM_RPC_URL", |v| {
        cfg.rpc.arbitrum_rpc_url = Some(v.to_owned());
    });
    apply_env("VEIL_ETHEREUM_RPC_URL", |v| {
        cfg.rpc.ethereum_rpc_url = Some(v.to_owned());
    });
    apply_env("VEIL_ENGINE_DEBUG", |v| {
        cfg.engine.debug = is_truthy_env(v);
    });
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(paths: &VeilPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<VeilConfig> {
        if !self.path.exists() {
            let cfg = VeilConfig::default();
            self.save(&cfg)?;
            let mut cfg = cfg;
            apply_env_overrides(&mut cfg);
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: VeilConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &VeilConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write config.toml")?;
        Ok(())
    }
}
