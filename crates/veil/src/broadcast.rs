//! Submitting proved transactions.
//!
//! Shields go straight to an RPC endpoint since the deposit is public anyway. Transfers,
//! unshields and swaps should go through a relay network that hides the submitter; no relay is
//! wired up yet, so they use the direct path when `allow_direct_private_fallback` is set and the
//! receipt says so.

use crate::chain::SupportedChain;
use crate::config::{RpcConfig, VeilConfig};
use crate::errors::{Result, VeilError};
use crate::proof::{ProofKind, SerializedTransaction};
use crate::retry::{try_all_with_backoff, BackoffConfig};
use alloy::primitives::{keccak256, B256};
use alloy::providers::{Provider as _, RootProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastPath {
    /// Submitted to a public RPC endpoint; the submitting address is visible.
    Direct,
    /// Submitted through a privacy relay.
    Relay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReceipt {
    pub tx_hash: B256,
    pub path: BroadcastPath,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit signed transaction bytes to one endpoint.
    async fn send_raw_transaction(&self, rpc_url: &str, raw: &[u8]) -> Result<B256>;
}

/// Nodes report a resubmission of a pooled transaction in several ways.
fn broadcast_err_is_ok(msg: &str) -> bool {
    let s = msg.to_lowercase();
    s.contains("already known")
        || s.contains("known transaction")
        || s.contains("already imported")
        || s.contains("already in mempool")
}

/// [`ChainClient`] over alloy's JSON-RPC provider.
#[derive(Debug, Clone, Default)]
pub struct AlloyChainClient;

impl AlloyChainClient {
    fn provider_for_url(url: &str) -> Result<RootProvider> {
        let u: reqwest::Url = url
            .parse()
            .map_err(|e| VeilError::Configuration(format!("invalid rpc url: {e}")))?;
        let client = Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| VeilError::Broadcast(format!("build rpc http client: {e}")))?;
        let http = alloy::transports::http::Http::with_client(client, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn send_raw_transaction(&self, rpc_url: &str, raw: &[u8]) -> Result<B256> {
        let provider = Self::provider_for_url(rpc_url)?;
        match provider.send_raw_transaction(raw).await {
            Ok(pending) => Ok(*pending.tx_hash()),
            Err(e) => {
                let msg = format!("{e:#}");
                if broadcast_err_is_ok(&msg) {
                    Ok(keccak256(raw))
                } else {
                    Err(VeilError::Broadcast(msg))
                }
            }
        }
    }
}

pub struct Broadcaster {
    client: Arc<dyn ChainClient>,
    rpc: RpcConfig,
    allow_direct_private_fallback: bool,
    backoff: BackoffConfig,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field(
                "allow_direct_private_fallback",
                &self.allow_direct_private_fallback,
            )
            .finish_non_exhaustive()
    }
}

impl Broadcaster {
    pub fn new(client: Arc<dyn ChainClient>, cfg: &VeilConfig) -> Self {
        Self {
            client,
            rpc: cfg.rpc.clone(),
            allow_direct_private_fallback: cfg.broadcast.allow_direct_private_fallback,
            backoff: BackoffConfig::default(),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// No relay network is integrated; private submissions can only take the direct path.
    pub const fn supports_private_relay() -> bool {
        false
    }

    /// Route by kind: shields direct, everything else private.
    pub async fn broadcast(
        &self,
        kind: ProofKind,
        chain: SupportedChain,
        tx: &SerializedTransaction,
    ) -> Result<BroadcastReceipt> {
        if kind.is_private() {
            self.broadcast_private(chain, tx).await
        } else {
            self.broadcast_shield(chain, tx).await
        }
    }

    pub async fn broadcast_shield(
        &self,
        chain: SupportedChain,
        tx: &SerializedTransaction,
    ) -> Result<BroadcastReceipt> {
        let tx_hash = self.direct(chain, tx).await?;
        Ok(BroadcastReceipt {
            tx_hash,
            path: BroadcastPath::Direct,
        })
    }

    pub async fn broadcast_private(
        &self,
        chain: SupportedChain,
        tx: &SerializedTransaction,
    ) -> Result<BroadcastReceipt> {
        if !self.allow_direct_private_fallback {
            return Err(VeilError::Broadcast(
                "no private relay available and direct fallback is disabled".into(),
            ));
        }
        tracing::warn!(
            chain = %chain,
            "no private relay available; submitting directly, sender address is visible"
        );
        let tx_hash = self.direct(chain, tx).await?;
        Ok(BroadcastReceipt {
            tx_hash,
            path: BroadcastPath::Direct,
        })
    }

    async fn direct(&self, chain: SupportedChain, tx: &SerializedTransaction) -> Result<B256> {
        let raw_bytes = tx.raw_transaction_bytes()?;
        let raw = raw_bytes.as_slice();
        let urls = self.rpc.broadcast_urls(chain);
        let client = Arc::clone(&self.client);
        let tx_hash = try_all_with_backoff(
            &urls,
            &self.backoff,
            |url| {
                let client = Arc::clone(&client);
                let url = url.clone();
                async move { client.send_raw_transaction(&url, raw).await }
            },
            "broadcast raw tx",
        )
        .await?;
        tracing::info!(chain = %chain, tx_hash = %tx_hash, "transaction submitted");
        Ok(tx_hash)
    }
}
