//! In-memory stand-ins for the privacy engine, chain RPC and swap aggregator.
//!
//! Compiled for unit tests and behind the `test-helpers` feature for integration tests.

use crate::broadcast::ChainClient;
use crate::chain::SupportedChain;
use crate::engine::{
    ChainProviderConfig, ContractCall, EngineWallet, PrivacyEngine, ProgressReporter,
    ProvedTransaction, SerializedBalance, StartEngineParams, TokenAmount, TokenRecipient,
    TransactionInputs,
};
use crate::errors::{Result, VeilError};
use crate::keys::EngineEncryptionKey;
use crate::proof::{ProofKind, QuoteRequest, SwapQuote, SwapQuoter};
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest as _, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct EngineState {
    starts: usize,
    providers: Vec<String>,
    fail_next_start: Option<String>,
    fail_next_proof: Option<String>,
    panic_next_proof: bool,
    proof_delay: Duration,
    start_delay: Duration,
    wallet_delay: Duration,
    proofs: Vec<ProofKind>,
    balances: BTreeMap<String, SerializedBalance>,
    rescans: Vec<String>,
    wallet_id_override: Option<String>,
}

/// Deterministic engine: wallet ids and addresses are hashes of the mnemonic.
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<EngineState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_count(&self) -> usize {
        locked(&self.state).starts
    }

    /// Chain labels passed to `load_provider`, in call order.
    pub fn loaded_providers(&self) -> Vec<String> {
        locked(&self.state).providers.clone()
    }

    pub fn fail_next_start(&self, msg: &str) {
        locked(&self.state).fail_next_start = Some(msg.to_owned());
    }

    pub fn fail_next_proof(&self, msg: &str) {
        locked(&self.state).fail_next_proof = Some(msg.to_owned());
    }

    /// Make the next proof panic mid-computation, like a crashing prover.
    pub fn panic_next_proof(&self) {
        locked(&self.state).panic_next_proof = true;
    }

    /// Sleep this long inside `start_engine`.
    pub fn set_start_delay(&self, d: Duration) {
        locked(&self.state).start_delay = d;
    }

    /// Sleep this long inside `create_wallet`.
    pub fn set_wallet_delay(&self, d: Duration) {
        locked(&self.state).wallet_delay = d;
    }

    /// Sleep this long before a proof reports any progress.
    pub fn set_proof_delay(&self, d: Duration) {
        locked(&self.state).proof_delay = d;
    }

    pub fn set_balance(&self, token: &str, amount: &str) {
        locked(&self.state).balances.insert(
            token.to_owned(),
            SerializedBalance {
                amount: amount.to_owned(),
            },
        );
    }

    /// Make `create_wallet` hand out this id regardless of mnemonic.
    pub fn override_wallet_id(&self, id: &str) {
        locked(&self.state).wallet_id_override = Some(id.to_owned());
    }

    pub fn proofs(&self) -> Vec<ProofKind> {
        locked(&self.state).proofs.clone()
    }

    /// Wallet ids passed to full rescans.
    pub fn rescans(&self) -> Vec<String> {
        locked(&self.state).rescans.clone()
    }

    #[expect(clippy::panic, reason = "stands in for a prover that crashes")]
    async fn prove(&self, kind: ProofKind, progress: &ProgressReporter) -> Result<()> {
        let (delay, failure, crash) = {
            let mut s = locked(&self.state);
            s.proofs.push(kind);
            let crash = std::mem::take(&mut s.panic_next_proof);
            (s.proof_delay, s.fail_next_proof.take(), crash)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if crash {
            panic!("prover ran out of memory");
        }
        progress(0.25);
        if let Some(msg) = failure {
            return Err(VeilError::Proof(msg));
        }
        progress(0.5);
        tokio::task::yield_now().await;
        progress(1.0);
        Ok(())
    }
}

fn raw_tx(kind: ProofKind) -> Value {
    let tag: u8 = match kind {
        ProofKind::Shield => 1,
        ProofKind::Transfer => 2,
        ProofKind::Unshield => 3,
        ProofKind::Swap => 4,
    };
    json!(format!("0x02f86b{tag:02x}"))
}

#[async_trait]
impl PrivacyEngine for MockEngine {
    async fn start_engine(&self, _params: &StartEngineParams) -> Result<()> {
        let delay = locked(&self.state).start_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut s = locked(&self.state);
        if let Some(msg) = s.fail_next_start.take() {
            return Err(VeilError::Configuration(msg));
        }
        s.starts = s.starts.saturating_add(1);
        Ok(())
    }

    async fn load_provider(
        &self,
        _config: &ChainProviderConfig,
        chain_label: &str,
        _polling_interval_ms: u64,
    ) -> Result<()> {
        locked(&self.state).providers.push(chain_label.to_owned());
        Ok(())
    }

    async fn create_wallet(
        &self,
        _engine_key: &EngineEncryptionKey,
        mnemonic: &str,
        _creation_blocks: &BTreeMap<String, u64>,
    ) -> Result<EngineWallet> {
        let delay = locked(&self.state).wallet_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let digest = Sha256::digest(mnemonic.as_bytes());
        let short: Vec<u8> = digest.iter().take(8).copied().collect();
        let id = locked(&self.state)
            .wallet_id_override
            .clone()
            .unwrap_or_else(|| hex::encode(short));
        Ok(EngineWallet {
            id,
            railgun_address: format!("0zk{}", hex::encode(digest)),
        })
    }

    async fn generate_shield_transaction(
        &self,
        _inputs: &TransactionInputs,
        progress: ProgressReporter,
    ) -> Result<Value> {
        self.prove(ProofKind::Shield, &progress).await?;
        Ok(json!({"shieldPrivateKey": "0x00"}))
    }

    async fn populate_shield(
        &self,
        _chain: SupportedChain,
        _recipient: &str,
        _inputs: &TransactionInputs,
        _shield: &Value,
    ) -> Result<Value> {
        Ok(raw_tx(ProofKind::Shield))
    }

    async fn generate_transfer_proof(
        &self,
        _wallet_id: &str,
        _inputs: &TransactionInputs,
        progress: ProgressReporter,
    ) -> Result<Value> {
        self.prove(ProofKind::Transfer, &progress).await?;
        Ok(json!({"kind": "transfer"}))
    }

    async fn generate_transact(
        &self,
        _chain: SupportedChain,
        _wallet_id: &str,
        _inputs: &TransactionInputs,
        _proof: &Value,
    ) -> Result<Value> {
        Ok(raw_tx(ProofKind::Transfer))
    }

    async fn generate_unshield_proof(
        &self,
        _wallet_id: &str,
        _inputs: &TransactionInputs,
        progress: ProgressReporter,
    ) -> Result<Value> {
        self.prove(ProofKind::Unshield, &progress).await?;
        Ok(json!({"kind": "unshield"}))
    }

    async fn populate_proved_unshield(
        &self,
        _chain: SupportedChain,
        _wallet_id: &str,
        _inputs: &TransactionInputs,
        _proof: &Value,
    ) -> Result<Value> {
        Ok(raw_tx(ProofKind::Unshield))
    }

    async fn generate_cross_contract_calls_proof(
        &self,
        _chain: SupportedChain,
        _wallet_id: &str,
        _unshield: &[TokenAmount],
        _calls: &[ContractCall],
        _shield_recipients: &[TokenRecipient],
        progress: ProgressReporter,
    ) -> Result<ProvedTransaction> {
        self.prove(ProofKind::Swap, &progress).await?;
        Ok(ProvedTransaction {
            transaction: raw_tx(ProofKind::Swap),
            proof: json!({"kind": "swap"}),
        })
    }

    async fn shareable_viewing_key(&self, wallet_id: &str) -> Result<String> {
        Ok(format!("vk-{wallet_id}"))
    }

    async fn serialized_balances(
        &self,
        _wallet_id: &str,
        _chain: SupportedChain,
    ) -> Result<BTreeMap<String, SerializedBalance>> {
        Ok(locked(&self.state).balances.clone())
    }

    async fn refresh_balances(&self, _wallet_id: &str, _chain: SupportedChain) -> Result<()> {
        Ok(())
    }

    async fn rescan_full_merkletrees(
        &self,
        _chain: SupportedChain,
        wallet_ids: &[String],
    ) -> Result<()> {
        locked(&self.state)
            .rescans
            .extend(wallet_ids.iter().cloned());
        Ok(())
    }
}

/// Records every submission; endpoints marked with [`MockChainClient::fail_url`] refuse.
#[derive(Debug, Default)]
pub struct MockChainClient {
    failing: Mutex<BTreeSet<String>>,
    submissions: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_url(&self, url: &str) {
        locked(&self.failing).insert(url.to_owned());
    }

    /// `(rpc_url, raw_bytes)` for every attempt, failed ones included.
    pub fn submissions(&self) -> Vec<(String, Vec<u8>)> {
        locked(&self.submissions).clone()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn send_raw_transaction(&self, rpc_url: &str, raw: &[u8]) -> Result<B256> {
        locked(&self.submissions).push((rpc_url.to_owned(), raw.to_vec()));
        if locked(&self.failing).contains(rpc_url) {
            return Err(VeilError::Broadcast(format!("{rpc_url}: connection refused")));
        }
        Ok(keccak256(raw))
    }
}

/// Quotes a fixed output amount through a fixed router.
#[derive(Debug, Default)]
pub struct MockQuoter {
    buy_amount: U256,
}

impl MockQuoter {
    pub const fn new(buy_amount: U256) -> Self {
        Self { buy_amount }
    }
}

#[async_trait]
impl SwapQuoter for MockQuoter {
    async fn quote(&self, req: &QuoteRequest) -> Result<SwapQuote> {
        Ok(SwapQuote {
            sell_token: req.sell_token,
            buy_token: req.buy_token,
            sell_amount: req.sell_amount,
            buy_amount: self.buy_amount,
            to: Address::repeat_byte(0x0d),
            data: Bytes::from(vec![0x12, 0x34]),
            value: U256::ZERO,
        })
    }
}
