//! Contract of the external privacy engine (UTXO scanning, Merkle trees and proving).
//!
//! The engine itself is not part of this crate. Everything here is the narrow surface the wallet
//! calls through, injected as `Arc<dyn PrivacyEngine>`.

pub mod balances;
pub mod bootstrap;

pub use balances::{
    full_resync, private_balances, refresh_balances, PrivateBalance, SerializedBalance,
};
pub use bootstrap::{EngineBootstrap, EngineLocations, EngineStatus};

use crate::chain::{u256_decimal, SupportedChain};
use crate::errors::Result;
use crate::keys::EngineEncryptionKey;
use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Receives the engine's progress as a fraction in `0.0..=1.0`.
pub type ProgressReporter = Arc<dyn Fn(f64) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartEngineParams {
    pub wallet_source: String,
    pub db_path: PathBuf,
    pub debug: bool,
    pub artifact_dir: PathBuf,
    pub use_native_artifacts: bool,
    pub skip_merkletree_scans: bool,
    pub poi_node_urls: Vec<String>,
    pub custom_poi_lists: Vec<Value>,
    pub verbose_scan_logging: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub provider: String,
    pub priority: u32,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainProviderConfig {
    pub chain_id: u64,
    pub providers: Vec<ProviderEntry>,
}

impl ChainProviderConfig {
    pub fn single(chain: SupportedChain, url: &str) -> Self {
        Self {
            chain_id: chain.chain_id(),
            providers: vec![ProviderEntry {
                provider: url.to_owned(),
                priority: 1,
                weight: 1,
            }],
        }
    }
}

/// Wallet handle returned by the engine. Stable for a given mnemonic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineWallet {
    pub id: String,
    pub railgun_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Erc20AmountRecipient {
    pub token_address: Address,
    #[serde(with = "u256_decimal")]
    pub amount: U256,
    pub recipient_address: String,
}

/// Inputs shared by the shield, transfer and unshield primitives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInputs {
    pub network_name: SupportedChain,
    pub erc20_amount_recipients: Vec<Erc20AmountRecipient>,
    pub nft_amount_recipients: Vec<Value>,
}

impl TransactionInputs {
    pub fn single_erc20(
        chain: SupportedChain,
        token_address: Address,
        amount: U256,
        recipient_address: String,
    ) -> Self {
        Self {
            network_name: chain,
            erc20_amount_recipients: vec![Erc20AmountRecipient {
                token_address,
                amount,
                recipient_address,
            }],
            nft_amount_recipients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAmount {
    pub token_address: Address,
    #[serde(with = "u256_decimal")]
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecipient {
    pub token_address: Address,
    pub recipient_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    pub to: Address,
    pub data: Bytes,
    #[serde(with = "u256_decimal")]
    pub value: U256,
}

/// Output of a prove-then-populate pair: the transaction to submit and the proof behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvedTransaction {
    pub transaction: Value,
    pub proof: Value,
}

#[async_trait]
pub trait PrivacyEngine: Send + Sync {
    async fn start_engine(&self, params: &StartEngineParams) -> Result<()>;

    async fn load_provider(
        &self,
        config: &ChainProviderConfig,
        chain_label: &str,
        polling_interval_ms: u64,
    ) -> Result<()>;

    /// Idempotent for a mnemonic: calling it again reattaches to the existing wallet.
    async fn create_wallet(
        &self,
        engine_key: &EngineEncryptionKey,
        mnemonic: &str,
        creation_blocks: &BTreeMap<String, u64>,
    ) -> Result<EngineWallet>;

    async fn generate_shield_transaction(
        &self,
        inputs: &TransactionInputs,
        progress: ProgressReporter,
    ) -> Result<Value>;

    async fn populate_shield(
        &self,
        chain: SupportedChain,
        recipient: &str,
        inputs: &TransactionInputs,
        shield: &Value,
    ) -> Result<Value>;

    async fn generate_transfer_proof(
        &self,
        wallet_id: &str,
        inputs: &TransactionInputs,
        progress: ProgressReporter,
    ) -> Result<Value>;

    async fn generate_transact(
        &self,
        chain: SupportedChain,
        wallet_id: &str,
        inputs: &TransactionInputs,
        proof: &Value,
    ) -> Result<Value>;

    async fn generate_unshield_proof(
        &self,
        wallet_id: &str,
        inputs: &TransactionInputs,
        progress: ProgressReporter,
    ) -> Result<Value>;

    async fn populate_proved_unshield(
        &self,
        chain: SupportedChain,
        wallet_id: &str,
        inputs: &TransactionInputs,
        proof: &Value,
    ) -> Result<Value>;

    /// Unshield, call out, re-shield, all in one proved relay transaction.
    async fn generate_cross_contract_calls_proof(
        &self,
        chain: SupportedChain,
        wallet_id: &str,
        unshield: &[TokenAmount],
        calls: &[ContractCall],
        shield_recipients: &[TokenRecipient],
        progress: ProgressReporter,
    ) -> Result<ProvedTransaction>;

    async fn shareable_viewing_key(&self, wallet_id: &str) -> Result<String>;

    async fn serialized_balances(
        &self,
        wallet_id: &str,
        chain: SupportedChain,
    ) -> Result<BTreeMap<String, SerializedBalance>>;

    async fn refresh_balances(&self, wallet_id: &str, chain: SupportedChain) -> Result<()>;

    async fn rescan_full_merkletrees(
        &self,
        chain: SupportedChain,
        wallet_ids: &[String],
    ) -> Result<()>;
}
