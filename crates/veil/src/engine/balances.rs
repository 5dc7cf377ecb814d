use super::EngineBootstrap;
use crate::chain::{parse_public_address, u256_decimal, SupportedChain};
use crate::errors::{Result, VeilError};
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Balance entry as the engine serializes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedBalance {
    pub amount: String,
}

/// Token metadata is not known to the engine; symbol and decimals are resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateBalance {
    pub token: Address,
    pub balance: U256,
}

fn parse_entry(token: &str, b: &SerializedBalance) -> Result<PrivateBalance> {
    let token = parse_public_address(token)
        .map_err(|e| VeilError::Proof(format!("engine returned bad token: {e}")))?;
    let balance = u256_decimal::parse(&b.amount)
        .map_err(|e| VeilError::Proof(format!("engine returned bad amount: {e}")))?;
    Ok(PrivateBalance { token, balance })
}

/// Shielded ERC-20 balances of a wallet, ordered by token address.
pub async fn private_balances(
    boot: &EngineBootstrap,
    wallet_id: &str,
    chain: SupportedChain,
) -> Result<Vec<PrivateBalance>> {
    let engine = boot.ready_engine()?;
    let raw = engine.serialized_balances(wallet_id, chain).await?;
    let mut out = raw
        .iter()
        .map(|(token, b)| parse_entry(token, b))
        .collect::<Result<Vec<_>>>()?;
    out.sort_by_key(|b| b.token);
    Ok(out)
}

/// Incremental scan from the last known block.
pub async fn refresh_balances(
    boot: &EngineBootstrap,
    wallet_id: &str,
    chain: SupportedChain,
) -> Result<()> {
    let engine = boot.ready_engine()?;
    tracing::debug!(chain = %chain, "refreshing private balances");
    engine.refresh_balances(wallet_id, chain).await
}

/// Rescan the full Merkle trees for the wallet. Slow; recovers from a corrupted local tree.
pub async fn full_resync(
    boot: &EngineBootstrap,
    wallet_id: &str,
    chain: SupportedChain,
) -> Result<()> {
    let engine = boot.ready_engine()?;
    tracing::info!(chain = %chain, "full merkletree resync");
    engine
        .rescan_full_merkletrees(chain, &[wallet_id.to_owned()])
        .await
}
