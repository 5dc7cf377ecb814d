//! Proof requests and the serialized transactions they produce.
//!
//! A request is proved by a [`worker`] task and tracked by the [`orchestrator`]. The result is an
//! opaque JSON payload handed unmodified to [`crate::broadcast`].

pub mod orchestrator;
pub mod worker;

pub use orchestrator::{ProofOrchestrator, ProofPhase, ProofSnapshot, TaskId};
pub use worker::{Tagged, WorkerHandle, WorkerMessage};

use crate::chain::{u256_decimal, PrivacyAddress, SupportedChain};
use crate::errors::{Result, VeilError};
use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Swap fee taken on the output, in basis points.
pub const DEFAULT_SWAP_FEE_BPS: u16 = 85;
pub const MAX_BASIS_POINTS: u16 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofKind {
    Shield,
    Transfer,
    Unshield,
    Swap,
}

impl ProofKind {
    /// Everything except a shield spends from the pool and should hide the submitter.
    pub const fn is_private(self) -> bool {
        !matches!(self, Self::Shield)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shield => "shield",
            Self::Transfer => "transfer",
            Self::Unshield => "unshield",
            Self::Swap => "swap",
        }
    }
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Move public tokens into the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShieldRequest {
    pub chain: SupportedChain,
    pub token_address: Address,
    #[serde(with = "u256_decimal")]
    pub amount: U256,
    #[serde(rename = "recipientZkAddress")]
    pub recipient: PrivacyAddress,
}

/// Private pool-to-pool transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub chain: SupportedChain,
    pub wallet_id: String,
    pub token_address: Address,
    #[serde(with = "u256_decimal")]
    pub amount: U256,
    #[serde(rename = "recipientZkAddress")]
    pub recipient: PrivacyAddress,
    /// Token a relay broadcaster would be paid in. Unused until relay submission exists.
    #[serde(
        default,
        rename = "broadcasterFeeTokenAddress",
        skip_serializing_if = "Option::is_none"
    )]
    pub broadcaster_fee_token: Option<Address>,
}

/// Move tokens out of the pool to a public account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnshieldRequest {
    pub chain: SupportedChain,
    pub wallet_id: String,
    pub token_address: Address,
    #[serde(with = "u256_decimal")]
    pub amount: U256,
    #[serde(rename = "destinationAddress")]
    pub destination: Address,
}

/// A DEX route as returned by the quote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
    pub sell_token: Address,
    pub buy_token: Address,
    #[serde(with = "u256_decimal")]
    pub sell_amount: U256,
    #[serde(with = "u256_decimal")]
    pub buy_amount: U256,
    /// DEX router.
    pub to: Address,
    pub data: Bytes,
    #[serde(with = "u256_decimal")]
    pub value: U256,
}

/// Unshield, swap and re-shield atomically through the relay adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub chain: SupportedChain,
    pub wallet_id: String,
    pub quote: SwapQuote,
    #[serde(rename = "recipientZkAddress")]
    pub recipient: PrivacyAddress,
    pub fee_recipient: Address,
    #[serde(default = "default_fee_bps")]
    pub fee_basis_points: u16,
}

const fn default_fee_bps() -> u16 {
    DEFAULT_SWAP_FEE_BPS
}

impl SwapRequest {
    pub fn validate(&self) -> Result<()> {
        if self.fee_basis_points > MAX_BASIS_POINTS {
            return Err(VeilError::Format(format!(
                "fee basis points must be at most {MAX_BASIS_POINTS}, got {}",
                self.fee_basis_points
            )));
        }
        if self.quote.sell_token == self.quote.buy_token {
            return Err(VeilError::Format("swap sells and buys the same token".into()));
        }
        Ok(())
    }
}

/// What to prove. Serializes as `{"kind": ..., "params": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "lowercase")]
pub enum ProofRequest {
    Shield(ShieldRequest),
    Transfer(TransferRequest),
    Unshield(UnshieldRequest),
    Swap(SwapRequest),
}

impl ProofRequest {
    pub const fn kind(&self) -> ProofKind {
        match self {
            Self::Shield(_) => ProofKind::Shield,
            Self::Transfer(_) => ProofKind::Transfer,
            Self::Unshield(_) => ProofKind::Unshield,
            Self::Swap(_) => ProofKind::Swap,
        }
    }

    pub const fn chain(&self) -> SupportedChain {
        match self {
            Self::Shield(r) => r.chain,
            Self::Transfer(r) => r.chain,
            Self::Unshield(r) => r.chain,
            Self::Swap(r) => r.chain,
        }
    }

    /// Input checks that need no engine.
    pub fn validate(&self) -> Result<()> {
        let amount = match self {
            Self::Shield(r) => r.amount,
            Self::Transfer(r) => r.amount,
            Self::Unshield(r) => r.amount,
            Self::Swap(r) => {
                r.validate()?;
                r.quote.sell_amount
            }
        };
        if amount.is_zero() {
            return Err(VeilError::Format("amount must be greater than zero".into()));
        }
        Ok(())
    }
}

/// JSON text of `{transactionData, proof}`. Large integers inside are decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerializedTransaction(String);

impl SerializedTransaction {
    pub fn from_parts(transaction: &Value, proof: &Value) -> Result<Self> {
        let v = serde_json::json!({ "transactionData": transaction, "proof": proof });
        serde_json::to_string(&v)
            .map(Self)
            .map_err(|e| VeilError::Proof(format!("serialize transaction: {e}")))
    }

    pub fn from_json(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw signed transaction bytes from the `transactionData` field.
    pub fn raw_transaction_bytes(&self) -> Result<Vec<u8>> {
        let v: Value = serde_json::from_str(&self.0)
            .map_err(|e| VeilError::Format(format!("serialized transaction is not JSON: {e}")))?;
        let data = v
            .get("transactionData")
            .and_then(Value::as_str)
            .ok_or_else(|| VeilError::Format("transactionData must be a hex string".into()))?;
        let hex_body = data
            .strip_prefix("0x")
            .ok_or_else(|| VeilError::Format("transactionData must be 0x-prefixed".into()))?;
        if hex_body.is_empty() {
            return Err(VeilError::Format("transactionData is empty".into()));
        }
        hex::decode(hex_body)
            .map_err(|e| VeilError::Format(format!("transactionData is not hex: {e}")))
    }
}

impl fmt::Display for SerializedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub chain: SupportedChain,
    pub sell_token: Address,
    pub buy_token: Address,
    #[serde(with = "u256_decimal")]
    pub sell_amount: U256,
    /// Affiliate that receives the swap fee, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_recipient: Option<Address>,
    pub fee_basis_points: u16,
}

/// Source of swap routes. The HTTP quote service lives outside this crate.
#[async_trait]
pub trait SwapQuoter: Send + Sync {
    async fn quote(&self, req: &QuoteRequest) -> Result<SwapQuote>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zk() -> eyre::Result<PrivacyAddress> {
        Ok(PrivacyAddress::parse("0zkrecipient1")?)
    }

    fn quote() -> SwapQuote {
        SwapQuote {
            sell_token: Address::repeat_byte(0x01),
            buy_token: Address::repeat_byte(0x02),
            sell_amount: U256::from(1_000_u64),
            buy_amount: U256::from(990_u64),
            to: Address::repeat_byte(0x0d),
            data: Bytes::from(vec![0xab, 0xcd]),
            value: U256::ZERO,
        }
    }

    #[test]
    fn request_wire_shape_is_kind_and_params() -> eyre::Result<()> {
        let req = ProofRequest::Shield(ShieldRequest {
            chain: SupportedChain::Polygon,
            token_address: Address::repeat_byte(0x11),
            amount: U256::from(10_u64).pow(U256::from(24_u64)),
            recipient: zk()?,
        });
        let v = serde_json::to_value(&req)?;
        assert_eq!(v["kind"], "shield");
        assert_eq!(v["params"]["chain"], "polygon");
        assert_eq!(v["params"]["amount"], "1000000000000000000000000");
        assert_eq!(v["params"]["recipientZkAddress"], "0zkrecipient1");

        let back: ProofRequest = serde_json::from_value(v)?;
        assert_eq!(back, req);
        assert_eq!(back.kind(), ProofKind::Shield);
        assert!(!back.kind().is_private());
        Ok(())
    }

    #[test]
    fn swap_fee_defaults_and_is_bounded() -> eyre::Result<()> {
        let v = serde_json::json!({
            "kind": "swap",
            "params": {
                "chain": "arbitrum",
                "walletId": "w1",
                "quote": serde_json::to_value(quote())?,
                "recipientZkAddress": "0zkrecipient1",
                "feeRecipient": format!("{}", Address::repeat_byte(0xfe)),
            }
        });
        let req: ProofRequest = serde_json::from_value(v)?;
        let ProofRequest::Swap(mut swap) = req else {
            eyre::bail!("expected a swap request");
        };
        assert_eq!(swap.fee_basis_points, DEFAULT_SWAP_FEE_BPS);
        assert!(swap.validate().is_ok());

        swap.fee_basis_points = 10_001;
        assert!(matches!(swap.validate(), Err(VeilError::Format(_))));
        Ok(())
    }

    #[test]
    fn zero_amount_is_rejected() -> eyre::Result<()> {
        let req = ProofRequest::Unshield(UnshieldRequest {
            chain: SupportedChain::Polygon,
            wallet_id: "w".into(),
            token_address: Address::repeat_byte(0x11),
            amount: U256::ZERO,
            destination: Address::repeat_byte(0x22),
        });
        assert!(matches!(req.validate(), Err(VeilError::Format(_))));
        Ok(())
    }

    #[test]
    fn raw_bytes_come_from_transaction_data() -> eyre::Result<()> {
        let tx = SerializedTransaction::from_parts(
            &serde_json::json!("0x02f86b"),
            &serde_json::json!({"a": "1"}),
        )?;
        assert_eq!(tx.raw_transaction_bytes()?, vec![0x02, 0xf8, 0x6b]);

        for bad in [
            r#"{"transactionData": {"to": "0x00"}}"#,
            r#"{"transactionData": "02f86b"}"#,
            r#"{"transactionData": "0x"}"#,
            r#"{"transactionData": "0xzz"}"#,
            "not json",
        ] {
            assert!(
                matches!(
                    SerializedTransaction::from_json(bad).raw_transaction_bytes(),
                    Err(VeilError::Format(_))
                ),
                "accepted {bad}"
            );
        }
        Ok(())
    }
}
