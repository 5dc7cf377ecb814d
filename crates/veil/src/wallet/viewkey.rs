//! Read-only viewing credentials for audit, tax and compliance.

use super::WalletLifecycle;
use crate::errors::{Result, VeilError};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKeyType {
    /// Full transaction history.
    Full,
    /// Current balances only.
    Balance,
    /// Proof of one transaction.
    Single,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewKey {
    #[serde(rename = "type")]
    pub kind: ViewKeyType,
    pub key: String,
    pub wallet_address: String,
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl ViewKey {
    /// Shareable form: base64 of the JSON object.
    pub fn encode(&self) -> Result<String> {
        let json =
            serde_json::to_vec(self).map_err(|e| VeilError::Format(format!("view key: {e}")))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| VeilError::Format(format!("view key is not base64: {e}")))?;
        let vk: Self = serde_json::from_slice(&raw)
            .map_err(|e| VeilError::Format(format!("malformed view key: {e}")))?;
        if vk.kind != ViewKeyType::Single && vk.tx_hash.is_some() {
            return Err(VeilError::Format(
                "only single-transaction view keys carry a tx hash".into(),
            ));
        }
        Ok(vk)
    }
}

/// View key for the unlocked wallet. `tx_hash` is kept only for [`ViewKeyType::Single`].
pub async fn generate_view_key(
    lifecycle: &WalletLifecycle,
    kind: ViewKeyType,
    chain_id: u64,
    tx_hash: Option<&str>,
) -> Result<ViewKey> {
    let identity = lifecycle.require_session().await?;
    let key = lifecycle
        .engine()
        .ready_engine()?
        .shareable_viewing_key(&identity.wallet_id)
        .await?;
    let tx_hash = match kind {
        ViewKeyType::Single => tx_hash.map(str::to_owned),
        ViewKeyType::Full | ViewKeyType::Balance => None,
    };
    Ok(ViewKey {
        kind,
        key,
        wallet_address: identity.privacy_address.to_string(),
        chain_id,
        tx_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: ViewKeyType, tx: Option<&str>) -> ViewKey {
        ViewKey {
            kind,
            key: "vk-abc".into(),
            wallet_address: "0zkabc".into(),
            chain_id: 137,
            tx_hash: tx.map(str::to_owned),
        }
    }

    #[test]
    fn export_is_base64_json_with_type_field() -> eyre::Result<()> {
        let s = sample(ViewKeyType::Balance, None).encode()?;
        let raw = base64::engine::general_purpose::STANDARD.decode(&s)?;
        let v: serde_json::Value = serde_json::from_slice(&raw)?;
        assert_eq!(
            v,
            serde_json::json!({
                "type": "balance",
                "key": "vk-abc",
                "walletAddress": "0zkabc",
                "chainId": 137
            })
        );
        Ok(())
    }

    #[test]
    fn single_key_roundtrips_tx_hash() -> eyre::Result<()> {
        let vk = sample(ViewKeyType::Single, Some("0xfeed"));
        let back = ViewKey::decode(&vk.encode()?)?;
        assert_eq!(back, vk);
        Ok(())
    }

    #[test]
    fn malformed_input_is_format_error() {
        assert!(matches!(
            ViewKey::decode("%%%"),
            Err(VeilError::Format(_))
        ));
        let not_json = base64::engine::general_purpose::STANDARD.encode(b"hello");
        assert!(matches!(
            ViewKey::decode(&not_json),
            Err(VeilError::Format(_))
        ));
        let bad_type = base64::engine::general_purpose::STANDARD
            .encode(br#"{"type":"admin","key":"k","walletAddress":"0zk1","chainId":1}"#);
        assert!(ViewKey::decode(&bad_type).is_err());
    }
}
