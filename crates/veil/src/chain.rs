use crate::errors::{Result, VeilError};
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SupportedChain {
    Ethereum,
    #[default]
    Polygon,
    Arbitrum,
}

impl SupportedChain {
    pub const ALL: [Self; 3] = [Self::Ethereum, Self::Polygon, Self::Arbitrum];

    pub const fn chain_id(self) -> u64 {
        match self {
            Self::Ethereum => 1,
            Self::Polygon => 137,
            Self::Arbitrum => 42161,
        }
    }

    /// Network name the privacy engine uses for this chain.
    pub const fn engine_label(self) -> &'static str {
        match self {
            Self::Ethereum => "Ethereum",
            Self::Polygon => "Polygon",
            Self::Arbitrum => "Arbitrum",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Polygon => "polygon",
            Self::Arbitrum => "arbitrum",
        }
    }

    /// Public endpoint used when no RPC URL is configured for broadcasting.
    pub const fn default_rpc_url(self) -> &'static str {
        match self {
            Self::Ethereum => "https://eth.llamarpc.com",
            Self::Polygon => "https://polygon-rpc.com",
            Self::Arbitrum => "https://arb1.arbitrum.io/rpc",
        }
    }

    pub fn from_chain_id(id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.chain_id() == id)
    }
}

impl fmt::Display for SupportedChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupportedChain {
    type Err = VeilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ethereum" | "eth" | "mainnet" => Ok(Self::Ethereum),
            "polygon" | "matic" => Ok(Self::Polygon),
            "arbitrum" | "arb" => Ok(Self::Arbitrum),
            other => Err(VeilError::Format(format!("unsupported chain: {other}"))),
        }
    }
}

/// Shielded-pool receiving address (`0zk...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrivacyAddress(String);

impl PrivacyAddress {
    pub const PREFIX: &'static str = "0zk";

    pub fn parse(s: &str) -> Result<Self> {
        let t = s.trim();
        let body = t
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| VeilError::Format("privacy address must start with 0zk".into()))?;
        if body.is_empty() || !body.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(VeilError::Format("malformed privacy address".into()));
        }
        Ok(Self(t.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PrivacyAddress {
    type Error = VeilError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<PrivacyAddress> for String {
    fn from(a: PrivacyAddress) -> Self {
        a.0
    }
}

impl fmt::Display for PrivacyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a public 0x account address.
pub fn parse_public_address(s: &str) -> Result<Address> {
    Address::from_str(s.trim()).map_err(|e| VeilError::Format(format!("invalid address: {e}")))
}

/// True when `s` looks like a shielded `0zk` address rather than a public one.
pub fn is_privacy_address(s: &str) -> bool {
    s.trim().starts_with(PrivacyAddress::PREFIX)
}

/// `U256` as a decimal string, so amounts survive JSON consumers limited to f64.
pub mod u256_decimal {
    use alloy::primitives::U256;
    use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let s = String::deserialize(d)?;
        parse(&s).map_err(D::Error::custom)
    }

    pub fn parse(s: &str) -> Result<U256, String> {
        let t = s.trim();
        if t.is_empty() || !t.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("expected decimal integer, got {t:?}"));
        }
        U256::from_str_radix(t, 10).map_err(|e| format!("amount out of range: {e}"))
    }
}
