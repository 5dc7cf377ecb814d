use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VeilError>;

/// A structured error suitable for handing to a UI observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VeilError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("invalid input: {0}")]
    Format(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupted wallet store: {0}")]
    Corruption(String),

    // Carries no detail: the cause (wrong key, tampering, truncation) must stay opaque.
    #[error("decryption failed")]
    Decrypt,

    #[error("privacy engine is not ready")]
    EngineNotReady,

    #[error("proof generation failed: {0}")]
    Proof(String),

    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("another wallet operation is in progress")]
    Busy,

    #[error("proof task cancelled")]
    Cancelled,
}

impl VeilError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::Derivation(_) => "derivation_error",
            Self::Format(_) => "format_error",
            Self::NotFound(_) => "not_found",
            Self::Corruption(_) => "corruption_error",
            Self::Decrypt => "decrypt_error",
            Self::EngineNotReady => "engine_not_ready",
            Self::Proof(_) => "proof_error",
            Self::Broadcast(_) => "broadcast_error",
            Self::Storage(_) => "storage_error",
            Self::Busy => "busy",
            Self::Cancelled => "cancelled",
        }
    }

    /// Failures of the medium rather than the input; worth retrying against another endpoint.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Broadcast(_) | Self::Storage(_))
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from(self)
    }

    pub(crate) fn storage(context: &str, e: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{context}: {e}"))
    }
}

impl From<&VeilError> for ErrorReport {
    fn from(e: &VeilError) -> Self {
        Self {
            code: e.code().to_owned(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypt_error_has_no_detail() {
        let r = VeilError::Decrypt.report();
        assert_eq!(r.code, "decrypt_error");
        assert_eq!(r.message, "decryption failed");
    }

    #[test]
    fn codes_are_snake_case() {
        let all = [
            VeilError::Configuration(String::new()),
            VeilError::Derivation(String::new()),
            VeilError::Format(String::new()),
            VeilError::NotFound(String::new()),
            VeilError::Corruption(String::new()),
            VeilError::Decrypt,
            VeilError::EngineNotReady,
            VeilError::Proof(String::new()),
            VeilError::Broadcast(String::new()),
            VeilError::Storage(String::new()),
            VeilError::Busy,
            VeilError::Cancelled,
        ];
        for e in &all {
            assert!(
                e.code()
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c == '_'),
                "bad code {}",
                e.code()
            );
        }
    }
}
