//! Error types for machine backend operations.
//!
//! Every failure an adapter can hit while provisioning or tearing down a
//! machine maps onto one of these variants. The orchestrator never surfaces
//! them to a caller; it records them on the machine row.

use ada_core::{CoreError, PollTimeout};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Unknown backend kind: {0}")]
    UnknownKind(String),

    /// Template and provider disagree on the backend kind.
    #[error("Backend kind mismatch: template is '{template}', provider is '{provider}'")]
    KindMismatch { template: String, provider: String },

    /// Missing or malformed template/provider parameter.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bounded poll passed its deadline.
    #[error("Backend timeout: {0}")]
    Timeout(#[from] PollTimeout),

    /// The backend API or CLI reported a failure.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Dependency not found: {0}")]
    DependencyNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for ProviderError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Dependency(tool) => ProviderError::DependencyNotFound(tool),
            CoreError::Timeout(what) => ProviderError::Backend(format!("timed out: {what}")),
            CoreError::Io(e) => ProviderError::Io(e),
            other => ProviderError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Backend(format!("unexpected backend output: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
