use ada_core::CoreError;
use ada_provider::ProviderError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Something the data model rules out was observed, e.g. an illegal
    /// state transition or a template/provider kind mismatch.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(message) => OrchestratorError::Validation(message),
            CoreError::Io(e) => OrchestratorError::Io(e),
            other => OrchestratorError::Provider(other.into()),
        }
    }
}
