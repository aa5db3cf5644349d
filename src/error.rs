use thiserror::Error;

/// Errors surfaced by coordinator operations. Mid-duel failures never use
/// this type; they are logged and converted into state transitions instead,
/// and bus publish failures are always log-and-continue.
#[derive(Debug, Error)]
pub enum DuelError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),
}

impl DuelError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        DuelError::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        DuelError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        DuelError::Conflict(msg.into())
    }

    pub fn store(err: anyhow::Error) -> Self {
        DuelError::StoreUnavailable(err)
    }
}
