use thiserror::Error;

/// Errors surfaced by ledger mutations.
///
/// Only `Validation` is ever returned to callers of mutation methods;
/// `StorageUnavailable` is recorded as a warning while the in-memory state
/// stays authoritative for the session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("local storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl LedgerError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
