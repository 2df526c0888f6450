use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::FieldMap;

/// Remote failure codes, named after the document store's status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    Unavailable,
    DeadlineExceeded,
    Aborted,
    Internal,
    ResourceExhausted,
    PermissionDenied,
    Unauthenticated,
    NotFound,
    InvalidArgument,
    Unknown(String),
}

/// How the writer reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    RateLimited,
    Other,
}

impl ErrorCode {
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code.trim().to_lowercase().replace('_', "-").as_str() {
            "unavailable" => Self::Unavailable,
            "deadline-exceeded" => Self::DeadlineExceeded,
            "aborted" => Self::Aborted,
            "internal" => Self::Internal,
            "resource-exhausted" => Self::ResourceExhausted,
            "permission-denied" => Self::PermissionDenied,
            "unauthenticated" => Self::Unauthenticated,
            "not-found" => Self::NotFound,
            "invalid-argument" => Self::InvalidArgument,
            other => Self::Unknown(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::Aborted => "aborted",
            Self::Internal => "internal",
            Self::ResourceExhausted => "resource-exhausted",
            Self::PermissionDenied => "permission-denied",
            Self::Unauthenticated => "unauthenticated",
            Self::NotFound => "not-found",
            Self::InvalidArgument => "invalid-argument",
            Self::Unknown(code) => code,
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable | Self::DeadlineExceeded | Self::Aborted | Self::Internal => {
                ErrorClass::Transient
            }
            Self::ResourceExhausted => ErrorClass::RateLimited,
            _ => ErrorClass::Other,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("remote store error ({code}): {message}")]
pub struct RemoteError {
    pub code: ErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Per-user remote document store, consumed only through get/update-by-key.
///
/// `update` merges the given fields into the document and leaves every
/// other field untouched.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<FieldMap>, RemoteError>;
    async fn update(&self, user_id: &str, fields: &FieldMap) -> Result<(), RemoteError>;
}
