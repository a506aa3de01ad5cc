//! Shared error taxonomy (spec §7) used by the shim, the shim client and the
//! control plane alike, so a failure on either socket maps onto the same
//! wire-level `errorCode` strings.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum OpenmuxError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous: {0}")]
    Ambiguous(String),

    #[error("timed out waiting for response")]
    Timeout,

    #[error("client detached")]
    Detached,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OpenmuxError {
    pub fn code(&self) -> ErrorCode {
        match self {
            OpenmuxError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            OpenmuxError::NotFound(_) => ErrorCode::NotFound,
            OpenmuxError::Ambiguous(_) => ErrorCode::Ambiguous,
            OpenmuxError::Timeout => ErrorCode::Timeout,
            OpenmuxError::Detached => ErrorCode::Detached,
            OpenmuxError::Io(_) => ErrorCode::Io,
            OpenmuxError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        OpenmuxError::NotFound(what.into())
    }

    pub fn ambiguous(what: impl Into<String>) -> Self {
        OpenmuxError::Ambiguous(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        OpenmuxError::InvalidRequest(what.into())
    }

    pub fn internal(what: impl Into<String>) -> Self {
        OpenmuxError::Internal(what.into())
    }

    /// The bare message without the `Display` impl's `"{code}: "` prefix —
    /// `errorCode` already carries the class, so wire responses and CLI
    /// stderr use this instead of `to_string()` to avoid a redundant and,
    /// for literal-text scenarios (spec §8), wrong prefix.
    pub fn message(&self) -> String {
        match self {
            OpenmuxError::InvalidRequest(s) | OpenmuxError::NotFound(s) | OpenmuxError::Ambiguous(s) | OpenmuxError::Internal(s) => {
                s.clone()
            }
            OpenmuxError::Timeout => "timed out waiting for response".to_string(),
            OpenmuxError::Detached => "client detached".to_string(),
            OpenmuxError::Io(e) => e.to_string(),
        }
    }
}

/// Wire-level error code, serialized as the lowercase snake_case strings from
/// spec §4.E / §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    NotFound,
    Ambiguous,
    Timeout,
    Detached,
    Io,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Ambiguous => "ambiguous",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Detached => "detached",
            ErrorCode::Io => "io",
            ErrorCode::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// CLI exit codes, per spec §4.I.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const USAGE: i32 = 2;
    pub const NO_UI: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const AMBIGUOUS: i32 = 5;
    pub const INTERNAL: i32 = 6;
}

impl ErrorCode {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCode::NotFound => exit_code::NOT_FOUND,
            ErrorCode::Ambiguous => exit_code::AMBIGUOUS,
            ErrorCode::InvalidRequest => exit_code::USAGE,
            _ => exit_code::INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, OpenmuxError>;
