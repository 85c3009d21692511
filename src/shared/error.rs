//! Shared Error Types
//!
//! The closed error taxonomy for everything that crosses the remote boundary
//! or a sync run.
//!
//! # Error Categories
//!
//! - `Network` - timeouts, unreachable hosts, 5xx responses (retryable)
//! - `Auth` - expired or rejected session (retry after refresh)
//! - `Conflict` - the remote already has the record (treated as success)
//! - `Validation` - malformed record (permanent, surfaced verbatim)
//! - `Storage` - local persistence failure (bounded retry, then surfaced)
//!
//! Every variant carries a human-readable message and a machine-readable
//! code. Classification always goes through [`SyncError::disposition`], which
//! matches exhaustively.
//!
//! # Usage
//!
//! ```rust
//! use trailsync::shared::error::{Disposition, SyncError};
//!
//! let error = SyncError::network("HTTP_503", "service unavailable");
//! assert_eq!(error.disposition(), Disposition::Retry);
//! ```

use std::time::Duration;
use thiserror::Error;

/// Errors produced while talking to the remote store or running a sync
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Transient transport failure
    #[error("network error [{code}]: {message}")]
    Network {
        /// Machine-readable code
        code: String,
        /// Human-readable error message
        message: String,
    },

    /// Session expired or credentials rejected
    #[error("authentication error [{code}]: {message}")]
    Auth {
        /// Machine-readable code
        code: String,
        /// Human-readable error message
        message: String,
    },

    /// The remote already holds this record
    #[error("conflict [{code}]: {message}")]
    Conflict {
        /// Machine-readable code
        code: String,
        /// Human-readable error message
        message: String,
    },

    /// The record was rejected as malformed; shown to the user as-is
    #[error("{message}")]
    Validation {
        /// Machine-readable code
        code: String,
        /// Human-readable error message
        message: String,
    },

    /// Local persistence failed
    #[error("storage error [{code}]: {message}")]
    Storage {
        /// Machine-readable code
        code: String,
        /// Human-readable error message
        message: String,
    },
}

/// Coarse error kind, mirrors the enum variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Auth,
    Conflict,
    Validation,
    Storage,
}

/// What the sync engine does with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Back off and try again later
    Retry,
    /// Refresh the session, then retry; re-authenticate otherwise
    RefreshSession,
    /// Idempotent convergence: count it as done
    TreatAsSuccess,
    /// Stop retrying; needs user action
    Permanent,
    /// Local failure; report it in the run summary
    Surface,
}

impl SyncError {
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            code: code.into(),
            message: message.into(),
        }
    }

    /// A network call exceeded its individual deadline
    pub fn timeout(after: Duration) -> Self {
        Self::network("TIMEOUT", format!("no response within {} ms", after.as_millis()))
    }

    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn storage(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Network { .. } => ErrorKind::Network,
            SyncError::Auth { .. } => ErrorKind::Auth,
            SyncError::Conflict { .. } => ErrorKind::Conflict,
            SyncError::Validation { .. } => ErrorKind::Validation,
            SyncError::Storage { .. } => ErrorKind::Storage,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            SyncError::Network { code, .. }
            | SyncError::Auth { code, .. }
            | SyncError::Conflict { code, .. }
            | SyncError::Validation { code, .. }
            | SyncError::Storage { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SyncError::Network { message, .. }
            | SyncError::Auth { message, .. }
            | SyncError::Conflict { message, .. }
            | SyncError::Validation { message, .. }
            | SyncError::Storage { message, .. } => message,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self.kind() {
            ErrorKind::Network => Disposition::Retry,
            ErrorKind::Auth => Disposition::RefreshSession,
            ErrorKind::Conflict => Disposition::TreatAsSuccess,
            ErrorKind::Validation => Disposition::Permanent,
            ErrorKind::Storage => Disposition::Surface,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.disposition(), Disposition::Retry)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation("SERIALIZATION", format!("JSON error: {}", err))
    }
}
