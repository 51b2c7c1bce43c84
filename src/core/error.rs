//! Error types and retriability.
//!
//! Trellis defines the common error conditions of the synchronization core.
//! Transient store conditions are retried internally (lease keeper backoff);
//! transaction conflicts and barrier failures are surfaced verbatim so the
//! caller decides whether to retry with fresh state.

use thiserror::Error;

/// Common Trellis error conditions.
#[derive(Debug, Error)]
pub enum TrellisError {
    /// The store could not be reached or answered with a transient failure.
    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// A compare-and-set transaction lost to a concurrent conflicting write.
    ///
    /// Never retried internally; the caller re-reads and decides.
    #[error("transaction conflict on key {key:?}")]
    TxnConflict { key: String },

    /// The watch subscription terminated and cannot deliver further events.
    #[error("watch terminated: {message}")]
    WatchTerminated { message: String },

    /// A revision wait was released because the dispatch loop exited.
    ///
    /// The waited-for revision can no longer be guaranteed to become
    /// visible in the caches.
    #[error("sync stopped before revision {waited} was applied (reached {reached})")]
    SyncStopped { waited: u64, reached: u64 },

    /// Lease not found or already expired on the store side.
    #[error("lease {lease_id} not found")]
    LeaseNotFound { lease_id: i64 },

    /// The keepalive stream for a held lease broke.
    #[error("lease {lease_id} lost: {message}")]
    LeaseLost { lease_id: i64, message: String },

    /// A store key did not match the `<region>/<type>/<key>` layout.
    #[error("malformed store key {key:?}")]
    MalformedKey { key: String },

    /// Invalid request or configuration value.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl TrellisError {
    /// Create a StoreUnavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an InvalidRequest error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Check if this error indicates the operation may succeed on retry.
    ///
    /// Transaction conflicts are deliberately not retriable here: the
    /// caller must re-read current state before trying again.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::LeaseLost { .. } | Self::LeaseNotFound { .. }
        )
    }
}

/// Result type using TrellisError.
pub type TrellisResult<T> = Result<T, TrellisError>;
