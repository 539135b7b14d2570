// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Printrelay.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for all Printrelay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    // -- Event bus errors (fatal to a subscription) --
    #[error("event bus transport error: {0}")]
    Transport(String),

    #[error("event bus rejected credentials: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // -- Per-event errors --
    #[error("schema lookup failed: {0}")]
    Schema(String),

    #[error("event decode failed: {0}")]
    Decode(String),

    // -- Per-job errors --
    #[error("invalid print job: {0}")]
    InvalidJob(String),

    #[error("content resolution failed: {0}")]
    Content(String),

    #[error("unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("printer I/O failed: {0}")]
    Printer(String),

    #[error("operation not supported by this driver: {0}")]
    UnsupportedOperation(String),

    // -- Configuration --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Classification of errors for reconnect decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network blip, stream reset, server unavailable. Safe to reconnect.
    Transient,
    /// Credentials rejected. Refresh the token before reconnecting.
    Auth,
    /// Nothing a reconnect can fix.
    Permanent,
}

/// Classify a `RelayError` into an `ErrorClass`.
pub fn classify_error(err: &RelayError) -> ErrorClass {
    match err {
        RelayError::Transport(_) => ErrorClass::Transient,
        RelayError::Unauthenticated(_) => ErrorClass::Auth,
        RelayError::PermissionDenied(_) | RelayError::Config(_) => ErrorClass::Permanent,

        // Per-event and per-job errors never reach the supervisor in normal
        // operation; if they do, the stream state is unknown.
        RelayError::Schema(_) | RelayError::Decode(_) => ErrorClass::Transient,
        RelayError::InvalidJob(_)
        | RelayError::Content(_)
        | RelayError::UnsupportedContent(_)
        | RelayError::Printer(_)
        | RelayError::UnsupportedOperation(_)
        | RelayError::Serialization(_) => ErrorClass::Permanent,

        RelayError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ErrorClass::Permanent
            }
            _ => ErrorClass::Transient,
        },
    }
}
