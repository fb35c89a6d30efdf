//! Error types for bridge operations and scanning.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a [`FsBridge`](crate::FsBridge) implementation.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bridge does not provide an optional capability.
    #[error("Capability not supported: {capability}")]
    Unsupported { capability: &'static str },

    /// Archive transfer cannot be used for this folder; per-file transfer must be used instead.
    #[error("Archive transfer unavailable, falling back: {reason}")]
    ArchiveFallback { reason: String },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The transfer was aborted through a cancel request.
    #[error("Transfer aborted")]
    Aborted,

    /// The session handle does not name an open remote session.
    #[error("Unknown session: {handle}")]
    UnknownSession { handle: String },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl BridgeError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Create an unsupported-capability error.
    pub fn unsupported(capability: &'static str) -> Self {
        Self::Unsupported { capability }
    }

    /// Create a free-form error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Whether this error only signals a missing optional capability.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Whether the archive strategy asked for a per-file fallback.
    pub fn is_archive_fallback(&self) -> bool {
        matches!(self, Self::ArchiveFallback { .. } | Self::Unsupported { .. })
    }

    /// Whether the operation stopped because of a cancel request.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Result type for bridge calls.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Permission was denied.
    PermissionDenied,
    /// Error listing a directory.
    ReadError,
    /// Error reading metadata.
    MetadataError,
}

/// Non-fatal warning encountered during a scan.
///
/// A directory that cannot be listed is skipped; its siblings stay in the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: String,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<String>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a warning from a failed directory listing.
    pub fn read_error(path: impl Into<String>, error: &BridgeError) -> Self {
        let kind = match error {
            BridgeError::PermissionDenied { .. } => WarningKind::PermissionDenied,
            _ => WarningKind::ReadError,
        };
        Self {
            path: path.into(),
            message: format!("Read error: {error}"),
            kind,
        }
    }
}
