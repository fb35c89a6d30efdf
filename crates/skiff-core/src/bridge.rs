//! The filesystem bridge: byte-level operations supplied by the host.
//!
//! The engine never touches the network itself. Everything that moves bytes
//! goes through an [`FsBridge`]. Only the plain read/write/mkdir/stat/delete/list
//! operations are mandatory; the rest are optional and advertised once through
//! [`Capabilities`], each with a fallback in the executor.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::conflict::FileStat;
use crate::error::{BridgeError, BridgeResult};

/// Type alias for boxed futures returned by bridge methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque handle naming an open remote session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(pub String);

impl SessionHandle {
    /// Create a session handle.
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// The raw handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// The local filesystem.
    Local,
    /// A remote filesystem reachable through a session.
    Remote(SessionHandle),
}

impl Endpoint {
    /// Whether this endpoint is remote.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// The session handle of a remote endpoint.
    pub fn session(&self) -> Option<&SessionHandle> {
        match self {
            Self::Remote(session) => Some(session),
            Self::Local => None,
        }
    }
}

/// Identifier of a low-level transfer or compression job inside the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(pub u64);

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "xfer-{}", self.0)
    }
}

/// A raw progress sample for one file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferSample {
    /// Bytes moved so far.
    pub transferred: u64,
    /// Total bytes of the file.
    pub total: u64,
    /// Speed in bytes per second, when the bridge measures it.
    pub speed: Option<f64>,
}

impl TransferSample {
    /// Create a sample without a speed measurement.
    pub fn new(transferred: u64, total: u64) -> Self {
        Self {
            transferred,
            total,
            speed: None,
        }
    }
}

/// Callback the bridge invokes with per-file progress.
pub type ProgressFn<'a> = &'a (dyn Fn(TransferSample) + Send + Sync);

/// Phase of an archive transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchivePhase {
    Compressing,
    Uploading,
    Extracting,
}

impl ArchivePhase {
    /// Label shown to the user while the phase runs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Compressing => "compressing",
            Self::Uploading => "uploading",
            Self::Extracting => "extracting",
        }
    }
}

/// Progress of an archive transfer, as a percentage of the whole job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchiveProgress {
    /// Current phase.
    pub phase: ArchivePhase,
    /// Overall completion, 0 to 100.
    pub percent: f64,
}

/// Callback the bridge invokes with archive progress.
pub type ArchiveProgressFn<'a> = &'a (dyn Fn(ArchiveProgress) + Send + Sync);

/// A child listed from a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Child name (single path segment).
    pub name: String,
    /// Whether the child is a directory.
    pub is_directory: bool,
    /// Size in bytes for files.
    pub size: u64,
}

/// Optional capabilities of a bridge, resolved once when an engine is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// `write_with_progress` reports granular progress.
    pub granular_write: bool,
    /// `stream_upload` moves a local path to a remote path without buffering.
    pub path_streaming: bool,
    /// `archive_supported` / `upload_archive` / `cancel_archive` are available.
    pub archive: bool,
    /// `abort_transfer` is available in addition to `cancel_transfer`.
    pub abort: bool,
}

impl Capabilities {
    /// A bridge with only the mandatory operations.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// A bridge with every optional operation.
    pub fn all() -> Self {
        Self {
            granular_write: true,
            path_streaming: true,
            archive: true,
            abort: true,
        }
    }
}

/// Byte-level filesystem operations against local and remote endpoints.
pub trait FsBridge: Send + Sync {
    /// Optional capabilities this bridge provides.
    fn capabilities(&self) -> Capabilities;

    /// Read a whole file.
    fn read<'a>(&'a self, endpoint: &'a Endpoint, path: &'a str)
        -> BoxFuture<'a, BridgeResult<Vec<u8>>>;

    /// Write a whole file, replacing any existing content.
    fn write<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        path: &'a str,
        data: Vec<u8>,
    ) -> BoxFuture<'a, BridgeResult<()>>;

    /// Create a directory. Fails if it cannot be created (including when it exists).
    fn mkdir<'a>(&'a self, endpoint: &'a Endpoint, path: &'a str) -> BoxFuture<'a, BridgeResult<()>>;

    /// Stat a path; `Ok(None)` when nothing exists there.
    fn stat<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        path: &'a str,
    ) -> BoxFuture<'a, BridgeResult<Option<FileStat>>>;

    /// Delete a file or directory tree.
    fn delete<'a>(&'a self, endpoint: &'a Endpoint, path: &'a str) -> BoxFuture<'a, BridgeResult<()>>;

    /// List the children of a directory.
    fn list_dir<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        path: &'a str,
    ) -> BoxFuture<'a, BridgeResult<Vec<DirEntry>>>;

    /// Write a whole file and report progress while doing so.
    fn write_with_progress<'a>(
        &'a self,
        _endpoint: &'a Endpoint,
        _path: &'a str,
        _data: Vec<u8>,
        _id: TransferId,
        _progress: ProgressFn<'a>,
    ) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async { Err(BridgeError::unsupported("write_with_progress")) })
    }

    /// Stream a local file to a remote path without loading it into memory.
    fn stream_upload<'a>(
        &'a self,
        _session: &'a SessionHandle,
        _local: &'a Path,
        _remote: &'a str,
        _id: TransferId,
        _progress: ProgressFn<'a>,
    ) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async { Err(BridgeError::unsupported("stream_upload")) })
    }

    /// Whether the remote side can extract uploaded archives.
    fn archive_supported<'a>(&'a self, _session: &'a SessionHandle) -> BoxFuture<'a, BridgeResult<bool>> {
        Box::pin(async { Ok(false) })
    }

    /// Compress a local folder, upload it as one archive and extract it into `remote_dir`.
    fn upload_archive<'a>(
        &'a self,
        _session: &'a SessionHandle,
        _local_dir: &'a Path,
        _remote_dir: &'a str,
        _id: TransferId,
        _progress: ArchiveProgressFn<'a>,
    ) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async { Err(BridgeError::unsupported("upload_archive")) })
    }

    /// Abort a running archive transfer.
    fn cancel_archive(&self, _id: TransferId) -> BoxFuture<'_, BridgeResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Cancel a running transfer by identifier.
    fn cancel_transfer(&self, _id: TransferId) -> BoxFuture<'_, BridgeResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Second cancellation primitive some bridges expose instead of `cancel_transfer`.
    fn abort_transfer(&self, _id: TransferId) -> BoxFuture<'_, BridgeResult<()>> {
        Box::pin(async { Err(BridgeError::unsupported("abort_transfer")) })
    }
}
