//! Core types and traits for skiff.
//!
//! This crate provides the data model shared by the scanner and the transfer
//! engine: entries, tasks, results, conflicts, the filesystem bridge trait and
//! the engine configuration.

mod bridge;
mod config;
mod conflict;
mod entry;
mod error;
mod task;

pub use bridge::{
    ArchivePhase, ArchiveProgress, ArchiveProgressFn, BoxFuture, Capabilities, DirEntry, Endpoint,
    FsBridge, ProgressFn, SessionHandle, TransferId, TransferSample,
};
pub use config::{TransferConfig, TransferConfigBuilder};
pub use conflict::{duplicate_name, Conflict, ConflictDirective, FileStat};
pub use entry::{join_path, ContentHandle, Entry};
pub use error::{BridgeError, BridgeResult, ScanWarning, WarningKind};
pub use task::{
    display_percent, TaskId, TaskStatus, TransferResult, TransferTask, IN_FLIGHT_PERCENT_CAP,
};
