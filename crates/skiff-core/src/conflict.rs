//! Destination collisions and how the user resolves them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Size and modification time of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, when the endpoint reports one.
    pub modified: Option<DateTime<Utc>>,
    /// Whether the object is a directory.
    pub is_directory: bool,
}

impl FileStat {
    /// Stat for a regular file.
    pub fn file(size: u64, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            size,
            modified,
            is_directory: false,
        }
    }

    /// Stat for a directory.
    pub fn directory() -> Self {
        Self {
            size: 0,
            modified: None,
            is_directory: true,
        }
    }
}

/// A name collision found before writing a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Task that was suspended.
    pub task_id: TaskId,
    /// Name of the colliding file.
    pub file_name: String,
    /// Source location (root-relative path or local path).
    pub source_path: String,
    /// Destination path that already exists.
    pub destination_path: String,
    /// Size of the object already at the destination.
    pub existing_size: u64,
    /// Modification time of the object already at the destination.
    pub existing_modified: Option<DateTime<Utc>>,
    /// Size of the incoming file.
    pub new_size: u64,
    /// Modification time of the incoming file, when the source could be stat'ed.
    pub new_modified: Option<DateTime<Utc>>,
}

/// How to resolve a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictDirective {
    /// Overwrite the existing file.
    Replace,
    /// Do not write; the task is cancelled.
    Skip,
    /// Write beside the existing file as "name (copy).ext".
    Duplicate,
}

impl std::fmt::Display for ConflictDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Skip => write!(f, "skip"),
            Self::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// Insert " (copy)" before the extension of a file name.
///
/// `report.pdf` becomes `report (copy).pdf`; names without an extension
/// (including dotfiles such as `.env`) get the suffix appended.
pub fn duplicate_name(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => format!("{} (copy){}", &name[..idx], &name[idx..]),
        _ => format!("{name} (copy)"),
    }
}
