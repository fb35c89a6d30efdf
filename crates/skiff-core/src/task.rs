//! Transfer tasks and per-entry results.

use serde::{Deserialize, Serialize};

/// Percent shown while a task still has files outstanding.
pub const IN_FLIGHT_PERCENT_CAP: f64 = 99.9;

/// Unique identifier for a transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId from a u64.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle state of a transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the task reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a cancel request should move this task to `Cancelled`.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The user-visible unit of progress: one folder bundle or one standalone file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTask {
    /// Task identifier.
    pub id: TaskId,
    /// Display name (folder or file name, or an archive phase label).
    pub name: String,
    /// Whether the task covers a folder.
    pub is_directory: bool,
    /// Total bytes to move.
    pub total_bytes: u64,
    /// Bytes shown as transferred: completed files plus the in-flight file's partial bytes.
    pub transferred_bytes: u64,
    /// Bytes from files that have fully finished.
    pub completed_files_bytes: u64,
    /// Number of files in the task.
    pub file_count: usize,
    /// Number of files fully transferred.
    pub completed_count: usize,
    /// Instantaneous speed in bytes per second.
    pub speed: f64,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Error message for failed tasks.
    pub error: Option<String>,
}

impl TransferTask {
    /// Create a pending task.
    pub fn new(
        id: TaskId,
        name: impl Into<String>,
        is_directory: bool,
        total_bytes: u64,
        file_count: usize,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            is_directory,
            total_bytes,
            transferred_bytes: 0,
            completed_files_bytes: 0,
            file_count,
            completed_count: 0,
            speed: 0.0,
            status: TaskStatus::Pending,
            error: None,
        }
    }

    /// Whether every file of the task has finished.
    pub fn is_fully_transferred(&self) -> bool {
        self.completed_count >= self.file_count
    }

    /// Displayed percentage.
    ///
    /// Capped at [`IN_FLIGHT_PERCENT_CAP`] until the last file completes, and
    /// exactly 100 once it has.
    pub fn percent(&self) -> f64 {
        display_percent(
            self.transferred_bytes,
            self.total_bytes,
            self.is_fully_transferred(),
        )
    }
}

/// Compute a displayed percentage for `transferred` of `total` bytes.
pub fn display_percent(transferred: u64, total: u64, finished: bool) -> f64 {
    if finished {
        return 100.0;
    }
    if total == 0 {
        return 0.0;
    }
    let raw = (transferred as f64 / total as f64) * 100.0;
    raw.clamp(0.0, IN_FLIGHT_PERCENT_CAP)
}

/// Outcome of processing one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Root-relative path of the entry.
    pub relative_path: String,
    /// Whether the entry was transferred.
    pub success: bool,
    /// Error message for a failed entry.
    pub error: Option<String>,
    /// Set when the entry stopped because of a cancel request.
    pub cancelled: bool,
}

impl TransferResult {
    /// A successful result.
    pub fn ok(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            success: true,
            error: None,
            cancelled: false,
        }
    }

    /// A failed result.
    pub fn failed(relative_path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            success: false,
            error: Some(error.into()),
            cancelled: false,
        }
    }

    /// A cancelled marker.
    pub fn cancelled(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            success: false,
            error: None,
            cancelled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_capped_while_in_flight() {
        let mut task = TransferTask::new(TaskId::new(1), "docs", true, 1000, 2);
        task.transferred_bytes = 1000;
        task.completed_count = 1;
        assert_eq!(task.percent(), IN_FLIGHT_PERCENT_CAP);

        task.completed_count = 2;
        assert_eq!(task.percent(), 100.0);
    }

    #[test]
    fn test_percent_zero_total() {
        assert_eq!(display_percent(0, 0, false), 0.0);
        assert_eq!(display_percent(0, 0, true), 100.0);
        assert_eq!(display_percent(250, 1000, false), 25.0);
    }

    #[test]
    fn test_status_classes() {
        assert!(TaskStatus::Pending.is_open());
        assert!(TaskStatus::Active.is_open());
        assert!(!TaskStatus::Cancelled.is_open());
        assert!(TaskStatus::Failed.is_terminal());
        assert_eq!(TaskStatus::Cancelled.to_string(), "cancelled");
    }
}
