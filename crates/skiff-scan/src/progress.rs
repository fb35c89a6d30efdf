//! Running totals published while a scan walks its inputs.

use std::time::{Duration, Instant};

/// Snapshot of a scan in progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanProgress {
    /// File entries found so far.
    pub files: u64,
    /// Directory entries found so far.
    pub directories: u64,
    /// Bytes of the files found so far.
    pub bytes: u64,
    /// Directories whose listing failed.
    pub unreadable: u64,
    /// Root-relative path of the directory being listed.
    pub current_dir: String,
    pub elapsed: Duration,
}

impl ScanProgress {
    /// Entries found so far, files and directories together.
    pub fn entries(&self) -> u64 {
        self.files + self.directories
    }
}

/// Counters owned by one scan.
#[derive(Debug)]
pub(crate) struct ScanCounters {
    started: Instant,
    totals: ScanProgress,
}

impl ScanCounters {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
            totals: ScanProgress::default(),
        }
    }

    pub(crate) fn file(&mut self, size: u64) {
        self.totals.files += 1;
        self.totals.bytes += size;
    }

    pub(crate) fn directory(&mut self) {
        self.totals.directories += 1;
    }

    pub(crate) fn unreadable(&mut self) {
        self.totals.unreadable += 1;
    }

    pub(crate) fn entering(&mut self, relative: &str) {
        relative.clone_into(&mut self.totals.current_dir);
    }

    pub(crate) fn snapshot(&self) -> ScanProgress {
        ScanProgress {
            elapsed: self.started.elapsed(),
            ..self.totals.clone()
        }
    }
}
