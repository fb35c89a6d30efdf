//! Transfer orchestration engine for skiff.
//!
//! This crate turns scanned entries into tasks, moves their bytes through a
//! [`FsBridge`](skiff_core::FsBridge) one entry at a time, and reports
//! throttled progress, conflicts and outcomes to the host through an event
//! channel. A [`LocalBridge`] serving both endpoints from the local disk is
//! included.

use std::sync::{Mutex, MutexGuard, PoisonError};

mod bundler;
mod cancel;
mod conflict;
mod events;
mod executor;
mod local;
mod progress;
mod strategy;

pub use bundler::{order_entries, Bundle, BundlePlan, TaskBundler};
pub use cancel::TransferController;
pub use conflict::{ConflictResolver, PendingConflict};
pub use events::{EventBus, ProgressUpdate, TransferEvent};
pub use executor::{Destination, RunReport, TransferEngine};
pub use local::{LocalBridge, DEFAULT_CHUNK_SIZE};
pub use progress::{remap_archive_percent, simulated_transferred, ProgressAggregator};

pub use skiff_core::{
    Conflict, ConflictDirective, TaskId, TaskStatus, TransferConfig, TransferResult, TransferTask,
};
pub use skiff_scan::{ScanInput, ScanProgress};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
