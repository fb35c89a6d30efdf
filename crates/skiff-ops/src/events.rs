//! Events delivered to the host while a transfer runs.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;

use skiff_core::{Conflict, TaskId, TransferTask};

use crate::lock;

/// A throttled progress sample for one task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressUpdate {
    /// Task the sample belongs to.
    pub id: TaskId,
    /// Bytes shown as transferred.
    pub transferred: u64,
    /// Total bytes of the task.
    pub total: u64,
    /// Displayed percentage (capped at 99.9 until the last file completes).
    pub percent: f64,
    /// Speed in bytes per second.
    pub speed: f64,
}

/// Everything the engine tells its host.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TransferEvent {
    /// The scanner started walking the inputs.
    ScanningStarted,
    /// Totals found by the scan so far.
    ScanningProgress {
        files: u64,
        directories: u64,
        bytes: u64,
        current_dir: String,
    },
    /// The scanner finished.
    ScanningFinished { entries: usize, warnings: usize },
    /// A task was registered in `pending` state.
    TaskCreated(TransferTask),
    /// A task's progress changed.
    TaskProgress(ProgressUpdate),
    /// A task finished successfully.
    TaskCompleted(TaskId),
    /// A task failed.
    TaskFailed { id: TaskId, error: String },
    /// A task was cancelled by the user.
    TaskCancelled(TaskId),
    /// A task's display label changed (archive phases).
    TaskRenamed { id: TaskId, label: String },
    /// A destination collision suspended a task.
    ConflictDetected(Conflict),
}

/// Subscription registry for [`TransferEvent`]s.
///
/// One bus belongs to one engine; subscribers that dropped their receiver
/// are pruned on the next emit.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TransferEvent>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransferEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: TransferEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(TransferEvent::TaskCompleted(TaskId::new(7)));

        assert!(matches!(a.try_recv(), Ok(TransferEvent::TaskCompleted(TaskId(7)))));
        assert!(matches!(b.try_recv(), Ok(TransferEvent::TaskCompleted(TaskId(7)))));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());

        bus.emit(TransferEvent::ScanningStarted);
        assert_eq!(bus.subscriber_count(), 1);
        drop(keep);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
