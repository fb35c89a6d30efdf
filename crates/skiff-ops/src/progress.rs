//! Per-task progress accounting and throttled emission.
//!
//! The aggregator owns every [`TransferTask`] the engine created. Raw per-file
//! samples are folded into task totals: bytes of fully finished files are kept
//! apart from the in-flight file's partial bytes, so a finishing file is never
//! counted twice. Emission is throttled to one update per frame per task; the
//! sample that completes a task bypasses the throttle and is exactly 100%.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use skiff_core::{TaskId, TaskStatus, TransferSample, TransferTask, display_percent};

use crate::events::{EventBus, ProgressUpdate, TransferEvent};
use crate::lock;

/// Fraction of a file the simulated ramp may claim before the write returns.
const SIMULATED_CEILING: f64 = 0.95;

/// Bytes the simulated ramp reports after `elapsed` at `rate` bytes per second.
///
/// Never exceeds 95% of `size`; the real completion provides the rest.
pub fn simulated_transferred(elapsed: Duration, rate: u64, size: u64) -> u64 {
    let estimate = rate as f64 * elapsed.as_secs_f64();
    let ceiling = size as f64 * SIMULATED_CEILING;
    estimate.min(ceiling).max(0.0) as u64
}

/// Scale an archive percentage onto the bundle's real byte total.
pub fn remap_archive_percent(percent: f64, total_bytes: u64) -> u64 {
    let fraction = percent.clamp(0.0, 100.0) / 100.0;
    (total_bytes as f64 * fraction).round() as u64
}

#[derive(Debug)]
struct TaskState {
    task: TransferTask,
    base_name: String,
    partial: u64,
    file_started: Option<Instant>,
    last_emit: Option<Instant>,
    pending: Option<ProgressUpdate>,
}

impl TaskState {
    fn new(task: TransferTask) -> Self {
        Self {
            base_name: task.name.clone(),
            task,
            partial: 0,
            file_started: None,
            last_emit: None,
            pending: None,
        }
    }

    fn update(&self) -> ProgressUpdate {
        ProgressUpdate {
            id: self.task.id,
            transferred: self.task.transferred_bytes,
            total: self.task.total_bytes,
            percent: self.task.percent(),
            speed: self.task.speed,
        }
    }

    fn refresh_transferred(&mut self) {
        let remaining = self
            .task
            .total_bytes
            .saturating_sub(self.task.completed_files_bytes);
        let partial = self.partial.min(remaining);
        self.task.transferred_bytes = self.task.completed_files_bytes + partial;
    }
}

/// Folds raw file samples into task progress and emits throttled updates.
#[derive(Debug)]
pub struct ProgressAggregator {
    tasks: Mutex<IndexMap<TaskId, TaskState>>,
    events: Arc<EventBus>,
    frame_interval: Duration,
    next_id: AtomicU64,
}

impl ProgressAggregator {
    /// Create an aggregator that emits on `events` at most once per `frame_interval` per task.
    pub fn new(events: Arc<EventBus>, frame_interval: Duration) -> Self {
        Self {
            tasks: Mutex::new(IndexMap::new()),
            events,
            frame_interval,
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a task identifier.
    pub fn next_task_id(&self) -> TaskId {
        TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a task and announce it.
    pub fn create(&self, task: TransferTask) {
        let event = TransferEvent::TaskCreated(task.clone());
        lock(&self.tasks).insert(task.id, TaskState::new(task));
        self.events.emit(event);
    }

    /// Snapshot of a task.
    pub fn task(&self, id: TaskId) -> Option<TransferTask> {
        lock(&self.tasks).get(&id).map(|s| s.task.clone())
    }

    /// Snapshots of every task, in creation order.
    pub fn tasks(&self) -> Vec<TransferTask> {
        lock(&self.tasks).values().map(|s| s.task.clone()).collect()
    }

    /// Current status of a task.
    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        lock(&self.tasks).get(&id).map(|s| s.task.status)
    }

    /// Forget a task the host has acknowledged.
    pub fn remove(&self, id: TaskId) -> Option<TransferTask> {
        lock(&self.tasks).shift_remove(&id).map(|s| s.task)
    }

    /// Mark a pending task active without touching its counters.
    pub fn activate(&self, id: TaskId) {
        let mut tasks = lock(&self.tasks);
        if let Some(state) = tasks.get_mut(&id) {
            if state.task.status == TaskStatus::Pending {
                state.task.status = TaskStatus::Active;
            }
        }
    }

    /// Mark a task active and start timing a new file.
    pub fn begin_file(&self, id: TaskId) {
        let mut tasks = lock(&self.tasks);
        if let Some(state) = tasks.get_mut(&id) {
            if !state.task.status.is_open() {
                return;
            }
            state.task.status = TaskStatus::Active;
            state.partial = 0;
            state.file_started = Some(Instant::now());
            state.refresh_transferred();
        }
    }

    /// Record a raw sample for the in-flight file of a task.
    pub fn record(&self, id: TaskId, sample: TransferSample) {
        let mut tasks = lock(&self.tasks);
        let Some(state) = tasks.get_mut(&id) else {
            return;
        };
        if !state.task.status.is_open() {
            return;
        }

        // Partial bytes never move backwards within one file.
        state.partial = state.partial.max(sample.transferred);
        state.refresh_transferred();
        state.task.speed = match sample.speed {
            Some(speed) => speed,
            None => state
                .file_started
                .map(|start| start.elapsed().as_secs_f64())
                .filter(|secs| *secs > 0.0)
                .map(|secs| state.partial as f64 / secs)
                .unwrap_or(0.0),
        };

        let update = state.update();
        self.throttle(state, update);
    }

    /// Drop the in-flight file's partial bytes (a strategy is about to retry it).
    pub fn reset_partial(&self, id: TaskId) {
        let mut tasks = lock(&self.tasks);
        if let Some(state) = tasks.get_mut(&id) {
            state.partial = 0;
            state.pending = None;
            state.file_started = Some(Instant::now());
            state.refresh_transferred();
        }
    }

    /// Account for a fully transferred file.
    ///
    /// Returns `true` when this file completed the task; in that case the
    /// exact 100% sample and `TaskCompleted` were already emitted. Counters
    /// still advance on a task cancelled mid-file, but its status is kept.
    pub fn complete_file(&self, id: TaskId, size: u64) -> bool {
        let mut tasks = lock(&self.tasks);
        let Some(state) = tasks.get_mut(&id) else {
            return false;
        };
        if state.task.status == TaskStatus::Failed {
            return false;
        }

        let remaining = state
            .task
            .total_bytes
            .saturating_sub(state.task.completed_files_bytes);
        state.task.completed_files_bytes += size.min(remaining);
        state.task.completed_count += 1;
        state.partial = 0;
        state.file_started = None;
        state.refresh_transferred();

        if !state.task.status.is_open() {
            return false;
        }
        if state.task.is_fully_transferred() {
            self.finish(state);
            return true;
        }

        let update = state.update();
        self.throttle(state, update);
        false
    }

    /// Complete a task regardless of its file counters (archive transfers, folders without files).
    pub fn complete_task(&self, id: TaskId) -> bool {
        let mut tasks = lock(&self.tasks);
        let Some(state) = tasks.get_mut(&id) else {
            return false;
        };
        if !state.task.status.is_open() {
            return false;
        }
        state.task.completed_count = state.task.file_count;
        self.finish(state);
        true
    }

    /// Mark a task failed.
    pub fn fail(&self, id: TaskId, error: impl Into<String>) {
        let error = error.into();
        let mut tasks = lock(&self.tasks);
        let Some(state) = tasks.get_mut(&id) else {
            return;
        };
        if state.task.status.is_terminal() {
            return;
        }
        state.task.status = TaskStatus::Failed;
        state.task.error = Some(error.clone());
        state.pending = None;
        self.events.emit(TransferEvent::TaskFailed { id, error });
    }

    /// Mark a task cancelled if it is still pending or active.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut tasks = lock(&self.tasks);
        match tasks.get_mut(&id) {
            Some(state) => self.cancel_state(state),
            None => false,
        }
    }

    /// Cancel every pending or active task; returns the ids that changed.
    pub fn cancel_open(&self) -> Vec<TaskId> {
        let mut tasks = lock(&self.tasks);
        tasks
            .values_mut()
            .filter_map(|state| self.cancel_state(state).then_some(state.task.id))
            .collect()
    }

    /// Put a task back into `pending` while a conflict awaits a decision.
    pub fn suspend(&self, id: TaskId) {
        let mut tasks = lock(&self.tasks);
        if let Some(state) = tasks.get_mut(&id) {
            if state.task.status.is_open() {
                state.task.status = TaskStatus::Pending;
                state.partial = 0;
                state.pending = None;
                state.refresh_transferred();
            }
        }
    }

    /// Show a phase label next to the task's name.
    pub fn rename(&self, id: TaskId, label: &str) {
        let mut tasks = lock(&self.tasks);
        if let Some(state) = tasks.get_mut(&id) {
            state.task.name = format!("{} ({label})", state.base_name);
            self.events.emit(TransferEvent::TaskRenamed {
                id,
                label: state.task.name.clone(),
            });
        }
    }

    /// Restore the task's original name after a phase-labelled operation.
    pub fn restore_name(&self, id: TaskId) {
        let mut tasks = lock(&self.tasks);
        if let Some(state) = tasks.get_mut(&id) {
            if state.task.name != state.base_name {
                state.task.name = state.base_name.clone();
                self.events.emit(TransferEvent::TaskRenamed {
                    id,
                    label: state.task.name.clone(),
                });
            }
        }
    }

    /// Emit held-back samples whose frame has elapsed.
    pub fn flush_due(&self) {
        let mut tasks = lock(&self.tasks);
        for state in tasks.values_mut() {
            let due = state
                .last_emit
                .is_none_or(|last| last.elapsed() >= self.frame_interval);
            if due {
                if let Some(update) = state.pending.take() {
                    state.last_emit = Some(Instant::now());
                    self.events.emit(TransferEvent::TaskProgress(update));
                }
            }
        }
    }

    /// Emit every held-back sample immediately.
    pub fn flush_all(&self) {
        let mut tasks = lock(&self.tasks);
        for state in tasks.values_mut() {
            if let Some(update) = state.pending.take() {
                state.last_emit = Some(Instant::now());
                self.events.emit(TransferEvent::TaskProgress(update));
            }
        }
    }

    fn throttle(&self, state: &mut TaskState, update: ProgressUpdate) {
        let now = Instant::now();
        let due = self.frame_interval.is_zero()
            || state
                .last_emit
                .is_none_or(|last| now.duration_since(last) >= self.frame_interval);

        if due {
            state.pending = None;
            state.last_emit = Some(now);
            self.events.emit(TransferEvent::TaskProgress(update));
        } else {
            state.pending = Some(update);
        }
    }

    fn finish(&self, state: &mut TaskState) {
        let id = state.task.id;
        state.task.completed_files_bytes = state.task.total_bytes;
        state.task.transferred_bytes = state.task.total_bytes;
        state.partial = 0;
        state.pending = None;
        state.last_emit = Some(Instant::now());

        self.events.emit(TransferEvent::TaskProgress(ProgressUpdate {
            id,
            transferred: state.task.total_bytes,
            total: state.task.total_bytes,
            percent: 100.0,
            speed: state.task.speed,
        }));
        state.task.status = TaskStatus::Completed;
        self.events.emit(TransferEvent::TaskCompleted(id));
    }

    fn cancel_state(&self, state: &mut TaskState) -> bool {
        if !state.task.status.is_open() {
            return false;
        }
        state.task.status = TaskStatus::Cancelled;
        state.pending = None;
        state.task.name = state.base_name.clone();
        self.events.emit(TransferEvent::TaskCancelled(state.task.id));
        true
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    fn setup(frame: Duration) -> (ProgressAggregator, UnboundedReceiver<TransferEvent>) {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        (ProgressAggregator::new(events, frame), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn progress_updates(events: &[TransferEvent]) -> Vec<ProgressUpdate> {
        events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::TaskProgress(u) => Some(*u),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_simulated_transferred_is_bounded() {
        assert_eq!(simulated_transferred(Duration::from_secs(1), 100, 1000), 100);
        assert_eq!(simulated_transferred(Duration::from_secs(60), 100, 1000), 950);
        assert_eq!(simulated_transferred(Duration::ZERO, 100, 1000), 0);
    }

    #[test]
    fn test_remap_archive_percent() {
        assert_eq!(remap_archive_percent(50.0, 30), 15);
        assert_eq!(remap_archive_percent(150.0, 30), 30);
        assert_eq!(remap_archive_percent(-3.0, 30), 0);
    }

    #[test]
    fn test_bundle_accounting_and_final_sample() {
        let (agg, mut rx) = setup(Duration::ZERO);
        let id = agg.next_task_id();
        agg.create(TransferTask::new(id, "docs", true, 30, 2));

        agg.begin_file(id);
        agg.record(id, TransferSample::new(5, 10));
        agg.record(id, TransferSample::new(10, 10));
        assert!(!agg.complete_file(id, 10));

        let task = agg.task(id).unwrap();
        assert_eq!(task.completed_files_bytes, 10);
        assert_eq!(task.transferred_bytes, 10);

        agg.begin_file(id);
        agg.record(id, TransferSample::new(20, 20));
        // Everything moved but one file is still open: capped below 100.
        assert!(agg.task(id).unwrap().percent() < 100.0);
        assert!(agg.complete_file(id, 20));

        let events = drain(&mut rx);
        let updates = progress_updates(&events);
        let last = updates.last().unwrap();
        assert_eq!((last.transferred, last.total, last.percent), (30, 30, 100.0));
        assert!(updates[..updates.len() - 1].iter().all(|u| u.percent < 100.0));
        assert!(matches!(events.last(), Some(TransferEvent::TaskCompleted(t)) if *t == id));

        let task = agg.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed_count, 2);
        assert_eq!(task.completed_files_bytes, 30);
    }

    #[test]
    fn test_completed_bytes_monotonic() {
        let (agg, mut rx) = setup(Duration::ZERO);
        let id = agg.next_task_id();
        agg.create(TransferTask::new(id, "pics", true, 300, 3));

        for size in [100, 100, 100] {
            agg.begin_file(id);
            agg.record(id, TransferSample::new(size / 2, size));
            agg.record(id, TransferSample::new(size / 4, size));
            agg.complete_file(id, size);
        }

        let updates = progress_updates(&drain(&mut rx));
        assert!(updates.windows(2).all(|w| w[0].transferred <= w[1].transferred));
    }

    #[test]
    fn test_throttle_keeps_latest_sample() {
        let (agg, mut rx) = setup(Duration::from_secs(3600));
        let id = agg.next_task_id();
        agg.create(TransferTask::new(id, "big.iso", false, 1000, 1));

        agg.begin_file(id);
        agg.record(id, TransferSample::new(100, 1000));
        agg.record(id, TransferSample::new(200, 1000));
        agg.record(id, TransferSample::new(300, 1000));

        let updates = progress_updates(&drain(&mut rx));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].transferred, 100);

        agg.flush_all();
        let updates = progress_updates(&drain(&mut rx));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].transferred, 300);
    }

    #[test]
    fn test_final_sample_bypasses_throttle() {
        let (agg, mut rx) = setup(Duration::from_secs(3600));
        let id = agg.next_task_id();
        agg.create(TransferTask::new(id, "a.bin", false, 50, 1));

        agg.begin_file(id);
        agg.record(id, TransferSample::new(10, 50));
        agg.record(id, TransferSample::new(40, 50));
        assert!(agg.complete_file(id, 50));

        let updates = progress_updates(&drain(&mut rx));
        assert_eq!(updates.last().map(|u| u.percent), Some(100.0));
    }

    #[test]
    fn test_cancel_open_only_touches_open_tasks() {
        let (agg, mut rx) = setup(Duration::ZERO);
        let done = agg.next_task_id();
        let open = agg.next_task_id();
        agg.create(TransferTask::new(done, "a", false, 1, 1));
        agg.create(TransferTask::new(open, "b", false, 1, 1));
        agg.begin_file(done);
        agg.complete_file(done, 1);
        drain(&mut rx);

        assert_eq!(agg.cancel_open(), vec![open]);
        assert_eq!(agg.status(done), Some(TaskStatus::Completed));
        assert_eq!(agg.status(open), Some(TaskStatus::Cancelled));

        // Late completion on a cancelled task counts bytes but keeps the status.
        assert!(!agg.complete_file(open, 1));
        let task = agg.task(open).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.completed_count, 1);
    }

    #[test]
    fn test_rename_and_restore() {
        let (agg, mut rx) = setup(Duration::ZERO);
        let id = agg.next_task_id();
        agg.create(TransferTask::new(id, "docs", true, 10, 1));
        drain(&mut rx);

        agg.rename(id, "compressing");
        assert_eq!(agg.task(id).unwrap().name, "docs (compressing)");
        agg.restore_name(id);
        assert_eq!(agg.task(id).unwrap().name, "docs");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
    }
}
