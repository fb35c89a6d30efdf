//! Transfer engine: scans, bundles and drives a run entry by entry.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use skiff_core::{
    Capabilities, Conflict, ConflictDirective, Endpoint, Entry, FsBridge, ScanWarning,
    SessionHandle, TaskId, TransferConfig, TransferResult, TransferTask, duplicate_name, join_path,
};
use skiff_scan::{EntryScanner, ScanInput, ScanOutcome, ScanProgress};

use crate::bundler::{Bundle, TaskBundler, order_entries};
use crate::cancel::TransferController;
use crate::conflict::{ConflictResolver, PendingConflict};
use crate::events::{EventBus, TransferEvent};
use crate::progress::ProgressAggregator;

/// Where a run writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Endpoint receiving the entries.
    pub endpoint: Endpoint,
    /// Directory the entries' relative paths are joined onto.
    pub root: String,
}

impl Destination {
    /// A directory on the local disk (download).
    pub fn local(root: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Local,
            root: root.into(),
        }
    }

    /// A directory inside a remote session (upload).
    pub fn remote(session: SessionHandle, root: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Remote(session),
            root: root.into(),
        }
    }

    /// Destination path of a root-relative entry path.
    pub fn path_for(&self, relative: &str) -> String {
        join_path(&self.root, relative)
    }
}

/// What a run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    /// One result per processed entry, in processing order.
    pub results: Vec<TransferResult>,
    /// Tasks suspended on a destination collision.
    pub conflicts: Vec<PendingConflict>,
    /// Scan failures that were skipped.
    pub warnings: Vec<ScanWarning>,
}

impl RunReport {
    /// Number of successful entries.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Number of failed entries.
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| !r.success && !r.cancelled)
            .count()
    }

    /// Number of cancelled markers.
    pub fn cancelled(&self) -> usize {
        self.results.iter().filter(|r| r.cancelled).count()
    }

    /// Whether every processed entry succeeded and nothing awaits a decision.
    pub fn is_success(&self) -> bool {
        self.conflicts.is_empty() && self.results.iter().all(|r| r.success)
    }

    /// Get a human-readable summary of the run.
    pub fn summary(&self) -> String {
        let mut summary = format!("Transferred {} items", self.succeeded());
        if self.failed() > 0 {
            summary.push_str(&format!(", {} failed", self.failed()));
        }
        if self.cancelled() > 0 {
            summary.push_str(", cancelled");
        }
        if !self.conflicts.is_empty() {
            summary.push_str(&format!(", {} conflicts pending", self.conflicts.len()));
        }
        summary
    }
}

/// Orchestrates transfers over one filesystem bridge.
///
/// Entries are processed strictly one at a time. The engine owns the task
/// map and the cancellation state; `cancel()` may be called from another
/// task while a run is in progress.
pub struct TransferEngine {
    pub(crate) bridge: Arc<dyn FsBridge>,
    pub(crate) capabilities: Capabilities,
    pub(crate) config: TransferConfig,
    pub(crate) events: Arc<EventBus>,
    pub(crate) progress: Arc<ProgressAggregator>,
    pub(crate) controller: Arc<TransferController>,
}

impl TransferEngine {
    /// Create an engine; the bridge's capabilities are resolved once here.
    pub fn new(bridge: Arc<dyn FsBridge>, config: TransferConfig) -> Self {
        let capabilities = bridge.capabilities();
        let events = Arc::new(EventBus::new());
        let progress = Arc::new(ProgressAggregator::new(
            events.clone(),
            config.frame_interval(),
        ));
        let controller = Arc::new(TransferController::new(
            bridge.clone(),
            capabilities,
            progress.clone(),
        ));
        debug!(?capabilities, "transfer engine created");

        Self {
            bridge,
            capabilities,
            config,
            events,
            progress,
            controller,
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Capabilities resolved from the bridge.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The event bus.
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Subscribe to transfer events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransferEvent> {
        self.events.subscribe()
    }

    /// The cancellation controller.
    pub fn controller(&self) -> Arc<TransferController> {
        self.controller.clone()
    }

    /// Snapshot of a task.
    pub fn task(&self, id: TaskId) -> Option<TransferTask> {
        self.progress.task(id)
    }

    /// Snapshots of all tasks the host has not acknowledged.
    pub fn tasks(&self) -> Vec<TransferTask> {
        self.progress.tasks()
    }

    /// Drop a task the host is done with.
    pub fn acknowledge(&self, id: TaskId) -> Option<TransferTask> {
        self.progress.remove(id)
    }

    /// Cancel the run in progress.
    pub async fn cancel(&self) {
        info!("transfer cancel requested");
        self.controller.cancel().await;
    }

    /// Scan inputs, announcing the scan and its running totals to the host.
    ///
    /// A cancel request stops the scan early.
    pub async fn scan(&self, inputs: Vec<ScanInput>) -> ScanOutcome {
        self.controller.reset();
        self.scan_inputs(inputs).await
    }

    /// Scan `inputs` and transfer everything found to `destination`.
    ///
    /// A cancel during the scan ends the call before any task is created.
    pub async fn transfer(&self, inputs: Vec<ScanInput>, destination: Destination) -> RunReport {
        self.controller.reset();
        let outcome = self.scan_inputs(inputs).await;
        if outcome.cancelled || self.controller.is_cancelled() {
            info!(entries = outcome.entries.len(), "transfer cancelled while scanning");
            return RunReport {
                warnings: outcome.warnings,
                ..Default::default()
            };
        }
        let mut report = self.start_run(outcome.entries, destination).await;
        report.warnings = outcome.warnings;
        report
    }

    /// Transfer already-scanned entries to `destination`.
    pub async fn run(&self, entries: Vec<Entry>, destination: Destination) -> RunReport {
        self.controller.reset();
        self.start_run(entries, destination).await
    }

    async fn scan_inputs(&self, inputs: Vec<ScanInput>) -> ScanOutcome {
        self.events.emit(TransferEvent::ScanningStarted);
        let scanner = EntryScanner::new(self.bridge.clone(), self.config.scan_yield_every)
            .with_cancel(self.controller.token());
        let mut updates = scanner.subscribe();

        let scan = scanner.scan(inputs);
        tokio::pin!(scan);
        let outcome = loop {
            tokio::select! {
                biased;
                outcome = &mut scan => break outcome,
                Ok(progress) = updates.recv() => self.emit_scan_progress(progress),
            }
        };
        while let Ok(progress) = updates.try_recv() {
            self.emit_scan_progress(progress);
        }

        self.events.emit(TransferEvent::ScanningFinished {
            entries: outcome.entries.len(),
            warnings: outcome.warnings.len(),
        });
        outcome
    }

    fn emit_scan_progress(&self, progress: ScanProgress) {
        self.events.emit(TransferEvent::ScanningProgress {
            files: progress.files,
            directories: progress.directories,
            bytes: progress.bytes,
            current_dir: progress.current_dir,
        });
    }

    async fn start_run(&self, entries: Vec<Entry>, destination: Destination) -> RunReport {
        let entries = order_entries(entries);
        let plan = TaskBundler::new(&self.progress).bundle(&entries);
        info!(
            entries = entries.len(),
            bundles = plan.len(),
            destination = %destination.root,
            "transfer run started"
        );

        let mut run = Run::new(self, destination);
        for bundle in plan.iter() {
            run.bundles
                .insert(bundle.root.clone(), BundleRun::from_bundle(bundle));
        }
        run.execute(entries, false).await;
        run.finish()
    }

    /// Apply the user's decision to a suspended task.
    ///
    /// `Skip` cancels the task without writing. `Replace` retries with the
    /// collision check skipped for the colliding file. `Duplicate` writes the
    /// file as "name (copy).ext" instead. A resumed folder bundle continues
    /// with its remaining entries.
    pub async fn resolve(&self, pending: PendingConflict, directive: ConflictDirective) -> RunReport {
        let PendingConflict {
            conflict,
            mut entries,
            destination,
        } = pending;
        let task_id = conflict.task_id;
        info!(%task_id, %directive, file = %conflict.file_name, "resolving conflict");

        if self
            .progress
            .status(task_id)
            .is_none_or(|status| status.is_terminal())
        {
            debug!(%task_id, "task already finished, conflict dropped");
            return RunReport::default();
        }
        if directive == ConflictDirective::Skip || entries.is_empty() {
            self.progress.cancel(task_id);
            return RunReport::default();
        }
        if directive == ConflictDirective::Duplicate {
            let name = duplicate_name(entries[0].file_name());
            entries[0] = entries[0].renamed(&name);
        }

        self.controller.reset();
        let mut run = Run::new(self, destination);
        match self.progress.task(task_id) {
            Some(task) if task.is_directory => {
                run.bundles.insert(
                    entries[0].root_name().to_string(),
                    BundleRun {
                        task_id,
                        remaining: entries.len(),
                        file_count: task.file_count,
                        total_bytes: task.total_bytes,
                        origin: None,
                        archive_attempted: true,
                        state: BundleState::Running,
                    },
                );
            }
            _ => {
                run.standalone
                    .insert(entries[0].relative_path.clone(), task_id);
            }
        }
        run.execute(entries, true).await;
        run.finish()
    }
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("capabilities", &self.capabilities)
            .field("config", &self.config)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BundleState {
    Running,
    Suspended,
    Archived,
}

#[derive(Debug, Clone)]
pub(crate) struct BundleRun {
    pub(crate) task_id: TaskId,
    pub(crate) remaining: usize,
    pub(crate) file_count: usize,
    pub(crate) total_bytes: u64,
    pub(crate) origin: Option<PathBuf>,
    pub(crate) archive_attempted: bool,
    pub(crate) state: BundleState,
}

impl BundleRun {
    fn from_bundle(bundle: &Bundle) -> Self {
        Self {
            task_id: bundle.task_id,
            remaining: bundle.entry_count,
            file_count: bundle.file_count,
            total_bytes: bundle.total_bytes,
            origin: bundle.origin.clone(),
            archive_attempted: false,
            state: BundleState::Running,
        }
    }
}

pub(crate) enum EntryOutcome {
    Done,
    Conflict(Conflict),
    Failed { task_id: Option<TaskId>, error: String },
    Cancelled,
}

pub(crate) enum ArchiveOutcome {
    Done,
    Fallback,
    Failed(String),
    Cancelled,
}

/// State of one engine invocation.
pub(crate) struct Run<'e> {
    pub(crate) engine: &'e TransferEngine,
    pub(crate) destination: Destination,
    pub(crate) bundles: HashMap<String, BundleRun>,
    pub(crate) standalone: HashMap<String, TaskId>,
    created_dirs: HashSet<String>,
    report: RunReport,
}

impl<'e> Run<'e> {
    fn new(engine: &'e TransferEngine, destination: Destination) -> Self {
        Self {
            engine,
            destination,
            bundles: HashMap::new(),
            standalone: HashMap::new(),
            created_dirs: HashSet::new(),
            report: RunReport::default(),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.engine.controller.is_cancelled()
    }

    fn finish(self) -> RunReport {
        self.engine.progress.flush_all();
        info!(
            succeeded = self.report.succeeded(),
            failed = self.report.failed(),
            cancelled = self.report.cancelled(),
            conflicts = self.report.conflicts.len(),
            "transfer run finished"
        );
        self.report
    }

    /// Process ordered entries until done, cancelled or a file fails.
    async fn execute(&mut self, entries: Vec<Entry>, skip_first_check: bool) {
        let mut index = 0;
        while index < entries.len() {
            let entry = &entries[index];

            if self.is_cancelled() {
                self.report
                    .results
                    .push(TransferResult::cancelled(&entry.relative_path));
                self.engine.progress.cancel_open();
                break;
            }

            let root = entry
                .is_bundled()
                .then(|| entry.root_name().to_string())
                .filter(|root| self.bundles.contains_key(root));
            let bundle = root.as_ref().and_then(|r| self.bundles.get(r)).cloned();

            if let (Some(root), Some(bundle)) = (&root, &bundle) {
                if bundle.state != BundleState::Running {
                    index += 1;
                    continue;
                }

                if !bundle.archive_attempted && self.archive_eligible(bundle) {
                    if let Some(b) = self.bundles.get_mut(root) {
                        b.archive_attempted = true;
                    }
                    match self.send_archive(bundle, root).await {
                        ArchiveOutcome::Done => {
                            for archived in entries[index..]
                                .iter()
                                .filter(|e| e.is_bundled() && e.root_name() == root)
                            {
                                self.report
                                    .results
                                    .push(TransferResult::ok(&archived.relative_path));
                            }
                            if let Some(b) = self.bundles.get_mut(root) {
                                b.state = BundleState::Archived;
                                b.remaining = 0;
                            }
                            index += 1;
                            continue;
                        }
                        ArchiveOutcome::Fallback => {
                            debug!(bundle = %root, "archive unavailable, sending files one by one");
                        }
                        ArchiveOutcome::Failed(error) => {
                            self.report
                                .results
                                .push(TransferResult::failed(&entry.relative_path, &error));
                            self.engine.progress.fail(bundle.task_id, error);
                            break;
                        }
                        ArchiveOutcome::Cancelled => {
                            self.report
                                .results
                                .push(TransferResult::cancelled(&entry.relative_path));
                            self.engine.progress.cancel_open();
                            break;
                        }
                    }
                }
            }

            let skip_check = skip_first_check && index == 0;
            let outcome = if entry.is_directory {
                self.create_directory(entry, bundle.as_ref().map(|b| b.task_id))
                    .await
            } else {
                self.transfer_file(entry, bundle.as_ref().map(|b| b.task_id), skip_check)
                    .await
            };

            match outcome {
                EntryOutcome::Done => {
                    self.report
                        .results
                        .push(TransferResult::ok(&entry.relative_path));
                    if let Some(root) = &root {
                        self.entry_finished(root);
                    }
                }
                EntryOutcome::Conflict(conflict) => {
                    let mut pending_entries = vec![entry.clone()];
                    if let Some(root) = &root {
                        pending_entries.extend(
                            entries[index + 1..]
                                .iter()
                                .filter(|e| e.is_bundled() && e.root_name() == root)
                                .cloned(),
                        );
                        if let Some(b) = self.bundles.get_mut(root) {
                            b.state = BundleState::Suspended;
                        }
                    }
                    debug!(
                        task = %conflict.task_id,
                        path = %conflict.destination_path,
                        "destination exists, task suspended"
                    );
                    self.engine.progress.suspend(conflict.task_id);
                    self.engine
                        .events
                        .emit(TransferEvent::ConflictDetected(conflict.clone()));
                    self.report.conflicts.push(PendingConflict {
                        conflict,
                        entries: pending_entries,
                        destination: self.destination.clone(),
                    });
                }
                EntryOutcome::Failed { task_id, error } => {
                    self.report
                        .results
                        .push(TransferResult::failed(&entry.relative_path, &error));
                    if let Some(task_id) = task_id {
                        self.engine.progress.fail(task_id, error);
                    }
                    break;
                }
                EntryOutcome::Cancelled => {
                    self.report
                        .results
                        .push(TransferResult::cancelled(&entry.relative_path));
                    self.engine.progress.cancel_open();
                    break;
                }
            }

            self.engine.progress.flush_due();
            tokio::task::yield_now().await;
            index += 1;
        }
    }

    /// Complete a bundle without files once all of its entries ran.
    fn entry_finished(&mut self, root: &str) {
        if let Some(bundle) = self.bundles.get_mut(root) {
            bundle.remaining = bundle.remaining.saturating_sub(1);
            if bundle.remaining == 0 && bundle.file_count == 0 {
                self.engine.progress.complete_task(bundle.task_id);
            }
        }
    }

    async fn create_directory(&mut self, entry: &Entry, task_id: Option<TaskId>) -> EntryOutcome {
        if let Some(task_id) = task_id {
            self.engine.progress.activate(task_id);
        }
        self.ensure_directory(&entry.relative_path).await;
        if self.is_cancelled() {
            return EntryOutcome::Cancelled;
        }
        EntryOutcome::Done
    }

    /// Idempotent directory creation; failures are logged and treated as "already exists".
    async fn ensure_directory(&mut self, relative: &str) {
        if self.created_dirs.contains(relative) {
            return;
        }
        let path = self.destination.path_for(relative);
        if let Err(err) = self
            .engine
            .bridge
            .mkdir(&self.destination.endpoint, &path)
            .await
        {
            debug!(path = %path, error = %err, "directory create failed, assuming it exists");
        }
        self.created_dirs.insert(relative.to_string());
    }

    fn standalone_task(&mut self, entry: &Entry) -> TaskId {
        if let Some(id) = self.standalone.get(&entry.relative_path) {
            return *id;
        }
        let id = self.engine.progress.next_task_id();
        self.engine.progress.create(TransferTask::new(
            id,
            entry.file_name(),
            false,
            entry.size,
            1,
        ));
        self.standalone.insert(entry.relative_path.clone(), id);
        id
    }

    async fn transfer_file(
        &mut self,
        entry: &Entry,
        bundle_task: Option<TaskId>,
        skip_check: bool,
    ) -> EntryOutcome {
        let task_id = match bundle_task {
            Some(id) => id,
            None => self.standalone_task(entry),
        };

        for ancestor in entry.ancestors() {
            self.ensure_directory(&ancestor).await;
        }
        if self.is_cancelled() {
            return EntryOutcome::Cancelled;
        }

        let destination_path = self.destination.path_for(&entry.relative_path);
        if !skip_check && self.engine.config.should_check_conflicts() {
            let resolver = ConflictResolver::new(self.engine.bridge.as_ref());
            match resolver
                .check(task_id, entry, &self.destination.endpoint, &destination_path)
                .await
            {
                Ok(Some(conflict)) => return EntryOutcome::Conflict(conflict),
                Ok(None) => {}
                Err(err) => {
                    return EntryOutcome::Failed {
                        task_id: Some(task_id),
                        error: err.to_string(),
                    };
                }
            }
            if self.is_cancelled() {
                return EntryOutcome::Cancelled;
            }
        }

        self.engine.progress.begin_file(task_id);
        match self.move_bytes(entry, task_id, &destination_path).await {
            Ok(()) => {
                self.engine.progress.complete_file(task_id, entry.size);
                EntryOutcome::Done
            }
            Err(_) if self.is_cancelled() => EntryOutcome::Cancelled,
            Err(err) => EntryOutcome::Failed {
                task_id: Some(task_id),
                error: format!("{}: {err}", entry.relative_path),
            },
        }
    }
}
