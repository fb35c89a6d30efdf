//! Byte-moving strategies.
//!
//! A folder bundle may go as one compressed archive. A single file is
//! streamed by path when the bridge can do that, or buffered in memory and
//! written either with real progress callbacks or with a simulated ramp.
//! A failed archive or stream falls back to the next strategy; a failed
//! buffered write is final.

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use skiff_core::{
    ArchivePhase, ArchiveProgress, BridgeError, BridgeResult, ContentHandle, Endpoint, Entry,
    SessionHandle, TaskId, TransferSample,
};

use crate::executor::{ArchiveOutcome, BundleRun, Run};
use crate::lock;
use crate::progress::{remap_archive_percent, simulated_transferred};

impl Run<'_> {
    /// Whether a bundle may be sent as one archive.
    pub(crate) fn archive_eligible(&self, bundle: &BundleRun) -> bool {
        self.engine.config.compress_folders
            && self.engine.capabilities.archive
            && self.destination.endpoint.is_remote()
            && bundle.origin.is_some()
            && bundle.file_count > 0
    }

    /// Compress, upload and extract a whole folder bundle.
    ///
    /// The task shows the current phase next to its name while the archive
    /// runs; the name is restored whatever the outcome.
    pub(crate) async fn send_archive(&self, bundle: &BundleRun, root: &str) -> ArchiveOutcome {
        let (Some(session), Some(origin)) =
            (self.destination.endpoint.session(), bundle.origin.as_deref())
        else {
            return ArchiveOutcome::Fallback;
        };

        match self.engine.bridge.archive_supported(session).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(bundle = %root, "remote side cannot extract archives");
                return ArchiveOutcome::Fallback;
            }
            Err(err) => {
                debug!(bundle = %root, error = %err, "archive support probe failed");
                return ArchiveOutcome::Fallback;
            }
        }
        if self.is_cancelled() {
            return ArchiveOutcome::Cancelled;
        }

        let progress = &self.engine.progress;
        let controller = &self.engine.controller;
        let task_id = bundle.task_id;
        let total = bundle.total_bytes;
        let remote_dir = self.destination.path_for(root);

        let id = controller.begin_archive();
        progress.begin_file(task_id);
        progress.rename(task_id, ArchivePhase::Compressing.label());

        let phase = Mutex::new(ArchivePhase::Compressing);
        let on_progress = |update: ArchiveProgress| {
            let changed = {
                let mut current = lock(&phase);
                let changed = *current != update.phase;
                *current = update.phase;
                changed
            };
            if changed {
                progress.rename(task_id, update.phase.label());
            }
            progress.record(
                task_id,
                TransferSample::new(remap_archive_percent(update.percent, total), total),
            );
        };

        let result = self
            .engine
            .bridge
            .upload_archive(session, origin, &remote_dir, id, &on_progress)
            .await;
        controller.finish_archive(id);
        progress.restore_name(task_id);

        match result {
            Ok(()) => {
                progress.complete_task(task_id);
                ArchiveOutcome::Done
            }
            Err(_) if self.is_cancelled() => ArchiveOutcome::Cancelled,
            Err(err) if err.is_archive_fallback() => {
                warn!(bundle = %root, error = %err, "archive transfer fell back to per-file");
                progress.reset_partial(task_id);
                ArchiveOutcome::Fallback
            }
            Err(err) => ArchiveOutcome::Failed(err.to_string()),
        }
    }

    /// Move one file's bytes to `destination_path`.
    pub(crate) async fn move_bytes(
        &self,
        entry: &Entry,
        task_id: TaskId,
        destination_path: &str,
    ) -> BridgeResult<()> {
        let content = entry.content.as_ref().ok_or_else(|| {
            BridgeError::other(format!("{} has no content handle", entry.relative_path))
        })?;

        if let (Some(local), Some(session)) =
            (content.local_path(), self.destination.endpoint.session())
        {
            if self.engine.capabilities.path_streaming {
                match self.stream(session, local, destination_path, task_id).await {
                    Ok(()) => return Ok(()),
                    Err(err) if self.is_cancelled() => return Err(err),
                    Err(err) => {
                        warn!(
                            path = %entry.relative_path,
                            error = %err,
                            "streamed upload failed, retrying buffered"
                        );
                        self.engine.progress.reset_partial(task_id);
                    }
                }
            }
        }

        let data = self.read_content(content).await?;
        if self.is_cancelled() {
            return Err(BridgeError::Aborted);
        }
        self.write_buffered(destination_path, data, task_id).await
    }

    async fn stream(
        &self,
        session: &SessionHandle,
        local: &Path,
        remote: &str,
        task_id: TaskId,
    ) -> BridgeResult<()> {
        let controller = &self.engine.controller;
        let progress = &self.engine.progress;

        let id = controller.begin_transfer();
        controller.track_transfer(id);
        let on_progress = |sample: TransferSample| progress.record(task_id, sample);
        let result = self
            .engine
            .bridge
            .stream_upload(session, local, remote, id, &on_progress)
            .await;
        controller.finish_transfer(id);
        result
    }

    async fn read_content(&self, content: &ContentHandle) -> BridgeResult<Vec<u8>> {
        match content {
            ContentHandle::Local(path) => {
                let path = path.to_string_lossy();
                self.engine.bridge.read(&Endpoint::Local, &path).await
            }
            ContentHandle::Memory(data) => Ok(data.to_vec()),
            ContentHandle::Remote { session, path } => {
                let endpoint = Endpoint::Remote(session.clone());
                self.engine.bridge.read(&endpoint, path).await
            }
        }
    }

    async fn write_buffered(
        &self,
        destination_path: &str,
        data: Vec<u8>,
        task_id: TaskId,
    ) -> BridgeResult<()> {
        let controller = &self.engine.controller;
        let progress = &self.engine.progress;
        let endpoint = &self.destination.endpoint;

        let id = controller.begin_transfer();
        controller.track_transfer(id);
        let result = if self.engine.capabilities.granular_write {
            let on_progress = |sample: TransferSample| progress.record(task_id, sample);
            self.engine
                .bridge
                .write_with_progress(endpoint, destination_path, data, id, &on_progress)
                .await
        } else {
            self.write_with_ramp(endpoint, destination_path, data, task_id)
                .await
        };
        controller.finish_transfer(id);
        result
    }

    /// Plain write with an estimated progress ramp while it runs.
    async fn write_with_ramp(
        &self,
        endpoint: &Endpoint,
        destination_path: &str,
        data: Vec<u8>,
        task_id: TaskId,
    ) -> BridgeResult<()> {
        let config = &self.engine.config;
        let progress = &self.engine.progress;
        let size = data.len() as u64;

        let mut write = self.engine.bridge.write(endpoint, destination_path, data);
        let started = Instant::now();
        let mut ticker = tokio::time::interval(config.simulated_tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                result = &mut write => return result,
                _ = ticker.tick() => {
                    let estimate = simulated_transferred(started.elapsed(), config.simulated_rate, size);
                    progress.record(task_id, TransferSample::new(estimate, size));
                    progress.flush_due();
                }
            }
        }
    }
}
