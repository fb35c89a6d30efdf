//! Pre-write collision detection.

use skiff_core::{
    BridgeResult, Conflict, ContentHandle, Endpoint, Entry, FileStat, FsBridge, TaskId,
};

use crate::executor::Destination;

/// A suspended task waiting for a replace / skip / duplicate decision.
///
/// `entries` starts with the colliding file; for a folder bundle the rest of
/// the bundle that had not been attempted follows, so resolving the conflict
/// resumes the bundle where it stopped.
#[derive(Debug, Clone)]
pub struct PendingConflict {
    /// The collision shown to the user.
    pub conflict: Conflict,
    pub(crate) entries: Vec<Entry>,
    pub(crate) destination: Destination,
}

impl PendingConflict {
    /// Task suspended by this conflict.
    pub fn task_id(&self) -> TaskId {
        self.conflict.task_id
    }

    /// Entries that will run when the conflict is resolved.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

/// Compares source and destination before a file is overwritten.
pub struct ConflictResolver<'a> {
    bridge: &'a dyn FsBridge,
}

impl<'a> ConflictResolver<'a> {
    /// Create a resolver that stats through `bridge`.
    pub fn new(bridge: &'a dyn FsBridge) -> Self {
        Self { bridge }
    }

    /// Stat the destination and describe the collision, if any.
    ///
    /// The source is stat'ed on a best-effort basis; when that fails the
    /// scanned size is reported and the modification time is left empty.
    pub async fn check(
        &self,
        task_id: TaskId,
        entry: &Entry,
        destination: &Endpoint,
        destination_path: &str,
    ) -> BridgeResult<Option<Conflict>> {
        let Some(existing) = self.bridge.stat(destination, destination_path).await? else {
            return Ok(None);
        };

        let incoming = self.source_stat(entry).await;
        let source_path = match &entry.content {
            Some(ContentHandle::Local(path)) => path.to_string_lossy().into_owned(),
            Some(ContentHandle::Remote { path, .. }) => path.clone(),
            _ => entry.relative_path.clone(),
        };

        Ok(Some(Conflict {
            task_id,
            file_name: entry.file_name().to_string(),
            source_path,
            destination_path: destination_path.to_string(),
            existing_size: existing.size,
            existing_modified: existing.modified,
            new_size: incoming.map(|s| s.size).unwrap_or(entry.size),
            new_modified: incoming.and_then(|s| s.modified),
        }))
    }

    async fn source_stat(&self, entry: &Entry) -> Option<FileStat> {
        match entry.content.as_ref()? {
            ContentHandle::Local(path) => {
                let path = path.to_string_lossy();
                self.bridge.stat(&Endpoint::Local, &path).await.ok().flatten()
            }
            ContentHandle::Remote { session, path } => self
                .bridge
                .stat(&Endpoint::Remote(session.clone()), path)
                .await
                .ok()
                .flatten(),
            ContentHandle::Memory(data) => Some(FileStat::file(data.len() as u64, None)),
        }
    }
}
