//! Entry ordering and grouping of entries into folder bundles.

use std::path::PathBuf;

use indexmap::IndexMap;

use skiff_core::{Entry, TaskId, TransferTask};

use crate::progress::ProgressAggregator;

/// Order entries so directories precede their contents and shallow paths precede deep ones.
///
/// The sort is stable: at equal depth directories come first and otherwise
/// the scanner's order is kept.
pub fn order_entries(mut entries: Vec<Entry>) -> Vec<Entry> {
    entries.sort_by_key(|entry| (entry.depth(), !entry.is_directory));
    entries
}

/// One folder group and the task that reports its progress.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Task created for this folder.
    pub task_id: TaskId,
    /// First path segment shared by every entry of the bundle.
    pub root: String,
    /// Sum of the file sizes.
    pub total_bytes: u64,
    /// Number of file entries.
    pub file_count: usize,
    /// Number of entries (files and directories).
    pub entry_count: usize,
    /// Local directory the folder was scanned from, if any.
    pub origin: Option<PathBuf>,
}

/// Folder bundles keyed by root name, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct BundlePlan {
    bundles: IndexMap<String, Bundle>,
}

impl BundlePlan {
    /// Group entries by root segment without registering any task.
    ///
    /// Entries that are directories or have more than one path segment belong
    /// to the folder named by their first segment; everything else stands alone.
    pub fn group(entries: &[Entry], mut next_id: impl FnMut() -> TaskId) -> Self {
        let mut bundles: IndexMap<String, Bundle> = IndexMap::new();

        for entry in entries.iter().filter(|e| e.is_bundled()) {
            let root = entry.root_name();
            let bundle = bundles.entry(root.to_string()).or_insert_with(|| Bundle {
                task_id: next_id(),
                root: root.to_string(),
                total_bytes: 0,
                file_count: 0,
                entry_count: 0,
                origin: None,
            });

            bundle.entry_count += 1;
            if entry.is_directory {
                if entry.depth() == 1 && bundle.origin.is_none() {
                    bundle.origin = entry.origin.clone();
                }
            } else {
                bundle.total_bytes += entry.size;
                bundle.file_count += 1;
            }
        }

        Self { bundles }
    }

    /// The bundle an entry belongs to, if it is not standalone.
    pub fn bundle_for(&self, entry: &Entry) -> Option<&Bundle> {
        if entry.is_bundled() {
            self.bundles.get(entry.root_name())
        } else {
            None
        }
    }

    /// Look up a bundle by root name.
    pub fn get(&self, root: &str) -> Option<&Bundle> {
        self.bundles.get(root)
    }

    /// Iterate over bundles in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &Bundle> {
        self.bundles.values()
    }

    /// Number of bundles.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Whether there are no bundles.
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

/// Groups entries and registers one pending task per folder before any byte moves.
pub struct TaskBundler<'a> {
    progress: &'a ProgressAggregator,
}

impl<'a> TaskBundler<'a> {
    /// Create a bundler that registers tasks with `progress`.
    pub fn new(progress: &'a ProgressAggregator) -> Self {
        Self { progress }
    }

    /// Build the bundle plan and emit a `TaskCreated` event per folder.
    ///
    /// Standalone files get no task here; the executor creates theirs lazily.
    pub fn bundle(&self, entries: &[Entry]) -> BundlePlan {
        let plan = BundlePlan::group(entries, || self.progress.next_task_id());
        for bundle in plan.iter() {
            self.progress.create(TransferTask::new(
                bundle.task_id,
                bundle.root.clone(),
                true,
                bundle.total_bytes,
                bundle.file_count,
            ));
        }
        plan
    }
}
