//! Recursive entry scanner over bridge endpoints.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use skiff_core::{
    BoxFuture, BridgeError, ContentHandle, Endpoint, Entry, FsBridge, ScanWarning, SessionHandle,
    WarningKind, join_path,
};

use crate::progress::{ScanCounters, ScanProgress};

/// One user-dropped or user-picked item to scan.
#[derive(Debug, Clone)]
pub enum ScanInput {
    /// A file or directory on the local disk.
    Path(PathBuf),
    /// A blob with no backing path.
    Memory { name: String, data: Arc<[u8]> },
    /// A file or directory inside a remote session.
    Remote { session: SessionHandle, path: String },
}

impl ScanInput {
    /// Scan a local path.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// Scan an in-memory blob.
    pub fn memory(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self::Memory {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Scan a remote path.
    pub fn remote(session: SessionHandle, path: impl Into<String>) -> Self {
        Self::Remote {
            session,
            path: path.into(),
        }
    }
}

/// Entries produced by a scan plus the failures that were skipped.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Flat entry list; every directory precedes its own children.
    pub entries: Vec<Entry>,
    /// Directories or roots that could not be read.
    pub warnings: Vec<ScanWarning>,
    /// The scan stopped early on a cancel request; `entries` is incomplete.
    pub cancelled: bool,
}

impl ScanOutcome {
    /// Number of file entries.
    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_directory).count()
    }

    /// Sum of all file sizes.
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

struct ScanState {
    outcome: ScanOutcome,
    counters: ScanCounters,
    children_since_yield: usize,
}

/// Turns a heterogeneous set of inputs into a flat, deterministic entry list.
pub struct EntryScanner {
    bridge: Arc<dyn FsBridge>,
    yield_every: usize,
    progress_tx: broadcast::Sender<ScanProgress>,
    cancel: CancellationToken,
}

impl EntryScanner {
    /// Create a scanner that lists directories through `bridge`.
    pub fn new(bridge: Arc<dyn FsBridge>, yield_every: usize) -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            bridge,
            yield_every: yield_every.max(1),
            progress_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop scanning once `token` fires.
    ///
    /// The token is checked before each input and at every directory child.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Subscribe to scan progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// Scan every input in order.
    ///
    /// Children of a directory are sorted by name. A directory that cannot be
    /// listed is recorded as a warning and skipped. A cancelled scan returns
    /// what it found so far with `cancelled` set.
    pub async fn scan(&self, inputs: Vec<ScanInput>) -> ScanOutcome {
        let mut state = ScanState {
            outcome: ScanOutcome::default(),
            counters: ScanCounters::start(),
            children_since_yield: 0,
        };

        for input in inputs {
            if self.stopped(&mut state) {
                break;
            }
            match input {
                ScanInput::Path(path) => {
                    let path = named_local_path(path).await;
                    let location = path.to_string_lossy().into_owned();
                    let name = local_name(&path);
                    self.scan_root(&Endpoint::Local, &location, &name, &mut state)
                        .await;
                }
                ScanInput::Memory { name, data } => {
                    let size = data.len() as u64;
                    state.counters.file(size);
                    state
                        .outcome
                        .entries
                        .push(Entry::file(name, ContentHandle::Memory(data), size));
                }
                ScanInput::Remote { session, path } => {
                    let name = remote_name(&path);
                    let endpoint = Endpoint::Remote(session);
                    self.scan_root(&endpoint, &path, &name, &mut state).await;
                }
            }
        }

        let _ = self.progress_tx.send(state.counters.snapshot());
        debug!(
            entries = state.outcome.entries.len(),
            warnings = state.outcome.warnings.len(),
            cancelled = state.outcome.cancelled,
            "scan finished"
        );
        state.outcome
    }

    fn stopped(&self, state: &mut ScanState) -> bool {
        if self.cancel.is_cancelled() {
            state.outcome.cancelled = true;
        }
        state.outcome.cancelled
    }

    async fn scan_root(
        &self,
        endpoint: &Endpoint,
        location: &str,
        name: &str,
        state: &mut ScanState,
    ) {
        if name.is_empty() {
            state.outcome.warnings.push(ScanWarning::new(
                location,
                "Input has no file name",
                WarningKind::MetadataError,
            ));
            return;
        }

        let stat = match self.bridge.stat(endpoint, location).await {
            Ok(Some(stat)) => stat,
            Ok(None) => {
                let err = BridgeError::NotFound {
                    path: PathBuf::from(location),
                };
                warn!(path = location, "scan input does not exist");
                state.counters.unreadable();
                state
                    .outcome
                    .warnings
                    .push(ScanWarning::new(location, err.to_string(), WarningKind::MetadataError));
                return;
            }
            Err(err) => {
                warn!(path = location, error = %err, "failed to stat scan input");
                state.counters.unreadable();
                state.outcome.warnings.push(ScanWarning::new(
                    location,
                    err.to_string(),
                    WarningKind::MetadataError,
                ));
                return;
            }
        };

        if stat.is_directory {
            state.counters.directory();
            state
                .outcome
                .entries
                .push(directory_entry(endpoint, name, location));
            self.walk_dir(endpoint, location.to_string(), name.to_string(), state)
                .await;
        } else {
            state.counters.file(stat.size);
            state
                .outcome
                .entries
                .push(Entry::file(name, content_handle(endpoint, location), stat.size));
        }
    }

    fn walk_dir<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        location: String,
        relative: String,
        state: &'a mut ScanState,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            state.counters.entering(&relative);

            let mut children = match self.bridge.list_dir(endpoint, &location).await {
                Ok(children) => children,
                Err(err) => {
                    warn!(path = %location, error = %err, "skipping unreadable directory");
                    state.counters.unreadable();
                    state
                        .outcome
                        .warnings
                        .push(ScanWarning::read_error(location.as_str(), &err));
                    return;
                }
            };
            children.sort_by(|a, b| a.name.cmp(&b.name));

            for child in children {
                if self.stopped(state) {
                    return;
                }
                let child_location = child_location(endpoint, &location, &child.name);
                let child_relative = join_path(&relative, &child.name);

                if child.is_directory {
                    state.counters.directory();
                    state.outcome.entries.push(directory_entry(
                        endpoint,
                        &child_relative,
                        &child_location,
                    ));
                    self.walk_dir(endpoint, child_location, child_relative, state)
                        .await;
                } else {
                    state.counters.file(child.size);
                    state.outcome.entries.push(Entry::file(
                        child_relative,
                        content_handle(endpoint, &child_location),
                        child.size,
                    ));
                }

                state.children_since_yield += 1;
                if state.children_since_yield >= self.yield_every {
                    state.children_since_yield = 0;
                    let _ = self.progress_tx.send(state.counters.snapshot());
                    tokio::task::yield_now().await;
                }
            }
        })
    }
}

fn directory_entry(endpoint: &Endpoint, relative: &str, location: &str) -> Entry {
    let entry = Entry::directory(relative);
    match endpoint {
        Endpoint::Local => entry.with_origin(location),
        Endpoint::Remote(_) => entry,
    }
}

fn content_handle(endpoint: &Endpoint, location: &str) -> ContentHandle {
    match endpoint {
        Endpoint::Local => ContentHandle::Local(PathBuf::from(location)),
        Endpoint::Remote(session) => ContentHandle::Remote {
            session: session.clone(),
            path: location.to_string(),
        },
    }
}

fn child_location(endpoint: &Endpoint, parent: &str, name: &str) -> String {
    match endpoint {
        Endpoint::Local => Path::new(parent).join(name).to_string_lossy().into_owned(),
        Endpoint::Remote(_) => join_path(parent, name),
    }
}

/// Resolve inputs such as `.` or `..` that have no final component of their own.
async fn named_local_path(path: PathBuf) -> PathBuf {
    if path.file_name().is_some() {
        return path;
    }
    match tokio::fs::canonicalize(&path).await {
        Ok(resolved) => resolved,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "cannot resolve input path");
            path
        }
    }
}

fn local_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn remote_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_name() {
        assert_eq!(remote_name("/srv/data/docs/"), "docs");
        assert_eq!(remote_name("report.pdf"), "report.pdf");
        assert_eq!(remote_name("/"), "");
    }

    #[test]
    fn test_child_location() {
        let remote = Endpoint::Remote(SessionHandle::new("s"));
        assert_eq!(child_location(&remote, "/srv", "a.txt"), "/srv/a.txt");

        let local = child_location(&Endpoint::Local, "/tmp/x", "a.txt");
        assert!(local.ends_with("a.txt"));
    }

    #[test]
    fn test_directory_entry_origin() {
        let local = directory_entry(&Endpoint::Local, "docs", "/home/u/docs");
        assert_eq!(local.origin, Some(PathBuf::from("/home/u/docs")));

        let remote = directory_entry(&Endpoint::Remote(SessionHandle::new("s")), "docs", "/srv/docs");
        assert!(remote.origin.is_none());
    }
}
