//! Scripted in-memory bridge shared by the engine tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use skiff_core::{
    ArchivePhase, ArchiveProgress, ArchiveProgressFn, BoxFuture, BridgeError, BridgeResult,
    Capabilities, ContentHandle, DirEntry, Endpoint, Entry, FileStat, FsBridge, ProgressFn,
    SessionHandle, TransferId, TransferSample,
};
use skiff_ops::{TransferController, TransferEvent};
use tokio::sync::mpsc::UnboundedReceiver;

pub const SESSION: &str = "sess-1";

/// How `upload_archive` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveScript {
    Succeed,
    Fallback,
    Fail,
    /// Cancel the engine after the compressing phase, then report the abort.
    CancelMidway,
}

/// A bridge whose filesystem lives in memory and whose failures are scripted.
pub struct ScriptedBridge {
    pub caps: Capabilities,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    writes: Mutex<Vec<String>>,
    fail_writes: Mutex<HashSet<String>>,
    interrupted_writes: Mutex<HashSet<String>>,
    write_delay: Mutex<Option<Duration>>,
    list_delay: Mutex<Option<Duration>>,
    fail_streams: Mutex<bool>,
    archive: Mutex<ArchiveScript>,
    archive_calls: AtomicUsize,
    cancel_after_writes: Mutex<Option<usize>>,
    controller: OnceLock<Arc<TransferController>>,
    pub cancel_transfer_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
    pub cancel_archive_calls: AtomicUsize,
}

fn key(endpoint: &Endpoint, path: &str) -> String {
    match endpoint {
        Endpoint::Local => format!("local:{path}"),
        Endpoint::Remote(session) => format!("{}:{path}", session.as_str()),
    }
}

impl ScriptedBridge {
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            files: Mutex::new(BTreeMap::new()),
            dirs: Mutex::new(BTreeSet::new()),
            writes: Mutex::new(Vec::new()),
            fail_writes: Mutex::new(HashSet::new()),
            interrupted_writes: Mutex::new(HashSet::new()),
            write_delay: Mutex::new(None),
            list_delay: Mutex::new(None),
            fail_streams: Mutex::new(false),
            archive: Mutex::new(ArchiveScript::Succeed),
            archive_calls: AtomicUsize::new(0),
            cancel_after_writes: Mutex::new(None),
            controller: OnceLock::new(),
            cancel_transfer_calls: AtomicUsize::new(0),
            abort_calls: AtomicUsize::new(0),
            cancel_archive_calls: AtomicUsize::new(0),
        }
    }

    pub fn session() -> SessionHandle {
        SessionHandle::new(SESSION)
    }

    pub fn put_local(&self, path: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(key(&Endpoint::Local, path), data.to_vec());
    }

    pub fn put_remote(&self, path: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(key(&Endpoint::Remote(Self::session()), path), data.to_vec());
    }

    pub fn remote_file(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&key(&Endpoint::Remote(Self::session()), path))
            .cloned()
    }

    pub fn put_remote_dir(&self, path: &str) {
        self.dirs
            .lock()
            .unwrap()
            .insert(key(&Endpoint::Remote(Self::session()), path));
    }

    pub fn remote_dir_exists(&self, path: &str) -> bool {
        self.dirs
            .lock()
            .unwrap()
            .contains(&key(&Endpoint::Remote(Self::session()), path))
    }

    /// Destination keys of completed writes, in order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn fail_write(&self, remote_path: &str) {
        self.fail_writes
            .lock()
            .unwrap()
            .insert(key(&Endpoint::Remote(Self::session()), remote_path));
    }

    /// Fail writes to `remote_path` with an OS-level `Interrupted` error.
    pub fn interrupt_write(&self, remote_path: &str) {
        self.interrupted_writes
            .lock()
            .unwrap()
            .insert(key(&Endpoint::Remote(Self::session()), remote_path));
    }

    pub fn slow_writes(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    pub fn slow_listing(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_streams(&self) {
        *self.fail_streams.lock().unwrap() = true;
    }

    pub fn script_archive(&self, script: ArchiveScript) {
        *self.archive.lock().unwrap() = script;
    }

    pub fn archive_calls(&self) -> usize {
        self.archive_calls.load(Ordering::SeqCst)
    }

    /// Cancel the engine from inside the bridge once `n` writes completed.
    pub fn cancel_after_writes(&self, n: usize, controller: Arc<TransferController>) {
        *self.cancel_after_writes.lock().unwrap() = Some(n);
        let _ = self.controller.set(controller);
    }

    /// Cancel the engine from inside `upload_archive`.
    pub fn cancel_during_archive(&self, controller: Arc<TransferController>) {
        self.script_archive(ArchiveScript::CancelMidway);
        let _ = self.controller.set(controller);
    }

    async fn store(&self, endpoint: &Endpoint, path: &str, data: Vec<u8>) -> BridgeResult<()> {
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let key = key(endpoint, path);
        if self.fail_writes.lock().unwrap().contains(&key) {
            return Err(BridgeError::other(format!("disk full writing {path}")));
        }
        if self.interrupted_writes.lock().unwrap().contains(&key) {
            return Err(BridgeError::io(path, std::io::ErrorKind::Interrupted.into()));
        }
        let written = {
            self.files.lock().unwrap().insert(key.clone(), data);
            let mut writes = self.writes.lock().unwrap();
            writes.push(key);
            writes.len()
        };

        let threshold = *self.cancel_after_writes.lock().unwrap();
        if threshold == Some(written) {
            if let Some(controller) = self.controller.get() {
                controller.cancel().await;
            }
        }
        Ok(())
    }
}

impl FsBridge for ScriptedBridge {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn read<'a>(&'a self, endpoint: &'a Endpoint, path: &'a str) -> BoxFuture<'a, BridgeResult<Vec<u8>>> {
        Box::pin(async move {
            self.files
                .lock()
                .unwrap()
                .get(&key(endpoint, path))
                .cloned()
                .ok_or_else(|| BridgeError::NotFound { path: path.into() })
        })
    }

    fn write<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        path: &'a str,
        data: Vec<u8>,
    ) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(self.store(endpoint, path, data))
    }

    fn mkdir<'a>(&'a self, endpoint: &'a Endpoint, path: &'a str) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            if self.dirs.lock().unwrap().insert(key(endpoint, path)) {
                Ok(())
            } else {
                Err(BridgeError::other(format!("{path} exists")))
            }
        })
    }

    fn stat<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        path: &'a str,
    ) -> BoxFuture<'a, BridgeResult<Option<FileStat>>> {
        Box::pin(async move {
            let key = key(endpoint, path);
            if self.dirs.lock().unwrap().contains(&key) {
                return Ok(Some(FileStat::directory()));
            }
            Ok(self
                .files
                .lock()
                .unwrap()
                .get(&key)
                .map(|data| FileStat::file(data.len() as u64, None)))
        })
    }

    fn delete<'a>(&'a self, endpoint: &'a Endpoint, path: &'a str) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            self.files.lock().unwrap().remove(&key(endpoint, path));
            Ok(())
        })
    }

    fn list_dir<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        path: &'a str,
    ) -> BoxFuture<'a, BridgeResult<Vec<DirEntry>>> {
        Box::pin(async move {
            let delay = *self.list_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let prefix = format!("{}/", key(endpoint, path).trim_end_matches('/'));
            let children = self
                .files
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(k, data)| {
                    let rest = k.strip_prefix(&prefix)?;
                    (!rest.contains('/')).then(|| DirEntry {
                        name: rest.to_string(),
                        is_directory: false,
                        size: data.len() as u64,
                    })
                })
                .collect();
            Ok(children)
        })
    }

    fn write_with_progress<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        path: &'a str,
        data: Vec<u8>,
        _id: TransferId,
        progress: ProgressFn<'a>,
    ) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            let total = data.len() as u64;
            progress(TransferSample::new(total / 2, total));
            progress(TransferSample::new(total, total));
            self.store(endpoint, path, data).await
        })
    }

    fn stream_upload<'a>(
        &'a self,
        session: &'a SessionHandle,
        local: &'a Path,
        remote: &'a str,
        _id: TransferId,
        progress: ProgressFn<'a>,
    ) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            if *self.fail_streams.lock().unwrap() {
                return Err(BridgeError::other("stream channel closed"));
            }
            let local = local.to_string_lossy();
            let data = self.read(&Endpoint::Local, &local).await?;
            let total = data.len() as u64;
            progress(TransferSample::new(total, total));
            self.store(&Endpoint::Remote(session.clone()), remote, data)
                .await
        })
    }

    fn archive_supported<'a>(&'a self, _session: &'a SessionHandle) -> BoxFuture<'a, BridgeResult<bool>> {
        Box::pin(async { Ok(true) })
    }

    fn upload_archive<'a>(
        &'a self,
        _session: &'a SessionHandle,
        _local_dir: &'a Path,
        remote_dir: &'a str,
        _id: TransferId,
        progress: ArchiveProgressFn<'a>,
    ) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            self.archive_calls.fetch_add(1, Ordering::SeqCst);
            progress(ArchiveProgress {
                phase: ArchivePhase::Compressing,
                percent: 20.0,
            });
            let script = *self.archive.lock().unwrap();
            match script {
                ArchiveScript::Succeed => {}
                ArchiveScript::Fallback => {
                    return Err(BridgeError::ArchiveFallback {
                        reason: "remote tar missing".into(),
                    });
                }
                ArchiveScript::Fail => return Err(BridgeError::other("connection reset")),
                ArchiveScript::CancelMidway => {
                    if let Some(controller) = self.controller.get() {
                        controller.cancel().await;
                    }
                    return Err(BridgeError::Aborted);
                }
            }
            progress(ArchiveProgress {
                phase: ArchivePhase::Uploading,
                percent: 60.0,
            });
            progress(ArchiveProgress {
                phase: ArchivePhase::Extracting,
                percent: 100.0,
            });
            self.writes
                .lock()
                .unwrap()
                .push(format!("archive:{remote_dir}"));
            Ok(())
        })
    }

    fn cancel_archive(&self, _id: TransferId) -> BoxFuture<'_, BridgeResult<()>> {
        self.cancel_archive_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn cancel_transfer(&self, _id: TransferId) -> BoxFuture<'_, BridgeResult<()>> {
        self.cancel_transfer_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn abort_transfer(&self, _id: TransferId) -> BoxFuture<'_, BridgeResult<()>> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(BridgeError::other("no such transfer")) })
    }
}

/// An in-memory file entry.
pub fn memory_file(path: &str, data: &[u8]) -> Entry {
    Entry::file(path, ContentHandle::Memory(Arc::from(data)), data.len() as u64)
}

/// A file entry backed by a local path the bridge knows.
pub fn local_file(bridge: &ScriptedBridge, relative: &str, local: &str, data: &[u8]) -> Entry {
    bridge.put_local(local, data);
    Entry::file(relative, ContentHandle::Local(local.into()), data.len() as u64)
}

pub fn drain(rx: &mut UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
