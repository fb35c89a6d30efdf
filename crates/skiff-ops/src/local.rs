//! A filesystem bridge over the local disk.
//!
//! Remote sessions are directories on the same machine: a session handle
//! names a root directory and remote paths are resolved inside it. Useful for
//! mirroring trees between disks and for exercising every strategy of the
//! engine without a network.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive as TarArchive, Builder as TarBuilder};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use skiff_core::{
    ArchivePhase, ArchiveProgress, ArchiveProgressFn, BoxFuture, BridgeError, BridgeResult,
    Capabilities, DirEntry, Endpoint, FileStat, FsBridge, ProgressFn, SessionHandle, TransferId,
    TransferSample,
};

use crate::lock;

/// Chunk size for progress-reporting copies.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const PACKED_PERCENT: f64 = 40.0;
const UPLOADED_PERCENT: f64 = 70.0;

/// Bridge that serves both endpoints from the local filesystem.
pub struct LocalBridge {
    capabilities: Capabilities,
    chunk_size: usize,
    sessions: Mutex<HashMap<SessionHandle, PathBuf>>,
    jobs: Mutex<HashMap<TransferId, CancellationToken>>,
    next_session: AtomicU64,
}

impl Default for LocalBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBridge {
    /// Bridge with every optional capability.
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::all())
    }

    /// Bridge advertising only `capabilities`.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sessions: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    /// Set the chunk size used by progress-reporting copies.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Open a session rooted at `root`.
    pub fn open_session(&self, root: impl Into<PathBuf>) -> SessionHandle {
        let n = self.next_session.fetch_add(1, Ordering::Relaxed);
        let handle = SessionHandle::new(format!("local-{n}"));
        let root = root.into();
        debug!(session = %handle, root = %root.display(), "session opened");
        lock(&self.sessions).insert(handle.clone(), root);
        handle
    }

    /// Close a session; returns its root if it was open.
    pub fn close_session(&self, session: &SessionHandle) -> Option<PathBuf> {
        lock(&self.sessions).remove(session)
    }

    fn session_root(&self, session: &SessionHandle) -> BridgeResult<PathBuf> {
        lock(&self.sessions)
            .get(session)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownSession {
                handle: session.to_string(),
            })
    }

    /// Map an endpoint path onto the local disk.
    ///
    /// Remote paths are relative to the session root and may not climb out of it.
    fn resolve(&self, endpoint: &Endpoint, path: &str) -> BridgeResult<PathBuf> {
        match endpoint {
            Endpoint::Local => Ok(PathBuf::from(path)),
            Endpoint::Remote(session) => {
                let root = self.session_root(session)?;
                let relative = Path::new(path.trim_start_matches('/'));
                if relative
                    .components()
                    .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
                {
                    return Err(BridgeError::PermissionDenied {
                        path: relative.to_path_buf(),
                    });
                }
                Ok(root.join(relative))
            }
        }
    }

    fn register(&self, id: TransferId) -> Job<'_> {
        let token = CancellationToken::new();
        lock(&self.jobs).insert(id, token.clone());
        Job {
            jobs: &self.jobs,
            id,
            token,
        }
    }

    fn cancel_job(&self, id: TransferId) {
        if let Some(token) = lock(&self.jobs).get(&id) {
            debug!(%id, "cancelling job");
            token.cancel();
        }
    }

    async fn upload_archive_impl(
        &self,
        session: &SessionHandle,
        local_dir: &Path,
        remote_dir: &str,
        id: TransferId,
        progress: ArchiveProgressFn<'_>,
    ) -> BridgeResult<()> {
        let job = self.register(id);
        let root = self.session_root(session)?;
        let target = self.resolve(&Endpoint::Remote(session.clone()), remote_dir)?;

        progress(ArchiveProgress {
            phase: ArchivePhase::Compressing,
            percent: 0.0,
        });
        let source = local_dir.to_path_buf();
        let packed = tokio::task::spawn_blocking(move || pack_directory(&source))
            .await
            .map_err(|err| BridgeError::other(format!("archive worker stopped: {err}")))?
            .map_err(|err| BridgeError::ArchiveFallback {
                reason: format!("compressing {}: {err}", local_dir.display()),
            })?;
        if job.token.is_cancelled() {
            return Err(BridgeError::Aborted);
        }

        progress(ArchiveProgress {
            phase: ArchivePhase::Uploading,
            percent: PACKED_PERCENT,
        });
        let staging = root.join(format!(".skiff-{}.tar.gz", id.0));
        let upload = async {
            let mut reader = tokio::fs::File::open(packed.path())
                .await
                .map_err(|err| BridgeError::io(packed.path(), err))?;
            let total = reader
                .metadata()
                .await
                .map_err(|err| BridgeError::io(packed.path(), err))?
                .len()
                .max(1);
            let mut writer = tokio::fs::File::create(&staging)
                .await
                .map_err(|err| BridgeError::io(&staging, err))?;
            pump(&mut reader, &mut writer, &job.token, self.chunk_size, &staging, |done| {
                let span = UPLOADED_PERCENT - PACKED_PERCENT;
                progress(ArchiveProgress {
                    phase: ArchivePhase::Uploading,
                    percent: PACKED_PERCENT + span * (done as f64 / total as f64),
                });
            })
            .await
        };
        if let Err(err) = upload.await {
            remove_quietly(&staging).await;
            return Err(err);
        }

        progress(ArchiveProgress {
            phase: ArchivePhase::Extracting,
            percent: UPLOADED_PERCENT,
        });
        let archive = staging.clone();
        let unpack_target = target.clone();
        let unpacked = tokio::task::spawn_blocking(move || unpack_archive(&archive, &unpack_target))
            .await
            .map_err(|err| BridgeError::other(format!("archive worker stopped: {err}")));
        remove_quietly(&staging).await;
        unpacked?.map_err(|err| BridgeError::ArchiveFallback {
            reason: format!("extracting into {}: {err}", target.display()),
        })?;

        progress(ArchiveProgress {
            phase: ArchivePhase::Extracting,
            percent: 100.0,
        });
        debug!(%id, target = %target.display(), "archive extracted");
        Ok(())
    }
}

impl std::fmt::Debug for LocalBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBridge")
            .field("capabilities", &self.capabilities)
            .field("chunk_size", &self.chunk_size)
            .field("sessions", &lock(&self.sessions).len())
            .finish()
    }
}

/// A registered cancellable job; unregisters itself when dropped.
struct Job<'a> {
    jobs: &'a Mutex<HashMap<TransferId, CancellationToken>>,
    id: TransferId,
    token: CancellationToken,
}

impl Drop for Job<'_> {
    fn drop(&mut self) {
        lock(self.jobs).remove(&self.id);
    }
}

impl FsBridge for LocalBridge {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn read<'a>(&'a self, endpoint: &'a Endpoint, path: &'a str) -> BoxFuture<'a, BridgeResult<Vec<u8>>> {
        Box::pin(async move {
            let path = self.resolve(endpoint, path)?;
            tokio::fs::read(&path)
                .await
                .map_err(|err| BridgeError::io(&path, err))
        })
    }

    fn write<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        path: &'a str,
        data: Vec<u8>,
    ) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            let path = self.resolve(endpoint, path)?;
            trace!(path = %path.display(), bytes = data.len(), "write");
            tokio::fs::write(&path, data)
                .await
                .map_err(|err| BridgeError::io(&path, err))
        })
    }

    fn mkdir<'a>(&'a self, endpoint: &'a Endpoint, path: &'a str) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            let path = self.resolve(endpoint, path)?;
            tokio::fs::create_dir(&path)
                .await
                .map_err(|err| BridgeError::io(&path, err))
        })
    }

    fn stat<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        path: &'a str,
    ) -> BoxFuture<'a, BridgeResult<Option<FileStat>>> {
        Box::pin(async move {
            let path = self.resolve(endpoint, path)?;
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(BridgeError::io(&path, err)),
            };
            if metadata.is_dir() {
                return Ok(Some(FileStat::directory()));
            }
            let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
            Ok(Some(FileStat::file(metadata.len(), modified)))
        })
    }

    fn delete<'a>(&'a self, endpoint: &'a Endpoint, path: &'a str) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            let path = self.resolve(endpoint, path)?;
            let metadata = tokio::fs::symlink_metadata(&path)
                .await
                .map_err(|err| BridgeError::io(&path, err))?;
            let result = if metadata.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            result.map_err(|err| BridgeError::io(&path, err))
        })
    }

    fn list_dir<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        path: &'a str,
    ) -> BoxFuture<'a, BridgeResult<Vec<DirEntry>>> {
        Box::pin(async move {
            let path = self.resolve(endpoint, path)?;
            let mut reader = tokio::fs::read_dir(&path)
                .await
                .map_err(|err| BridgeError::io(&path, err))?;

            let mut children = Vec::new();
            while let Some(child) = reader
                .next_entry()
                .await
                .map_err(|err| BridgeError::io(&path, err))?
            {
                let metadata = match child.metadata().await {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        debug!(path = %child.path().display(), error = %err, "skipping unreadable child");
                        continue;
                    }
                };
                children.push(DirEntry {
                    name: child.file_name().to_string_lossy().into_owned(),
                    is_directory: metadata.is_dir(),
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                });
            }
            Ok(children)
        })
    }

    fn write_with_progress<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        path: &'a str,
        data: Vec<u8>,
        id: TransferId,
        progress: ProgressFn<'a>,
    ) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            let job = self.register(id);
            let path = self.resolve(endpoint, path)?;
            let total = data.len() as u64;
            let mut writer = tokio::fs::File::create(&path)
                .await
                .map_err(|err| BridgeError::io(&path, err))?;
            let mut reader = data.as_slice();
            pump(&mut reader, &mut writer, &job.token, self.chunk_size, &path, |done| {
                progress(TransferSample::new(done, total));
            })
            .await
            .map(|_| ())
        })
    }

    fn stream_upload<'a>(
        &'a self,
        session: &'a SessionHandle,
        local: &'a Path,
        remote: &'a str,
        id: TransferId,
        progress: ProgressFn<'a>,
    ) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(async move {
            let job = self.register(id);
            let target = self.resolve(&Endpoint::Remote(session.clone()), remote)?;
            let mut reader = tokio::fs::File::open(local)
                .await
                .map_err(|err| BridgeError::io(local, err))?;
            let total = reader
                .metadata()
                .await
                .map_err(|err| BridgeError::io(local, err))?
                .len();
            let mut writer = tokio::fs::File::create(&target)
                .await
                .map_err(|err| BridgeError::io(&target, err))?;
            pump(&mut reader, &mut writer, &job.token, self.chunk_size, &target, |done| {
                progress(TransferSample::new(done, total));
            })
            .await
            .map(|_| ())
        })
    }

    fn archive_supported<'a>(&'a self, session: &'a SessionHandle) -> BoxFuture<'a, BridgeResult<bool>> {
        Box::pin(async move { Ok(self.capabilities.archive && self.session_root(session).is_ok()) })
    }

    fn upload_archive<'a>(
        &'a self,
        session: &'a SessionHandle,
        local_dir: &'a Path,
        remote_dir: &'a str,
        id: TransferId,
        progress: ArchiveProgressFn<'a>,
    ) -> BoxFuture<'a, BridgeResult<()>> {
        Box::pin(self.upload_archive_impl(session, local_dir, remote_dir, id, progress))
    }

    fn cancel_archive(&self, id: TransferId) -> BoxFuture<'_, BridgeResult<()>> {
        self.cancel_job(id);
        Box::pin(async { Ok(()) })
    }

    fn cancel_transfer(&self, id: TransferId) -> BoxFuture<'_, BridgeResult<()>> {
        self.cancel_job(id);
        Box::pin(async { Ok(()) })
    }

    fn abort_transfer(&self, id: TransferId) -> BoxFuture<'_, BridgeResult<()>> {
        self.cancel_job(id);
        Box::pin(async { Ok(()) })
    }
}

/// Copy `reader` into `writer` chunk by chunk, stopping when `token` fires.
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    token: &CancellationToken,
    chunk_size: usize,
    path: &Path,
    mut on_chunk: impl FnMut(u64),
) -> BridgeResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    let mut done = 0u64;
    loop {
        if token.is_cancelled() {
            return Err(BridgeError::Aborted);
        }
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|err| BridgeError::io(path, err))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(|err| BridgeError::io(path, err))?;
        done += n as u64;
        on_chunk(done);
        tokio::task::yield_now().await;
    }
    writer
        .flush()
        .await
        .map_err(|err| BridgeError::io(path, err))?;
    Ok(done)
}

fn pack_directory(source: &Path) -> io::Result<NamedTempFile> {
    let mut archive = NamedTempFile::new()?;
    {
        let encoder = GzEncoder::new(archive.as_file_mut(), Compression::default());
        let mut builder = TarBuilder::new(encoder);
        builder.append_dir_all(".", source)?;
        let encoder = builder.into_inner()?;
        encoder.finish()?;
    }
    Ok(archive)
}

fn unpack_archive(archive: &Path, target: &Path) -> io::Result<()> {
    std::fs::create_dir_all(target)?;
    let file = std::fs::File::open(archive)?;
    TarArchive::new(GzDecoder::new(file)).unpack(target)
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %err, "could not remove staging archive");
    }
}
