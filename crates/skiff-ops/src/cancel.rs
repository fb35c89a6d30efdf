//! Cancellation of in-flight transfers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use skiff_core::{Capabilities, FsBridge, TransferId};

use crate::lock;
use crate::progress::ProgressAggregator;

/// Tracks the low-level transfer and compression jobs of one engine and aborts them on request.
///
/// This is the only component that calls the bridge's cancel primitives.
pub struct TransferController {
    bridge: Arc<dyn FsBridge>,
    capabilities: Capabilities,
    progress: Arc<ProgressAggregator>,
    token: Mutex<CancellationToken>,
    active_transfers: Mutex<HashSet<TransferId>>,
    active_archives: Mutex<HashSet<TransferId>>,
    current: Mutex<Option<TransferId>>,
    next_id: AtomicU64,
}

impl TransferController {
    /// Create a controller for `bridge`.
    pub fn new(
        bridge: Arc<dyn FsBridge>,
        capabilities: Capabilities,
        progress: Arc<ProgressAggregator>,
    ) -> Self {
        Self {
            bridge,
            capabilities,
            progress,
            token: Mutex::new(CancellationToken::new()),
            active_transfers: Mutex::new(HashSet::new()),
            active_archives: Mutex::new(HashSet::new()),
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Clear all state before a new run.
    pub fn reset(&self) {
        *lock(&self.token) = CancellationToken::new();
        lock(&self.active_transfers).clear();
        lock(&self.active_archives).clear();
        *lock(&self.current) = None;
    }

    /// Whether cancellation was requested for the current run.
    pub fn is_cancelled(&self) -> bool {
        lock(&self.token).is_cancelled()
    }

    /// Token that fires when the current run is cancelled.
    pub fn token(&self) -> CancellationToken {
        lock(&self.token).clone()
    }

    /// Allocate an identifier for the next file transfer and make it the current one.
    pub fn begin_transfer(&self) -> TransferId {
        let id = self.allocate();
        *lock(&self.current) = Some(id);
        id
    }

    /// Register a transfer whose bridge call is about to start.
    pub fn track_transfer(&self, id: TransferId) {
        lock(&self.active_transfers).insert(id);
    }

    /// Forget a finished transfer.
    pub fn finish_transfer(&self, id: TransferId) {
        lock(&self.active_transfers).remove(&id);
        let mut current = lock(&self.current);
        if *current == Some(id) {
            *current = None;
        }
    }

    /// Allocate and register an archive job.
    pub fn begin_archive(&self) -> TransferId {
        let id = self.allocate();
        lock(&self.active_archives).insert(id);
        id
    }

    /// Forget a finished archive job.
    pub fn finish_archive(&self, id: TransferId) {
        lock(&self.active_archives).remove(&id);
    }

    /// Identifiers of transfers currently tracked, including the current one.
    pub fn in_flight(&self) -> Vec<TransferId> {
        let mut ids: Vec<TransferId> = lock(&self.active_transfers).iter().copied().collect();
        if let Some(current) = *lock(&self.current) {
            if !ids.contains(&current) {
                ids.push(current);
            }
        }
        ids.sort_by_key(|id| id.0);
        ids
    }

    /// Stop the current run.
    ///
    /// Marks the run cancelled, asks the bridge to abort every active archive
    /// and file transfer, then moves every pending or active task to
    /// `cancelled`. Bridge errors are logged and swallowed.
    pub async fn cancel(&self) {
        self.token().cancel();

        let archives: Vec<TransferId> = lock(&self.active_archives).iter().copied().collect();
        for id in archives {
            if let Err(err) = self.bridge.cancel_archive(id).await {
                warn!(%id, error = %err, "archive cancel failed");
            }
        }

        for id in self.in_flight() {
            if let Err(err) = self.bridge.cancel_transfer(id).await {
                debug!(%id, error = %err, "cancel_transfer failed");
            }
            if self.capabilities.abort {
                if let Err(err) = self.bridge.abort_transfer(id).await {
                    debug!(%id, error = %err, "abort_transfer failed");
                }
            }
        }

        let cancelled = self.progress.cancel_open();
        debug!(tasks = cancelled.len(), "cancelled open tasks");
    }

    fn allocate(&self) -> TransferId {
        TransferId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Debug for TransferController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferController")
            .field("cancelled", &self.is_cancelled())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
