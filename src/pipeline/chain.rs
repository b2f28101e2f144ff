// SPDX-License-Identifier: MPL-2.0

//! Stage hand-off for the decode pipeline.
//!
//! ```text
//! request(hash) ─▶ pending ─▶ [load workers] ─▶ loaded ─▶ [decode workers] ─▶ decoded
//!                  (bounded)                    (bounded)                      (keyed by hash)
//! ```
//!
//! Slots are identified by their content hash, not by queue position. Consumers
//! wait for a specific hash in the decoded stage. Termination wakes every
//! blocked worker and waiter.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded, select};
use tracing::trace;

use crate::error::{LoadError, PipelineTerminated};
use crate::frame::FrameData;
use crate::mapped::FileBytes;

/// Content identity of a slot. Zero never identifies a valid item.
pub type ContentHash = u64;

/// Output of the load stage.
#[derive(Debug)]
pub struct LoadedSlot {
    pub hash: ContentHash,
    pub path: PathBuf,
    /// Raw file bytes, present only for decoders reading from memory.
    pub raw: Option<Arc<FileBytes>>,
}

/// Output of the decode stage.
#[derive(Debug)]
pub struct DecodedSlot {
    pub hash: ContentHash,
    pub path: Option<PathBuf>,
    pub frame: Result<FrameData, LoadError>,
}

impl DecodedSlot {
    pub(crate) fn failed(hash: ContentHash, path: Option<PathBuf>, why: LoadError) -> Self {
        Self {
            hash,
            path,
            frame: Err(why),
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.frame.is_err()
    }
}

/// Counters since the chain was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainStats {
    pub requested: u64,
    pub loaded: u64,
    pub decoded: u64,
    pub failed: u64,
    /// Requests dropped because their hash could not be resolved.
    pub dropped: u64,
}

/// Shared between the pipeline workers and its consumers.
pub struct Chain {
    pending_tx: Sender<ContentHash>,
    pending_rx: Receiver<ContentHash>,
    loaded_tx: Sender<LoadedSlot>,
    loaded_rx: Receiver<LoadedSlot>,
    /// Dropped on termination, which disconnects `shutdown_rx`.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    terminated: AtomicBool,
    /// Hashes requested and not yet taken by a consumer.
    in_flight: Mutex<HashSet<ContentHash>>,
    decoded: Mutex<HashMap<ContentHash, DecodedSlot>>,
    decoded_ready: Condvar,
    stats_requested: AtomicU64,
    stats_loaded: AtomicU64,
    stats_decoded: AtomicU64,
    stats_failed: AtomicU64,
    stats_dropped: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Chain {
    /// Create a chain whose pending and loaded stages hold `capacity` slots each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (pending_tx, pending_rx) = bounded(capacity.max(1));
        let (loaded_tx, loaded_rx) = bounded(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = bounded(0);

        Self {
            pending_tx,
            pending_rx,
            loaded_tx,
            loaded_rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            terminated: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
            decoded: Mutex::new(HashMap::new()),
            decoded_ready: Condvar::new(),
            stats_requested: AtomicU64::new(0),
            stats_loaded: AtomicU64::new(0),
            stats_decoded: AtomicU64::new(0),
            stats_failed: AtomicU64::new(0),
            stats_dropped: AtomicU64::new(0),
        }
    }

    /// Ask the pipeline to produce `hash`.
    ///
    /// Returns `Ok(false)` without enqueuing when the hash is zero, already in
    /// flight, or the pending stage is full. Never blocks.
    pub fn request(&self, hash: ContentHash) -> Result<bool, PipelineTerminated> {
        if self.is_terminated() {
            return Err(PipelineTerminated);
        }

        if hash == 0 {
            return Ok(false);
        }

        let mut in_flight = lock(&self.in_flight);
        if in_flight.contains(&hash) {
            return Ok(false);
        }

        match self.pending_tx.try_send(hash) {
            Ok(()) => {
                in_flight.insert(hash);
                self.stats_requested.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err(PipelineTerminated),
        }
    }

    /// Block until a hash is pending.
    pub fn next_load(&self) -> Result<ContentHash, PipelineTerminated> {
        self.receive(&self.pending_rx)
    }

    /// Hand a loaded slot to the decode stage, blocking while it is full.
    pub fn publish_loaded(&self, slot: LoadedSlot) -> Result<(), PipelineTerminated> {
        if self.is_terminated() {
            return Err(PipelineTerminated);
        }

        select! {
            send(self.loaded_tx, slot) -> sent => {
                sent.map_err(|_| PipelineTerminated)?;
                self.stats_loaded.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            recv(self.shutdown_rx) -> _ => Err(PipelineTerminated),
        }
    }

    /// Block until a loaded slot is available.
    pub fn next_decode(&self) -> Result<LoadedSlot, PipelineTerminated> {
        self.receive(&self.loaded_rx)
    }

    /// Make a finished, possibly failed, slot available to consumers.
    pub fn publish_decoded(&self, slot: DecodedSlot) {
        if slot.is_failed() {
            self.stats_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats_decoded.fetch_add(1, Ordering::Relaxed);
        }

        trace!(hash = slot.hash, failed = slot.is_failed(), "slot decoded");
        lock(&self.decoded).insert(slot.hash, slot);
        self.decoded_ready.notify_all();
    }

    /// Forget a request whose hash could not be resolved. Consumers waiting
    /// on it are not notified.
    pub(crate) fn drop_unresolved(&self, hash: ContentHash) {
        lock(&self.in_flight).remove(&hash);
        self.stats_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Block until `hash` is decoded, and take it.
    pub fn wait_decoded(&self, hash: ContentHash) -> Result<DecodedSlot, PipelineTerminated> {
        let mut decoded = lock(&self.decoded);
        loop {
            if self.is_terminated() {
                return Err(PipelineTerminated);
            }

            if let Some(slot) = decoded.remove(&hash) {
                drop(decoded);
                lock(&self.in_flight).remove(&hash);
                return Ok(slot);
            }

            decoded = self
                .decoded_ready
                .wait(decoded)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until any slot is decoded, and take it.
    pub fn next_decoded(&self) -> Result<DecodedSlot, PipelineTerminated> {
        let mut decoded = lock(&self.decoded);
        loop {
            if self.is_terminated() {
                return Err(PipelineTerminated);
            }

            let ready = decoded.keys().next().copied();
            if let Some(slot) = ready.and_then(|hash| decoded.remove(&hash)) {
                drop(decoded);
                lock(&self.in_flight).remove(&slot.hash);
                return Ok(slot);
            }

            decoded = self
                .decoded_ready
                .wait(decoded)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take `hash` if it is already decoded.
    pub fn try_take_decoded(&self, hash: ContentHash) -> Option<DecodedSlot> {
        let slot = lock(&self.decoded).remove(&hash)?;
        lock(&self.in_flight).remove(&hash);
        Some(slot)
    }

    /// Signal shutdown. Every worker blocked on a stage and every consumer
    /// waiting for a slot returns [`PipelineTerminated`].
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        drop(lock(&self.shutdown_tx).take());

        // Taken so a waiter between its flag check and `wait` cannot miss the wakeup.
        let _decoded = lock(&self.decoded);
        self.decoded_ready.notify_all();
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Number of hashes requested and not yet taken.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    #[must_use]
    pub fn stats(&self) -> ChainStats {
        ChainStats {
            requested: self.stats_requested.load(Ordering::Relaxed),
            loaded: self.stats_loaded.load(Ordering::Relaxed),
            decoded: self.stats_decoded.load(Ordering::Relaxed),
            failed: self.stats_failed.load(Ordering::Relaxed),
            dropped: self.stats_dropped.load(Ordering::Relaxed),
        }
    }

    fn receive<T>(&self, stage: &Receiver<T>) -> Result<T, PipelineTerminated> {
        if self.is_terminated() {
            return Err(PipelineTerminated);
        }

        // A ready slot is still handed out if termination races with it, so
        // check the flag again before the caller processes it.
        let slot = match stage.try_recv() {
            Ok(slot) => slot,
            Err(TryRecvError::Disconnected) => return Err(PipelineTerminated),
            Err(TryRecvError::Empty) => select! {
                recv(stage) -> slot => slot.map_err(|_| PipelineTerminated)?,
                recv(self.shutdown_rx) -> _ => return Err(PipelineTerminated),
            },
        };

        if self.is_terminated() {
            return Err(PipelineTerminated);
        }
        Ok(slot)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("terminated", &self.is_terminated())
            .field("pending", &self.pending_rx.len())
            .field("loaded", &self.loaded_rx.len())
            .field("stats", &self.stats())
            .finish()
    }
}
