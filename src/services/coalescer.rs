//! Stroke coalescer — batches stroke segments into bounded bulk appends and
//! owns every write to a whiteboard's durable stroke log.
//!
//! DESIGN
//! ======
//! Each whiteboard with stroke activity has a buffer holding the pending
//! queue and a two-state flush phase:
//!
//! - `Idle`: no timer scheduled. The next `append` arms one.
//! - `Armed`: a timer will fire after `stroke_flush_delay`. Further appends
//!   only queue.
//!
//! When the timer fires the whole queue is drained under the lock and the
//! phase returns to `Idle` before the store write begins, so segments that
//! arrive during the write start a fresh cycle. The drained batch is kept
//! as `in_flight` until the write finishes.
//!
//! One store write per whiteboard runs at a time. Snapshot and clear empty
//! the log through `begin_reset`/`run_reset`: the reservation is taken
//! synchronously, drops everything buffered, and holds back later bulk
//! appends until the reset lands. A timer that fires while the slot is
//! taken re-arms itself instead of writing, so writes land in event order.
//!
//! Joins read the durable log between `mark` and `recover`. Every finished
//! write and every reset bumps the buffer version, so a read that raced a
//! write is reported stale and retried.
//!
//! Settled buffers stay in the map until the persistence sweep evicts them
//! for whiteboards nobody is connected to.
//!
//! ERROR HANDLING
//! ==============
//! A failed bulk append is logged and the batch is dropped. The stroke log
//! is a recency-bounded convenience for recovery; the snapshot image is the
//! record of the artwork. A failed reset is returned to the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::state::Stroke;
use crate::store::{StoreError, WhiteboardStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushPhase {
    #[default]
    Idle,
    Armed,
}

/// Durable write that empties the stroke log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogReset {
    Snapshot { image: String, at_ms: i64 },
    Clear,
}

/// A reset reserved by `begin_reset`, to be run with `run_reset`.
#[derive(Debug)]
#[must_use]
pub struct PendingReset {
    pub whiteboard_id: Uuid,
    /// Buffered strokes dropped by the reset.
    pub dropped: usize,
    ticket: u64,
}

/// Stroke-log version observed before a durable read. See `recover`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogMark(u64);

/// Recent strokes for a joining client.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovery {
    pub strokes: Vec<Stroke>,
    /// The log changed while the durable read was in progress; the read
    /// should be repeated. `strokes` still holds the best available answer.
    pub stale: bool,
}

#[derive(Debug, Default)]
struct StrokeBuffer {
    pending: Vec<Stroke>,
    in_flight: Vec<Stroke>,
    phase: FlushPhase,
    /// A store write (bulk append or reset) is running.
    writing: bool,
    resets_issued: u64,
    resets_done: u64,
    /// Bumped whenever the durable log or the in-flight batch changes.
    version: u64,
}

impl StrokeBuffer {
    fn reset_outstanding(&self) -> bool {
        self.resets_done < self.resets_issued
    }

    fn is_settled(&self) -> bool {
        self.pending.is_empty()
            && self.in_flight.is_empty()
            && self.phase == FlushPhase::Idle
            && !self.writing
            && !self.reset_outstanding()
    }
}

enum Drain {
    /// Nothing buffered for this whiteboard.
    Empty,
    /// Another write for this whiteboard is running or queued.
    Busy,
    Batch(Vec<Stroke>),
}

#[derive(Clone)]
pub struct StrokeCoalescer {
    buffers: Arc<Mutex<HashMap<Uuid, StrokeBuffer>>>,
    /// Source of buffer versions. Global so a rebuilt buffer never repeats one.
    versions: Arc<AtomicU64>,
    /// Ticks after every store write finishes.
    write_done: Arc<watch::Sender<u64>>,
    store: Arc<dyn WhiteboardStore>,
    config: SyncConfig,
}

impl StrokeCoalescer {
    #[must_use]
    pub fn new(store: Arc<dyn WhiteboardStore>, config: SyncConfig) -> Self {
        let (write_done, _rx) = watch::channel(0);
        Self {
            buffers: Arc::new(Mutex::new(HashMap::new())),
            versions: Arc::new(AtomicU64::new(0)),
            write_done: Arc::new(write_done),
            store,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, StrokeBuffer>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Queue a stroke for the next bulk append. Arms the flush timer if none
    /// is armed for this whiteboard. Must be called inside a tokio runtime.
    pub fn append(&self, whiteboard_id: Uuid, stroke: Stroke) {
        let arm = {
            let mut buffers = self.lock();
            let buffer = buffers.entry(whiteboard_id).or_default();
            buffer.pending.push(stroke);
            if buffer.phase == FlushPhase::Idle {
                buffer.phase = FlushPhase::Armed;
                true
            } else {
                false
            }
        };

        if arm {
            self.schedule(whiteboard_id);
        }
    }

    fn schedule(&self, whiteboard_id: Uuid) {
        let coalescer = self.clone();
        let delay = self.config.stroke_flush_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            coalescer.flush(whiteboard_id).await;
        });
    }

    /// Timer callback. Drains and writes the queue, or re-arms if another
    /// write for the whiteboard is running or queued. Returns the number of
    /// strokes written.
    pub async fn flush(&self, whiteboard_id: Uuid) -> usize {
        match self.drain(whiteboard_id) {
            Drain::Empty => 0,
            Drain::Busy => {
                self.schedule(whiteboard_id);
                0
            }
            Drain::Batch(batch) => self.write_batch(whiteboard_id, batch).await,
        }
    }

    /// Drain every buffered whiteboard now, waiting out running writes.
    /// Used on shutdown. Returns the number of strokes written.
    pub async fn flush_all(&self) -> usize {
        let ids: Vec<Uuid> = self.lock().keys().copied().collect();
        let mut written = 0;
        for whiteboard_id in ids {
            loop {
                match self.drain(whiteboard_id) {
                    Drain::Empty => break,
                    Drain::Busy => tokio::time::sleep(self.config.stroke_flush_delay).await,
                    Drain::Batch(batch) => written += self.write_batch(whiteboard_id, batch).await,
                }
            }
        }
        written
    }

    fn drain(&self, whiteboard_id: Uuid) -> Drain {
        let mut buffers = self.lock();
        let Some(buffer) = buffers.get_mut(&whiteboard_id) else {
            return Drain::Empty;
        };
        if buffer.writing || buffer.reset_outstanding() {
            return Drain::Busy;
        }

        buffer.phase = FlushPhase::Idle;
        if buffer.pending.is_empty() {
            return Drain::Empty;
        }

        let batch = std::mem::take(&mut buffer.pending);
        buffer.in_flight.clone_from(&batch);
        buffer.writing = true;
        Drain::Batch(batch)
    }

    async fn write_batch(&self, whiteboard_id: Uuid, batch: Vec<Stroke>) -> usize {
        let result = self
            .store
            .append_strokes_bounded(whiteboard_id, &batch, self.config.max_recent_strokes)
            .await;

        self.finish_write(whiteboard_id, |buffer| buffer.in_flight.clear());

        match result {
            Ok(()) => {
                debug!(%whiteboard_id, count = batch.len(), "coalescer: flushed strokes");
                batch.len()
            }
            Err(e) => {
                error!(error = %e, %whiteboard_id, count = batch.len(), "coalescer: bulk stroke append failed; dropping batch");
                0
            }
        }
    }

    fn finish_write(&self, whiteboard_id: Uuid, update: impl FnOnce(&mut StrokeBuffer)) {
        let version = self.next_version();
        if let Some(buffer) = self.lock().get_mut(&whiteboard_id) {
            update(buffer);
            buffer.writing = false;
            buffer.version = version;
        }
        self.write_done.send_modify(|n| *n = n.wrapping_add(1));
    }

    // =========================================================================
    // RESET
    // =========================================================================

    /// Reserve a stroke-log reset for a snapshot or clear. Drops everything
    /// buffered, including a batch already being written, and blocks new
    /// bulk appends until the reset has run. Resets run in reservation order.
    pub fn begin_reset(&self, whiteboard_id: Uuid) -> PendingReset {
        let version = self.next_version();
        let mut buffers = self.lock();
        let buffer = buffers.entry(whiteboard_id).or_default();
        let dropped = buffer.pending.len() + buffer.in_flight.len();
        buffer.pending.clear();
        buffer.in_flight.clear();
        buffer.resets_issued += 1;
        buffer.version = version;
        PendingReset { whiteboard_id, dropped, ticket: buffer.resets_issued }
    }

    /// Wait for the whiteboard's write slot, then empty the durable stroke
    /// log. Strokes queued meanwhile are flushed after the reset lands.
    ///
    /// # Errors
    ///
    /// Returns the store error if the write fails. The reservation is
    /// released either way.
    pub async fn run_reset(&self, reset: PendingReset, kind: LogReset) -> Result<(), StoreError> {
        let whiteboard_id = reset.whiteboard_id;
        self.claim_reset_slot(whiteboard_id, reset.ticket).await;

        let result = match &kind {
            LogReset::Snapshot { image, at_ms } => self.store.replace_snapshot(whiteboard_id, image, *at_ms).await,
            LogReset::Clear => self.store.clear_strokes_and_snapshot(whiteboard_id).await,
        };

        self.finish_write(whiteboard_id, |buffer| buffer.resets_done += 1);
        result
    }

    async fn claim_reset_slot(&self, whiteboard_id: Uuid, ticket: u64) {
        // Subscribe before checking so a release in between is not missed.
        let mut released = self.write_done.subscribe();
        loop {
            {
                let mut buffers = self.lock();
                let buffer = buffers.entry(whiteboard_id).or_default();
                if !buffer.writing && buffer.resets_done + 1 == ticket {
                    buffer.writing = true;
                    return;
                }
            }
            if released.changed().await.is_err() {
                return;
            }
        }
    }

    // =========================================================================
    // RECOVERY
    // =========================================================================

    /// Take before reading the durable stroke log for a join.
    #[must_use]
    pub fn mark(&self, whiteboard_id: Uuid) -> LogMark {
        LogMark(self.lock().get(&whiteboard_id).map_or(0, |b| b.version))
    }

    /// Combine a durable stroke log read after `mark` with what is still
    /// buffered, oldest first and trimmed to `max_recent_strokes`.
    ///
    /// A batch that committed while still marked in flight is counted once.
    /// While a reset is outstanding the durable strokes are superseded and
    /// only post-reset strokes are returned.
    #[must_use]
    pub fn recover(&self, whiteboard_id: Uuid, mark: LogMark, durable: Vec<Stroke>) -> Recovery {
        let buffers = self.lock();
        let Some(buffer) = buffers.get(&whiteboard_id) else {
            return Recovery { stale: mark.0 != 0, strokes: trim_front(durable, self.config.max_recent_strokes) };
        };

        let stale = buffer.version != mark.0;
        let mut strokes = if buffer.reset_outstanding() { Vec::new() } else { durable };
        if !ends_with_batch(&strokes, &buffer.in_flight) {
            strokes.extend(buffer.in_flight.iter().cloned());
        }
        strokes.extend(buffer.pending.iter().cloned());

        Recovery { strokes: trim_front(strokes, self.config.max_recent_strokes), stale }
    }

    /// Drop settled buffers for which `keep` returns false. Returns how many
    /// were removed.
    pub fn evict_settled(&self, keep: impl Fn(Uuid) -> bool) -> usize {
        let mut buffers = self.lock();
        let before = buffers.len();
        buffers.retain(|id, b| !b.is_settled() || keep(*id));
        before - buffers.len()
    }

    /// Strokes not yet durable: the in-flight batch followed by the queue.
    #[cfg(test)]
    #[must_use]
    pub fn pending_strokes(&self, whiteboard_id: Uuid) -> Vec<Stroke> {
        self.lock()
            .get(&whiteboard_id)
            .map(|b| b.in_flight.iter().chain(b.pending.iter()).cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    #[must_use]
    pub fn phase(&self, whiteboard_id: Uuid) -> FlushPhase {
        self.lock()
            .get(&whiteboard_id)
            .map_or(FlushPhase::Idle, |b| b.phase)
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_settled(&self, whiteboard_id: Uuid) -> bool {
        self.lock().get(&whiteboard_id).is_none_or(StrokeBuffer::is_settled)
    }

    /// Number of whiteboards with a buffer entry.
    #[cfg(test)]
    #[must_use]
    pub fn buffered_boards(&self) -> usize {
        self.lock().len()
    }
}

/// Whether `log` already holds `batch` as its newest entries. The bound may
/// have trimmed the front of a large batch.
fn ends_with_batch(log: &[Stroke], batch: &[Stroke]) -> bool {
    let n = batch.len().min(log.len());
    n > 0 && log[log.len() - n..] == batch[batch.len() - n..]
}

fn trim_front(mut strokes: Vec<Stroke>, max: usize) -> Vec<Stroke> {
    if strokes.len() > max {
        strokes.drain(..strokes.len() - max);
    }
    strokes
}

#[cfg(test)]
#[path = "coalescer_test.rs"]
mod tests;
