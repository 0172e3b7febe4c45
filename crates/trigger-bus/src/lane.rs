//! Per-mapping coalescing lanes
//!
//! Every mapping id owns one lane: a worker thread that runs that mapping's
//! callback invocations strictly one at a time. Submission never blocks the
//! dispatcher. A lane holds at most one live pending unit:
//!
//! - submitting a payload equal to the pending one does nothing
//! - submitting a different payload cancels the pending unit and queues the
//!   new one, so the callback only ever sees the latest value
//!
//! Cancellation is cooperative. A unit checks its flag right before invoking
//! the callback; a callback that has already started runs to completion.

use crate::mapping::TriggerCallback;
use crate::types::Payload;
use flume::{Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use uuid::Uuid;

/// Outcome of [`Lane::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Submission {
    /// A new execution unit was queued
    Queued,
    /// An identical payload is already pending
    Coalesced,
    /// The worker is gone; nothing will run
    Dropped,
}

/// The unit currently waiting to run
struct PendingUnit {
    payload: Payload,
    cancelled: Arc<AtomicBool>,
}

struct ExecutionUnit {
    payload: Payload,
    callback: TriggerCallback,
    cancelled: Arc<AtomicBool>,
}

type PendingSlot = Arc<Mutex<Option<PendingUnit>>>;

fn lock(slot: &PendingSlot) -> MutexGuard<'_, Option<PendingUnit>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-concurrency execution lane for one mapping id
pub(crate) struct Lane {
    id: Uuid,
    pending: PendingSlot,
    unit_tx: Sender<ExecutionUnit>,
    _thread: JoinHandle<()>,
}

impl Lane {
    /// Spawn the lane's worker thread
    pub fn spawn(id: Uuid) -> std::io::Result<Self> {
        let (unit_tx, unit_rx) = flume::unbounded::<ExecutionUnit>();
        let pending: PendingSlot = Arc::new(Mutex::new(None));

        let worker_pending = Arc::clone(&pending);
        let thread = std::thread::Builder::new()
            .name(format!("trigger-lane-{}", id.simple()))
            .spawn(move || Self::run(id, worker_pending, unit_rx))?;

        log::debug!("[LANE] Started lane for mapping {}", id);

        Ok(Self {
            id,
            pending,
            unit_tx,
            _thread: thread,
        })
    }

    /// Submit a payload for the callback
    pub fn submit(&self, payload: Payload, callback: TriggerCallback) -> Submission {
        let mut pending = lock(&self.pending);

        if let Some(current) = pending.as_ref() {
            if current.payload == payload {
                log::trace!("[LANE] {} coalesced {:?}", self.id, payload);
                return Submission::Coalesced;
            }
            current.cancelled.store(true, Ordering::Release);
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let unit = ExecutionUnit {
            payload: payload.clone(),
            callback,
            cancelled: Arc::clone(&cancelled),
        };

        // Queue while holding the slot so slot and queue order agree
        if self.unit_tx.send(unit).is_err() {
            *pending = None;
            log::warn!("[LANE] {} worker has stopped, dropping {:?}", self.id, payload);
            return Submission::Dropped;
        }
        *pending = Some(PendingUnit { payload, cancelled });
        Submission::Queued
    }

    /// Cancel the pending unit, if any
    ///
    /// Returns false when nothing was pending. A unit that is no longer
    /// pending has already started and runs to completion.
    pub fn cancel(&self) -> bool {
        let mut pending = lock(&self.pending);
        match pending.take() {
            Some(current) => {
                current.cancelled.store(true, Ordering::Release);
                log::trace!("[LANE] {} cancelled pending {:?}", self.id, current.payload);
                true
            }
            None => false,
        }
    }

    /// Whether a unit is queued and not yet started
    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }

    fn run(id: Uuid, pending: PendingSlot, rx: Receiver<ExecutionUnit>) {
        while let Ok(unit) = rx.recv() {
            // Leaving the slot and checking the flag happen under one lock,
            // so a cancel either lands first or after the unit has started
            let cancelled = {
                let mut slot = lock(&pending);
                // Back to idle, unless a newer unit already took the slot
                if slot
                    .as_ref()
                    .is_some_and(|p| Arc::ptr_eq(&p.cancelled, &unit.cancelled))
                {
                    *slot = None;
                }
                unit.cancelled.load(Ordering::Acquire)
            };

            if cancelled {
                log::trace!("[LANE] {} skipped superseded {:?}", id, unit.payload);
                continue;
            }

            let callback = unit.callback;
            let payload = unit.payload;
            if panic::catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                log::error!("[LANE] Callback for mapping {} panicked", id);
            }
        }
        log::debug!("[LANE] Lane for mapping {} closed", id);
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        // Queued units see the flag; the worker exits once the channel drains
        let _ = self.cancel();
    }
}
