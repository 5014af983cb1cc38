//! `TileWorker`: a single-shot, cancellable unit of work resolving one
//! `RegionRequest` to a tile.
//!
//! Grounded on the teacher's generation-guarded `load_tile_for_prefetch` /
//! `load_tile_into_cache` pair (a cancellation flag checked both before and
//! after the blocking read) and on `bulk_preload.rs`'s `AtomicBool`
//! cancellation signal, generalised here into an explicit four-state
//! machine so a late cancellation can never let a stale result reach the
//! cache (the "cancellation isolation" property).

use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::log_timing_enabled;
use crate::error::{TileError, TileResult};
use crate::region::RegionRequest;
use crate::store::ImageRegionStore;

/// Lifecycle of a `TileWorker`. `Done` and `Cancelled` are terminal: once
/// reached, the worker never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Queued,
    Running,
    Done,
    Cancelled,
}

impl WorkerState {
    fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Done | WorkerState::Cancelled)
    }
}

/// Resolves one `RegionRequest`. Holds a `Weak` back-reference to the owning
/// store so that a worker never keeps the store alive on its own (`close()`
/// must be able to tear everything down even with workers still queued).
pub struct TileWorker<T: Clone + Send + Sync + 'static> {
    request: RegionRequest,
    state: Mutex<WorkerState>,
    condvar: Condvar,
    result: Mutex<Option<Arc<TileResult<Option<T>>>>>,
    store: Weak<ImageRegionStore<T>>,
}

impl<T: Clone + Send + Sync + 'static> TileWorker<T> {
    pub fn new(request: RegionRequest, store: Weak<ImageRegionStore<T>>) -> Arc<Self> {
        Arc::new(Self {
            request,
            state: Mutex::new(WorkerState::Queued),
            condvar: Condvar::new(),
            result: Mutex::new(None),
            store,
        })
    }

    /// Build a worker with no store back-reference, for unit tests that
    /// only exercise state transitions and never need `worker_complete` to
    /// fire.
    #[cfg(test)]
    pub fn new_for_test(request: RegionRequest) -> Self {
        Self {
            request,
            state: Mutex::new(WorkerState::Queued),
            condvar: Condvar::new(),
            result: Mutex::new(None),
            store: Weak::new(),
        }
    }

    pub fn request(&self) -> &RegionRequest {
        &self.request
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == WorkerState::Cancelled
    }

    /// Request cancellation. A no-op once the worker has reached a terminal
    /// state; otherwise wakes any blocked waiter immediately with
    /// `TileError::Cancelled`.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = WorkerState::Cancelled;
            self.condvar.notify_all();
        }
    }

    /// Run the backend read on the calling (executor-pool) thread.
    ///
    /// If cancellation arrives before the read starts, `read` is never
    /// invoked. If it arrives while the read is in flight, the read still
    /// runs to completion (the backend call itself is not interruptible)
    /// but its result is discarded: the worker stays `Cancelled` and the
    /// store's completion hook is still invoked so bookkeeping (e.g.
    /// removing the worker from the waiting map) happens, but the tile is
    /// never written to the cache.
    pub fn run(self: Arc<Self>, read: impl FnOnce() -> TileResult<Option<T>>) {
        {
            let mut state = self.state.lock();
            if *state == WorkerState::Cancelled {
                drop(state);
                self.finish_cancelled();
                return;
            }
            *state = WorkerState::Running;
        }

        let timed = log_timing_enabled();
        let started_at = timed.then(Instant::now);
        let outcome = read();
        if let Some(started_at) = started_at {
            log::debug!("read {:?} took {:?}", self.request, started_at.elapsed());
        }

        let mut state = self.state.lock();
        if *state == WorkerState::Cancelled {
            drop(state);
            self.finish_cancelled();
            return;
        }
        *state = WorkerState::Done;
        *self.result.lock() = Some(Arc::new(outcome));
        self.condvar.notify_all();
        drop(state);

        if let Some(store) = self.store.upgrade() {
            store.worker_complete(&self);
        }
    }

    fn finish_cancelled(self: Arc<Self>) {
        *self.result.lock() = Some(Arc::new(Err(TileError::Cancelled)));
        self.condvar.notify_all();
        if let Some(store) = self.store.upgrade() {
            store.worker_complete(&self);
        }
    }

    /// Block the calling thread until the worker reaches a terminal state,
    /// returning the outcome. This is the only blocking entry point in the
    /// crate (mirrored by the store's `get_thumbnail`).
    pub fn wait(&self) -> Arc<TileResult<Option<T>>> {
        let mut result = self.result.lock();
        self.condvar
            .wait_while(&mut result, |r| r.is_none() && !self.state().is_terminal());
        result
            .clone()
            .unwrap_or_else(|| Arc::new(Err(TileError::Cancelled)))
    }

    /// Non-blocking read of the stored result, if the worker has finished.
    pub fn result(&self) -> Option<Arc<TileResult<Option<T>>>> {
        self.result.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> RegionRequest {
        RegionRequest::new("slideA", 1.0, 0, 0, 256, 256, 0, 0)
    }

    #[test]
    fn fresh_worker_is_queued() {
        let worker = TileWorker::<u8>::new_for_test(req());
        assert_eq!(worker.state(), WorkerState::Queued);
    }

    #[test]
    fn cancel_before_run_prevents_read() {
        let worker = Arc::new(TileWorker::<u8>::new_for_test(req()));
        worker.cancel();
        let mut ran = false;
        worker.clone().run(|| {
            ran = true;
            Ok(Some(7u8))
        });
        assert!(!ran);
        assert_eq!(worker.state(), WorkerState::Cancelled);
    }

    #[test]
    fn successful_run_reaches_done_with_result() {
        let worker = Arc::new(TileWorker::<u8>::new_for_test(req()));
        worker.clone().run(|| Ok(Some(42)));
        assert_eq!(worker.state(), WorkerState::Done);
        match &*worker.wait() {
            Ok(Some(v)) => assert_eq!(*v, 42),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn cancel_after_completion_is_a_no_op() {
        let worker = Arc::new(TileWorker::<u8>::new_for_test(req()));
        worker.clone().run(|| Ok(Some(1)));
        worker.cancel();
        assert_eq!(worker.state(), WorkerState::Done);
    }

    #[test]
    fn cancellation_during_run_discards_the_result() {
        let worker = Arc::new(TileWorker::<u8>::new_for_test(req()));
        // Simulate a cancellation arriving while the read is "in flight" by
        // cancelling from inside the read closure itself.
        worker.clone().run(|| {
            worker.cancel();
            Ok(Some(99))
        });
        assert_eq!(worker.state(), WorkerState::Cancelled);
        assert!(matches!(*worker.wait(), Err(TileError::Cancelled)));
    }
}
