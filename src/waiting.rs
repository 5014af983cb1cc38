//! The "waiting map": tracks the single in-flight worker for each
//! outstanding `RegionRequest`, so concurrent callers asking for the same
//! tile share one backend read instead of issuing duplicates.
//!
//! Grounded on the teacher's `in_flight: Mutex<HashSet<TileCoord>>` dedup
//! guard, generalised from a presence set to a request-to-worker map so a
//! late caller can attach a completion callback to the worker already in
//! flight rather than merely being told "try again".

use std::sync::Arc;

use dashmap::DashMap;

use crate::region::RegionRequest;
use crate::worker::TileWorker;

/// Concurrent map from a pending `RegionRequest` to the worker resolving it.
///
/// At most one entry exists per `RegionRequest` at any instant: `register`
/// either inserts a fresh worker or returns the one already registered,
/// never both (this is the store's no-duplicate-work guarantee).
pub struct WaitingMap<T: Clone + Send + Sync + 'static> {
    pending: DashMap<RegionRequest, Arc<TileWorker<T>>>,
}

impl<T: Clone + Send + Sync + 'static> WaitingMap<T> {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Register interest in `request`. If a worker is already in flight for
    /// it, that worker is returned and `make_worker` is never invoked
    /// (`false` second element); otherwise `make_worker` is called to build
    /// a new worker, which is inserted and returned (`true`).
    pub fn register(
        &self,
        request: &RegionRequest,
        make_worker: impl FnOnce() -> Arc<TileWorker<T>>,
    ) -> (Arc<TileWorker<T>>, bool) {
        if let Some(existing) = self.pending.get(request) {
            return (existing.clone(), false);
        }

        match self.pending.entry(request.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => (entry.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let worker = make_worker();
                entry.insert(worker.clone());
                (worker, true)
            }
        }
    }

    /// Remove `request`'s entry, but only if it still points at `worker` —
    /// guards against a cancelled worker's completion callback clobbering a
    /// newer worker that has since replaced it in the map.
    pub fn remove_if_current(&self, request: &RegionRequest, worker: &Arc<TileWorker<T>>) {
        self.pending.remove_if(request, |_, current| Arc::ptr_eq(current, worker));
    }

    pub fn contains(&self, request: &RegionRequest) -> bool {
        self.pending.contains_key(request)
    }

    pub fn get(&self, request: &RegionRequest) -> Option<Arc<TileWorker<T>>> {
        self.pending.get(request).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Snapshot the requests currently pending, for listener/teardown use.
    pub fn pending_requests(&self) -> Vec<RegionRequest> {
        self.pending.iter().map(|e| e.key().clone()).collect()
    }

    /// Cancel and drop every pending worker. Used by `close()`.
    pub fn cancel_all(&self) {
        for entry in self.pending.iter() {
            entry.value().cancel();
        }
        self.pending.clear();
    }
}

impl<T: Clone + Send + Sync + 'static> Default for WaitingMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerState;

    fn req(n: i64) -> RegionRequest {
        RegionRequest::new("slideA", 1.0, n, 0, 1, 1, 0, 0)
    }

    #[test]
    fn first_registration_builds_a_worker() {
        let map: WaitingMap<u8> = WaitingMap::new();
        let r = req(0);
        let (_worker, created) = map.register(&r, || Arc::new(TileWorker::new_for_test(r.clone())));
        assert!(created);
        assert!(map.contains(&r));
    }

    #[test]
    fn second_registration_reuses_existing_worker() {
        let map: WaitingMap<u8> = WaitingMap::new();
        let r = req(0);
        let (first, _) = map.register(&r, || Arc::new(TileWorker::new_for_test(r.clone())));
        let (second, created) =
            map.register(&r, || Arc::new(TileWorker::new_for_test(r.clone())));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn remove_if_current_ignores_stale_worker() {
        let map: WaitingMap<u8> = WaitingMap::new();
        let r = req(0);
        let (first, _) = map.register(&r, || Arc::new(TileWorker::new_for_test(r.clone())));
        map.pending.remove(&r);
        let (second, _) = map.register(&r, || Arc::new(TileWorker::new_for_test(r.clone())));

        // `first` is stale now; removing "if current" with it must be a no-op.
        map.remove_if_current(&r, &first);
        assert!(map.contains(&r));
        assert!(Arc::ptr_eq(&map.get(&r).unwrap(), &second));
    }

    #[test]
    fn cancel_all_clears_map_and_cancels_workers() {
        let map: WaitingMap<u8> = WaitingMap::new();
        let r = req(0);
        let (worker, _) = map.register(&r, || Arc::new(TileWorker::new_for_test(r.clone())));
        map.cancel_all();
        assert!(map.is_empty());
        assert_eq!(worker.state(), WorkerState::Cancelled);
    }
}
