//! `ImageRegionStore`: the single external-facing façade combining the
//! cache, waiting map, executor pools, request manager and listener
//! registry into one coherent object.
//!
//! Grounded on the teacher's `TileScheduler` as the top-level façade shape:
//! one object owning every shared structure, with a single
//! `parking_lot::Mutex` serialising the multi-structure mutations (clear,
//! server-clear, overlap-clear, dispatch) the way the teacher serialises
//! its own cache/queue interactions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::cache::{CacheStats, SizeEstimator, TileCache};
use crate::config::StoreConfig;
use crate::executor::{PoolKind, TileExecutor};
use crate::grid::TileGrid;
use crate::listener::ListenerRegistry;
use crate::manager::TileRequestManager;
use crate::region::RegionRequest;
use crate::server::{ClipShape, ImageServer, TileGeometry, TileListener};
use crate::thumbnail::thumbnail_request;
use crate::waiting::WaitingMap;
use crate::worker::TileWorker;

/// Shared, memory-bounded store of rendered tiles for one viewer.
///
/// Always held behind an `Arc` (construction returns one directly) since
/// workers and the request manager hold `Weak` back-references into it.
pub struct ImageRegionStore<T: Clone + Send + Sync + 'static> {
    cache: Arc<TileCache<T>>,
    waiting: Arc<WaitingMap<T>>,
    executor: Arc<TileExecutor>,
    manager: TileRequestManager<T>,
    listeners: ListenerRegistry<T>,
    facade: Mutex<()>,
    config: StoreConfig,
    closed: AtomicBool,
}

impl<T: Clone + Send + Sync + 'static> ImageRegionStore<T> {
    /// Build a store with the default tile-geometry enumerator
    /// (`grid::TileGrid`, a uniform grid derived from each server's
    /// `tile_size`).
    pub fn new(config: StoreConfig, weigher: SizeEstimator<T>) -> Arc<Self> {
        Self::with_geometry(config, weigher, Arc::new(TileGrid))
    }

    /// Build a store with a caller-supplied tile-geometry enumerator, for
    /// backends with a non-uniform tiling scheme.
    pub fn with_geometry(
        config: StoreConfig,
        weigher: SizeEstimator<T>,
        geometry: Arc<dyn TileGeometry<T>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| {
            let cache = Arc::new(TileCache::new(config.cache_size_bytes, weigher));
            let waiting = Arc::new(WaitingMap::new());
            let executor = Arc::new(TileExecutor::new());
            let manager = TileRequestManager::new(
                config.n_threads,
                config.max_z_separation,
                geometry,
                weak_self.clone(),
            );
            Self {
                cache,
                waiting,
                executor,
                manager,
                listeners: ListenerRegistry::new(),
                facade: Mutex::new(()),
                config,
                closed: AtomicBool::new(false),
            }
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether a non-cancelled worker is currently in flight for `request`.
    /// Diagnostic surface for tests and instrumentation, not used by the
    /// store's own dispatch logic (which reads the waiting map directly).
    pub fn is_pending(&self, request: &RegionRequest) -> bool {
        self.waiting.contains(request)
    }

    /// Number of prefetch workers the request manager currently has in
    /// flight, bounded by `config().n_threads`.
    pub fn prefetch_busy_threads(&self) -> usize {
        self.manager.busy_threads()
    }

    /// Number of live prefetch collections (one per registered listener
    /// with an outstanding visible-area request).
    pub fn prefetch_collection_count(&self) -> usize {
        self.manager.n_collections()
    }

    // ---- §4.1 Store Façade ----------------------------------------------

    /// Non-blocking cache lookup. Never schedules work.
    pub fn get_cached_tile(&self, request: &RegionRequest) -> Option<T> {
        self.cache.get(request)
    }

    /// Non-blocking cache lookup for the server's thumbnail request.
    pub fn get_cached_thumbnail(&self, server: &dyn ImageServer<T>, z: i32, t: u32) -> Option<T> {
        let request = self.thumbnail_request_for(server, z, t);
        self.cache.get(&request)
    }

    /// Blocking: returns the server's thumbnail, waiting for the backend
    /// read if not already cached. On worker failure, falls back to a
    /// direct synchronous read (§7 "the only user-surfaced failure").
    pub fn get_thumbnail(
        self: &Arc<Self>,
        server: &Arc<dyn ImageServer<T>>,
        z: i32,
        t: u32,
    ) -> Option<T> {
        let request = self.thumbnail_request_for(server.as_ref(), z, t);

        if let Some(tile) = self.cache.get(&request) {
            return Some(tile);
        }

        let worker_outcome = self
            .request_image_tile(server, &request)
            .map(|(worker, _created)| worker.wait());

        match worker_outcome {
            Some(outcome) => match outcome.as_ref() {
                Ok(Some(tile)) => Some(tile.clone()),
                Ok(None) => None,
                Err(err) => {
                    log::warn!(
                        "getThumbnail worker failed for {} ({err}); falling back to direct read",
                        server.path()
                    );
                    self.direct_read_fallback(server, &request)
                }
            },
            None => {
                if let Some(tile) = self.cache.get(&request) {
                    return Some(tile);
                }
                log::warn!(
                    "getThumbnail could not schedule a worker for {}; falling back to direct read",
                    server.path()
                );
                self.direct_read_fallback(server, &request)
            }
        }
    }

    fn direct_read_fallback(&self, server: &Arc<dyn ImageServer<T>>, request: &RegionRequest) -> Option<T> {
        match server.read_region(request) {
            Ok(Some(tile)) => {
                self.cache.insert(request.clone(), tile.clone());
                self.listeners.notify(server.path(), request, &tile);
                Some(tile)
            }
            Ok(None) => None,
            Err(err) => {
                log::error!("direct thumbnail read failed for {}: {err}", server.path());
                None
            }
        }
    }

    fn thumbnail_request_for(&self, server: &dyn ImageServer<T>, z: i32, t: u32) -> RegionRequest {
        thumbnail_request(
            server,
            z,
            t,
            self.config.max_thumbnail_size,
            self.config.min_thumbnail_size,
        )
    }

    /// Enqueue (or replace) a listener's visible-area prefetch request.
    pub fn register_request(
        self: &Arc<Self>,
        listener: Arc<dyn TileListener<T>>,
        server: Arc<dyn ImageServer<T>>,
        clip: ClipShape,
        downsample: f64,
        z: i32,
        t: u32,
    ) {
        let _guard = self.facade.lock();
        self.manager.register_request(listener, server, clip, downsample, z, t);
    }

    pub fn add_tile_listener(&self, listener: Arc<dyn TileListener<T>>) {
        self.listeners.add(listener);
    }

    pub fn remove_tile_listener(&self, listener: &Arc<dyn TileListener<T>>) {
        self.listeners.remove(listener);
        self.manager.remove_listener(listener);
    }

    /// Cancel all active workers (if `stop_waiting`), empty the waiting map
    /// and clear the cache.
    pub fn clear_cache(&self, stop_waiting: bool) {
        let _guard = self.facade.lock();
        if stop_waiting {
            self.waiting.cancel_all();
        }
        self.cache.clear();
    }

    /// Remove every cache entry and cancel every waiting worker whose
    /// `server_path` matches `server_path`.
    pub fn clear_cache_for_server(&self, server_path: &str) {
        let _guard = self.facade.lock();
        self.cancel_waiting_matching(|r| r.server_path.as_ref() == server_path);
        self.cache.remove_matching(|r| r.server_path.as_ref() == server_path);
    }

    /// Remove cache entries and cancel workers whose `RegionRequest`
    /// overlaps `request` (§3 `overlapsRequest`).
    pub fn clear_cache_for_request_overlap(&self, request: &RegionRequest) {
        let _guard = self.facade.lock();
        self.cancel_waiting_matching(|r| r.overlaps_request(request));
        self.cache.remove_matching(|r| r.overlaps_request(request));
    }

    fn cancel_waiting_matching(&self, predicate: impl Fn(&RegionRequest) -> bool) {
        for pending in self.waiting.pending_requests() {
            if predicate(&pending) {
                if let Some(worker) = self.waiting.get(&pending) {
                    worker.cancel();
                    self.waiting.remove_if_current(&pending, &worker);
                }
            }
        }
    }

    /// Cancel every worker, shut down both pools and clear the cache. No
    /// operation is valid afterward. Idempotent.
    pub fn close(&self) {
        let _guard = self.facade.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.waiting.cancel_all();
        self.executor.shutdown();
        self.cache.clear();
    }

    // ---- §4.2 internal dispatch ------------------------------------------

    pub(crate) fn cache_contains(&self, request: &RegionRequest) -> bool {
        self.cache.contains(request)
    }

    pub(crate) fn waiting_contains(&self, request: &RegionRequest) -> bool {
        self.waiting.contains(request)
    }

    /// `requestImageTile`: the single gateway that preserves invariant I2
    /// (at most one non-cancelled worker per `RegionRequest`). Returns
    /// `None` when there is nothing to schedule — already cached, a
    /// known-empty region, or the relevant pool has been shut down.
    /// Otherwise returns the worker handling `request` and whether this
    /// call created it (`false` means an in-flight worker was reused).
    pub(crate) fn request_image_tile(
        self: &Arc<Self>,
        server: &Arc<dyn ImageServer<T>>,
        request: &RegionRequest,
    ) -> Option<(Arc<TileWorker<T>>, bool)> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        if self.cache.contains(request) {
            return None;
        }
        if server.is_empty_region(request) {
            return None;
        }

        let store_weak: Weak<Self> = Arc::downgrade(self);
        let req_for_worker = request.clone();
        let (worker, created) = self
            .waiting
            .register(request, || TileWorker::new(req_for_worker, store_weak));

        if created {
            let pool = if server.is_generating() {
                PoolKind::Local
            } else {
                PoolKind::Remote
            };
            let worker_for_pool = worker.clone();
            let server_for_pool = server.clone();
            let req_for_pool = request.clone();
            let submitted = self.executor.submit(pool, move || {
                worker_for_pool.run(|| server_for_pool.read_region(&req_for_pool));
            });
            if submitted.is_err() {
                log::debug!("pool shut down while dispatching {request:?}");
                self.waiting.remove_if_current(request, &worker);
                worker.cancel();
                return None;
            }
        }

        Some((worker, created))
    }

    /// `workerComplete` (§4.3): invoked by a `TileWorker` once it reaches a
    /// terminal state, from whichever pool thread ran it.
    pub(crate) fn worker_complete(self: &Arc<Self>, worker: &Arc<TileWorker<T>>) {
        let request = worker.request().clone();
        self.manager.task_completed(&request);

        let _guard = self.facade.lock();

        if worker.is_cancelled() {
            self.waiting.remove_if_current(&request, worker);
            return;
        }

        let still_current = self
            .waiting
            .get(&request)
            .is_some_and(|current| Arc::ptr_eq(&current, worker));
        if !still_current {
            return;
        }
        self.waiting.remove_if_current(&request, worker);

        if let Some(outcome) = worker.result() {
            match outcome.as_ref() {
                Ok(Some(tile)) => {
                    self.cache.insert(request.clone(), tile.clone());
                    self.listeners.notify(&request.server_path, &request, tile);
                }
                Ok(None) => {}
                Err(err) => {
                    log::debug!("tile worker failed for {request:?}: {err}");
                }
            }
        }
    }
}
