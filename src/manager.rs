//! `TileRequestManager`: priority scheduler over active
//! `TileRequestCollection`s, keeping up to `n_threads` prefetch workers busy.
//!
//! Grounded on the teacher's budget-and-slot accounting style (a guarded
//! count of in-flight work compared against a configured ceiling before
//! admitting more), generalised here to a priority queue of collections
//! instead of a flat request queue.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::collection::TileRequestCollection;
use crate::region::RegionRequest;
use crate::server::{ClipShape, ImageServer, TileGeometry, TileListener};
use crate::store::ImageRegionStore;

struct ManagerState<T: Send + Sync + 'static> {
    collections: Vec<TileRequestCollection<T>>,
    busy_threads: usize,
    requested: HashSet<RegionRequest>,
}

/// Orders collections by `zSeparation` ascending, then `timestamp`
/// ascending: closer-to-focal-plane first, older registrations first within
/// the same Z band. Index 0 is always the highest-priority collection.
fn sort_by_priority<T: Send + Sync + 'static>(collections: &mut [TileRequestCollection<T>]) {
    collections.sort_by(|a, b| {
        a.z_separation()
            .cmp(&b.z_separation())
            .then_with(|| a.timestamp().cmp(&b.timestamp()))
    });
}

pub struct TileRequestManager<T: Clone + Send + Sync + 'static> {
    state: Mutex<ManagerState<T>>,
    n_threads: usize,
    max_z_separation: u32,
    geometry: Arc<dyn TileGeometry<T>>,
    store: Weak<ImageRegionStore<T>>,
}

impl<T: Clone + Send + Sync + 'static> TileRequestManager<T> {
    pub fn new(
        n_threads: usize,
        max_z_separation: u32,
        geometry: Arc<dyn TileGeometry<T>>,
        store: Weak<ImageRegionStore<T>>,
    ) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                collections: Vec::new(),
                busy_threads: 0,
                requested: HashSet::new(),
            }),
            n_threads,
            max_z_separation,
            geometry,
            store,
        }
    }

    pub fn busy_threads(&self) -> usize {
        self.state.lock().busy_threads
    }

    pub fn n_collections(&self) -> usize {
        self.state.lock().collections.len()
    }

    /// Register (or replace) a listener's visible-area prefetch request.
    /// A bit-identical registration (same listener, clip, z, t) is a no-op.
    pub fn register_request(
        &self,
        listener: Arc<dyn TileListener<T>>,
        server: Arc<dyn ImageServer<T>>,
        clip: ClipShape,
        downsample: f64,
        z: i32,
        t: u32,
    ) {
        {
            let mut state = self.state.lock();
            if state
                .collections
                .iter()
                .any(|c| c.is_identical_registration(&listener, clip, z, t))
            {
                return;
            }
            state.collections.retain(|c| !c.is_from_listener(&listener));
            let collection = TileRequestCollection::new(
                listener,
                server,
                self.geometry.clone(),
                clip,
                downsample,
                z,
                t,
                self.max_z_separation,
            );
            state.collections.push(collection);
            sort_by_priority(&mut state.collections);
        }
        self.assign_tasks();
    }

    /// Drop every collection belonging to `listener` (used when a listener
    /// is removed from the store).
    pub fn remove_listener(&self, listener: &Arc<dyn TileListener<T>>) {
        let mut state = self.state.lock();
        state.collections.retain(|c| !c.is_from_listener(listener));
    }

    /// Fill idle slots up to `n_threads`, preferring the highest-priority
    /// collection each time. A request already cached or already in flight
    /// is skipped without charging a slot (someone else's work, or none
    /// needed). Re-sorts once at the end since a collection's `zSeparation`
    /// may have grown during enumeration.
    pub fn assign_tasks(&self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };

        let mut state = self.state.lock();
        loop {
            if state.busy_threads >= self.n_threads {
                break;
            }

            sort_by_priority(&mut state.collections);
            while matches!(state.collections.first(), Some(c) if c.is_exhausted()) {
                state.collections.remove(0);
            }

            let Some(collection) = state.collections.first_mut() else {
                break;
            };

            let Some(request) = collection.next_request() else {
                state.collections.remove(0);
                continue;
            };

            if store.cache_contains(&request) || store.waiting_contains(&request) {
                continue;
            }

            let server = collection.server().clone();
            state.requested.insert(request.clone());
            state.busy_threads += 1;

            let created = store.request_image_tile(&server, &request).map(|(_, created)| created).unwrap_or(false);
            if !created {
                state.busy_threads -= 1;
                state.requested.remove(&request);
            }
        }

        sort_by_priority(&mut state.collections);
    }

    /// Invoked by `ImageRegionStore::worker_complete` for every finished
    /// worker; only workers the manager itself dispatched affect the busy
    /// count (direct `getThumbnail`/cache-fill callers do not).
    pub fn task_completed(&self, request: &RegionRequest) {
        let was_ours = {
            let mut state = self.state.lock();
            let was_ours = state.requested.remove(request);
            if was_ours {
                state.busy_threads = state.busy_threads.saturating_sub(1);
            }
            was_ours
        };
        if was_ours {
            self.assign_tasks();
        }
    }
}
