//! `TileRequestCollection`: the prioritized set of tile requests covering
//! one visible-area prefetch registration.
//!
//! The per-level enumeration loop is grounded on the teacher's
//! `prefetch_tiles` level-ordering walk (coarsest-to-finest, stopping once
//! the requested downsample is reached); the Z-expansion step is new but
//! follows the same "append, don't replace" idiom.

use std::sync::Arc;
use std::time::Instant;

use crate::region::RegionRequest;
use crate::server::{ClipShape, ImageServer, TileGeometry, TileListener};

/// One listener's outstanding prefetch request against one server/clip.
///
/// `pendingRequests` is a stack popped from the back. Levels are enumerated
/// coarsest-first and appended in that order, so the finest level — appended
/// last — is the first to be popped. This is the observed behaviour
/// preserved per the open question on enumeration order (see DESIGN.md):
/// the collection does not "fix" this into a coarse-first drain.
pub struct TileRequestCollection<T> {
    listener: Arc<dyn TileListener<T>>,
    server: Arc<dyn ImageServer<T>>,
    geometry: Arc<dyn TileGeometry<T>>,
    clip: ClipShape,
    downsample: f64,
    z: i32,
    t: u32,
    timestamp: Instant,
    z_separation: u32,
    max_z_separation: u32,
    pending: Vec<RegionRequest>,
}

impl<T> TileRequestCollection<T> {
    pub fn new(
        listener: Arc<dyn TileListener<T>>,
        server: Arc<dyn ImageServer<T>>,
        geometry: Arc<dyn TileGeometry<T>>,
        clip: ClipShape,
        downsample: f64,
        z: i32,
        t: u32,
        max_z_separation: u32,
    ) -> Self {
        let max_z_separation = server.n_z_slices().saturating_sub(1).min(max_z_separation);
        let mut collection = Self {
            listener,
            server,
            geometry,
            clip,
            downsample,
            z,
            t,
            timestamp: Instant::now(),
            z_separation: 0,
            max_z_separation,
            pending: Vec::new(),
        };
        collection.fill_current_z();
        collection
    }

    pub fn listener(&self) -> &Arc<dyn TileListener<T>> {
        &self.listener
    }

    pub fn server(&self) -> &Arc<dyn ImageServer<T>> {
        &self.server
    }

    pub fn z_separation(&self) -> u32 {
        self.z_separation
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether this collection is from the same listener and addresses an
    /// identical clip/z/t — the no-op case in `registerRequest` (§4.6).
    pub fn is_identical_registration(
        &self,
        listener: &Arc<dyn TileListener<T>>,
        clip: ClipShape,
        z: i32,
        t: u32,
    ) -> bool {
        Arc::ptr_eq(&self.listener, listener) && self.clip == clip && self.z == z && self.t == t
    }

    pub fn is_from_listener(&self, listener: &Arc<dyn TileListener<T>>) -> bool {
        Arc::ptr_eq(&self.listener, listener)
    }

    fn fill_current_z(&mut self) {
        let mut levels: Vec<f64> = self
            .server
            .preferred_downsamples()
            .into_iter()
            .filter(|d| d.is_finite() && *d > 0.0)
            .collect();
        levels.sort_by(|a, b| b.partial_cmp(a).expect("downsamples are finite"));

        let mut pending = Vec::new();
        for level in levels {
            pending = self.geometry.tiles_covering(
                self.server.as_ref(),
                self.clip,
                level,
                self.z,
                self.t,
                pending,
            );
            if level <= self.downsample {
                break;
            }
        }
        self.pending = pending;
    }

    /// Grow into neighbouring Z-slices at a degraded downsample once the
    /// current plane's pending list is empty. Each call moves `zSeparation`
    /// out by one and enumerates both `z - zSeparation` and `z + zSeparation`
    /// (where in range) at a single coarse level — neighbouring planes are
    /// never enumerated down to the finest level.
    fn expand_z(&mut self) {
        if self.z_separation >= self.max_z_separation {
            return;
        }
        self.z_separation += 1;

        let degraded = self.downsample * (self.z_separation as f64 * 2.0).max(5.0);
        let n_z = self.server.n_z_slices() as i32;

        for candidate_z in [self.z - self.z_separation as i32, self.z + self.z_separation as i32] {
            if candidate_z < 0 || candidate_z >= n_z {
                continue;
            }
            let additions = self.geometry.tiles_covering(
                self.server.as_ref(),
                self.clip,
                degraded,
                candidate_z,
                self.t,
                Vec::new(),
            );
            self.pending.extend(additions);
        }
    }

    /// Pop the next request to dispatch, expanding into neighbouring Z
    /// planes first if the current plane is drained. Returns `None` once
    /// every plane up to `maxZSeparation` has been exhausted.
    pub fn next_request(&mut self) -> Option<RegionRequest> {
        if self.pending.is_empty() {
            self.expand_z();
        }
        self.pending.pop()
    }

    /// True once no more requests will ever come out of this collection.
    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty() && self.z_separation >= self.max_z_separation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CountingImageServer, CountingListener};
    use crate::grid::TileGrid;

    fn listener() -> Arc<dyn TileListener<u8>> {
        Arc::new(CountingListener::new())
    }

    #[test]
    fn finest_level_drains_first() {
        let server: Arc<dyn ImageServer<u8>> =
            Arc::new(CountingImageServer::new("s", 256, 256, 256, vec![4.0, 2.0, 1.0]));
        let geometry: Arc<dyn TileGeometry<u8>> = Arc::new(TileGrid);
        let clip = ClipShape::new(0.0, 0.0, 256.0, 256.0);
        let mut collection =
            TileRequestCollection::new(listener(), server, geometry, clip, 1.0, 0, 0, 10);

        let first = collection.next_request().expect("has a pending request");
        assert_eq!(first.downsample, 1.0);
    }

    #[test]
    fn z_expansion_alternates_outward_until_max_separation() {
        let server: Arc<dyn ImageServer<u8>> =
            Arc::new(CountingImageServer::new("s", 64, 64, 64, vec![1.0]).with_z_slices(11));
        let geometry: Arc<dyn TileGeometry<u8>> = Arc::new(TileGrid);
        let clip = ClipShape::new(0.0, 0.0, 64.0, 64.0);
        let mut collection =
            TileRequestCollection::new(listener(), server, geometry, clip, 1.0, 5, 0, 10);

        // Drain the z=5 plane.
        while collection.next_request().map(|r| r.z) == Some(5) {}

        // Now z=4/z=6 should be reachable (z_separation becomes 1).
        let mut seen_z = std::collections::HashSet::new();
        while let Some(r) = collection.next_request() {
            seen_z.insert(r.z);
            if collection.z_separation() >= 1 && seen_z.len() >= 2 {
                break;
            }
        }
        assert!(seen_z.contains(&4) || seen_z.contains(&6));
    }

    #[test]
    fn identical_registration_is_detected() {
        let server: Arc<dyn ImageServer<u8>> =
            Arc::new(CountingImageServer::new("s", 256, 256, 256, vec![1.0]));
        let geometry: Arc<dyn TileGeometry<u8>> = Arc::new(TileGrid);
        let l = listener();
        let clip = ClipShape::new(0.0, 0.0, 100.0, 100.0);
        let collection =
            TileRequestCollection::new(l.clone(), server, geometry, clip, 1.0, 0, 0, 10);

        assert!(collection.is_identical_registration(&l, clip, 0, 0));
        assert!(!collection.is_identical_registration(&l, clip, 1, 0));
    }
}
