//! External collaborator contracts: the backend servers and listeners the
//! store is driven by, plus the tile-geometry enumerator it depends on.

use crate::error::TileResult;
use crate::region::RegionRequest;

/// A backend capable of synchronously reading rectangular image regions.
///
/// Implementations are provided by the caller (an actual whole-slide-image
/// reader, a test double, …) — the store only ever consumes this trait.
pub trait ImageServer<T>: Send + Sync {
    /// Opaque identity, stable for the lifetime of the server.
    fn path(&self) -> &str;

    /// Number of precomputed pyramid resolution levels.
    fn n_resolutions(&self) -> usize;

    /// Number of focal planes (Z-slices) this server exposes.
    fn n_z_slices(&self) -> u32;

    /// The set of downsample factors at which tiles are natively available,
    /// ordered arbitrarily.
    fn preferred_downsamples(&self) -> Vec<f64>;

    /// Full-resolution (level 0) width in pixels.
    fn width(&self) -> u32;

    /// Full-resolution (level 0) height in pixels.
    fn height(&self) -> u32;

    /// Edge length, in level-0 pixels, of one tile at downsample 1.0. Used
    /// by the default `TileGeometry` implementation (`crate::grid`) to lay
    /// out a tile grid; servers with a non-uniform tiling scheme can ignore
    /// this and supply their own `TileGeometry` instead.
    fn tile_size(&self) -> u32 {
        256
    }

    /// Whether tiles from this server are cheap to synthesise in-process
    /// ("GeneratingImageServer"). Routed to the local pool rather than the
    /// remote pool. Default: `false` (a real, I/O-bound backend).
    fn is_generating(&self) -> bool {
        false
    }

    /// Cheap predicate: true means `read_region` would produce nothing for
    /// this request, without actually performing the read.
    fn is_empty_region(&self, request: &RegionRequest) -> bool;

    /// Blocking read of one region. `Ok(None)` means the region legitimately
    /// has no content (distinct from an I/O failure, which is `Err`).
    fn read_region(&self, request: &RegionRequest) -> TileResult<Option<T>>;
}

/// Notified after a tile is inserted into the cache.
pub trait TileListener<T>: Send + Sync {
    fn tile_available(&self, server_path: &str, request: &RegionRequest, tile: &T);
}

/// An axis-aligned rectangle in level-0 (full-resolution) coordinates,
/// describing the area a viewer wants tiles for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipShape {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ClipShape {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Enumerates the tile-aligned `RegionRequest`s covering a clip shape at one
/// resolution/plane. Consumed by `TileRequestCollection`; the crate ships one
/// concrete implementation (`crate::grid::TileGrid`) grounded on the
/// server's own tile size and level table, but callers may substitute their
/// own (e.g. one backed by a non-uniform tiling scheme).
pub trait TileGeometry<T>: Send + Sync {
    /// Append tile requests intersecting `clip` at `(downsample, z, t)` onto
    /// `existing`, returning the augmented list (mirrors the Java
    /// `getTilesToRequest(..., existingList)` signature in spirit).
    fn tiles_covering(
        &self,
        server: &dyn ImageServer<T>,
        clip: ClipShape,
        downsample: f64,
        z: i32,
        t: u32,
        existing: Vec<RegionRequest>,
    ) -> Vec<RegionRequest>;
}
