//! Crate-level configuration. Grounded on the teacher's `PrefetchConfig`: a
//! plain struct with a `Default` impl holding the documented defaults,
//! rather than a config-file/env-parsing crate this library has no CLI or
//! file surface to justify.

/// Environment variable toggling debug-level timing logs around tile reads,
/// generalised from the teacher's `FASTPATH_TILE_TIMING` switch.
pub const LOG_TIMING_ENV_VAR: &str = "IMAGE_REGION_STORE_LOG_TIMING";

/// Store-wide tunables.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum aggregate byte size of cached tiles (converted internally to
    /// the cache's /1024 weight units).
    pub cache_size_bytes: u64,
    /// Largest dimension, in pixels, a thumbnail request may span.
    pub max_thumbnail_size: u32,
    /// Smallest dimension, in pixels, a thumbnail request may span.
    pub min_thumbnail_size: u32,
    /// Maximum concurrent prefetch workers the request manager may run.
    pub n_threads: usize,
    /// Maximum Z-axis distance from the focal plane prefetched by a
    /// collection before it stops expanding.
    pub max_z_separation: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_size_bytes: 256 * 1024 * 1024,
            max_thumbnail_size: 1024,
            min_thumbnail_size: 16,
            n_threads: 10,
            max_z_separation: 10,
        }
    }
}

/// Whether the debug-timing environment switch is set. Checked by
/// `TileWorker::run` around each backend read, so flipping the variable
/// takes effect on the next dispatched tile without restarting the store.
pub fn log_timing_enabled() -> bool {
    std::env::var(LOG_TIMING_ENV_VAR)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
