//! Two fixed-size thread pools backing tile work: a small "local" pool for
//! cheap in-process tile synthesis, and a larger "remote" pool for
//! potentially slow, I/O-bound backend reads.
//!
//! Grounded on the teacher's `BulkPreloader::rayon_pool` (a dedicated
//! `rayon::ThreadPool` sized off `num_cpus`, gated by an `AtomicBool`
//! shutdown flag checked before each submitted closure runs).

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{TileError, TileResult};

/// Which pool a piece of work should run on, mirroring whether its server
/// is a cheap in-process generator or a slow remote/disk-backed backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Local,
    Remote,
}

/// Owns the store's two `rayon::ThreadPool`s and the shutdown gate shared
/// by both. Once shut down, `submit` rejects new work with
/// `TileError::PoolShutDown` rather than silently dropping it, so callers
/// can distinguish "ran and failed" from "never ran".
pub struct TileExecutor {
    local: ThreadPool,
    remote: ThreadPool,
    shut_down: AtomicBool,
}

impl TileExecutor {
    /// `local` is sized to the number of available CPUs (in-process
    /// synthesis is CPU-bound); `remote` is sized `clamp(cpus * 4, 8, 32)`
    /// since its workers mostly block on I/O rather than burn CPU.
    pub fn new() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let remote_threads = (cpus * 4).clamp(8, 32);

        let local = ThreadPoolBuilder::new()
            .num_threads(cpus.max(1))
            .thread_name(|i| format!("image-region-local-{i}"))
            .build()
            .expect("failed to build local tile executor pool");

        let remote = ThreadPoolBuilder::new()
            .num_threads(remote_threads)
            .thread_name(|i| format!("image-region-remote-{i}"))
            .build()
            .expect("failed to build remote tile executor pool");

        Self {
            local,
            remote,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Submit `task` to the requested pool. The task is itself responsible
    /// for checking worker-level cancellation; this only gates whole-pool
    /// shutdown.
    pub fn submit(&self, kind: PoolKind, task: impl FnOnce() + Send + 'static) -> TileResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TileError::PoolShutDown);
        }
        let pool = match kind {
            PoolKind::Local => &self.local,
            PoolKind::Remote => &self.remote,
        };
        pool.spawn(task);
        Ok(())
    }

    /// Mark the executor as shut down. In-flight closures already spawned
    /// keep running; no new work is accepted afterward. Idempotent.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Default for TileExecutor {
    fn default() -> Self {
        Self::new()
    }
}
