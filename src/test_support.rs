//! In-memory test doubles shared by this crate's unit and integration
//! tests. Grounded on the teacher's own `#[cfg(test)] mod test_utils`
//! convention referenced from `lib.rs`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::error::{TileError, TileResult};
use crate::region::RegionRequest;
use crate::server::{ImageServer, TileListener};

/// A synthetic `ImageServer` whose tiles are single bytes derived from the
/// request's coordinates. Can be configured to delay reads (to simulate a
/// slow remote backend) or to fail a fixed number of upcoming reads.
pub struct CountingImageServer {
    path: String,
    width: u32,
    height: u32,
    tile_size: u32,
    downsamples: Vec<f64>,
    n_z_slices: u32,
    generating: bool,
    read_delay: Option<Duration>,
    fail_next: AtomicUsize,
    reads: AtomicUsize,
    /// Name of the executor-pool thread that most recently ran
    /// `read_region`, so a test can check local-vs-remote routing.
    last_thread_name: Mutex<Option<String>>,
}

impl CountingImageServer {
    pub fn new(
        path: impl Into<String>,
        width: u32,
        height: u32,
        tile_size: u32,
        downsamples: Vec<f64>,
    ) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            tile_size,
            downsamples,
            n_z_slices: 1,
            generating: false,
            read_delay: None,
            fail_next: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            last_thread_name: Mutex::new(None),
        }
    }

    pub fn with_z_slices(mut self, n: u32) -> Self {
        self.n_z_slices = n;
        self
    }

    pub fn with_generating(mut self, generating: bool) -> Self {
        self.generating = generating;
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// The next `n` calls to `read_region` return a synthetic backend error.
    pub fn fail_next_reads(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Name of the thread that ran the most recent `read_region` call.
    pub fn last_thread_name(&self) -> Option<String> {
        self.last_thread_name.lock().unwrap().clone()
    }
}

impl ImageServer<u8> for CountingImageServer {
    fn path(&self) -> &str {
        &self.path
    }

    fn n_resolutions(&self) -> usize {
        self.downsamples.len().max(1)
    }

    fn n_z_slices(&self) -> u32 {
        self.n_z_slices
    }

    fn preferred_downsamples(&self) -> Vec<f64> {
        self.downsamples.clone()
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn is_generating(&self) -> bool {
        self.generating
    }

    fn is_empty_region(&self, request: &RegionRequest) -> bool {
        request.x >= self.width as i64 || request.y >= self.height as i64
    }

    fn read_region(&self, request: &RegionRequest) -> TileResult<Option<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        *self.last_thread_name.lock().unwrap() = thread::current().name().map(String::from);

        if let Some(delay) = self.read_delay {
            thread::sleep(delay);
        }

        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(TileError::Backend("synthetic failure".into()));
        }

        if self.is_empty_region(request) {
            return Ok(None);
        }

        Ok(Some((request.x ^ request.y ^ request.z as i64) as u8))
    }
}

/// Counts `tile_available` notifications and remembers the most recent one,
/// for checking fan-out and P7 (listener monotonicity).
#[derive(Default)]
pub struct CountingListener {
    count: AtomicUsize,
    last: Mutex<Option<(String, RegionRequest)>>,
}

impl CountingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<(String, RegionRequest)> {
        self.last.lock().unwrap().clone()
    }
}

impl<T> TileListener<T> for CountingListener {
    fn tile_available(&self, server_path: &str, request: &RegionRequest, _tile: &T) {
        self.count.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some((server_path.to_string(), request.clone()));
    }
}
