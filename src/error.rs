//! Error types for image-region-store.

use thiserror::Error;

/// Error types for tile operations.
#[derive(Error, Debug)]
pub enum TileError {
    #[error("I/O error reading region: {0}")]
    Io(#[from] std::io::Error),

    #[error("tile worker was cancelled")]
    Cancelled,

    #[error("executor pool is shut down")]
    PoolShutDown,

    #[error("backend read failed: {0}")]
    Backend(String),
}

/// Result type alias for tile operations.
pub type TileResult<T> = Result<T, TileError>;
