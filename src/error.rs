use std::io;
use thiserror::Error;

/// Result type local to waitbox.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("thread pool size must be greater than 0")]
    InvalidSize,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),

    #[error("thread pool is shut down and not accepting new tasks")]
    Shutdown,

    #[error("worker thread '{name}' panicked")]
    WorkerPanicked { name: String },
}
