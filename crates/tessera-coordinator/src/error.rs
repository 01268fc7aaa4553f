//! Error types for the coordinator.

use tessera_directory::DirectoryError;
use tessera_store::StoreError;
use thiserror::Error;

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Errors that can occur during placement coordination.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// The storage layer failed while moving split data.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("coordinator already initialized")]
    AlreadyInitialized,

    /// A notification worker thread could not be started.
    #[error("failed to spawn notification worker: {0}")]
    Spawn(#[source] std::io::Error),
}
