//! Error types for region store operations.

use tessera_codec::CodecError;
use tessera_directory::DirectoryError;
use tessera_types::RegionId;

use crate::client::StoreTarget;

/// Errors that can occur while serving a region.
///
/// Conflicts (an existing key on insert, a stale value on compare-and-set)
/// are not errors; operations report them as `false`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Row or key failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Placement lookup failed, including a key with no owning region.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Caller supplied an argument the operation cannot honor.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Key does not fall inside the region this proxy serves.
    #[error("key is outside region {0}")]
    WrongRegion(RegionId),

    /// The storage node failed the call.
    #[error("storage call to {target} failed: {reason}")]
    Unavailable { target: StoreTarget, reason: String },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
