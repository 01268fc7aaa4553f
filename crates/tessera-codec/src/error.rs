//! Error types for row encoding and decoding.

use tessera_types::DataType;

/// Errors that can occur while encoding or decoding a row.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Row length does not match the schema.
    #[error("row has {actual} columns, schema expects {expected}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    /// Value is not compatible with the declared column type.
    #[error("column {column} expects {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },

    /// NULL supplied for a non-nullable column.
    #[error("column {0} is not nullable")]
    NullNotAllowed(String),

    /// Vector columns cannot be part of an encoded key.
    #[error("column {column} of type {data_type} cannot be used in a key")]
    NotOrderable { column: String, data_type: DataType },

    /// Table declares no primary key column.
    #[error("table {0} has no primary key")]
    NoPrimaryKey(String),

    /// Key prefix supplies more values than the key has columns.
    #[error("key has {expected} columns, got {actual} values")]
    KeyArity { expected: usize, actual: usize },

    /// Index or key definition names a column the table does not have.
    #[error("unknown column {0}")]
    UnknownColumn(String),

    /// Vector indexes are not encoded through a key-value codec.
    #[error("index {0} is a vector index and has no key-value codec")]
    VectorIndex(String),

    /// Encoded key is shorter than the entity prefix.
    #[error("key of {len} bytes is shorter than the entity prefix")]
    KeyTooShort { len: usize },

    /// Encoded key bytes ended early or carried an unknown marker.
    #[error("malformed key at byte {position}: {reason}")]
    MalformedKey {
        position: usize,
        reason: &'static str,
    },

    /// Value section failed to serialize or deserialize.
    #[error("value section: {0}")]
    Value(#[from] postcard::Error),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
