//! StrataBase Core Storage Engine
//!
//! A columnar analytical storage core implemented in Rust. Provides the
//! on-disk chunk store (epoch-versioned, paged buffers with crash-consistent
//! metadata) and the in-memory result-set layer that consumes query outputs,
//! including the pairwise aggregation reduce.

pub mod query;
pub mod storage;
pub mod types;

// Re-export main types
pub use query::{QueryMemoryDescriptor, ResultSet, ResultSetManager, StringDictionary, TargetInfo};
pub use storage::{FileBuffer, FileMgr, FileMgrConfig};
pub use types::{SqlType, SqlTypeInfo};

/// Storage engine error type
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt chunk: {0}")]
    CorruptChunk(String),

    #[error("Short IO: expected {expected} bytes, got {actual}")]
    ShortIo { expected: usize, actual: usize },

    #[error("Unsupported buffer type")]
    UnsupportedBufferType,

    #[error("Backing storage exhausted")]
    StorageExhausted,

    #[error("Date value {0} outside the representable day range")]
    DateOverflow(i64),

    #[error("Invalid file format")]
    InvalidFileFormat,

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
}

pub type Result<T> = std::result::Result<T, StrataError>;
