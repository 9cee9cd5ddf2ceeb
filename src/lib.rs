//! Granary — an embedded columnar partition builder.
//!
//! A [`PartitionBuilder`] is an in-memory staging area for a column-oriented,
//! append-only data partition on local storage. A client declares a schema
//! (ordered, typed, named columns), streams values in row-by-row, as column
//! chunks, as fully typed rows, or as parsed text lines, then materializes
//! the staged data as one file per column plus a per-column presence-bitmap
//! sidecar and a human-readable partition metadata file. Writing into a
//! directory that already holds a partition appends to it, merging row
//! counts and checking per-column type compatibility.

pub mod config;
pub mod data;
pub mod storage;
pub mod table;

// Re-export main types
pub use data::{ColumnData, DataType, PresenceMask, TableRow, ValueSlice};
pub use storage::{ColumnMeta, FileCache, PartitionMeta};
pub use table::{AddColumnStatus, PartitionBuilder, RowPolicy};

/// Partition builder error type
#[derive(Debug, thiserror::Error)]
pub enum GranaryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid column name: {0:?}")]
    InvalidColumnName(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("invalid row range [{begin}, {end})")]
    InvalidRange { begin: u64, end: u64 },

    #[error("column {column} holds {expected} values, got {actual}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("column {column}: staged type {staged} conflicts with existing type {existing}")]
    TypeConflict {
        column: String,
        existing: DataType,
        staged: DataType,
    },

    #[error("no output directory specified")]
    NoOutputDir,

    #[error("cannot create metadata file {path}: {source}")]
    MetadataCreate {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("cannot open column file {path}: {source}")]
    ColumnFileOpen {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("short write on column {column}: expected {expected} bytes, wrote {actual}")]
    ShortWrite {
        column: String,
        expected: u64,
        actual: u64,
    },

    #[error("reserve failed and existing content was lost")]
    ReserveContentLost,

    #[error("reserve gave up after {attempts} attempts")]
    ReserveFailed { attempts: u32 },

    #[error("no columns declared")]
    EmptySchema,

    #[error("invalid metadata file {path}: {reason}")]
    InvalidMetadata {
        path: std::path::PathBuf,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, GranaryError>;
