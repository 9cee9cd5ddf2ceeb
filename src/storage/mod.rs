//! On-disk partition surface: the metadata file, the per-column file
//! writer, and the file-cache invalidation hook.

pub mod cache;
pub mod meta;
pub mod writer;

pub use cache::{register, unregister, FileCache};
pub use meta::{ColumnMeta, PartitionMeta, META_FILE};
