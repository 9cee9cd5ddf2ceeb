//! File-cache invalidation hook.
//!
//! Readers in the same process may hold column files in a cache of their
//! own; the partition writer notifies a registered [`FileCache`] after each
//! file and directory it touches so stale entries can be dropped. Nothing
//! is registered by default.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

/// Cache invalidation interface supplied by the embedding application.
pub trait FileCache: Send + Sync {
    /// A single file was rewritten or removed.
    fn flush_file(&self, path: &Path);

    /// Every cached file under `dir` should be considered stale.
    fn flush_dir(&self, dir: &Path) {
        let _ = dir;
    }
}

static CACHE: Lazy<RwLock<Option<Arc<dyn FileCache>>>> = Lazy::new(|| RwLock::new(None));

/// Install the process-wide cache hook.
pub fn register(cache: Arc<dyn FileCache>) {
    *CACHE.write() = Some(cache);
}

/// Remove the process-wide cache hook.
pub fn unregister() {
    *CACHE.write() = None;
}

pub(crate) fn flush_file(path: &Path) {
    if let Some(cache) = CACHE.read().as_ref() {
        cache.flush_file(path);
    }
}

pub(crate) fn flush_dir(dir: &Path) {
    if let Some(cache) = CACHE.read().as_ref() {
        cache.flush_dir(dir);
    }
}
