//! Process-wide parameter registry.
//!
//! A flat string key/value store consulted by the partition writer for
//! default index hints. Keys follow the partition naming scheme
//! `ibis.<table>.index` (partition-wide default) and
//! `ibis.<table>.<column>.index` (per-column default); values are opaque
//! strings written verbatim into the metadata file.

use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

static PARAMS: Lazy<RwLock<AHashMap<String, String>>> =
    Lazy::new(|| RwLock::new(AHashMap::new()));

/// Set a parameter, replacing any previous value.
pub fn set(key: impl Into<String>, value: impl Into<String>) {
    PARAMS.write().insert(key.into(), value.into());
}

/// Look up a parameter.
pub fn get(key: &str) -> Option<String> {
    PARAMS.read().get(key).cloned()
}

/// Remove a parameter.
pub fn unset(key: &str) {
    PARAMS.write().remove(key);
}

/// Default index hint for a whole partition.
pub fn partition_index_hint(tname: &str) -> Option<String> {
    get(&format!("ibis.{tname}.index"))
}

/// Default index hint for one column of a partition.
pub fn column_index_hint(tname: &str, cname: &str) -> Option<String> {
    get(&format!("ibis.{tname}.{cname}.index"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_unset() {
        set("ibis.cfgtest.index", "bitmap");
        set("ibis.cfgtest.flow.index", "none");
        assert_eq!(partition_index_hint("cfgtest").as_deref(), Some("bitmap"));
        assert_eq!(
            column_index_hint("cfgtest", "flow").as_deref(),
            Some("none")
        );
        assert_eq!(column_index_hint("cfgtest", "other"), None);
        unset("ibis.cfgtest.index");
        assert_eq!(partition_index_hint("cfgtest"), None);
        unset("ibis.cfgtest.flow.index");
    }
}
