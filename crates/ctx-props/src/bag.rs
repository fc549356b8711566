//! Property bag
//!
//! A [`PropertyBag`] holds one context node's local properties. Parent
//! fallback is done by the owner of the tree, which walks ancestors and calls
//! [`PropertyBag::get_local`] on each (see [`lookup`]).

use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::difference::{PropertyDifference, ReplicationProbe};

/// Ordered property map
pub type PropertyMap = IndexMap<String, Value>;

/// Marker key that turns [`PropertyBag::set_all`] into a merge
pub const COPY_PROPERTIES: &str = "CopyProperties";

/// How incoming properties combine with ones already present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// Existing values win on conflict
    #[default]
    KeepExisting,
    /// Incoming values win on conflict
    Overwrite,
}

/// Local key/value store of a context node
///
/// Reads and writes go through a `RwLock`; concurrent mutation never fails.
/// When replication is active, [`set`](Self::set) and
/// [`remove`](Self::remove) also record a [`PropertyDifference`] per key,
/// drained with [`take_differences`](Self::take_differences).
#[derive(Debug, Default)]
pub struct PropertyBag {
    values: RwLock<PropertyMap>,
    differences: Mutex<IndexMap<String, PropertyDifference>>,
    probe: Option<Arc<dyn ReplicationProbe>>,
    tracked: OnceCell<bool>,
}

impl PropertyBag {
    /// Create an empty bag that never tracks differences
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bag whose replication policy comes from `probe`
    #[must_use]
    pub fn with_probe(probe: Arc<dyn ReplicationProbe>) -> Self {
        Self {
            probe: Some(probe),
            ..Self::default()
        }
    }

    /// Seed the bag with `values`
    #[must_use]
    pub fn with_values(self, values: PropertyMap) -> Self {
        *self.values.write() = values;
        self
    }

    /// Whether differences are recorded; computed once and cached
    pub fn is_tracking(&self) -> bool {
        *self.tracked.get_or_init(|| {
            self.probe
                .as_ref()
                .is_some_and(|probe| probe.replication_active())
        })
    }

    /// Local value for `key`, never consulting ancestors
    #[must_use]
    pub fn get_local(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Whether `key` is set locally
    #[must_use]
    pub fn contains_local(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    /// Store `value` under `key`, returning the previous local value
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        let previous = self.values.write().insert(key.clone(), value.clone());
        if self.is_tracking() {
            self.differences
                .lock()
                .insert(key.clone(), PropertyDifference::set(key, value));
        }
        previous
    }

    /// Remove `key` locally
    ///
    /// A removal difference is recorded only if the key existed.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.values.write().shift_remove(key);
        if removed.is_some() && self.is_tracking() {
            self.differences
                .lock()
                .insert(key.to_string(), PropertyDifference::removed(key));
        }
        removed
    }

    /// Replace the whole store, or merge when `values` carries
    /// [`COPY_PROPERTIES`] set to `true`
    ///
    /// The marker itself is not stored.
    pub fn set_all(&self, mut values: PropertyMap) {
        let merge = values.get(COPY_PROPERTIES) == Some(&Value::Bool(true));
        if merge {
            values.shift_remove(COPY_PROPERTIES);
            self.merge(&values, MergePolicy::Overwrite);
        } else {
            *self.values.write() = values;
        }
    }

    /// Merge `incoming` under `policy`, returning how many keys were written
    pub fn merge(&self, incoming: &PropertyMap, policy: MergePolicy) -> usize {
        let mut values = self.values.write();
        let mut written = 0;
        for (key, value) in incoming {
            match policy {
                MergePolicy::Overwrite => {
                    values.insert(key.clone(), value.clone());
                    written += 1;
                }
                MergePolicy::KeepExisting => {
                    if !values.contains_key(key) {
                        values.insert(key.clone(), value.clone());
                        written += 1;
                    }
                }
            }
        }
        written
    }

    /// Copy of the local map
    #[must_use]
    pub fn snapshot(&self) -> PropertyMap {
        self.values.read().clone()
    }

    /// Local keys in insertion order
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    /// Number of local entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the bag has no local entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Number of differences waiting for a flush
    #[must_use]
    pub fn pending_differences(&self) -> usize {
        self.differences.lock().len()
    }

    /// Drain recorded differences, oldest key first
    pub fn take_differences(&self) -> Vec<PropertyDifference> {
        let mut differences = self.differences.lock();
        std::mem::take(&mut *differences).into_values().collect()
    }
}

/// Resolve `key` across a chain of bags ordered leaf first
///
/// Returns the first local hit; `None` if no bag in the chain has the key.
pub fn lookup<'a, I>(chain: I, key: &str) -> Option<Value>
where
    I: IntoIterator<Item = &'a PropertyBag>,
{
    chain.into_iter().find_map(|bag| bag.get_local(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingProbe {
        active: bool,
        calls: AtomicUsize,
    }

    impl ReplicationProbe for CountingProbe {
        fn replication_active(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.active
        }
    }

    #[test]
    fn test_untracked_bag_records_nothing() {
        let bag = PropertyBag::new();
        bag.set("a", json!(1));
        bag.remove("a");
        assert_eq!(bag.pending_differences(), 0);
    }

    #[test]
    fn test_probe_consulted_once() {
        let probe = Arc::new(CountingProbe {
            active: true,
            ..CountingProbe::default()
        });
        let bag = PropertyBag::with_probe(probe.clone());
        bag.set("a", json!(1));
        bag.set("b", json!(2));
        bag.remove("a");
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_write_wins_per_key() {
        let probe = Arc::new(CountingProbe {
            active: true,
            ..CountingProbe::default()
        });
        let bag = PropertyBag::with_probe(probe);
        bag.set("k", json!("first"));
        bag.set("other", json!(0));
        bag.set("k", json!("second"));

        let diffs = bag.take_differences();
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0], PropertyDifference::set("k", json!("second")));
        assert_eq!(bag.pending_differences(), 0);
    }

    #[test]
    fn test_remove_of_missing_key_not_recorded() {
        let probe = Arc::new(CountingProbe {
            active: true,
            ..CountingProbe::default()
        });
        let bag = PropertyBag::with_probe(probe);
        assert!(bag.remove("ghost").is_none());
        assert_eq!(bag.pending_differences(), 0);

        bag.set("real", json!(true));
        bag.take_differences();
        bag.remove("real");
        assert_eq!(bag.take_differences(), vec![PropertyDifference::removed("real")]);
    }

    #[test]
    fn test_set_all_replaces_without_marker() {
        let bag = PropertyBag::new();
        bag.set("old", json!(1));

        let mut incoming = PropertyMap::new();
        incoming.insert("new".into(), json!(2));
        bag.set_all(incoming);

        assert!(bag.get_local("old").is_none());
        assert_eq!(bag.get_local("new"), Some(json!(2)));
    }

    #[test]
    fn test_set_all_merges_with_marker() {
        let bag = PropertyBag::new();
        bag.set("old", json!(1));
        bag.set("shared", json!("mine"));

        let mut incoming = PropertyMap::new();
        incoming.insert(COPY_PROPERTIES.into(), json!(true));
        incoming.insert("shared".into(), json!("theirs"));
        bag.set_all(incoming);

        assert_eq!(bag.get_local("old"), Some(json!(1)));
        assert_eq!(bag.get_local("shared"), Some(json!("theirs")));
        assert!(!bag.contains_local(COPY_PROPERTIES));
    }

    #[test]
    fn test_merge_policies() {
        let bag = PropertyBag::new();
        bag.set("p", json!("live"));

        let mut incoming = PropertyMap::new();
        incoming.insert("p".into(), json!("old"));
        incoming.insert("q".into(), json!("restored"));

        assert_eq!(bag.merge(&incoming, MergePolicy::KeepExisting), 1);
        assert_eq!(bag.get_local("p"), Some(json!("live")));
        assert_eq!(bag.get_local("q"), Some(json!("restored")));

        assert_eq!(bag.merge(&incoming, MergePolicy::Overwrite), 2);
        assert_eq!(bag.get_local("p"), Some(json!("old")));
    }

    #[test]
    fn test_lookup_walks_chain() {
        let leaf = PropertyBag::new();
        let mid = PropertyBag::new();
        let root = PropertyBag::new();
        root.set("K", json!("root"));
        mid.set("M", json!("mid"));

        assert_eq!(lookup([&leaf, &mid, &root], "K"), Some(json!("root")));
        assert_eq!(lookup([&leaf, &mid, &root], "M"), Some(json!("mid")));
        assert!(leaf.get_local("K").is_none());
        assert!(lookup([&leaf, &mid, &root], "missing").is_none());
    }
}
