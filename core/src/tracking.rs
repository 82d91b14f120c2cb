//! Change-tracking map.
//!
//! # Design
//! `ChangeTrackingMap` stores its current values plus four key sets that
//! describe what happened since the initial snapshot:
//!
//! - `added`: keys that did not exist in storage when first assigned
//! - `touched`: keys assigned (or deleted) at all, even to an equal value
//! - `modified`: keys whose value changed, or that were deleted
//! - `deleted`: snapshot keys that were removed
//!
//! Deleting a key that was added after the snapshot erases every trace of it,
//! since the server never saw it. The aggregate `is_touched` / `is_modified`
//! flags also look inside stored values, so a map nested in another map
//! reports its changes upward.

use std::collections::{BTreeMap, BTreeSet};

/// Values that may carry changes of their own.
pub trait Tracked {
    fn is_touched(&self) -> bool {
        false
    }

    fn is_modified(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct ChangeTrackingMap<V> {
    values: BTreeMap<String, V>,
    added: BTreeSet<String>,
    touched: BTreeSet<String>,
    modified: BTreeSet<String>,
    deleted: BTreeSet<String>,
}

impl<V> ChangeTrackingMap<V> {
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            added: BTreeSet::new(),
            touched: BTreeSet::new(),
            modified: BTreeSet::new(),
            deleted: BTreeSet::new(),
        }
    }

    /// Create a map whose initial contents count as zero changes.
    pub fn from_snapshot<I, K>(initial: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
    {
        Self {
            values: initial.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            ..Self::new()
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.values.get(key)
    }

    /// Mutable access that records nothing. Only for values implementing
    /// `Tracked` that report their own changes.
    pub fn get_mut_untracked(&mut self, key: &str) -> Option<&mut V> {
        self.values.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.values.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn added_keys(&self) -> &BTreeSet<String> {
        &self.added
    }

    pub fn touched_keys(&self) -> &BTreeSet<String> {
        &self.touched
    }

    pub fn modified_keys(&self) -> &BTreeSet<String> {
        &self.modified
    }

    pub fn deleted_keys(&self) -> &BTreeSet<String> {
        &self.deleted
    }

    /// Remove `key`, returning its value.
    ///
    /// A key added since the snapshot leaves no trace. A snapshot key is
    /// recorded as deleted, touched and modified. Absent keys record nothing.
    pub fn delete(&mut self, key: &str) -> Option<V> {
        let value = self.values.remove(key)?;
        if self.added.remove(key) {
            self.touched.remove(key);
            self.modified.remove(key);
        } else {
            self.deleted.insert(key.to_string());
            self.touched.insert(key.to_string());
            self.modified.insert(key.to_string());
        }
        Some(value)
    }

    /// Drop all change records, making the current contents the snapshot.
    pub fn reset_changes(&mut self) {
        self.added.clear();
        self.touched.clear();
        self.modified.clear();
        self.deleted.clear();
    }

    pub fn into_values(self) -> BTreeMap<String, V> {
        self.values
    }
}

impl<V: Tracked + PartialEq> ChangeTrackingMap<V> {
    /// Store `value` under `key`, returning the previous value.
    ///
    /// A key missing from the map counts as added, even when it was deleted
    /// from the snapshot. The deletion stays recorded.
    pub fn set(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        let changed = self.values.get(&key) != Some(&value);
        if !self.values.contains_key(&key) {
            self.added.insert(key.clone());
        }
        self.touched.insert(key.clone());
        if changed {
            self.modified.insert(key.clone());
        }
        self.values.insert(key, value)
    }

    pub fn is_touched(&self) -> bool {
        !self.touched.is_empty()
            || !self.deleted.is_empty()
            || self.values.values().any(|v| v.is_touched())
    }

    pub fn is_modified(&self) -> bool {
        !self.modified.is_empty()
            || !self.deleted.is_empty()
            || self.values.values().any(|v| v.is_modified())
    }
}

impl<V: Clone> ChangeTrackingMap<V> {
    /// Changed values and deleted keys since the snapshot.
    ///
    /// With `include_touched`, keys assigned an equal value are reported too.
    /// Keys that no longer exist only show up in the deleted set.
    pub fn get_changes(&self, include_touched: bool) -> (BTreeMap<String, V>, BTreeSet<String>) {
        let keys = if include_touched {
            &self.touched
        } else {
            &self.modified
        };
        let changed = keys
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.clone(), v.clone())))
            .collect();
        (changed, self.deleted.clone())
    }
}

impl<V> Default for ChangeTrackingMap<V> {
    fn default() -> Self {
        Self::new()
    }
}
