//! Versioned in-memory store with per-key concurrent accessors.
//!
//! Readers of a key never block writers of other keys; writers of the same
//! key are mutually exclusive. Accessor guards must be released before the
//! same thread touches another key, keeping lock sections single-key and
//! deadlock-free.

use bytes::Bytes;

use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;

use crate::wire::Ver;

/// A stored value with its version tag.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct ValueRecord {
    pub value: Bytes,
    pub ver: Ver,
}

/// Concurrent mapping from key bytes to versioned values.
#[derive(Debug, Default)]
pub struct Store {
    entries: DashMap<Bytes, ValueRecord>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            entries: DashMap::new(),
        }
    }

    /// Shared accessor to an existing entry.
    pub fn find_shared(&self, key: &[u8]) -> Option<Ref<Bytes, ValueRecord>> {
        self.entries.get(key)
    }

    /// Exclusive accessor, inserting a default record if the key is absent.
    pub fn insert_or_get_exclusive(
        &self,
        key: &Bytes,
    ) -> RefMut<Bytes, ValueRecord> {
        self.entries.entry(key.clone()).or_default()
    }

    /// Removes the entry if present.
    pub fn erase(&self, key: &[u8]) {
        self.entries.remove(key);
    }

    /// Applies a write under the monotone version guard: the incoming value
    /// replaces the stored one iff `ver >= stored.ver`. Returns whether the
    /// write was accepted.
    pub fn apply_versioned(&self, key: &Bytes, value: &Bytes, ver: Ver) -> bool {
        let mut record = self.insert_or_get_exclusive(key);
        if ver >= record.ver {
            record.value = value.clone();
            record.ver = ver;
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
