//! An in-memory, branchable key-value store.
//!
//! A root [Store] holds committed data. [Store::branch] creates a cache overlay whose writes are only visible to the
//! parent after [Store::write]. While a [MultiStore] snapshot is outstanding every mutation is recorded in an undo
//! log, which is what the snapshot rolls back to.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;

use crate::error::EvmError;

pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

#[derive(Debug, Default)]
struct StoreInner {
    parent: Option<Store>,
    /// For a branch, `None` marks a deletion that hides the parent's value. A root never stores `None`.
    entries: BTreeMap<Key, Option<Value>>,
    /// Previous state of `entries[key]` for every mutation since the oldest live checkpoint, oldest first.
    undo: Vec<(Key, Option<Option<Value>>)>,
    /// Number of live checkpoints. Nothing is recorded in `undo` while this is zero.
    checkpoints: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Store(Arc<Mutex<StoreInner>>);

impl Store {
    pub fn new_root() -> Store {
        Store::default()
    }

    pub fn branch(&self) -> Store {
        Store(Arc::new(Mutex::new(StoreInner {
            parent: Some(self.clone()),
            ..Default::default()
        })))
    }

    pub fn is_branch(&self) -> bool {
        self.0.lock().parent.is_some()
    }

    pub fn get(&self, key: &[u8]) -> Option<Value> {
        let parent = {
            let inner = self.0.lock();
            if let Some(entry) = inner.entries.get(key) {
                return entry.clone();
            }
            inner.parent.clone()
        };
        parent.and_then(|p| p.get(key))
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&self, key: &[u8], value: Value) {
        self.mutate(key, Some(value));
    }

    pub fn delete(&self, key: &[u8]) {
        self.mutate(key, None);
    }

    fn mutate(&self, key: &[u8], value: Option<Value>) {
        let mut inner = self.0.lock();
        if inner.checkpoints > 0 {
            let previous = inner.entries.get(key).cloned();
            inner.undo.push((key.to_vec(), previous));
        }
        match (value, inner.parent.is_some()) {
            (Some(value), _) => {
                inner.entries.insert(key.to_vec(), Some(value));
            }
            (None, true) => {
                inner.entries.insert(key.to_vec(), None);
            }
            (None, false) => {
                inner.entries.remove(key);
            }
        }
    }

    /// All live entries whose key starts with `prefix`, in key order.
    pub fn iter_prefix(&self, prefix: &[u8]) -> Vec<(Key, Value)> {
        let (parent, overlay) = {
            let inner = self.0.lock();
            let overlay: Vec<_> = inner
                .entries
                .range(prefix.to_vec()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            (inner.parent.clone(), overlay)
        };
        let mut merged: BTreeMap<Key, Value> = parent
            .map(|p| p.iter_prefix(prefix).into_iter().collect())
            .unwrap_or_default();
        for (key, value) in overlay {
            match value {
                Some(value) => {
                    merged.insert(key, value);
                }
                None => {
                    merged.remove(&key);
                }
            }
        }
        merged.into_iter().collect()
    }

    /// Flushes this branch into its parent. The parent records the writes in its own undo log, so a snapshot taken on
    /// the parent before the flush still covers them. Writing a root is a no-op.
    pub fn write(&self) {
        let (parent, entries) = {
            let mut inner = self.0.lock();
            let Some(parent) = inner.parent.clone() else {
                return;
            };
            inner.undo.clear();
            inner.checkpoints = 0;
            (parent, std::mem::take(&mut inner.entries))
        };
        for (key, value) in entries {
            match value {
                Some(value) => parent.set(&key, value),
                None => parent.delete(&key),
            }
        }
    }

    /// Removes every entry. Used to reset transient stores between blocks.
    pub fn clear(&self) {
        let mut inner = self.0.lock();
        inner.entries.clear();
        inner.undo.clear();
    }

    /// A new root store holding a copy of everything visible through this one.
    pub fn fork(&self) -> Store {
        let entries = self
            .iter_prefix(&[])
            .into_iter()
            .map(|(k, v)| (k, Some(v)))
            .collect();
        Store(Arc::new(Mutex::new(StoreInner {
            entries,
            ..Default::default()
        })))
    }

    fn checkpoint(&self) -> usize {
        let mut inner = self.0.lock();
        inner.checkpoints += 1;
        inner.undo.len()
    }

    /// Undoes every mutation since `checkpoint` and releases `released` checkpoints, the one being rolled back to
    /// included.
    fn rollback(&self, checkpoint: usize, released: usize) -> Result<(), EvmError> {
        let mut inner = self.0.lock();
        if checkpoint > inner.undo.len() {
            return Err(EvmError::InvalidState(format!(
                "store checkpoint {checkpoint} is ahead of the undo log ({})",
                inner.undo.len()
            )));
        }
        let undone = inner.undo.split_off(checkpoint);
        for (key, previous) in undone.into_iter().rev() {
            match previous {
                Some(previous) => {
                    inner.entries.insert(key, previous);
                }
                None => {
                    inner.entries.remove(&key);
                }
            }
        }
        inner.checkpoints = inner.checkpoints.saturating_sub(released);
        if inner.checkpoints == 0 {
            inner.undo.clear();
        }
        Ok(())
    }

    fn release_checkpoints(&self) {
        let mut inner = self.0.lock();
        inner.checkpoints = 0;
        inner.undo.clear();
    }
}

/// An opaque handle to a [MultiStore] snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(usize);

impl SnapshotId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A persistent store and a transient store which are branched, snapshotted and written together.
#[derive(Debug, Clone, Default)]
pub struct MultiStore {
    kv: Store,
    transient: Store,
    snapshots: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl MultiStore {
    pub fn new_root() -> MultiStore {
        MultiStore::default()
    }

    pub fn kv(&self) -> &Store {
        &self.kv
    }

    pub fn transient(&self) -> &Store {
        &self.transient
    }

    pub fn branch(&self) -> MultiStore {
        MultiStore {
            kv: self.kv.branch(),
            transient: self.transient.branch(),
            snapshots: Arc::default(),
        }
    }

    pub fn write(&self) {
        self.kv.write();
        self.transient.write();
        self.snapshots.lock().clear();
        self.kv.release_checkpoints();
        self.transient.release_checkpoints();
    }

    /// Takes a snapshot. Snapshots form a stack: reverting to one discards it and every later snapshot.
    pub fn snapshot(&self) -> SnapshotId {
        let mut snapshots = self.snapshots.lock();
        snapshots.push((self.kv.checkpoint(), self.transient.checkpoint()));
        SnapshotId(snapshots.len() - 1)
    }

    /// Drops every write made since `id` was taken.
    pub fn revert_to_snapshot(&self, id: SnapshotId) -> Result<(), EvmError> {
        let ((kv, transient), released) = {
            let mut snapshots = self.snapshots.lock();
            let Some(&checkpoints) = snapshots.get(id.0) else {
                return Err(EvmError::InvalidState(format!(
                    "unknown multi-store snapshot {}",
                    id.0
                )));
            };
            let released = snapshots.len() - id.0;
            snapshots.truncate(id.0);
            (checkpoints, released)
        };
        self.kv.rollback(kv, released)?;
        self.transient.rollback(transient, released)
    }

    pub fn clear_transient(&self) {
        self.transient.clear();
    }

    /// A detached root copy of the persistent store with an empty transient store.
    pub fn fork(&self) -> MultiStore {
        MultiStore {
            kv: self.kv.fork(),
            transient: Store::new_root(),
            snapshots: Arc::default(),
        }
    }
}
