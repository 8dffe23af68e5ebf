//! Hierarchical per-record lock table.
//!
//! Reconciliation of a record is a read-modify-write against the registry.
//! Two passes over the same record must not interleave, while passes over
//! different records may run side by side. Each [`RecordKey`] gets its own
//! async read-write lock. Locking a key holds its enclosing scopes shared
//! (namespace, then service) and the key itself exclusive, so deleting a
//! service waits for every pass over its endpoints and the other way round.
//! Scopes are always taken top-down.
//!
//! An entry is dropped from the table once nobody holds or waits on it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use cnwan_core::RecordKind;

/// Identity of a registry record: kind, enclosing scope and name.
///
/// Namespaces leave both scope fields empty, services leave `serv_name`
/// empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub kind: RecordKind,
    pub ns_name: String,
    pub serv_name: String,
    pub name: String,
}

impl RecordKey {
    pub fn namespace(name: impl Into<String>) -> Self {
        Self {
            kind: RecordKind::Namespace,
            ns_name: String::new(),
            serv_name: String::new(),
            name: name.into(),
        }
    }

    pub fn service(ns_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: RecordKind::Service,
            ns_name: ns_name.into(),
            serv_name: String::new(),
            name: name.into(),
        }
    }

    pub fn endpoint(
        ns_name: impl Into<String>,
        serv_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: RecordKind::Endpoint,
            ns_name: ns_name.into(),
            serv_name: serv_name.into(),
            name: name.into(),
        }
    }

    /// Enclosing scopes, outermost first.
    pub fn ancestors(&self) -> Vec<RecordKey> {
        match self.kind {
            RecordKind::Namespace => vec![],
            RecordKind::Service => vec![RecordKey::namespace(&self.ns_name)],
            RecordKind::Endpoint => vec![
                RecordKey::namespace(&self.ns_name),
                RecordKey::service(&self.ns_name, &self.serv_name),
            ],
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RecordKind::Namespace => write!(f, "{}", self.name),
            RecordKind::Service => write!(f, "{}/{}", self.ns_name, self.name),
            RecordKind::Endpoint => {
                write!(f, "{}/{}/{}", self.ns_name, self.serv_name, self.name)
            }
        }
    }
}

type Table = HashMap<RecordKey, Arc<RwLock<()>>>;

/// Table of async read-write locks keyed by [`RecordKey`].
#[derive(Default)]
pub struct KeyedLocks {
    table: Arc<Mutex<Table>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` and its scopes are free and hold them until the
    /// guard is dropped.
    pub async fn lock(&self, key: RecordKey) -> KeyGuard {
        // Built up front so a cancelled wait still prunes what it touched.
        let mut guard = KeyGuard {
            table: Arc::clone(&self.table),
            key: key.clone(),
            held: Vec::with_capacity(3),
        };
        for scope in key.ancestors() {
            let slot = self.slot(&scope);
            guard.held.push((scope, Held::Shared(None)));
            let shared = slot.read_owned().await;
            if let Some((_, held)) = guard.held.last_mut() {
                *held = Held::Shared(Some(shared));
            }
        }
        let slot = self.slot(&key);
        guard.held.push((key, Held::Exclusive(None)));
        let exclusive = slot.write_owned().await;
        if let Some((_, held)) = guard.held.last_mut() {
            *held = Held::Exclusive(Some(exclusive));
        }
        guard
    }

    fn slot(&self, key: &RecordKey) -> Arc<RwLock<()>> {
        self.table.lock().entry(key.clone()).or_default().clone()
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Held {
    Shared(Option<OwnedRwLockReadGuard<()>>),
    Exclusive(Option<OwnedRwLockWriteGuard<()>>),
}

/// Holds one key of a [`KeyedLocks`] table, plus its scopes. Released on
/// drop.
pub struct KeyGuard {
    table: Arc<Mutex<Table>>,
    key: RecordKey,
    held: Vec<(RecordKey, Held)>,
}

impl KeyGuard {
    pub fn key(&self) -> &RecordKey {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        // Innermost first.
        while let Some((key, held)) = self.held.pop() {
            drop(held);
            // Only the table itself still references the slot: nobody waits.
            let idle = table
                .get(&key)
                .is_some_and(|slot| Arc::strong_count(slot) == 1);
            if idle {
                table.remove(&key);
            }
        }
    }
}
