//! Canonical handles for names.
//!
//! An [`Interner`] hands out one [`Interned`] handle per distinct name for as
//! long as any holder keeps it alive. The table itself only holds weak
//! references, so a name nobody refers to is forgotten and a later intern
//! creates a fresh handle with a new id.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::cache::{Reclaim, SharedCache};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type EntryTable<T> = SharedCache<Arc<str>, Entry<T>>;

struct Entry<T: Send + Sync + 'static> {
    id: u64,
    name: Arc<str>,
    value: T,
    table: Weak<EntryTable<T>>,
}

impl<T: Send + Sync + 'static> Drop for Entry<T> {
    fn drop(&mut self) {
        // A concurrent intern may already have replaced the dead slot with a
        // live entry; purge_key leaves live slots alone.
        if let Some(table) = self.table.upgrade() {
            table.purge_key(&*self.name);
        }
    }
}

/// Shared handle; equality is identity of the interned entry.
pub struct Interned<T: Send + Sync + 'static> {
    entry: Arc<Entry<T>>,
}

impl<T: Send + Sync + 'static> Interned<T> {
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn holders(this: &Self) -> usize {
        Arc::strong_count(&this.entry)
    }
}

impl<T: Send + Sync + 'static> Clone for Interned<T> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<T: Send + Sync + 'static> Deref for Interned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entry.value
    }
}

impl<T: Send + Sync + 'static> PartialEq for Interned<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl<T: Send + Sync + 'static> Eq for Interned<T> {}

impl<T: Send + Sync + 'static> Hash for Interned<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entry.id.hash(state);
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Interned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interned(#{} {})", self.entry.id, self.entry.name)
    }
}

pub struct Interner<T: Send + Sync + 'static> {
    table: Arc<EntryTable<T>>,
}

impl<T: Send + Sync + 'static> Default for Interner<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Interner<T> {
    pub fn new() -> Self {
        Self {
            table: Arc::new(SharedCache::new(Reclaim::Weak)),
        }
    }

    /// Returns the live handle for `name`, or creates one from `make(name)`.
    /// `make` runs at most once per call and only on a miss.
    pub fn intern_with(&self, name: &str, make: impl FnOnce(&str) -> T) -> Interned<T> {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let name: Arc<str> = Arc::from(name);
        let back_ref = Arc::downgrade(&self.table);
        let entry = self.table.get_or_insert_with(Arc::clone(&name), || {
            Arc::new(Entry {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                value: make(&*name),
                name: Arc::clone(&name),
                table: back_ref,
            })
        });
        Interned { entry }
    }

    pub fn get(&self, name: &str) -> Option<Interned<T>> {
        self.table.get(name).map(|entry| Interned { entry })
    }

    /// Number of names with at least one live handle.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
