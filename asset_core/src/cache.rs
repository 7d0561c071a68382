//! Keyed value tables with a choice of reclamation policy.
//!
//! * [`Reclaim::Strong`] keeps every value until it is removed.
//! * [`Reclaim::Soft`] keeps values until the total weight exceeds the byte
//!   budget, then drops least-recently-used entries.
//! * [`Reclaim::Weak`] never keeps a value alive; an entry disappears as soon
//!   as the last outside `Arc` is dropped.
//!
//! [`LocalCache`] is the single-threaded form, [`SharedCache`] guards the
//! same table with a mutex. The shared form never runs eviction hooks or
//! drops evicted values while holding its lock.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use lru::LruCache;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reclaim {
    Strong,
    Soft,
    Weak,
}

pub type Weigher<V> = Arc<dyn Fn(&V) -> usize + Send + Sync>;
pub type EvictionHook<K, V> = Arc<dyn Fn(&K, &Arc<V>) + Send + Sync>;

type Evicted<K, V> = Vec<(K, Arc<V>)>;

struct SoftEntry<V: ?Sized> {
    value: Arc<V>,
    weight: usize,
}

enum Slots<K: Hash + Eq, V: ?Sized> {
    Strong(HashMap<K, Arc<V>>),
    Soft {
        entries: LruCache<K, SoftEntry<V>>,
        weight: usize,
    },
    Weak(HashMap<K, Weak<V>>),
}

struct Table<K: Hash + Eq, V: ?Sized> {
    slots: Slots<K, V>,
    budget: usize,
    weigher: Option<Weigher<V>>,
}

impl<K: Hash + Eq + Clone, V: ?Sized> Table<K, V> {
    fn new(reclaim: Reclaim) -> Self {
        let slots = match reclaim {
            Reclaim::Strong => Slots::Strong(HashMap::new()),
            Reclaim::Soft => Slots::Soft {
                entries: LruCache::unbounded(),
                weight: 0,
            },
            Reclaim::Weak => Slots::Weak(HashMap::new()),
        };
        Self {
            slots,
            budget: usize::MAX,
            weigher: None,
        }
    }

    fn reclaim(&self) -> Reclaim {
        match self.slots {
            Slots::Strong(_) => Reclaim::Strong,
            Slots::Soft { .. } => Reclaim::Soft,
            Slots::Weak(_) => Reclaim::Weak,
        }
    }

    fn weigh(&self, value: &V) -> usize {
        self.weigher.as_ref().map_or(1, |weigher| weigher(value))
    }

    fn get<Q>(&mut self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match &mut self.slots {
            Slots::Strong(map) => map.get(key).cloned(),
            Slots::Soft { entries, .. } => entries.get(key).map(|entry| Arc::clone(&entry.value)),
            Slots::Weak(map) => {
                let live = map.get(key)?.upgrade();
                if live.is_none() {
                    map.remove(key);
                }
                live
            }
        }
    }

    fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match &self.slots {
            Slots::Strong(map) => map.contains_key(key),
            Slots::Soft { entries, .. } => entries.contains(key),
            Slots::Weak(map) => map.get(key).is_some_and(|weak| weak.strong_count() > 0),
        }
    }

    fn put(&mut self, key: K, value: Arc<V>, evicted: &mut Evicted<K, V>) -> Option<Arc<V>> {
        let new_weight = match self.slots {
            Slots::Soft { .. } => self.weigh(&value),
            _ => 0,
        };
        let budget = self.budget;
        match &mut self.slots {
            Slots::Strong(map) => map.insert(key, value),
            Slots::Soft { entries, weight } => {
                let previous = entries.put(
                    key,
                    SoftEntry {
                        value,
                        weight: new_weight,
                    },
                );
                *weight = weight.saturating_add(new_weight);
                if let Some(old) = &previous {
                    *weight = weight.saturating_sub(old.weight);
                }
                // The newest entry is never evicted by its own insertion.
                while *weight > budget && entries.len() > 1 {
                    match entries.pop_lru() {
                        Some((old_key, old)) => {
                            *weight = weight.saturating_sub(old.weight);
                            evicted.push((old_key, old.value));
                        }
                        None => break,
                    }
                }
                previous.map(|old| old.value)
            }
            Slots::Weak(map) => map
                .insert(key, Arc::downgrade(&value))
                .and_then(|old| old.upgrade()),
        }
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match &mut self.slots {
            Slots::Strong(map) => map.remove(key),
            Slots::Soft { entries, weight } => {
                let old = entries.pop(key)?;
                *weight = weight.saturating_sub(old.weight);
                Some(old.value)
            }
            Slots::Weak(map) => map.remove(key).and_then(|old| old.upgrade()),
        }
    }

    /// Removes the entry only if it is a dead weak reference.
    fn purge_key<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match &mut self.slots {
            Slots::Weak(map) => {
                let dead = map.get(key).is_some_and(|weak| weak.strong_count() == 0);
                if dead {
                    map.remove(key);
                }
                dead
            }
            _ => false,
        }
    }

    fn purge(&mut self) -> usize {
        match &mut self.slots {
            Slots::Weak(map) => {
                let before = map.len();
                map.retain(|_, weak| weak.strong_count() > 0);
                before - map.len()
            }
            _ => 0,
        }
    }

    fn clear(&mut self) -> Vec<Arc<V>> {
        match &mut self.slots {
            Slots::Strong(map) => map.drain().map(|(_, value)| value).collect(),
            Slots::Soft { entries, weight } => {
                *weight = 0;
                let mut values = Vec::with_capacity(entries.len());
                while let Some((_, entry)) = entries.pop_lru() {
                    values.push(entry.value);
                }
                values
            }
            Slots::Weak(map) => {
                map.clear();
                Vec::new()
            }
        }
    }

    fn len(&mut self) -> usize {
        self.purge();
        match &self.slots {
            Slots::Strong(map) => map.len(),
            Slots::Soft { entries, .. } => entries.len(),
            Slots::Weak(map) => map.len(),
        }
    }

    fn keys(&self) -> Vec<K> {
        match &self.slots {
            Slots::Strong(map) => map.keys().cloned().collect(),
            Slots::Soft { entries, .. } => entries.iter().map(|(key, _)| key.clone()).collect(),
            Slots::Weak(map) => map
                .iter()
                .filter(|(_, weak)| weak.strong_count() > 0)
                .map(|(key, _)| key.clone())
                .collect(),
        }
    }

    fn weight(&self) -> usize {
        match &self.slots {
            Slots::Soft { weight, .. } => *weight,
            Slots::Strong(map) => map.len(),
            Slots::Weak(map) => map.len(),
        }
    }
}

/// Single-threaded cache; eviction hooks run inline.
pub struct LocalCache<K: Hash + Eq, V: ?Sized> {
    table: Table<K, V>,
    on_evict: Option<EvictionHook<K, V>>,
}

impl<K: Hash + Eq + Clone, V: ?Sized> LocalCache<K, V> {
    pub fn new(reclaim: Reclaim) -> Self {
        Self {
            table: Table::new(reclaim),
            on_evict: None,
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.table.budget = budget;
        self
    }

    pub fn with_weigher(mut self, weigher: Weigher<V>) -> Self {
        self.table.weigher = Some(weigher);
        self
    }

    pub fn with_eviction_hook(mut self, hook: EvictionHook<K, V>) -> Self {
        self.on_evict = Some(hook);
        self
    }

    pub fn reclaim(&self) -> Reclaim {
        self.table.reclaim()
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(key)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.contains(key)
    }

    pub fn put(&mut self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        let mut evicted = Vec::new();
        let previous = self.table.put(key, value, &mut evicted);
        self.report(evicted);
        previous
    }

    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> Arc<V>) -> Arc<V> {
        if let Some(value) = self.table.get(&key) {
            return value;
        }
        let value = make();
        self.put(key, Arc::clone(&value));
        value
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.remove(key)
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn purge(&mut self) -> usize {
        self.table.purge()
    }

    pub fn len(&mut self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        self.table.keys()
    }

    pub fn weight(&self) -> usize {
        self.table.weight()
    }

    fn report(&self, evicted: Evicted<K, V>) {
        if let Some(hook) = &self.on_evict {
            for (key, value) in &evicted {
                hook(key, value);
            }
        }
    }
}

/// Thread-safe cache; every operation is atomic with respect to the table.
pub struct SharedCache<K: Hash + Eq, V: ?Sized> {
    table: Mutex<Table<K, V>>,
    on_evict: Option<EvictionHook<K, V>>,
}

impl<K: Hash + Eq + Clone, V: ?Sized> SharedCache<K, V> {
    pub fn new(reclaim: Reclaim) -> Self {
        Self {
            table: Mutex::new(Table::new(reclaim)),
            on_evict: None,
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.table_mut().budget = budget;
        self
    }

    pub fn with_weigher(mut self, weigher: Weigher<V>) -> Self {
        self.table_mut().weigher = Some(weigher);
        self
    }

    pub fn with_eviction_hook(mut self, hook: EvictionHook<K, V>) -> Self {
        self.on_evict = Some(hook);
        self
    }

    fn table_mut(&mut self) -> &mut Table<K, V> {
        self.table.get_mut().expect("cache lock poisoned")
    }

    fn lock(&self) -> MutexGuard<'_, Table<K, V>> {
        self.table.lock().expect("cache lock poisoned")
    }

    pub fn reclaim(&self) -> Reclaim {
        self.lock().reclaim()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().get(key)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().contains(key)
    }

    pub fn put(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        let mut evicted = Vec::new();
        let previous = self.lock().put(key, value, &mut evicted);
        self.report(evicted);
        previous
    }

    /// Looks up `key` and inserts `make()` on a miss, under one lock hold.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> Arc<V>) -> Arc<V> {
        let mut evicted = Vec::new();
        let (value, replaced) = {
            let mut table = self.lock();
            match table.get(&key) {
                Some(value) => (value, None),
                None => {
                    let value = make();
                    let replaced = table.put(key, Arc::clone(&value), &mut evicted);
                    (value, replaced)
                }
            }
        };
        drop(replaced);
        self.report(evicted);
        value
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().remove(key)
    }

    pub fn purge_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().purge_key(key)
    }

    pub fn clear(&self) {
        let values = self.lock().clear();
        drop(values);
    }

    pub fn purge(&self) -> usize {
        self.lock().purge()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        self.lock().keys()
    }

    pub fn weight(&self) -> usize {
        self.lock().weight()
    }

    fn report(&self, evicted: Evicted<K, V>) {
        if let Some(hook) = &self.on_evict {
            for (key, value) in &evicted {
                hook(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn strong_keeps_values_until_removed() {
        let mut cache: LocalCache<String, u32> = LocalCache::new(Reclaim::Strong);
        let value = Arc::new(7);
        cache.put("a".to_string(), Arc::clone(&value));
        drop(value);
        assert_eq!(cache.get("a").as_deref(), Some(&7));
        assert_eq!(cache.remove("a").as_deref(), Some(&7));
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn weak_entry_vanishes_with_last_holder() {
        let mut cache: LocalCache<String, String> = LocalCache::new(Reclaim::Weak);
        let held = Arc::new("texture".to_string());
        cache.put("t".to_string(), Arc::clone(&held));
        assert!(cache.contains("t"));
        assert!(Arc::ptr_eq(&cache.get("t").unwrap(), &held));
        drop(held);
        assert!(!cache.contains("t"));
        assert!(cache.get("t").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn weak_purge_counts_dead_entries() {
        let cache: SharedCache<u32, u32> = SharedCache::new(Reclaim::Weak);
        let keep = Arc::new(1);
        cache.put(1, Arc::clone(&keep));
        cache.put(2, Arc::new(2));
        cache.put(3, Arc::new(3));
        assert_eq!(cache.purge(), 2);
        assert_eq!(cache.keys(), vec![1]);
        assert!(!cache.purge_key(&1));
    }

    #[test]
    fn soft_evicts_least_recently_used_over_budget() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evictions);
        let mut cache: LocalCache<&'static str, Vec<u8>> = LocalCache::new(Reclaim::Soft)
            .with_budget(10)
            .with_weigher(Arc::new(|bytes: &Vec<u8>| bytes.len()))
            .with_eviction_hook(Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        cache.put("a", Arc::new(vec![0; 4]));
        cache.put("b", Arc::new(vec![0; 4]));
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.put("c", Arc::new(vec![0; 4]));
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.weight(), 8);
        assert_eq!(evictions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn soft_keeps_single_oversized_entry() {
        let cache: SharedCache<u8, Vec<u8>> = SharedCache::new(Reclaim::Soft)
            .with_budget(2)
            .with_weigher(Arc::new(|bytes: &Vec<u8>| bytes.len()));
        cache.put(1, Arc::new(vec![0; 8]));
        assert_eq!(cache.len(), 1);
        cache.put(2, Arc::new(vec![0; 8]));
        assert_eq!(cache.keys(), vec![2]);
    }

    #[test]
    fn soft_replace_adjusts_weight() {
        let cache: SharedCache<u8, Vec<u8>> = SharedCache::new(Reclaim::Soft)
            .with_weigher(Arc::new(|bytes: &Vec<u8>| bytes.len()));
        cache.put(1, Arc::new(vec![0; 8]));
        let previous = cache.put(1, Arc::new(vec![0; 3]));
        assert_eq!(previous.map(|bytes| bytes.len()), Some(8));
        assert_eq!(cache.weight(), 3);
        cache.clear();
        assert_eq!(cache.weight(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn shared_get_or_insert_runs_factory_once() {
        let cache: Arc<SharedCache<u32, u32>> = Arc::new(SharedCache::new(Reclaim::Strong));
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    cache.get_or_insert_with(5, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Arc::new(50)
                    })
                })
            })
            .collect();
        let values: Vec<Arc<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|value| Arc::ptr_eq(value, &values[0])));
    }

    #[test]
    fn unsized_values_are_supported() {
        let cache: SharedCache<u8, dyn Fn() -> u8 + Send + Sync> = SharedCache::new(Reclaim::Strong);
        cache.put(1, Arc::new(|| 9));
        let f = cache.get(&1).unwrap();
        assert_eq!(f(), 9);
        assert_eq!(cache.reclaim(), Reclaim::Strong);
    }
}
