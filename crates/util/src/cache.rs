//! Key/value cache capability and its bounded LRU implementation.
//!
//! Metadata stores and the IO cache only see [`Cache`]; whether entries
//! expire, how many are kept and what happens on eviction is decided by
//! whoever constructs the cache.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Get/Set/Del over cloned values. Implementations must be safe to share
/// between tasks.
///
/// A reader that fills the cache after a database miss reads [`epoch`]
/// before its query and stores the row with [`fill`]. Every `del` advances
/// the epoch, so a row read before a concurrent write committed and
/// invalidated is dropped instead of cached.
///
/// [`epoch`]: Cache::epoch
/// [`fill`]: Cache::fill
pub trait Cache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn set(&self, key: K, value: V);
    fn del(&self, key: &K);
    fn epoch(&self) -> u64;
    /// `set`, unless a `del` happened since `epoch` was read.
    fn fill(&self, key: K, value: V, epoch: u64);
}

/// A cache that never holds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl<K, V> Cache<K, V> for NoCache {
    fn get(&self, _key: &K) -> Option<V> {
        None
    }
    fn set(&self, _key: K, _value: V) {}
    fn del(&self, _key: &K) {}
    fn epoch(&self) -> u64 {
        0
    }
    fn fill(&self, _key: K, _value: V, _epoch: u64) {}
}

type EvictFn<K, V> = Box<dyn Fn(&K, V) + Send + Sync>;

struct Slot<V> {
    value: V,
    tick: u64,
    expires_at: Option<Instant>,
}

struct Inner<K, V> {
    slots: HashMap<K, Slot<V>>,
    /// Recency order: lowest tick is least recently used.
    order: BTreeMap<u64, K>,
    next_tick: u64,
    /// Number of `del` calls so far.
    epoch: u64,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn touch(&mut self, key: &K) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(slot) = self.slots.get_mut(key) {
            self.order.remove(&slot.tick);
            slot.tick = tick;
            self.order.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot.value)
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let slot = self.slots.remove(&key)?;
        Some((key, slot.value))
    }
}

/// Bounded least-recently-used cache with an optional time-to-live.
///
/// Entries pushed out by capacity pressure or found expired are handed to
/// the eviction callback (if any) after the internal lock is released.
/// Explicit [`del`](Cache::del) and replacement through
/// [`set`](Cache::set) do not trigger it.
pub struct LruCache<K, V> {
    capacity: usize,
    ttl: Option<Duration>,
    inner: Mutex<Inner<K, V>>,
    on_evict: Option<EvictFn<K, V>>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    /// A capacity of zero produces a cache that stores nothing.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner { slots: HashMap::new(), order: BTreeMap::new(), next_tick: 0, epoch: 0 }),
            on_evict: None,
        }
    }

    pub fn with_evict(mut self, on_evict: impl Fn(&K, V) + Send + Sync + 'static) -> Self {
        self.on_evict = Some(Box::new(on_evict));
        self
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, mut inner: MutexGuard<'_, Inner<K, V>>, key: K, value: V) {
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        let mut evicted = Vec::new();
        inner.remove(&key);
        while inner.slots.len() >= self.capacity {
            match inner.pop_oldest() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.order.insert(tick, key.clone());
        inner.slots.insert(key, Slot { value, tick, expires_at });
        drop(inner);
        self.evicted(evicted);
    }

    fn evicted(&self, entries: Vec<(K, V)>) {
        if let Some(on_evict) = &self.on_evict {
            for (key, value) in entries {
                on_evict(&key, value);
            }
        }
    }
}

impl<K, V> Cache<K, V> for LruCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let expired = inner.slots.get(key)?.expires_at.is_some_and(|at| at <= Instant::now());
        if expired {
            let value = inner.remove(key);
            drop(inner);
            self.evicted(value.map(|v| vec![(key.clone(), v)]).unwrap_or_default());
            return None;
        }
        inner.touch(key);
        inner.slots.get(key).map(|slot| slot.value.clone())
    }

    fn set(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        self.insert(self.lock(), key, value);
    }

    fn del(&self, key: &K) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.remove(key);
    }

    fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    fn fill(&self, key: K, value: V, epoch: u64) {
        if self.capacity == 0 {
            return;
        }
        let inner = self.lock();
        if inner.epoch != epoch {
            return;
        }
        self.insert(inner, key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_get_set_del() {
        let cache = LruCache::new(4, None);
        assert_eq!(cache.get(&1), None);
        cache.set(1, "one");
        assert_eq!(cache.get(&1), Some("one"));
        cache.set(1, "uno");
        assert_eq!(cache.get(&1), Some("uno"));
        assert_eq!(cache.len(), 1);
        cache.del(&1);
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = LruCache::new(2, None);
        cache.set("a", 1);
        cache.set("b", 2);
        // Reading "a" makes "b" the oldest.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.set("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_eviction_callback() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&evicted);
        let cache = LruCache::new(1, None).with_evict(move |key: &u32, value: String| {
            sink.lock().unwrap().push((*key, value));
        });
        cache.set(1, "first".to_string());
        // Replacing and deleting are not evictions.
        cache.set(1, "again".to_string());
        cache.set(2, "second".to_string());
        cache.del(&2);
        assert_eq!(*evicted.lock().unwrap(), vec![(1, "again".to_string())]);
    }

    #[test]
    fn test_entries_expire() {
        let cache = LruCache::new(8, Some(Duration::from_millis(20)));
        cache.set("k", 1);
        assert_eq!(cache.get(&"k"), Some(1));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = LruCache::new(0, None);
        cache.set(1, 1);
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn test_fill_after_del_is_dropped() {
        let cache = LruCache::new(4, None);
        let epoch = cache.epoch();
        cache.fill("a", 1, epoch);
        assert_eq!(cache.get(&"a"), Some(1));

        // A row read before this invalidation must not land in the cache.
        let stale = cache.epoch();
        cache.del(&"b");
        cache.fill("b", 2, stale);
        assert_eq!(cache.get(&"b"), None);

        cache.fill("b", 2, cache.epoch());
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn test_usable_as_trait_object() {
        let cache: Arc<dyn Cache<u64, u64>> = Arc::new(LruCache::new(2, None));
        cache.set(7, 49);
        assert_eq!(cache.get(&7), Some(49));
        let none: Arc<dyn Cache<u64, u64>> = Arc::new(NoCache);
        none.set(7, 49);
        assert_eq!(none.get(&7), None);
    }
}
