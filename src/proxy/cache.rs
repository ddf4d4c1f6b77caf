//! Bounded TTL + LRU cache.
//!
//! Expired entries are invisible to `get` even before a sweep removes them.
//! When full, an insert first drops expired entries and then, if still
//! full, the least recently accessed one.

use {
    crate::config::CacheConfig,
    parking_lot::Mutex,
    serde::Serialize,
    std::{
        collections::{BTreeMap, HashMap},
        hash::Hash,
        time::Duration,
    },
    tokio::time::Instant,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    inserted: Instant,
    ttl: Duration,
    /// Position in the recency order.
    tick: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted) >= self.ttl
    }
}

#[derive(Debug)]
struct CacheState<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// tick -> key, oldest access first.
    recency: BTreeMap<u64, K>,
    next_tick: u64,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V> CacheState<K, V> {
    fn touch(&mut self, key: &K) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }
}

/// Cache with a per-entry TTL and a capacity bound. Capacity or TTL of
/// zero disables it: inserts are dropped and every lookup misses.
#[derive(Debug)]
pub struct TtlLruCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    capacity: usize,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlLruCache<K, V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_tick: 0,
                stats: CacheStats::default(),
            }),
            capacity: config.capacity,
            ttl: config.ttl,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0 && !self.ttl.is_zero()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired = match state.entries.get(key) {
            None => {
                state.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            state.remove(key);
            state.stats.expirations += 1;
            state.stats.misses += 1;
            return None;
        }
        state.touch(key);
        state.stats.hits += 1;
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether a live entry exists. Does not count as an access.
    pub fn contains_key(&self, key: &K) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Store `value` under the default TTL. Returns the entry evicted to
    /// make room, if any.
    pub fn insert(&self, key: K, value: V) -> Option<(K, V)> {
        self.insert_with_ttl(key, value, self.ttl)
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) -> Option<(K, V)> {
        if self.capacity == 0 || ttl.is_zero() {
            return None;
        }
        let now = Instant::now();
        let mut state = self.state.lock();

        let mut evicted = None;
        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            state.purge_expired(now);
            if state.entries.len() >= self.capacity {
                let oldest = state.recency.first_key_value().map(|(_, k)| k.clone());
                if let Some(oldest) = oldest {
                    if let Some(entry) = state.remove(&oldest) {
                        state.stats.evictions += 1;
                        evicted = Some((oldest, entry.value));
                    }
                }
            }
        }

        let tick = state.next_tick;
        state.next_tick += 1;
        if let Some(previous) = state.entries.insert(
            key.clone(),
            Entry {
                value,
                inserted: now,
                ttl,
                tick,
            },
        ) {
            state.recency.remove(&previous.tick);
        }
        state.recency.insert(tick, key);
        evicted
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.state.lock().remove(key).map(|entry| entry.value)
    }

    /// Drop every entry whose key matches `predicate`.
    pub fn remove_where(&self, predicate: impl Fn(&K) -> bool) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<K> = state.entries.keys().filter(|k| predicate(k)).cloned().collect();
        for key in &doomed {
            state.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
    }

    /// Sweep expired entries. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.state.lock().purge_expired(Instant::now())
    }

    /// Stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}
