//! A sharded, charge-bounded cache.
//!
//! The replacement policy is a small/main/ghost queue arrangement: new
//! entries land in a probationary `small` queue, entries touched at least
//! twice graduate to `main`, and keys evicted from `small` before proving
//! themselves are remembered in a `ghost` list so their next insertion goes
//! straight to `main`. Each entry carries a caller-supplied charge, and a
//! shard evicts until its total charge fits its capacity.
//!
//! Keys are hashed onto independently locked shards, so readers on
//! different shards never contend. An optional eviction hook observes every
//! entry that leaves the cache; the blob cache uses it to demote entries
//! into the secondary tier.

use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Maximum frequency limit for an entry in the cache.
const MAX_FREQUENCY_LIMIT: u8 = 3;

/// Keys remembered per shard after eviction from the probationary queue.
const GHOST_LIMIT: usize = 256;

/// Observes entries as they are evicted.
pub type EvictionHook<K, V> = Box<dyn Fn(&K, &V) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Queue {
    Small,
    Main,
}

struct Entry<V> {
    value: V,
    charge: u64,
    freq: u8,
    queue: Queue,
}

struct Shard<K, V> {
    capacity: u64,
    small_target: u64,
    used: u64,
    small: VecDeque<K>,
    main: VecDeque<K>,
    ghost: VecDeque<K>,
    entries: HashMap<K, Entry<V>>,
}

impl<K, V> Shard<K, V>
where
    K: PartialEq + Eq + Hash + Clone,
    V: Clone,
{
    fn new(capacity: u64) -> Self {
        Self {
            capacity,
            small_target: capacity / 10,
            used: 0,
            small: VecDeque::new(),
            main: VecDeque::new(),
            ghost: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.get_mut(key)?;
        entry.freq = entry.freq.saturating_add(1).min(MAX_FREQUENCY_LIMIT);
        Some(entry.value.clone())
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn insert(&mut self, key: K, value: V, charge: u64, hook: Option<&EvictionHook<K, V>>) -> Result<()> {
        if charge > self.capacity {
            return Err(Error::CacheFull);
        }

        if let Some(entry) = self.entries.get_mut(&key) {
            self.used = self.used - entry.charge + charge;
            entry.value = value;
            entry.charge = charge;
        } else {
            // A ghost hit means the key was evicted before it could prove
            // itself; admit it straight into main.
            let queue = if let Some(pos) = self.ghost.iter().position(|k| k == &key) {
                self.ghost.remove(pos);
                Queue::Main
            } else {
                Queue::Small
            };
            match queue {
                Queue::Small => self.small.push_back(key.clone()),
                Queue::Main => self.main.push_back(key.clone()),
            }
            self.used += charge;
            self.entries.insert(
                key,
                Entry {
                    value,
                    charge,
                    freq: 0,
                    queue,
                },
            );
        }

        while self.used > self.capacity {
            if !self.evict_one(hook) {
                return Err(Error::CacheFull);
            }
        }
        Ok(())
    }

    fn main_used(&self) -> u64 {
        self.main
            .iter()
            .filter_map(|k| self.entries.get(k))
            .map(|e| e.charge)
            .sum()
    }

    fn evict_one(&mut self, hook: Option<&EvictionHook<K, V>>) -> bool {
        let evict_from_main =
            self.small.is_empty() || self.main_used() >= self.capacity - self.small_target;
        if evict_from_main {
            self.evict_main(hook)
        } else {
            self.evict_small(hook)
        }
    }

    fn evict_small(&mut self, hook: Option<&EvictionHook<K, V>>) -> bool {
        while let Some(key) = self.small.pop_front() {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            if entry.freq > 1 {
                entry.queue = Queue::Main;
                self.main.push_back(key);
            } else {
                self.remove_entry(&key, hook);
                self.remember_ghost(key);
                return true;
            }
        }
        false
    }

    fn evict_main(&mut self, hook: Option<&EvictionHook<K, V>>) -> bool {
        let mut rotations = self.main.len().saturating_mul(MAX_FREQUENCY_LIMIT as usize) + 1;
        while let Some(key) = self.main.pop_front() {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            if entry.freq > 0 && rotations > 0 {
                entry.freq -= 1;
                rotations -= 1;
                self.main.push_back(key);
            } else {
                self.remove_entry(&key, hook);
                return true;
            }
        }
        false
    }

    fn remove_entry(&mut self, key: &K, hook: Option<&EvictionHook<K, V>>) {
        if let Some(entry) = self.entries.remove(key) {
            self.used -= entry.charge;
            if let Some(hook) = hook {
                hook(key, &entry.value);
            }
        }
    }

    fn remember_ghost(&mut self, key: K) {
        if self.ghost.len() >= GHOST_LIMIT {
            self.ghost.pop_front();
        }
        self.ghost.push_back(key);
    }

    fn clear(&mut self) {
        self.small.clear();
        self.main.clear();
        self.ghost.clear();
        self.entries.clear();
        self.used = 0;
    }
}

/// The cache proper. Clone-cheap values (`Arc`s) are expected.
pub struct Cache<K, V>
where
    K: PartialEq + Eq + Hash + Clone,
    V: Clone,
{
    shards: Vec<Mutex<Shard<K, V>>>,
    hook: Option<EvictionHook<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> Cache<K, V>
where
    K: PartialEq + Eq + Hash + Clone,
    V: Clone,
{
    /// A cache with `capacity` total charge spread over `num_shards`
    /// independently locked shards.
    pub fn new(capacity: u64, num_shards: usize, hook: Option<EvictionHook<K, V>>) -> Self {
        let num_shards = num_shards.max(1);
        let per_shard = (capacity / num_shards as u64).max(1);
        Self {
            shards: (0..num_shards)
                .map(|_| Mutex::new(Shard::new(per_shard)))
                .collect(),
            hook,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Returns a clone of the cached value, bumping its frequency.
    pub fn get(&self, key: &K) -> Option<V> {
        let found = self.shard(key).lock().unwrap().get(key);
        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Membership probe; does not touch frequencies or hit/miss counters.
    pub fn contains(&self, key: &K) -> bool {
        self.shard(key).lock().unwrap().contains(key)
    }

    /// Inserts an entry with the given charge, evicting as needed. Fails
    /// with `Error::CacheFull` when the entry can never fit.
    pub fn insert(&self, key: K, value: V, charge: u64) -> Result<()> {
        self.shard(&key)
            .lock()
            .unwrap()
            .insert(key, value, charge, self.hook.as_ref())
    }

    /// Total charge currently held.
    pub fn usage(&self) -> u64 {
        self.shards.iter().map(|s| s.lock().unwrap().used).sum()
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap().entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry without running the eviction hook.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().unwrap().clear();
        }
    }

    /// (hits, misses) observed by `get`.
    pub fn hit_miss_counts(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    fn assert_opt_eq<V: PartialEq + std::fmt::Debug>(opt: Option<V>, v: V) {
        assert!(opt.is_some());
        assert_eq!(opt.unwrap(), v);
    }

    #[test]
    fn insert_and_read_back() {
        let cache: Cache<&str, &str> = Cache::new(16, 1, None);
        cache.insert("apple", "red", 1).unwrap();
        cache.insert("banana", "yellow", 1).unwrap();

        assert_opt_eq(cache.get(&"apple"), "red");
        assert_opt_eq(cache.get(&"banana"), "yellow");
        assert_eq!(cache.hit_miss_counts(), (2, 0));
        assert_eq!(cache.get(&"pear"), None);
        assert_eq!(cache.hit_miss_counts(), (2, 1));
    }

    #[test]
    fn charge_based_eviction() {
        let cache: Cache<u32, u32> = Cache::new(10, 1, None);
        for i in 0..10 {
            cache.insert(i, i, 2).unwrap();
        }
        assert!(cache.usage() <= 10);
        assert!(cache.len() <= 5);
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let cache: Cache<u32, u32> = Cache::new(8, 1, None);
        assert_eq!(cache.insert(1, 1, 9), Err(Error::CacheFull));
        assert!(cache.is_empty());
    }

    #[test]
    fn replacing_a_key_updates_charge() {
        let cache: Cache<&str, u32> = Cache::new(10, 1, None);
        cache.insert("k", 1, 4).unwrap();
        cache.insert("k", 2, 6).unwrap();
        assert_eq!(cache.usage(), 6);
        assert_opt_eq(cache.get(&"k"), 2);
    }

    #[test]
    fn frequently_read_entries_survive_scans() {
        let cache: Cache<u32, u32> = Cache::new(8, 1, None);
        cache.insert(0, 0, 1).unwrap();
        // Read the hot entry enough to graduate it.
        for _ in 0..3 {
            cache.get(&0);
        }
        // Scan a stream of cold entries through the cache.
        for i in 1..100 {
            cache.insert(i, i, 1).unwrap();
        }
        assert!(cache.contains(&0), "hot entry was evicted by a cold scan");
    }

    #[test]
    fn eviction_hook_sees_evicted_entries() {
        let evicted = Arc::new(StdMutex::new(Vec::new()));
        let hook: EvictionHook<u32, u32> = {
            let evicted = Arc::clone(&evicted);
            Box::new(move |k, v| evicted.lock().unwrap().push((*k, *v)))
        };

        let cache: Cache<u32, u32> = Cache::new(2, 1, Some(hook));
        cache.insert(1, 10, 1).unwrap();
        cache.insert(2, 20, 1).unwrap();
        cache.insert(3, 30, 1).unwrap();

        let evicted = evicted.lock().unwrap();
        assert!(!evicted.is_empty());
        for (k, v) in evicted.iter() {
            assert_eq!(*v, k * 10);
        }
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache: Cache<u32, u32> = Cache::new(16, 4, None);
        for i in 0..8 {
            cache.insert(i, i, 1).unwrap();
        }
        assert_eq!(cache.len(), 8);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.usage(), 0);
    }

    #[test]
    fn concurrent_readers_and_writers() {
        use std::thread;

        let cache: Arc<Cache<u64, u64>> = Arc::new(Cache::new(1024, 8, None));
        let mut handles = vec![];
        for t in 0..8u64 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for i in 0..200u64 {
                    let key = t * 1000 + i;
                    cache.insert(key, key * 2, 1).unwrap();
                    if let Some(v) = cache.get(&key) {
                        assert_eq!(v, key * 2);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.usage() <= 1024);
    }
}
