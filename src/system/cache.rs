use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A time-based cache with an entry limit.
///
/// A capacity of zero disables the cache: inserts are dropped.
#[derive(Debug)]
pub struct Cache<T> {
    data: HashMap<String, CacheEntry<T>>,
    default_ttl: Duration,
    capacity: usize,
}

#[derive(Debug)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Cache<T> {
    /// Create an unbounded cache with default TTL
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_capacity(default_ttl, usize::MAX)
    }

    /// Create a cache holding at most `capacity` entries
    pub fn with_capacity(default_ttl: Duration, capacity: usize) -> Self {
        Self {
            data: HashMap::new(),
            default_ttl,
            capacity,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0 && !self.default_ttl.is_zero()
    }

    /// Get a value from cache if it exists and hasn't expired
    pub fn get(&self, key: &str) -> Option<&T> {
        self.data
            .get(key)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| &entry.value)
    }

    /// Insert a value into cache with default TTL
    pub fn insert(&mut self, key: String, value: T) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Insert a value into cache with custom TTL
    pub fn insert_with_ttl(&mut self, key: String, value: T, ttl: Duration) {
        if self.capacity == 0 {
            return;
        }
        if !self.data.contains_key(&key) && self.data.len() >= self.capacity {
            self.cleanup();
            if self.data.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        let expires_at = Instant::now() + ttl;
        self.data.insert(key, CacheEntry { value, expires_at });
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        self.data.remove(key).map(|entry| entry.value)
    }

    /// Keep only entries for which `keep` returns true
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &mut T) -> bool,
    {
        self.data.retain(|key, entry| keep(key, &mut entry.value));
    }

    /// Iterate over live entries
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        let now = Instant::now();
        self.data
            .iter()
            .filter(move |(_, entry)| now < entry.expires_at)
            .map(|(key, entry)| (key.as_str(), &entry.value))
    }

    /// Remove expired entries from cache
    pub fn cleanup(&mut self) {
        let now = Instant::now();
        self.data.retain(|_, entry| now < entry.expires_at);
    }

    /// Clear all entries from cache
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Get the number of entries in cache (including expired ones)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .data
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.data.remove(&key);
        }
    }
}

impl<T> Default for Cache<T> {
    fn default() -> Self {
        // Same default lifetime as the daemon's memcache_timeout
        Self::new(Duration::from_secs(300))
    }
}
