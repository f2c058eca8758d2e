//! Query result cache: size-bounded LRU with per-entry TTL.
//!
//! Backs C-FIND execution; identical canonical queries within the
//! TTL are served from memory. Statistics are plain atomics and can
//! be read at any time without taking the cache lock.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
}

impl CacheStats {
    /// `hits / (hits + misses)`, 0 when there were no accesses.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A thread-safe LRU cache with per-entry time-to-live.
pub struct QueryCache<V> {
    entries: Mutex<LruCache<String, Entry<V>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone> QueryCache<V> {
    /// Create a cache bounded to `capacity` entries,
    /// each living for `ttl` past its insertion or refresh.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        QueryCache {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Look up a key, refreshing its recency on a hit.
    /// An expired entry is removed and counts as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let live = match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match live {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                entries.pop(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or refresh an entry, evicting from the tail while full.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        let mut entries = self.entries.lock();
        let displaced = entries.push(key.clone(), entry);
        self.insertions.fetch_add(1, Ordering::Relaxed);
        // same-key replacement is a refresh, not an eviction
        if matches!(displaced, Some((old_key, _)) if old_key != key) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove one entry.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Remove every entry whose key satisfies the predicate.
    pub fn invalidate_if(&self, mut predicate: impl FnMut(&str) -> bool) -> usize {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    /// Drop all expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        self.expirations
            .fetch_add(doomed.len() as u64, Ordering::Relaxed);
        doomed.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// The number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}

/// Build the canonical cache key of a query:
/// `[calling_ae/]level:name=value;...` with parameters sorted by name.
pub fn canonical_key(calling_ae: Option<&str>, level: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let joined = sorted
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(";");
    match calling_ae {
        Some(ae) => format!("{}/{}:{}", ae, level, joined),
        None => format!("{}:{}", level, joined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn capacity_bound_evicts_the_tail() {
        let cache = QueryCache::new(2, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        // touch "a" so "b" becomes the tail
        assert_eq!(cache.get("a"), Some(1));
        cache.put("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.insertions, 3);
    }

    #[test]
    fn ttl_expiry_counts_as_miss() {
        let cache = QueryCache::new(8, Duration::from_millis(20));
        cache.put("k", 42);
        assert_eq!(cache.get("k"), Some(42));
        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn hits_plus_misses_equals_gets() {
        let cache = QueryCache::new(4, Duration::from_secs(60));
        cache.put("x", 1);
        for _ in 0..5 {
            cache.get("x");
        }
        for _ in 0..3 {
            cache.get("missing");
        }
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 8);
        assert!((stats.hit_rate() - 5.0 / 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalidate_if_removes_matching_keys() {
        let cache = QueryCache::new(8, Duration::from_secs(60));
        cache.put("STUDY:PatientID=1", 1);
        cache.put("STUDY:PatientID=2", 2);
        cache.put("SERIES:StudyUID=9", 3);

        let removed = cache.invalidate_if(|key| key.starts_with("STUDY:"));
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("SERIES:StudyUID=9"), Some(3));
    }

    #[test]
    fn purge_expired_reports_count() {
        let cache = QueryCache::new(8, Duration::from_millis(10));
        cache.put("a", 1);
        cache.put("b", 2);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn canonical_key_sorts_parameters() {
        let params = vec![
            ("StudyDate".to_string(), "20240101-20240131".to_string()),
            ("PatientID".to_string(), "12345".to_string()),
        ];
        assert_eq!(
            canonical_key(None, "STUDY", &params),
            "STUDY:PatientID=12345;StudyDate=20240101-20240131"
        );
        assert_eq!(
            canonical_key(Some("FINDSCU"), "STUDY", &params),
            "FINDSCU/STUDY:PatientID=12345;StudyDate=20240101-20240131"
        );
        assert_eq!(canonical_key(None, "STUDY", &[]), "STUDY:");
    }
}
