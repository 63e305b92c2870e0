//! Parse cache for frequently issued query strings.
//!
//! Parsed trees are immutable and shared through `Arc`, so a cached tree can
//! be handed to any number of concurrent pipelines. At most one parse runs
//! per distinct string: a thread asking for a string that is being parsed
//! waits on that string's slot instead of parsing it again.

use dashmap::DashMap;
use entql_lang::{LangError, Query};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// One cached string. The mutex is held for the duration of its parse.
#[derive(Debug, Default)]
struct CacheSlot {
    query: Mutex<Option<Arc<Query>>>,
    hit_count: AtomicU64,
}

impl CacheSlot {
    fn record_hit(&self) -> u64 {
        self.hit_count.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }

    fn hits(&self) -> u64 {
        self.hit_count.load(AtomicOrdering::Relaxed)
    }

    /// Holds a parsed tree and no parse is running on it.
    fn is_settled(&self) -> bool {
        self.query.try_lock().is_some_and(|query| query.is_some())
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    parses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    /// Number of times the parser actually ran, failures included.
    pub fn parses(&self) -> u64 {
        self.parses.load(AtomicOrdering::Relaxed)
    }

    /// Get eviction count.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(AtomicOrdering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Concurrent map from query text to its parsed tree.
///
/// Parse failures are never cached. When the cache is full the parsed entry
/// with the fewest hits is evicted. Slots still being parsed are never
/// evicted, so the capacity may be exceeded by the number of in-flight
/// parses (and by racing inserts) until the next insert.
#[derive(Debug)]
pub struct ParseCache {
    slots: DashMap<String, Arc<CacheSlot>>,
    max_entries: usize,
    stats: CacheStats,
}

impl ParseCache {
    /// Create a cache holding at most `max_entries` parsed queries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            slots: DashMap::new(),
            max_entries: max_entries.max(1),
            stats: CacheStats::default(),
        }
    }

    /// Cached tree for `text`, parsing it with `parse` on a miss.
    pub fn get_or_parse<F>(&self, text: &str, parse: F) -> Result<Arc<Query>, LangError>
    where
        F: FnOnce(&str) -> Result<Query, LangError>,
    {
        let slot = self.slot(text);
        let mut guard = slot.query.lock();

        if let Some(query) = guard.as_ref() {
            let hits = slot.record_hit();
            self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
            tracing::trace!(hits, "parse cache hit");
            return Ok(Arc::clone(query));
        }

        self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
        self.stats.parses.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::trace!(len = text.len(), "parse cache miss");

        match parse(text) {
            Ok(query) => {
                let query = Arc::new(query);
                *guard = Some(Arc::clone(&query));
                Ok(query)
            }
            Err(err) => {
                drop(guard);
                self.slots
                    .remove_if(text, |_, existing| Arc::ptr_eq(existing, &slot));
                Err(err)
            }
        }
    }

    /// Existing slot for `text`, or a fresh empty one.
    fn slot(&self, text: &str) -> Arc<CacheSlot> {
        if let Some(slot) = self.slots.get(text).map(|r| Arc::clone(r.value())) {
            return slot;
        }
        if self.slots.len() >= self.max_entries {
            self.evict_least_hit();
        }
        let entry = self.slots.entry(text.to_string()).or_default();
        Arc::clone(entry.value())
    }

    /// Evict the parsed entry with the lowest hit count.
    fn evict_least_hit(&self) {
        let victim = self
            .slots
            .iter()
            .filter(|entry| entry.value().is_settled())
            .min_by_key(|entry| entry.value().hits())
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())));

        let Some((key, slot)) = victim else {
            tracing::trace!(len = self.slots.len(), "no settled entry to evict");
            return;
        };
        if self
            .slots
            .remove_if(&key, |_, existing| Arc::ptr_eq(existing, &slot))
            .is_some()
        {
            self.stats.evictions.fetch_add(1, AtomicOrdering::Relaxed);
            tracing::debug!(len = key.len(), "evicted parsed query");
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Whether a parsed tree for `text` is cached.
    pub fn contains(&self, text: &str) -> bool {
        let slot = self.slots.get(text).map(|r| Arc::clone(r.value()));
        slot.map(|slot| slot.query.lock().is_some()).unwrap_or(false)
    }

    /// Get the current number of cached entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Clear all cached entries.
    pub fn clear(&self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entql_lang::parse;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_second_lookup_is_a_hit() {
        let cache = ParseCache::new(16);
        let a = cache.get_or_parse("select e from Customer e", parse).unwrap();
        let b = cache.get_or_parse("select e from Customer e", parse).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().parses(), 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let cache = ParseCache::new(16);
        assert!(cache.get_or_parse("select from", parse).is_err());
        assert!(cache.get_or_parse("select from", parse).is_err());

        assert_eq!(cache.stats().parses(), 2);
        assert!(cache.is_empty());
        assert!(!cache.contains("select from"));
    }

    #[test]
    fn test_least_hit_entry_is_evicted() {
        let cache = ParseCache::new(2);
        let q1 = "select a from A a";
        let q2 = "select b from B b";
        let q3 = "select c from C c";

        cache.get_or_parse(q1, parse).unwrap();
        cache.get_or_parse(q2, parse).unwrap();
        cache.get_or_parse(q2, parse).unwrap();
        cache.get_or_parse(q3, parse).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions(), 1);
        assert!(!cache.contains(q1));
        assert!(cache.contains(q2));
        assert!(cache.contains(q3));
    }

    #[test]
    fn test_concurrent_lookups_parse_once() {
        const THREADS: usize = 8;
        let cache = Arc::new(ParseCache::new(16));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_parse("select e from Customer e where e.name = :name", |text| {
                            thread::sleep(std::time::Duration::from_millis(20));
                            parse(text)
                        })
                        .unwrap()
                })
            })
            .collect();

        let trees: Vec<Arc<Query>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cache.stats().parses(), 1);
        assert_eq!(cache.stats().hits(), (THREADS - 1) as u64);
        assert!(trees.iter().all(|t| Arc::ptr_eq(t, &trees[0])));
    }

    #[test]
    fn test_in_flight_parse_is_not_evicted() {
        let cache = Arc::new(ParseCache::new(1));
        let slow = "select s from Slow s";
        let slow_parses = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel();

        let first = {
            let cache = Arc::clone(&cache);
            let slow_parses = Arc::clone(&slow_parses);
            thread::spawn(move || {
                cache
                    .get_or_parse(slow, |text| {
                        slow_parses.fetch_add(1, AtomicOrdering::SeqCst);
                        started_tx.send(()).unwrap();
                        thread::sleep(Duration::from_millis(200));
                        parse(text)
                    })
                    .unwrap()
            })
        };
        started_rx.recv().unwrap();

        // the cache is full, but its only entry is still being parsed
        cache.get_or_parse("select f from Fast f", parse).unwrap();
        assert_eq!(cache.stats().evictions(), 0);
        assert_eq!(cache.len(), 2);

        let second = {
            let cache = Arc::clone(&cache);
            let slow_parses = Arc::clone(&slow_parses);
            thread::spawn(move || {
                cache
                    .get_or_parse(slow, |text| {
                        slow_parses.fetch_add(1, AtomicOrdering::SeqCst);
                        parse(text)
                    })
                    .unwrap()
            })
        };

        let a = first.join().unwrap();
        let b = second.join().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(slow_parses.load(AtomicOrdering::SeqCst), 1);

        // once settled, entries are evictable again
        cache.get_or_parse("select g from Other g", parse).unwrap();
        assert!(cache.stats().evictions() >= 1);
    }
}
