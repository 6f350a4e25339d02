//! Bounded LRU cache for ranked search results, keyed by a fast fingerprint
//! of the query parameters. Invalidated wholesale on any chunk write.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::store::SearchResult;

pub(crate) const CACHE_SIZE: usize = 256;
pub(crate) const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct Entry {
    results: Vec<SearchResult>,
    stored_at: Instant,
}

/// LRU + TTL map behind its own mutex; entries are by-value result lists so
/// hits never alias store internals.
pub(crate) struct QueryCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
    ttl: Duration,
}

struct CacheInner {
    entries: HashMap<u64, Entry>,
    // Insertion order, oldest at the front.
    order: VecDeque<u64>,
}

impl QueryCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(max_size),
                order: VecDeque::with_capacity(max_size),
            }),
            max_size,
            ttl,
        }
    }

    pub fn get(&self, key: u64) -> Option<Vec<SearchResult>> {
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                return Some(entry.results.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(&key);
        }
        None
    }

    pub fn put(&self, key: u64, results: Vec<SearchResult>) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.entries.contains_key(&key) {
            if inner.order.len() >= self.max_size {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.entries.remove(&oldest);
                }
            }
            inner.order.push_back(key);
        }
        inner.entries.insert(
            key,
            Entry {
                results,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.order.clear();
    }
}

/// FNV-1a fingerprint over the first 8 query components, top-k, threshold
/// bits and product id.
pub(crate) fn hash_query(query: &[f32], top_k: usize, threshold: f32, product_id: &str) -> u64 {
    const OFFSET: u64 = 14695981039346656037;
    const PRIME: u64 = 1099511628211;

    let mut h = OFFSET;
    for &v in query.iter().take(8) {
        let bits = v.to_bits();
        h ^= bits as u64;
        h = h.wrapping_mul(PRIME);
        h ^= (bits >> 16) as u64;
        h = h.wrapping_mul(PRIME);
    }
    h ^= top_k as u64;
    h = h.wrapping_mul(PRIME);
    h ^= (threshold as f64).to_bits();
    h = h.wrapping_mul(PRIME);
    for b in product_id.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(doc: &str) -> SearchResult {
        SearchResult {
            chunk_text: "text".into(),
            chunk_index: 0,
            document_id: doc.into(),
            document_name: doc.into(),
            score: 0.9,
            image_url: String::new(),
            product_id: String::new(),
        }
    }

    #[test]
    fn hit_returns_stored_results() {
        let cache = QueryCache::new(4, Duration::from_secs(60));
        cache.put(1, vec![result("d1")]);
        let got = cache.get(1).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].document_id, "d1");
    }

    #[test]
    fn miss_on_unknown_key() {
        let cache = QueryCache::new(4, Duration::from_secs(60));
        assert!(cache.get(42).is_none());
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let cache = QueryCache::new(2, Duration::from_secs(60));
        cache.put(1, vec![result("d1")]);
        cache.put(2, vec![result("d2")]);
        cache.put(3, vec![result("d3")]);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn expired_entries_miss() {
        let cache = QueryCache::new(4, Duration::from_millis(0));
        cache.put(1, vec![result("d1")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn invalidate_clears_everything() {
        let cache = QueryCache::new(4, Duration::from_secs(60));
        cache.put(1, vec![result("d1")]);
        cache.put(2, vec![result("d2")]);
        cache.invalidate();
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_none());
    }

    #[test]
    fn fingerprint_distinguishes_parameters() {
        let q = [0.1f32, 0.2, 0.3];
        let base = hash_query(&q, 5, 0.7, "");
        assert_ne!(base, hash_query(&q, 6, 0.7, ""));
        assert_ne!(base, hash_query(&q, 5, 0.8, ""));
        assert_ne!(base, hash_query(&q, 5, 0.7, "p1"));
        assert_ne!(base, hash_query(&[0.1f32, 0.2, 0.4], 5, 0.7, ""));
        assert_eq!(base, hash_query(&q, 5, 0.7, ""));
    }
}
