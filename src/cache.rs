use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::dns::{DnsType, Message, canonicalize};
use crate::metrics::ProxyMetrics;

/// `(name, qtype)` cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub qtype: DnsType,
}

impl CacheKey {
    pub fn new(name: &str, qtype: DnsType) -> Self {
        CacheKey {
            name: canonicalize(name),
            qtype,
        }
    }
}

struct CacheEntry {
    response: Message,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Bounded, thread-safe response cache keyed by `(name, qtype)`. On a
/// full cache, `set` first sweeps expired entries, and if still full,
/// drops 25% of the remaining entries rather than evicting a single
/// LRU victim: not strict LRU, but it guarantees forward progress.
pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    insertion_order: Mutex<Vec<CacheKey>>,
    capacity: usize,
    ttl_cap: Duration,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl_cap: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            insertion_order: Mutex::new(Vec::new()),
            capacity,
            ttl_cap,
        }
    }

    /// Returns a deep copy of the cached response, or `None` on miss or
    /// expiry. An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Message> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                trace!(name = %key.name, qtype = ?key.qtype, "cache hit");
                return Some(entry.response.clone());
            }
        }
        if self.entries.remove(key).is_some() {
            self.insertion_order.lock().retain(|k| k != key);
            debug!(name = %key.name, "removed expired cache entry on lookup");
        }
        None
    }

    /// Stores a deep copy of `response` under `key`. Responses with an
    /// empty answer list are rejected outright. The expiry is
    /// `now + min(answer TTLs, ttl_cap)`; a zero minimum TTL falls back
    /// to the configured cap.
    pub fn set(&self, key: CacheKey, response: Message, metrics: Option<&ProxyMetrics>) {
        if response.answers.is_empty() {
            debug!(name = %key.name, "refusing to cache response with no answers");
            return;
        }

        let min_ttl = response.min_answer_ttl().unwrap_or(0);
        let ttl = if min_ttl == 0 {
            self.ttl_cap
        } else {
            Duration::from_secs(min_ttl as u64).min(self.ttl_cap)
        };

        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.cleanup();
            if self.entries.len() >= self.capacity {
                self.evict_fraction(0.25, metrics);
            }
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                response,
                expires_at: Instant::now() + ttl,
            },
        );

        let mut order = self.insertion_order.lock();
        order.retain(|k| k != &key);
        order.push(key);
        drop(order);

        if let Some(metrics) = metrics {
            metrics.cache_size.set(self.entries.len() as i64);
        }
    }

    /// Removes all expired entries. Called on a timer and opportunistically
    /// from `set` when the cache is full.
    pub fn cleanup(&self) {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        for key in &expired {
            self.entries.remove(key);
        }
        self.insertion_order.lock().retain(|k| !expired.contains(k));
        debug!(count = expired.len(), "cache cleanup removed expired entries");
    }

    /// Evicts roughly `fraction` of the current entries, oldest-inserted
    /// first. Not LRU, but guarantees forward progress on a full cache.
    fn evict_fraction(&self, fraction: f64, metrics: Option<&ProxyMetrics>) {
        let mut order = self.insertion_order.lock();
        let to_evict = ((order.len() as f64) * fraction).ceil() as usize;
        let to_evict = to_evict.max(1).min(order.len());

        let victims: Vec<CacheKey> = order.drain(..to_evict).collect();
        drop(order);

        let mut evicted = 0u64;
        for key in &victims {
            if self.entries.remove(key).is_some() {
                evicted += 1;
            }
        }
        if let Some(metrics) = metrics {
            metrics.cache_evictions.inc_by(evicted);
        }
        debug!(count = victims.len(), "evicted cache entries to make room");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsClass, DnsQuestion, DnsType, RCode, ResourceRecord};
    use std::net::Ipv4Addr;

    fn query(name: &str, qtype: DnsType) -> Message {
        use crate::dns::DnsHeader;
        Message {
            header: DnsHeader {
                id: 1,
                qr: false,
                opcode: 0,
                aa: false,
                tc: false,
                rd: true,
                ra: false,
                z: 0,
                rcode: RCode::NoError,
                qdcount: 1,
                ancount: 0,
                nscount: 0,
                arcount: 0,
            },
            questions: vec![DnsQuestion {
                name: name.to_string(),
                qtype,
                qclass: DnsClass::IN,
            }],
            answers: Vec::new(),
            authorities: Vec::new(),
            additional: Vec::new(),
        }
    }

    fn response_with_a(name: &str, ttl: u32, addr: Ipv4Addr) -> Message {
        let mut msg = query(name, DnsType::A);
        msg.header.qr = true;
        msg.answers.push(ResourceRecord::new_a(name.to_string(), ttl, addr));
        msg
    }

    #[test]
    fn set_then_get_returns_equivalent_deep_copy() {
        let cache = ResponseCache::new(10, Duration::from_secs(300));
        let key = CacheKey::new("google.com.", DnsType::A);
        let response = response_with_a("google.com.", 300, Ipv4Addr::new(1, 2, 3, 4));
        cache.set(key.clone(), response.clone(), None);

        let mut fetched = cache.get(&key).unwrap();
        assert_eq!(fetched.answers, response.answers);

        // Mutating the returned copy must not affect subsequent hits.
        fetched.answers.clear();
        let fetched_again = cache.get(&key).unwrap();
        assert_eq!(fetched_again.answers.len(), 1);
    }

    #[test]
    fn empty_answers_are_never_cached() {
        let cache = ResponseCache::new(10, Duration::from_secs(300));
        let key = CacheKey::new("nxdomain.example.", DnsType::A);
        let response = query("nxdomain.example.", DnsType::A);
        cache.set(key.clone(), response, None);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn ttl_is_capped() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        let key = CacheKey::new("long-ttl.example.", DnsType::A);
        let response = response_with_a("long-ttl.example.", 100_000, Ipv4Addr::new(5, 5, 5, 5));
        cache.set(key.clone(), response, None);

        let entry_ttl_secs = {
            let entry = cache.entries.get(&key).unwrap();
            entry
                .expires_at
                .saturating_duration_since(Instant::now())
                .as_secs()
        };
        assert!(entry_ttl_secs <= 60);
    }

    #[test]
    fn full_cache_makes_forward_progress() {
        let cache = ResponseCache::new(4, Duration::from_secs(300));
        for i in 0..4 {
            let name = format!("host{i}.example.");
            let key = CacheKey::new(&name, DnsType::A);
            cache.set(key, response_with_a(&name, 300, Ipv4Addr::new(1, 1, 1, i as u8)), None);
        }
        assert_eq!(cache.len(), 4);

        // The cache is full and nothing has expired; `set` must still
        // succeed by evicting a fraction of existing entries.
        let new_key = CacheKey::new("newcomer.example.", DnsType::A);
        cache.set(
            new_key.clone(),
            response_with_a("newcomer.example.", 300, Ipv4Addr::new(2, 2, 2, 2)),
            None,
        );
        assert!(cache.get(&new_key).is_some());
        assert!(cache.len() <= 4);
    }
}
