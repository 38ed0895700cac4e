//! DNS cache with LRU eviction

use lru::LruCache;
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// DNS cache entry
#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    ip: Ipv4Addr,
    created: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created.elapsed() > self.ttl
    }
}

/// LRU + TTL cache of resolved IPv4 addresses
pub struct DnsCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    default_ttl: Duration,
}

impl DnsCache {
    pub fn new(max_size: usize) -> Self {
        Self::with_ttl(max_size, Duration::from_secs(60))
    }

    pub fn with_ttl(max_size: usize, default_ttl: Duration) -> Self {
        DnsCache {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::new(100).unwrap()),
            )),
            default_ttl,
        }
    }

    pub fn get(&self, host: &str) -> Option<Ipv4Addr> {
        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get(host) {
            if !entry.is_expired() {
                return Some(entry.ip);
            }
            cache.pop(host);
        }
        None
    }

    pub fn put(&self, host: String, ip: Ipv4Addr) {
        let entry = CacheEntry {
            ip,
            created: Instant::now(),
            ttl: self.default_ttl,
        };
        self.cache.lock().put(host, entry);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new(100)
    }
}
