// =====================================================================================
// File: core-risk/src/cache.rs
// Description: Bounded LRU cache with TTL and pattern invalidation for risk results
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Cache key prefixes; keys follow `<prefix>:<domain>[:<group>][:<args>]`
pub const PREFIX_GLOBAL_RISK: &str = "global_risk";
pub const PREFIX_DOMAIN_RISK: &str = "domain_risk";
pub const PREFIX_GROUP_RISK: &str = "group_risk";
pub const PREFIX_RISK_BREAKDOWN: &str = "risk_breakdown";
pub const PREFIX_RISK_HISTORY: &str = "risk_history";

const DEFAULT_TTL: Duration = Duration::from_secs(300);
const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Build a cache key from a prefix and its parts
pub fn make_key(prefix: &str, parts: &[&str]) -> String {
    let mut key = String::from(prefix);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
    access_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache statistics counters
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub total_entries: u64,
    pub memory_entries: usize,
    pub hit_rate_percent: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    invalidations: u64,
    total_entries: u64,
}

struct CacheInner {
    entries: LruCache<String, CacheEntry>,
    counters: Counters,
}

/// Thread-safe LRU cache with TTL for risk calculation results.
///
/// Risk results are expensive to compute, change only on member-acceptance
/// changes and new uploads, and invalidate along predictable domain/group
/// patterns. A single mutex protects the map and the statistics; expired
/// entries are evicted before capacity forces out the least recently used.
pub struct RiskCache {
    inner: Mutex<CacheInner>,
    default_ttl: Duration,
}

impl RiskCache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).expect("capacity is nonzero");
        info!(
            "RiskCache initialized: max_entries={}, ttl={}s",
            capacity,
            default_ttl.as_secs()
        );
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                counters: Counters::default(),
            }),
            default_ttl,
        }
    }

    /// Get a value; expired entries count as misses and are evicted
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                inner.counters.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            inner.entries.pop(key);
            inner.counters.misses += 1;
            inner.counters.evictions += 1;
            return None;
        }

        let entry = inner.entries.get_mut(key).expect("entry just probed");
        entry.access_count += 1;
        let value = entry.value.clone();
        inner.counters.hits += 1;
        Some(value)
    }

    /// Insert a value with the given TTL (default TTL when `None`)
    pub fn set(&self, key: String, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Instant::now();
        let mut inner = self.inner.lock();

        // Expired entries go first so capacity eviction only hits live ones
        let expired_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for expired in &expired_keys {
            inner.entries.pop(expired);
            inner.counters.evictions += 1;
        }

        let entry = CacheEntry {
            value,
            expires_at: now + ttl,
            access_count: 0,
        };
        if let Some((evicted_key, _)) = inner.entries.push(key.clone(), entry) {
            if evicted_key != key {
                inner.counters.evictions += 1;
            }
        }
        inner.counters.total_entries += 1;
    }

    /// Delete one entry; returns whether it existed
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.entries.pop(key).is_some() {
            inner.counters.invalidations += 1;
            true
        } else {
            false
        }
    }

    /// Invalidate all entries whose key starts with the pattern
    pub fn invalidate_prefix(&self, pattern: &str) -> usize {
        let mut inner = self.inner.lock();
        let matching: Vec<String> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(pattern))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &matching {
            inner.entries.pop(key);
        }
        inner.counters.invalidations += matching.len() as u64;
        matching.len()
    }

    /// Invalidate every risk entry for a domain
    pub fn invalidate_domain(&self, domain: &str) -> usize {
        let mut total = 0;
        for prefix in [
            PREFIX_GLOBAL_RISK,
            PREFIX_DOMAIN_RISK,
            PREFIX_GROUP_RISK,
            PREFIX_RISK_BREAKDOWN,
            PREFIX_RISK_HISTORY,
        ] {
            total += self.invalidate_prefix(&make_key(prefix, &[domain]));
        }
        debug!("Invalidated {} cache entries for domain {}", total, domain);
        total
    }

    /// Invalidate a group's entries. Group changes aggregate upward, so the
    /// whole domain is invalidated as well.
    pub fn invalidate_group(&self, domain: &str, group_name: &str) -> usize {
        let mut total = self.invalidate_prefix(&make_key(PREFIX_GROUP_RISK, &[domain, group_name]));
        total += self.invalidate_domain(domain);
        total
    }

    /// Drop everything
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.counters.invalidations += count as u64;
        info!("Cache cleared: {} entries removed", count);
        count
    }

    /// Current statistics snapshot
    pub fn get_stats(&self) -> CacheStatsSnapshot {
        let inner = self.inner.lock();
        let total_lookups = inner.counters.hits + inner.counters.misses;
        let hit_rate_percent = if total_lookups > 0 {
            inner.counters.hits as f64 / total_lookups as f64 * 100.0
        } else {
            0.0
        };

        CacheStatsSnapshot {
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            evictions: inner.counters.evictions,
            invalidations: inner.counters.invalidations,
            total_entries: inner.counters.total_entries,
            memory_entries: inner.entries.len(),
            hit_rate_percent: (hit_rate_percent * 100.0).round() / 100.0,
        }
    }
}

impl Default for RiskCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_delete() {
        let cache = RiskCache::default();
        let key = make_key(PREFIX_GLOBAL_RISK, &["corp.local"]);

        assert!(cache.get(&key).is_none());
        cache.set(key.clone(), json!({"global_score": 42.5}), None);
        assert_eq!(cache.get(&key).unwrap()["global_score"], json!(42.5));

        assert!(cache.delete(&key));
        assert!(!cache.delete(&key));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = RiskCache::new(10, Duration::from_secs(300));
        let key = make_key(PREFIX_DOMAIN_RISK, &["corp.local"]);
        cache.set(key.clone(), json!(1), Some(Duration::from_millis(10)));

        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get(&key).is_none());

        let stats = cache.get_stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = RiskCache::new(2, Duration::from_secs(300));
        cache.set("global_risk:a".to_string(), json!(1), None);
        cache.set("global_risk:b".to_string(), json!(2), None);

        // Touch "a" so "b" becomes the LRU victim
        assert!(cache.get("global_risk:a").is_some());
        cache.set("global_risk:c".to_string(), json!(3), None);

        assert!(cache.get("global_risk:a").is_some());
        assert!(cache.get("global_risk:b").is_none());
        assert!(cache.get("global_risk:c").is_some());
        assert_eq!(cache.get_stats().evictions, 1);
    }

    #[test]
    fn test_domain_invalidation_spans_prefixes() {
        let cache = RiskCache::default();
        cache.set(make_key(PREFIX_GLOBAL_RISK, &["corp.local"]), json!(1), None);
        cache.set(make_key(PREFIX_DOMAIN_RISK, &["corp.local"]), json!(2), None);
        cache.set(
            make_key(PREFIX_RISK_HISTORY, &["corp.local", "30"]),
            json!(3),
            None,
        );
        cache.set(make_key(PREFIX_GLOBAL_RISK, &["other.local"]), json!(4), None);

        let invalidated = cache.invalidate_domain("corp.local");
        assert_eq!(invalidated, 3);
        assert!(cache.get(&make_key(PREFIX_GLOBAL_RISK, &["other.local"])).is_some());
    }

    #[test]
    fn test_group_invalidation_implies_domain() {
        let cache = RiskCache::default();
        cache.set(
            make_key(PREFIX_GROUP_RISK, &["corp.local", "Domain Admins"]),
            json!(1),
            None,
        );
        cache.set(make_key(PREFIX_GLOBAL_RISK, &["corp.local"]), json!(2), None);

        let invalidated = cache.invalidate_group("corp.local", "Domain Admins");
        assert_eq!(invalidated, 2);
        assert!(cache
            .get(&make_key(PREFIX_GLOBAL_RISK, &["corp.local"]))
            .is_none());
    }

    #[test]
    fn test_stats_and_clear() {
        let cache = RiskCache::default();
        cache.set("global_risk:a".to_string(), json!(1), None);
        let _ = cache.get("global_risk:a");
        let _ = cache.get("global_risk:missing");

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.memory_entries, 1);
        assert!((stats.hit_rate_percent - 50.0).abs() < 1e-9);

        assert_eq!(cache.clear(), 1);
        assert_eq!(cache.get_stats().memory_entries, 0);
    }
}
