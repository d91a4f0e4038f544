//! Read-through template cache with TTL and invalidate-on-write

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::CacheConfig;
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

use super::types::Template;

/// One cached lookup, positive or negative.
#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` records a "not found" lookup
    template: Option<Template>,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() >= ttl
    }
}

/// In-process, name-keyed cache of active-template lookups.
///
/// Entries live for a fixed TTL; writers remove the affected name before
/// their write completes, so a lookup that begins after a write never
/// observes the pre-write value. Holds no ownership: the cache starts
/// empty and is rebuilt from the store on demand.
///
/// Invalidation also bumps an epoch counter. A read-through caller
/// records the epoch before going to the store and passes it back to
/// [`store`](Self::store); if any invalidation happened in between, the
/// insert is discarded rather than resurrecting a pre-write value.
pub struct TemplateCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    cache_negative: bool,
    epoch: AtomicU64,
}

impl TemplateCache {
    /// Create a cache from configuration.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::from_secs(config.ttl_seconds),
            cache_negative: config.cache_negative,
            epoch: AtomicU64::new(0),
        }
    }

    /// Look up a name.
    ///
    /// `Some(Some(template))` is a fresh positive entry, `Some(None)` a
    /// fresh negative entry, and `None` means the caller must go to the
    /// store.
    pub fn get(&self, name: &str) -> Option<Option<Template>> {
        let hit = match self.entries.get(name) {
            Some(entry) if !entry.is_expired(self.ttl) => Some(entry.template.clone()),
            _ => None,
        };

        match hit {
            Some(value) => {
                CACHE_HITS_TOTAL.inc();
                Some(value)
            }
            None => {
                CACHE_MISSES_TOTAL.inc();
                // Drop the stale entry so the map does not accumulate
                // expired names between writes.
                self.entries
                    .remove_if(name, |_, entry| entry.is_expired(self.ttl));
                None
            }
        }
    }

    /// Current invalidation epoch; record it before reading the store.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Store a lookup result observed at `observed_epoch`.
    ///
    /// Discarded when an invalidation landed after the caller sampled
    /// the epoch, and for negative results when those are not cached.
    pub fn store(&self, name: &str, template: Option<Template>, observed_epoch: u64) {
        if template.is_none() && !self.cache_negative {
            return;
        }

        if self.epoch.load(Ordering::Acquire) != observed_epoch {
            tracing::trace!(template = %name, "Discarding cache insert raced by invalidation");
            return;
        }

        self.entries.insert(
            name.to_string(),
            CacheEntry {
                template,
                cached_at: Instant::now(),
            },
        );
    }

    /// Remove the entry for a name, if any, and bump the epoch.
    pub fn invalidate(&self, name: &str) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if self.entries.remove(name).is_some() {
            tracing::debug!(template = %name, "Cache entry invalidated");
        }
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    /// Number of live entries (including not-yet-expired negatives).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_template(name: &str) -> Template {
        Template {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            body: "Hello {{name}}".to_string(),
            temperature: Some(0.7),
            category: None,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn cache_with_ttl(ttl_seconds: u64) -> TemplateCache {
        TemplateCache::new(&CacheConfig {
            ttl_seconds,
            cache_negative: true,
        })
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = cache_with_ttl(300);
        assert!(cache.get("greet").is_none());

        let epoch = cache.epoch();
        cache.store("greet", Some(sample_template("greet")), epoch);
        let hit = cache.get("greet").expect("entry should be fresh");
        assert_eq!(hit.unwrap().name, "greet");
    }

    #[test]
    fn test_negative_entry_cached() {
        let cache = cache_with_ttl(300);
        cache.store("missing", None, cache.epoch());

        // A fresh negative entry is a hit carrying "not found"
        let hit = cache.get("missing");
        assert!(matches!(hit, Some(None)));
    }

    #[test]
    fn test_negative_caching_disabled() {
        let cache = TemplateCache::new(&CacheConfig {
            ttl_seconds: 300,
            cache_negative: false,
        });

        cache.store("missing", None, cache.epoch());
        assert!(cache.get("missing").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entry_misses() {
        let cache = cache_with_ttl(0);
        cache.store("greet", Some(sample_template("greet")), cache.epoch());

        assert!(cache.get("greet").is_none());
        // The expired entry is dropped on read
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = cache_with_ttl(300);
        cache.store("greet", Some(sample_template("greet")), cache.epoch());
        cache.invalidate("greet");

        assert!(cache.get("greet").is_none());
    }

    #[test]
    fn test_invalidate_only_affects_named_entry() {
        let cache = cache_with_ttl(300);
        cache.store("a", Some(sample_template("a")), cache.epoch());
        cache.store("b", Some(sample_template("b")), cache.epoch());

        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn test_store_raced_by_invalidation_is_discarded() {
        let cache = cache_with_ttl(300);

        // Reader samples the epoch, then a writer invalidates before
        // the reader gets to insert its (now pre-write) value
        let epoch = cache.epoch();
        cache.invalidate("greet");
        cache.store("greet", Some(sample_template("greet")), epoch);

        assert!(cache.get("greet").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = cache_with_ttl(300);
        cache.store("a", Some(sample_template("a")), cache.epoch());
        cache.store("b", None, cache.epoch());
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
