use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::analytics::HealthReport;
use crate::model::Scope;

/// Thread-safe LRU cache of health reports with a time-to-live
///
/// Pull-based: entries are never refreshed in the background, an expired
/// entry is dropped on the lookup that finds it. Edge and violation writers
/// holding the same cache clear it after each write.
pub struct HealthCache {
    cache: Mutex<LruCache<Scope, (Instant, HealthReport)>>,
    ttl: Duration,
}

impl HealthCache {
    /// Create a cache holding at most `capacity` reports (minimum 1)
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<Scope, (Instant, HealthReport)>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached report for a scope, if present and younger than the TTL
    pub fn get(&self, scope: &Scope) -> Option<HealthReport> {
        let mut cache = self.lock();
        match cache.get(scope) {
            Some((stored_at, report)) if stored_at.elapsed() < self.ttl => return Some(report.clone()),
            Some(_) => {}
            None => return None,
        }
        cache.pop(scope);
        None
    }

    pub fn put(&self, scope: Scope, report: HealthReport) {
        self.lock().put(scope, (Instant::now(), report));
    }

    /// Drop the report of one scope, or every report when `scope` is `None`
    pub fn invalidate(&self, scope: Option<&Scope>) {
        let mut cache = self.lock();
        match scope {
            Some(scope) => {
                cache.pop(scope);
            }
            None => cache.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{HealthComponents, HealthGrade};
    use uuid::Uuid;

    fn report(score: f64) -> HealthReport {
        HealthReport {
            score,
            grade: HealthGrade::from_score(score),
            components: HealthComponents {
                coverage: 1.0,
                violation_free: 1.0,
                orphan_free: 1.0,
            },
            entities: 0,
            orphans: 0,
            open_violations: 0,
            recommendations: Vec::new(),
        }
    }

    #[test]
    fn test_put_and_get() {
        let cache = HealthCache::new(4, Duration::from_secs(60));
        let scope = Scope::project(Uuid::new_v4());
        cache.put(scope, report(88.0));

        assert_eq!(cache.get(&scope).map(|r| r.score), Some(88.0));
        assert!(cache.get(&Scope::all()).is_none());
    }

    #[test]
    fn test_entries_expire() {
        let cache = HealthCache::new(4, Duration::from_millis(20));
        cache.put(Scope::all(), report(100.0));
        std::thread::sleep(Duration::from_millis(50));

        assert!(cache.get(&Scope::all()).is_none());
        // the expired entry was dropped on lookup
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = HealthCache::new(2, Duration::from_secs(60));
        let (a, b, c) = (
            Scope::project(Uuid::new_v4()),
            Scope::project(Uuid::new_v4()),
            Scope::project(Uuid::new_v4()),
        );
        cache.put(a, report(1.0));
        cache.put(b, report(2.0));
        let _ = cache.get(&a);
        cache.put(c, report(3.0));

        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalidate() {
        let cache = HealthCache::new(4, Duration::from_secs(60));
        let p = Scope::project(Uuid::new_v4());
        cache.put(p, report(1.0));
        cache.put(Scope::all(), report(2.0));

        cache.invalidate(Some(&p));
        assert!(cache.get(&p).is_none());
        assert!(cache.get(&Scope::all()).is_some());

        cache.invalidate(None);
        assert!(cache.is_empty());
    }
}
