use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

pub const DEFAULT_PRUNE_MAX_AGE: Duration = Duration::from_secs(6 * 60 * 60);
pub const DEFAULT_PRUNE_MAX_ENTRIES: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneOptions {
    pub max_age: Duration,
    pub max_entries: usize,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_PRUNE_MAX_AGE,
            max_entries: DEFAULT_PRUNE_MAX_ENTRIES,
        }
    }
}

/// A named map of timestamped values. Freshness is decided by the reader,
/// since one cache can serve widgets with different refresh periods.
#[derive(Debug)]
pub struct TtlCache<V> {
    name: &'static str,
    entries: Mutex<HashMap<String, (V, Instant)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, (V, Instant)>) -> R) -> R {
        match self.entries.lock() {
            Ok(mut entries) => f(&mut *entries),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }

    /// The cached value when it was stored less than `ttl` ago.
    pub fn get_fresh(&self, key: &str, ttl: Duration) -> Option<V> {
        self.with_entries(|entries| {
            entries
                .get(key)
                .filter(|(_, stored_at)| stored_at.elapsed() < ttl)
                .map(|(value, _)| value.clone())
        })
    }

    /// The cached value regardless of age.
    pub fn get_any(&self, key: &str) -> Option<V> {
        self.with_entries(|entries| entries.get(key).map(|(value, _)| value.clone()))
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.with_entries(|entries| {
            entries.insert(key.into(), (value, Instant::now()));
        });
    }

    pub fn remove(&self, key: &str) {
        self.with_entries(|entries| {
            entries.remove(key);
        });
    }

    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries older than `max_age`, then the oldest ones until at most
    /// `max_entries` remain. Returns how many were removed.
    pub fn prune(&self, options: PruneOptions) -> usize {
        self.with_entries(|entries| {
            let before = entries.len();
            entries.retain(|_, (_, stored_at)| stored_at.elapsed() <= options.max_age);
            if entries.len() > options.max_entries {
                let mut by_age: Vec<(String, Instant)> = entries
                    .iter()
                    .map(|(key, (_, stored_at))| (key.clone(), *stored_at))
                    .collect();
                by_age.sort_by_key(|(_, stored_at)| *stored_at);
                let excess = entries.len() - options.max_entries;
                for (key, _) in by_age.into_iter().take(excess) {
                    entries.remove(&key);
                }
            }
            before - entries.len()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_by_reader_ttl() {
        let cache = TtlCache::new("weather");
        cache.insert("paris|metric|0", 21);
        assert_eq!(cache.get_fresh("paris|metric|0", Duration::from_secs(600)), Some(21));

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(cache.get_fresh("paris|metric|0", Duration::from_secs(600)), None);
        assert_eq!(cache.get_any("paris|metric|0"), Some(21));
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_old_then_oldest() {
        let cache = TtlCache::new("rss");
        cache.insert("stale", 0);
        tokio::time::advance(Duration::from_secs(7 * 60 * 60)).await;
        for index in 0..5 {
            cache.insert(format!("k{index}"), index);
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        let removed = cache.prune(PruneOptions {
            max_age: DEFAULT_PRUNE_MAX_AGE,
            max_entries: 3,
        });
        assert_eq!(removed, 3);
        assert_eq!(cache.len(), 3);
        assert!(cache.get_any("k0").is_none());
        assert!(cache.get_any("k1").is_none());
        assert_eq!(cache.get_any("k4"), Some(4));
    }
}
