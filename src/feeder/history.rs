//! Bounded duplicate detector
//!
//! Remembers identities that were already dispatched so repeated lines in
//! the input are fetched once. The input may hold far more identities than
//! fit in memory, so the set is bounded and therefore approximate: once an
//! identity has been evicted, a later duplicate of it is reported as new.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::num::NonZeroUsize;

use crate::config::{HistoryEviction, PipelineConfig};

enum HistoryStore {
    /// Cleared in full once `capacity` identities are recorded
    Reset {
        items: HashSet<String>,
        capacity: usize,
    },
    /// Least recently seen identity is evicted first
    Lru(LruCache<String, ()>),
    Disabled,
}

/// Thread-safe, size-bounded record of seen identities
pub struct DedupHistory {
    store: Mutex<HistoryStore>,
}

impl std::fmt::Debug for DedupHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupHistory")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl DedupHistory {
    /// Create a history holding at most `capacity` identities
    #[must_use]
    pub fn new(capacity: usize, eviction: HistoryEviction) -> Self {
        let capacity = capacity.max(1);
        let store = match eviction {
            HistoryEviction::Reset => HistoryStore::Reset {
                items: HashSet::new(),
                capacity,
            },
            HistoryEviction::Lru => {
                let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
                HistoryStore::Lru(LruCache::new(capacity))
            }
        };
        Self {
            store: Mutex::new(store),
        }
    }

    /// A history that treats every identity as new
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            store: Mutex::new(HistoryStore::Disabled),
        }
    }

    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        if config.history_enabled() {
            Self::new(config.history_size(), config.history_eviction())
        } else {
            Self::disabled()
        }
    }

    /// Record `identity`; returns `false` if it was already present
    ///
    /// Test and insert happen under one lock, so two concurrent callers can
    /// never both see the same identity as new.
    pub fn add(&self, identity: &str) -> bool {
        let mut store = self.store.lock();
        match &mut *store {
            HistoryStore::Disabled => true,
            HistoryStore::Reset { items, capacity } => {
                if items.contains(identity) {
                    return false;
                }
                if items.len() >= *capacity {
                    log::debug!("dedup history reached {capacity} entries, resetting");
                    items.clear();
                }
                items.insert(identity.to_string());
                true
            }
            HistoryStore::Lru(cache) => {
                // `get` refreshes recency for repeated identities
                if cache.get(identity).is_some() {
                    return false;
                }
                cache.put(identity.to_string(), ());
                true
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match &*self.store.lock() {
            HistoryStore::Disabled => 0,
            HistoryStore::Reset { items, .. } => items.len(),
            HistoryStore::Lru(cache) => cache.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        match &mut *self.store.lock() {
            HistoryStore::Disabled => {}
            HistoryStore::Reset { items, .. } => items.clear(),
            HistoryStore::Lru(cache) => cache.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_add_is_duplicate() {
        for eviction in [HistoryEviction::Reset, HistoryEviction::Lru] {
            let history = DedupHistory::new(10, eviction);
            assert!(history.add("https://example.com/a.png"));
            assert!(!history.add("https://example.com/a.png"));
            assert_eq!(history.len(), 1);
        }
    }

    #[test]
    fn test_reset_forgets_everything_at_capacity() {
        let history = DedupHistory::new(2, HistoryEviction::Reset);
        assert!(history.add("a"));
        assert!(history.add("b"));
        // Third insertion clears the set first
        assert!(history.add("c"));
        assert_eq!(history.len(), 1);
        assert!(history.add("a"), "evicted identity is reported as new");
    }

    #[test]
    fn test_lru_keeps_recently_seen() {
        let history = DedupHistory::new(2, HistoryEviction::Lru);
        assert!(history.add("a"));
        assert!(history.add("b"));
        assert!(!history.add("a"));
        assert!(history.add("c"));
        // "b" was least recently seen and got evicted; "a" survived
        assert!(!history.add("a"));
        assert!(history.add("b"));
    }

    #[test]
    fn test_disabled_accepts_everything() {
        let history = DedupHistory::disabled();
        assert!(history.add("a"));
        assert!(history.add("a"));
        assert!(history.is_empty());
    }
}
