use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::{CacheKey, SharedDetail};

/// Session-scoped store of fetched details.
///
/// Cloning yields another handle onto the same store. The feed creates one
/// at mount and hands clones to the loader and prefetcher; the store goes
/// away with the last handle.
#[derive(Clone, Default)]
pub struct DetailCache {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, SharedDetail>,
    order: VecDeque<CacheKey>,
    max_entries: Option<usize>,
}

impl DetailCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache that evicts its oldest entry once `max_entries` is exceeded.
    pub fn bounded(max_entries: usize) -> Self {
        let cache = Self::default();
        cache.inner.write().max_entries = Some(max_entries.max(1));
        cache
    }

    pub fn get(&self, key: &CacheKey) -> Option<SharedDetail> {
        self.inner.read().entries.get(key).cloned()
    }

    pub fn has(&self, key: &CacheKey) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// Stores `detail` under `key`. Writing an equal payload for a present
    /// key keeps the existing allocation, so earlier `get` results stay
    /// pointer-equal to later ones.
    pub fn set(&self, key: CacheKey, detail: impl Into<SharedDetail>) {
        let detail = detail.into();
        let mut inner = self.inner.write();
        if let Some(existing) = inner.entries.get(&key) {
            if existing.as_ref() == detail.as_ref() {
                return;
            }
            inner.entries.insert(key, detail);
            return;
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(key, detail);
        if let Some(max) = inner.max_entries {
            while inner.entries.len() > max {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.order.clear();
    }
}

impl std::fmt::Debug for DetailCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetailCache")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Episode, VideoDetail};

    fn detail(title: &str) -> VideoDetail {
        VideoDetail {
            title: title.into(),
            episodes: vec![Episode {
                name: "1".into(),
                url: format!("https://cdn.test/{title}.m3u8"),
            }],
            ..VideoDetail::default()
        }
    }

    #[test]
    fn repeated_gets_return_the_same_allocation() {
        let cache = DetailCache::new();
        let key = CacheKey::new("1", "a");
        cache.set(key.clone(), detail("one"));
        let first = cache.get(&key).unwrap();
        let second = cache.get(&key).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn setting_equal_content_is_a_no_op() {
        let cache = DetailCache::new();
        let key = CacheKey::new("1", "a");
        cache.set(key.clone(), detail("one"));
        let before = cache.get(&key).unwrap();
        cache.set(key.clone(), detail("one"));
        let after = cache.get(&key).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn last_write_wins_for_different_content() {
        let cache = DetailCache::new();
        let key = CacheKey::new("1", "a");
        cache.set(key.clone(), detail("one"));
        cache.set(key.clone(), detail("two"));
        assert_eq!(cache.get(&key).unwrap().title, "two");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn source_is_part_of_the_identity() {
        let cache = DetailCache::new();
        cache.set(CacheKey::new("1", "a"), detail("a"));
        assert!(cache.has(&CacheKey::new("1", "a")));
        assert!(!cache.has(&CacheKey::new("1", "b")));
    }

    #[test]
    fn clones_share_one_store() {
        let cache = DetailCache::new();
        let handle = cache.clone();
        handle.set(CacheKey::new("1", "a"), detail("a"));
        assert!(cache.has(&CacheKey::new("1", "a")));
    }

    #[test]
    fn bounded_cache_evicts_oldest_first() {
        let cache = DetailCache::bounded(2);
        cache.set(CacheKey::new("1", "a"), detail("1"));
        cache.set(CacheKey::new("2", "a"), detail("2"));
        cache.set(CacheKey::new("3", "a"), detail("3"));
        assert_eq!(cache.len(), 2);
        assert!(!cache.has(&CacheKey::new("1", "a")));
        assert!(cache.has(&CacheKey::new("3", "a")));
    }
}
