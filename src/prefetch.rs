use crate::cache::DetailCache;
use crate::fetch::{DetailLoader, Origin, Request};
use crate::model::{CacheKey, VideoRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchPolicy {
    /// Entries prefetched from the head of a freshly loaded batch.
    pub batch_head: usize,
    /// Neighbours after the active item.
    pub ahead: usize,
    /// Neighbours before the active item.
    pub behind: usize,
}

impl Default for PrefetchPolicy {
    fn default() -> Self {
        Self {
            batch_head: 2,
            ahead: 1,
            behind: 0,
        }
    }
}

/// Advisory fetches for items the user is likely to reach next.
///
/// Scheduling never blocks: keys already cached or in flight are skipped
/// and the rest are queued behind the loader's worker pool. Failures are
/// dropped by the caller, so nothing here is ever user-visible.
pub struct Prefetcher {
    cache: DetailCache,
    policy: PrefetchPolicy,
}

impl Prefetcher {
    pub fn new(cache: DetailCache, policy: PrefetchPolicy) -> Self {
        Self { cache, policy }
    }

    pub fn policy(&self) -> PrefetchPolicy {
        self.policy
    }

    /// Returns how many fetches were actually issued.
    pub fn schedule<'a>(
        &self,
        loader: &mut DetailLoader,
        keys: impl IntoIterator<Item = &'a CacheKey>,
    ) -> usize {
        let mut issued = 0;
        for key in keys {
            if self.cache.has(key) || loader.is_in_flight(key) {
                continue;
            }
            if matches!(loader.request(key, Origin::Prefetch), Request::Started) {
                issued += 1;
            }
        }
        if issued > 0 {
            tracing::debug!(issued, "prefetch scheduled");
        }
        issued
    }

    pub fn batch_head(&self, batch: &[VideoRef]) -> Vec<CacheKey> {
        batch
            .iter()
            .take(self.policy.batch_head)
            .map(VideoRef::key)
            .collect()
    }

    /// Neighbours of `index`, nearest first, ahead before behind.
    pub fn neighbours(&self, batch: &[VideoRef], index: usize) -> Vec<CacheKey> {
        let mut keys = Vec::new();
        for step in 1..=self.policy.ahead {
            if let Some(video) = batch.get(index + step) {
                keys.push(video.key());
            }
        }
        for step in 1..=self.policy.behind {
            if let Some(video) = index.checked_sub(step).and_then(|i| batch.get(i)) {
                keys.push(video.key());
            }
        }
        keys
    }

    /// Drops queued prefetches for keys that are no longer in `batch`.
    pub fn cancel_stale(&self, loader: &mut DetailLoader, batch: &[VideoRef]) -> usize {
        let cancelled = loader.cancel_queued(|key| batch.iter().any(|video| &video.key() == key));
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled stale prefetches");
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(n: usize) -> Vec<VideoRef> {
        (1..=n)
            .map(|i| VideoRef {
                id: i.to_string(),
                source: "s".into(),
                title: format!("V{i}"),
                poster: String::new(),
                category: String::new(),
                year: None,
            })
            .collect()
    }

    fn ids(keys: &[CacheKey]) -> Vec<&str> {
        keys.iter().map(|k| k.id.as_str()).collect()
    }

    #[test]
    fn default_policy_looks_one_ahead() {
        let prefetcher = Prefetcher::new(DetailCache::new(), PrefetchPolicy::default());
        let items = batch(3);
        assert_eq!(ids(&prefetcher.neighbours(&items, 0)), vec!["2"]);
        assert!(prefetcher.neighbours(&items, 2).is_empty());
        assert_eq!(ids(&prefetcher.batch_head(&items)), vec!["1", "2"]);
    }

    #[test]
    fn neighbours_respect_batch_bounds() {
        let prefetcher = Prefetcher::new(
            DetailCache::new(),
            PrefetchPolicy {
                batch_head: 10,
                ahead: 2,
                behind: 2,
            },
        );
        let items = batch(4);
        assert_eq!(ids(&prefetcher.neighbours(&items, 1)), vec!["3", "4", "1"]);
        assert_eq!(ids(&prefetcher.neighbours(&items, 3)), vec!["3", "2"]);
        assert_eq!(prefetcher.batch_head(&items).len(), 4);
    }
}
