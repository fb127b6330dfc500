//! Diff cache using moka
//!
//! Diffs are a pure function of two code strings, so they are memoized by
//! the pair of content hashes and recomputed on a miss.

use crate::diff::unified_diff;
use crate::hash::ContentHash;
use crate::version::Version;
use moka::sync::Cache;
use std::sync::Arc;

/// Default number of cached diffs
pub const DEFAULT_CAPACITY: u64 = 1_024;

/// Bounded, concurrent diff memo keyed by `(old hash, new hash)`
#[derive(Debug, Clone)]
pub struct DiffCache {
    inner: Cache<(ContentHash, ContentHash), Arc<str>>,
}

impl Default for DiffCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DiffCache {
    /// Create new cache with max capacity
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    /// Diff between two versions
    #[must_use]
    pub fn between(&self, from: &Version, to: &Version) -> Arc<str> {
        self.get_or_compute(from.content_hash, &from.code, to.content_hash, &to.code)
    }

    /// Diff between two texts
    #[must_use]
    pub fn texts(&self, old: &str, new: &str) -> Arc<str> {
        self.get_or_compute(ContentHash::of(old), old, ContentHash::of(new), new)
    }

    fn get_or_compute(
        &self,
        old_hash: ContentHash,
        old: &str,
        new_hash: ContentHash,
        new: &str,
    ) -> Arc<str> {
        self.inner
            .get_with((old_hash, new_hash), || Arc::from(unified_diff(old, new)))
    }

    /// Number of cached entries (approximate until pending tasks run)
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    /// Clear all entries
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memoizes_by_content() {
        let cache = DiffCache::new(16);
        let first = cache.texts("a\n", "b\n");
        let second = cache.texts("a\n", "b\n");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(&*first, unified_diff("a\n", "b\n"));
    }

    #[test]
    fn test_direction_matters() {
        let cache = DiffCache::default();
        assert_ne!(cache.texts("a\n", "b\n"), cache.texts("b\n", "a\n"));
    }
}
