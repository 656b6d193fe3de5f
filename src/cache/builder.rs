//! Cache construction options.

use std::hash::Hash;
use std::time::Duration;

use super::{CacheError, TtlLruCache};

const DEFAULT_TTL: Duration = Duration::from_secs(60);
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Builds a [`TtlLruCache`] from a capacity plus named options.
///
/// ```no_run
/// use std::time::Duration;
/// use palisade::cache::CacheBuilder;
///
/// let cache = CacheBuilder::new(100)
///     .default_ttl(Duration::from_secs(60))
///     .cleanup_interval(Duration::from_secs(30))
///     .build::<String, String>()
///     .unwrap();
/// # drop(cache);
/// ```
#[derive(Debug, Clone)]
pub struct CacheBuilder {
    capacity: usize,
    default_ttl: Duration,
    cleanup_interval: Duration,
    auto_sweep: bool,
}

impl CacheBuilder {
    /// Starts a builder for a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            default_ttl: DEFAULT_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            auto_sweep: true,
        }
    }

    /// TTL applied by `set`. Zero means entries stored through `set` never
    /// expire.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Period of the background sweep. Must be positive.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Whether `build` launches the sweeper immediately. Defaults to true;
    /// building with auto-sweep requires a running tokio runtime.
    pub fn auto_sweep(mut self, enabled: bool) -> Self {
        self.auto_sweep = enabled;
        self
    }

    /// Validates the options and constructs the cache.
    pub fn build<K, V>(self) -> Result<TtlLruCache<K, V>, CacheError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        if self.capacity == 0 {
            return Err(CacheError::InvalidConfig("capacity must be > 0"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(CacheError::InvalidConfig("cleanup interval must be > 0"));
        }

        let cache = TtlLruCache::with_options(self.capacity, self.default_ttl, self.cleanup_interval);
        if self.auto_sweep {
            cache.start_sweeper();
        }
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
        let err = CacheBuilder::new(0)
            .auto_sweep(false)
            .build::<String, u32>()
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig(_)));
    }

    #[test]
    fn zero_cleanup_interval_is_rejected() {
        let err = CacheBuilder::new(10)
            .cleanup_interval(Duration::ZERO)
            .auto_sweep(false)
            .build::<String, u32>()
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig(_)));
    }

    #[test]
    fn defaults_are_applied() {
        let builder = CacheBuilder::new(10);
        assert_eq!(builder.default_ttl, DEFAULT_TTL);
        assert_eq!(builder.cleanup_interval, DEFAULT_CLEANUP_INTERVAL);
        assert!(builder.auto_sweep);
    }
}
