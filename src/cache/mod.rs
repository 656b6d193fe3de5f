//! Bounded LRU cache with per-entry TTL expiry.
//!
//! [`TtlLruCache`] is a concurrent key/value store with three eviction paths:
//! capacity-driven LRU eviction on insert, lazy expiry on `get`, and a
//! background sweeper task that periodically walks the whole cache removing
//! expired entries. The proxy uses it keyed by request URL, but the store is
//! generic and carries no HTTP types.
//!
//! Internally every entry lives in a slot arena indexed by `usize`; the
//! recency list is a doubly-linked list threaded through slot indices and the
//! key map points at the same slots. This gives the cache a single owner for
//! every entry while the list and map both reference it, reconciled under one
//! lock.

mod builder;

pub use builder::CacheBuilder;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors surfaced by cache construction and misuse.
///
/// Runtime operations on a correctly constructed cache never fail; every
/// variant here is reachable only through a caller bug.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A construction option was rejected.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(&'static str),
    /// A negative TTL was passed to [`TtlLruCache::set_with_ttl`].
    #[error("ttl_seconds must be >= 0, got {0}")]
    InvalidTtl(i64),
    /// Eviction was required but the recency list was empty.
    #[error("eviction required on an empty recency list")]
    InvalidState,
}

/// One arena slot. `prev`/`next` thread the recency list through slot
/// indices; `None` expiry means the entry never expires.
struct Slot<K, V> {
    key: K,
    value: V,
    expires_at: Option<Instant>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Everything guarded by the cache lock. The list head is the MRU end.
struct Inner<K, V> {
    capacity: usize,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    map: HashMap<K, usize>,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash,
{
    fn slot(&self, idx: usize) -> &Slot<K, V> {
        self.slots[idx].as_ref().expect("recency list points at a live slot")
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Slot<K, V> {
        self.slots[idx].as_mut().expect("recency list points at a live slot")
    }

    fn is_expired(&self, idx: usize, now: Instant) -> bool {
        self.slot(idx).expires_at.is_some_and(|deadline| now > deadline)
    }

    /// Detach a slot from the recency list without freeing it.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slot(idx);
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slot_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slot_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let slot = self.slot_mut(idx);
        slot.prev = None;
        slot.next = None;
    }

    /// Attach a detached slot at the MRU end.
    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let slot = self.slot_mut(idx);
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head {
            Some(h) => self.slot_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    /// Remove an entry entirely: list, map, and arena slot.
    fn remove(&mut self, idx: usize) {
        self.unlink(idx);
        let slot = self.slots[idx].take().expect("recency list points at a live slot");
        self.map.remove(&slot.key);
        self.free.push(idx);
    }

    fn alloc(&mut self, slot: Slot<K, V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }
}

/// Sweeper control. Stopping cancels the token and installs a fresh one so
/// the sweeper can be started again later.
struct SweeperCtl {
    token: CancellationToken,
    running: bool,
}

/// Concurrent, capacity-bounded LRU store with per-entry expiry.
///
/// All operations are synchronous and lock-bounded; nothing blocks on I/O
/// while the lock is held. Reads that update recency (`get`) and all writes
/// take the exclusive lock; `peek`, `len` and `snapshot` take the shared
/// read lock.
pub struct TtlLruCache<K, V> {
    inner: Arc<RwLock<Inner<K, V>>>,
    default_ttl: Duration,
    cleanup_interval: Duration,
    sweeper: Mutex<SweeperCtl>,
}

impl<K, V> std::fmt::Debug for TtlLruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlLruCache")
            .field("default_ttl", &self.default_ttl)
            .field("cleanup_interval", &self.cleanup_interval)
            .finish_non_exhaustive()
    }
}

impl<K, V> TtlLruCache<K, V> {
    /// Stops the background sweeper if it is running. The sweeper can be
    /// started again afterwards; the stored data stays readable either way.
    pub fn stop_sweeper(&self) {
        let mut ctl = self.sweeper.lock().unwrap();
        if ctl.running {
            ctl.token.cancel();
            ctl.token = CancellationToken::new();
            ctl.running = false;
            debug!("cache sweeper stopped");
        }
    }

    /// Stops the sweeper. Equivalent to [`stop_sweeper`](Self::stop_sweeper).
    pub fn close(&self) {
        self.stop_sweeper();
    }
}

impl<K, V> Drop for TtlLruCache<K, V> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<K, V> TtlLruCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Validated construction happens in [`CacheBuilder::build`].
    pub(crate) fn with_options(
        capacity: usize,
        default_ttl: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                capacity,
                slots: Vec::with_capacity(capacity),
                free: Vec::new(),
                head: None,
                tail: None,
                map: HashMap::with_capacity(capacity),
            })),
            default_ttl,
            cleanup_interval,
            sweeper: Mutex::new(SweeperCtl {
                token: CancellationToken::new(),
                running: false,
            }),
        }
    }

    /// Returns the value for `key` if present and not expired, promoting the
    /// entry to most-recently-used. An expired entry is removed here and the
    /// call reports a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.write().unwrap();
        let idx = *inner.map.get(key)?;
        if inner.is_expired(idx, now) {
            inner.remove(idx);
            return None;
        }
        inner.unlink(idx);
        inner.push_front(idx);
        Some(inner.slot(idx).value.clone())
    }

    /// Same visibility as [`get`](Self::get) but leaves the recency order
    /// untouched and never removes anything.
    pub fn peek(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let inner = self.inner.read().unwrap();
        let idx = *inner.map.get(key)?;
        if inner.is_expired(idx, now) {
            return None;
        }
        Some(inner.slot(idx).value.clone())
    }

    /// Stores `value` with the cache's default TTL. A zero default TTL means
    /// the entry never expires.
    pub fn set(&self, key: K, value: V) -> Result<(), CacheError> {
        let expires_at = if self.default_ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + self.default_ttl)
        };
        self.store(key, value, expires_at)
    }

    /// Stores `value` with an explicit TTL in seconds. `ttl_seconds == 0`
    /// means the entry never expires; a negative TTL is a caller bug.
    pub fn set_with_ttl(&self, key: K, value: V, ttl_seconds: i64) -> Result<(), CacheError> {
        let expires_at = match ttl_seconds {
            secs if secs > 0 => Some(Instant::now() + Duration::from_secs(secs as u64)),
            0 => None,
            secs => return Err(CacheError::InvalidTtl(secs)),
        };
        self.store(key, value, expires_at)
    }

    fn store(&self, key: K, value: V, expires_at: Option<Instant>) -> Result<(), CacheError> {
        let mut inner = self.inner.write().unwrap();

        // Overwrite in place and promote; never evicts.
        if let Some(&idx) = inner.map.get(&key) {
            {
                let slot = inner.slot_mut(idx);
                slot.value = value;
                slot.expires_at = expires_at;
            }
            inner.unlink(idx);
            inner.push_front(idx);
            return Ok(());
        }

        if inner.map.len() >= inner.capacity {
            let tail = inner.tail.ok_or(CacheError::InvalidState)?;
            inner.remove(tail);
        }

        let idx = inner.alloc(Slot {
            key: key.clone(),
            value,
            expires_at,
            prev: None,
            next: None,
        });
        inner.push_front(idx);
        inner.map.insert(key, idx);
        Ok(())
    }

    /// Removes `key` if present; no-op otherwise.
    pub fn delete(&self, key: &K) {
        let mut inner = self.inner.write().unwrap();
        if let Some(&idx) = inner.map.get(key) {
            inner.remove(idx);
        }
    }

    /// Current entry count. May include entries that are expired but not yet
    /// swept; those disappear lazily on access or at the next sweep.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().map.len()
    }

    /// Shallow copy of the current contents for diagnostics. Expired entries
    /// that have not been swept yet are included.
    pub fn snapshot(&self) -> HashMap<K, V> {
        let inner = self.inner.read().unwrap();
        inner
            .map
            .iter()
            .map(|(key, &idx)| (key.clone(), inner.slot(idx).value.clone()))
            .collect()
    }

    /// Launches the background sweeper. No-op when it is already running, so
    /// at most one sweeper task exists per cache.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sweeper(&self) {
        let mut ctl = self.sweeper.lock().unwrap();
        if ctl.running {
            debug!("cache sweeper already running");
            return;
        }
        ctl.running = true;

        let token = ctl.token.clone();
        let inner = Arc::clone(&self.inner);
        let period = self.cleanup_interval;
        debug!(period_secs = period.as_secs(), "cache sweeper started");
        tokio::spawn(async move {
            let first_tick = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(first_tick, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => Self::sweep(&inner),
                    _ = token.cancelled() => return,
                }
            }
        });
    }

    /// One sweeper pass: walk the recency list front to back and drop every
    /// expired entry. Takes the write lock exactly once.
    fn sweep(inner: &Arc<RwLock<Inner<K, V>>>) {
        let now = Instant::now();
        let mut inner = inner.write().unwrap();
        let mut cursor = inner.head;
        let mut removed = 0usize;
        while let Some(idx) = cursor {
            cursor = inner.slot(idx).next;
            if inner.is_expired(idx, now) {
                inner.remove(idx);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "sweeper removed expired entries");
        }
    }

    /// Recency order from MRU to LRU, for tests.
    #[cfg(test)]
    fn recency_keys(&self) -> Vec<K> {
        let inner = self.inner.read().unwrap();
        let mut keys = Vec::new();
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            let slot = inner.slot(idx);
            keys.push(slot.key.clone());
            cursor = slot.next;
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(capacity: usize) -> TtlLruCache<String, u32> {
        CacheBuilder::new(capacity)
            .default_ttl(Duration::from_secs(100))
            .auto_sweep(false)
            .build()
            .unwrap()
    }

    fn key(s: &str) -> String {
        s.to_string()
    }

    // ── Basic operations ──────────────────────────────────────────────────────

    #[test]
    fn set_then_get_returns_value() {
        let cache = small_cache(4);
        cache.set(key("a"), 1).unwrap();
        assert_eq!(cache.get(&key("a")), Some(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_missing_key_is_none() {
        let cache = small_cache(4);
        assert_eq!(cache.get(&key("nope")), None);
    }

    #[test]
    fn overwrite_replaces_value() {
        let cache = small_cache(4);
        cache.set(key("a"), 1).unwrap();
        cache.set(key("a"), 2).unwrap();
        assert_eq!(cache.get(&key("a")), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn delete_removes_entry() {
        let cache = small_cache(4);
        cache.set(key("a"), 1).unwrap();
        cache.delete(&key("a"));
        assert_eq!(cache.peek(&key("a")), None);
        assert_eq!(cache.len(), 0);

        // Deleting again is a no-op.
        cache.delete(&key("a"));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn snapshot_copies_all_entries() {
        let cache = small_cache(4);
        cache.set(key("a"), 1).unwrap();
        cache.set(key("b"), 2).unwrap();
        let snap = cache.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[&key("a")], 1);
        assert_eq!(snap[&key("b")], 2);
    }

    // ── Recency order ─────────────────────────────────────────────────────────

    #[test]
    fn inserts_leave_reverse_insertion_order() {
        let cache = small_cache(4);
        cache.set(key("a"), 1).unwrap();
        cache.set(key("b"), 2).unwrap();
        cache.set(key("c"), 3).unwrap();
        assert_eq!(cache.recency_keys(), vec![key("c"), key("b"), key("a")]);
    }

    #[test]
    fn get_promotes_to_mru() {
        let cache = small_cache(4);
        cache.set(key("a"), 1).unwrap();
        cache.set(key("b"), 2).unwrap();
        cache.get(&key("a"));
        assert_eq!(cache.recency_keys(), vec![key("a"), key("b")]);
    }

    #[test]
    fn peek_does_not_promote() {
        let cache = small_cache(4);
        cache.set(key("a"), 1).unwrap();
        cache.set(key("b"), 2).unwrap();
        assert_eq!(cache.peek(&key("a")), Some(1));
        assert_eq!(cache.recency_keys(), vec![key("b"), key("a")]);
    }

    #[test]
    fn overwrite_promotes_to_mru() {
        let cache = small_cache(4);
        cache.set(key("a"), 1).unwrap();
        cache.set(key("b"), 2).unwrap();
        cache.set(key("a"), 3).unwrap();
        assert_eq!(cache.recency_keys(), vec![key("a"), key("b")]);
    }

    // ── Eviction ──────────────────────────────────────────────────────────────

    #[test]
    fn insert_over_capacity_evicts_lru_tail() {
        let cache = small_cache(2);
        cache.set(key("a"), 1).unwrap();
        cache.set(key("b"), 2).unwrap();
        cache.set(key("c"), 3).unwrap();
        assert_eq!(cache.peek(&key("a")), None);
        assert_eq!(cache.peek(&key("b")), Some(2));
        assert_eq!(cache.peek(&key("c")), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn overwriting_existing_key_never_evicts() {
        let cache = small_cache(2);
        cache.set(key("a"), 1).unwrap();
        cache.set(key("b"), 2).unwrap();
        cache.set(key("b"), 20).unwrap();
        assert_eq!(cache.peek(&key("a")), Some(1));
        assert_eq!(cache.peek(&key("b")), Some(20));
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let cache = small_cache(3);
        for i in 0..20u32 {
            cache.set(format!("k{i}"), i).unwrap();
            assert!(cache.len() <= 3);
        }
        // Freed slots are reused rather than growing the arena.
        assert_eq!(cache.len(), 3);
    }

    // ── Expiry ────────────────────────────────────────────────────────────────

    #[test]
    fn expired_entry_is_a_miss_and_removed_on_get() {
        let cache = small_cache(4);
        cache.set_with_ttl(key("a"), 1, 1).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn expired_entry_is_a_miss_but_kept_on_peek() {
        let cache = small_cache(4);
        cache.set_with_ttl(key("a"), 1, 1).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(cache.peek(&key("a")), None);
        // peek is read-only; the entry waits for a get or a sweep.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_ttl_never_expires() {
        let cache = small_cache(4);
        cache.set_with_ttl(key("a"), 1, 0).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(cache.get(&key("a")), Some(1));
    }

    #[test]
    fn negative_ttl_is_rejected() {
        let cache = small_cache(4);
        let err = cache.set_with_ttl(key("a"), 1, -1).unwrap_err();
        assert!(matches!(err, CacheError::InvalidTtl(-1)));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn zero_default_ttl_means_set_never_expires() {
        let cache: TtlLruCache<String, u32> = CacheBuilder::new(4)
            .default_ttl(Duration::ZERO)
            .auto_sweep(false)
            .build()
            .unwrap();
        cache.set(key("a"), 1).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(cache.get(&key("a")), Some(1));
    }

    // ── Sweeper ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn sweeper_removes_expired_entries() {
        let cache: TtlLruCache<String, u32> = CacheBuilder::new(8)
            .cleanup_interval(Duration::from_secs(1))
            .auto_sweep(false)
            .build()
            .unwrap();
        cache.start_sweeper();
        cache.set_with_ttl(key("short"), 1, 1).unwrap();
        cache.set_with_ttl(key("long"), 2, 60).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek(&key("long")), Some(2));
    }

    #[tokio::test]
    async fn sweeper_can_be_restarted_after_stop() {
        let cache: TtlLruCache<String, u32> = CacheBuilder::new(8)
            .cleanup_interval(Duration::from_secs(1))
            .auto_sweep(false)
            .build()
            .unwrap();
        cache.start_sweeper();
        cache.stop_sweeper();
        cache.start_sweeper();

        cache.set_with_ttl(key("a"), 1, 1).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn stopped_sweeper_leaves_data_readable() {
        let cache: TtlLruCache<String, u32> = CacheBuilder::new(8)
            .cleanup_interval(Duration::from_secs(1))
            .auto_sweep(false)
            .build()
            .unwrap();
        cache.set(key("a"), 1).unwrap();
        cache.start_sweeper();
        cache.close();
        assert_eq!(cache.get(&key("a")), Some(1));
    }
}
