//! Content-addressed palette cache.
//!
//! GIF color tables are keyed by a 64-bit hash of their raw `R, G, B` bytes.
//! Identical tables (a global table used by every frame, or the same local
//! table repeated across frames) decode once and are shared as
//! `Arc<ColorTable>` afterwards.
//!
//! Entries expire after a period without access. Expiry is enforced either by
//! a background purge task (see [`ColorTableCache::spawn_purge_task`]) or,
//! when no purge task runs, inline on lookup. An entry that is still
//! referenced outside the cache is never evicted.
//!
//! # Example
//!
//! ```
//! use gifloop::color_table::{hash_table_bytes, ColorTableCache};
//!
//! let cache = ColorTableCache::with_defaults();
//! let raw = [0u8, 0, 0, 255, 255, 255];
//! let id = hash_table_bytes(&raw);
//!
//! let table = cache.get_or_insert(id, &raw);
//! assert_eq!(table.len(), 2);
//! assert!(cache.get(id).is_some());
//! ```

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use gifloop_core::PeriodicTask;
use gifloop_core::logging::targets;
use parking_lot::Mutex;

use crate::types::{Bgra8, Rgb8};

/// Hash a raw palette byte range.
///
/// Deterministic across runs and sensitive to both byte order and values.
pub fn hash_table_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

/// A decoded color table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorTable {
    colors: Vec<Rgb8>,
}

impl ColorTable {
    /// Decode a table from packed `R, G, B` triples.
    ///
    /// A trailing partial triple is ignored.
    pub fn from_rgb_bytes(bytes: &[u8]) -> Self {
        let colors = bytes
            .chunks_exact(3)
            .map(|c| Rgb8::new(c[0], c[1], c[2]))
            .collect();
        Self { colors }
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    /// Whether the table has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Look up an entry.
    #[inline]
    pub fn get(&self, index: u8) -> Option<Rgb8> {
        self.colors.get(index as usize).copied()
    }

    /// Look up an entry as an opaque framebuffer pixel.
    #[inline]
    pub fn bgra(&self, index: u8) -> Option<Bgra8> {
        self.get(index).map(Rgb8::to_bgra)
    }

    /// All entries in table order.
    pub fn colors(&self) -> &[Rgb8] {
        &self.colors
    }
}

/// Where a color table lives in the source stream.
///
/// Enough to re-read and re-register the table if the cache has since
/// dropped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTableRef {
    /// Content hash of the raw table bytes.
    pub id: u64,
    /// Stream offset of the first table byte.
    pub stream_offset: u64,
    /// Number of entries (a power of two between 2 and 256).
    pub entries: u16,
}

impl ColorTableRef {
    /// Size of the raw table in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.entries as usize * 3
    }
}

/// Configuration for a [`ColorTableCache`].
#[derive(Debug, Clone)]
pub struct ColorTableCacheConfig {
    /// Idle time after which an entry may be evicted.
    /// Default: 5 minutes. `None` disables expiry.
    pub ttl: Option<Duration>,
    /// How often the background purge runs.
    /// Default: 30 seconds. `None` disables the background task, in which
    /// case expired entries are evicted on lookup.
    pub purge_interval: Option<Duration>,
    /// Entry count above which the least recently used unreferenced entries
    /// are evicted on insert.
    /// Default: 256.
    pub soft_capacity: usize,
}

impl Default for ColorTableCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::from_secs(5 * 60)),
            purge_interval: Some(Duration::from_secs(30)),
            soft_capacity: 256,
        }
    }
}

impl ColorTableCacheConfig {
    /// Set the idle time-to-live.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Never expire entries.
    #[must_use]
    pub fn without_ttl(mut self) -> Self {
        self.ttl = None;
        self
    }

    /// Set the background purge interval.
    #[must_use]
    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = Some(interval);
        self
    }

    /// Do not run a background purge; expire entries inline on lookup.
    #[must_use]
    pub fn without_purge_task(mut self) -> Self {
        self.purge_interval = None;
        self
    }

    /// Set the soft entry limit.
    #[must_use]
    pub fn with_soft_capacity(mut self, capacity: usize) -> Self {
        self.soft_capacity = capacity;
        self
    }
}

struct CacheEntry {
    table: Arc<ColorTable>,
    last_access: Instant,
}

impl CacheEntry {
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.table) > 1
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        !self.in_use() && now.saturating_duration_since(self.last_access) > ttl
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<u64, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// A thread-safe, content-addressed cache of decoded color tables.
///
/// Shared between decoding sessions as `Arc<ColorTableCache>`.
pub struct ColorTableCache {
    config: ColorTableCacheConfig,
    inner: Mutex<CacheInner>,
}

impl ColorTableCache {
    /// Create a cache with the given configuration.
    pub fn new(config: ColorTableCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Create a cache with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ColorTableCacheConfig::default())
    }

    /// The active configuration.
    pub fn config(&self) -> &ColorTableCacheConfig {
        &self.config
    }

    /// Fetch the table for `id`, decoding `raw` and inserting it on a miss.
    ///
    /// The lookup and the insert happen under one lock, so concurrent callers
    /// for the same key decode at most once between them.
    pub fn get_or_insert(&self, id: u64, raw: &[u8]) -> Arc<ColorTable> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.entries.get_mut(&id) {
            entry.last_access = now;
            let table = entry.table.clone();
            inner.hits += 1;
            return table;
        }

        inner.misses += 1;
        let table = Arc::new(ColorTable::from_rgb_bytes(raw));
        inner.entries.insert(
            id,
            CacheEntry {
                table: table.clone(),
                last_access: now,
            },
        );
        tracing::trace!(target: targets::PALETTE, id = format_args!("{id:016x}"), entries = table.len(), "palette decoded");

        self.enforce_capacity(&mut inner);
        table
    }

    /// Fetch the table for `id`, refreshing its access time.
    ///
    /// Without a background purge task, an expired entry is evicted here and
    /// reported as a miss.
    pub fn get(&self, id: u64) -> Option<Arc<ColorTable>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match (self.config.ttl, self.config.purge_interval) {
            (Some(ttl), None) => inner
                .entries
                .get(&id)
                .is_some_and(|entry| entry.is_expired(now, ttl)),
            _ => false,
        };
        if expired {
            inner.entries.remove(&id);
            inner.evictions += 1;
            inner.misses += 1;
            tracing::trace!(target: targets::PALETTE, id = format_args!("{id:016x}"), "expired palette evicted on lookup");
            return None;
        }

        match inner.entries.get_mut(&id) {
            Some(entry) => {
                entry.last_access = now;
                let table = entry.table.clone();
                inner.hits += 1;
                Some(table)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Whether `id` is currently cached. Does not refresh the entry.
    pub fn contains(&self, id: u64) -> bool {
        self.inner.lock().entries.contains_key(&id)
    }

    /// Remove an entry regardless of its age or references.
    pub fn remove(&self, id: u64) -> Option<Arc<ColorTable>> {
        self.inner.lock().entries.remove(&id).map(|entry| entry.table)
    }

    /// Evict every unreferenced entry idle for longer than the TTL.
    ///
    /// Returns the number of evicted entries. A no-op when no TTL is set.
    pub fn purge(&self, now: Instant) -> usize {
        let Some(ttl) = self.config.ttl else {
            return 0;
        };

        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now, ttl));
        let evicted = before - inner.entries.len();
        inner.evictions += evicted as u64;

        if evicted > 0 {
            tracing::debug!(target: targets::PALETTE, evicted, remaining = inner.entries.len(), "palette cache purged");
        }
        evicted
    }

    /// Start the background purge task if one is configured.
    ///
    /// The task holds only a weak reference and ends on its own once the
    /// cache is dropped. Returns `None` when the configuration has no TTL or
    /// no purge interval.
    pub fn spawn_purge_task(self: &Arc<Self>) -> Option<PeriodicTask> {
        self.config.ttl?;
        let interval = self.config.purge_interval?;
        let cache: Weak<Self> = Arc::downgrade(self);

        Some(PeriodicTask::spawn(
            "gifloop-palette-purge",
            interval,
            move || match cache.upgrade() {
                Some(cache) => {
                    cache.purge(Instant::now());
                    ControlFlow::Continue(())
                }
                None => ControlFlow::Break(()),
            },
        ))
    }

    /// Number of cached tables.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop every entry. Outstanding `Arc`s stay valid.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> ColorTableCacheStats {
        let inner = self.inner.lock();
        ColorTableCacheStats {
            entries: inner.entries.len(),
            soft_capacity: self.config.soft_capacity,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    /// Reset hit/miss/eviction counters.
    pub fn reset_stats(&self) {
        let mut inner = self.inner.lock();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
    }

    fn enforce_capacity(&self, inner: &mut CacheInner) {
        let excess = inner.entries.len().saturating_sub(self.config.soft_capacity);
        if excess == 0 {
            return;
        }

        let mut candidates: Vec<(u64, Instant)> = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.in_use())
            .map(|(id, entry)| (*id, entry.last_access))
            .collect();
        candidates.sort_by_key(|(_, last_access)| *last_access);

        let mut evicted = 0;
        for (id, _) in candidates.into_iter().take(excess) {
            inner.entries.remove(&id);
            evicted += 1;
        }
        inner.evictions += evicted as u64;

        tracing::debug!(target: targets::PALETTE, evicted, remaining = inner.entries.len(), "palette cache over soft capacity");
    }
}

impl Default for ColorTableCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ColorTableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorTableCache")
            .field("config", &self.config)
            .field("entries", &self.len())
            .finish()
    }
}

/// Counters describing cache behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorTableCacheStats {
    /// Current number of entries.
    pub entries: usize,
    /// Configured soft capacity.
    pub soft_capacity: usize,
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that did not.
    pub misses: u64,
    /// Entries removed by expiry or capacity pressure.
    pub evictions: u64,
}

impl ColorTableCacheStats {
    /// Fraction of lookups that hit, in `0.0..=1.0`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
