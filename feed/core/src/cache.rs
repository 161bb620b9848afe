//! Pre-warmed decode pipeline cache with FIFO eviction
//!
//! This module provides a small, capacity-bounded pool of decode pipelines
//! for content that is about to become visible:
//! - FIFO (first inserted, first evicted) eviction policy
//! - Ownership hand-off on `take`
//! - Kill-driven `clear` through the teardown bus
//! - Hit/miss/eviction counters
//!
//! # Design
//!
//! The feed controller owns one `Arc<ResourceCache>` and injects it into
//! every playback cell. Preloads run on background tasks while `take` and
//! `clear` run on the foreground path, so every mutation goes through a
//! single mutex.
//!
//! # Eviction
//!
//! The victim is the entry with the smallest insertion sequence number.
//! Reads never refresh an entry; this is insertion order, not access
//! recency.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::content::{ContentId, ContentItem};
use crate::pipeline::{PipelineFactory, PipelineHandle};
use crate::teardown::{Generation, Subscription, TeardownBus, TeardownSignal, TeardownSubscriber};

/// Default number of pre-warmed pipelines
pub const DEFAULT_CACHE_CAPACITY: usize = 2;

/// A cached pipeline and its bookkeeping
#[derive(Debug)]
pub struct CacheEntry {
    /// Content this pipeline decodes
    pub content_id: ContentId,
    /// The warm pipeline
    pub handle: PipelineHandle,
    /// Insertion order; smallest is evicted first
    pub sequence: u64,
    /// When this entry was created
    pub created_at: Instant,
}

/// What a `preload` call did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreloadOutcome {
    /// A new pipeline was built and stored
    Inserted {
        /// Entry pushed out to make room, if any
        evicted: Option<ContentId>,
    },
    /// Already cached; nothing changed
    AlreadyCached,
    /// A Kill happened since the request was issued
    Stale,
    /// Pipeline construction failed (logged, never propagated)
    Failed,
    /// Capacity is zero
    Disabled,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held
    pub entries: usize,
    /// Configured capacity
    pub capacity: usize,
    /// Successful `take` calls
    pub hits: u64,
    /// `take` calls for absent ids
    pub misses: u64,
    /// Entries pushed out by `preload`
    pub evictions: u64,
    /// Pipelines built by `preload`
    pub preloads: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<ContentId, CacheEntry>,
    next_sequence: u64,
    stats: CacheStats,
}

impl CacheInner {
    /// Drop the entry with the smallest insertion sequence
    fn evict_oldest(&mut self) -> Option<ContentId> {
        let oldest = self
            .entries
            .values()
            .min_by_key(|entry| entry.sequence)
            .map(|entry| entry.content_id.clone())?;

        let mut entry = self.entries.remove(&oldest)?;
        entry.handle.release();
        self.stats.evictions = self.stats.evictions.saturating_add(1);
        Some(oldest)
    }
}

/// Bounded pool of pre-warmed decode pipelines
pub struct ResourceCache {
    capacity: usize,
    factory: Arc<dyn PipelineFactory>,
    bus: TeardownBus,
    inner: Mutex<CacheInner>,
    subscription: Mutex<Option<Subscription>>,
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("capacity", &self.capacity)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl ResourceCache {
    /// Create a cache and subscribe it to the teardown bus
    #[must_use]
    pub fn new(capacity: usize, factory: Arc<dyn PipelineFactory>, bus: &TeardownBus) -> Arc<Self> {
        let cache = Arc::new(Self {
            capacity,
            factory,
            bus: bus.clone(),
            inner: Mutex::new(CacheInner::default()),
            subscription: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&cache);
        let subscription = bus.subscribe(weak);
        *cache.subscription.lock() = Some(subscription);

        tracing::debug!(capacity, "Resource cache created");
        cache
    }

    /// Create a cache with the default capacity of 2
    #[must_use]
    pub fn with_default_capacity(factory: Arc<dyn PipelineFactory>, bus: &TeardownBus) -> Arc<Self> {
        Self::new(DEFAULT_CACHE_CAPACITY, factory, bus)
    }

    /// Warm a pipeline for an item that is about to become visible
    ///
    /// No-op if the id is already cached. At capacity, the oldest entry by
    /// insertion is evicted first. Construction failures are swallowed.
    pub fn preload(&self, item: &ContentItem) -> PreloadOutcome {
        self.preload_inner(item, None)
    }

    /// Like [`ResourceCache::preload`], but dropped if a Kill was emitted
    /// after `generation` was observed
    pub fn preload_if_current(&self, item: &ContentItem, generation: Generation) -> PreloadOutcome {
        self.preload_inner(item, Some(generation))
    }

    fn preload_inner(&self, item: &ContentItem, generation: Option<Generation>) -> PreloadOutcome {
        if self.capacity == 0 {
            return PreloadOutcome::Disabled;
        }

        let mut inner = self.inner.lock();

        // Checked under the lock so a concurrent Kill cannot slip in between
        if let Some(generation) = generation {
            if !self.bus.is_current(generation) {
                tracing::debug!(content_id = %item.id, "Dropping stale preload");
                return PreloadOutcome::Stale;
            }
        }

        if inner.entries.contains_key(&item.id) {
            return PreloadOutcome::AlreadyCached;
        }

        let handle = match self.factory.create(item) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::debug!(content_id = %item.id, error = %e, "Preload failed");
                return PreloadOutcome::Failed;
            }
        };

        let mut evicted = None;
        while inner.entries.len() >= self.capacity {
            match inner.evict_oldest() {
                Some(id) => {
                    tracing::debug!(content_id = %id, "Evicted oldest cached pipeline");
                    evicted = Some(id);
                }
                None => break,
            }
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.entries.insert(
            item.id.clone(),
            CacheEntry {
                content_id: item.id.clone(),
                handle,
                sequence,
                created_at: Instant::now(),
            },
        );
        inner.stats.preloads = inner.stats.preloads.saturating_add(1);

        tracing::debug!(content_id = %item.id, sequence, "Preloaded pipeline");
        PreloadOutcome::Inserted { evicted }
    }

    /// Remove and return a warm pipeline; the caller now owns its release
    ///
    /// Returns `None` without side effects if the id is not cached.
    pub fn take(&self, id: &ContentId) -> Option<PipelineHandle> {
        let mut inner = self.inner.lock();
        match inner.entries.remove(id) {
            Some(entry) => {
                inner.stats.hits = inner.stats.hits.saturating_add(1);
                tracing::debug!(content_id = %id, "Cache hit");
                Some(entry.handle)
            }
            None => {
                inner.stats.misses = inner.stats.misses.saturating_add(1);
                None
            }
        }
    }

    /// Release every held pipeline and empty the cache
    ///
    /// Returns the number of pipelines released.
    pub fn clear(&self) -> usize {
        let drained: Vec<CacheEntry> = {
            let mut inner = self.inner.lock();
            inner.entries.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for mut entry in drained {
            entry.handle.release();
        }
        if count > 0 {
            tracing::debug!(released = count, "Cache cleared");
        }
        count
    }

    /// Whether an id is cached (does not affect eviction order)
    #[must_use]
    pub fn contains(&self, id: &ContentId) -> bool {
        self.inner.lock().entries.contains_key(id)
    }

    /// Cached ids, oldest insertion first
    #[must_use]
    pub fn cached_ids(&self) -> Vec<ContentId> {
        let inner = self.inner.lock();
        let mut entries: Vec<&CacheEntry> = inner.entries.values().collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries.into_iter().map(|entry| entry.content_id.clone()).collect()
    }

    /// Number of cached pipelines
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Configured capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.capacity,
            ..inner.stats
        }
    }
}

impl TeardownSubscriber for ResourceCache {
    fn on_teardown(&self, signal: TeardownSignal) {
        // Cached pipelines are never playing, so only Kill has work to do
        if signal.releases_pipelines() {
            self.clear();
        }
    }

    fn subscriber_label(&self) -> String {
        "resource-cache".to_string()
    }
}
