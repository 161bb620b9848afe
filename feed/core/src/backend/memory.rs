//! In-Memory Backends
//!
//! Content and position backends that live entirely in process. Used by
//! the simulator and the test suite; the content service counts calls and
//! can be told to fail so fetch dedupe and retry paths are observable.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use super::traits::{ContentError, ContentService, PositionBackend};
use crate::content::{ContentItem, ThreadEntity, ThreadId, UserId};
use crate::position::{FeedPosition, PositionError};

/// Call counters for [`InMemoryContentService`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServiceCalls {
    /// `fetch_feed` calls
    pub feed: usize,
    /// `fetch_children` calls
    pub children: usize,
    /// `fetch_more` calls
    pub more: usize,
    /// `fetch_threads` calls
    pub threads: usize,
}

/// Content service backed by an in-process thread list
#[derive(Debug, Default)]
pub struct InMemoryContentService {
    /// Feed order; roots only
    order: RwLock<Vec<ThreadEntity>>,
    /// Reply chains by thread
    children: DashMap<ThreadId, Vec<ContentItem>>,
    /// Threads whose reply fetch fails
    failing_children: Mutex<HashSet<ThreadId>>,
    fail_more: AtomicBool,
    latency: Mutex<Option<Duration>>,
    feed_calls: AtomicUsize,
    children_calls: AtomicUsize,
    more_calls: AtomicUsize,
    threads_calls: AtomicUsize,
}

impl InMemoryContentService {
    /// Create an empty service
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a thread with its reply chain
    #[must_use]
    pub fn with_thread(self, root: ThreadEntity, children: Vec<ContentItem>) -> Self {
        self.push_thread(root, children);
        self
    }

    /// Append a thread with its reply chain
    pub fn push_thread(&self, thread: ThreadEntity, children: Vec<ContentItem>) {
        let unloaded = ThreadEntity::new(thread.id.clone(), thread.root);
        self.children.insert(unloaded.id.clone(), children);
        self.order.write().push(unloaded);
    }

    /// Delete a thread, as if its author removed it
    pub fn remove_thread(&self, id: &ThreadId) {
        self.order.write().retain(|t| &t.id != id);
        self.children.remove(id);
    }

    /// Make reply fetches for a thread fail (or succeed again)
    pub fn set_children_failing(&self, id: &ThreadId, failing: bool) {
        let mut set = self.failing_children.lock();
        if failing {
            set.insert(id.clone());
        } else {
            set.remove(id);
        }
    }

    /// Make `fetch_more` fail (or succeed again)
    pub fn set_more_failing(&self, failing: bool) {
        self.fail_more.store(failing, Ordering::SeqCst);
    }

    /// Delay every response by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Number of threads in the service
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.order.read().len()
    }

    /// Calls received so far
    #[must_use]
    pub fn calls(&self) -> ServiceCalls {
        ServiceCalls {
            feed: self.feed_calls.load(Ordering::SeqCst),
            children: self.children_calls.load(Ordering::SeqCst),
            more: self.more_calls.load(Ordering::SeqCst),
            threads: self.threads_calls.load(Ordering::SeqCst),
        }
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ContentService for InMemoryContentService {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch_feed(
        &self,
        _user: &UserId,
        limit: usize,
    ) -> Result<Vec<ThreadEntity>, ContentError> {
        self.feed_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        Ok(self.order.read().iter().take(limit).cloned().collect())
    }

    async fn fetch_children(&self, thread: &ThreadId) -> Result<Vec<ContentItem>, ContentError> {
        self.children_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.failing_children.lock().contains(thread) {
            return Err(ContentError::Unavailable(format!(
                "replies for {thread} temporarily unavailable"
            )));
        }
        self.children
            .get(thread)
            .map(|c| c.value().clone())
            .ok_or_else(|| ContentError::ThreadNotFound(thread.clone()))
    }

    async fn fetch_more(
        &self,
        _user: &UserId,
        after: Option<&ThreadId>,
        limit: usize,
    ) -> Result<Vec<ThreadEntity>, ContentError> {
        self.more_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.fail_more.load(Ordering::SeqCst) {
            return Err(ContentError::Transport("connection reset".to_string()));
        }

        let order = self.order.read();
        let start = after
            .and_then(|id| order.iter().position(|t| &t.id == id))
            .map_or(0, |i| i + 1);
        Ok(order.iter().skip(start).take(limit).cloned().collect())
    }

    async fn fetch_threads(&self, ids: &[ThreadId]) -> Result<Vec<ThreadEntity>, ContentError> {
        self.threads_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let order = self.order.read();
        Ok(ids
            .iter()
            .filter_map(|id| order.iter().find(|t| &t.id == id).cloned())
            .collect())
    }
}

/// Position backend holding one position in memory
#[derive(Debug, Default)]
pub struct MemoryPositionBackend {
    slot: Mutex<Option<FeedPosition>>,
    saves: AtomicUsize,
}

impl MemoryPositionBackend {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a stored position
    #[must_use]
    pub fn with_position(position: FeedPosition) -> Self {
        Self {
            slot: Mutex::new(Some(position)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed saves
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Currently stored position
    #[must_use]
    pub fn stored(&self) -> Option<FeedPosition> {
        self.slot.lock().clone()
    }
}

#[async_trait]
impl PositionBackend for MemoryPositionBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, position: &FeedPosition) -> Result<(), PositionError> {
        *self.slot.lock() = Some(position.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Result<Option<FeedPosition>, PositionError> {
        Ok(self.slot.lock().clone())
    }

    async fn clear(&self) -> Result<(), PositionError> {
        *self.slot.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(id: &str) -> ThreadEntity {
        ThreadEntity::new(
            ThreadId::new(id),
            ContentItem::new(
                format!("{id}-root"),
                format!("https://cdn.example/{id}.mp4"),
                Duration::from_secs(10),
                UserId::new("u"),
            ),
        )
    }

    fn service(n: usize) -> InMemoryContentService {
        let service = InMemoryContentService::new();
        for i in 0..n {
            service.push_thread(thread(&format!("t{i}")), Vec::new());
        }
        service
    }

    #[tokio::test]
    async fn test_feed_pages() {
        let service = service(5);
        let user = UserId::new("viewer");

        let first = service.fetch_feed(&user, 2).await.unwrap();
        assert_eq!(first.len(), 2);

        let next = service
            .fetch_more(&user, Some(&first[1].id), 2)
            .await
            .unwrap();
        let ids: Vec<_> = next.iter().map(|t| t.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["t2", "t3"]);
        assert_eq!(service.calls().more, 1);
    }

    #[tokio::test]
    async fn test_fetch_threads_skips_missing() {
        let service = service(4);
        service.remove_thread(&ThreadId::new("t1"));

        let found = service
            .fetch_threads(&[ThreadId::new("t3"), ThreadId::new("t1"), ThreadId::new("t0")])
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t3", "t0"]);
    }

    #[tokio::test]
    async fn test_children_failure_toggle() {
        let service = service(1);
        let id = ThreadId::new("t0");

        service.set_children_failing(&id, true);
        assert!(service.fetch_children(&id).await.is_err());
        service.set_children_failing(&id, false);
        assert!(service.fetch_children(&id).await.is_ok());
    }
}
