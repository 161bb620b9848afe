//! Content Store - Loaded Threads and Lazy Reply Fetches
//!
//! Holds the ordered list of loaded threads and coordinates fetches against
//! the [`ContentService`]. The store itself never spawns work: it hands out
//! futures, and whoever runs them feeds the results back through
//! [`ContentStore::apply_children`] / [`ContentStore::apply_more`] on the
//! foreground.
//!
//! # Deduplication
//!
//! ```text
//! fetch_children(t) ──► in_flight[t]? ──yes──► same Shared future
//!                            │
//!                            no ──► service.fetch_children(t).shared()
//!                                   stored in in_flight[t]
//! ```
//!
//! Every request is stamped with the store's epoch. A reload bumps the
//! epoch, so results that were in flight across a reload are discarded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::backend::{ContentError, ContentService};
use crate::content::{ContentItem, ThreadEntity, ThreadId, UserId};
use crate::navigation::{FeedBounds, FeedIndex};

/// Default number of threads per feed page
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Shared pending reply fetch
pub type ChildrenFuture = Shared<BoxFuture<'static, Result<Vec<ContentItem>, ContentError>>>;

/// Pending "load more" fetch
pub type MoreFuture = BoxFuture<'static, Result<Vec<ThreadEntity>, ContentError>>;

/// Outcome of [`ContentStore::fetch_children`]
#[derive(Clone)]
pub enum ChildrenFetch {
    /// Replies are already loaded; nothing to do
    AlreadyLoaded,
    /// A fetch is outstanding
    Pending(PendingChildren),
}

impl std::fmt::Debug for ChildrenFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyLoaded => write!(f, "AlreadyLoaded"),
            Self::Pending(p) => f
                .debug_struct("Pending")
                .field("thread_id", &p.thread_id)
                .field("epoch", &p.epoch)
                .field("joined", &p.joined)
                .finish(),
        }
    }
}

/// An outstanding reply fetch
#[derive(Clone)]
pub struct PendingChildren {
    /// Thread being fetched
    pub thread_id: ThreadId,
    /// Store epoch the request belongs to
    pub epoch: u64,
    /// Resolves once for every holder
    pub future: ChildrenFuture,
    /// `true` if this call joined a request that was already in flight
    pub joined: bool,
}

/// An outstanding "load more" fetch
pub struct PendingMore {
    /// Store epoch the request belongs to
    pub epoch: u64,
    /// The request
    pub future: MoreFuture,
}

/// Result of applying a reply fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChildrenApplied {
    /// Replies stored on the thread
    Applied {
        /// Thread's current index
        thread: usize,
        /// Number of replies stored
        count: usize,
    },
    /// The result belonged to an earlier epoch
    Stale,
    /// The thread is no longer loaded
    Missing,
    /// The fetch failed with a transient error; the thread stays unloaded
    /// and the next entry retries
    Failed,
    /// The service will not serve these replies (thread deleted, bad
    /// payload); the thread is marked as having none
    Gone,
}

/// The loaded feed
pub struct ContentStore {
    service: Arc<dyn ContentService>,
    user: UserId,
    page_size: usize,
    threads: Vec<ThreadEntity>,
    epoch: u64,
    in_flight: HashMap<ThreadId, ChildrenFuture>,
    more_in_flight: bool,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("service", &self.service.name())
            .field("user", &self.user)
            .field("threads", &self.threads.len())
            .field("epoch", &self.epoch)
            .field("in_flight", &self.in_flight.len())
            .field("more_in_flight", &self.more_in_flight)
            .finish()
    }
}

impl ContentStore {
    /// Create an empty store for `user`
    pub fn new(service: Arc<dyn ContentService>, user: UserId, page_size: usize) -> Self {
        Self {
            service,
            user,
            page_size: page_size.max(1),
            threads: Vec::new(),
            epoch: 0,
            in_flight: HashMap::new(),
            more_in_flight: false,
        }
    }

    /// Viewer whose feed this is
    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Current epoch
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Loaded threads in feed order
    #[must_use]
    pub fn threads(&self) -> &[ThreadEntity] {
        &self.threads
    }

    /// Thread at an index
    #[must_use]
    pub fn thread(&self, index: usize) -> Option<&ThreadEntity> {
        self.threads.get(index)
    }

    /// Item shown at a feed index
    #[must_use]
    pub fn item_at(&self, index: FeedIndex) -> Option<&ContentItem> {
        self.threads.get(index.thread)?.item_at(index.stitch)
    }

    /// Ids of every loaded thread, in order
    #[must_use]
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.threads.iter().map(|t| t.id.clone()).collect()
    }

    /// Index of a thread by id
    #[must_use]
    pub fn index_of(&self, id: &ThreadId) -> Option<usize> {
        self.threads.iter().position(|t| &t.id == id)
    }

    /// Number of loaded threads
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Whether no threads are loaded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Whether a reply fetch for `id` is outstanding
    #[must_use]
    pub fn is_fetching_children(&self, id: &ThreadId) -> bool {
        self.in_flight.contains_key(id)
    }

    /// Whether a "load more" fetch is outstanding
    #[must_use]
    pub fn is_fetching_more(&self) -> bool {
        self.more_in_flight
    }

    // ========================================================================
    // Whole-feed loads
    // ========================================================================

    /// Replace the feed with the first page for this user
    ///
    /// # Errors
    ///
    /// Returns the service error; the current feed is left untouched.
    pub async fn load_feed(&mut self, limit: usize) -> Result<usize, ContentError> {
        let threads = self.service.fetch_feed(&self.user, limit).await?;
        Ok(self.replace(threads))
    }

    /// Replace the feed with specific threads, in the given order
    ///
    /// Used to rebuild a saved session. Ids the service no longer knows are
    /// dropped, so the result may be shorter than `ids`.
    ///
    /// # Errors
    ///
    /// Returns the service error; the current feed is left untouched.
    pub async fn restore_threads(&mut self, ids: &[ThreadId]) -> Result<usize, ContentError> {
        let threads = self.service.fetch_threads(ids).await?;
        Ok(self.replace(threads))
    }

    /// Forget every outstanding fetch; their results will arrive stale
    ///
    /// Called when the tasks driving them were aborted, so the next trigger
    /// starts a fresh request instead of joining one nobody is polling.
    pub fn cancel_pending(&mut self) {
        if self.in_flight.is_empty() && !self.more_in_flight {
            return;
        }
        self.epoch += 1;
        self.in_flight.clear();
        self.more_in_flight = false;
        tracing::debug!(epoch = self.epoch, "Pending content fetches cancelled");
    }

    fn replace(&mut self, threads: Vec<ThreadEntity>) -> usize {
        self.epoch += 1;
        self.threads = threads;
        self.in_flight.clear();
        self.more_in_flight = false;
        tracing::info!(
            user = %self.user,
            threads = self.threads.len(),
            epoch = self.epoch,
            "Feed loaded"
        );
        self.threads.len()
    }

    // ========================================================================
    // Reply chains
    // ========================================================================

    /// Start (or join) the reply fetch for the thread at `index`
    ///
    /// Returns `None` if `index` is out of range.
    pub fn fetch_children(&mut self, index: usize) -> Option<ChildrenFetch> {
        let thread = self.threads.get(index)?;
        if thread.children_loaded {
            return Some(ChildrenFetch::AlreadyLoaded);
        }

        let thread_id = thread.id.clone();
        if let Some(existing) = self.in_flight.get(&thread_id) {
            tracing::trace!(thread = %thread_id, "Joining in-flight reply fetch");
            return Some(ChildrenFetch::Pending(PendingChildren {
                thread_id,
                epoch: self.epoch,
                future: existing.clone(),
                joined: true,
            }));
        }

        let service = Arc::clone(&self.service);
        let id = thread_id.clone();
        let future = async move { service.fetch_children(&id).await }
            .boxed()
            .shared();
        self.in_flight.insert(thread_id.clone(), future.clone());
        tracing::debug!(thread = %thread_id, index, "Reply fetch started");

        Some(ChildrenFetch::Pending(PendingChildren {
            thread_id,
            epoch: self.epoch,
            future,
            joined: false,
        }))
    }

    /// Store the outcome of a reply fetch
    pub fn apply_children(
        &mut self,
        thread_id: &ThreadId,
        epoch: u64,
        result: Result<Vec<ContentItem>, ContentError>,
    ) -> ChildrenApplied {
        if epoch != self.epoch {
            tracing::debug!(thread = %thread_id, epoch, current = self.epoch, "Stale reply fetch dropped");
            return ChildrenApplied::Stale;
        }
        self.in_flight.remove(thread_id);

        let Some(index) = self.index_of(thread_id) else {
            return ChildrenApplied::Missing;
        };

        match result {
            Ok(children) => {
                let count = children.len();
                self.threads[index].set_children(children);
                tracing::debug!(thread = %thread_id, index, count, "Replies loaded");
                ChildrenApplied::Applied {
                    thread: index,
                    count,
                }
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(thread = %thread_id, error = %e, "Reply fetch failed; will retry");
                ChildrenApplied::Failed
            }
            Err(e) => {
                tracing::info!(
                    thread = %thread_id,
                    error = %e,
                    "Replies unavailable; thread shown without replies"
                );
                self.threads[index].set_children(Vec::new());
                ChildrenApplied::Gone
            }
        }
    }

    // ========================================================================
    // Pagination
    // ========================================================================

    /// Start a "load more" fetch, unless one is outstanding
    pub fn fetch_more(&mut self) -> Option<PendingMore> {
        if self.more_in_flight {
            return None;
        }
        self.more_in_flight = true;

        let service = Arc::clone(&self.service);
        let user = self.user.clone();
        let after = self.threads.last().map(|t| t.id.clone());
        let limit = self.page_size;
        tracing::debug!(after = ?after, limit, "Load more started");

        let future = async move { service.fetch_more(&user, after.as_ref(), limit).await }.boxed();
        Some(PendingMore {
            epoch: self.epoch,
            future,
        })
    }

    /// Append a page of threads, skipping ids already loaded
    ///
    /// Returns the number of threads appended. Failures are logged and
    /// append nothing; the next prefetch trigger retries.
    pub fn apply_more(
        &mut self,
        epoch: u64,
        result: Result<Vec<ThreadEntity>, ContentError>,
    ) -> usize {
        if epoch != self.epoch {
            return 0;
        }
        self.more_in_flight = false;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "Load more failed");
                return 0;
            }
        };

        let mut seen: HashSet<ThreadId> = self.threads.iter().map(|t| t.id.clone()).collect();
        let before = self.threads.len();
        for thread in page {
            if seen.insert(thread.id.clone()) {
                self.threads.push(thread);
            }
        }
        let appended = self.threads.len() - before;
        tracing::debug!(appended, total = self.threads.len(), "More threads loaded");
        appended
    }
}

impl FeedBounds for ContentStore {
    fn thread_count(&self) -> usize {
        self.threads.len()
    }

    fn stitch_count(&self, thread: usize) -> usize {
        self.threads.get(thread).map_or(0, ThreadEntity::child_count)
    }

    fn children_loaded(&self, thread: usize) -> bool {
        self.threads.get(thread).is_some_and(|t| t.children_loaded)
    }

    fn thread_id(&self, thread: usize) -> Option<ThreadId> {
        self.threads.get(thread).map(|t| t.id.clone())
    }
}
