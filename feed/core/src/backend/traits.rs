//! Content and Position Backend Traits
//!
//! The feed core talks to two external collaborators: the content service
//! that hands out threads and reply chains, and the persistence layer that
//! remembers where the user left off. Both sit behind async traits so the
//! core never depends on a transport or storage format.
//!
//! # Design Philosophy
//!
//! - Implementations own their transport details (HTTP, files, memory)
//! - Errors are typed per concern so the controller can decide what is
//!   retryable
//! - Every method is `&self`; implementations synchronize internally and
//!   are shared as `Arc<dyn Trait>` across background tasks

use async_trait::async_trait;
use thiserror::Error;

use crate::content::{ContentItem, ThreadEntity, ThreadId, UserId};
use crate::position::{FeedPosition, PositionError};

/// Errors reported by a [`ContentService`]
///
/// `Clone` because a single pending fetch is shared by every caller that
/// asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    /// The request never produced a response
    #[error("Content transport error: {0}")]
    Transport(String),

    /// The service answered with a failure status
    #[error("Content service returned {status} for {url}")]
    Status {
        /// HTTP-style status code
        status: u16,
        /// Request target
        url: String,
    },

    /// The response body could not be decoded
    #[error("Failed to decode content response: {0}")]
    Decode(String),

    /// The thread no longer exists on the service
    #[error("Thread not found: {0}")]
    ThreadNotFound(ThreadId),

    /// The service is reachable but refused the request
    #[error("Content service unavailable: {0}")]
    Unavailable(String),
}

impl ContentError {
    /// Whether retrying the same request later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Unavailable(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::ThreadNotFound(_) => false,
        }
    }
}

/// Source of threads and reply chains
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Backend name for logs (e.g. "memory", "http")
    fn name(&self) -> &str;

    /// First page of the user's feed
    ///
    /// Threads come back with `children_loaded == false` unless the service
    /// chooses to inline replies.
    async fn fetch_feed(&self, user: &UserId, limit: usize)
        -> Result<Vec<ThreadEntity>, ContentError>;

    /// Reply chain of one thread, in chain order
    async fn fetch_children(&self, thread: &ThreadId) -> Result<Vec<ContentItem>, ContentError>;

    /// Next page of the feed after `after` (the last loaded thread)
    async fn fetch_more(
        &self,
        user: &UserId,
        after: Option<&ThreadId>,
        limit: usize,
    ) -> Result<Vec<ThreadEntity>, ContentError>;

    /// Threads by id, in the order given; ids that no longer exist are skipped
    async fn fetch_threads(&self, ids: &[ThreadId]) -> Result<Vec<ThreadEntity>, ContentError>;
}

/// Durable storage for the feed position
#[async_trait]
pub trait PositionBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Overwrite the stored position
    async fn save(&self, position: &FeedPosition) -> Result<(), PositionError>;

    /// Read the stored position, if any
    async fn load(&self) -> Result<Option<FeedPosition>, PositionError>;

    /// Forget the stored position
    async fn clear(&self) -> Result<(), PositionError>;
}
