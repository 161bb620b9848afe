//! Feed Content Model
//!
//! Identifiers and entities shared by every part of the feed core. A single
//! content identifier string is the join key between cache entries, playback
//! cells and any overlay that refers to "the currently visible item".
//!
//! # Design Philosophy
//!
//! Content items are immutable once fetched. Threads are the only mutable
//! entity: their reply chain is filled in lazily when the user first moves
//! sideways into it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier of a single video
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub String);

impl ContentId {
    /// Create a content ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a thread (root clip plus reply chain)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    /// Create a thread ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a creator account
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create a user ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single short-form video
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Unique content identifier
    pub id: ContentId,
    /// Media location handed to the decode pipeline
    pub media_uri: String,
    /// Length of the clip in milliseconds
    pub duration_ms: u64,
    /// Who made it
    pub creator: UserId,
}

impl ContentItem {
    /// Create a new content item
    pub fn new(
        id: impl Into<String>,
        media_uri: impl Into<String>,
        duration: Duration,
        creator: UserId,
    ) -> Self {
        Self {
            id: ContentId::new(id),
            media_uri: media_uri.into(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            creator,
        }
    }

    /// Clip length
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// A root clip plus its ordered reply chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadEntity {
    /// Thread identifier
    pub id: ThreadId,
    /// The clip that started the thread (stitch index 0)
    pub root: ContentItem,
    /// Replies in chain order (stitch indices 1..=len)
    #[serde(default)]
    pub children: Vec<ContentItem>,
    /// Whether `children` reflects the service's reply chain
    #[serde(default)]
    pub children_loaded: bool,
}

impl ThreadEntity {
    /// Create a thread whose replies have not been fetched yet
    #[must_use]
    pub fn new(id: ThreadId, root: ContentItem) -> Self {
        Self {
            id,
            root,
            children: Vec::new(),
            children_loaded: false,
        }
    }

    /// Create a thread with an already known reply chain
    #[must_use]
    pub fn with_children(id: ThreadId, root: ContentItem, children: Vec<ContentItem>) -> Self {
        Self {
            id,
            root,
            children,
            children_loaded: true,
        }
    }

    /// Number of replies currently loaded (the maximum stitch index)
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Item shown at a stitch index (0 = root)
    #[must_use]
    pub fn item_at(&self, stitch_index: usize) -> Option<&ContentItem> {
        match stitch_index {
            0 => Some(&self.root),
            n => self.children.get(n - 1),
        }
    }

    /// Replace the reply chain with freshly fetched children
    pub fn set_children(&mut self, children: Vec<ContentItem>) {
        self.children = children;
        self.children_loaded = true;
    }
}
