//! Feed Position Persistence
//!
//! Remembers where in the feed the user was so a later session can offer
//! to resume. The position is written every few index changes and once
//! more when the feed view is torn down.
//!
//! Resuming reloads the saved thread-id list. If the saved thread is still
//! present it wins, even at a different index; otherwise the saved index is
//! clamped to what came back.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::PositionBackend;
use crate::content::ThreadId;
use crate::navigation::{FeedBounds, FeedIndex};

/// Default number of index changes between saves
pub const DEFAULT_SAVE_EVERY: u32 = 5;

/// Errors raised while saving or loading a position
#[derive(Debug, Error)]
pub enum PositionError {
    /// Failed to read or write the position file
    #[error("Position file I/O failed at {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The stored position could not be encoded or decoded
    #[error("Position (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No data directory is available on this platform
    #[error("No data directory available for position storage")]
    NoDataDir,
}

/// A saved feed position
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPosition {
    /// Thread index at save time
    pub thread_index: usize,
    /// Stitch index at save time
    pub stitch_index: usize,
    /// Loaded thread ids, in feed order, at save time
    pub thread_ids: Vec<ThreadId>,
    /// When the position was taken
    pub saved_at: DateTime<Utc>,
}

impl FeedPosition {
    /// Capture a position now
    #[must_use]
    pub fn new(index: FeedIndex, thread_ids: Vec<ThreadId>) -> Self {
        Self {
            thread_index: index.thread,
            stitch_index: index.stitch,
            thread_ids,
            saved_at: Utc::now(),
        }
    }

    /// Saved index
    #[must_use]
    pub fn index(&self) -> FeedIndex {
        FeedIndex::new(self.thread_index, self.stitch_index)
    }

    /// Id of the thread the user was on, if the list covers it
    #[must_use]
    pub fn anchor_thread(&self) -> Option<&ThreadId> {
        self.thread_ids.get(self.thread_index)
    }

    /// Map the saved position onto a reloaded feed
    ///
    /// Prefers the saved thread's new index when it is still present, else
    /// clamps the saved index to the reloaded length. The stitch is clamped
    /// to the chosen thread's loaded replies. Returns `None` for an empty
    /// feed.
    #[must_use]
    pub fn resolve(&self, reloaded: &[ThreadId], bounds: &impl FeedBounds) -> Option<FeedIndex> {
        let last = reloaded.len().checked_sub(1)?;
        let thread = self
            .anchor_thread()
            .and_then(|id| reloaded.iter().position(|r| r == id))
            .unwrap_or_else(|| self.thread_index.min(last));
        let stitch = self.stitch_index.min(bounds.stitch_count(thread));
        Some(FeedIndex::new(thread, stitch))
    }
}

/// Counts index changes and persists positions through a backend
pub struct PositionStore {
    backend: Arc<dyn PositionBackend>,
    save_every: u32,
    changes_since_save: u32,
    last_recorded: Option<FeedIndex>,
}

impl std::fmt::Debug for PositionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionStore")
            .field("backend", &self.backend.name())
            .field("save_every", &self.save_every)
            .field("changes_since_save", &self.changes_since_save)
            .finish()
    }
}

impl PositionStore {
    /// Create a store saving every `save_every` index changes (minimum 1)
    pub fn new(backend: Arc<dyn PositionBackend>, save_every: u32) -> Self {
        Self {
            backend,
            save_every: save_every.max(1),
            changes_since_save: 0,
            last_recorded: None,
        }
    }

    /// Note an index change; returns the position to persist when due
    ///
    /// Never performs I/O, so it is safe on the gesture path. The caller
    /// hands the returned position to [`PositionStore::persist`].
    pub fn record_index_change(
        &mut self,
        index: FeedIndex,
        thread_ids: &[ThreadId],
    ) -> Option<FeedPosition> {
        self.last_recorded = Some(index);
        self.changes_since_save += 1;
        if self.changes_since_save < self.save_every {
            return None;
        }
        self.changes_since_save = 0;
        Some(FeedPosition::new(index, thread_ids.to_vec()))
    }

    /// Index changes recorded since the last save
    #[must_use]
    pub fn pending_changes(&self) -> u32 {
        self.changes_since_save
    }

    /// Most recently recorded index
    #[must_use]
    pub fn last_recorded(&self) -> Option<FeedIndex> {
        self.last_recorded
    }

    /// Detached save, suitable for a background task
    pub fn persist(&self, position: FeedPosition) -> BoxFuture<'static, Result<(), PositionError>> {
        let backend = Arc::clone(&self.backend);
        async move {
            backend.save(&position).await?;
            tracing::debug!(
                backend = backend.name(),
                thread = position.thread_index,
                stitch = position.stitch_index,
                "Feed position saved"
            );
            Ok(())
        }
        .boxed()
    }

    /// Save immediately, e.g. on view teardown
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the write fails.
    pub async fn save_now(
        &mut self,
        index: FeedIndex,
        thread_ids: &[ThreadId],
    ) -> Result<(), PositionError> {
        self.changes_since_save = 0;
        self.last_recorded = Some(index);
        self.persist(FeedPosition::new(index, thread_ids.to_vec()))
            .await
    }

    /// Read the stored position
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the read fails or the data is corrupt.
    pub async fn restore(&self) -> Result<Option<FeedPosition>, PositionError> {
        let position = self.backend.load().await?;
        if let Some(ref p) = position {
            tracing::info!(
                backend = self.backend.name(),
                thread = p.thread_index,
                stitch = p.stitch_index,
                threads = p.thread_ids.len(),
                saved_at = %p.saved_at,
                "Found saved feed position"
            );
        }
        Ok(position)
    }

    /// Forget the stored position
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the delete fails.
    pub async fn clear(&mut self) -> Result<(), PositionError> {
        self.changes_since_save = 0;
        self.backend.clear().await
    }
}
