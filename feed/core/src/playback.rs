//! Playback Cells
//!
//! A [`PlaybackCell`] owns at most one decode pipeline for one mounted,
//! visible feed slot. The navigation layer tells it whether it is the active
//! slot through `set_should_play`; the cell turns that into pipeline calls.
//!
//! # Lifecycle
//!
//! ```text
//! Loading ──► Ready ──► Playing ◄──► Paused
//!    │                     │
//!    └──────────► Error ◄──┘   (terminal until remount)
//! ```
//!
//! - Mount takes a warm pipeline from the [`ResourceCache`] when one exists,
//!   otherwise builds a fresh one.
//! - Pausing keeps the pipeline so a drag that bounces back does not
//!   reallocate it.
//! - Every teardown signal pauses; `Kill` also releases the pipeline.
//! - Unmount (drop) pauses, releases and unsubscribes.
//!
//! Cells own no timers. The foreground loop calls [`PlaybackCell::poll`]
//! every frame; looping and the playback tick both happen there.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::cache::ResourceCache;
use crate::content::{ContentId, ContentItem};
use crate::navigation::FeedIndex;
use crate::pipeline::{PipelineError, PipelineFactory, PipelineHandle, PipelineStatus};
use crate::teardown::{Subscription, TeardownBus, TeardownSignal, TeardownSubscriber};

/// Default spacing of playback ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Playback state of a cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellState {
    /// Acquiring a pipeline
    Loading,
    /// Pipeline acquired, not yet synced to `should_play`
    Ready,
    /// Producing output
    Playing,
    /// Not producing output (pipeline may or may not be held)
    Paused,
    /// Pipeline could not be built or failed; inert until remount
    Error,
}

impl CellState {
    /// Human-readable label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Loading => "Loading",
            Self::Ready => "Ready",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Error => "Error",
        }
    }
}

impl std::fmt::Display for CellState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Where a cell's current pipeline came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineSource {
    /// Taken warm from the resource cache
    Cache,
    /// Built on mount
    Fresh,
}

/// Low-frequency playhead report for position-dependent overlays
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackTick {
    /// Slot the cell is mounted at
    pub index: FeedIndex,
    /// Content being played
    pub content_id: ContentId,
    /// Playhead at the time of the tick
    pub position: Duration,
}

/// Dependencies shared by every cell of one feed view
#[derive(Clone)]
pub struct CellContext {
    /// Pre-warmed pipelines
    pub cache: Arc<ResourceCache>,
    /// Builds pipelines on cache miss
    pub factory: Arc<dyn PipelineFactory>,
    /// Teardown broadcast every cell subscribes to
    pub bus: TeardownBus,
    /// Where playback ticks go
    pub ticks: mpsc::Sender<PlaybackTick>,
    /// Spacing of playback ticks
    pub tick_interval: Duration,
}

#[derive(Debug)]
struct CellCore {
    index: FeedIndex,
    item: ContentItem,
    state: CellState,
    should_play: bool,
    pipeline: Option<PipelineHandle>,
    source: Option<PipelineSource>,
    error: Option<PipelineError>,
    last_tick: Option<Instant>,
    ticks: Option<mpsc::Sender<PlaybackTick>>,
    loops: u32,
}

impl CellCore {
    fn set_state(&mut self, state: CellState) {
        if self.state != state {
            tracing::trace!(
                content_id = %self.item.id,
                from = %self.state,
                to = %state,
                "Cell state change"
            );
            self.state = state;
        }
    }

    fn fail(&mut self, error: PipelineError) {
        tracing::warn!(content_id = %self.item.id, error = %error, "Playback cell failed");
        self.release_pipeline();
        self.error = Some(error);
        self.set_state(CellState::Error);
    }

    fn release_pipeline(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.pause();
            pipeline.release();
        }
        self.source = None;
        self.last_tick = None;
    }

    /// Bring the pipeline in line with `should_play`
    fn sync(&mut self) {
        if self.state == CellState::Error {
            return;
        }
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };

        if self.should_play {
            if let Err(e) = pipeline.play() {
                self.fail(e);
                return;
            }
            self.set_state(CellState::Playing);
        } else {
            pipeline.pause();
            self.set_state(CellState::Paused);
        }
    }
}

struct CellShared {
    core: Mutex<CellCore>,
    cache: Arc<ResourceCache>,
    factory: Arc<dyn PipelineFactory>,
    tick_interval: Duration,
}

impl CellShared {
    /// Take a warm pipeline or build one; leaves the cell Ready or Error
    fn acquire(&self, core: &mut CellCore) {
        core.set_state(CellState::Loading);

        if let Some(pipeline) = self.cache.take(&core.item.id) {
            core.pipeline = Some(pipeline);
            core.source = Some(PipelineSource::Cache);
            core.set_state(CellState::Ready);
            return;
        }

        match self.factory.create(&core.item) {
            Ok(pipeline) => {
                core.pipeline = Some(pipeline);
                core.source = Some(PipelineSource::Fresh);
                core.set_state(CellState::Ready);
            }
            Err(e) => core.fail(e),
        }
    }
}

impl TeardownSubscriber for CellShared {
    fn on_teardown(&self, signal: TeardownSignal) {
        let mut core = self.core.lock();
        if core.state == CellState::Error {
            return;
        }

        core.should_play = false;
        if signal.releases_pipelines() {
            core.release_pipeline();
            core.set_state(CellState::Paused);
        } else if let Some(pipeline) = core.pipeline.as_mut() {
            pipeline.pause();
            core.set_state(CellState::Paused);
        }
    }

    fn subscriber_label(&self) -> String {
        format!("playback-cell:{}", self.core.lock().item.id)
    }
}

/// Owner of the decode pipeline for one visible feed slot
pub struct PlaybackCell {
    shared: Arc<CellShared>,
    _subscription: Subscription,
}

impl std::fmt::Debug for PlaybackCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.shared.core.lock();
        f.debug_struct("PlaybackCell")
            .field("index", &core.index)
            .field("content_id", &core.item.id)
            .field("state", &core.state)
            .field("should_play", &core.should_play)
            .finish_non_exhaustive()
    }
}

impl PlaybackCell {
    /// Mount a cell for `item` at `index` and sync it to `should_play`
    #[must_use]
    pub fn mount(index: FeedIndex, item: ContentItem, should_play: bool, ctx: &CellContext) -> Self {
        let shared = Arc::new(CellShared {
            core: Mutex::new(CellCore {
                index,
                item,
                state: CellState::Loading,
                should_play,
                pipeline: None,
                source: None,
                error: None,
                last_tick: None,
                ticks: Some(ctx.ticks.clone()),
                loops: 0,
            }),
            cache: Arc::clone(&ctx.cache),
            factory: Arc::clone(&ctx.factory),
            tick_interval: ctx.tick_interval,
        });

        {
            let mut core = shared.core.lock();
            shared.acquire(&mut core);
            core.sync();
            tracing::debug!(
                index = %core.index,
                content_id = %core.item.id,
                state = %core.state,
                source = ?core.source,
                "Playback cell mounted"
            );
        }

        let weak: Weak<CellShared> = Arc::downgrade(&shared);
        let subscription = ctx.bus.subscribe(weak);

        Self {
            shared,
            _subscription: subscription,
        }
    }

    /// Drive playback from the "is this the active slot" flag
    ///
    /// Re-acquires a pipeline if a Kill released it. No effect in `Error`.
    pub fn set_should_play(&self, should_play: bool) {
        let mut core = self.shared.core.lock();
        if core.state == CellState::Error {
            return;
        }
        core.should_play = should_play;

        if should_play && core.pipeline.is_none() {
            self.shared.acquire(&mut core);
        }
        core.sync();
    }

    /// Observe the clock: loop at end of media and emit playback ticks
    pub fn poll(&self, now: Instant) {
        let mut core = self.shared.core.lock();
        if core.state != CellState::Playing {
            return;
        }

        let status = match core.pipeline.as_mut() {
            Some(pipeline) => pipeline.poll(now),
            None => return,
        };

        match status {
            PipelineStatus::Running => {}
            PipelineStatus::EndOfMedia => {
                if core.should_play {
                    if let Some(pipeline) = core.pipeline.as_mut() {
                        pipeline.seek_to_start();
                    }
                    core.loops = core.loops.saturating_add(1);
                } else if let Some(pipeline) = core.pipeline.as_mut() {
                    pipeline.pause();
                    core.set_state(CellState::Paused);
                    return;
                }
            }
            PipelineStatus::Failed(e) => {
                core.fail(e);
                return;
            }
        }

        let due = core
            .last_tick
            .map_or(true, |last| now.saturating_duration_since(last) >= self.shared.tick_interval);
        if due {
            core.last_tick = Some(now);
            let tick = PlaybackTick {
                index: core.index,
                content_id: core.item.id.clone(),
                position: core.pipeline.as_ref().map_or(Duration::ZERO, |p| p.position()),
            };
            if let Some(ticks) = core.ticks.as_ref() {
                // A full or closed channel only costs one overlay refresh
                let _ = ticks.try_send(tick);
            }
        }
    }

    /// Pause, release the pipeline and unsubscribe
    pub fn unmount(self) {
        drop(self);
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CellState {
        self.shared.core.lock().state
    }

    /// Slot this cell is mounted at
    #[must_use]
    pub fn index(&self) -> FeedIndex {
        self.shared.core.lock().index
    }

    /// Content this cell plays
    #[must_use]
    pub fn content_id(&self) -> ContentId {
        self.shared.core.lock().item.id.clone()
    }

    /// Whether the cell has been told it is the active slot
    #[must_use]
    pub fn should_play(&self) -> bool {
        self.shared.core.lock().should_play
    }

    /// Whether a pipeline is currently held
    #[must_use]
    pub fn has_pipeline(&self) -> bool {
        self.shared.core.lock().pipeline.is_some()
    }

    /// Where the current pipeline came from
    #[must_use]
    pub fn pipeline_source(&self) -> Option<PipelineSource> {
        self.shared.core.lock().source
    }

    /// Playhead of the held pipeline
    #[must_use]
    pub fn position(&self) -> Duration {
        self.shared
            .core
            .lock()
            .pipeline
            .as_ref()
            .map_or(Duration::ZERO, |p| p.position())
    }

    /// Times playback wrapped back to the start
    #[must_use]
    pub fn loop_count(&self) -> u32 {
        self.shared.core.lock().loops
    }

    /// Why the cell is in `Error`, if it is
    #[must_use]
    pub fn error(&self) -> Option<PipelineError> {
        self.shared.core.lock().error.clone()
    }
}

impl Drop for PlaybackCell {
    fn drop(&mut self) {
        let mut core = self.shared.core.lock();
        core.should_play = false;
        core.release_pipeline();
        core.ticks = None;
        if core.state != CellState::Error {
            core.set_state(CellState::Paused);
        }
        tracing::debug!(index = %core.index, content_id = %core.item.id, "Playback cell unmounted");
    }
}
