//! Feed Controller - The Foreground Owner
//!
//! The controller is the single owner of navigation state and playback
//! mutation for one feed view. It connects:
//! - Gestures and the frame clock to the [`NavigationStateMachine`]
//! - Navigation effects to content fetches, position saves and preloads
//! - The visible window to mounted [`PlaybackCell`]s
//! - Overlay actions (recorder, resume prompt, app lifecycle) to the
//!   [`TeardownBus`]
//!
//! # Design Philosophy
//!
//! Gesture handling never awaits. Anything that needs I/O is spawned into a
//! [`JoinSet`] and reports back over a channel; the results are applied on
//! the next [`FeedController::poll_updates`] (called from `tick`). A Kill
//! aborts every outstanding task before the call that emitted it returns.
//!
//! The controller must be driven from inside a tokio runtime.
//!
//! # Visible Window
//!
//! ```text
//!   settled:    [ current (playing) ]
//!   dragging:   [ current (playing) ] + [ neighbour (paused) ]
//!   animating:  [ current (playing) ] + [ previous (paused)  ]
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::backend::{ContentError, ContentService, PositionBackend};
use crate::cache::{PreloadOutcome, ResourceCache};
use crate::config::FeedConfig;
use crate::content::{ContentId, ContentItem, ThreadEntity, ThreadId, UserId};
use crate::content_store::{ChildrenApplied, ChildrenFetch, ContentStore};
use crate::navigation::{
    Axis, FeedBounds, FeedIndex, NavEffect, NavPhase, NavigationStateMachine, Vector2,
};
use crate::pipeline::PipelineFactory;
use crate::playback::{CellContext, CellState, PlaybackCell, PlaybackTick};
use crate::position::{FeedPosition, PositionError, PositionStore};
use crate::teardown::{Generation, TeardownBus, TeardownReport, TeardownSignal};

/// Capacity of the background result channel
const RESULT_CHANNEL_CAPACITY: usize = 64;

/// Errors surfaced by controller operations
#[derive(Debug, Error)]
pub enum FeedError {
    /// A content request failed
    #[error(transparent)]
    Content(#[from] ContentError),

    /// Saving or loading the position failed
    #[error(transparent)]
    Position(#[from] PositionError),

    /// `AcceptResume` without a resume offer
    #[error("No saved position is waiting to be resumed")]
    NoPendingResume,
}

/// User-facing actions raised by overlays and the app lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OverlayAction {
    /// Jump to the first reply of the current thread
    ViewReplies,
    /// Present the recorder; every decode pipeline is released first
    OpenRecorder,
    /// The recorder was dismissed; the feed resumes
    RecorderDismissed,
    /// Jump to the saved position
    AcceptResume,
    /// Discard the saved position
    DeclineResume,
    /// The app left the foreground
    Background,
    /// The app returned to the foreground
    Foreground,
    /// Another app took the audio session
    AudioInterrupted,
}

/// What [`FeedController::start`] found
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// No saved position; the feed starts at the top
    Fresh {
        /// Threads loaded
        threads: usize,
    },
    /// A saved position is waiting for `AcceptResume` / `DeclineResume`
    ResumeOffered(FeedPosition),
}

/// Messages from background tasks to the foreground
enum BackgroundResult {
    Children {
        thread_id: ThreadId,
        epoch: u64,
        generation: Generation,
        result: Result<Vec<ContentItem>, ContentError>,
    },
    More {
        epoch: u64,
        generation: Generation,
        result: Result<Vec<ThreadEntity>, ContentError>,
    },
}

/// Owner of one feed view
pub struct FeedController {
    config: FeedConfig,
    nav: NavigationStateMachine,
    content: ContentStore,
    positions: PositionStore,
    cache: Arc<ResourceCache>,
    bus: TeardownBus,
    cell_ctx: CellContext,
    cells: HashMap<FeedIndex, PlaybackCell>,
    tasks: JoinSet<()>,
    results_tx: mpsc::Sender<BackgroundResult>,
    results_rx: mpsc::Receiver<BackgroundResult>,
    ticks_rx: mpsc::Receiver<PlaybackTick>,
    last_tick: Option<PlaybackTick>,
    pending_resume: Option<FeedPosition>,
    pending_jump: Option<FeedIndex>,
    suspended: bool,
}

impl std::fmt::Debug for FeedController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedController")
            .field("current", &self.nav.current())
            .field("phase", &self.nav.phase())
            .field("content", &self.content)
            .field("cells", &self.cells.len())
            .field("tasks", &self.tasks.len())
            .field("suspended", &self.suspended)
            .finish_non_exhaustive()
    }
}

impl FeedController {
    /// Create a controller; nothing is loaded until [`FeedController::start`]
    pub fn new(
        config: FeedConfig,
        service: Arc<dyn ContentService>,
        positions: Arc<dyn PositionBackend>,
        factory: Arc<dyn PipelineFactory>,
    ) -> Self {
        let bus = TeardownBus::new();
        let cache = ResourceCache::new(config.cache_capacity, Arc::clone(&factory), &bus);
        let (ticks_tx, ticks_rx) = mpsc::channel(config.tick_channel_capacity);
        let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);

        let cell_ctx = CellContext {
            cache: Arc::clone(&cache),
            factory,
            bus: bus.clone(),
            ticks: ticks_tx,
            tick_interval: config.tick_interval,
        };

        Self {
            nav: NavigationStateMachine::new(config.navigation.clone()),
            content: ContentStore::new(service, UserId::new(config.user.clone()), config.page_size),
            positions: PositionStore::new(positions, config.save_every),
            cache,
            bus,
            cell_ctx,
            cells: HashMap::new(),
            tasks: JoinSet::new(),
            results_tx,
            results_rx,
            ticks_rx,
            last_tick: None,
            pending_resume: None,
            pending_jump: None,
            suspended: false,
            config,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current feed index
    #[must_use]
    pub fn current(&self) -> FeedIndex {
        self.nav.current()
    }

    /// Navigation state machine
    #[must_use]
    pub fn navigation(&self) -> &NavigationStateMachine {
        &self.nav
    }

    /// Loaded feed
    #[must_use]
    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// Pre-warmed pipelines
    #[must_use]
    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// Teardown bus of this view
    #[must_use]
    pub fn bus(&self) -> &TeardownBus {
        &self.bus
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Mounted slots, sorted
    #[must_use]
    pub fn mounted(&self) -> Vec<FeedIndex> {
        let mut slots: Vec<FeedIndex> = self.cells.keys().copied().collect();
        slots.sort();
        slots
    }

    /// Cell mounted at a slot
    #[must_use]
    pub fn cell(&self, index: FeedIndex) -> Option<&PlaybackCell> {
        self.cells.get(&index)
    }

    /// State of the cell mounted at a slot
    #[must_use]
    pub fn cell_state(&self, index: FeedIndex) -> Option<CellState> {
        self.cells.get(&index).map(PlaybackCell::state)
    }

    /// Number of cells currently producing output
    #[must_use]
    pub fn playing_count(&self) -> usize {
        self.cells
            .values()
            .filter(|c| c.state() == CellState::Playing)
            .count()
    }

    /// Content id of the item at the current index
    #[must_use]
    pub fn current_content_id(&self) -> Option<ContentId> {
        self.content.item_at(self.nav.current()).map(|i| i.id.clone())
    }

    /// Latest playback tick received
    #[must_use]
    pub fn last_tick(&self) -> Option<&PlaybackTick> {
        self.last_tick.as_ref()
    }

    /// Saved position waiting for a resume decision
    #[must_use]
    pub fn pending_resume(&self) -> Option<&FeedPosition> {
        self.pending_resume.as_ref()
    }

    /// Whether playback is held off (background, recorder, interruption)
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Background tasks not yet reaped
    #[must_use]
    pub fn background_tasks(&self) -> usize {
        self.tasks.len()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load the first page and look for a saved position
    ///
    /// # Errors
    ///
    /// Returns an error if the feed cannot be loaded. A failure to read the
    /// saved position is logged and treated as "no saved position".
    pub async fn start(&mut self) -> Result<StartOutcome, FeedError> {
        let threads = self.content.load_feed(self.config.page_size).await?;
        self.on_feed_replaced();

        let saved = match self.positions.restore().await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read saved position");
                None
            }
        };

        match saved {
            Some(position) if !position.thread_ids.is_empty() => {
                self.pending_resume = Some(position.clone());
                Ok(StartOutcome::ResumeOffered(position))
            }
            _ => Ok(StartOutcome::Fresh { threads }),
        }
    }

    /// Save the position, stop background work and release every pipeline
    ///
    /// # Errors
    ///
    /// Returns the position backend's error; resources are released anyway.
    pub async fn shutdown(&mut self) -> Result<(), FeedError> {
        self.bus.emit(TeardownSignal::StopBackground);
        self.abort_background();

        for (_, cell) in self.cells.drain() {
            cell.unmount();
        }
        let released = self.cache.clear();
        tracing::info!(released, "Feed view shut down");

        if self.content.is_empty() {
            return Ok(());
        }
        self.positions
            .save_now(self.nav.current(), &self.content.thread_ids())
            .await?;
        Ok(())
    }

    // ========================================================================
    // Gestures
    // ========================================================================

    /// Finger down
    pub fn begin_drag(&mut self) -> bool {
        self.nav.begin_drag()
    }

    /// Finger moved; mounts the neighbour being dragged toward
    pub fn update_drag(&mut self, translation: Vector2) -> Option<Axis> {
        let axis = self.nav.update_drag(translation);
        if axis.is_some() {
            self.refresh_window();
        }
        axis
    }

    /// Finger up
    pub fn end_drag(&mut self, translation: Vector2, velocity: Vector2, now: Instant) {
        let effects = self
            .nav
            .end_drag(translation, velocity, now, &self.content);
        self.apply_effects(effects, now);
    }

    /// Gesture interrupted
    pub fn cancel_drag(&mut self) {
        self.nav.cancel_drag();
        self.refresh_window();
    }

    /// Programmatic jump
    pub fn move_to(&mut self, target: FeedIndex, now: Instant) {
        let effects = self.nav.move_to(target, now, &self.content);
        self.apply_effects(effects, now);
    }

    /// Frame entry point: finish animations, drive cells, apply results
    pub fn tick(&mut self, now: Instant) {
        let effects = self.nav.tick(now);
        self.apply_effects(effects, now);

        for cell in self.cells.values() {
            cell.poll(now);
        }
        while let Ok(tick) = self.ticks_rx.try_recv() {
            self.last_tick = Some(tick);
        }

        self.poll_updates(now);
        while self.tasks.try_join_next().is_some() {}
    }

    // ========================================================================
    // Overlay actions
    // ========================================================================

    /// Handle an overlay or lifecycle action
    ///
    /// `OpenRecorder` has released every pipeline and aborted background
    /// work by the time this returns.
    ///
    /// # Errors
    ///
    /// `AcceptResume` fails if nothing is pending or the saved threads
    /// cannot be reloaded; `DeclineResume` fails if the saved position
    /// cannot be cleared.
    pub async fn dispatch(&mut self, action: OverlayAction, now: Instant) -> Result<(), FeedError> {
        tracing::debug!(?action, index = %self.nav.current(), "Overlay action");
        match action {
            OverlayAction::ViewReplies => {
                self.view_replies(now);
                Ok(())
            }
            OverlayAction::OpenRecorder => {
                self.open_recorder();
                Ok(())
            }
            OverlayAction::RecorderDismissed | OverlayAction::Foreground => {
                self.resume_foreground();
                Ok(())
            }
            OverlayAction::AcceptResume => self.accept_resume(now).await,
            OverlayAction::DeclineResume => {
                self.pending_resume = None;
                self.positions.clear().await?;
                Ok(())
            }
            OverlayAction::Background => {
                self.suspend(TeardownSignal::Deactivate);
                if !self.content.is_empty() {
                    let position =
                        FeedPosition::new(self.nav.current(), self.content.thread_ids());
                    self.spawn_persist(position);
                }
                Ok(())
            }
            OverlayAction::AudioInterrupted => {
                self.suspend(TeardownSignal::PauseAll);
                Ok(())
            }
        }
    }

    /// Jump to the first reply; waits for the replies or the running
    /// page transition when either is outstanding
    fn view_replies(&mut self, now: Instant) {
        let target = FeedIndex::new(self.nav.current().thread, 1);
        if self.nav.is_animating() || !self.content.children_loaded(target.thread) {
            self.pending_jump = Some(target);
        }
        self.move_to(target, now);
    }

    /// Back from the recorder or the background
    ///
    /// A Kill cancelled every reply fetch, so the current thread's replies
    /// are requested again if they never arrived.
    fn resume_foreground(&mut self) {
        self.suspended = false;
        self.refresh_window();

        let thread = self.nav.current().thread;
        if !self.content.is_empty() && !self.content.children_loaded(thread) {
            self.spawn_children_fetch(thread);
        }
        self.preload_neighbours();
    }

    fn open_recorder(&mut self) {
        let report = self.suspend(TeardownSignal::Kill);
        self.abort_background();
        tracing::info!(
            delivered = report.delivered,
            generation = %report.generation,
            "Recorder opening; playback resources released"
        );
    }

    fn suspend(&mut self, signal: TeardownSignal) -> TeardownReport {
        self.suspended = true;
        self.bus.emit(signal)
    }

    async fn accept_resume(&mut self, now: Instant) -> Result<(), FeedError> {
        let saved = self.pending_resume.take().ok_or(FeedError::NoPendingResume)?;

        let restored = self.content.restore_threads(&saved.thread_ids).await?;
        if restored == 0 {
            tracing::info!("Saved threads are gone; starting from the top");
            self.content.load_feed(self.config.page_size).await?;
        }
        self.on_feed_replaced();

        let reloaded = self.content.thread_ids();
        let Some(mut target) = saved.resolve(&reloaded, &self.content) else {
            return Ok(());
        };

        if saved.stitch_index > 0 && !self.content.children_loaded(target.thread) {
            if let Some(ChildrenFetch::Pending(pending)) = self.content.fetch_children(target.thread)
            {
                let result = pending.future.await;
                self.content
                    .apply_children(&pending.thread_id, pending.epoch, result);
            }
            if let Some(resolved) = saved.resolve(&reloaded, &self.content) {
                target = resolved;
            }
        }

        tracing::info!(
            saved = %saved.index(),
            target = %target,
            "Resuming saved feed position"
        );
        self.move_to(target, now);
        Ok(())
    }

    // ========================================================================
    // Background work
    // ========================================================================

    /// Apply results reported by background tasks
    ///
    /// Returns the number of results applied.
    pub fn poll_updates(&mut self, now: Instant) -> usize {
        let mut applied = 0;
        while let Ok(message) = self.results_rx.try_recv() {
            match message {
                BackgroundResult::Children {
                    thread_id,
                    epoch,
                    generation,
                    result,
                } => {
                    if !self.bus.is_current(generation) {
                        continue;
                    }
                    applied += 1;
                    let outcome = self.content.apply_children(&thread_id, epoch, result);
                    tracing::trace!(thread = %thread_id, ?outcome, "Reply fetch applied");
                    match outcome {
                        ChildrenApplied::Applied { .. } => self.follow_pending_jump(now),
                        ChildrenApplied::Failed | ChildrenApplied::Gone => {
                            self.drop_pending_jump(&thread_id);
                        }
                        ChildrenApplied::Stale | ChildrenApplied::Missing => {}
                    }
                }
                BackgroundResult::More {
                    epoch,
                    generation,
                    result,
                } => {
                    if !self.bus.is_current(generation) {
                        continue;
                    }
                    applied += 1;
                    self.content.apply_more(epoch, result);
                }
            }
        }
        applied
    }

    /// Wait for every background task, then apply what they reported
    pub async fn drain_background(&mut self) {
        loop {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::warn!(error = %e, "Background task panicked");
                    }
                }
            }
            let applied = self.poll_updates(Instant::now());
            if applied == 0 && self.tasks.is_empty() {
                break;
            }
        }
    }

    /// Take a deferred "view replies" jump once its replies are loaded and
    /// navigation is idle; leaving the thread abandons it
    fn follow_pending_jump(&mut self, now: Instant) {
        let Some(jump) = self.pending_jump else {
            return;
        };
        if jump.thread != self.nav.current().thread {
            tracing::debug!(jump = %jump, current = %self.nav.current(), "Reply jump abandoned");
            self.pending_jump = None;
            return;
        }
        if self.nav.is_animating() || !self.content.children_loaded(jump.thread) {
            return;
        }
        self.pending_jump = None;
        self.move_to(jump, now);
    }

    fn drop_pending_jump(&mut self, thread_id: &ThreadId) {
        let Some(jump) = self.pending_jump else {
            return;
        };
        if self.content.index_of(thread_id) == Some(jump.thread) {
            tracing::debug!(jump = %jump, "Reply jump dropped; replies did not load");
            self.pending_jump = None;
        }
    }

    fn abort_background(&mut self) {
        self.tasks.abort_all();
        self.tasks.detach_all();
        self.content.cancel_pending();
        while self.results_rx.try_recv().is_ok() {}
        self.pending_jump = None;
    }

    fn spawn_children_fetch(&mut self, thread: usize) {
        let Some(ChildrenFetch::Pending(pending)) = self.content.fetch_children(thread) else {
            return;
        };
        // The first requester delivers the shared result
        if pending.joined {
            return;
        }

        let tx = self.results_tx.clone();
        let generation = self.bus.generation();
        self.tasks.spawn(async move {
            let result = pending.future.await;
            let _ = tx
                .send(BackgroundResult::Children {
                    thread_id: pending.thread_id,
                    epoch: pending.epoch,
                    generation,
                    result,
                })
                .await;
        });
    }

    fn spawn_more(&mut self) {
        let Some(pending) = self.content.fetch_more() else {
            return;
        };

        let tx = self.results_tx.clone();
        let generation = self.bus.generation();
        self.tasks.spawn(async move {
            let result = pending.future.await;
            let _ = tx
                .send(BackgroundResult::More {
                    epoch: pending.epoch,
                    generation,
                    result,
                })
                .await;
        });
    }

    fn spawn_persist(&mut self, position: FeedPosition) {
        let save = self.positions.persist(position);
        self.tasks.spawn(async move {
            if let Err(e) = save.await {
                tracing::warn!(error = %e, "Failed to save feed position");
            }
        });
    }

    fn spawn_preload(&mut self, item: ContentItem) {
        let cache = Arc::clone(&self.cache);
        let generation = self.bus.generation();
        self.tasks.spawn(async move {
            let outcome = cache.preload_if_current(&item, generation);
            if let PreloadOutcome::Inserted {
                evicted: Some(ref evicted),
            } = outcome
            {
                tracing::trace!(content_id = %item.id, evicted = %evicted, "Preload evicted entry");
            }
        });
    }

    // ========================================================================
    // Effects and the visible window
    // ========================================================================

    fn apply_effects(&mut self, effects: Vec<NavEffect>, now: Instant) {
        for effect in effects {
            match effect {
                NavEffect::IndexChanged { from, to } => {
                    tracing::debug!(from = %from, to = %to, "Feed index changed");
                    if let Some(position) = self
                        .positions
                        .record_index_change(to, &self.content.thread_ids())
                    {
                        self.spawn_persist(position);
                    }
                    self.refresh_window();
                }
                NavEffect::FetchChildren { thread, .. } => self.spawn_children_fetch(thread),
                NavEffect::LoadMoreThreads => self.spawn_more(),
                NavEffect::Settled { .. } => {
                    self.refresh_window();
                    self.preload_neighbours();
                    self.follow_pending_jump(now);
                }
                NavEffect::SnappedBack => self.refresh_window(),
            }
        }
    }

    /// Mount what is visible, unmount the rest, and point playback at the
    /// current slot
    fn refresh_window(&mut self) {
        let current = self.nav.current();
        let mut wanted = vec![(current, !self.suspended)];
        if let Some(neighbour) = self.nav.drag_target(&self.content) {
            wanted.push((neighbour, false));
        }
        if let NavPhase::Animating { from, .. } = self.nav.phase() {
            if from != current {
                wanted.push((from, false));
            }
        }

        let keep: HashSet<FeedIndex> = wanted.iter().map(|(index, _)| *index).collect();
        let stale: Vec<FeedIndex> = self
            .cells
            .keys()
            .filter(|index| !keep.contains(index))
            .copied()
            .collect();
        for index in stale {
            if let Some(cell) = self.cells.remove(&index) {
                cell.unmount();
            }
        }

        // Pause before play so two cells never play at once
        wanted.sort_by_key(|(_, play)| *play);
        for (index, play) in wanted {
            if let Some(cell) = self.cells.get(&index) {
                cell.set_should_play(play);
                continue;
            }
            let Some(item) = self.content.item_at(index) else {
                continue;
            };
            let cell = PlaybackCell::mount(index, item.clone(), play, &self.cell_ctx);
            self.cells.insert(index, cell);
        }
    }

    /// Warm the next thread's root and the next reply
    fn preload_neighbours(&mut self) {
        if self.suspended {
            return;
        }
        let current = self.nav.current();
        let candidates = [
            FeedIndex::new(current.thread + 1, 0),
            FeedIndex::new(current.thread, current.stitch + 1),
        ];
        for index in candidates {
            if self.cells.contains_key(&index) {
                continue;
            }
            let Some(item) = self.content.item_at(index).cloned() else {
                continue;
            };
            if self.cache.contains(&item.id) {
                continue;
            }
            self.spawn_preload(item);
        }
    }

    fn on_feed_replaced(&mut self) {
        for (_, cell) in self.cells.drain() {
            cell.unmount();
        }
        self.pending_jump = None;
        self.nav = NavigationStateMachine::new(self.config.navigation.clone());

        if !self.content.is_empty() {
            self.spawn_children_fetch(0);
            self.refresh_window();
            self.preload_neighbours();
        }
    }
}
