//! Navigation State Machine - Two-Axis Feed Gestures
//!
//! Tracks which thread (vertical axis) and which stitch within it
//! (horizontal axis) is current, plus the drag and animation state that
//! moves between them.
//!
//! # Phases
//!
//! ```text
//!            begin_drag                    end_drag (threshold met,
//!   Idle ───────────────► Dragging(axis?) ──────── target in bounds) ──┐
//!    ▲                        │                                        │
//!    │   end_drag (below      │ cancel_drag                            ▼
//!    ├── threshold / edge) ◄──┘                               Animating(direction)
//!    │                                                                 │
//!    └──────────────────── tick(now) after the animation duration ◄────┘
//! ```
//!
//! The first drag update that moves further than the lock threshold fixes
//! the axis for the rest of the gesture. Input is ignored while Animating,
//! so index changes are strictly serialized.
//!
//! The machine is a plain value. The clock is passed in and bounds are read
//! through [`FeedBounds`], which keeps every transition deterministic.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::content::ThreadId;

/// Default movement before the drag axis locks, in points
pub const DEFAULT_AXIS_LOCK_THRESHOLD: f32 = 15.0;
/// Default fraction of the viewport a drag must cover to page
pub const DEFAULT_DISTANCE_FRACTION: f32 = 0.3;
/// Default fling velocity that pages regardless of distance, points/s
pub const DEFAULT_VELOCITY_THRESHOLD: f32 = 500.0;
/// Default page animation duration
pub const DEFAULT_ANIMATION_DURATION: Duration = Duration::from_millis(300);
/// Default distance from the end of the thread list that triggers "load more"
pub const DEFAULT_PREFETCH_DISTANCE: usize = 3;

/// Position in the feed: thread (vertical) and stitch (horizontal, 0 = root)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedIndex {
    /// Index into the loaded thread list
    pub thread: usize,
    /// Index into the thread's chain; 0 is the root clip
    pub stitch: usize,
}

impl FeedIndex {
    /// Create a feed index
    #[must_use]
    pub const fn new(thread: usize, stitch: usize) -> Self {
        Self { thread, stitch }
    }
}

impl fmt::Display for FeedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}/s{}", self.thread, self.stitch)
    }
}

/// 2D vector in surface points
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector2 {
    /// Horizontal component; negative is leftward
    pub x: f32,
    /// Vertical component; negative is upward
    pub y: f32,
}

impl Vector2 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Create a vector
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean length
    #[must_use]
    pub fn length(self) -> f32 {
        self.x.hypot(self.y)
    }

    /// Component along an axis
    #[must_use]
    pub fn along(self, axis: Axis) -> f32 {
        match axis {
            Axis::Vertical => self.y,
            Axis::Horizontal => self.x,
        }
    }

    /// Keep only the component along an axis
    #[must_use]
    pub fn project(self, axis: Axis) -> Self {
        match axis {
            Axis::Vertical => Self::new(0.0, self.y),
            Axis::Horizontal => Self::new(self.x, 0.0),
        }
    }
}

/// Gesture axis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Between threads
    Vertical,
    /// Between stitches of one thread
    Horizontal,
}

impl Axis {
    /// Pick the dominant axis of a movement; equal components go vertical
    #[must_use]
    pub fn dominant(movement: Vector2) -> Self {
        if movement.x.abs() > movement.y.abs() {
            Self::Horizontal
        } else {
            Self::Vertical
        }
    }
}

/// Which way a page transition goes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwipeDirection {
    /// Up to the next thread
    NextThread,
    /// Down to the previous thread
    PreviousThread,
    /// Left to the next reply
    NextStitch,
    /// Right back toward the root
    PreviousStitch,
    /// Programmatic jump
    Jump,
}

/// Phase of the state machine
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NavPhase {
    /// No gesture, no animation
    Idle,
    /// Finger down; axis is `None` until the lock threshold is crossed
    Dragging {
        /// Locked axis, once resolved
        axis: Option<Axis>,
    },
    /// Paging to a new index
    Animating {
        /// Kind of transition
        direction: SwipeDirection,
        /// Index before the transition
        from: FeedIndex,
        /// When the transition started
        started_at: Instant,
    },
}

/// Snapshot of navigation state for one mounted feed view
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NavigationState {
    /// Current thread
    pub current_thread_index: usize,
    /// Current stitch (0 = root)
    pub current_stitch_index: usize,
    /// Visual drag offset; only the locked axis is ever non-zero
    pub drag_offset: Vector2,
    /// Axis locked for the current gesture
    pub locked_axis: Option<Axis>,
    /// Whether a page transition is running
    pub is_animating: bool,
}

/// Read-only view of the loaded feed the machine navigates
pub trait FeedBounds {
    /// Number of loaded threads
    fn thread_count(&self) -> usize;

    /// Maximum stitch index of a thread (its loaded child count)
    fn stitch_count(&self, thread: usize) -> usize;

    /// Whether a thread's reply chain has been fetched
    fn children_loaded(&self, thread: usize) -> bool;

    /// Identifier of the thread at an index
    fn thread_id(&self, thread: usize) -> Option<ThreadId>;
}

/// Side effects of a transition, executed by the owner of the machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavEffect {
    /// The current index changed
    IndexChanged {
        /// Previous index
        from: FeedIndex,
        /// New index
        to: FeedIndex,
    },
    /// A thread's replies are needed
    FetchChildren {
        /// Thread index at the time of the request
        thread: usize,
        /// Thread identifier
        thread_id: ThreadId,
    },
    /// The user is close to the end of the loaded threads
    LoadMoreThreads,
    /// A page transition finished; the view has settled
    Settled {
        /// Index the view settled on
        index: FeedIndex,
    },
    /// A drag ended without paging
    SnappedBack,
}

/// Surface dimensions in points
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in points
    pub width: f32,
    /// Height in points
    pub height: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 390.0,
            height: 844.0,
        }
    }
}

impl Viewport {
    /// Dimension that a drag along `axis` is measured against
    #[must_use]
    pub fn extent(self, axis: Axis) -> f32 {
        match axis {
            Axis::Vertical => self.height,
            Axis::Horizontal => self.width,
        }
    }
}

/// Tuning for gestures and transitions
#[derive(Clone, Debug, PartialEq)]
pub struct NavigationConfig {
    /// Movement before the drag axis locks
    pub axis_lock_threshold: f32,
    /// Fraction of the viewport a drag must cover to page
    pub distance_fraction: f32,
    /// Fling velocity that pages regardless of distance
    pub velocity_threshold: f32,
    /// Page transition duration
    pub animation_duration: Duration,
    /// Distance from the end of the list that triggers "load more"
    pub prefetch_distance: usize,
    /// Surface size
    pub viewport: Viewport,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            axis_lock_threshold: DEFAULT_AXIS_LOCK_THRESHOLD,
            distance_fraction: DEFAULT_DISTANCE_FRACTION,
            velocity_threshold: DEFAULT_VELOCITY_THRESHOLD,
            animation_duration: DEFAULT_ANIMATION_DURATION,
            prefetch_distance: DEFAULT_PREFETCH_DISTANCE,
            viewport: Viewport::default(),
        }
    }
}

/// Two-axis navigation state machine
#[derive(Clone, Debug)]
pub struct NavigationStateMachine {
    config: NavigationConfig,
    current: FeedIndex,
    phase: NavPhase,
    offset: Vector2,
}

impl Default for NavigationStateMachine {
    fn default() -> Self {
        Self::new(NavigationConfig::default())
    }
}

impl NavigationStateMachine {
    /// Create a machine at (0, 0)
    #[must_use]
    pub fn new(config: NavigationConfig) -> Self {
        Self {
            config,
            current: FeedIndex::default(),
            phase: NavPhase::Idle,
            offset: Vector2::ZERO,
        }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    /// Update the surface size (rotation, resize)
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.config.viewport = viewport;
    }

    /// Current index
    #[must_use]
    pub fn current(&self) -> FeedIndex {
        self.current
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> NavPhase {
        self.phase
    }

    /// Current drag offset
    #[must_use]
    pub fn offset(&self) -> Vector2 {
        self.offset
    }

    /// Whether a page transition is running
    #[must_use]
    pub fn is_animating(&self) -> bool {
        matches!(self.phase, NavPhase::Animating { .. })
    }

    /// Axis locked for the current gesture
    #[must_use]
    pub fn locked_axis(&self) -> Option<Axis> {
        match self.phase {
            NavPhase::Dragging { axis } => axis,
            _ => None,
        }
    }

    /// Snapshot for persistence and overlays
    #[must_use]
    pub fn state(&self) -> NavigationState {
        NavigationState {
            current_thread_index: self.current.thread,
            current_stitch_index: self.current.stitch,
            drag_offset: self.offset,
            locked_axis: self.locked_axis(),
            is_animating: self.is_animating(),
        }
    }

    // ========================================================================
    // Gestures
    // ========================================================================

    /// Finger down. Returns `false` (ignored) while Animating.
    pub fn begin_drag(&mut self) -> bool {
        match self.phase {
            NavPhase::Animating { .. } => false,
            NavPhase::Idle | NavPhase::Dragging { .. } => {
                self.phase = NavPhase::Dragging { axis: None };
                self.offset = Vector2::ZERO;
                true
            }
        }
    }

    /// Finger moved; `translation` is cumulative since `begin_drag`
    ///
    /// Returns the locked axis, if any.
    pub fn update_drag(&mut self, translation: Vector2) -> Option<Axis> {
        let NavPhase::Dragging { axis } = self.phase else {
            return None;
        };

        let axis = match axis {
            Some(axis) => axis,
            None => {
                if translation.length() <= self.config.axis_lock_threshold {
                    return None;
                }
                let resolved = Axis::dominant(translation);
                tracing::trace!(axis = ?resolved, "Drag axis locked");
                self.phase = NavPhase::Dragging {
                    axis: Some(resolved),
                };
                resolved
            }
        };

        self.offset = translation.project(axis);
        Some(axis)
    }

    /// Finger up: page if the drag went far or fast enough
    pub fn end_drag(
        &mut self,
        translation: Vector2,
        velocity: Vector2,
        now: Instant,
        bounds: &impl FeedBounds,
    ) -> Vec<NavEffect> {
        let NavPhase::Dragging { axis } = self.phase else {
            return Vec::new();
        };

        let axis = axis.or_else(|| {
            if translation.length() > self.config.axis_lock_threshold {
                Some(Axis::dominant(translation))
            } else if velocity.length() > self.config.velocity_threshold {
                Some(Axis::dominant(velocity))
            } else {
                None
            }
        });
        let Some(axis) = axis else {
            return self.snap_back();
        };

        let distance = translation.along(axis);
        let speed = velocity.along(axis);
        let far_enough =
            distance.abs() > self.config.distance_fraction * self.config.viewport.extent(axis);
        let fast_enough = speed.abs() > self.config.velocity_threshold;
        if !far_enough && !fast_enough {
            return self.snap_back();
        }

        // Distance decides the direction when it qualifies, else the fling
        let signed = if far_enough { distance } else { speed };
        let forward = signed < 0.0;
        let direction = match (axis, forward) {
            (Axis::Vertical, true) => SwipeDirection::NextThread,
            (Axis::Vertical, false) => SwipeDirection::PreviousThread,
            (Axis::Horizontal, true) => SwipeDirection::NextStitch,
            (Axis::Horizontal, false) => SwipeDirection::PreviousStitch,
        };

        match self.step(direction, bounds) {
            Some(target) => self.commit(target, direction, now, bounds),
            None => {
                tracing::debug!(index = %self.current, ?direction, "Swipe at edge ignored");
                self.snap_back()
            }
        }
    }

    /// Gesture interrupted (e.g. stolen by the system): back to Idle
    pub fn cancel_drag(&mut self) {
        if matches!(self.phase, NavPhase::Dragging { .. }) {
            self.phase = NavPhase::Idle;
            self.offset = Vector2::ZERO;
        }
    }

    /// Advance the clock; finishes a page transition once its time is up
    pub fn tick(&mut self, now: Instant) -> Vec<NavEffect> {
        let NavPhase::Animating { started_at, .. } = self.phase else {
            return Vec::new();
        };
        if now.saturating_duration_since(started_at) < self.config.animation_duration {
            return Vec::new();
        }

        self.phase = NavPhase::Idle;
        self.offset = Vector2::ZERO;
        vec![NavEffect::Settled {
            index: self.current,
        }]
    }

    /// Programmatic jump, through the same transition as a swipe
    ///
    /// Bypasses thresholds; the target is clamped to bounds. Ignored while
    /// Animating. A stitch beyond the loaded replies of an unloaded thread
    /// clamps and requests the replies.
    pub fn move_to(
        &mut self,
        target: FeedIndex,
        now: Instant,
        bounds: &impl FeedBounds,
    ) -> Vec<NavEffect> {
        if self.is_animating() {
            tracing::debug!(target = %target, "Jump ignored while animating");
            return Vec::new();
        }
        self.cancel_drag();

        let count = bounds.thread_count();
        if count == 0 {
            return Vec::new();
        }
        let thread = target.thread.min(count - 1);
        let stitch = target.stitch.min(bounds.stitch_count(thread));
        let clamped = FeedIndex::new(thread, stitch);

        if clamped == self.current {
            let mut effects = Vec::new();
            if target.stitch > stitch && !bounds.children_loaded(thread) {
                effects.extend(Self::fetch_children(thread, bounds));
            }
            return effects;
        }

        let mut effects = self.commit(clamped, SwipeDirection::Jump, now, bounds);
        if target.stitch > stitch
            && !bounds.children_loaded(thread)
            && !effects
                .iter()
                .any(|e| matches!(e, NavEffect::FetchChildren { .. }))
        {
            effects.extend(Self::fetch_children(thread, bounds));
        }
        effects
    }

    /// Neighbour the user is currently dragging toward, if it exists
    #[must_use]
    pub fn drag_target(&self, bounds: &impl FeedBounds) -> Option<FeedIndex> {
        let NavPhase::Dragging { axis: Some(axis) } = self.phase else {
            return None;
        };
        let signed = self.offset.along(axis);
        if signed == 0.0 {
            return None;
        }
        let direction = match (axis, signed < 0.0) {
            (Axis::Vertical, true) => SwipeDirection::NextThread,
            (Axis::Vertical, false) => SwipeDirection::PreviousThread,
            (Axis::Horizontal, true) => SwipeDirection::NextStitch,
            (Axis::Horizontal, false) => SwipeDirection::PreviousStitch,
        };
        self.step(direction, bounds)
    }

    /// Index being animated away from, while Animating
    #[must_use]
    pub fn animating_from(&self) -> Option<FeedIndex> {
        match self.phase {
            NavPhase::Animating { from, .. } => Some(from),
            _ => None,
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Index one step away, or `None` at an edge
    fn step(&self, direction: SwipeDirection, bounds: &impl FeedBounds) -> Option<FeedIndex> {
        let FeedIndex { thread, stitch } = self.current;
        match direction {
            SwipeDirection::NextThread => {
                (thread + 1 < bounds.thread_count()).then(|| FeedIndex::new(thread + 1, 0))
            }
            SwipeDirection::PreviousThread => {
                thread.checked_sub(1).map(|t| FeedIndex::new(t, 0))
            }
            SwipeDirection::NextStitch => (stitch < bounds.stitch_count(thread))
                .then(|| FeedIndex::new(thread, stitch + 1)),
            SwipeDirection::PreviousStitch => {
                stitch.checked_sub(1).map(|s| FeedIndex::new(thread, s))
            }
            SwipeDirection::Jump => None,
        }
    }

    fn snap_back(&mut self) -> Vec<NavEffect> {
        self.phase = NavPhase::Idle;
        self.offset = Vector2::ZERO;
        vec![NavEffect::SnappedBack]
    }

    fn commit(
        &mut self,
        target: FeedIndex,
        direction: SwipeDirection,
        now: Instant,
        bounds: &impl FeedBounds,
    ) -> Vec<NavEffect> {
        let from = self.current;
        self.current = target;
        self.phase = NavPhase::Animating {
            direction,
            from,
            started_at: now,
        };
        tracing::debug!(from = %from, to = %target, ?direction, "Navigation index committed");

        let mut effects = vec![NavEffect::IndexChanged { from, to: target }];

        let entered_new_thread = target.thread != from.thread;
        let needs_children = !bounds.children_loaded(target.thread)
            && (target.stitch > 0 || entered_new_thread);
        if needs_children {
            effects.extend(Self::fetch_children(target.thread, bounds));
        }

        if target.thread + self.config.prefetch_distance >= bounds.thread_count() {
            effects.push(NavEffect::LoadMoreThreads);
        }
        effects
    }

    fn fetch_children(thread: usize, bounds: &impl FeedBounds) -> Option<NavEffect> {
        bounds
            .thread_id(thread)
            .map(|thread_id| NavEffect::FetchChildren { thread, thread_id })
    }
}
