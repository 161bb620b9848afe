//! Feed Core - Headless Short-Video Feed Engine for stitchfeed
//!
//! This crate implements the platform-independent core of a two-axis video
//! feed: vertical swipes move between threads, horizontal swipes move along
//! a thread's reply chain ("stitches"). It owns navigation, playback
//! resource lifecycles, pre-warming and position persistence. Rendering and
//! decoding belong to the embedding platform.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                   Platform shell / feed-sim                       │
//! │      gestures, frame clock, overlay actions, decode factory       │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                           FEED CORE                               │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                      FeedController                         │  │
//! │  │  ┌────────────┐  ┌────────────┐  ┌────────────────────────┐ │  │
//! │  │  │ Navigation │  │  Content   │  │ PlaybackCells (window) │ │  │
//! │  │  │  Machine   │  │   Store    │  │                        │ │  │
//! │  │  └────────────┘  └─────┬──────┘  └───────────┬────────────┘ │  │
//! │  │  ┌────────────┐        │         ┌───────────┴────────────┐ │  │
//! │  │  │  Position  │        │         │  ResourceCache (FIFO)  │ │  │
//! │  │  │   Store    │        │         └───────────┬────────────┘ │  │
//! │  │  └─────┬──────┘        │                     │              │  │
//! │  └────────┼───────────────┼─────────────────────┼──────────────┘  │
//! │           │               │          TeardownBus (Kill, ...)      │
//! └───────────┼───────────────┼───────────────────────────────────────┘
//!             │               │
//!     PositionBackend   ContentService
//!     (memory, file)    (memory, http)
//! ```
//!
//! # Key Types
//!
//! - [`FeedController`]: Foreground owner of one feed view
//! - [`NavigationStateMachine`]: Gesture phases and the current index
//! - [`ContentStore`]: Loaded threads, deduplicated reply fetches
//! - [`ResourceCache`]: Bounded pool of pre-warmed decode pipelines
//! - [`PlaybackCell`]: Pipeline owner for one visible slot
//! - [`TeardownBus`]: Synchronous release broadcast
//! - [`PositionStore`]: Saved position and resume
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Instant;
//! use feed_core::{
//!     backend::{InMemoryContentService, MemoryPositionBackend},
//!     FeedConfig, FeedController, SimulatedPipelineFactory, Vector2,
//! };
//!
//! let mut feed = FeedController::new(
//!     FeedConfig::default(),
//!     Arc::new(InMemoryContentService::new()),
//!     Arc::new(MemoryPositionBackend::new()),
//!     Arc::new(SimulatedPipelineFactory::new()),
//! );
//! feed.start().await?;
//!
//! let now = Instant::now();
//! feed.begin_drag();
//! feed.update_drag(Vector2::new(0.0, -400.0));
//! feed.end_drag(Vector2::new(0.0, -400.0), Vector2::ZERO, now);
//! feed.tick(now);
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Content and position backends behind async traits
//! - [`cache`]: Pre-warmed pipeline pool
//! - [`config`]: TOML / environment configuration
//! - [`content`]: Identifiers and content entities
//! - [`content_store`]: Loaded feed and fetch coordination
//! - [`controller`]: The feed controller and overlay actions
//! - [`navigation`]: Two-axis navigation state machine
//! - [`pipeline`]: Decode pipeline seam and the simulated implementation
//! - [`playback`]: Playback cells
//! - [`position`]: Position persistence and resume
//! - [`teardown`]: Teardown bus

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cache;
pub mod config;
pub mod content;
pub mod content_store;
pub mod controller;
pub mod navigation;
pub mod pipeline;
pub mod playback;
pub mod position;
pub mod teardown;

// Re-exports for convenience
pub use backend::{
    ContentError, ContentService, FilePositionBackend, HttpContentService,
    InMemoryContentService, MemoryPositionBackend, PositionBackend,
};
pub use cache::{CacheStats, PreloadOutcome, ResourceCache, DEFAULT_CACHE_CAPACITY};
pub use content::{ContentId, ContentItem, ThreadEntity, ThreadId, UserId};
pub use content_store::{ChildrenApplied, ChildrenFetch, ContentStore, PendingChildren};
pub use controller::{FeedController, FeedError, OverlayAction, StartOutcome};
pub use navigation::{
    Axis, FeedBounds, FeedIndex, NavEffect, NavPhase, NavigationConfig, NavigationState,
    NavigationStateMachine, SwipeDirection, Vector2, Viewport,
};
pub use pipeline::{
    DecodePipeline, PipelineError, PipelineFactory, PipelineHandle, PipelineLedger,
    PipelineStatus, SimulatedPipelineFactory,
};
pub use playback::{CellContext, CellState, PipelineSource, PlaybackCell, PlaybackTick};
pub use position::{FeedPosition, PositionError, PositionStore};
pub use teardown::{
    Generation, Subscription, TeardownBus, TeardownReport, TeardownSignal, TeardownSubscriber,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, FeedConfig, FeedToml,
};
