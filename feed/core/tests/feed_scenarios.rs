//! End-to-end feed scenarios
//!
//! These tests drive a [`FeedController`] the way a platform shell would:
//! gestures, the frame clock and overlay actions go in; the current index,
//! mounted cells and the pipeline ledger are observed.
//!
//! Everything runs against the in-memory content service, the in-memory
//! position backend and the simulated decode pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use feed_core::backend::{InMemoryContentService, MemoryPositionBackend};
use feed_core::{
    CellState, ContentItem, FeedConfig, FeedController, FeedIndex, FeedPosition, NavPhase,
    OverlayAction, SimulatedPipelineFactory, StartOutcome, SwipeDirection, ThreadEntity, ThreadId,
    UserId, Vector2,
};

// =============================================================================
// Harness
// =============================================================================

fn clip(id: &str) -> ContentItem {
    ContentItem::new(
        id,
        format!("https://cdn.example/{id}.mp4"),
        Duration::from_secs(6),
        UserId::new("creator"),
    )
}

/// Service with one thread per entry; each entry is that thread's reply count
fn service_with(children: &[usize]) -> Arc<InMemoryContentService> {
    let service = InMemoryContentService::new();
    for (i, count) in children.iter().enumerate() {
        let replies = (0..*count).map(|c| clip(&format!("t{i}-c{c}"))).collect();
        service.push_thread(
            ThreadEntity::new(ThreadId::new(format!("t{i}")), clip(&format!("t{i}-root"))),
            replies,
        );
    }
    Arc::new(service)
}

fn thread_ids(n: usize) -> Vec<ThreadId> {
    (0..n).map(|i| ThreadId::new(format!("t{i}"))).collect()
}

struct Harness {
    feed: FeedController,
    factory: Arc<SimulatedPipelineFactory>,
    service: Arc<InMemoryContentService>,
    positions: Arc<MemoryPositionBackend>,
    now: Instant,
}

impl Harness {
    fn build(
        service: Arc<InMemoryContentService>,
        positions: MemoryPositionBackend,
        config: FeedConfig,
    ) -> Self {
        let factory = Arc::new(SimulatedPipelineFactory::new());
        let positions = Arc::new(positions);
        let feed = FeedController::new(config, service.clone(), positions.clone(), factory.clone());
        Self {
            feed,
            factory,
            service,
            positions,
            now: Instant::now(),
        }
    }

    /// Fresh session over `children`, started and settled
    async fn started(children: &[usize]) -> Self {
        let mut h = Self::build(
            service_with(children),
            MemoryPositionBackend::new(),
            FeedConfig::default(),
        );
        let outcome = h.feed.start().await.unwrap();
        assert!(matches!(outcome, StartOutcome::Fresh { .. }));
        h.settle().await;
        h
    }

    fn swipe(&mut self, translation: Vector2) {
        assert!(self.feed.begin_drag());
        self.feed
            .update_drag(Vector2::new(translation.x / 4.0, translation.y / 4.0));
        self.feed.update_drag(translation);
        self.assert_single_playback();
        self.feed.end_drag(translation, Vector2::ZERO, self.now);
        self.assert_single_playback();
        self.now += Duration::from_millis(300);
        self.feed.tick(self.now);
        self.assert_single_playback();
    }

    fn swipe_left(&mut self) {
        self.swipe(Vector2::new(-200.0, 0.0));
    }

    fn swipe_up(&mut self) {
        self.swipe(Vector2::new(0.0, -400.0));
    }

    fn swipe_down(&mut self) {
        self.swipe(Vector2::new(0.0, 400.0));
    }

    /// Let background work land and any animation finish
    async fn settle(&mut self) {
        self.feed.drain_background().await;
        self.now = self.now.max(Instant::now()) + Duration::from_millis(400);
        self.feed.tick(self.now);
    }

    fn assert_single_playback(&self) {
        assert!(self.feed.playing_count() <= 1, "two cells playing at once");
        assert!(self.factory.ledger().playing() <= 1, "two pipelines playing at once");
        assert!(self.feed.cache().len() <= self.feed.cache().capacity());
    }
}

// =============================================================================
// Horizontal navigation
// =============================================================================

#[tokio::test]
async fn test_stitch_swipes_clamp_at_last_reply() {
    let mut h = Harness::started(&[2, 0, 0, 0, 0]).await;
    assert_eq!(h.feed.current(), FeedIndex::new(0, 0));

    h.swipe_left();
    assert_eq!(h.feed.current(), FeedIndex::new(0, 1));
    h.swipe_left();
    assert_eq!(h.feed.current(), FeedIndex::new(0, 2));
    h.swipe_left();
    assert_eq!(h.feed.current(), FeedIndex::new(0, 2));

    assert_eq!(h.feed.mounted(), vec![FeedIndex::new(0, 2)]);
    assert_eq!(h.feed.cell_state(FeedIndex::new(0, 2)), Some(CellState::Playing));
}

#[tokio::test]
async fn test_thread_change_resets_stitch_and_fetches_replies() {
    let mut h = Harness::started(&[1, 3, 0, 0, 0]).await;

    h.swipe_left();
    assert_eq!(h.feed.current(), FeedIndex::new(0, 1));
    h.swipe_up();
    assert_eq!(h.feed.current(), FeedIndex::new(1, 0));

    h.settle().await;
    // Thread 1's replies were fetched on entry
    h.swipe_left();
    assert_eq!(h.feed.current(), FeedIndex::new(1, 1));
}

// =============================================================================
// Visible window and pre-warming
// =============================================================================

#[tokio::test]
async fn test_drag_mounts_neighbour_paused() {
    let mut h = Harness::started(&[0, 0, 0]).await;

    h.feed.begin_drag();
    h.feed.update_drag(Vector2::new(0.0, -60.0));

    assert_eq!(
        h.feed.mounted(),
        vec![FeedIndex::new(0, 0), FeedIndex::new(1, 0)]
    );
    assert_eq!(h.feed.cell_state(FeedIndex::new(0, 0)), Some(CellState::Playing));
    assert_eq!(h.feed.cell_state(FeedIndex::new(1, 0)), Some(CellState::Paused));

    // Bounce back: neighbour goes away, current keeps playing
    h.feed
        .end_drag(Vector2::new(0.0, -60.0), Vector2::ZERO, h.now);
    assert_eq!(h.feed.mounted(), vec![FeedIndex::new(0, 0)]);
    assert_eq!(h.feed.playing_count(), 1);
}

#[tokio::test]
async fn test_settled_view_prewarms_next_thread() {
    let h = Harness::started(&[0, 0, 0]).await;

    let next_root = h
        .feed
        .content()
        .item_at(FeedIndex::new(1, 0))
        .unwrap()
        .id
        .clone();
    assert!(h.feed.cache().contains(&next_root));
}

#[tokio::test]
async fn test_swipe_onto_prewarmed_item_reuses_pipeline() {
    let mut h = Harness::started(&[0, 0, 0, 0]).await;
    let created_before = h.factory.ledger().created();
    let hits_before = h.feed.cache().stats().hits;

    h.swipe_up();

    assert_eq!(h.feed.current(), FeedIndex::new(1, 0));
    assert!(h.feed.cache().stats().hits > hits_before);
    // The swipe itself built no pipeline for thread 1
    assert_eq!(
        h.factory.ledger().created(),
        created_before,
        "expected the pre-warmed pipeline to be reused"
    );
}

#[tokio::test]
async fn test_cache_never_exceeds_capacity_across_session() {
    let mut h = Harness::started(&[1, 2, 0, 1, 0, 0, 2, 0]).await;

    for step in 0..20 {
        match step % 4 {
            0 | 1 => h.swipe_up(),
            2 => h.swipe_left(),
            _ => h.swipe_down(),
        }
        h.settle().await;
        h.assert_single_playback();
        let current = h.feed.current();
        assert!(current.thread < h.feed.content().len());
    }
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_open_recorder_kills_every_pipeline() {
    let mut h = Harness::started(&[1, 0, 0]).await;

    // Mid-drag: current playing, neighbour mounted, cache warm
    h.feed.begin_drag();
    h.feed.update_drag(Vector2::new(0.0, -80.0));
    assert_eq!(h.feed.mounted().len(), 2);
    assert!(h.factory.ledger().live() >= 2);

    h.feed
        .dispatch(OverlayAction::OpenRecorder, h.now)
        .await
        .unwrap();

    assert_eq!(h.factory.ledger().live(), 0);
    assert_eq!(h.factory.ledger().playing(), 0);
    assert!(h.feed.cache().is_empty());
    for index in h.feed.mounted() {
        let cell = h.feed.cell(index).unwrap();
        assert_eq!(cell.state(), CellState::Paused);
        assert!(!cell.has_pipeline());
    }
}

#[tokio::test]
async fn test_recorder_dismissed_reacquires_current() {
    let mut h = Harness::started(&[0, 0]).await;
    h.feed
        .dispatch(OverlayAction::OpenRecorder, h.now)
        .await
        .unwrap();
    assert_eq!(h.feed.playing_count(), 0);

    h.feed
        .dispatch(OverlayAction::RecorderDismissed, h.now)
        .await
        .unwrap();

    assert_eq!(h.feed.cell_state(FeedIndex::new(0, 0)), Some(CellState::Playing));
    assert_eq!(h.factory.ledger().playing(), 1);
}

#[tokio::test]
async fn test_recorder_round_trip_refetches_cancelled_replies() {
    let service = service_with(&[2, 0, 0]);
    let mut h = Harness::build(
        service.clone(),
        MemoryPositionBackend::new(),
        FeedConfig::default(),
    );
    h.feed.start().await.unwrap();

    // Thread 0's reply fetch is still in flight when the recorder opens
    h.feed
        .dispatch(OverlayAction::OpenRecorder, h.now)
        .await
        .unwrap();
    assert!(!h.feed.content().thread(0).unwrap().children_loaded);

    h.feed
        .dispatch(OverlayAction::RecorderDismissed, h.now)
        .await
        .unwrap();
    h.settle().await;
    assert!(h.feed.content().thread(0).unwrap().children_loaded);

    h.swipe_left();
    assert_eq!(h.feed.current(), FeedIndex::new(0, 1));
    assert_eq!(h.feed.cell_state(FeedIndex::new(0, 1)), Some(CellState::Playing));
}

#[tokio::test]
async fn test_audio_interruption_keeps_pipeline_warm() {
    let mut h = Harness::started(&[0, 0]).await;
    let created = h.factory.ledger().created();

    h.feed
        .dispatch(OverlayAction::AudioInterrupted, h.now)
        .await
        .unwrap();
    assert_eq!(h.feed.playing_count(), 0);
    assert!(h.feed.cell(FeedIndex::new(0, 0)).unwrap().has_pipeline());

    // Swipes while interrupted do not start playback
    h.swipe_up();
    assert_eq!(h.feed.playing_count(), 0);

    h.feed
        .dispatch(OverlayAction::Foreground, h.now)
        .await
        .unwrap();
    assert_eq!(h.feed.playing_count(), 1);
    assert!(h.factory.ledger().created() >= created);
}

#[tokio::test]
async fn test_clip_loops_at_end_of_media() {
    let mut h = Harness::started(&[0]).await;
    let index = FeedIndex::new(0, 0);

    h.feed.tick(h.now);
    h.now += Duration::from_millis(6_500);
    h.feed.tick(h.now);

    let cell = h.feed.cell(index).unwrap();
    assert_eq!(cell.state(), CellState::Playing);
    assert_eq!(cell.loop_count(), 1);
    assert_eq!(cell.position(), Duration::ZERO);
    assert!(h.feed.last_tick().is_some());
}

// =============================================================================
// Fetch coordination
// =============================================================================

#[tokio::test]
async fn test_view_replies_waits_for_inflight_fetch() {
    let service = service_with(&[2, 0]);
    let mut h = Harness::build(
        service.clone(),
        MemoryPositionBackend::new(),
        FeedConfig::default(),
    );
    h.feed.start().await.unwrap();

    // Thread 0's replies are still in flight from start()
    h.feed
        .dispatch(OverlayAction::ViewReplies, h.now)
        .await
        .unwrap();
    assert_eq!(h.feed.current(), FeedIndex::new(0, 0));

    h.settle().await;
    assert_eq!(h.feed.current(), FeedIndex::new(0, 1));
    assert_eq!(service.calls().children, 1);
}

#[tokio::test]
async fn test_view_replies_during_transition_follows_on_settle() {
    let mut h = Harness::started(&[0, 2, 0]).await;

    // Page to thread 1; its replies are requested as the transition starts
    assert!(h.feed.begin_drag());
    h.feed.update_drag(Vector2::new(0.0, -100.0));
    h.feed.update_drag(Vector2::new(0.0, -400.0));
    h.feed
        .end_drag(Vector2::new(0.0, -400.0), Vector2::ZERO, h.now);
    assert!(h.feed.navigation().is_animating());

    h.feed
        .dispatch(OverlayAction::ViewReplies, h.now)
        .await
        .unwrap();

    // Replies land mid-transition: the jump waits
    h.feed.drain_background().await;
    assert!(h.feed.content().thread(1).unwrap().children_loaded);
    assert_eq!(h.feed.current(), FeedIndex::new(1, 0));

    h.now += Duration::from_millis(300);
    h.feed.tick(h.now);
    assert_eq!(h.feed.current(), FeedIndex::new(1, 1));

    h.settle().await;
    assert_eq!(h.feed.cell_state(FeedIndex::new(1, 1)), Some(CellState::Playing));
    h.assert_single_playback();
}

#[tokio::test]
async fn test_view_replies_abandoned_when_leaving_thread() {
    let service = service_with(&[0, 2, 0]);
    service.set_latency(Some(Duration::from_millis(20)));
    let mut h = Harness::build(
        service.clone(),
        MemoryPositionBackend::new(),
        FeedConfig::default(),
    );
    h.feed.start().await.unwrap();
    h.settle().await;

    h.swipe_up();
    h.feed
        .dispatch(OverlayAction::ViewReplies, h.now)
        .await
        .unwrap();
    h.swipe_up();
    assert_eq!(h.feed.current(), FeedIndex::new(2, 0));

    h.settle().await;
    assert_eq!(h.feed.current(), FeedIndex::new(2, 0));
}

#[tokio::test]
async fn test_load_more_near_end_appends_without_duplicates() {
    let mut config = FeedConfig::default();
    config.page_size = 4;
    let mut h = Harness::build(
        service_with(&[0; 9]),
        MemoryPositionBackend::new(),
        config,
    );
    h.feed.start().await.unwrap();
    h.settle().await;
    assert_eq!(h.feed.content().len(), 4);

    h.swipe_up();
    h.settle().await;
    assert_eq!(h.feed.content().len(), 8);

    let ids = h.feed.content().thread_ids();
    let mut unique = ids.clone();
    unique.dedup();
    assert_eq!(ids, unique);
    assert_eq!(h.service.calls().more, 1);
}

#[tokio::test]
async fn test_failed_reply_fetch_retries_on_next_entry() {
    let service = service_with(&[0, 2, 0]);
    service.set_children_failing(&ThreadId::new("t1"), true);
    let mut h = Harness::build(service.clone(), MemoryPositionBackend::new(), FeedConfig::default());
    h.feed.start().await.unwrap();
    h.settle().await;

    h.swipe_up();
    h.settle().await;
    assert!(!h.feed.content().thread(1).unwrap().children_loaded);
    // No replies to move into
    h.swipe_left();
    assert_eq!(h.feed.current(), FeedIndex::new(1, 0));

    service.set_children_failing(&ThreadId::new("t1"), false);
    h.swipe_down();
    h.swipe_up();
    h.settle().await;
    h.swipe_left();
    assert_eq!(h.feed.current(), FeedIndex::new(1, 1));
}

#[tokio::test]
async fn test_deleted_thread_shown_without_replies() {
    let service = service_with(&[0, 2, 0]);
    let mut h = Harness::build(
        service.clone(),
        MemoryPositionBackend::new(),
        FeedConfig::default(),
    );
    h.feed.start().await.unwrap();
    h.settle().await;
    service.remove_thread(&ThreadId::new("t1"));

    h.swipe_up();
    h.settle().await;
    assert!(h.feed.content().thread(1).unwrap().children_loaded);
    h.swipe_left();
    assert_eq!(h.feed.current(), FeedIndex::new(1, 0));

    // Re-entering does not ask again
    h.swipe_down();
    h.swipe_up();
    h.settle().await;
    assert_eq!(service.calls().children, 2);
}

// =============================================================================
// Persistence and resume
// =============================================================================

#[tokio::test]
async fn test_position_saved_every_five_changes() {
    let mut h = Harness::started(&[0; 10]).await;

    for _ in 0..4 {
        h.swipe_up();
    }
    h.settle().await;
    assert_eq!(h.positions.save_count(), 0);

    h.swipe_up();
    h.settle().await;
    assert_eq!(h.positions.save_count(), 1);
    assert_eq!(h.positions.stored().unwrap().index(), FeedIndex::new(5, 0));
}

#[tokio::test]
async fn test_resume_jumps_directly_to_saved_reply() {
    let saved = FeedPosition::new(FeedIndex::new(3, 1), thread_ids(5));
    let mut h = Harness::build(
        service_with(&[0, 0, 0, 2, 0]),
        MemoryPositionBackend::with_position(saved.clone()),
        FeedConfig::default(),
    );

    let outcome = h.feed.start().await.unwrap();
    assert_eq!(outcome, StartOutcome::ResumeOffered(saved));

    h.feed
        .dispatch(OverlayAction::AcceptResume, h.now)
        .await
        .unwrap();

    assert_eq!(h.feed.current(), FeedIndex::new(3, 1));
    assert!(matches!(
        h.feed.navigation().phase(),
        NavPhase::Animating {
            direction: SwipeDirection::Jump,
            from,
            ..
        } if from == FeedIndex::new(0, 0)
    ));
    // Nothing in between was ever shown
    for index in h.feed.mounted() {
        assert!(index == FeedIndex::new(0, 0) || index == FeedIndex::new(3, 1));
    }

    h.settle().await;
    assert_eq!(h.feed.mounted(), vec![FeedIndex::new(3, 1)]);
    assert!(h.feed.pending_resume().is_none());
}

#[tokio::test]
async fn test_resume_clamps_when_saved_thread_is_gone() {
    let saved = FeedPosition::new(FeedIndex::new(7, 0), thread_ids(8));
    let service = service_with(&[0; 8]);
    for gone in 5..8 {
        service.remove_thread(&ThreadId::new(format!("t{gone}")));
    }
    let mut h = Harness::build(
        service,
        MemoryPositionBackend::with_position(saved),
        FeedConfig::default(),
    );
    h.feed.start().await.unwrap();

    h.feed
        .dispatch(OverlayAction::AcceptResume, h.now)
        .await
        .unwrap();

    assert_eq!(h.feed.content().len(), 5);
    assert_eq!(h.feed.current(), FeedIndex::new(4, 0));
}

#[tokio::test]
async fn test_resume_reanchors_on_moved_thread() {
    let saved = FeedPosition::new(FeedIndex::new(3, 0), thread_ids(5));
    let service = service_with(&[0; 5]);
    service.remove_thread(&ThreadId::new("t1"));
    let mut h = Harness::build(
        service,
        MemoryPositionBackend::with_position(saved),
        FeedConfig::default(),
    );
    h.feed.start().await.unwrap();

    h.feed
        .dispatch(OverlayAction::AcceptResume, h.now)
        .await
        .unwrap();

    assert_eq!(h.feed.current(), FeedIndex::new(2, 0));
    assert_eq!(
        h.feed.content().thread(2).unwrap().id,
        ThreadId::new("t3")
    );
}

#[tokio::test]
async fn test_decline_resume_clears_saved_position() {
    let saved = FeedPosition::new(FeedIndex::new(2, 0), thread_ids(3));
    let mut h = Harness::build(
        service_with(&[0; 3]),
        MemoryPositionBackend::with_position(saved),
        FeedConfig::default(),
    );
    h.feed.start().await.unwrap();

    h.feed
        .dispatch(OverlayAction::DeclineResume, h.now)
        .await
        .unwrap();

    assert!(h.positions.stored().is_none());
    assert_eq!(h.feed.current(), FeedIndex::new(0, 0));
}

#[tokio::test]
async fn test_shutdown_saves_and_releases() {
    let mut h = Harness::started(&[0, 0, 0]).await;
    h.swipe_up();

    h.feed.shutdown().await.unwrap();

    assert_eq!(h.factory.ledger().live(), 0);
    assert!(h.feed.mounted().is_empty());
    assert_eq!(h.positions.stored().unwrap().index(), FeedIndex::new(1, 0));
}
