//! Feed Simulator - Headless Swipe Sessions for stitchfeed
//!
//! Drives a [`FeedController`] with a scripted, randomized swipe session so
//! the feed core can be exercised without a device. Decoding is simulated;
//! content comes from a seeded in-memory catalogue or a remote service.
//!
//! # Usage
//!
//! ```bash
//! # Forty swipes over a generated catalogue
//! feed-sim
//!
//! # Reproducible session against a remote content service
//! feed-sim --seed 7 --service-url https://feed.example/api
//!
//! # Pace frames in real time
//! feed-sim --realtime --swipes 10
//!
//! # Verbose logging
//! RUST_LOG=feed_core=debug feed-sim
//! ```
//!
//! # Signals
//!
//! - `SIGINT`: Stop the session, save the position and release pipelines

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{info, warn};

use feed_core::{
    default_config_path, load_config_from_path, Axis, ConfigOverrides, ContentItem,
    ContentService, FeedConfig, FeedController, FilePositionBackend, HttpContentService,
    InMemoryContentService, MemoryPositionBackend, OverlayAction, PositionBackend,
    SimulatedPipelineFactory, StartOutcome, ThreadEntity, ThreadId, UserId, Vector2,
};

/// Feed Simulator - scripted swipe sessions against the stitchfeed core
#[derive(Parser, Debug)]
#[command(name = "feed-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "STITCHFEED_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Remote content service root (default: generated catalogue)
    #[arg(long, value_name = "URL")]
    service_url: Option<String>,

    /// Viewer identity
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// Position file path
    #[arg(long, value_name = "PATH")]
    position_file: Option<PathBuf>,

    /// Keep the saved position in memory only
    #[arg(long)]
    ephemeral: bool,

    /// Ignore a saved position instead of resuming it
    #[arg(long)]
    fresh: bool,

    /// Threads in the generated catalogue
    #[arg(long, default_value_t = 24)]
    threads: usize,

    /// Gestures to perform
    #[arg(short = 'n', long, default_value_t = 40)]
    swipes: usize,

    /// RNG seed (default: random)
    #[arg(long)]
    seed: Option<u64>,

    /// Pace frames on the wall clock instead of a virtual one
    #[arg(long)]
    realtime: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "STITCHFEED_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("feed_sim={level},feed_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Resolve configuration: file, then environment, then CLI
fn resolve_config(args: &Args) -> Result<FeedConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(ref url) = args.service_url {
        overrides = overrides.with_service_url(url.clone());
    }
    if let Some(ref user) = args.user {
        overrides = overrides.with_user(user.clone());
    }
    if let Some(ref path) = args.position_file {
        overrides = overrides.with_position_file(path.clone());
    }
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Generated catalogue: every thread has a root clip and up to four replies
fn seeded_catalogue(threads: usize, rng: &mut StdRng) -> InMemoryContentService {
    let service = InMemoryContentService::new();
    for t in 0..threads {
        let creator = UserId::new(format!("creator-{}", rng.gen_range(0..8)));
        let clip = |id: String, rng: &mut StdRng| {
            let uri = format!("https://cdn.stitchfeed.example/clips/{id}.mp4");
            let length = Duration::from_millis(rng.gen_range(3_000..15_000));
            ContentItem::new(id, uri, length, creator.clone())
        };

        let root = clip(format!("t{t}-root"), rng);
        let replies = (0..rng.gen_range(0..=4))
            .map(|c| clip(format!("t{t}-c{c}"), rng))
            .collect();
        service.push_thread(ThreadEntity::new(ThreadId::new(format!("t{t}")), root), replies);
    }
    service
}

fn content_service(
    config: &FeedConfig,
    threads: usize,
    rng: &mut StdRng,
) -> Result<Arc<dyn ContentService>> {
    match config.service_url {
        Some(ref url) => {
            let service = HttpContentService::new(url, config.request_timeout)
                .with_context(|| format!("Invalid content service URL: {url}"))?;
            info!(url = %service.base_url(), "Using remote content service");
            Ok(Arc::new(service))
        }
        None => {
            info!(threads, "Using generated catalogue");
            Ok(Arc::new(seeded_catalogue(threads, rng)))
        }
    }
}

fn position_backend(config: &FeedConfig, ephemeral: bool) -> Arc<dyn PositionBackend> {
    if ephemeral {
        return Arc::new(MemoryPositionBackend::new());
    }
    let backend = match config.position_file {
        Some(ref path) => Ok(FilePositionBackend::new(path.clone())),
        None => FilePositionBackend::from_default_location(),
    };
    match backend {
        Ok(backend) => {
            info!(path = ?backend.path(), "Position file");
            Arc::new(backend)
        }
        Err(e) => {
            warn!(error = %e, "No position file; positions kept in memory");
            Arc::new(MemoryPositionBackend::new())
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One scripted gesture
#[derive(Clone, Copy, Debug)]
enum Gesture {
    Swipe { axis: Axis, forward: bool },
    ViewReplies,
    Interruption,
    Recorder,
}

/// Frames a drag is spread over
const DRAG_FRAMES: u32 = 6;
/// Frame spacing
const FRAME: Duration = Duration::from_millis(16);

struct Session {
    feed: FeedController,
    rng: StdRng,
    clock: Instant,
    ticker: Option<Interval>,
}

impl Session {
    async fn frame(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
                self.clock = Instant::now();
            }
            None => {
                self.clock += FRAME;
                tokio::task::yield_now().await;
            }
        }
        self.feed.tick(self.clock);
    }

    async fn frames(&mut self, count: u32) {
        for _ in 0..count {
            self.frame().await;
        }
    }

    fn pick_gesture(&mut self) -> Gesture {
        match self.rng.gen_range(0..100) {
            0..=49 => Gesture::Swipe {
                axis: Axis::Vertical,
                forward: true,
            },
            50..=61 => Gesture::Swipe {
                axis: Axis::Vertical,
                forward: false,
            },
            62..=79 => Gesture::Swipe {
                axis: Axis::Horizontal,
                forward: true,
            },
            80..=87 => Gesture::Swipe {
                axis: Axis::Horizontal,
                forward: false,
            },
            88..=93 => Gesture::ViewReplies,
            94..=97 => Gesture::Interruption,
            _ => Gesture::Recorder,
        }
    }

    async fn perform(&mut self, gesture: Gesture) -> Result<()> {
        match gesture {
            Gesture::Swipe { axis, forward } => self.swipe(axis, forward).await,
            Gesture::ViewReplies => {
                self.feed
                    .dispatch(OverlayAction::ViewReplies, self.clock)
                    .await?;
            }
            Gesture::Interruption => {
                self.feed
                    .dispatch(OverlayAction::AudioInterrupted, self.clock)
                    .await?;
                self.frames(30).await;
                self.feed
                    .dispatch(OverlayAction::Foreground, self.clock)
                    .await?;
            }
            Gesture::Recorder => {
                self.feed
                    .dispatch(OverlayAction::OpenRecorder, self.clock)
                    .await?;
                self.frames(60).await;
                self.feed
                    .dispatch(OverlayAction::RecorderDismissed, self.clock)
                    .await?;
            }
        }
        Ok(())
    }

    /// Drag along `axis`; some drags fall short and snap back
    async fn swipe(&mut self, axis: Axis, forward: bool) {
        let extent = self.feed.config().navigation.viewport.extent(axis);
        let sign = if forward { -1.0 } else { 1.0 };
        let distance = sign * extent * self.rng.gen_range(0.1_f32..0.6);
        let speed = sign * self.rng.gen_range(0.0_f32..900.0);
        let along = |v: f32| match axis {
            Axis::Vertical => Vector2::new(0.0, v),
            Axis::Horizontal => Vector2::new(v, 0.0),
        };

        if !self.feed.begin_drag() {
            return;
        }
        for step in 1..=DRAG_FRAMES {
            #[allow(clippy::cast_precision_loss)]
            let fraction = step as f32 / DRAG_FRAMES as f32;
            self.feed.update_drag(along(distance * fraction));
            self.frame().await;
        }
        self.feed.end_drag(along(distance), along(speed), self.clock);
    }

    async fn run(&mut self, swipes: usize, stop: &AtomicBool) -> Result<()> {
        let settle_frames = settle_frames(self.feed.config());
        for n in 0..swipes {
            if stop.load(Ordering::SeqCst) {
                info!(performed = n, "Session interrupted");
                break;
            }
            let gesture = self.pick_gesture();
            self.perform(gesture).await?;
            self.frames(settle_frames).await;

            // Let replies and pages land before the next gesture
            self.feed.drain_background().await;
            let dwell = self.rng.gen_range(10..120);
            self.frames(dwell).await;

            info!(
                n,
                ?gesture,
                index = %self.feed.current(),
                content_id = ?self.feed.current_content_id(),
                threads = self.feed.content().len(),
                cached = self.feed.cache().len(),
                "Gesture done"
            );
        }
        Ok(())
    }
}

fn settle_frames(config: &FeedConfig) -> u32 {
    let frame_ms = FRAME.as_millis().max(1);
    let frames = config.navigation.animation_duration.as_millis() / frame_ms + 2;
    u32::try_from(frames).unwrap_or(u32::MAX)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Feed simulator starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;
    info!(source = ?config.source(), file = ?config.config_file_path, "Configuration loaded");

    let seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen());
    info!(seed, "Session seed");
    let mut rng = StdRng::seed_from_u64(seed);

    let service = content_service(&config, args.threads, &mut rng)?;
    let positions = position_backend(&config, args.ephemeral);
    let factory = Arc::new(SimulatedPipelineFactory::new());
    let ledger = factory.ledger();

    let mut feed = FeedController::new(config, service, positions, factory);

    // Log every teardown broadcast
    let mut signals = feed.bus().watch_signals();
    let watcher = tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(signal) => info!(signal = signal.label(), "Teardown signal"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Teardown watcher lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT, stopping session");
            stop_clone.store(true, Ordering::SeqCst);
        }
    });

    let now = Instant::now();
    match feed.start().await.context("Failed to load the feed")? {
        StartOutcome::Fresh { threads } => info!(threads, "Starting from the top"),
        StartOutcome::ResumeOffered(saved) => {
            let action = if args.fresh {
                OverlayAction::DeclineResume
            } else {
                OverlayAction::AcceptResume
            };
            info!(saved = %saved.index(), ?action, "Saved position found");
            feed.dispatch(action, now).await?;
        }
    }

    let ticker = args.realtime.then(|| {
        let mut ticker = interval(FRAME);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });
    let mut session = Session {
        feed,
        rng,
        clock: now,
        ticker,
    };
    let result = session.run(args.swipes, &stop).await;

    let mut feed = session.feed;
    let stats = feed.cache().stats();
    feed.shutdown().await?;
    watcher.abort();

    info!(
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        created = ledger.created(),
        released = ledger.released(),
        "Session finished"
    );
    if ledger.live() != 0 {
        warn!(live = ledger.live(), "Pipelines outlived the feed view");
    }

    result
}
