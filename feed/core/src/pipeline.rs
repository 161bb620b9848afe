//! Decode Pipeline Abstraction
//!
//! The platform resource that decodes and presents one video's frames sits
//! behind [`DecodePipeline`]. The feed core only manages its lifecycle
//! (construct, play, pause, loop, release); decode internals belong to the
//! platform implementation.
//!
//! [`SimulatedPipeline`] is the headless implementation used by the
//! simulator and the test suite. It advances its playhead from the clock
//! handed to [`DecodePipeline::poll`], so it never owns a timer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

use crate::content::{ContentId, ContentItem};

/// URI schemes a pipeline can be built from
pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "file"];

/// Errors raised while building or driving a decode pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The media URI could not be parsed or uses an unsupported scheme
    #[error("Invalid media source '{uri}': {reason}")]
    InvalidSource {
        /// The offending URI
        uri: String,
        /// Why it was rejected
        reason: String,
    },

    /// The platform refused to hand out a decoder
    #[error("Decoder unavailable for {content_id}: {reason}")]
    DecoderUnavailable {
        /// Content the decoder was requested for
        content_id: ContentId,
        /// Platform reason
        reason: String,
    },

    /// Playback failed after the pipeline was built
    #[error("Playback failed: {0}")]
    Playback(String),
}

/// Validate a media URI before handing it to a decoder
///
/// # Errors
///
/// Returns `PipelineError::InvalidSource` if the URI does not parse or its
/// scheme is not in [`SUPPORTED_SCHEMES`].
pub fn parse_media_source(uri: &str) -> Result<url::Url, PipelineError> {
    let parsed = url::Url::parse(uri).map_err(|e| PipelineError::InvalidSource {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;

    if !SUPPORTED_SCHEMES.contains(&parsed.scheme()) {
        return Err(PipelineError::InvalidSource {
            uri: uri.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    Ok(parsed)
}

/// What a pipeline reported on its latest poll
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Decoding normally (or idle while paused)
    Running,
    /// Playhead reached the end of the media
    EndOfMedia,
    /// Decoding failed; the pipeline is unusable
    Failed(PipelineError),
}

/// A platform decode pipeline for one content item
pub trait DecodePipeline: Send + std::fmt::Debug {
    /// Content this pipeline decodes
    fn content_id(&self) -> &ContentId;

    /// Start or resume output
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot start playback.
    fn play(&mut self) -> Result<(), PipelineError>;

    /// Stop output, keeping decoder state warm
    fn pause(&mut self);

    /// Move the playhead back to the first frame
    fn seek_to_start(&mut self);

    /// Current playhead
    fn position(&self) -> Duration;

    /// Whether output is currently running
    fn is_playing(&self) -> bool;

    /// Let the pipeline observe the clock and report its status
    fn poll(&mut self, now: Instant) -> PipelineStatus;

    /// Free the decoder; further calls are no-ops
    fn release(&mut self);

    /// Whether [`DecodePipeline::release`] has run
    fn is_released(&self) -> bool;
}

/// Boxed pipeline handle as stored by the cache and playback cells
pub type PipelineHandle = Box<dyn DecodePipeline>;

/// Builds decode pipelines for content items
pub trait PipelineFactory: Send + Sync {
    /// Construct a pipeline, not yet playing
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidSource` for unusable URIs and
    /// `PipelineError::DecoderUnavailable` when the platform refuses.
    fn create(&self, item: &ContentItem) -> Result<PipelineHandle, PipelineError>;
}

// ============================================================================
// Simulated pipeline
// ============================================================================

/// Counters shared by every pipeline a [`SimulatedPipelineFactory`] builds
///
/// Lets tests and the simulator assert how many decoders exist and how many
/// are producing output at any instant.
#[derive(Debug, Default)]
pub struct PipelineLedger {
    created: AtomicUsize,
    released: AtomicUsize,
    playing: Mutex<HashSet<u64>>,
}

impl PipelineLedger {
    /// Pipelines constructed so far
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Pipelines released so far
    #[must_use]
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Pipelines constructed and not yet released
    #[must_use]
    pub fn live(&self) -> usize {
        self.created().saturating_sub(self.released())
    }

    /// Pipelines currently producing output
    #[must_use]
    pub fn playing(&self) -> usize {
        self.playing.lock().len()
    }
}

/// Headless decode pipeline that advances with the polled clock
#[derive(Debug)]
pub struct SimulatedPipeline {
    serial: u64,
    content_id: ContentId,
    duration: Duration,
    position: Duration,
    playing: bool,
    last_poll: Option<Instant>,
    released: bool,
    ledger: Arc<PipelineLedger>,
}

impl SimulatedPipeline {
    fn new(item: &ContentItem, ledger: Arc<PipelineLedger>) -> Self {
        static SERIAL: AtomicU64 = AtomicU64::new(1);
        ledger.created.fetch_add(1, Ordering::SeqCst);
        Self {
            serial: SERIAL.fetch_add(1, Ordering::SeqCst),
            content_id: item.id.clone(),
            // A zero-length clip would loop every poll
            duration: item.duration().max(Duration::from_millis(1)),
            position: Duration::ZERO,
            playing: false,
            last_poll: None,
            released: false,
            ledger,
        }
    }
}

impl DecodePipeline for SimulatedPipeline {
    fn content_id(&self) -> &ContentId {
        &self.content_id
    }

    fn play(&mut self) -> Result<(), PipelineError> {
        if self.released {
            return Err(PipelineError::Playback(format!(
                "pipeline for {} already released",
                self.content_id
            )));
        }
        if !self.playing {
            self.playing = true;
            self.last_poll = None;
            self.ledger.playing.lock().insert(self.serial);
        }
        Ok(())
    }

    fn pause(&mut self) {
        if self.playing {
            self.playing = false;
            self.last_poll = None;
            self.ledger.playing.lock().remove(&self.serial);
        }
    }

    fn seek_to_start(&mut self) {
        self.position = Duration::ZERO;
    }

    fn position(&self) -> Duration {
        self.position
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn poll(&mut self, now: Instant) -> PipelineStatus {
        if !self.playing {
            return PipelineStatus::Running;
        }
        if let Some(prev) = self.last_poll {
            self.position += now.saturating_duration_since(prev);
        }
        self.last_poll = Some(now);

        if self.position >= self.duration {
            self.position = self.duration;
            PipelineStatus::EndOfMedia
        } else {
            PipelineStatus::Running
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.pause();
        self.released = true;
        self.ledger.released.fetch_add(1, Ordering::SeqCst);
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for SimulatedPipeline {
    fn drop(&mut self) {
        self.release();
    }
}

/// Factory for [`SimulatedPipeline`]s
#[derive(Debug, Default)]
pub struct SimulatedPipelineFactory {
    ledger: Arc<PipelineLedger>,
    unavailable: Mutex<HashSet<ContentId>>,
}

impl SimulatedPipelineFactory {
    /// Create a new factory with a fresh ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counters for every pipeline this factory builds
    #[must_use]
    pub fn ledger(&self) -> Arc<PipelineLedger> {
        Arc::clone(&self.ledger)
    }

    /// Make construction fail for a content id (decoder refusal)
    pub fn refuse(&self, id: ContentId) {
        self.unavailable.lock().insert(id);
    }
}

impl PipelineFactory for SimulatedPipelineFactory {
    fn create(&self, item: &ContentItem) -> Result<PipelineHandle, PipelineError> {
        parse_media_source(&item.media_uri)?;

        if self.unavailable.lock().contains(&item.id) {
            return Err(PipelineError::DecoderUnavailable {
                content_id: item.id.clone(),
                reason: "simulated refusal".to_string(),
            });
        }

        Ok(Box::new(SimulatedPipeline::new(item, Arc::clone(&self.ledger))))
    }
}
