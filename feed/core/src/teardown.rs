//! Teardown Bus - Resource Release Broadcast
//!
//! A broadcast channel owned by the feed controller. Every playback cell and
//! the resource cache subscribe when they are constructed and unsubscribe
//! when they are dropped.
//!
//! # Architecture
//!
//! ```text
//!                        TeardownBus
//!                ┌────────────────────────────────────────┐
//!                │ BTreeMap<SubscriptionId, Weak<dyn ..>> │
//!                │   - wrapped in Arc<RwLock<>>           │
//!                │ kill generation (AtomicU64)            │
//!                └───────────────┬────────────────────────┘
//!                                │ emit(signal), synchronous
//!           ┌────────────────────┼────────────────────┐
//!           │                    │                    │
//!   ┌───────▼───────┐    ┌───────▼───────┐    ┌───────▼───────┐
//!   │ ResourceCache │    │ PlaybackCell  │    │ PlaybackCell  │
//!   └───────────────┘    └───────────────┘    └───────────────┘
//! ```
//!
//! # Delivery Contract
//!
//! [`TeardownBus::emit`] calls every live subscriber before it returns. A
//! caller that emits `Kill` and then presents a recorder can rely on no
//! decode pipeline being alive at that point.
//!
//! Subscribers are held weakly, so the bus never keeps a cell alive. A
//! [`Subscription`] guard removes its entry on drop.
//!
//! Async work that may finish after a Kill captures a [`Generation`] first
//! and checks [`TeardownBus::is_current`] before touching shared state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the async observer side-channel
const OBSERVER_CHANNEL_CAPACITY: usize = 16;

/// Kinds of teardown signal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeardownSignal {
    /// Release and destroy every owned decode resource
    Kill,
    /// Soft pause; resources stay warm
    PauseAll,
    /// Stop non-decode background activity (audio session and the like)
    StopBackground,
    /// Release platform playback context without destroying cached handles
    Deactivate,
}

impl TeardownSignal {
    /// Whether subscribers must destroy their decode pipelines
    #[must_use]
    pub fn releases_pipelines(self) -> bool {
        matches!(self, Self::Kill)
    }

    /// Human-readable label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Kill => "kill",
            Self::PauseAll => "pause-all",
            Self::StopBackground => "stop-background",
            Self::Deactivate => "deactivate",
        }
    }
}

impl fmt::Display for TeardownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Something that owns playback resources and must react to teardown
pub trait TeardownSubscriber: Send + Sync {
    /// Handle a signal; must finish its release work before returning
    fn on_teardown(&self, signal: TeardownSignal);

    /// Name used in logs
    fn subscriber_label(&self) -> String {
        "subscriber".to_string()
    }
}

/// Kill counter observed by async work before it applies results
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    /// Raw counter value
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Identifier of one subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of one [`TeardownBus::emit`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeardownReport {
    /// Signal that was delivered
    pub signal: TeardownSignal,
    /// Subscribers that handled it
    pub delivered: usize,
    /// Dead subscribers dropped during delivery
    pub pruned: usize,
    /// Kill generation after the emit
    pub generation: Generation,
}

struct BusInner {
    subscribers: RwLock<BTreeMap<SubscriptionId, Weak<dyn TeardownSubscriber>>>,
    next_id: AtomicU64,
    kill_generation: AtomicU64,
    observers: broadcast::Sender<TeardownSignal>,
}

impl BusInner {
    fn remove(&self, id: SubscriptionId) -> bool {
        self.subscribers.write().remove(&id).is_some()
    }
}

/// Broadcast channel for teardown signals
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct TeardownBus {
    inner: Arc<BusInner>,
}

impl Default for TeardownBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TeardownBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownBus")
            .field("subscribers", &self.subscriber_count())
            .field("generation", &self.generation())
            .finish()
    }
}

impl TeardownBus {
    /// Create a bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                kill_generation: AtomicU64::new(0),
                observers,
            }),
        }
    }

    /// Register a subscriber
    ///
    /// The returned guard unsubscribes when dropped; keep it alongside the
    /// resources it protects.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe(&self, subscriber: Weak<dyn TeardownSubscriber>) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner.subscribers.write().insert(id, subscriber);
        tracing::debug!(subscription = %id, "Teardown subscriber registered");
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a signal to every live subscriber, synchronously
    pub fn emit(&self, signal: TeardownSignal) -> TeardownReport {
        if signal == TeardownSignal::Kill {
            self.inner.kill_generation.fetch_add(1, Ordering::SeqCst);
        }

        // Snapshot so handlers may subscribe or unsubscribe while running
        let snapshot: Vec<(SubscriptionId, Weak<dyn TeardownSubscriber>)> = self
            .inner
            .subscribers
            .read()
            .iter()
            .map(|(id, weak)| (*id, Weak::clone(weak)))
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, weak) in snapshot {
            match weak.upgrade() {
                Some(subscriber) => {
                    subscriber.on_teardown(signal);
                    delivered += 1;
                }
                None => dead.push(id),
            }
        }

        let pruned = dead.iter().filter(|id| self.inner.remove(**id)).count();

        // Async observers are best effort; no receivers is fine
        let _ = self.inner.observers.send(signal);

        let report = TeardownReport {
            signal,
            delivered,
            pruned,
            generation: self.generation(),
        };
        tracing::info!(
            signal = %signal,
            delivered = report.delivered,
            pruned = report.pruned,
            generation = %report.generation,
            "Teardown signal delivered"
        );
        report
    }

    /// Current kill generation
    #[must_use]
    pub fn generation(&self) -> Generation {
        Generation(self.inner.kill_generation.load(Ordering::SeqCst))
    }

    /// Whether no Kill has been emitted since `generation` was observed
    #[must_use]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.generation() == generation
    }

    /// Number of registered subscriptions (live or not yet pruned)
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Async side-channel that sees every emitted signal
    ///
    /// For observers that do not own decode resources. Delivery through this
    /// channel is not part of the synchronous contract.
    #[must_use]
    pub fn watch_signals(&self) -> broadcast::Receiver<TeardownSignal> {
        self.inner.observers.subscribe()
    }
}

/// Guard that keeps a subscriber registered
pub struct Subscription {
    id: SubscriptionId,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Identifier of this subscription
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            if bus.remove(self.id) {
                tracing::debug!(subscription = %self.id, "Teardown subscriber removed");
            }
        }
    }
}
