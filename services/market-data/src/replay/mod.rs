//! Replay scheduler for backtesting
//!
//! Plays previously captured feed sessions back into the same protocol
//! consumed by the caches and the incremental engine.
//!
//! - [`Track`]: a stored message sequence for a context and feed set
//! - [`Task`]: a track bound to a start rule, repeat mode and dependency
//! - [`Player`]: the state machine that schedules tasks and owns workers
//!
//! Tasks start in track-number order. The first one fires from a timer,
//! each later one starts when the player observes the predecessor's
//! [`PlayEvent::StopPlaying`].

pub mod player;
pub mod scheduler;
pub mod task;
pub mod track;
mod worker;

pub use player::{Player, PlayerState};
pub use scheduler::{StopRegistry, TaskScheduler};
pub use task::{RepeatMode, StartRule, Task};
pub use track::{InMemoryTrackStore, StoredMessage, TimeRange, Track, TrackNumber, TrackStore, UpdateType};

use std::sync::{Arc, PoisonError, RwLock};

use feed_types::messages::FeedMessage;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::PublishError;
use crate::metrics::FabricMetrics;

/// Event delivered to content listeners during playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum PlayEvent {
    /// A track began playing.
    StartNotify { track: TrackNumber },
    /// One replayed protocol message.
    Message { track: TrackNumber, message: FeedMessage },
    /// A track run ended, by exhaustion or cancellation.
    StopPlaying { track: TrackNumber },
}

impl PlayEvent {
    pub fn track(&self) -> TrackNumber {
        match self {
            PlayEvent::StartNotify { track }
            | PlayEvent::Message { track, .. }
            | PlayEvent::StopPlaying { track } => *track,
        }
    }
}

/// Downstream consumer of replayed content.
pub trait ContentListener: Send + Sync {
    fn on_play(&self, event: &PlayEvent) -> Result<(), PublishError>;

    /// Wall-clock minus source-clock offset of a starting track, in ms.
    fn new_latency_offset(&self, _offset_ms: i64) {}

    fn connected(&self) {}

    fn disconnected(&self) {}
}

/// Registered content listeners, shared between the player and its workers.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn ContentListener>>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: Arc<dyn ContentListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn snapshot(&self) -> Vec<Arc<dyn ContentListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver `event` to every listener; failures are logged, not retried.
    pub(crate) fn emit(&self, event: &PlayEvent, metrics: &FabricMetrics) {
        for listener in self.snapshot() {
            if let Err(err) = listener.on_play(event) {
                metrics.record_publish_failure();
                error!(track = %event.track(), error = %err, "Replayed event lost");
            }
        }
    }

    pub(crate) fn latency_offset(&self, offset_ms: i64) {
        for listener in self.snapshot() {
            listener.new_latency_offset(offset_ms);
        }
    }

    pub(crate) fn connected(&self) {
        for listener in self.snapshot() {
            listener.connected();
        }
    }

    pub(crate) fn disconnected(&self) {
        for listener in self.snapshot() {
            listener.disconnected();
        }
    }
}
