//! Error types for the market-data service
//!
//! One enum per failure domain, unified by [`MarketDataError`] so callers
//! can use `?` across cache, engine and scheduler boundaries.
//!
//! Protocol inconsistencies (`feed_types::errors::ProtocolError`) are not
//! part of this taxonomy: they are logged where detected and never fail
//! the pipeline.

use feed_types::ids::MessageId;
use thiserror::Error;

use crate::replay::player::PlayerState;
use crate::replay::track::TrackNumber;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MarketDataError>;

/// Failure reported by a snapshot listener callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("listener {listener} failed: {reason}")]
pub struct ListenerError {
    pub listener: String,
    pub reason: String,
}

impl ListenerError {
    pub fn new(listener: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            listener: listener.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by `OrderBookCache::commit`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    /// A listener failed while the snapshot was being published.
    ///
    /// Mutations stay applied and the modified flag stays cleared.
    #[error("snapshot {snapshot_id} publication aborted: {source}")]
    Listener {
        snapshot_id: MessageId,
        #[source]
        source: ListenerError,
    },
}

/// A message could not be handed to the downstream publisher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("publisher channel closed")]
    ChannelClosed,

    #[error("publisher rejected message {message_id}: {reason}")]
    Rejected { message_id: MessageId, reason: String },
}

/// Errors raised by a per-side incremental update handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("failed to publish incremental update {message_id}: {source}")]
    Publish {
        message_id: MessageId,
        #[source]
        source: PublishError,
    },
}

/// Track storage failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no stored session for context {context}")]
    NotFound { context: String },
}

/// Replay scheduler precondition violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("cannot {operation} while player is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PlayerState,
    },

    #[error("replay requires a running tokio runtime")]
    NoRuntime,

    #[error("track {track} is scheduled by more than one task")]
    DuplicateTrack { track: TrackNumber },

    #[error("track {track} waits on a chain of tracks that leads back to it")]
    DependencyCycle { track: TrackNumber },
}

/// Configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level error type returned by public APIs.
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("commit error: {0}")]
    Commit(#[from] CommitError),

    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
