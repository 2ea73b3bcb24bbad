//! Stored message sequences and the storage they are loaded from

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use feed_types::ids::FeedId;
use feed_types::messages::FeedMessage;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Identifies a track within one replay run; tasks play in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackNumber(u32);

impl TrackNumber {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TrackNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a stored batch was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateType {
    /// The batch replaced the whole book.
    Snapshot,
    /// The batch patched the previous state.
    Incremental,
}

/// One captured message with its batch type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message: FeedMessage,
    pub update_type: UpdateType,
}

impl StoredMessage {
    pub fn snapshot(message: impl Into<FeedMessage>) -> Self {
        Self {
            message: message.into(),
            update_type: UpdateType::Snapshot,
        }
    }

    pub fn incremental(message: impl Into<FeedMessage>) -> Self {
        Self {
            message: message.into(),
            update_type: UpdateType::Incremental,
        }
    }
}

/// Inclusive source-time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether a source timestamp in Unix nanoseconds falls in the window.
    pub fn contains_nanos(&self, timestamp: i64) -> bool {
        let at = DateTime::<Utc>::from_timestamp_nanos(timestamp);
        self.start <= at && at <= self.end
    }
}

/// Lazily produced message sequence.
pub type MessageStream = Box<dyn Iterator<Item = StoredMessage> + Send>;

/// Read-only provider of captured sessions.
pub trait TrackStore: Send + Sync {
    /// Deferred load of the messages of `feeds` captured under `context`.
    fn load(
        &self,
        context: &str,
        feeds: &[FeedId],
        range: Option<TimeRange>,
    ) -> Result<MessageStream, StoreError>;
}

/// A stored session selection to be played.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub number: TrackNumber,
    pub context: String,
    pub feeds: Vec<FeedId>,
    pub range: Option<TimeRange>,
}

impl Track {
    pub fn new(number: TrackNumber, context: impl Into<String>, feeds: Vec<FeedId>) -> Self {
        Self {
            number,
            context: context.into(),
            feeds,
            range: None,
        }
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Open this track's message stream from `store`.
    pub fn open(&self, store: &dyn TrackStore) -> Result<MessageStream, StoreError> {
        store.load(&self.context, &self.feeds, self.range)
    }
}

/// Session store held in memory, keyed by context.
#[derive(Default)]
pub struct InMemoryTrackStore {
    sessions: RwLock<HashMap<String, Arc<Vec<StoredMessage>>>>,
}

impl InMemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the captured messages of `context`.
    pub fn insert(&self, context: impl Into<String>, messages: Vec<StoredMessage>) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(context.into(), Arc::new(messages));
    }

    pub fn contexts(&self) -> Vec<String> {
        let mut contexts: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        contexts.sort();
        contexts
    }
}

impl TrackStore for InMemoryTrackStore {
    fn load(
        &self,
        context: &str,
        feeds: &[FeedId],
        range: Option<TimeRange>,
    ) -> Result<MessageStream, StoreError> {
        let session = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(context)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                context: context.to_string(),
            })?;
        let feeds = feeds.to_vec();

        let stream = (0..session.len())
            .map(move |i| session[i].clone())
            .filter(move |stored| {
                let in_feeds = feeds.is_empty() || feeds.contains(stored.message.feed_id());
                let in_range = match (range, stored.message.source_timestamp()) {
                    (Some(range), Some(ts)) => range.contains_nanos(ts),
                    _ => true,
                };
                in_feeds && in_range
            });
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_types::ids::MessageId;
    use feed_types::messages::TradeEvent;
    use feed_types::numeric::Price;
    use feed_types::side::BookSide;

    fn trade(feed: u32, ts: i64) -> StoredMessage {
        StoredMessage::incremental(TradeEvent {
            feed_id: FeedId::new("F", feed),
            price: Price::new(100),
            size: 1.0,
            side: BookSide::Bid,
            message_id: MessageId::new(ts as u64),
            source_timestamp: ts,
        })
    }

    #[test]
    fn test_load_filters_by_feed() {
        let store = InMemoryTrackStore::new();
        store.insert("session", vec![trade(1, 1), trade(2, 2), trade(1, 3)]);

        let loaded: Vec<_> = store
            .load("session", &[FeedId::new("F", 1)], None)
            .unwrap()
            .collect();
        assert_eq!(loaded.len(), 2);

        let all: Vec<_> = store.load("session", &[], None).unwrap().collect();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_load_filters_by_time_range() {
        let store = InMemoryTrackStore::new();
        let second = 1_000_000_000;
        store.insert("session", vec![trade(1, second), trade(1, 5 * second), trade(1, 9 * second)]);

        let range = TimeRange::new(
            DateTime::<Utc>::from_timestamp_nanos(2 * second),
            DateTime::<Utc>::from_timestamp_nanos(6 * second),
        );
        let loaded: Vec<_> = store.load("session", &[], Some(range)).unwrap().collect();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].message.source_timestamp(), Some(5 * second));
    }

    #[test]
    fn test_unknown_context() {
        let store = InMemoryTrackStore::new();
        let err = store.load("missing", &[], None).err().unwrap();
        assert_eq!(
            err,
            StoreError::NotFound {
                context: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_track_open_uses_its_selection() {
        let store = InMemoryTrackStore::new();
        store.insert("a", vec![trade(1, 1), trade(2, 2)]);
        let track = Track::new(TrackNumber::new(1), "a", vec![FeedId::new("F", 2)]);

        let loaded: Vec<_> = track.open(&store).unwrap().collect();
        assert_eq!(loaded.len(), 1);
        assert_eq!(store.contexts(), vec!["a".to_string()]);
    }
}
