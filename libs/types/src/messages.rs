//! Protocol messages flowing from feed sources into the caches
//!
//! Every message carries the feed it belongs to and the message id of its
//! update batch. Timestamps are Unix nanoseconds from the source clock.
//!
//! Ordering protocol for one batch on one feed:
//! 1. optional `NewSnapshotMarker` (next committed state is a full snapshot)
//! 2. any number of `PriceLevel`, `Delete` and `Trade` events
//! 3. exactly one `EndUpdate` closing the batch

use serde::{Deserialize, Serialize};

use crate::ids::{FeedId, ItemId, MessageId};
use crate::numeric::{Price, Size};
use crate::side::BookSide;

/// A price level was added or replaced (`Add`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevelEvent {
    pub feed_id: FeedId,
    pub item_id: ItemId,
    pub price: Price,
    pub size: Size,
    pub side: BookSide,
    pub message_id: MessageId,
    pub source_timestamp: i64,
}

/// A price level was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEvent {
    pub feed_id: FeedId,
    pub item_id: ItemId,
    pub side: BookSide,
    pub message_id: MessageId,
    pub source_timestamp: i64,
}

/// A trade printed on the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub feed_id: FeedId,
    pub price: Price,
    pub size: Size,
    /// Aggressor side as reported by the venue
    pub side: BookSide,
    pub message_id: MessageId,
    pub source_timestamp: i64,
}

/// Boundary marker: no more events for `message_id` on `feed_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndUpdate {
    pub feed_id: FeedId,
    pub message_id: MessageId,
    /// Number of events the batch carried on this feed
    pub item_count: u32,
    pub source_timestamp: i64,
}

impl EndUpdate {
    /// Whether this marker closes a batch of `feed`.
    pub fn is_mine(&self, feed: &FeedId) -> bool {
        &self.feed_id == feed
    }
}

/// The next committed state of `feed_id` is a full snapshot, not a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSnapshotMarker {
    pub feed_id: FeedId,
    pub message_id: MessageId,
}

/// Any inbound protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FeedMessage {
    PriceLevel(PriceLevelEvent),
    Delete(DeleteEvent),
    Trade(TradeEvent),
    EndUpdate(EndUpdate),
    NewSnapshot(NewSnapshotMarker),
}

impl FeedMessage {
    pub fn feed_id(&self) -> &FeedId {
        match self {
            FeedMessage::PriceLevel(e) => &e.feed_id,
            FeedMessage::Delete(e) => &e.feed_id,
            FeedMessage::Trade(e) => &e.feed_id,
            FeedMessage::EndUpdate(e) => &e.feed_id,
            FeedMessage::NewSnapshot(e) => &e.feed_id,
        }
    }

    pub fn message_id(&self) -> MessageId {
        match self {
            FeedMessage::PriceLevel(e) => e.message_id,
            FeedMessage::Delete(e) => e.message_id,
            FeedMessage::Trade(e) => e.message_id,
            FeedMessage::EndUpdate(e) => e.message_id,
            FeedMessage::NewSnapshot(e) => e.message_id,
        }
    }

    /// Source timestamp, if the message carries one.
    pub fn source_timestamp(&self) -> Option<i64> {
        match self {
            FeedMessage::PriceLevel(e) => Some(e.source_timestamp),
            FeedMessage::Delete(e) => Some(e.source_timestamp),
            FeedMessage::Trade(e) => Some(e.source_timestamp),
            FeedMessage::EndUpdate(e) => Some(e.source_timestamp),
            FeedMessage::NewSnapshot(_) => None,
        }
    }

    /// Book side for price, delete and trade events.
    pub fn side(&self) -> Option<BookSide> {
        match self {
            FeedMessage::PriceLevel(e) => Some(e.side),
            FeedMessage::Delete(e) => Some(e.side),
            FeedMessage::Trade(e) => Some(e.side),
            FeedMessage::EndUpdate(_) | FeedMessage::NewSnapshot(_) => None,
        }
    }

    /// Whether this is a book or trade event that belongs to a batch body.
    pub fn is_batch_item(&self) -> bool {
        matches!(
            self,
            FeedMessage::PriceLevel(_) | FeedMessage::Delete(_) | FeedMessage::Trade(_)
        )
    }

    /// Get the message type as a string label for logging.
    pub fn kind_label(&self) -> &'static str {
        match self {
            FeedMessage::PriceLevel(_) => "PriceLevel",
            FeedMessage::Delete(_) => "Delete",
            FeedMessage::Trade(_) => "Trade",
            FeedMessage::EndUpdate(_) => "EndUpdate",
            FeedMessage::NewSnapshot(_) => "NewSnapshot",
        }
    }
}

impl From<PriceLevelEvent> for FeedMessage {
    fn from(e: PriceLevelEvent) -> Self {
        FeedMessage::PriceLevel(e)
    }
}

impl From<DeleteEvent> for FeedMessage {
    fn from(e: DeleteEvent) -> Self {
        FeedMessage::Delete(e)
    }
}

impl From<TradeEvent> for FeedMessage {
    fn from(e: TradeEvent) -> Self {
        FeedMessage::Trade(e)
    }
}

impl From<EndUpdate> for FeedMessage {
    fn from(e: EndUpdate) -> Self {
        FeedMessage::EndUpdate(e)
    }
}

impl From<NewSnapshotMarker> for FeedMessage {
    fn from(e: NewSnapshotMarker) -> Self {
        FeedMessage::NewSnapshot(e)
    }
}
