//! Protocol inconsistency taxonomy
//!
//! Venues occasionally send redundant or late corrections. These errors
//! describe such inconsistencies; consumers log them and keep going.

use thiserror::Error;

use crate::ids::{FeedId, ItemId, MessageId};
use crate::side::BookSide;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("delete for unknown item {item_id} on feed {feed}")]
    UnknownItem { feed: FeedId, item_id: ItemId },

    #[error("{received} event delivered to the {expected} side of feed {feed}")]
    SideMismatch {
        feed: FeedId,
        expected: BookSide,
        received: BookSide,
    },

    #[error("event for feed {received} delivered to consumer of feed {expected}")]
    ForeignFeed { expected: FeedId, received: FeedId },

    #[error("message id went backwards on feed {feed}: last={last}, received={received}")]
    NonMonotonicMessageId {
        feed: FeedId,
        last: MessageId,
        received: MessageId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_item_display() {
        let err = ProtocolError::UnknownItem {
            feed: FeedId::new("F", 1),
            item_id: ItemId::from("q1"),
        };
        assert_eq!(err.to_string(), "delete for unknown item q1 on feed F#1");
    }

    #[test]
    fn test_non_monotonic_display() {
        let err = ProtocolError::NonMonotonicMessageId {
            feed: FeedId::new("F", 1),
            last: MessageId::new(5),
            received: MessageId::new(3),
        };
        assert!(err.to_string().contains("last=5"));
        assert!(err.to_string().contains("received=3"));
    }
}
